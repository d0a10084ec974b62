use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "elected")]
#[command(version)]
#[command(about = "Run a command on exactly one host, elected through a Consul lock")]
#[command(long_about = "
elected competes for a Consul key together with every other host running the
same key and command. The host whose session holds the key runs the command,
restarting it whenever it exits. Everyone else waits and takes over when the
key becomes free. On SIGINT or SIGTERM the command is stopped, the key is
released and the session is destroyed.

Every flag can also be set in elected.toml (or .yaml/.json) in the working
directory, in the file given with --config, or through ELECTED_* environment
variables. Flags win over the environment, which wins over files.

Example usage:
  elected -k jobs/scheduler -c './scheduler --once'
  elected -s consul.internal:8500 -k jobs/mailer -c mailer --cwd /srv/mailer
  elected -k jobs/api -c ./api --watch /srv/api/release --restart
")]
pub struct Cli {
    /// Consul agent address as host:port
    #[arg(short, long)]
    pub server: Option<String>,

    /// Lock key to compete for
    #[arg(short, long)]
    pub key: Option<String>,

    /// Command to run while leader, split on whitespace
    #[arg(short, long)]
    pub command: Option<String>,

    /// Working directory of the command
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Wait for this path to exist before starting
    #[arg(long)]
    pub watch: Option<PathBuf>,

    /// Restart the command when the --watch path changes
    #[arg(long)]
    pub restart: bool,

    /// Upper bound of each blocking watch, in Consul duration syntax
    #[arg(long)]
    pub wait: Option<String>,

    /// Configuration file to load instead of elected.{toml,yaml,yml,json}
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,
}
