use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// Installs the global subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over the level chosen by the flags.
pub fn configure_logging(verbose: bool, quiet: bool) {
    let log_level = if quiet {
        Level::ERROR
    } else if verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hyper=warn,reqwest=warn,{log_level}")));

    let _ = registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
