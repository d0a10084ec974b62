/// Clean shutdown after a signal
pub const EXIT_SUCCESS: i32 = 0;

/// Invalid configuration, an unreachable coordination service, or any other fatal error
pub const EXIT_ERROR: i32 = 1;
