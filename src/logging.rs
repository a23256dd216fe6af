//! Subscriber setup for the command-line tool.

use tracing_subscriber::EnvFilter;

/// Installs a formatting subscriber. `RUST_LOG` wins when set; otherwise
/// `verbosity` picks info, debug or trace.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed, e.g. by a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
