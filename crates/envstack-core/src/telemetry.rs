//! Tracing initialisation for envstack binaries.
//!
//! Filtering honours `ENVSTACK_LOG` first, then `RUST_LOG`, then the level
//! passed in. Only the first call installs a subscriber; later calls are
//! ignored.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable with envstack-specific filter directives.
pub const LOG_ENV_VAR: &str = "ENVSTACK_LOG";

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber.
///
/// * `json`: newline-delimited JSON lines for CI log collectors.
/// * `level`: default verbosity when no filter variable is set.
///
/// Logs go to stderr so stdout stays clean for exported outputs.
pub fn init_tracing(json: bool, level: Level) {
    let filter = env_filter(level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()
            .ok();
    }
}
