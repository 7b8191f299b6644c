//! Logger bootstrap shared by partinject binaries.

use env_logger::{Builder, Env};

/// Environment variable consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "PARTINJECT_LOG";

/// Install the global logger, defaulting to `default_level` when neither
/// `PARTINJECT_LOG` nor `RUST_LOG` is set. Calling it twice is harmless.
pub fn init(default_level: &str) {
    let env = if std::env::var_os(LOG_ENV).is_some() {
        Env::new().filter(LOG_ENV)
    } else {
        Env::default()
    };
    let _ = Builder::from_env(env.default_filter_or(default_level))
        .format_timestamp_secs()
        .try_init();
}
