pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

const DEFAULT_CONFIG: &str = r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#;

/// Builds the root terminal logger from the default configuration.
pub fn init() -> Logger {
    from_toml(DEFAULT_CONFIG)
}

/// Builds a logger from a sloggers TOML configuration snippet.
pub fn from_toml(config: &str) -> Logger {
    let config: LoggerConfig =
        serdeconv::from_toml_str(config).expect("Error parsing logger configuration");

    config.build_logger().expect("Error building logger")
}

/// A logger that swallows all records. Components fall back to this when no
/// parent logger is supplied.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
