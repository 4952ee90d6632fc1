pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Builds the root terminal logger. Components derive child loggers from it
/// and log structured key/value pairs.
pub fn init() -> Logger {
    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
    .expect("Error parsing logger config");

    config.build_logger().expect("Error building logger")
}

/// A logger that discards everything. Used by tests and by components that
/// are constructed without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
