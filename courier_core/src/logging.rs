pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

use sloggers::{Config, LoggerConfig};

/// Default broker logging section: terminal output on stdout at info level.
pub fn default_config() -> LoggerConfig {
    serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stdout"
"#,
    )
    .expect("inline logging config must parse")
}

/// Logging section for processes that reserve stdout for payload output.
pub fn stderr_config() -> LoggerConfig {
    serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
    )
    .expect("inline logging config must parse")
}

pub fn init(config: &LoggerConfig) -> Result<Logger, sloggers::Error> {
    config.build_logger()
}

/// A logger that swallows everything. Used by components constructed without
/// a parent logger (tests, mostly).
pub fn null() -> Logger {
    Logger::root(Discard, o!())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs_parse() {
        default_config();
        stderr_config();
    }

    #[test]
    fn test_null_logger_builds() {
        let log = null();
        info!(log, "discarded");
    }
}
