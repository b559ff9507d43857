use crate::logging;
use serde_derive::Deserialize;
use sloggers::LoggerConfig;
use std::path::Path;

pub const DEFAULT_READ_BUFFER: usize = 8192;
pub const DEFAULT_WRITE_BUFFER: usize = 65536;

/// Tunables the broker reads from an optional `broker.toml` next to the
/// process. The command line carries only the port; everything here has a
/// serviceable default.
#[derive(Deserialize)]
pub struct BrokerConfig {
    /// Per-stream receive buffer capacity in bytes.
    #[serde(default = "default_read_buffer")]
    pub read_buffer: usize,
    /// Per-stream send buffer capacity in bytes.
    #[serde(default = "default_write_buffer")]
    pub write_buffer: usize,
    #[serde(default = "logging::default_config")]
    pub logging: LoggerConfig,
}

fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

fn default_write_buffer() -> usize {
    DEFAULT_WRITE_BUFFER
}

impl Default for BrokerConfig {
    fn default() -> BrokerConfig {
        BrokerConfig {
            read_buffer: DEFAULT_READ_BUFFER,
            write_buffer: DEFAULT_WRITE_BUFFER,
            logging: logging::default_config(),
        }
    }
}

impl BrokerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> BrokerConfig {
        serdeconv::from_toml_file(path).expect("Error loading broker configuration file")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> BrokerConfig {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            BrokerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parses() {
        let config: BrokerConfig = serdeconv::from_toml_str(
            r#"
read_buffer = 16384
write_buffer = 131072

[logging]
type = "terminal"
level = "debug"
destination = "stderr"
"#,
        )
        .unwrap();

        assert_eq!(config.read_buffer, 16384);
        assert_eq!(config.write_buffer, 131072);
    }

    #[test]
    fn test_partial_config_gets_defaults() {
        let config: BrokerConfig = serdeconv::from_toml_str("read_buffer = 4096").unwrap();

        assert_eq!(config.read_buffer, 4096);
        assert_eq!(config.write_buffer, DEFAULT_WRITE_BUFFER);
    }

    #[test]
    fn test_empty_config_is_default() {
        let config: BrokerConfig = serdeconv::from_toml_str("").unwrap();

        assert_eq!(config.read_buffer, DEFAULT_READ_BUFFER);
        assert_eq!(config.write_buffer, DEFAULT_WRITE_BUFFER);
    }
}
