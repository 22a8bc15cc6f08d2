//! Bridge configuration.
//!
//! A flat TOML file with an enumerated key set. Recognized options cover
//! the listen address, the target printer, polling, the local gcode store,
//! and the optional Spoolman proxy target. Anything else is logged and
//! ignored.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// The complete recognized option set.
const KNOWN_KEYS: &[&str] = &[
    "server_host",
    "server_port",
    "printer_ip",
    "printer_token",
    "printer_model",
    "poll_interval_s",
    "gcode_dir",
    "spoolman_server",
];

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the Moonraker surface binds to.
    pub server_host: String,
    pub server_port: u16,

    /// Printer address. Empty runs the bridge in offline mode.
    pub printer_ip: String,
    /// Accepted for compatibility with token-based setups; SACP ignores it.
    pub printer_token: String,
    pub printer_model: String,

    /// Status poll interval in seconds.
    pub poll_interval_s: u64,

    /// Local directory for gcode files.
    pub gcode_dir: PathBuf,

    /// Spoolman server URL; `None` disables the proxy.
    pub spoolman_server: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 7125,
            printer_ip: String::new(),
            printer_token: String::new(),
            printer_model: "Snapmaker J1S".to_string(),
            poll_interval_s: 5,
            gcode_dir: PathBuf::from("gcodes"),
            spoolman_server: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let value: toml::Value = toml::from_str(content)?;

        if let Some(table) = value.as_table() {
            for key in table.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    warn!("ignoring unknown config key: {key}");
                }
            }
        }

        let mut config: Config = value.try_into()?;

        // Resolve a relative gcode dir against the working directory.
        if config.gcode_dir.is_relative() {
            if let Ok(cwd) = std::env::current_dir() {
                config.gcode_dir = cwd.join(&config.gcode_dir);
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_port == 0 {
            return Err(ConfigError::Invalid {
                reason: "server_port must be non-zero".to_string(),
            });
        }
        if self.poll_interval_s == 0 {
            return Err(ConfigError::Invalid {
                reason: "poll_interval_s must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// The listen address for the Moonraker surface.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server_port, 7125);
        assert_eq!(config.poll_interval_s, 5);
        assert_eq!(config.printer_model, "Snapmaker J1S");
        assert!(config.spoolman_server.is_none());
        assert_eq!(config.listen_addr(), "0.0.0.0:7125");
    }

    #[test]
    fn parses_recognized_keys() {
        let config = Config::from_toml(
            r#"
            server_host = "127.0.0.1"
            server_port = 7126
            printer_ip = "192.168.1.201"
            printer_model = "Snapmaker J1"
            poll_interval_s = 2
            spoolman_server = "http://spoolman:8000"
            "#,
        )
        .unwrap();

        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.server_port, 7126);
        assert_eq!(config.printer_ip, "192.168.1.201");
        assert_eq!(config.poll_interval_s, 2);
        assert_eq!(
            config.spoolman_server.as_deref(),
            Some("http://spoolman:8000")
        );
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::from_toml(
            r#"
            printer_ip = "10.0.0.5"
            frobnication_level = 11
            "#,
        )
        .unwrap();
        assert_eq!(config.printer_ip, "10.0.0.5");
    }

    #[test]
    fn missing_keys_take_defaults() {
        let config = Config::from_toml(r#"printer_ip = "10.0.0.5""#).unwrap();
        assert_eq!(config.server_port, 7125);
        assert_eq!(config.printer_model, "Snapmaker J1S");
    }

    #[test]
    fn relative_gcode_dir_is_resolved() {
        let config = Config::from_toml(r#"gcode_dir = "my_gcodes""#).unwrap();
        assert!(config.gcode_dir.is_absolute());
        assert!(config.gcode_dir.ends_with("my_gcodes"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("server_port = 0").is_err());
        assert!(Config::from_toml("poll_interval_s = 0").is_err());
        assert!(Config::from_toml("server_port = \"not a port\"").is_err());
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "printer_ip = \"192.168.1.10\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.printer_ip, "192.168.1.10");

        assert!(Config::load(&dir.path().join("missing.toml")).is_err());
    }
}
