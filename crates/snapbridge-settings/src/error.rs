//! Configuration errors.

use thiserror::Error;

/// Error loading or validating a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML.
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A recognized option carries an unusable value.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong with the value.
        reason: String,
    },
}
