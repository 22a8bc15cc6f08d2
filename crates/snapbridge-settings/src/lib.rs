//! # Snapbridge Settings
//!
//! Configuration file handling for the bridge. The recognized option set
//! is fixed; unknown keys are logged and ignored rather than rejected, so
//! configs written for newer builds keep loading on older ones.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::ConfigError;
