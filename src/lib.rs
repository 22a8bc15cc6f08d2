//! # Snapbridge
//!
//! A protocol bridge core for Snapmaker printers: it speaks SACP - the
//! binary, sequence-numbered request/response + publish/subscribe protocol
//! the printers serve on TCP 8888 - and exposes the printer as a client
//! capability set plus a thread-safe state snapshot, ready for a
//! Moonraker-compatible HTTP/WebSocket layer to consume.
//!
//! ## Architecture
//!
//! The workspace is organized as:
//!
//! 1. **snapbridge-core** - error taxonomy and the state snapshot
//! 2. **snapbridge-sacp** - wire codec, telemetry parsers, UDP discovery
//! 3. **snapbridge-gcode** - the upload-path gcode post-processor
//! 4. **snapbridge-printer** - packet router, printer session, state poller
//! 5. **snapbridge-settings** - TOML configuration
//! 6. **snapbridge** - this crate: the binary wiring it all together

pub use snapbridge_core::{Error, ProtocolError, Result, SessionError, State, StateData};
pub use snapbridge_gcode::process as process_gcode;
pub use snapbridge_printer::{
    ClientOptions, PacketRouter, PollerConfig, PrinterClient, StatePoller, StatusCallback,
};
pub use snapbridge_sacp::{discover, DiscoveredPrinter, Packet};
pub use snapbridge_settings::{Config, ConfigError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with the default configuration.
///
/// Structured console output via `tracing`, filterable through the
/// `RUST_LOG` environment variable, defaulting to `info`.
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    Ok(())
}
