//! # Snapbridge Printer
//!
//! The printer session layer: one long-lived SACP connection per printer,
//! multiplexed by a single-reader packet router, with a timer-driven state
//! poller feeding the shared snapshot.
//!
//! - [`router`] - splits the interleaved response/publish stream by
//!   sequence number
//! - [`client`] - connection lifecycle, subscriptions, commands, and the
//!   upload/print-start choreography
//! - [`poller`] - periodic queries, snapshot maintenance, reconnects, and
//!   print-state restart recovery

pub mod client;
pub mod poller;
pub mod router;

mod upload;

pub use client::{ClientOptions, PrinterClient};
pub use poller::{PollerConfig, StatePoller, StatusCallback};
pub use router::PacketRouter;
