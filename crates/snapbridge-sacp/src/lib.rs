//! # Snapbridge SACP
//!
//! Implementation of the Snapmaker Application Communication Protocol
//! (SACP), a binary, sequence-numbered request/response + publish/subscribe
//! protocol spoken over a single TCP connection on port 8888.
//!
//! This crate is the pure protocol layer:
//! - [`packet`] - frame encoding/decoding with dual checksums
//! - [`telemetry`] - parsers for the query/subscription payloads
//! - [`discovery`] - UDP broadcast probe for printers on the local network
//!
//! Connection management and packet routing live in `snapbridge-printer`.

pub mod discovery;
pub mod packet;
pub mod telemetry;

pub use discovery::{discover, DiscoveredPrinter};
pub use packet::{next_sequence, put_bytes, put_string, read_packet, Packet};
pub use telemetry::{
    parse_bed_info, parse_coordinate_info, parse_current_line, parse_extruder_info, parse_fan_info,
    parse_file_info, parse_heartbeat, parse_print_time, parse_printing_file_info, BedZoneData,
    CoordinateData, ExtruderData, FanData, MachineStatus, PrintFileInfo,
};

/// SACP TCP port.
pub const PORT: u16 = 8888;

/// UDP port answering discovery broadcasts.
pub const DISCOVERY_PORT: u16 = 20054;

/// Chunk size for file uploads.
pub const DATA_LEN: usize = 60 * 1024;

/// Receiver id of the motion controller MCU.
pub const RECEIVER_CONTROLLER: u8 = 1;

/// Receiver id of the touchscreen (HMI) MCU.
pub const RECEIVER_SCREEN: u8 = 2;

/// Attribute value for request packets.
pub const ATTRIBUTE_REQUEST: u8 = 0;

/// Attribute value for acknowledgement packets.
pub const ATTRIBUTE_ACK: u8 = 1;
