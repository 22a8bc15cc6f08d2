//! # Snapbridge Core
//!
//! Core types shared by the snapbridge crates: the layered error taxonomy
//! and the thread-safe printer state snapshot handed to the Moonraker layer.

pub mod error;
pub mod state;

pub use error::{Error, ProtocolError, Result, SessionError};
pub use state::{State, StateData};
