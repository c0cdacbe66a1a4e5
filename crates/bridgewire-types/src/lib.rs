//! # Bridgewire Types
//!
//! Types shared between the hub and its peers.
//!
//! ## Design Principles
//!
//! - **Compact wire keys**: channels travel as short [`Token`]s allocated by the hub.
//! - **Structured payloads**: every message body is a [`Payload`], an ordered
//!   argument list. Absence is always expressed as the empty payload.
//! - **Usage errors only**: [`BridgeError`] covers programmer mistakes. Traffic
//!   problems are dropped and logged, never returned.

pub mod entities;
pub mod envelope;
pub mod errors;
pub mod ipc;

pub use entities::*;
pub use envelope::{RegistryMessage, CONTROL_MARKER, CONTROL_TOKEN};
pub use errors::*;
pub use ipc::*;
