//! # Error Types
//!
//! Usage errors surfaced by the public API. Malformed traffic, throttling and
//! middleware failures are recovered internally and never appear here.

use crate::entities::{Role, Target};
use thiserror::Error;

/// Errors returned by endpoint and bridge operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A hub-only operation was called on a peer.
    #[error("{operation} is only available on the hub")]
    HubOnly { operation: &'static str },

    /// The target cannot be addressed from this side of the topology.
    #[error("a {role} cannot publish to {target}")]
    InvalidTarget { role: Role, target: Target },

    /// The bridge was destroyed; it rejects every further call.
    #[error("bridge for channel {channel:?} has been destroyed")]
    Destroyed { channel: String },

    /// The channel name contains the reserved control marker.
    #[error("channel name {name:?} is reserved for registry traffic")]
    ReservedName { name: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A control message could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BridgeError {
    /// True for mistakes in the calling code, as opposed to environment problems.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            BridgeError::HubOnly { .. }
                | BridgeError::InvalidTarget { .. }
                | BridgeError::Destroyed { .. }
                | BridgeError::ReservedName { .. }
        )
    }
}
