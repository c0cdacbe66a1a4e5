//! # Registry Control Envelope
//!
//! Messages that keep peer registries in agreement with the hub. They travel
//! on [`CONTROL_TOKEN`], which contains a character no token alphabet may
//! use, so it never collides with an allocated token.

use crate::entities::{Identifier, Token};
use crate::errors::BridgeError;
use crate::ipc::Payload;
use serde::{Deserialize, Serialize};

/// Wire key reserved for registry traffic.
pub const CONTROL_TOKEN: &str = "#registry";

/// Marker character reserved for control keys.
pub const CONTROL_MARKER: char = '#';

/// Registry synchronisation messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistryMessage {
    /// Hub to peers: mappings the hub has allocated.
    Assign { entries: Vec<Identifier> },
    /// Peer to hub: the peer needs the mapping for `name`.
    Request { name: String },
}

impl RegistryMessage {
    /// The control wire key as a token.
    pub fn token() -> Token {
        Token::new(CONTROL_TOKEN)
    }

    /// Wrap as a one-argument payload.
    pub fn into_payload(self) -> Result<Payload, BridgeError> {
        let value =
            serde_json::to_value(self).map_err(|e| BridgeError::Serialization(e.to_string()))?;
        Ok(Payload::new(vec![value]))
    }

    /// Decode a control payload. Anything but exactly one well formed message is rejected.
    pub fn from_payload(payload: &Payload) -> Result<Self, BridgeError> {
        match payload.args() {
            [value] => serde_json::from_value(value.clone())
                .map_err(|e| BridgeError::Serialization(e.to_string())),
            args => Err(BridgeError::Serialization(format!(
                "control payload carries {} arguments, expected 1",
                args.len()
            ))),
        }
    }
}
