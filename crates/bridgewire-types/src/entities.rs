//! # Core Entities
//!
//! Identity and addressing for the hub/peer topology.
//!
//! ## Clusters
//!
//! - **Vocabulary**: [`Token`], [`Identifier`]
//! - **Topology**: [`Role`], [`PeerId`], [`Sender`], [`Target`]

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// CLUSTER A: VOCABULARY
// =============================================================================

/// The wire form of a channel name.
///
/// Hub-allocated tokens only contain alphabet characters. A peer that could not
/// resolve a name in time uses the uncompressed name itself as its token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap a wire key.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The degraded token for a channel: the channel name itself.
    pub fn uncompressed(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Borrow the wire key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    /// True for the empty key (never allocated).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One name to token mapping in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    /// Human readable channel name.
    pub name: String,
    /// Compact wire key.
    pub token: Token,
}

impl Identifier {
    pub fn new(name: impl Into<String>, token: Token) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    /// True when the token is the uncompressed name (peer resolution timed out).
    pub fn is_degraded(&self) -> bool {
        self.token.as_str() == self.name
    }
}

// =============================================================================
// CLUSTER B: TOPOLOGY
// =============================================================================

/// Which side of the topology an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The single authoritative endpoint.
    Hub,
    /// Any endpoint deriving its vocabulary from the hub.
    Peer,
}

impl Role {
    pub fn is_hub(self) -> bool {
        matches!(self, Role::Hub)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Hub => f.write_str("hub"),
            Role::Peer => f.write_str("peer"),
        }
    }
}

/// Identity of a remote peer, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Uuid);

impl PeerId {
    /// Generate a fresh random peer identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Origin of an inbound message, as seen by the receiving endpoint.
///
/// A hub only hears from peers and a peer only hears from the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sender {
    Hub,
    Peer(PeerId),
}

impl Sender {
    /// The peer identity, if the message came from a peer.
    pub fn peer(&self) -> Option<PeerId> {
        match self {
            Sender::Peer(id) => Some(*id),
            Sender::Hub => None,
        }
    }
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Hub => f.write_str("hub"),
            Sender::Peer(id) => write!(f, "peer:{id}"),
        }
    }
}

/// Outbound addressing for `publish`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Peer to hub.
    Hub,
    /// Hub to one peer.
    Peer(PeerId),
    /// Hub to a fixed list of peers.
    Peers(Vec<PeerId>),
    /// Hub to every connected peer.
    AllPeers,
    /// Hub to every connected peer except the listed ones.
    AllPeersExcept(Vec<PeerId>),
}

impl Target {
    /// Whether an endpoint playing `role` may address this target.
    pub fn allowed_from(&self, role: Role) -> bool {
        match role {
            Role::Hub => !matches!(self, Target::Hub),
            Role::Peer => matches!(self, Target::Hub),
        }
    }

    /// Whether a given peer is addressed by this target.
    pub fn includes(&self, peer: &PeerId) -> bool {
        match self {
            Target::Hub => false,
            Target::Peer(id) => id == peer,
            Target::Peers(ids) => ids.contains(peer),
            Target::AllPeers => true,
            Target::AllPeersExcept(ids) => !ids.contains(peer),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Hub => f.write_str("hub"),
            Target::Peer(id) => write!(f, "peer:{id}"),
            Target::Peers(ids) => write!(f, "peers[{}]", ids.len()),
            Target::AllPeers => f.write_str("all-peers"),
            Target::AllPeersExcept(ids) => write!(f, "all-peers-except[{}]", ids.len()),
        }
    }
}
