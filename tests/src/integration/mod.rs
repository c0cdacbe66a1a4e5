//! Integration flows between a hub and its peers.

pub mod hub_peer_flows;
pub mod security_flows;
