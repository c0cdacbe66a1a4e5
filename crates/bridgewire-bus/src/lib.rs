//! # Bridgewire Bus
//!
//! Named pub/sub bridges between one hub and many peers, over a transport that
//! only knows how to move keyed messages.
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`registry`] | Channel name to compact token mapping; the hub allocates, peers learn |
//! | [`bridge`] | Channel handle: subscribe, wait, stream, publish, destroy |
//! | [`middleware`] | Fail-open inbound/outbound transform chains |
//! | [`rate_limiter`] | Fixed-window per-sender throttling with an overflow policy |
//! | [`security`] | Hub-side shape, type and volume screening with replaceable hooks |
//! | [`endpoint`] | Owned process context tying the above to a [`Transport`] |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridgewire_bus::{BridgeConfig, Endpoint, Target};
//!
//! let hub = Endpoint::hub(BridgeConfig::default(), transport)?;
//! let chat = hub.bridge("Chat").await?;
//! chat.connect(|sender, payload| println!("{sender}: {payload:?}"))?;
//! chat.publish(Target::AllPeers, serde_json::json!(["welcome"]))?;
//! ```
//!
//! ## Failure model
//!
//! Only usage errors are returned ([`BridgeError`]). Resolution timeouts
//! degrade to the uncompressed name, middleware failures keep the previous
//! payload, and rejected traffic is dropped and logged.

pub mod bridge;
pub mod config;
pub mod endpoint;
pub mod middleware;
pub mod rate_limiter;
pub mod registry;
pub mod security;
pub mod subscriber;
pub mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bridge::Bridge;
pub use config::{BridgeConfig, ConfigError, DEFAULT_ALPHABET};
pub use endpoint::Endpoint;
pub use middleware::{
    InboundMiddleware, InboundPipeline, MiddlewareError, OutboundMiddleware, OutboundPipeline,
    StageResult, Transform,
};
pub use rate_limiter::{OverflowDecision, RateLimitPolicy, RateLimitState, RateLimiter};
pub use registry::{IdentifierRegistry, TokenAlphabet};
pub use security::{SecurityHook, ViolationKind};
pub use subscriber::{InboundStream, Subscription};
pub use transport::{RawHandler, Transport};

// Re-export the shared vocabulary so callers need one import.
pub use bridgewire_types::{
    BridgeError, Identifier, Payload, PeerId, Role, Sender, Target, Token, TypeContract,
    ValueKind,
};
