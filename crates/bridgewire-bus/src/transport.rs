//! # Transport Port
//!
//! The host-provided, message-oriented transport the core runs on. The core
//! makes no assumption about batching, timing, ordering across keys, or
//! delivery confirmation.

use bridgewire_types::{Payload, Sender, Target, Token};
use serde_json::Value;
use std::sync::Arc;

/// Raw inbound handler: `(sender, undecoded data)`.
///
/// Data is undecoded so the hub can screen its shape before any bridge sees it.
pub type RawHandler = Arc<dyn Fn(Sender, Value) + Send + Sync>;

/// Transport collaborator (Driven Port).
pub trait Transport: Send + Sync {
    /// Make a token routable to this process.
    fn announce_identifier(&self, token: &Token);

    /// Install the single raw handler for a wire key, replacing any previous one.
    fn on_message(&self, token: &Token, handler: RawHandler);

    /// Hand an outbound message to the transport. Fire-and-forget.
    fn enqueue(&self, target: Target, token: &Token, payload: Payload);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn announce_identifier(&self, token: &Token) {
        (**self).announce_identifier(token)
    }

    fn on_message(&self, token: &Token, handler: RawHandler) {
        (**self).on_message(token, handler)
    }

    fn enqueue(&self, target: Target, token: &Token, payload: Payload) {
        (**self).enqueue(target, token, payload)
    }
}
