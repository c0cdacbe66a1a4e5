//! # Endpoint
//!
//! The per-process context: one [`IdentifierRegistry`], the hub's
//! [`SecurityValidator`], the routing table from channel names to live
//! bridges, and the transport. Build one with [`Endpoint::hub`] or
//! [`Endpoint::peer`] and clone it wherever it is needed.
//!
//! ## Registry propagation
//!
//! ```text
//! hub allocates      -> announce(token), Assign{[name->token]} to all peers
//! peer misses a name -> Request{name} to hub, bounded wait for an Assign
//! hub gets Request   -> Assign to that peer, only if the name is already mapped
//! peer gets Assign   -> record, wake waiters, wire compact tokens for degraded bridges
//! ```
//!
//! Registry traffic travels on [`CONTROL_TOKEN`]. Hub bridges also listen on
//! their uncompressed name so degraded peers keep working.

use crate::bridge::{Bridge, BridgeInner};
use crate::config::BridgeConfig;
use crate::registry::{Allocation, IdentifierRegistry, TokenAlphabet};
use crate::security::{SecurityHook, SecurityValidator};
use crate::transport::Transport;
use bridgewire_telemetry::{
    drop_reason, log_channel_event, log_sender_event, metric_inc, record_drop,
    IDENTIFIERS_ALLOCATED, IDENTIFIER_RESOLVE_TIMEOUTS,
};
use bridgewire_types::{
    BridgeError, Identifier, Payload, PeerId, RegistryMessage, Role, Sender, Target, Token,
    TypeContract, CONTROL_MARKER, CONTROL_TOKEN,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

// =============================================================================
// ROUTING
// =============================================================================

#[derive(Default)]
struct WireKeys {
    announced: HashSet<Token>,
    wired: HashSet<Token>,
}

/// Channel name to live bridges, plus the wire keys already installed.
///
/// Bridges stay routed until [`Bridge::destroy`] detaches them, whether or not
/// the caller still holds a handle.
#[derive(Default)]
struct Router {
    routes: RwLock<HashMap<String, Vec<Arc<BridgeInner>>>>,
    keys: Mutex<WireKeys>,
}

impl Router {
    fn attach(&self, bridge: &Arc<BridgeInner>) {
        self.routes
            .write()
            .entry(bridge.name().to_string())
            .or_default()
            .push(bridge.clone());
    }

    fn detach(&self, bridge: &BridgeInner) {
        let mut routes = self.routes.write();
        if let Some(list) = routes.get_mut(bridge.name()) {
            list.retain(|routed| !std::ptr::eq(Arc::as_ptr(routed), bridge));
            if list.is_empty() {
                routes.remove(bridge.name());
            }
        }
    }

    fn live(&self, name: &str) -> Vec<Arc<BridgeInner>> {
        self.routes.read().get(name).cloned().unwrap_or_default()
    }

    fn all(&self) -> Vec<Arc<BridgeInner>> {
        self.routes.read().values().flatten().cloned().collect()
    }

    /// Drop every route. Bridges still held by callers stay usable for publish.
    fn clear(&self) -> usize {
        let routes = std::mem::take(&mut *self.routes.write());
        routes.values().map(Vec::len).sum()
    }
}

// =============================================================================
// SHARED STATE
// =============================================================================

pub(crate) struct EndpointShared {
    role: Role,
    config: BridgeConfig,
    registry: IdentifierRegistry,
    /// Hub only.
    security: Option<SecurityValidator>,
    router: Router,
    transport: Arc<dyn Transport>,
}

impl EndpointShared {
    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn compact_token(&self, name: &str) -> Option<Token> {
        self.registry.from_name(name)
    }

    pub(crate) fn enqueue(&self, target: Target, token: &Token, payload: Payload) {
        self.transport.enqueue(target, token, payload);
    }

    pub(crate) fn detach(&self, bridge: &BridgeInner) {
        self.router.detach(bridge);
    }

    fn announce(&self, token: &Token) {
        let fresh = self.router.keys.lock().announced.insert(token.clone());
        if fresh {
            self.transport.announce_identifier(token);
        }
    }

    /// Install the raw handler for a data key, once per key.
    pub(crate) fn wire(self: &Arc<Self>, key: &Token) {
        let fresh = self.router.keys.lock().wired.insert(key.clone());
        if !fresh {
            return;
        }

        self.announce(key);
        let endpoint = Arc::downgrade(self);
        let wire_key = key.clone();
        self.transport.on_message(
            key,
            Arc::new(move |sender: Sender, raw: Value| {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.dispatch(&wire_key, sender, raw);
                }
            }),
        );
    }

    fn wire_control(self: &Arc<Self>) {
        let key = RegistryMessage::token();
        self.router.keys.lock().wired.insert(key.clone());
        self.announce(&key);

        let endpoint = Arc::downgrade(self);
        self.transport.on_message(
            &key,
            Arc::new(move |sender: Sender, raw: Value| {
                if let Some(endpoint) = endpoint.upgrade() {
                    endpoint.handle_control(sender, raw);
                }
            }),
        );
    }

    /// Decode raw data, screening it first on the hub.
    fn decode(&self, sender: &Sender, channel: Option<&str>, raw: Value) -> Option<Payload> {
        if let Some(security) = &self.security {
            return security.screen(sender, channel, raw, Instant::now());
        }

        match Payload::from_raw(raw) {
            Ok(payload) => Some(payload),
            Err(err) => {
                record_drop(drop_reason::UNDECODABLE);
                warn!(
                    sender = %sender,
                    channel = channel.unwrap_or(CONTROL_TOKEN),
                    error = %err,
                    "Dropping undecodable inbound message"
                );
                None
            }
        }
    }

    fn dispatch(&self, key: &Token, sender: Sender, raw: Value) {
        // Compact tokens take precedence over uncompressed names.
        let channel = self
            .registry
            .from_token(key)
            .unwrap_or_else(|| key.as_str().to_string());

        let Some(payload) = self.decode(&sender, Some(channel.as_str()), raw) else {
            return;
        };

        let bridges = self.router.live(&channel);
        if bridges.is_empty() {
            debug!(channel = %channel, sender = %sender, "No live bridge for inbound message");
            return;
        }
        for bridge in bridges {
            bridge.deliver(sender, payload.clone());
        }
    }

    fn handle_control(self: &Arc<Self>, sender: Sender, raw: Value) {
        let Some(payload) = self.decode(&sender, None, raw) else {
            return;
        };
        let message = match RegistryMessage::from_payload(&payload) {
            Ok(message) => message,
            Err(err) => {
                record_drop(drop_reason::UNDECODABLE);
                warn!(sender = %sender, error = %err, "Dropping malformed registry message");
                return;
            }
        };

        match (self.role, message) {
            (Role::Hub, RegistryMessage::Request { name }) => self.answer_request(&sender, &name),
            (Role::Peer, RegistryMessage::Assign { entries }) => self.learn(&entries),
            (role, message) => {
                debug!(role = %role, sender = %sender, ?message, "Ignoring registry message");
            }
        }
    }

    fn answer_request(&self, sender: &Sender, name: &str) {
        let Some(peer) = sender.peer() else {
            return;
        };
        match self.registry.from_name(name) {
            Some(token) => self.send_control(
                Target::Peer(peer),
                RegistryMessage::Assign {
                    entries: vec![Identifier::new(name, token)],
                },
            ),
            None => debug!(channel = %name, sender = %sender, "Request for unmapped channel"),
        }
    }

    fn learn(self: &Arc<Self>, entries: &[Identifier]) {
        for identifier in self.registry.apply(entries) {
            log_channel_event!(
                debug,
                self.role,
                "Identifier learned",
                identifier.name,
                token = %identifier.token
            );
            let bridges = self.router.live(&identifier.name);
            if bridges.is_empty() {
                continue;
            }
            self.wire(&identifier.token);
            for bridge in bridges {
                bridge.upgrade(&identifier.token);
            }
        }
    }

    fn send_control(&self, target: Target, message: RegistryMessage) {
        match message.into_payload() {
            Ok(payload) => self.enqueue(target, &RegistryMessage::token(), payload),
            Err(err) => warn!(error = %err, "Failed to encode registry message"),
        }
    }

    async fn identifier(&self, name: &str) -> Token {
        match self.role {
            Role::Hub => match self.registry.allocate(name) {
                Allocation::Existing(token) => token,
                Allocation::Allocated(token) => {
                    metric_inc!(IDENTIFIERS_ALLOCATED);
                    self.announce(&token);
                    self.send_control(
                        Target::AllPeers,
                        RegistryMessage::Assign {
                            entries: vec![Identifier::new(name, token.clone())],
                        },
                    );
                    token
                }
            },
            Role::Peer => {
                if let Some(token) = self.registry.from_name(name) {
                    return token;
                }

                self.send_control(
                    Target::Hub,
                    RegistryMessage::Request {
                        name: name.to_string(),
                    },
                );

                let timeout = self.config.resolve_timeout;
                match self.registry.wait_for(name, timeout).await {
                    Some(token) => token,
                    None => {
                        metric_inc!(IDENTIFIER_RESOLVE_TIMEOUTS);
                        warn!(
                            channel = %name,
                            timeout_ms = timeout.as_millis() as u64,
                            "Hub did not supply a token in time, using the uncompressed name"
                        );
                        Token::uncompressed(name)
                    }
                }
            }
        }
    }

    fn security(&self, operation: &'static str) -> Result<&SecurityValidator, BridgeError> {
        self.security
            .as_ref()
            .ok_or(BridgeError::HubOnly { operation })
    }
}

/// Channel names share the wire key space with [`CONTROL_TOKEN`].
fn check_name(name: &str) -> Result<(), BridgeError> {
    if name.contains(CONTROL_MARKER) {
        return Err(BridgeError::ReservedName {
            name: name.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// PUBLIC HANDLE
// =============================================================================

/// Process context shared by every bridge on this side of the topology.
///
/// Clones share one context. Routed bridges hold the context themselves, so
/// the routes are released when the last clone is dropped.
#[derive(Clone)]
pub struct Endpoint {
    shared: Arc<EndpointShared>,
    _teardown: Arc<Teardown>,
}

struct Teardown(Arc<EndpointShared>);

impl Drop for Teardown {
    fn drop(&mut self) {
        let released = self.0.router.clear();
        debug!(role = %self.0.role, released, "Endpoint dropped, routes released");
    }
}

impl Endpoint {
    /// The authoritative endpoint: allocates tokens and screens inbound traffic.
    pub fn hub(
        config: BridgeConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(Role::Hub, config, Arc::new(transport))
    }

    /// A derived endpoint: learns its tokens from the hub.
    pub fn peer(
        config: BridgeConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self, BridgeError> {
        Self::build(Role::Peer, config, Arc::new(transport))
    }

    fn build(
        role: Role,
        config: BridgeConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let alphabet = TokenAlphabet::new(&config.alphabet)?;

        let security = role
            .is_hub()
            .then(|| SecurityValidator::new(config.volume_ceiling, config.volume_window));

        let shared = Arc::new(EndpointShared {
            role,
            registry: IdentifierRegistry::new(alphabet),
            security,
            router: Router::default(),
            transport,
            config,
        });
        shared.wire_control();

        debug!(role = %role, "Endpoint started");
        Ok(Self {
            _teardown: Arc::new(Teardown(shared.clone())),
            shared,
        })
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.shared.config
    }

    /// Token for `name`.
    ///
    /// On the hub this allocates on first use. On a peer it waits up to
    /// `resolve_timeout` for the hub, then falls back to the uncompressed name.
    /// Names containing the control marker are rejected.
    pub async fn identifier(&self, name: &str) -> Result<Token, BridgeError> {
        check_name(name)?;
        Ok(self.shared.identifier(name).await)
    }

    /// A new bridge for `name`. Never reuses an existing bridge.
    ///
    /// The bridge stays routed until [`Bridge::destroy`], even if every
    /// handle is dropped.
    pub async fn bridge(&self, name: &str) -> Result<Bridge, BridgeError> {
        check_name(name)?;
        let shared = &self.shared;
        let token = shared.identifier(name).await;

        let inner = BridgeInner::new(name, token.clone(), shared.clone());
        shared.router.attach(&inner);
        shared.wire(&token);

        if token.as_str() != name {
            if shared.role.is_hub() {
                shared.wire(&Token::uncompressed(name));
            }
        } else if let Some(compact) = shared.registry.from_name(name) {
            // Mapping arrived between the timeout and attach.
            shared.wire(&compact);
            inner.upgrade(&compact);
        }

        Ok(Bridge::from_inner(inner))
    }

    /// Reverse lookup. Never allocates.
    pub fn from_token(&self, token: &Token) -> Option<String> {
        self.shared.registry.from_token(token)
    }

    /// Forward lookup. Never allocates.
    pub fn from_name(&self, name: &str) -> Option<Token> {
        self.shared.registry.from_name(name)
    }

    /// Every known mapping, in allocation or arrival order.
    pub fn identifiers(&self) -> Vec<Identifier> {
        self.shared.registry.snapshot()
    }

    /// Hub only. Replaces the hook for the hook's category.
    pub fn install_security_hook(&self, hook: SecurityHook) -> Result<(), BridgeError> {
        self.shared.security("install_security_hook")?.install(hook);
        Ok(())
    }

    /// Hub only. Payloads on `name` that do not match `contract` trip the
    /// type-mismatch hook.
    pub fn expect_types(&self, name: &str, contract: TypeContract) -> Result<(), BridgeError> {
        self.shared
            .security("expect_types")?
            .expect_types(name, contract);
        Ok(())
    }

    /// Hub only. Send the full mapping snapshot to a newly attached peer.
    pub fn peer_connected(&self, peer: PeerId) -> Result<(), BridgeError> {
        self.shared.security("peer_connected")?;
        let entries = self.shared.registry.snapshot();
        log_sender_event!(debug, self.shared.role, "Peer connected", peer, entries = entries.len());
        if !entries.is_empty() {
            self.shared
                .send_control(Target::Peer(peer), RegistryMessage::Assign { entries });
        }
        Ok(())
    }

    /// Hub only. Forget the peer's volume counter and per-bridge rate limit state.
    pub fn peer_disconnected(&self, peer: PeerId) -> Result<(), BridgeError> {
        self.shared.security("peer_disconnected")?.forget(&peer);
        let sender = Sender::Peer(peer);
        for bridge in self.shared.router.all() {
            bridge.forget_sender(&sender);
        }
        log_sender_event!(debug, self.shared.role, "Peer disconnected", peer);
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.shared.role)
            .field("identifiers", &self.shared.registry.len())
            .finish()
    }
}
