//! # Identifier Registry
//!
//! Maps channel names to compact tokens.
//!
//! ## Allocation
//!
//! The hub is the sole allocator. Tokens come from a counter starting at 1,
//! written in bijective base-N over the configured alphabet, so every
//! one-character token is issued before the first two-character token:
//!
//! ```text
//! alphabet "abc":  1 -> a, 2 -> b, 3 -> c, 4 -> aa, 5 -> ab, ... 12 -> cc, 13 -> aaa
//! ```
//!
//! Mappings are never reassigned or removed for the lifetime of the process.
//! Peers only record what the hub sends them.

use crate::config::ConfigError;
use bridgewire_types::{Identifier, Token};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Fixed character set for token digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenAlphabet {
    symbols: Vec<char>,
}

impl TokenAlphabet {
    /// Build from a string of distinct characters (at least two).
    pub fn new(symbols: &str) -> Result<Self, ConfigError> {
        let chars: Vec<char> = symbols.chars().collect();
        let distinct: HashSet<char> = chars.iter().copied().collect();

        if distinct.len() != chars.len() {
            return Err(ConfigError::InvalidAlphabet("characters must be distinct".into()));
        }
        if chars.len() < 2 {
            return Err(ConfigError::InvalidAlphabet(
                "at least two characters are required".into(),
            ));
        }

        Ok(Self { symbols: chars })
    }

    /// Number of digits.
    pub fn radix(&self) -> u64 {
        self.symbols.len() as u64
    }

    /// Token for the given allocation ordinal. Ordinals start at 1; 0 encodes
    /// to the empty token, which is never allocated.
    pub fn encode(&self, ordinal: u64) -> Token {
        let radix = self.radix();
        let mut n = ordinal;
        let mut digits = Vec::new();

        while n > 0 {
            n -= 1;
            digits.push(self.symbols[(n % radix) as usize]);
            n /= radix;
        }

        digits.reverse();
        Token::new(digits.into_iter().collect::<String>())
    }

    /// Inverse of [`TokenAlphabet::encode`]. `None` for foreign characters or overflow.
    pub fn decode(&self, token: &str) -> Option<u64> {
        let radix = self.radix();
        token.chars().try_fold(0u64, |acc, c| {
            let digit = self.symbols.iter().position(|&s| s == c)? as u64 + 1;
            acc.checked_mul(radix)?.checked_add(digit)
        })
    }
}

/// Result of a hub-side `reference`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// The name was already mapped.
    Existing(Token),
    /// A fresh token was issued and must be propagated.
    Allocated(Token),
}

impl Allocation {
    pub fn token(&self) -> &Token {
        match self {
            Allocation::Existing(token) | Allocation::Allocated(token) => token,
        }
    }

    pub fn into_token(self) -> Token {
        match self {
            Allocation::Existing(token) | Allocation::Allocated(token) => token,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_name: HashMap<String, Token>,
    by_token: HashMap<Token, String>,
    /// Mappings in allocation (hub) or arrival (peer) order.
    order: Vec<Identifier>,
    /// Highest ordinal issued so far.
    allocated: u64,
}

impl RegistryState {
    fn insert(&mut self, name: &str, token: Token) {
        self.by_name.insert(name.to_string(), token.clone());
        self.by_token.insert(token.clone(), name.to_string());
        self.order.push(Identifier::new(name, token));
    }
}

/// Name to token bijection for one endpoint.
pub struct IdentifierRegistry {
    alphabet: TokenAlphabet,
    state: RwLock<RegistryState>,
    /// Woken whenever a peer learns new mappings.
    assigned: Notify,
}

impl IdentifierRegistry {
    pub fn new(alphabet: TokenAlphabet) -> Self {
        Self {
            alphabet,
            state: RwLock::new(RegistryState::default()),
            assigned: Notify::new(),
        }
    }

    pub fn alphabet(&self) -> &TokenAlphabet {
        &self.alphabet
    }

    /// Hub side: return the existing token for `name` or issue the next one.
    ///
    /// The whole check-and-insert happens under one write lock, so no caller
    /// observes a half-updated registry.
    pub fn allocate(&self, name: &str) -> Allocation {
        let mut state = self.state.write();

        if let Some(token) = state.by_name.get(name) {
            return Allocation::Existing(token.clone());
        }

        state.allocated += 1;
        let token = self.alphabet.encode(state.allocated);
        state.insert(name, token.clone());

        debug!(channel = %name, token = %token, "Identifier allocated");
        Allocation::Allocated(token)
    }

    /// Peer side: record mappings pushed by the hub.
    ///
    /// Entries that contradict an existing mapping are ignored. Returns the
    /// entries that were new.
    pub fn apply(&self, entries: &[Identifier]) -> Vec<Identifier> {
        let mut learned = Vec::new();
        {
            let mut state = self.state.write();
            for entry in entries {
                let known_token = state.by_name.get(&entry.name).cloned();
                let known_name = state.by_token.get(&entry.token).cloned();

                match (known_token, known_name) {
                    (Some(token), _) if token == entry.token => continue,
                    (None, None) => {
                        state.insert(&entry.name, entry.token.clone());
                        learned.push(entry.clone());
                    }
                    _ => {
                        warn!(
                            channel = %entry.name,
                            token = %entry.token,
                            "Ignoring assignment that conflicts with an existing mapping"
                        );
                    }
                }
            }
        }

        if !learned.is_empty() {
            self.assigned.notify_waiters();
        }
        learned
    }

    /// Reverse lookup. Never allocates.
    pub fn from_token(&self, token: &Token) -> Option<String> {
        self.state.read().by_token.get(token).cloned()
    }

    /// Forward lookup. Never allocates.
    pub fn from_name(&self, name: &str) -> Option<Token> {
        self.state.read().by_name.get(name).cloned()
    }

    /// All mappings in allocation order.
    pub fn snapshot(&self) -> Vec<Identifier> {
        self.state.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for `name` to become known.
    pub async fn wait_for(&self, name: &str, timeout: Duration) -> Option<Token> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut notified = pin!(self.assigned.notified());
            notified.as_mut().enable();

            if let Some(token) = self.from_name(name) {
                return Some(token);
            }

            if timeout_at(deadline, notified).await.is_err() {
                return self.from_name(name);
            }
        }
    }
}
