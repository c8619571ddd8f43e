//! Store configuration.
//!
//! Every field has a default, so an empty JSON object is a valid
//! configuration and callers only spell out what they change.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Key the cart store persists its confirmed contents under by default.
pub const DEFAULT_CART_PERSIST_KEY: &str = "mithas-cart-store";

/// What happens when a mutation targets an entity that already has one in
/// flight. Applied uniformly to every entity of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictPolicy {
    /// Wait for the earlier mutation to settle, then compute from the
    /// settled state. Mutations on one entity apply in dispatch order.
    #[default]
    Queue,
    /// Fail the later mutation immediately with `SyncError::Conflict`.
    Reject,
}

/// Per-store options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    /// Remote calls not settled within this interval fail with `Timeout`.
    pub remote_timeout_ms: u64,
    pub conflict_policy: ConflictPolicy,
    /// Recently applied sequences remembered per entity for de-duplication.
    pub replay_window: usize,
    /// Cooldown before a coalesced follow-up refresh.
    pub refresh_throttle_ms: u64,
    /// Persistence key for the confirmed subset; `None` disables persistence.
    pub persist_key: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            remote_timeout_ms: 15_000,
            conflict_policy: ConflictPolicy::Queue,
            replay_window: 32,
            refresh_throttle_ms: 1_000,
            persist_key: None,
        }
    }
}

impl StoreOptions {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn refresh_throttle(&self) -> Duration {
        Duration::from_millis(self.refresh_throttle_ms)
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_persist_key(mut self, key: impl Into<String>) -> Self {
        self.persist_key = Some(key.into());
        self
    }

    fn validate(&self, store: &str) -> Result<()> {
        if self.remote_timeout_ms == 0 {
            return Err(SyncError::Config(format!(
                "{store}.remoteTimeoutMs must be a positive number"
            )));
        }
        if self.replay_window == 0 {
            return Err(SyncError::Config(format!(
                "{store}.replayWindow must be a positive number"
            )));
        }
        Ok(())
    }
}

/// Options for every store owned by the composition root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub cart: StoreOptions,
    pub wallet: StoreOptions,
    pub reels: StoreOptions,
    pub chat: StoreOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cart: StoreOptions::default().with_persist_key(DEFAULT_CART_PERSIST_KEY),
            wallet: StoreOptions::default(),
            reels: StoreOptions::default(),
            chat: StoreOptions::default(),
        }
    }
}

impl AppConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: AppConfig =
            serde_json::from_str(json).map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.cart.validate("cart")?;
        self.wallet.validate("wallet")?;
        self.reels.validate("reels")?;
        self.chat.validate("chat")
    }
}
