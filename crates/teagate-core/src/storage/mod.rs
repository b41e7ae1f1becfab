//! ============================================================================
//! Storage - scoped key-value persistence
//! ============================================================================
//! One small interface over the two lifetimes the gate cares about:
//! - **Local**: durable across restarts (redb file)
//! - **Session**: lives as long as the process (in-memory)
//!
//! Every persisted value is a plain string (JSON where structured).
//! ============================================================================

mod local;
mod memory;

pub use local::RedbStore;
pub use memory::MemoryStore;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;

/// Anonymous identity token (session scope)
pub const TOKEN_KEY: &str = "tea_anonymous_token";
/// Admin override preference (local scope)
pub const ADMIN_OVERRIDE_KEY: &str = "tea_admin_override";
/// Mock wallet balance override (local scope)
pub const MOCK_BALANCE_KEY: &str = "tea_mock_balance";
/// Last computed access tier (local scope)
pub const LAST_TIER_KEY: &str = "tea_last_tier";
/// Granted beta access path as JSON (local scope)
pub const BETA_ACCESS_KEY: &str = "tea_beta_access";

/// Minimal string key-value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Returns true when a value was removed
    fn remove(&self, key: &str) -> Result<bool>;
}

/// Persistence lifetime of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Local,
    Session,
}

/// A local + session store pair
#[derive(Clone)]
pub struct ScopedStore {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl ScopedStore {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    /// Both scopes in memory (tests, ephemeral runs)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }

    pub fn scope(&self, scope: Scope) -> &dyn KeyValueStore {
        match scope {
            Scope::Local => self.local.as_ref(),
            Scope::Session => self.session.as_ref(),
        }
    }

    pub fn get(&self, scope: Scope, key: &str) -> Result<Option<String>> {
        self.scope(scope).get(key)
    }

    pub fn set(&self, scope: Scope, key: &str, value: &str) -> Result<()> {
        self.scope(scope).set(key, value)
    }

    pub fn remove(&self, scope: Scope, key: &str) -> Result<bool> {
        self.scope(scope).remove(key)
    }
}
