//! ============================================================================
//! TEAGATE-CORE: Anonymous Access & Security Gating
//! ============================================================================
//! Decides whether an anonymous tea spiller may act, and what they unlock:
//! - Anonymous identity tokens kept in session-scoped storage
//! - Content checks (XSS / SQL patterns) with HTML sanitization
//! - Per-action rate limiting, remote-authoritative with local fallback
//! - Balance / tip / submission access tiers with an admin override
//! - Beta access codes and the composed security gate
//! ============================================================================

pub mod access;
pub mod beta;
pub mod config;
pub mod content;
pub mod error;
pub mod gate;
pub mod identity;
pub mod rate_limit;
pub mod storage;
pub mod supabase;
pub mod tier;
pub mod types;

// Re-export main types for convenience
pub use access::{AccessService, BalanceSource, UnconfiguredBalanceSource};
pub use beta::{BetaAccess, BetaAccessPath, BetaCodeOutcome, BetaCodeVerifier};
pub use config::{FallbackPolicy, GateConfig, RuntimeMode};
pub use content::{ContentValidator, RiskLevel, ValidationVerdict};
pub use error::{GateError, Result};
pub use gate::{AuthorizationResult, DenialReason, GateMode, SecurityGate};
pub use identity::IdentityProvider;
pub use rate_limit::{
    DecisionSource, LocalRateLimiter, RateLimitDecision, RateLimitPolicy, RateLimiter,
    RemoteRateLimiter,
};
pub use storage::{KeyValueStore, MemoryStore, RedbStore, Scope, ScopedStore};
pub use supabase::SupabaseClient;
pub use tier::{AccessTier, AccessTierInfo, AdminOverride, Privilege, TierEvaluator, TierSignal};
pub use types::ActionKind;
