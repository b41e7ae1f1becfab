//! ============================================================================
//! Access Tiers - balance, tip and submission tiers with privileges
//! ============================================================================
//! Balance tiers are ordered and cumulative:
//! - **None**: below 69
//! - **Sipper**: 69+
//! - **Connoisseur**: 420+
//! - **Legend**: 1337+
//!
//! Two tiers come from other paths and sit beside that ladder, not on it:
//! - **Bribed**: any positive tip
//! - **Submitted**: has spilled tea
//!
//! The admin override forces Legend for every input.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::{info, warn};
use url::Url;

use crate::error::Result;
use crate::storage::{Scope, ScopedStore, ADMIN_OVERRIDE_KEY};

/// Balance thresholds. Public policy constants; changing one is breaking.
pub const SIPPER_THRESHOLD: f64 = 69.0;
pub const CONNOISSEUR_THRESHOLD: f64 = 420.0;
pub const LEGEND_THRESHOLD: f64 = 1337.0;

/// URL query parameter that switches the admin override on
pub const ADMIN_URL_PARAM: &str = "admin";

/// Privileges attached to tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    EarlyAccess,
    TeaSubmission,
    PrioritySupport,
    ExclusiveContent,
    GovernanceVoting,
    BetaFeatures,
    VipBadge,
    BriberBadge,
    ContributorBadge,
}

impl Privilege {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privilege::EarlyAccess => "early_access",
            Privilege::TeaSubmission => "tea_submission",
            Privilege::PrioritySupport => "priority_support",
            Privilege::ExclusiveContent => "exclusive_content",
            Privilege::GovernanceVoting => "governance_voting",
            Privilege::BetaFeatures => "beta_features",
            Privilege::VipBadge => "vip_badge",
            Privilege::BriberBadge => "briber_badge",
            Privilege::ContributorBadge => "contributor_badge",
        }
    }
}

const SIPPER_PRIVILEGES: &[Privilege] = &[Privilege::EarlyAccess, Privilege::TeaSubmission];

const CONNOISSEUR_PRIVILEGES: &[Privilege] = &[
    Privilege::EarlyAccess,
    Privilege::TeaSubmission,
    Privilege::PrioritySupport,
    Privilege::ExclusiveContent,
];

const LEGEND_PRIVILEGES: &[Privilege] = &[
    Privilege::EarlyAccess,
    Privilege::TeaSubmission,
    Privilege::PrioritySupport,
    Privilege::ExclusiveContent,
    Privilege::GovernanceVoting,
    Privilege::BetaFeatures,
    Privilege::VipBadge,
];

const BRIBED_PRIVILEGES: &[Privilege] = &[
    Privilege::EarlyAccess,
    Privilege::TeaSubmission,
    Privilege::BriberBadge,
];

const SUBMITTED_PRIVILEGES: &[Privilege] = &[
    Privilege::EarlyAccess,
    Privilege::TeaSubmission,
    Privilege::ContributorBadge,
];

/// Access tier of an anonymous actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessTier {
    #[default]
    None,
    Sipper,
    Connoisseur,
    Legend,
    /// Granted by tipping
    Bribed,
    /// Granted by submitting tea
    Submitted,
}

impl AccessTier {
    /// Tier from a token balance. NaN and negatives are `None`.
    pub fn from_balance(balance: f64) -> Self {
        match balance {
            x if x >= LEGEND_THRESHOLD => AccessTier::Legend,
            x if x >= CONNOISSEUR_THRESHOLD => AccessTier::Connoisseur,
            x if x >= SIPPER_THRESHOLD => AccessTier::Sipper,
            _ => AccessTier::None,
        }
    }

    pub fn privileges(&self) -> &'static [Privilege] {
        match self {
            AccessTier::None => &[],
            AccessTier::Sipper => SIPPER_PRIVILEGES,
            AccessTier::Connoisseur => CONNOISSEUR_PRIVILEGES,
            AccessTier::Legend => LEGEND_PRIVILEGES,
            AccessTier::Bribed => BRIBED_PRIVILEGES,
            AccessTier::Submitted => SUBMITTED_PRIVILEGES,
        }
    }

    pub fn has_privilege(&self, privilege: Privilege) -> bool {
        self.privileges().contains(&privilege)
    }

    /// True for tiers granted outside the balance ladder
    pub fn is_alternate_path(&self) -> bool {
        matches!(self, AccessTier::Bribed | AccessTier::Submitted)
    }

    /// Position on the balance ladder; None for alternate-path tiers
    fn balance_rank(&self) -> Option<u8> {
        match self {
            AccessTier::None => Some(0),
            AccessTier::Sipper => Some(1),
            AccessTier::Connoisseur => Some(2),
            AccessTier::Legend => Some(3),
            AccessTier::Bribed | AccessTier::Submitted => None,
        }
    }

    /// Minimum balance for a ladder tier
    pub fn required_balance(&self) -> Option<f64> {
        match self {
            AccessTier::None => Some(0.0),
            AccessTier::Sipper => Some(SIPPER_THRESHOLD),
            AccessTier::Connoisseur => Some(CONNOISSEUR_THRESHOLD),
            AccessTier::Legend => Some(LEGEND_THRESHOLD),
            AccessTier::Bribed | AccessTier::Submitted => None,
        }
    }

    /// Next rung on the balance ladder
    pub fn next_tier(&self) -> Option<AccessTier> {
        match self {
            AccessTier::None => Some(AccessTier::Sipper),
            AccessTier::Sipper => Some(AccessTier::Connoisseur),
            AccessTier::Connoisseur => Some(AccessTier::Legend),
            _ => None,
        }
    }

    /// Get human-readable tier name
    pub fn display_name(&self) -> &'static str {
        match self {
            AccessTier::None => "No Access",
            AccessTier::Sipper => "Tea Sipper",
            AccessTier::Connoisseur => "Tea Connoisseur",
            AccessTier::Legend => "Tea Legend",
            AccessTier::Bribed => "Briber",
            AccessTier::Submitted => "Contributor",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::None => "none",
            AccessTier::Sipper => "sipper",
            AccessTier::Connoisseur => "connoisseur",
            AccessTier::Legend => "legend",
            AccessTier::Bribed => "bribed",
            AccessTier::Submitted => "submitted",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "none" => Some(AccessTier::None),
            "sipper" => Some(AccessTier::Sipper),
            "connoisseur" => Some(AccessTier::Connoisseur),
            "legend" => Some(AccessTier::Legend),
            "bribed" => Some(AccessTier::Bribed),
            "submitted" => Some(AccessTier::Submitted),
            _ => None,
        }
    }
}

/// Ladder tiers compare by rank; alternate-path tiers only equal themselves
impl PartialOrd for AccessTier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            return Some(Ordering::Equal);
        }
        match (self.balance_rank(), other.balance_rank()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => None,
        }
    }
}

/// Input to the tier evaluator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TierSignal {
    Balance(f64),
    Tip(f64),
    Submission(bool),
}

/// Session-wide switch that forces the maximum tier.
///
/// Reads are a single relaxed atomic load. Changes go through `set` (or the
/// enable/disable/toggle wrappers) and are always logged.
#[derive(Debug, Default)]
pub struct AdminOverride {
    active: AtomicBool,
}

impl AdminOverride {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }

    /// Override requested by `?admin=true` (or `=1`) on a page URL. Relative
    /// URLs and bare query strings are accepted.
    pub fn from_url(url: &str) -> Self {
        Self::new(url_requests_override(url))
    }

    /// Load the persisted preference (local scope); absent means off
    pub fn load(store: &ScopedStore) -> Result<Self> {
        let active = store
            .get(Scope::Local, ADMIN_OVERRIDE_KEY)?
            .map(|v| v.trim() == "true")
            .unwrap_or(false);
        Ok(Self::new(active))
    }

    pub fn persist(&self, store: &ScopedStore) -> Result<()> {
        let value = if self.is_active() { "true" } else { "false" };
        store.set(Scope::Local, ADMIN_OVERRIDE_KEY, value)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(AtomicOrdering::Relaxed)
    }

    pub fn set(&self, active: bool) {
        let previous = self.active.swap(active, AtomicOrdering::Relaxed);
        if previous != active {
            warn!(admin_override = active, "Admin override changed");
        }
    }

    pub fn enable(&self) {
        self.set(true);
    }

    pub fn disable(&self) {
        self.set(false);
    }

    /// Flip the override; returns the new state
    pub fn toggle(&self) -> bool {
        let active = !self.active.fetch_xor(true, AtomicOrdering::Relaxed);
        warn!(admin_override = active, "Admin override toggled");
        active
    }
}

fn url_requests_override(input: &str) -> bool {
    let parsed = Url::parse(input).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(input))
    });

    match parsed {
        Ok(url) => url
            .query_pairs()
            .any(|(k, v)| k == ADMIN_URL_PARAM && (v == "true" || v == "1")),
        Err(_) => false,
    }
}

/// Tier info with balance details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTierInfo {
    pub tier: AccessTier,
    pub balance: f64,
    pub balance_formatted: String,
    pub privileges: Vec<Privilege>,
    pub next_tier: Option<AccessTier>,
    pub balance_to_next_tier: Option<f64>,
    pub admin_override: bool,
}

/// Maps signals to tiers, consulting the admin override first
pub struct TierEvaluator {
    admin_override: std::sync::Arc<AdminOverride>,
}

impl TierEvaluator {
    pub fn new(admin_override: std::sync::Arc<AdminOverride>) -> Self {
        Self { admin_override }
    }

    pub fn evaluate(&self, signal: TierSignal) -> AccessTier {
        if self.admin_override.is_active() {
            warn!(signal = ?signal, "Admin override active, granting Legend tier");
            return AccessTier::Legend;
        }

        let tier = match signal {
            TierSignal::Balance(balance) => AccessTier::from_balance(balance),
            TierSignal::Tip(amount) if amount > 0.0 => AccessTier::Bribed,
            TierSignal::Tip(_) => AccessTier::None,
            TierSignal::Submission(true) => AccessTier::Submitted,
            TierSignal::Submission(false) => AccessTier::None,
        };

        info!("Evaluated {:?} -> {:?}", signal, tier);
        tier
    }

    /// Tier plus progress toward the next rung
    pub fn tier_info(&self, balance: f64) -> AccessTierInfo {
        let tier = self.evaluate(TierSignal::Balance(balance));
        let next_tier = tier.next_tier();
        let balance_to_next_tier = next_tier
            .and_then(|t| t.required_balance())
            .map(|required| (required - balance.max(0.0)).max(0.0));

        AccessTierInfo {
            tier,
            balance,
            balance_formatted: format_balance(balance),
            privileges: tier.privileges().to_vec(),
            next_tier,
            balance_to_next_tier,
            admin_override: self.admin_override.is_active(),
        }
    }

    pub fn admin_override(&self) -> &AdminOverride {
        &self.admin_override
    }
}

/// Format balance with K/M/B suffixes
fn format_balance(amount: f64) -> String {
    if amount >= 1_000_000_000.0 {
        format!("{:.2}B", amount / 1_000_000_000.0)
    } else if amount >= 1_000_000.0 {
        format!("{:.2}M", amount / 1_000_000.0)
    } else if amount >= 1_000.0 {
        format!("{:.2}K", amount / 1_000.0)
    } else {
        format!("{:.2}", amount)
    }
}
