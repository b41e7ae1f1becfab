//! ============================================================================
//! Beta Access - the four ways into the beta
//! ============================================================================
//! - **Demo**: always available
//! - **Beta code**: verified by the remote RPC (debug codes in development)
//! - **Tip**: any positive tip
//! - **Wallet**: any balance tier above None
//!
//! The granted path is persisted as JSON so access survives restarts.
//! ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RuntimeMode;
use crate::error::{GateError, Result};
use crate::storage::{Scope, ScopedStore, BETA_ACCESS_KEY};
use crate::tier::AccessTier;

/// Codes accepted without a round trip, development mode only
pub const DEBUG_CODES: &[&str] = &["DEVTEA", "TESTSPILL"];

const EMPTY_CODE_MESSAGE: &str = "Please enter a beta code";
const UNRECOGNIZED_MESSAGE: &str = "Invalid beta code";

/// Canonical form sent to the verifier
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Result of checking one beta code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum BetaCodeOutcome {
    Valid,
    Invalid { message: String },
}

impl BetaCodeOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, BetaCodeOutcome::Valid)
    }

    fn invalid(message: impl Into<String>) -> Self {
        BetaCodeOutcome::Invalid {
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBetaCodeResponse {
    Flag(bool),
    Object {
        valid: bool,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Interpret the RPC JSON: a bare boolean or `{valid, message?}`. A one-row
/// array is unwrapped. Any other shape is an invalid code, never a grant.
pub fn parse_beta_code_response(value: serde_json::Value) -> BetaCodeOutcome {
    let value = match value {
        serde_json::Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        other => other,
    };

    match serde_json::from_value::<WireBetaCodeResponse>(value) {
        Ok(WireBetaCodeResponse::Flag(true)) => BetaCodeOutcome::Valid,
        Ok(WireBetaCodeResponse::Flag(false)) => BetaCodeOutcome::invalid(UNRECOGNIZED_MESSAGE),
        Ok(WireBetaCodeResponse::Object { valid: true, .. }) => BetaCodeOutcome::Valid,
        Ok(WireBetaCodeResponse::Object {
            valid: false,
            message,
        }) => BetaCodeOutcome::invalid(message.unwrap_or_else(|| UNRECOGNIZED_MESSAGE.to_string())),
        Err(e) => {
            debug!("Unrecognized beta code response: {}", e);
            BetaCodeOutcome::invalid("Unexpected response from beta code service")
        }
    }
}

/// Remote beta-code check. Receives the normalized code.
#[async_trait]
pub trait BetaCodeVerifier: Send + Sync {
    async fn verify(&self, code: &str) -> Result<BetaCodeOutcome>;
}

/// How beta access was granted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "path")]
pub enum BetaAccessPath {
    Demo,
    BetaCode { code: String },
    Tip { amount: f64 },
    Wallet { tier: AccessTier },
}

/// Grants and remembers beta access
pub struct BetaAccess {
    store: ScopedStore,
    verifier: Option<Arc<dyn BetaCodeVerifier>>,
    mode: RuntimeMode,
    timeout: Duration,
}

impl BetaAccess {
    pub fn new(
        store: ScopedStore,
        verifier: Option<Arc<dyn BetaCodeVerifier>>,
        mode: RuntimeMode,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            verifier,
            mode,
            timeout,
        }
    }

    /// Currently granted path. Unreadable JSON counts as no access.
    pub fn current(&self) -> Result<Option<BetaAccessPath>> {
        let Some(raw) = self.store.get(Scope::Local, BETA_ACCESS_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                warn!("Discarding unreadable beta access record: {}", e);
                Ok(None)
            }
        }
    }

    pub fn has_access(&self) -> Result<bool> {
        Ok(self.current()?.is_some())
    }

    fn grant(&self, path: BetaAccessPath) -> Result<()> {
        let json = serde_json::to_string(&path)
            .map_err(|e| GateError::Storage(format!("Failed to encode beta access: {}", e)))?;
        self.store.set(Scope::Local, BETA_ACCESS_KEY, &json)?;
        info!("Beta access granted via {:?}", path);
        Ok(())
    }

    pub fn grant_demo(&self) -> Result<()> {
        self.grant(BetaAccessPath::Demo)
    }

    /// Check a code and grant access when it is valid.
    ///
    /// Transport failures come back as errors, so an unreachable verifier can
    /// never be mistaken for a valid code.
    pub async fn redeem_code(&self, code: &str) -> Result<BetaCodeOutcome> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Ok(BetaCodeOutcome::invalid(EMPTY_CODE_MESSAGE));
        }

        let outcome = if self.mode.is_development() && DEBUG_CODES.contains(&code.as_str()) {
            warn!("Accepting debug beta code {} (development mode)", code);
            BetaCodeOutcome::Valid
        } else {
            let verifier = self
                .verifier
                .as_ref()
                .ok_or_else(|| GateError::Config("Beta code service is not configured".into()))?;
            match tokio::time::timeout(self.timeout, verifier.verify(&code)).await {
                Ok(result) => result?,
                Err(_) => return Err(GateError::Timeout(self.timeout)),
            }
        };

        match &outcome {
            BetaCodeOutcome::Valid => self.grant(BetaAccessPath::BetaCode { code })?,
            BetaCodeOutcome::Invalid { message } => debug!("Beta code rejected: {}", message),
        }
        Ok(outcome)
    }

    /// Grant access for a tip; only strictly positive amounts count
    pub fn grant_tip(&self, amount: f64) -> Result<bool> {
        if amount.is_nan() || amount <= 0.0 {
            debug!("Tip of {} does not grant beta access", amount);
            return Ok(false);
        }
        self.grant(BetaAccessPath::Tip { amount })?;
        Ok(true)
    }

    /// Grant access for a wallet tier; `None` does not qualify
    pub fn grant_wallet(&self, tier: AccessTier) -> Result<bool> {
        if tier == AccessTier::None {
            debug!("Wallet tier None does not grant beta access");
            return Ok(false);
        }
        self.grant(BetaAccessPath::Wallet { tier })?;
        Ok(true)
    }

    pub fn revoke(&self) -> Result<bool> {
        let removed = self.store.remove(Scope::Local, BETA_ACCESS_KEY)?;
        if removed {
            info!("Beta access revoked");
        }
        Ok(removed)
    }
}
