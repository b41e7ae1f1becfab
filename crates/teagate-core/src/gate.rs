//! ============================================================================
//! Security Gate - one allow/deny decision per user action
//! ============================================================================
//! Runs, in order:
//! 1. Identity token shape
//! 2. Rate limit for (identity, action)
//! 3. Content checks, when the action carries a payload
//!
//! Every check fails closed. `Live` stops at the first failure; `Audit` runs
//! everything and reports every reason. `allowed` is the AND either way.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{GateConfig, RuntimeMode};
use crate::content::{ContentValidator, RiskLevel, ValidationVerdict};
use crate::error::Result;
use crate::identity::{fingerprint, validate_token};
use crate::rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
use crate::supabase::SupabaseClient;
use crate::types::ActionKind;

/// How many checks run per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// Stop at the first failed check
    #[default]
    Live,
    /// Run every check and collect all reasons
    Audit,
}

/// Why an action was denied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DenialReason {
    InvalidIdentity,
    RateLimited { retry_after: Duration },
    ContentBlocked { threats: Vec<String>, risk_level: RiskLevel },
    ContentRejected { message: String },
    Infrastructure { detail: String },
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenialReason::InvalidIdentity => write!(f, "Invalid or missing anonymous identity"),
            DenialReason::RateLimited { retry_after } => {
                let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                write!(f, "Too many requests, try again in {}s", secs)
            }
            DenialReason::ContentBlocked { threats, .. } => {
                write!(f, "Content blocked: {}", threats.join(", "))
            }
            DenialReason::ContentRejected { message } => write!(f, "Content rejected: {}", message),
            DenialReason::Infrastructure { detail } => {
                write!(f, "Security check unavailable: {}", detail)
            }
        }
    }
}

/// Verbose check details, development mode only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateDiagnostics {
    pub identity_fingerprint: String,
    pub rate_limit: Option<RateLimitDecision>,
    pub verdict: Option<ValidationVerdict>,
}

/// Outcome of one `authorize` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationResult {
    pub allowed: bool,
    pub reasons: Vec<DenialReason>,
    pub request_id: String,
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<GateDiagnostics>,
}

/// Composes identity, rate-limit and content checks
pub struct SecurityGate {
    rate_limiter: RateLimiter,
    validator: ContentValidator,
    mode: GateMode,
    runtime: RuntimeMode,
    policy_overrides: HashMap<ActionKind, RateLimitPolicy>,
}

impl SecurityGate {
    pub fn new(rate_limiter: RateLimiter, mode: GateMode, runtime: RuntimeMode) -> Self {
        Self {
            rate_limiter,
            validator: ContentValidator::new(),
            mode,
            runtime,
            policy_overrides: HashMap::new(),
        }
    }

    /// Gate wired from configuration; uses the Supabase limiter when configured
    pub fn from_config(config: &GateConfig, mode: GateMode) -> Result<Self> {
        let rate_limiter = match SupabaseClient::from_config(config)? {
            Some(client) => {
                info!("Remote rate limiting enabled ({:?} fallback)", config.fallback_policy);
                RateLimiter::with_remote(Arc::new(client), config.rpc_timeout(), config.fallback_policy)
            }
            None => {
                info!("Remote rate limiting not configured, using local counters");
                RateLimiter::local_only()
            }
        };
        Ok(Self::new(rate_limiter, mode, config.mode))
    }

    /// Replace the default quota for one action kind
    pub fn set_policy(&mut self, action: ActionKind, policy: RateLimitPolicy) {
        info!("Rate limit for {} set to {} per {:?}", action, policy.max_actions, policy.window);
        self.policy_overrides.insert(action, policy);
    }

    pub fn policy_for(&self, action: &ActionKind) -> RateLimitPolicy {
        self.policy_overrides
            .get(action)
            .copied()
            .unwrap_or_else(|| RateLimitPolicy::for_action(action))
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Decide whether `identity` may perform `action` with an optional payload
    pub async fn authorize(
        &self,
        action: ActionKind,
        identity: &str,
        payload: Option<&str>,
    ) -> AuthorizationResult {
        let request_id = Uuid::new_v4().to_string();
        let identity_fp = fingerprint(identity);
        let live = self.mode == GateMode::Live;
        let mut reasons = Vec::new();
        let mut diagnostics = GateDiagnostics {
            identity_fingerprint: identity_fp.clone(),
            ..Default::default()
        };

        'checks: {
            if !validate_token(identity) {
                warn!(request_id = %request_id, action = %action, "Denied: invalid identity");
                reasons.push(DenialReason::InvalidIdentity);
                if live {
                    break 'checks;
                }
            }

            let policy = self.policy_for(&action);
            match self.rate_limiter.check_and_consume(identity, &action, policy).await {
                Ok(decision) => {
                    if !decision.allowed {
                        let retry_after = decision.retry_after.unwrap_or(policy.window);
                        warn!(
                            request_id = %request_id,
                            action = %action,
                            identity = %identity_fp,
                            retry_after_ms = retry_after.as_millis() as u64,
                            "Denied: rate limited"
                        );
                        reasons.push(DenialReason::RateLimited { retry_after });
                    }
                    diagnostics.rate_limit = Some(decision);
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        action = %action,
                        identity = %identity_fp,
                        error = %e,
                        "Denied: rate limiter unavailable"
                    );
                    reasons.push(DenialReason::Infrastructure {
                        detail: e.to_string(),
                    });
                }
            }
            if live && !reasons.is_empty() {
                break 'checks;
            }

            if let Some(text) = payload {
                let verdict = self.validator.validate(text, action.max_content_length());
                if verdict.blocked {
                    warn!(
                        request_id = %request_id,
                        action = %action,
                        identity = %identity_fp,
                        threats = ?verdict.threats,
                        "Denied: content blocked"
                    );
                    reasons.push(DenialReason::ContentBlocked {
                        threats: verdict.threats.clone(),
                        risk_level: verdict.risk_level,
                    });
                } else if !verdict.valid {
                    let message = verdict
                        .rejection
                        .clone()
                        .unwrap_or_else(|| verdict.threats.join(", "));
                    debug!(request_id = %request_id, action = %action, "Content rejected: {}", message);
                    reasons.push(DenialReason::ContentRejected { message });
                }
                diagnostics.verdict = Some(verdict);
            }
        }

        let allowed = reasons.is_empty();
        if allowed {
            debug!(request_id = %request_id, action = %action, identity = %identity_fp, "Allowed");
        }

        AuthorizationResult {
            allowed,
            reasons,
            request_id,
            action,
            diagnostics: self.runtime.is_development().then_some(diagnostics),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::error::GateError;
    use crate::identity::IdentityProvider;
    use crate::rate_limit::{RemoteRateLimitRequest, RemoteRateLimitResponse, RemoteRateLimiter};
    use crate::storage::ScopedStore;
    use async_trait::async_trait;

    struct DownRemote;

    #[async_trait]
    impl RemoteRateLimiter for DownRemote {
        async fn check(&self, _request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse> {
            Err(GateError::Remote("connection refused".into()))
        }
    }

    fn token() -> String {
        IdentityProvider::new(ScopedStore::in_memory())
            .get_or_create_token()
            .unwrap()
    }

    fn gate(mode: GateMode, runtime: RuntimeMode) -> SecurityGate {
        SecurityGate::new(RateLimiter::local_only(), mode, runtime)
    }

    #[tokio::test]
    async fn test_clean_request_allowed() {
        let gate = gate(GateMode::Live, RuntimeMode::Production);
        let result = gate
            .authorize(ActionKind::Submission, &token(), Some("My boss microwaves fish"))
            .await;
        assert!(result.allowed);
        assert!(result.reasons.is_empty());
        assert!(result.diagnostics.is_none());
        assert!(Uuid::parse_str(&result.request_id).is_ok());
    }

    #[tokio::test]
    async fn test_xss_payload_blocked() {
        let gate = gate(GateMode::Live, RuntimeMode::Production);
        let result = gate
            .authorize(ActionKind::Comment, &token(), Some("<script>alert(1)</script>"))
            .await;
        assert!(!result.allowed);
        assert!(matches!(
            &result.reasons[..],
            [DenialReason::ContentBlocked { risk_level: RiskLevel::Critical, .. }]
        ));
    }

    #[tokio::test]
    async fn test_too_long_payload_rejected() {
        let gate = gate(GateMode::Live, RuntimeMode::Production);
        let long = "a".repeat(501);
        let result = gate.authorize(ActionKind::Comment, &token(), Some(&long)).await;
        assert!(!result.allowed);
        assert!(matches!(&result.reasons[..], [DenialReason::ContentRejected { .. }]));
    }

    #[tokio::test]
    async fn test_live_short_circuits_on_identity() {
        let gate = gate(GateMode::Live, RuntimeMode::Development);
        let result = gate
            .authorize(ActionKind::Comment, "abc", Some("<script>x</script>"))
            .await;
        assert_eq!(result.reasons, vec![DenialReason::InvalidIdentity]);

        let diagnostics = result.diagnostics.unwrap();
        assert!(diagnostics.rate_limit.is_none());
        assert!(diagnostics.verdict.is_none());
        assert!(!gate.rate_limiter().has_remote());
    }

    #[tokio::test]
    async fn test_audit_reports_every_reason() {
        let gate = gate(GateMode::Audit, RuntimeMode::Development);
        let result = gate
            .authorize(ActionKind::Comment, "abc", Some("<script>x</script>"))
            .await;
        assert!(!result.allowed);
        assert_eq!(result.reasons.len(), 2);
        assert_eq!(result.reasons[0], DenialReason::InvalidIdentity);
        assert!(matches!(result.reasons[1], DenialReason::ContentBlocked { .. }));

        let diagnostics = result.diagnostics.unwrap();
        assert!(diagnostics.rate_limit.unwrap().allowed);
        assert!(diagnostics.verdict.unwrap().blocked);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_carries_retry_after() {
        let mut gate = gate(GateMode::Live, RuntimeMode::Production);
        gate.set_policy(
            ActionKind::Vote,
            RateLimitPolicy::new(1, Duration::from_secs(60)),
        );
        let id = token();

        assert!(gate.authorize(ActionKind::Vote, &id, None).await.allowed);
        let denied = gate.authorize(ActionKind::Vote, &id, None).await;
        assert!(!denied.allowed);
        match &denied.reasons[..] {
            [DenialReason::RateLimited { retry_after }] => assert!(*retry_after > Duration::ZERO),
            other => panic!("unexpected reasons {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fail_closed_infrastructure_denies() {
        let limiter = RateLimiter::with_remote(
            Arc::new(DownRemote),
            Duration::from_secs(1),
            FallbackPolicy::FailClosed,
        );
        let gate = SecurityGate::new(limiter, GateMode::Live, RuntimeMode::Production);
        let result = gate.authorize(ActionKind::Submission, &token(), Some("hello")).await;
        assert!(!result.allowed);
        assert!(matches!(&result.reasons[..], [DenialReason::Infrastructure { .. }]));
    }

    #[tokio::test]
    async fn test_local_fallback_keeps_gate_available() {
        let limiter = RateLimiter::with_remote(
            Arc::new(DownRemote),
            Duration::from_secs(1),
            FallbackPolicy::Local,
        );
        let gate = SecurityGate::new(limiter, GateMode::Live, RuntimeMode::Production);
        assert!(gate.authorize(ActionKind::Reaction, &token(), None).await.allowed);
    }

    #[test]
    fn test_denial_display() {
        assert_eq!(
            DenialReason::RateLimited {
                retry_after: Duration::from_millis(1_500)
            }
            .to_string(),
            "Too many requests, try again in 2s"
        );
        assert_eq!(
            DenialReason::ContentBlocked {
                threats: vec!["SQL injection pattern detected".into()],
                risk_level: RiskLevel::High,
            }
            .to_string(),
            "Content blocked: SQL injection pattern detected"
        );
    }

    #[test]
    fn test_from_config_without_remote() {
        let gate = SecurityGate::from_config(&GateConfig::default(), GateMode::Audit).unwrap();
        assert!(!gate.rate_limiter().has_remote());
        assert_eq!(gate.mode(), GateMode::Audit);
        assert_eq!(
            gate.policy_for(&ActionKind::LoginAttempt),
            RateLimitPolicy::new(3, Duration::from_secs(900))
        );
    }
}
