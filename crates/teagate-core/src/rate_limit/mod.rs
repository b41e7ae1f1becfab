//! ============================================================================
//! Rate Limiter - per-identity, per-action quotas
//! ============================================================================
//! One limiter for every gated action. The remote counter (shared across
//! devices) is authoritative when configured and answers in time; otherwise
//! the client-local counter decides, and the decision says so.
//!
//! ## Defaults
//! - **Submission**: 5 per 15 minutes
//! - **Comment**: 10 per 5 minutes
//! - **Login attempt**: 3 per 15 minutes
//! - **Everything else**: 10 per 10 minutes
//! ============================================================================

mod local;
mod remote;

pub use local::{Bucket, LocalRateLimiter};
pub use remote::{
    parse_rate_limit_response, RemoteRateLimitRequest, RemoteRateLimitResponse, RemoteRateLimiter,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FallbackPolicy;
use crate::error::{GateError, Result};
use crate::identity::fingerprint;
use crate::types::ActionKind;

/// Quota for one action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_actions: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub const fn new(max_actions: u32, window: Duration) -> Self {
        Self {
            max_actions,
            window,
        }
    }

    /// Default quota for an action kind
    pub fn for_action(action: &ActionKind) -> Self {
        const MINUTE: u64 = 60;
        match action {
            ActionKind::Submission => Self::new(5, Duration::from_secs(15 * MINUTE)),
            ActionKind::Comment => Self::new(10, Duration::from_secs(5 * MINUTE)),
            ActionKind::LoginAttempt => Self::new(3, Duration::from_secs(15 * MINUTE)),
            _ => Self::new(10, Duration::from_secs(10 * MINUTE)),
        }
    }
}

/// Which counter produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Shared remote counter
    Authoritative,
    /// Local counter standing in for an unreachable remote
    LocalFallback,
    /// Local counter, no remote configured
    Local,
}

/// Outcome of one check-and-consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix ms at which the window ends
    pub reset_at_ms: i64,
    /// Set whenever `allowed` is false
    pub retry_after: Option<Duration>,
    pub source: DecisionSource,
}

/// Remote-first rate limiter with a local counter behind it
pub struct RateLimiter {
    local: LocalRateLimiter,
    remote: Option<Arc<dyn RemoteRateLimiter>>,
    timeout: Duration,
    fallback: FallbackPolicy,
}

impl RateLimiter {
    /// Local counter only
    pub fn local_only() -> Self {
        Self {
            local: LocalRateLimiter::new(),
            remote: None,
            timeout: Duration::ZERO,
            fallback: FallbackPolicy::Local,
        }
    }

    pub fn with_remote(
        remote: Arc<dyn RemoteRateLimiter>,
        timeout: Duration,
        fallback: FallbackPolicy,
    ) -> Self {
        Self {
            local: LocalRateLimiter::new(),
            remote: Some(remote),
            timeout,
            fallback,
        }
    }

    /// Check and consume one action at the current time
    pub async fn check_and_consume(
        &self,
        identity: &str,
        action: &ActionKind,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitDecision> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.check_and_consume_at(identity, action, policy, now_ms).await
    }

    /// Check and consume one action at `now_ms`.
    ///
    /// Errors only when the remote is unavailable and the fallback policy is
    /// `FailClosed`; callers must treat that as a denial.
    pub async fn check_and_consume_at(
        &self,
        identity: &str,
        action: &ActionKind,
        policy: RateLimitPolicy,
        now_ms: i64,
    ) -> Result<RateLimitDecision> {
        let Some(remote) = &self.remote else {
            return Ok(self.local.check_and_consume(identity, action, policy, now_ms));
        };

        let request = RemoteRateLimitRequest::new(identity, action, policy);
        let outcome = match tokio::time::timeout(self.timeout, remote.check(&request)).await {
            Ok(result) => result,
            Err(_) => Err(GateError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(response) => {
                let decision = response.into_decision(now_ms);
                debug!(
                    source = "authoritative",
                    action = %action,
                    allowed = decision.allowed,
                    remaining = decision.remaining,
                    "Rate limit decision"
                );
                Ok(decision)
            }
            Err(e) => match self.fallback {
                FallbackPolicy::Local => {
                    let mut decision = self.local.check_and_consume(identity, action, policy, now_ms);
                    decision.source = DecisionSource::LocalFallback;
                    warn!(
                        source = "local_fallback",
                        action = %action,
                        identity = %fingerprint(identity),
                        error = %e,
                        allowed = decision.allowed,
                        "Remote rate limiter unavailable, decided locally"
                    );
                    Ok(decision)
                }
                FallbackPolicy::FailClosed => {
                    warn!(
                        source = "fail_closed",
                        action = %action,
                        identity = %fingerprint(identity),
                        error = %e,
                        "Remote rate limiter unavailable, denying"
                    );
                    Err(e)
                }
            },
        }
    }

    /// Forget the local bucket for an identity/action pair
    pub fn reset(&self, identity: &str, action: &ActionKind) {
        self.local.reset(identity, action);
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MINUTE_MS: i64 = 60_000;

    struct FixedRemote {
        response: RemoteRateLimitResponse,
        requests: Mutex<Vec<RemoteRateLimitRequest>>,
    }

    #[async_trait]
    impl RemoteRateLimiter for FixedRemote {
        async fn check(&self, request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(self.response.clone())
        }
    }

    struct DownRemote {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RemoteRateLimiter for DownRemote {
        async fn check(&self, _request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GateError::Remote("connection refused".into()))
        }
    }

    struct SlowRemote;

    #[async_trait]
    impl RemoteRateLimiter for SlowRemote {
        async fn check(&self, _request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(RemoteRateLimitResponse {
                allowed: true,
                remaining: 99,
                reset_at_ms: 0,
                retry_after: None,
            })
        }
    }

    #[test]
    fn test_default_policies() {
        assert_eq!(
            RateLimitPolicy::for_action(&ActionKind::Submission),
            RateLimitPolicy::new(5, Duration::from_secs(900))
        );
        assert_eq!(
            RateLimitPolicy::for_action(&ActionKind::Comment),
            RateLimitPolicy::new(10, Duration::from_secs(300))
        );
        assert_eq!(
            RateLimitPolicy::for_action(&ActionKind::LoginAttempt),
            RateLimitPolicy::new(3, Duration::from_secs(900))
        );
        assert_eq!(
            RateLimitPolicy::for_action(&ActionKind::Custom("campaign".into())),
            RateLimitPolicy::new(10, Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn test_local_only_scenario() {
        let limiter = RateLimiter::local_only();
        let policy = RateLimitPolicy::for_action(&ActionKind::Submission);
        let start = 1_700_000_000_000;

        for _ in 0..5 {
            let d = limiter
                .check_and_consume_at("x", &ActionKind::Submission, policy, start)
                .await
                .unwrap();
            assert!(d.allowed);
            assert_eq!(d.source, DecisionSource::Local);
        }

        let sixth = limiter
            .check_and_consume_at("x", &ActionKind::Submission, policy, start + MINUTE_MS)
            .await
            .unwrap();
        assert!(!sixth.allowed);
        assert!(sixth.retry_after.unwrap() > Duration::ZERO);

        let seventh = limiter
            .check_and_consume_at("x", &ActionKind::Submission, policy, start + 15 * MINUTE_MS)
            .await
            .unwrap();
        assert!(seventh.allowed);
        assert_eq!(seventh.remaining, 4);
    }

    #[tokio::test]
    async fn test_remote_is_authoritative() {
        let remote = Arc::new(FixedRemote {
            response: RemoteRateLimitResponse {
                allowed: false,
                remaining: 0,
                reset_at_ms: 90_000,
                retry_after: Some(Duration::from_secs(30)),
            },
            requests: Mutex::new(Vec::new()),
        });
        let limiter =
            RateLimiter::with_remote(remote.clone(), Duration::from_secs(1), FallbackPolicy::Local);

        let d = limiter
            .check_and_consume_at("x", &ActionKind::Comment, RateLimitPolicy::for_action(&ActionKind::Comment), 60_000)
            .await
            .unwrap();

        assert!(!d.allowed);
        assert_eq!(d.source, DecisionSource::Authoritative);
        assert_eq!(d.retry_after, Some(Duration::from_secs(30)));

        let requests = remote.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, "comment");
        assert_eq!(requests[0].window_minutes, 5);
    }

    #[tokio::test]
    async fn test_remote_error_falls_back_locally() {
        let remote = Arc::new(DownRemote {
            calls: AtomicUsize::new(0),
        });
        let limiter =
            RateLimiter::with_remote(remote.clone(), Duration::from_secs(1), FallbackPolicy::Local);
        let policy = RateLimitPolicy::new(1, Duration::from_secs(60));

        let first = limiter
            .check_and_consume_at("x", &ActionKind::Vote, policy, 0)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.source, DecisionSource::LocalFallback);

        let second = limiter
            .check_and_consume_at("x", &ActionKind::Vote, policy, 1)
            .await
            .unwrap();
        assert!(!second.allowed);
        assert_eq!(second.source, DecisionSource::LocalFallback);

        // One remote attempt per check, no retries
        assert_eq!(remote.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_remote_timeout_falls_back_locally() {
        let limiter = RateLimiter::with_remote(
            Arc::new(SlowRemote),
            Duration::from_millis(50),
            FallbackPolicy::Local,
        );
        let d = limiter
            .check_and_consume_at("x", &ActionKind::Reaction, RateLimitPolicy::for_action(&ActionKind::Reaction), 0)
            .await
            .unwrap();
        assert!(d.allowed);
        assert_eq!(d.source, DecisionSource::LocalFallback);
        assert_eq!(d.remaining, 9);
    }

    #[tokio::test]
    async fn test_fail_closed_surfaces_error() {
        let limiter = RateLimiter::with_remote(
            Arc::new(SlowRemote),
            Duration::from_millis(20),
            FallbackPolicy::FailClosed,
        );
        let err = limiter
            .check_and_consume_at("x", &ActionKind::Submission, RateLimitPolicy::for_action(&ActionKind::Submission), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Timeout(_)));
        assert!(limiter.has_remote());
    }
}
