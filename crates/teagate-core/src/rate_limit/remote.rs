//! Authoritative rate-limit RPC boundary.
//!
//! The wire response is parsed into a typed shape here; anything that does
//! not fit becomes `GateError::MalformedResponse`, which the limiter treats
//! as "remote unavailable".

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{DecisionSource, RateLimitDecision, RateLimitPolicy};
use crate::error::{GateError, Result};
use crate::types::ActionKind;

const SERVICE: &str = "rate_limit";

/// Request body for the remote counter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRateLimitRequest {
    pub identifier: String,
    pub action: String,
    pub max_actions: u32,
    pub window_minutes: u64,
}

impl RemoteRateLimitRequest {
    pub fn new(identifier: &str, action: &ActionKind, policy: RateLimitPolicy) -> Self {
        // Whole minutes on the wire; never round a short window down to zero
        let window_minutes = policy.window.as_secs().div_ceil(60).max(1);
        Self {
            identifier: identifier.to_string(),
            action: action.as_str().to_string(),
            max_actions: policy.max_actions,
            window_minutes,
        }
    }
}

/// Typed remote answer
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRateLimitResponse {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: i64,
    pub retry_after: Option<Duration>,
}

impl RemoteRateLimitResponse {
    pub fn into_decision(self, now_ms: i64) -> RateLimitDecision {
        let retry_after = if self.allowed {
            None
        } else {
            Some(self.retry_after.filter(|d| !d.is_zero()).unwrap_or_else(|| {
                let wait_ms = self.reset_at_ms.saturating_sub(now_ms).max(1_000);
                Duration::from_millis(wait_ms as u64)
            }))
        };

        RateLimitDecision {
            allowed: self.allowed,
            remaining: if self.allowed { self.remaining } else { 0 },
            reset_at_ms: self.reset_at_ms,
            retry_after,
            source: DecisionSource::Authoritative,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireResetTime {
    Millis(i64),
    Rfc3339(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResponse {
    allowed: bool,
    remaining: i64,
    reset_time: WireResetTime,
    #[serde(default)]
    retry_after: Option<f64>,
}

/// Parse the RPC JSON. Table-returning functions answer with a one-row array,
/// which is unwrapped first.
pub fn parse_rate_limit_response(value: serde_json::Value) -> Result<RemoteRateLimitResponse> {
    let value = match value {
        serde_json::Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
        other => other,
    };

    let wire: WireResponse =
        serde_json::from_value(value).map_err(|e| GateError::MalformedResponse {
            service: SERVICE,
            detail: e.to_string(),
        })?;

    let reset_at_ms = match wire.reset_time {
        WireResetTime::Millis(ms) => ms,
        WireResetTime::Rfc3339(text) => DateTime::parse_from_rfc3339(&text)
            .map(|dt| dt.timestamp_millis())
            .map_err(|e| GateError::MalformedResponse {
                service: SERVICE,
                detail: format!("bad resetTime '{}': {}", text, e),
            })?,
    };

    let retry_after = wire
        .retry_after
        .map(|secs| {
            Duration::try_from_secs_f64(secs).map_err(|e| GateError::MalformedResponse {
                service: SERVICE,
                detail: format!("bad retryAfter {}: {}", secs, e),
            })
        })
        .transpose()?;

    Ok(RemoteRateLimitResponse {
        allowed: wire.allowed,
        remaining: u32::try_from(wire.remaining.max(0)).unwrap_or(u32::MAX),
        reset_at_ms,
        retry_after,
    })
}

/// A shared, authoritative counter reachable over the network
#[async_trait]
pub trait RemoteRateLimiter: Send + Sync {
    async fn check(&self, request: &RemoteRateLimitRequest) -> Result<RemoteRateLimitResponse>;
}
