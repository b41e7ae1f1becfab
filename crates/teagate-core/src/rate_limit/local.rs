//! Client-local fixed-window counters.
//!
//! Used directly when no remote counter is configured, and as the degraded
//! path when the remote counter cannot answer. Check-and-consume runs under a
//! single mutex so concurrent callers can never push a bucket past its max.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::{DecisionSource, RateLimitDecision, RateLimitPolicy};
use crate::types::ActionKind;

const MAX_ENTRIES: usize = 10_000;

/// Counter state for one (identity, action) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bucket {
    /// Allowed actions in the current window
    pub count: u32,
    /// Unix ms at which the window ends
    pub reset_at_ms: i64,
    /// Unix ms of the last access, for eviction
    pub last_seen_ms: i64,
}

/// In-memory rate limiter keyed by identity and action kind
#[derive(Debug, Default)]
pub struct LocalRateLimiter {
    buckets: Mutex<HashMap<BucketKey, Bucket>>,
}

type BucketKey = (String, ActionKind);

fn bucket_key(identity: &str, action: &ActionKind) -> BucketKey {
    (identity.to_string(), action.clone())
}

fn window_ms(window: Duration) -> i64 {
    i64::try_from(window.as_millis()).unwrap_or(i64::MAX)
}

impl LocalRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_buckets(&self) -> MutexGuard<'_, HashMap<BucketKey, Bucket>> {
        self.buckets.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Check the bucket at `now_ms` and count the action if it is allowed.
    /// Denied calls do not consume quota.
    pub fn check_and_consume(
        &self,
        identity: &str,
        action: &ActionKind,
        policy: RateLimitPolicy,
        now_ms: i64,
    ) -> RateLimitDecision {
        let window = window_ms(policy.window);

        if policy.max_actions == 0 {
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms: now_ms.saturating_add(window),
                retry_after: Some(policy.window),
                source: DecisionSource::Local,
            };
        }

        let key = bucket_key(identity, action);
        let mut buckets = self.lock_buckets();

        let decision = match buckets.get_mut(&key) {
            Some(bucket) if now_ms < bucket.reset_at_ms => {
                bucket.last_seen_ms = now_ms;
                if bucket.count >= policy.max_actions {
                    let wait_ms = bucket.reset_at_ms.saturating_sub(now_ms) as u64;
                    debug!(action = %action, "Local bucket exhausted, retry in {}ms", wait_ms);
                    RateLimitDecision {
                        allowed: false,
                        remaining: 0,
                        reset_at_ms: bucket.reset_at_ms,
                        retry_after: Some(Duration::from_millis(wait_ms)),
                        source: DecisionSource::Local,
                    }
                } else {
                    bucket.count += 1;
                    RateLimitDecision {
                        allowed: true,
                        remaining: policy.max_actions - bucket.count,
                        reset_at_ms: bucket.reset_at_ms,
                        retry_after: None,
                        source: DecisionSource::Local,
                    }
                }
            }
            _ => {
                let reset_at_ms = now_ms.saturating_add(window);
                buckets.insert(
                    key,
                    Bucket {
                        count: 1,
                        reset_at_ms,
                        last_seen_ms: now_ms,
                    },
                );
                RateLimitDecision {
                    allowed: true,
                    remaining: policy.max_actions - 1,
                    reset_at_ms,
                    retry_after: None,
                    source: DecisionSource::Local,
                }
            }
        };

        cleanup_buckets(&mut buckets, now_ms);
        decision
    }

    /// Forget the bucket for an identity/action pair
    pub fn reset(&self, identity: &str, action: &ActionKind) {
        self.lock_buckets().remove(&bucket_key(identity, action));
    }

    /// Snapshot of a bucket, if one exists
    pub fn bucket(&self, identity: &str, action: &ActionKind) -> Option<Bucket> {
        self.lock_buckets().get(&bucket_key(identity, action)).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_buckets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cleanup_buckets(buckets: &mut HashMap<BucketKey, Bucket>, now_ms: i64) {
    if buckets.len() <= MAX_ENTRIES {
        return;
    }

    buckets.retain(|_, bucket| now_ms < bucket.reset_at_ms);

    if buckets.len() > MAX_ENTRIES {
        let mut entries: Vec<_> = buckets
            .iter()
            .map(|(key, bucket)| (key.clone(), bucket.last_seen_ms))
            .collect();
        entries.sort_by_key(|(_, last_seen)| *last_seen);
        let remove_count = buckets.len().saturating_sub(MAX_ENTRIES);

        for (key, _) in entries.into_iter().take(remove_count) {
            buckets.remove(&key);
        }
    }
}
