//! ============================================================================
//! Access Service - cached wallet tier lookups
//! ============================================================================
//! Reads a wallet balance (or the persisted mock balance), evaluates the tier
//! and caches the balance per wallet so the RPC is not hit on every request.
//! The last computed tier is persisted for session continuity.
//! ============================================================================

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{GateError, Result};
use crate::storage::{Scope, ScopedStore, LAST_TIER_KEY, MOCK_BALANCE_KEY};
use crate::tier::{AccessTier, AccessTierInfo, Privilege, TierEvaluator, TierSignal};

/// Default cache duration in seconds (5 minutes)
pub const DEFAULT_CACHE_DURATION_SECS: i64 = 300;

/// Maximum number of entries in the tier cache
const MAX_CACHE_SIZE: usize = 1000;

/// Where wallet balances come from
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, wallet: &str) -> Result<f64>;
}

/// Balance source for setups without a remote; only mock balances resolve
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredBalanceSource;

#[async_trait]
impl BalanceSource for UnconfiguredBalanceSource {
    async fn balance(&self, _wallet: &str) -> Result<f64> {
        Err(GateError::Config(
            "Balance service is not configured; set a mock balance or Supabase credentials".into(),
        ))
    }
}

#[derive(Debug, Clone)]
struct CachedBalance {
    balance: f64,
    cached_at: i64,
}

/// Tier lookups with caching, mock balances and last-tier persistence
pub struct AccessService {
    source: Arc<dyn BalanceSource>,
    evaluator: TierEvaluator,
    store: ScopedStore,
    balance_cache: Arc<RwLock<HashMap<String, CachedBalance>>>,
    cache_duration_secs: i64,
}

impl AccessService {
    pub fn new(source: Arc<dyn BalanceSource>, evaluator: TierEvaluator, store: ScopedStore) -> Self {
        Self::with_cache_duration(source, evaluator, store, DEFAULT_CACHE_DURATION_SECS)
    }

    pub fn with_cache_duration(
        source: Arc<dyn BalanceSource>,
        evaluator: TierEvaluator,
        store: ScopedStore,
        cache_duration_secs: i64,
    ) -> Self {
        Self {
            source,
            evaluator,
            store,
            balance_cache: Arc::new(RwLock::new(HashMap::new())),
            cache_duration_secs,
        }
    }

    /// Persisted mock balance, if one is set and parses
    pub fn mock_balance(&self) -> Result<Option<f64>> {
        let raw = self.store.get(Scope::Local, MOCK_BALANCE_KEY)?;
        Ok(raw.and_then(|v| match v.trim().parse::<f64>() {
            Ok(balance) if balance.is_finite() => Some(balance),
            _ => {
                debug!("Ignoring unparseable mock balance '{}'", v);
                None
            }
        }))
    }

    /// Set or clear the mock balance used in place of the balance source
    pub fn set_mock_balance(&self, balance: Option<f64>) -> Result<()> {
        match balance {
            Some(b) => {
                info!("Mock balance set to {}", b);
                self.store.set(Scope::Local, MOCK_BALANCE_KEY, &b.to_string())
            }
            None => {
                self.store.remove(Scope::Local, MOCK_BALANCE_KEY)?;
                info!("Mock balance cleared");
                Ok(())
            }
        }
    }

    async fn fetch_balance(&self, wallet: &str) -> Result<f64> {
        if let Some(mock) = self.mock_balance()? {
            debug!("Using mock balance {} for wallet {}", mock, wallet);
            return Ok(mock);
        }

        let now = chrono::Utc::now().timestamp();
        {
            let cache = self.balance_cache.read().await;
            if let Some(cached) = cache.get(wallet) {
                if now - cached.cached_at < self.cache_duration_secs {
                    debug!(
                        "Cache hit for wallet {}: {} (age: {}s)",
                        wallet,
                        cached.balance,
                        now - cached.cached_at
                    );
                    return Ok(cached.balance);
                }
            }
        }

        debug!("Cache miss for wallet {}, fetching balance", wallet);
        let balance = self.source.balance(wallet).await?;

        {
            let mut cache = self.balance_cache.write().await;
            if cache.len() >= MAX_CACHE_SIZE && !cache.contains_key(wallet) {
                if let Some(oldest_key) = cache
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone())
                {
                    cache.remove(&oldest_key);
                }
            }
            cache.insert(
                wallet.to_string(),
                CachedBalance {
                    balance,
                    cached_at: now,
                },
            );
        }

        Ok(balance)
    }

    /// Tier and balance for a wallet
    pub async fn check_access(&self, wallet: &str) -> Result<(AccessTier, f64)> {
        let balance = self.fetch_balance(wallet).await?;
        let tier = self.evaluator.evaluate(TierSignal::Balance(balance));

        if let Err(e) = self.store.set(Scope::Local, LAST_TIER_KEY, tier.as_str()) {
            warn!("Failed to persist last tier: {}", e);
        }

        info!("Access tier for {}: {:?} ({} TEA)", wallet, tier, balance);
        Ok((tier, balance))
    }

    pub async fn tier_info(&self, wallet: &str) -> Result<AccessTierInfo> {
        let balance = self.fetch_balance(wallet).await?;
        Ok(self.evaluator.tier_info(balance))
    }

    /// Whether the wallet's tier grants a privilege
    pub async fn can_use_privilege(&self, wallet: &str, privilege: Privilege) -> Result<bool> {
        let (tier, balance) = self.check_access(wallet).await?;
        let granted = tier.has_privilege(privilege);
        if !granted {
            warn!(
                "Access denied for {}: wallet {} has {:?} tier ({} TEA)",
                privilege.as_str(),
                wallet,
                tier,
                balance
            );
        }
        Ok(granted)
    }

    /// Last tier computed by any lookup, across restarts
    pub fn last_tier(&self) -> Result<Option<AccessTier>> {
        Ok(self
            .store
            .get(Scope::Local, LAST_TIER_KEY)?
            .and_then(|v| AccessTier::parse(&v)))
    }

    /// Tier for a tip, routed through the same evaluator
    pub fn tier_for_tip(&self, amount: f64) -> AccessTier {
        self.evaluator.evaluate(TierSignal::Tip(amount))
    }

    /// Tier for a submission flag
    pub fn tier_for_submission(&self, has_submitted: bool) -> AccessTier {
        self.evaluator.evaluate(TierSignal::Submission(has_submitted))
    }

    /// Invalidate cache for a wallet (e.g. after a transfer)
    pub async fn invalidate(&self, wallet: &str) {
        let mut cache = self.balance_cache.write().await;
        if cache.remove(wallet).is_some() {
            info!("Invalidated cache for wallet {}", wallet);
        }
    }

    pub async fn clear_cache(&self) {
        let mut cache = self.balance_cache.write().await;
        let count = cache.len();
        cache.clear();
        info!("Cleared {} cached balance entries", count);
    }

    /// (total, still valid) cache entries
    pub async fn cache_stats(&self) -> (usize, usize) {
        let cache = self.balance_cache.read().await;
        let now = chrono::Utc::now().timestamp();
        let total = cache.len();
        let valid = cache
            .values()
            .filter(|c| now - c.cached_at < self.cache_duration_secs)
            .count();
        (total, valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::AdminOverride;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        balances: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(pairs: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                balances: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BalanceSource for FakeSource {
        async fn balance(&self, wallet: &str) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.balances
                .get(wallet)
                .copied()
                .ok_or_else(|| GateError::Remote(format!("unknown wallet {}", wallet)))
        }
    }

    fn service(source: Arc<FakeSource>) -> (AccessService, Arc<AdminOverride>, ScopedStore) {
        let flag = Arc::new(AdminOverride::default());
        let store = ScopedStore::in_memory();
        let svc = AccessService::new(source, TierEvaluator::new(flag.clone()), store.clone());
        (svc, flag, store)
    }

    #[tokio::test]
    async fn test_check_access_caches_balance() {
        let source = FakeSource::new(&[("w1", 500.0)]);
        let (svc, _, _) = service(source.clone());

        assert_eq!(svc.check_access("w1").await.unwrap(), (AccessTier::Connoisseur, 500.0));
        assert_eq!(svc.check_access("w1").await.unwrap().0, AccessTier::Connoisseur);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.cache_stats().await, (1, 1));

        svc.invalidate("w1").await;
        svc.check_access("w1").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let source = FakeSource::new(&[("w1", 10.0)]);
        let svc = AccessService::with_cache_duration(
            source.clone(),
            TierEvaluator::new(Arc::new(AdminOverride::default())),
            ScopedStore::in_memory(),
            0,
        );
        svc.check_access("w1").await.unwrap();
        svc.check_access("w1").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(svc.cache_stats().await, (1, 0));
    }

    #[tokio::test]
    async fn test_mock_balance_bypasses_source() {
        let source = FakeSource::new(&[]);
        let (svc, _, _) = service(source.clone());

        svc.set_mock_balance(Some(1337.0)).unwrap();
        assert_eq!(svc.check_access("anyone").await.unwrap().0, AccessTier::Legend);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        svc.set_mock_balance(None).unwrap();
        assert!(svc.check_access("anyone").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_balance_works_without_remote() {
        let svc = AccessService::new(
            Arc::new(UnconfiguredBalanceSource),
            TierEvaluator::new(Arc::new(AdminOverride::default())),
            ScopedStore::in_memory(),
        );

        let err = svc.check_access("w1").await.unwrap_err();
        assert!(matches!(err, GateError::Config(_)));

        svc.set_mock_balance(Some(420.0)).unwrap();
        let info = svc.tier_info("w1").await.unwrap();
        assert_eq!(info.tier, AccessTier::Connoisseur);
        assert_eq!(info.balance, 420.0);
    }

    #[tokio::test]
    async fn test_garbage_mock_balance_is_ignored() {
        let source = FakeSource::new(&[("w1", 70.0)]);
        let (svc, _, store) = service(source);
        store.set(Scope::Local, MOCK_BALANCE_KEY, "lots").unwrap();
        assert_eq!(svc.mock_balance().unwrap(), None);
        assert_eq!(svc.check_access("w1").await.unwrap().0, AccessTier::Sipper);
    }

    #[tokio::test]
    async fn test_last_tier_is_persisted() {
        let source = FakeSource::new(&[("w1", 69.0)]);
        let (svc, _, store) = service(source);

        assert_eq!(svc.last_tier().unwrap(), None);
        svc.check_access("w1").await.unwrap();
        assert_eq!(svc.last_tier().unwrap(), Some(AccessTier::Sipper));
        assert_eq!(store.get(Scope::Local, LAST_TIER_KEY).unwrap().as_deref(), Some("sipper"));
    }

    #[tokio::test]
    async fn test_admin_override_applies_to_cached_balance() {
        let source = FakeSource::new(&[("w1", 0.0)]);
        let (svc, flag, _) = service(source);

        assert_eq!(svc.check_access("w1").await.unwrap().0, AccessTier::None);
        flag.enable();
        assert_eq!(svc.check_access("w1").await.unwrap().0, AccessTier::Legend);
        assert!(svc.tier_info("w1").await.unwrap().admin_override);
    }

    #[tokio::test]
    async fn test_privilege_checks() {
        let source = FakeSource::new(&[("small", 100.0), ("whale", 2000.0)]);
        let (svc, _, _) = service(source);

        assert!(svc.can_use_privilege("small", Privilege::TeaSubmission).await.unwrap());
        assert!(!svc.can_use_privilege("small", Privilege::GovernanceVoting).await.unwrap());
        assert!(svc.can_use_privilege("whale", Privilege::GovernanceVoting).await.unwrap());
    }

    #[tokio::test]
    async fn test_source_errors_propagate() {
        let (svc, _, _) = service(FakeSource::new(&[]));
        let err = svc.check_access("ghost").await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_cache_is_bounded() {
        let pairs: Vec<(String, f64)> = (0..MAX_CACHE_SIZE + 10)
            .map(|i| (format!("w{}", i), i as f64))
            .collect();
        let refs: Vec<(&str, f64)> = pairs.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let (svc, _, _) = service(FakeSource::new(&refs));

        for (wallet, _) in &refs {
            svc.check_access(wallet).await.unwrap();
        }
        assert_eq!(svc.cache_stats().await.0, MAX_CACHE_SIZE);

        svc.clear_cache().await;
        assert_eq!(svc.cache_stats().await.0, 0);
    }

    #[test]
    fn test_alternate_paths_use_evaluator() {
        let (svc, flag, _) = service(FakeSource::new(&[]));
        assert_eq!(svc.tier_for_tip(1.0), AccessTier::Bribed);
        assert_eq!(svc.tier_for_submission(true), AccessTier::Submitted);
        flag.enable();
        assert_eq!(svc.tier_for_tip(0.0), AccessTier::Legend);
    }
}
