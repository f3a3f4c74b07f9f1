//! Mock market data and storage for integration testing.
//!
//! Provides a deterministic `MarketDataProvider` whose prices, per-symbol
//! failures and whole-provider outages are controllable from test code,
//! plus a `PickStore` wrapper that fails writes for chosen picks.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pickboard::config::ScoringConfig;
use pickboard::engine::prices::PriceResolver;
use pickboard::engine::resolver::PickResolver;
use pickboard::engine::Orchestrator;
use pickboard::market::MarketDataProvider;
use pickboard::storage::{MemoryStore, PickStore};
use pickboard::types::*;

/// A mock market data provider for deterministic testing.
pub struct MockMarket {
    class: AssetClass,
    prices: Mutex<HashMap<String, Decimal>>,
    /// Symbols whose lookups error out.
    failing: Mutex<HashSet<String>>,
    /// If set, every request returns this error.
    force_error: Mutex<Option<String>>,
    /// Latency added to every single-symbol lookup.
    latency: Mutex<std::time::Duration>,
    calls: AtomicUsize,
}

impl MockMarket {
    pub fn new(class: AssetClass) -> Self {
        Self {
            class,
            prices: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            force_error: Mutex::new(None),
            latency: Mutex::new(std::time::Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Make lookups for `symbol` fail with a provider error.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(symbol.to_string());
    }

    /// Force all subsequent requests to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Make each single-symbol lookup take `latency`.
    pub fn set_latency(&self, latency: std::time::Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Requests made so far (a batch counts once).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(msg) => Err(anyhow!("{msg}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    fn asset_class(&self) -> AssetClass {
        self.class
    }

    async fn get_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.check_error()?;
        if self.failing.lock().unwrap().contains(symbol) {
            return Err(anyhow!("HTTP 429 Too Many Requests"));
        }
        Ok(self.prices.lock().unwrap().get(symbol).copied())
    }

    async fn get_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.check_error()?;
        let prices = self.prices.lock().unwrap();
        let failing = self.failing.lock().unwrap();
        Ok(symbols
            .iter()
            .filter(|s| !failing.contains(*s))
            .filter_map(|s| prices.get(s).map(|p| (s.clone(), *p)))
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Store wrapper
// ---------------------------------------------------------------------------

/// Delegates to a `MemoryStore` but fails `update_pick` for chosen ids.
pub struct FlakyStore {
    inner: MemoryStore,
    broken: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            broken: Mutex::new(HashSet::new()),
        }
    }

    pub fn break_pick(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }
}

#[async_trait]
impl PickStore for FlakyStore {
    async fn insert_pick(&self, pick: &Pick) -> Result<()> {
        self.inner.insert_pick(pick).await
    }

    async fn get_pick(&self, id: &str) -> Result<Option<Pick>> {
        self.inner.get_pick(id).await
    }

    async fn list_active_picks(&self) -> Result<Vec<Pick>> {
        self.inner.list_active_picks().await
    }

    async fn update_pick(&self, id: &str, update: &PickUpdate) -> Result<bool> {
        if self.broken.lock().unwrap().contains(id) {
            return Err(anyhow!("database is locked"));
        }
        self.inner.update_pick(id, update).await
    }

    async fn list_terminal_picks(&self, provider_id: &str) -> Result<Vec<Pick>> {
        self.inner.list_terminal_picks(provider_id).await
    }

    async fn list_week_picks(&self, competition_id: &str, week: u32) -> Result<Vec<Pick>> {
        self.inner.list_week_picks(competition_id, week).await
    }

    async fn upsert_provider_statistics(&self, stats: &ProviderStatistics) -> Result<()> {
        self.inner.upsert_provider_statistics(stats).await
    }

    async fn get_provider_statistics(
        &self,
        provider_id: &str,
    ) -> Result<Option<ProviderStatistics>> {
        self.inner.get_provider_statistics(provider_id).await
    }

    async fn upsert_weekly_performance(&self, row: &WeeklyPerformance) -> Result<()> {
        self.inner.upsert_weekly_performance(row).await
    }

    async fn list_weekly_performance(
        &self,
        competition_id: &str,
        week: u32,
    ) -> Result<Vec<WeeklyPerformance>> {
        self.inner.list_weekly_performance(competition_id, week).await
    }

    async fn acquire_lease(
        &self,
        key: &str,
        owner: &str,
        ttl: std::time::Duration,
    ) -> Result<bool> {
        self.inner.acquire_lease(key, owner, ttl).await
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        self.inner.release_lease(key, owner).await
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub const COMPETITION: &str = "spring-cup";

/// Mock providers for both asset classes.
pub struct Markets {
    pub equity: Arc<MockMarket>,
    pub crypto: Arc<MockMarket>,
}

impl Markets {
    pub fn new() -> Self {
        Self {
            equity: Arc::new(MockMarket::new(AssetClass::Equity)),
            crypto: Arc::new(MockMarket::new(AssetClass::Crypto)),
        }
    }

    pub fn orchestrator(&self, store: Arc<dyn PickStore>) -> Orchestrator {
        Orchestrator::new(
            store,
            PriceResolver::new(
                self.equity.clone(),
                self.crypto.clone(),
                std::time::Duration::ZERO,
            ),
            PickResolver::new(ScoringConfig::default()),
            std::time::Duration::from_secs(60),
        )
    }
}

/// An active pick in `COMPETITION`, expiring `expires_in_days` from now
/// (negative for an already-expired pick).
#[allow(clippy::too_many_arguments)]
pub fn pick(
    provider: &str,
    week: u32,
    symbol: &str,
    class: AssetClass,
    direction: Direction,
    entry: Decimal,
    target: Decimal,
    stop: Decimal,
    expires_in_days: i64,
) -> Pick {
    Pick::new(
        provider,
        COMPETITION,
        week,
        symbol,
        class,
        direction,
        60,
        entry,
        target,
        stop,
        Utc::now() + Duration::days(expires_in_days),
    )
}

/// UP equity pick: entry 100, target 110, stop 95.
pub fn up_equity(provider: &str, week: u32, symbol: &str) -> Pick {
    use rust_decimal_macros::dec;
    pick(
        provider,
        week,
        symbol,
        AssetClass::Equity,
        Direction::Up,
        dec!(100),
        dec!(110),
        dec!(95),
        5,
    )
}
