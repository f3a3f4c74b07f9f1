//! Resolution orchestrator: one batch pass over a (competition, week).
//!
//! lease → load active picks → price → resolve + persist each pick →
//! recompute provider statistics → rebuild and rank affected weeks →
//! release lease → summary.
//!
//! Per-pick and per-aggregate failures are collected into the summary and
//! never abort the pass. Only lease contention and failing to load the
//! active picks at all surface as an `Err`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::engine::aggregator::Aggregator;
use crate::engine::prices::PriceResolver;
use crate::engine::ranking::rank_week;
use crate::engine::resolver::PickResolver;
use crate::market::crypto::CryptoPriceClient;
use crate::market::equity::EquityQuoteClient;
use crate::storage::PickStore;
use crate::types::{Pick, PickboardError, ProviderStatistics, RunScope, RunSummary};

pub struct Orchestrator {
    store: Arc<dyn PickStore>,
    prices: PriceResolver,
    resolver: PickResolver,
    lease_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn PickStore>,
        prices: PriceResolver,
        resolver: PickResolver,
        lease_ttl: Duration,
    ) -> Self {
        Self {
            store,
            prices,
            resolver,
            lease_ttl,
        }
    }

    /// Wire the live market data clients from configuration.
    pub fn from_config(config: &AppConfig, store: Arc<dyn PickStore>) -> Result<Self> {
        let md = &config.market_data;

        let api_key = AppConfig::resolve_secret(&md.equity_api_key_env);
        if api_key.is_none() {
            warn!(
                env = %md.equity_api_key_env,
                "Equity API key not set, quote requests will likely be rejected"
            );
        }

        let equity = EquityQuoteClient::new(&md.equity_base_url, api_key, md.request_timeout_secs)?;
        let crypto = CryptoPriceClient::new(&md.crypto_base_url, md.request_timeout_secs)?;
        let prices = PriceResolver::new(
            Arc::new(equity),
            Arc::new(crypto),
            Duration::from_millis(config.engine.equity_request_delay_ms),
        );

        Ok(Self::new(
            store,
            prices,
            PickResolver::new(config.scoring.clone()),
            Duration::from_secs(config.engine.lease_ttl_secs),
        ))
    }

    /// Run one resolution pass for `scope`.
    ///
    /// Fails with `PickboardError::RunInProgress` if another run holds the
    /// competition's lease, whatever week it is resolving. The lease is
    /// released on every exit path.
    pub async fn run(&self, scope: &RunScope) -> Result<RunSummary> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let lease_key = scope.lease_key();

        let acquired = self
            .store
            .acquire_lease(&lease_key, &run_id, self.lease_ttl)
            .await
            .with_context(|| format!("Failed to acquire run lease {lease_key}"))?;
        if !acquired {
            warn!(scope = %scope, "Resolution already running, rejecting trigger");
            return Err(PickboardError::RunInProgress(scope.to_string()).into());
        }

        info!(run_id = %run_id, scope = %scope, "Resolution run started");
        let result = self.run_locked(scope, &run_id).await;

        if let Err(e) = self.store.release_lease(&lease_key, &run_id).await {
            // Not fatal: the lease times out on its own.
            warn!(run_id = %run_id, error = %e, "Failed to release run lease");
        }

        match &result {
            Ok(summary) => info!(
                run_id = %run_id,
                processed = summary.picks_processed,
                closed = summary.picks_closed,
                updated = summary.picks_updated,
                errors = summary.errors.len(),
                providers = summary.providers_touched.len(),
                "Resolution run finished"
            ),
            Err(e) => error!(run_id = %run_id, error = %e, "Resolution run failed"),
        }
        result
    }

    async fn run_locked(&self, scope: &RunScope, run_id: &str) -> Result<RunSummary> {
        let started_at = Utc::now();
        let mut summary = RunSummary {
            run_id: run_id.to_string(),
            scope: scope.clone(),
            started_at,
            finished_at: started_at,
            picks_processed: 0,
            picks_closed: 0,
            picks_updated: 0,
            errors: Vec::new(),
            providers_touched: Vec::new(),
            weeks_ranked: Vec::new(),
        };

        // ── 1. Load ────────────────────────────────────────────────
        let picks: Vec<Pick> = self
            .store
            .list_active_picks()
            .await
            .context("Failed to load active picks")?
            .into_iter()
            .filter(|p| p.competition_id == scope.competition_id)
            .collect();
        summary.picks_processed = picks.len();

        let mut valid = Vec::with_capacity(picks.len());
        for pick in picks {
            match pick.validate() {
                Ok(()) => valid.push(pick),
                Err(e) => {
                    warn!(pick_id = %pick.id, error = %e, "Skipping unscorable pick");
                    summary.errors.push(e.to_string());
                }
            }
        }
        info!(active = valid.len(), "Active picks loaded");

        // ── 2. Price ───────────────────────────────────────────────
        let resolution = self
            .prices
            .resolve(valid.iter().map(|p| (p.symbol.as_str(), p.asset_class)))
            .await;
        summary.errors.extend(resolution.errors.iter().cloned());

        // ── 3. Resolve + persist ───────────────────────────────────
        let now = Utc::now();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut weeks: BTreeSet<u32> = BTreeSet::from([scope.week]);

        for pick in &valid {
            let Some(price) = resolution.price(&pick.symbol, pick.asset_class) else {
                debug!(pick_id = %pick.id, symbol = %pick.symbol, "No price, pick stays active");
                continue;
            };
            let Some(update) = self.resolver.evaluate(pick, price, now) else {
                continue;
            };

            match self.store.update_pick(&pick.id, &update).await {
                Ok(true) => {
                    summary.picks_updated += 1;
                    if update.is_terminal() {
                        summary.picks_closed += 1;
                        touched.insert(pick.provider_id.clone());
                        weeks.insert(pick.week);
                    } else {
                        debug!(pick_id = %pick.id, price = %price, "Pick refreshed");
                    }
                }
                Ok(false) => {
                    debug!(pick_id = %pick.id, "Pick closed by another writer, skipped");
                }
                Err(e) => {
                    let err = PickboardError::Storage(format!("pick {}: {e:#}", pick.id));
                    error!(pick_id = %pick.id, error = %err, "Failed to persist pick update");
                    summary.errors.push(err.to_string());
                }
            }
        }

        // ── 4. Provider statistics ─────────────────────────────────
        match self.store.list_week_picks(&scope.competition_id, scope.week).await {
            Ok(week_picks) => {
                touched.extend(week_picks.into_iter().map(|p| p.provider_id));
            }
            Err(e) => {
                let err = PickboardError::Storage(format!("week {} picks: {e:#}", scope.week));
                error!(error = %err, "Failed to load scope week picks");
                summary.errors.push(err.to_string());
            }
        }

        let providers: Vec<String> = touched.into_iter().collect();
        let results = join_all(
            providers
                .iter()
                .map(|provider| self.refresh_provider(provider, now)),
        )
        .await;

        for (provider, result) in providers.iter().zip(results) {
            match result {
                Ok(stats) => debug!(stats = %stats, "Provider statistics saved"),
                Err(e) => {
                    let err = PickboardError::Storage(format!("statistics {provider}: {e:#}"));
                    error!(provider = %provider, error = %err, "Failed to refresh statistics");
                    summary.errors.push(err.to_string());
                }
            }
        }
        summary.providers_touched = providers;

        // ── 5. Weekly performance + ranking ────────────────────────
        for week in weeks {
            match self.rebuild_week(&scope.competition_id, week).await {
                Ok(rows) => {
                    info!(week, providers = rows, "Week ranked");
                    summary.weeks_ranked.push(week);
                }
                Err(e) => {
                    let err = PickboardError::Storage(format!("week {week} ranking: {e:#}"));
                    error!(week, error = %err, "Failed to rebuild weekly performance");
                    summary.errors.push(err.to_string());
                }
            }
        }

        summary.finished_at = Utc::now();
        Ok(summary)
    }

    /// Recompute one provider's statistics from its full terminal history.
    async fn refresh_provider(
        &self,
        provider_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProviderStatistics> {
        let history = self.store.list_terminal_picks(provider_id).await?;
        let stats = Aggregator::provider_statistics(provider_id, &history, now);
        self.store.upsert_provider_statistics(&stats).await?;
        Ok(stats)
    }

    /// Rebuild, rank and store every row of one week. Returns the row count.
    async fn rebuild_week(&self, competition_id: &str, week: u32) -> Result<usize> {
        let picks = self.store.list_week_picks(competition_id, week).await?;
        let mut rows = Aggregator::weekly_performance(competition_id, week, &picks);
        rank_week(&mut rows);
        for row in &rows {
            self.store
                .upsert_weekly_performance(row)
                .await
                .with_context(|| format!("Failed to save {}", row.key()))?;
        }
        Ok(rows.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
