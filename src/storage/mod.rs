//! Persistence layer.
//!
//! Defines the `PickStore` trait the engine depends on, with two
//! implementations: an in-memory store (tests) and a SQLite
//! store backed by sqlx.
//!
//! Stores enforce status monotonicity themselves: `update_pick` only
//! applies to a pick that is still `active`, so an overlapping or replayed
//! run can never move a closed pick backwards.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::types::{Pick, PickUpdate, ProviderStatistics, WeeklyPerformance};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstraction over pick, aggregate and lease storage.
#[async_trait]
pub trait PickStore: Send + Sync {
    /// Insert a new pick (used by the generation side and tests).
    async fn insert_pick(&self, pick: &Pick) -> Result<()>;

    async fn get_pick(&self, id: &str) -> Result<Option<Pick>>;

    /// All picks still in `active` state, oldest first.
    async fn list_active_picks(&self) -> Result<Vec<Pick>>;

    /// Apply resolver output to an active pick.
    ///
    /// Returns `Ok(false)` when the pick exists but is already terminal.
    async fn update_pick(&self, id: &str, update: &PickUpdate) -> Result<bool>;

    /// A provider's terminal picks, in close order.
    async fn list_terminal_picks(&self, provider_id: &str) -> Result<Vec<Pick>>;

    /// Every pick of a (competition, week), any status.
    async fn list_week_picks(&self, competition_id: &str, week: u32) -> Result<Vec<Pick>>;

    /// Replace a provider's statistics row.
    async fn upsert_provider_statistics(&self, stats: &ProviderStatistics) -> Result<()>;

    async fn get_provider_statistics(&self, provider_id: &str)
        -> Result<Option<ProviderStatistics>>;

    /// Replace the row keyed by (competition, provider, week).
    async fn upsert_weekly_performance(&self, row: &WeeklyPerformance) -> Result<()>;

    async fn list_weekly_performance(
        &self,
        competition_id: &str,
        week: u32,
    ) -> Result<Vec<WeeklyPerformance>>;

    /// Take the named lease for `ttl` if it is free, expired, or already
    /// ours. Returns `false` when another live owner holds it.
    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Drop the lease if `owner` still holds it.
    async fn release_lease(&self, key: &str, owner: &str) -> Result<()>;
}
