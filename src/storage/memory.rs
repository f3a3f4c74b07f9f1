//! In-memory `PickStore`.
//!
//! Everything lives behind one `tokio::sync::RwLock`. Used by tests and
//! by anything that needs a throwaway store.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use super::PickStore;
use crate::types::{Pick, PickUpdate, ProviderStatistics, WeekKey, WeeklyPerformance};

#[derive(Default)]
struct Inner {
    picks: HashMap<String, Pick>,
    stats: HashMap<String, ProviderStatistics>,
    weekly: BTreeMap<WeekKey, WeeklyPerformance>,
    leases: HashMap<String, Lease>,
}

struct Lease {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with existing picks.
    pub async fn with_picks(picks: Vec<Pick>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write().await;
            for pick in picks {
                inner.picks.insert(pick.id.clone(), pick);
            }
        }
        store
    }

    pub async fn pick_count(&self) -> usize {
        self.inner.read().await.picks.len()
    }

    fn sorted_by_creation(mut picks: Vec<Pick>) -> Vec<Pick> {
        picks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        picks
    }
}

#[async_trait]
impl PickStore for MemoryStore {
    async fn insert_pick(&self, pick: &Pick) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.picks.contains_key(&pick.id) {
            return Err(anyhow!("Pick already exists: {}", pick.id));
        }
        inner.picks.insert(pick.id.clone(), pick.clone());
        Ok(())
    }

    async fn get_pick(&self, id: &str) -> Result<Option<Pick>> {
        Ok(self.inner.read().await.picks.get(id).cloned())
    }

    async fn list_active_picks(&self) -> Result<Vec<Pick>> {
        let inner = self.inner.read().await;
        let active = inner.picks.values().filter(|p| p.is_active()).cloned().collect();
        Ok(Self::sorted_by_creation(active))
    }

    async fn update_pick(&self, id: &str, update: &PickUpdate) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let pick = inner
            .picks
            .get_mut(id)
            .ok_or_else(|| anyhow!("Pick not found: {id}"))?;
        let applied = pick.apply(update);
        if !applied {
            debug!(pick_id = id, status = %pick.status, "Update ignored, pick already closed");
        }
        Ok(applied)
    }

    async fn list_terminal_picks(&self, provider_id: &str) -> Result<Vec<Pick>> {
        let inner = self.inner.read().await;
        let mut picks: Vec<Pick> = inner
            .picks
            .values()
            .filter(|p| p.provider_id == provider_id && p.status.is_terminal())
            .cloned()
            .collect();
        picks.sort_by(|a, b| {
            a.closed_at
                .cmp(&b.closed_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(picks)
    }

    async fn list_week_picks(&self, competition_id: &str, week: u32) -> Result<Vec<Pick>> {
        let inner = self.inner.read().await;
        let picks = inner
            .picks
            .values()
            .filter(|p| p.competition_id == competition_id && p.week == week)
            .cloned()
            .collect();
        Ok(Self::sorted_by_creation(picks))
    }

    async fn upsert_provider_statistics(&self, stats: &ProviderStatistics) -> Result<()> {
        self.inner
            .write()
            .await
            .stats
            .insert(stats.provider_id.clone(), stats.clone());
        Ok(())
    }

    async fn get_provider_statistics(
        &self,
        provider_id: &str,
    ) -> Result<Option<ProviderStatistics>> {
        Ok(self.inner.read().await.stats.get(provider_id).cloned())
    }

    async fn upsert_weekly_performance(&self, row: &WeeklyPerformance) -> Result<()> {
        self.inner.write().await.weekly.insert(row.key(), row.clone());
        Ok(())
    }

    async fn list_weekly_performance(
        &self,
        competition_id: &str,
        week: u32,
    ) -> Result<Vec<WeeklyPerformance>> {
        let inner = self.inner.read().await;
        Ok(inner
            .weekly
            .values()
            .filter(|r| r.competition_id == competition_id && r.week == week)
            .cloned()
            .collect())
    }

    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut inner = self.inner.write().await;

        if let Some(lease) = inner.leases.get(key) {
            if lease.owner != owner && lease.expires_at > now {
                return Ok(false);
            }
        }

        let ttl = chrono::Duration::from_std(ttl)?;
        inner.leases.insert(
            key.to_string(),
            Lease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.leases.get(key).is_some_and(|l| l.owner == owner) {
            inner.leases.remove(key);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
