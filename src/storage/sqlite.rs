//! SQLite `PickStore` backed by sqlx.
//!
//! # Schema
//!
//! - `picks`: one row per pick. Decimals are stored as TEXT so no precision
//!   is lost, timestamps as fixed-width RFC 3339 TEXT so they sort
//!   lexicographically.
//! - `provider_statistics`: one row per provider, replaced on every run.
//! - `weekly_performance`: keyed by (competition_id, provider_id, week).
//! - `run_leases`: named leases with an expiry in epoch milliseconds.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info};

use super::PickStore;
use crate::types::{
    AssetClass, CloseReason, Direction, Pick, PickResult, PickStatus, PickUpdate,
    ProviderStatistics, WeeklyPerformance,
};

// ---------------------------------------------------------------------------
// Column codecs
// ---------------------------------------------------------------------------

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Bad timestamp in database: {s}"))?
        .with_timezone(&Utc))
}

fn parse_dec(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Bad decimal in database: {s}"))
}

// ---------------------------------------------------------------------------
// Row records
// ---------------------------------------------------------------------------

const PICK_COLUMNS: &str = "id, provider_id, competition_id, week, symbol, asset_class, \
     direction, confidence, entry_price, target_price, stop_loss, created_at, expires_at, \
     current_price, price_change, price_change_pct, status, result, close_reason, \
     points_earned, profit_loss, closed_at";

#[derive(Debug, FromRow)]
struct PickRecord {
    id: String,
    provider_id: String,
    competition_id: String,
    week: i64,
    symbol: String,
    asset_class: String,
    direction: String,
    confidence: i64,
    entry_price: String,
    target_price: String,
    stop_loss: String,
    created_at: String,
    expires_at: String,
    current_price: Option<String>,
    price_change: String,
    price_change_pct: f64,
    status: String,
    result: Option<String>,
    close_reason: Option<String>,
    points_earned: String,
    profit_loss: String,
    closed_at: Option<String>,
}

impl TryFrom<PickRecord> for Pick {
    type Error = anyhow::Error;

    fn try_from(r: PickRecord) -> Result<Self> {
        Ok(Pick {
            week: u32::try_from(r.week).with_context(|| format!("Bad week for pick {}", r.id))?,
            symbol: r.symbol,
            asset_class: AssetClass::from_str(&r.asset_class)?,
            direction: Direction::from_str(&r.direction)?,
            confidence: u8::try_from(r.confidence)
                .with_context(|| format!("Bad confidence for pick {}", r.id))?,
            entry_price: parse_dec(&r.entry_price)?,
            target_price: parse_dec(&r.target_price)?,
            stop_loss: parse_dec(&r.stop_loss)?,
            created_at: parse_ts(&r.created_at)?,
            expires_at: parse_ts(&r.expires_at)?,
            current_price: r.current_price.as_deref().map(parse_dec).transpose()?,
            price_change: parse_dec(&r.price_change)?,
            price_change_pct: r.price_change_pct,
            status: PickStatus::from_str(&r.status)?,
            result: r.result.as_deref().map(PickResult::from_str).transpose()?,
            close_reason: r
                .close_reason
                .as_deref()
                .map(CloseReason::from_str)
                .transpose()?,
            points_earned: parse_dec(&r.points_earned)?,
            profit_loss: parse_dec(&r.profit_loss)?,
            closed_at: r.closed_at.as_deref().map(parse_ts).transpose()?,
            id: r.id,
            provider_id: r.provider_id,
            competition_id: r.competition_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct StatisticsRecord {
    provider_id: String,
    total_picks: i64,
    wins: i64,
    losses: i64,
    win_rate: f64,
    total_points: String,
    profit_loss: String,
    avg_return_pct: f64,
    current_streak: i64,
    best_win_streak: i64,
    worst_loss_streak: i64,
    updated_at: String,
}

impl TryFrom<StatisticsRecord> for ProviderStatistics {
    type Error = anyhow::Error;

    fn try_from(r: StatisticsRecord) -> Result<Self> {
        Ok(ProviderStatistics {
            total_picks: u32::try_from(r.total_picks)?,
            wins: u32::try_from(r.wins)?,
            losses: u32::try_from(r.losses)?,
            win_rate: r.win_rate,
            total_points: parse_dec(&r.total_points)?,
            profit_loss: parse_dec(&r.profit_loss)?,
            avg_return_pct: r.avg_return_pct,
            current_streak: i32::try_from(r.current_streak)?,
            best_win_streak: u32::try_from(r.best_win_streak)?,
            worst_loss_streak: u32::try_from(r.worst_loss_streak)?,
            updated_at: parse_ts(&r.updated_at)?,
            provider_id: r.provider_id,
        })
    }
}

#[derive(Debug, FromRow)]
struct WeeklyRecord {
    competition_id: String,
    provider_id: String,
    week: i64,
    picks_made: i64,
    picks_won: i64,
    picks_lost: i64,
    picks_active: i64,
    win_rate: f64,
    total_points: String,
    profit_loss: String,
    rank: i64,
}

impl TryFrom<WeeklyRecord> for WeeklyPerformance {
    type Error = anyhow::Error;

    fn try_from(r: WeeklyRecord) -> Result<Self> {
        Ok(WeeklyPerformance {
            week: u32::try_from(r.week)?,
            picks_made: u32::try_from(r.picks_made)?,
            picks_won: u32::try_from(r.picks_won)?,
            picks_lost: u32::try_from(r.picks_lost)?,
            picks_active: u32::try_from(r.picks_active)?,
            win_rate: r.win_rate,
            total_points: parse_dec(&r.total_points)?,
            profit_loss: parse_dec(&r.profit_loss)?,
            rank: u32::try_from(r.rank)?,
            competition_id: r.competition_id,
            provider_id: r.provider_id,
        })
    }
}

fn into_picks(records: Vec<PickRecord>) -> Result<Vec<Pick>> {
    records.into_iter().map(Pick::try_from).collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and run
    /// migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!(url = database_url, "Opening pick database");

        if let Some(db_path) = database_url.strip_prefix("sqlite://") {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url: {database_url}"))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database. The pool is pinned to one connection
    /// that never recycles, otherwise the data would vanish.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        debug!("Running database migrations");

        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS picks (
                id TEXT PRIMARY KEY,
                provider_id TEXT NOT NULL,
                competition_id TEXT NOT NULL,
                week INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                direction TEXT NOT NULL,
                confidence INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                target_price TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                current_price TEXT,
                price_change TEXT NOT NULL DEFAULT '0',
                price_change_pct REAL NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                result TEXT,
                close_reason TEXT,
                points_earned TEXT NOT NULL DEFAULT '0',
                profit_loss TEXT NOT NULL DEFAULT '0',
                closed_at TEXT
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_picks_status ON picks(status)",
            "CREATE INDEX IF NOT EXISTS idx_picks_provider ON picks(provider_id)",
            "CREATE INDEX IF NOT EXISTS idx_picks_week ON picks(competition_id, week)",
            r#"
            CREATE TABLE IF NOT EXISTS provider_statistics (
                provider_id TEXT PRIMARY KEY,
                total_picks INTEGER NOT NULL,
                wins INTEGER NOT NULL,
                losses INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                total_points TEXT NOT NULL,
                profit_loss TEXT NOT NULL,
                avg_return_pct REAL NOT NULL,
                current_streak INTEGER NOT NULL,
                best_win_streak INTEGER NOT NULL,
                worst_loss_streak INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS weekly_performance (
                competition_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                week INTEGER NOT NULL,
                picks_made INTEGER NOT NULL,
                picks_won INTEGER NOT NULL,
                picks_lost INTEGER NOT NULL,
                picks_active INTEGER NOT NULL,
                win_rate REAL NOT NULL,
                total_points TEXT NOT NULL,
                profit_loss TEXT NOT NULL,
                rank INTEGER NOT NULL,
                PRIMARY KEY (competition_id, provider_id, week)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS run_leases (
                key TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .context("Migration failed")?;
        }

        debug!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl PickStore for SqliteStore {
    async fn insert_pick(&self, pick: &Pick) -> Result<()> {
        let sql = format!(
            "INSERT INTO picks ({PICK_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)"
        );
        sqlx::query(&sql)
            .bind(&pick.id)
            .bind(&pick.provider_id)
            .bind(&pick.competition_id)
            .bind(pick.week as i64)
            .bind(&pick.symbol)
            .bind(pick.asset_class.as_str())
            .bind(pick.direction.as_str())
            .bind(pick.confidence as i64)
            .bind(pick.entry_price.to_string())
            .bind(pick.target_price.to_string())
            .bind(pick.stop_loss.to_string())
            .bind(ts(pick.created_at))
            .bind(ts(pick.expires_at))
            .bind(pick.current_price.map(|p| p.to_string()))
            .bind(pick.price_change.to_string())
            .bind(pick.price_change_pct)
            .bind(pick.status.as_str())
            .bind(pick.result.map(|r| r.as_str()))
            .bind(pick.close_reason.map(|r| r.as_str()))
            .bind(pick.points_earned.to_string())
            .bind(pick.profit_loss.to_string())
            .bind(pick.closed_at.map(ts))
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(pick_id = %pick.id, error = %e, "Failed to insert pick");
                anyhow!("Failed to insert pick {}: {e}", pick.id)
            })?;
        Ok(())
    }

    async fn get_pick(&self, id: &str) -> Result<Option<Pick>> {
        let sql = format!("SELECT {PICK_COLUMNS} FROM picks WHERE id = ?1");
        let record = sqlx::query_as::<_, PickRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get pick {id}"))?;
        record.map(Pick::try_from).transpose()
    }

    async fn list_active_picks(&self) -> Result<Vec<Pick>> {
        let sql = format!(
            "SELECT {PICK_COLUMNS} FROM picks WHERE status = 'active' ORDER BY created_at, id"
        );
        let records = sqlx::query_as::<_, PickRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list active picks")?;
        into_picks(records)
    }

    async fn update_pick(&self, id: &str, update: &PickUpdate) -> Result<bool> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE picks
            SET current_price = ?1, price_change = ?2, price_change_pct = ?3,
                status = ?4, result = ?5, close_reason = ?6,
                points_earned = ?7, profit_loss = ?8, closed_at = ?9
            WHERE id = ?10 AND status = 'active'
            "#,
        )
        .bind(update.current_price.to_string())
        .bind(update.price_change.to_string())
        .bind(update.price_change_pct)
        .bind(update.status.as_str())
        .bind(update.result.map(|r| r.as_str()))
        .bind(update.close_reason.map(|r| r.as_str()))
        .bind(update.points_earned.to_string())
        .bind(update.profit_loss.to_string())
        .bind(update.closed_at.map(ts))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(pick_id = id, error = %e, "Failed to update pick");
            anyhow!("Failed to update pick {id}: {e}")
        })?
        .rows_affected();

        if rows_affected > 0 {
            return Ok(true);
        }

        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM picks WHERE id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to look up pick {id}"))?;
        if exists == 0 {
            return Err(anyhow!("Pick not found: {id}"));
        }

        debug!(pick_id = id, "Update ignored, pick already closed");
        Ok(false)
    }

    async fn list_terminal_picks(&self, provider_id: &str) -> Result<Vec<Pick>> {
        let sql = format!(
            "SELECT {PICK_COLUMNS} FROM picks \
             WHERE provider_id = ?1 AND status != 'active' \
             ORDER BY closed_at, created_at, id"
        );
        let records = sqlx::query_as::<_, PickRecord>(&sql)
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list picks for {provider_id}"))?;
        into_picks(records)
    }

    async fn list_week_picks(&self, competition_id: &str, week: u32) -> Result<Vec<Pick>> {
        let sql = format!(
            "SELECT {PICK_COLUMNS} FROM picks \
             WHERE competition_id = ?1 AND week = ?2 ORDER BY created_at, id"
        );
        let records = sqlx::query_as::<_, PickRecord>(&sql)
            .bind(competition_id)
            .bind(week as i64)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to list picks for {competition_id} week {week}"))?;
        into_picks(records)
    }

    async fn upsert_provider_statistics(&self, stats: &ProviderStatistics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_statistics (
                provider_id, total_picks, wins, losses, win_rate, total_points,
                profit_loss, avg_return_pct, current_streak, best_win_streak,
                worst_loss_streak, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(provider_id) DO UPDATE SET
                total_picks = excluded.total_picks,
                wins = excluded.wins,
                losses = excluded.losses,
                win_rate = excluded.win_rate,
                total_points = excluded.total_points,
                profit_loss = excluded.profit_loss,
                avg_return_pct = excluded.avg_return_pct,
                current_streak = excluded.current_streak,
                best_win_streak = excluded.best_win_streak,
                worst_loss_streak = excluded.worst_loss_streak,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stats.provider_id)
        .bind(stats.total_picks as i64)
        .bind(stats.wins as i64)
        .bind(stats.losses as i64)
        .bind(stats.win_rate)
        .bind(stats.total_points.to_string())
        .bind(stats.profit_loss.to_string())
        .bind(stats.avg_return_pct)
        .bind(stats.current_streak as i64)
        .bind(stats.best_win_streak as i64)
        .bind(stats.worst_loss_streak as i64)
        .bind(ts(stats.updated_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save statistics for {}", stats.provider_id))?;
        Ok(())
    }

    async fn get_provider_statistics(
        &self,
        provider_id: &str,
    ) -> Result<Option<ProviderStatistics>> {
        let record = sqlx::query_as::<_, StatisticsRecord>(
            "SELECT * FROM provider_statistics WHERE provider_id = ?1",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to get statistics for {provider_id}"))?;
        record.map(ProviderStatistics::try_from).transpose()
    }

    async fn upsert_weekly_performance(&self, row: &WeeklyPerformance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO weekly_performance (
                competition_id, provider_id, week, picks_made, picks_won,
                picks_lost, picks_active, win_rate, total_points, profit_loss, rank
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(competition_id, provider_id, week) DO UPDATE SET
                picks_made = excluded.picks_made,
                picks_won = excluded.picks_won,
                picks_lost = excluded.picks_lost,
                picks_active = excluded.picks_active,
                win_rate = excluded.win_rate,
                total_points = excluded.total_points,
                profit_loss = excluded.profit_loss,
                rank = excluded.rank
            "#,
        )
        .bind(&row.competition_id)
        .bind(&row.provider_id)
        .bind(row.week as i64)
        .bind(row.picks_made as i64)
        .bind(row.picks_won as i64)
        .bind(row.picks_lost as i64)
        .bind(row.picks_active as i64)
        .bind(row.win_rate)
        .bind(row.total_points.to_string())
        .bind(row.profit_loss.to_string())
        .bind(row.rank as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save weekly row {}", row.key()))?;
        Ok(())
    }

    async fn list_weekly_performance(
        &self,
        competition_id: &str,
        week: u32,
    ) -> Result<Vec<WeeklyPerformance>> {
        let records = sqlx::query_as::<_, WeeklyRecord>(
            "SELECT * FROM weekly_performance WHERE competition_id = ?1 AND week = ?2 \
             ORDER BY provider_id",
        )
        .bind(competition_id)
        .bind(week as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list weekly rows for {competition_id} week {week}"))?;
        records.into_iter().map(WeeklyPerformance::try_from).collect()
    }

    async fn acquire_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        // The conditional DO UPDATE affects zero rows while another owner's
        // lease is still live.
        let rows_affected = sqlx::query(
            r#"
            INSERT INTO run_leases (key, owner, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                owner = excluded.owner,
                expires_at = excluded.expires_at
            WHERE run_leases.owner = excluded.owner OR run_leases.expires_at <= ?4
            "#,
        )
        .bind(key)
        .bind(owner)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to acquire lease {key}"))?
        .rows_affected();

        Ok(rows_affected > 0)
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM run_leases WHERE key = ?1 AND owner = ?2")
            .bind(key)
            .bind(owner)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to release lease {key}"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
