//! Shared types for PICKBOARD.
//!
//! These types form the data model used across all modules: picks and
//! their resolver output, the derived provider/week aggregates, and the
//! run summary returned to whoever triggered a resolution pass.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Instrument asset class. Determines which market data provider prices it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Equity,
    Crypto,
}

impl AssetClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::Crypto => "crypto",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AssetClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "equity" | "stock" | "stocks" => Ok(AssetClass::Equity),
            "crypto" | "digital" | "digital_asset" => Ok(AssetClass::Crypto),
            _ => Err(anyhow::anyhow!("Unknown asset class: {s}")),
        }
    }
}

/// Predicted price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    Hold,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UP" | "BUY" | "LONG" => Ok(Direction::Up),
            "DOWN" | "SELL" | "SHORT" => Ok(Direction::Down),
            "HOLD" => Ok(Direction::Hold),
            _ => Err(anyhow::anyhow!("Unknown direction: {s}")),
        }
    }
}

/// Pick lifecycle status. Only `Active` is non-terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickStatus {
    Active,
    Won,
    Lost,
    Expired,
}

impl PickStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PickStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PickStatus::Active => "active",
            PickStatus::Won => "won",
            PickStatus::Lost => "lost",
            PickStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for PickStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PickStatus::Active),
            "won" => Ok(PickStatus::Won),
            "lost" => Ok(PickStatus::Lost),
            "expired" => Ok(PickStatus::Expired),
            _ => Err(anyhow::anyhow!("Unknown pick status: {s}")),
        }
    }
}

/// Outcome classification of a terminal pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickResult {
    Win,
    Loss,
}

impl PickResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickResult::Win => "win",
            PickResult::Loss => "loss",
        }
    }
}

impl std::str::FromStr for PickResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(PickResult::Win),
            "loss" => Ok(PickResult::Loss),
            _ => Err(anyhow::anyhow!("Unknown pick result: {s}")),
        }
    }
}

/// Which terminal branch closed a pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    TargetHit,
    StopLossHit,
    Expired,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TargetHit => "target_hit",
            CloseReason::StopLossHit => "stop_loss_hit",
            CloseReason::Expired => "expired",
        }
    }
}

impl std::str::FromStr for CloseReason {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "target_hit" => Ok(CloseReason::TargetHit),
            "stop_loss_hit" => Ok(CloseReason::StopLossHit),
            "expired" => Ok(CloseReason::Expired),
            _ => Err(anyhow::anyhow!("Unknown close reason: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Pick
// ---------------------------------------------------------------------------

/// A single AI provider's prediction on one instrument.
///
/// Entry, target, stop-loss and direction are fixed at creation. Only the
/// resolver's output fields (current price onwards) ever change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pick {
    pub id: String,
    pub provider_id: String,
    pub competition_id: String,
    pub week: u32,

    pub symbol: String,
    pub asset_class: AssetClass,
    pub direction: Direction,
    /// Provider self-reported confidence (0–100)
    pub confidence: u8,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    pub current_price: Option<Decimal>,
    pub price_change: Decimal,
    pub price_change_pct: f64,
    pub status: PickStatus,
    pub result: Option<PickResult>,
    pub close_reason: Option<CloseReason>,
    pub points_earned: Decimal,
    pub profit_loss: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
}

impl fmt::Display for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} entry={} target={} stop={} conf={}% ({})",
            self.provider_id,
            self.id,
            self.direction,
            self.symbol,
            self.entry_price,
            self.target_price,
            self.stop_loss,
            self.confidence,
            self.status,
        )
    }
}

impl Pick {
    /// A freshly created pick in `active` state with no resolver output.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider_id: &str,
        competition_id: &str,
        week: u32,
        symbol: &str,
        asset_class: AssetClass,
        direction: Direction,
        confidence: u8,
        entry_price: Decimal,
        target_price: Decimal,
        stop_loss: Decimal,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider_id: provider_id.to_string(),
            competition_id: competition_id.to_string(),
            week,
            symbol: symbol.to_uppercase(),
            asset_class,
            direction,
            confidence: confidence.min(100),
            entry_price,
            target_price,
            stop_loss,
            created_at: Utc::now(),
            expires_at,
            current_price: None,
            price_change: Decimal::ZERO,
            price_change_pct: 0.0,
            status: PickStatus::Active,
            result: None,
            close_reason: None,
            points_earned: Decimal::ZERO,
            profit_loss: Decimal::ZERO,
            closed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == PickStatus::Active
    }

    /// Whether `now` is strictly past the expiry date.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Reject picks whose immutable fields cannot be scored.
    pub fn validate(&self) -> Result<(), PickboardError> {
        if self.entry_price <= Decimal::ZERO {
            return Err(PickboardError::InvalidPick {
                pick_id: self.id.clone(),
                reason: format!("entry price must be positive, got {}", self.entry_price),
            });
        }
        if self.confidence > 100 {
            return Err(PickboardError::InvalidPick {
                pick_id: self.id.clone(),
                reason: format!("confidence out of range: {}", self.confidence),
            });
        }
        Ok(())
    }

    /// Apply resolver output. Refuses to touch a pick that is already terminal.
    pub fn apply(&mut self, update: &PickUpdate) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.current_price = Some(update.current_price);
        self.price_change = update.price_change;
        self.price_change_pct = update.price_change_pct;
        self.status = update.status;
        self.result = update.result;
        self.close_reason = update.close_reason;
        self.points_earned = update.points_earned;
        self.profit_loss = update.profit_loss;
        self.closed_at = update.closed_at;
        true
    }
}

/// The resolver's output for one pick: every field it is allowed to mutate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickUpdate {
    pub current_price: Decimal,
    pub price_change: Decimal,
    pub price_change_pct: f64,
    pub status: PickStatus,
    pub result: Option<PickResult>,
    pub close_reason: Option<CloseReason>,
    pub points_earned: Decimal,
    pub profit_loss: Decimal,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PickUpdate {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Lifetime statistics for one AI provider, derived from its terminal picks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatistics {
    pub provider_id: String,
    pub total_picks: u32,
    pub wins: u32,
    pub losses: u32,
    /// wins / (wins + losses), 0.0 when nothing resolved
    pub win_rate: f64,
    pub total_points: Decimal,
    pub profit_loss: Decimal,
    pub avg_return_pct: f64,
    /// Positive = current win run, negative = current loss run
    pub current_streak: i32,
    pub best_win_streak: u32,
    pub worst_loss_streak: u32,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Display for ProviderStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | picks={} (W{}/L{}) | win_rate={:.1}% | pts={} | pnl={} | streak={:+}",
            self.provider_id,
            self.total_picks,
            self.wins,
            self.losses,
            self.win_rate * 100.0,
            self.total_points,
            self.profit_loss,
            self.current_streak,
        )
    }
}

/// Upsert key for a weekly performance row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WeekKey {
    pub competition_id: String,
    pub provider_id: String,
    pub week: u32,
}

impl fmt::Display for WeekKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/w{}", self.competition_id, self.provider_id, self.week)
    }
}

/// One provider's results within one competition week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPerformance {
    pub competition_id: String,
    pub provider_id: String,
    pub week: u32,
    pub picks_made: u32,
    pub picks_won: u32,
    pub picks_lost: u32,
    pub picks_active: u32,
    pub win_rate: f64,
    pub total_points: Decimal,
    pub profit_loss: Decimal,
    /// 1-based; 0 until ranked
    pub rank: u32,
}

impl WeeklyPerformance {
    pub fn key(&self) -> WeekKey {
        WeekKey {
            competition_id: self.competition_id.clone(),
            provider_id: self.provider_id.clone(),
            week: self.week,
        }
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// The (competition, week) a resolution run is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunScope {
    pub competition_id: String,
    pub week: u32,
}

impl RunScope {
    pub fn new(competition_id: impl Into<String>, week: u32) -> Self {
        Self {
            competition_id: competition_id.into(),
            week,
        }
    }

    /// Lease name guarding against overlapping runs. A run touches every
    /// active pick in the competition, whatever its week, so the lease is
    /// per competition.
    pub fn lease_key(&self) -> String {
        format!("resolve:{}", self.competition_id)
    }
}

impl fmt::Display for RunScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} week {}", self.competition_id, self.week)
    }
}

/// Structured result of one resolution run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scope: RunScope,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Active picks examined this run
    pub picks_processed: usize,
    /// Picks that moved to a terminal status
    pub picks_closed: usize,
    /// Picks whose update was persisted (closed or refreshed)
    pub picks_updated: usize,
    pub errors: Vec<String>,
    pub providers_touched: Vec<String>,
    pub weeks_ranked: Vec<u32>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Run {} ({}): processed={} closed={} updated={} errors={} providers={}",
            self.run_id,
            self.scope,
            self.picks_processed,
            self.picks_closed,
            self.picks_updated,
            self.errors.len(),
            self.providers_touched.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PICKBOARD.
#[derive(Debug, thiserror::Error)]
pub enum PickboardError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized trigger: {0}")]
    Unauthorized(String),

    #[error("Resolution already running for {0}")]
    RunInProgress(String),

    #[error("Price unavailable for {symbol}: {reason}")]
    PriceUnavailable { symbol: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid pick {pick_id}: {reason}")]
    InvalidPick { pick_id: String, reason: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
