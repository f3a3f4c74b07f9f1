//! Pick resolution state machine.
//!
//! Given one open pick and its current price, decides whether the pick
//! stays `active` or closes, and scores it. Conditions are checked in a
//! fixed priority order and the first match wins:
//!
//! 1. target hit      → `won`
//! 2. stop-loss hit   → `lost`
//! 3. expiry reached  → `expired` (win if the move was in the called direction)
//! 4. otherwise       → stays `active`, price fields refreshed
//!
//! Profit/loss and price change are computed the same way for every branch;
//! only the points depend on which branch fired.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use tracing::{debug, info};

use crate::config::ScoringConfig;
use crate::types::{CloseReason, Direction, Pick, PickResult, PickStatus, PickUpdate};

/// Which branch of the state machine matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    TargetHit,
    StopLossHit,
    ExpiredCorrect,
    ExpiredWrong,
    Open,
}

impl Outcome {
    fn status(&self) -> PickStatus {
        match self {
            Outcome::TargetHit => PickStatus::Won,
            Outcome::StopLossHit => PickStatus::Lost,
            Outcome::ExpiredCorrect | Outcome::ExpiredWrong => PickStatus::Expired,
            Outcome::Open => PickStatus::Active,
        }
    }

    fn result(&self) -> Option<PickResult> {
        match self {
            Outcome::TargetHit | Outcome::ExpiredCorrect => Some(PickResult::Win),
            Outcome::StopLossHit | Outcome::ExpiredWrong => Some(PickResult::Loss),
            Outcome::Open => None,
        }
    }

    fn close_reason(&self) -> Option<CloseReason> {
        match self {
            Outcome::TargetHit => Some(CloseReason::TargetHit),
            Outcome::StopLossHit => Some(CloseReason::StopLossHit),
            Outcome::ExpiredCorrect | Outcome::ExpiredWrong => Some(CloseReason::Expired),
            Outcome::Open => None,
        }
    }
}

pub struct PickResolver {
    scoring: ScoringConfig,
}

impl PickResolver {
    pub fn new(scoring: ScoringConfig) -> Self {
        Self { scoring }
    }

    /// Evaluate one pick against its current price.
    ///
    /// Returns `None` for a pick that is already terminal: resolution of a
    /// closed pick is a no-op.
    pub fn evaluate(
        &self,
        pick: &Pick,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Option<PickUpdate> {
        if pick.status.is_terminal() {
            debug!(pick_id = %pick.id, status = %pick.status, "Pick already closed, skipping");
            return None;
        }

        let price_change = current_price - pick.entry_price;
        let price_change_pct = Self::change_pct(pick.entry_price, current_price);
        let outcome = self.classify(pick, current_price, price_change_pct, now);
        let points_earned = self.points_for(outcome, pick.confidence);
        let profit_loss = Self::profit_loss(pick.direction, pick.entry_price, current_price);

        let closed_at = match outcome {
            Outcome::Open => None,
            _ => Some(now),
        };

        if outcome != Outcome::Open {
            info!(
                pick_id = %pick.id,
                provider = %pick.provider_id,
                symbol = %pick.symbol,
                direction = %pick.direction,
                entry = %pick.entry_price,
                current = %current_price,
                outcome = ?outcome,
                points = %points_earned,
                "Pick closed"
            );
        }

        Some(PickUpdate {
            current_price,
            price_change,
            price_change_pct,
            status: outcome.status(),
            result: outcome.result(),
            close_reason: outcome.close_reason(),
            points_earned,
            profit_loss,
            closed_at,
        })
    }

    /// First matching branch, in priority order.
    pub fn classify(
        &self,
        pick: &Pick,
        current: Decimal,
        change_pct: f64,
        now: DateTime<Utc>,
    ) -> Outcome {
        let (target_hit, stop_hit) = match pick.direction {
            Direction::Up => (current >= pick.target_price, current <= pick.stop_loss),
            Direction::Down => (current <= pick.target_price, current >= pick.stop_loss),
            // HOLD has no directional target; it only settles at expiry
            Direction::Hold => (false, false),
        };

        if target_hit {
            return Outcome::TargetHit;
        }
        if stop_hit {
            return Outcome::StopLossHit;
        }
        if !pick.is_expired_at(now) {
            return Outcome::Open;
        }

        let correct = match pick.direction {
            Direction::Up => current > pick.entry_price,
            Direction::Down => current < pick.entry_price,
            Direction::Hold => change_pct.abs() <= self.scoring.hold_tolerance_pct,
        };

        if correct {
            Outcome::ExpiredCorrect
        } else {
            Outcome::ExpiredWrong
        }
    }

    /// Points for a branch. Target hits earn a base plus a bonus scaled by
    /// confidence (0 at 0%, `confidence_bonus_max` at 100%).
    pub fn points_for(&self, outcome: Outcome, confidence: u8) -> Decimal {
        match outcome {
            Outcome::TargetHit => {
                let bonus = self.scoring.confidence_bonus_max
                    * Decimal::from(confidence.min(100))
                    / Decimal::ONE_HUNDRED;
                (self.scoring.target_base_points + bonus).round_dp(2)
            }
            Outcome::StopLossHit => self.scoring.stop_loss_points,
            Outcome::ExpiredCorrect => self.scoring.expiry_win_points,
            Outcome::ExpiredWrong => self.scoring.expiry_loss_points,
            Outcome::Open => Decimal::ZERO,
        }
    }

    /// Per-unit profit signed by direction. HOLD pays nothing and loses the
    /// size of any move.
    pub fn profit_loss(direction: Direction, entry: Decimal, current: Decimal) -> Decimal {
        match direction {
            Direction::Up => current - entry,
            Direction::Down => entry - current,
            Direction::Hold => -(current - entry).abs(),
        }
    }

    /// Percent move from entry, 0.0 for a non-positive entry.
    pub fn change_pct(entry: Decimal, current: Decimal) -> f64 {
        if entry <= Decimal::ZERO {
            return 0.0;
        }
        ((current - entry) / entry * Decimal::ONE_HUNDRED)
            .round_dp(4)
            .to_f64()
            .unwrap_or(0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
