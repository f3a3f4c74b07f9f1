//! Aggregator: provider statistics and weekly performance.
//!
//! Both aggregates are derived views: they are rebuilt from the pick
//! history on every run and overwritten wholesale, never patched, so a
//! scoring fix or a backfill is picked up automatically.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::types::{
    Direction, Pick, PickResult, PickStatus, ProviderStatistics, WeeklyPerformance,
};

/// Win/loss run lengths from one chronological walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Streaks {
    /// Positive = win run in progress, negative = loss run in progress.
    pub current: i32,
    pub best_win: u32,
    pub worst_loss: u32,
}

/// wins / (wins + losses); 0.0 when nothing has resolved.
pub fn win_rate(wins: u32, losses: u32) -> f64 {
    let resolved = wins + losses;
    if resolved == 0 {
        0.0
    } else {
        wins as f64 / resolved as f64
    }
}

/// Walk outcomes oldest → newest keeping a running win-run and loss-run.
pub fn compute_streaks<I>(outcomes: I) -> Streaks
where
    I: IntoIterator<Item = PickResult>,
{
    let mut win_run: u32 = 0;
    let mut loss_run: u32 = 0;
    let mut streaks = Streaks::default();

    for outcome in outcomes {
        match outcome {
            PickResult::Win => {
                win_run += 1;
                loss_run = 0;
                streaks.best_win = streaks.best_win.max(win_run);
            }
            PickResult::Loss => {
                loss_run += 1;
                win_run = 0;
                streaks.worst_loss = streaks.worst_loss.max(loss_run);
            }
        }
    }

    streaks.current = if win_run > 0 {
        win_run as i32
    } else {
        -(loss_run as i32)
    };
    streaks
}

/// Chronological order for streaks: closed time, then created time, then id.
fn chronological(a: &&Pick, b: &&Pick) -> std::cmp::Ordering {
    a.closed_at
        .cmp(&b.closed_at)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct Aggregator;

impl Aggregator {
    /// Recompute a provider's lifetime statistics from its pick history.
    /// Non-terminal picks in the input are ignored.
    pub fn provider_statistics(
        provider_id: &str,
        picks: &[Pick],
        now: DateTime<Utc>,
    ) -> ProviderStatistics {
        let mut terminal: Vec<&Pick> = picks
            .iter()
            .filter(|p| p.provider_id == provider_id && p.status.is_terminal())
            .collect();
        terminal.sort_by(chronological);

        let wins = terminal
            .iter()
            .filter(|p| p.result == Some(PickResult::Win))
            .count() as u32;
        let losses = terminal
            .iter()
            .filter(|p| p.result == Some(PickResult::Loss))
            .count() as u32;

        let total_points: Decimal = terminal.iter().map(|p| p.points_earned).sum();
        let profit_loss: Decimal = terminal.iter().map(|p| p.profit_loss).sum();

        let avg_return_pct = if terminal.is_empty() {
            0.0
        } else {
            let signed_sum: f64 = terminal
                .iter()
                .map(|p| match p.direction {
                    Direction::Down => -p.price_change_pct,
                    Direction::Up => p.price_change_pct,
                    Direction::Hold => -p.price_change_pct.abs(),
                })
                .sum();
            signed_sum / terminal.len() as f64
        };

        let streaks = compute_streaks(terminal.iter().filter_map(|p| p.result));

        debug!(
            provider = provider_id,
            picks = terminal.len(),
            wins,
            losses,
            streak = streaks.current,
            "Provider statistics recomputed"
        );

        ProviderStatistics {
            provider_id: provider_id.to_string(),
            total_picks: terminal.len() as u32,
            wins,
            losses,
            win_rate: win_rate(wins, losses),
            total_points,
            profit_loss,
            avg_return_pct,
            current_streak: streaks.current,
            best_win_streak: streaks.best_win,
            worst_loss_streak: streaks.worst_loss,
            updated_at: now,
        }
    }

    /// Build one unranked row per provider from all picks of a
    /// (competition, week), active ones included. Rows come back sorted by
    /// provider id.
    pub fn weekly_performance(
        competition_id: &str,
        week: u32,
        picks: &[Pick],
    ) -> Vec<WeeklyPerformance> {
        let mut by_provider: BTreeMap<&str, WeeklyPerformance> = BTreeMap::new();

        for pick in picks
            .iter()
            .filter(|p| p.competition_id == competition_id && p.week == week)
        {
            let row = by_provider
                .entry(pick.provider_id.as_str())
                .or_insert_with(|| WeeklyPerformance {
                    competition_id: competition_id.to_string(),
                    provider_id: pick.provider_id.clone(),
                    week,
                    picks_made: 0,
                    picks_won: 0,
                    picks_lost: 0,
                    picks_active: 0,
                    win_rate: 0.0,
                    total_points: Decimal::ZERO,
                    profit_loss: Decimal::ZERO,
                    rank: 0,
                });

            row.picks_made += 1;
            if pick.status == PickStatus::Active {
                row.picks_active += 1;
                continue;
            }
            match pick.result {
                Some(PickResult::Win) => row.picks_won += 1,
                Some(PickResult::Loss) => row.picks_lost += 1,
                None => {}
            }
            row.total_points += pick.points_earned;
            row.profit_loss += pick.profit_loss;
        }

        by_provider
            .into_values()
            .map(|mut row| {
                row.win_rate = win_rate(row.picks_won, row.picks_lost);
                row
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
