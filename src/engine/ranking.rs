//! Weekly leaderboard ranking.
//!
//! Rows for one (competition, week) are ordered by total points, highest
//! first. Ties are broken by win rate (higher first), then profit/loss
//! (higher first), then provider id (ascending) so identical inputs always
//! rank identically. Every row gets a distinct 1-based rank.

use std::cmp::Ordering;

use crate::types::WeeklyPerformance;

/// Leaderboard order between two rows of the same week.
pub fn leaderboard_order(a: &WeeklyPerformance, b: &WeeklyPerformance) -> Ordering {
    b.total_points
        .cmp(&a.total_points)
        .then_with(|| b.win_rate.total_cmp(&a.win_rate))
        .then_with(|| b.profit_loss.cmp(&a.profit_loss))
        .then_with(|| a.provider_id.cmp(&b.provider_id))
}

/// Sort rows into leaderboard order and assign ranks in place.
pub fn rank_week(rows: &mut [WeeklyPerformance]) {
    rows.sort_by(leaderboard_order);
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i as u32 + 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
