//! Full resolution passes: partial failure, re-runs, leases, persistence
//! errors, aggregates and the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use pickboard::storage::{MemoryStore, PickStore, SqliteStore};
use pickboard::types::*;

use crate::mock_market::{pick, up_equity, FlakyStore, Markets, COMPETITION};

fn scope(week: u32) -> RunScope {
    RunScope::new(COMPETITION, week)
}

#[tokio::test]
async fn test_partial_price_failure() {
    let markets = Markets::new();
    let symbols = [
        "AAPL", "MSFT", "NVDA", "AMZN", "GOOG", "META", "TSLA", "AMD", "NFLX", "ORCL",
    ];
    let picks: Vec<Pick> = symbols
        .iter()
        .enumerate()
        .map(|(i, s)| up_equity(if i % 2 == 0 { "claude" } else { "gpt" }, 1, s))
        .collect();

    // Four hit target, four drift, two fail to price
    for s in &symbols[..4] {
        markets.equity.set_price(s, dec!(111));
    }
    for s in &symbols[4..8] {
        markets.equity.set_price(s, dec!(102));
    }
    markets.equity.fail_symbol("NFLX");
    markets.equity.fail_symbol("ORCL");

    let store = Arc::new(MemoryStore::with_picks(picks.clone()).await);
    let summary = assert_ok!(markets.orchestrator(store.clone()).run(&scope(1)).await);

    assert_eq!(summary.picks_processed, 10);
    assert_eq!(summary.picks_updated, 8);
    assert_eq!(summary.picks_closed, 4);
    assert_eq!(summary.errors.len(), 2);
    assert!(summary.errors.iter().any(|e| e.contains("NFLX")));
    assert!(summary.errors.iter().any(|e| e.contains("ORCL")));

    let active = store.list_active_picks().await.unwrap();
    assert_eq!(active.len(), 6);
    for p in picks.iter().filter(|p| p.symbol == "NFLX" || p.symbol == "ORCL") {
        let stored = store.get_pick(&p.id).await.unwrap().unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.current_price, None);
    }
    assert_eq!(markets.equity.call_count(), 10);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let markets = Markets::new();
    markets.equity.set_price("AAPL", dec!(112));
    let winner = up_equity("claude", 1, "AAPL");
    let store = Arc::new(MemoryStore::with_picks(vec![winner.clone()]).await);
    let orch = markets.orchestrator(store.clone());

    let first = orch.run(&scope(1)).await.unwrap();
    assert_eq!(first.picks_closed, 1);
    let after_first = store.get_pick(&winner.id).await.unwrap().unwrap();
    let stats_first = store.get_provider_statistics("claude").await.unwrap().unwrap();

    let second = orch.run(&scope(1)).await.unwrap();
    assert_eq!(second.picks_processed, 0);
    assert_eq!(second.picks_closed, 0);
    assert_eq!(second.picks_updated, 0);

    let after_second = store.get_pick(&winner.id).await.unwrap().unwrap();
    assert_eq!(after_second.points_earned, after_first.points_earned);
    assert_eq!(after_second.closed_at, after_first.closed_at);

    let stats_second = store.get_provider_statistics("claude").await.unwrap().unwrap();
    assert_eq!(stats_second.total_picks, stats_first.total_picks);
    assert_eq!(stats_second.total_points, stats_first.total_points);
    assert_eq!(stats_second.current_streak, 1);
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let markets = Markets::new();
    markets.equity.set_price("NVDA", dec!(94));
    let loser = up_equity("gemini", 2, "NVDA");
    let store = Arc::new(MemoryStore::with_picks(vec![loser.clone()]).await);
    let orch = markets.orchestrator(store.clone());

    orch.run(&scope(2)).await.unwrap();
    let closed = store.get_pick(&loser.id).await.unwrap().unwrap();
    assert_eq!(closed.status, PickStatus::Lost);
    assert_eq!(closed.close_reason, Some(CloseReason::StopLossHit));

    // Price recovers past target; the pick stays lost
    markets.equity.set_price("NVDA", dec!(130));
    orch.run(&scope(2)).await.unwrap();
    let still = store.get_pick(&loser.id).await.unwrap().unwrap();
    assert_eq!(still.status, PickStatus::Lost);
    assert_eq!(still.points_earned, dec!(-5));
}

#[tokio::test]
async fn test_overlapping_run_rejected() {
    let markets = Markets::new();
    let store = Arc::new(MemoryStore::new());
    assert!(store
        .acquire_lease(&scope(4).lease_key(), "in-flight", Duration::from_secs(60))
        .await
        .unwrap());

    let orch = markets.orchestrator(store.clone());
    let err = assert_err!(orch.run(&scope(4)).await);
    assert!(matches!(
        err.downcast_ref::<PickboardError>(),
        Some(PickboardError::RunInProgress(_))
    ));
    // The rejected run did no pricing
    assert_eq!(markets.equity.call_count(), 0);

    // Every week of the competition is covered by the same lease
    let err = assert_err!(orch.run(&scope(5)).await);
    assert!(matches!(
        err.downcast_ref::<PickboardError>(),
        Some(PickboardError::RunInProgress(_))
    ));

    // Another competition is a different lease
    assert_ok!(orch.run(&RunScope::new("autumn-cup", 4)).await);
}

#[tokio::test]
async fn test_concurrent_weeks_do_not_double_process() {
    let markets = Markets::new();
    markets.equity.set_latency(Duration::from_millis(50));
    for s in ["AAPL", "MSFT", "NVDA"] {
        markets.equity.set_price(s, dec!(102));
    }
    let picks = vec![
        up_equity("claude", 1, "AAPL"),
        up_equity("gpt", 1, "MSFT"),
        up_equity("grok", 1, "NVDA"),
    ];
    let store = Arc::new(MemoryStore::with_picks(picks).await);
    let orch = markets.orchestrator(store.clone());

    let (scope1, scope2) = (scope(1), scope(2));
    let (week1, week2) = tokio::join!(orch.run(&scope1), orch.run(&scope2));

    // Exactly one of the two runs gets through
    let results = [week1, week2];
    let ok: Vec<&RunSummary> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(ok.len(), 1);
    assert_eq!(ok[0].picks_updated, 3);
    let rejected = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        rejected.downcast_ref::<PickboardError>(),
        Some(PickboardError::RunInProgress(_))
    ));
    assert_eq!(markets.equity.call_count(), 3);
}

#[tokio::test]
async fn test_shared_ticker_uses_own_class_price() {
    let markets = Markets::new();
    markets.equity.set_price("LINK", dec!(101));
    markets.crypto.set_price("LINK", dec!(15));

    let equity_link = up_equity("claude", 1, "LINK");
    let crypto_link = pick(
        "gpt",
        1,
        "LINK",
        AssetClass::Crypto,
        Direction::Up,
        dec!(14),
        dec!(18),
        dec!(12),
        5,
    );
    let store =
        Arc::new(MemoryStore::with_picks(vec![equity_link.clone(), crypto_link.clone()]).await);
    let summary = markets.orchestrator(store.clone()).run(&scope(1)).await.unwrap();
    assert!(summary.errors.is_empty());
    assert_eq!(summary.picks_closed, 0);

    let equity_now = store.get_pick(&equity_link.id).await.unwrap().unwrap();
    assert!(equity_now.is_active());
    assert_eq!(equity_now.current_price, Some(dec!(101)));
    let crypto_now = store.get_pick(&crypto_link.id).await.unwrap().unwrap();
    assert!(crypto_now.is_active());
    assert_eq!(crypto_now.current_price, Some(dec!(15)));
}

#[tokio::test]
async fn test_persistence_failure_recorded() {
    let markets = Markets::new();
    markets.equity.set_price("AAPL", dec!(115));
    markets.equity.set_price("MSFT", dec!(115));
    let ok = up_equity("claude", 1, "AAPL");
    let broken = up_equity("gpt", 1, "MSFT");

    let store = Arc::new(FlakyStore::new(
        MemoryStore::with_picks(vec![ok.clone(), broken.clone()]).await,
    ));
    store.break_pick(&broken.id);

    let summary = markets.orchestrator(store.clone()).run(&scope(1)).await.unwrap();
    assert_eq!(summary.picks_updated, 1);
    assert_eq!(summary.picks_closed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("Storage error"));
    assert!(summary.errors[0].contains(&broken.id));

    assert!(store.get_pick(&broken.id).await.unwrap().unwrap().is_active());
    assert_eq!(
        store.get_pick(&ok.id).await.unwrap().unwrap().status,
        PickStatus::Won
    );
}

#[tokio::test]
async fn test_crypto_outage_leaves_equities_resolving() {
    let markets = Markets::new();
    markets.equity.set_price("AAPL", dec!(111));
    markets.crypto.set_price("BTC", dec!(70000));
    markets.crypto.set_price("ETH", dec!(4000));
    markets.crypto.set_error("HTTP 503 Service Unavailable");

    let btc = pick(
        "grok",
        1,
        "BTC",
        AssetClass::Crypto,
        Direction::Up,
        dec!(60000),
        dec!(66000),
        dec!(57000),
        5,
    );
    let eth = pick(
        "grok",
        1,
        "ETH",
        AssetClass::Crypto,
        Direction::Down,
        dec!(3800),
        dec!(3500),
        dec!(4100),
        5,
    );
    let aapl = up_equity("claude", 1, "AAPL");
    let store = Arc::new(MemoryStore::with_picks(vec![btc.clone(), eth.clone(), aapl]).await);
    let orch = markets.orchestrator(store.clone());

    let summary = orch.run(&scope(1)).await.unwrap();
    assert_eq!(summary.picks_closed, 1);
    assert_eq!(summary.errors.len(), 2);
    assert_eq!(markets.crypto.call_count(), 1);

    // Outage over: the crypto picks resolve on the next pass
    markets.crypto.clear_error();
    let summary = orch.run(&scope(1)).await.unwrap();
    assert!(summary.errors.is_empty());
    assert_eq!(summary.picks_closed, 1);
    let btc_now = store.get_pick(&btc.id).await.unwrap().unwrap();
    assert_eq!(btc_now.status, PickStatus::Won);
    let eth_now = store.get_pick(&eth.id).await.unwrap().unwrap();
    assert!(eth_now.is_active());
    assert_eq!(eth_now.current_price, Some(dec!(4000)));
}

#[tokio::test]
async fn test_expiry_branches() {
    let markets = Markets::new();
    markets.equity.set_price("AAPL", dec!(104));
    markets.equity.set_price("KO", dec!(60.5));

    let expired_up = pick(
        "claude",
        3,
        "AAPL",
        AssetClass::Equity,
        Direction::Up,
        dec!(100),
        dec!(110),
        dec!(95),
        -1,
    );
    let expired_hold = pick(
        "gpt",
        3,
        "KO",
        AssetClass::Equity,
        Direction::Hold,
        dec!(60),
        dec!(60),
        dec!(60),
        -1,
    );
    let store =
        Arc::new(MemoryStore::with_picks(vec![expired_up.clone(), expired_hold.clone()]).await);
    markets.orchestrator(store.clone()).run(&scope(3)).await.unwrap();

    let up = store.get_pick(&expired_up.id).await.unwrap().unwrap();
    assert_eq!(up.status, PickStatus::Expired);
    assert_eq!(up.result, Some(PickResult::Win));
    assert_eq!(up.close_reason, Some(CloseReason::Expired));
    assert_eq!(up.points_earned, dec!(3));

    // 0.83% move is inside the hold band
    let hold = store.get_pick(&expired_hold.id).await.unwrap().unwrap();
    assert_eq!(hold.result, Some(PickResult::Win));
    assert_eq!(hold.close_reason, Some(CloseReason::Expired));
}

#[tokio::test]
async fn test_weekly_leaderboard_ranked() {
    let markets = Markets::new();
    for s in ["AAPL", "MSFT", "NVDA"] {
        markets.equity.set_price(s, dec!(111));
    }
    markets.equity.set_price("TSLA", dec!(90));

    let picks = vec![
        up_equity("claude", 6, "AAPL"),
        up_equity("claude", 6, "MSFT"),
        up_equity("gpt", 6, "NVDA"),
        up_equity("grok", 6, "TSLA"),
        // Still open, but gemini has a pick this week so it gets a row
        up_equity("gemini", 6, "AMD"),
    ];
    let store = Arc::new(MemoryStore::with_picks(picks).await);
    let summary = markets.orchestrator(store.clone()).run(&scope(6)).await.unwrap();
    assert_eq!(summary.weeks_ranked, vec![6]);
    assert_eq!(summary.providers_touched, vec!["claude", "gemini", "gpt", "grok"]);

    let mut rows = store.list_weekly_performance(COMPETITION, 6).await.unwrap();
    rows.sort_by_key(|r| r.rank);
    let order: Vec<&str> = rows.iter().map(|r| r.provider_id.as_str()).collect();
    assert_eq!(order, vec!["claude", "gpt", "gemini", "grok"]);
    assert_eq!(rows[0].total_points, dec!(26));
    assert_eq!(rows[2].picks_active, 1);
    assert_eq!(rows[3].total_points, dec!(-5));

    let gemini = store.get_provider_statistics("gemini").await.unwrap().unwrap();
    assert_eq!(gemini.total_picks, 0);
    assert_eq!(gemini.win_rate, 0.0);
}

#[tokio::test]
async fn test_run_against_sqlite() {
    let markets = Markets::new();
    markets.equity.set_price("AAPL", dec!(111));
    markets.crypto.set_price("SOL", dec!(140));

    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let aapl = up_equity("claude", 1, "AAPL");
    let sol = pick(
        "gpt",
        1,
        "SOL",
        AssetClass::Crypto,
        Direction::Down,
        dec!(150),
        dec!(135),
        dec!(160),
        5,
    );
    store.insert_pick(&aapl).await.unwrap();
    store.insert_pick(&sol).await.unwrap();

    let orch = markets.orchestrator(store.clone());
    let summary = assert_ok!(orch.run(&scope(1)).await);
    assert_eq!(summary.picks_updated, 2);
    assert_eq!(summary.picks_closed, 1);

    let sol_now = store.get_pick(&sol.id).await.unwrap().unwrap();
    assert!(sol_now.is_active());
    assert_eq!(sol_now.profit_loss, dec!(10));

    let stats = store.get_provider_statistics("claude").await.unwrap().unwrap();
    assert_eq!(stats.wins, 1);
    assert_eq!(stats.total_points, dec!(13));

    let rows = store.list_weekly_performance(COMPETITION, 1).await.unwrap();
    assert_eq!(rows.len(), 2);
    let claude = rows.iter().find(|r| r.provider_id == "claude").unwrap();
    assert_eq!(claude.rank, 1);

    // Lease was released: another run goes straight through
    let again = assert_ok!(orch.run(&scope(1)).await);
    assert_eq!(again.picks_closed, 0);
}
