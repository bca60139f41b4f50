mod common;

use std::sync::Arc;

use autotrader_broker::{BrokerRegistry, OrderState};
use autotrader_core::{BotStatus, TradeSide, TradeStatus};
use autotrader_engine::{Reconciler, TradingEngine};
use autotrader_events::{DiscrepancyKind, EventBus, TradingEvent};
use autotrader_store::Store;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use common::{
    bot_fixture, drifting_down_bars, open_position_fixture, runner_for, store_with_user,
    FillMode, MockBroker, TerminalKind,
};

fn rsi_buy_config() -> serde_json::Value {
    // RSI of the drifting-down fixture sits near 40; an oversold threshold
    // of 99 turns that into a standing BUY.
    json!({"RSI": {"period": 14, "oversold": 99.0, "overbought": 99.5}})
}

async fn pending_state(store: &Store, bot_id: &str, symbol: &str) -> (usize, bool) {
    let trades = store.trades_for_bot(bot_id, 100).await.unwrap();
    let open = store.open_position_for(bot_id, symbol).await.unwrap();
    (trades.len(), open.is_some())
}

#[tokio::test]
async fn round_trip_buy_emits_trade_then_position() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    broker.state().bars.insert("AAPL".to_string(), drifting_down_bars(50));
    broker.state().quotes.insert("AAPL".to_string(), 100.0);

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    runner.process_symbol("AAPL").await.unwrap();

    let trades = store.trades_for_bot(&bot.id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Filled);
    assert_eq!(trades[0].price, Some(100.0));
    assert_eq!(trades[0].reason.as_deref(), Some("RSI buy signal"));

    let position = store
        .open_position_for(&bot.id, "AAPL")
        .await
        .unwrap()
        .expect("position should be open");
    assert_eq!(position.entry_price, 100.0);
    assert_eq!(position.entry_indicator.as_deref(), Some("RSI"));
    // stop_loss 2% / take_profit 5% off the fill price
    assert_eq!(position.stop_loss_price, Some(98.0));
    assert_eq!(position.take_profit_price, Some(105.0));

    // Events arrive in order: trade first, then position.
    match rx.recv().await.unwrap() {
        TradingEvent::TradeExecuted(trade) => {
            assert_eq!(trade.status, TradeStatus::Filled);
            assert_eq!(trade.price, Some(100.0));
        }
        other => panic!("expected trade_executed first, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        TradingEvent::PositionUpdated(position) => {
            assert!(position.is_open);
            assert_eq!(position.entry_price, 100.0);
        }
        other => panic!("expected position_updated second, got {other:?}"),
    }
}

#[tokio::test]
async fn pending_buy_is_never_duplicated() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    broker.state().bars.insert("AAPL".to_string(), drifting_down_bars(50));
    broker.state().quotes.insert("AAPL".to_string(), 100.0);

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    // First cycle: submits, records the pending trade + open position,
    // times out waiting for the fill.
    runner.process_symbol("AAPL").await.unwrap();
    assert_eq!(broker.submissions().len(), 1);
    assert_eq!(pending_state(&store, &bot.id, "AAPL").await, (1, true));

    // The next four cycles see the open position and never buy again.
    for _ in 0..4 {
        runner.process_symbol("AAPL").await.unwrap();
    }
    assert_eq!(broker.submissions().len(), 1);
    assert_eq!(pending_state(&store, &bot.id, "AAPL").await, (1, true));

    let trades = store.trades_for_bot(&bot.id, 10).await.unwrap();
    assert_eq!(trades[0].status, TradeStatus::New);
    assert!(trades[0].client_order_id.starts_with("bot-"));
}

#[tokio::test]
async fn only_the_entry_indicator_may_close_a_position() {
    let (store, user_id) = store_with_user().await;
    // RSI (~40 on this fixture) holds; SMA sells because price is below it.
    let hold_config = json!({
        "RSI": {"period": 14, "oversold": 10.0, "overbought": 90.0},
        "SMA": {"period": 20}
    });
    let bot = bot_fixture(&user_id, &["AAPL"], hold_config);
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    broker.state().bars.insert("AAPL".to_string(), drifting_down_bars(50));
    broker.state().quotes.insert("AAPL".to_string(), 97.8);

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    let position = open_position_fixture(
        &bot.id,
        "AAPL",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::minutes(30),
    );
    store.insert_position(&position).await.unwrap();

    // SMA says SELL, but the position was opened by RSI and RSI holds.
    runner.process_symbol("AAPL").await.unwrap();
    assert!(broker.submissions().is_empty());
    assert!(store.open_position_for(&bot.id, "AAPL").await.unwrap().is_some());

    // Same bars, but with thresholds that turn RSI into a SELL.
    let sell_config = json!({
        "RSI": {"period": 14, "oversold": 10.0, "overbought": 20.0},
        "SMA": {"period": 20}
    });
    let mut bot_sell = bot_fixture(&user_id, &["AAPL"], sell_config);
    bot_sell.id = bot.id.clone();
    let runner = runner_for(&bot_sell, &store, broker.clone(), &bus);

    runner.process_symbol("AAPL").await.unwrap();
    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].side, TradeSide::Sell);

    let trades = store.trades_for_bot(&bot.id, 10).await.unwrap();
    let sell = trades
        .iter()
        .find(|t| t.side == TradeSide::Sell)
        .expect("sell trade recorded");
    assert_eq!(sell.reason.as_deref(), Some("RSI sell signal"));
    assert!(store.open_position_for(&bot.id, "AAPL").await.unwrap().is_none());
}

#[tokio::test]
async fn stop_loss_triggers_a_sell_with_negative_pnl() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    broker.state().quotes.insert("AAPL".to_string(), 97.5);

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    let mut position = open_position_fixture(
        &bot.id,
        "AAPL",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::minutes(30),
    );
    position.stop_loss_price = Some(98.0);
    position.take_profit_price = Some(105.0);
    store.insert_position(&position).await.unwrap();

    runner.monitor_exits().await.unwrap();

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].side, TradeSide::Sell);

    let trades = store.trades_for_bot(&bot.id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert!(trades[0].reason.as_deref().unwrap().contains("Stop-loss"));
    assert_eq!(trades[0].profit_loss, Some(-25.0));

    let closed = store.get_position(&position.id).await.unwrap().unwrap();
    assert!(!closed.is_open);
    assert_eq!(closed.realized_pnl, -25.0);
    assert_eq!(closed.unrealized_pnl, 0.0);
}

#[tokio::test]
async fn flat_prices_update_the_mark_and_emit_price_updates() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    broker.state().quotes.insert("AAPL".to_string(), 101.5);

    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    let mut position = open_position_fixture(
        &bot.id,
        "AAPL",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::minutes(30),
    );
    position.stop_loss_price = Some(98.0);
    position.take_profit_price = Some(105.0);
    store.insert_position(&position).await.unwrap();

    runner.monitor_exits().await.unwrap();

    assert!(broker.submissions().is_empty());
    let refreshed = store.get_position(&position.id).await.unwrap().unwrap();
    assert_eq!(refreshed.current_price, 101.5);
    assert_eq!(refreshed.unrealized_pnl, 15.0);

    match rx.recv().await.unwrap() {
        TradingEvent::PriceUpdate { symbol, price, .. } => {
            assert_eq!(symbol, "AAPL");
            assert_eq!(price, 101.5);
        }
        other => panic!("expected price_update, got {other:?}"),
    }
}

#[tokio::test]
async fn risk_blocks_an_oversized_buy_before_submission() {
    let (store, user_id) = store_with_user().await;
    let mut bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    bot.capital = 1_000.0;
    bot.risk_management.max_position_size = 5.0;
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    broker.state().bars.insert("AAPL".to_string(), drifting_down_bars(50));
    broker.state().quotes.insert("AAPL".to_string(), 60.0);

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    runner.process_symbol("AAPL").await.unwrap();

    assert!(broker.submissions().is_empty());
    assert_eq!(store.trades_for_bot(&bot.id, 10).await.unwrap().len(), 0);

    let activity = store.recent_activity(10).await.unwrap();
    assert!(activity
        .iter()
        .any(|entry| entry.message.contains("single_share_exceeds_position_limit")));
}

#[tokio::test]
async fn terminal_non_fill_rolls_the_entry_back() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Terminal(TerminalKind::Rejected));
    broker.state().bars.insert("AAPL".to_string(), drifting_down_bars(50));
    broker.state().quotes.insert("AAPL".to_string(), 100.0);

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);

    runner.process_symbol("AAPL").await.unwrap();

    let trades = store.trades_for_bot(&bot.id, 10).await.unwrap();
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Rejected);
    assert!(store.open_position_for(&bot.id, "AAPL").await.unwrap().is_none());
}

#[tokio::test]
async fn reconciler_resolves_a_cancelled_pending_trade() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let position = open_position_fixture(
        &bot.id,
        "AAPL",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::minutes(10),
    );
    let mut trade = common_trade(&bot.id, "AAPL", 10);
    trade.timestamp = Utc::now() - ChronoDuration::minutes(10);
    trade.order_id = Some("o1".to_string());
    store.record_pending_entry(&trade, &position).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    broker.seed_order("o1", "AAPL", 10, OrderState::Canceled);

    let registry = Arc::new(BrokerRegistry::new(None));
    registry.register_user_client(&user_id, broker.clone()).await;
    let bus = EventBus::new();
    let reconciler = Reconciler::new(store.clone(), registry, bus);

    let summary = reconciler.run_once().await.unwrap();
    assert_eq!(summary.pending_resolved, 1);

    let trade = store.get_trade(&trade.id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Canceled);
    let position = store.get_position(&position.id).await.unwrap().unwrap();
    assert!(!position.is_open);
    assert!(position.closed_at.is_some());
}

#[tokio::test]
async fn reconciler_cancels_orders_stuck_pending_too_long() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let position = open_position_fixture(
        &bot.id,
        "AAPL",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::minutes(10),
    );
    let mut trade = common_trade(&bot.id, "AAPL", 10);
    trade.timestamp = Utc::now() - ChronoDuration::minutes(10);
    trade.order_id = Some("o2".to_string());
    store.record_pending_entry(&trade, &position).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    broker.seed_order("o2", "AAPL", 10, OrderState::New);

    let registry = Arc::new(BrokerRegistry::new(None));
    registry.register_user_client(&user_id, broker.clone()).await;
    let bus = EventBus::new();
    let reconciler = Reconciler::new(store.clone(), registry, bus);

    let summary = reconciler.run_once().await.unwrap();
    assert_eq!(summary.pending_resolved, 1);
    assert_eq!(broker.state().cancelled, vec!["o2".to_string()]);

    let trade = store.get_trade(&trade.id).await.unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Canceled);
    assert!(store.open_position_for(&bot.id, "AAPL").await.unwrap().is_none());
}

#[tokio::test]
async fn drift_repair_closes_oldest_locals_and_reports_broker_excess() {
    let (store, user_id) = store_with_user().await;
    let bot_a = bot_fixture(&user_id, &["SYM"], rsi_buy_config());
    let bot_b = bot_fixture(&user_id, &["SYM"], rsi_buy_config());
    store.insert_bot(&bot_a).await.unwrap();
    store.insert_bot(&bot_b).await.unwrap();

    let older = open_position_fixture(
        &bot_a.id,
        "SYM",
        10,
        100.0,
        Some("RSI"),
        ChronoDuration::hours(2),
    );
    let newer = open_position_fixture(
        &bot_b.id,
        "SYM",
        5,
        100.0,
        Some("RSI"),
        ChronoDuration::hours(1),
    );
    store.insert_position(&older).await.unwrap();
    store.insert_position(&newer).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    broker.state().positions.push(autotrader_broker::RemotePosition {
        symbol: "SYM".to_string(),
        qty: 8,
        avg_entry_price: 100.0,
        current_price: 101.0,
    });

    let registry = Arc::new(BrokerRegistry::new(None));
    registry.register_user_client(&user_id, broker.clone()).await;
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let reconciler = Reconciler::new(store.clone(), registry, bus);

    let summary = reconciler.run_once().await.unwrap();

    // The oldest position (10 shares) absorbs the 7-share local excess.
    let older = store.get_position(&older.id).await.unwrap().unwrap();
    assert!(!older.is_open);
    let newer = store.get_position(&newer.id).await.unwrap().unwrap();
    assert!(newer.is_open);
    // Surviving local is 5 vs broker 8: the 3-share remainder is reported,
    // never auto-sold.
    assert_eq!(broker.submissions().len(), 0);

    let kinds: Vec<DiscrepancyKind> = summary.discrepancies.iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiscrepancyKind::ExcessInLocal));
    assert!(kinds.contains(&DiscrepancyKind::ExcessInBroker));
    let broker_excess = summary
        .discrepancies
        .iter()
        .find(|d| d.kind == DiscrepancyKind::ExcessInBroker)
        .unwrap();
    assert_eq!(broker_excess.diff, 3);

    // The surviving position got its mark refreshed from the snapshot.
    assert_eq!(newer.current_price, 101.0);
    assert_eq!(newer.unrealized_pnl, 5.0);

    match rx.recv().await.unwrap() {
        TradingEvent::ReconciliationAlert(alert) => {
            assert_eq!(alert.user_id, user_id);
            assert_eq!(alert.discrepancies.len(), 2);
        }
        other => panic!("expected reconciliation_alert, got {other:?}"),
    }
}

#[tokio::test]
async fn error_cap_parks_the_bot_in_error_state() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    let bus = EventBus::new();
    let mut rx = bus.subscribe();
    let mut runner = runner_for(&bot, &store, broker, &bus);

    let err = anyhow::anyhow!("boom");
    for _ in 0..4 {
        assert!(!runner.record_cycle_error(&err).await);
    }
    assert!(runner.record_cycle_error(&err).await);

    let bot = store.get_bot(&bot.id).await.unwrap().unwrap();
    assert_eq!(bot.status, BotStatus::Error);
    assert!(!bot.is_active);
    assert_eq!(bot.error_count, 5);

    let status_event = loop {
        match rx.recv().await.unwrap() {
            TradingEvent::BotStatusChanged(payload) => break payload,
            _ => continue,
        }
    };
    assert_eq!(status_event.status, BotStatus::Error);
    assert!(!status_event.is_active);
}

#[tokio::test]
async fn client_order_ids_are_unique_and_bot_prefixed() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL", "MSFT"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Immediate);
    for symbol in ["AAPL", "MSFT"] {
        broker.state().bars.insert(symbol.to_string(), drifting_down_bars(50));
        broker.state().quotes.insert(symbol.to_string(), 100.0);
    }

    let bus = EventBus::new();
    let runner = runner_for(&bot, &store, broker.clone(), &bus);
    runner.process_symbol("AAPL").await.unwrap();
    runner.process_symbol("MSFT").await.unwrap();

    let submissions = broker.submissions();
    assert_eq!(submissions.len(), 2);
    let prefix = format!("bot-{}-", &bot.id[..8]);
    assert!(submissions[0].client_order_id.starts_with(&prefix));
    assert!(submissions[1].client_order_id.starts_with(&prefix));
    assert_ne!(
        submissions[0].client_order_id,
        submissions[1].client_order_id
    );
}

#[tokio::test]
async fn engine_restores_running_bots_and_supervises_their_lifecycle() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    let broker = MockBroker::new(FillMode::Never);
    let registry = Arc::new(BrokerRegistry::new(None));
    registry.register_user_client(&user_id, broker).await;

    let engine = TradingEngine::new(store.clone(), registry, EventBus::new());
    engine.start().await.unwrap();
    assert!(engine.is_bot_registered(&bot.id).await);

    // Registration is idempotent.
    engine.register_bot(&bot.id).await.unwrap();
    assert!(engine.pause_bot(&bot.id).await);
    assert!(engine.resume_bot(&bot.id).await);

    engine.unregister_bot(&bot.id).await;
    assert!(!engine.is_bot_registered(&bot.id).await);
    assert!(!engine.pause_bot(&bot.id).await);

    engine.stop().await;
}

#[tokio::test]
async fn registration_without_credentials_is_skipped_with_a_warning() {
    let (store, user_id) = store_with_user().await;
    let bot = bot_fixture(&user_id, &["AAPL"], rsi_buy_config());
    store.insert_bot(&bot).await.unwrap();

    // No default client, no per-user client.
    let registry = Arc::new(BrokerRegistry::new(None));
    let engine = TradingEngine::new(store.clone(), registry, EventBus::new());

    engine.register_bot(&bot.id).await.unwrap();
    assert!(!engine.is_bot_registered(&bot.id).await);

    // The bot's persisted status is untouched.
    let bot = store.get_bot(&bot.id).await.unwrap().unwrap();
    assert_eq!(bot.status, BotStatus::Running);
}

fn common_trade(bot_id: &str, symbol: &str, qty: i64) -> autotrader_core::Trade {
    autotrader_core::Trade {
        id: autotrader_core::generate_id(),
        bot_id: bot_id.to_string(),
        symbol: symbol.to_string(),
        side: TradeSide::Buy,
        quantity: qty,
        price: Some(100.0),
        timestamp: Utc::now(),
        order_id: None,
        client_order_id: format!("bot-{}-{}", &bot_id[..8], autotrader_core::generate_id()),
        status: TradeStatus::New,
        indicators_snapshot: None,
        profit_loss: None,
        reason: None,
    }
}
