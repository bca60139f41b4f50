//! Order execution for one bot runner.
//!
//! The BUY sequence is the anti-duplication contract: submit, then
//! *immediately* record a pending trade plus a preliminary open position in
//! one transaction, and only then wait on the fill. Once that transaction
//! commits, the bot's next cycle sees an open position for the symbol and
//! cannot buy it again. SELLs are the opposite: the ledger is only touched
//! after the broker resolves the order, so a failed sell leaves the
//! position open.

use anyhow::Result;
use autotrader_broker::{Order, OrderState};
use autotrader_core::{
    generate_id, round2, ActivityLevel, Position, Trade, TradeSide, TradeStatus,
};
use chrono::Utc;
use serde_json::Value;
use std::time::Duration;

use crate::runner::BotRunner;

const FILL_POLL_ATTEMPTS: u32 = 30;
const FILL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Resolution of the post-submission fill wait.
enum PollOutcome {
    Filled(Order),
    TerminalNonFill(OrderState),
    TimedOut,
}

/// Client order id: `bot-<bot prefix>-<random>`. Globally unique per
/// submission and recognizably bot-originated; the reconciler keys on it.
pub(crate) fn client_order_id(bot_id: &str) -> String {
    let prefix: String = bot_id.chars().take(8).collect();
    format!("bot-{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Maps a terminal broker order state onto the local trade status.
pub(crate) fn terminal_trade_status(state: &OrderState) -> TradeStatus {
    match state {
        OrderState::Expired => TradeStatus::Expired,
        OrderState::Rejected => TradeStatus::Rejected,
        _ => TradeStatus::Canceled,
    }
}

impl BotRunner {
    /// Submits a BUY and records it pending-first.
    ///
    /// # Errors
    /// Propagates store failures; broker submission errors are absorbed
    /// (nothing was recorded, the next cycle simply retries).
    pub async fn execute_buy(
        &self,
        symbol: &str,
        qty: i64,
        observed_price: f64,
        entry_indicator: &str,
        snapshot: Option<Value>,
    ) -> Result<()> {
        let client_order_id = client_order_id(&self.spec.id);
        let order = match self
            .broker
            .submit_market_order(symbol, qty, TradeSide::Buy, "day", &client_order_id)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.note_broker_error("submit buy order", symbol, &e).await;
                return Ok(());
            }
        };

        let now = Utc::now();
        let trade = Trade {
            id: generate_id(),
            bot_id: self.spec.id.clone(),
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            quantity: qty,
            price: Some(observed_price),
            timestamp: now,
            order_id: Some(order.id.clone()),
            client_order_id,
            status: TradeStatus::New,
            indicators_snapshot: snapshot,
            profit_loss: None,
            reason: Some(format!("{entry_indicator} buy signal")),
        };
        let position = Position {
            id: generate_id(),
            bot_id: self.spec.id.clone(),
            symbol: symbol.to_string(),
            quantity: qty,
            entry_price: observed_price,
            current_price: observed_price,
            stop_loss_price: autotrader_risk::stop_loss_price(observed_price, &self.spec.risk),
            take_profit_price: autotrader_risk::take_profit_price(observed_price, &self.spec.risk),
            unrealized_pnl: 0.0,
            realized_pnl: 0.0,
            opened_at: now,
            closed_at: None,
            is_open: true,
            entry_indicator: Some(entry_indicator.to_string()),
        };
        // Pending-first: this commit is what blocks duplicate buys.
        self.store.record_pending_entry(&trade, &position).await?;

        match self.poll_order(&order.id).await {
            PollOutcome::Filled(order) => {
                let Some(fill_price) = order.filled_avg_price else {
                    // Keep the records (they block re-buys) but flag for a
                    // human: we cannot trust the preliminary price.
                    self.store
                        .record_activity(
                            ActivityLevel::Error,
                            "trade",
                            &format!(
                                "BUY {symbol} filled without a fill price (order {}), needs \
                                 manual review",
                                order.id
                            ),
                            None,
                            Some(&self.spec.id),
                            Some(&self.spec.user_id),
                        )
                        .await?;
                    return Ok(());
                };
                let fill_qty = if order.filled_qty > 0 { order.filled_qty } else { qty };
                let stop_loss = autotrader_risk::stop_loss_price(fill_price, &self.spec.risk);
                let take_profit = autotrader_risk::take_profit_price(fill_price, &self.spec.risk);
                self.store
                    .finalize_buy_fill(
                        &trade.id,
                        &position.id,
                        fill_price,
                        fill_qty,
                        stop_loss,
                        take_profit,
                    )
                    .await?;

                let trade = Trade {
                    status: TradeStatus::Filled,
                    price: Some(fill_price),
                    quantity: fill_qty,
                    ..trade
                };
                let position = Position {
                    entry_price: fill_price,
                    current_price: fill_price,
                    quantity: fill_qty,
                    stop_loss_price: stop_loss,
                    take_profit_price: take_profit,
                    ..position
                };
                self.bus.emit_trade_executed(&trade);
                self.bus.emit_position_updated(&position);

                tracing::info!(
                    "BUY executed: {} x{} @ {:.2} (bot='{}')",
                    symbol,
                    fill_qty,
                    fill_price,
                    self.spec.name
                );
                self.store
                    .record_activity(
                        ActivityLevel::Info,
                        "trade",
                        &format!("BUY executed: {symbol} x{fill_qty} @ ${fill_price:.2}"),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
            PollOutcome::TerminalNonFill(state) => {
                let status = terminal_trade_status(&state);
                self.store.abort_entry(&trade.id, &position.id, status).await?;
                tracing::warn!(
                    "BUY {} not filled ({:?}), preliminary position closed",
                    symbol,
                    state
                );
                self.store
                    .record_activity(
                        ActivityLevel::Warning,
                        "trade",
                        &format!("BUY {symbol} ended {}: position rolled back", status.as_str()),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
            PollOutcome::TimedOut => {
                // Leave the pending records; the reconciler finishes the
                // work on its next pass.
                tracing::warn!(
                    "BUY {} still pending after {}s, deferring to reconciliation",
                    symbol,
                    FILL_POLL_ATTEMPTS
                );
                self.store
                    .record_activity(
                        ActivityLevel::Warning,
                        "trade",
                        &format!("BUY {symbol} pending past the fill wait, left for reconciliation"),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Submits a SELL for a whole open position. The ledger is mutated only
    /// once the broker resolves the order.
    ///
    /// # Errors
    /// Propagates store failures; broker submission errors are absorbed.
    pub async fn execute_sell(
        &self,
        position: &Position,
        observed_price: f64,
        reason: &str,
        snapshot: Option<Value>,
    ) -> Result<()> {
        let client_order_id = client_order_id(&self.spec.id);
        let order = match self
            .broker
            .submit_market_order(
                &position.symbol,
                position.quantity,
                TradeSide::Sell,
                "day",
                &client_order_id,
            )
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.note_broker_error("submit sell order", &position.symbol, &e)
                    .await;
                return Ok(());
            }
        };

        let base_trade = Trade {
            id: generate_id(),
            bot_id: self.spec.id.clone(),
            symbol: position.symbol.clone(),
            side: TradeSide::Sell,
            quantity: position.quantity,
            price: None,
            timestamp: Utc::now(),
            order_id: Some(order.id.clone()),
            client_order_id,
            status: TradeStatus::New,
            indicators_snapshot: snapshot,
            profit_loss: None,
            reason: Some(reason.to_string()),
        };

        match self.poll_order(&order.id).await {
            PollOutcome::Filled(order) => {
                // Missing fill price on a sell: settle best-effort at the
                // last observed price.
                let fill_price = order.filled_avg_price.unwrap_or(observed_price);
                let realized =
                    round2((fill_price - position.entry_price) * position.quantity as f64);
                let trade = Trade {
                    price: Some(fill_price),
                    status: TradeStatus::Filled,
                    profit_loss: Some(realized),
                    ..base_trade
                };
                self.store
                    .record_sell_close(&trade, &position.id, fill_price, realized)
                    .await?;

                let closed = Position {
                    current_price: fill_price,
                    realized_pnl: realized,
                    unrealized_pnl: 0.0,
                    closed_at: Some(trade.timestamp),
                    is_open: false,
                    ..position.clone()
                };
                self.bus.emit_trade_executed(&trade);
                self.bus.emit_position_updated(&closed);

                tracing::info!(
                    "SELL executed: {} x{} @ {:.2} P&L={:.2} ({}, bot='{}')",
                    position.symbol,
                    position.quantity,
                    fill_price,
                    realized,
                    reason,
                    self.spec.name
                );
                self.store
                    .record_activity(
                        ActivityLevel::Info,
                        "trade",
                        &format!(
                            "SELL executed: {} x{} @ ${:.2} P&L=${:.2} ({})",
                            position.symbol, position.quantity, fill_price, realized, reason
                        ),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
            PollOutcome::TerminalNonFill(state) => {
                // The position stays open; record the failed attempt.
                let trade = Trade {
                    status: terminal_trade_status(&state),
                    ..base_trade
                };
                self.store.insert_trade(&trade).await?;
                tracing::warn!(
                    "SELL {} not filled ({:?}), position left open",
                    position.symbol,
                    state
                );
                self.store
                    .record_activity(
                        ActivityLevel::Warning,
                        "trade",
                        &format!(
                            "SELL {} ended {}: position left open",
                            position.symbol,
                            trade.status.as_str()
                        ),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
            PollOutcome::TimedOut => {
                // Record the pending sell so the reconciler can settle it.
                self.store.insert_trade(&base_trade).await?;
                tracing::warn!(
                    "SELL {} still pending after the fill wait, deferring to reconciliation",
                    position.symbol
                );
                self.store
                    .record_activity(
                        ActivityLevel::Warning,
                        "trade",
                        &format!(
                            "SELL {} pending past the fill wait, left for reconciliation",
                            position.symbol
                        ),
                        None,
                        Some(&self.spec.id),
                        Some(&self.spec.user_id),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Polls the broker for the order's resolution, one second apart, up to
    /// 30 attempts. Transient lookup failures just consume an attempt.
    async fn poll_order(&self, order_id: &str) -> PollOutcome {
        for attempt in 1..=FILL_POLL_ATTEMPTS {
            tokio::time::sleep(FILL_POLL_INTERVAL).await;
            match self.broker.get_order(order_id).await {
                Ok(order) if order.status.is_filled() => return PollOutcome::Filled(order),
                Ok(order) if order.status.is_terminal_non_fill() => {
                    return PollOutcome::TerminalNonFill(order.status)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        "Order status poll {}/{} failed for {}: {}",
                        attempt,
                        FILL_POLL_ATTEMPTS,
                        order_id,
                        e
                    );
                }
            }
        }
        PollOutcome::TimedOut
    }
}
