//! Publish-only event bus.
//!
//! The engine and reconciler push [`TradingEvent`]s into a broadcast
//! channel; the WebSocket layer subscribes and forwards them as JSON.
//! Publishing never blocks and never fails: with no subscribers events are
//! simply dropped, and a slow subscriber only lags itself.

mod messages;

pub use messages::{
    BotStatusPayload, Discrepancy, DiscrepancyKind, PositionPayload, ReconciliationAlert,
    TradePayload, TradingEvent,
};

use autotrader_core::{Bot, Position, Trade};
use chrono::Utc;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle onto the process-wide event channel.
///
/// Events published from a single task arrive in publication order;
/// ordering across tasks is not guaranteed.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TradingEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribes to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradingEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: TradingEvent) {
        // An Err here just means nobody is listening right now.
        let _ = self.tx.send(event);
    }

    pub fn emit_trade_executed(&self, trade: &Trade) {
        self.publish(TradingEvent::TradeExecuted(TradePayload::from(trade)));
    }

    pub fn emit_position_updated(&self, position: &Position) {
        self.publish(TradingEvent::PositionUpdated(PositionPayload::from(
            position,
        )));
    }

    pub fn emit_bot_status_changed(&self, bot: &Bot) {
        self.publish(TradingEvent::BotStatusChanged(BotStatusPayload {
            id: bot.id.clone(),
            status: bot.status,
            is_active: bot.is_active,
            error_count: Some(bot.error_count),
        }));
    }

    pub fn emit_market_status_changed(&self, is_open: bool) {
        self.publish(TradingEvent::MarketStatusChanged { is_open });
    }

    pub fn emit_reconciliation_alert(&self, user_id: &str, discrepancies: Vec<Discrepancy>) {
        self.publish(TradingEvent::ReconciliationAlert(ReconciliationAlert {
            user_id: user_id.to_string(),
            discrepancies,
            timestamp: Utc::now(),
        }));
    }

    pub fn emit_price_update(&self, symbol: &str, price: f64) {
        self.publish(TradingEvent::PriceUpdate {
            symbol: symbol.to_string(),
            price,
            timestamp: Utc::now(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
