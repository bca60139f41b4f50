//! Wire shapes for the event bus, kept stable for external UIs.

use autotrader_core::{BotStatus, Position, Trade, TradeSide, TradeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything the service broadcasts, tagged by event name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TradingEvent {
    TradeExecuted(TradePayload),
    PositionUpdated(PositionPayload),
    BotStatusChanged(BotStatusPayload),
    MarketStatusChanged { is_open: bool },
    ReconciliationAlert(ReconciliationAlert),
    PriceUpdate {
        symbol: String,
        price: f64,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradePayload {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub side: TradeSide,
    pub quantity: i64,
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit_loss: Option<f64>,
    pub status: TradeStatus,
    pub order_id: Option<String>,
}

impl From<&Trade> for TradePayload {
    fn from(trade: &Trade) -> Self {
        Self {
            id: trade.id.clone(),
            bot_id: trade.bot_id.clone(),
            symbol: trade.symbol.clone(),
            side: trade.side,
            quantity: trade.quantity,
            price: trade.price,
            timestamp: trade.timestamp,
            profit_loss: trade.profit_loss,
            status: trade.status,
            order_id: trade.order_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionPayload {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub current_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub is_open: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_indicator: Option<String>,
}

impl From<&Position> for PositionPayload {
    fn from(position: &Position) -> Self {
        Self {
            id: position.id.clone(),
            bot_id: position.bot_id.clone(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            entry_price: position.entry_price,
            current_price: position.current_price,
            stop_loss_price: position.stop_loss_price,
            take_profit_price: position.take_profit_price,
            unrealized_pnl: position.unrealized_pnl,
            realized_pnl: position.realized_pnl,
            opened_at: position.opened_at,
            closed_at: position.closed_at,
            is_open: position.is_open,
            entry_indicator: position.entry_indicator.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatusPayload {
    pub id: String,
    pub status: BotStatus,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
}

/// A single broker-vs-ledger disagreement found by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    #[serde(rename = "type")]
    pub kind: DiscrepancyKind,
    pub symbol: String,
    pub broker_qty: i64,
    pub local_qty: i64,
    pub diff: i64,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    /// The broker holds shares the ledger does not know about. Reported,
    /// never auto-sold.
    ExcessInBroker,
    /// The ledger holds positions the broker no longer has. Oldest open
    /// positions are auto-closed until the excess is absorbed.
    ExcessInLocal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationAlert {
    pub user_id: String,
    pub discrepancies: Vec<Discrepancy>,
    pub timestamp: DateTime<Utc>,
}
