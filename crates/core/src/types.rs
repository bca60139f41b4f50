use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RiskConfig;

/// Account owning bots and broker credentials. Identity is opaque to the
/// trading engine; authentication happens at the request surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Per-user brokerage API credentials. Drives one broker adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCredentials {
    pub user_id: String,
    pub api_key: String,
    pub secret_key: String,
    pub base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    Stopped,
    Running,
    Paused,
    Error,
}

impl BotStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stopped" => Some(Self::Stopped),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// A user-configured trading strategy bound to one owner.
///
/// `indicators` is kept as the raw JSON map from the store; it is parsed
/// into [`crate::config::IndicatorSpec`] variants when a runner is built so
/// unknown indicator names degrade to a warning instead of failing the bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub capital: f64,
    /// Seconds between trading cycles.
    pub trading_frequency: u64,
    pub symbols: Vec<String>,
    pub indicators: serde_json::Map<String, serde_json::Value>,
    pub risk_management: RiskConfig,
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    pub status: BotStatus,
    pub is_active: bool,
    pub error_count: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Lifecycle of an order submission as tracked locally.
///
/// `New` and `PartiallyFilled` are pending states the reconciler resolves;
/// the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl TradeStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Rejected => "rejected",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "partially_filled" => Some(Self::PartiallyFilled),
            "filled" => Some(Self::Filled),
            "canceled" | "cancelled" => Some(Self::Canceled),
            "expired" => Some(Self::Expired),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Pending orders still awaiting resolution against the broker.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

/// Immutable record of an order submission and its outcome.
///
/// `client_order_id` is globally unique and encodes the originating bot; it
/// is the idempotency key used when correlating local records with broker
/// state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub quantity: i64,
    /// Fill price when known, otherwise the last observed price at submission.
    pub price: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub order_id: Option<String>,
    pub client_order_id: String,
    pub status: TradeStatus,
    pub indicators_snapshot: Option<serde_json::Value>,
    pub profit_loss: Option<f64>,
    pub reason: Option<String>,
}

/// An open or closed holding for one (bot, symbol) pair.
///
/// `entry_indicator` names the indicator whose BUY signal opened the
/// position; only that indicator's SELL closes it. Legacy rows without one
/// fall back to majority voting on exit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub bot_id: String,
    pub symbol: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub is_open: bool,
    pub entry_indicator: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl ActivityLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Structured activity record persisted for dashboards and audits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: ActivityLevel,
    pub category: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub bot_id: Option<String>,
    pub user_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_status_round_trips_through_strings() {
        for status in [
            TradeStatus::New,
            TradeStatus::PartiallyFilled,
            TradeStatus::Filled,
            TradeStatus::Canceled,
            TradeStatus::Expired,
            TradeStatus::Rejected,
        ] {
            assert_eq!(TradeStatus::parse(status.as_str()), Some(status));
        }
        // The broker spells it both ways.
        assert_eq!(TradeStatus::parse("cancelled"), Some(TradeStatus::Canceled));
        assert_eq!(TradeStatus::parse("accepted"), None);
    }

    #[test]
    fn pending_statuses() {
        assert!(TradeStatus::New.is_pending());
        assert!(TradeStatus::PartiallyFilled.is_pending());
        assert!(!TradeStatus::Filled.is_pending());
        assert!(!TradeStatus::Canceled.is_pending());
    }

    #[test]
    fn bot_status_parse_rejects_unknown() {
        assert_eq!(BotStatus::parse("running"), Some(BotStatus::Running));
        assert_eq!(BotStatus::parse("sleeping"), None);
    }
}
