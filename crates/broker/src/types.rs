use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account snapshot from the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub status: String,
    pub equity: f64,
    pub buying_power: f64,
    pub cash: f64,
    pub portfolio_value: f64,
    pub currency: String,
}

/// Market clock: whether the exchange is open and when that next changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    pub is_open: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
}

/// Order lifecycle as reported by the broker.
///
/// The broker's vocabulary is wider than the local trade status; transient
/// states collapse onto `is_transient`, and anything unrecognized is kept
/// verbatim in `Other` so it can be logged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    New,
    Accepted,
    PendingNew,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
    #[serde(untagged)]
    Other(String),
}

impl OrderState {
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "new" => Self::New,
            "accepted" => Self::Accepted,
            "pending_new" => Self::PendingNew,
            "partially_filled" => Self::PartiallyFilled,
            "filled" => Self::Filled,
            "canceled" | "cancelled" => Self::Canceled,
            "expired" => Self::Expired,
            "rejected" => Self::Rejected,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub const fn is_filled(&self) -> bool {
        matches!(self, Self::Filled)
    }

    /// Canceled / expired / rejected: the order will never fill.
    #[must_use]
    pub const fn is_terminal_non_fill(&self) -> bool {
        matches!(self, Self::Canceled | Self::Expired | Self::Rejected)
    }

    /// Still working at the broker.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::New | Self::Accepted | Self::PendingNew | Self::PartiallyFilled
        )
    }
}

/// An order as reported by the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: String,
    pub qty: i64,
    pub filled_qty: i64,
    pub filled_avg_price: Option<f64>,
    pub status: OrderState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub filled_at: Option<DateTime<Utc>>,
}

/// A position as held at the broker, the authoritative side of
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePosition {
    pub symbol: String,
    pub qty: i64,
    pub avg_entry_price: f64,
    pub current_price: f64,
}
