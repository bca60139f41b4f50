use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::util::round4;

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest bid/ask quote for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
    pub bid_size: u64,
    pub ask_size: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Quote {
    /// Midpoint of bid/ask, falling back to whichever side is quoted.
    ///
    /// Returns 0.0 when neither side has a price, which callers treat as
    /// "no usable price this tick".
    #[must_use]
    pub fn mid(&self) -> f64 {
        if self.bid > 0.0 && self.ask > 0.0 {
            round4((self.bid + self.ask) / 2.0)
        } else if self.ask > 0.0 {
            self.ask
        } else {
            self.bid
        }
    }
}
