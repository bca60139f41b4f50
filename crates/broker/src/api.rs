use async_trait::async_trait;
use autotrader_core::{Bar, Quote, TradeSide};
use chrono::{DateTime, Utc};

use crate::error::BrokerError;
use crate::types::{Account, MarketClock, Order, RemotePosition};

/// The narrow brokerage surface the trading engine depends on.
///
/// Every method is safe for concurrent invocation; implementations carry
/// their own timeouts (≥ 5 s) and rate limiting.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    async fn get_account(&self) -> Result<Account, BrokerError>;

    async fn get_clock(&self) -> Result<MarketClock, BrokerError>;

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError>;

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Submits a market order. `client_order_id` is the caller-generated
    /// idempotency token used later to correlate local records with broker
    /// state.
    async fn submit_market_order(
        &self,
        symbol: &str,
        qty: i64,
        side: TradeSide,
        time_in_force: &str,
        client_order_id: &str,
    ) -> Result<Order, BrokerError>;

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError>;

    /// Closes the entire position for a symbol with one market order.
    async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError>;
}
