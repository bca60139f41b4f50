//! Alpaca REST client.
//!
//! Thin async wrapper over the trading and market-data APIs. All calls go
//! through a shared rate limiter and a client-level timeout; responses are
//! parsed from JSON by hand because the API mixes numbers and numeric
//! strings in the same fields.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autotrader_core::{Bar, Quote, TradeSide};
use chrono::{DateTime, Utc};
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use reqwest::RequestBuilder;
use serde_json::{json, Value};

use crate::api::BrokerApi;
use crate::error::BrokerError;
use crate::types::{Account, MarketClock, Order, OrderState, RemotePosition};

const LIVE_BASE_URL: &str = "https://api.alpaca.markets";
pub const PAPER_BASE_URL: &str = "https://paper-api.alpaca.markets";
const DATA_BASE_URL: &str = "https://data.alpaca.markets";

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// Free-tier data feed; "sip" needs a paid subscription.
const DATA_FEED: &str = "iex";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct AlpacaClient {
    http: reqwest::Client,
    trading_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
    is_paper: bool,
    rate_limiter: Arc<RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>>,
}

impl AlpacaClient {
    /// Creates a client for the given credentials and trading base URL.
    ///
    /// Refuses a live-trading base URL unless `AUTOTRADER_ENVIRONMENT` is
    /// explicitly set to `production`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built or the live-URL
    /// safety check fails.
    ///
    /// # Panics
    /// Panics if the rate limiter quota cannot be created.
    pub fn new(api_key: &str, secret_key: &str, base_url: &str) -> anyhow::Result<Self> {
        let is_paper = !base_url.starts_with(LIVE_BASE_URL);
        if !is_paper {
            let environment =
                std::env::var("AUTOTRADER_ENVIRONMENT").unwrap_or_else(|_| "development".into());
            anyhow::ensure!(
                environment == "production",
                "base URL points at LIVE trading but AUTOTRADER_ENVIRONMENT is '{environment}'"
            );
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        // Alpaca allows 200 requests per minute per account.
        let quota = Quota::per_minute(NonZeroU32::new(200).unwrap());

        tracing::info!("Alpaca client initialized (paper={})", is_paper);

        Ok(Self {
            http,
            trading_url: base_url.trim_end_matches('/').to_string(),
            data_url: DATA_BASE_URL.to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
            is_paper,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Whether this client points at the paper-trading environment.
    #[must_use]
    pub const fn is_paper(&self) -> bool {
        self.is_paper
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, BrokerError> {
        self.rate_limiter.until_ready().await;
        let response = request
            .header(KEY_HEADER, &self.api_key)
            .header(SECRET_HEADER, &self.secret_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BrokerError::Http {
                status: status.as_u16(),
                body,
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        Ok(response.json().await?)
    }

    async fn get_trading(&self, path: &str) -> Result<Value, BrokerError> {
        let url = format!("{}{}", self.trading_url, path);
        self.send(self.http.get(&url)).await
    }

    async fn get_market_data(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, BrokerError> {
        let url = format!("{}{}", self.data_url, path);
        self.send(self.http.get(&url).query(query)).await
    }
}

#[async_trait]
impl BrokerApi for AlpacaClient {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        let body = self.get_trading("/v2/account").await?;
        Ok(Account {
            id: str_field(&body, "id")?,
            status: str_field(&body, "status")?,
            equity: f64_field(&body, "equity")?,
            buying_power: f64_field(&body, "buying_power")?,
            cash: f64_field(&body, "cash")?,
            portfolio_value: f64_field(&body, "portfolio_value")?,
            currency: body
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("USD")
                .to_string(),
        })
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        let body = self.get_trading("/v2/clock").await?;
        let is_open = body
            .get("is_open")
            .and_then(Value::as_bool)
            .ok_or_else(|| BrokerError::Decode("clock missing is_open".to_string()))?;
        Ok(MarketClock {
            is_open,
            timestamp: opt_datetime_field(&body, "timestamp"),
            next_open: opt_datetime_field(&body, "next_open"),
            next_close: opt_datetime_field(&body, "next_close"),
        })
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let path = format!("/v2/stocks/{symbol}/quotes/latest");
        let body = self
            .get_market_data(&path, &[("feed", DATA_FEED.to_string())])
            .await?;
        let quote = body
            .get("quote")
            .ok_or_else(|| BrokerError::Decode("latest quote missing 'quote'".to_string()))?;
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: opt_f64_field(quote, "bp").unwrap_or(0.0),
            ask: opt_f64_field(quote, "ap").unwrap_or(0.0),
            bid_size: quote.get("bs").and_then(Value::as_u64).unwrap_or(0),
            ask_size: quote.get("as").and_then(Value::as_u64).unwrap_or(0),
            timestamp: opt_datetime_field(quote, "t"),
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
        start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BrokerError> {
        let path = format!("/v2/stocks/{symbol}/bars");
        let start = start.unwrap_or_else(|| Utc::now() - default_lookback(timeframe));
        let query = [
            ("timeframe", timeframe.to_string()),
            ("limit", limit.to_string()),
            ("start", start.to_rfc3339()),
            ("feed", DATA_FEED.to_string()),
        ];
        let body = self.get_market_data(&path, &query).await?;

        let raw_bars = match body.get("bars") {
            Some(Value::Array(bars)) => bars.as_slice(),
            // No data for the window comes back as null.
            Some(Value::Null) | None => &[],
            Some(other) => {
                return Err(BrokerError::Decode(format!(
                    "unexpected bars payload: {other}"
                )))
            }
        };

        raw_bars.iter().map(bar_from_json).collect()
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        qty: i64,
        side: TradeSide,
        time_in_force: &str,
        client_order_id: &str,
    ) -> Result<Order, BrokerError> {
        let payload = json!({
            "symbol": symbol,
            "qty": qty.to_string(),
            "side": side.as_str(),
            "type": "market",
            "time_in_force": time_in_force,
            "client_order_id": client_order_id,
        });
        let url = format!("{}/v2/orders", self.trading_url);
        let body = self.send(self.http.post(&url).json(&payload)).await?;
        let order = order_from_json(&body)?;
        tracing::info!(
            "Submitted market order: {} {} x{} -> order_id={}",
            side.as_str(),
            symbol,
            qty,
            order.id
        );
        Ok(order)
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        let body = self.get_trading(&format!("/v2/orders/{order_id}")).await?;
        order_from_json(&body)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{order_id}", self.trading_url);
        self.send(self.http.delete(&url)).await?;
        tracing::info!("Cancelled order {}", order_id);
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
        let body = self.get_trading("/v2/positions").await?;
        let positions = body
            .as_array()
            .ok_or_else(|| BrokerError::Decode("positions payload is not an array".to_string()))?;
        positions.iter().map(position_from_json).collect()
    }

    async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError> {
        let url = format!("{}/v2/positions/{symbol}", self.trading_url);
        let body = self.send(self.http.delete(&url)).await?;
        let order = order_from_json(&body)?;
        tracing::info!("Closed position for {} -> order_id={}", symbol, order.id);
        Ok(order)
    }
}

fn default_lookback(timeframe: &str) -> chrono::Duration {
    match timeframe {
        "1Min" | "5Min" | "15Min" => chrono::Duration::days(3),
        "1Hour" => chrono::Duration::days(30),
        _ => chrono::Duration::days(365),
    }
}

// --- JSON field helpers -------------------------------------------------
//
// The API serializes monetary fields as strings ("qty": "10") but bar data
// as numbers, so every numeric accessor takes both.

fn str_field(value: &Value, key: &str) -> Result<String, BrokerError> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| BrokerError::Decode(format!("missing string field '{key}'")))
}

fn opt_f64_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn f64_field(value: &Value, key: &str) -> Result<f64, BrokerError> {
    opt_f64_field(value, key)
        .ok_or_else(|| BrokerError::Decode(format!("missing numeric field '{key}'")))
}

fn i64_field(value: &Value, key: &str) -> Result<i64, BrokerError> {
    f64_field(value, key).map(|v| v.round() as i64)
}

fn opt_datetime_field(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn order_from_json(value: &Value) -> Result<Order, BrokerError> {
    Ok(Order {
        id: str_field(value, "id")?,
        client_order_id: value
            .get("client_order_id")
            .and_then(Value::as_str)
            .map(ToString::to_string),
        symbol: str_field(value, "symbol")?,
        side: str_field(value, "side")?,
        qty: i64_field(value, "qty")?,
        filled_qty: opt_f64_field(value, "filled_qty").map_or(0, |v| v.round() as i64),
        filled_avg_price: opt_f64_field(value, "filled_avg_price"),
        status: OrderState::parse(
            value
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ),
        submitted_at: opt_datetime_field(value, "submitted_at"),
        filled_at: opt_datetime_field(value, "filled_at"),
    })
}

fn position_from_json(value: &Value) -> Result<RemotePosition, BrokerError> {
    Ok(RemotePosition {
        symbol: str_field(value, "symbol")?,
        qty: i64_field(value, "qty")?,
        avg_entry_price: f64_field(value, "avg_entry_price")?,
        current_price: f64_field(value, "current_price")?,
    })
}

fn bar_from_json(value: &Value) -> Result<Bar, BrokerError> {
    let timestamp = opt_datetime_field(value, "t")
        .ok_or_else(|| BrokerError::Decode("bar missing timestamp".to_string()))?;
    Ok(Bar {
        timestamp,
        open: f64_field(value, "o")?,
        high: f64_field(value, "h")?,
        low: f64_field(value, "l")?,
        close: f64_field(value, "c")?,
        volume: f64_field(value, "v")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_parses_string_numerics() {
        let body = json!({
            "id": "904837e3-3b76-47ec-b432-046db621571b",
            "client_order_id": "bot-abc12345-9f2e",
            "symbol": "AAPL",
            "side": "buy",
            "qty": "10",
            "filled_qty": "10",
            "filled_avg_price": "185.42",
            "status": "filled",
            "submitted_at": "2024-03-01T14:30:01.500Z",
            "filled_at": "2024-03-01T14:30:02Z"
        });
        let order = order_from_json(&body).unwrap();
        assert_eq!(order.qty, 10);
        assert_eq!(order.filled_qty, 10);
        assert_eq!(order.filled_avg_price, Some(185.42));
        assert!(order.status.is_filled());
        assert!(order.submitted_at.is_some());
    }

    #[test]
    fn order_tolerates_null_fill_fields() {
        let body = json!({
            "id": "o1",
            "symbol": "AAPL",
            "side": "buy",
            "qty": "5",
            "filled_qty": null,
            "filled_avg_price": null,
            "status": "new"
        });
        let order = order_from_json(&body).unwrap();
        assert_eq!(order.filled_qty, 0);
        assert_eq!(order.filled_avg_price, None);
        assert!(order.status.is_transient());
    }

    #[test]
    fn position_parses_broker_payload() {
        let body = json!({
            "symbol": "MSFT",
            "qty": "8",
            "avg_entry_price": "410.22",
            "current_price": "415.10"
        });
        let position = position_from_json(&body).unwrap();
        assert_eq!(position.qty, 8);
        assert_eq!(position.current_price, 415.10);
    }

    #[test]
    fn bar_parses_numeric_payload() {
        let body = json!({
            "t": "2024-03-01T14:30:00Z",
            "o": 184.5, "h": 185.1, "l": 184.2, "c": 185.0, "v": 120000
        });
        let bar = bar_from_json(&body).unwrap();
        assert_eq!(bar.close, 185.0);
        assert_eq!(bar.volume, 120_000.0);
    }

    #[test]
    fn paper_detection_from_base_url() {
        let client = AlpacaClient::new("key", "secret", PAPER_BASE_URL).unwrap();
        assert!(client.is_paper());
    }
}
