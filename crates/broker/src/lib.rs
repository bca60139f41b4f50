//! Async brokerage adapter.
//!
//! [`BrokerApi`] is the narrow trait the engine trades through; the concrete
//! [`AlpacaClient`] wraps the brokerage's REST API over reqwest with a
//! process-wide rate limiter. Per-user clients live in a [`BrokerRegistry`]
//! keyed by user id, with an optional default client resolved from
//! environment variables.

mod alpaca;
mod api;
mod error;
mod registry;
mod types;

pub use alpaca::AlpacaClient;
pub use api::BrokerApi;
pub use error::BrokerError;
pub use registry::BrokerRegistry;
pub use types::{Account, MarketClock, Order, OrderState, RemotePosition};
