//! Core domain types shared by every autotrader crate.
//!
//! Owns the persistent entities (bots, trades, positions, activity entries,
//! broker credentials), the tagged indicator/risk configuration parsed out of
//! the bots table, the market-data primitives handed around the pipeline, and
//! the trading `Signal` enum.

pub mod config;
pub mod market;
pub mod signal;
pub mod types;
pub mod util;

pub use config::{IndicatorSpec, RiskConfig};
pub use market::{Bar, Quote};
pub use signal::Signal;
pub use types::{
    ActivityEntry, ActivityLevel, Bot, BotStatus, BrokerCredentials, Position, Trade, TradeSide,
    TradeStatus, User,
};
pub use util::{generate_id, round2};
