//! Pre-trade risk checks and sizing helpers.
//!
//! Everything here is a pure function of the proposed signal, the bot's
//! configuration and a little account state; the engine supplies today's
//! realized P&L and the open-position count. Checks run in a fixed order and
//! the first failure wins, so blocked trades always report a single reason.

use autotrader_core::{round2, RiskConfig, Signal};

/// Outcome of the pre-trade checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskVerdict {
    Allowed,
    Blocked(String),
}

impl RiskVerdict {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Blocked(reason) => Some(reason),
        }
    }
}

/// Runs all risk checks for a proposed trade, first failure wins.
///
/// SELL is always allowed; a bot must always be able to close what it
/// holds. HOLD is refused outright. BUY runs the capital, position-size,
/// daily-loss and concurrency checks in that order.
#[must_use]
pub fn validate(
    signal: Signal,
    capital: f64,
    risk: &RiskConfig,
    current_price: f64,
    today_pnl: f64,
    open_position_count: u32,
) -> RiskVerdict {
    match signal {
        Signal::Sell => return RiskVerdict::Allowed,
        Signal::Hold => return RiskVerdict::Blocked("signal_is_hold".to_string()),
        Signal::Buy => {}
    }

    let checks = [
        check_capital_available(capital, current_price),
        check_position_size(capital, current_price, risk),
        check_daily_loss_limit(today_pnl, capital, risk),
        check_max_positions(open_position_count, risk),
    ];

    for check in checks {
        if let Some(reason) = check {
            tracing::info!(
                "Risk check blocked trade @ {:.2}: {}",
                current_price,
                reason
            );
            return RiskVerdict::Blocked(reason);
        }
    }

    RiskVerdict::Allowed
}

fn check_capital_available(capital: f64, current_price: f64) -> Option<String> {
    if capital <= 0.0 {
        return Some("no_capital".to_string());
    }
    if current_price <= 0.0 {
        return Some("invalid_price".to_string());
    }
    if current_price > capital {
        return Some(format!(
            "price_exceeds_capital ({current_price:.2} > {capital:.2})"
        ));
    }
    None
}

fn check_position_size(capital: f64, current_price: f64, risk: &RiskConfig) -> Option<String> {
    let max_allocation = capital * (risk.max_position_size / 100.0);
    if current_price > max_allocation {
        return Some(format!(
            "single_share_exceeds_position_limit \
             (price={current_price:.2} > max_alloc={max_allocation:.2} = {}% of {capital:.2})",
            risk.max_position_size
        ));
    }
    None
}

fn check_daily_loss_limit(today_pnl: f64, capital: f64, risk: &RiskConfig) -> Option<String> {
    if risk.max_daily_loss <= 0.0 || capital <= 0.0 {
        return None;
    }
    let max_loss = capital * (risk.max_daily_loss / 100.0);
    if today_pnl < -max_loss {
        return Some(format!(
            "daily_loss_limit_exceeded \
             (today_pnl={today_pnl:.2} < max_loss=-{max_loss:.2} = {}% of {capital:.2})",
            risk.max_daily_loss
        ));
    }
    None
}

fn check_max_positions(open_count: u32, risk: &RiskConfig) -> Option<String> {
    if risk.max_concurrent_positions == 0 {
        return None;
    }
    if open_count >= risk.max_concurrent_positions {
        return Some(format!(
            "max_concurrent_positions_reached (open={open_count}, max={})",
            risk.max_concurrent_positions
        ));
    }
    None
}

/// Whole shares purchasable within `max_position_size` percent of capital.
#[must_use]
pub fn position_size(capital: f64, current_price: f64, risk: &RiskConfig) -> i64 {
    if current_price <= 0.0 || capital <= 0.0 {
        return 0;
    }
    let allocation = capital * (risk.max_position_size / 100.0);
    let qty = (allocation / current_price).floor() as i64;
    qty.max(0)
}

/// Stop-loss price for an entry, `None` when not configured.
#[must_use]
pub fn stop_loss_price(entry_price: f64, risk: &RiskConfig) -> Option<f64> {
    if risk.stop_loss > 0.0 {
        Some(round2(entry_price * (1.0 - risk.stop_loss / 100.0)))
    } else {
        None
    }
}

/// Take-profit price for an entry, `None` when not configured.
#[must_use]
pub fn take_profit_price(entry_price: f64, risk: &RiskConfig) -> Option<f64> {
    if risk.take_profit > 0.0 {
        Some(round2(entry_price * (1.0 + risk.take_profit / 100.0)))
    } else {
        None
    }
}
