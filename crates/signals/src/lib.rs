//! Turns computed indicator values into BUY / SELL / HOLD signals.
//!
//! Each indicator is evaluated independently; combining the results is the
//! caller's business. The engine's entry path takes the first BUY in
//! configuration order, the exit path looks only at a position's entry
//! indicator, and [`majority_vote`] exists for legacy positions that predate
//! entry-indicator tracking.

use autotrader_core::Signal;
use autotrader_indicators::IndicatorValues;

/// Dead-band around zero for the MACD histogram, to avoid flapping on noise.
const MACD_DEADBAND: f64 = 0.01;

/// Price-vs-moving-average buffer (0.1%), to avoid whipsawing at crossovers.
const MA_BUFFER: f64 = 0.001;

const STOCH_OVERSOLD: f64 = 20.0;
const STOCH_OVERBOUGHT: f64 = 80.0;

/// Evaluates a single indicator's values into a signal.
#[must_use]
pub fn evaluate(values: &IndicatorValues) -> Signal {
    match *values {
        IndicatorValues::Rsi {
            value,
            oversold,
            overbought,
            ..
        } => {
            if value < oversold {
                Signal::Buy
            } else if value > overbought {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        IndicatorValues::Macd { histogram, .. } => {
            if histogram > MACD_DEADBAND {
                Signal::Buy
            } else if histogram < -MACD_DEADBAND {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        IndicatorValues::Sma { value, price, .. } | IndicatorValues::Ema { value, price, .. } => {
            let buffer = value * MA_BUFFER;
            if price > value + buffer {
                Signal::Buy
            } else if price < value - buffer {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        IndicatorValues::BollingerBands {
            upper,
            lower,
            price,
            ..
        } => {
            if price <= lower {
                Signal::Buy
            } else if price >= upper {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        IndicatorValues::Stochastic { k, d, .. } => {
            // Both %K and %D have to agree on the extreme zone.
            if k < STOCH_OVERSOLD && d < STOCH_OVERSOLD {
                Signal::Buy
            } else if k > STOCH_OVERBOUGHT && d > STOCH_OVERBOUGHT {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
        IndicatorValues::Obv { change, .. } => {
            if change > 0.0 {
                Signal::Buy
            } else if change < 0.0 {
                Signal::Sell
            } else {
                Signal::Hold
            }
        }
    }
}

/// Evaluates every computed indicator, keeping configuration order.
/// Indicators whose window was too short are omitted.
#[must_use]
pub fn evaluate_all(results: &[(String, Option<IndicatorValues>)]) -> Vec<(String, Signal)> {
    results
        .iter()
        .filter_map(|(name, values)| values.as_ref().map(|v| (name.clone(), evaluate(v))))
        .collect()
}

/// Majority vote over per-indicator signals, used only for exits on legacy
/// positions without an entry indicator.
///
/// A non-HOLD result needs a strict majority (> 50% of evaluated
/// indicators) and at least 2 agreeing votes.
#[must_use]
pub fn majority_vote(signals: &[Signal]) -> Signal {
    let total = signals.len();
    if total < 2 {
        return Signal::Hold;
    }

    let buy = signals.iter().filter(|s| **s == Signal::Buy).count();
    let sell = signals.iter().filter(|s| **s == Signal::Sell).count();
    let threshold = total as f64 / 2.0;

    if buy as f64 > threshold && buy >= 2 {
        Signal::Buy
    } else if sell as f64 > threshold && sell >= 2 {
        Signal::Sell
    } else {
        Signal::Hold
    }
}
