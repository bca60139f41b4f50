//! Technical indicator calculations over OHLCV bars.
//!
//! Every calculator is a pure function from a bar window plus an
//! [`IndicatorSpec`] to an optional [`IndicatorValues`]; `None` means the
//! window is too short for that indicator, which downstream maps to HOLD.
//! Results carry their parameters so a snapshot can be persisted verbatim on
//! the trade that acted on it.

use autotrader_core::{Bar, IndicatorSpec};
use serde::Serialize;
use serde_json::Value;

mod math;

use math::{ema_series, mean, sample_std};

/// Minimum number of bars required before any indicator is attempted.
pub const MIN_BARS: usize = 5;

/// Computed values for one indicator, ready for signal evaluation and for
/// JSON snapshotting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum IndicatorValues {
    Rsi {
        value: f64,
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    Macd {
        macd: f64,
        signal: f64,
        histogram: f64,
        fast: usize,
        slow: usize,
        signal_period: usize,
    },
    Sma {
        value: f64,
        period: usize,
        price: f64,
    },
    Ema {
        value: f64,
        period: usize,
        price: f64,
    },
    BollingerBands {
        upper: f64,
        middle: f64,
        lower: f64,
        price: f64,
        bandwidth: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
        k_period: usize,
        d_period: usize,
    },
    Obv {
        value: f64,
        change: f64,
    },
}

/// Runs one indicator over a bar window.
#[must_use]
pub fn calculate(spec: &IndicatorSpec, bars: &[Bar]) -> Option<IndicatorValues> {
    if bars.len() < MIN_BARS {
        return None;
    }
    match *spec {
        IndicatorSpec::Rsi {
            period,
            oversold,
            overbought,
        } => calc_rsi(bars, period, oversold, overbought),
        IndicatorSpec::Macd { fast, slow, signal } => calc_macd(bars, fast, slow, signal),
        IndicatorSpec::Sma { period } => calc_sma(bars, period),
        IndicatorSpec::Ema { period } => calc_ema(bars, period),
        IndicatorSpec::BollingerBands { period, std_dev } => calc_bbands(bars, period, std_dev),
        IndicatorSpec::Stochastic { k_period, d_period } => {
            calc_stochastic(bars, k_period, d_period)
        }
        IndicatorSpec::Obv => calc_obv(bars),
    }
}

/// Runs every configured indicator, preserving configuration order.
#[must_use]
pub fn calculate_all(
    specs: &[IndicatorSpec],
    bars: &[Bar],
) -> Vec<(String, Option<IndicatorValues>)> {
    specs
        .iter()
        .map(|spec| (spec.name().to_string(), calculate(spec, bars)))
        .collect()
}

/// Builds the JSON snapshot stored on trades: indicator name mapped to its
/// values, or null where the window was too short.
#[must_use]
pub fn snapshot_json(results: &[(String, Option<IndicatorValues>)]) -> Value {
    let mut map = serde_json::Map::with_capacity(results.len());
    for (name, values) in results {
        let value = match values {
            Some(v) => serde_json::to_value(v).unwrap_or(Value::Null),
            None => Value::Null,
        };
        map.insert(name.clone(), value);
    }
    Value::Object(map)
}

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Wilder's RSI: the first average is a simple mean over `period` deltas,
/// subsequent averages are smoothed with alpha = 1/period.
fn calc_rsi(bars: &[Bar], period: usize, oversold: f64, overbought: f64) -> Option<IndicatorValues> {
    let closes = closes(bars);
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gains: Vec<f64> = deltas.iter().map(|d| d.max(0.0)).collect();
    let losses: Vec<f64> = deltas.iter().map(|d| (-d).max(0.0)).collect();

    let mut avg_gain = mean(&gains[..period]);
    let mut avg_loss = mean(&losses[..period]);
    let p = period as f64;
    for i in period..deltas.len() {
        avg_gain = (avg_gain * (p - 1.0) + gains[i]) / p;
        avg_loss = (avg_loss * (p - 1.0) + losses[i]) / p;
    }

    if avg_loss == 0.0 {
        return None;
    }
    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - 100.0 / (1.0 + rs);

    Some(IndicatorValues::Rsi {
        value: round2(rsi),
        period,
        oversold,
        overbought,
    })
}

fn calc_macd(bars: &[Bar], fast: usize, slow: usize, signal_period: usize) -> Option<IndicatorValues> {
    let closes = closes(bars);
    if closes.len() < slow + signal_period {
        return None;
    }

    let ema_fast = ema_series(&closes, fast);
    let ema_slow = ema_series(&closes, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal_period);

    let m = *macd_line.last()?;
    let s = *signal_line.last()?;

    Some(IndicatorValues::Macd {
        macd: round4(m),
        signal: round4(s),
        histogram: round4(m - s),
        fast,
        slow,
        signal_period,
    })
}

fn calc_sma(bars: &[Bar], period: usize) -> Option<IndicatorValues> {
    let closes = closes(bars);
    if period == 0 || closes.len() < period {
        return None;
    }
    let value = mean(&closes[closes.len() - period..]);
    Some(IndicatorValues::Sma {
        value: round4(value),
        period,
        price: round4(*closes.last()?),
    })
}

fn calc_ema(bars: &[Bar], period: usize) -> Option<IndicatorValues> {
    let closes = closes(bars);
    if period == 0 || closes.len() < period {
        return None;
    }
    let ema = ema_series(&closes, period);
    Some(IndicatorValues::Ema {
        value: round4(*ema.last()?),
        period,
        price: round4(*closes.last()?),
    })
}

fn calc_bbands(bars: &[Bar], period: usize, std_dev: f64) -> Option<IndicatorValues> {
    let closes = closes(bars);
    if period < 2 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let middle = mean(window);
    let std = sample_std(window, middle);
    let upper = middle + std_dev * std;
    let lower = middle - std_dev * std;
    let bandwidth = if middle == 0.0 {
        0.0
    } else {
        round2((upper - lower) / middle * 100.0)
    };

    Some(IndicatorValues::BollingerBands {
        upper: round4(upper),
        middle: round4(middle),
        lower: round4(lower),
        price: round4(*closes.last()?),
        bandwidth,
    })
}

fn calc_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Option<IndicatorValues> {
    if k_period == 0 || d_period == 0 || bars.len() < k_period + d_period {
        return None;
    }

    // %K for each of the last d_period bars, then %D as their mean.
    let mut k_values = Vec::with_capacity(d_period);
    for i in (bars.len() - d_period)..bars.len() {
        let window = &bars[i + 1 - k_period..=i];
        let low_min = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let high_max = window
            .iter()
            .map(|b| b.high)
            .fold(f64::NEG_INFINITY, f64::max);
        let range = high_max - low_min;
        if range == 0.0 {
            return None;
        }
        k_values.push((bars[i].close - low_min) / range * 100.0);
    }

    let k = *k_values.last()?;
    let d = mean(&k_values);

    Some(IndicatorValues::Stochastic {
        k: round2(k),
        d: round2(d),
        k_period,
        d_period,
    })
}

fn calc_obv(bars: &[Bar]) -> Option<IndicatorValues> {
    if bars.len() < 2 {
        return None;
    }
    let mut obv = 0.0;
    let mut change = 0.0;
    for w in bars.windows(2) {
        let direction = (w[1].close - w[0].close).signum();
        change = if w[1].close == w[0].close {
            0.0
        } else {
            direction * w[1].volume
        };
        obv += change;
    }
    Some(IndicatorValues::Obv {
        value: obv.round(),
        change: change.round(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 1_000.0,
            })
            .collect()
    }

    #[test]
    fn too_few_bars_yields_none_for_everything() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0]);
        let specs = [
            IndicatorSpec::Rsi {
                period: 14,
                oversold: 30.0,
                overbought: 70.0,
            },
            IndicatorSpec::Sma { period: 2 },
            IndicatorSpec::Obv,
        ];
        for spec in &specs {
            assert_eq!(calculate(spec, &bars), None, "{}", spec.name());
        }
    }

    #[test]
    fn sma_is_mean_of_last_period_closes() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
        let values = calculate(&IndicatorSpec::Sma { period: 5 }, &bars).unwrap();
        match values {
            IndicatorValues::Sma { value, period, price } => {
                assert_eq!(value, 8.0);
                assert_eq!(period, 5);
                assert_eq!(price, 10.0);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn ema_seeds_from_first_close() {
        // alpha = 0.5 for period 3: 1 -> 1.5 -> 2.25 -> 3.125
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 4.0]);
        let values = calculate(&IndicatorSpec::Ema { period: 3 }, &bars).unwrap();
        match values {
            IndicatorValues::Ema { value, .. } => assert_eq!(value, 3.5625),
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn rsi_reflects_direction_of_the_series() {
        let mostly_up: Vec<f64> = (0..30)
            .map(|i| 100.0 + i as f64 * 0.5 - if i % 5 == 0 { 0.8 } else { 0.0 })
            .collect();
        let bars = bars_from_closes(&mostly_up);
        let spec = IndicatorSpec::Rsi {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        };
        match calculate(&spec, &bars).unwrap() {
            IndicatorValues::Rsi { value, .. } => {
                assert!(value > 70.0, "rsi of a rising series should be high: {value}");
            }
            other => panic!("unexpected values: {other:?}"),
        }

        let mostly_down: Vec<f64> = (0..30)
            .map(|i| 100.0 - i as f64 * 0.5 + if i % 5 == 0 { 0.8 } else { 0.0 })
            .collect();
        let bars = bars_from_closes(&mostly_down);
        match calculate(&spec, &bars).unwrap() {
            IndicatorValues::Rsi { value, .. } => {
                assert!(value < 30.0, "rsi of a falling series should be low: {value}");
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn rsi_with_no_losses_is_undefined() {
        let rising: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let bars = bars_from_closes(&rising);
        let spec = IndicatorSpec::Rsi {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        };
        assert_eq!(calculate(&spec, &bars), None);
    }

    #[test]
    fn bollinger_uses_sample_standard_deviation() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let spec = IndicatorSpec::BollingerBands {
            period: 5,
            std_dev: 2.0,
        };
        match calculate(&spec, &bars).unwrap() {
            IndicatorValues::BollingerBands {
                upper,
                middle,
                lower,
                ..
            } => {
                assert_eq!(middle, 3.0);
                // sample std of 1..5 = sqrt(2.5) ~ 1.5811
                assert_eq!(upper, 6.1623);
                assert_eq!(lower, -0.1623);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn macd_histogram_sign_tracks_momentum() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64).powf(1.2)).collect();
        let bars = bars_from_closes(&rising);
        let spec = IndicatorSpec::Macd {
            fast: 12,
            slow: 26,
            signal: 9,
        };
        match calculate(&spec, &bars).unwrap() {
            IndicatorValues::Macd { histogram, .. } => {
                assert!(histogram > 0.0, "accelerating uptrend: {histogram}");
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn stochastic_pegs_high_when_close_is_at_the_top_of_the_range() {
        let mut bars = bars_from_closes(&(1..=20).map(f64::from).collect::<Vec<_>>());
        // Close at the high of every bar.
        for bar in &mut bars {
            bar.high = bar.close;
            bar.low = bar.close - 2.0;
        }
        let spec = IndicatorSpec::Stochastic {
            k_period: 14,
            d_period: 3,
        };
        match calculate(&spec, &bars).unwrap() {
            IndicatorValues::Stochastic { k, d, .. } => {
                assert!(k > 80.0);
                assert!(d > 80.0);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let mut bars = bars_from_closes(&[10.0, 11.0, 10.5, 12.0, 12.5]);
        for (i, bar) in bars.iter_mut().enumerate() {
            bar.volume = (i as f64 + 1.0) * 100.0;
        }
        match calculate(&IndicatorSpec::Obv, &bars).unwrap() {
            IndicatorValues::Obv { value, change } => {
                // +200 - 300 + 400 + 500 = 800, last move up on 500 volume
                assert_eq!(value, 800.0);
                assert_eq!(change, 500.0);
            }
            other => panic!("unexpected values: {other:?}"),
        }
    }

    #[test]
    fn snapshot_serializes_nulls_for_missing_values() {
        let bars = bars_from_closes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let specs = vec![
            IndicatorSpec::Sma { period: 5 },
            IndicatorSpec::Rsi {
                period: 14,
                oversold: 30.0,
                overbought: 70.0,
            },
        ];
        let results = calculate_all(&specs, &bars);
        let snapshot = snapshot_json(&results);
        assert!(snapshot["SMA"]["value"].is_number());
        assert!(snapshot["RSI"].is_null());
    }
}
