//! Typed views over the JSON configuration blobs stored on each bot row.
//!
//! Indicator configs arrive as a map of indicator name to parameter object.
//! Each supported name maps to a tagged [`IndicatorSpec`] variant validated
//! on read; unknown names are skipped with a warning so one bad entry never
//! takes a whole bot down.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Risk limits configured per bot. Percentages are whole numbers
/// (`stop_loss: 2.0` means 2%). A zero limit means "not configured".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub max_position_size: f64,
    pub max_daily_loss: f64,
    pub max_concurrent_positions: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss: 0.0,
            take_profit: 0.0,
            max_position_size: 10.0,
            max_daily_loss: 0.0,
            max_concurrent_positions: 0,
        }
    }
}

/// One configured indicator with validated parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndicatorSpec {
    Rsi {
        period: usize,
        oversold: f64,
        overbought: f64,
    },
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Sma {
        period: usize,
    },
    Ema {
        period: usize,
    },
    BollingerBands {
        period: usize,
        std_dev: f64,
    },
    Stochastic {
        k_period: usize,
        d_period: usize,
    },
    Obv,
}

impl IndicatorSpec {
    /// The configuration key this spec was parsed from.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Rsi { .. } => "RSI",
            Self::Macd { .. } => "MACD",
            Self::Sma { .. } => "SMA",
            Self::Ema { .. } => "EMA",
            Self::BollingerBands { .. } => "Bollinger Bands",
            Self::Stochastic { .. } => "Stochastic",
            Self::Obv => "OBV",
        }
    }

    /// Parses a single `name -> params` entry. Returns `None` for unknown
    /// indicator names; missing parameters take their conventional defaults.
    #[must_use]
    pub fn from_config(name: &str, params: &Value) -> Option<Self> {
        match name {
            "RSI" => Some(Self::Rsi {
                period: usize_param(params, "period", 14),
                oversold: f64_param(params, "oversold", 30.0),
                overbought: f64_param(params, "overbought", 70.0),
            }),
            "MACD" => Some(Self::Macd {
                fast: usize_param(params, "fast", 12),
                slow: usize_param(params, "slow", 26),
                signal: usize_param(params, "signal", 9),
            }),
            "SMA" => Some(Self::Sma {
                period: usize_param(params, "period", 50),
            }),
            "EMA" => Some(Self::Ema {
                period: usize_param(params, "period", 20),
            }),
            "Bollinger Bands" => Some(Self::BollingerBands {
                period: usize_param(params, "period", 20),
                std_dev: f64_param(params, "stdDev", 2.0),
            }),
            "Stochastic" => Some(Self::Stochastic {
                k_period: usize_param(params, "kPeriod", 14),
                d_period: usize_param(params, "dPeriod", 3),
            }),
            "OBV" => Some(Self::Obv),
            _ => None,
        }
    }

    /// Parses a whole indicator config map, preserving insertion order.
    ///
    /// Insertion order matters: on the entry path the *first* indicator with
    /// a BUY signal wins and becomes the position's entry indicator.
    #[must_use]
    pub fn parse_set(config: &serde_json::Map<String, Value>) -> Vec<Self> {
        let mut specs = Vec::with_capacity(config.len());
        for (name, params) in config {
            match Self::from_config(name, params) {
                Some(spec) => specs.push(spec),
                None => {
                    tracing::warn!("Unknown indicator '{}' in config, skipping", name);
                }
            }
        }
        specs
    }
}

fn f64_param(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn usize_param(params: &Value, key: &str, default: usize) -> usize {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map_or(default, |v| v as usize)
}
