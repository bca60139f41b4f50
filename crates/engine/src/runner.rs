//! Per-bot trading loop.
//!
//! One runner owns one bot's periodic cycle: exit monitoring, then the
//! per-symbol signal→risk→order pipeline, then bookkeeping. Everything is
//! sequential within a runner; that per-bot serialization is what makes
//! "record the pending order before the next cycle" a sufficient
//! anti-duplication guarantee.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use autotrader_broker::{BrokerApi, BrokerError};
use autotrader_core::{
    round2, ActivityLevel, Bot, IndicatorSpec, Position, RiskConfig, Signal,
};
use autotrader_events::EventBus;
use autotrader_indicators::IndicatorValues;
use autotrader_risk::RiskVerdict;
use autotrader_store::Store;
use chrono::Utc;
use tokio::sync::watch;

use crate::window::TradingWindow;
use crate::EngineShared;

/// Consecutive cycle failures before a bot is parked in the error state.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

/// Minimum delay before retrying after a failed cycle.
const ERROR_BACKOFF: Duration = Duration::from_secs(10);

const BAR_TIMEFRAME: &str = "1Min";
const BAR_LIMIT: usize = 50;

/// Immutable snapshot of a bot's configuration, parsed once at
/// registration. A config change takes effect on the next start.
#[derive(Debug, Clone)]
pub struct BotSpec {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub capital: f64,
    pub period: Duration,
    pub symbols: Vec<String>,
    pub indicators: Vec<IndicatorSpec>,
    pub risk: RiskConfig,
    pub window: TradingWindow,
}

impl BotSpec {
    #[must_use]
    pub fn from_bot(bot: &Bot) -> Self {
        Self {
            id: bot.id.clone(),
            user_id: bot.user_id.clone(),
            name: bot.name.clone(),
            capital: bot.capital,
            period: Duration::from_secs(bot.trading_frequency.max(1)),
            symbols: bot.symbols.clone(),
            indicators: IndicatorSpec::parse_set(&bot.indicators),
            risk: bot.risk_management.clone(),
            window: TradingWindow {
                start_hour: bot.start_hour,
                start_minute: bot.start_minute,
                end_hour: bot.end_hour,
                end_minute: bot.end_minute,
            },
        }
    }
}

pub struct BotRunner {
    pub(crate) spec: BotSpec,
    pub(crate) store: Store,
    pub(crate) broker: Arc<dyn BrokerApi>,
    pub(crate) bus: EventBus,
    shared: Arc<EngineShared>,
    paused: Arc<AtomicBool>,
    consecutive_errors: u32,
}

impl BotRunner {
    #[must_use]
    pub fn new(
        spec: BotSpec,
        store: Store,
        broker: Arc<dyn BrokerApi>,
        bus: EventBus,
        shared: Arc<EngineShared>,
        paused: Arc<AtomicBool>,
    ) -> Self {
        Self {
            spec,
            store,
            broker,
            bus,
            shared,
            paused,
            consecutive_errors: 0,
        }
    }

    /// The runner's main loop. Sleeps one full period before the first
    /// cycle so a freshly started bot settles before trading; stops at the
    /// next suspension point once `shutdown` flips, letting any in-flight
    /// broker work inside the current cycle finish first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "Trading loop started for '{}' (period={:?}, symbols={:?})",
            self.spec.name,
            self.spec.period,
            self.spec.symbols
        );

        let mut delay = self.spec.period;
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // Either a stop was requested or the engine went away.
                    let _ = changed;
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            delay = self.spec.period;

            if self.paused.load(Ordering::Relaxed) {
                tracing::debug!("Bot '{}' is paused, skipping cycle", self.spec.name);
                continue;
            }
            if !self.spec.window.contains(Utc::now()) {
                tracing::debug!("Bot '{}' outside trading window, skipping cycle", self.spec.name);
                continue;
            }
            if !self.shared.market_is_open() {
                tracing::debug!("Market closed, bot '{}' skipping cycle", self.spec.name);
                continue;
            }

            match self.run_cycle().await {
                Ok(()) => {
                    self.consecutive_errors = 0;
                }
                Err(e) => {
                    if self.record_cycle_error(&e).await {
                        break;
                    }
                    delay = self.spec.period.max(ERROR_BACKOFF);
                }
            }
        }

        tracing::info!("Trading loop stopped for '{}'", self.spec.name);
    }

    /// One full pass: stop/take-profit checks, the per-symbol pipeline,
    /// then the last-run stamp (which also clears the persisted error
    /// counter).
    ///
    /// # Errors
    /// Propagates only uncategorized failures (store faults, bugs); broker
    /// errors are absorbed per symbol and retried next tick.
    pub async fn run_cycle(&self) -> Result<()> {
        self.monitor_exits().await?;
        for symbol in &self.spec.symbols {
            self.process_symbol(symbol).await?;
        }
        self.store.touch_last_run(&self.spec.id).await?;
        Ok(())
    }

    /// Checks stop-loss / take-profit on every open position, refreshing
    /// mark prices where neither trips.
    ///
    /// # Errors
    /// Propagates store failures.
    pub async fn monitor_exits(&self) -> Result<()> {
        let positions = self.store.open_positions_for_bot(&self.spec.id).await?;
        for position in positions {
            let Some(price) = self.latest_price(&position.symbol).await else {
                continue;
            };

            if position.stop_loss_price.is_some_and(|stop| price <= stop) {
                self.execute_sell(&position, price, "Stop-loss triggered", None)
                    .await?;
            } else if position
                .take_profit_price
                .is_some_and(|target| price >= target)
            {
                self.execute_sell(&position, price, "Take-profit triggered", None)
                    .await?;
            } else {
                let unrealized = round2((price - position.entry_price) * position.quantity as f64);
                self.store
                    .update_position_price(&position.id, price, unrealized)
                    .await?;
                self.bus.emit_price_update(&position.symbol, price);
            }
        }
        Ok(())
    }

    /// The per-symbol pipeline: bars → indicators → per-indicator signals,
    /// then either the exit path (position open) or the entry path.
    ///
    /// # Errors
    /// Propagates store failures; broker errors are logged and absorbed.
    pub async fn process_symbol(&self, symbol: &str) -> Result<()> {
        let bars = match self
            .broker
            .get_bars(symbol, BAR_TIMEFRAME, BAR_LIMIT, None)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                self.note_broker_error("fetch bars", symbol, &e).await;
                return Ok(());
            }
        };
        if bars.is_empty() {
            tracing::debug!("No bars returned for {}, skipping", symbol);
            return Ok(());
        }

        let results = autotrader_indicators::calculate_all(&self.spec.indicators, &bars);
        let signals = autotrader_signals::evaluate_all(&results);

        match self.store.open_position_for(&self.spec.id, symbol).await? {
            Some(position) => self.try_exit(symbol, &position, &signals, &results).await,
            None => self.try_entry(symbol, &signals, &results).await,
        }
    }

    /// Exit path: only the position's entry indicator may close it. Legacy
    /// positions without one fall back to a majority vote.
    async fn try_exit(
        &self,
        symbol: &str,
        position: &Position,
        signals: &[(String, Signal)],
        results: &[(String, Option<IndicatorValues>)],
    ) -> Result<()> {
        let reason = match position.entry_indicator.as_deref() {
            Some(entry) => match signals.iter().find(|(name, _)| name == entry) {
                Some((_, Signal::Sell)) => Some(format!("{entry} sell signal")),
                // HOLD/BUY from the entry indicator, or it could not be
                // evaluated this cycle: keep holding.
                _ => None,
            },
            None => {
                let votes: Vec<Signal> = signals.iter().map(|(_, s)| *s).collect();
                (autotrader_signals::majority_vote(&votes) == Signal::Sell)
                    .then(|| "Majority sell signal".to_string())
            }
        };

        let Some(reason) = reason else {
            return Ok(());
        };
        let Some(price) = self.latest_price(symbol).await else {
            return Ok(());
        };
        let snapshot = autotrader_indicators::snapshot_json(results);
        self.execute_sell(position, price, &reason, Some(snapshot))
            .await
    }

    /// Entry path: first indicator (in configuration order) signalling BUY
    /// wins, subject to the risk checks.
    async fn try_entry(
        &self,
        symbol: &str,
        signals: &[(String, Signal)],
        results: &[(String, Option<IndicatorValues>)],
    ) -> Result<()> {
        let Some((entry_indicator, _)) = signals.iter().find(|(_, s)| *s == Signal::Buy) else {
            return Ok(());
        };
        let Some(price) = self.latest_price(symbol).await else {
            return Ok(());
        };

        let today_pnl = self.store.today_realized_pnl(&self.spec.id).await?;
        let open_count = self.store.count_open_positions(&self.spec.id).await?;
        let verdict = autotrader_risk::validate(
            Signal::Buy,
            self.spec.capital,
            &self.spec.risk,
            price,
            today_pnl,
            open_count,
        );
        if let RiskVerdict::Blocked(reason) = verdict {
            self.store
                .record_activity(
                    ActivityLevel::Info,
                    "risk",
                    &format!("BUY {symbol} blocked: {reason}"),
                    None,
                    Some(&self.spec.id),
                    Some(&self.spec.user_id),
                )
                .await?;
            return Ok(());
        }

        let qty = autotrader_risk::position_size(self.spec.capital, price, &self.spec.risk);
        if qty <= 0 {
            tracing::debug!("Position size 0 for {}, skipping buy", symbol);
            return Ok(());
        }

        let snapshot = autotrader_indicators::snapshot_json(results);
        self.execute_buy(symbol, qty, price, entry_indicator, Some(snapshot))
            .await
    }

    /// Latest usable mid-price, or `None` if the broker errored or quoted
    /// nothing.
    pub(crate) async fn latest_price(&self, symbol: &str) -> Option<f64> {
        match self.broker.get_latest_quote(symbol).await {
            Ok(quote) => {
                let mid = quote.mid();
                if mid > 0.0 {
                    Some(mid)
                } else {
                    tracing::warn!("No usable price for {} this tick", symbol);
                    None
                }
            }
            Err(e) => {
                self.note_broker_error("fetch quote", symbol, &e).await;
                None
            }
        }
    }

    /// Books a failed cycle. Returns true when the consecutive-error cap
    /// is hit, after parking the bot in the error state and announcing it.
    pub async fn record_cycle_error(&mut self, err: &anyhow::Error) -> bool {
        self.consecutive_errors += 1;
        tracing::error!(
            "Cycle error for '{}' ({}/{}): {:#}",
            self.spec.name,
            self.consecutive_errors,
            MAX_CONSECUTIVE_ERRORS,
            err
        );
        let _ = self
            .store
            .record_activity(
                ActivityLevel::Error,
                "engine",
                &format!("Cycle failed for '{}': {err:#}", self.spec.name),
                None,
                Some(&self.spec.id),
                Some(&self.spec.user_id),
            )
            .await;

        if self.consecutive_errors < MAX_CONSECUTIVE_ERRORS {
            return false;
        }

        tracing::error!(
            "Bot '{}' exceeded {} consecutive errors, stopping",
            self.spec.name,
            MAX_CONSECUTIVE_ERRORS
        );
        if let Err(e) = self
            .store
            .set_bot_errored(&self.spec.id, self.consecutive_errors)
            .await
        {
            tracing::error!("Failed to persist error state for {}: {e}", self.spec.id);
        }
        match self.store.get_bot(&self.spec.id).await {
            Ok(Some(bot)) => self.bus.emit_bot_status_changed(&bot),
            Ok(None) => {}
            Err(e) => tracing::error!("Failed to reload bot {}: {e}", self.spec.id),
        }
        true
    }

    pub(crate) async fn note_broker_error(&self, action: &str, symbol: &str, err: &BrokerError) {
        let level = if err.is_transient() {
            tracing::warn!("Failed to {} for {}: {}", action, symbol, err);
            ActivityLevel::Warning
        } else {
            tracing::error!("Failed to {} for {}: {}", action, symbol, err);
            ActivityLevel::Error
        };
        let _ = self
            .store
            .record_activity(
                level,
                "broker",
                &format!("Failed to {action} for {symbol}: {err}"),
                None,
                Some(&self.spec.id),
                Some(&self.spec.user_id),
            )
            .await;
    }
}
