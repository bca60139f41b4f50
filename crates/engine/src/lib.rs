//! The trading engine.
//!
//! A single [`TradingEngine`] supervises everything long-running: the market
//! monitor, the reconciler's periodic loop, and one [`BotRunner`] task per
//! running bot. Runners are registered and removed only through the engine,
//! which keeps the registry single-writer; runners themselves read shared
//! state (the market-open flag) through [`EngineShared`] and never own the
//! engine back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use autotrader_broker::BrokerRegistry;
use autotrader_core::BotStatus;
use autotrader_events::EventBus;
use autotrader_store::{Store, StoreError};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

mod executor;
mod monitor;
mod reconciler;
mod runner;
mod window;

pub use monitor::MarketMonitor;
pub use reconciler::{Reconciler, ReconciliationSummary};
pub use runner::{BotRunner, BotSpec};
pub use window::TradingWindow;

/// How long `stop`/`unregister` waits for a runner to finish its in-flight
/// work before aborting the task outright.
const RUNNER_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// State runners read from the engine. Kept deliberately tiny: a runner
/// holds this instead of a reference back to the engine.
#[derive(Debug, Default)]
pub struct EngineShared {
    market_open: AtomicBool,
}

impl EngineShared {
    /// Current market-open flag. Updated by the monitor once a minute; a
    /// stale read here is benign.
    pub fn market_is_open(&self) -> bool {
        self.market_open.load(Ordering::Relaxed)
    }

    /// Stores the new flag, returning the previous value.
    pub fn set_market_open(&self, open: bool) -> bool {
        self.market_open.swap(open, Ordering::Relaxed)
    }
}

struct RunnerHandle {
    paused: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct TradingEngine {
    store: Store,
    brokers: Arc<BrokerRegistry>,
    bus: EventBus,
    shared: Arc<EngineShared>,
    reconciler: Arc<Reconciler>,
    runners: RwLock<HashMap<String, RunnerHandle>>,
    running: AtomicBool,
    background: Mutex<Vec<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl TradingEngine {
    #[must_use]
    pub fn new(store: Store, brokers: Arc<BrokerRegistry>, bus: EventBus) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            brokers.clone(),
            bus.clone(),
        ));
        Self {
            store,
            brokers,
            bus,
            shared: Arc::new(EngineShared::default()),
            reconciler,
            runners: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Starts the engine: refreshes market status, spawns the market
    /// monitor and the reconciler loop, runs one reconciliation pass to
    /// completion, then restores every bot persisted as running.
    ///
    /// Idempotent: a second call is a warning and a no-op.
    ///
    /// # Errors
    /// Returns an error only if the running-bot query fails; individual bot
    /// registration failures are isolated and logged.
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Trading engine already running");
            return Ok(());
        }

        if let Some(broker) = self.brokers.default_client() {
            match broker.get_clock().await {
                Ok(clock) => {
                    self.shared.set_market_open(clock.is_open);
                }
                Err(e) => tracing::warn!("Failed to fetch initial market clock: {e}"),
            }
        }

        let monitor = MarketMonitor::new(
            self.brokers.clone(),
            self.shared.clone(),
            self.bus.clone(),
        );
        let (monitor_tx, monitor_rx) = watch::channel(false);
        let monitor_task = tokio::spawn(monitor.run(monitor_rx));

        // Startup reconciliation runs to completion before any bot trades.
        if let Err(e) = self.reconciler.run_once().await {
            tracing::error!("Startup reconciliation failed: {e:#}");
        }

        let (reconciler_tx, reconciler_rx) = watch::channel(false);
        let reconciler_task = tokio::spawn(self.reconciler.clone().run_periodic(reconciler_rx));

        {
            let mut background = self.background.lock().await;
            background.push((monitor_tx, monitor_task));
            background.push((reconciler_tx, reconciler_task));
        }

        let running_bots = self.store.bots_with_status(BotStatus::Running).await?;
        let restored = running_bots.len();
        for bot in running_bots {
            if let Err(e) = self.register_bot(&bot.id).await {
                tracing::error!("Failed to restore bot {}: {e:#}", bot.id);
            }
        }

        tracing::info!(
            "Trading engine started (market_open={}, bots_restored={})",
            self.shared.market_is_open(),
            restored
        );
        Ok(())
    }

    /// Stops the engine: cancels all runners in parallel, waits for them,
    /// then winds down the monitor and reconciler loops. All background
    /// work is joined before this returns.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<RunnerHandle> = {
            let mut runners = self.runners.write().await;
            runners.drain().map(|(_, handle)| handle).collect()
        };
        futures::future::join_all(handles.into_iter().map(stop_runner)).await;

        let background: Vec<_> = self.background.lock().await.drain(..).collect();
        for (tx, task) in background {
            let _ = tx.send(true);
            let _ = task.await;
        }

        tracing::info!("Trading engine stopped");
    }

    /// Loads a bot's config and starts its runner. No-op with a warning if
    /// a runner already exists or the owner has no broker credentials.
    ///
    /// # Errors
    /// Returns an error if the bot cannot be loaded from the store.
    pub async fn register_bot(&self, bot_id: &str) -> Result<()> {
        // The write lock is held across the spawn so registration is
        // single-writer end to end.
        let mut runners = self.runners.write().await;
        if runners.contains_key(bot_id) {
            tracing::warn!("Bot {} already registered, skipping", bot_id);
            return Ok(());
        }

        let bot = self
            .store
            .get_bot(bot_id)
            .await?
            .with_context(|| format!("bot {bot_id} not found"))?;

        let Some(broker) = self.brokers.for_user(&bot.user_id).await else {
            tracing::warn!(
                "No broker client for user {}; bot '{}' not started",
                bot.user_id,
                bot.name
            );
            let _ = self
                .store
                .record_activity(
                    autotrader_core::ActivityLevel::Warning,
                    "engine",
                    &format!("Bot '{}' skipped: no broker credentials", bot.name),
                    None,
                    Some(&bot.id),
                    Some(&bot.user_id),
                )
                .await;
            return Ok(());
        };

        let spec = BotSpec::from_bot(&bot);
        if spec.symbols.is_empty() {
            tracing::warn!("Bot '{}' has no symbols configured, not starting", bot.name);
            return Ok(());
        }

        let paused = Arc::new(AtomicBool::new(false));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = BotRunner::new(
            spec,
            self.store.clone(),
            broker,
            self.bus.clone(),
            self.shared.clone(),
            paused.clone(),
        );
        let task = tokio::spawn(runner.run(shutdown_rx));

        runners.insert(
            bot_id.to_string(),
            RunnerHandle {
                paused,
                shutdown: shutdown_tx,
                task,
            },
        );
        tracing::info!("Registered bot '{}' ({})", bot.name, bot_id);
        Ok(())
    }

    /// Removes a bot's runner and waits (bounded) for it to stop.
    pub async fn unregister_bot(&self, bot_id: &str) {
        let handle = self.runners.write().await.remove(bot_id);
        match handle {
            Some(handle) => {
                stop_runner(handle).await;
                tracing::info!("Unregistered bot {}", bot_id);
            }
            None => tracing::debug!("Bot {} has no runner, nothing to unregister", bot_id),
        }
    }

    /// Pauses a runner in place: its loop keeps ticking but skips work.
    /// Returns false if the bot has no runner.
    pub async fn pause_bot(&self, bot_id: &str) -> bool {
        match self.runners.read().await.get(bot_id) {
            Some(handle) => {
                handle.paused.store(true, Ordering::Relaxed);
                tracing::info!("Paused bot {}", bot_id);
                true
            }
            None => {
                tracing::warn!("Bot {} not registered, cannot pause", bot_id);
                false
            }
        }
    }

    /// Resumes a paused runner. Returns false if the bot has no runner.
    pub async fn resume_bot(&self, bot_id: &str) -> bool {
        match self.runners.read().await.get(bot_id) {
            Some(handle) => {
                handle.paused.store(false, Ordering::Relaxed);
                tracing::info!("Resumed bot {}", bot_id);
                true
            }
            None => {
                tracing::warn!("Bot {} not registered, cannot resume", bot_id);
                false
            }
        }
    }

    /// Whether a runner currently exists for this bot.
    pub async fn is_bot_registered(&self, bot_id: &str) -> bool {
        self.runners.read().await.contains_key(bot_id)
    }

    pub fn market_is_open(&self) -> bool {
        self.shared.market_is_open()
    }

    /// Today's realized P&L for one bot.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn bot_today_pnl(&self, bot_id: &str) -> Result<f64, StoreError> {
        self.store.today_realized_pnl(bot_id).await
    }

    /// Open-position count for one bot.
    ///
    /// # Errors
    /// Returns an error on store failure.
    pub async fn bot_open_position_count(&self, bot_id: &str) -> Result<u32, StoreError> {
        self.store.count_open_positions(bot_id).await
    }

    /// Runs an on-demand reconciliation pass.
    ///
    /// # Errors
    /// Returns an error if the pass fails wholesale.
    pub async fn reconcile_now(&self) -> Result<ReconciliationSummary> {
        self.reconciler.run_once().await
    }
}

async fn stop_runner(handle: RunnerHandle) {
    let _ = handle.shutdown.send(true);
    let mut task = handle.task;
    if tokio::time::timeout(RUNNER_STOP_TIMEOUT, &mut task).await.is_err() {
        tracing::warn!("Runner did not stop within {:?}, aborting", RUNNER_STOP_TIMEOUT);
        task.abort();
    }
}
