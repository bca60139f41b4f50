//! Market status monitor.
//!
//! Polls the default broker's clock once a minute, keeps the shared
//! market-open flag current, and announces open/close transitions on the
//! bus. Never blocks anything else; a failed poll backs off briefly and
//! tries again on the next tick.

use std::sync::Arc;
use std::time::Duration;

use autotrader_broker::{BrokerError, BrokerRegistry};
use autotrader_events::EventBus;
use tokio::sync::watch;

use crate::EngineShared;

const MONITOR_INTERVAL: Duration = Duration::from_secs(60);
const ERROR_BACKOFF: Duration = Duration::from_secs(10);

pub struct MarketMonitor {
    brokers: Arc<BrokerRegistry>,
    shared: Arc<EngineShared>,
    bus: EventBus,
}

impl MarketMonitor {
    #[must_use]
    pub fn new(brokers: Arc<BrokerRegistry>, shared: Arc<EngineShared>, bus: EventBus) -> Self {
        Self {
            brokers,
            shared,
            bus,
        }
    }

    /// Refreshes the market flag once, emitting a transition event if it
    /// flipped.
    ///
    /// # Errors
    /// Returns the broker error from the clock fetch.
    pub async fn refresh(&self) -> Result<(), BrokerError> {
        let Some(broker) = self.brokers.default_client() else {
            self.shared.set_market_open(false);
            return Ok(());
        };
        let clock = broker.get_clock().await?;
        let previous = self.shared.set_market_open(clock.is_open);
        if previous != clock.is_open {
            if clock.is_open {
                tracing::info!("Market OPENED");
            } else {
                tracing::info!("Market CLOSED");
            }
            self.bus.emit_market_status_changed(clock.is_open);
        }
        Ok(())
    }

    /// The monitor loop. Runs until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Market monitor started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    let _ = changed;
                    break;
                }
                () = tokio::time::sleep(MONITOR_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.refresh().await {
                tracing::error!("Market monitor poll failed: {}", e);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
        tracing::info!("Market monitor stopped");
    }
}
