//! Drift repair between the broker's authoritative state and the local
//! ledger.
//!
//! Two jobs per user per pass: resolve trades stuck in a pending status
//! against the broker's order book, and compare per-symbol share counts
//! against the broker's positions. All mutations discovered in a pass are
//! applied in one transaction; repair is automatic only where it is safe
//! (closing local records the broker no longer backs) and report-only where
//! it is not (shares the broker holds that the ledger never opened).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use autotrader_broker::{BrokerApi, BrokerRegistry};
use autotrader_core::{round2, ActivityLevel, Trade, TradeSide, TradeStatus};
use autotrader_events::{Discrepancy, DiscrepancyKind, EventBus};
use autotrader_store::{ReconcileAction, Store};
use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;

use crate::executor::terminal_trade_status;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(300);

/// Pending orders older than this are cancelled at the broker and closed
/// locally.
const STALE_ORDER_MINUTES: i64 = 5;

#[derive(Debug, Default, Serialize)]
pub struct ReconciliationSummary {
    pub users_checked: usize,
    pub pending_resolved: usize,
    pub discrepancies: Vec<Discrepancy>,
}

pub struct Reconciler {
    store: Store,
    brokers: Arc<BrokerRegistry>,
    bus: EventBus,
}

impl Reconciler {
    #[must_use]
    pub fn new(store: Store, brokers: Arc<BrokerRegistry>, bus: EventBus) -> Self {
        Self {
            store,
            brokers,
            bus,
        }
    }

    /// One full pass over every user with a registered broker client.
    ///
    /// # Errors
    /// Returns an error only on store failure outside any single user's
    /// pass; per-user failures are logged and skipped.
    pub async fn run_once(&self) -> Result<ReconciliationSummary> {
        let user_ids = self.brokers.user_ids().await;
        let mut summary = ReconciliationSummary {
            users_checked: user_ids.len(),
            ..ReconciliationSummary::default()
        };
        if user_ids.is_empty() {
            tracing::debug!("Reconciliation skipped: no registered broker clients");
            return Ok(summary);
        }

        for user_id in &user_ids {
            let Some(broker) = self.brokers.for_user(user_id).await else {
                continue;
            };
            match self.reconcile_user(user_id, broker.as_ref()).await {
                Ok((resolved, discrepancies)) => {
                    summary.pending_resolved += resolved;
                    summary.discrepancies.extend(discrepancies);
                }
                Err(e) => {
                    tracing::error!("Reconciliation failed for user {}: {e:#}", user_id);
                }
            }
        }

        if summary.pending_resolved > 0 || !summary.discrepancies.is_empty() {
            tracing::info!(
                "Reconciliation complete: {} user(s), {} pending resolved, {} discrepancy(ies)",
                summary.users_checked,
                summary.pending_resolved,
                summary.discrepancies.len()
            );
        } else {
            tracing::debug!("Reconciliation complete: no drift detected");
        }
        Ok(summary)
    }

    /// The periodic loop. Runs until `shutdown` flips.
    pub async fn run_periodic(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Reconciler loop started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    let _ = changed;
                    break;
                }
                () = tokio::time::sleep(RECONCILE_INTERVAL) => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.run_once().await {
                tracing::error!("Reconciliation pass failed: {e:#}");
            }
        }
        tracing::info!("Reconciler loop stopped");
    }

    async fn reconcile_user(
        &self,
        user_id: &str,
        broker: &dyn BrokerApi,
    ) -> Result<(usize, Vec<Discrepancy>)> {
        let mut actions: Vec<ReconcileAction> = Vec::new();
        let resolved = self
            .resolve_pending_trades(user_id, broker, &mut actions)
            .await?;
        let discrepancies = self
            .reconcile_positions(user_id, broker, &mut actions)
            .await?;

        // Everything found for this user commits or rolls back together.
        self.store.apply_reconcile_actions(&actions).await?;

        if !discrepancies.is_empty() {
            self.bus
                .emit_reconciliation_alert(user_id, discrepancies.clone());
            let _ = self
                .store
                .record_activity(
                    ActivityLevel::Warning,
                    "reconciliation",
                    &format!(
                        "Position reconciliation found {} discrepancy(ies)",
                        discrepancies.len()
                    ),
                    serde_json::to_value(&discrepancies).ok(),
                    None,
                    Some(user_id),
                )
                .await;
        }
        Ok((resolved, discrepancies))
    }

    /// Part A: trades stuck in `new`/`partially_filled`.
    async fn resolve_pending_trades(
        &self,
        user_id: &str,
        broker: &dyn BrokerApi,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<usize> {
        let pending = self.store.pending_trades_for_user(user_id).await?;
        let mut resolved = 0;

        for trade in pending {
            let Some(order_id) = trade.order_id.clone() else {
                continue;
            };
            let order = match broker.get_order(&order_id).await {
                Ok(order) => order,
                Err(e) => {
                    tracing::warn!("Pending-trade order fetch failed for {}: {}", order_id, e);
                    continue;
                }
            };
            let position = self
                .store
                .open_position_for(&trade.bot_id, &trade.symbol)
                .await?;

            if order.status.is_filled() {
                let price = order
                    .filled_avg_price
                    .or(trade.price)
                    .unwrap_or_default();
                let qty = if order.filled_qty > 0 {
                    order.filled_qty
                } else {
                    trade.quantity
                };
                actions.push(ReconcileAction::MarkTradeFilled {
                    trade_id: trade.id.clone(),
                    price,
                    quantity: qty,
                });
                if let Some(position) = position {
                    match trade.side {
                        TradeSide::Buy => actions.push(ReconcileAction::UpdateEntry {
                            position_id: position.id,
                            entry_price: price,
                            quantity: qty,
                        }),
                        TradeSide::Sell => {
                            let realized =
                                round2((price - position.entry_price) * position.quantity as f64);
                            actions.push(ReconcileAction::ClosePosition {
                                position_id: position.id,
                                current_price: Some(price),
                                realized_pnl: Some(realized),
                            });
                        }
                    }
                }
                self.note_resolution(
                    user_id,
                    &trade,
                    &format!(
                        "Pending trade resolved as FILLED: {} x{} @ ${:.2}",
                        trade.symbol, qty, price
                    ),
                    ActivityLevel::Info,
                )
                .await;
                resolved += 1;
            } else if order.status.is_terminal_non_fill() {
                let status = terminal_trade_status(&order.status);
                actions.push(ReconcileAction::MarkTradeStatus {
                    trade_id: trade.id.clone(),
                    status,
                });
                if trade.side == TradeSide::Buy {
                    if let Some(position) = position {
                        actions.push(ReconcileAction::ClosePosition {
                            position_id: position.id,
                            current_price: None,
                            realized_pnl: None,
                        });
                    }
                }
                self.note_resolution(
                    user_id,
                    &trade,
                    &format!(
                        "Pending trade resolved as {}: {}",
                        status.as_str().to_uppercase(),
                        trade.symbol
                    ),
                    ActivityLevel::Warning,
                )
                .await;
                resolved += 1;
            } else {
                let age = Utc::now() - trade.timestamp;
                if age > chrono::Duration::minutes(STALE_ORDER_MINUTES) {
                    if let Err(e) = broker.cancel_order(&order_id).await {
                        tracing::warn!("Stale order cancel failed for {}: {}", order_id, e);
                    }
                    actions.push(ReconcileAction::MarkTradeStatus {
                        trade_id: trade.id.clone(),
                        status: TradeStatus::Canceled,
                    });
                    if trade.side == TradeSide::Buy {
                        if let Some(position) = position {
                            actions.push(ReconcileAction::ClosePosition {
                                position_id: position.id,
                                current_price: None,
                                realized_pnl: None,
                            });
                        }
                    }
                    self.note_resolution(
                        user_id,
                        &trade,
                        &format!(
                            "Stale pending order auto-cancelled: {} (order {})",
                            trade.symbol, order_id
                        ),
                        ActivityLevel::Warning,
                    )
                    .await;
                    resolved += 1;
                }
            }
        }
        Ok(resolved)
    }

    /// Part B: per-symbol share counts against the broker's positions.
    async fn reconcile_positions(
        &self,
        user_id: &str,
        broker: &dyn BrokerApi,
        actions: &mut Vec<ReconcileAction>,
    ) -> Result<Vec<Discrepancy>> {
        let remote = match broker.get_positions().await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::error!("Broker position fetch failed for user {}: {}", user_id, e);
                return Ok(Vec::new());
            }
        };

        let mut broker_qty: HashMap<&str, i64> = HashMap::new();
        let mut broker_price: HashMap<&str, f64> = HashMap::new();
        for position in &remote {
            broker_qty.insert(position.symbol.as_str(), position.qty);
            broker_price.insert(position.symbol.as_str(), position.current_price);
        }

        // FIFO by opened_at, the order drift repair consumes them in.
        let local_open = self.store.open_positions_for_user(user_id).await?;
        let mut local_qty: HashMap<&str, i64> = HashMap::new();
        for position in &local_open {
            *local_qty.entry(position.symbol.as_str()).or_default() += position.quantity;
        }

        let symbols: BTreeSet<&str> = broker_qty
            .keys()
            .chain(local_qty.keys())
            .copied()
            .collect();

        let mut discrepancies = Vec::new();
        for symbol in symbols {
            let at_broker = broker_qty.get(symbol).copied().unwrap_or(0);
            let in_ledger = local_qty.get(symbol).copied().unwrap_or(0);

            if in_ledger > at_broker {
                let excess = in_ledger - at_broker;
                tracing::warn!(
                    "Position drift for {}: ledger {} > broker {}, auto-closing oldest",
                    symbol,
                    in_ledger,
                    at_broker
                );
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::ExcessInLocal,
                    symbol: symbol.to_string(),
                    broker_qty: at_broker,
                    local_qty: in_ledger,
                    diff: excess,
                    detail: format!(
                        "Ledger has {excess} stale share(s) of {symbol}, auto-closing oldest \
                         position(s)"
                    ),
                });

                let mut remaining = excess;
                let mut closed = 0;
                for position in local_open.iter().filter(|p| p.symbol == symbol) {
                    if remaining <= 0 {
                        break;
                    }
                    actions.push(ReconcileAction::ClosePosition {
                        position_id: position.id.clone(),
                        current_price: broker_price.get(symbol).copied(),
                        realized_pnl: None,
                    });
                    remaining -= position.quantity;
                    closed += position.quantity;
                }

                // Whole-position closes can overshoot; whatever the broker
                // still holds beyond the surviving ledger is broker-excess.
                let surviving = in_ledger - closed;
                if at_broker > surviving {
                    let diff = at_broker - surviving;
                    discrepancies.push(Discrepancy {
                        kind: DiscrepancyKind::ExcessInBroker,
                        symbol: symbol.to_string(),
                        broker_qty: at_broker,
                        local_qty: surviving,
                        diff,
                        detail: format!(
                            "Broker holds {diff} untracked share(s) of {symbol} after drift \
                             repair"
                        ),
                    });
                }
            } else if at_broker > in_ledger {
                let diff = at_broker - in_ledger;
                tracing::warn!(
                    "Position drift for {}: broker {} > ledger {}, reporting only",
                    symbol,
                    at_broker,
                    in_ledger
                );
                discrepancies.push(Discrepancy {
                    kind: DiscrepancyKind::ExcessInBroker,
                    symbol: symbol.to_string(),
                    broker_qty: at_broker,
                    local_qty: in_ledger,
                    diff,
                    detail: format!("Broker holds {diff} untracked share(s) of {symbol}"),
                });
            }
        }

        // Refresh marks from the broker snapshot. Positions closed above
        // are skipped by the is_open guard when the batch applies.
        for position in &local_open {
            if let Some(&price) = broker_price.get(position.symbol.as_str()) {
                let unrealized = round2((price - position.entry_price) * position.quantity as f64);
                actions.push(ReconcileAction::RefreshPrice {
                    position_id: position.id.clone(),
                    current_price: price,
                    unrealized_pnl: unrealized,
                });
            }
        }

        Ok(discrepancies)
    }

    async fn note_resolution(
        &self,
        user_id: &str,
        trade: &Trade,
        message: &str,
        level: ActivityLevel,
    ) {
        tracing::info!("{}", message);
        let _ = self
            .store
            .record_activity(
                level,
                "reconciliation",
                message,
                None,
                Some(&trade.bot_id),
                Some(user_id),
            )
            .await;
    }
}
