//! Batched application of a reconciliation pass.
//!
//! The reconciler gathers everything it wants to change while talking to the
//! broker, then commits the whole pass for a user atomically so a crash
//! mid-pass never leaves the ledger half-repaired.

use autotrader_core::TradeStatus;
use chrono::Utc;

use crate::positions::close_position_with;
use crate::{Store, StoreError};

/// One mutation discovered during a reconciliation pass.
#[derive(Debug, Clone)]
pub enum ReconcileAction {
    /// Broker reports the order filled: stamp the trade with fill data.
    MarkTradeFilled {
        trade_id: String,
        price: f64,
        quantity: i64,
    },
    /// Broker reports a terminal non-fill (or we cancelled a stale order).
    MarkTradeStatus {
        trade_id: String,
        status: TradeStatus,
    },
    /// Align an open position's entry with the actual fill.
    UpdateEntry {
        position_id: String,
        entry_price: f64,
        quantity: i64,
    },
    /// Close a position (terminal non-fill, resolved sell, or FIFO drift
    /// repair).
    ClosePosition {
        position_id: String,
        current_price: Option<f64>,
        realized_pnl: Option<f64>,
    },
    /// Refresh the mark price from the broker's position snapshot.
    RefreshPrice {
        position_id: String,
        current_price: f64,
        unrealized_pnl: f64,
    },
}

impl Store {
    /// Applies a whole reconciliation pass in one transaction.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is committed then.
    pub async fn apply_reconcile_actions(
        &self,
        actions: &[ReconcileAction],
    ) -> Result<(), StoreError> {
        if actions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool().begin().await?;
        for action in actions {
            match action {
                ReconcileAction::MarkTradeFilled {
                    trade_id,
                    price,
                    quantity,
                } => {
                    sqlx::query(
                        "UPDATE trades SET status = 'filled', price = ?2, quantity = ?3 \
                         WHERE id = ?1",
                    )
                    .bind(trade_id)
                    .bind(price)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
                }
                ReconcileAction::MarkTradeStatus { trade_id, status } => {
                    sqlx::query("UPDATE trades SET status = ?2 WHERE id = ?1")
                        .bind(trade_id)
                        .bind(status.as_str())
                        .execute(&mut *tx)
                        .await?;
                }
                ReconcileAction::UpdateEntry {
                    position_id,
                    entry_price,
                    quantity,
                } => {
                    sqlx::query(
                        "UPDATE positions SET entry_price = ?2, quantity = ?3 WHERE id = ?1",
                    )
                    .bind(position_id)
                    .bind(entry_price)
                    .bind(quantity)
                    .execute(&mut *tx)
                    .await?;
                }
                ReconcileAction::ClosePosition {
                    position_id,
                    current_price,
                    realized_pnl,
                } => {
                    close_position_with(
                        &mut *tx,
                        position_id,
                        *current_price,
                        *realized_pnl,
                        Utc::now(),
                    )
                    .await?;
                }
                ReconcileAction::RefreshPrice {
                    position_id,
                    current_price,
                    unrealized_pnl,
                } => {
                    sqlx::query(
                        "UPDATE positions SET current_price = ?2, unrealized_pnl = ?3 \
                         WHERE id = ?1 AND is_open = 1",
                    )
                    .bind(position_id)
                    .bind(current_price)
                    .bind(unrealized_pnl)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}
