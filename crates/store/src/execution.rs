//! Transactional sequences used by the order executor.
//!
//! The anti-duplication contract hangs on `record_pending_entry`: once that
//! transaction commits, every later cycle of the same bot observes an open
//! position for the symbol and takes the exit path instead of buying again.

use autotrader_core::{Position, Trade, TradeStatus};
use chrono::Utc;

use crate::positions::{close_position_with, insert_position_with};
use crate::trades::insert_trade_with;
use crate::{Store, StoreError};

impl Store {
    /// Records a freshly submitted BUY: the pending trade and its
    /// preliminary open position, in one transaction.
    ///
    /// # Errors
    /// Returns an error if either insert fails; nothing is committed then.
    pub async fn record_pending_entry(
        &self,
        trade: &Trade,
        position: &Position,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_trade_with(&mut *tx, trade).await?;
        insert_position_with(&mut *tx, position).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Overwrites the preliminary entry with actual fill data.
    ///
    /// # Errors
    /// Returns an error if either update fails; nothing is committed then.
    pub async fn finalize_buy_fill(
        &self,
        trade_id: &str,
        position_id: &str,
        fill_price: f64,
        fill_qty: i64,
        stop_loss_price: Option<f64>,
        take_profit_price: Option<f64>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "UPDATE trades SET status = 'filled', price = ?2, quantity = ?3 WHERE id = ?1",
        )
        .bind(trade_id)
        .bind(fill_price)
        .bind(fill_qty)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE positions SET entry_price = ?2, current_price = ?2, quantity = ?3, \
             stop_loss_price = ?4, take_profit_price = ?5 WHERE id = ?1",
        )
        .bind(position_id)
        .bind(fill_price)
        .bind(fill_qty)
        .bind(stop_loss_price)
        .bind(take_profit_price)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Resolves a BUY that terminally failed to fill: flips the trade to the
    /// broker's terminal status and closes the preliminary position.
    ///
    /// # Errors
    /// Returns an error if either update fails; nothing is committed then.
    pub async fn abort_entry(
        &self,
        trade_id: &str,
        position_id: &str,
        status: TradeStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("UPDATE trades SET status = ?2 WHERE id = ?1")
            .bind(trade_id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await?;
        close_position_with(&mut *tx, position_id, None, None, Utc::now()).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Settles a filled SELL: inserts the sell trade and closes the
    /// position with its realized P&L, in one transaction.
    ///
    /// # Errors
    /// Returns an error if any statement fails; nothing is committed then.
    pub async fn record_sell_close(
        &self,
        trade: &Trade,
        position_id: &str,
        fill_price: f64,
        realized_pnl: f64,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;
        insert_trade_with(&mut *tx, trade).await?;
        close_position_with(
            &mut *tx,
            position_id,
            Some(fill_price),
            Some(realized_pnl),
            trade.timestamp,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
