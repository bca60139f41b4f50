use autotrader_core::Trade;
use chrono::{TimeZone, Utc};
use sqlx::Row;

use crate::rows::map_trade;
use crate::{Store, StoreError};

pub(crate) const TRADE_COLUMNS: &str = "id, bot_id, symbol, side, quantity, price, timestamp, \
     order_id, client_order_id, status, indicators_snapshot, profit_loss, reason";

impl Store {
    /// Inserts a trade row. The unique index on `client_order_id` is the
    /// database-level guarantee behind order idempotency.
    ///
    /// # Errors
    /// Returns an error if the client order id collides or the insert fails.
    pub async fn insert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        insert_trade_with(self.pool(), trade).await
    }

    /// Fetches one trade.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn get_trade(&self, trade_id: &str) -> Result<Option<Trade>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?1"))
            .bind(trade_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_trade).transpose()
    }

    /// Recent trades for one bot, newest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn trades_for_bot(&self, bot_id: &str, limit: i64) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE bot_id = ?1 \
             ORDER BY timestamp DESC LIMIT ?2"
        ))
        .bind(bot_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_trade).collect()
    }

    /// Trades stuck in a pending status for any bot owned by `user_id`:
    /// the reconciler's work list.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn pending_trades_for_user(&self, user_id: &str) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT t.{} FROM trades t JOIN bots b ON b.id = t.bot_id \
             WHERE b.user_id = ?1 AND t.status IN ('new', 'partially_filled') \
             ORDER BY t.timestamp",
            TRADE_COLUMNS.replace(", ", ", t.")
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_trade).collect()
    }

    /// Sum of realized P&L recorded on this bot's trades since UTC midnight.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn today_realized_pnl(&self, bot_id: &str) -> Result<f64, StoreError> {
        let today_start = Utc
            .from_utc_datetime(&Utc::now().date_naive().and_hms_opt(0, 0, 0).unwrap_or_default());
        let row = sqlx::query(
            "SELECT COALESCE(SUM(profit_loss), 0.0) AS pnl FROM trades \
             WHERE bot_id = ?1 AND profit_loss IS NOT NULL AND timestamp >= ?2",
        )
        .bind(bot_id)
        .bind(today_start)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get("pnl")?)
    }
}

pub(crate) async fn insert_trade_with<'e, E>(executor: E, trade: &Trade) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let snapshot = trade
        .indicators_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::corrupt(format!("trade snapshot: {e}")))?;

    sqlx::query(
        "INSERT INTO trades (id, bot_id, symbol, side, quantity, price, timestamp, order_id, \
         client_order_id, status, indicators_snapshot, profit_loss, reason) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
    )
    .bind(&trade.id)
    .bind(&trade.bot_id)
    .bind(&trade.symbol)
    .bind(trade.side.as_str())
    .bind(trade.quantity)
    .bind(trade.price)
    .bind(trade.timestamp)
    .bind(&trade.order_id)
    .bind(&trade.client_order_id)
    .bind(trade.status.as_str())
    .bind(snapshot)
    .bind(trade.profit_loss)
    .bind(&trade.reason)
    .execute(executor)
    .await?;
    Ok(())
}
