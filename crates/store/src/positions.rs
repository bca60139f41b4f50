use autotrader_core::Position;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::rows::map_position;
use crate::{Store, StoreError};

pub(crate) const POSITION_COLUMNS: &str = "id, bot_id, symbol, quantity, entry_price, \
     current_price, stop_loss_price, take_profit_price, unrealized_pnl, realized_pnl, \
     opened_at, closed_at, is_open, entry_indicator";

impl Store {
    /// Inserts a position row.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn insert_position(&self, position: &Position) -> Result<(), StoreError> {
        insert_position_with(self.pool(), position).await
    }

    /// Fetches one position.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn get_position(&self, position_id: &str) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE id = ?1"
        ))
        .bind(position_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(map_position).transpose()
    }

    /// The open position for a (bot, symbol) pair, if any. The pipeline's
    /// entry/exit branch hangs off this lookup.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn open_position_for(
        &self,
        bot_id: &str,
        symbol: &str,
    ) -> Result<Option<Position>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE bot_id = ?1 AND symbol = ?2 AND is_open = 1"
        ))
        .bind(bot_id)
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(map_position).transpose()
    }

    /// All open positions for one bot, oldest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn open_positions_for_bot(&self, bot_id: &str) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions \
             WHERE bot_id = ?1 AND is_open = 1 ORDER BY opened_at"
        ))
        .bind(bot_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_position).collect()
    }

    /// Every position (open and closed) for one bot, newest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn positions_for_bot(&self, bot_id: &str) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions WHERE bot_id = ?1 ORDER BY opened_at DESC"
        ))
        .bind(bot_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_position).collect()
    }

    /// Number of open positions for one bot (max-concurrent risk check).
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn count_open_positions(&self, bot_id: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM positions WHERE bot_id = ?1 AND is_open = 1",
        )
        .bind(bot_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.try_get::<i64, _>("n")? as u32)
    }

    /// All open positions across a user's bots, oldest first: the FIFO
    /// order drift repair closes in.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn open_positions_for_user(&self, user_id: &str) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT p.{} FROM positions p JOIN bots b ON b.id = p.bot_id \
             WHERE b.user_id = ?1 AND p.is_open = 1 ORDER BY p.opened_at",
            POSITION_COLUMNS.replace(", ", ", p.")
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_position).collect()
    }

    /// Refreshes an open position's mark price and unrealized P&L.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn update_position_price(
        &self,
        position_id: &str,
        current_price: f64,
        unrealized_pnl: f64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE positions SET current_price = ?2, unrealized_pnl = ?3 WHERE id = ?1",
        )
        .bind(position_id)
        .bind(current_price)
        .bind(unrealized_pnl)
        .execute(self.pool())
        .await?;
        Ok(())
    }
}

pub(crate) async fn insert_position_with<'e, E>(
    executor: E,
    position: &Position,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO positions (id, bot_id, symbol, quantity, entry_price, current_price, \
         stop_loss_price, take_profit_price, unrealized_pnl, realized_pnl, opened_at, \
         closed_at, is_open, entry_indicator) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
    )
    .bind(&position.id)
    .bind(&position.bot_id)
    .bind(&position.symbol)
    .bind(position.quantity)
    .bind(position.entry_price)
    .bind(position.current_price)
    .bind(position.stop_loss_price)
    .bind(position.take_profit_price)
    .bind(position.unrealized_pnl)
    .bind(position.realized_pnl)
    .bind(position.opened_at)
    .bind(position.closed_at)
    .bind(position.is_open)
    .bind(&position.entry_indicator)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn close_position_with<'e, E>(
    executor: E,
    position_id: &str,
    current_price: Option<f64>,
    realized_pnl: Option<f64>,
    closed_at: DateTime<Utc>,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "UPDATE positions SET is_open = 0, closed_at = ?2, unrealized_pnl = 0, \
         current_price = COALESCE(?3, current_price), \
         realized_pnl = COALESCE(?4, realized_pnl) \
         WHERE id = ?1",
    )
    .bind(position_id)
    .bind(closed_at)
    .bind(current_price)
    .bind(realized_pnl)
    .execute(executor)
    .await?;
    Ok(())
}
