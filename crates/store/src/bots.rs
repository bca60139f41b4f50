use autotrader_core::{Bot, BotStatus};
use chrono::Utc;

use crate::rows::map_bot;
use crate::{Store, StoreError};

const BOT_COLUMNS: &str = "id, user_id, name, description, capital, trading_frequency, symbols, \
     indicators, risk_management, start_hour, start_minute, end_hour, end_minute, status, \
     is_active, error_count, last_run_at, created_at, updated_at";

impl Store {
    /// Inserts a bot row.
    ///
    /// # Errors
    /// Returns an error if serialization or the insert fails.
    pub async fn insert_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        let symbols = serde_json::to_string(&bot.symbols)
            .map_err(|e| StoreError::corrupt(format!("bot symbols: {e}")))?;
        let indicators = serde_json::to_string(&bot.indicators)
            .map_err(|e| StoreError::corrupt(format!("bot indicators: {e}")))?;
        let risk = serde_json::to_string(&bot.risk_management)
            .map_err(|e| StoreError::corrupt(format!("bot risk config: {e}")))?;

        sqlx::query(
            "INSERT INTO bots (id, user_id, name, description, capital, trading_frequency, \
             symbols, indicators, risk_management, start_hour, start_minute, end_hour, \
             end_minute, status, is_active, error_count, last_run_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
             ?17, ?18, ?19)",
        )
        .bind(&bot.id)
        .bind(&bot.user_id)
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(bot.capital)
        .bind(bot.trading_frequency as i64)
        .bind(symbols)
        .bind(indicators)
        .bind(risk)
        .bind(i64::from(bot.start_hour))
        .bind(i64::from(bot.start_minute))
        .bind(i64::from(bot.end_hour))
        .bind(i64::from(bot.end_minute))
        .bind(bot.status.as_str())
        .bind(bot.is_active)
        .bind(i64::from(bot.error_count))
        .bind(bot.last_run_at)
        .bind(bot.created_at)
        .bind(bot.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Updates a bot's configuration (not its runtime status fields).
    ///
    /// # Errors
    /// Returns an error if serialization or the update fails.
    pub async fn update_bot(&self, bot: &Bot) -> Result<(), StoreError> {
        let symbols = serde_json::to_string(&bot.symbols)
            .map_err(|e| StoreError::corrupt(format!("bot symbols: {e}")))?;
        let indicators = serde_json::to_string(&bot.indicators)
            .map_err(|e| StoreError::corrupt(format!("bot indicators: {e}")))?;
        let risk = serde_json::to_string(&bot.risk_management)
            .map_err(|e| StoreError::corrupt(format!("bot risk config: {e}")))?;

        sqlx::query(
            "UPDATE bots SET name = ?2, description = ?3, capital = ?4, trading_frequency = ?5, \
             symbols = ?6, indicators = ?7, risk_management = ?8, start_hour = ?9, \
             start_minute = ?10, end_hour = ?11, end_minute = ?12, updated_at = ?13 \
             WHERE id = ?1",
        )
        .bind(&bot.id)
        .bind(&bot.name)
        .bind(&bot.description)
        .bind(bot.capital)
        .bind(bot.trading_frequency as i64)
        .bind(symbols)
        .bind(indicators)
        .bind(risk)
        .bind(i64::from(bot.start_hour))
        .bind(i64::from(bot.start_minute))
        .bind(i64::from(bot.end_hour))
        .bind(i64::from(bot.end_minute))
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetches one bot.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn get_bot(&self, bot_id: &str) -> Result<Option<Bot>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1"))
            .bind(bot_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_bot).transpose()
    }

    /// All bots, newest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn list_bots(&self) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOT_COLUMNS} FROM bots ORDER BY created_at DESC"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_bot).collect()
    }

    /// Bots in a given lifecycle status; `Running` is the set restored at
    /// startup.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn bots_with_status(&self, status: BotStatus) -> Result<Vec<Bot>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE status = ?1 ORDER BY created_at"
        ))
        .bind(status.as_str())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_bot).collect()
    }

    /// Flips a bot's lifecycle status and active flag.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn set_bot_status(
        &self,
        bot_id: &str,
        status: BotStatus,
        is_active: bool,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE bots SET status = ?2, is_active = ?3, updated_at = ?4 WHERE id = ?1")
            .bind(bot_id)
            .bind(status.as_str())
            .bind(is_active)
            .bind(Utc::now())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Marks a bot errored after the consecutive-error cap was hit.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn set_bot_errored(&self, bot_id: &str, error_count: u32) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE bots SET status = 'error', is_active = 0, error_count = ?2, updated_at = ?3 \
             WHERE id = ?1",
        )
        .bind(bot_id)
        .bind(i64::from(error_count))
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Stamps a successful cycle: last_run_at = now, error counter cleared.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn touch_last_run(&self, bot_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE bots SET last_run_at = ?2, error_count = 0 WHERE id = ?1")
            .bind(bot_id)
            .bind(Utc::now())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Deletes a bot and (via cascade) its trades and positions. Callers
    /// must refuse deletion of running bots before getting here.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn delete_bot(&self, bot_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM bots WHERE id = ?1")
            .bind(bot_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}
