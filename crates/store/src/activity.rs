use autotrader_core::{generate_id, ActivityEntry, ActivityLevel};
use chrono::Utc;
use serde_json::Value;

use crate::rows::map_activity;
use crate::{Store, StoreError};

const ACTIVITY_COLUMNS: &str = "id, timestamp, level, category, message, details, bot_id, user_id";

impl Store {
    /// Persists a structured activity entry.
    ///
    /// # Errors
    /// Returns an error if serialization or the insert fails.
    pub async fn record_activity(
        &self,
        level: ActivityLevel,
        category: &str,
        message: &str,
        details: Option<Value>,
        bot_id: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let details = details
            .map(|v| serde_json::to_string(&v))
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("activity details: {e}")))?;

        sqlx::query(
            "INSERT INTO activity_logs (id, timestamp, level, category, message, details, \
             bot_id, user_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(generate_id())
        .bind(Utc::now())
        .bind(level.as_str())
        .bind(category)
        .bind(message)
        .bind(details)
        .bind(bot_id)
        .bind(user_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Most recent activity entries, newest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_logs ORDER BY timestamp DESC LIMIT ?1"
        ))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_activity).collect()
    }

    /// Recent activity scoped to one bot, newest first.
    ///
    /// # Errors
    /// Returns an error on connection failure or a corrupt row.
    pub async fn activity_for_bot(
        &self,
        bot_id: &str,
        limit: i64,
    ) -> Result<Vec<ActivityEntry>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activity_logs WHERE bot_id = ?1 \
             ORDER BY timestamp DESC LIMIT ?2"
        ))
        .bind(bot_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_activity).collect()
    }
}
