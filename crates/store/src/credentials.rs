use autotrader_core::BrokerCredentials;
use chrono::Utc;
use sqlx::Row;

use crate::{Store, StoreError};

impl Store {
    /// Saves (or replaces) a user's broker credentials.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn upsert_credentials(
        &self,
        credentials: &BrokerCredentials,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO broker_credentials (user_id, api_key, secret_key, base_url, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(user_id) DO UPDATE SET \
                 api_key = excluded.api_key, \
                 secret_key = excluded.secret_key, \
                 base_url = excluded.base_url, \
                 updated_at = excluded.updated_at",
        )
        .bind(&credentials.user_id)
        .bind(&credentials.api_key)
        .bind(&credentials.secret_key)
        .bind(&credentials.base_url)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetches one user's broker credentials.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn credentials_for_user(
        &self,
        user_id: &str,
    ) -> Result<Option<BrokerCredentials>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, api_key, secret_key, base_url FROM broker_credentials \
             WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(|row| map_credentials(&row)).transpose()
    }

    /// All saved credentials, loaded into the broker registry at startup.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn all_credentials(&self) -> Result<Vec<BrokerCredentials>, StoreError> {
        let rows = sqlx::query(
            "SELECT user_id, api_key, secret_key, base_url FROM broker_credentials",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_credentials).collect()
    }
}

fn map_credentials(row: &sqlx::sqlite::SqliteRow) -> Result<BrokerCredentials, StoreError> {
    Ok(BrokerCredentials {
        user_id: row.try_get("user_id")?,
        api_key: row.try_get("api_key")?,
        secret_key: row.try_get("secret_key")?,
        base_url: row.try_get("base_url")?,
    })
}
