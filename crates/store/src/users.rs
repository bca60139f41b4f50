use autotrader_core::User;
use sqlx::Row;

use crate::{Store, StoreError};

impl Store {
    /// Inserts a user row.
    ///
    /// # Errors
    /// Returns an error on conflict or connection failure.
    pub async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetches a user by id.
    ///
    /// # Errors
    /// Returns an error on connection failure.
    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, email, password_hash, created_at FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(User {
                id: row.try_get("id")?,
                email: row.try_get("email")?,
                password_hash: row.try_get("password_hash")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .transpose()
    }
}
