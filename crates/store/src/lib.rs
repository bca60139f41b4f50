//! Persistent ledger over SQLite.
//!
//! One [`Store`] wraps a connection pool and exposes repository methods per
//! entity. Mutations are short transactions; the multi-row sequences the
//! engine depends on (pending-entry recording, sell settlement, a
//! reconciliation pass) run inside a single transaction each so concurrent
//! cycles always observe a consistent ledger.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

mod activity;
mod bots;
mod credentials;
mod error;
mod execution;
mod positions;
mod reconcile;
mod rows;
mod trades;
mod users;

pub use error::StoreError;
pub use reconcile::ReconcileAction;

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (creating if missing) the database at `database_url` and runs
    /// embedded migrations.
    ///
    /// # Errors
    /// Returns an error if the connection or a migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// An in-memory database for tests. Single connection, since each in-memory
    /// connection is its own database.
    ///
    /// # Errors
    /// Returns an error if the connection or a migration fails.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
