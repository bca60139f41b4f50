use std::collections::HashMap;
use std::sync::Arc;

use autotrader_core::BrokerCredentials;
use tokio::sync::RwLock;

use crate::alpaca::{AlpacaClient, PAPER_BASE_URL};
use crate::api::BrokerApi;

/// Per-user broker clients plus an optional default resolved from the
/// environment.
///
/// Lookup order is user client first, default second, mirroring how
/// credentials are sourced: the settings UI registers per-user clients, the
/// environment seeds the default.
pub struct BrokerRegistry {
    default: Option<Arc<dyn BrokerApi>>,
    by_user: RwLock<HashMap<String, Arc<dyn BrokerApi>>>,
}

impl BrokerRegistry {
    #[must_use]
    pub fn new(default: Option<Arc<dyn BrokerApi>>) -> Self {
        Self {
            default,
            by_user: RwLock::new(HashMap::new()),
        }
    }

    /// Builds a registry whose default client comes from `APCA_API_KEY_ID` /
    /// `APCA_API_SECRET_KEY` / `APCA_API_BASE_URL`. A missing key pair is
    /// not an error; the service can run without a default broker, bots
    /// whose owner has no credentials just won't start.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var("APCA_API_KEY_ID").unwrap_or_default();
        let secret_key = std::env::var("APCA_API_SECRET_KEY").unwrap_or_default();
        let base_url =
            std::env::var("APCA_API_BASE_URL").unwrap_or_else(|_| PAPER_BASE_URL.to_string());

        if api_key.is_empty() || secret_key.is_empty() {
            tracing::warn!(
                "Broker API credentials not configured; market data and trading are unavailable \
                 until per-user credentials are registered"
            );
            return Self::new(None);
        }

        match AlpacaClient::new(&api_key, &secret_key, &base_url) {
            Ok(client) => Self::new(Some(Arc::new(client))),
            Err(e) => {
                tracing::error!("Failed to create default broker client: {e:#}");
                Self::new(None)
            }
        }
    }

    /// Creates and registers a client for one user's saved credentials.
    ///
    /// # Errors
    /// Returns an error if the client cannot be constructed (bad base URL,
    /// live-trading safety check).
    pub async fn register_user(&self, credentials: &BrokerCredentials) -> anyhow::Result<()> {
        let client = AlpacaClient::new(
            &credentials.api_key,
            &credentials.secret_key,
            &credentials.base_url,
        )?;
        self.register_user_client(&credentials.user_id, Arc::new(client))
            .await;
        Ok(())
    }

    /// Registers an already-built client for a user. Also the seam tests use
    /// to install mock brokers.
    pub async fn register_user_client(&self, user_id: &str, client: Arc<dyn BrokerApi>) {
        self.by_user
            .write()
            .await
            .insert(user_id.to_string(), client);
        tracing::info!("Registered broker client for user {}", user_id);
    }

    /// The client to use for a user: their own if registered, else the
    /// default.
    pub async fn for_user(&self, user_id: &str) -> Option<Arc<dyn BrokerApi>> {
        if let Some(client) = self.by_user.read().await.get(user_id) {
            return Some(client.clone());
        }
        self.default.clone()
    }

    /// The default (environment-configured) client, if any.
    #[must_use]
    pub fn default_client(&self) -> Option<Arc<dyn BrokerApi>> {
        self.default.clone()
    }

    /// User ids with a registered client, i.e. the set the reconciler sweeps.
    pub async fn user_ids(&self) -> Vec<String> {
        self.by_user.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::types::{Account, MarketClock, Order, RemotePosition};
    use async_trait::async_trait;
    use autotrader_core::{Bar, Quote, TradeSide};
    use chrono::{DateTime, Utc};

    struct NullBroker;

    #[async_trait]
    impl BrokerApi for NullBroker {
        async fn get_account(&self) -> Result<Account, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn get_latest_quote(&self, _symbol: &str) -> Result<Quote, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn get_bars(
            &self,
            _symbol: &str,
            _timeframe: &str,
            _limit: usize,
            _start: Option<DateTime<Utc>>,
        ) -> Result<Vec<Bar>, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn submit_market_order(
            &self,
            _symbol: &str,
            _qty: i64,
            _side: TradeSide,
            _time_in_force: &str,
            _client_order_id: &str,
        ) -> Result<Order, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn get_order(&self, _order_id: &str) -> Result<Order, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn cancel_order(&self, _order_id: &str) -> Result<(), BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
        async fn close_position(&self, _symbol: &str) -> Result<Order, BrokerError> {
            Err(BrokerError::MissingCredentials)
        }
    }

    #[tokio::test]
    async fn user_client_takes_priority_over_default() {
        let registry = BrokerRegistry::new(Some(Arc::new(NullBroker)));
        assert!(registry.for_user("u1").await.is_some());

        registry
            .register_user_client("u1", Arc::new(NullBroker))
            .await;
        assert_eq!(registry.user_ids().await, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn missing_user_and_default_yields_none() {
        let registry = BrokerRegistry::new(None);
        assert!(registry.for_user("nobody").await.is_none());
    }
}
