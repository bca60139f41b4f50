//! HTTP request surface.
//!
//! Lifecycle endpoints mutate the persisted bot state first and then
//! forward the command to the engine, so a crash between the two leaves
//! the store authoritative for the next startup. The WebSocket endpoint
//! simply fans the event bus out as JSON.

use std::sync::Arc;

use autotrader_broker::BrokerRegistry;
use autotrader_engine::TradingEngine;
use autotrader_events::EventBus;
use autotrader_store::Store;
use axum::{
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod handlers;
mod websocket;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TradingEngine>,
    pub store: Store,
    pub bus: EventBus,
    pub brokers: Arc<BrokerRegistry>,
}

pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub fn new(
        engine: Arc<TradingEngine>,
        store: Store,
        bus: EventBus,
        brokers: Arc<BrokerRegistry>,
    ) -> Self {
        Self {
            state: AppState {
                engine,
                store,
                bus,
                brokers,
            },
        }
    }

    /// Builds the router with all API routes.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/api/bots", get(handlers::list_bots))
            .route("/api/bots", post(handlers::create_bot))
            .route("/api/bots/:bot_id", get(handlers::get_bot))
            .route("/api/bots/:bot_id", put(handlers::update_bot))
            .route("/api/bots/:bot_id", delete(handlers::delete_bot))
            .route("/api/bots/:bot_id/start", put(handlers::start_bot))
            .route("/api/bots/:bot_id/stop", put(handlers::stop_bot))
            .route("/api/bots/:bot_id/pause", put(handlers::pause_bot))
            .route("/api/bots/:bot_id/resume", put(handlers::resume_bot))
            .route("/api/bots/:bot_id/trades", get(handlers::bot_trades))
            .route("/api/bots/:bot_id/positions", get(handlers::bot_positions))
            .route("/api/bots/:bot_id/activity", get(handlers::bot_activity))
            .route("/api/positions/:position_id/close", post(handlers::close_position))
            .route("/api/activity", get(handlers::recent_activity))
            .route("/api/market/status", get(handlers::market_status))
            .route("/api/account", get(handlers::account))
            .route("/api/reconcile", post(handlers::reconcile))
            .route("/ws", get(websocket::websocket_handler))
            .with_state(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind or serve.
    pub async fn serve(self, addr: &str) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}
