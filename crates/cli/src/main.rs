//! Composition root: wires the store, broker registry, event bus, engine
//! and web API together behind a small CLI.

use std::sync::Arc;

use anyhow::Result;
use autotrader_broker::BrokerRegistry;
use autotrader_engine::TradingEngine;
use autotrader_events::EventBus;
use autotrader_store::Store;
use autotrader_web_api::ApiServer;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "autotrader", about = "Multi-tenant automated trading service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading engine and the web API
    Serve {
        #[arg(long, default_value = "0.0.0.0:8000", env = "AUTOTRADER_ADDR")]
        addr: String,
        #[arg(long, default_value = "sqlite://autotrader.db", env = "DATABASE_URL")]
        database_url: String,
    },
    /// Run a single reconciliation pass and print its summary
    Reconcile {
        #[arg(long, default_value = "sqlite://autotrader.db", env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { addr, database_url } => serve(&addr, &database_url).await,
        Command::Reconcile { database_url } => reconcile(&database_url).await,
    }
}

struct Services {
    store: Store,
    brokers: Arc<BrokerRegistry>,
    bus: EventBus,
    engine: Arc<TradingEngine>,
}

/// Builds the service graph: store (running migrations), broker registry
/// seeded from the environment plus every saved per-user credential, the
/// event bus, and the engine.
async fn build_services(database_url: &str) -> Result<Services> {
    let store = Store::connect(database_url).await?;

    let brokers = Arc::new(BrokerRegistry::from_env());
    for credentials in store.all_credentials().await? {
        if let Err(e) = brokers.register_user(&credentials).await {
            tracing::warn!(
                "Skipping saved credentials for user {}: {e:#}",
                credentials.user_id
            );
        }
    }

    let bus = EventBus::new();
    let engine = Arc::new(TradingEngine::new(
        store.clone(),
        brokers.clone(),
        bus.clone(),
    ));
    Ok(Services {
        store,
        brokers,
        bus,
        engine,
    })
}

async fn serve(addr: &str, database_url: &str) -> Result<()> {
    let services = build_services(database_url).await?;
    services.engine.start().await?;

    let server = ApiServer::new(
        services.engine.clone(),
        services.store.clone(),
        services.bus.clone(),
        services.brokers.clone(),
    );

    tokio::select! {
        result = server.serve(addr) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    services.engine.stop().await;
    Ok(())
}

async fn reconcile(database_url: &str) -> Result<()> {
    let services = build_services(database_url).await?;
    let summary = services.engine.reconcile_now().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
