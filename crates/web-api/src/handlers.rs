use autotrader_core::{
    generate_id, ActivityEntry, Bot, BotStatus, Position, RiskConfig, Trade, TradeSide,
    TradeStatus,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 100;

#[derive(Deserialize)]
pub struct CreateBotRequest {
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub capital: f64,
    #[serde(default = "default_frequency")]
    pub trading_frequency: u64,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub indicators: serde_json::Map<String, Value>,
    #[serde(default)]
    pub risk_management: RiskConfig,
    #[serde(default = "default_start_hour")]
    pub start_hour: u8,
    #[serde(default = "default_start_minute")]
    pub start_minute: u8,
    #[serde(default = "default_end_hour")]
    pub end_hour: u8,
    #[serde(default)]
    pub end_minute: u8,
}

const fn default_frequency() -> u64 {
    60
}
const fn default_start_hour() -> u8 {
    9
}
const fn default_start_minute() -> u8 {
    30
}
const fn default_end_hour() -> u8 {
    16
}

#[derive(Deserialize)]
pub struct UpdateBotRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capital: Option<f64>,
    pub trading_frequency: Option<u64>,
    pub symbols: Option<Vec<String>>,
    pub indicators: Option<serde_json::Map<String, Value>>,
    pub risk_management: Option<RiskConfig>,
}

#[derive(Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct MarketStatusResponse {
    pub is_open: bool,
}

/// Lists all bots.
///
/// # Errors
/// Returns 500 if the store query fails.
pub async fn list_bots(State(state): State<AppState>) -> Result<Json<Vec<Bot>>, StatusCode> {
    let bots = state
        .store
        .list_bots()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(bots))
}

/// Creates a bot in the stopped state.
///
/// # Errors
/// Returns 400 for an invalid configuration, 500 if persistence fails.
pub async fn create_bot(
    State(state): State<AppState>,
    Json(req): Json<CreateBotRequest>,
) -> Result<(StatusCode, Json<Bot>), StatusCode> {
    if req.capital <= 0.0 || req.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if req.start_hour > 23 || req.end_hour > 23 || req.start_minute > 59 || req.end_minute > 59 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let now = Utc::now();
    let bot = Bot {
        id: generate_id(),
        user_id: req.user_id,
        name: req.name,
        description: req.description,
        capital: req.capital,
        trading_frequency: req.trading_frequency.max(1),
        symbols: req.symbols,
        indicators: req.indicators,
        risk_management: req.risk_management,
        start_hour: req.start_hour,
        start_minute: req.start_minute,
        end_hour: req.end_hour,
        end_minute: req.end_minute,
        status: BotStatus::Stopped,
        is_active: false,
        error_count: 0,
        last_run_at: None,
        created_at: now,
        updated_at: now,
    };
    state
        .store
        .insert_bot(&bot)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok((StatusCode::CREATED, Json(bot)))
}

/// Fetches one bot.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn get_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Bot>, StatusCode> {
    load_bot(&state, &bot_id).await.map(Json)
}

/// Updates a bot's configuration. Changes take effect the next time the
/// bot is started.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 400 for invalid values, 500 on
/// store failure.
pub async fn update_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
    Json(req): Json<UpdateBotRequest>,
) -> Result<Json<Bot>, StatusCode> {
    let mut bot = load_bot(&state, &bot_id).await?;

    if let Some(name) = req.name {
        if name.trim().is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
        bot.name = name;
    }
    if let Some(description) = req.description {
        bot.description = Some(description);
    }
    if let Some(capital) = req.capital {
        if capital <= 0.0 {
            return Err(StatusCode::BAD_REQUEST);
        }
        bot.capital = capital;
    }
    if let Some(frequency) = req.trading_frequency {
        bot.trading_frequency = frequency.max(1);
    }
    if let Some(symbols) = req.symbols {
        bot.symbols = symbols;
    }
    if let Some(indicators) = req.indicators {
        bot.indicators = indicators;
    }
    if let Some(risk) = req.risk_management {
        bot.risk_management = risk;
    }

    state
        .store
        .update_bot(&bot)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(bot))
}

/// Deletes a bot. Running bots must be stopped first.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 409 while it is running, 500 on
/// store failure.
pub async fn delete_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<StatusCode, StatusCode> {
    let bot = load_bot(&state, &bot_id).await?;
    if bot.status == BotStatus::Running || state.engine.is_bot_registered(&bot_id).await {
        return Err(StatusCode::CONFLICT);
    }
    state
        .store
        .delete_bot(&bot_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Starts a bot: persists the running status, then registers the runner.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 400 without symbols, 500 if
/// registration fails.
pub async fn start_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Bot>, StatusCode> {
    let bot = load_bot(&state, &bot_id).await?;
    if bot.symbols.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    state
        .store
        .set_bot_status(&bot_id, BotStatus::Running, true)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state
        .engine
        .register_bot(&bot_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let bot = load_bot(&state, &bot_id).await?;
    state.bus.emit_bot_status_changed(&bot);
    Ok(Json(bot))
}

/// Stops a bot: persists the stopped status, then tears the runner down.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn stop_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Bot>, StatusCode> {
    load_bot(&state, &bot_id).await?;

    state
        .store
        .set_bot_status(&bot_id, BotStatus::Stopped, false)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state.engine.unregister_bot(&bot_id).await;

    let bot = load_bot(&state, &bot_id).await?;
    state.bus.emit_bot_status_changed(&bot);
    Ok(Json(bot))
}

/// Pauses a running bot in place.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn pause_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Bot>, StatusCode> {
    load_bot(&state, &bot_id).await?;

    state
        .store
        .set_bot_status(&bot_id, BotStatus::Paused, true)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state.engine.pause_bot(&bot_id).await;

    let bot = load_bot(&state, &bot_id).await?;
    state.bus.emit_bot_status_changed(&bot);
    Ok(Json(bot))
}

/// Resumes a paused bot.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn resume_bot(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Bot>, StatusCode> {
    load_bot(&state, &bot_id).await?;

    state
        .store
        .set_bot_status(&bot_id, BotStatus::Running, true)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    state.engine.resume_bot(&bot_id).await;

    let bot = load_bot(&state, &bot_id).await?;
    state.bus.emit_bot_status_changed(&bot);
    Ok(Json(bot))
}

/// Recent trades for one bot.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn bot_trades(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Vec<Trade>>, StatusCode> {
    load_bot(&state, &bot_id).await?;
    let trades = state
        .store
        .trades_for_bot(&bot_id, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(trades))
}

/// All positions for one bot.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn bot_positions(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Vec<Position>>, StatusCode> {
    load_bot(&state, &bot_id).await?;
    let positions = state
        .store
        .positions_for_bot(&bot_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(positions))
}

/// Recent activity entries scoped to one bot.
///
/// # Errors
/// Returns 404 if the bot doesn't exist, 500 on store failure.
pub async fn bot_activity(
    State(state): State<AppState>,
    Path(bot_id): Path<String>,
) -> Result<Json<Vec<ActivityEntry>>, StatusCode> {
    load_bot(&state, &bot_id).await?;
    let entries = state
        .store
        .activity_for_bot(&bot_id, DEFAULT_LIST_LIMIT)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(entries))
}

/// Manually closes an open position: submits a closing order at the broker
/// and records the pending sell; the reconciler settles the ledger once
/// the broker resolves it.
///
/// # Errors
/// Returns 404 for a missing or already-closed position, 502 if the
/// broker refuses the order, 500 on store failure.
pub async fn close_position(
    State(state): State<AppState>,
    Path(position_id): Path<String>,
) -> Result<Json<Trade>, StatusCode> {
    let position = state
        .store
        .get_position(&position_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .filter(|p| p.is_open)
        .ok_or(StatusCode::NOT_FOUND)?;

    let bot = load_bot(&state, &position.bot_id).await?;
    let broker = state
        .brokers
        .for_user(&bot.user_id)
        .await
        .ok_or(StatusCode::BAD_GATEWAY)?;

    let order = broker
        .close_position(&position.symbol)
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;

    let trade = Trade {
        id: generate_id(),
        bot_id: bot.id.clone(),
        symbol: position.symbol.clone(),
        side: TradeSide::Sell,
        quantity: position.quantity,
        price: None,
        timestamp: Utc::now(),
        order_id: Some(order.id),
        client_order_id: format!("bot-{}-manual-{}", &bot.id[..8], generate_id()),
        status: TradeStatus::New,
        indicators_snapshot: None,
        profit_loss: None,
        reason: Some("Manual close".to_string()),
    };
    state
        .store
        .insert_trade(&trade)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(trade))
}

/// Recent activity across all bots.
///
/// # Errors
/// Returns 500 on store failure.
pub async fn recent_activity(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActivityEntry>>, StatusCode> {
    let entries = state
        .store
        .recent_activity(DEFAULT_LIST_LIMIT)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(entries))
}

/// The engine's cached market status.
pub async fn market_status(State(state): State<AppState>) -> Json<MarketStatusResponse> {
    Json(MarketStatusResponse {
        is_open: state.engine.market_is_open(),
    })
}

/// Broker account snapshot for a user (or the default account).
///
/// # Errors
/// Returns 502 if no broker client is available or the call fails.
pub async fn account(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<autotrader_broker::Account>, StatusCode> {
    let broker = match query.user_id {
        Some(user_id) => state.brokers.for_user(&user_id).await,
        None => state.brokers.default_client(),
    }
    .ok_or(StatusCode::BAD_GATEWAY)?;

    let account = broker
        .get_account()
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(account))
}

/// Runs an on-demand reconciliation pass and returns its summary.
///
/// # Errors
/// Returns 500 if the pass fails.
pub async fn reconcile(
    State(state): State<AppState>,
) -> Result<Json<autotrader_engine::ReconciliationSummary>, StatusCode> {
    let summary = state
        .engine
        .reconcile_now()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(summary))
}

async fn load_bot(state: &AppState, bot_id: &str) -> Result<Bot, StatusCode> {
    state
        .store
        .get_bot(bot_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)
}
