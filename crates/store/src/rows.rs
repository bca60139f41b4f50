//! Row-to-domain mapping helpers shared by the repository modules.

use autotrader_core::{
    ActivityEntry, ActivityLevel, Bot, BotStatus, Position, Trade, TradeSide, TradeStatus,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::StoreError;

pub(crate) fn map_bot(row: &SqliteRow) -> Result<Bot, StoreError> {
    let status: String = row.try_get("status")?;
    let symbols: String = row.try_get("symbols")?;
    let indicators: String = row.try_get("indicators")?;
    let risk: String = row.try_get("risk_management")?;

    Ok(Bot {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        capital: row.try_get("capital")?,
        trading_frequency: row.try_get::<i64, _>("trading_frequency")? as u64,
        symbols: serde_json::from_str(&symbols)
            .map_err(|e| StoreError::corrupt(format!("bot symbols: {e}")))?,
        indicators: serde_json::from_str(&indicators)
            .map_err(|e| StoreError::corrupt(format!("bot indicators: {e}")))?,
        risk_management: serde_json::from_str(&risk)
            .map_err(|e| StoreError::corrupt(format!("bot risk config: {e}")))?,
        start_hour: row.try_get::<i64, _>("start_hour")? as u8,
        start_minute: row.try_get::<i64, _>("start_minute")? as u8,
        end_hour: row.try_get::<i64, _>("end_hour")? as u8,
        end_minute: row.try_get::<i64, _>("end_minute")? as u8,
        status: BotStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt(format!("bot status '{status}'")))?,
        is_active: row.try_get("is_active")?,
        error_count: row.try_get::<i64, _>("error_count")? as u32,
        last_run_at: row.try_get("last_run_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn map_trade(row: &SqliteRow) -> Result<Trade, StoreError> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let snapshot: Option<String> = row.try_get("indicators_snapshot")?;

    Ok(Trade {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        side: TradeSide::parse(&side)
            .ok_or_else(|| StoreError::corrupt(format!("trade side '{side}'")))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        timestamp: row.try_get("timestamp")?,
        order_id: row.try_get("order_id")?,
        client_order_id: row.try_get("client_order_id")?,
        status: TradeStatus::parse(&status)
            .ok_or_else(|| StoreError::corrupt(format!("trade status '{status}'")))?,
        indicators_snapshot: snapshot
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("trade snapshot: {e}")))?,
        profit_loss: row.try_get("profit_loss")?,
        reason: row.try_get("reason")?,
    })
}

pub(crate) fn map_position(row: &SqliteRow) -> Result<Position, StoreError> {
    Ok(Position {
        id: row.try_get("id")?,
        bot_id: row.try_get("bot_id")?,
        symbol: row.try_get("symbol")?,
        quantity: row.try_get("quantity")?,
        entry_price: row.try_get("entry_price")?,
        current_price: row.try_get("current_price")?,
        stop_loss_price: row.try_get("stop_loss_price")?,
        take_profit_price: row.try_get("take_profit_price")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        realized_pnl: row.try_get("realized_pnl")?,
        opened_at: row.try_get("opened_at")?,
        closed_at: row.try_get("closed_at")?,
        is_open: row.try_get("is_open")?,
        entry_indicator: row.try_get("entry_indicator")?,
    })
}

pub(crate) fn map_activity(row: &SqliteRow) -> Result<ActivityEntry, StoreError> {
    let level: String = row.try_get("level")?;
    let details: Option<String> = row.try_get("details")?;

    Ok(ActivityEntry {
        id: row.try_get("id")?,
        timestamp: row.try_get("timestamp")?,
        level: ActivityLevel::parse(&level)
            .ok_or_else(|| StoreError::corrupt(format!("activity level '{level}'")))?,
        category: row.try_get("category")?,
        message: row.try_get("message")?,
        details: details
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| StoreError::corrupt(format!("activity details: {e}")))?,
        bot_id: row.try_get("bot_id")?,
        user_id: row.try_get("user_id")?,
    })
}
