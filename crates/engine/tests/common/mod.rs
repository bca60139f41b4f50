//! Shared test harness: a scriptable in-memory broker plus store fixtures.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use autotrader_broker::{
    Account, BrokerApi, BrokerError, MarketClock, Order, OrderState, RemotePosition,
};
use autotrader_core::{
    generate_id, Bar, Bot, BotStatus, Position, Quote, RiskConfig, TradeSide, User,
};
use autotrader_engine::{BotRunner, BotSpec, EngineShared};
use autotrader_events::EventBus;
use autotrader_store::Store;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};

/// How submitted orders resolve when the engine polls for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Order reports filled on the first status poll.
    Immediate,
    /// Order stays in `new` forever.
    Never,
    /// Order resolves to the given terminal state.
    Terminal(TerminalKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Canceled,
    Rejected,
    Expired,
}

impl TerminalKind {
    fn state(self) -> OrderState {
        match self {
            Self::Canceled => OrderState::Canceled,
            Self::Rejected => OrderState::Rejected,
            Self::Expired => OrderState::Expired,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub symbol: String,
    pub qty: i64,
    pub side: TradeSide,
    pub client_order_id: String,
}

#[derive(Default)]
pub struct MockState {
    pub bars: HashMap<String, Vec<Bar>>,
    pub quotes: HashMap<String, f64>,
    pub orders: HashMap<String, Order>,
    pub submissions: Vec<Submission>,
    pub positions: Vec<RemotePosition>,
    pub cancelled: Vec<String>,
    pub market_open: bool,
    next_order: u64,
    fill_mode: Option<FillMode>,
}

/// Scriptable broker double. Everything is driven off `MockState`, which
/// tests mutate directly through `state()`.
pub struct MockBroker {
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn new(fill_mode: FillMode) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                market_open: true,
                fill_mode: Some(fill_mode),
                ..MockState::default()
            }),
        })
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    /// Seeds an order the broker already knows about (for reconciler
    /// tests where the submission predates the test).
    pub fn seed_order(&self, order_id: &str, symbol: &str, qty: i64, state: OrderState) {
        let order = Order {
            id: order_id.to_string(),
            client_order_id: None,
            symbol: symbol.to_string(),
            side: "buy".to_string(),
            qty,
            filled_qty: if state == OrderState::Filled { qty } else { 0 },
            filled_avg_price: None,
            status: state,
            submitted_at: Some(Utc::now()),
            filled_at: None,
        };
        self.state().orders.insert(order_id.to_string(), order);
    }
}

#[async_trait]
impl BrokerApi for MockBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        Ok(Account {
            id: "mock-account".to_string(),
            status: "ACTIVE".to_string(),
            equity: 100_000.0,
            buying_power: 200_000.0,
            cash: 100_000.0,
            portfolio_value: 100_000.0,
            currency: "USD".to_string(),
        })
    }

    async fn get_clock(&self) -> Result<MarketClock, BrokerError> {
        Ok(MarketClock {
            is_open: self.state().market_open,
            timestamp: Some(Utc::now()),
            next_open: None,
            next_close: None,
        })
    }

    async fn get_latest_quote(&self, symbol: &str) -> Result<Quote, BrokerError> {
        let price = self.state().quotes.get(symbol).copied().unwrap_or(0.0);
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: price,
            ask: price,
            bid_size: 100,
            ask_size: 100,
            timestamp: Some(Utc::now()),
        })
    }

    async fn get_bars(
        &self,
        symbol: &str,
        _timeframe: &str,
        _limit: usize,
        _start: Option<DateTime<Utc>>,
    ) -> Result<Vec<Bar>, BrokerError> {
        Ok(self.state().bars.get(symbol).cloned().unwrap_or_default())
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        qty: i64,
        side: TradeSide,
        _time_in_force: &str,
        client_order_id: &str,
    ) -> Result<Order, BrokerError> {
        let mut state = self.state();
        state.next_order += 1;
        let order_id = format!("order-{}", state.next_order);
        state.submissions.push(Submission {
            symbol: symbol.to_string(),
            qty,
            side,
            client_order_id: client_order_id.to_string(),
        });

        let fill_price = state.quotes.get(symbol).copied().unwrap_or(0.0);
        let resolution = match state.fill_mode.unwrap_or(FillMode::Immediate) {
            FillMode::Immediate => Order {
                id: order_id.clone(),
                client_order_id: Some(client_order_id.to_string()),
                symbol: symbol.to_string(),
                side: side.as_str().to_string(),
                qty,
                filled_qty: qty,
                filled_avg_price: Some(fill_price),
                status: OrderState::Filled,
                submitted_at: Some(Utc::now()),
                filled_at: Some(Utc::now()),
            },
            FillMode::Never => Order {
                id: order_id.clone(),
                client_order_id: Some(client_order_id.to_string()),
                symbol: symbol.to_string(),
                side: side.as_str().to_string(),
                qty,
                filled_qty: 0,
                filled_avg_price: None,
                status: OrderState::New,
                submitted_at: Some(Utc::now()),
                filled_at: None,
            },
            FillMode::Terminal(kind) => Order {
                id: order_id.clone(),
                client_order_id: Some(client_order_id.to_string()),
                symbol: symbol.to_string(),
                side: side.as_str().to_string(),
                qty,
                filled_qty: 0,
                filled_avg_price: None,
                status: kind.state(),
                submitted_at: Some(Utc::now()),
                filled_at: None,
            },
        };
        state.orders.insert(order_id.clone(), resolution);

        // The submission response itself is still pending.
        Ok(Order {
            id: order_id,
            client_order_id: Some(client_order_id.to_string()),
            symbol: symbol.to_string(),
            side: side.as_str().to_string(),
            qty,
            filled_qty: 0,
            filled_avg_price: None,
            status: OrderState::New,
            submitted_at: Some(Utc::now()),
            filled_at: None,
        })
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, BrokerError> {
        self.state()
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| BrokerError::Http {
                status: 404,
                body: format!("order {order_id} not found"),
            })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state();
        state.cancelled.push(order_id.to_string());
        if let Some(order) = state.orders.get_mut(order_id) {
            order.status = OrderState::Canceled;
        }
        Ok(())
    }

    async fn get_positions(&self) -> Result<Vec<RemotePosition>, BrokerError> {
        Ok(self.state().positions.clone())
    }

    async fn close_position(&self, symbol: &str) -> Result<Order, BrokerError> {
        let qty = self
            .state()
            .positions
            .iter()
            .find(|p| p.symbol == symbol)
            .map_or(0, |p| p.qty);
        self.submit_market_order(symbol, qty, TradeSide::Sell, "day", &generate_id())
            .await
    }
}

// --- store fixtures -----------------------------------------------------

pub async fn store_with_user() -> (Store, String) {
    let store = Store::in_memory().await.unwrap();
    let user_id = generate_id();
    store
        .insert_user(&User {
            id: user_id.clone(),
            email: format!("{user_id}@example.com"),
            password_hash: "hash".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    (store, user_id)
}

pub fn bot_fixture(user_id: &str, symbols: &[&str], indicators: serde_json::Value) -> Bot {
    let now = Utc::now();
    Bot {
        id: generate_id(),
        user_id: user_id.to_string(),
        name: "test-bot".to_string(),
        description: None,
        capital: 10_000.0,
        trading_frequency: 1,
        symbols: symbols.iter().map(ToString::to_string).collect(),
        indicators: indicators.as_object().unwrap().clone(),
        risk_management: RiskConfig {
            stop_loss: 2.0,
            take_profit: 5.0,
            max_position_size: 100.0,
            max_daily_loss: 0.0,
            max_concurrent_positions: 0,
        },
        // Window spanning the whole day so tests never depend on when
        // they run.
        start_hour: 0,
        start_minute: 0,
        end_hour: 23,
        end_minute: 59,
        status: BotStatus::Running,
        is_active: true,
        error_count: 0,
        last_run_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn runner_for(
    bot: &Bot,
    store: &Store,
    broker: Arc<MockBroker>,
    bus: &EventBus,
) -> BotRunner {
    let shared = Arc::new(EngineShared::default());
    shared.set_market_open(true);
    BotRunner::new(
        BotSpec::from_bot(bot),
        store.clone(),
        broker,
        bus.clone(),
        shared,
        Arc::new(AtomicBool::new(false)),
    )
}

/// Bars whose closes zig-zag gently downward (+0.2 / −0.3 alternating):
/// Wilder RSI settles near 40, and the latest price sits below the moving
/// averages, so RSI holds while SMA/EMA sell.
pub fn drifting_down_bars(n: usize) -> Vec<Bar> {
    let mut closes = Vec::with_capacity(n);
    let mut price = 100.0;
    for i in 0..n {
        closes.push(price);
        price += if i % 2 == 0 { 0.2 } else { -0.3 };
    }
    bars_from_closes(&closes)
}

pub fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            timestamp: Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap(),
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 10_000.0,
        })
        .collect()
}

pub fn open_position_fixture(
    bot_id: &str,
    symbol: &str,
    qty: i64,
    entry_price: f64,
    entry_indicator: Option<&str>,
    opened_ago: ChronoDuration,
) -> Position {
    Position {
        id: generate_id(),
        bot_id: bot_id.to_string(),
        symbol: symbol.to_string(),
        quantity: qty,
        entry_price,
        current_price: entry_price,
        stop_loss_price: None,
        take_profit_price: None,
        unrealized_pnl: 0.0,
        realized_pnl: 0.0,
        opened_at: Utc::now() - opened_ago,
        closed_at: None,
        is_open: true,
        entry_indicator: entry_indicator.map(ToString::to_string),
    }
}
