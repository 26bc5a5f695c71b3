//! Strategy trait and the action buffer strategies emit into
//!
//! Callbacks never touch the engine directly; they record order and cancel
//! intents into an [`Actions`] buffer that the replay driver drains after
//! each callback. This keeps the event cascade explicit: nothing a strategy
//! does takes effect mid-callback.

use tracing::info;

use crate::{CancelRequest, Direction, Exchange, Offset, Order, OrderId, OrderRequest, Symbol, Tick, Trade};

/// Order and cancel intents collected during one strategy callback
#[derive(Debug)]
pub struct Actions {
    symbol: Symbol,
    exchange: Exchange,
    orders: Vec<OrderRequest>,
    cancels: Vec<CancelRequest>,
}

impl Actions {
    pub fn new(symbol: Symbol, exchange: Exchange) -> Self {
        Self {
            symbol,
            exchange,
            orders: Vec::new(),
            cancels: Vec::new(),
        }
    }

    /// Open a long position
    pub fn buy(&mut self, price: f64, volume: f64) {
        self.send_order(Direction::Long, Offset::Open, price, volume);
    }

    /// Close a long position
    pub fn sell(&mut self, price: f64, volume: f64) {
        self.send_order(Direction::Short, Offset::Close, price, volume);
    }

    /// Open a short position
    pub fn short(&mut self, price: f64, volume: f64) {
        self.send_order(Direction::Short, Offset::Open, price, volume);
    }

    /// Close a short position
    pub fn cover(&mut self, price: f64, volume: f64) {
        self.send_order(Direction::Long, Offset::Close, price, volume);
    }

    pub fn send_order(&mut self, direction: Direction, offset: Offset, price: f64, volume: f64) {
        self.orders.push(OrderRequest {
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            direction,
            offset,
            price,
            volume,
        });
    }

    pub fn cancel(&mut self, order_id: OrderId) {
        self.cancels.push(CancelRequest { order_id });
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty() && self.cancels.is_empty()
    }

    pub(crate) fn drain(&mut self) -> (Vec<OrderRequest>, Vec<CancelRequest>) {
        (
            std::mem::take(&mut self.orders),
            std::mem::take(&mut self.cancels),
        )
    }
}

/// A trading strategy driven by replayed market data.
///
/// `on_tick` is the only required callback; the lifecycle and execution
/// callbacks default to no-ops.
pub trait Strategy {
    fn name(&self) -> &str;

    /// Called once before the first tick
    fn on_init(&mut self) {}

    /// Called after init, when replay begins
    fn on_start(&mut self) {}

    /// Called after the last tick
    fn on_stop(&mut self) {}

    fn on_tick(&mut self, tick: &Tick, actions: &mut Actions);

    fn on_order(&mut self, _order: &Order, _actions: &mut Actions) {}

    fn on_trade(&mut self, _trade: &Trade, _actions: &mut Actions) {}
}

/// Buys a fixed volume on the first usable tick and holds to the end.
///
/// Mostly a pipeline exerciser: one entry, no exits, so every later PnL
/// figure comes from daily marking alone.
#[derive(Debug)]
pub struct BuyAndHoldStrategy {
    volume: f64,
    entered: bool,
    pos: f64,
}

impl BuyAndHoldStrategy {
    pub fn new(volume: f64) -> Self {
        Self {
            volume,
            entered: false,
            pos: 0.0,
        }
    }

    pub fn pos(&self) -> f64 {
        self.pos
    }
}

impl Strategy for BuyAndHoldStrategy {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_start(&mut self) {
        info!(volume = self.volume, "buy and hold started");
    }

    fn on_tick(&mut self, tick: &Tick, actions: &mut Actions) {
        if self.entered {
            return;
        }
        // Cross the spread so the order fills on the next tick
        let price = if tick.ask_price > 0.0 {
            tick.ask_price
        } else {
            tick.last_price
        };
        if price <= 0.0 {
            return;
        }
        actions.buy(price, self.volume);
        self.entered = true;
    }

    fn on_trade(&mut self, trade: &Trade, _actions: &mut Actions) {
        self.pos += trade.position_change();
        info!(price = trade.price, pos = self.pos, "entry filled");
    }
}
