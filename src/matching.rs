//! Simulated exchange: top-of-book matching against the tick stream
//!
//! Holds the order ledger and the active-order set, crosses active limit
//! orders against each incoming tick, and publishes order-update and trade
//! events. Only full-volume fills are modeled; one crossing order produces
//! exactly one trade for its entire remaining volume.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::event::{Event, EventBus};
use crate::{
    Direction, EngineError, Order, OrderId, OrderRequest, OrderStatus, Tick, Trade, TradeId,
};

/// Matching engine for a simulated exchange.
///
/// Ids are monotonic per instance, so an identical tick and submission
/// sequence always reproduces identical trade ids and prices.
#[derive(Debug, Default)]
pub struct MatchingEngine {
    order_count: OrderId,
    trade_count: TradeId,
    /// Full order ledger, terminal orders included
    orders: BTreeMap<OrderId, Order>,
    /// Active orders; BTreeSet over monotonic ids gives submission-order
    /// iteration (a documented divergence from price-time priority)
    active: BTreeSet<OrderId>,
    trades: Vec<Trade>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept an order request and park it in the book as `Submitting`.
    ///
    /// Acknowledgment (and any fill) happens on the next tick, modeling one
    /// tick of exchange latency.
    pub fn submit(
        &mut self,
        req: &OrderRequest,
        now: DateTime<Utc>,
    ) -> Result<OrderId, EngineError> {
        if req.volume <= 0.0 {
            return Err(EngineError::InvalidVolume(req.volume));
        }
        if req.price <= 0.0 {
            return Err(EngineError::InvalidPrice(req.price));
        }

        self.order_count += 1;
        let order = req.create_order(self.order_count, now);
        debug!(
            id = order.id,
            symbol = %order.symbol,
            direction = %order.direction,
            price = order.price,
            volume = order.volume,
            "order submitted"
        );
        self.active.insert(order.id);
        self.orders.insert(order.id, order);
        Ok(self.order_count)
    }

    /// Cancel an active order. Takes effect immediately, before the next
    /// tick is processed.
    pub fn cancel(&mut self, id: OrderId, bus: &mut EventBus) -> Result<(), EngineError> {
        if !self.active.remove(&id) {
            return Err(EngineError::OrderNotFound(id));
        }
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(EngineError::OrderNotFound(id))?;
        order.status = OrderStatus::Cancelled;
        debug!(id, "order cancelled");
        bus.publish(Event::Order(order.clone()));
        Ok(())
    }

    /// The matching step: acknowledge newly submitted orders, then try to
    /// cross every active order on this tick's instrument.
    ///
    /// A long order crosses when its price reaches the best ask, a short
    /// order when its price reaches the best bid; fills execute at the
    /// better of the limit and the market price. Orders are visited in
    /// submission order.
    pub fn on_tick(&mut self, tick: &Tick, bus: &mut EventBus) {
        let ids: Vec<OrderId> = self.active.iter().copied().collect();
        for id in ids {
            let Some(order) = self.orders.get_mut(&id) else {
                continue;
            };
            if order.symbol != tick.symbol {
                continue;
            }

            if order.status == OrderStatus::Submitting {
                order.status = OrderStatus::NotTraded;
                bus.publish(Event::Order(order.clone()));
            }

            let long_cross = order.direction == Direction::Long
                && order.price >= tick.ask_price
                && tick.ask_price > 0.0;
            let short_cross = order.direction == Direction::Short
                && order.price <= tick.bid_price
                && tick.bid_price > 0.0;
            if !long_cross && !short_cross {
                continue;
            }

            order.traded = order.volume;
            order.status = OrderStatus::AllTraded;
            let filled = order.clone();
            bus.publish(Event::Order(filled.clone()));
            self.active.remove(&id);

            // Favorable execution at the better of limit and market price
            let price = if long_cross {
                filled.price.min(tick.ask_price)
            } else {
                filled.price.max(tick.bid_price)
            };

            self.trade_count += 1;
            let trade = Trade {
                id: self.trade_count,
                order_id: id,
                symbol: filled.symbol.clone(),
                exchange: filled.exchange,
                direction: filled.direction,
                offset: filled.offset,
                price,
                volume: filled.volume,
                datetime: tick.datetime,
            };
            debug!(
                trade_id = trade.id,
                order_id = id,
                price,
                volume = trade.volume,
                "order filled"
            );
            self.trades.push(trade.clone());
            bus.publish(Event::Trade(trade));
        }
    }

    /// Snapshot of one order from the ledger
    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.get(&id).cloned()
    }

    /// Snapshots of every order ever submitted, in id order
    pub fn orders(&self) -> Vec<Order> {
        self.orders.values().cloned().collect()
    }

    pub fn active_order_count(&self) -> usize {
        self.active.len()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }
}
