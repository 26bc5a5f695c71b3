//! Offset conversion: turning strategy intents into exchange-legal orders
//!
//! Strategies think in terms of "buy 5" or "close 8"; exchanges that split
//! positions by day need explicit close-today / close-yesterday legs, and
//! some accounts prefer locking over closing. The converter owns one
//! [`PositionHolding`] per converted instrument, keeps it in sync with
//! order and trade flow, and rewrites each request into zero or more legs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::ContractSpec;
use crate::oms::position::{PositionHolding, PositionSnapshot};
use crate::{EngineError, Exchange, Offset, Order, OrderId, OrderRequest, Symbol, Trade};

/// How closing intents are rewritten before submission
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertMode {
    /// Split generic closes into explicit close-today then close-yesterday
    /// legs against available volume
    #[default]
    TodayFirst,
    /// Open an opposing hedge instead of closing today volume
    Lock,
    /// Net intent: close whatever is available, open the remainder
    Net,
    /// Pass requests through untouched
    Plain,
}

#[derive(Debug)]
pub struct OffsetConverter {
    holdings: HashMap<Symbol, PositionHolding>,
    contracts: HashMap<Symbol, ContractSpec>,
    /// Exchanges whose positions distinguish close-today from close-yesterday
    day_split: HashSet<Exchange>,
}

impl OffsetConverter {
    pub fn new(day_split: HashSet<Exchange>) -> Self {
        Self {
            holdings: HashMap::new(),
            contracts: HashMap::new(),
            day_split,
        }
    }

    pub fn register(&mut self, contract: &ContractSpec) {
        self.contracts.insert(contract.symbol.clone(), contract.clone());
    }

    /// Conversion applies only to registered contracts that are not netted
    pub fn convert_required(&self, symbol: &Symbol) -> bool {
        match self.contracts.get(symbol) {
            Some(contract) => !contract.net_position,
            None => false,
        }
    }

    fn holding_mut(&mut self, symbol: &Symbol) -> &mut PositionHolding {
        let exchange = self
            .contracts
            .get(symbol)
            .map(|c| c.exchange)
            .unwrap_or(Exchange::Local);
        let yd_first = self.day_split.contains(&exchange);
        self.holdings
            .entry(symbol.clone())
            .or_insert_with(|| PositionHolding::new(symbol.clone(), exchange, yd_first))
    }

    /// Apply a fill to the tracked holding
    pub fn update_trade(&mut self, trade: &Trade) -> Result<(), EngineError> {
        if !self.convert_required(&trade.symbol) {
            return Ok(());
        }
        let symbol = trade.symbol.clone();
        self.holding_mut(&symbol).update_from_fill(trade)
    }

    /// Apply an order-state change (freezes and unfreezes closable volume)
    pub fn update_order(&mut self, order: &Order) {
        if !self.convert_required(&order.symbol) {
            return;
        }
        let symbol = order.symbol.clone();
        self.holding_mut(&symbol).update_from_order(order);
    }

    /// Freeze volume for a request the moment it is submitted, before any
    /// acknowledgment comes back
    pub fn update_order_request(&mut self, req: &OrderRequest, id: OrderId, now: DateTime<Utc>) {
        if !self.convert_required(&req.symbol) {
            return;
        }
        let order = req.create_order(id, now);
        let symbol = req.symbol.clone();
        self.holding_mut(&symbol).update_from_order(&order);
    }

    /// Rewrite a request into the legs to actually submit.
    ///
    /// An empty result means the request was dropped (close volume exceeds
    /// what is available under the selected mode).
    pub fn convert(&mut self, req: &OrderRequest, mode: ConvertMode) -> Vec<OrderRequest> {
        if !self.convert_required(&req.symbol) {
            return vec![req.clone()];
        }
        let symbol = req.symbol.clone();
        let holding = self.holding_mut(&symbol);
        match mode {
            ConvertMode::Plain => vec![req.clone()],
            ConvertMode::TodayFirst => holding.convert_today_first(req),
            ConvertMode::Lock => holding.convert_lock(req),
            ConvertMode::Net => holding.convert_net(req),
        }
    }

    pub fn snapshot(&self, symbol: &Symbol) -> Option<PositionSnapshot> {
        self.holdings.get(symbol).map(PositionHolding::snapshot)
    }
}

impl PositionHolding {
    /// Split a generic close into explicit today/yesterday legs.
    ///
    /// If the requested volume exceeds what is closable the whole request
    /// is dropped with a warning rather than partially submitted.
    fn convert_today_first(&self, req: &OrderRequest) -> Vec<OrderRequest> {
        if req.offset == Offset::Open {
            return vec![req.clone()];
        }

        let avail = self.available(req.direction.opposite());
        if req.volume > avail.pos {
            warn!(
                symbol = %req.symbol,
                requested = req.volume,
                available = avail.pos,
                "close request exceeds available volume, dropping"
            );
            return vec![];
        }

        if req.volume <= avail.td {
            let mut leg = req.clone();
            leg.offset = Offset::CloseToday;
            return vec![leg];
        }

        let mut legs = Vec::new();
        if avail.td > 0.0 {
            let mut td_leg = req.clone();
            td_leg.offset = Offset::CloseToday;
            td_leg.volume = avail.td;
            legs.push(td_leg);
        }
        let mut yd_leg = req.clone();
        yd_leg.offset = Offset::CloseYesterday;
        yd_leg.volume = req.volume - avail.td;
        legs.push(yd_leg);
        legs
    }

    /// Lock mode: when closing would touch today volume on an exchange
    /// without close-today, open an opposing hedge instead.
    fn convert_lock(&self, req: &OrderRequest) -> Vec<OrderRequest> {
        if req.offset == Offset::Open {
            return vec![req.clone()];
        }

        let opposite = req.direction.opposite();
        let td_volume = self.today_volume(opposite);
        if td_volume > 0.0 && !self.closes_yesterday_first() {
            let mut hedge = req.clone();
            hedge.offset = Offset::Open;
            return vec![hedge];
        }

        let yd_available = self.available(opposite).yd;
        let close_volume = req.volume.min(yd_available);
        let open_volume = (req.volume - yd_available).max(0.0);

        let mut legs = Vec::new();
        if close_volume > 0.0 {
            let mut close_leg = req.clone();
            close_leg.offset = if self.closes_yesterday_first() {
                Offset::CloseYesterday
            } else {
                Offset::Close
            };
            close_leg.volume = close_volume;
            legs.push(close_leg);
        }
        if open_volume > 0.0 {
            let mut open_leg = req.clone();
            open_leg.offset = Offset::Open;
            open_leg.volume = open_volume;
            legs.push(open_leg);
        }
        legs
    }

    /// Net mode: treat the request as a target delta, closing what exists
    /// on the opposite side and opening the remainder.
    fn convert_net(&self, req: &OrderRequest) -> Vec<OrderRequest> {
        let avail = self.available(req.direction.opposite());
        let mut legs = Vec::new();
        let mut volume_left = req.volume;

        if self.closes_yesterday_first() {
            // Day-split exchange: emit explicit today then yesterday legs
            if avail.td > 0.0 && volume_left > 0.0 {
                let close_volume = avail.td.min(volume_left);
                volume_left -= close_volume;
                let mut leg = req.clone();
                leg.offset = Offset::CloseToday;
                leg.volume = close_volume;
                legs.push(leg);
            }
            if avail.yd > 0.0 && volume_left > 0.0 {
                let close_volume = avail.yd.min(volume_left);
                volume_left -= close_volume;
                let mut leg = req.clone();
                leg.offset = Offset::CloseYesterday;
                leg.volume = close_volume;
                legs.push(leg);
            }
        } else if avail.pos > 0.0 && volume_left > 0.0 {
            let close_volume = avail.pos.min(volume_left);
            volume_left -= close_volume;
            let mut leg = req.clone();
            leg.offset = Offset::Close;
            leg.volume = close_volume;
            legs.push(leg);
        }

        if volume_left > 0.0 {
            let mut leg = req.clone();
            leg.offset = Offset::Open;
            leg.volume = volume_left;
            legs.push(leg);
        }
        legs
    }
}
