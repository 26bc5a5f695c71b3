//! Per-instrument position ledger with today/yesterday and frozen buckets
//!
//! Chinese futures exchanges split a position into the part opened during
//! the current session (today) and the part carried over (yesterday), and
//! freeze whatever is reserved by open closing orders. This module keeps
//! those buckets consistent as fills and order updates arrive.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::{Direction, EngineError, Exchange, Offset, Order, OrderId, Symbol, Trade};

/// Volume available for closing on one side, after frozen reservations
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Available {
    pub pos: f64,
    pub td: f64,
    pub yd: f64,
}

/// Immutable copy of a holding published to external consumers
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub long_total: f64,
    pub long_today: f64,
    pub long_yesterday: f64,
    pub long_frozen: f64,
    pub short_total: f64,
    pub short_today: f64,
    pub short_yesterday: f64,
    pub short_frozen: f64,
}

/// Detailed position state for one instrument.
///
/// Totals are derived (`total = today + yesterday` holds by construction);
/// frozen buckets are recomputed from scratch from the active closing
/// orders on every order-state change, never decremented incrementally,
/// so they cannot drift.
#[derive(Debug)]
pub struct PositionHolding {
    symbol: Symbol,
    exchange: Exchange,
    /// Generic close consumes the yesterday bucket first (the convention of
    /// exchanges that distinguish close-today from close-yesterday)
    yd_first: bool,

    long_td: f64,
    long_yd: f64,
    short_td: f64,
    short_yd: f64,

    long_td_frozen: f64,
    long_yd_frozen: f64,
    short_td_frozen: f64,
    short_yd_frozen: f64,

    active_orders: BTreeMap<OrderId, Order>,
}

impl PositionHolding {
    pub fn new(symbol: Symbol, exchange: Exchange, yd_first: bool) -> Self {
        Self {
            symbol,
            exchange,
            yd_first,
            long_td: 0.0,
            long_yd: 0.0,
            short_td: 0.0,
            short_yd: 0.0,
            long_td_frozen: 0.0,
            long_yd_frozen: 0.0,
            short_td_frozen: 0.0,
            short_yd_frozen: 0.0,
            active_orders: BTreeMap::new(),
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn exchange(&self) -> Exchange {
        self.exchange
    }

    pub fn closes_yesterday_first(&self) -> bool {
        self.yd_first
    }

    pub fn long_pos(&self) -> f64 {
        self.long_td + self.long_yd
    }

    pub fn short_pos(&self) -> f64 {
        self.short_td + self.short_yd
    }

    pub fn long_frozen(&self) -> f64 {
        self.long_td_frozen + self.long_yd_frozen
    }

    pub fn short_frozen(&self) -> f64 {
        self.short_td_frozen + self.short_yd_frozen
    }

    /// Raw today volume on one side, ignoring frozen reservations
    pub fn today_volume(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Long => self.long_td,
            Direction::Short => self.short_td,
        }
    }

    /// Closable volume on one side after frozen reservations
    pub fn available(&self, direction: Direction) -> Available {
        match direction {
            Direction::Long => Available {
                pos: self.long_pos() - self.long_frozen(),
                td: self.long_td - self.long_td_frozen,
                yd: self.long_yd - self.long_yd_frozen,
            },
            Direction::Short => Available {
                pos: self.short_pos() - self.short_frozen(),
                td: self.short_td - self.short_td_frozen,
                yd: self.short_yd - self.short_yd_frozen,
            },
        }
    }

    /// Seed the holding from an externally known position (start-of-run
    /// state or broker reconciliation). Today volume is the remainder.
    pub fn apply_position(&mut self, direction: Direction, volume: f64, yd_volume: f64) {
        match direction {
            Direction::Long => {
                self.long_yd = yd_volume;
                self.long_td = volume - yd_volume;
            }
            Direction::Short => {
                self.short_yd = yd_volume;
                self.short_td = volume - yd_volume;
            }
        }
    }

    /// Apply a fill to the day buckets.
    ///
    /// Opens add to today on the fill's own side; closes reduce the
    /// opposite side. A generic close consumes one bucket and spills the
    /// remainder into the other per the exchange's day policy; if the
    /// spill bucket would also go negative the fill is rejected as an
    /// accounting violation and the run must stop.
    pub fn update_from_fill(&mut self, trade: &Trade) -> Result<(), EngineError> {
        match (trade.direction, trade.offset) {
            (Direction::Long, Offset::Open) => self.long_td += trade.volume,
            (Direction::Short, Offset::Open) => self.short_td += trade.volume,

            (Direction::Long, Offset::CloseToday) => {
                self.short_td -= trade.volume;
                if self.short_td < 0.0 {
                    return Err(self.violation(Direction::Short, "today", self.short_td, trade));
                }
            }
            (Direction::Long, Offset::CloseYesterday) => {
                self.short_yd -= trade.volume;
                if self.short_yd < 0.0 {
                    return Err(self.violation(Direction::Short, "yesterday", self.short_yd, trade));
                }
            }
            (Direction::Short, Offset::CloseToday) => {
                self.long_td -= trade.volume;
                if self.long_td < 0.0 {
                    return Err(self.violation(Direction::Long, "today", self.long_td, trade));
                }
            }
            (Direction::Short, Offset::CloseYesterday) => {
                self.long_yd -= trade.volume;
                if self.long_yd < 0.0 {
                    return Err(self.violation(Direction::Long, "yesterday", self.long_yd, trade));
                }
            }

            (Direction::Long, Offset::Close) => self.close_generic(Direction::Short, trade)?,
            (Direction::Short, Offset::Close) => self.close_generic(Direction::Long, trade)?,
        }

        debug!(
            symbol = %self.symbol,
            long = self.long_pos(),
            short = self.short_pos(),
            "position updated from fill"
        );
        self.clamp_frozen();
        Ok(())
    }

    fn close_generic(&mut self, side: Direction, trade: &Trade) -> Result<(), EngineError> {
        let yd_first = self.yd_first;
        let (td, yd) = match side {
            Direction::Long => (&mut self.long_td, &mut self.long_yd),
            Direction::Short => (&mut self.short_td, &mut self.short_yd),
        };
        let (first, second, second_name) = if yd_first {
            (yd, td, "today")
        } else {
            (td, yd, "yesterday")
        };

        *first -= trade.volume;
        if *first < 0.0 {
            *second += *first;
            *first = 0.0;
        }
        let spilled = *second;
        if spilled < 0.0 {
            return Err(self.violation(side, second_name, spilled, trade));
        }
        Ok(())
    }

    fn violation(
        &self,
        direction: Direction,
        bucket: &'static str,
        volume: f64,
        trade: &Trade,
    ) -> EngineError {
        EngineError::AccountingViolation {
            symbol: self.symbol.clone(),
            direction,
            bucket,
            volume,
            trade_id: trade.id,
        }
    }

    /// Track the order in the active set (or drop it when terminal) and
    /// rebuild the frozen buckets from what remains.
    pub fn update_from_order(&mut self, order: &Order) {
        if order.is_active() {
            self.active_orders.insert(order.id, order.clone());
        } else {
            self.active_orders.remove(&order.id);
        }
        self.recalc_frozen();
    }

    /// Rebuild frozen volume from every active closing order.
    fn recalc_frozen(&mut self) {
        self.long_td_frozen = 0.0;
        self.long_yd_frozen = 0.0;
        self.short_td_frozen = 0.0;
        self.short_yd_frozen = 0.0;

        let yd_first = self.yd_first;
        for order in self.active_orders.values() {
            if order.offset == Offset::Open {
                continue;
            }
            let frozen = order.remaining();
            // A closing order reserves volume on the side opposite its direction
            match (order.direction, order.offset) {
                (Direction::Long, Offset::CloseToday) => self.short_td_frozen += frozen,
                (Direction::Long, Offset::CloseYesterday) => self.short_yd_frozen += frozen,
                (Direction::Short, Offset::CloseToday) => self.long_td_frozen += frozen,
                (Direction::Short, Offset::CloseYesterday) => self.long_yd_frozen += frozen,
                (Direction::Long, Offset::Close) => {
                    if yd_first {
                        freeze_with_overflow(
                            &mut self.short_yd_frozen,
                            self.short_yd,
                            &mut self.short_td_frozen,
                            frozen,
                        );
                    } else {
                        freeze_with_overflow(
                            &mut self.short_td_frozen,
                            self.short_td,
                            &mut self.short_yd_frozen,
                            frozen,
                        );
                    }
                }
                (Direction::Short, Offset::Close) => {
                    if yd_first {
                        freeze_with_overflow(
                            &mut self.long_yd_frozen,
                            self.long_yd,
                            &mut self.long_td_frozen,
                            frozen,
                        );
                    } else {
                        freeze_with_overflow(
                            &mut self.long_td_frozen,
                            self.long_td,
                            &mut self.long_yd_frozen,
                            frozen,
                        );
                    }
                }
                (_, Offset::Open) => unreachable!("open orders skipped above"),
            }
        }
        self.clamp_frozen();
    }

    /// Frozen volume must never exceed the bucket it reserves.
    fn clamp_frozen(&mut self) {
        self.long_td_frozen = self.long_td_frozen.min(self.long_td);
        self.long_yd_frozen = self.long_yd_frozen.min(self.long_yd);
        self.short_td_frozen = self.short_td_frozen.min(self.short_td);
        self.short_yd_frozen = self.short_yd_frozen.min(self.short_yd);
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            long_total: self.long_pos(),
            long_today: self.long_td,
            long_yesterday: self.long_yd,
            long_frozen: self.long_frozen(),
            short_total: self.short_pos(),
            short_today: self.short_td,
            short_yesterday: self.short_yd,
            short_frozen: self.short_frozen(),
        }
    }
}

fn freeze_with_overflow(first: &mut f64, first_total: f64, second: &mut f64, frozen: f64) {
    *first += frozen;
    if *first > first_total {
        *second += *first - first_total;
        *first = first_total;
    }
}
