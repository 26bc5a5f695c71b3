//! Typed FIFO event bus
//!
//! Single-threaded backbone connecting the matching engine, accounting
//! engines, and strategy. Producers publish owned snapshots; the replay
//! driver drains the queue and routes each event to its consumers, so
//! everything derived from one tick is delivered in publication order.

use std::collections::VecDeque;

use crate::{Order, Tick, Trade};

/// Engine events. Each variant carries an owned copy, never a handle into
/// engine state.
#[derive(Debug, Clone)]
pub enum Event {
    Tick(Tick),
    Order(Order),
    Trade(Trade),
}

#[derive(Debug, Default)]
pub struct EventBus {
    queue: VecDeque<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Next event in FIFO order
    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
