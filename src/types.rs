//! Core data types used across the backtesting engine

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order id, unique and monotonically increasing per matching-engine instance
pub type OrderId = u64;

/// Trade id, unique and monotonically increasing per matching-engine instance
pub type TradeId = u64;

/// Engine error taxonomy.
///
/// `InvalidVolume`/`InvalidPrice` are order-level rejections and recoverable.
/// `OrderNotFound` is reported to the caller but never fatal. The accounting
/// and data-ordering variants abort the run: continuing past them would mean
/// replaying on corrupted state.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order volume ({0}) must be positive")]
    InvalidVolume(f64),

    #[error("order price ({0}) must be positive")]
    InvalidPrice(f64),

    #[error("order {0} not found or already terminal")]
    OrderNotFound(OrderId),

    #[error(
        "accounting violation on {symbol} {direction} {bucket} bucket: \
         volume would fall to {volume} (trade {trade_id})"
    )]
    AccountingViolation {
        symbol: Symbol,
        direction: Direction,
        bucket: &'static str,
        volume: f64,
        trade_id: TradeId,
    },

    #[error("tick data out of order for {symbol}: {prev} followed by {next}")]
    DataGap {
        symbol: Symbol,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    },
}

/// Instrument symbol using Arc<str> for cheap cloning.
///
/// Symbols ride on every tick, order, and trade; Arc keeps the per-clone
/// cost at a refcount bump instead of a heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Symbol {
    pub fn new(s: impl AsRef<str>) -> Self {
        Symbol(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Futures exchanges carried on contracts and ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// China Financial Futures Exchange
    Cffex,
    /// Shanghai Futures Exchange
    Shfe,
    /// Zhengzhou Commodity Exchange
    Czce,
    /// Dalian Commodity Exchange
    Dce,
    /// Shanghai International Energy Exchange
    Ine,
    /// Guangzhou Futures Exchange
    Gfex,
    /// Locally generated data
    Local,
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Exchange::Cffex => "CFFEX",
            Exchange::Shfe => "SHFE",
            Exchange::Czce => "CZCE",
            Exchange::Dce => "DCE",
            Exchange::Ine => "INE",
            Exchange::Gfex => "GFEX",
            Exchange::Local => "LOCAL",
        };
        write!(f, "{name}")
    }
}

/// Direction of an order, trade, or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Whether an order opens a new position or closes an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Offset {
    Open,
    /// Generic close; the accounting engine picks the day bucket
    Close,
    CloseToday,
    CloseYesterday,
}

/// Order state machine
///
/// submitting -> not-traded -> [part-traded] -> all-traded | cancelled | rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted by the engine, not yet acknowledged (one tick of latency)
    Submitting,
    /// Acknowledged, resting in the book
    NotTraded,
    /// Partially filled; kept for ledger completeness, the matcher itself
    /// only produces full fills
    PartTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            OrderStatus::Submitting | OrderStatus::NotTraded | OrderStatus::PartTraded
        )
    }
}

/// Level-1 market data snapshot. Immutable once published; superseded by the
/// next tick for the same instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub datetime: DateTime<Utc>,
    pub last_price: f64,
    pub bid_price: f64,
    pub ask_price: f64,
    pub bid_volume: f64,
    pub ask_volume: f64,
    /// Cumulative session volume
    pub volume: f64,
    /// Cumulative session turnover
    pub turnover: f64,
    pub open_interest: f64,
}

impl Tick {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date_naive()
    }
}

/// A limit order as tracked by the matching engine.
///
/// Owned exclusively by the engine until terminal status; consumers only
/// ever see clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub traded: f64,
    pub status: OrderStatus,
    pub datetime: DateTime<Utc>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Volume still resting in the book
    pub fn remaining(&self) -> f64 {
        self.volume - self.traded
    }
}

/// A fill. Immutable once created; append-only into the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
    pub datetime: DateTime<Utc>,
}

impl Trade {
    pub fn date(&self) -> NaiveDate {
        self.datetime.date_naive()
    }

    /// Signed position delta: +volume for long fills, -volume for short
    pub fn position_change(&self) -> f64 {
        match self.direction {
            Direction::Long => self.volume,
            Direction::Short => -self.volume,
        }
    }
}

/// Order intent produced by a strategy, before offset conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub exchange: Exchange,
    pub direction: Direction,
    pub offset: Offset,
    pub price: f64,
    pub volume: f64,
}

impl OrderRequest {
    /// Materialize the order the matching engine will track for this request
    pub fn create_order(&self, id: OrderId, datetime: DateTime<Utc>) -> Order {
        Order {
            id,
            symbol: self.symbol.clone(),
            exchange: self.exchange,
            direction: self.direction,
            offset: self.offset,
            price: self.price,
            volume: self.volume,
            traded: 0.0,
            status: OrderStatus::Submitting,
            datetime,
        }
    }
}

/// Cancel intent produced by a strategy
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CancelRequest {
    pub order_id: OrderId,
}

// ============================================================================
// Money - precise decimal arithmetic for PnL accumulators
// ============================================================================

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Decimal wrapper for monetary accumulators (turnover, commission, PnL).
///
/// Per-trade terms enter as f64 exactly once; accumulation happens in
/// `Decimal` so thousands of trades cannot drift the daily ledger the way
/// repeated f64 addition would.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::str")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// NaN and infinities collapse to zero; bad ticks must not poison the ledger.
    pub fn from_f64(value: f64) -> Self {
        Money(Decimal::from_f64_retain(value).unwrap_or(Decimal::ZERO))
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn inner(self) -> Decimal {
        self.0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Mul for Money {
    type Output = Money;
    fn mul(self, rhs: Money) -> Money {
        Money(self.0 * rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, x| acc + *x)
    }
}
