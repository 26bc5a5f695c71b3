//! Order management: position bookkeeping and offset conversion

pub mod converter;
pub mod position;

pub use converter::{ConvertMode, OffsetConverter};
pub use position::{Available, PositionHolding, PositionSnapshot};
