//! Tick data sources
//!
//! A [`TickSource`] hands the replay driver ticks for a half-open time
//! window. The CSV source parses the whole file up front and serves window
//! queries from memory; the in-memory source exists for tests and for
//! callers that synthesize data.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::{Exchange, Symbol, Tick};

/// Provider of tick history for one instrument.
///
/// `load` returns every tick with `start <= datetime < end`, in file order.
pub trait TickSource {
    fn load(&mut self, symbol: &Symbol, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Tick>>;
}

#[derive(Debug, Deserialize)]
struct CsvTickRecord {
    datetime: String,
    last_price: f64,
    bid_price: f64,
    ask_price: f64,
    bid_volume: f64,
    ask_volume: f64,
    volume: f64,
    turnover: f64,
    open_interest: f64,
}

const CSV_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Tick history backed by a CSV file with a header row:
/// `datetime,last_price,bid_price,ask_price,bid_volume,ask_volume,volume,turnover,open_interest`
#[derive(Debug)]
pub struct CsvTickSource {
    ticks: Vec<Tick>,
}

impl CsvTickSource {
    pub fn open(path: &str, symbol: Symbol, exchange: Exchange) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("Failed to open tick data file: {path}"))?;

        let mut ticks = Vec::new();
        for (line, record) in reader.deserialize().enumerate() {
            let record: CsvTickRecord = record
                .with_context(|| format!("Failed to parse tick record {line} in {path}"))?;
            let datetime = NaiveDateTime::parse_from_str(&record.datetime, CSV_DATETIME_FORMAT)
                .with_context(|| {
                    format!("Bad datetime {:?} at record {line} in {path}", record.datetime)
                })?
                .and_utc();
            ticks.push(Tick {
                symbol: symbol.clone(),
                exchange,
                datetime,
                last_price: record.last_price,
                bid_price: record.bid_price,
                ask_price: record.ask_price,
                bid_volume: record.bid_volume,
                ask_volume: record.ask_volume,
                volume: record.volume,
                turnover: record.turnover,
                open_interest: record.open_interest,
            });
        }

        info!(path, count = ticks.len(), "tick data loaded");
        Ok(Self { ticks })
    }
}

impl TickSource for CsvTickSource {
    fn load(
        &mut self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>> {
        Ok(self
            .ticks
            .iter()
            .filter(|t| &t.symbol == symbol && t.datetime >= start && t.datetime < end)
            .cloned()
            .collect())
    }
}

/// In-memory tick history
#[derive(Debug, Default)]
pub struct MemoryTickSource {
    ticks: Vec<Tick>,
}

impl MemoryTickSource {
    pub fn new(ticks: Vec<Tick>) -> Self {
        Self { ticks }
    }
}

impl TickSource for MemoryTickSource {
    fn load(
        &mut self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Tick>> {
        Ok(self
            .ticks
            .iter()
            .filter(|t| &t.symbol == symbol && t.datetime >= start && t.datetime < end)
            .cloned()
            .collect())
    }
}
