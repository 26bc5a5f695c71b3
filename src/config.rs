//! Run configuration loaded from JSON

use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::oms::ConvertMode;
use crate::{Exchange, Symbol};

/// Static contract metadata for the replayed instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSpec {
    pub symbol: Symbol,
    pub exchange: Exchange,
    /// Contract multiplier (currency per point per lot)
    pub size: f64,
    pub price_tick: f64,
    pub commission_rate: f64,
    /// Netted contracts skip offset conversion entirely
    #[serde(default)]
    pub net_position: bool,
}

impl ContractSpec {
    /// Snap a price to the contract's tick grid
    pub fn round_price(&self, price: f64) -> f64 {
        (price / self.price_tick).round() * self.price_tick
    }
}

fn default_annual_days() -> f64 {
    240.0
}

fn default_day_split_exchanges() -> HashSet<Exchange> {
    HashSet::from([Exchange::Shfe, Exchange::Ine])
}

/// Replay parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestParams {
    /// First date of the replay window (inclusive)
    pub start: NaiveDate,
    /// Last date of the replay window (exclusive)
    pub end: NaiveDate,
    pub capital: f64,
    /// Cost per lot charged on both entry and exit, in price units
    #[serde(default)]
    pub slippage: f64,
    /// Annualized risk-free rate used in the Sharpe ratio
    #[serde(default)]
    pub risk_free: f64,
    #[serde(default = "default_annual_days")]
    pub annual_days: f64,
    #[serde(default)]
    pub convert_mode: ConvertMode,
    /// Exchanges that distinguish close-today from close-yesterday
    #[serde(default = "default_day_split_exchanges")]
    pub day_split_exchanges: HashSet<Exchange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub contract: ContractSpec,
    pub backtest: BacktestParams,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.contract.size <= 0.0 {
            bail!("contract size must be positive, got {}", self.contract.size);
        }
        if self.contract.price_tick <= 0.0 {
            bail!(
                "price tick must be positive, got {}",
                self.contract.price_tick
            );
        }
        if self.contract.commission_rate < 0.0 {
            bail!(
                "commission rate must not be negative, got {}",
                self.contract.commission_rate
            );
        }
        if self.backtest.start >= self.backtest.end {
            bail!(
                "backtest start ({}) must precede end ({})",
                self.backtest.start,
                self.backtest.end
            );
        }
        if self.backtest.capital <= 0.0 {
            bail!("capital must be positive, got {}", self.backtest.capital);
        }
        if self.backtest.slippage < 0.0 {
            bail!(
                "slippage must not be negative, got {}",
                self.backtest.slippage
            );
        }
        if self.backtest.annual_days <= 0.0 {
            bail!(
                "annual days must be positive, got {}",
                self.backtest.annual_days
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "contract": {
                "symbol": "rb2305",
                "exchange": "SHFE",
                "size": 10.0,
                "price_tick": 1.0,
                "commission_rate": 0.0001
            },
            "backtest": {
                "start": "2023-01-03",
                "end": "2023-02-01",
                "capital": 1000000.0,
                "slippage": 0.5
            }
        }"#
    }

    #[test]
    fn parses_with_defaults() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.contract.symbol.as_str(), "rb2305");
        assert!(!config.contract.net_position);
        assert_eq!(config.backtest.annual_days, 240.0);
        assert_eq!(config.backtest.convert_mode, ConvertMode::TodayFirst);
        assert!(config
            .backtest
            .day_split_exchanges
            .contains(&Exchange::Shfe));
        assert!(config.backtest.day_split_exchanges.contains(&Exchange::Ine));
    }

    #[test]
    fn rejects_inverted_date_window() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        config.backtest.end = config.backtest.start;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_contract_size() {
        let mut config: Config = serde_json::from_str(sample_json()).unwrap();
        config.contract.size = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_price_snaps_to_tick_grid() {
        let config: Config = serde_json::from_str(sample_json()).unwrap();
        let mut contract = config.contract;
        contract.price_tick = 0.5;
        assert_eq!(contract.round_price(4000.3), 4000.5);
        assert_eq!(contract.round_price(4000.2), 4000.0);
    }

    #[test]
    fn convert_mode_uses_snake_case_names() {
        let mode: ConvertMode = serde_json::from_str("\"today_first\"").unwrap();
        assert_eq!(mode, ConvertMode::TodayFirst);
        let mode: ConvertMode = serde_json::from_str("\"lock\"").unwrap();
        assert_eq!(mode, ConvertMode::Lock);
    }
}
