//! Replay driver: feeds recorded ticks through matching, accounting, and
//! the strategy, then rolls up daily PnL
//!
//! Each tick starts a cascade: the strategy sees the tick first, then the
//! matching engine crosses the book as it stood before this tick, and the
//! resulting order and trade events are routed until the bus drains. Only
//! then are the strategy's buffered actions submitted, so new orders rest
//! until the next tick while cancels act within the same cascade.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Config;
use crate::data::TickSource;
use crate::event::{Event, EventBus};
use crate::matching::MatchingEngine;
use crate::oms::{OffsetConverter, PositionSnapshot};
use crate::pnl::{BacktestStatistics, DailyPnl, DailyResult};
use crate::strategy::{Actions, Strategy};
use crate::{EngineError, Order, Tick, Trade};

/// Everything a completed run produces
#[derive(Debug, Serialize)]
pub struct BacktestReport {
    pub statistics: BacktestStatistics,
    pub daily: Vec<DailyResult>,
    pub orders: Vec<Order>,
    pub trades: Vec<Trade>,
    pub position: Option<PositionSnapshot>,
}

pub struct ReplayEngine<D: TickSource, S: Strategy> {
    config: Config,
    source: D,
    strategy: S,
    bus: EventBus,
    matching: MatchingEngine,
    converter: OffsetConverter,
    pnl: DailyPnl,
    actions: Actions,
}

impl<D: TickSource, S: Strategy> ReplayEngine<D, S> {
    pub fn new(config: Config, source: D, strategy: S) -> Self {
        let mut converter = OffsetConverter::new(config.backtest.day_split_exchanges.clone());
        converter.register(&config.contract);
        let actions = Actions::new(config.contract.symbol.clone(), config.contract.exchange);
        Self {
            config,
            source,
            strategy,
            bus: EventBus::new(),
            matching: MatchingEngine::new(),
            converter,
            pnl: DailyPnl::new(),
            actions,
        }
    }

    /// Replay the configured window and produce the report.
    ///
    /// Order-level rejections are logged and skipped; accounting violations
    /// and out-of-order data abort the run.
    pub fn run(&mut self) -> Result<BacktestReport> {
        let contract = self.config.contract.clone();
        info!(
            strategy = self.strategy.name(),
            symbol = %contract.symbol,
            start = %self.config.backtest.start,
            end = %self.config.backtest.end,
            "starting replay"
        );

        self.strategy.on_init();
        let ticks = self.load_history()?;
        self.strategy.on_start();

        for tick in &ticks {
            self.process_tick(tick)
                .with_context(|| format!("replay aborted at {}", tick.datetime))?;
        }

        self.strategy.on_stop();

        self.pnl.rollup(
            contract.size,
            contract.commission_rate,
            self.config.backtest.slippage,
        );
        let statistics = self.pnl.statistics(
            self.config.backtest.capital,
            self.config.backtest.risk_free,
            self.config.backtest.annual_days,
        );
        statistics.log();

        Ok(BacktestReport {
            statistics,
            daily: self.pnl.results().values().cloned().collect(),
            orders: self.matching.orders(),
            trades: self.matching.trades().to_vec(),
            position: self.converter.snapshot(&contract.symbol),
        })
    }

    /// Load the window in batches, with progress, and verify timestamps are
    /// strictly increasing across the whole stream.
    fn load_history(&mut self) -> Result<Vec<Tick>> {
        let symbol = self.config.contract.symbol.clone();
        let start = self.config.backtest.start.and_time(NaiveTime::MIN).and_utc();
        let end = self.config.backtest.end.and_time(NaiveTime::MIN).and_utc();

        let total_days = (self.config.backtest.end - self.config.backtest.start)
            .num_days()
            .max(1);
        let batch_days = (total_days / 10).max(1);

        let bar = ProgressBar::new(total_days as u64);
        bar.set_style(
            ProgressStyle::with_template("loading {bar:40} {pos}/{len} days")
                .context("bad progress bar template")?,
        );

        let mut ticks = Vec::new();
        let mut batch_start = start;
        while batch_start < end {
            let batch_end = (batch_start + TimeDelta::days(batch_days)).min(end);
            let batch = self.source.load(&symbol, batch_start, batch_end)?;
            ticks.extend(batch);
            bar.inc((batch_end - batch_start).num_days() as u64);
            batch_start = batch_end;
        }
        bar.finish_and_clear();

        for (prev, next) in ticks.iter().tuple_windows() {
            if next.datetime <= prev.datetime {
                return Err(EngineError::DataGap {
                    symbol: symbol.clone(),
                    prev: prev.datetime,
                    next: next.datetime,
                }
                .into());
            }
        }

        info!(count = ticks.len(), "history loaded");
        Ok(ticks)
    }

    /// One tick's cascade, drained to quiescence.
    ///
    /// Buffered actions are submitted only once the bus is empty, so a new
    /// order always enters the book after this tick's matching pass: it is
    /// acknowledged, and can first fill, one tick later. Cancels take
    /// effect within the same cascade.
    fn process_tick(&mut self, tick: &Tick) -> Result<()> {
        self.pnl.on_tick(tick);
        let now = tick.datetime;
        self.bus.publish(Event::Tick(tick.clone()));

        loop {
            while let Some(event) = self.bus.pop() {
                match event {
                    Event::Tick(t) => {
                        // The strategy sees the tick before any order or
                        // trade event the tick gives rise to
                        self.strategy.on_tick(&t, &mut self.actions);
                        self.matching.on_tick(&t, &mut self.bus);
                    }
                    Event::Order(order) => {
                        self.converter.update_order(&order);
                        self.strategy.on_order(&order, &mut self.actions);
                    }
                    Event::Trade(trade) => {
                        self.converter.update_trade(&trade)?;
                        self.pnl.on_trade(&trade);
                        self.strategy.on_trade(&trade, &mut self.actions);
                    }
                }
            }
            if self.actions.is_empty() {
                break;
            }
            self.submit_actions(now)?;
        }
        Ok(())
    }

    /// Convert and submit everything the strategy buffered.
    ///
    /// Validation rejections drop the single order; cancel misses are
    /// logged. Neither stops the run.
    fn submit_actions(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.actions.is_empty() {
            return Ok(());
        }
        let (orders, cancels) = self.actions.drain();

        for mut req in orders {
            req.price = self.config.contract.round_price(req.price);
            let legs = self.converter.convert(&req, self.config.backtest.convert_mode);
            for leg in legs {
                match self.matching.submit(&leg, now) {
                    Ok(id) => self.converter.update_order_request(&leg, id, now),
                    Err(err @ (EngineError::InvalidVolume(_) | EngineError::InvalidPrice(_))) => {
                        warn!(error = %err, symbol = %leg.symbol, "order rejected");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        for cancel in cancels {
            if let Err(err) = self.matching.cancel(cancel.order_id, &mut self.bus) {
                warn!(error = %err, order_id = cancel.order_id, "cancel failed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BacktestParams, ContractSpec};
    use crate::data::MemoryTickSource;
    use crate::oms::ConvertMode;
    use crate::strategy::BuyAndHoldStrategy;
    use crate::{Exchange, OrderStatus, Symbol};
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashSet;

    fn config() -> Config {
        Config {
            contract: ContractSpec {
                symbol: Symbol::new("rb2305"),
                exchange: Exchange::Shfe,
                size: 10.0,
                price_tick: 1.0,
                commission_rate: 0.0,
                net_position: false,
            },
            backtest: BacktestParams {
                start: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
                end: NaiveDate::from_ymd_opt(2023, 1, 5).unwrap(),
                capital: 1_000_000.0,
                slippage: 0.0,
                risk_free: 0.0,
                annual_days: 240.0,
                convert_mode: ConvertMode::TodayFirst,
                day_split_exchanges: HashSet::from([Exchange::Shfe, Exchange::Ine]),
            },
        }
    }

    fn tick(day: u32, hour: u32, minute: u32, price: f64) -> Tick {
        Tick {
            symbol: Symbol::new("rb2305"),
            exchange: Exchange::Shfe,
            datetime: Utc.with_ymd_and_hms(2023, 1, day, hour, minute, 0).unwrap(),
            last_price: price,
            bid_price: price - 1.0,
            ask_price: price + 1.0,
            bid_volume: 10.0,
            ask_volume: 10.0,
            volume: 100.0,
            turnover: 0.0,
            open_interest: 0.0,
        }
    }

    #[test]
    fn buy_and_hold_fills_on_second_tick() {
        let ticks = vec![
            tick(3, 9, 0, 4000.0),
            tick(3, 9, 1, 4000.0),
            tick(3, 14, 59, 4010.0),
        ];
        let mut engine = ReplayEngine::new(
            config(),
            MemoryTickSource::new(ticks),
            BuyAndHoldStrategy::new(2.0),
        );

        let report = engine.run().unwrap();
        // Submitted on tick 1, acknowledged and filled on tick 2
        assert_eq!(report.trades.len(), 1);
        assert_eq!(report.trades[0].price, 4001.0);
        assert_eq!(report.orders[0].status, OrderStatus::AllTraded);
        let position = report.position.unwrap();
        assert_eq!(position.long_total, 2.0);
        assert_eq!(position.long_today, 2.0);
    }

    #[test]
    fn identical_input_produces_identical_reports() {
        let ticks = vec![
            tick(3, 9, 0, 4000.0),
            tick(3, 9, 1, 4000.0),
            tick(3, 14, 59, 4010.0),
            tick(4, 14, 59, 4025.0),
        ];

        let run = || {
            let mut engine = ReplayEngine::new(
                config(),
                MemoryTickSource::new(ticks.clone()),
                BuyAndHoldStrategy::new(2.0),
            );
            engine.run().unwrap()
        };
        let a = run();
        let b = run();

        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn out_of_order_ticks_abort_the_run() {
        let ticks = vec![
            tick(3, 9, 1, 4000.0),
            tick(3, 9, 0, 4000.0), // goes backwards
        ];
        let mut engine = ReplayEngine::new(
            config(),
            MemoryTickSource::new(ticks),
            BuyAndHoldStrategy::new(1.0),
        );

        let err = engine.run().unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn ticks_outside_window_are_ignored() {
        let ticks = vec![
            tick(2, 9, 0, 3990.0), // before the window
            tick(3, 9, 0, 4000.0),
            tick(3, 9, 1, 4000.0),
            tick(5, 9, 0, 4100.0), // on the exclusive end date
        ];
        let mut engine = ReplayEngine::new(
            config(),
            MemoryTickSource::new(ticks),
            BuyAndHoldStrategy::new(1.0),
        );

        let report = engine.run().unwrap();
        assert_eq!(report.daily.len(), 1);
        assert_eq!(
            report.daily[0].date,
            NaiveDate::from_ymd_opt(2023, 1, 3).unwrap()
        );
    }

    #[test]
    fn empty_window_yields_empty_report() {
        let mut engine = ReplayEngine::new(
            config(),
            MemoryTickSource::new(vec![]),
            BuyAndHoldStrategy::new(1.0),
        );
        let report = engine.run().unwrap();
        assert!(report.trades.is_empty());
        assert_eq!(report.statistics.total_days, 0);
        assert_eq!(report.statistics.end_balance, 1_000_000.0);
    }
}
