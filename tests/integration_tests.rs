//! Integration tests for the tick replay engine
//!
//! These tests drive the whole pipeline (data source, matching engine,
//! offset converter, daily PnL) through real replays over synthetic ticks.

use std::collections::HashSet;

use approx::assert_relative_eq;
use chrono::{NaiveDate, TimeZone, Utc};

use tick_replay::config::{BacktestParams, ContractSpec};
use tick_replay::data::MemoryTickSource;
use tick_replay::oms::ConvertMode;
use tick_replay::replay::{BacktestReport, ReplayEngine};
use tick_replay::strategy::{Actions, BuyAndHoldStrategy, Strategy};
use tick_replay::{Config, Exchange, Offset, Order, OrderStatus, Symbol, Tick};

// =============================================================================
// Test Utilities
// =============================================================================

fn symbol() -> Symbol {
    Symbol::new("rb2305")
}

fn make_config(commission_rate: f64, slippage: f64) -> Config {
    Config {
        contract: ContractSpec {
            symbol: symbol(),
            exchange: Exchange::Shfe,
            size: 10.0,
            price_tick: 1.0,
            commission_rate,
            net_position: false,
        },
        backtest: BacktestParams {
            start: NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            end: NaiveDate::from_ymd_opt(2023, 1, 10).unwrap(),
            capital: 1_000_000.0,
            slippage,
            risk_free: 0.0,
            annual_days: 240.0,
            convert_mode: ConvertMode::TodayFirst,
            day_split_exchanges: HashSet::from([Exchange::Shfe, Exchange::Ine]),
        },
    }
}

fn make_tick(day: u32, hour: u32, minute: u32, price: f64) -> Tick {
    Tick {
        symbol: symbol(),
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

/// Two trading days: entry day around 4000 closing at 4010, exit day
/// around 4020 closing at 4030
fn two_day_ticks() -> Vec<Tick> {
    vec![
        make_tick(3, 9, 0, 4000.0),
        make_tick(3, 9, 1, 4000.0),
        make_tick(3, 14, 59, 4010.0),
        make_tick(4, 9, 0, 4020.0),
        make_tick(4, 9, 1, 4020.0),
        make_tick(4, 14, 59, 4030.0),
    ]
}

fn run_backtest<S: Strategy>(config: Config, ticks: Vec<Tick>, strategy: S) -> BacktestReport {
    let mut engine = ReplayEngine::new(config, MemoryTickSource::new(ticks), strategy);
    engine.run().expect("replay failed")
}

/// Opens long on the first tick and closes the whole position on the
/// first tick of the next date
struct RoundTripStrategy {
    volume: f64,
    entry_date: Option<NaiveDate>,
    entered: bool,
    exited: bool,
}

impl RoundTripStrategy {
    fn new(volume: f64) -> Self {
        Self {
            volume,
            entry_date: None,
            entered: false,
            exited: false,
        }
    }
}

impl Strategy for RoundTripStrategy {
    fn name(&self) -> &str {
        "round_trip"
    }

    fn on_tick(&mut self, tick: &Tick, actions: &mut Actions) {
        if !self.entered {
            actions.buy(tick.ask_price, self.volume);
            self.entered = true;
            self.entry_date = Some(tick.date());
        } else if !self.exited && Some(tick.date()) != self.entry_date {
            actions.sell(tick.bid_price, self.volume);
            self.exited = true;
        }
    }
}

/// Submits a deep resting buy, then cancels it as soon as it is
/// acknowledged
struct CancelAfterAckStrategy {
    submitted: bool,
}

impl Strategy for CancelAfterAckStrategy {
    fn name(&self) -> &str {
        "cancel_after_ack"
    }

    fn on_tick(&mut self, tick: &Tick, actions: &mut Actions) {
        if !self.submitted {
            actions.buy(tick.last_price - 500.0, 1.0);
            self.submitted = true;
        }
    }

    fn on_order(&mut self, order: &Order, actions: &mut Actions) {
        if order.status == OrderStatus::NotTraded {
            actions.cancel(order.id);
        }
    }
}

// =============================================================================
// Full Pipeline Tests
// =============================================================================

#[test]
fn test_round_trip_daily_pnl() {
    let report = run_backtest(
        make_config(0.0, 0.0),
        two_day_ticks(),
        RoundTripStrategy::new(2.0),
    );

    assert_eq!(report.trades.len(), 2);
    // Entry fills at the ask on the tick after submission
    assert_eq!(report.trades[0].price, 4001.0);
    // Exit fills at the bid the same way
    assert_eq!(report.trades[1].price, 4019.0);

    assert_eq!(report.daily.len(), 2);
    let entry_day = &report.daily[0];
    assert_relative_eq!(
        entry_day.trading_pnl.to_f64(),
        2.0 * (4010.0 - 4001.0) * 10.0
    );
    assert_relative_eq!(entry_day.holding_pnl.to_f64(), 0.0);
    assert_eq!(entry_day.end_pos, 2.0);

    let exit_day = &report.daily[1];
    assert_eq!(exit_day.start_pos, 2.0);
    assert_eq!(exit_day.end_pos, 0.0);
    assert_relative_eq!(exit_day.holding_pnl.to_f64(), 2.0 * (4030.0 - 4010.0) * 10.0);
    assert_relative_eq!(
        exit_day.trading_pnl.to_f64(),
        -2.0 * (4030.0 - 4019.0) * 10.0
    );

    assert_relative_eq!(report.statistics.total_net_pnl, 180.0 + 400.0 - 220.0);
}

#[test]
fn test_close_intent_becomes_close_today_leg() {
    // The generic sell-close must reach the book as an explicit
    // close-today leg under today-first conversion
    let report = run_backtest(
        make_config(0.0, 0.0),
        two_day_ticks(),
        RoundTripStrategy::new(2.0),
    );

    let offsets: Vec<Offset> = report.orders.iter().map(|o| o.offset).collect();
    assert_eq!(offsets, vec![Offset::Open, Offset::CloseToday]);

    let position = report.position.expect("position tracked");
    assert_eq!(position.long_total, 0.0);
    assert_eq!(position.short_total, 0.0);
    assert_eq!(position.long_frozen, 0.0);
}

#[test]
fn test_commission_and_slippage_accumulate() {
    let report = run_backtest(
        make_config(0.0001, 0.5),
        two_day_ticks(),
        RoundTripStrategy::new(2.0),
    );

    // Turnover: (4001 + 4019) * 2 lots * size 10
    let expected_turnover = (4001.0 + 4019.0) * 2.0 * 10.0;
    let expected_commission = expected_turnover * 0.0001;
    // Slippage: 2 lots * size 10 * 0.5, charged on entry and exit
    let expected_slippage = 2.0 * 2.0 * 10.0 * 0.5;

    assert_relative_eq!(report.statistics.total_turnover, expected_turnover);
    assert_relative_eq!(report.statistics.total_commission, expected_commission);
    assert_relative_eq!(report.statistics.total_slippage, expected_slippage);
    assert_eq!(report.statistics.total_trade_count, 2);
}

#[test]
fn test_buy_and_hold_statistics() {
    let report = run_backtest(
        make_config(0.0, 0.0),
        two_day_ticks(),
        BuyAndHoldStrategy::new(1.0),
    );

    // Entry at 4001, marked at 4010 then 4030
    assert_relative_eq!(report.statistics.total_net_pnl, (4030.0 - 4001.0) * 10.0);
    assert_relative_eq!(
        report.statistics.end_balance,
        1_000_000.0 + (4030.0 - 4001.0) * 10.0
    );
    assert_eq!(report.statistics.total_days, 2);
    assert_eq!(report.statistics.profit_days, 2);
    assert!(!report.statistics.equity_breached);

    let position = report.position.expect("position tracked");
    assert_eq!(position.long_total, 1.0);
}

#[test]
fn test_identical_runs_produce_identical_reports() {
    let run = || {
        run_backtest(
            make_config(0.0001, 0.5),
            two_day_ticks(),
            RoundTripStrategy::new(2.0),
        )
    };
    let first = serde_json::to_string(&run()).unwrap();
    let second = serde_json::to_string(&run()).unwrap();
    assert_eq!(first, second);
}

// =============================================================================
// Order Lifecycle Tests
// =============================================================================

#[test]
fn test_cancel_after_acknowledgment() {
    let report = run_backtest(
        make_config(0.0, 0.0),
        two_day_ticks(),
        CancelAfterAckStrategy { submitted: false },
    );

    assert!(report.trades.is_empty());
    assert_eq!(report.orders.len(), 1);
    assert_eq!(report.orders[0].status, OrderStatus::Cancelled);
    assert_relative_eq!(report.statistics.total_net_pnl, 0.0);
}

#[test]
fn test_one_tick_latency_before_fill() {
    let report = run_backtest(
        make_config(0.0, 0.0),
        two_day_ticks(),
        BuyAndHoldStrategy::new(1.0),
    );

    // Submitted on the first tick; the fill carries the second tick's time
    let submit_time = Utc.with_ymd_and_hms(2023, 1, 3, 9, 0, 0).unwrap();
    let fill_time = Utc.with_ymd_and_hms(2023, 1, 3, 9, 1, 0).unwrap();
    assert_eq!(report.orders[0].datetime, submit_time);
    assert_eq!(report.trades[0].datetime, fill_time);
}

// =============================================================================
// Data Validation Tests
// =============================================================================

#[test]
fn test_backwards_timestamp_aborts_run() {
    let ticks = vec![
        make_tick(3, 9, 1, 4000.0),
        make_tick(3, 9, 0, 4000.0),
    ];
    let mut engine = ReplayEngine::new(
        make_config(0.0, 0.0),
        MemoryTickSource::new(ticks),
        BuyAndHoldStrategy::new(1.0),
    );
    let err = engine.run().unwrap_err();
    assert!(err.to_string().contains("out of order"));
}

#[test]
fn test_duplicate_timestamp_aborts_run() {
    let ticks = vec![
        make_tick(3, 9, 0, 4000.0),
        make_tick(3, 9, 0, 4001.0),
    ];
    let mut engine = ReplayEngine::new(
        make_config(0.0, 0.0),
        MemoryTickSource::new(ticks),
        BuyAndHoldStrategy::new(1.0),
    );
    assert!(engine.run().is_err());
}

#[test]
fn test_window_boundaries_are_half_open() {
    let mut ticks = two_day_ticks();
    // Before the window and exactly on the exclusive end date
    ticks.insert(0, make_tick(2, 9, 0, 3990.0));
    ticks.push(make_tick(10, 9, 0, 4100.0));

    let report = run_backtest(make_config(0.0, 0.0), ticks, BuyAndHoldStrategy::new(1.0));
    let dates: Vec<NaiveDate> = report.daily.iter().map(|d| d.date).collect();
    assert_eq!(
        dates,
        vec![
            NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 4).unwrap(),
        ]
    );
}
