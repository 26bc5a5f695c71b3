//! Daily mark-to-market PnL ledger and run statistics
//!
//! Every calendar date with at least one tick gets a [`DailyResult`] keyed
//! in a `BTreeMap`, so iteration is always chronological. Fills are
//! attributed to the date they happen; at the end of the run the ledger is
//! rolled up day by day, each day marking its carried position from the
//! previous close to its own close and its fills from fill price to close.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{info, warn};

use crate::{Money, Tick, Trade};

/// Mark-to-market result for one trading date
#[derive(Debug, Clone, Serialize)]
pub struct DailyResult {
    pub date: NaiveDate,
    pub close_price: f64,
    pub pre_close: f64,
    pub start_pos: f64,
    pub end_pos: f64,
    pub trade_count: usize,
    pub turnover: Money,
    pub commission: Money,
    pub slippage: Money,
    /// PnL from positions changed today, marked from fill price to close
    pub trading_pnl: Money,
    /// PnL from the carried position, marked from previous close to close
    pub holding_pnl: Money,
    pub total_pnl: Money,
    pub net_pnl: Money,
    #[serde(skip)]
    trades: Vec<Trade>,
}

impl DailyResult {
    fn new(date: NaiveDate, close_price: f64) -> Self {
        Self {
            date,
            close_price,
            pre_close: 0.0,
            start_pos: 0.0,
            end_pos: 0.0,
            trade_count: 0,
            turnover: Money::ZERO,
            commission: Money::ZERO,
            slippage: Money::ZERO,
            trading_pnl: Money::ZERO,
            holding_pnl: Money::ZERO,
            total_pnl: Money::ZERO,
            net_pnl: Money::ZERO,
            trades: Vec::new(),
        }
    }

    fn add_trade(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    /// Compute this day's PnL from the previous close and carried position.
    ///
    /// Accumulators are reset first, so calling this again with the same
    /// inputs yields the same result.
    pub fn calculate_pnl(
        &mut self,
        pre_close: f64,
        start_pos: f64,
        size: f64,
        rate: f64,
        slippage: f64,
    ) {
        // A first day has no previous close; marking from zero would book a
        // phantom holding gain, so fall back to a nominal price
        self.pre_close = if pre_close > 0.0 { pre_close } else { 1.0 };
        self.start_pos = start_pos;
        self.end_pos = start_pos;

        self.trade_count = self.trades.len();
        self.turnover = Money::ZERO;
        self.commission = Money::ZERO;
        self.slippage = Money::ZERO;

        self.holding_pnl =
            Money::from_f64(start_pos * (self.close_price - self.pre_close) * size);

        self.trading_pnl = Money::ZERO;
        for trade in &self.trades {
            let pos_change = trade.position_change();
            self.end_pos += pos_change;

            let turnover = trade.price * trade.volume * size;
            self.trading_pnl +=
                Money::from_f64(pos_change * (self.close_price - trade.price) * size);
            self.turnover += Money::from_f64(turnover);
            self.commission += Money::from_f64(turnover * rate);
            self.slippage += Money::from_f64(trade.volume * size * slippage);
        }

        self.total_pnl = self.trading_pnl + self.holding_pnl;
        self.net_pnl = self.total_pnl - self.commission - self.slippage;
    }
}

/// Aggregate statistics over a completed run
#[derive(Debug, Clone, Serialize)]
pub struct BacktestStatistics {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub total_days: usize,
    pub profit_days: usize,
    pub loss_days: usize,
    pub capital: f64,
    pub end_balance: f64,
    pub max_drawdown: f64,
    pub max_ddpercent: f64,
    /// Days between the peak and the trough of the deepest drawdown
    pub max_drawdown_duration: i64,
    pub total_net_pnl: f64,
    pub daily_net_pnl: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
    pub total_turnover: f64,
    pub total_trade_count: usize,
    pub total_return: f64,
    pub annual_return: f64,
    pub daily_return: f64,
    pub return_std: f64,
    pub sharpe_ratio: f64,
    pub return_drawdown_ratio: f64,
    /// Balance touched zero or below during the run; performance figures
    /// after that point are meaningless and zeroed out
    pub equity_breached: bool,
}

impl BacktestStatistics {
    fn empty(capital: f64) -> Self {
        Self {
            start_date: None,
            end_date: None,
            total_days: 0,
            profit_days: 0,
            loss_days: 0,
            capital,
            end_balance: capital,
            max_drawdown: 0.0,
            max_ddpercent: 0.0,
            max_drawdown_duration: 0,
            total_net_pnl: 0.0,
            daily_net_pnl: 0.0,
            total_commission: 0.0,
            total_slippage: 0.0,
            total_turnover: 0.0,
            total_trade_count: 0,
            total_return: 0.0,
            annual_return: 0.0,
            daily_return: 0.0,
            return_std: 0.0,
            sharpe_ratio: 0.0,
            return_drawdown_ratio: 0.0,
            equity_breached: false,
        }
    }

    pub fn log(&self) {
        info!(
            start = ?self.start_date,
            end = ?self.end_date,
            days = self.total_days,
            "backtest period"
        );
        info!(
            end_balance = self.end_balance,
            total_net_pnl = self.total_net_pnl,
            total_return_pct = self.total_return,
            annual_return_pct = self.annual_return,
            "performance"
        );
        info!(
            max_drawdown = self.max_drawdown,
            max_ddpercent = self.max_ddpercent,
            max_drawdown_duration = self.max_drawdown_duration,
            sharpe_ratio = self.sharpe_ratio,
            return_drawdown_ratio = self.return_drawdown_ratio,
            "risk"
        );
        info!(
            commission = self.total_commission,
            slippage = self.total_slippage,
            turnover = self.total_turnover,
            trades = self.total_trade_count,
            "costs"
        );
    }
}

/// Date-keyed PnL ledger for one instrument
#[derive(Debug, Default)]
pub struct DailyPnl {
    results: BTreeMap<NaiveDate, DailyResult>,
}

impl DailyPnl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest price for the tick's date, creating the day's
    /// entry on first sight. The last tick of a date defines its close.
    pub fn on_tick(&mut self, tick: &Tick) {
        let date = tick.date();
        self.results
            .entry(date)
            .and_modify(|r| r.close_price = tick.last_price)
            .or_insert_with(|| DailyResult::new(date, tick.last_price));
    }

    /// Attribute a fill to its date
    pub fn on_trade(&mut self, trade: &Trade) {
        let date = trade.date();
        self.results
            .entry(date)
            .or_insert_with(|| DailyResult::new(date, trade.price))
            .add_trade(trade.clone());
    }

    /// Roll the ledger up chronologically, threading the previous close and
    /// carried position through every day. Idempotent.
    pub fn rollup(&mut self, size: f64, rate: f64, slippage: f64) {
        let mut pre_close = 0.0;
        let mut start_pos = 0.0;
        for result in self.results.values_mut() {
            result.calculate_pnl(pre_close, start_pos, size, rate, slippage);
            pre_close = result.close_price;
            start_pos = result.end_pos;
        }
    }

    pub fn results(&self) -> &BTreeMap<NaiveDate, DailyResult> {
        &self.results
    }

    /// Compute run statistics from the rolled-up ledger.
    pub fn statistics(&self, capital: f64, risk_free: f64, annual_days: f64) -> BacktestStatistics {
        if self.results.is_empty() {
            return BacktestStatistics::empty(capital);
        }

        let mut stats = BacktestStatistics::empty(capital);
        stats.start_date = self.results.keys().next().copied();
        stats.end_date = self.results.keys().next_back().copied();
        stats.total_days = self.results.len();

        let mut balance = capital;
        let mut balances = Vec::with_capacity(self.results.len());
        let mut returns = Vec::with_capacity(self.results.len());
        let mut equity_breached = false;

        for result in self.results.values() {
            let net_pnl = result.net_pnl.to_f64();
            if net_pnl > 0.0 {
                stats.profit_days += 1;
            } else if net_pnl < 0.0 {
                stats.loss_days += 1;
            }
            stats.total_net_pnl += net_pnl;
            stats.total_commission += result.commission.to_f64();
            stats.total_slippage += result.slippage.to_f64();
            stats.total_turnover += result.turnover.to_f64();
            stats.total_trade_count += result.trade_count;

            let pre_balance = balance;
            balance += net_pnl;
            if balance <= 0.0 {
                equity_breached = true;
            }
            let ratio = balance / pre_balance;
            returns.push(if ratio > 0.0 { ratio.ln() } else { 0.0 });
            balances.push(balance);
        }

        if equity_breached {
            warn!("balance dropped to zero or below, statistics are invalid");
            stats.equity_breached = true;
            stats.end_balance = 0.0;
            return stats;
        }

        stats.end_balance = balance;
        stats.daily_net_pnl = stats.total_net_pnl / stats.total_days as f64;

        // Running-max drawdown, with duration between peak and trough
        let dates: Vec<NaiveDate> = self.results.keys().copied().collect();
        let mut high = f64::MIN;
        let mut high_idx = 0usize;
        for (i, &b) in balances.iter().enumerate() {
            if b >= high {
                high = b;
                high_idx = i;
            }
            let drawdown = b - high;
            if drawdown < stats.max_drawdown {
                stats.max_drawdown = drawdown;
                stats.max_ddpercent = drawdown / high * 100.0;
                stats.max_drawdown_duration =
                    (dates[i] - dates[high_idx]).num_days();
            }
        }

        stats.total_return = (stats.end_balance / capital - 1.0) * 100.0;
        stats.annual_return = stats.total_return / stats.total_days as f64 * annual_days;
        stats.daily_return = returns.iter().mean() * 100.0;
        stats.return_std = if returns.len() > 1 {
            returns.iter().std_dev() * 100.0
        } else {
            0.0
        };

        if stats.return_std > 0.0 {
            let daily_risk_free = risk_free / annual_days.sqrt();
            stats.sharpe_ratio =
                (stats.daily_return - daily_risk_free) / stats.return_std * annual_days.sqrt();
        }
        if stats.max_ddpercent < 0.0 {
            stats.return_drawdown_ratio = -stats.total_return / stats.max_ddpercent;
        }

        stats
    }
}
