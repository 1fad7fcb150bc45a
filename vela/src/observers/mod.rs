use vela_data::feed::FeedStore;
use vela_data::line::series::LineSeries;
use vela_data::FeedId;
use vela_execution::{Order, OrderStatus, Position, Side, Trade};

/// Per-bar view of engine state handed to observers and analyzers after
/// the strategy stage.
pub struct Snapshot<'a> {
    /// Engine timestamp of this iteration.
    pub dt: f64,
    pub cash: f64,
    pub value: f64,
    pub fund_value: f64,
    pub fund_shares: f64,
    pub feeds: &'a FeedStore,
    /// Order notifications delivered this iteration.
    pub orders: &'a [Order],
    /// Trades updated this iteration (clones, closed ones final).
    pub trades: &'a [Trade],
    pub positions: &'a [(FeedId, Position)],
}

/// A time-series derived from engine/broker state: one output line set,
/// advanced once per engine iteration.
pub trait Observer: Send {
    fn aliases(&self) -> &'static [&'static str];
    fn next(&mut self, snap: &Snapshot<'_>, lines: &mut LineSeries);
}

/// Cash and portfolio value per bar.
#[derive(Debug, Default)]
pub struct Broker;

impl Observer for Broker {
    fn aliases(&self) -> &'static [&'static str] {
        &["cash", "value"]
    }

    fn next(&mut self, snap: &Snapshot<'_>, lines: &mut LineSeries) {
        lines.line_mut(0).set(0, snap.cash);
        lines.line_mut(1).set(0, snap.value);
    }
}

/// Average executed buy/sell price per bar, NaN when nothing filled.
#[derive(Debug, Default)]
pub struct BuySell;

impl Observer for BuySell {
    fn aliases(&self) -> &'static [&'static str] {
        &["buy", "sell"]
    }

    fn next(&mut self, snap: &Snapshot<'_>, lines: &mut LineSeries) {
        let mut sums = [0.0f64; 2];
        let mut sizes = [0.0f64; 2];
        for order in snap.orders {
            if !matches!(order.status, OrderStatus::Partial | OrderStatus::Completed) {
                continue;
            }
            let slot = if order.side == Side::Buy { 0 } else { 1 };
            for bit in order.executed.pending() {
                sums[slot] += bit.price * bit.size.abs();
                sizes[slot] += bit.size.abs();
            }
        }
        for slot in 0..2 {
            let price = if sizes[slot] > 0.0 {
                sums[slot] / sizes[slot]
            } else {
                f64::NAN
            };
            lines.line_mut(slot).set(0, price);
        }
    }
}

/// Net pnl of trades closed this bar, split by sign.
#[derive(Debug, Default)]
pub struct Trades;

impl Observer for Trades {
    fn aliases(&self) -> &'static [&'static str] {
        &["pnlplus", "pnlminus"]
    }

    fn next(&mut self, snap: &Snapshot<'_>, lines: &mut LineSeries) {
        let mut plus = f64::NAN;
        let mut minus = f64::NAN;
        for trade in snap.trades.iter().filter(|t| t.is_closed()) {
            if trade.pnlcomm >= 0.0 {
                // NaN-aware: max/min pick the finite side
                plus = plus.max(trade.pnlcomm);
            } else {
                minus = minus.min(trade.pnlcomm);
            }
        }
        lines.line_mut(0).set(0, plus);
        lines.line_mut(1).set(0, minus);
    }
}

/// Percentage drawdown from the running value peak, plus its maximum.
#[derive(Debug, Default)]
pub struct DrawDown {
    peak: f64,
    max_drawdown: f64,
}

impl Observer for DrawDown {
    fn aliases(&self) -> &'static [&'static str] {
        &["drawdown", "maxdrawdown"]
    }

    fn next(&mut self, snap: &Snapshot<'_>, lines: &mut LineSeries) {
        if snap.value > self.peak {
            self.peak = snap.value;
        }
        let drawdown = if self.peak > 0.0 {
            100.0 * (self.peak - snap.value) / self.peak
        } else {
            0.0
        };
        self.max_drawdown = self.max_drawdown.max(drawdown);
        lines.line_mut(0).set(0, drawdown);
        lines.line_mut(1).set(0, self.max_drawdown);
    }
}
