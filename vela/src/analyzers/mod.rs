use crate::observers::Snapshot;
use indexmap::IndexMap;
use prettytable::{row, Table};
use serde::Serialize;
use serde_json::Value;
use smol_str::SmolStr;
use vela_data::time;
use vela_execution::{Order, Trade};

/// End-of-run summary of one analyzer: ordered key/value pairs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerReport {
    pub name: SmolStr,
    pub values: IndexMap<SmolStr, Value>,
}

impl AnalyzerReport {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            values: IndexMap::new(),
        }
    }

    pub fn push(&mut self, key: impl Into<SmolStr>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }
}

impl std::fmt::Display for AnalyzerReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut table = Table::new();
        table.add_row(row![self.name.as_str(), ""]);
        for (key, value) in &self.values {
            table.add_row(row![key.as_str(), value.to_string()]);
        }
        write!(f, "{table}")
    }
}

/// Passive observer producing an end-of-run summary.
///
/// Analyzers receive the same notifications as strategies plus a per-bar
/// snapshot, and render their result into an [`AnalyzerReport`].
pub trait Analyzer: Send {
    fn name(&self) -> &'static str;
    fn start(&mut self) {}
    fn next(&mut self, _snap: &Snapshot<'_>) {}
    fn notify_order(&mut self, _order: &Order) {}
    fn notify_trade(&mut self, _trade: &Trade) {}
    fn notify_cashvalue(&mut self, _cash: f64, _value: f64) {}
    fn stop(&mut self) {}
    fn report(&self) -> AnalyzerReport;
}

/// Win/loss statistics over closed trades.
#[derive(Debug, Default)]
pub struct TradeAnalyzer {
    total: usize,
    open: usize,
    closed: usize,
    won: usize,
    lost: usize,
    pnl_gross: f64,
    pnl_net: f64,
    streak_won: usize,
    streak_won_longest: usize,
    streak_lost: usize,
    streak_lost_longest: usize,
}

impl Analyzer for TradeAnalyzer {
    fn name(&self) -> &'static str {
        "trades"
    }

    fn notify_trade(&mut self, trade: &Trade) {
        if trade.justopened {
            self.total += 1;
            self.open += 1;
        }
        if trade.is_closed() {
            self.open = self.open.saturating_sub(1);
            self.closed += 1;
            self.pnl_gross += trade.pnl;
            self.pnl_net += trade.pnlcomm;
            if trade.pnlcomm >= 0.0 {
                self.won += 1;
                self.streak_won += 1;
                self.streak_lost = 0;
                self.streak_won_longest = self.streak_won_longest.max(self.streak_won);
            } else {
                self.lost += 1;
                self.streak_lost += 1;
                self.streak_won = 0;
                self.streak_lost_longest = self.streak_lost_longest.max(self.streak_lost);
            }
        }
    }

    fn report(&self) -> AnalyzerReport {
        let mut report = AnalyzerReport::new(self.name());
        report.push("total", self.total);
        report.push("open", self.open);
        report.push("closed", self.closed);
        report.push("won", self.won);
        report.push("lost", self.lost);
        report.push("pnl_gross", self.pnl_gross);
        report.push("pnl_net", self.pnl_net);
        if self.closed > 0 {
            report.push("pnl_net_average", self.pnl_net / self.closed as f64);
        }
        report.push("streak_won_longest", self.streak_won_longest);
        report.push("streak_lost_longest", self.streak_lost_longest);
        report
    }
}

/// Per-bar portfolio returns keyed by timestamp.
#[derive(Debug, Default)]
pub struct TimeReturn {
    last_value: Option<f64>,
    returns: IndexMap<SmolStr, f64>,
}

impl Analyzer for TimeReturn {
    fn name(&self) -> &'static str {
        "timereturn"
    }

    fn next(&mut self, snap: &Snapshot<'_>) {
        if let Some(last) = self.last_value {
            if last != 0.0 {
                let key: SmolStr = time::num2date(snap.dt)
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string()
                    .into();
                self.returns.insert(key, snap.value / last - 1.0);
            }
        }
        self.last_value = Some(snap.value);
    }

    fn report(&self) -> AnalyzerReport {
        let compound = self
            .returns
            .values()
            .fold(1.0, |acc, r| acc * (1.0 + r))
            - 1.0;
        let best = self.returns.values().copied().fold(f64::NAN, f64::max);
        let worst = self.returns.values().copied().fold(f64::NAN, f64::min);

        let mut report = AnalyzerReport::new(self.name());
        report.push("periods", self.returns.len());
        report.push("compound", compound);
        if best.is_finite() {
            report.push("best", best);
            report.push("worst", worst);
        }
        report
    }
}

impl TimeReturn {
    pub fn returns(&self) -> &IndexMap<SmolStr, f64> {
        &self.returns
    }
}

/// Maximum drawdown depth and length over the run.
#[derive(Debug, Default)]
pub struct DrawDown {
    peak: f64,
    drawdown: f64,
    max_drawdown: f64,
    length: usize,
    max_length: usize,
}

impl Analyzer for DrawDown {
    fn name(&self) -> &'static str {
        "drawdown"
    }

    fn next(&mut self, snap: &Snapshot<'_>) {
        if snap.value >= self.peak {
            self.peak = snap.value;
            self.length = 0;
            self.drawdown = 0.0;
        } else {
            self.length += 1;
            self.drawdown = 100.0 * (self.peak - snap.value) / self.peak;
        }
        self.max_drawdown = self.max_drawdown.max(self.drawdown);
        self.max_length = self.max_length.max(self.length);
    }

    fn report(&self) -> AnalyzerReport {
        let mut report = AnalyzerReport::new(self.name());
        report.push("drawdown_pct", self.drawdown);
        report.push("max_drawdown_pct", self.max_drawdown);
        report.push("drawdown_length", self.length);
        report.push("max_drawdown_length", self.max_length);
        report
    }
}

/// System quality number over closed trades:
/// `sqrt(n) * mean(pnl) / stddev(pnl)`.
#[derive(Debug, Default)]
pub struct Sqn {
    pnls: Vec<f64>,
}

impl Analyzer for Sqn {
    fn name(&self) -> &'static str {
        "sqn"
    }

    fn notify_trade(&mut self, trade: &Trade) {
        if trade.is_closed() {
            self.pnls.push(trade.pnlcomm);
        }
    }

    fn report(&self) -> AnalyzerReport {
        let mut report = AnalyzerReport::new(self.name());
        report.push("trades", self.pnls.len());
        if self.pnls.len() >= 2 {
            let n = self.pnls.len() as f64;
            let mean = self.pnls.iter().sum::<f64>() / n;
            let var = self.pnls.iter().map(|p| (p - mean) * (p - mean)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 0.0 {
                report.push("sqn", n.sqrt() * mean / std);
            }
        }
        report
    }
}

/// Mark-to-market value of every open position, per feed.
#[derive(Debug, Default)]
pub struct PositionsValue {
    latest: IndexMap<SmolStr, f64>,
    cash: f64,
}

impl Analyzer for PositionsValue {
    fn name(&self) -> &'static str {
        "positionsvalue"
    }

    fn next(&mut self, snap: &Snapshot<'_>) {
        self.cash = snap.cash;
        for (feed_id, position) in snap.positions {
            let name: SmolStr = snap
                .feeds
                .get(*feed_id)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| format!("feed{}", feed_id.0).into());
            let price = snap.feeds.get(*feed_id).map_or(position.price, |f| {
                let close = f.close(0);
                if close.is_finite() {
                    close
                } else {
                    position.price
                }
            });
            self.latest.insert(name, position.size * price);
        }
    }

    fn report(&self) -> AnalyzerReport {
        let mut report = AnalyzerReport::new(self.name());
        report.push("cash", self.cash);
        for (name, value) in &self.latest {
            report.push(name.clone(), *value);
        }
        report
    }
}
