//! Run-level surfaces: analyzers, observers, writer output, timers,
//! stores, feed-status notifications and optimization fan-out.

use chrono::NaiveTime;
use parking_lot::Mutex;
use std::sync::Arc;
use vela::analyzers::{DrawDown, Sqn, TimeReturn, TradeAnalyzer};
use vela::engine::memory_feed;
use vela::prelude::*;
use vela::store::QueueStore;
use vela::writer::CsvWriter;
use vela_data::feed::{BarSource, SourceEvent};
use vela_data::time::num_from_ymd_hms;
use vela_ta::Sma;

fn daily_bar(day: u32, o: f64, h: f64, l: f64, c: f64) -> Bar {
    Bar {
        dt: num_from_ymd_hms(2024, 1, day, 17, 30, 0),
        open: o,
        high: h,
        low: l,
        close: c,
        volume: 1000.0,
        openinterest: 0.0,
    }
}

fn trending_bars(n: u32) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let base = 100.0 + f64::from(i);
            daily_bar(1 + i, base, base + 1.0, base - 1.0, base + 0.5)
        })
        .collect()
}

/// Buys when the close crosses over its SMA, closes the position when it
/// crosses back under.
struct SmaCross {
    period: usize,
    sma: Option<NodeId>,
}

impl SmaCross {
    fn new(period: usize) -> Self {
        Self { period, sma: None }
    }
}

impl Strategy for SmaCross {
    fn init(&mut self, ctx: &mut Ctx<'_>) -> Result<StrategyInit, VelaError> {
        if self.period == 0 {
            return Ok(StrategyInit::Skipped);
        }
        self.sma = Some(ctx.add_indicator(Box::new(Sma::new(self.period)), &[])?);
        Ok(StrategyInit::Ready)
    }

    fn next(&mut self, ctx: &mut Ctx<'_>) {
        let sma = ctx.ind(self.sma.unwrap(), 0);
        let close = ctx.close(0, 0);
        let position = ctx.position(0);
        if position.is_flat() && close > sma {
            ctx.buy(0, Some(10.0)).unwrap();
        } else if !position.is_flat() && close < sma {
            ctx.close_position(0).unwrap();
        }
    }
}

fn zigzag_bars() -> Vec<Bar> {
    // rises, dips below the average, rises again
    let closes = [
        100.0, 101.0, 102.0, 103.0, 104.0, 99.0, 97.0, 96.0, 101.0, 104.0, 106.0, 108.0,
    ];
    closes
        .iter()
        .enumerate()
        .map(|(i, c)| daily_bar(1 + i as u32, c - 0.5, c + 1.0, c - 1.0, *c))
        .collect()
}

#[test]
fn vector_and_event_modes_agree() {
    let run = |runonce: bool| -> RunSummary {
        let mut engine = Engine::new(EngineConfig {
            runonce,
            ..EngineConfig::default()
        });
        engine.add_feed(memory_feed("d", TimeFrame::Days, 1, zigzag_bars()));
        engine.add_strategy(Box::new(SmaCross::new(3)));
        engine.add_analyzer(Box::new(TradeAnalyzer::default()));
        engine.run().unwrap()
    };

    let vector = run(true);
    let event = run(false);
    assert_eq!(vector.bars, event.bars);
    assert!((vector.cash - event.cash).abs() < 1e-9);
    assert!((vector.value - event.value).abs() < 1e-9);
}

#[test]
fn analyzers_summarise_the_run() {
    let mut engine = Engine::default();
    engine.add_feed(memory_feed("d", TimeFrame::Days, 1, zigzag_bars()));
    engine.add_strategy(Box::new(SmaCross::new(3)));
    engine.add_analyzer(Box::new(TradeAnalyzer::default()));
    engine.add_analyzer(Box::new(TimeReturn::default()));
    engine.add_analyzer(Box::new(DrawDown::default()));
    engine.add_analyzer(Box::new(Sqn::default()));

    let summary = engine.run().unwrap();
    assert_eq!(summary.reports.len(), 4);

    let trades = &summary.reports[0];
    assert_eq!(trades.name, "trades");
    assert!(trades.values["total"].as_u64().unwrap() >= 1);

    let timereturn = &summary.reports[1];
    assert!(timereturn.values["periods"].as_u64().unwrap() as usize == summary.bars - 1);

    // reports render as tables
    let rendered = format!("{trades}");
    assert!(rendered.contains("pnl_net"));
}

#[test]
fn writer_emits_feed_indicator_and_observer_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run.csv");

    let mut engine = Engine::default();
    engine.add_feed(memory_feed("d", TimeFrame::Days, 1, trending_bars(5)));
    engine.add_strategy(Box::new(SmaCross::new(3)));
    engine.add_observer(Box::new(vela::observers::Broker::default()));
    engine.add_analyzer(Box::new(TradeAnalyzer::default()));
    engine.add_writer(CsvWriter::to_path(&path).unwrap());

    engine.run().unwrap();

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(
        lines[0],
        "datetime,d.open,d.high,d.low,d.close,d.volume,sma1,cash,value"
    );
    // 5 bars of rows, then the analyzer section
    assert_eq!(lines.len(), 1 + 5 + 1 + engine_summary_rows(&contents));
    assert!(contents.contains("analyzer,key,value"));
    assert!(contents.contains("trades,"));

    // the SMA column is empty until its min period
    let first_row: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(first_row[6], "");
    let third_row: Vec<&str> = lines[3].split(',').collect();
    assert!(!third_row[6].is_empty());
}

fn engine_summary_rows(contents: &str) -> usize {
    contents
        .lines()
        .skip_while(|l| *l != "analyzer,key,value")
        .skip(1)
        .count()
}

struct TimerProbe {
    fired: Arc<Mutex<Vec<(usize, f64)>>>,
}

impl Strategy for TimerProbe {
    fn init(&mut self, ctx: &mut Ctx<'_>) -> Result<StrategyInit, VelaError> {
        ctx.add_timer(vela::engine::timer::TimerSchedule::at(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        ));
        Ok(StrategyInit::Ready)
    }

    fn notify_timer(&mut self, _ctx: &mut Ctx<'_>, timer: usize, when: f64) {
        self.fired.lock().push((timer, when));
    }
}

#[test]
fn timers_fire_once_per_session() {
    let fired: Arc<Mutex<Vec<(usize, f64)>>> = Arc::default();
    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        ..EngineConfig::default()
    });
    engine.add_feed(memory_feed("d", TimeFrame::Days, 1, trending_bars(3)));
    engine.add_strategy(Box::new(TimerProbe {
        fired: Arc::clone(&fired),
    }));

    engine.run().unwrap();
    let fired = fired.lock();
    // the first bar seeds the schedule (10:00 already past at 17:30); the
    // following sessions fire
    assert_eq!(fired.len(), 2);
    assert!(fired.windows(2).all(|w| w[0].1 < w[1].1));
}

struct StoreProbe {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Strategy for StoreProbe {
    fn notify_store(&mut self, _ctx: &mut Ctx<'_>, msg: &vela::store::StoreMessage) {
        self.seen.lock().push(msg.msg.to_string());
    }
}

#[test]
fn store_notifications_reach_strategies() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::default();
    let store = QueueStore::shared("venue");
    store.push("session opening");

    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        ..EngineConfig::default()
    });
    engine.add_feed(memory_feed("d", TimeFrame::Days, 1, trending_bars(2)));
    engine.add_strategy(Box::new(StoreProbe {
        seen: Arc::clone(&seen),
    }));
    engine.add_store(store);

    engine.run().unwrap();
    assert_eq!(seen.lock().as_slice(), ["session opening".to_string()]);
}

/// Source that reports a status change before its bars run out.
struct FlakySource {
    bars: Vec<Bar>,
    cursor: usize,
    announced: bool,
}

impl BarSource for FlakySource {
    fn next_bar(&mut self) -> SourceEvent {
        if !self.announced {
            self.announced = true;
            return SourceEvent::Status(FeedStatus::Delayed);
        }
        match self.bars.get(self.cursor) {
            Some(bar) => {
                self.cursor += 1;
                SourceEvent::Bar(*bar)
            }
            None => SourceEvent::Exhausted,
        }
    }
}

struct DataStatusProbe {
    seen: Arc<Mutex<Vec<(FeedId, FeedStatus)>>>,
}

impl Strategy for DataStatusProbe {
    fn notify_data(&mut self, _ctx: &mut Ctx<'_>, feed: FeedId, status: FeedStatus) {
        self.seen.lock().push((feed, status));
    }
}

#[test]
fn feed_status_changes_surface_via_notify_data() {
    let seen: Arc<Mutex<Vec<(FeedId, FeedStatus)>>> = Arc::default();
    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        preload: false,
        ..EngineConfig::default()
    });
    let source = FlakySource {
        bars: trending_bars(2),
        cursor: 0,
        announced: false,
    };
    let id = engine.add_feed(Feed::new("flaky", Box::new(source), TimeFrame::Days, 1));
    engine.add_strategy(Box::new(DataStatusProbe {
        seen: Arc::clone(&seen),
    }));

    engine.run().unwrap();
    let seen = seen.lock();
    assert_eq!(seen.as_slice(), [(id, FeedStatus::Delayed)]);
}

struct SizedEntry;

impl Strategy for SizedEntry {
    fn init(&mut self, ctx: &mut Ctx<'_>) -> Result<StrategyInit, VelaError> {
        ctx.set_sizer(Box::new(PercentSizer::new(50.0)));
        Ok(StrategyInit::Ready)
    }

    fn next(&mut self, ctx: &mut Ctx<'_>) {
        if ctx.len(0) == 1 {
            // sizer decides: 50% of 10k cash at close 100.5
            ctx.buy(0, None).unwrap();
        }
    }
}

#[test]
fn sizers_convert_signals_into_sizes() {
    let mut engine = Engine::default();
    let id = engine.add_feed(memory_feed("d", TimeFrame::Days, 1, trending_bars(3)));
    engine.add_strategy(Box::new(SizedEntry));

    engine.run().unwrap();
    // 50% of 10_000 at close 100.5 -> floor(5000/100.5) = 49 units
    assert_eq!(engine.broker().get_position(id).size, 49.0);
}

#[tokio::test]
async fn optimization_sweeps_parameters_in_parallel() {
    let builders: Vec<vela::optimize::EngineBuilder> = [0usize, 2, 3, 5]
        .into_iter()
        .map(|period| {
            Box::new(move || {
                let mut engine = Engine::default();
                engine.add_feed(memory_feed("d", TimeFrame::Days, 1, zigzag_bars()));
                engine.add_strategy(Box::new(SmaCross::new(period)));
                engine.add_analyzer(Box::new(TradeAnalyzer::default()));
                Ok(engine)
            }) as vela::optimize::EngineBuilder
        })
        .collect();

    let summaries = vela::optimize::run_optimization(builders, Some(2))
        .await
        .unwrap();
    assert_eq!(summaries.len(), 4);
    // period 0 is skipped by init: no trades, cash untouched
    assert_eq!(summaries[0].cash, 10_000.0);
    // every run processed the same history
    assert!(summaries.iter().all(|s| s.bars == 12));
}
