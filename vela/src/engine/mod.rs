use crate::analyzers::{Analyzer, AnalyzerReport};
use crate::engine::config::{EngineConfig, ExactBars};
use crate::engine::core::EngineCore;
use crate::engine::timer::{TimerId, TimerSchedule};
use crate::error::VelaError;
use crate::observers::{Observer, Snapshot};
use crate::strategy::{sizer::Sizer, Ctx, StratMeta, Strategy, StrategyInit, StrategySlot};
use crate::writer::{cell, CsvWriter};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vela_data::bar::Bar;
use vela_data::feed::{Feed, FeedNext};
use vela_data::filter::resample::{ResampleConfig, Replayer, Resampler};
use vela_data::filter::BarFilter;
use vela_data::graph::LineRef;
use vela_data::line::series::LineSeries;
use vela_data::{time, DataError, FeedId};
use vela_execution::{Broker, Order, Position, StratId, Trade};

pub mod config;
pub(crate) mod core;
pub mod timer;

/// Timestamp tolerance when comparing feed clocks (~86 microseconds).
const DT_EPS: f64 = 1e-9;

/// Outcome of one engine run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub bars: usize,
    pub cash: f64,
    pub value: f64,
    pub reports: Vec<AnalyzerReport>,
}

struct ObserverSlot {
    observer: Box<dyn Observer>,
    lines: LineSeries,
}

enum Column {
    DateTime,
    Feed(FeedId, usize),
    Node(LineRef),
    Observer(usize, usize),
}

/// The driver: owns feeds, strategies, broker, observers, analyzers,
/// writers and timers, and runs the outer loop in event or vectorized
/// mode.
pub struct Engine {
    pub config: EngineConfig,
    core: EngineCore,
    strategies: Vec<StrategySlot>,
    observers: Vec<ObserverSlot>,
    analyzers: Vec<Box<dyn Analyzer>>,
    writers: Vec<CsvWriter>,
    columns: Vec<Column>,
    /// Notifications delivered in the current iteration, for observers.
    bar_orders: Vec<Order>,
    bar_trades: Vec<Trade>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            core: EngineCore::new(),
            strategies: Vec::new(),
            observers: Vec::new(),
            analyzers: Vec::new(),
            writers: Vec::new(),
            columns: Vec::new(),
            bar_orders: Vec::new(),
            bar_trades: Vec::new(),
        }
    }

    // ---- wiring ----------------------------------------------------------

    pub fn add_feed(&mut self, feed: Feed) -> FeedId {
        let id = self.core.feeds.push(feed);
        let node = self.core.graph.add_data(id);
        self.core.feed_nodes.push(node);
        self.core.cursors.push(0);
        id
    }

    /// Derive a coarser feed by resampling a parent.
    pub fn resample_feed(
        &mut self,
        parent: FeedId,
        cfg: ResampleConfig,
    ) -> Result<FeedId, VelaError> {
        let derived = self.derive_feed(parent, &cfg, false)?;
        self.core
            .feeds
            .get_mut(derived)
            .expect("just created")
            .add_filter(Box::new(Resampler::new(cfg)));
        Ok(derived)
    }

    /// Derive a replaying feed: partial aggregate states update the bar in
    /// place and the length only advances per completed aggregate.
    pub fn replay_feed(
        &mut self,
        parent: FeedId,
        cfg: ResampleConfig,
    ) -> Result<FeedId, VelaError> {
        let derived = self.derive_feed(parent, &cfg, true)?;
        self.core
            .feeds
            .get_mut(derived)
            .expect("just created")
            .add_filter(Box::new(Replayer::new(cfg)));
        Ok(derived)
    }

    fn derive_feed(
        &mut self,
        parent: FeedId,
        cfg: &ResampleConfig,
        replaying: bool,
    ) -> Result<FeedId, VelaError> {
        let parent_feed = self
            .core
            .feeds
            .get(parent)
            .ok_or(DataError::UnknownFeed(parent.0))?;
        if cfg.timeframe < parent_feed.timeframe {
            return Err(DataError::ResampleDirection {
                from: parent_feed.timeframe.to_string(),
                to: cfg.timeframe.to_string(),
            }
            .into());
        }
        let name = format!(
            "{}_{}{}",
            parent_feed.name, cfg.timeframe, cfg.compression
        );
        let session_end = parent_feed.session_end;

        let mut feed = Feed::derived(name, parent, cfg.timeframe, cfg.compression);
        feed.session_end = session_end;
        feed.resampling = !replaying;
        feed.replaying = replaying;

        Ok(self.add_feed(feed))
    }

    /// Attach a bar filter (heikin-ashi, day splitting, ...) to a feed.
    pub fn add_feed_filter(&mut self, feed: FeedId, filter: Box<dyn BarFilter>) {
        if let Some(f) = self.core.feeds.get_mut(feed) {
            f.add_filter(filter);
        }
    }

    pub fn add_strategy(&mut self, strategy: Box<dyn Strategy>) -> StratId {
        let id = self.strategies.len();
        self.strategies.push(StrategySlot {
            user: Some(strategy),
            meta: StratMeta::new(id),
        });
        id
    }

    pub fn set_sizer(&mut self, strategy: StratId, sizer: Box<dyn Sizer>) {
        if let Some(slot) = self.strategies.iter_mut().find(|s| s.meta.id == strategy) {
            slot.meta.sizer = sizer;
        }
    }

    pub fn set_broker(&mut self, broker: Box<dyn Broker>) {
        self.core.broker = broker;
    }

    pub fn broker(&self) -> &dyn Broker {
        self.core.broker.as_ref()
    }

    pub fn broker_mut(&mut self) -> &mut dyn Broker {
        self.core.broker.as_mut()
    }

    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        let lines = LineSeries::new(observer.aliases().iter().copied());
        self.observers.push(ObserverSlot { observer, lines });
    }

    pub fn add_analyzer(&mut self, analyzer: Box<dyn Analyzer>) {
        self.analyzers.push(analyzer);
    }

    pub fn add_writer(&mut self, writer: CsvWriter) {
        self.writers.push(writer);
    }

    pub fn add_store(&mut self, store: Arc<dyn crate::store::Store>) {
        self.core.stores.push(store);
    }

    pub fn add_timer(&mut self, owner: StratId, schedule: TimerSchedule) -> TimerId {
        self.core.add_timer(owner, schedule)
    }

    /// Record per-update trade history on every trade.
    pub fn set_trade_history(&mut self, on: bool) {
        self.core.trades_history_on = on;
    }

    /// Handle to request a cooperative stop from outside the loop.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.core.stop_flag)
    }

    // ---- run -------------------------------------------------------------

    pub fn run(&mut self) -> Result<RunSummary, VelaError> {
        if self.core.feeds.is_empty() {
            return Err(VelaError::Config("no data feeds added".to_string()));
        }
        if let Some(name) = &self.config.tz {
            self.core.tz = name
                .parse()
                .map_err(|_| VelaError::Config(format!("unknown timezone: {name}")))?;
        }

        self.init_strategies()?;

        let any_live = self.config.live
            || self
                .core
                .feeds
                .iter()
                .any(|(_, f)| f.is_live());
        let any_replay = self.core.feeds.iter().any(|(_, f)| f.replaying);

        let preload = self.config.preload
            && !any_live
            && !any_replay
            && self.config.exact_bars.allows_preload();
        let runonce = self.config.runonce
            && preload
            && !any_live
            && !any_replay
            && self.config.exact_bars.allows_runonce()
            && !self.core.graph.requires_event_mode()
            && !self.config.old_sync;

        self.apply_exact_bars();

        if self.config.cheat_on_open && self.config.broker_coo {
            self.core.broker.configure_cheat_on_open(true);
        }

        info!(
            feeds = self.core.feeds.len(),
            strategies = self.strategies.len(),
            runonce,
            preload,
            "engine run starting"
        );

        self.prepare_writers()?;

        // start everything; feeds are stopped again on every exit path
        self.core.running = true;
        for store in &self.core.stores {
            store.start();
        }
        for (_, feed) in self.core.feeds.iter_mut() {
            feed.start();
        }
        self.core.broker.start();
        for analyzer in &mut self.analyzers {
            analyzer.start();
        }
        for idx in 0..self.strategies.len() {
            self.with_strategy(idx, |s, ctx| s.start(ctx));
        }

        let body = (|| -> Result<(), VelaError> {
            if preload {
                self.preload_feeds()?;
            }
            if runonce {
                self.run_vector()
            } else if self.config.old_sync {
                self.run_event_old()
            } else {
                self.run_event()
            }
        })();

        // strategy stop hooks run on all paths, including errors
        for idx in 0..self.strategies.len() {
            self.with_strategy(idx, |s, ctx| s.stop(ctx));
        }
        for analyzer in &mut self.analyzers {
            analyzer.stop();
        }
        let reports: Vec<AnalyzerReport> =
            self.analyzers.iter().map(|a| a.report()).collect();
        for writer in &mut self.writers {
            writer.finalize(&reports)?;
        }
        self.core.broker.stop();
        for (_, feed) in self.core.feeds.iter_mut() {
            feed.stop();
        }
        for store in &self.core.stores {
            store.stop();
        }
        self.core.running = false;

        body?;

        let cash = self.core.broker.get_cash();
        let value = self.core.broker.get_value(&self.core.feeds);
        info!(bars = self.core.iteration, cash, value, "engine run finished");
        Ok(RunSummary {
            bars: self.core.iteration,
            cash,
            value,
            reports,
        })
    }

    fn init_strategies(&mut self) -> Result<(), VelaError> {
        let slots = std::mem::take(&mut self.strategies);
        for mut slot in slots {
            let Some(mut user) = slot.user.take() else {
                continue;
            };
            let mut ctx = Ctx::new(&mut self.core, &mut slot.meta);
            match user.init(&mut ctx)? {
                StrategyInit::Ready => {
                    slot.user = Some(user);
                    self.strategies.push(slot);
                }
                StrategyInit::Skipped => {
                    debug!(strategy = slot.meta.id, "strategy skipped by init");
                }
            }
        }
        Ok(())
    }

    fn apply_exact_bars(&mut self) {
        match self.config.exact_bars {
            ExactBars::Full => {}
            ExactBars::Minimal => {
                let needed = self.max_min_period() + 1;
                for (_, feed) in self.core.feeds.iter_mut() {
                    feed.qbuffer(needed);
                }
                self.core.graph.qbuffer(1);
                for slot in &mut self.observers {
                    slot.lines.qbuffer(2);
                }
            }
            ExactBars::KeepData => {
                self.core.graph.qbuffer(1);
            }
            ExactBars::KeepDataAndLines => {
                self.core.graph.qbuffer(1);
                for slot in &mut self.observers {
                    slot.lines.qbuffer(2);
                }
            }
        }
    }

    fn max_min_period(&self) -> usize {
        (0..self.core.graph.num_nodes())
            .map(|n| self.core.graph.min_period_of(n))
            .max()
            .unwrap_or(1)
    }

    fn prepare_writers(&mut self) -> Result<(), VelaError> {
        if self.writers.is_empty() {
            return Ok(());
        }
        let mut headers = vec!["datetime".to_string()];
        let mut columns = vec![Column::DateTime];

        for (id, feed) in self.core.feeds.iter() {
            for line in [
                vela_data::feed::feedline::OPEN,
                vela_data::feed::feedline::HIGH,
                vela_data::feed::feedline::LOW,
                vela_data::feed::feedline::CLOSE,
                vela_data::feed::feedline::VOLUME,
            ] {
                headers.push(format!(
                    "{}.{}",
                    feed.name,
                    vela_data::feed::feedline::ALIASES[line]
                ));
                columns.push(Column::Feed(id, line));
            }
        }
        for slot in &self.strategies {
            for node in &slot.meta.nodes {
                for (line, alias) in self.core.graph.aliases_of(*node).iter().enumerate() {
                    headers.push(format!("{alias}{node}"));
                    columns.push(Column::Node(LineRef::new(*node, line)));
                }
            }
        }
        for (i, slot) in self.observers.iter().enumerate() {
            for (line, alias) in slot.observer.aliases().iter().enumerate() {
                headers.push((*alias).to_string());
                columns.push(Column::Observer(i, line));
            }
        }

        self.columns = columns;
        for writer in &mut self.writers {
            writer.headers(&headers)?;
        }
        Ok(())
    }

    fn preload_feeds(&mut self) -> Result<(), VelaError> {
        for i in 0..self.core.feeds.len() {
            let id = FeedId(i);
            let parent = self.core.feeds.get(id).and_then(|f| f.parent);
            match parent {
                None => {
                    self.core
                        .feeds
                        .get_mut(id)
                        .expect("feed exists")
                        .preload();
                }
                Some(parent_id) => {
                    // parents precede children in insertion order
                    let bars: Vec<Bar> = {
                        let parent_feed = self
                            .core
                            .feeds
                            .get(parent_id)
                            .ok_or(DataError::UnknownFeed(parent_id.0))?;
                        let buflen = parent_feed.lines.buflen();
                        (0..buflen)
                            .map(|j| {
                                use vela_data::feed::feedline as fl;
                                Bar {
                                    dt: parent_feed.lines.line(fl::DATETIME).get_abs(j),
                                    open: parent_feed.lines.line(fl::OPEN).get_abs(j),
                                    high: parent_feed.lines.line(fl::HIGH).get_abs(j),
                                    low: parent_feed.lines.line(fl::LOW).get_abs(j),
                                    close: parent_feed.lines.line(fl::CLOSE).get_abs(j),
                                    volume: parent_feed.lines.line(fl::VOLUME).get_abs(j),
                                    openinterest: parent_feed
                                        .lines
                                        .line(fl::OPENINTEREST)
                                        .get_abs(j),
                                }
                            })
                            .collect()
                    };
                    let feed = self.core.feeds.get_mut(id).expect("feed exists");
                    for bar in bars {
                        feed.push_input(bar);
                    }
                    feed.mark_exhausted();
                    feed.preload();
                    self.core.cursors[i] = usize::MAX; // engine tapping not needed
                }
            }
        }
        Ok(())
    }

    // ---- event loop ------------------------------------------------------

    fn run_event(&mut self) -> Result<(), VelaError> {
        let mut last_dt0 = f64::NEG_INFINITY;
        loop {
            if self.core.stop_requested() {
                info!("engine stop requested");
                break;
            }
            self.drain_stores();
            self.drain_feed_status();
            if self.config.quicknotify {
                self.deliver_notifications()?;
            }

            let n = self.core.feeds.len();
            let mut produced: Vec<Option<f64>> = vec![None; n];
            let mut idle = false;
            let mut qcheck = f64::INFINITY;

            for i in 0..n {
                let id = FeedId(i);
                self.sync_derived_inputs(i);
                let feed = self.core.feeds.get_mut(id).expect("feed exists");
                match feed.next() {
                    FeedNext::Produced => produced[i] = Some(feed.datetime(0)),
                    FeedNext::Idle => {
                        idle = true;
                        qcheck = qcheck.min(feed.qcheck);
                    }
                    FeedNext::Unchanged => {}
                }
            }

            if produced.iter().all(Option::is_none) {
                if idle {
                    // live idleness: resamplers may still emit on the wall
                    // clock
                    let mut any = false;
                    for i in 0..n {
                        let feed = self.core.feeds.get_mut(FeedId(i)).expect("feed exists");
                        if feed.check(None) {
                            produced[i] = Some(feed.datetime(0));
                            any = true;
                        }
                    }
                    if !any {
                        self.fire_timers(time::now_num(), true)?;
                        self.fire_timers(time::now_num(), false)?;
                        let pause = qcheck.clamp(0.01, 0.25);
                        std::thread::sleep(std::time::Duration::from_secs_f64(pause));
                        continue;
                    }
                } else {
                    if !self.all_feeds_done() {
                        warn!("no feed can produce further bars; stopping the loop");
                    }
                    break;
                }
            }

            // minimum pending timestamp; resample-only feeds ride along
            // when raw feeds exist
            let raw_min = self
                .core
                .feeds
                .iter()
                .zip(produced.iter())
                .filter(|((_, f), p)| !f.resampling && p.is_some())
                .map(|(_, p)| p.unwrap())
                .fold(f64::INFINITY, f64::min);
            let dt0 = if raw_min.is_finite() {
                raw_min
            } else {
                produced
                    .iter()
                    .flatten()
                    .copied()
                    .fold(f64::INFINITY, f64::min)
            };

            // rewind overshooters so bars re-deliver in timestamp order
            for i in 0..n {
                if let Some(dt) = produced[i] {
                    if dt > dt0 + DT_EPS {
                        self.core
                            .feeds
                            .get_mut(FeedId(i))
                            .expect("feed exists")
                            .rewind_bar();
                        produced[i] = None;
                    }
                }
            }
            // laggards: give filters a chance to flush against the master
            // clock
            for i in 0..n {
                if produced[i].is_none() {
                    let feed = self.core.feeds.get_mut(FeedId(i)).expect("feed exists");
                    if feed.check(Some(dt0)) {
                        let dt = feed.datetime(0);
                        if dt <= dt0 + DT_EPS {
                            produced[i] = Some(dt);
                        } else {
                            feed.rewind_bar();
                        }
                    }
                }
            }

            if dt0 + DT_EPS < last_dt0 {
                return Err(VelaError::Fatal(format!(
                    "clock went backwards: {dt0} after {last_dt0}"
                )));
            }
            last_dt0 = dt0;

            self.bar_pass(dt0, false)?;
        }
        Ok(())
    }

    /// Legacy synchronisation: feed 0 is the master clock; other feeds
    /// deliver while they are not ahead of it.
    fn run_event_old(&mut self) -> Result<(), VelaError> {
        loop {
            if self.core.stop_requested() {
                break;
            }
            self.drain_stores();
            self.drain_feed_status();

            let dt0 = {
                let master = self.core.feeds.get_mut(FeedId(0)).expect("feed 0 exists");
                match master.next() {
                    FeedNext::Produced => master.datetime(0),
                    FeedNext::Unchanged => break,
                    FeedNext::Idle => {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                        continue;
                    }
                }
            };
            // master taps its own children too
            for i in 1..self.core.feeds.len() {
                self.sync_derived_inputs(i);
                loop {
                    let feed = self.core.feeds.get_mut(FeedId(i)).expect("feed exists");
                    match feed.next() {
                        FeedNext::Produced => {
                            if feed.datetime(0) > dt0 + DT_EPS {
                                feed.rewind_bar();
                                break;
                            }
                        }
                        FeedNext::Unchanged | FeedNext::Idle => break,
                    }
                }
            }

            self.bar_pass(dt0, false)?;
        }
        Ok(())
    }

    // ---- vector loop -----------------------------------------------------

    fn run_vector(&mut self) -> Result<(), VelaError> {
        self.core.graph.run_once(&self.core.feeds);

        loop {
            if self.core.stop_requested() {
                break;
            }
            self.drain_stores();
            self.drain_feed_status();

            // walk the union of feed timestamps
            let mut dt0 = f64::INFINITY;
            for (_, feed) in self.core.feeds.iter() {
                if feed.lines.len() < feed.lines.buflen() {
                    dt0 = dt0.min(feed.datetime(1));
                }
            }
            if !dt0.is_finite() {
                break;
            }
            for (_, feed) in self.core.feeds.iter_mut() {
                if feed.lines.len() < feed.lines.buflen()
                    && (feed.datetime(1) - dt0).abs() <= DT_EPS
                {
                    feed.lines.advance(1);
                }
            }
            self.bar_pass(dt0, true)?;
        }
        Ok(())
    }

    // ---- shared per-bar pass ---------------------------------------------

    fn bar_pass(&mut self, dt0: f64, vector: bool) -> Result<(), VelaError> {
        self.fire_timers(dt0, true)?;

        if self.config.cheat_on_open {
            self.core.broker.set_cheat_phase(true);
            for idx in 0..self.strategies.len() {
                if self.strat_status(idx) >= 0 {
                    self.with_strategy(idx, |s, ctx| s.next_open(ctx));
                }
            }
            self.core.broker.set_cheat_phase(false);
        }

        self.core.broker.next(&self.core.feeds, dt0)?;
        self.deliver_notifications()?;
        self.fire_timers(dt0, false)?;

        if vector {
            self.core.graph.sync_with_feeds(&self.core.feeds);
        } else {
            self.core.graph.next_tick(&self.core.feeds);
        }

        let cash = self.core.broker.get_cash();
        let value = self.core.broker.get_value(&self.core.feeds);
        let fund_value = self.core.broker.get_fund_value();
        let fund_shares = self.core.broker.get_fund_shares();

        for idx in 0..self.strategies.len() {
            let status = self.strat_status(idx);
            let started = self.strategies[idx].meta.nextstart_done;
            self.with_strategy(idx, |s, ctx| {
                s.notify_cashvalue(ctx, cash, value);
                s.notify_fund(ctx, cash, value, fund_value, fund_shares);
                if status < 0 {
                    s.prenext(ctx);
                } else if !started {
                    ctx.meta.nextstart_done = true;
                    s.nextstart(ctx);
                } else {
                    s.next(ctx);
                }
            });
        }

        self.observe(dt0, cash, value, fund_value, fund_shares)?;

        self.core.iteration += 1;
        self.bar_orders.clear();
        self.bar_trades.clear();
        Ok(())
    }

    fn observe(
        &mut self,
        dt0: f64,
        cash: f64,
        value: f64,
        fund_value: f64,
        fund_shares: f64,
    ) -> Result<(), VelaError> {
        let positions: Vec<(FeedId, Position)> = self
            .core
            .feeds
            .ids()
            .map(|id| (id, self.core.broker.get_position(id)))
            .collect();
        let snap = Snapshot {
            dt: dt0,
            cash,
            value,
            fund_value,
            fund_shares,
            feeds: &self.core.feeds,
            orders: &self.bar_orders,
            trades: &self.bar_trades,
            positions: &positions,
        };

        for slot in &mut self.observers {
            slot.lines.forward();
            slot.observer.next(&snap, &mut slot.lines);
        }
        for analyzer in &mut self.analyzers {
            analyzer.next(&snap);
        }

        if !self.writers.is_empty() {
            let values: Vec<String> = self
                .columns
                .iter()
                .map(|col| match col {
                    Column::DateTime => time::num2date(dt0)
                        .format("%Y-%m-%dT%H:%M:%S%.6f")
                        .to_string(),
                    Column::Feed(id, line) => cell(
                        self.core
                            .feeds
                            .get(*id)
                            .map_or(f64::NAN, |f| f.lines.line(*line).get(0)),
                    ),
                    Column::Node(lref) => {
                        cell(self.core.graph.read(&self.core.feeds, *lref, 0))
                    }
                    Column::Observer(idx, line) => {
                        cell(self.observers[*idx].lines.line(*line).get(0))
                    }
                })
                .collect();
            for writer in &mut self.writers {
                writer.row(&values)?;
            }
        }
        Ok(())
    }

    // ---- plumbing --------------------------------------------------------

    /// Feed the bars a parent feed has delivered (and not rewound) into a
    /// derived child.
    fn sync_derived_inputs(&mut self, i: usize) {
        let id = FeedId(i);
        let Some(parent) = self.core.feeds.get(id).and_then(|f| f.parent) else {
            return;
        };
        if self.core.cursors[i] == usize::MAX {
            return; // preloaded
        }
        let (plen, exhausted) = {
            let parent_feed = self.core.feeds.get(parent).expect("parent exists");
            (parent_feed.lines.len(), parent_feed.is_exhausted())
        };
        while self.core.cursors[i] < plen {
            let j = self.core.cursors[i];
            let bar = {
                let parent_feed = self.core.feeds.get(parent).expect("parent exists");
                let ago = j as isize - (plen as isize - 1);
                parent_feed.bar_at(ago)
            };
            self.core
                .feeds
                .get_mut(id)
                .expect("feed exists")
                .push_input(bar);
            self.core.cursors[i] += 1;
        }
        if exhausted && self.core.cursors[i] >= plen {
            self.core
                .feeds
                .get_mut(id)
                .expect("feed exists")
                .mark_exhausted();
        }
    }

    fn all_feeds_done(&self) -> bool {
        self.core.feeds.iter().all(|(_, f)| {
            f.is_exhausted() || (f.lines.len() >= f.lines.buflen() && f.is_preloaded())
        })
    }

    fn drain_stores(&mut self) {
        let mut messages = Vec::new();
        for store in &self.core.stores {
            messages.extend(store.poll_notifications());
        }
        for msg in messages {
            for idx in 0..self.strategies.len() {
                self.with_strategy(idx, |s, ctx| s.notify_store(ctx, &msg));
            }
        }
    }

    fn drain_feed_status(&mut self) {
        let mut updates = Vec::new();
        for (id, feed) in self.core.feeds.iter_mut() {
            for status in feed.take_notifications() {
                updates.push((id, status));
            }
        }
        for (id, status) in updates {
            warn!(feed = id.0, %status, "feed status notification");
            for idx in 0..self.strategies.len() {
                self.with_strategy(idx, |s, ctx| s.notify_data(ctx, id, status));
            }
        }
    }

    fn fire_timers(&mut self, dt0: f64, cheat: bool) -> Result<(), VelaError> {
        let mut due = Vec::new();
        for timer in &mut self.core.timers {
            if timer.schedule.cheat != cheat {
                continue;
            }
            if let Some(when) = timer.check(dt0) {
                due.push((timer.id, timer.owner, when));
            }
        }
        for (id, owner, when) in due {
            if let Some(idx) = self.strategy_index(owner) {
                self.with_strategy(idx, |s, ctx| s.notify_timer(ctx, id, when));
            }
        }
        Ok(())
    }

    fn deliver_notifications(&mut self) -> Result<(), VelaError> {
        while let Some(order) = self.core.broker.get_notification() {
            let owner = order.owner;

            let mut trade_updates = Vec::new();
            if matches!(
                order.status,
                vela_execution::OrderStatus::Partial | vela_execution::OrderStatus::Completed
            ) {
                let key = (owner, order.feed.0, order.tradeid);
                let feed_len = self
                    .core
                    .feeds
                    .get(order.feed)
                    .map_or(0, |f| f.lines.len());
                for bit in order.executed.pending() {
                    let next_id = self.core.trade_counter + 1;
                    let history_on = self.core.trades_history_on;
                    let trade = self
                        .core
                        .trades
                        .entry(key)
                        .or_insert_with(|| {
                            Trade::new(next_id, order.feed, order.tradeid, history_on)
                        });
                    if trade.id == next_id {
                        self.core.trade_counter = next_id;
                    }
                    trade.update(
                        order.id,
                        bit.size,
                        bit.pprice,
                        bit.pprice * bit.psize,
                        bit.comm(),
                        bit.pnl,
                        bit.dt,
                        feed_len,
                    );
                    let snapshot = trade.clone();
                    if snapshot.is_closed() {
                        self.core.trades.remove(&key);
                    }
                    trade_updates.push(snapshot);
                }
            }

            if let Some(idx) = self.strategy_index(owner) {
                self.with_strategy(idx, |s, ctx| s.notify_order(ctx, &order));
                for trade in &trade_updates {
                    self.with_strategy(idx, |s, ctx| s.notify_trade(ctx, trade));
                }
            }
            for analyzer in &mut self.analyzers {
                analyzer.notify_order(&order);
                for trade in &trade_updates {
                    analyzer.notify_trade(trade);
                }
            }

            self.bar_orders.push(order);
            self.bar_trades.extend(trade_updates);
        }
        Ok(())
    }

    fn strategy_index(&self, owner: StratId) -> Option<usize> {
        self.strategies.iter().position(|s| s.meta.id == owner)
    }

    fn with_strategy<R>(
        &mut self,
        idx: usize,
        f: impl FnOnce(&mut dyn Strategy, &mut Ctx<'_>) -> R,
    ) -> Option<R> {
        let mut user = self.strategies[idx].user.take()?;
        let result = {
            let meta = &mut self.strategies[idx].meta;
            let mut ctx = Ctx::new(&mut self.core, meta);
            f(user.as_mut(), &mut ctx)
        };
        self.strategies[idx].user = Some(user);
        Some(result)
    }

    /// Smallest distance-to-min-period across feeds: negative while warming
    /// up, zero exactly when every feed first satisfies it.
    fn strat_status(&self, idx: usize) -> isize {
        let meta = &self.strategies[idx].meta;
        let mut status = isize::MAX;
        for (id, feed) in self.core.feeds.iter() {
            let mp = meta
                .nodes
                .iter()
                .filter(|n| self.core.graph.root_feed(**n) == Some(id))
                .map(|n| self.core.graph.min_period_of(*n))
                .max()
                .unwrap_or(1);
            status = status.min(feed.lines.len() as isize - mp as isize);
        }
        status
    }

    /// Number of master-clock iterations processed so far.
    pub fn iterations(&self) -> usize {
        self.core.iteration
    }

    /// Inspect a feed (post-run state included).
    pub fn feed(&self, id: FeedId) -> Option<&Feed> {
        self.core.feeds.get(id)
    }
}

/// Convenience builder for a memory-backed feed.
pub fn memory_feed(
    name: &str,
    timeframe: vela_data::TimeFrame,
    compression: u32,
    bars: Vec<Bar>,
) -> Feed {
    Feed::new(
        name,
        Box::new(vela_data::feed::memory::MemorySource::new(bars)),
        timeframe,
        compression,
    )
}
