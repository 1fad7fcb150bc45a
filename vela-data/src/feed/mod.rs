use crate::{
    bar::Bar,
    filter::{BarFilter, FilterAction},
    line::series::LineSeries,
    time,
    timeframe::TimeFrame,
};
use chrono::NaiveTime;
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::VecDeque;
use tracing::debug;

pub mod memory;

/// Index of a feed inside the engine's [`FeedStore`].
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Deserialize,
    Serialize,
    Display,
    From,
)]
pub struct FeedId(pub usize);

/// Canonical line layout of a feed.
pub mod feedline {
    pub const DATETIME: usize = 0;
    pub const OPEN: usize = 1;
    pub const HIGH: usize = 2;
    pub const LOW: usize = 3;
    pub const CLOSE: usize = 4;
    pub const VOLUME: usize = 5;
    pub const OPENINTEREST: usize = 6;

    pub const ALIASES: [&str; 7] = [
        "datetime",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "openinterest",
    ];
}

/// Connection/delivery state reported by a feed adapter.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum FeedStatus {
    Connected,
    Disconnected,
    ConnBroken,
    Delayed,
    Live,
    NotSubscribed,
    NotSupported,
    Unknown,
}

/// Outcome of asking a feed for its next bar.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FeedNext {
    /// A bar (or an in-place replay update) was delivered.
    Produced,
    /// Nothing more to deliver; history exhausted and filters flushed.
    Unchanged,
    /// Live source has no data yet; the engine keeps notifications and
    /// resampler checks running.
    Idle,
}

/// One pull from a bar source adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Bar(Bar),
    /// Live tick not yet available; never blocks.
    Idle,
    Exhausted,
    Status(FeedStatus),
}

/// Adapter contract for anything able to produce bars.
///
/// Concrete CSV/HTTP/venue adapters live outside the core; the in-memory
/// implementation in [`memory`] backs tests and optimization snapshots.
pub trait BarSource: Send {
    fn start(&mut self) {}
    fn stop(&mut self) {}
    fn next_bar(&mut self) -> SourceEvent;
    fn reset(&mut self) {}
    fn is_live(&self) -> bool {
        false
    }
}

enum Delivery {
    Append(Bar),
    Update(Bar),
}

/// A time-ordered source of bars, materialised into line buffers.
///
/// A feed owns its OHLCV [`LineSeries`], an optional source adapter, and a
/// chain of [`BarFilter`]s (resampler, replayer, bar transforms). Derived
/// feeds have no source of their own; the engine taps a parent feed's
/// delivered bars into [`Feed::push_input`].
pub struct Feed {
    pub name: SmolStr,
    pub lines: LineSeries,
    pub timeframe: TimeFrame,
    pub compression: u32,
    pub session_end: NaiveTime,
    /// Seconds a live source may be given to produce before the engine
    /// moves on.
    pub qcheck: f64,
    /// Set while a resampler/replayer filter is attached.
    pub resampling: bool,
    pub replaying: bool,
    /// Parent feed for derived (resampled/replayed) feeds.
    pub parent: Option<FeedId>,
    source: Option<Box<dyn BarSource>>,
    filters: Vec<Box<dyn BarFilter>>,
    stack: VecDeque<Delivery>,
    input_queue: VecDeque<Bar>,
    notifications: VecDeque<FeedStatus>,
    last_status: FeedStatus,
    started: bool,
    exhausted: bool,
    flushed: bool,
    preloaded: bool,
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("name", &self.name)
            .field("timeframe", &self.timeframe)
            .field("compression", &self.compression)
            .field("len", &self.lines.len())
            .field("status", &self.last_status)
            .finish()
    }
}

impl Feed {
    pub fn new(
        name: impl Into<SmolStr>,
        source: Box<dyn BarSource>,
        timeframe: TimeFrame,
        compression: u32,
    ) -> Self {
        let mut feed = Self::raw(name, timeframe, compression);
        feed.source = Some(source);
        feed
    }

    /// Feed without a source: fixtures and derived feeds.
    pub fn raw(name: impl Into<SmolStr>, timeframe: TimeFrame, compression: u32) -> Self {
        Self {
            name: name.into(),
            lines: LineSeries::new(feedline::ALIASES),
            timeframe,
            compression: compression.max(1),
            session_end: time::default_session_end(),
            qcheck: 0.0,
            resampling: false,
            replaying: false,
            parent: None,
            source: None,
            filters: Vec::new(),
            stack: VecDeque::new(),
            input_queue: VecDeque::new(),
            notifications: VecDeque::new(),
            last_status: FeedStatus::Unknown,
            started: false,
            exhausted: false,
            flushed: false,
            preloaded: false,
        }
    }

    /// Derived feed fed from a parent's delivered bars.
    pub fn derived(
        name: impl Into<SmolStr>,
        parent: FeedId,
        timeframe: TimeFrame,
        compression: u32,
    ) -> Self {
        let mut feed = Self::raw(name, timeframe, compression);
        feed.parent = Some(parent);
        feed
    }

    pub fn add_filter(&mut self, filter: Box<dyn BarFilter>) {
        self.filters.push(filter);
    }

    pub fn start(&mut self) {
        if let Some(source) = &mut self.source {
            source.start();
        }
        self.started = true;
    }

    pub fn stop(&mut self) {
        if let Some(source) = &mut self.source {
            source.stop();
        }
        self.started = false;
    }

    pub fn is_live(&self) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_live())
    }

    /// Whether undelivered data is already buffered (filters, taps or
    /// rewound bars).
    pub fn has_live_data(&self) -> bool {
        !self.stack.is_empty()
            || !self.input_queue.is_empty()
            || self.lines.len() < self.lines.buflen()
    }

    pub fn last_status(&self) -> FeedStatus {
        self.last_status
    }

    /// Drain pending status notifications for `notify_data` delivery.
    pub fn take_notifications(&mut self) -> Vec<FeedStatus> {
        self.notifications.drain(..).collect()
    }

    fn set_status(&mut self, status: FeedStatus) {
        if status != self.last_status {
            debug!(feed = %self.name, %status, "feed status change");
            self.last_status = status;
            self.notifications.push_back(status);
        }
    }

    /// Queue a bar tapped from the parent feed.
    pub fn push_input(&mut self, bar: Bar) {
        self.input_queue.push_back(bar);
    }

    pub fn datetime(&self, ago: isize) -> f64 {
        self.lines.line(feedline::DATETIME).get(ago)
    }

    pub fn open(&self, ago: isize) -> f64 {
        self.lines.line(feedline::OPEN).get(ago)
    }

    pub fn high(&self, ago: isize) -> f64 {
        self.lines.line(feedline::HIGH).get(ago)
    }

    pub fn low(&self, ago: isize) -> f64 {
        self.lines.line(feedline::LOW).get(ago)
    }

    pub fn close(&self, ago: isize) -> f64 {
        self.lines.line(feedline::CLOSE).get(ago)
    }

    pub fn volume(&self, ago: isize) -> f64 {
        self.lines.line(feedline::VOLUME).get(ago)
    }

    pub fn openinterest(&self, ago: isize) -> f64 {
        self.lines.line(feedline::OPENINTEREST).get(ago)
    }

    pub fn current_bar(&self) -> Bar {
        self.bar_at(0)
    }

    pub fn bar_at(&self, ago: isize) -> Bar {
        Bar {
            dt: self.datetime(ago),
            open: self.open(ago),
            high: self.high(ago),
            low: self.low(ago),
            close: self.close(ago),
            volume: self.volume(ago),
            openinterest: self.openinterest(ago),
        }
    }

    fn write_bar(&mut self, bar: &Bar, ago: isize) {
        self.lines.line_mut(feedline::DATETIME).set(ago, bar.dt);
        self.lines.line_mut(feedline::OPEN).set(ago, bar.open);
        self.lines.line_mut(feedline::HIGH).set(ago, bar.high);
        self.lines.line_mut(feedline::LOW).set(ago, bar.low);
        self.lines.line_mut(feedline::CLOSE).set(ago, bar.close);
        self.lines.line_mut(feedline::VOLUME).set(ago, bar.volume);
        self.lines
            .line_mut(feedline::OPENINTEREST)
            .set(ago, bar.openinterest);
    }

    fn deliver(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Append(bar) => {
                self.lines.forward();
                self.write_bar(&bar, 0);
            }
            Delivery::Update(bar) => {
                if self.lines.is_empty() {
                    self.lines.forward();
                }
                self.write_bar(&bar, 0);
            }
        }
    }

    /// Run one raw bar through the filter chain, queueing deliveries.
    fn apply_filters(&mut self, bar: Bar) {
        if self.filters.is_empty() {
            self.stack.push_back(Delivery::Append(bar));
            return;
        }
        let session_end = self.session_end;
        let mut work: VecDeque<(usize, Bar)> = VecDeque::new();
        work.push_back((0, bar));
        while let Some((stage, bar)) = work.pop_front() {
            if stage >= self.filters.len() {
                self.stack.push_back(Delivery::Append(bar));
                continue;
            }
            for action in self.filters[stage].filter(bar, session_end) {
                match action {
                    FilterAction::Deliver(out) => work.push_back((stage + 1, out)),
                    // updates bypass later stages and land on the feed
                    FilterAction::Update(out) => self.stack.push_back(Delivery::Update(out)),
                }
            }
        }
    }

    /// Flush filters once the raw history is exhausted.
    fn flush_filters(&mut self) {
        for stage in 0..self.filters.len() {
            if let Some(action) = self.filters[stage].last() {
                match action {
                    FilterAction::Deliver(bar) => {
                        // run tail stages over the flushed bar
                        let session_end = self.session_end;
                        let mut work: VecDeque<(usize, Bar)> = VecDeque::new();
                        work.push_back((stage + 1, bar));
                        while let Some((s, b)) = work.pop_front() {
                            if s >= self.filters.len() {
                                self.stack.push_back(Delivery::Append(b));
                                continue;
                            }
                            for action in self.filters[s].filter(b, session_end) {
                                match action {
                                    FilterAction::Deliver(out) => work.push_back((s + 1, out)),
                                    FilterAction::Update(out) => {
                                        self.stack.push_back(Delivery::Update(out))
                                    }
                                }
                            }
                        }
                    }
                    FilterAction::Update(bar) => self.stack.push_back(Delivery::Update(bar)),
                }
            }
        }
    }

    /// Produce the next bar: advance over preloaded/rewound data, else pull
    /// the input queue or source through the filter chain.
    pub fn next(&mut self) -> FeedNext {
        if self.lines.len() < self.lines.buflen() {
            self.lines.advance(1);
            return FeedNext::Produced;
        }
        if self.preloaded {
            return FeedNext::Unchanged;
        }
        loop {
            if let Some(delivery) = self.stack.pop_front() {
                self.deliver(delivery);
                return FeedNext::Produced;
            }

            let bar = if let Some(bar) = self.input_queue.pop_front() {
                Some(bar)
            } else if self.exhausted {
                None
            } else if let Some(source) = &mut self.source {
                match source.next_bar() {
                    SourceEvent::Bar(bar) => Some(bar),
                    SourceEvent::Idle => return FeedNext::Idle,
                    SourceEvent::Status(status) => {
                        self.set_status(status);
                        continue;
                    }
                    SourceEvent::Exhausted => {
                        self.exhausted = true;
                        None
                    }
                }
            } else {
                None
            };

            match bar {
                Some(bar) => self.apply_filters(bar),
                None => {
                    if self.parent.is_some() && !self.exhausted {
                        // waiting for the parent to tap more bars in
                        return FeedNext::Unchanged;
                    }
                    // no source and no parent: nothing will ever arrive
                    self.exhausted = true;
                    if !self.flushed {
                        self.flushed = true;
                        self.flush_filters();
                        continue;
                    }
                    return FeedNext::Unchanged;
                }
            }
        }
    }

    /// Mark a derived feed's upstream as finished so the next pull flushes
    /// open aggregates.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.flushed && self.stack.is_empty() && self.input_queue.is_empty()
    }

    /// Idle/forced check: give filters a chance to deliver a synthetic bar
    /// whose edge has been passed by the wall clock or a master feed.
    pub fn check(&mut self, force: Option<f64>) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        let now = time::now_num();
        let mut produced = false;
        for filter in &mut self.filters {
            if let Some(action) = filter.check(now, force) {
                match action {
                    FilterAction::Deliver(bar) => self.stack.push_back(Delivery::Append(bar)),
                    FilterAction::Update(bar) => self.stack.push_back(Delivery::Update(bar)),
                }
            }
        }
        if let Some(delivery) = self.stack.pop_front() {
            self.deliver(delivery);
            produced = true;
        }
        produced
    }

    /// Take back the just-delivered bar so it re-delivers on the next
    /// iteration (timestamp overshoot during multi-feed sync).
    pub fn rewind_bar(&mut self) {
        self.lines.rewind(1);
    }

    /// Load the whole history into the buffers ahead of a vectorized run.
    /// Leaves the index homed; only valid for non-live sources.
    pub fn preload(&mut self) {
        if self.preloaded || self.is_live() {
            return;
        }
        loop {
            match self.next() {
                FeedNext::Produced => continue,
                FeedNext::Unchanged | FeedNext::Idle => break,
            }
        }
        self.lines.home();
        self.preloaded = true;
    }

    pub fn is_preloaded(&self) -> bool {
        self.preloaded
    }

    /// Restore the feed to its pre-run state.
    pub fn reset(&mut self) {
        self.lines.reset();
        self.stack.clear();
        self.input_queue.clear();
        self.notifications.clear();
        self.exhausted = false;
        self.flushed = false;
        self.preloaded = false;
        if let Some(source) = &mut self.source {
            source.reset();
        }
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    /// Switch line storage to a ring of `capacity` (memory-saving runs).
    pub fn qbuffer(&mut self, capacity: usize) {
        self.lines.qbuffer(capacity);
    }
}

/// Engine-owned collection of feeds; iteration order is insertion order,
/// which is the tie-break for equal timestamps.
#[derive(Debug, Default)]
pub struct FeedStore {
    feeds: Vec<Feed>,
}

impl FeedStore {
    pub fn push(&mut self, feed: Feed) -> FeedId {
        self.feeds.push(feed);
        FeedId(self.feeds.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    pub fn get(&self, id: FeedId) -> Option<&Feed> {
        self.feeds.get(id.0)
    }

    pub fn get_mut(&mut self, id: FeedId) -> Option<&mut Feed> {
        self.feeds.get_mut(id.0)
    }

    pub fn ids(&self) -> impl Iterator<Item = FeedId> {
        (0..self.feeds.len()).map(FeedId)
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeedId, &Feed)> {
        self.feeds.iter().enumerate().map(|(i, f)| (FeedId(i), f))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FeedId, &mut Feed)> {
        self.feeds
            .iter_mut()
            .enumerate()
            .map(|(i, f)| (FeedId(i), f))
    }
}
