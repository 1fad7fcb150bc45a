use crate::engine::timer::{Timer, TimerId, TimerSchedule};
use crate::store::Store;
use chrono_tz::Tz;
use fnv::FnvHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vela_data::feed::FeedStore;
use vela_data::graph::{LineGraph, NodeId};
use vela_execution::{Broker, SimBroker, StratId, Trade};

/// Engine state shared with strategy contexts: feeds, the line graph, the
/// broker and the registries the re-architecture moved out of class-level
/// containers.
pub(crate) struct EngineCore {
    pub feeds: FeedStore,
    pub graph: LineGraph,
    pub broker: Box<dyn Broker>,
    /// Graph source node per feed (same indexing as the store).
    pub feed_nodes: Vec<NodeId>,
    /// Consumed-bar cursor per feed, for derived feeds tapping a parent.
    pub cursors: Vec<usize>,
    pub timers: Vec<Timer>,
    pub stores: Vec<Arc<dyn Store>>,
    pub tz: Tz,
    pub stop_flag: Arc<AtomicBool>,
    pub running: bool,
    pub iteration: usize,
    /// Open trades keyed by (strategy, feed, tradeid).
    pub trades: FnvHashMap<(StratId, usize, usize), Trade>,
    pub trade_counter: u64,
    pub trades_history_on: bool,
}

impl EngineCore {
    pub fn new() -> Self {
        Self {
            feeds: FeedStore::default(),
            graph: LineGraph::new(),
            broker: Box::new(SimBroker::default()),
            feed_nodes: Vec::new(),
            cursors: Vec::new(),
            timers: Vec::new(),
            stores: Vec::new(),
            tz: chrono_tz::UTC,
            stop_flag: Arc::new(AtomicBool::new(false)),
            running: false,
            iteration: 0,
            trades: FnvHashMap::default(),
            trade_counter: 0,
            trades_history_on: false,
        }
    }

    pub fn add_timer(&mut self, owner: StratId, schedule: TimerSchedule) -> TimerId {
        let id = self.timers.len();
        self.timers.push(Timer::new(id, owner, schedule));
        id
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }
}
