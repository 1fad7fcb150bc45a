//! # Vela
//! Event-driven backtesting engine for trading strategies.
//!
//! The engine drives one or more bar feeds forward in lockstep by
//! timestamp, evaluates strategies over a lazily-computed indicator line
//! graph, matches orders through a simulated broker and surfaces
//! everything to observers, analyzers and writers.
//!
//! * [`engine`] - the driver, configuration, timers and run loops (event
//!   mode with multi-feed timestamp sync, or vectorized over preloaded
//!   history).
//! * [`strategy`] - the user surface: bar callbacks, order issuing,
//!   sizers.
//! * [`observers`] / [`analyzers`] - state-derived time series and
//!   end-of-run summaries.
//! * [`writer`] - CSV output of feeds, indicator and observer lines.
//! * [`optimize`] - parameter sweeps across worker tasks.
//!
//! Market-data plumbing lives in [`vela_data`], order/position/broker
//! machinery in [`vela_execution`] and the indicator catalog in
//! [`vela_ta`].
//!
//! ```no_run
//! use vela::prelude::*;
//!
//! struct Hold { sma: Option<NodeId> }
//!
//! impl Strategy for Hold {
//!     fn init(&mut self, ctx: &mut Ctx<'_>) -> Result<StrategyInit, VelaError> {
//!         self.sma = Some(ctx.add_indicator(Box::new(vela_ta::Sma::new(3)), &[])?);
//!         Ok(StrategyInit::Ready)
//!     }
//!
//!     fn next(&mut self, ctx: &mut Ctx<'_>) {
//!         let sma = ctx.ind(self.sma.unwrap(), 0);
//!         if ctx.position(0).is_flat() && ctx.close(0, 0) > sma {
//!             let _ = ctx.buy(0, None);
//!         }
//!     }
//! }
//!
//! let mut engine = Engine::default();
//! engine.add_feed(vela::engine::memory_feed("m1", TimeFrame::Minutes, 1, vec![]));
//! engine.add_strategy(Box::new(Hold { sma: None }));
//! let summary = engine.run().unwrap();
//! println!("final value: {}", summary.value);
//! ```

pub mod analyzers;
pub mod engine;
pub mod error;
pub mod logging;
pub mod observers;
pub mod optimize;
pub mod store;
pub mod strategy;
pub mod writer;

pub use engine::{config::EngineConfig, config::ExactBars, Engine, RunSummary};
pub use error::VelaError;
pub use strategy::{Ctx, Strategy, StrategyInit};

/// Everything a strategy module typically needs.
pub mod prelude {
    pub use crate::engine::config::{EngineConfig, ExactBars};
    pub use crate::engine::timer::TimerSchedule;
    pub use crate::engine::{memory_feed, Engine, RunSummary};
    pub use crate::error::VelaError;
    pub use crate::strategy::sizer::{AllInSizer, FixedSize, PercentSizer, Sizer};
    pub use crate::strategy::{Ctx, Strategy, StrategyInit};
    pub use vela_data::bar::Bar;
    pub use vela_data::filter::resample::ResampleConfig;
    pub use vela_data::graph::NodeId;
    pub use vela_data::{Feed, FeedId, FeedStatus, Indicator, LineRef, TimeFrame};
    pub use vela_execution::{
        Broker, CommissionScheme, ExecType, Order, OrderRef, OrderSpec, OrderStatus, Side,
        SimBroker, SimBrokerConfig, SlippageConfig, Trade, Validity,
    };
}
