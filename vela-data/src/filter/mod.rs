use crate::bar::Bar;
use chrono::NaiveTime;

pub mod daysplit;
pub mod heikinashi;
pub mod resample;

/// Output of a filter stage for one consumed input bar.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FilterAction {
    /// Append a completed bar to the feed; the feed's length advances.
    Deliver(Bar),
    /// Rewrite the feed's current bar in place; the length is unchanged.
    /// This is how the replayer publishes partial aggregate states.
    Update(Bar),
}

/// A transformation attached to a feed, consuming every input bar and
/// deciding what (if anything) the feed delivers downstream.
///
/// Filters chain: `Deliver`ed bars flow into the next filter, `Update`s go
/// straight to the feed. An empty action list means the input was absorbed
/// into internal state (e.g. a resampler folding bars into an open
/// aggregate).
pub trait BarFilter: Send {
    fn filter(&mut self, bar: Bar, session_end: NaiveTime) -> Vec<FilterAction>;

    /// Idle-time check: `now` is the wall clock as a day-number, `force`
    /// the timestamp another feed is about to deliver. May flush an open
    /// aggregate whose edge has been passed.
    fn check(&mut self, _now: f64, _force: Option<f64>) -> Option<FilterAction> {
        None
    }

    /// End-of-data flush of any open aggregate.
    fn last(&mut self) -> Option<FilterAction> {
        None
    }

    fn reset(&mut self) {}
}
