use crate::time::{self, MAXDATE};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// One OHLCV record at a given timestamp.
///
/// `dt` is a fractional day-number (see [`crate::time`]); all price and
/// volume fields are plain `f64`, with NaN marking a missing value.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Deserialize, Serialize, Constructor)]
pub struct Bar {
    pub dt: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub openinterest: f64,
}

impl Bar {
    /// Bar stamped with a UTC datetime, zero open interest.
    pub fn at(dt: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            dt: time::date2num(dt),
            open,
            high,
            low,
            close,
            volume,
            openinterest: 0.0,
        }
    }

    pub fn datetime(&self) -> DateTime<Utc> {
        time::num2date(self.dt)
    }
}

/// Accumulator folding input bars into one coarser aggregate bar.
///
/// A fresh accumulator carries `dt == MAXDATE` so that late-data
/// comparisons against the aggregate timestamp hold vacuously until the
/// first update.
#[derive(Debug, Clone, PartialEq)]
pub struct BarAccum {
    pub dt: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub openinterest: f64,
}

impl Default for BarAccum {
    fn default() -> Self {
        let mut accum = Self {
            dt: MAXDATE,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            volume: 0.0,
            openinterest: 0.0,
        };
        accum.reset();
        accum
    }
}

impl BarAccum {
    /// Discard state and start a new (not yet open) aggregate.
    pub fn reset(&mut self) {
        self.dt = MAXDATE;
        self.open = f64::NAN;
        self.high = f64::MIN;
        self.low = f64::MAX;
        self.close = f64::NAN;
        self.volume = 0.0;
        self.openinterest = 0.0;
    }

    /// True once at least one input bar has been folded in.
    pub fn is_open(&self) -> bool {
        self.dt.is_finite()
    }

    /// Fold one input bar: first open, max high, min low, last close,
    /// summed volume and open interest, last timestamp.
    pub fn update(&mut self, bar: &Bar) {
        if !self.is_open() {
            self.open = bar.open;
        }
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
        self.openinterest += bar.openinterest;
        self.dt = bar.dt;
    }

    /// Current aggregate as a deliverable bar.
    pub fn snapshot(&self) -> Bar {
        Bar {
            dt: self.dt,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
            openinterest: self.openinterest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::num_from_ymd_hms;

    fn bar(min: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 9, min, 0),
            open,
            high,
            low,
            close,
            volume,
            openinterest: 0.0,
        }
    }

    #[test]
    fn accumulator_folds_ohlcv() {
        let mut accum = BarAccum::default();
        assert!(!accum.is_open());

        accum.update(&bar(31, 10.0, 11.0, 9.5, 10.5, 100.0));
        accum.update(&bar(32, 10.5, 12.0, 10.0, 11.5, 50.0));
        accum.update(&bar(33, 11.5, 11.8, 9.0, 9.2, 25.0));

        let out = accum.snapshot();
        assert_eq!(out.open, 10.0);
        assert_eq!(out.high, 12.0);
        assert_eq!(out.low, 9.0);
        assert_eq!(out.close, 9.2);
        assert_eq!(out.volume, 175.0);
        assert_eq!(out.dt, num_from_ymd_hms(2024, 1, 2, 9, 33, 0));
    }

    #[test]
    fn reset_reopens_late_comparisons() {
        let mut accum = BarAccum::default();
        accum.update(&bar(31, 10.0, 11.0, 9.5, 10.5, 100.0));
        assert!(accum.is_open());

        accum.reset();
        assert!(!accum.is_open());
        // any real timestamp compares below a fresh aggregate
        assert!(num_from_ymd_hms(2024, 1, 2, 9, 31, 0) < accum.dt);
    }
}
