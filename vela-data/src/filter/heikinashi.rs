use crate::{
    bar::Bar,
    filter::{BarFilter, FilterAction},
};
use chrono::NaiveTime;

/// Rewrites each bar to its heikin-ashi form.
///
/// `ha_close` is the OHLC average, `ha_open` the midpoint of the previous
/// heikin-ashi bar, and high/low are clamped to envelope both.
#[derive(Debug, Default)]
pub struct HeikinAshi {
    prev_open: Option<f64>,
    prev_close: Option<f64>,
}

impl HeikinAshi {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BarFilter for HeikinAshi {
    fn filter(&mut self, bar: Bar, _session_end: NaiveTime) -> Vec<FilterAction> {
        let ha_close = (bar.open + bar.high + bar.low + bar.close) / 4.0;
        let ha_open = match (self.prev_open, self.prev_close) {
            (Some(po), Some(pc)) => (po + pc) / 2.0,
            _ => (bar.open + bar.close) / 2.0,
        };
        let ha_high = bar.high.max(ha_open).max(ha_close);
        let ha_low = bar.low.min(ha_open).min(ha_close);

        self.prev_open = Some(ha_open);
        self.prev_close = Some(ha_close);

        vec![FilterAction::Deliver(Bar {
            open: ha_open,
            high: ha_high,
            low: ha_low,
            close: ha_close,
            ..bar
        })]
    }

    fn reset(&mut self) {
        self.prev_open = None;
        self.prev_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::num_from_ymd_hms;

    #[test]
    fn first_bar_seeds_from_raw_open_close() {
        let mut ha = HeikinAshi::new();
        let bar = Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 17, 0, 0),
            open: 10.0,
            high: 12.0,
            low: 8.0,
            close: 11.0,
            volume: 1.0,
            openinterest: 0.0,
        };
        let out = ha.filter(bar, crate::time::default_session_end());
        let FilterAction::Deliver(first) = out[0] else {
            panic!("heikin-ashi always delivers");
        };
        assert_eq!(first.open, 10.5);
        assert_eq!(first.close, 10.25);
        assert_eq!(first.high, 12.0);
        assert_eq!(first.low, 8.0);
    }

    #[test]
    fn subsequent_opens_use_previous_midpoint() {
        let mut ha = HeikinAshi::new();
        let session = crate::time::default_session_end();
        let bar1 = Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 17, 0, 0),
            open: 10.0,
            high: 12.0,
            low: 8.0,
            close: 11.0,
            volume: 1.0,
            openinterest: 0.0,
        };
        let bar2 = Bar {
            dt: num_from_ymd_hms(2024, 1, 3, 17, 0, 0),
            open: 11.0,
            high: 13.0,
            low: 10.0,
            close: 12.0,
            volume: 1.0,
            openinterest: 0.0,
        };
        ha.filter(bar1, session);
        let out = ha.filter(bar2, session);
        let FilterAction::Deliver(second) = out[0] else {
            panic!("heikin-ashi always delivers");
        };
        // midpoint of first ha bar: (10.5 + 10.25) / 2
        assert_eq!(second.open, 10.375);
        assert_eq!(second.close, 11.5);
    }
}
