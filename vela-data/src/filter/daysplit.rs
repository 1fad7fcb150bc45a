use crate::{
    bar::Bar,
    filter::{BarFilter, FilterAction},
    time,
};
use chrono::NaiveTime;

/// Splits one daily bar into two synthetic intraday ticks.
///
/// The first tick carries `OHLX` where `X` is the average of open, high and
/// low, stamped at the session open; the second is a flat `CCCC` tick at
/// the session close. Volume is split per `closevol`; open interest rides
/// on the closing tick. Daily data run through this filter approximates
/// intraday stop/limit interaction when replayed.
#[derive(Debug)]
pub struct DaySplitter {
    /// Fraction of the day's volume assigned to the closing tick.
    pub closevol: f64,
    pub session_start: NaiveTime,
    last_date: Option<chrono::NaiveDate>,
}

impl DaySplitter {
    pub fn new(closevol: f64, session_start: NaiveTime) -> Self {
        Self {
            closevol: closevol.clamp(0.0, 1.0),
            session_start,
            last_date: None,
        }
    }
}

impl Default for DaySplitter {
    fn default() -> Self {
        Self::new(0.5, NaiveTime::from_hms_opt(9, 30, 0).expect("valid hardcoded time"))
    }
}

impl BarFilter for DaySplitter {
    fn filter(&mut self, bar: Bar, session_end: NaiveTime) -> Vec<FilterAction> {
        let date = time::num2date(bar.dt).date_naive();
        if self.last_date == Some(date) {
            return Vec::new();
        }
        self.last_date = Some(date);

        let close_volume = (bar.volume * self.closevol).floor();
        let ohl_volume = bar.volume - close_volume;

        let ohl_tick = Bar {
            dt: time::date2num(chrono::TimeZone::from_utc_datetime(
                &chrono::Utc,
                &date.and_time(self.session_start),
            )),
            close: (bar.open + bar.high + bar.low) / 3.0,
            volume: ohl_volume,
            openinterest: 0.0,
            ..bar
        };
        let close_tick = Bar {
            dt: time::date2num(chrono::TimeZone::from_utc_datetime(
                &chrono::Utc,
                &date.and_time(session_end),
            )),
            open: bar.close,
            high: bar.close,
            low: bar.close,
            close: bar.close,
            volume: close_volume,
            openinterest: bar.openinterest,
        };

        vec![
            FilterAction::Deliver(ohl_tick),
            FilterAction::Deliver(close_tick),
        ]
    }

    fn reset(&mut self) {
        self.last_date = None;
    }
}
