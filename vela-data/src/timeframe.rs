use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Period represented by one bar, finest to coarsest.
///
/// The discriminant order matters: feeds are processed coarsest-last and the
/// resampler only aggregates towards a coarser (greater) timeframe.
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
)]
pub enum TimeFrame {
    Ticks,
    MicroSeconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeFrame {
    /// True for frames finer than a day but coarser than ticks, where bar
    /// boundaries are computed from intraday points.
    pub fn is_subdays(&self) -> bool {
        TimeFrame::Ticks < *self && *self < TimeFrame::Days
    }

    /// True for frames finer than a week, where edge times can be adjusted
    /// onto intraday/session boundaries.
    pub fn is_subweeks(&self) -> bool {
        *self < TimeFrame::Weeks
    }

    /// Intraday point of a wall-clock time in this frame's unit, plus the
    /// sub-unit rest.
    ///
    /// E.g. 00:05:00 in `Minutes` -> point 5; 00:05:20 in `Seconds` ->
    /// point 320. A non-zero rest means the time does not sit exactly on a
    /// unit boundary.
    pub fn intraday_point(&self, tm: chrono::NaiveTime) -> (i64, i64) {
        use chrono::Timelike;

        let (h, m, s, us) = (
            i64::from(tm.hour()),
            i64::from(tm.minute()),
            i64::from(tm.second()),
            i64::from(tm.nanosecond() / 1_000),
        );

        match self {
            TimeFrame::Hours => (h, (m * 60 + s) * 1_000_000 + us),
            TimeFrame::Minutes => (h * 60 + m, s * 1_000_000 + us),
            TimeFrame::Seconds => ((h * 60 + m) * 60 + s, us),
            TimeFrame::MicroSeconds => ((((h * 60 + m) * 60) + s) * 1_000_000 + us, 0),
            _ => (h * 60 + m, s * 1_000_000 + us),
        }
    }

    /// Decompose an intraday point back into `(hour, minute, second, micro)`
    /// wall-clock parts. Hours may exceed 23 when a right edge lands on the
    /// following midnight; callers roll the excess into extra days.
    pub fn point_to_time(&self, point: i64) -> (i64, i64, i64, i64) {
        match self {
            TimeFrame::Hours => (point, 0, 0, 0),
            TimeFrame::Minutes => (point / 60, point % 60, 0, 0),
            TimeFrame::Seconds => (point / 3600, (point % 3600) / 60, point % 60, 0),
            TimeFrame::MicroSeconds => {
                let (secs, us) = (point / 1_000_000, point % 1_000_000);
                (secs / 3600, (secs % 3600) / 60, secs % 60, us)
            }
            _ => (point / 60, point % 60, 0, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    #[test]
    fn frames_order_fine_to_coarse() {
        assert!(TimeFrame::Ticks < TimeFrame::Seconds);
        assert!(TimeFrame::Minutes < TimeFrame::Hours);
        assert!(TimeFrame::Days < TimeFrame::Years);
        assert!(TimeFrame::Minutes.is_subdays());
        assert!(!TimeFrame::Days.is_subdays());
        assert!(TimeFrame::Days.is_subweeks());
    }

    #[test]
    fn intraday_points_follow_frame_units() {
        let tm = NaiveTime::from_hms_opt(0, 5, 20).unwrap();
        assert_eq!(TimeFrame::Minutes.intraday_point(tm).0, 5);
        assert_eq!(TimeFrame::Seconds.intraday_point(tm).0, 320);

        // 09:31:00 is on a minute boundary, rest must be zero
        let on_edge = NaiveTime::from_hms_opt(9, 31, 0).unwrap();
        assert_eq!(TimeFrame::Minutes.intraday_point(on_edge), (9 * 60 + 31, 0));
    }

    #[test]
    fn point_round_trips_through_time_parts() {
        let tm = NaiveTime::from_hms_opt(14, 35, 0).unwrap();
        let (point, rest) = TimeFrame::Minutes.intraday_point(tm);
        assert_eq!(rest, 0);
        assert_eq!(TimeFrame::Minutes.point_to_time(point), (14, 35, 0, 0));
    }
}
