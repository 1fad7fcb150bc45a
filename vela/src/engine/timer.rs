use chrono::{NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use vela_data::time;

pub type TimerId = usize;

/// Schedule of a strategy timer.
///
/// Fires at `when` (+ `offset`) on matching days, then every `repeat`
/// seconds until the session rolls over. `cheat` timers fire before the
/// broker evaluates orders.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TimerSchedule {
    pub when: NaiveTime,
    /// Seconds added to `when`.
    pub offset: f64,
    /// Intraday repetition in seconds; `None` fires once per day.
    pub repeat: Option<f64>,
    /// Empty means all weekdays.
    pub weekdays: Vec<Weekday>,
    /// Empty means all month days.
    pub monthdays: Vec<u32>,
    pub cheat: bool,
}

impl TimerSchedule {
    pub fn at(when: NaiveTime) -> Self {
        Self {
            when,
            offset: 0.0,
            repeat: None,
            weekdays: Vec::new(),
            monthdays: Vec::new(),
            cheat: false,
        }
    }

    pub fn cheat(mut self) -> Self {
        self.cheat = true;
        self
    }

    pub fn repeating(mut self, seconds: f64) -> Self {
        self.repeat = Some(seconds);
        self
    }

    fn day_matches(&self, dtnum: f64) -> bool {
        let weekday_ok =
            self.weekdays.is_empty() || self.weekdays.contains(&time::weekday_of(dtnum));
        let monthday_ok =
            self.monthdays.is_empty() || self.monthdays.contains(&time::monthday_of(dtnum));
        weekday_ok && monthday_ok
    }
}

const SECS_PER_DAY: f64 = 86_400.0;

/// Live timer state: owning strategy plus the next due timestamp.
#[derive(Debug, Clone)]
pub struct Timer {
    pub id: TimerId,
    pub owner: usize,
    pub schedule: TimerSchedule,
    next_due: f64,
}

impl Timer {
    pub fn new(id: TimerId, owner: usize, schedule: TimerSchedule) -> Self {
        Self {
            id,
            owner,
            schedule,
            next_due: f64::NAN,
        }
    }

    fn due_on_day(&self, daynum: f64) -> f64 {
        let base = time::replace_time(daynum, 0, 0, 0, 0);
        let seconds = self.schedule.when.hour() as f64 * 3600.0
            + self.schedule.when.minute() as f64 * 60.0
            + self.schedule.when.second() as f64
            + self.schedule.offset;
        base + seconds / SECS_PER_DAY
    }

    /// Check against the engine clock; returns the scheduled firing time
    /// when due.
    pub fn check(&mut self, dtnum: f64) -> Option<f64> {
        if !dtnum.is_finite() {
            return None;
        }
        if self.next_due.is_nan() {
            self.next_due = self.seek_due(dtnum);
        }
        if dtnum < self.next_due {
            return None;
        }
        let fired = self.next_due;

        self.next_due = match self.schedule.repeat {
            Some(seconds) => {
                let step = seconds / SECS_PER_DAY;
                let mut due = fired + step;
                // skip slots already in the past
                while due <= dtnum {
                    due += step;
                }
                // repetition stays within the firing day
                if due.floor() != fired.floor() {
                    self.seek_due(fired.floor() + 1.0)
                } else {
                    due
                }
            }
            None => self.seek_due(fired.floor() + 1.0),
        };
        Some(fired)
    }

    /// First matching due time at or after `dtnum`.
    fn seek_due(&self, dtnum: f64) -> f64 {
        let mut day = dtnum.floor();
        for _ in 0..366 {
            if self.schedule.day_matches(day) {
                let due = self.due_on_day(day);
                if due >= dtnum {
                    return due;
                }
            }
            day += 1.0;
        }
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_data::time::num_from_ymd_hms;

    #[test]
    fn fires_once_per_day_at_the_scheduled_time() {
        let schedule = TimerSchedule::at(NaiveTime::from_hms_opt(10, 0, 0).unwrap());
        let mut timer = Timer::new(0, 0, schedule);

        assert!(timer.check(num_from_ymd_hms(2024, 1, 2, 9, 30, 0)).is_none());
        let fired = timer.check(num_from_ymd_hms(2024, 1, 2, 10, 15, 0)).unwrap();
        assert_eq!(fired, num_from_ymd_hms(2024, 1, 2, 10, 0, 0));
        // same day: not again
        assert!(timer.check(num_from_ymd_hms(2024, 1, 2, 16, 0, 0)).is_none());
        // next day
        assert!(timer.check(num_from_ymd_hms(2024, 1, 3, 10, 0, 0)).is_some());
    }

    #[test]
    fn repeat_fires_each_interval() {
        let schedule = TimerSchedule::at(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
            .repeating(3600.0);
        let mut timer = Timer::new(0, 0, schedule);

        assert!(timer.check(num_from_ymd_hms(2024, 1, 2, 10, 0, 0)).is_some());
        assert!(timer.check(num_from_ymd_hms(2024, 1, 2, 10, 30, 0)).is_none());
        let fired = timer.check(num_from_ymd_hms(2024, 1, 2, 11, 0, 0)).unwrap();
        assert_eq!(fired, num_from_ymd_hms(2024, 1, 2, 11, 0, 0));
    }

    #[test]
    fn weekday_filter_skips_days() {
        let schedule = TimerSchedule {
            weekdays: vec![Weekday::Wed],
            ..TimerSchedule::at(NaiveTime::from_hms_opt(10, 0, 0).unwrap())
        };
        let mut timer = Timer::new(0, 0, schedule);

        // 2024-01-02 is a Tuesday: no fire
        assert!(timer.check(num_from_ymd_hms(2024, 1, 2, 12, 0, 0)).is_none());
        // Wednesday fires
        let fired = timer.check(num_from_ymd_hms(2024, 1, 3, 10, 0, 0)).unwrap();
        assert_eq!(fired, num_from_ymd_hms(2024, 1, 3, 10, 0, 0));
    }
}
