use crate::{
    bar::{Bar, BarAccum},
    filter::{BarFilter, FilterAction},
    time,
    timeframe::TimeFrame,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Aggregation parameters shared by [`Resampler`] and [`Replayer`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResampleConfig {
    pub timeframe: TimeFrame,
    pub compression: u32,
    /// Align output bars to calendar boundaries of the target frame.
    pub bar2edge: bool,
    /// Stamp output bars to the boundary instead of the last input time.
    /// Only honoured when `bar2edge` is set and the frame is sub-week.
    pub adjbartime: bool,
    /// Stamp to the closing edge of the boundary rather than the opening
    /// one.
    pub rightedge: bool,
    /// Accept out-of-order input by folding it into the open aggregate with
    /// a nudged timestamp; when unset, late bars are dropped.
    pub takelate: bool,
    /// Shift applied to the intraday point before boundary detection.
    pub boundoff: i64,
    /// Close aggregates at the feed's session end.
    pub sessionend: bool,
}

impl ResampleConfig {
    pub fn new(timeframe: TimeFrame, compression: u32) -> Self {
        Self {
            timeframe,
            compression: compression.max(1),
            bar2edge: true,
            adjbartime: true,
            rightedge: true,
            takelate: true,
            boundoff: 0,
            sessionend: true,
        }
    }

    /// Replay defaults keep the last input timestamp on partial updates.
    pub fn for_replay(timeframe: TimeFrame, compression: u32) -> Self {
        Self {
            adjbartime: false,
            ..Self::new(timeframe, compression)
        }
    }
}

/// Shared boundary/aggregation core.
///
/// An input bar closes the open aggregate when (a) its timestamp crosses
/// the next timeframe boundary, (b) `compression` crossings have
/// accumulated since the last close, or (c) the session end is reached.
/// Timestamps are treated as bucket-opening times: a bar landing exactly on
/// an edge belongs to the bucket that edge opens.
#[derive(Debug)]
struct ResampleCore {
    cfg: ResampleConfig,
    accum: BarAccum,
    compcount: u32,
    prev_input_dt: f64,
    next_eos: Option<f64>,
    last_eos: f64,
    subdays: bool,
    subweeks: bool,
    doadjusttime: bool,
}

/// One microsecond in day-number units, the nudge applied to late data.
const LATE_NUDGE: f64 = 1e-6 / 86_400.0;

impl ResampleCore {
    fn new(cfg: ResampleConfig) -> Self {
        let subdays = cfg.timeframe.is_subdays();
        let subweeks = cfg.timeframe.is_subweeks();
        let doadjusttime = cfg.bar2edge && cfg.adjbartime && subweeks;
        Self {
            cfg,
            accum: BarAccum::default(),
            compcount: 0,
            prev_input_dt: f64::NEG_INFINITY,
            next_eos: None,
            last_eos: f64::NEG_INFINITY,
            subdays,
            subweeks,
            doadjusttime,
        }
    }

    fn reset(&mut self) {
        self.accum.reset();
        self.compcount = 0;
        self.prev_input_dt = f64::NEG_INFINITY;
        self.next_eos = None;
        self.last_eos = f64::NEG_INFINITY;
    }

    /// Intraday point of a day-number in the target frame's unit, shifted
    /// by `boundoff`.
    fn point(&self, dt: f64) -> (i64, i64) {
        let (point, rest) = self.cfg.timeframe.intraday_point(time::time_of(dt));
        (point + self.cfg.boundoff, rest)
    }

    fn ensure_eos(&mut self, reference_dt: f64, session_end: NaiveTime) {
        if self.next_eos.is_none() {
            self.next_eos = Some(time::next_session_end(reference_dt, session_end));
        }
    }

    fn eos_crossed(&mut self, dt: f64) -> bool {
        let Some(eos) = self.next_eos else {
            return false;
        };
        if dt > eos && self.accum.is_open() && self.accum.dt <= eos {
            self.last_eos = eos;
            self.next_eos = None;
            return true;
        }
        false
    }

    fn eos_reached(&mut self, dt: f64) -> bool {
        let Some(eos) = self.next_eos else {
            return false;
        };
        if dt == eos {
            self.last_eos = eos;
            self.next_eos = None;
            return true;
        }
        false
    }

    /// Does `dt` fall past the open aggregate's boundary? Decided before
    /// the bar is folded in.
    fn over_before(&mut self, dt: f64) -> bool {
        if !self.accum.is_open() {
            return false;
        }
        if self.cfg.sessionend && self.subweeks && self.eos_crossed(dt) {
            return true;
        }
        if dt < self.accum.dt {
            return false;
        }

        match self.cfg.timeframe {
            TimeFrame::Ticks => true,
            tf if tf < TimeFrame::Days => {
                // day rollover without a session-end close still breaks the
                // aggregate
                if time::num2date(dt).date_naive() > time::num2date(self.accum.dt).date_naive() {
                    return true;
                }
                let (point, _) = self.point(self.accum.dt);
                let (barpoint, _) = self.point(dt);
                if barpoint <= point {
                    return false;
                }
                if !self.cfg.bar2edge {
                    true
                } else {
                    let comp = i64::from(self.cfg.compression);
                    barpoint / comp > point / comp
                }
            }
            TimeFrame::Days => {
                time::num2date(dt).date_naive() > time::num2date(self.accum.dt).date_naive()
            }
            TimeFrame::Weeks => time::iso_yearweek(dt) > time::iso_yearweek(self.accum.dt),
            TimeFrame::Months => time::yearmonth(dt) > time::yearmonth(self.accum.dt),
            TimeFrame::Years => time::year(dt) > time::year(self.accum.dt),
            _ => false,
        }
    }

    /// Compression gate: sub-day edge-aligned aggregates close on every
    /// boundary crossing (the compression is already folded into the bucket
    /// width); everything else counts crossings.
    fn fire(&mut self) -> bool {
        if self.subdays && self.cfg.bar2edge {
            return true;
        }
        self.compcount += 1;
        self.compcount % self.cfg.compression == 0
    }

    /// Edge time for the open aggregate per `rightedge`/`adjbartime`.
    fn adjusted_time(&self) -> f64 {
        match self.cfg.timeframe {
            TimeFrame::Days => {
                if self.last_eos.is_finite() {
                    self.last_eos
                } else {
                    self.accum.dt
                }
            }
            tf if tf.is_subdays() => {
                let (point, _) = self.point(self.accum.dt);
                let comp = i64::from(self.cfg.compression);
                let mut edge = point / comp;
                if self.cfg.rightedge {
                    edge += 1;
                }
                let edge_point = edge * comp - self.cfg.boundoff;
                let (h, m, s, us) = self.cfg.timeframe.point_to_time(edge_point);
                time::replace_time(self.accum.dt, h, m, s, us)
            }
            _ => self.accum.dt,
        }
    }

    fn close(&mut self, adjust: bool) -> Bar {
        let mut bar = self.accum.snapshot();
        if adjust && self.doadjusttime {
            let adjusted = self.adjusted_time();
            if adjusted > bar.dt || !self.cfg.rightedge {
                bar.dt = adjusted;
            }
        }
        self.accum.reset();
        bar
    }

    /// Late input: timestamp at or before the previously seen one.
    fn is_late(&self, dt: f64) -> bool {
        self.subdays && dt <= self.prev_input_dt
    }

    /// Fold a late bar into the open aggregate, nudging its time just past
    /// the reference so ordering is preserved.
    fn take_late(&mut self, bar: &Bar) {
        let reference = self.prev_input_dt;
        self.accum.update(bar);
        self.accum.dt = reference + LATE_NUDGE;
    }

    /// Would the aggregate's adjusted delivery time be reached by
    /// `force_dt`? Drives synthetic delivery when another feed's clock has
    /// moved past this aggregate's edge.
    fn due_at(&self, force_dt: f64) -> bool {
        match self.cfg.timeframe {
            TimeFrame::Ticks => true,
            TimeFrame::Days => self.next_eos.is_some_and(|eos| eos <= force_dt),
            tf if tf.is_subdays() => self.adjusted_time() <= force_dt,
            _ => false,
        }
    }

    /// Idle/forced delivery decision, consuming the session-end bookkeeping
    /// when a daily aggregate is flushed against another feed's clock.
    fn check_due(&mut self, now: f64, force: Option<f64>) -> bool {
        if !self.accum.is_open() {
            return false;
        }
        match force {
            Some(force_dt) => {
                let due = self.due_at(force_dt);
                if due && self.cfg.timeframe == TimeFrame::Days {
                    if let Some(eos) = self.next_eos.take() {
                        self.last_eos = eos;
                    }
                }
                due
            }
            None => self.over_before(now),
        }
    }
}

/// Folds N input bars into one coarser bar, delivering only closed
/// aggregates.
#[derive(Debug)]
pub struct Resampler {
    core: ResampleCore,
}

impl Resampler {
    pub fn new(cfg: ResampleConfig) -> Self {
        Self {
            core: ResampleCore::new(cfg),
        }
    }
}

impl BarFilter for Resampler {
    fn filter(&mut self, bar: Bar, session_end: NaiveTime) -> Vec<FilterAction> {
        let core = &mut self.core;
        let mut out = Vec::new();

        if core.is_late(bar.dt) {
            if core.cfg.takelate {
                core.take_late(&bar);
            }
            return out;
        }
        core.ensure_eos(bar.dt, session_end);

        if core.over_before(bar.dt) && core.fire() {
            out.push(FilterAction::Deliver(core.close(true)));
        }

        core.accum.update(&bar);
        core.prev_input_dt = bar.dt;

        // a bar landing exactly on the session end closes inclusively
        if core.cfg.sessionend && core.subweeks && core.eos_reached(bar.dt) && core.fire() {
            out.push(FilterAction::Deliver(core.close(true)));
        }

        out
    }

    fn check(&mut self, now: f64, force: Option<f64>) -> Option<FilterAction> {
        let core = &mut self.core;
        core.check_due(now, force)
            .then(|| FilterAction::Deliver(core.close(true)))
    }

    fn last(&mut self) -> Option<FilterAction> {
        self.core
            .accum
            .is_open()
            .then(|| FilterAction::Deliver(self.core.close(true)))
    }

    fn reset(&mut self) {
        self.core.reset();
    }
}

/// Replays every partial state of the aggregate as an in-place update of
/// the output feed; a new output slot only appears when a fresh aggregate
/// opens, so strategies can react to intrabar development.
#[derive(Debug)]
pub struct Replayer {
    core: ResampleCore,
    /// Whether the current aggregate already owns an output slot.
    slot_open: bool,
}

impl Replayer {
    pub fn new(cfg: ResampleConfig) -> Self {
        Self {
            core: ResampleCore::new(cfg),
            slot_open: false,
        }
    }
}

impl BarFilter for Replayer {
    fn filter(&mut self, bar: Bar, session_end: NaiveTime) -> Vec<FilterAction> {
        let core = &mut self.core;
        let mut out = Vec::new();

        if core.is_late(bar.dt) {
            if core.cfg.takelate && core.accum.is_open() {
                core.take_late(&bar);
                out.push(FilterAction::Update(core.accum.snapshot()));
            }
            return out;
        }
        core.ensure_eos(bar.dt, session_end);

        if core.over_before(bar.dt) && core.fire() {
            // finalize the current slot, then open a new one with this bar
            let closed = core.close(true);
            if self.slot_open {
                out.push(FilterAction::Update(closed));
            } else {
                out.push(FilterAction::Deliver(closed));
            }
            core.accum.update(&bar);
            core.prev_input_dt = bar.dt;
            out.push(FilterAction::Deliver(core.accum.snapshot()));
            self.slot_open = true;
            return out;
        }

        core.accum.update(&bar);
        core.prev_input_dt = bar.dt;

        if core.cfg.sessionend && core.subweeks && core.eos_reached(bar.dt) && core.fire() {
            let closed = core.close(true);
            if self.slot_open {
                out.push(FilterAction::Update(closed));
            } else {
                out.push(FilterAction::Deliver(closed));
            }
            self.slot_open = false;
            return out;
        }

        if self.slot_open {
            out.push(FilterAction::Update(core.accum.snapshot()));
        } else {
            out.push(FilterAction::Deliver(core.accum.snapshot()));
            self.slot_open = true;
        }
        out
    }

    fn last(&mut self) -> Option<FilterAction> {
        let core = &mut self.core;
        if !core.accum.is_open() {
            return None;
        }
        let closed = core.close(true);
        let action = if self.slot_open {
            FilterAction::Update(closed)
        } else {
            FilterAction::Deliver(closed)
        };
        self.slot_open = false;
        Some(action)
    }

    fn reset(&mut self) {
        self.core.reset();
        self.slot_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{num2date, num_from_ymd_hms};

    fn minute_bar(min: u32, values: f64) -> Bar {
        Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 9, 30 + min, 0),
            open: values,
            high: values + 1.0,
            low: values - 1.0,
            close: values + 0.5,
            volume: 10.0,
            openinterest: 0.0,
        }
    }

    fn session_end() -> NaiveTime {
        crate::time::default_session_end()
    }

    #[test]
    fn five_minute_buckets_close_on_the_right_edge() {
        let mut resampler = Resampler::new(ResampleConfig::new(TimeFrame::Minutes, 5));
        let mut delivered = Vec::new();

        for i in 0..7 {
            for action in resampler.filter(minute_bar(i, f64::from(i)), session_end()) {
                if let FilterAction::Deliver(bar) = action {
                    delivered.push(bar);
                }
            }
        }

        // 09:30..09:34 close when 09:35 arrives, stamped to the right edge
        assert_eq!(delivered.len(), 1);
        let bar = delivered[0];
        assert_eq!(num2date(bar.dt).format("%H:%M").to_string(), "09:35");
        assert_eq!(bar.open, 0.0);
        assert_eq!(bar.high, 5.0);
        assert_eq!(bar.low, -1.0);
        assert_eq!(bar.close, 4.5);
        assert_eq!(bar.volume, 50.0);

        // 09:35 + 09:36 remain open until the end-of-data flush
        let Some(FilterAction::Deliver(flushed)) = resampler.last() else {
            panic!("open aggregate must flush");
        };
        assert_eq!(flushed.open, 5.0);
        assert_eq!(flushed.close, 6.5);
        assert_eq!(flushed.volume, 20.0);
        assert!(resampler.last().is_none());
    }

    #[test]
    fn plain_compression_folds_exactly_n_bars() {
        let mut cfg = ResampleConfig::new(TimeFrame::Minutes, 3);
        cfg.bar2edge = false;
        cfg.adjbartime = false;
        let mut resampler = Resampler::new(cfg);

        let mut delivered = Vec::new();
        for i in 0..6 {
            for action in resampler.filter(minute_bar(i, f64::from(i)), session_end()) {
                if let FilterAction::Deliver(bar) = action {
                    delivered.push(bar);
                }
            }
        }
        if let Some(FilterAction::Deliver(bar)) = resampler.last() {
            delivered.push(bar);
        }

        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].open, 0.0);
        assert_eq!(delivered[0].close, 2.5);
        assert_eq!(delivered[0].volume, 30.0);
        assert_eq!(delivered[1].open, 3.0);
        assert_eq!(delivered[1].close, 5.5);
        assert_eq!(delivered[1].volume, 30.0);
    }

    #[test]
    fn left_edge_stamping() {
        let mut cfg = ResampleConfig::new(TimeFrame::Minutes, 5);
        cfg.rightedge = false;
        let mut resampler = Resampler::new(cfg);

        let mut delivered = Vec::new();
        for i in 0..6 {
            for action in resampler.filter(minute_bar(i, f64::from(i)), session_end()) {
                if let FilterAction::Deliver(bar) = action {
                    delivered.push(bar);
                }
            }
        }
        assert_eq!(delivered.len(), 1);
        assert_eq!(num2date(delivered[0].dt).format("%H:%M").to_string(), "09:30");
    }

    #[test]
    fn late_bars_fold_with_nudged_time() {
        let mut resampler = Resampler::new(ResampleConfig::new(TimeFrame::Minutes, 5));
        resampler.filter(minute_bar(0, 0.0), session_end());
        resampler.filter(minute_bar(1, 1.0), session_end());

        // a bar stamped before the previous input folds in
        let out = resampler.filter(minute_bar(0, 100.0), session_end());
        assert!(out.is_empty());

        let Some(FilterAction::Deliver(flushed)) = resampler.last() else {
            panic!("aggregate open");
        };
        assert_eq!(flushed.high, 101.0);
        assert_eq!(flushed.volume, 30.0);
    }

    #[test]
    fn late_bars_drop_without_takelate() {
        let mut cfg = ResampleConfig::new(TimeFrame::Minutes, 5);
        cfg.takelate = false;
        let mut resampler = Resampler::new(cfg);
        resampler.filter(minute_bar(1, 1.0), session_end());
        resampler.filter(minute_bar(0, 100.0), session_end());

        let Some(FilterAction::Deliver(flushed)) = resampler.last() else {
            panic!("aggregate open");
        };
        assert_eq!(flushed.volume, 10.0);
        assert_eq!(flushed.high, 2.0);
    }

    #[test]
    fn minutes_to_days_close_at_session_rollover() {
        let mut resampler = Resampler::new(ResampleConfig::new(TimeFrame::Days, 1));

        let day1 = Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 10, 0, 0),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 5.0,
            openinterest: 0.0,
        };
        let day1_later = Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 15, 0, 0),
            open: 1.5,
            high: 3.0,
            low: 1.0,
            close: 2.5,
            volume: 5.0,
            openinterest: 0.0,
        };
        let day2 = Bar {
            dt: num_from_ymd_hms(2024, 1, 3, 10, 0, 0),
            open: 2.5,
            high: 2.6,
            low: 2.0,
            close: 2.2,
            volume: 5.0,
            openinterest: 0.0,
        };

        assert!(resampler.filter(day1, session_end()).is_empty());
        assert!(resampler.filter(day1_later, session_end()).is_empty());
        let out = resampler.filter(day2, session_end());
        assert_eq!(out.len(), 1);
        let FilterAction::Deliver(bar) = out[0] else {
            panic!("resampler only delivers");
        };
        assert_eq!(bar.open, 1.0);
        assert_eq!(bar.high, 3.0);
        assert_eq!(bar.close, 2.5);
        assert_eq!(bar.volume, 10.0);
    }

    #[test]
    fn weekly_aggregation_uses_iso_weeks() {
        let mut resampler = Resampler::new(ResampleConfig::new(TimeFrame::Weeks, 1));
        let mon = Bar {
            dt: num_from_ymd_hms(2024, 1, 1, 17, 0, 0),
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1.0,
            openinterest: 0.0,
        };
        let fri = Bar {
            dt: num_from_ymd_hms(2024, 1, 5, 17, 0, 0),
            open: 1.5,
            high: 4.0,
            low: 1.2,
            close: 3.5,
            volume: 1.0,
            openinterest: 0.0,
        };
        let next_mon = Bar {
            dt: num_from_ymd_hms(2024, 1, 8, 17, 0, 0),
            open: 3.5,
            high: 3.6,
            low: 3.0,
            close: 3.2,
            volume: 1.0,
            openinterest: 0.0,
        };

        assert!(resampler.filter(mon, session_end()).is_empty());
        assert!(resampler.filter(fri, session_end()).is_empty());
        let out = resampler.filter(next_mon, session_end());
        assert_eq!(out.len(), 1);
        let FilterAction::Deliver(bar) = out[0] else {
            panic!("resampler only delivers");
        };
        assert_eq!(bar.open, 1.0);
        assert_eq!(bar.high, 4.0);
        assert_eq!(bar.close, 3.5);
    }

    #[test]
    fn replayer_updates_in_place_until_the_edge() {
        let mut replayer = Replayer::new(ResampleConfig::for_replay(TimeFrame::Minutes, 5));

        let first = replayer.filter(minute_bar(0, 0.0), session_end());
        assert!(matches!(first[0], FilterAction::Deliver(_)));

        let second = replayer.filter(minute_bar(1, 1.0), session_end());
        assert_eq!(second.len(), 1);
        let FilterAction::Update(partial) = second[0] else {
            panic!("partial states update in place");
        };
        assert_eq!(partial.open, 0.0);
        assert_eq!(partial.close, 1.5);
        assert_eq!(partial.volume, 20.0);

        // crossing the edge finalizes the slot and opens a new one
        let crossing = replayer.filter(minute_bar(5, 5.0), session_end());
        assert_eq!(crossing.len(), 2);
        let FilterAction::Update(finalized) = crossing[0] else {
            panic!("old slot finalized in place");
        };
        assert_eq!(finalized.volume, 20.0);
        let FilterAction::Deliver(fresh) = crossing[1] else {
            panic!("new slot opens with the crossing bar");
        };
        assert_eq!(fresh.open, 5.0);
        assert_eq!(fresh.volume, 10.0);
    }

    #[test]
    fn check_flushes_when_a_master_clock_passes_the_edge() {
        let mut resampler = Resampler::new(ResampleConfig::new(TimeFrame::Minutes, 5));
        resampler.filter(minute_bar(0, 0.0), session_end());
        resampler.filter(minute_bar(1, 1.0), session_end());

        // a master feed at 09:34 has not reached the 09:35 edge
        let early = num_from_ymd_hms(2024, 1, 2, 9, 34, 0);
        assert!(resampler.check(early, Some(early)).is_none());

        let after = num_from_ymd_hms(2024, 1, 2, 9, 36, 0);
        let Some(FilterAction::Deliver(bar)) = resampler.check(after, Some(after)) else {
            panic!("edge passed, aggregate must flush");
        };
        assert_eq!(num2date(bar.dt).format("%H:%M").to_string(), "09:35");
    }
}
