//! Engine-level timeframe aggregation: resampled feeds riding alongside
//! their parent, replay updates, and bar-transform filters.

use parking_lot::Mutex;
use std::sync::Arc;
use vela::prelude::*;
use vela_data::filter::heikinashi::HeikinAshi;
use vela_data::time::{num2date, num_from_ymd_hms};

fn minute_bar(min: u32, value: f64) -> Bar {
    Bar {
        dt: num_from_ymd_hms(2024, 1, 2, 9, 30 + min, 0),
        open: value,
        high: value + 1.0,
        low: value - 1.0,
        close: value + 0.5,
        volume: 10.0,
        openinterest: 0.0,
    }
}

#[derive(Default)]
struct ResampleLog {
    /// (minute len, resampled len, resampled dt, resampled close)
    rows: Vec<(usize, usize, f64, f64)>,
}

struct ResampleProbe {
    log: Arc<Mutex<ResampleLog>>,
}

impl Strategy for ResampleProbe {
    fn next(&mut self, ctx: &mut Ctx<'_>) {
        self.log.lock().rows.push((
            ctx.len(0),
            ctx.len(1),
            ctx.datetime_num(1, 0),
            ctx.close(1, 0),
        ));
    }
}

#[test]
fn one_minute_bars_resample_to_five_minutes() {
    for runonce in [true, false] {
        let log: Arc<Mutex<ResampleLog>> = Arc::default();
        let mut engine = Engine::new(EngineConfig {
            runonce,
            ..EngineConfig::default()
        });

        let bars: Vec<Bar> = (0..7).map(|i| minute_bar(i, f64::from(i))).collect();
        let m1 = engine.add_feed(vela::engine::memory_feed(
            "m1",
            TimeFrame::Minutes,
            1,
            bars,
        ));
        let m5 = engine
            .resample_feed(m1, ResampleConfig::new(TimeFrame::Minutes, 5))
            .unwrap();
        engine.add_strategy(Box::new(ResampleProbe {
            log: Arc::clone(&log),
        }));

        engine.run().unwrap();

        let m5_feed = engine.feed(m5).unwrap();
        assert_eq!(m5_feed.lines.len(), 2, "runonce={runonce}");

        // first aggregate: inputs 09:30..09:34 stamped to the 09:35 edge
        assert_eq!(
            num2date(m5_feed.datetime(-1)).format("%H:%M").to_string(),
            "09:35"
        );
        assert_eq!(m5_feed.open(-1), 0.0);
        assert_eq!(m5_feed.high(-1), 5.0);
        assert_eq!(m5_feed.low(-1), -1.0);
        assert_eq!(m5_feed.close(-1), 4.5);
        assert_eq!(m5_feed.volume(-1), 50.0);

        // second aggregate: the two remaining inputs, flushed at the end
        assert_eq!(m5_feed.open(0), 5.0);
        assert_eq!(m5_feed.close(0), 6.5);
        assert_eq!(m5_feed.volume(0), 20.0);

        // the resampled feed never ran ahead of its parent
        let log = log.lock();
        for (m1_len, m5_len, m5_dt, _) in &log.rows {
            assert!(*m5_len <= 2);
            assert!(*m1_len >= *m5_len);
            if *m5_len > 0 {
                assert!(m5_dt.is_finite());
            }
        }
    }
}

#[test]
fn resampled_bar_arrives_with_its_closing_input() {
    let log: Arc<Mutex<ResampleLog>> = Arc::default();
    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        ..EngineConfig::default()
    });

    let bars: Vec<Bar> = (0..6).map(|i| minute_bar(i, f64::from(i))).collect();
    let m1 = engine.add_feed(vela::engine::memory_feed(
        "m1",
        TimeFrame::Minutes,
        1,
        bars,
    ));
    engine
        .resample_feed(m1, ResampleConfig::new(TimeFrame::Minutes, 5))
        .unwrap();
    engine.add_strategy(Box::new(ResampleProbe {
        log: Arc::clone(&log),
    }));
    engine.run().unwrap();

    let log = log.lock();
    // while only 09:30..09:34 have arrived, the 5m feed is empty
    let before_edge: Vec<_> = log.rows.iter().filter(|r| r.0 <= 5).collect();
    assert!(before_edge.iter().all(|r| r.1 == 0));

    // the 09:35 input closes the aggregate in the same engine iteration
    let at_edge = log.rows.iter().find(|r| r.0 == 6).unwrap();
    assert_eq!(at_edge.1, 1);
    assert_eq!(at_edge.3, 4.5);
}

#[derive(Default)]
struct ReplayLog {
    /// (replay len, close) per strategy call
    states: Vec<(usize, f64)>,
}

struct ReplayProbe {
    log: Arc<Mutex<ReplayLog>>,
}

impl Strategy for ReplayProbe {
    fn next(&mut self, ctx: &mut Ctx<'_>) {
        self.log.lock().states.push((ctx.len(1), ctx.close(1, 0)));
    }
}

#[test]
fn replay_updates_the_open_aggregate_in_place() {
    let log: Arc<Mutex<ReplayLog>> = Arc::default();
    // replay forces event mode without preload
    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        ..EngineConfig::default()
    });

    let bars: Vec<Bar> = (0..6).map(|i| minute_bar(i, f64::from(i))).collect();
    let m1 = engine.add_feed(vela::engine::memory_feed(
        "m1",
        TimeFrame::Minutes,
        1,
        bars,
    ));
    let m5 = engine
        .replay_feed(m1, ResampleConfig::for_replay(TimeFrame::Minutes, 5))
        .unwrap();
    engine.add_strategy(Box::new(ReplayProbe {
        log: Arc::clone(&log),
    }));
    engine.run().unwrap();

    let log = log.lock();
    // the replayed feed's length stays at 1 while partials update the
    // aggregate, only advancing when a new aggregate opens
    let lens: Vec<usize> = log.states.iter().map(|s| s.0).collect();
    assert!(lens.windows(2).all(|w| w[1] >= w[0]));
    assert_eq!(*lens.last().unwrap(), 2);
    assert!(lens.iter().filter(|&&l| l == 1).count() >= 4);

    // partial closes develop as inputs fold in
    let closes_at_len1: Vec<f64> = log
        .states
        .iter()
        .filter(|s| s.0 == 1)
        .map(|s| s.1)
        .collect();
    assert!(closes_at_len1.windows(2).all(|w| w[0] <= w[1]));

    let m5_feed = engine.feed(m5).unwrap();
    assert_eq!(m5_feed.lines.len(), 2);
    assert_eq!(m5_feed.close(-1), 4.5);
}

#[test]
fn heikin_ashi_filter_rewrites_feed_bars() {
    let mut engine = Engine::new(EngineConfig {
        runonce: false,
        ..EngineConfig::default()
    });
    let bars = vec![
        Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 17, 30, 0),
            open: 10.0,
            high: 12.0,
            low: 8.0,
            close: 11.0,
            volume: 1.0,
            openinterest: 0.0,
        },
        Bar {
            dt: num_from_ymd_hms(2024, 1, 3, 17, 30, 0),
            open: 11.0,
            high: 13.0,
            low: 10.0,
            close: 12.0,
            volume: 1.0,
            openinterest: 0.0,
        },
    ];
    let id = engine.add_feed(vela::engine::memory_feed("d", TimeFrame::Days, 1, bars));
    engine.add_feed_filter(id, Box::new(HeikinAshi::new()));

    engine.run().unwrap();

    let feed = engine.feed(id).unwrap();
    assert_eq!(feed.open(-1), 10.5);
    assert_eq!(feed.close(-1), 10.25);
    assert_eq!(feed.open(0), 10.375);
    assert_eq!(feed.close(0), 11.5);
}
