use vela_data::graph::{NodeCtx, OnceCtx};
use vela_data::Indicator;

/// Simple moving average of its single input line.
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Indicator for Sma {
    fn aliases(&self) -> &'static [&'static str] {
        &["sma"]
    }

    fn period(&self) -> usize {
        self.period
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let mut sum = 0.0;
        for ago in 0..self.period {
            sum += ctx.input(0, -(ago as isize));
        }
        ctx.set(0, sum / self.period as f64);
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        // rolling sum instead of a window scan per index
        let mut sum: f64 = (0..self.period)
            .map(|k| ctx.input_abs(0, start - 1 - k))
            .sum();
        for i in start..end {
            sum += ctx.input_abs(0, i) - ctx.input_abs(0, i - self.period);
            ctx.set_abs(0, i, sum / self.period as f64);
        }
    }

    fn oncestart(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let sum: f64 = (0..self.period).map(|k| ctx.input_abs(0, i - k)).sum();
            ctx.set_abs(0, i, sum / self.period as f64);
        }
    }
}

/// Exponential moving average, seeded with the simple average of the first
/// `period` values.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: f64,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
        }
    }

    fn seed(&self, ctx: &NodeCtx<'_>) -> f64 {
        let mut sum = 0.0;
        for ago in 0..self.period {
            sum += ctx.input(0, -(ago as isize));
        }
        sum / self.period as f64
    }
}

impl Indicator for Ema {
    fn aliases(&self) -> &'static [&'static str] {
        &["ema"]
    }

    fn period(&self) -> usize {
        self.period
    }

    fn nextstart(&mut self, ctx: &mut NodeCtx<'_>) {
        let seed = self.seed(ctx);
        ctx.set(0, seed);
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let prev = ctx.output(0, -1);
        let value = ctx.input(0, 0);
        ctx.set(0, prev + self.alpha * (value - prev));
    }

    fn oncestart(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let sum: f64 = (0..self.period).map(|k| ctx.input_abs(0, i - k)).sum();
            ctx.set_abs(0, i, sum / self.period as f64);
        }
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        let mut prev = ctx.output_abs(0, start - 1);
        for i in start..end {
            prev += self.alpha * (ctx.input_abs(0, i) - prev);
            ctx.set_abs(0, i, prev);
        }
    }
}

/// Rolling standard deviation over the input window.
#[derive(Debug, Clone)]
pub struct StdDev {
    period: usize,
}

impl StdDev {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Indicator for StdDev {
    fn aliases(&self) -> &'static [&'static str] {
        &["stddev"]
    }

    fn period(&self) -> usize {
        self.period
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let n = self.period as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for ago in 0..self.period {
            let v = ctx.input(0, -(ago as isize));
            sum += v;
            sum_sq += v * v;
        }
        let mean = sum / n;
        ctx.set(0, (sum_sq / n - mean * mean).max(0.0).sqrt());
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let n = self.period as f64;
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            for k in 0..self.period {
                let v = ctx.input_abs(0, i - k);
                sum += v;
                sum_sq += v * v;
            }
            let mean = sum / n;
            ctx.set_abs(0, i, (sum_sq / n - mean * mean).max(0.0).sqrt());
        }
    }
}

/// Highest value of the input over the window.
#[derive(Debug, Clone)]
pub struct Highest {
    period: usize,
}

impl Highest {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Indicator for Highest {
    fn aliases(&self) -> &'static [&'static str] {
        &["highest"]
    }

    fn period(&self) -> usize {
        self.period
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let top = (0..self.period)
            .map(|ago| ctx.input(0, -(ago as isize)))
            .fold(f64::MIN, f64::max);
        ctx.set(0, top);
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let top = (0..self.period)
                .map(|k| ctx.input_abs(0, i - k))
                .fold(f64::MIN, f64::max);
            ctx.set_abs(0, i, top);
        }
    }
}

/// Lowest value of the input over the window.
#[derive(Debug, Clone)]
pub struct Lowest {
    period: usize,
}

impl Lowest {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
        }
    }
}

impl Indicator for Lowest {
    fn aliases(&self) -> &'static [&'static str] {
        &["lowest"]
    }

    fn period(&self) -> usize {
        self.period
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let bottom = (0..self.period)
            .map(|ago| ctx.input(0, -(ago as isize)))
            .fold(f64::MAX, f64::min);
        ctx.set(0, bottom);
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let bottom = (0..self.period)
                .map(|k| ctx.input_abs(0, i - k))
                .fold(f64::MAX, f64::min);
            ctx.set_abs(0, i, bottom);
        }
    }
}

/// Crossing of two input lines.
///
/// `+1.0` on the bar where the first input closes above the second after
/// being below, `-1.0` on the opposite cross, `0.0` otherwise.
#[derive(Debug, Clone, Default)]
pub struct CrossOver;

impl CrossOver {
    pub fn new() -> Self {
        Self
    }
}

impl Indicator for CrossOver {
    fn aliases(&self) -> &'static [&'static str] {
        &["crossover"]
    }

    fn period(&self) -> usize {
        2
    }

    fn min_inputs(&self) -> usize {
        2
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let (a0, a1) = (ctx.input(0, 0), ctx.input(0, -1));
        let (b0, b1) = (ctx.input(1, 0), ctx.input(1, -1));

        let up = a1 < b1 && a0 > b0;
        let down = a1 > b1 && a0 < b0;
        ctx.set(0, (up as i8 - down as i8) as f64);
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            let (a0, a1) = (ctx.input_abs(0, i), ctx.input_abs(0, i - 1));
            let (b0, b1) = (ctx.input_abs(1, i), ctx.input_abs(1, i - 1));
            let up = a1 < b1 && a0 > b0;
            let down = a1 > b1 && a0 < b0;
            ctx.set_abs(0, i, (up as i8 - down as i8) as f64);
        }
    }
}

/// Relative strength index with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    up: f64,
    down: f64,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            up: 0.0,
            down: 0.0,
        }
    }

    fn rsi_of(up: f64, down: f64) -> f64 {
        if down == 0.0 {
            if up == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + up / down)
        }
    }
}

impl Indicator for Rsi {
    fn aliases(&self) -> &'static [&'static str] {
        &["rsi"]
    }

    // one extra bar for the first price difference
    fn period(&self) -> usize {
        self.period + 1
    }

    fn requires_event_mode(&self) -> bool {
        // Wilder smoothing carries state between calls
        true
    }

    fn nextstart(&mut self, ctx: &mut NodeCtx<'_>) {
        let mut up_sum = 0.0;
        let mut down_sum = 0.0;
        for ago in 0..self.period {
            let diff = ctx.input(0, -(ago as isize)) - ctx.input(0, -(ago as isize) - 1);
            if diff > 0.0 {
                up_sum += diff;
            } else {
                down_sum -= diff;
            }
        }
        self.up = up_sum / self.period as f64;
        self.down = down_sum / self.period as f64;
        ctx.set(0, Self::rsi_of(self.up, self.down));
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let diff = ctx.input(0, 0) - ctx.input(0, -1);
        let (gain, loss) = if diff > 0.0 {
            (diff, 0.0)
        } else {
            (0.0, -diff)
        };
        let alpha = 1.0 / self.period as f64;
        self.up += alpha * (gain - self.up);
        self.down += alpha * (loss - self.down);
        ctx.set(0, Self::rsi_of(self.up, self.down));
    }

    fn once(&mut self, _ctx: &mut OnceCtx<'_>, _start: usize, _end: usize) {
        unreachable!("requires_event_mode() disables vectorized evaluation")
    }
}

/// Average true range (Wilder smoothing) over high/low/close inputs.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    value: f64,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            value: 0.0,
        }
    }

    fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
        (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs())
    }
}

impl Indicator for Atr {
    fn aliases(&self) -> &'static [&'static str] {
        &["atr"]
    }

    // high, low, close
    fn min_inputs(&self) -> usize {
        3
    }

    fn period(&self) -> usize {
        self.period + 1
    }

    fn requires_event_mode(&self) -> bool {
        true
    }

    fn nextstart(&mut self, ctx: &mut NodeCtx<'_>) {
        let mut sum = 0.0;
        for ago in 0..self.period {
            let k = -(ago as isize);
            sum += Self::true_range(ctx.input(0, k), ctx.input(1, k), ctx.input(2, k - 1));
        }
        self.value = sum / self.period as f64;
        ctx.set(0, self.value);
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>) {
        let tr = Self::true_range(ctx.input(0, 0), ctx.input(1, 0), ctx.input(2, -1));
        let alpha = 1.0 / self.period as f64;
        self.value += alpha * (tr - self.value);
        ctx.set(0, self.value);
    }

    fn once(&mut self, _ctx: &mut OnceCtx<'_>, _start: usize, _end: usize) {
        unreachable!("requires_event_mode() disables vectorized evaluation")
    }
}
