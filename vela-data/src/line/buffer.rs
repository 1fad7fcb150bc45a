/// Storage strategy for a [`LineBuffer`].
///
/// `Full` keeps the whole history and is required for vectorized runs and
/// lookahead reads. `Ring` keeps only the most recent `capacity` values,
/// trading history for memory; reads older than the window yield NaN.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferMode {
    Full,
    Ring(usize),
}

/// Append-only column of `f64` values with a movable current index.
///
/// Offset `0` addresses the current bar, `-k` the k-th prior bar and `+k`
/// peeks ahead into preloaded data (full mode only). Reads outside the
/// populated window yield NaN.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    mode: BufferMode,
    array: Vec<f64>,
    idx: isize,
    /// High-water mark of delivered bars; keeps ring buffers re-deliverable
    /// after a rewind.
    high: usize,
    min_period: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            mode: BufferMode::Full,
            array: Vec::new(),
            idx: -1,
            high: 0,
            min_period: 1,
        }
    }

    /// Switch to ring storage of at least `capacity` cells. Only legal
    /// before the first bar; afterwards the call is ignored.
    pub fn qbuffer(&mut self, capacity: usize) {
        if self.idx < 0 && self.array.is_empty() {
            let capacity = capacity.max(self.min_period);
            self.mode = BufferMode::Ring(capacity);
            self.array = vec![f64::NAN; capacity];
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Bars delivered so far (current index + 1).
    pub fn len(&self) -> usize {
        (self.idx + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.idx < 0
    }

    /// Total values stored, including preloaded or rewound data ahead of
    /// the index.
    pub fn buflen(&self) -> usize {
        match self.mode {
            BufferMode::Full => self.array.len(),
            BufferMode::Ring(_) => self.high,
        }
    }

    pub fn min_period(&self) -> usize {
        self.min_period
    }

    /// Raise the minimum period; it never shrinks.
    pub fn update_min_period(&mut self, period: usize) {
        self.min_period = self.min_period.max(period.max(1));
    }

    /// Append a value without moving the index (preloading).
    pub fn append(&mut self, value: f64) {
        match self.mode {
            BufferMode::Full => self.array.push(value),
            BufferMode::Ring(_) => {
                // preload is meaningless on a ring; deliver instead
                self.forward(value);
            }
        }
    }

    /// Advance the index by one, growing the sequence with `value` if no
    /// preloaded data lies ahead.
    pub fn forward(&mut self, value: f64) {
        self.idx += 1;
        self.high = self.high.max((self.idx + 1) as usize);
        match self.mode {
            BufferMode::Full => {
                let i = self.idx as usize;
                if i < self.array.len() {
                    self.array[i] = value;
                } else {
                    self.array.push(value);
                }
            }
            BufferMode::Ring(cap) => {
                let i = (self.idx as usize) % cap;
                self.array[i] = value;
            }
        }
    }

    /// Advance the index over existing (preloaded) data.
    pub fn advance(&mut self, n: usize) {
        self.idx += n as isize;
    }

    /// Retract the index one step, dropping the stored value. Filters use
    /// this to consume a just-delivered bar back out of the feed.
    pub fn backwards(&mut self, _force: bool) {
        if self.idx < 0 {
            return;
        }
        if let BufferMode::Full = self.mode {
            let i = self.idx as usize;
            if i < self.array.len() {
                self.array.remove(i);
            }
        }
        self.high = self.high.saturating_sub(1);
        self.idx -= 1;
    }

    /// Retract the index without dropping data, so the bar re-delivers on a
    /// later `advance`.
    pub fn rewind(&mut self, n: usize) {
        self.idx -= n as isize;
    }

    /// Seek the index before the first bar, keeping stored data.
    pub fn home(&mut self) {
        self.idx = -1;
    }

    /// Drop all data and state, keeping mode and min-period.
    pub fn reset(&mut self) {
        match self.mode {
            BufferMode::Full => self.array.clear(),
            BufferMode::Ring(cap) => self.array = vec![f64::NAN; cap],
        }
        self.idx = -1;
        self.high = 0;
    }

    /// Value at `offset` relative to the current index (`0` current, `-k`
    /// past, `+k` preloaded future). NaN outside the window.
    pub fn get(&self, offset: isize) -> f64 {
        let i = self.idx + offset;
        if i < 0 {
            return f64::NAN;
        }
        match self.mode {
            BufferMode::Full => self.array.get(i as usize).copied().unwrap_or(f64::NAN),
            BufferMode::Ring(cap) => {
                if i > self.idx || (self.idx - i) as usize >= cap {
                    f64::NAN
                } else {
                    self.array[(i as usize) % cap]
                }
            }
        }
    }

    /// Overwrite the value at `offset` relative to the current index.
    pub fn set(&mut self, offset: isize, value: f64) {
        let i = self.idx + offset;
        if i < 0 {
            return;
        }
        match self.mode {
            BufferMode::Full => {
                if let Some(slot) = self.array.get_mut(i as usize) {
                    *slot = value;
                }
            }
            BufferMode::Ring(cap) => {
                if i <= self.idx && ((self.idx - i) as usize) < cap {
                    self.array[(i as usize) % cap] = value;
                }
            }
        }
    }

    /// Absolute read for vectorized evaluation (full mode only).
    pub fn get_abs(&self, i: usize) -> f64 {
        match self.mode {
            BufferMode::Full => self.array.get(i).copied().unwrap_or(f64::NAN),
            BufferMode::Ring(_) => f64::NAN,
        }
    }

    /// Absolute write for vectorized evaluation (full mode only).
    pub fn set_abs(&mut self, i: usize, value: f64) {
        if let BufferMode::Full = self.mode {
            if i >= self.array.len() {
                self.array.resize(i + 1, f64::NAN);
            }
            self.array[i] = value;
        }
    }

    /// Grow storage to `len` cells of NaN ahead of any compute (vectorized
    /// evaluation preallocates output columns to full clock length).
    pub fn extend_to(&mut self, len: usize) {
        if let BufferMode::Full = self.mode {
            if self.array.len() < len {
                self.array.resize(len, f64::NAN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_negative_offsets() {
        let mut line = LineBuffer::new();
        line.forward(1.0);
        line.forward(2.0);
        line.forward(3.0);

        assert_eq!(line.len(), 3);
        assert_eq!(line.get(0), 3.0);
        assert_eq!(line.get(-1), 2.0);
        assert_eq!(line.get(-2), 1.0);
        assert!(line.get(-3).is_nan());
        assert!(line.get(1).is_nan());
    }

    #[test]
    fn preload_then_advance() {
        let mut line = LineBuffer::new();
        for v in [1.0, 2.0, 3.0] {
            line.append(v);
        }
        assert_eq!(line.len(), 0);
        assert_eq!(line.buflen(), 3);

        line.advance(1);
        assert_eq!(line.get(0), 1.0);
        // lookahead into preloaded data
        assert_eq!(line.get(1), 2.0);

        line.advance(2);
        assert_eq!(line.get(0), 3.0);
        assert_eq!(line.len(), 3);
    }

    #[test]
    fn rewind_redelivers_without_loss() {
        let mut line = LineBuffer::new();
        line.forward(1.0);
        line.forward(2.0);
        line.rewind(1);
        assert_eq!(line.get(0), 1.0);
        assert_eq!(line.buflen(), 2);

        line.advance(1);
        assert_eq!(line.get(0), 2.0);
    }

    #[test]
    fn backwards_drops_the_current_value() {
        let mut line = LineBuffer::new();
        line.forward(1.0);
        line.forward(2.0);
        line.backwards(false);
        assert_eq!(line.len(), 1);
        assert_eq!(line.buflen(), 1);
        assert_eq!(line.get(0), 1.0);
    }

    #[test]
    fn ring_mode_window() {
        let mut line = LineBuffer::new();
        line.update_min_period(2);
        line.qbuffer(3);

        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            line.forward(v);
        }
        assert_eq!(line.len(), 5);
        assert_eq!(line.get(0), 5.0);
        assert_eq!(line.get(-2), 3.0);
        // outside the ring window
        assert!(line.get(-3).is_nan());
    }

    #[test]
    fn mode_switch_only_before_first_bar() {
        let mut line = LineBuffer::new();
        line.forward(1.0);
        line.qbuffer(8);
        assert_eq!(line.mode(), BufferMode::Full);
    }
}
