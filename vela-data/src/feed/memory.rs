use crate::{
    bar::Bar,
    feed::{BarSource, SourceEvent},
};

/// Bar source over an in-memory vector.
///
/// Backs integration tests and optimization runs, where one preloaded
/// history is cloned per worker.
#[derive(Debug, Clone)]
pub struct MemorySource {
    bars: Vec<Bar>,
    cursor: usize,
}

impl MemorySource {
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by(|a, b| a.dt.total_cmp(&b.dt));
        Self { bars, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}

impl BarSource for MemorySource {
    fn next_bar(&mut self) -> SourceEvent {
        match self.bars.get(self.cursor) {
            Some(bar) => {
                self.cursor += 1;
                SourceEvent::Bar(*bar)
            }
            None => SourceEvent::Exhausted,
        }
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::num_from_ymd_hms;

    #[test]
    fn bars_are_served_in_timestamp_order() {
        let late = Bar {
            dt: num_from_ymd_hms(2024, 1, 3, 0, 0, 0),
            open: 2.0,
            high: 2.0,
            low: 2.0,
            close: 2.0,
            volume: 0.0,
            openinterest: 0.0,
        };
        let early = Bar {
            dt: num_from_ymd_hms(2024, 1, 2, 0, 0, 0),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
            openinterest: 0.0,
        };

        let mut source = MemorySource::new(vec![late, early]);
        assert_eq!(source.next_bar(), SourceEvent::Bar(early));
        assert_eq!(source.next_bar(), SourceEvent::Bar(late));
        assert_eq!(source.next_bar(), SourceEvent::Exhausted);

        source.reset();
        assert_eq!(source.next_bar(), SourceEvent::Bar(early));
    }
}
