use crate::graph::{NodeCtx, OnceCtx};

/// A computation node in the line graph.
///
/// Implementations produce one or more output lines per clock tick. The
/// graph drives one of two evaluation modes:
///
/// * event mode - `prenext` while the clock is below the minimum period,
///   `nextstart` exactly once when it is reached, `next` afterwards;
/// * vector mode - `preonce`/`oncestart`/`once` over absolute index ranges
///   after all inputs have been preloaded to full length.
///
/// The default `once` replays `next` bar-at-a-time, so an indicator only
/// has to provide a vectorized body when it pays off.
pub trait Indicator: Send {
    /// Output line aliases, in declaration order.
    fn aliases(&self) -> &'static [&'static str];

    /// Bars of input consumed before the first valid output.
    fn period(&self) -> usize {
        1
    }

    /// Number of inputs consumed when the caller does not wire any
    /// explicitly; the owner's first feeds are substituted.
    fn min_inputs(&self) -> usize {
        1
    }

    /// Opting out of vector mode disables it for the whole engine run.
    fn requires_event_mode(&self) -> bool {
        false
    }

    fn prenext(&mut self, _ctx: &mut NodeCtx<'_>) {}

    fn nextstart(&mut self, ctx: &mut NodeCtx<'_>) {
        self.next(ctx)
    }

    fn next(&mut self, ctx: &mut NodeCtx<'_>);

    fn preonce(&mut self, _ctx: &mut OnceCtx<'_>, _start: usize, _end: usize) {}

    fn oncestart(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        self.once(ctx, start, end)
    }

    fn once(&mut self, ctx: &mut OnceCtx<'_>, start: usize, end: usize) {
        for i in start..end {
            ctx.seek(i);
            let mut event = ctx.as_event();
            self.next(&mut event);
        }
    }
}
