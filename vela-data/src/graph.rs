use crate::{
    error::DataError,
    feed::{FeedId, FeedStore},
    indicator::Indicator,
    line::series::LineSeries,
};

pub type NodeId = usize;

/// Address of one output line of one graph node.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct LineRef {
    pub node: NodeId,
    pub line: usize,
}

impl LineRef {
    pub fn new(node: NodeId, line: usize) -> Self {
        Self { node, line }
    }
}

#[derive(Debug)]
enum NodeKind {
    /// Source node backed by a feed's lines; the graph holds no storage.
    Data(FeedId),
    /// Scalar wrapped into an always-constant line.
    Constant(f64),
    Indicator,
}

struct Node {
    kind: NodeKind,
    lines: LineSeries,
    inputs: Vec<LineRef>,
    min_period: usize,
    /// Feed reached by following first inputs; drives index sync during the
    /// vectorized walk.
    root_feed: Option<FeedId>,
    comp: Option<Box<dyn Indicator>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("min_period", &self.min_period)
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// Arena of dataflow nodes over feed lines.
///
/// Construction order is the evaluation order: a node may only reference
/// earlier nodes, so iterating the arena front-to-back computes children
/// before consumers. Feeds enter the graph as source nodes; indicators are
/// appended with explicit input wiring (the engine context substitutes an
/// owner's feeds when an indicator declares no inputs, see the strategy
/// API).
#[derive(Debug, Default)]
pub struct LineGraph {
    nodes: Vec<Node>,
    bindings: Vec<(LineRef, LineRef)>,
}

impl LineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Register a feed as a source node.
    pub fn add_data(&mut self, feed: FeedId) -> NodeId {
        self.nodes.push(Node {
            kind: NodeKind::Data(feed),
            lines: LineSeries::default(),
            inputs: Vec::new(),
            min_period: 1,
            root_feed: Some(feed),
            comp: None,
        });
        self.nodes.len() - 1
    }

    /// Wrap a scalar into a constant line.
    pub fn add_const(&mut self, value: f64) -> NodeId {
        self.nodes.push(Node {
            kind: NodeKind::Constant(value),
            lines: LineSeries::default(),
            inputs: Vec::new(),
            min_period: 1,
            root_feed: None,
            comp: None,
        });
        self.nodes.len() - 1
    }

    /// Append an indicator node.
    ///
    /// The first input is the node's clock; the node's minimum period is
    /// the maximum over its inputs' periods plus the indicator's own
    /// declared period overhead.
    pub fn add_indicator(
        &mut self,
        comp: Box<dyn Indicator>,
        inputs: Vec<LineRef>,
    ) -> Result<NodeId, DataError> {
        if inputs.is_empty() {
            return Err(DataError::InputArity {
                expected: comp.min_inputs(),
                received: 0,
            });
        }
        for input in &inputs {
            if input.node >= self.nodes.len() {
                return Err(DataError::DanglingInput);
            }
        }
        if matches!(self.nodes[inputs[0].node].kind, NodeKind::Constant(_)) {
            return Err(DataError::ConstantClock);
        }

        let inputs_period = inputs
            .iter()
            .map(|i| self.min_period_of(i.node))
            .max()
            .unwrap_or(1);
        let min_period = inputs_period + comp.period().max(1) - 1;

        let mut lines = LineSeries::new(comp.aliases().iter().copied());
        lines.update_min_period(min_period);

        let root_feed = self.nodes[inputs[0].node].root_feed;

        self.nodes.push(Node {
            kind: NodeKind::Indicator,
            lines,
            inputs,
            min_period,
            root_feed,
            comp: Some(comp),
        });
        Ok(self.nodes.len() - 1)
    }

    /// Bind a source line to a target line: after each evaluation pass the
    /// source's current value is propagated to the target at the same
    /// offset. Used to wire indicator outputs into observer lines.
    pub fn bind(&mut self, src: LineRef, dst: LineRef) {
        self.bindings.push((src, dst));
    }

    pub fn min_period_of(&self, node: NodeId) -> usize {
        match self.nodes[node].kind {
            NodeKind::Indicator => self.nodes[node].min_period,
            _ => 1,
        }
    }

    pub fn root_feed(&self, node: NodeId) -> Option<FeedId> {
        self.nodes[node].root_feed
    }

    /// Output line aliases of an indicator node (empty for sources).
    pub fn aliases_of(&self, node: NodeId) -> &[smol_str::SmolStr] {
        self.nodes[node].lines.aliases()
    }

    /// True when any node opted out of vectorized evaluation, which
    /// disables it engine-wide.
    pub fn requires_event_mode(&self) -> bool {
        self.nodes
            .iter()
            .filter_map(|n| n.comp.as_deref())
            .any(Indicator::requires_event_mode)
    }

    pub fn len_of(&self, feeds: &FeedStore, node: NodeId) -> usize {
        match self.nodes[node].kind {
            NodeKind::Data(feed) => feeds.get(feed).map_or(0, |f| f.lines.len()),
            NodeKind::Constant(_) => 0,
            NodeKind::Indicator => self.nodes[node].lines.len(),
        }
    }

    pub fn buflen_of(&self, feeds: &FeedStore, node: NodeId) -> usize {
        match self.nodes[node].kind {
            NodeKind::Data(feed) => feeds.get(feed).map_or(0, |f| f.lines.buflen()),
            NodeKind::Constant(_) => 0,
            NodeKind::Indicator => self.nodes[node].lines.buflen(),
        }
    }

    /// Read a line value relative to its node's current index.
    pub fn read(&self, feeds: &FeedStore, lref: LineRef, ago: isize) -> f64 {
        match self.nodes[lref.node].kind {
            NodeKind::Data(feed) => feeds
                .get(feed)
                .map_or(f64::NAN, |f| f.lines.line(lref.line).get(ago)),
            NodeKind::Constant(v) => v,
            NodeKind::Indicator => self.nodes[lref.node].lines.line(lref.line).get(ago),
        }
    }

    /// Read a line value at an absolute buffer index (vectorized mode).
    pub fn read_abs(&self, feeds: &FeedStore, lref: LineRef, i: usize) -> f64 {
        match self.nodes[lref.node].kind {
            NodeKind::Data(feed) => feeds
                .get(feed)
                .map_or(f64::NAN, |f| f.lines.line(lref.line).get_abs(i)),
            NodeKind::Constant(v) => v,
            NodeKind::Indicator => self.nodes[lref.node].lines.line(lref.line).get_abs(i),
        }
    }

    /// Event-mode evaluation pass: every indicator node whose clock moved
    /// forwards its lines and runs the stage matching its minimum-period
    /// progress.
    pub fn next_tick(&mut self, feeds: &FeedStore) {
        for id in 0..self.nodes.len() {
            if !matches!(self.nodes[id].kind, NodeKind::Indicator) {
                continue;
            }
            let clock = self.nodes[id].inputs[0].node;
            let clock_len = self.len_of(feeds, clock);
            let mut own_len = self.nodes[id].lines.len();
            if clock_len <= own_len {
                continue;
            }

            let mp = self.nodes[id].min_period;
            let Some(mut comp) = self.nodes[id].comp.take() else {
                continue;
            };
            while own_len < clock_len {
                own_len += 1;
                self.nodes[id].lines.forward();
                let mut ctx = NodeCtx {
                    graph: self,
                    feeds,
                    node: id,
                    at: None,
                };
                match own_len.cmp(&mp) {
                    std::cmp::Ordering::Less => comp.prenext(&mut ctx),
                    std::cmp::Ordering::Equal => comp.nextstart(&mut ctx),
                    std::cmp::Ordering::Greater => comp.next(&mut ctx),
                }
            }
            self.nodes[id].comp = Some(comp);
        }

        self.propagate_bindings(feeds);
    }

    fn propagate_bindings(&mut self, feeds: &FeedStore) {
        for k in 0..self.bindings.len() {
            let (src, dst) = self.bindings[k];
            let value = self.read(feeds, src, 0);
            if matches!(self.nodes[dst.node].kind, NodeKind::Indicator) {
                self.nodes[dst.node].lines.line_mut(dst.line).set(0, value);
            }
        }
    }

    /// Vectorized evaluation: preallocate every indicator's lines to its
    /// clock's full length and run the `preonce`/`oncestart`/`once` stages
    /// over the whole history. Indices are left homed for the engine's
    /// timestamp walk.
    pub fn run_once(&mut self, feeds: &FeedStore) {
        for id in 0..self.nodes.len() {
            if !matches!(self.nodes[id].kind, NodeKind::Indicator) {
                continue;
            }
            let clock = self.nodes[id].inputs[0].node;
            let buflen = self.buflen_of(feeds, clock);
            self.nodes[id].lines.extend_to(buflen);

            let mp = self.nodes[id].min_period;
            let Some(mut comp) = self.nodes[id].comp.take() else {
                continue;
            };
            let mut ctx = OnceCtx {
                graph: self,
                feeds,
                node: id,
                seek: 0,
            };
            let pre_end = (mp - 1).min(buflen);
            comp.preonce(&mut ctx, 0, pre_end);
            if buflen >= mp {
                comp.oncestart(&mut ctx, mp - 1, mp);
            }
            if buflen > mp {
                comp.once(&mut ctx, mp, buflen);
            }
            self.nodes[id].comp = Some(comp);
            self.nodes[id].lines.home();
        }

        for k in 0..self.bindings.len() {
            let (src, dst) = self.bindings[k];
            let n = self.buflen_of(feeds, src.node);
            for i in 0..n {
                let value = self.read_abs(feeds, src, i);
                if matches!(self.nodes[dst.node].kind, NodeKind::Indicator) {
                    self.nodes[dst.node]
                        .lines
                        .line_mut(dst.line)
                        .set_abs(i, value);
                }
            }
        }
    }

    /// Advance indicator indices to match their root feed's length during
    /// the vectorized timestamp walk.
    pub fn sync_with_feeds(&mut self, feeds: &FeedStore) {
        for node in &mut self.nodes {
            if !matches!(node.kind, NodeKind::Indicator) {
                continue;
            }
            let Some(feed) = node.root_feed else { continue };
            let target = feeds.get(feed).map_or(0, |f| f.lines.len());
            let current = node.lines.len();
            if target > current {
                node.lines.advance(target - current);
            }
        }
    }

    /// Switch indicator lines into ring storage (memory-saving schemes).
    pub fn qbuffer(&mut self, extra: usize) {
        for node in &mut self.nodes {
            if matches!(node.kind, NodeKind::Indicator) {
                let cap = node.min_period + extra;
                node.lines.qbuffer(cap);
            }
        }
    }

    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.lines.reset();
        }
    }
}

/// Per-bar evaluation context handed to [`Indicator`] event callbacks.
///
/// Reads address input lines relative to the current bar (`ago <= 0` for
/// history); writes land on the node's own output lines.
pub struct NodeCtx<'g> {
    graph: &'g mut LineGraph,
    feeds: &'g FeedStore,
    node: NodeId,
    /// When set, relative access is translated to this absolute index
    /// (vectorized replay of event logic).
    at: Option<usize>,
}

impl NodeCtx<'_> {
    /// Bars seen by this node's clock.
    pub fn len(&self) -> usize {
        match self.at {
            Some(i) => i + 1,
            None => {
                let clock = self.graph.nodes[self.node].inputs[0].node;
                self.graph.len_of(self.feeds, clock)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn min_period(&self) -> usize {
        self.graph.nodes[self.node].min_period
    }

    pub fn num_inputs(&self) -> usize {
        self.graph.nodes[self.node].inputs.len()
    }

    /// Value of the `d`-th input line, `ago` bars back.
    pub fn input(&self, d: usize, ago: isize) -> f64 {
        let lref = self.graph.nodes[self.node].inputs[d];
        match self.at {
            None => self.graph.read(self.feeds, lref, ago),
            Some(i) => {
                let abs = i as isize + ago;
                if abs < 0 {
                    f64::NAN
                } else {
                    self.graph.read_abs(self.feeds, lref, abs as usize)
                }
            }
        }
    }

    /// Previously computed own output, `ago` bars back.
    pub fn output(&self, line: usize, ago: isize) -> f64 {
        match self.at {
            None => self.graph.nodes[self.node].lines.line(line).get(ago),
            Some(i) => {
                let abs = i as isize + ago;
                if abs < 0 {
                    f64::NAN
                } else {
                    self.graph.nodes[self.node]
                        .lines
                        .line(line)
                        .get_abs(abs as usize)
                }
            }
        }
    }

    /// Write the current bar's value for an output line.
    pub fn set(&mut self, line: usize, value: f64) {
        match self.at {
            None => self.graph.nodes[self.node]
                .lines
                .line_mut(line)
                .set(0, value),
            Some(i) => self.graph.nodes[self.node]
                .lines
                .line_mut(line)
                .set_abs(i, value),
        }
    }
}

/// Whole-history evaluation context for vectorized indicator stages.
pub struct OnceCtx<'g> {
    graph: &'g mut LineGraph,
    feeds: &'g FeedStore,
    node: NodeId,
    seek: usize,
}

impl<'g> OnceCtx<'g> {
    pub fn buflen(&self) -> usize {
        let clock = self.graph.nodes[self.node].inputs[0].node;
        self.graph.buflen_of(self.feeds, clock)
    }

    pub fn input_abs(&self, d: usize, i: usize) -> f64 {
        let lref = self.graph.nodes[self.node].inputs[d];
        self.graph.read_abs(self.feeds, lref, i)
    }

    pub fn output_abs(&self, line: usize, i: usize) -> f64 {
        self.graph.nodes[self.node].lines.line(line).get_abs(i)
    }

    pub fn set_abs(&mut self, line: usize, i: usize, value: f64) {
        self.graph.nodes[self.node]
            .lines
            .line_mut(line)
            .set_abs(i, value);
    }

    /// Position the context for a bar-at-a-time replay via [`Self::as_event`].
    pub fn seek(&mut self, i: usize) {
        self.seek = i;
    }

    /// View this context as an event context anchored at the seeked bar.
    pub fn as_event(&mut self) -> NodeCtx<'_> {
        NodeCtx {
            graph: self.graph,
            feeds: self.feeds,
            node: self.node,
            at: Some(self.seek),
        }
    }
}
