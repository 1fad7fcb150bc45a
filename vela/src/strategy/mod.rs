use crate::engine::core::EngineCore;
use crate::engine::timer::{TimerId, TimerSchedule};
use crate::error::VelaError;
use crate::store::StoreMessage;
use crate::strategy::sizer::{Sizer, SizingInfo};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use vela_data::feed::feedline;
use vela_data::graph::NodeId;
use vela_data::{FeedId, FeedStatus, Indicator, LineRef};
use vela_execution::{
    ExecType, Order, OrderRef, OrderSpec, Position, Side, StratId, Trade, Validity,
};

pub mod sizer;

/// Outcome of strategy construction.
///
/// `Skipped` signals an invalid parameter combination; the engine drops
/// the strategy silently and continues (the optimization path relies on
/// this).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StrategyInit {
    Ready,
    Skipped,
}

/// User trading logic.
///
/// `init` wires indicators/timers through the context; the engine then
/// drives the bar callbacks: `prenext` while warming up, `nextstart` once
/// when every feed satisfies its minimum period, `next` afterwards, plus
/// the notification hooks.
#[allow(unused_variables)]
pub trait Strategy: Send {
    fn init(&mut self, ctx: &mut Ctx<'_>) -> Result<StrategyInit, VelaError> {
        Ok(StrategyInit::Ready)
    }

    fn start(&mut self, ctx: &mut Ctx<'_>) {}

    fn prenext(&mut self, ctx: &mut Ctx<'_>) {}

    fn nextstart(&mut self, ctx: &mut Ctx<'_>) {
        self.next(ctx)
    }

    fn next(&mut self, ctx: &mut Ctx<'_>) {}

    /// Called before the broker evaluates orders when cheat-on-open is
    /// enabled; the bar's open is already visible.
    fn next_open(&mut self, ctx: &mut Ctx<'_>) {}

    fn notify_order(&mut self, ctx: &mut Ctx<'_>, order: &Order) {}

    fn notify_trade(&mut self, ctx: &mut Ctx<'_>, trade: &Trade) {}

    fn notify_cashvalue(&mut self, ctx: &mut Ctx<'_>, cash: f64, value: f64) {}

    fn notify_fund(&mut self, ctx: &mut Ctx<'_>, cash: f64, value: f64, fundvalue: f64, shares: f64) {
    }

    fn notify_timer(&mut self, ctx: &mut Ctx<'_>, timer: TimerId, when: f64) {}

    fn notify_store(&mut self, ctx: &mut Ctx<'_>, msg: &StoreMessage) {}

    fn notify_data(&mut self, ctx: &mut Ctx<'_>, feed: FeedId, status: FeedStatus) {}

    fn stop(&mut self, ctx: &mut Ctx<'_>) {}
}

/// Engine-side state of one strategy.
pub(crate) struct StratMeta {
    pub id: StratId,
    pub sizer: Box<dyn Sizer>,
    /// Indicator nodes created by this strategy.
    pub nodes: Vec<NodeId>,
    pub nextstart_done: bool,
}

impl StratMeta {
    pub fn new(id: StratId) -> Self {
        Self {
            id,
            sizer: Box::new(sizer::FixedSize::default()),
            nodes: Vec::new(),
            nextstart_done: false,
        }
    }
}

pub(crate) struct StrategySlot {
    pub user: Option<Box<dyn Strategy>>,
    pub meta: StratMeta,
}

/// Strategy-facing engine context.
///
/// Construction-time operations (adding indicators, timers, the sizer)
/// are only valid before the loop starts; bar-time operations (orders,
/// data access) during callbacks.
pub struct Ctx<'a> {
    pub(crate) core: &'a mut EngineCore,
    pub(crate) meta: &'a mut StratMeta,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(core: &'a mut EngineCore, meta: &'a mut StratMeta) -> Self {
        Self { core, meta }
    }

    pub fn strategy_id(&self) -> StratId {
        self.meta.id
    }

    // ---- construction ----------------------------------------------------

    /// Wire an indicator into the line graph. With no inputs, the
    /// strategy's first feeds' close lines are substituted, one per
    /// declared input.
    pub fn add_indicator(
        &mut self,
        indicator: Box<dyn Indicator>,
        inputs: &[LineRef],
    ) -> Result<NodeId, VelaError> {
        if self.core.running {
            return Err(VelaError::Config(
                "indicators must be created during init".to_string(),
            ));
        }
        let inputs = if inputs.is_empty() {
            let wanted = indicator.min_inputs().max(1);
            if self.core.feed_nodes.len() < wanted {
                return Err(VelaError::Config(format!(
                    "indicator wants {wanted} default inputs, engine has {} feeds",
                    self.core.feed_nodes.len()
                )));
            }
            (0..wanted).map(|i| self.close_line(i)).collect()
        } else {
            inputs.to_vec()
        };
        let node = self.core.graph.add_indicator(indicator, inputs)?;
        self.meta.nodes.push(node);
        Ok(node)
    }

    /// Wrap a scalar into a constant line.
    pub fn add_const(&mut self, value: f64) -> NodeId {
        self.core.graph.add_const(value)
    }

    /// Bind an indicator output line onto another line.
    pub fn bind(&mut self, src: LineRef, dst: LineRef) {
        self.core.graph.bind(src, dst);
    }

    pub fn set_sizer(&mut self, sizer: Box<dyn Sizer>) {
        self.meta.sizer = sizer;
    }

    pub fn add_timer(&mut self, schedule: TimerSchedule) -> TimerId {
        self.core.add_timer(self.meta.id, schedule)
    }

    // ---- data access -----------------------------------------------------

    pub fn num_feeds(&self) -> usize {
        self.core.feeds.len()
    }

    pub fn feed_id(&self, feed: usize) -> FeedId {
        FeedId(feed)
    }

    /// Graph line reference of a feed's line.
    pub fn line(&self, feed: usize, line: usize) -> LineRef {
        LineRef::new(self.core.feed_nodes[feed], line)
    }

    pub fn close_line(&self, feed: usize) -> LineRef {
        self.line(feed, feedline::CLOSE)
    }

    /// Bars seen by a feed.
    pub fn len(&self, feed: usize) -> usize {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(0, |f| f.lines.len())
    }

    pub fn is_empty(&self, feed: usize) -> bool {
        self.len(feed) == 0
    }

    pub fn datetime_num(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.datetime(ago))
    }

    pub fn datetime(&self, feed: usize) -> DateTime<Utc> {
        vela_data::time::num2date(self.datetime_num(feed, 0))
    }

    /// Current bar time in the engine's configured timezone.
    pub fn datetime_tz(&self, feed: usize) -> DateTime<Tz> {
        vela_data::time::num2date_tz(self.datetime_num(feed, 0), self.core.tz)
    }

    pub fn open(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.open(ago))
    }

    pub fn high(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.high(ago))
    }

    pub fn low(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.low(ago))
    }

    pub fn close(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.close(ago))
    }

    pub fn volume(&self, feed: usize, ago: isize) -> f64 {
        self.core
            .feeds
            .get(FeedId(feed))
            .map_or(f64::NAN, |f| f.volume(ago))
    }

    /// First output line of an indicator node, `ago` bars back.
    pub fn ind(&self, node: NodeId, ago: isize) -> f64 {
        self.ind_line(node, 0, ago)
    }

    pub fn ind_line(&self, node: NodeId, line: usize, ago: isize) -> f64 {
        self.core
            .graph
            .read(&self.core.feeds, LineRef::new(node, line), ago)
    }

    // ---- broker ----------------------------------------------------------

    pub fn cash(&self) -> f64 {
        self.core.broker.get_cash()
    }

    pub fn value(&self) -> f64 {
        self.core.broker.get_value(&self.core.feeds)
    }

    pub fn fund_value(&self) -> f64 {
        self.core.broker.get_fund_value()
    }

    pub fn fund_shares(&self) -> f64 {
        self.core.broker.get_fund_shares()
    }

    pub fn position(&self, feed: usize) -> Position {
        self.core.broker.get_position(FeedId(feed))
    }

    pub fn order(&self, order: OrderRef) -> Option<&Order> {
        self.core.broker.order(order)
    }

    fn resolve_size(&mut self, feed: usize, size: Option<f64>, is_buy: bool) -> f64 {
        match size {
            Some(size) => size,
            None => {
                let info = SizingInfo {
                    cash: self.core.broker.get_cash(),
                    price: self.close(feed, 0),
                    position: self.position(feed),
                    is_buy,
                    scheme: self.core.broker.scheme(FeedId(feed)),
                };
                self.meta.sizer.size(&info)
            }
        }
    }

    /// Submit a fully specified order.
    pub fn submit(&mut self, feed: usize, spec: OrderSpec) -> Result<OrderRef, VelaError> {
        let owner = self.meta.id;
        Ok(self
            .core
            .broker
            .create_and_submit(owner, FeedId(feed), spec, &self.core.feeds)?)
    }

    /// Market buy; `None` size asks the strategy's sizer.
    pub fn buy(&mut self, feed: usize, size: Option<f64>) -> Result<Option<OrderRef>, VelaError> {
        let size = self.resolve_size(feed, size, true);
        if size <= 0.0 {
            return Ok(None);
        }
        self.submit(feed, OrderSpec::market(Side::Buy, size)).map(Some)
    }

    /// Market sell; `None` size asks the strategy's sizer.
    pub fn sell(&mut self, feed: usize, size: Option<f64>) -> Result<Option<OrderRef>, VelaError> {
        let size = self.resolve_size(feed, size, false);
        if size <= 0.0 {
            return Ok(None);
        }
        self.submit(feed, OrderSpec::market(Side::Sell, size))
            .map(Some)
    }

    /// Close the current position with a market order.
    pub fn close_position(&mut self, feed: usize) -> Result<Option<OrderRef>, VelaError> {
        let position = self.position(feed);
        if position.is_flat() {
            return Ok(None);
        }
        let side = if position.size > 0.0 {
            Side::Sell
        } else {
            Side::Buy
        };
        self.submit(feed, OrderSpec::market(side, position.size.abs()))
            .map(Some)
    }

    /// Entry + protective stop + take-profit target with OCO semantics
    /// between the children. Returns `[parent, stop, limit]`.
    pub fn buy_bracket(
        &mut self,
        feed: usize,
        size: f64,
        entry_limit: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<[OrderRef; 3], VelaError> {
        self.bracket(feed, Side::Buy, size, entry_limit, stop_price, limit_price)
    }

    pub fn sell_bracket(
        &mut self,
        feed: usize,
        size: f64,
        entry_limit: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<[OrderRef; 3], VelaError> {
        self.bracket(feed, Side::Sell, size, entry_limit, stop_price, limit_price)
    }

    fn bracket(
        &mut self,
        feed: usize,
        side: Side,
        size: f64,
        entry_limit: f64,
        stop_price: f64,
        limit_price: f64,
    ) -> Result<[OrderRef; 3], VelaError> {
        let exit_side = match side {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        };

        let mut parent = OrderSpec::limit(side, size, entry_limit);
        parent.transmit = false;
        let parent_ref = self.submit(feed, parent)?;

        let mut stop = OrderSpec::stop(exit_side, size, stop_price);
        stop.transmit = false;
        stop.parent = Some(parent_ref);
        let stop_ref = self.submit(feed, stop)?;

        let mut limit = OrderSpec::limit(exit_side, size, limit_price);
        limit.transmit = true;
        limit.parent = Some(parent_ref);
        let limit_ref = self.submit(feed, limit)?;

        Ok([parent_ref, stop_ref, limit_ref])
    }

    /// Submit an order valid only for the current session.
    pub fn buy_limit_day(
        &mut self,
        feed: usize,
        size: f64,
        price: f64,
    ) -> Result<OrderRef, VelaError> {
        self.submit(feed, OrderSpec::limit(Side::Buy, size, price).valid(Validity::Day))
    }

    pub fn cancel(&mut self, order: OrderRef) -> bool {
        self.core.broker.cancel(order)
    }

    /// Request the engine loop to stop after finishing notifications.
    pub fn stop_engine(&self) {
        self.core
            .stop_flag
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// Issue a close-priced order, exercising the `Close` execution type.
    pub fn order_at_close(
        &mut self,
        feed: usize,
        side: Side,
        size: f64,
    ) -> Result<OrderRef, VelaError> {
        let mut spec = OrderSpec::market(side, size);
        spec.exec_type = ExecType::Close;
        self.submit(feed, spec)
    }
}
