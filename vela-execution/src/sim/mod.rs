use crate::{
    broker::{Broker, FundHistoryEntry, HistoricalFill},
    commission::CommissionScheme,
    error::ExecutionError,
    order::{ExecType, Order, OrderRef, OrderSpec, OrderStatus, Side},
    position::Position,
    slippage::SlippageConfig,
};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, trace};
use vecmap::VecMap;
use vela_data::{feed::FeedStore, FeedId};

/// Volume policy limiting how much of an order one bar may fill. The
/// default fills everything, which is also what leaves the FSM's `Partial`
/// state reachable under the alternatives.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub enum FillPolicy {
    /// At most `size` units per bar.
    FixedSize(f64),
    /// At most this fraction of the bar's volume.
    BarVolumePerc(f64),
}

impl FillPolicy {
    fn cap(&self, remaining: f64, bar_volume: f64) -> f64 {
        let limit = match self {
            FillPolicy::FixedSize(size) => *size,
            FillPolicy::BarVolumePerc(perc) => bar_volume * perc,
        };
        remaining.signum() * remaining.abs().min(limit.abs())
    }
}

/// Configuration of the simulated broker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimBrokerConfig {
    pub cash: f64,
    /// Check affordability at submission, rejecting before acceptance.
    pub checksubmit: bool,
    pub slippage: SlippageConfig,
    /// Cheat-on-close: Market orders submitted on a bar may fill at that
    /// same bar's close.
    pub coc: bool,
    /// Cheat-on-open: orders submitted during `next_open` are eligible
    /// against the very bar being opened.
    pub coo: bool,
    pub filler: Option<FillPolicy>,
    /// Starting value of one fund share.
    pub fundstartval: f64,
    pub fundmode: bool,
    /// Assign accrued credit interest to the pnl of closing trades instead
    /// of silently draining cash.
    pub int2pnl: bool,
}

impl Default for SimBrokerConfig {
    fn default() -> Self {
        Self {
            cash: 10_000.0,
            checksubmit: true,
            slippage: SlippageConfig::default(),
            coc: false,
            coo: false,
            filler: None,
            fundstartval: 100.0,
            fundmode: false,
            int2pnl: true,
        }
    }
}

/// Matching engine over the next bar's OHLC.
///
/// Owns the authoritative order table, pending queue, bracket/OCO linkage,
/// per-feed positions, cash and the fund accounting. Notifications are
/// order snapshots queued in state-transition order.
pub struct SimBroker {
    cfg: SimBrokerConfig,
    cash: f64,
    orders: FnvHashMap<OrderRef, Order>,
    pending: Vec<OrderRef>,
    submitted: VecDeque<OrderRef>,
    parked: FnvHashMap<OrderRef, Vec<OrderRef>>,
    children: FnvHashMap<OrderRef, Vec<OrderRef>>,
    oco_leader: FnvHashMap<OrderRef, OrderRef>,
    oco_groups: FnvHashMap<OrderRef, Vec<OrderRef>>,
    notifs: VecDeque<Order>,
    positions: VecMap<usize, Position>,
    schemes: VecMap<usize, CommissionScheme>,
    default_scheme: CommissionScheme,
    ref_counter: OrderRef,
    last_dt: f64,
    /// Day number of the last interest accrual.
    interest_day: f64,
    cheat_phase: bool,
    hist_notify: bool,
    fundshares: f64,
    fundvalue: f64,
    fund_history: Vec<FundHistoryEntry>,
    fund_cursor: usize,
}

impl Default for SimBroker {
    fn default() -> Self {
        Self::new(SimBrokerConfig::default())
    }
}

impl SimBroker {
    pub fn new(cfg: SimBrokerConfig) -> Self {
        let cash = cfg.cash;
        let fundshares = cash / cfg.fundstartval;
        let fundvalue = cfg.fundstartval;
        Self {
            cfg,
            cash,
            orders: FnvHashMap::default(),
            pending: Vec::new(),
            submitted: VecDeque::new(),
            parked: FnvHashMap::default(),
            children: FnvHashMap::default(),
            oco_leader: FnvHashMap::default(),
            oco_groups: FnvHashMap::default(),
            notifs: VecDeque::new(),
            positions: VecMap::new(),
            schemes: VecMap::new(),
            default_scheme: CommissionScheme::default(),
            ref_counter: 0,
            last_dt: f64::NAN,
            interest_day: f64::NAN,
            cheat_phase: false,
            hist_notify: true,
            fundshares,
            fundvalue,
            fund_history: Vec::new(),
            fund_cursor: 0,
        }
    }

    pub fn config(&self) -> &SimBrokerConfig {
        &self.cfg
    }

    pub fn set_coc(&mut self, coc: bool) {
        self.cfg.coc = coc;
    }

    pub fn set_coo(&mut self, coo: bool) {
        self.cfg.coo = coo;
    }

    pub fn set_slippage(&mut self, slippage: SlippageConfig) {
        self.cfg.slippage = slippage;
    }

    pub fn set_filler(&mut self, filler: Option<FillPolicy>) {
        self.cfg.filler = filler;
    }

    pub fn set_fundmode(&mut self, fundmode: bool) {
        self.cfg.fundmode = fundmode;
    }

    pub fn pending_orders(&self) -> impl Iterator<Item = &Order> + '_ {
        self.pending.iter().filter_map(|r| self.orders.get(r))
    }

    fn scheme_for(&self, feed: FeedId) -> &CommissionScheme {
        self.schemes.get(&feed.0).unwrap_or(&self.default_scheme)
    }

    fn notify(&mut self, oref: OrderRef) {
        if let Some(order) = self.orders.get_mut(&oref) {
            let snapshot = order.snapshot();
            if snapshot.exec_type == ExecType::Historical && !self.hist_notify {
                return;
            }
            trace!(order = oref, status = %snapshot.status, "order notification");
            self.notifs.push_back(snapshot);
        }
    }

    fn submit_accept(&mut self, oref: OrderRef, feeds: &FeedStore) -> Result<(), ExecutionError> {
        let (feed, exec_type) = {
            let order = self
                .orders
                .get(&oref)
                .ok_or(ExecutionError::UnknownOrder(oref))?;
            (order.feed, order.exec_type)
        };
        let feed_len = feeds.get(feed).map_or(0, |f| f.lines.len());
        // orders placed in the cheat-on-open window count as submitted on
        // the previous bar so they match against the bar being opened
        let submitted_len = if self.cheat_phase && self.cfg.coo {
            feed_len.saturating_sub(1)
        } else {
            feed_len
        };

        let order = self.orders.get_mut(&oref).expect("checked above");
        order.submit(submitted_len)?;
        self.notify(oref);

        if self.cfg.checksubmit && exec_type != ExecType::Historical {
            self.submitted.push_back(oref);
        } else {
            let order = self.orders.get_mut(&oref).expect("checked above");
            order.accept()?;
            self.notify(oref);
            self.pending.push(oref);
        }
        Ok(())
    }

    fn check_submitted(&mut self, feeds: &FeedStore, dt0: f64) -> Result<(), ExecutionError> {
        while let Some(oref) = self.submitted.pop_front() {
            let Some(order) = self.orders.get(&oref) else {
                continue;
            };
            // cancelled (e.g. by a bracket cascade) while still queued
            if order.status != OrderStatus::Submitted {
                continue;
            }
            let scheme = *self.scheme_for(order.feed);
            let price_ref = order.created.price;
            let position = self.get_position(order.feed);
            let update = position.pseudo_update(order.executed.remsize, price_ref);
            let cost = scheme.operating_cost(update.opened, price_ref) / scheme.leverage;

            let order = self.orders.get_mut(&oref).expect("present");
            if cost <= self.cash {
                order.accept()?;
                self.notify(oref);
                self.pending.push(oref);
            } else {
                debug!(order = oref, cost, cash = self.cash, "submission rejected");
                order.reject(dt0)?;
                self.notify(oref);
                self.post_terminal(oref, dt0)?;
            }
        }
        Ok(())
    }

    /// Cancel one order and cascade to its bracket children.
    fn cancel_order(&mut self, oref: OrderRef, dt: f64) -> Result<(), ExecutionError> {
        let Some(order) = self.orders.get_mut(&oref) else {
            return Ok(());
        };
        if !order.alive() {
            return Ok(());
        }
        order.cancel(dt)?;
        self.notify(oref);
        if let Some(child_refs) = self.children.get(&oref).cloned() {
            for child in child_refs {
                self.cancel_order(child, dt)?;
            }
        }
        Ok(())
    }

    /// Bracket and OCO follow-up once an order reaches a terminal state.
    fn post_terminal(&mut self, oref: OrderRef, dt: f64) -> Result<(), ExecutionError> {
        let Some(order) = self.orders.get(&oref) else {
            return Ok(());
        };
        let status = order.status;
        let parent = order.parent;

        // one-cancels-other: any terminal member takes the group with it
        if let Some(leader) = self.oco_leader.get(&oref).copied() {
            let members = self.oco_groups.get(&leader).cloned().unwrap_or_default();
            for member in members {
                if member != oref {
                    self.cancel_order(member, dt)?;
                }
            }
        }

        match parent {
            None => {
                let child_refs = self.children.get(&oref).cloned().unwrap_or_default();
                match status {
                    OrderStatus::Completed => {
                        // entry filled: protective children go live
                        for child in child_refs {
                            if let Some(c) = self.orders.get_mut(&child) {
                                if c.alive() {
                                    c.activate();
                                }
                            }
                        }
                    }
                    OrderStatus::Canceled
                    | OrderStatus::Expired
                    | OrderStatus::Margin
                    | OrderStatus::Rejected => {
                        for child in child_refs {
                            self.cancel_order(child, dt)?;
                        }
                    }
                    _ => {}
                }
            }
            Some(parent_ref) => {
                if status == OrderStatus::Completed {
                    let siblings = self.children.get(&parent_ref).cloned().unwrap_or_default();
                    for sibling in siblings {
                        if sibling != oref {
                            self.cancel_order(sibling, dt)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Fill price for the order against the current bar, if it matches.
    fn match_price(&mut self, oref: OrderRef, feeds: &FeedStore) -> Option<f64> {
        let order = self.orders.get(&oref)?;
        let feed = feeds.get(order.feed)?;
        let (open, high, low, close) = (feed.open(0), feed.high(0), feed.low(0), feed.close(0));
        let slip = self.cfg.slippage;
        let is_buy = order.is_buy();
        let price = order.created.price;
        let plimit = order.created.pricelimit;

        let fill = match order.exec_type {
            ExecType::Market => {
                if is_buy {
                    slip.slip_up(open, high, slip.slip_open)
                } else {
                    slip.slip_down(open, low, slip.slip_open)
                }
            }
            ExecType::Close => Some(close),
            ExecType::Limit => Self::limit_fill(is_buy, price, open, high, low, &slip),
            ExecType::Stop | ExecType::StopTrail => {
                Self::stop_fill(is_buy, price, open, high, low, &slip)
            }
            ExecType::StopLimit | ExecType::StopTrailLimit => {
                if order.triggered {
                    Self::limit_fill(is_buy, plimit, open, high, low, &slip)
                } else {
                    let triggered = if is_buy {
                        open >= price || high >= price
                    } else {
                        open <= price || low <= price
                    };
                    if !triggered {
                        None
                    } else {
                        let via_open = if is_buy { open >= price } else { open <= price };
                        let entry = if via_open { open } else { price };
                        self.orders.get_mut(&oref).expect("present").triggered = true;
                        // the limit engages for the remainder of the bar
                        if via_open {
                            Self::limit_fill(is_buy, plimit, open, high, low, &slip)
                        } else if is_buy {
                            if entry <= plimit {
                                Some(entry.min(plimit))
                            } else if low <= plimit {
                                Some(plimit)
                            } else {
                                None
                            }
                        } else if entry >= plimit {
                            Some(entry.max(plimit))
                        } else if high >= plimit {
                            Some(plimit)
                        } else {
                            None
                        }
                    }
                }
            }
            ExecType::Historical => {
                let dt = feed.datetime(0);
                (dt >= order.created.dt).then_some(order.created.price)
            }
        };
        fill
    }

    fn limit_fill(
        is_buy: bool,
        plimit: f64,
        open: f64,
        high: f64,
        low: f64,
        slip: &SlippageConfig,
    ) -> Option<f64> {
        if is_buy {
            if open <= plimit {
                // opened below the limit: fill from the open, slippage may
                // not breach the limit contract
                slip.slip_up(open, high.min(plimit), slip.slip_limit)
            } else if low <= plimit {
                Some(plimit)
            } else {
                None
            }
        } else if open >= plimit {
            slip.slip_down(open, low.max(plimit), slip.slip_limit)
        } else if high >= plimit {
            Some(plimit)
        } else {
            None
        }
    }

    fn stop_fill(
        is_buy: bool,
        pstop: f64,
        open: f64,
        high: f64,
        low: f64,
        slip: &SlippageConfig,
    ) -> Option<f64> {
        if is_buy {
            if open >= pstop {
                // gapped over the trigger: worse of trigger/open is the open
                slip.slip_up(open, high, slip.slip_open)
            } else if high >= pstop {
                slip.slip_up(pstop, high, true)
            } else {
                None
            }
        } else if open <= pstop {
            slip.slip_down(open, low, slip.slip_open)
        } else if low <= pstop {
            slip.slip_down(pstop, low, true)
        } else {
            None
        }
    }

    /// Execute a matched order at `price`, updating position, cash and the
    /// order's execution records. Insufficient cash turns the order into
    /// `Margin` instead of filling.
    fn execute_at(
        &mut self,
        oref: OrderRef,
        price: f64,
        dt: f64,
        bar_volume: f64,
    ) -> Result<(), ExecutionError> {
        let (feed, remaining) = {
            let order = self
                .orders
                .get(&oref)
                .ok_or(ExecutionError::UnknownOrder(oref))?;
            (order.feed, order.executed.remsize)
        };
        let size = match self.cfg.filler {
            Some(filler) => filler.cap(remaining, bar_volume),
            None => remaining,
        };
        if size == 0.0 {
            return Ok(());
        }

        let scheme = *self.scheme_for(feed);
        let position = self.get_position(feed);
        let pprice_orig = position.price;
        let update = position.pseudo_update(size, price);

        let closed = update.closed;
        let opened = update.opened;
        let closed_value = scheme.operating_cost(closed, pprice_orig);
        let closed_comm = scheme.commission_rate(closed, price);
        let opened_value = scheme.operating_cost(opened, price);
        let opened_comm = scheme.commission_rate(opened, price);
        let pnl = scheme.profit_and_loss(-closed, pprice_orig, price);

        let cash_delta = if scheme.stocklike {
            -(size * price) - closed_comm - opened_comm
        } else {
            closed_value - opened_value + pnl - closed_comm - opened_comm
        };

        if self.cash + cash_delta < 0.0 {
            debug!(order = oref, cash = self.cash, cash_delta, "margin call");
            let order = self.orders.get_mut(&oref).expect("present");
            order.margin(dt)?;
            self.notify(oref);
            self.post_terminal(oref, dt)?;
            return Ok(());
        }

        self.cash += cash_delta;
        let committed = self
            .positions
            .entry(feed.0)
            .or_insert_with(Position::default)
            .update(size, price, dt);

        let margin = (!scheme.stocklike).then(|| scheme.margin_per_unit(price));
        let order = self.orders.get_mut(&oref).expect("present");
        order.execute(
            dt,
            size,
            price,
            closed,
            closed_value,
            closed_comm,
            opened,
            opened_value,
            opened_comm,
            margin,
            pnl,
            committed.size,
            committed.price,
        )?;
        let terminal = !order.alive();
        self.notify(oref);
        if terminal {
            self.post_terminal(oref, dt)?;
        }
        Ok(())
    }

    fn accrue_interest(&mut self, feeds: &FeedStore, dt0: f64) {
        let today = dt0.floor();
        if self.interest_day.is_nan() {
            self.interest_day = today;
            return;
        }
        let days = today - self.interest_day;
        if days <= 0.0 {
            return;
        }
        self.interest_day = today;
        for (feed_idx, position) in self.positions.iter() {
            let scheme = self
                .schemes
                .get(feed_idx)
                .unwrap_or(&self.default_scheme);
            let price = feeds
                .get(FeedId(*feed_idx))
                .map_or(f64::NAN, |f| f.close(0));
            if !price.is_finite() {
                continue;
            }
            let interest = scheme.credit_interest(days, position.size, price);
            if interest > 0.0 {
                self.cash -= interest;
            }
        }
    }

    fn process_fund_history(&mut self, dt0: f64) {
        while let Some(entry) = self.fund_history.get(self.fund_cursor) {
            if entry.dt > dt0 {
                break;
            }
            self.fundvalue = entry.share_value;
            self.fundshares = entry.shares;
            self.fund_cursor += 1;
        }
    }
}

impl Broker for SimBroker {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn get_cash(&self) -> f64 {
        self.cash
    }

    fn set_cash(&mut self, cash: f64) {
        self.cash = cash;
        self.cfg.cash = cash;
        self.fundshares = cash / self.cfg.fundstartval;
    }

    fn add_cash(&mut self, cash: f64) {
        // new money buys fund shares at the current share value
        if self.fundvalue > 0.0 {
            self.fundshares += cash / self.fundvalue;
        }
        self.cash += cash;
    }

    fn get_value(&self, feeds: &FeedStore) -> f64 {
        let mut value = self.cash;
        for (feed_idx, position) in self.positions.iter() {
            if position.size == 0.0 {
                continue;
            }
            let scheme = self
                .schemes
                .get(feed_idx)
                .unwrap_or(&self.default_scheme);
            let price = feeds
                .get(FeedId(*feed_idx))
                .map_or(position.price, |f| {
                    let close = f.close(0);
                    if close.is_finite() {
                        close
                    } else {
                        position.price
                    }
                });
            value += scheme.position_value(position.size, position.price, price);
        }
        value
    }

    fn get_fund_value(&self) -> f64 {
        self.fundvalue
    }

    fn get_fund_shares(&self) -> f64 {
        self.fundshares
    }

    fn get_position(&self, feed: FeedId) -> Position {
        self.positions.get(&feed.0).copied().unwrap_or_default()
    }

    fn scheme(&self, feed: FeedId) -> CommissionScheme {
        *self.scheme_for(feed)
    }

    fn set_commission(&mut self, feed: Option<FeedId>, scheme: CommissionScheme) {
        match feed {
            Some(feed) => {
                self.schemes.insert(feed.0, scheme);
            }
            None => self.default_scheme = scheme,
        }
    }

    fn next_ref(&mut self) -> OrderRef {
        self.ref_counter += 1;
        self.ref_counter
    }

    fn submit(&mut self, order: Order, feeds: &FeedStore) -> Result<OrderRef, ExecutionError> {
        let oref = order.id;
        let parent = order.parent;
        let transmit = order.transmit;

        if let Some(oco_ref) = order.oco {
            let leader = self.oco_leader.get(&oco_ref).copied().unwrap_or(oco_ref);
            self.oco_leader.insert(oref, leader);
            self.oco_leader.entry(leader).or_insert(leader);
            let group = self.oco_groups.entry(leader).or_default();
            if !group.contains(&leader) {
                group.push(leader);
            }
            group.push(oref);
        }

        if let Some(parent_ref) = parent {
            if !self.orders.contains_key(&parent_ref) {
                return Err(ExecutionError::UnknownOrder(parent_ref));
            }
            self.children.entry(parent_ref).or_default().push(oref);
        }

        self.orders.insert(oref, order);

        let group_key = parent.unwrap_or(oref);
        self.parked.entry(group_key).or_default().push(oref);
        if transmit {
            let group = self.parked.remove(&group_key).unwrap_or_default();
            for member in group {
                self.submit_accept(member, feeds)?;
            }
        }
        Ok(oref)
    }

    fn cancel(&mut self, oref: OrderRef) -> bool {
        let Some(order) = self.orders.get(&oref) else {
            return false;
        };
        if !order.alive() {
            return false;
        }
        let dt = self.last_dt;
        if self.cancel_order(oref, dt).is_err() {
            return false;
        }
        let _ = self.post_terminal(oref, dt);
        self.pending.retain(|r| {
            self.orders
                .get(r)
                .is_some_and(|o| o.alive())
        });
        true
    }

    fn order_status(&self, oref: OrderRef) -> Option<OrderStatus> {
        self.orders.get(&oref).map(|o| o.status)
    }

    fn order(&self, oref: OrderRef) -> Option<&Order> {
        self.orders.get(&oref)
    }

    fn get_notification(&mut self) -> Option<Order> {
        self.notifs.pop_front()
    }

    fn next(&mut self, feeds: &FeedStore, dt0: f64) -> Result<(), ExecutionError> {
        self.last_dt = dt0;
        self.process_fund_history(dt0);
        self.accrue_interest(feeds, dt0);
        self.check_submitted(feeds, dt0)?;

        let queue: Vec<OrderRef> = self.pending.clone();
        for oref in queue {
            let Some(order) = self.orders.get(&oref) else {
                continue;
            };
            if !order.alive() {
                continue;
            }
            let feed_id = order.feed;
            let Some(feed) = feeds.get(feed_id) else {
                return Err(ExecutionError::UnknownFeed(oref, feed_id.0));
            };
            if feed.lines.is_empty() {
                continue;
            }
            let bar_dt = feed.datetime(0);
            let bar_volume = feed.volume(0);
            let feed_len = feed.lines.len();
            let close = feed.close(0);

            {
                let order = self.orders.get_mut(&oref).expect("present");
                if order.expire(bar_dt)? {
                    self.notify(oref);
                    self.post_terminal(oref, bar_dt)?;
                    continue;
                }
            }

            let order = self.orders.get(&oref).expect("present");
            if !order.active {
                continue;
            }
            let same_bar_ok =
                self.cfg.coc && matches!(order.exec_type, ExecType::Market | ExecType::Close);
            if feed_len <= order.submitted_len && !same_bar_ok {
                continue;
            }

            match self.match_price(oref, feeds) {
                Some(price) => self.execute_at(oref, price, bar_dt, bar_volume)?,
                None => {
                    let order = self.orders.get_mut(&oref).expect("present");
                    if matches!(
                        order.exec_type,
                        ExecType::StopTrail | ExecType::StopTrailLimit
                    ) && !order.triggered
                    {
                        order.trail_adjust(close);
                    }
                }
            }
        }

        self.pending.retain(|r| {
            self.orders
                .get(r)
                .is_some_and(|o| o.alive())
        });
        if self.fund_history.is_empty() && self.fundshares > 0.0 {
            self.fundvalue = self.get_value(feeds) / self.fundshares;
        }
        Ok(())
    }

    fn set_cheat_phase(&mut self, cheating: bool) {
        self.cheat_phase = cheating;
    }

    fn configure_cheat_on_open(&mut self, on: bool) {
        self.cfg.coo = on;
    }

    fn add_order_history(
        &mut self,
        fills: Vec<HistoricalFill>,
        notify: bool,
        feeds: &FeedStore,
    ) -> Result<(), ExecutionError> {
        self.hist_notify = notify;
        for fill in fills {
            let side = if fill.size >= 0.0 {
                Side::Buy
            } else {
                Side::Sell
            };
            let mut spec = OrderSpec::market(side, fill.size.abs());
            spec.exec_type = ExecType::Historical;
            spec.price = Some(fill.price);

            let id = self.next_ref();
            let mut order = Order::new(id, 0, fill.feed, spec, fill.price, fill.dt, fill.dt)?;
            // stamp the recorded execution time as the creation reference
            order.created.dt = fill.dt;
            self.orders.insert(id, order);
            self.submit_accept(id, feeds)?;
        }
        Ok(())
    }

    fn set_fund_history(&mut self, history: Vec<FundHistoryEntry>) {
        let mut history = history;
        history.sort_by(|a, b| a.dt.total_cmp(&b.dt));
        self.fund_history = history;
        self.fund_cursor = 0;
        self.cfg.fundmode = true;
    }
}
