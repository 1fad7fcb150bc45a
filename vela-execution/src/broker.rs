use crate::{
    commission::CommissionScheme,
    error::ExecutionError,
    order::{Order, OrderRef, OrderSpec, OrderStatus, Side, StratId},
    position::Position,
};
use serde::{Deserialize, Serialize};
use vela_data::{feed::FeedStore, time, FeedId};

/// A recorded fill replayed through a `Historical` order.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct HistoricalFill {
    pub feed: FeedId,
    pub dt: f64,
    /// Signed size: positive buys, negative sells.
    pub size: f64,
    pub price: f64,
}

/// One point of an externally supplied fund evolution.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct FundHistoryEntry {
    pub dt: f64,
    /// Value of one fund share.
    pub share_value: f64,
    /// Outstanding fund shares.
    pub shares: f64,
}

/// Abstract broker contract.
///
/// Live brokers conform to the same order state machine but delegate
/// matching to the venue; the simulated implementation in [`crate::sim`]
/// matches against the next bar's OHLC.
pub trait Broker: Send {
    fn start(&mut self) {}
    fn stop(&mut self) {}

    fn get_cash(&self) -> f64;
    fn set_cash(&mut self, cash: f64);
    fn add_cash(&mut self, cash: f64);
    fn get_value(&self, feeds: &FeedStore) -> f64;
    fn get_fund_value(&self) -> f64;
    fn get_fund_shares(&self) -> f64;

    fn get_position(&self, feed: FeedId) -> Position;

    /// Commission scheme effective for a feed.
    fn scheme(&self, feed: FeedId) -> CommissionScheme;
    fn set_commission(&mut self, feed: Option<FeedId>, scheme: CommissionScheme);

    /// Issue the next unique order ref.
    fn next_ref(&mut self) -> OrderRef;

    fn submit(&mut self, order: Order, feeds: &FeedStore) -> Result<OrderRef, ExecutionError>;

    /// Request cancellation; false when the order is already terminal or
    /// unknown.
    fn cancel(&mut self, order: OrderRef) -> bool;

    fn order_status(&self, order: OrderRef) -> Option<OrderStatus>;
    fn order(&self, order: OrderRef) -> Option<&Order>;

    /// Pop the next order-state notification, FSM-ordered per order.
    fn get_notification(&mut self) -> Option<Order>;

    /// Match pending orders against the freshly delivered bars.
    fn next(&mut self, feeds: &FeedStore, dt0: f64) -> Result<(), ExecutionError>;

    /// Engine phase hint: orders submitted while the cheat-on-open window
    /// is active are eligible against the current bar's open.
    fn set_cheat_phase(&mut self, _cheating: bool) {}

    /// Engine-level cheat-on-open propagation (`broker_coo`).
    fn configure_cheat_on_open(&mut self, _on: bool) {}

    fn add_order_history(
        &mut self,
        _fills: Vec<HistoricalFill>,
        _notify: bool,
        _feeds: &FeedStore,
    ) -> Result<(), ExecutionError> {
        Ok(())
    }

    fn set_fund_history(&mut self, _history: Vec<FundHistoryEntry>) {}

    /// Build an order against a feed's current state and submit it.
    fn create_and_submit(
        &mut self,
        owner: StratId,
        feed: FeedId,
        spec: OrderSpec,
        feeds: &FeedStore,
    ) -> Result<OrderRef, ExecutionError> {
        let f = feeds
            .get(feed)
            .ok_or(ExecutionError::UnknownFeed(0, feed.0))?;
        let pclose = f.close(0);
        let dt = f.datetime(0);
        let reference_dt = if dt.is_finite() { dt } else { time::now_num() };
        let dteos = time::next_session_end(reference_dt, f.session_end);

        let id = self.next_ref();
        let order = Order::new(id, owner, feed, spec, pclose, reference_dt, dteos)?;
        self.submit(order, feeds)
    }

    fn buy(
        &mut self,
        owner: StratId,
        feed: FeedId,
        mut spec: OrderSpec,
        feeds: &FeedStore,
    ) -> Result<OrderRef, ExecutionError> {
        spec.side = Side::Buy;
        self.create_and_submit(owner, feed, spec, feeds)
    }

    fn sell(
        &mut self,
        owner: StratId,
        feed: FeedId,
        mut spec: OrderSpec,
        feeds: &FeedStore,
    ) -> Result<OrderRef, ExecutionError> {
        spec.side = Side::Sell;
        self.create_and_submit(owner, feed, spec, feeds)
    }
}
