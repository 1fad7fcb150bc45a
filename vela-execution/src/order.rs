use crate::error::ExecutionError;
use derive_more::Display;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use vela_data::FeedId;

/// Unique, monotonically increasing order identifier.
pub type OrderRef = u64;

/// Index of the strategy owning an order.
pub type StratId = usize;

/// Tolerance under which a remaining size counts as fully filled.
pub const SIZE_EPSILON: f64 = 1e-9;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum ExecType {
    Market,
    /// Execute at the bar's closing price.
    Close,
    Limit,
    Stop,
    StopLimit,
    StopTrail,
    StopTrailLimit,
    /// Replay of a recorded fill at its recorded time/price.
    Historical,
}

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    Partial,
    Completed,
    Canceled,
    Expired,
    Margin,
    Rejected,
}

impl OrderStatus {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed
                | OrderStatus::Canceled
                | OrderStatus::Expired
                | OrderStatus::Margin
                | OrderStatus::Rejected
        )
    }
}

/// Time validity of an order.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Default)]
pub enum Validity {
    /// Never expires.
    #[default]
    GoodUntilCancelled,
    /// Expires at the end of the submission session.
    Day,
    /// Expires when the bar timestamp exceeds the given day-number.
    Until(f64),
}

/// Per-fill execution record.
///
/// `closed`/`opened` split the fill into the portion that reduced an
/// existing position and the portion that extended (or flipped) it, with
/// the matching values, commissions and realized pnl.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct ExecutionBit {
    pub dt: f64,
    pub size: f64,
    pub price: f64,
    pub closed: f64,
    pub opened: f64,
    pub closed_value: f64,
    pub closed_comm: f64,
    pub opened_value: f64,
    pub opened_comm: f64,
    pub pnl: f64,
    /// Position size after this fill.
    pub psize: f64,
    /// Position average price after this fill.
    pub pprice: f64,
}

impl ExecutionBit {
    pub fn value(&self) -> f64 {
        self.closed_value + self.opened_value
    }

    pub fn comm(&self) -> f64 {
        self.closed_comm + self.opened_comm
    }
}

/// Creation request data and execution outcome for one side of an order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
pub struct OrderData {
    pub dt: f64,
    pub size: f64,
    pub price: f64,
    pub pricelimit: f64,
    /// Reference close at creation, the fallback execution reference.
    pub pclose: f64,
    pub trailamount: f64,
    pub trailpercent: f64,
    pub remsize: f64,
    pub value: f64,
    pub comm: f64,
    pub pnl: f64,
    pub margin: Option<f64>,
    pub psize: f64,
    pub pprice: f64,
    pub exbits: Vec<ExecutionBit>,
    /// Window of bits not yet delivered in a notification.
    pending_from: usize,
    pending_to: usize,
}

impl OrderData {
    fn add_bit(&mut self, bit: ExecutionBit) {
        self.remsize -= bit.size;
        self.dt = bit.dt;

        let old_value = self.size * self.price;
        let new_value = bit.size * bit.price;
        self.size += bit.size;
        self.price = if self.size.abs() > SIZE_EPSILON {
            (old_value + new_value) / self.size
        } else {
            bit.price
        };
        self.value += bit.value();
        self.comm += bit.comm();
        self.pnl += bit.pnl;
        self.psize = bit.psize;
        self.pprice = bit.pprice;
        self.exbits.push(bit);
    }

    /// Slide the pending window past already-notified bits.
    pub fn mark_pending(&mut self) {
        self.pending_from = self.pending_to;
        self.pending_to = self.exbits.len();
    }

    /// Bits accumulated since the previous notification snapshot.
    pub fn pending(&self) -> &[ExecutionBit] {
        &self.exbits[self.pending_from..self.pending_to]
    }
}

/// User-facing order request; sizes are positive, direction is `side`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderSpec {
    pub side: Side,
    pub size: f64,
    pub exec_type: ExecType,
    pub price: Option<f64>,
    pub plimit: Option<f64>,
    pub valid: Validity,
    pub tradeid: usize,
    pub trailamount: Option<f64>,
    pub trailpercent: Option<f64>,
    /// Bracket linkage: children carry the parent's ref and only become
    /// active once the parent fills.
    pub parent: Option<OrderRef>,
    /// When false, the order is parked until a transmitting sibling
    /// materialises the whole group at the broker.
    pub transmit: bool,
    pub oco: Option<OrderRef>,
}

impl OrderSpec {
    pub fn market(side: Side, size: f64) -> Self {
        Self {
            side,
            size,
            exec_type: ExecType::Market,
            price: None,
            plimit: None,
            valid: Validity::default(),
            tradeid: 0,
            trailamount: None,
            trailpercent: None,
            parent: None,
            transmit: true,
            oco: None,
        }
    }

    pub fn close_bar(side: Side, size: f64) -> Self {
        Self {
            exec_type: ExecType::Close,
            ..Self::market(side, size)
        }
    }

    pub fn limit(side: Side, size: f64, price: f64) -> Self {
        Self {
            exec_type: ExecType::Limit,
            price: Some(price),
            ..Self::market(side, size)
        }
    }

    pub fn stop(side: Side, size: f64, price: f64) -> Self {
        Self {
            exec_type: ExecType::Stop,
            price: Some(price),
            ..Self::market(side, size)
        }
    }

    pub fn stop_limit(side: Side, size: f64, price: f64, plimit: f64) -> Self {
        Self {
            exec_type: ExecType::StopLimit,
            price: Some(price),
            plimit: Some(plimit),
            ..Self::market(side, size)
        }
    }

    pub fn stop_trail(side: Side, size: f64, trailamount: Option<f64>, trailpercent: Option<f64>) -> Self {
        Self {
            exec_type: ExecType::StopTrail,
            trailamount,
            trailpercent,
            ..Self::market(side, size)
        }
    }

    pub fn valid(mut self, valid: Validity) -> Self {
        self.valid = valid;
        self
    }

    pub fn tradeid(mut self, tradeid: usize) -> Self {
        self.tradeid = tradeid;
        self
    }
}

/// An order travelling through its state machine: creation, submission,
/// acceptance, partial/complete fills or a terminal
/// cancel/expire/margin/reject.
///
/// Links to the owning strategy and feed are index-based; the broker holds
/// the authoritative order table keyed by [`OrderRef`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderRef,
    pub owner: StratId,
    pub feed: FeedId,
    pub side: Side,
    pub exec_type: ExecType,
    pub status: OrderStatus,
    pub created: OrderData,
    pub executed: OrderData,
    pub valid: Validity,
    /// End-of-session day-number resolved at creation for `Validity::Day`.
    pub dteos: f64,
    pub tradeid: usize,
    pub parent: Option<OrderRef>,
    pub transmit: bool,
    pub oco: Option<OrderRef>,
    /// Custom annotations carried to notifications.
    pub info: IndexMap<SmolStr, SmolStr>,
    /// Stop part of a StopLimit has fired; limit part remains working.
    pub triggered: bool,
    /// Bracket children stay inactive until the parent fills.
    pub active: bool,
    /// Feed length at submission; matching requires a newer bar.
    pub submitted_len: usize,
    /// Distance between stop and limit preserved by StopTrailLimit.
    limit_offset: f64,
}

impl Order {
    /// Build an order from a request.
    ///
    /// `pclose` is the feed's current close (the reference price when none
    /// was given), `dt_created` the current timestamp and `dteos` the
    /// session end used by `Validity::Day`.
    pub fn new(
        id: OrderRef,
        owner: StratId,
        feed: FeedId,
        spec: OrderSpec,
        pclose: f64,
        dt_created: f64,
        dteos: f64,
    ) -> Result<Self, ExecutionError> {
        if !(spec.size > 0.0) {
            return Err(ExecutionError::InvalidOrder(format!(
                "order size must be positive, got {}",
                spec.size
            )));
        }

        let size = spec.side.sign() * spec.size;
        let price = match (spec.price, spec.plimit) {
            (Some(p), _) => p,
            (None, Some(pl)) => pl,
            (None, None) => pclose,
        };
        let pricelimit = spec.plimit.unwrap_or(price);

        let mut created = OrderData {
            dt: dt_created,
            size,
            price,
            pricelimit,
            pclose,
            trailamount: spec.trailamount.unwrap_or(0.0),
            trailpercent: spec.trailpercent.unwrap_or(0.0),
            ..OrderData::default()
        };

        let mut limit_offset = 0.0;
        if matches!(spec.exec_type, ExecType::StopTrail | ExecType::StopTrailLimit) {
            limit_offset = created.price - created.pricelimit;
            created.price = match spec.side {
                Side::Buy => f64::INFINITY,
                Side::Sell => f64::NEG_INFINITY,
            };
            created.pricelimit = created.price;
        }

        let executed = OrderData {
            remsize: size,
            ..OrderData::default()
        };

        let mut order = Self {
            id,
            owner,
            feed,
            side: spec.side,
            exec_type: spec.exec_type,
            status: OrderStatus::Created,
            created,
            executed,
            valid: spec.valid,
            dteos,
            tradeid: spec.tradeid,
            parent: spec.parent,
            transmit: spec.transmit,
            oco: spec.oco,
            info: IndexMap::new(),
            triggered: false,
            active: spec.parent.is_none(),
            submitted_len: 0,
            limit_offset,
        };

        if matches!(order.exec_type, ExecType::StopTrail | ExecType::StopTrailLimit) {
            let reference = spec.price.unwrap_or(pclose);
            order.trail_adjust(reference);
        }

        Ok(order)
    }

    pub fn is_buy(&self) -> bool {
        self.side == Side::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == Side::Sell
    }

    /// Still executable.
    pub fn alive(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Created
                | OrderStatus::Submitted
                | OrderStatus::Accepted
                | OrderStatus::Partial
        )
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn add_info(&mut self, key: impl Into<SmolStr>, value: impl Into<SmolStr>) {
        self.info.insert(key.into(), value.into());
    }

    /// Effective expiry timestamp, if any.
    pub fn valid_until(&self) -> Option<f64> {
        match self.valid {
            Validity::GoodUntilCancelled => None,
            Validity::Day => Some(self.dteos),
            Validity::Until(dt) => Some(dt),
        }
    }

    fn transition(&mut self, to: OrderStatus) -> Result<(), ExecutionError> {
        use OrderStatus::*;
        let ok = match (self.status, to) {
            (Created, Submitted) => true,
            (Submitted, Accepted) => true,
            (Created | Submitted, Rejected) => true,
            (Created | Submitted | Accepted | Partial, Canceled) => true,
            (Submitted | Accepted | Partial, Expired) => true,
            (Accepted | Partial, Margin) => true,
            (Accepted | Partial, Partial) => true,
            (Accepted | Partial, Completed) => true,
            _ => false,
        };
        if !ok {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Mark as sent to the broker, recording the feed length so matching
    /// only engages on a later bar.
    pub fn submit(&mut self, feed_len: usize) -> Result<(), ExecutionError> {
        self.submitted_len = feed_len;
        self.transition(OrderStatus::Submitted)
    }

    pub fn accept(&mut self) -> Result<(), ExecutionError> {
        self.transition(OrderStatus::Accepted)
    }

    pub fn reject(&mut self, dt: f64) -> Result<(), ExecutionError> {
        self.transition(OrderStatus::Rejected)?;
        self.executed.dt = dt;
        Ok(())
    }

    pub fn cancel(&mut self, dt: f64) -> Result<(), ExecutionError> {
        self.transition(OrderStatus::Canceled)?;
        self.executed.dt = dt;
        Ok(())
    }

    pub fn margin(&mut self, dt: f64) -> Result<(), ExecutionError> {
        self.transition(OrderStatus::Margin)?;
        self.executed.dt = dt;
        Ok(())
    }

    /// Expire against the given bar timestamp. Market orders never expire.
    pub fn expire(&mut self, dt: f64) -> Result<bool, ExecutionError> {
        if self.exec_type == ExecType::Market {
            return Ok(false);
        }
        match self.valid_until() {
            Some(valid) if dt > valid => {
                self.transition(OrderStatus::Expired)?;
                self.executed.dt = dt;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record a fill and move to `Partial` or `Completed`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &mut self,
        dt: f64,
        size: f64,
        price: f64,
        closed: f64,
        closed_value: f64,
        closed_comm: f64,
        opened: f64,
        opened_value: f64,
        opened_comm: f64,
        margin: Option<f64>,
        pnl: f64,
        psize: f64,
        pprice: f64,
    ) -> Result<(), ExecutionError> {
        if size == 0.0 {
            return Ok(());
        }
        if (self.executed.remsize - size) * self.side.sign() < -SIZE_EPSILON {
            return Err(ExecutionError::Overfill(self.id));
        }

        self.executed.add_bit(ExecutionBit {
            dt,
            size,
            price,
            closed,
            opened,
            closed_value,
            closed_comm,
            opened_value,
            opened_comm,
            pnl,
            psize,
            pprice,
        });
        self.executed.margin = margin;

        if self.executed.remsize.abs() > SIZE_EPSILON {
            self.transition(OrderStatus::Partial)
        } else {
            self.executed.remsize = 0.0;
            self.transition(OrderStatus::Completed)
        }
    }

    /// Move the stop price by the favorable excursion, never unfavorably.
    pub fn trail_adjust(&mut self, price: f64) {
        let pamount = if self.created.trailamount != 0.0 {
            self.created.trailamount
        } else if self.created.trailpercent != 0.0 {
            price * self.created.trailpercent
        } else {
            0.0
        };

        if self.is_buy() {
            let candidate = price + pamount;
            if candidate < self.created.price {
                self.created.price = candidate;
                if self.exec_type == ExecType::StopTrailLimit {
                    self.created.pricelimit = candidate - self.limit_offset;
                }
            }
        } else {
            let candidate = price - pamount;
            if candidate > self.created.price {
                self.created.price = candidate;
                if self.exec_type == ExecType::StopTrailLimit {
                    self.created.pricelimit = candidate - self.limit_offset;
                }
            }
        }
    }

    /// Notification snapshot: clones the order with the window of fills
    /// accumulated since the previous snapshot marked as pending.
    pub fn snapshot(&mut self) -> Order {
        self.executed.mark_pending();
        self.clone()
    }
}
