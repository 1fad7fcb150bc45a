use crate::order::{OrderRef, SIZE_EPSILON};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use vela_data::FeedId;

#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
pub enum TradeStatus {
    Created,
    Open,
    Closed,
}

/// One entry of a trade's per-update history, recorded when history
/// tracking is enabled.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradeHistoryEntry {
    pub status: TradeStatus,
    pub dt: f64,
    pub barlen: usize,
    pub size: f64,
    pub price: f64,
    pub commission: f64,
    pub pnl: f64,
    pub pnlcomm: f64,
}

/// Round-trip position lifecycle per (feed, tradeid): opens on the first
/// fill from flat, updates on further fills, closes when the position
/// returns to flat.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Trade {
    pub id: u64,
    pub feed: FeedId,
    pub tradeid: usize,
    pub status: TradeStatus,
    pub size: f64,
    /// Average entry price of the open portion.
    pub price: f64,
    pub value: f64,
    pub commission: f64,
    /// Realized pnl of closed portions, gross of commission.
    pub pnl: f64,
    /// Realized pnl net of cumulative commission.
    pub pnlcomm: f64,
    pub long: bool,
    pub justopened: bool,
    pub isopen: bool,
    pub dtopen: f64,
    pub dtclose: f64,
    pub baropen: usize,
    pub barclose: usize,
    pub historyon: bool,
    pub history: Vec<TradeHistoryEntry>,
}

impl Trade {
    pub fn new(id: u64, feed: FeedId, tradeid: usize, historyon: bool) -> Self {
        Self {
            id,
            feed,
            tradeid,
            status: TradeStatus::Created,
            size: 0.0,
            price: 0.0,
            value: 0.0,
            commission: 0.0,
            pnl: 0.0,
            pnlcomm: 0.0,
            long: false,
            justopened: false,
            isopen: false,
            dtopen: f64::NAN,
            dtclose: f64::NAN,
            baropen: 0,
            barclose: 0,
            historyon,
            history: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Bars the trade has been open, using the closing bar when done.
    pub fn barlen(&self, current_bar: usize) -> usize {
        let end = if self.is_closed() {
            self.barclose
        } else {
            current_bar
        };
        end.saturating_sub(self.baropen)
    }

    /// Fold one fill into the trade.
    ///
    /// `pnl` is the realized profit of the closed portion of this fill as
    /// computed by the commission scheme; `price` is the position average
    /// price after the fill.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        _order: OrderRef,
        size: f64,
        price: f64,
        value: f64,
        commission: f64,
        pnl: f64,
        dt: f64,
        barlen: usize,
    ) {
        if size == 0.0 {
            return;
        }

        let was_flat = self.size.abs() <= SIZE_EPSILON;
        self.size += size;
        self.commission += commission;
        self.pnl += pnl;
        self.pnlcomm = self.pnl - self.commission;
        self.price = price;
        self.value = value;

        self.justopened = was_flat;
        if self.justopened {
            self.long = size > 0.0;
            self.dtopen = dt;
            self.baropen = barlen;
            self.status = TradeStatus::Open;
            self.isopen = true;
        }

        if self.size.abs() <= SIZE_EPSILON && !was_flat {
            self.size = 0.0;
            self.status = TradeStatus::Closed;
            self.isopen = false;
            self.dtclose = dt;
            self.barclose = barlen;
        }

        if self.historyon {
            self.history.push(TradeHistoryEntry {
                status: self.status,
                dt,
                barlen,
                size: self.size,
                price: self.price,
                commission: self.commission,
                pnl: self.pnl,
                pnlcomm: self.pnlcomm,
            });
        }
    }
}
