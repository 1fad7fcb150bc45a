use vela_execution::{CommissionScheme, Position};

/// Inputs handed to a sizer when an order is issued without an explicit
/// size.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingInfo {
    pub cash: f64,
    /// Reference price (the feed's current close).
    pub price: f64,
    pub position: Position,
    pub is_buy: bool,
    pub scheme: CommissionScheme,
}

/// Policy converting a trade signal into an order size.
pub trait Sizer: Send {
    /// Units to trade; `0.0` suppresses the order.
    fn size(&mut self, info: &SizingInfo) -> f64;
}

/// Fixed stake per order.
#[derive(Debug, Clone)]
pub struct FixedSize {
    pub stake: f64,
}

impl FixedSize {
    pub fn new(stake: f64) -> Self {
        Self { stake }
    }
}

impl Default for FixedSize {
    fn default() -> Self {
        Self { stake: 1.0 }
    }
}

impl Sizer for FixedSize {
    fn size(&mut self, _info: &SizingInfo) -> f64 {
        self.stake
    }
}

/// Sizes orders to a percentage of available cash.
#[derive(Debug, Clone)]
pub struct PercentSizer {
    pub percent: f64,
}

impl PercentSizer {
    pub fn new(percent: f64) -> Self {
        Self { percent }
    }
}

impl Sizer for PercentSizer {
    fn size(&mut self, info: &SizingInfo) -> f64 {
        if info.price <= 0.0 {
            return 0.0;
        }
        info.scheme
            .get_size(info.price, info.cash * self.percent / 100.0)
    }
}

/// Commits all available cash (after leverage).
#[derive(Debug, Clone, Default)]
pub struct AllInSizer;

impl Sizer for AllInSizer {
    fn size(&mut self, info: &SizingInfo) -> f64 {
        info.scheme.get_size(info.price, info.cash)
    }
}
