//! # Vela-Execution
//! Order lifecycle and simulated matching for the Vela backtesting engine:
//!
//! * [`order`] - the order value object and its finite state machine
//!   (`Created` through `Completed`/`Canceled`/`Expired`/`Margin`/
//!   `Rejected`), with per-fill execution bits.
//! * [`position`] - signed size / average-price accounting with the
//!   opened-vs-closed split of every fill.
//! * [`trade`] - round-trip lifecycle per (feed, tradeid).
//! * [`commission`] - commission, margin, leverage and interest schemes.
//! * [`slippage`] - the configurable slippage policy.
//! * [`broker`] - the abstract broker contract live brokers also conform
//!   to.
//! * [`sim`] - the simulated broker: matching over the next bar's OHLC,
//!   brackets, OCO groups, trailing stops, cash/fund accounting and
//!   order-history replay.

pub mod broker;
pub mod commission;
pub mod error;
pub mod order;
pub mod position;
pub mod sim;
pub mod slippage;
pub mod trade;

pub use broker::{Broker, FundHistoryEntry, HistoricalFill};
pub use commission::{CommType, CommissionScheme};
pub use error::ExecutionError;
pub use order::{
    ExecType, ExecutionBit, Order, OrderRef, OrderSpec, OrderStatus, Side, StratId, Validity,
};
pub use position::{Position, PositionUpdate};
pub use sim::{FillPolicy, SimBroker, SimBrokerConfig};
pub use slippage::SlippageConfig;
pub use trade::{Trade, TradeStatus};
