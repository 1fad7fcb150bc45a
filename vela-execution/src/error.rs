use crate::order::OrderStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
pub enum ExecutionError {
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("unknown order ref: {0}")]
    UnknownOrder(u64),

    #[error("order rejected by construction: {0}")]
    InvalidOrder(String),

    #[error("execution would drive remaining size negative on order {0}")]
    Overfill(u64),

    #[error("order {0} references feed {1} which is not registered")]
    UnknownFeed(u64, usize),
}
