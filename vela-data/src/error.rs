use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("unknown line alias: {0}")]
    UnknownAlias(String),

    #[error("indicator input references a node that does not exist yet")]
    DanglingInput,

    #[error("the first input of a node must tick (constants have no clock)")]
    ConstantClock,

    #[error("indicator declared {expected} inputs, received {received}")]
    InputArity { expected: usize, received: usize },

    #[error("feed {0} is not registered")]
    UnknownFeed(usize),

    #[error("resampling towards a finer timeframe: {from} -> {to}")]
    ResampleDirection { from: String, to: String },

    #[error("feed {0} was not started")]
    NotStarted(usize),
}
