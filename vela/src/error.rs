use thiserror::Error;
use vela_data::DataError;
use vela_execution::ExecutionError;

#[derive(Debug, Error)]
pub enum VelaError {
    /// Bad run configuration, surfaced before the loop starts.
    #[error("configuration: {0}")]
    Config(String),

    #[error("market data: {0}")]
    Data(#[from] DataError),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("writer io: {0}")]
    Io(#[from] std::io::Error),

    #[error("writer csv: {0}")]
    Csv(#[from] csv::Error),

    /// Invariant violation inside the engine; the run is aborted.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("optimization worker: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for VelaError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Join(format!("{value:?}"))
    }
}
