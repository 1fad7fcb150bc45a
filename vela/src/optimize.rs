use crate::engine::{Engine, RunSummary};
use crate::error::VelaError;
use futures::future::try_join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Factory producing one configured engine per parameter combination.
///
/// Each worker owns an independent engine (feeds, strategies, broker);
/// preloaded data is cloned into each builder, never shared mutably.
pub type EngineBuilder = Box<dyn FnOnce() -> Result<Engine, VelaError> + Send + 'static>;

/// Run a parameter sweep: one engine per builder, fanned out over the
/// blocking pool with at most `max_cpus` concurrent runs.
///
/// Results are returned in builder order.
pub async fn run_optimization(
    builders: Vec<EngineBuilder>,
    max_cpus: Option<usize>,
) -> Result<Vec<RunSummary>, VelaError> {
    let parallelism = max_cpus.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    let semaphore = Arc::new(Semaphore::new(parallelism.max(1)));

    let workers = builders.into_iter().map(|builder| {
        let semaphore = Arc::clone(&semaphore);
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| VelaError::Join(e.to_string()))?;
            tokio::task::spawn_blocking(move || {
                let mut engine = builder()?;
                engine.run()
            })
            .await?
        }
    });

    try_join_all(workers).await
}
