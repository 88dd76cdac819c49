use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::{BuildError, Result};
use crate::types::{Asset, TransformRequest};

/// Assets produced by transforming one request, each carrying the
/// dependencies it declares.
#[derive(Debug, Default)]
pub struct TransformOutput {
    pub assets: Vec<Asset>,
}

/// The worker-pool collaborator. Transformation runs out of process for
/// isolation and parallel CPU use; concurrent invocations share no mutable
/// state. The pool handle is acquired once per host process and injected.
#[async_trait]
pub trait TransformWorker: Send + Sync {
    async fn run_transform(&self, request: &TransformRequest) -> anyhow::Result<TransformOutput>;
}

/// Wraps the worker pool with the orchestrator's dispatch policy: bounded
/// concurrency and per-asset wall-clock recording.
#[derive(Clone)]
pub struct TransformDispatcher {
    worker: Arc<dyn TransformWorker>,
    permits: Arc<Semaphore>,
}

impl TransformDispatcher {
    pub fn new(worker: Arc<dyn TransformWorker>) -> Self {
        Self::with_concurrency(worker, num_cpus::get().max(1))
    }

    pub fn with_concurrency(worker: Arc<dyn TransformWorker>, max_concurrent: usize) -> Self {
        Self {
            worker,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub async fn run(&self, request: &TransformRequest) -> Result<TransformOutput> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| BuildError::Other(anyhow::anyhow!("worker pool closed: {e}")))?;

        let start = Instant::now();
        let mut output = self
            .worker
            .run_transform(request)
            .await
            .map_err(|source| BuildError::TransformFailed {
                path: request.file_path.clone(),
                source,
            })?;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        for asset in &mut output.assets {
            asset.stats.time_ms = elapsed_ms;
        }

        debug!(
            path = %request.file_path.display(),
            assets = output.assets.len(),
            elapsed_ms,
            "transform finished"
        );
        Ok(output)
    }
}
