//! FeatureGate controller
//!
//! Wires the notification handlers, the work queue and a pool of workers
//! around the sync function:
//!
//! ```text
//! on_add/on_update/on_delete → WorkQueue → Worker × N → SyncHandler::sync(key)
//! ```
//!
//! Workers share nothing but the queue and the read-through cache. A stop
//! signal shuts the queue down; in-flight syncs finish and workers exit.

mod feature_gate;
mod handlers;
mod worker;

pub use feature_gate::{FeatureGateSync, SyncHandler};
pub use handlers::{
    DeletedFinalStateUnknown, DeletedObject, FeatureGateHandlers, ResourceEventHandler,
};
pub use worker::{retry_decision, RetryDecision, Worker};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::queue::{BackoffConfig, WorkQueue};
use crate::DEFAULT_WORKERS;

/// Name of the FeatureGate work queue
pub const QUEUE_NAME: &str = "featuregate";

/// Worker pool and retry settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Requeues allowed per key before it is dropped (0 = unlimited)
    pub max_retries: u32,
    /// Per-key retry backoff
    pub backoff: BackoffConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            max_retries: 0,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Queue plus worker pool for one sync handler
pub struct Controller {
    queue: WorkQueue,
    handler: Arc<dyn SyncHandler>,
    config: ControllerConfig,
}

impl Controller {
    /// Create a controller with its own work queue
    pub fn new(handler: Arc<dyn SyncHandler>, config: ControllerConfig) -> Self {
        let queue = WorkQueue::new(QUEUE_NAME, config.backoff.clone());
        Self {
            queue,
            handler,
            config,
        }
    }

    /// The controller's work queue
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Notification handlers feeding this controller's queue
    pub fn handlers(&self) -> FeatureGateHandlers {
        FeatureGateHandlers::new(self.queue.clone())
    }

    /// Run the workers until `shutdown` is cancelled.
    ///
    /// Returns after the queue is shut down and every worker has exited.
    pub async fn run(self, shutdown: CancellationToken) {
        let workers = self.config.workers.max(1);
        info!(workers = workers, "starting FeatureGate workers");

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    self.queue.clone(),
                    self.handler.clone(),
                    self.config.max_retries,
                );
                tokio::spawn(worker.run())
            })
            .collect();

        shutdown.cancelled().await;
        info!("shutting down FeatureGate workers");
        self.queue.shut_down();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!("FeatureGate workers stopped");
    }
}
