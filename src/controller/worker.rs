//! Worker loop and retry policy
//!
//! Each worker drains the queue until shutdown. Every dequeued key is marked
//! `done` exactly once, whatever the sync outcome, so a failing key never
//! blocks the others.

use std::sync::Arc;

use tracing::{debug, error, warn};

use super::feature_gate::SyncHandler;
use crate::metrics::SyncTimer;
use crate::queue::WorkQueue;
use crate::Error;

/// What to do with a key after its sync finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Success: clear the key's backoff history
    Forget,
    /// Retryable failure: re-add after backoff
    Requeue,
    /// Permanent failure or retries exhausted: forget and drop
    Drop,
}

/// Classify a sync outcome.
///
/// `requeues` is how often the key has already been requeued; `max_retries`
/// of zero means retry forever.
pub fn retry_decision(
    result: &Result<(), Error>,
    requeues: u32,
    max_retries: u32,
) -> RetryDecision {
    match result {
        Ok(()) => RetryDecision::Forget,
        Err(e) if !e.is_retryable() => RetryDecision::Drop,
        Err(_) if max_retries > 0 && requeues >= max_retries => RetryDecision::Drop,
        Err(_) => RetryDecision::Requeue,
    }
}

/// One consumer of the work queue
pub struct Worker {
    id: usize,
    queue: WorkQueue,
    handler: Arc<dyn SyncHandler>,
    max_retries: u32,
}

impl Worker {
    /// Create a worker
    pub fn new(
        id: usize,
        queue: WorkQueue,
        handler: Arc<dyn SyncHandler>,
        max_retries: u32,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            max_retries,
        }
    }

    /// Process keys until the queue shuts down
    pub async fn run(self) {
        debug!(worker = self.id, "worker started");
        while self.process_next_work_item().await {}
        debug!(worker = self.id, "worker stopped");
    }

    /// Process one key. Returns `false` once the queue is shutting down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let timer = SyncTimer::start();
        let result = self.handler.sync(&key).await;
        match &result {
            Ok(()) => timer.success(),
            Err(e) => timer.error(e.kind()),
        }
        self.handle_result(&key, result);
        self.queue.done(&key);
        true
    }

    fn handle_result(&self, key: &str, result: Result<(), Error>) {
        let requeues = self.queue.num_requeues(key);
        match retry_decision(&result, requeues, self.max_retries) {
            RetryDecision::Forget => self.queue.forget(key),
            RetryDecision::Requeue => {
                if let Err(e) = &result {
                    warn!(
                        worker = self.id,
                        key = %key,
                        error = %e,
                        requeues = requeues,
                        "error syncing FeatureGate, requeueing"
                    );
                }
                self.queue.add_rate_limited(key);
            }
            RetryDecision::Drop => {
                if let Err(e) = &result {
                    error!(
                        worker = self.id,
                        key = %key,
                        error = %e,
                        requeues = requeues,
                        "dropping FeatureGate out of the queue"
                    );
                }
                self.queue.forget(key);
            }
        }
    }
}
