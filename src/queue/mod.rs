//! Deduplicating work queue
//!
//! Work items are object keys. The queue guarantees:
//!
//! - **Dedup**: adding a key that is already pending is a no-op, so bursts of
//!   notifications for one object collapse into a single sync.
//! - **Per-key exclusion**: a key handed out by [`WorkQueue::get`] is not
//!   handed out again until [`WorkQueue::done`] is called for it. A key added
//!   while it is being processed is parked and redelivered after `done`.
//! - **Rate-limited retry**: [`WorkQueue::add_rate_limited`] re-adds a key
//!   after a per-key exponential delay that [`WorkQueue::forget`] resets.
//!
//! No ordering across distinct keys is promised.

mod rate_limiter;

pub use rate_limiter::{BackoffConfig, ExponentialFailureRateLimiter, RateLimiter};

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::metrics;

#[derive(Default)]
struct State {
    /// Keys ready to be handed out, in insertion order
    queue: VecDeque<String>,
    /// Keys that need processing (queued, or parked behind an in-flight run)
    dirty: HashSet<String>,
    /// Keys currently handed out to a worker
    processing: HashSet<String>,
    shutting_down: bool,
}

struct Inner {
    name: String,
    state: Mutex<State>,
    notify: Notify,
    rate_limiter: Box<dyn RateLimiter>,
    shutdown: CancellationToken,
}

/// Thread-safe, cloneable handle to a deduplicating work queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create a queue with the default exponential rate limiter
    pub fn new(name: impl Into<String>, backoff: BackoffConfig) -> Self {
        Self::with_rate_limiter(name, ExponentialFailureRateLimiter::new(backoff))
    }

    /// Create a queue with a custom rate limiter
    pub fn with_rate_limiter(
        name: impl Into<String>,
        rate_limiter: impl RateLimiter + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                rate_limiter: Box::new(rate_limiter),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue name, used as a metric attribute
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Mark `key` as needing processing. No-op if it is already pending or
    /// the queue is shutting down.
    pub fn add(&self, key: &str) {
        let depth = {
            let mut state = self.inner.state.lock();
            if state.shutting_down || state.dirty.contains(key) {
                return;
            }
            state.dirty.insert(key.to_string());
            if state.processing.contains(key) {
                trace!(queue = %self.inner.name, key = %key, "key in flight, deferring");
                return;
            }
            state.queue.push_back(key.to_string());
            state.queue.len()
        };
        self.record_add(depth);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key. Returns `None` once the queue is shutting down.
    ///
    /// The caller owns the key until it calls [`WorkQueue::done`].
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    self.record_depth(state.queue.len());
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Release `key` after processing; requeues it if it was re-added
    /// while in flight.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.inner.state.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) && !state.shutting_down {
                state.queue.push_back(key.to_string());
                Some(state.queue.len())
            } else {
                None
            }
        };
        if let Some(depth) = requeued {
            self.record_depth(depth);
            self.inner.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has elapsed (immediately for a zero delay).
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(&self, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }
        let queue = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.inner.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(&key),
            }
        });
    }

    /// Re-add `key` after its rate-limited backoff delay
    pub fn add_rate_limited(&self, key: &str) {
        let delay = self.inner.rate_limiter.when(key);
        trace!(
            queue = %self.inner.name,
            key = %key,
            delay_ms = delay.as_millis(),
            "rate limited requeue"
        );
        metrics::QUEUE_RETRIES.add(1, &[KeyValue::new("queue", self.inner.name.clone())]);
        self.add_after(key, delay);
    }

    /// Stop tracking retries for `key` (its next backoff starts from base)
    pub fn forget(&self, key: &str) {
        self.inner.rate_limiter.forget(key);
    }

    /// How many times `key` has been requeued since it was last forgotten
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.inner.rate_limiter.num_requeues(key)
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// True when no key is waiting to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out keys. Blocked and future `get` calls return `None`;
    /// in-flight keys may still be marked `done`.
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    /// Whether [`WorkQueue::shut_down`] has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    fn record_add(&self, depth: usize) {
        let attrs = [KeyValue::new("queue", self.inner.name.clone())];
        metrics::QUEUE_ADDS.add(1, &attrs);
        metrics::QUEUE_DEPTH.record(depth as i64, &attrs);
    }

    fn record_depth(&self, depth: usize) {
        metrics::QUEUE_DEPTH.record(
            depth as i64,
            &[KeyValue::new("queue", self.inner.name.clone())],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn queue() -> WorkQueue {
        WorkQueue::new("test", BackoffConfig::default())
    }

    #[tokio::test]
    async fn repeated_adds_coalesce() {
        let q = queue();
        q.add("a");
        q.add("a");
        q.add("a");
        assert_eq!(q.len(), 1);

        assert_eq!(q.get().await.as_deref(), Some("a"));
        assert!(q.is_empty());
        q.done("a");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn add_while_processing_is_deferred_not_dropped() {
        let q = queue();
        q.add("a");
        let key = q.get().await.expect("key");

        q.add("a");
        q.add("a");
        assert!(q.is_empty(), "in-flight key must not be handed out again");

        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn distinct_keys_are_all_delivered() {
        let q = queue();
        for key in ["a", "b", "c", "b"] {
            q.add(key);
        }
        let mut seen = Vec::new();
        while !q.is_empty() {
            let key = q.get().await.expect("key");
            q.done(&key);
            seen.push(key);
        }
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn blocked_get_wakes_on_add() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.add("a");
        assert_eq!(waiter.await.expect("join").as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiters_and_rejects_adds() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;

        q.shut_down();
        assert_eq!(waiter.await.expect("join"), None);
        assert!(q.is_shutting_down());

        q.add("a");
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn shutdown_does_not_hand_out_pending_keys() {
        let q = queue();
        q.add("a");
        q.shut_down();
        assert_eq!(q.get().await, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_workers_never_share_a_key() {
        let q = queue();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            let in_flight = in_flight.clone();
            let overlaps = overlaps.clone();
            let processed = processed.clone();
            workers.push(tokio::spawn(async move {
                while let Some(key) = q.get().await {
                    assert_eq!(key, "hot");
                    if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    processed.fetch_add(1, Ordering::SeqCst);
                    q.done(&key);
                }
            }));
        }

        for _ in 0..50 {
            q.add("hot");
            tokio::time::sleep(Duration::from_micros(500)).await;
        }
        while !q.is_empty() || in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        q.shut_down();
        for worker in workers {
            worker.await.expect("join");
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(processed.load(Ordering::SeqCst) >= 1);
        assert!(processed.load(Ordering::SeqCst) <= 50);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off_and_reset_on_forget() {
        let q = WorkQueue::new(
            "test",
            BackoffConfig {
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(1),
            },
        );

        let mut delays = Vec::new();
        for _ in 0..3 {
            let start = Instant::now();
            q.add_rate_limited("k");
            assert!(q.is_empty(), "delayed key must not be visible yet");
            let key = q.get().await.expect("key");
            delays.push(start.elapsed());
            q.done(&key);
        }
        assert!(delays[0] >= Duration::from_millis(100));
        assert!(delays[1] >= Duration::from_millis(200));
        assert!(delays[2] >= Duration::from_millis(400));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(q.num_requeues("k"), 3);

        q.forget("k");
        assert_eq!(q.num_requeues("k"), 0);
        let start = Instant::now();
        q.add_rate_limited("k");
        q.get().await.expect("key");
        let after_forget = start.elapsed();
        assert!(after_forget >= Duration::from_millis(100));
        assert!(after_forget < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_delayed_adds() {
        let q = queue();
        q.add_after("k", Duration::from_secs(10));
        q.shut_down();
        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        assert!(q.is_empty());
    }
}
