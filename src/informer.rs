//! FeatureGate informer
//!
//! Drives a kube-rs watcher, keeps the reflector store that sync reads
//! through, and turns raw watch events into handler callbacks:
//!
//! - `Apply` → `on_update(old, new)` when the object was cached, else `on_add`
//! - `Delete` → `on_delete(Live)`
//! - a relist (`Init` … `InitDone`) that no longer contains a cached object →
//!   `on_delete(Tombstone)` with the last-known state, since the actual
//!   delete event was missed
//!
//! Every resync period each cached object is redelivered as
//! `on_update(obj, obj)`.

use std::collections::HashSet;
use std::time::Duration;

use futures::StreamExt;
use kube::runtime::reflector::store::Writer;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;
use rand::Rng;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{DeletedFinalStateUnknown, DeletedObject, ResourceEventHandler};
use crate::crd::FeatureGate;
use crate::{DEFAULT_RESYNC_PERIOD_SECS, WATCH_TIMEOUT_SECS};

/// Watch and resync settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InformerConfig {
    /// Base resync period; `None` disables resync
    pub resync_period: Option<Duration>,
    /// Server-side watch timeout in seconds
    pub watch_timeout_secs: u32,
    /// Optional label selector restricting the watch
    pub label_selector: Option<String>,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_period: Some(Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS)),
            watch_timeout_secs: WATCH_TIMEOUT_SECS,
            label_selector: None,
        }
    }
}

/// Spread resyncs of different processes: `base * U[1, 2)`
pub fn jittered_resync_period(base: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
    base.mul_f64(factor)
}

/// Cache plus event fan-out for FeatureGate objects
pub struct Informer<H> {
    writer: Writer<FeatureGate>,
    reader: Store<FeatureGate>,
    handler: H,
    config: InformerConfig,
    /// Keys seen since the current relist began
    relisted: Option<HashSet<String>>,
}

impl<H: ResourceEventHandler> Informer<H> {
    /// Create an informer that maintains `writer`'s store and delivers to
    /// `handler`. Readers obtained from the writer beforehand observe the
    /// same cache.
    pub fn new(writer: Writer<FeatureGate>, handler: H, config: InformerConfig) -> Self {
        let reader = writer.as_reader();
        Self {
            writer,
            reader,
            handler,
            config,
            relisted: None,
        }
    }

    /// Read handle on the cache; ready once the initial list completed
    pub fn store(&self) -> Store<FeatureGate> {
        self.reader.clone()
    }

    /// Apply one watch event to the cache and notify the handler
    pub fn dispatch(&mut self, event: Event<FeatureGate>) {
        match &event {
            Event::Apply(obj) => {
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.writer.apply_watcher_event(&event);
                self.notify_applied(old.as_deref(), obj);
            }
            Event::Delete(obj) => {
                self.writer.apply_watcher_event(&event);
                self.handler.on_delete(DeletedObject::Live(obj.clone()));
            }
            Event::Init => {
                debug!("FeatureGate relist started");
                self.relisted = Some(HashSet::new());
                self.writer.apply_watcher_event(&event);
            }
            Event::InitApply(obj) => {
                // The store keeps serving the previous state until InitDone.
                let old = self.reader.get(&ObjectRef::from_obj(obj));
                self.relisted.get_or_insert_with(HashSet::new).insert(obj.key());
                self.writer.apply_watcher_event(&event);
                self.notify_applied(old.as_deref(), obj);
            }
            Event::InitDone => {
                let before = self.reader.state();
                self.writer.apply_watcher_event(&event);
                let relisted = self.relisted.take().unwrap_or_default();
                for obj in before {
                    let key = obj.key();
                    if !relisted.contains(&key) {
                        self.deliver_tombstone(&key, &obj);
                    }
                }
                debug!(objects = relisted.len(), "FeatureGate relist complete");
            }
        }
    }

    /// Redeliver every cached object as an unchanged update
    pub fn resync(&self) {
        let objects = self.reader.state();
        debug!(objects = objects.len(), "resyncing FeatureGates");
        for obj in objects {
            self.handler.on_update(&obj, &obj);
        }
    }

    /// Watch FeatureGates until `shutdown` is cancelled
    pub async fn run(mut self, api: Api<FeatureGate>, shutdown: CancellationToken) {
        let mut config = watcher::Config::default().timeout(self.config.watch_timeout_secs);
        if let Some(selector) = &self.config.label_selector {
            config = config.labels(selector);
        }
        let mut stream = watcher(api, config).default_backoff().boxed();
        let mut resync = self.config.resync_period.map(resync_interval);

        info!("starting FeatureGate informer");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = next_resync(&mut resync) => self.resync(),
                event = stream.next() => match event {
                    Some(Ok(event)) => self.dispatch(event),
                    Some(Err(e)) => warn!(error = %e, "FeatureGate watch failed, retrying"),
                    None => {
                        warn!("FeatureGate watch stream ended");
                        break;
                    }
                },
            }
        }
        info!("FeatureGate informer stopped");
    }

    fn notify_applied(&self, old: Option<&FeatureGate>, new: &FeatureGate) {
        match old {
            Some(old) => self.handler.on_update(old, new),
            None => self.handler.on_add(new),
        }
    }

    fn deliver_tombstone(&self, key: &str, last_known: &FeatureGate) {
        match DeletedFinalStateUnknown::from_last_known(key, last_known) {
            Ok(tombstone) => self.handler.on_delete(DeletedObject::Tombstone(tombstone)),
            Err(e) => warn!(key = %key, error = %e, "couldn't build tombstone"),
        }
    }
}

fn resync_interval(base: Duration) -> Interval {
    let period = jittered_resync_period(base);
    debug!(period_secs = period.as_secs(), "FeatureGate resync period");
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_resync(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
