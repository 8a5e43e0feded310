//! FeatureGate - reconciliation controller for cluster feature flags
//!
//! Keeps an effective feature mapping (feature name → enabled) in sync with
//! the cluster-level `FeatureGate` declarations. A declaration either lists
//! features explicitly or names a preset from the feature set catalog, with
//! optional per-resource overrides layered on top.
//!
//! # Architecture
//!
//! Watch events flow through a deduplicating work queue into a pool of
//! workers:
//!
//! ```text
//! watcher → handlers (add/update/delete) → WorkQueue → workers → sync(key) → resolver
//! ```
//!
//! - The queue coalesces repeated notifications for the same key and never
//!   hands one key to two workers at once.
//! - Sync re-reads the current declaration from the reflector store, so no
//!   event payload is consumed and ordering across keys does not matter.
//! - Failed syncs are requeued with per-key exponential backoff.
//!
//! # Modules
//!
//! - [`crd`] - the `FeatureGate` custom resource and its selection types
//! - [`catalog`] - immutable feature set presets
//! - [`resolver`] - feature set resolution (pure) and the `resolve(name)` query
//! - [`lister`] - read-through access to cached declarations
//! - [`queue`] - deduplicating, rate-limited work queue
//! - [`controller`] - event handlers, worker loop and the sync function
//! - [`informer`] - watch stream adapter with tombstones and periodic resync
//! - [`metrics`] - OpenTelemetry instruments
//! - [`telemetry`] - tracing subscriber and OTLP setup
//! - [`error`] - error types

#![deny(missing_docs)]

pub mod catalog;
pub mod controller;
pub mod crd;
pub mod error;
pub mod informer;
pub mod lister;
pub mod metrics;
pub mod queue;
pub mod resolver;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default number of concurrent sync workers
pub const DEFAULT_WORKERS: usize = 2;

/// Default retry delay after a key's first failure (milliseconds)
pub const DEFAULT_BASE_DELAY_MS: u64 = 5;

/// Default upper bound on a key's retry delay (seconds)
pub const DEFAULT_MAX_DELAY_SECS: u64 = 1000;

/// Base period between informer resyncs; the effective period is jittered
/// into `[base, 2 * base)`.
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 20 * 60;

/// Watcher timeout (seconds) - must be less than the client read timeout
pub const WATCH_TIMEOUT_SECS: u32 = 25;
