//! Metrics for the FeatureGate controller
//!
//! OpenTelemetry instruments for:
//! - Work queue traffic (adds, depth, retries)
//! - Sync outcomes (duration, errors)
//! - Delete notifications that could not be decoded
//!
//! Instruments are no-ops until a meter provider is installed by
//! [`crate::telemetry::init_telemetry`].

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for FeatureGate metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("featuregate"));

// ============================================================================
// Work Queue Metrics
// ============================================================================

/// Counter of keys accepted by the queue (coalesced adds are not counted)
///
/// Labels:
/// - `queue`: queue name
pub static QUEUE_ADDS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("featuregate_queue_adds_total")
        .with_description("Total number of keys added to the work queue")
        .with_unit("{keys}")
        .build()
});

/// Gauge of keys waiting to be handed out
///
/// Labels:
/// - `queue`: queue name
pub static QUEUE_DEPTH: Lazy<Gauge<i64>> = Lazy::new(|| {
    METER
        .i64_gauge("featuregate_queue_depth")
        .with_description("Number of keys waiting in the work queue")
        .with_unit("{keys}")
        .build()
});

/// Counter of rate-limited requeues
///
/// Labels:
/// - `queue`: queue name
pub static QUEUE_RETRIES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("featuregate_queue_retries_total")
        .with_description("Total number of rate-limited requeues")
        .with_unit("{retries}")
        .build()
});

// ============================================================================
// Sync Metrics
// ============================================================================

/// Histogram of sync duration
///
/// Labels:
/// - `result`: success, error
pub static SYNC_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("featuregate_sync_duration_seconds")
        .with_description("Duration of FeatureGate syncs in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed syncs
///
/// Labels:
/// - `error_type`: configuration, kube, ...
pub static SYNC_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("featuregate_sync_errors_total")
        .with_description("Total number of failed FeatureGate syncs")
        .with_unit("{errors}")
        .build()
});

/// Counter of delete notifications dropped because the tombstone was unusable
pub static TOMBSTONE_DECODE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("featuregate_tombstone_decode_errors_total")
        .with_description("Total number of undecodable deletion tombstones")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Times one sync and records its outcome
pub struct SyncTimer {
    start: std::time::Instant,
}

impl SyncTimer {
    /// Start timing a sync
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    /// Record successful completion
    pub fn success(self) {
        SYNC_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", "success")],
        );
    }

    /// Record a failure of the given kind
    pub fn error(self, error_type: &'static str) {
        SYNC_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", "error")],
        );
        SYNC_ERRORS.add(1, &[KeyValue::new("error_type", error_type)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_timer_records_without_provider() {
        SyncTimer::start().success();
        SyncTimer::start().error("configuration");
        TOMBSTONE_DECODE_ERRORS.add(1, &[]);
    }
}
