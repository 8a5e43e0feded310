//! FeatureGate sync
//!
//! Sync re-reads the declaration for a key from the cache and recomputes its
//! effective feature mapping. It consumes no event payload, so a key that was
//! coalesced from many notifications is handled the same as a single one.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::resolver::FeatureResolver;
use crate::Error;

/// Processes one work item key
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Bring the state for `key` up to date
    async fn sync(&self, key: &str) -> Result<(), Error>;
}

/// Resolves the effective feature mapping of a FeatureGate
pub struct FeatureGateSync {
    resolver: Arc<FeatureResolver>,
}

impl FeatureGateSync {
    /// Create a sync handler backed by `resolver`
    pub fn new(resolver: Arc<FeatureResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl SyncHandler for FeatureGateSync {
    async fn sync(&self, key: &str) -> Result<(), Error> {
        match self.resolver.resolve(key) {
            Ok(features) => {
                let enabled = features.values().filter(|on| **on).count();
                info!(
                    feature_gate = %key,
                    enabled = enabled,
                    disabled = features.len() - enabled,
                    "resolved effective feature set"
                );
                debug!(feature_gate = %key, features = ?features, "effective features");
                Ok(())
            }
            // Deleted between enqueue and processing.
            Err(Error::NotFound { .. }) => {
                debug!(feature_gate = %key, "FeatureGate no longer exists, nothing to do");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
