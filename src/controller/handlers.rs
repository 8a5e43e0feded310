//! Watch notification handlers
//!
//! Translates add/update/delete notifications for FeatureGate objects into
//! work queue keys. Handlers are typed over [`FeatureGate`]; the only place
//! an untyped object appears is the tombstone delivered on deletion, which
//! must be decoded before use.

use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use tracing::{debug, error};

use crate::crd::FeatureGate;
use crate::metrics;
use crate::queue::WorkQueue;
use crate::Error;

/// Last-known state of an object whose deletion was not observed directly
/// (it left the cache during a relist). The state may be stale and is not
/// guaranteed to be a FeatureGate.
#[derive(Clone, Debug)]
pub struct DeletedFinalStateUnknown {
    /// Key the object was cached under
    pub key: String,
    /// Last-known object, untyped
    pub obj: DynamicObject,
}

impl DeletedFinalStateUnknown {
    /// Wrap a cached FeatureGate as a tombstone
    pub fn from_last_known(key: impl Into<String>, obj: &FeatureGate) -> Result<Self, Error> {
        let value = serde_json::to_value(obj).map_err(|e| Error::serialization(e.to_string()))?;
        let obj = serde_json::from_value(value).map_err(|e| Error::serialization(e.to_string()))?;
        Ok(Self {
            key: key.into(),
            obj,
        })
    }
}

/// Payload of a delete notification
#[derive(Clone, Debug)]
pub enum DeletedObject {
    /// The deleted object itself
    Live(FeatureGate),
    /// A tombstone carrying the last-known state
    Tombstone(DeletedFinalStateUnknown),
}

impl DeletedObject {
    /// Recover the deleted FeatureGate, unwrapping a tombstone if needed
    pub fn into_feature_gate(self) -> Result<FeatureGate, Error> {
        match self {
            Self::Live(obj) => Ok(obj),
            Self::Tombstone(tombstone) => decode_tombstone(tombstone),
        }
    }
}

fn decode_tombstone(tombstone: DeletedFinalStateUnknown) -> Result<FeatureGate, Error> {
    let expected_kind = FeatureGate::kind(&());
    let expected_api_version = FeatureGate::api_version(&());
    match &tombstone.obj.types {
        Some(types) if types.kind == expected_kind && types.api_version == expected_api_version => {}
        Some(types) => {
            return Err(Error::tombstone_decode(format!(
                "tombstone {} contained object that is not a FeatureGate: {}/{}",
                tombstone.key, types.api_version, types.kind
            )))
        }
        None => {
            return Err(Error::tombstone_decode(format!(
                "tombstone {} contained object without type information",
                tombstone.key
            )))
        }
    }
    tombstone.obj.try_parse::<FeatureGate>().map_err(|e| {
        Error::tombstone_decode(format!(
            "tombstone {} contained malformed FeatureGate: {e}",
            tombstone.key
        ))
    })
}

/// Receives notifications from a change source
pub trait ResourceEventHandler: Send + Sync {
    /// An object appeared
    fn on_add(&self, obj: &FeatureGate);

    /// An object changed (or was redelivered by a resync)
    fn on_update(&self, old: &FeatureGate, new: &FeatureGate);

    /// An object went away
    fn on_delete(&self, obj: DeletedObject);
}

/// Enqueues FeatureGate keys for the sync workers
#[derive(Clone)]
pub struct FeatureGateHandlers {
    queue: WorkQueue,
}

impl FeatureGateHandlers {
    /// Create handlers feeding `queue`
    pub fn new(queue: WorkQueue) -> Self {
        Self { queue }
    }

    fn enqueue(&self, obj: &FeatureGate) {
        if obj.meta().name.as_deref().unwrap_or_default().is_empty() {
            error!(object = ?obj.metadata, "couldn't get key for FeatureGate without a name");
            return;
        }
        self.queue.add(&obj.key());
    }
}

impl ResourceEventHandler for FeatureGateHandlers {
    fn on_add(&self, obj: &FeatureGate) {
        debug!(feature_gate = %obj.name_any(), "adding FeatureGate");
        self.enqueue(obj);
    }

    fn on_update(&self, old: &FeatureGate, new: &FeatureGate) {
        // Metadata-only changes and resyncs carry an identical spec.
        if old.spec != new.spec {
            debug!(feature_gate = %new.name_any(), "updating FeatureGate");
            self.enqueue(new);
        }
    }

    fn on_delete(&self, obj: DeletedObject) {
        // Sync reads through to live state; there is no derived object to
        // clean up, so deletion is only observed.
        match obj.into_feature_gate() {
            Ok(deleted) => {
                debug!(feature_gate = %deleted.name_any(), "deleted FeatureGate");
            }
            Err(e) => {
                metrics::TOMBSTONE_DECODE_ERRORS.add(1, &[]);
                error!(error = %e, "dropping delete notification");
            }
        }
    }
}
