//! Read-through access to cached FeatureGate declarations
//!
//! Sync never talks to the API server: it reads the current declaration from
//! the informer's reflector store. The trait exists so tests can substitute
//! a mock or an in-memory store.

use std::sync::Arc;

use kube::runtime::reflector::Store;

#[cfg(test)]
use mockall::automock;

use crate::crd::{object_ref, FeatureGate};

/// Lists and looks up cached FeatureGate declarations
#[cfg_attr(test, automock)]
pub trait DeclarationLister: Send + Sync {
    /// Current declaration for a work item key, if it still exists
    fn get_declaration(&self, key: &str) -> Option<Arc<FeatureGate>>;

    /// Every cached declaration, in no particular order
    fn list_declarations(&self) -> Vec<Arc<FeatureGate>>;
}

impl DeclarationLister for Store<FeatureGate> {
    fn get_declaration(&self, key: &str) -> Option<Arc<FeatureGate>> {
        self.get(&object_ref(key))
    }

    fn list_declarations(&self) -> Vec<Arc<FeatureGate>> {
        self.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::FeatureGateSpec;
    use kube::runtime::{reflector, watcher};

    #[test]
    fn store_serves_applied_objects() {
        let (reader, mut writer) = reflector::store::<FeatureGate>();
        writer.apply_watcher_event(&watcher::Event::Apply(FeatureGate::new(
            "cluster",
            FeatureGateSpec::named("Default", None),
        )));

        let found = reader.get_declaration("cluster").expect("cached");
        assert_eq!(found.spec.feature_set.as_deref(), Some("Default"));
        assert!(reader.get_declaration("other").is_none());
        assert_eq!(reader.list_declarations().len(), 1);
    }

    #[test]
    fn store_forgets_deleted_objects() {
        let (reader, mut writer) = reflector::store::<FeatureGate>();
        let fg = FeatureGate::new("cluster", FeatureGateSpec::default());
        writer.apply_watcher_event(&watcher::Event::Apply(fg.clone()));
        writer.apply_watcher_event(&watcher::Event::Delete(fg));
        assert!(reader.get_declaration("cluster").is_none());
        assert!(reader.list_declarations().is_empty());
    }
}
