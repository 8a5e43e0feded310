//! FeatureGate CRD: the cluster-level feature flag declaration
//!
//! Two schema variants exist. The legacy one lists features directly:
//!
//! ```yaml
//! apiVersion: featuregate.dev/v1
//! kind: FeatureGate
//! metadata:
//!   name: cluster
//! spec:
//!   enabled: [RotateKubeletServerCertificate]
//!   disabled: [PersistentLocalVolumes]
//! ```
//!
//! The current one names a catalog preset and optionally overrides it:
//!
//! ```yaml
//! apiVersion: featuregate.dev/v1
//! kind: FeatureGate
//! metadata:
//!   name: cluster
//! spec:
//!   featureSet: TechPreviewNoUpgrade
//!   overrides:
//!     disabled: [CSIBlockVolume]
//! ```

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::reflector::ObjectRef;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FeatureLists, FeatureSelection};
use crate::Error;

/// Desired feature flags for the cluster
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "featuregate.dev",
    version = "v1",
    kind = "FeatureGate",
    plural = "featuregates",
    printcolumn = r#"{"name":"FeatureSet","type":"string","jsonPath":".spec.featureSet"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGateSpec {
    /// Catalog preset to start from. Mutually exclusive with the top-level
    /// `enabled`/`disabled` lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_set: Option<String>,

    /// Legacy: features to enable (only without `featureSet`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,

    /// Legacy: features to disable (only without `featureSet`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,

    /// Per-resource overrides applied on top of `featureSet`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<FeatureLists>,
}

impl FeatureGateSpec {
    /// Spec using the legacy explicit lists
    pub fn explicit(lists: FeatureLists) -> Self {
        Self {
            enabled: lists.enabled,
            disabled: lists.disabled,
            ..Default::default()
        }
    }

    /// Spec referencing a catalog preset
    pub fn named(feature_set: impl Into<String>, overrides: Option<FeatureLists>) -> Self {
        Self {
            feature_set: Some(feature_set.into()),
            overrides,
            ..Default::default()
        }
    }

    /// Classify the spec into its schema variant.
    ///
    /// `name` is only used to label configuration errors.
    pub fn selection(&self, name: &str) -> Result<FeatureSelection, Error> {
        let has_lists = !self.enabled.is_empty() || !self.disabled.is_empty();
        match &self.feature_set {
            Some(_) if has_lists => Err(Error::configuration(
                name,
                "spec.enabled/spec.disabled cannot be combined with spec.featureSet; use spec.overrides",
            )),
            Some(feature_set) => Ok(FeatureSelection::Named {
                feature_set: feature_set.clone(),
                overrides: self.overrides.clone().unwrap_or_default(),
            }),
            None if self.overrides.is_some() => Err(Error::configuration(
                name,
                "spec.overrides requires spec.featureSet",
            )),
            None => Ok(FeatureSelection::Explicit(FeatureLists {
                enabled: self.enabled.clone(),
                disabled: self.disabled.clone(),
            })),
        }
    }
}

impl FeatureGate {
    /// Classify this declaration's spec into its schema variant
    pub fn selection(&self) -> Result<FeatureSelection, Error> {
        self.spec.selection(&self.name_any())
    }

    /// Work item key for this declaration
    pub fn key(&self) -> String {
        object_key(&self.metadata)
    }
}

/// Key identifying an object: `namespace/name`, or `name` when cluster-scoped
pub fn object_key(meta: &ObjectMeta) -> String {
    let name = meta.name.as_deref().unwrap_or_default();
    match meta.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Split a key back into `(namespace, name)`
pub fn split_key(key: &str) -> (Option<&str>, &str) {
    match key.split_once('/') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, key),
    }
}

/// Reflector reference for a key
pub fn object_ref(key: &str) -> ObjectRef<FeatureGate> {
    match split_key(key) {
        (Some(ns), name) => ObjectRef::new(name).within(ns),
        (None, name) => ObjectRef::new(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn parse(yaml: &str) -> FeatureGate {
        serde_yaml::from_str(yaml).expect("parse FeatureGate")
    }

    #[test]
    fn legacy_yaml_is_explicit() {
        let fg = parse(
            r#"
apiVersion: featuregate.dev/v1
kind: FeatureGate
metadata:
  name: cluster
spec:
  enabled: [a, b]
  disabled: [c]
"#,
        );
        assert_eq!(
            fg.selection().expect("selection"),
            FeatureSelection::Explicit(FeatureLists::new(["a", "b"], ["c"]))
        );
    }

    #[test]
    fn feature_set_yaml_is_named() {
        let fg = parse(
            r#"
apiVersion: featuregate.dev/v1
kind: FeatureGate
metadata:
  name: cluster
spec:
  featureSet: Default
  overrides:
    disabled: [x]
"#,
        );
        assert_eq!(
            fg.selection().expect("selection"),
            FeatureSelection::Named {
                feature_set: "Default".to_string(),
                overrides: FeatureLists::new(Vec::<String>::new(), ["x"]),
            }
        );
    }

    #[test]
    fn empty_spec_is_empty_explicit() {
        let fg = FeatureGate::new("cluster", FeatureGateSpec::default());
        assert_eq!(
            fg.selection().expect("selection"),
            FeatureSelection::Explicit(FeatureLists::default())
        );
    }

    #[test]
    fn mixing_variants_is_rejected() {
        let mut spec = FeatureGateSpec::named("Default", None);
        spec.enabled.push("a".to_string());
        let err = spec.selection("cluster").unwrap_err();
        assert!(matches!(err, Error::Configuration { ref declaration, .. } if declaration == "cluster"));
    }

    #[test]
    fn overrides_without_feature_set_are_rejected() {
        let spec = FeatureGateSpec {
            overrides: Some(FeatureLists::new(["a"], Vec::<String>::new())),
            ..Default::default()
        };
        assert!(matches!(
            spec.selection("cluster"),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn keys_for_cluster_scoped_and_namespaced_objects() {
        let mut fg = FeatureGate::new("cluster", FeatureGateSpec::default());
        assert_eq!(fg.key(), "cluster");
        assert_eq!(split_key("cluster"), (None, "cluster"));

        fg.metadata.namespace = Some("ops".to_string());
        assert_eq!(fg.key(), "ops/cluster");
        assert_eq!(split_key("ops/cluster"), (Some("ops"), "cluster"));
        assert_eq!(object_ref("ops/cluster").namespace.as_deref(), Some("ops"));
    }

    #[test]
    fn crd_is_cluster_scoped() {
        let crd = FeatureGate::crd();
        assert_eq!(crd.spec.scope, "Cluster");
        assert_eq!(crd.spec.group, "featuregate.dev");
        assert_eq!(crd.spec.names.kind, "FeatureGate");
    }
}
