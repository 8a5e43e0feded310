//! Feature set catalog
//!
//! Maps a preset name to the features it enables and disables. The catalog is
//! built once at startup (the built-in table or a YAML file) and shared
//! read-only through an `Arc`; the resolver receives it explicitly instead of
//! reading a global.
//!
//! File format:
//!
//! ```yaml
//! featureSets:
//!   Default:
//!     enabled: [RotateKubeletServerCertificate]
//!     disabled: [PersistentLocalVolumes]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crd::FeatureLists;
use crate::{Error, Result};

/// Name of the preset used by default-configured clusters
pub const DEFAULT_FEATURE_SET: &str = "Default";

/// Preset enabling tech preview features; clusters using it cannot upgrade
pub const TECH_PREVIEW_FEATURE_SET: &str = "TechPreviewNoUpgrade";

/// Empty preset driven entirely by per-resource overrides
pub const CUSTOM_FEATURE_SET: &str = "CustomNoUpgrade";

/// Immutable mapping from preset name to its feature lists
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSetCatalog {
    #[serde(default)]
    feature_sets: BTreeMap<String, FeatureLists>,
}

impl FeatureSetCatalog {
    /// Build a catalog from `(name, lists)` pairs, validating every entry
    pub fn new<I, S>(sets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, FeatureLists)>,
        S: Into<String>,
    {
        let catalog = Self {
            feature_sets: sets.into_iter().map(|(n, s)| (n.into(), s)).collect(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The presets compiled into the binary
    pub fn builtin() -> Self {
        let default_enabled = [
            "ExperimentalCriticalPodAnnotation",
            "RotateKubeletServerCertificate",
            "SupportPodPidsLimit",
        ];
        let sets = BTreeMap::from([
            (
                DEFAULT_FEATURE_SET.to_string(),
                FeatureLists::new(
                    default_enabled,
                    ["LocalStorageCapacityIsolation", "PersistentLocalVolumes"],
                ),
            ),
            (
                TECH_PREVIEW_FEATURE_SET.to_string(),
                FeatureLists::new(
                    default_enabled.into_iter().chain(["CSIBlockVolume"]),
                    ["LocalStorageCapacityIsolation"],
                ),
            ),
            (CUSTOM_FEATURE_SET.to_string(), FeatureLists::default()),
        ]);
        Self {
            feature_sets: sets,
        }
    }

    /// Parse and validate a catalog document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let catalog: Self = serde_yaml::from_str(yaml)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Read a catalog document from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::serialization(format!("failed to read catalog {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Look up a preset by name
    pub fn get(&self, name: &str) -> Option<&FeatureLists> {
        self.feature_sets.get(name)
    }

    /// All presets in name order
    pub fn list(&self) -> impl Iterator<Item = (&str, &FeatureLists)> {
        self.feature_sets.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Number of presets
    pub fn len(&self) -> usize {
        self.feature_sets.len()
    }

    /// True when the catalog has no presets
    pub fn is_empty(&self) -> bool {
        self.feature_sets.is_empty()
    }

    /// A preset may not both enable and disable the same feature
    fn validate(&self) -> Result<()> {
        for (name, set) in &self.feature_sets {
            let conflicts = set.conflicts();
            if !conflicts.is_empty() {
                return Err(Error::configuration(
                    name.as_str(),
                    format!(
                        "feature set lists {} as both enabled and disabled",
                        conflicts.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_the_standard_presets() {
        let catalog = FeatureSetCatalog::builtin();
        let names: Vec<&str> = catalog.list().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec![CUSTOM_FEATURE_SET, DEFAULT_FEATURE_SET, TECH_PREVIEW_FEATURE_SET]
        );
        assert!(catalog.validate().is_ok());
        assert!(catalog.get(CUSTOM_FEATURE_SET).expect("custom").is_empty());
    }

    #[test]
    fn tech_preview_extends_default() {
        let catalog = FeatureSetCatalog::builtin();
        let default = catalog.get(DEFAULT_FEATURE_SET).expect("default");
        let preview = catalog.get(TECH_PREVIEW_FEATURE_SET).expect("preview");
        for name in &default.enabled {
            assert!(preview.enabled.contains(name), "{name} missing from preview");
        }
        assert!(preview.enabled.iter().any(|n| n == "CSIBlockVolume"));
    }

    #[test]
    fn loads_yaml_document() {
        let catalog = FeatureSetCatalog::from_yaml(
            r#"
featureSets:
  Default:
    enabled: [x, y]
    disabled: [z]
  Empty: {}
"#,
        )
        .expect("catalog");
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.get("Default"),
            Some(&FeatureLists::new(["x", "y"], ["z"]))
        );
        assert_eq!(catalog.get("Empty"), Some(&FeatureLists::default()));
        assert!(catalog.get("bogus").is_none());
    }

    #[test]
    fn rejects_self_conflicting_preset() {
        let err = FeatureSetCatalog::from_yaml(
            r#"
featureSets:
  Broken:
    enabled: [a]
    disabled: [a]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Broken"));
        assert!(err.to_string().contains("both enabled and disabled"));
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = FeatureSetCatalog::from_yaml("featureSets: [not, a, map]").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[test]
    fn new_validates_entries() {
        assert!(FeatureSetCatalog::new([("Ok", FeatureLists::new(["a"], ["b"]))]).is_ok());
        assert!(FeatureSetCatalog::new([("Bad", FeatureLists::new(["a"], ["a"]))]).is_err());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = FeatureSetCatalog::from_file("/nonexistent/catalog.yaml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/catalog.yaml"));
    }
}
