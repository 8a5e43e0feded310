//! Supporting types for the FeatureGate CRD

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A pair of enabled/disabled feature name lists.
///
/// Used for the legacy explicit schema, for per-resource overrides, and for
/// catalog entries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLists {
    /// Features to turn on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enabled: Vec<String>,

    /// Features to turn off
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled: Vec<String>,
}

impl FeatureLists {
    /// Build lists from anything iterable over string-likes
    pub fn new<E, D>(enabled: E, disabled: D) -> Self
    where
        E: IntoIterator,
        E::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            enabled: enabled.into_iter().map(Into::into).collect(),
            disabled: disabled.into_iter().map(Into::into).collect(),
        }
    }

    /// True when neither list names a feature
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }

    /// Names listed as both enabled and disabled, sorted and deduplicated
    pub fn conflicts(&self) -> Vec<String> {
        let enabled: BTreeSet<&str> = self.enabled.iter().map(String::as_str).collect();
        self.disabled
            .iter()
            .map(String::as_str)
            .filter(|name| enabled.contains(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Which schema variant a declaration uses.
///
/// The two variants are never merged: the resolver dispatches on the tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureSelection {
    /// Legacy schema: the lists are the whole mapping, no catalog lookup
    Explicit(FeatureLists),
    /// Catalog preset plus per-resource overrides applied on top
    Named {
        /// Name of the preset in the feature set catalog
        feature_set: String,
        /// Overrides that win over the preset for the names they mention
        overrides: FeatureLists,
    },
}
