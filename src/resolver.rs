//! Feature set resolution
//!
//! Turns a declaration into its effective feature mapping. Resolution is a
//! pure function of the declaration and the catalog: no prior state is
//! consulted, so resolving the same inputs twice yields the same mapping.
//!
//! Precedence, lowest to highest:
//! 1. catalog preset `enabled` (→ true), then preset `disabled` (→ false)
//! 2. per-resource override `enabled` (→ true)
//! 3. per-resource override `disabled` (→ false)
//!
//! A name listed as both enabled and disabled in the same list pair resolves
//! to disabled; the overlap is logged as a configuration warning.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::catalog::FeatureSetCatalog;
use crate::crd::{FeatureGate, FeatureGateSpec, FeatureLists, FeatureSelection};
use crate::lister::DeclarationLister;
use crate::Error;

/// Effective mapping of feature name → enabled
pub type FeatureMap = BTreeMap<String, bool>;

/// Resolve an already-classified selection against the catalog.
///
/// `declaration` labels errors and warnings.
pub fn resolve_selection(
    declaration: &str,
    selection: &FeatureSelection,
    catalog: &FeatureSetCatalog,
) -> Result<FeatureMap, Error> {
    let mut features = FeatureMap::new();
    match selection {
        FeatureSelection::Explicit(lists) => {
            apply_lists(declaration, &mut features, lists);
        }
        FeatureSelection::Named {
            feature_set,
            overrides,
        } => {
            let preset = catalog.get(feature_set).ok_or_else(|| {
                Error::configuration(
                    declaration,
                    format!("no corresponding feature set {feature_set:?}"),
                )
            })?;
            apply_lists(declaration, &mut features, preset);
            apply_lists(declaration, &mut features, overrides);
        }
    }
    Ok(features)
}

/// Classify and resolve a spec in one step
pub fn resolve_spec(
    declaration: &str,
    spec: &FeatureGateSpec,
    catalog: &FeatureSetCatalog,
) -> Result<FeatureMap, Error> {
    let selection = spec.selection(declaration)?;
    resolve_selection(declaration, &selection, catalog)
}

/// Layer one list pair onto the mapping; disabled is applied last so it wins
fn apply_lists(declaration: &str, features: &mut FeatureMap, lists: &FeatureLists) {
    let conflicts = lists.conflicts();
    if !conflicts.is_empty() {
        warn!(
            feature_gate = %declaration,
            features = ?conflicts,
            "features listed as both enabled and disabled; disabling them"
        );
    }
    for name in &lists.enabled {
        features.insert(name.clone(), true);
    }
    for name in &lists.disabled {
        features.insert(name.clone(), false);
    }
}

/// Answers `resolve(name)` queries from the cached declarations
pub struct FeatureResolver {
    catalog: Arc<FeatureSetCatalog>,
    lister: Arc<dyn DeclarationLister>,
}

impl FeatureResolver {
    /// Create a resolver over a catalog and a declaration cache
    pub fn new(catalog: Arc<FeatureSetCatalog>, lister: Arc<dyn DeclarationLister>) -> Self {
        Self { catalog, lister }
    }

    /// The catalog this resolver was built with
    pub fn catalog(&self) -> &FeatureSetCatalog {
        &self.catalog
    }

    /// Effective mapping for the declaration stored under `key`.
    ///
    /// Returns [`Error::NotFound`] when no such declaration is cached.
    pub fn resolve(&self, key: &str) -> Result<FeatureMap, Error> {
        let declaration = self
            .lister
            .get_declaration(key)
            .ok_or_else(|| Error::not_found(key))?;
        self.resolve_declaration(&declaration)
    }

    /// Effective mapping for a declaration object
    pub fn resolve_declaration(&self, declaration: &FeatureGate) -> Result<FeatureMap, Error> {
        resolve_spec(&declaration.name_any(), &declaration.spec, &self.catalog)
    }

    /// Cluster-wide mapping: every declaration resolved in key order and
    /// merged, later keys overriding earlier ones.
    pub fn resolve_all(&self) -> Result<FeatureMap, Error> {
        let mut declarations = self.lister.list_declarations();
        declarations.sort_by_key(|d| d.key());

        let mut merged = FeatureMap::new();
        for declaration in &declarations {
            merged.extend(self.resolve_declaration(declaration)?);
        }
        debug!(
            declarations = declarations.len(),
            features = merged.len(),
            "resolved cluster-wide feature mapping"
        );
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lister::MockDeclarationLister;
    use rstest::rstest;

    fn catalog() -> FeatureSetCatalog {
        FeatureSetCatalog::new([
            ("Default", FeatureLists::new(["x", "y"], ["z"])),
            ("Abc", FeatureLists::new(["a", "b"], ["c"])),
        ])
        .expect("catalog")
    }

    fn map(entries: &[(&str, bool)]) -> FeatureMap {
        entries.iter().map(|(n, v)| (n.to_string(), *v)).collect()
    }

    fn named(set: &str, enabled: &[&str], disabled: &[&str]) -> FeatureGateSpec {
        FeatureGateSpec::named(
            set,
            Some(FeatureLists::new(enabled.to_vec(), disabled.to_vec())),
        )
    }

    #[test]
    fn preset_without_overrides() {
        let features =
            resolve_spec("cluster", &FeatureGateSpec::named("Default", None), &catalog())
                .expect("resolve");
        assert_eq!(features, map(&[("x", true), ("y", true), ("z", false)]));
    }

    #[rstest]
    #[case::override_enables_catalog_disabled(
        named("Abc", &["c"], &[]),
        &[("a", true), ("b", true), ("c", true)]
    )]
    #[case::override_disables_catalog_enabled(
        named("Default", &[], &["x"]),
        &[("x", false), ("y", true), ("z", false)]
    )]
    #[case::override_adds_new_feature(
        named("Default", &["w"], &[]),
        &[("w", true), ("x", true), ("y", true), ("z", false)]
    )]
    #[case::override_conflict_disables(
        named("Default", &["q"], &["q"]),
        &[("q", false), ("x", true), ("y", true), ("z", false)]
    )]
    fn overrides_take_precedence(#[case] spec: FeatureGateSpec, #[case] expected: &[(&str, bool)]) {
        let features = resolve_spec("cluster", &spec, &catalog()).expect("resolve");
        assert_eq!(features, map(expected));
    }

    #[test]
    fn unknown_feature_set_is_a_configuration_error() {
        let err = resolve_spec("cluster", &FeatureGateSpec::named("bogus", None), &catalog())
            .unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("no corresponding feature set"));
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn explicit_lists_skip_the_catalog() {
        let spec = FeatureGateSpec::explicit(FeatureLists::new(["x", "m"], ["n"]));
        let features = resolve_spec("cluster", &spec, &FeatureSetCatalog::default())
            .expect("resolve");
        assert_eq!(features, map(&[("m", true), ("n", false), ("x", true)]));
    }

    #[test]
    fn explicit_overlap_resolves_to_disabled() {
        // Order within the lists must not matter.
        let a = FeatureGateSpec::explicit(FeatureLists::new(["a", "b"], ["a"]));
        let b = FeatureGateSpec::explicit(FeatureLists::new(["b", "a"], ["a"]));
        let expected = map(&[("a", false), ("b", true)]);
        assert_eq!(resolve_spec("one", &a, &catalog()).expect("resolve"), expected);
        assert_eq!(resolve_spec("two", &b, &catalog()).expect("resolve"), expected);
    }

    #[test]
    fn resolution_is_deterministic() {
        let spec = named("Default", &["w"], &["y"]);
        let catalog = catalog();
        let first = resolve_spec("cluster", &spec, &catalog).expect("resolve");
        for _ in 0..10 {
            assert_eq!(resolve_spec("cluster", &spec, &catalog).expect("resolve"), first);
        }
    }

    #[test]
    fn resolve_by_name_uses_the_lister() {
        let mut lister = MockDeclarationLister::new();
        lister.expect_get_declaration().returning(|key| {
            (key == "cluster").then(|| {
                Arc::new(FeatureGate::new(
                    "cluster",
                    FeatureGateSpec::named("Default", None),
                ))
            })
        });

        let resolver = FeatureResolver::new(Arc::new(catalog()), Arc::new(lister));
        assert_eq!(
            resolver.resolve("cluster").expect("resolve"),
            map(&[("x", true), ("y", true), ("z", false)])
        );
        assert!(matches!(
            resolver.resolve("missing"),
            Err(Error::NotFound { ref key }) if key == "missing"
        ));
    }

    #[test]
    fn resolve_all_merges_in_key_order() {
        let mut lister = MockDeclarationLister::new();
        lister.expect_list_declarations().returning(|| {
            vec![
                Arc::new(FeatureGate::new(
                    "b-late",
                    FeatureGateSpec::explicit(FeatureLists::new(Vec::<String>::new(), ["x"])),
                )),
                Arc::new(FeatureGate::new(
                    "a-early",
                    FeatureGateSpec::named("Default", None),
                )),
            ]
        });

        let resolver = FeatureResolver::new(Arc::new(catalog()), Arc::new(lister));
        assert_eq!(
            resolver.resolve_all().expect("resolve"),
            map(&[("x", false), ("y", true), ("z", false)])
        );
    }

    #[test]
    fn resolve_all_surfaces_configuration_errors() {
        let mut lister = MockDeclarationLister::new();
        lister.expect_list_declarations().returning(|| {
            vec![Arc::new(FeatureGate::new(
                "cluster",
                FeatureGateSpec::named("bogus", None),
            ))]
        });
        let resolver = FeatureResolver::new(Arc::new(catalog()), Arc::new(lister));
        assert!(matches!(
            resolver.resolve_all(),
            Err(Error::Configuration { .. })
        ));
    }
}
