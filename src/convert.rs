//! The conversion pipeline: correlate, canonicalize, prune, write.
//!
//! One call converts one dump into one bundle. Phases run in strict
//! sequence over a single `CorrelationState`; nothing observes partial
//! output of a later phase.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::canonicalize::canonicalize;
use crate::correlate::{self, CorrelationState};
use crate::existence::GetChildren;
use crate::prune::prune;
use crate::write::{self, WriteStats};

/// A package this dump provides, derived from its exported monikers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub scheme: String,
    pub name: String,
    pub version: String,
}

/// A package this dump depends on, with the identifiers it uses from
/// that package, derived from its imported monikers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub scheme: String,
    pub name: String,
    pub version: String,
    pub identifiers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Conversion {
    pub packages: Vec<Package>,
    pub references: Vec<Reference>,
    pub stats: WriteStats,
}

/// Convert the gzipped dump at `dump_path` into a bundle at
/// `bundle_path`. The bundle file is exclusively owned by this call
/// until it returns; on any failure (including cancellation and
/// post-commit index creation) the partial file is deleted.
pub fn convert(
    dump_path: &Path,
    bundle_path: &Path,
    root: &str,
    children: &mut dyn GetChildren,
    cancel: &CancelToken,
) -> Result<Conversion> {
    let result = convert_inner(dump_path, bundle_path, root, children, cancel);
    if result.is_err() {
        let _ = fs::remove_file(bundle_path);
    }
    result
}

fn convert_inner(
    dump_path: &Path,
    bundle_path: &Path,
    root: &str,
    children: &mut dyn GetChildren,
    cancel: &CancelToken,
) -> Result<Conversion> {
    let mut state = correlate::correlate(dump_path, root, cancel)
        .with_context(|| format!("correlate {}", dump_path.display()))?;

    canonicalize(&mut state);
    prune(&mut state, root, children, cancel).context("prune document set")?;

    let stats = write::write_bundle(&state, bundle_path, cancel)
        .with_context(|| format!("write bundle {}", bundle_path.display()))?;

    Ok(Conversion {
        packages: packages(&state),
        references: references(&state),
        stats,
    })
}

/// One entry per exported moniker; duplicates are permitted and left
/// to downstream deduplication.
pub fn packages(state: &CorrelationState) -> Vec<Package> {
    let mut packages = Vec::new();
    for id in state.exported_monikers.iter() {
        let Some(moniker) = state.moniker_data.get(id) else {
            continue;
        };
        let info = moniker
            .package_information_id
            .as_deref()
            .and_then(|info_id| state.package_information_data.get(info_id))
            .cloned()
            .unwrap_or_default();

        packages.push(Package {
            scheme: moniker.scheme.clone(),
            name: info.name,
            version: info.version,
        });
    }
    packages
}

/// Imported monikers grouped by (scheme, package name, version).
pub fn references(state: &CorrelationState) -> Vec<Reference> {
    let mut groups: BTreeMap<(String, String, String), Vec<String>> = BTreeMap::new();
    for id in state.imported_monikers.iter() {
        let Some(moniker) = state.moniker_data.get(id) else {
            continue;
        };
        let info = moniker
            .package_information_id
            .as_deref()
            .and_then(|info_id| state.package_information_data.get(info_id))
            .cloned()
            .unwrap_or_default();

        groups
            .entry((moniker.scheme.clone(), info.name, info.version))
            .or_default()
            .push(moniker.identifier.clone());
    }

    groups
        .into_iter()
        .map(|((scheme, name, version), identifiers)| Reference {
            scheme,
            name,
            version,
            identifiers,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MonikerData, MonikerKind, PackageInformationData};

    fn state_with_monikers() -> CorrelationState {
        let mut state = CorrelationState::default();
        for (id, kind, scheme, identifier, info_id) in [
            ("m01", MonikerKind::Export, "gomod", "pkg:A", Some("p01")),
            ("m02", MonikerKind::Import, "gomod", "dep:X", Some("p02")),
            ("m03", MonikerKind::Import, "gomod", "dep:Y", Some("p02")),
            ("m04", MonikerKind::Import, "npm", "left-pad", None),
        ] {
            state.moniker_data.insert(
                id.into(),
                MonikerData {
                    kind,
                    scheme: scheme.into(),
                    identifier: identifier.into(),
                    package_information_id: info_id.map(String::from),
                },
            );
        }
        state.package_information_data.insert(
            "p01".into(),
            PackageInformationData {
                name: "mypkg".into(),
                version: "v1.0.0".into(),
            },
        );
        state.package_information_data.insert(
            "p02".into(),
            PackageInformationData {
                name: "somedep".into(),
                version: "v2.3.4".into(),
            },
        );
        state.exported_monikers.insert("m01");
        state.imported_monikers.insert("m02");
        state.imported_monikers.insert("m03");
        state.imported_monikers.insert("m04");
        state
    }

    #[test]
    fn test_packages_from_exported_monikers() {
        let packages = packages(&state_with_monikers());
        assert_eq!(
            packages,
            vec![Package {
                scheme: "gomod".into(),
                name: "mypkg".into(),
                version: "v1.0.0".into(),
            }]
        );
    }

    #[test]
    fn test_references_group_by_package() {
        let references = references(&state_with_monikers());
        assert_eq!(
            references,
            vec![
                Reference {
                    scheme: "gomod".into(),
                    name: "somedep".into(),
                    version: "v2.3.4".into(),
                    identifiers: vec!["dep:X".into(), "dep:Y".into()],
                },
                Reference {
                    scheme: "npm".into(),
                    name: "".into(),
                    version: "".into(),
                    identifiers: vec!["left-pad".into()],
                },
            ]
        );
    }
}
