//! Tests for dependency resolution against realistic catalog states.
//!
//! Tests cover: transitive closure, version selection, cycle detection,
//! removal refusal and cascade, plan ordering determinism.

use outfitter::descriptor::{AddonIdentity, Category, Provenance, Version, parse_descriptor};
use outfitter::registry::{AddonRegistry, InstalledAddon};
use outfitter::resolver::{OpKind, OperationPlan, Request, ResolveError, resolve};
use pretty_assertions::assert_eq;

fn ident(name: &str) -> AddonIdentity {
    AddonIdentity::new(Category::Plugin, "Galuhad", name)
}

fn catalog_entry(
    name: &str,
    version: &str,
    deps: &[(&str, Option<&str>)],
) -> outfitter::AddonDescriptor {
    let dep_blocks: String = deps
        .iter()
        .map(|(dep, min)| {
            let min_line = min
                .map(|m| format!("min_version = \"{m}\"\n"))
                .unwrap_or_default();
            format!(
                "\n[[dependencies]]\ncategory = \"plugin\"\nauthor = \"Galuhad\"\nname = \"{dep}\"\n{min_line}"
            )
        })
        .collect();
    let doc = format!(
        r#"
[addon]
category = "plugin"
author = "Galuhad"
name = "{name}"
version = "{version}"
download = "https://example.invalid/{name}-{version}.zip"
files = ["{name}/main.lua"]
{dep_blocks}"#
    );
    parse_descriptor(doc.as_bytes(), Provenance::Remote).expect("catalog entry")
}

fn registry_with(
    installed: &[outfitter::AddonDescriptor],
    available: &[outfitter::AddonDescriptor],
) -> AddonRegistry {
    let mut registry = AddonRegistry::new();
    for desc in installed {
        let files = desc.files.clone();
        registry.record_installed(InstalledAddon::new(desc.clone(), files));
    }
    registry.merge_remote_catalog(available.iter().cloned());
    registry
}

fn plan_summary(plan: &OperationPlan) -> Vec<(OpKind, String)> {
    plan.operations()
        .iter()
        .map(|op| (op.kind, op.identity().name.clone()))
        .collect()
}

/// A dependency with a minimum version gets the best satisfying catalog
/// version, ordered before its dependent.
#[test]
fn test_install_pulls_dependency_at_satisfying_version() {
    let registry = registry_with(
        &[],
        &[
            catalog_entry("TitanBar", "2.1.0", &[("MoorMap", Some("2.0"))]),
            catalog_entry("MoorMap", "1.5.0", &[]),
            catalog_entry("MoorMap", "2.1.0", &[]),
        ],
    );

    let plan = resolve(
        &Request::Install {
            identity: ident("TitanBar"),
            version: None,
        },
        &registry,
    )
    .expect("resolution should succeed");

    assert_eq!(
        plan_summary(&plan),
        vec![
            (OpKind::Install, "MoorMap".to_string()),
            (OpKind::Install, "TitanBar".to_string()),
        ]
    );
    assert_eq!(
        plan.operations()[0].descriptor.version,
        Version::parse("2.1.0"),
        "Should pick the highest satisfying version"
    );
}

/// A mutual dependency loop aborts resolution with the cycle spelled out.
#[test]
fn test_mutual_dependency_reports_cycle() {
    let registry = registry_with(
        &[],
        &[
            catalog_entry("TitanBar", "1.0.0", &[("MoorMap", None)]),
            catalog_entry("MoorMap", "1.0.0", &[("TitanBar", None)]),
        ],
    );

    let err = resolve(
        &Request::Install {
            identity: ident("TitanBar"),
            version: None,
        },
        &registry,
    )
    .expect_err("cycle must abort resolution");

    match err {
        ResolveError::CyclicDependency { cycle } => {
            assert_eq!(cycle.first(), cycle.last(), "Cycle closes on itself");
            assert!(cycle.len() >= 3, "Cycle trail includes both addons");
        }
        other => panic!("expected CyclicDependency, got {other:?}"),
    }
}

/// Removing an addon that others depend on is refused; cascade takes the
/// dependents too, dependent first.
#[test]
fn test_remove_refused_then_cascaded() {
    let registry = registry_with(
        &[
            catalog_entry("MoorMap", "1.0.0", &[]),
            catalog_entry("TitanBar", "1.0.0", &[("MoorMap", None)]),
        ],
        &[],
    );

    let err = resolve(
        &Request::Remove {
            identity: ident("MoorMap"),
            cascade: false,
        },
        &registry,
    )
    .expect_err("dependents must block plain removal");
    match err {
        ResolveError::DependentsExist { dependents, .. } => {
            assert_eq!(dependents, vec![ident("TitanBar")]);
        }
        other => panic!("expected DependentsExist, got {other:?}"),
    }

    let plan = resolve(
        &Request::Remove {
            identity: ident("MoorMap"),
            cascade: true,
        },
        &registry,
    )
    .expect("cascade removal resolves");
    assert_eq!(
        plan_summary(&plan),
        vec![
            (OpKind::Remove, "TitanBar".to_string()),
            (OpKind::Remove, "MoorMap".to_string()),
        ]
    );
}

/// Resolution is a pure function of the snapshot: the same request against
/// the same state yields the same plan.
#[test]
fn test_resolution_is_deterministic() {
    let registry = registry_with(
        &[],
        &[
            catalog_entry("Hub", "1.0.0", &[("East", None), ("West", None)]),
            catalog_entry("East", "1.0.0", &[("Core", None)]),
            catalog_entry("West", "1.0.0", &[("Core", None)]),
            catalog_entry("Core", "1.0.0", &[]),
        ],
    );
    let request = Request::Install {
        identity: ident("Hub"),
        version: None,
    };

    let first = resolve(&request, &registry).expect("first resolution");
    let second = resolve(&request, &registry).expect("second resolution");

    assert_eq!(first, second, "Identical snapshots give identical plans");
    let names: Vec<_> = plan_summary(&first).into_iter().map(|(_, n)| n).collect();
    assert_eq!(names, vec!["Core", "East", "West", "Hub"]);
}

/// Updating an addon already at the newest known version plans nothing,
/// and re-running the same update still plans nothing.
#[test]
fn test_update_is_idempotent() {
    let current = catalog_entry("TitanBar", "2.0.0", &[]);
    let registry = registry_with(&[current.clone()], &[current]);
    let request = Request::Update {
        identity: ident("TitanBar"),
    };

    let plan = resolve(&request, &registry).expect("resolution");
    assert!(plan.is_empty(), "Nothing to do at the newest version");
    let again = resolve(&request, &registry).expect("resolution again");
    assert!(again.is_empty());
}

/// A pinned install request conflicting with a transitive minimum fails
/// with both constraints named, before anything is planned.
#[test]
fn test_pin_against_transitive_minimum_conflicts() {
    let registry = registry_with(
        &[],
        &[
            catalog_entry("MoorMap", "1.0.0", &[("TitanBar", None)]),
            catalog_entry("TitanBar", "1.0.0", &[("MoorMap", Some("2.0"))]),
        ],
    );

    let err = resolve(
        &Request::Install {
            identity: ident("MoorMap"),
            version: Some(Version::parse("1.0.0")),
        },
        &registry,
    )
    .expect_err("pin cannot coexist with the minimum");
    assert!(
        matches!(err, ResolveError::VersionConflict { ref identity, .. } if *identity == ident("MoorMap")),
        "expected VersionConflict on MoorMap, got {err:?}"
    );
}
