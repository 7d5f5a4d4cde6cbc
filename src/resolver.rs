//! Dependency resolution.
//!
//! Turns a single install/update/remove request into a full, ordered
//! operation plan: transitive dependency closure, version selection under
//! accumulated constraints, cycle detection, and reverse-dependency closure
//! for removals. Resolution is pure: it reads a registry snapshot and never
//! touches the disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::descriptor::{AddonDescriptor, AddonIdentity, Version};
use crate::registry::AddonRegistry;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Install an addon, optionally pinned to an exact version.
    Install {
        /// Addon to install.
        identity: AddonIdentity,
        /// Exact version to install, or `None` for the best available.
        version: Option<Version>,
    },
    /// Update an installed addon to the newest known version.
    Update {
        /// Addon to update.
        identity: AddonIdentity,
    },
    /// Remove an installed addon.
    Remove {
        /// Addon to remove.
        identity: AddonIdentity,
        /// Also remove everything that depends on it, leaf first.
        cascade: bool,
    },
}

/// Kind of a planned operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Fresh install.
    Install,
    /// Replace an installed version.
    Update,
    /// Delete an installed addon.
    Remove,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Install => write!(f, "install"),
            OpKind::Update => write!(f, "update"),
            OpKind::Remove => write!(f, "remove"),
        }
    }
}

/// One planned operation against one addon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// What to do.
    pub kind: OpKind,
    /// The descriptor the operation targets. For removals this is the
    /// installed descriptor; for installs/updates the one to fetch.
    pub descriptor: AddonDescriptor,
}

impl Operation {
    /// Identity shorthand.
    #[must_use]
    pub fn identity(&self) -> &AddonIdentity {
        &self.descriptor.identity
    }
}

/// An ordered, resolved sequence of operations. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPlan {
    operations: Vec<Operation>,
}

impl OperationPlan {
    /// The operations in execution order.
    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// True if nothing needs doing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// A version constraint accumulated against one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Who imposed it; `None` means the user's own request.
    pub requester: Option<AddonIdentity>,
    /// The constraint itself.
    pub kind: ConstraintKind,
}

/// Constraint shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Minimum acceptable version (from a dependency edge).
    AtLeast(Version),
    /// Exact version (from a pinned user request).
    Exactly(Version),
}

impl Constraint {
    fn satisfied_by(&self, version: &Version) -> bool {
        match &self.kind {
            ConstraintKind::AtLeast(min) => version >= min,
            ConstraintKind::Exactly(exact) => version == exact,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source: &dyn fmt::Display = match &self.requester {
            Some(id) => id,
            None => &"request",
        };
        match &self.kind {
            ConstraintKind::AtLeast(v) => write!(f, "{} needs >={}", source, v),
            ConstraintKind::Exactly(v) => write!(f, "{} needs =={}", source, v),
        }
    }
}

fn unsat_detail(min_version: &Option<Version>, required_by: &Option<AddonIdentity>) -> String {
    let bound = match min_version {
        Some(v) => format!(">={}", v),
        None => "any version".to_string(),
    };
    match required_by {
        Some(id) => format!("{} (required by {})", bound, id),
        None => bound,
    }
}

fn join_identities(ids: &[AddonIdentity]) -> String {
    ids.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn list_identities(ids: &[AddonIdentity]) -> String {
    ids.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Resolution failure. Resolution has no side effects, so every variant
/// aborts before any disk mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The requested addon is not installed (update/remove requests).
    #[error("addon {0} is not installed")]
    NotInstalled(AddonIdentity),
    /// No known version satisfies the accumulated constraints.
    #[error("no version of {identity} satisfies {}", unsat_detail(.min_version, .required_by))]
    UnsatisfiableDependency {
        /// The dependency that cannot be satisfied.
        identity: AddonIdentity,
        /// The minimum-version constraint that failed, if any.
        min_version: Option<Version>,
        /// The dependent that needed it, if not the user's own request.
        required_by: Option<AddonIdentity>,
    },
    /// The dependency graph contains a cycle.
    #[error("cyclic dependency: {}", join_identities(.cycle))]
    CyclicDependency {
        /// The cycle, first identity repeated at the end.
        cycle: Vec<AddonIdentity>,
    },
    /// Two requesters impose constraints no version can satisfy together.
    #[error("version conflict on {identity}: {first} vs {second}")]
    VersionConflict {
        /// The contested addon.
        identity: AddonIdentity,
        /// One of the conflicting constraints.
        first: Constraint,
        /// The other.
        second: Constraint,
    },
    /// Removal refused: installed addons still depend on the target.
    #[error("cannot remove {identity}: still required by {}", list_identities(.dependents))]
    DependentsExist {
        /// The addon whose removal was requested.
        identity: AddonIdentity,
        /// Installed addons that depend on it, directly or transitively.
        dependents: Vec<AddonIdentity>,
    },
}

/// Resolves a request against a registry snapshot into an operation plan.
pub fn resolve(request: &Request, snapshot: &AddonRegistry) -> Result<OperationPlan, ResolveError> {
    match request {
        Request::Install { identity, version } => {
            let mut state = Resolver::new(snapshot);
            if let Some(v) = version {
                state.add_constraint(
                    identity,
                    Constraint {
                        requester: None,
                        kind: ConstraintKind::Exactly(v.clone()),
                    },
                )?;
            }
            let mut path = Vec::new();
            state.ensure(identity, true, None, &mut path)?;
            state.into_forward_plan()
        }
        Request::Update { identity } => {
            if snapshot.get_installed(identity).is_none() {
                return Err(ResolveError::NotInstalled(identity.clone()));
            }
            let mut state = Resolver::new(snapshot);
            let mut path = Vec::new();
            // The update target itself must not prefer the installed
            // version, otherwise nothing would ever move forward.
            state.ensure(identity, false, None, &mut path)?;
            state.into_forward_plan()
        }
        Request::Remove { identity, cascade } => resolve_remove(identity, *cascade, snapshot),
    }
}

/// A selected candidate for one identity.
#[derive(Debug, Clone)]
struct Selection {
    descriptor: AddonDescriptor,
    /// `None` when the installed version already satisfies everything.
    op: Option<OpKind>,
}

struct Resolver<'a> {
    snapshot: &'a AddonRegistry,
    constraints: BTreeMap<AddonIdentity, Vec<Constraint>>,
    chosen: BTreeMap<AddonIdentity, Selection>,
}

impl<'a> Resolver<'a> {
    fn new(snapshot: &'a AddonRegistry) -> Self {
        Self {
            snapshot,
            constraints: BTreeMap::new(),
            chosen: BTreeMap::new(),
        }
    }

    /// Accumulates a constraint, failing as soon as it cannot coexist with
    /// one already recorded (a pinned version against a higher minimum, or
    /// two different pins).
    fn add_constraint(
        &mut self,
        identity: &AddonIdentity,
        constraint: Constraint,
    ) -> Result<(), ResolveError> {
        let list = self.constraints.entry(identity.clone()).or_default();
        for existing in list.iter() {
            let compatible = match (&existing.kind, &constraint.kind) {
                (ConstraintKind::Exactly(a), ConstraintKind::Exactly(b)) => a == b,
                (ConstraintKind::Exactly(pin), ConstraintKind::AtLeast(min))
                | (ConstraintKind::AtLeast(min), ConstraintKind::Exactly(pin)) => pin >= min,
                (ConstraintKind::AtLeast(_), ConstraintKind::AtLeast(_)) => true,
            };
            if !compatible {
                return Err(ResolveError::VersionConflict {
                    identity: identity.clone(),
                    first: existing.clone(),
                    second: constraint,
                });
            }
        }
        if !list.contains(&constraint) {
            list.push(constraint);
        }
        Ok(())
    }

    /// Makes sure `identity` is satisfiable under the accumulated
    /// constraints, pulling unmet dependencies into the work-set. `path` is
    /// the current traversal trail, used for cycle detection.
    fn ensure(
        &mut self,
        identity: &AddonIdentity,
        prefer_installed: bool,
        required_by: Option<&AddonIdentity>,
        path: &mut Vec<AddonIdentity>,
    ) -> Result<(), ResolveError> {
        if let Some(pos) = path.iter().position(|p| p == identity) {
            let mut cycle: Vec<AddonIdentity> = path[pos..].to_vec();
            cycle.push(identity.clone());
            return Err(ResolveError::CyclicDependency { cycle });
        }

        let selection = self.choose(identity, prefer_installed, required_by)?;

        // Constraints only tighten, so an identity re-entered at the same
        // version is already fully processed.
        if let Some(prev) = self.chosen.get(identity) {
            if prev.descriptor.version == selection.descriptor.version
                && prev.op == selection.op
            {
                return Ok(());
            }
        }

        let traverse = selection.op.is_some();
        let dependencies = selection.descriptor.dependencies.clone();
        self.chosen.insert(identity.clone(), selection);

        // An installed, satisfying version brings nothing new to do; its own
        // dependencies are assumed present on disk.
        if !traverse {
            return Ok(());
        }

        path.push(identity.clone());
        for dep in &dependencies {
            if let Some(min) = &dep.min_version {
                self.add_constraint(
                    &dep.identity,
                    Constraint {
                        requester: Some(identity.clone()),
                        kind: ConstraintKind::AtLeast(min.clone()),
                    },
                )?;
            }
            self.ensure(&dep.identity, true, Some(identity), path)?;
        }
        path.pop();
        Ok(())
    }

    /// Picks the version for one identity: the installed version when it
    /// satisfies all accumulated constraints (minimizes churn), otherwise
    /// the strictly-highest available version that does.
    fn choose(
        &self,
        identity: &AddonIdentity,
        prefer_installed: bool,
        required_by: Option<&AddonIdentity>,
    ) -> Result<Selection, ResolveError> {
        let empty = Vec::new();
        let constraints = self.constraints.get(identity).unwrap_or(&empty);

        // Pairwise-incompatible constraints were rejected when accumulated,
        // so an empty candidate set here means unsatisfiable, not conflict.
        let satisfies =
            |version: &Version| constraints.iter().all(|c| c.satisfied_by(version));

        let (installed, available) = self.snapshot.lookup(identity);

        if prefer_installed {
            if let Some(inst) = installed {
                if satisfies(&inst.descriptor.version) {
                    return Ok(Selection {
                        descriptor: inst.descriptor.clone(),
                        op: None,
                    });
                }
            }
        }

        let best = available
            .iter()
            .filter(|d| satisfies(&d.version))
            .max_by(|a, b| a.version.cmp(&b.version));

        match best {
            Some(desc) => {
                // An update target already at the best version is a no-op.
                if let Some(inst) = installed {
                    if inst.descriptor.version >= desc.version && satisfies(&inst.descriptor.version)
                    {
                        return Ok(Selection {
                            descriptor: inst.descriptor.clone(),
                            op: None,
                        });
                    }
                }
                let op = if installed.is_some() {
                    OpKind::Update
                } else {
                    OpKind::Install
                };
                Ok(Selection {
                    descriptor: (*desc).clone(),
                    op: Some(op),
                })
            }
            None => {
                // Nothing available satisfies; the installed version may
                // still (e.g. updating an addon absent from the catalog).
                if let Some(inst) = installed {
                    if satisfies(&inst.descriptor.version) {
                        return Ok(Selection {
                            descriptor: inst.descriptor.clone(),
                            op: None,
                        });
                    }
                }
                let strongest = constraints
                    .iter()
                    .filter_map(|c| match &c.kind {
                        ConstraintKind::AtLeast(v) => Some((v, c)),
                        ConstraintKind::Exactly(v) => Some((v, c)),
                    })
                    .max_by(|a, b| a.0.cmp(b.0));
                Err(ResolveError::UnsatisfiableDependency {
                    identity: identity.clone(),
                    min_version: strongest.map(|(v, _)| v.clone()),
                    required_by: strongest
                        .and_then(|(_, c)| c.requester.clone())
                        .or_else(|| required_by.cloned()),
                })
            }
        }
    }

    /// Orders the chosen operations dependency-first: a dependency is
    /// installed before anything that needs it. Ties break by identity
    /// lexical order for determinism.
    fn into_forward_plan(self) -> Result<OperationPlan, ResolveError> {
        let nodes: BTreeMap<&AddonIdentity, &Selection> = self
            .chosen
            .iter()
            .filter(|(_, sel)| sel.op.is_some())
            .map(|(id, sel)| (id, sel))
            .collect();

        // Edge dep -> dependent, restricted to identities with operations.
        let mut indegree: BTreeMap<&AddonIdentity, usize> =
            nodes.keys().map(|id| (*id, 0)).collect();
        let mut dependents_of: BTreeMap<&AddonIdentity, Vec<&AddonIdentity>> = BTreeMap::new();
        for (id, sel) in &nodes {
            for dep in &sel.descriptor.dependencies {
                if let Some((dep_id, _)) = nodes.get_key_value(&dep.identity) {
                    dependents_of.entry(*dep_id).or_default().push(*id);
                    if let Some(d) = indegree.get_mut(*id) {
                        *d += 1;
                    }
                }
            }
        }

        let mut ready: BTreeSet<&AddonIdentity> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut operations = Vec::with_capacity(nodes.len());

        while let Some(id) = ready.pop_first() {
            let sel = nodes[id];
            if let Some(kind) = sel.op {
                operations.push(Operation {
                    kind,
                    descriptor: sel.descriptor.clone(),
                });
            }
            for dependent in dependents_of.get(id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(*dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if operations.len() != nodes.len() {
            // Unreachable after DFS cycle detection, but never emit a
            // half-ordered plan.
            let cycle: Vec<AddonIdentity> = nodes
                .keys()
                .filter(|id| !operations.iter().any(|op| op.identity() == **id))
                .map(|id| (*id).clone())
                .collect();
            return Err(ResolveError::CyclicDependency { cycle });
        }

        Ok(OperationPlan { operations })
    }
}

/// Resolves a removal: reverse-dependency closure, refusal unless cascading,
/// and dependent-first ordering.
fn resolve_remove(
    identity: &AddonIdentity,
    cascade: bool,
    snapshot: &AddonRegistry,
) -> Result<OperationPlan, ResolveError> {
    if snapshot.get_installed(identity).is_none() {
        return Err(ResolveError::NotInstalled(identity.clone()));
    }

    // Fixed-point reverse closure: anything installed that depends on a
    // member of the removal set joins it.
    let mut to_remove: BTreeSet<AddonIdentity> = BTreeSet::from([identity.clone()]);
    loop {
        let mut grew = false;
        for addon in snapshot.installed() {
            if to_remove.contains(addon.identity()) {
                continue;
            }
            let depends_in = addon
                .descriptor
                .dependencies
                .iter()
                .any(|d| to_remove.contains(&d.identity));
            if depends_in {
                to_remove.insert(addon.identity().clone());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }

    let dependents: Vec<AddonIdentity> = to_remove
        .iter()
        .filter(|id| *id != identity)
        .cloned()
        .collect();
    if !dependents.is_empty() && !cascade {
        return Err(ResolveError::DependentsExist {
            identity: identity.clone(),
            dependents,
        });
    }

    // Dependent-first order: whoever depends on something in the set goes
    // before it. Kahn over reversed edges, lexical tie-break.
    let mut indegree: BTreeMap<&AddonIdentity, usize> =
        to_remove.iter().map(|id| (id, 0)).collect();
    let mut blocks: BTreeMap<&AddonIdentity, Vec<&AddonIdentity>> = BTreeMap::new();
    for id in &to_remove {
        let Some(addon) = snapshot.get_installed(id) else {
            continue;
        };
        for dep in &addon.descriptor.dependencies {
            if let Some(dep_id) = to_remove.get(&dep.identity) {
                if dep_id != id {
                    // id must be removed before dep_id
                    blocks.entry(id).or_default().push(dep_id);
                    if let Some(d) = indegree.get_mut(dep_id) {
                        *d += 1;
                    }
                }
            }
        }
    }

    let mut ready: BTreeSet<&AddonIdentity> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut operations = Vec::with_capacity(to_remove.len());

    while let Some(id) = ready.pop_first() {
        if let Some(addon) = snapshot.get_installed(id) {
            operations.push(Operation {
                kind: OpKind::Remove,
                descriptor: addon.descriptor.clone(),
            });
        }
        for blocked in blocks.get(id).into_iter().flatten() {
            if let Some(d) = indegree.get_mut(*blocked) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(*blocked);
                }
            }
        }
    }

    if operations.len() != to_remove.len() {
        let cycle: Vec<AddonIdentity> = to_remove
            .iter()
            .filter(|id| !operations.iter().any(|op| op.identity() == *id))
            .cloned()
            .collect();
        return Err(ResolveError::CyclicDependency { cycle });
    }

    Ok(OperationPlan { operations })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::descriptor::{parse_descriptor, Category, Provenance};
    use crate::registry::InstalledAddon;

    fn ident(name: &str) -> AddonIdentity {
        AddonIdentity::new(Category::Plugin, "Author", name)
    }

    fn descriptor(name: &str, version: &str, deps: &[(&str, Option<&str>)]) -> AddonDescriptor {
        let dep_blocks: String = deps
            .iter()
            .map(|(dep_name, min)| {
                let min_line = min
                    .map(|m| format!("min_version = \"{m}\"\n"))
                    .unwrap_or_default();
                format!(
                    "\n[[dependencies]]\ncategory = \"plugin\"\nauthor = \"Author\"\nname = \"{dep_name}\"\n{min_line}"
                )
            })
            .collect();
        let doc = format!(
            r#"
[addon]
category = "plugin"
author = "Author"
name = "{name}"
version = "{version}"
download = "https://example.invalid/{name}-{version}.zip"
files = ["{name}/main.lua"]
{dep_blocks}"#
        );
        parse_descriptor(doc.as_bytes(), Provenance::Remote).expect("test descriptor")
    }

    fn registry_with(
        installed: &[AddonDescriptor],
        available: &[AddonDescriptor],
    ) -> AddonRegistry {
        let mut registry = AddonRegistry::new();
        for desc in installed {
            let files = desc.files.clone();
            registry.record_installed(InstalledAddon::new(desc.clone(), files));
        }
        registry.merge_remote_catalog(available.iter().cloned());
        registry
    }

    fn plan_names(plan: &OperationPlan) -> Vec<(OpKind, String)> {
        plan.operations()
            .iter()
            .map(|op| (op.kind, op.identity().name.clone()))
            .collect()
    }

    #[test]
    fn test_install_picks_satisfying_version() {
        // P needs Q>=2.0; catalog has Q@1.5 and Q@2.1.
        let p = descriptor("P", "1.0.0", &[("Q", Some("2.0"))]);
        let q_old = descriptor("Q", "1.5", &[]);
        let q_new = descriptor("Q", "2.1", &[]);
        let registry = registry_with(&[], &[p, q_old, q_new]);

        let plan = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect("resolve");

        assert_eq!(
            plan_names(&plan),
            vec![
                (OpKind::Install, "Q".to_string()),
                (OpKind::Install, "P".to_string()),
            ]
        );
        let q_op = &plan.operations()[0];
        assert_eq!(q_op.descriptor.version, Version::parse("2.1"));
    }

    #[test]
    fn test_cycle_detected() {
        let p = descriptor("P", "1.0.0", &[("Q", None)]);
        let q = descriptor("Q", "1.0.0", &[("P", None)]);
        let registry = registry_with(&[], &[p, q]);

        let err = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect_err("must cycle");

        match err {
            ResolveError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                let names: Vec<_> = cycle.iter().map(|i| i.name.as_str()).collect();
                assert_eq!(names, vec!["P", "Q", "P"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_with_dependents() {
        let q = descriptor("Q", "1.0.0", &[]);
        let p = descriptor("P", "1.0.0", &[("Q", None)]);
        let registry = registry_with(&[q, p], &[]);

        let err = resolve(
            &Request::Remove {
                identity: ident("Q"),
                cascade: false,
            },
            &registry,
        )
        .expect_err("dependents exist");
        match err {
            ResolveError::DependentsExist { dependents, .. } => {
                assert_eq!(dependents, vec![ident("P")]);
            }
            other => panic!("expected DependentsExist, got {:?}", other),
        }

        let plan = resolve(
            &Request::Remove {
                identity: ident("Q"),
                cascade: true,
            },
            &registry,
        )
        .expect("cascade");
        assert_eq!(
            plan_names(&plan),
            vec![
                (OpKind::Remove, "P".to_string()),
                (OpKind::Remove, "Q".to_string()),
            ]
        );
    }

    #[test]
    fn test_update_at_latest_is_empty_plan() {
        let p = descriptor("P", "2.0.0", &[]);
        let registry = registry_with(&[p.clone()], &[p]);

        let plan = resolve(&Request::Update { identity: ident("P") }, &registry)
            .expect("resolve");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_update_moves_to_newest() {
        let p_old = descriptor("P", "1.0.0", &[]);
        let p_new = descriptor("P", "1.2.0", &[]);
        let registry = registry_with(&[p_old], &[p_new]);

        let plan = resolve(&Request::Update { identity: ident("P") }, &registry)
            .expect("resolve");
        assert_eq!(plan_names(&plan), vec![(OpKind::Update, "P".to_string())]);
        assert_eq!(
            plan.operations()[0].descriptor.version,
            Version::parse("1.2.0")
        );
    }

    #[test]
    fn test_update_of_missing_addon() {
        let registry = registry_with(&[], &[]);
        let err = resolve(&Request::Update { identity: ident("P") }, &registry)
            .expect_err("not installed");
        assert_eq!(err, ResolveError::NotInstalled(ident("P")));
    }

    #[test]
    fn test_prefer_installed_dependency() {
        // P needs Q>=1.0; Q@1.2 is installed, Q@2.0 available. The installed
        // version satisfies, so no operation is planned for Q.
        let q_installed = descriptor("Q", "1.2.0", &[]);
        let q_newer = descriptor("Q", "2.0.0", &[]);
        let p = descriptor("P", "1.0.0", &[("Q", Some("1.0"))]);
        let registry = registry_with(&[q_installed], &[p, q_newer]);

        let plan = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect("resolve");
        assert_eq!(plan_names(&plan), vec![(OpKind::Install, "P".to_string())]);
    }

    #[test]
    fn test_installed_dependency_upgraded_when_too_old() {
        let q_installed = descriptor("Q", "1.2.0", &[]);
        let q_newer = descriptor("Q", "2.0.0", &[]);
        let p = descriptor("P", "1.0.0", &[("Q", Some("1.5"))]);
        let registry = registry_with(&[q_installed], &[p, q_newer]);

        let plan = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect("resolve");
        assert_eq!(
            plan_names(&plan),
            vec![
                (OpKind::Update, "Q".to_string()),
                (OpKind::Install, "P".to_string()),
            ]
        );
    }

    #[test]
    fn test_unsatisfiable_dependency_names_constraint() {
        let p = descriptor("P", "1.0.0", &[("Q", Some("3.0"))]);
        let q = descriptor("Q", "2.0.0", &[]);
        let registry = registry_with(&[], &[p, q]);

        let err = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect_err("unsatisfiable");
        match err {
            ResolveError::UnsatisfiableDependency {
                identity,
                min_version,
                required_by,
            } => {
                assert_eq!(identity, ident("Q"));
                assert_eq!(min_version, Some(Version::parse("3.0")));
                assert_eq!(required_by, Some(ident("P")));
            }
            other => panic!("expected UnsatisfiableDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_version_conflict_pin_vs_minimum() {
        // User pins Q to 1.0.0, but Q@1.0.0 pulls in P which in turn
        // requires Q>=2.0: the pin and the minimum cannot both hold.
        let q_pinned = descriptor("Q", "1.0.0", &[("P", None)]);
        let p_needs_q2 = descriptor("P", "1.0.0", &[("Q", Some("2.0"))]);
        let registry = registry_with(&[], &[q_pinned, p_needs_q2]);

        let err = resolve(
            &Request::Install {
                identity: ident("Q"),
                version: Some(Version::parse("1.0.0")),
            },
            &registry,
        )
        .expect_err("conflict");
        match err {
            ResolveError::VersionConflict { identity, first, second } => {
                assert_eq!(identity, ident("Q"));
                assert!(matches!(first.kind, ConstraintKind::Exactly(_)));
                assert!(matches!(second.kind, ConstraintKind::AtLeast(_)));
            }
            other => panic!("expected VersionConflict, got {:?}", other),
        }
    }

    #[test]
    fn test_diamond_orders_shared_dependency_first() {
        // A -> B, A -> C, B -> D, C -> D: D must precede B and C, which
        // precede A; ties broken lexically.
        let a = descriptor("A", "1.0.0", &[("B", None), ("C", None)]);
        let b = descriptor("B", "1.0.0", &[("D", None)]);
        let c = descriptor("C", "1.0.0", &[("D", None)]);
        let d = descriptor("D", "1.0.0", &[]);
        let registry = registry_with(&[], &[a, b, c, d]);

        let plan = resolve(
            &Request::Install {
                identity: ident("A"),
                version: None,
            },
            &registry,
        )
        .expect("resolve");
        let names: Vec<_> = plan_names(&plan).into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn test_install_already_installed_is_empty() {
        let p = descriptor("P", "1.0.0", &[]);
        let registry = registry_with(&[p.clone()], &[p]);

        let plan = resolve(
            &Request::Install {
                identity: ident("P"),
                version: None,
            },
            &registry,
        )
        .expect("resolve");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_cascade_chain_removes_leaf_first() {
        // R depends on Q depends on... removal of the innermost dependency
        // takes the whole chain down, outermost dependent first.
        let base = descriptor("Base", "1.0.0", &[]);
        let mid = descriptor("Mid", "1.0.0", &[("Base", None)]);
        let top = descriptor("Top", "1.0.0", &[("Mid", None)]);
        let registry = registry_with(&[base, mid, top], &[]);

        let plan = resolve(
            &Request::Remove {
                identity: ident("Base"),
                cascade: true,
            },
            &registry,
        )
        .expect("cascade");
        let names: Vec<_> = plan_names(&plan).into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["Top", "Mid", "Base"]);
    }
}
