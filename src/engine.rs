//! Installation engine.
//!
//! Executes a resolved operation plan against the filesystem. Each install
//! stages its payload into a temporary directory, re-validates path
//! ownership against the live registry (the plan was made against a
//! snapshot, so state may have drifted), then moves the staged subtree into
//! place with a single rename. A failed or cancelled operation leaves no
//! partial addon visible.
//!
//! The plan as a whole is not transactional: a failure halts the remaining
//! operations, but operations already committed stay committed. Addons are
//! independent units, so partial application is an inspectable state, not
//! corruption.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::descriptor::{self, AddonDescriptor, AddonIdentity, Provenance};
use crate::registry::{COMPENDIUM_FILE, InstalledAddon, SharedRegistry};
use crate::resolver::{OpKind, Operation, OperationPlan};

/// Cooperative cancellation flag, shared with in-flight downloads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Download collaborator: turns a descriptor's download location into the
/// raw zip payload. Implementations should poll the token and bail early on
/// cancellation.
pub trait PayloadSource {
    /// Fetches the payload archive for a descriptor.
    fn fetch(
        &self,
        descriptor: &AddonDescriptor,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, EngineError>;
}

/// Commit-time failure of a single operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The payload could not be fetched or did not match its manifest.
    #[error("download failed for {identity}: {reason}")]
    DownloadFailed {
        /// Addon whose payload failed.
        identity: AddonIdentity,
        /// Transport or payload-shape problem.
        reason: String,
    },
    /// A manifest path is owned by a different installed addon.
    #[error("path conflict: {path} is owned by {owner}")]
    PathConflict {
        /// The contested relative path.
        path: String,
        /// The installed addon that owns it.
        owner: AddonIdentity,
    },
    /// Permissions, disk full, or other I/O trouble.
    #[error("filesystem error: {0}")]
    FilesystemError(#[from] io::Error),
    /// Another install of the same addon identity is in flight.
    #[error("addon {0} is already being modified")]
    ConcurrentModification(AddonIdentity),
    /// The user cancelled before this operation committed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Outcome of one planned operation.
#[derive(Debug)]
pub enum OpStatus {
    /// The operation committed; registry and disk were updated.
    Committed,
    /// The operation failed; nothing of it is visible on disk.
    Failed(EngineError),
    /// A previous failure halted the plan before this operation ran.
    Skipped,
}

/// Per-operation record in an execution report.
#[derive(Debug)]
pub struct OperationOutcome {
    /// Addon the operation targeted.
    pub identity: AddonIdentity,
    /// What was attempted.
    pub kind: OpKind,
    /// How it went.
    pub status: OpStatus,
}

/// What the engine did with a plan, operation by operation.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// One record per planned operation, in plan order.
    pub outcomes: Vec<OperationOutcome>,
}

impl ExecutionReport {
    /// True when every operation committed.
    #[must_use]
    pub fn all_committed(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, OpStatus::Committed))
    }

    /// Identities of committed operations, in commit order.
    #[must_use]
    pub fn committed(&self) -> Vec<&AddonIdentity> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, OpStatus::Committed))
            .map(|o| &o.identity)
            .collect()
    }

    /// The first failure, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<(&AddonIdentity, &EngineError)> {
        self.outcomes.iter().find_map(|o| match &o.status {
            OpStatus::Failed(e) => Some((&o.identity, e)),
            _ => None,
        })
    }
}

impl fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            let status = match &outcome.status {
                OpStatus::Committed => "ok".to_string(),
                OpStatus::Failed(e) => format!("failed: {}", e),
                OpStatus::Skipped => "skipped".to_string(),
            };
            writeln!(f, "{} {}: {}", outcome.kind, outcome.identity, status)?;
        }
        Ok(())
    }
}

/// Executes operation plans against an addon directory tree.
pub struct InstallEngine {
    registry: SharedRegistry,
    scan_root: PathBuf,
    in_flight: Arc<Mutex<BTreeSet<AddonIdentity>>>,
}

impl InstallEngine {
    /// Creates an engine rooted at the addon directory tree.
    #[must_use]
    pub fn new(registry: SharedRegistry, scan_root: PathBuf) -> Self {
        Self {
            registry,
            scan_root,
            in_flight: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Executes the plan operation-by-operation. A failure halts the
    /// remaining operations; committed operations are not rolled back.
    pub fn execute(
        &self,
        plan: &OperationPlan,
        source: &dyn PayloadSource,
        cancel: &CancelToken,
    ) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let mut halted = false;

        for op in plan.operations() {
            if halted {
                report.outcomes.push(OperationOutcome {
                    identity: op.identity().clone(),
                    kind: op.kind,
                    status: OpStatus::Skipped,
                });
                continue;
            }

            let status = match self.run_operation(op, source, cancel) {
                Ok(()) => {
                    info!("{} {} committed", op.kind, op.identity());
                    OpStatus::Committed
                }
                Err(e) => {
                    warn!("{} {} failed: {}", op.kind, op.identity(), e);
                    halted = true;
                    OpStatus::Failed(e)
                }
            };
            report.outcomes.push(OperationOutcome {
                identity: op.identity().clone(),
                kind: op.kind,
                status,
            });
        }

        report
    }

    fn run_operation(
        &self,
        op: &Operation,
        source: &dyn PayloadSource,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        let _guard = InFlightGuard::claim(&self.in_flight, op.identity())?;

        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match op.kind {
            OpKind::Install | OpKind::Update => self.install(&op.descriptor, source, cancel),
            OpKind::Remove => self.remove(&op.descriptor),
        }
    }

    /// Stage, verify, and atomically commit one install or update.
    fn install(
        &self,
        desc: &AddonDescriptor,
        source: &dyn PayloadSource,
        cancel: &CancelToken,
    ) -> Result<(), EngineError> {
        let payload = source.fetch(desc, cancel)?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let category_dir = self.scan_root.join(desc.identity.category.dir_name());
        fs::create_dir_all(&category_dir)?;

        // Stage on the same filesystem as the target so the final rename is
        // atomic. The TempDir cleans itself up on any early return.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.scan_root)?;

        extract_payload(desc, &payload, staging.path())?;
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // The staged subtree carries its own descriptor, per the disk
        // layout contract: payload files plus one compendium per addon.
        let mut local = desc.clone();
        local.provenance = Provenance::Local;
        let compendium =
            descriptor::to_toml(&local).map_err(|e| EngineError::DownloadFailed {
                identity: desc.identity.clone(),
                reason: format!("descriptor re-serialization: {}", e),
            })?;
        let staged_subtree = staging.path().join(desc.subtree());
        fs::write(staged_subtree.join(COMPENDIUM_FILE), compendium)?;

        // Pessimistic commit: ownership is re-checked under the write lock,
        // then the rename and the registry update happen together.
        self.registry.write(|registry| {
            for path in &desc.files {
                if let Some(owner) = registry.owner_of(desc.identity.category, path) {
                    if *owner != desc.identity {
                        return Err(EngineError::PathConflict {
                            path: path.clone(),
                            owner: owner.clone(),
                        });
                    }
                }
            }

            let target = category_dir.join(desc.subtree());
            let mut displaced: Option<(PathBuf, PathBuf)> = None;
            if let Some(previous) = registry.get_installed(&desc.identity) {
                // Updating: move the old subtree aside rather than deleting
                // it, so a failed commit can put it back.
                let old_subtree = category_dir.join(previous.descriptor.subtree());
                if old_subtree.exists() {
                    let aside = staging.path().join("replaced");
                    fs::rename(&old_subtree, &aside)?;
                    displaced = Some((aside, old_subtree));
                }
            } else if target.exists() {
                // Something unregistered sits where this addon wants to go.
                return Err(EngineError::PathConflict {
                    path: desc.subtree().to_string(),
                    owner: desc.identity.clone(),
                });
            }

            if let Err(e) = fs::rename(&staged_subtree, &target) {
                if let Some((aside, original)) = &displaced {
                    let _ = fs::rename(aside, original);
                }
                return Err(EngineError::FilesystemError(e));
            }
            // The displaced old version goes away with the staging dir.
            registry.record_installed(InstalledAddon::new(local.clone(), desc.files.clone()));
            debug!("installed {} into {}", desc.identity, target.display());
            Ok(())
        })
    }

    /// Deletes an addon's owned files and drops its registry entry. The
    /// startup hook dies with the entry: hooks are derived from the
    /// installed set.
    fn remove(&self, desc: &AddonDescriptor) -> Result<(), EngineError> {
        let category_dir = self.scan_root.join(desc.identity.category.dir_name());

        self.registry.write(|registry| {
            let Some(installed) = registry.get_installed(&desc.identity) else {
                // Already gone; removal is idempotent.
                return Ok(());
            };
            let owned = installed.owned_files.clone();
            let subtree = category_dir.join(installed.descriptor.subtree());

            for path in &owned {
                let absolute = category_dir.join(path);
                match fs::remove_file(&absolute) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(EngineError::FilesystemError(e)),
                }
            }

            let _ = fs::remove_file(subtree.join(COMPENDIUM_FILE));
            remove_empty_dirs(&subtree);

            registry.remove_installed(&desc.identity);
            debug!("removed {}", desc.identity);
            Ok(())
        })
    }
}

/// Extracts the zip payload under `dest` and verifies it produces exactly
/// the descriptor's file manifest.
fn extract_payload(
    desc: &AddonDescriptor,
    payload: &[u8],
    dest: &Path,
) -> Result<(), EngineError> {
    let download_err = |reason: String| EngineError::DownloadFailed {
        identity: desc.identity.clone(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(payload))
        .map_err(|e| download_err(format!("unreadable archive: {}", e)))?;

    let mut produced: BTreeSet<String> = BTreeSet::new();
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| download_err(format!("unreadable archive entry: {}", e)))?;

        // enclosed_name rejects absolute paths and `..` traversal.
        let Some(relative) = entry.enclosed_name() else {
            return Err(download_err(format!("unsafe archive path: {}", entry.name())));
        };

        if entry.is_dir() {
            fs::create_dir_all(dest.join(&relative))?;
            continue;
        }

        let out_path = dest.join(&relative);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        produced.insert(entry.name().trim_start_matches("./").to_string());
    }

    let expected: BTreeSet<String> = desc.files.iter().cloned().collect();
    if produced != expected {
        return Err(download_err("payload does not match file manifest".to_string()));
    }

    Ok(())
}

/// Prunes now-empty directories bottom-up, leaving user files alone.
fn remove_empty_dirs(root: &Path) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.path().is_dir() {
            remove_empty_dirs(&entry.path());
        }
    }
    let _ = fs::remove_dir(root);
}

/// Per-identity claim: concurrent installs of different addons may proceed,
/// a second install of the same identity is rejected.
struct InFlightGuard {
    set: Arc<Mutex<BTreeSet<AddonIdentity>>>,
    identity: AddonIdentity,
}

impl InFlightGuard {
    fn claim(
        set: &Arc<Mutex<BTreeSet<AddonIdentity>>>,
        identity: &AddonIdentity,
    ) -> Result<Self, EngineError> {
        let mut guard = set.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.insert(identity.clone()) {
            return Err(EngineError::ConcurrentModification(identity.clone()));
        }
        Ok(Self {
            set: Arc::clone(set),
            identity: identity.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut guard = self.set.lock().unwrap_or_else(|e| e.into_inner());
        guard.remove(&self.identity);
    }
}
