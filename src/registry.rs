//! Addon registry.
//!
//! Single owner of addon metadata: the installed set (scanned from disk) and
//! the available index (merged from the remote catalog). Collaborators read
//! snapshots; all mutation goes through one serialized writer handle.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use crate::descriptor::{
    self, AddonDescriptor, AddonIdentity, Category, DescriptorError, Provenance,
};

/// Descriptor file name, one per installed addon subtree.
pub const COMPENDIUM_FILE: &str = "compendium.toml";

/// An addon present on disk: its descriptor plus what it actually placed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAddon {
    /// The descriptor the addon was installed from.
    pub descriptor: AddonDescriptor,
    /// Installation timestamp (Unix epoch seconds).
    pub installed_at: i64,
    /// Relative paths (under the category root) this addon placed.
    pub owned_files: Vec<String>,
}

impl InstalledAddon {
    /// Creates an installed record from a descriptor, stamped now.
    #[must_use]
    pub fn new(descriptor: AddonDescriptor, owned_files: Vec<String>) -> Self {
        Self {
            descriptor,
            installed_at: chrono::Utc::now().timestamp(),
            owned_files,
        }
    }

    /// Identity shorthand.
    #[must_use]
    pub fn identity(&self) -> &AddonIdentity {
        &self.descriptor.identity
    }
}

/// Outcome of a disk scan: how many loaded, which subtrees were skipped.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Number of addons loaded into the installed set.
    pub loaded: usize,
    /// Subtrees whose descriptor failed to parse, with the parse error.
    pub skipped: Vec<(PathBuf, DescriptorError)>,
}

/// The authoritative in-memory set of known addons.
#[derive(Debug, Clone, Default)]
pub struct AddonRegistry {
    /// Installed addons, in insertion order.
    installed: Vec<InstalledAddon>,
    /// Best available descriptor per identity per provenance.
    available: BTreeMap<AddonIdentity, Vec<AddonDescriptor>>,
}

impl AddonRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks the addon directories under `scan_root` (one subtree per
    /// category, one descriptor per addon subtree) and rebuilds the
    /// installed set.
    ///
    /// A subtree whose descriptor fails to parse is skipped and reported,
    /// never fatal: one corrupt addon must not block the rest.
    pub fn load_installed(&mut self, scan_root: &Path) -> LoadReport {
        self.installed.clear();
        let mut report = LoadReport::default();

        for category in Category::all() {
            let category_dir = scan_root.join(category.dir_name());
            let entries = match fs::read_dir(&category_dir) {
                Ok(e) => e,
                Err(_) => continue, // category root absent: nothing installed
            };

            let mut subdirs: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect();
            subdirs.sort();

            for subdir in subdirs {
                let compendium = subdir.join(COMPENDIUM_FILE);
                let bytes = match fs::read(&compendium) {
                    Ok(b) => b,
                    Err(e) => {
                        debug!("No readable descriptor in {}: {}", subdir.display(), e);
                        continue;
                    }
                };

                match descriptor::parse_descriptor(&bytes, Provenance::Local) {
                    Ok(desc) => {
                        if desc.identity.category != category {
                            warn!(
                                "Skipping {}: descriptor claims category {} inside {}",
                                subdir.display(),
                                desc.identity.category,
                                category.dir_name()
                            );
                            continue;
                        }
                        if self.get_installed(&desc.identity).is_some() {
                            warn!(
                                "Skipping {}: identity {} already loaded",
                                subdir.display(),
                                desc.identity
                            );
                            continue;
                        }
                        if let Some(owner) = self.first_owned_conflict(&desc) {
                            warn!(
                                "Skipping {}: file ownership overlaps installed addon {}",
                                subdir.display(),
                                owner
                            );
                            continue;
                        }

                        let installed_at = fs::metadata(&compendium)
                            .and_then(|m| m.modified())
                            .ok()
                            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                            .map(|d| d.as_secs() as i64)
                            .unwrap_or_else(|| chrono::Utc::now().timestamp());

                        let owned_files = desc.files.clone();
                        self.installed.push(InstalledAddon {
                            descriptor: desc,
                            installed_at,
                            owned_files,
                        });
                        report.loaded += 1;
                    }
                    Err(e) => {
                        warn!("Skipping {}: {}", subdir.display(), e);
                        report.skipped.push((subdir, e));
                    }
                }
            }
        }

        debug!(
            "Registry scan: {} installed, {} skipped",
            report.loaded,
            report.skipped.len()
        );
        report
    }

    /// Merges freshly parsed remote descriptors into the available index,
    /// keeping only the highest version per identity per provenance.
    pub fn merge_remote_catalog(&mut self, entries: impl IntoIterator<Item = AddonDescriptor>) {
        for entry in entries {
            let versions = self.available.entry(entry.identity.clone()).or_default();
            match versions
                .iter_mut()
                .find(|d| d.provenance == entry.provenance)
            {
                Some(existing) => {
                    if entry.version > existing.version {
                        *existing = entry;
                    }
                }
                None => versions.push(entry),
            }
        }
    }

    /// Parses raw catalog blobs and merges the valid ones. Malformed entries
    /// are skipped with a warning, mirroring the disk-scan policy.
    pub fn ingest_remote_catalog<I, B>(&mut self, blobs: I) -> usize
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut merged = 0;
        for blob in blobs {
            match descriptor::parse_descriptor(blob.as_ref(), Provenance::Remote) {
                Ok(desc) => {
                    self.merge_remote_catalog([desc]);
                    merged += 1;
                }
                Err(e) => warn!("Skipping malformed catalog entry: {}", e),
            }
        }
        merged
    }

    /// Read-only lookup: the installed record (if any) and every available
    /// descriptor known for the identity.
    #[must_use]
    pub fn lookup(&self, identity: &AddonIdentity) -> (Option<&InstalledAddon>, Vec<&AddonDescriptor>) {
        let available = self
            .available
            .get(identity)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        (self.get_installed(identity), available)
    }

    /// Returns the installed record for an identity.
    #[must_use]
    pub fn get_installed(&self, identity: &AddonIdentity) -> Option<&InstalledAddon> {
        self.installed.iter().find(|a| a.identity() == identity)
    }

    /// Installed addons in insertion order.
    #[must_use]
    pub fn installed(&self) -> &[InstalledAddon] {
        &self.installed
    }

    /// Returns the identity of the installed addon owning `path` within
    /// `category`, if any.
    #[must_use]
    pub fn owner_of(&self, category: Category, path: &str) -> Option<&AddonIdentity> {
        self.installed
            .iter()
            .find(|a| {
                a.identity().category == category && a.owned_files.iter().any(|f| f == path)
            })
            .map(|a| a.identity())
    }

    /// Records a freshly committed install, replacing any previous record
    /// for the same identity.
    pub fn record_installed(&mut self, addon: InstalledAddon) {
        self.installed
            .retain(|a| a.identity() != addon.identity());
        self.installed.push(addon);
    }

    /// Drops the installed record for an identity, returning it.
    pub fn remove_installed(&mut self, identity: &AddonIdentity) -> Option<InstalledAddon> {
        let pos = self.installed.iter().position(|a| a.identity() == identity)?;
        Some(self.installed.remove(pos))
    }

    /// First installed addon whose owned files overlap the descriptor's
    /// manifest (same category, same relative path).
    fn first_owned_conflict(&self, desc: &AddonDescriptor) -> Option<&AddonIdentity> {
        desc.files
            .iter()
            .find_map(|f| self.owner_of(desc.identity.category, f))
            .filter(|owner| **owner != desc.identity)
    }
}

/// Shared registry handle: concurrent readers, serialized writers.
#[derive(Debug, Clone, Default)]
pub struct SharedRegistry {
    inner: Arc<RwLock<AddonRegistry>>,
}

impl SharedRegistry {
    /// Wraps a registry in a shared handle.
    #[must_use]
    pub fn new(registry: AddonRegistry) -> Self {
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Runs a closure against the registry read-locked.
    pub fn read<R>(&self, f: impl FnOnce(&AddonRegistry) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Runs a closure against the registry write-locked.
    pub fn write<R>(&self, f: impl FnOnce(&mut AddonRegistry) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Clones the current registry state for resolution against a stable
    /// snapshot. The engine re-validates at commit time (state may drift).
    #[must_use]
    pub fn snapshot(&self) -> AddonRegistry {
        self.read(|r| r.clone())
    }
}
