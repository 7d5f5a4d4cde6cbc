//! Addon subsystem configuration.
//!
//! Where the addon tree lives and which catalog feed to pull from.
//! Persisted as `outfitter.toml` in the launcher data directory; missing or
//! unreadable settings fall back to defaults rather than failing startup.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default catalog feed index.
pub const DEFAULT_FEED_URL: &str = "https://addons.outfitter.dev/catalog/index.txt";

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "outfitter.toml";

/// Returns the launcher data directory (~/.outfitter).
#[must_use]
pub fn outfitter_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".outfitter"))
}

/// Returns the default addon tree root (~/.outfitter/addons), with one
/// subtree per category underneath.
#[must_use]
pub fn default_addon_root() -> Option<PathBuf> {
    outfitter_dir().map(|d| d.join("addons"))
}

/// Persisted addon settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonSettings {
    /// Root of the addon directory tree. `None` uses the default.
    pub addon_root: Option<PathBuf>,
    /// Catalog feed index URL.
    pub feed_url: String,
}

impl Default for AddonSettings {
    fn default() -> Self {
        Self {
            addon_root: None,
            feed_url: DEFAULT_FEED_URL.to_string(),
        }
    }
}

impl AddonSettings {
    /// Loads settings from a file, falling back to defaults on any problem.
    /// A corrupt settings file must never block the launcher.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => return Self::default(),
        };
        match toml::from_str(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring corrupt settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Writes settings back to a file.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)
    }

    /// The effective addon root, explicit or default.
    #[must_use]
    pub fn addon_root(&self) -> Option<PathBuf> {
        self.addon_root.clone().or_else(default_addon_root)
    }
}
