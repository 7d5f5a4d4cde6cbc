//! Addon descriptor parsing.
//!
//! Parses compendium documents (TOML) that describe one version of an addon:
//! identity, version, download location, dependencies, file manifest, and an
//! optional startup script. Parsing is pure: bytes in, validated model out,
//! no I/O and nothing resolved outside the document itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Addon category. Each category has its own directory subtree on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Gameplay plugin.
    Plugin,
    /// UI skin.
    Skin,
    /// Music package.
    Music,
}

impl Category {
    /// Returns the on-disk directory name for this category.
    #[must_use]
    pub fn dir_name(&self) -> &'static str {
        match self {
            Category::Plugin => "Plugins",
            Category::Skin => "Skins",
            Category::Music => "Music",
        }
    }

    /// All categories, in scan order.
    #[must_use]
    pub fn all() -> [Category; 3] {
        [Category::Plugin, Category::Skin, Category::Music]
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Plugin => write!(f, "plugin"),
            Category::Skin => write!(f, "skin"),
            Category::Music => write!(f, "music"),
        }
    }
}

/// Stable addon identity: the same (category, author, name) triple is the
/// same logical addon across versions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddonIdentity {
    /// Addon category.
    pub category: Category,
    /// Author or namespace.
    pub author: String,
    /// Canonical addon name.
    pub name: String,
}

impl AddonIdentity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(category: Category, author: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category,
            author: author.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for AddonIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.category, self.author, self.name)
    }
}

/// Addon version: semantic `major.minor.patch` when it parses as one,
/// otherwise an opaque string compared lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Version {
    raw: String,
    parts: Option<(u64, u64, u64)>,
}

impl Version {
    /// Parses a version string. Never fails: a string that is not a numeric
    /// `major.minor[.patch]` triple is kept verbatim and compared lexically.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let parts = parse_triple(raw.trim());
        Self {
            raw: raw.trim().to_string(),
            parts,
        }
    }

    /// Returns the raw version string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if this version parsed as a numeric triple.
    #[must_use]
    pub fn is_semantic(&self) -> bool {
        self.parts.is_some()
    }
}

/// Parses `major.minor` or `major.minor.patch`; missing patch is zero.
fn parse_triple(raw: &str) -> Option<(u64, u64, u64)> {
    let mut segments = raw.split('.');
    let major = segments.next()?.parse().ok()?;
    let minor = segments.next()?.parse().ok()?;
    let patch = match segments.next() {
        Some(p) => p.parse().ok()?,
        None => 0,
    };
    if segments.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.parts, other.parts) {
            // Raw string as final tie-break keeps Ord consistent with Eq
            // ("1.0" and "1.0.0" are distinct versions).
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.raw.cmp(&other.raw)),
            _ => self.raw.cmp(&other.raw),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl From<String> for Version {
    fn from(raw: String) -> Self {
        Version::parse(&raw)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One declared dependency edge: the dependency's identity plus an optional
/// minimum-version constraint (`None` accepts any version).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRef {
    /// Identity of the addon depended on.
    pub identity: AddonIdentity,
    /// Minimum acceptable version, if constrained.
    pub min_version: Option<Version>,
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.min_version {
            Some(v) => write!(f, "{}>={}", self.identity, v),
            None => write!(f, "{}", self.identity),
        }
    }
}

/// Where a descriptor came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Read from an installed addon subtree on disk.
    Local,
    /// Fetched from the remote catalog feed.
    Remote,
}

/// One version of an addon, as described by its compendium document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddonDescriptor {
    /// Stable identity.
    pub identity: AddonIdentity,
    /// This descriptor's version.
    pub version: Version,
    /// Payload download location.
    pub download_url: String,
    /// Declared dependencies, in document order.
    pub dependencies: Vec<DependencyRef>,
    /// Startup script entry point, relative to the addon root.
    pub startup_script: Option<String>,
    /// Relative paths this addon owns on disk.
    pub files: Vec<String>,
    /// Where this descriptor came from.
    pub provenance: Provenance,
}

impl AddonDescriptor {
    /// The addon's subtree directory under its category root. Validation
    /// guarantees every manifest path shares this first segment.
    #[must_use]
    pub fn subtree(&self) -> &str {
        self.files
            .first()
            .and_then(|f| f.split('/').next())
            .unwrap_or(&self.identity.name)
    }
}

/// Descriptor parse/validation failure, naming the offending field.
#[derive(Debug, Clone, Error)]
pub enum DescriptorError {
    /// Document is not valid UTF-8.
    #[error("descriptor is not valid UTF-8")]
    NotUtf8,
    /// Document is not well-formed TOML or has unknown fields.
    #[error("descriptor syntax: {0}")]
    Syntax(String),
    /// A field is present but invalid.
    #[error("descriptor field `{field}`: {reason}")]
    Field {
        /// Offending field name.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

fn field_err(field: &'static str, reason: impl Into<String>) -> DescriptorError {
    DescriptorError::Field {
        field,
        reason: reason.into(),
    }
}

/// Raw document layout. The schema is closed: unknown fields are rejected.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    addon: RawAddonSection,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAddonSection {
    category: Category,
    author: String,
    name: String,
    version: Version,
    download: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    startup_script: Option<String>,
    files: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependency {
    category: Category,
    author: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_version: Option<Version>,
}

/// Parses a compendium document into a validated descriptor.
///
/// Pure function: reads only the provided bytes, resolves nothing external.
pub fn parse_descriptor(
    bytes: &[u8],
    provenance: Provenance,
) -> Result<AddonDescriptor, DescriptorError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DescriptorError::NotUtf8)?;
    let raw: RawDescriptor =
        toml::from_str(text).map_err(|e| DescriptorError::Syntax(e.to_string()))?;
    validate(&raw)?;

    let identity = AddonIdentity::new(raw.addon.category, raw.addon.author, raw.addon.name);
    let dependencies = raw
        .dependencies
        .into_iter()
        .map(|d| DependencyRef {
            identity: AddonIdentity::new(d.category, d.author, d.name),
            min_version: d.min_version,
        })
        .collect();

    Ok(AddonDescriptor {
        identity,
        version: raw.addon.version,
        download_url: raw.addon.download,
        dependencies,
        startup_script: raw.addon.startup_script,
        files: raw.addon.files,
        provenance,
    })
}

/// Serializes a validated descriptor back to a compendium document.
pub fn to_toml(descriptor: &AddonDescriptor) -> Result<String, DescriptorError> {
    let raw = RawDescriptor {
        addon: RawAddonSection {
            category: descriptor.identity.category,
            author: descriptor.identity.author.clone(),
            name: descriptor.identity.name.clone(),
            version: descriptor.version.clone(),
            download: descriptor.download_url.clone(),
            startup_script: descriptor.startup_script.clone(),
            files: descriptor.files.clone(),
        },
        dependencies: descriptor
            .dependencies
            .iter()
            .map(|d| RawDependency {
                category: d.identity.category,
                author: d.identity.author.clone(),
                name: d.identity.name.clone(),
                min_version: d.min_version.clone(),
            })
            .collect(),
    };
    toml::to_string(&raw).map_err(|e| DescriptorError::Syntax(e.to_string()))
}

/// Validates required fields and path safety.
fn validate(raw: &RawDescriptor) -> Result<(), DescriptorError> {
    if raw.addon.name.trim().is_empty() {
        return Err(field_err("addon.name", "must not be empty"));
    }
    if raw.addon.author.trim().is_empty() {
        return Err(field_err("addon.author", "must not be empty"));
    }
    if raw.addon.version.as_str().is_empty() {
        return Err(field_err("addon.version", "must not be empty"));
    }
    if raw.addon.download.trim().is_empty() {
        return Err(field_err("addon.download", "must not be empty"));
    }
    if raw.addon.files.is_empty() {
        return Err(field_err("files", "manifest must list at least one path"));
    }

    for path in &raw.addon.files {
        if !is_safe_relative(path) {
            return Err(field_err(
                "files",
                format!("unsafe manifest path: {}", path),
            ));
        }
    }

    // One subtree per addon: every manifest path lives under the same
    // top-level directory.
    let mut roots = raw.addon.files.iter().filter_map(|f| f.split('/').next());
    if let Some(first) = roots.next() {
        if roots.any(|r| r != first) {
            return Err(field_err(
                "files",
                "manifest paths must share a single top-level directory",
            ));
        }
        if !raw.addon.files.iter().all(|f| f.contains('/')) {
            return Err(field_err(
                "files",
                "manifest paths must be inside the addon subtree",
            ));
        }
    }

    if let Some(script) = &raw.addon.startup_script {
        if !is_safe_relative(script) {
            return Err(field_err(
                "addon.startup_script",
                format!("unsafe script path: {}", script),
            ));
        }
        if !raw.addon.files.iter().any(|f| f == script) {
            return Err(field_err(
                "addon.startup_script",
                "script must appear in the file manifest",
            ));
        }
    }

    for dep in &raw.dependencies {
        if dep.name.trim().is_empty() {
            return Err(field_err("dependencies.name", "must not be empty"));
        }
        if dep.author.trim().is_empty() {
            return Err(field_err("dependencies.author", "must not be empty"));
        }
    }

    Ok(())
}

/// Accepts only forward-slash relative paths that stay inside the addon root.
fn is_safe_relative(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains(':') {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}
