//! Startup script bookkeeping.
//!
//! Installed addons may declare a startup script the launcher runs at game
//! start. This module only tracks them: hooks are derived from the installed
//! set on demand, so removing an addon revokes its hook atomically with the
//! registry update. Execution is the launch collaborator's job, inside
//! whatever sandbox it grants; script content comes from third-party addon
//! authors and is never trusted here.

use std::path::PathBuf;

use crate::descriptor::AddonIdentity;
use crate::registry::{AddonRegistry, InstalledAddon};

/// Opaque handle to one addon's startup script. A path plus a declared
/// entry point; never executed by this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandle {
    /// Addon that declared the script.
    pub identity: AddonIdentity,
    /// Script path relative to the addon's category root.
    pub path: PathBuf,
    /// Declared entry point (the manifest-relative script file).
    pub entry_point: String,
}

/// Returns one handle per installed addon that declares a startup script,
/// in registry insertion order.
#[must_use]
pub fn hooks_for(registry: &AddonRegistry) -> Vec<ScriptHandle> {
    registry
        .installed()
        .iter()
        .filter_map(hook_for)
        .collect()
}

fn hook_for(addon: &InstalledAddon) -> Option<ScriptHandle> {
    let entry = addon.descriptor.startup_script.as_ref()?;
    Some(ScriptHandle {
        identity: addon.identity().clone(),
        path: PathBuf::from(addon.descriptor.identity.category.dir_name()).join(entry),
        entry_point: entry.clone(),
    })
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::descriptor::{Provenance, parse_descriptor};

    fn installed(name: &str, script: Option<&str>) -> InstalledAddon {
        let script_line = script
            .map(|s| format!("startup_script = \"{name}/{s}\"\n"))
            .unwrap_or_default();
        let files = script
            .map(|s| format!("\"{name}/{s}\", \"{name}/main.lua\""))
            .unwrap_or_else(|| format!("\"{name}/main.lua\""));
        let doc = format!(
            r#"
[addon]
category = "plugin"
author = "Author"
name = "{name}"
version = "1.0.0"
download = "https://example.invalid/{name}.zip"
{script_line}files = [{files}]
"#
        );
        let desc = parse_descriptor(doc.as_bytes(), Provenance::Local).expect("descriptor");
        let owned = desc.files.clone();
        InstalledAddon::new(desc, owned)
    }

    #[test]
    fn test_hooks_in_insertion_order() {
        let mut registry = AddonRegistry::new();
        registry.record_installed(installed("Zulu", Some("boot.lua")));
        registry.record_installed(installed("Alpha", Some("start.lua")));
        registry.record_installed(installed("Quiet", None));

        let hooks = hooks_for(&registry);
        assert_eq!(hooks.len(), 2);
        // Insertion order, not lexical order.
        assert_eq!(hooks[0].identity.name, "Zulu");
        assert_eq!(hooks[1].identity.name, "Alpha");
        assert_eq!(hooks[0].entry_point, "Zulu/boot.lua");
        assert_eq!(hooks[0].path, PathBuf::from("Plugins/Zulu/boot.lua"));
    }

    #[test]
    fn test_hook_revoked_with_removal() {
        let mut registry = AddonRegistry::new();
        let addon = installed("Zulu", Some("boot.lua"));
        let identity = addon.identity().clone();
        registry.record_installed(addon);
        assert_eq!(hooks_for(&registry).len(), 1);

        registry.remove_installed(&identity);
        assert!(hooks_for(&registry).is_empty());
    }
}
