//! Plugin directory scanning.
//!
//! Each immediate subdirectory of the plugin root may hold a
//! `plugin-manifest.json`, or `plugin-manifest.json.block` for a plugin
//! that is installed but switched off. A bad manifest or a duplicate name
//! skips that one plugin; the scan always completes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::load_plugin_env;
use crate::error::PluginError;
use crate::manifest::{PluginManifest, plugin_dir};

pub const MANIFEST_FILE: &str = "plugin-manifest.json";
pub const DISABLED_SUFFIX: &str = ".block";

/// Result of scanning a plugin root.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Accepted manifests in directory-name order.
    pub manifests: Vec<PluginManifest>,
    /// Plugins that were skipped, with the reason.
    pub skipped: Vec<(PathBuf, PluginError)>,
}

/// Scan `root` for plugin manifests.
///
/// A missing root yields an empty report. Only a root that exists but
/// cannot be listed is an error.
pub fn load_manifests(root: &Path) -> std::io::Result<LoadReport> {
    let mut report = LoadReport::default();
    if !root.exists() {
        warn!(root = %root.display(), "plugin directory does not exist");
        return Ok(report);
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut seen = HashSet::new();
    for dir in dirs {
        let Some((path, enabled)) = find_manifest(&dir) else {
            debug!(dir = %dir.display(), "no manifest, skipping directory");
            continue;
        };

        match load_one(&path, enabled) {
            Ok(manifest) if !seen.insert(manifest.name.clone()) => {
                warn!(plugin = %manifest.name, path = %path.display(), "duplicate plugin name, skipping");
                report
                    .skipped
                    .push((path, PluginError::DuplicateName(manifest.name)));
            }
            Ok(manifest) => {
                info!(
                    plugin = %manifest.name,
                    kind = manifest.kind.as_str(),
                    enabled = manifest.enabled,
                    "loaded plugin manifest"
                );
                report.manifests.push(manifest);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping plugin");
                report.skipped.push((path, e));
            }
        }
    }
    Ok(report)
}

/// The active manifest, else the disabled variant.
fn find_manifest(dir: &Path) -> Option<(PathBuf, bool)> {
    let active = dir.join(MANIFEST_FILE);
    if active.is_file() {
        return Some((active, true));
    }
    let blocked = dir.join(format!("{MANIFEST_FILE}{DISABLED_SUFFIX}"));
    blocked.is_file().then_some((blocked, false))
}

/// Read, parse and validate one manifest file.
pub fn load_one(path: &Path, enabled: bool) -> Result<PluginManifest, PluginError> {
    let load_error = |reason: String| PluginError::LoadError {
        path: path.display().to_string(),
        reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let mut manifest: PluginManifest =
        serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))?;
    manifest.base_path = plugin_dir(path);
    manifest.enabled = enabled;
    manifest.validate()?;
    manifest.env_overrides = load_plugin_env(&manifest.base_path)
        .map_err(|e| load_error(format!("unreadable .env: {e}")))?;
    Ok(manifest)
}
