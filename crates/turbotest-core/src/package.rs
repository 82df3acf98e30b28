//! Package boundary detection.
//!
//! A package is a directory whose `package.json` parses and carries a
//! non-empty `name`. Every failure to establish that is treated as "no package
//! here" and only logged.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Manifest file consulted for package identity.
pub const MANIFEST_FILE: &str = "package.json";

/// A package owning some set of test files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DetectedPackage {
    /// Package name from package.json.
    pub name: String,
    /// Directory containing the manifest.
    pub path: PathBuf,
}

/// Read and parse the manifest in `dir`, if any.
fn read_manifest(dir: &Path) -> Option<Value> {
    let manifest = dir.join(MANIFEST_FILE);
    let content = match std::fs::read_to_string(&manifest) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %manifest.display(), error = %e, "Failed to read manifest");
            }
            return None;
        }
    };

    match serde_json::from_str::<Value>(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(path = %manifest.display(), error = %e, "Malformed manifest");
            None
        }
    }
}

/// Detect a package rooted exactly at `path`.
///
/// Returns `None` when the manifest is missing, malformed, or has no name.
#[must_use]
pub fn detect_package_from_path(path: &Path) -> Option<DetectedPackage> {
    let manifest = read_manifest(path)?;
    let name = manifest.get("name").and_then(Value::as_str).unwrap_or("");
    if name.is_empty() {
        debug!(path = %path.display(), "Manifest has no name");
        return None;
    }

    Some(DetectedPackage {
        name: name.to_string(),
        path: path.to_path_buf(),
    })
}

/// Detect the package owning `file` by walking up from its directory.
///
/// The walk stops at the first directory with a valid manifest, at
/// `workspace_root` (which is still tested), or at the filesystem root.
#[must_use]
pub fn detect_package_from_file(
    file: &Path,
    workspace_root: Option<&Path>,
) -> Option<DetectedPackage> {
    let mut current = file.parent()?.to_path_buf();

    loop {
        if let Some(pkg) = detect_package_from_path(&current) {
            return Some(pkg);
        }

        if workspace_root.is_some_and(|root| current.as_path() == root) {
            return None;
        }

        if !current.pop() {
            return None;
        }
    }
}

/// Discover the packages declared by the `workspaces` field of the manifest
/// at `root`.
///
/// Supports both the array form and the yarn-style `{ "packages": [...] }`
/// form. Results are ordered by package name; the first directory wins when
/// two share a name.
#[must_use]
pub fn detect_workspace_packages(root: &Path) -> Vec<DetectedPackage> {
    let Some(manifest) = read_manifest(root) else {
        return Vec::new();
    };

    let patterns: Vec<&str> = match manifest.get("workspaces") {
        Some(Value::Array(arr)) => arr.iter().filter_map(Value::as_str).collect(),
        Some(Value::Object(obj)) => obj
            .get("packages")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default(),
        _ => return Vec::new(),
    };

    let mut packages: BTreeMap<String, DetectedPackage> = BTreeMap::new();
    for pattern in patterns {
        let full_pattern = root.join(pattern);
        let entries = match glob::glob(&full_pattern.to_string_lossy()) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(pattern, error = %e, "Invalid workspace pattern");
                continue;
            }
        };

        for entry in entries.flatten() {
            if !entry.is_dir() {
                continue;
            }
            if let Some(pkg) = detect_package_from_path(&entry) {
                packages.entry(pkg.name.clone()).or_insert(pkg);
            }
        }
    }

    packages.into_values().collect()
}
