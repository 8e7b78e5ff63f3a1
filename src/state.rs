//! Persisted installation state: markers, installed-files manifests and the
//! per-tool metadata mirror.
//!
//! A marker's mere existence at `<cache>/<name>/<version>` means that exact
//! version was installed by this engine. The manifest is the newline list of
//! destination paths written during install; it is the sole driver of
//! reversible uninstall.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::types::Tool;
use std::fs;
use std::path::PathBuf;

pub fn marker_path(paths: &Paths, name: &str, version: &str) -> PathBuf {
    paths.cache_dir().join(name).join(version)
}

pub fn marker_exists(paths: &Paths, tool: &Tool) -> bool {
    marker_path(paths, &tool.name, &tool.version).exists()
}

pub fn write_marker(paths: &Paths, tool: &Tool) -> Result<()> {
    let path = marker_path(paths, &tool.name, &tool.version);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::state(&tool.name, format!("create marker dir: {e}")))?;
    }
    fs::write(&path, b"")
        .map_err(|e| Error::state(&tool.name, format!("write marker: {e}")))?;
    tracing::debug!("Wrote marker {}", path.display());
    Ok(())
}

/// Remove every marker recorded for `name`, tolerating absence.
pub fn remove_markers(paths: &Paths, name: &str) -> Result<()> {
    let dir = paths.cache_dir().join(name);
    match fs::remove_dir_all(&dir) {
        Ok(()) => {
            tracing::debug!("Removed markers under {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::state(name, format!("remove markers: {e}"))),
    }
}

pub fn manifest_path(paths: &Paths, name: &str) -> PathBuf {
    paths.manifests_dir().join(format!("{name}.txt"))
}

pub fn metadata_mirror_path(paths: &Paths, name: &str) -> PathBuf {
    paths.manifests_dir().join(format!("{name}.json"))
}

/// Record the installed-files manifest and the metadata mirror.
pub fn write_manifest(paths: &Paths, tool: &Tool, files: &[String]) -> Result<()> {
    let dir = paths.manifests_dir();
    fs::create_dir_all(&dir)
        .map_err(|e| Error::state(&tool.name, format!("create manifests dir: {e}")))?;

    let mut body = files.join("\n");
    body.push('\n');
    fs::write(manifest_path(paths, &tool.name), body)
        .map_err(|e| Error::state(&tool.name, format!("write manifest: {e}")))?;

    let mirror = serde_json::to_vec_pretty(tool)
        .map_err(|e| Error::state(&tool.name, format!("encode metadata mirror: {e}")))?;
    fs::write(metadata_mirror_path(paths, &tool.name), mirror)
        .map_err(|e| Error::state(&tool.name, format!("write metadata mirror: {e}")))?;
    Ok(())
}

/// The manifest's listed paths, or `None` when no manifest was recorded
/// (which downgrades uninstall to marker cleanup only).
pub fn read_manifest(paths: &Paths, name: &str) -> Result<Option<Vec<String>>> {
    let path = manifest_path(paths, name);
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).map_err(|e| Error::state(name, format!("read manifest: {e}")))?;
    Ok(Some(
        content
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

pub fn remove_manifest(paths: &Paths, name: &str) -> Result<()> {
    for path in [manifest_path(paths, name), metadata_mirror_path(paths, name)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::state(name, format!("remove {}: {e}", path.display()))),
        }
    }
    Ok(())
}
