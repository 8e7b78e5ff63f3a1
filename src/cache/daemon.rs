//! Daemon-backed cache: treats a local container runtime's image store as
//! the cache. Missing images are pulled; the artifact layer is then carved
//! out of the daemon's exported image bundle by matching the manifest's
//! first-layer digest.

use crate::cache::{decompress_layer, ArtifactCache};
use crate::error::{Error, Result};
use crate::shell::{Shell, SystemShell};
use crate::types::ToolIdentity;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonKind {
    Docker,
    Containerd,
}

pub struct DaemonCache {
    kind: DaemonKind,
    shell: Box<dyn Shell>,
}

impl DaemonCache {
    pub fn docker() -> Self {
        Self {
            kind: DaemonKind::Docker,
            shell: Box::new(SystemShell),
        }
    }

    pub fn containerd() -> Self {
        Self {
            kind: DaemonKind::Containerd,
            shell: Box::new(SystemShell),
        }
    }

    /// Pull the image unless the daemon's store already has it.
    fn ensure_image(&self, reference: &str, tool: &str) -> Result<()> {
        let present = match self.kind {
            DaemonKind::Docker => self
                .shell
                .run(&format!("docker image inspect {reference} --format ok"))
                .is_ok(),
            DaemonKind::Containerd => self
                .shell
                .run(&format!("ctr image ls -q name=={reference}"))
                .map(|out| !out.is_empty())
                .unwrap_or(false),
        };

        if present {
            tracing::debug!("Image {} already in daemon store", reference);
            return Ok(());
        }

        tracing::info!("Pulling {} into daemon store", reference);
        let pull = match self.kind {
            DaemonKind::Docker => format!("docker pull --quiet {reference}"),
            DaemonKind::Containerd => format!("ctr image pull {reference}"),
        };
        self.shell
            .run(&pull)
            .map_err(|e| Error::fetch_failure(tool, e.to_string()))?;
        Ok(())
    }

    fn export_bundle(&self, reference: &str, dest: &Path, tool: &str) -> Result<()> {
        let command = match self.kind {
            DaemonKind::Docker => format!("docker save {reference} -o {}", dest.display()),
            DaemonKind::Containerd => format!("ctr image export {} {reference}", dest.display()),
        };
        self.shell
            .run(&command)
            .map_err(|e| Error::fetch_failure(tool, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactCache for DaemonCache {
    async fn get(&self, id: &ToolIdentity) -> Result<Vec<u8>> {
        let reference = id.reference();
        self.ensure_image(&reference, &id.name)?;

        let temp = tempfile::TempDir::new()?;
        let bundle = temp.path().join("bundle.tar");
        self.export_bundle(&reference, &bundle, &id.name)?;

        let file = std::fs::File::open(&bundle)?;
        let bytes = first_layer_from_bundle(file, &id.name)?;
        decompress_layer(bytes)
            .map_err(|e| Error::fetch_failure(&id.name, format!("decompress layer: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct OciIndex {
    manifests: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OciDescriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct OciManifest {
    layers: Vec<OciDescriptor>,
}

/// `docker save` legacy bundle shape.
#[derive(Debug, Deserialize)]
struct DockerManifestEntry {
    #[serde(rename = "Layers")]
    layers: Vec<String>,
}

/// Locate the first filesystem layer inside an exported image bundle.
///
/// Bundles come in two shapes: OCI layout (`index.json` plus content-addressed
/// blobs) from containerd and recent Docker, and the legacy `docker save`
/// shape (`manifest.json` listing layer paths directly).
pub(crate) fn first_layer_from_bundle<R: Read>(reader: R, tool: &str) -> Result<Vec<u8>> {
    let mut entries: HashMap<String, Vec<u8>> = HashMap::new();
    let mut archive = tar::Archive::new(reader);
    for entry in archive
        .entries()
        .map_err(|e| Error::fetch_failure(tool, format!("malformed bundle: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| Error::fetch_failure(tool, format!("malformed bundle: {e}")))?;
        let name = entry
            .path()
            .map_err(|e| Error::fetch_failure(tool, e.to_string()))?
            .to_string_lossy()
            .trim_start_matches("./")
            .to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        entries.insert(name, bytes);
    }

    if let Some(index) = entries.get("index.json") {
        let index: OciIndex = serde_json::from_slice(index)
            .map_err(|e| Error::fetch_failure(tool, format!("parse index.json: {e}")))?;
        let manifest_digest = index
            .manifests
            .first()
            .ok_or_else(|| Error::fetch_failure(tool, "bundle index has no manifests"))?;
        let manifest_bytes = entries
            .get(&blob_key(&manifest_digest.digest))
            .ok_or_else(|| Error::fetch_failure(tool, "manifest blob missing from bundle"))?;

        // The first manifest may itself be an index (nested platform list).
        let manifest: OciManifest = match serde_json::from_slice(manifest_bytes) {
            Ok(manifest) => manifest,
            Err(_) => {
                let nested: OciIndex = serde_json::from_slice(manifest_bytes)
                    .map_err(|e| Error::fetch_failure(tool, format!("parse manifest: {e}")))?;
                let digest = nested
                    .manifests
                    .first()
                    .ok_or_else(|| Error::fetch_failure(tool, "nested index has no manifests"))?;
                let bytes = entries
                    .get(&blob_key(&digest.digest))
                    .ok_or_else(|| Error::fetch_failure(tool, "manifest blob missing"))?;
                serde_json::from_slice(bytes)
                    .map_err(|e| Error::fetch_failure(tool, format!("parse manifest: {e}")))?
            }
        };

        let layer = manifest
            .layers
            .first()
            .ok_or_else(|| Error::fetch_failure(tool, "image has no layers"))?;
        return entries
            .get(&blob_key(&layer.digest))
            .cloned()
            .ok_or_else(|| Error::fetch_failure(tool, "layer blob missing from bundle"));
    }

    if let Some(manifest) = entries.get("manifest.json") {
        let manifest: Vec<DockerManifestEntry> = serde_json::from_slice(manifest)
            .map_err(|e| Error::fetch_failure(tool, format!("parse manifest.json: {e}")))?;
        let layer_path = manifest
            .first()
            .and_then(|m| m.layers.first())
            .ok_or_else(|| Error::fetch_failure(tool, "bundle manifest has no layers"))?;
        return entries
            .get(layer_path.as_str())
            .cloned()
            .ok_or_else(|| Error::fetch_failure(tool, "layer missing from bundle"));
    }

    Err(Error::fetch_failure(
        tool,
        "bundle carries neither index.json nor manifest.json",
    ))
}

fn blob_key(digest: &str) -> String {
    match digest.split_once(':') {
        Some((algo, hex)) => format!("blobs/{algo}/{hex}"),
        None => format!("blobs/sha256/{digest}"),
    }
}
