//! Pluggable artifact cache: every backend answers "given a tool identity,
//! return the decompressed tar bytes of its first image layer".
//!
//! All backends must produce byte-identical content for the same
//! `(name, version)` regardless of which backend is selected.

pub mod daemon;
pub mod file;
pub mod registry;

use crate::config::Paths;
use crate::error::Result;
use crate::types::ToolIdentity;
use async_trait::async_trait;

#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// Decompressed tar bytes of the artifact layer for `id`.
    async fn get(&self, id: &ToolIdentity) -> Result<Vec<u8>>;

    /// Drop any cached entries for one tool; a no-op for backends without
    /// local persistence.
    fn remove_entries(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Which backend serves artifact fetches, selected once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BackendKind {
    /// Fetch from the registry on every call; no persistence.
    None,
    /// Persist layers under the cache root, keyed by name and version.
    #[default]
    File,
    /// Use the local Docker daemon's image store.
    Docker,
    /// Use the local containerd image store.
    Containerd,
}

pub fn create(kind: BackendKind, paths: &Paths) -> Box<dyn ArtifactCache> {
    match kind {
        BackendKind::None => Box::new(registry::RegistryClient::new()),
        BackendKind::File => Box::new(file::FileCache::new(paths)),
        BackendKind::Docker => Box::new(daemon::DaemonCache::docker()),
        BackendKind::Containerd => Box::new(daemon::DaemonCache::containerd()),
    }
}

/// Decompress a layer blob when it is gzip-compressed, pass it through
/// otherwise. Registries and daemon exports differ here; callers always see
/// plain tar bytes.
pub(crate) fn decompress_layer(bytes: Vec<u8>) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = flate2::read::GzDecoder::new(&bytes[..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        Ok(out)
    } else {
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn gzip_layers_are_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"tar bytes").unwrap();
        let compressed = encoder.finish().unwrap();

        assert_eq!(decompress_layer(compressed).unwrap(), b"tar bytes");
    }

    #[test]
    fn plain_layers_pass_through() {
        assert_eq!(decompress_layer(b"plain".to_vec()).unwrap(), b"plain");
    }
}
