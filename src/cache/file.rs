//! Local-file-backed cache: layers persisted under the cache root, keyed by
//! `(name, version)`, warmed through the pass-through registry fetch.

use crate::cache::{registry::RegistryClient, ArtifactCache};
use crate::config::Paths;
use crate::error::{Error, Result};
use crate::types::ToolIdentity;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::PathBuf;
use walkdir::WalkDir;

pub const DOWNLOADS_DIR: &str = "downloads";

pub struct FileCache {
    root: PathBuf,
    client: Box<dyn ArtifactCache>,
}

impl FileCache {
    pub fn new(paths: &Paths) -> Self {
        Self::with_client(paths, Box::new(RegistryClient::new()))
    }

    /// Same cache layout over a different upstream fetcher.
    pub fn with_client(paths: &Paths, client: Box<dyn ArtifactCache>) -> Self {
        Self {
            root: paths.cache_dir().join(DOWNLOADS_DIR),
            client,
        }
    }

    fn entry_path(&self, id: &ToolIdentity) -> PathBuf {
        self.root
            .join(&id.name)
            .join(&id.version)
            .join("layer.tar")
    }

    /// Remove cache entries older than `max_age`. Runs as a separate
    /// maintenance path, never from `get`.
    pub fn prune(&self, max_age: Duration) -> Result<usize> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .map(DateTime::<Utc>::from);
            if let Some(modified) = modified {
                if modified < cutoff {
                    tracing::debug!("Pruning {}", entry.path().display());
                    fs::remove_file(entry.path())?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl ArtifactCache for FileCache {
    async fn get(&self, id: &ToolIdentity) -> Result<Vec<u8>> {
        let path = self.entry_path(id);

        if path.exists() {
            tracing::debug!("Cache hit for {} at {}", id, path.display());
            return Ok(fs::read(&path)?);
        }

        tracing::debug!("Cache miss for {}, fetching upstream", id);
        let bytes = self.client.get(id).await?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &bytes)?;
        Ok(bytes)
    }

    fn remove_entries(&self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!("Removed cache entries under {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::state(name, format!("remove cache entries: {e}"))),
        }
    }
}
