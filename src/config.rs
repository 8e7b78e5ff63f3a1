use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const PROJECT_NAME: &str = "toolpak";
pub const METADATA_FILE_NAME: &str = "metadata.json";
pub const DEFAULT_REGISTRY: &str = "ghcr.io";
pub const DEFAULT_REPOSITORY: &str = "toolpak/tools";

/// Resolved installation-mode configuration: where binaries, markers,
/// manifests and cached artifacts live. Built once per run and read-only
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paths {
    /// Directory tool files are installed under (`/usr/local` or `~/.local`).
    pub target: PathBuf,
    /// Root for markers and cached artifacts (`/var/cache` or XDG cache).
    pub cache_root: PathBuf,
    /// Root for manifests and metadata (`/var/lib` or XDG state).
    pub lib_root: PathBuf,
    /// An extra filesystem prefix everything above is nested under.
    /// Non-empty means post-install integration is deferred (see install.rs).
    pub prefix: PathBuf,
    /// Per-user installation instead of system-wide.
    pub user: bool,
    /// Registry host artifacts are pulled from.
    pub registry: String,
    /// Repository namespace under the registry.
    pub repository: String,
}

impl Paths {
    /// System-wide layout rooted at `/usr/local`.
    pub fn system() -> Self {
        Self {
            target: PathBuf::from("/usr/local"),
            cache_root: PathBuf::from("/var/cache"),
            lib_root: PathBuf::from("/var/lib"),
            prefix: PathBuf::new(),
            user: false,
            registry: DEFAULT_REGISTRY.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
        }
    }

    /// Per-user layout under `~/.local` and the XDG cache/state dirs.
    pub fn user() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            target: home.join(".local"),
            cache_root: dirs::cache_dir().unwrap_or_else(|| home.join(".cache")),
            lib_root: dirs::state_dir().unwrap_or_else(|| home.join(".local/state")),
            prefix: PathBuf::new(),
            user: true,
            registry: DEFAULT_REGISTRY.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
        }
    }

    /// Layout selection plus `TOOLPAK_*` environment overrides.
    pub fn from_env(user: bool, prefix: Option<PathBuf>) -> Self {
        let mut paths = if user { Self::user() } else { Self::system() };

        if let Some(prefix) = prefix {
            paths.prefix = prefix;
        }
        if let Ok(target) = std::env::var("TOOLPAK_TARGET") {
            paths.target = PathBuf::from(target);
        }
        if let Ok(cache) = std::env::var("TOOLPAK_CACHE_ROOT") {
            paths.cache_root = PathBuf::from(cache);
        }
        if let Ok(lib) = std::env::var("TOOLPAK_LIB_ROOT") {
            paths.lib_root = PathBuf::from(lib);
        }
        if let Ok(registry) = std::env::var("TOOLPAK_REGISTRY") {
            paths.registry = registry;
        }
        if let Ok(repository) = std::env::var("TOOLPAK_REPOSITORY") {
            paths.repository = repository;
        }

        tracing::debug!("Target directory: {}", paths.target.display());
        tracing::debug!("Cache root: {}", paths.cache_root.display());
        tracing::debug!("Lib root: {}", paths.lib_root.display());
        paths
    }

    /// Nest a path under the configured prefix, if any.
    pub fn prefixed(&self, path: &Path) -> PathBuf {
        if self.prefix.as_os_str().is_empty() {
            path.to_path_buf()
        } else {
            let relative = path.strip_prefix("/").unwrap_or(path);
            self.prefix.join(relative)
        }
    }

    /// Installing into a non-default prefix leaves integration steps to a
    /// later run inside that prefix.
    pub fn uses_prefix(&self) -> bool {
        !self.prefix.as_os_str().is_empty()
    }

    /// `<cache_root>/toolpak` — markers and the file-backed artifact cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.prefixed(&self.cache_root.join(PROJECT_NAME))
    }

    /// `<lib_root>/toolpak` — manifests and the catalog document.
    pub fn lib_dir(&self) -> PathBuf {
        self.prefixed(&self.lib_root.join(PROJECT_NAME))
    }

    /// `<lib_root>/toolpak/manifests`.
    pub fn manifests_dir(&self) -> PathBuf {
        self.lib_dir().join("manifests")
    }

    /// Where the catalog metadata document is kept between runs.
    pub fn metadata_path(&self) -> PathBuf {
        self.lib_dir().join(METADATA_FILE_NAME)
    }

    /// The target directory as a template value for `${target}`.
    pub fn target_str(&self) -> String {
        self.prefixed(&self.target).to_string_lossy().to_string()
    }
}

pub fn load_metadata_document(paths: &Paths) -> Result<Option<Vec<u8>>> {
    let path = paths.metadata_path();
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(fs::read(&path)?))
}

pub fn save_metadata_document(paths: &Paths, bytes: &[u8]) -> Result<()> {
    let path = paths.metadata_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes)?;
    tracing::debug!("Saved catalog document to {}", path.display());
    Ok(())
}
