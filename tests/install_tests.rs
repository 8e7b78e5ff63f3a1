//! End-to-end engine tests: resolution, planning, conflicts and the
//! install/uninstall round-trip against a stubbed artifact backend.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use toolpak::cache::file::FileCache;
use toolpak::cache::ArtifactCache;
use toolpak::catalog::Catalog;
use toolpak::config::Paths;
use toolpak::error::{Error, Result};
use toolpak::install::{InstallOptions, Installer};
use toolpak::shell::SystemShell;
use toolpak::state;
use toolpak::types::ToolIdentity;

/// Serves canned layers from memory and records cache-entry removals.
struct StubCache {
    layers: HashMap<String, Vec<u8>>,
    removed: Mutex<Vec<String>>,
}

impl StubCache {
    fn new() -> Self {
        Self {
            layers: HashMap::new(),
            removed: Mutex::new(Vec::new()),
        }
    }

    fn with_layer(mut self, name: &str, files: &[(&str, &[u8])]) -> Self {
        self.layers.insert(name.to_string(), tarball(files));
        self
    }
}

#[async_trait]
impl ArtifactCache for StubCache {
    async fn get(&self, id: &ToolIdentity) -> Result<Vec<u8>> {
        self.layers
            .get(&id.name)
            .cloned()
            .ok_or_else(|| Error::fetch_failure(&id.name, "no stub layer"))
    }

    fn remove_entries(&self, name: &str) -> Result<()> {
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

fn tarball(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append(&header, &content[..]).unwrap();
    }
    builder.into_inner().unwrap()
}

fn paths_in(temp: &TempDir) -> Paths {
    Paths {
        target: temp.path().join("usr/local"),
        cache_root: temp.path().join("var/cache"),
        lib_root: temp.path().join("var/lib"),
        prefix: PathBuf::new(),
        user: false,
        registry: "registry.example".to_string(),
        repository: "stub/tools".to_string(),
    }
}

fn catalog() -> Catalog {
    Catalog::from_slice(
        br#"{
            "tools": [
                {"name": "foo", "version": "1.0.0",
                 "runtime_dependencies": ["bar"]},
                {"name": "bar", "version": "2.0.0"},
                {"name": "solo", "version": "3.0.0"},
                {"name": "new-tool", "version": "1.0.0",
                 "conflicts_with": ["old-tool"]},
                {"name": "old-tool", "version": "0.9.0"}
            ]
        }"#,
    )
    .unwrap()
}

fn stub() -> StubCache {
    StubCache::new()
        .with_layer("foo", &[("usr/local/bin/foo", b"foo binary")])
        .with_layer(
            "bar",
            &[
                ("usr/local/bin/bar", b"bar binary"),
                ("usr/local/share/doc/bar/README", b"docs"),
            ],
        )
        .with_layer("solo", &[("usr/local/bin/solo", b"solo binary")])
        .with_layer("new-tool", &[("usr/local/bin/new-tool", b"new")])
        .with_layer("old-tool", &[("usr/local/bin/old-tool", b"old")])
}

#[tokio::test]
async fn installing_foo_plans_and_installs_bar_first() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let report = installer
        .install(&["foo".to_string()], InstallOptions::default())
        .await
        .unwrap();

    let plan: Vec<_> = report.plan.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(plan, vec!["bar", "foo"]);
    assert_eq!(report.installed, vec!["bar", "foo"]);

    assert!(paths.target.join("bin/foo").exists());
    assert!(paths.target.join("bin/bar").exists());
    assert!(state::marker_path(&paths, "foo", "1.0.0").exists());
    assert!(state::marker_path(&paths, "bar", "2.0.0").exists());
    assert!(state::manifest_path(&paths, "foo").exists());
}

#[tokio::test]
async fn round_trip_leaves_no_state_behind() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap();
    let binary = paths.target.join("bin/solo");
    assert!(binary.exists());

    assert!(installer.uninstall("solo", false).unwrap());
    assert!(!binary.exists());
    assert!(!state::marker_path(&paths, "solo", "3.0.0").exists());
    assert!(!state::manifest_path(&paths, "solo").exists());
    assert!(cache.removed.lock().unwrap().contains(&"solo".to_string()));

    // Re-installing after uninstall behaves like a first-time install.
    let report = installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap();
    assert_eq!(report.installed, vec!["solo"]);
    assert!(binary.exists());
}

#[tokio::test]
async fn uninstalling_a_tool_that_was_never_installed_is_non_fatal() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    assert!(!installer.uninstall("solo", false).unwrap());
}

#[tokio::test]
async fn second_install_is_skipped_as_up_to_date() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap();
    let report = installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap();

    assert!(report.installed.is_empty());
    assert_eq!(
        report.skipped,
        vec![("solo".to_string(), "up-to-date".to_string())]
    );
}

#[tokio::test]
async fn reinstall_reruns_the_install_path() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap();
    let report = installer
        .install(
            &["solo".to_string()],
            InstallOptions {
                reinstall: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.installed, vec!["solo"]);
    assert!(paths.target.join("bin/solo").exists());
}

#[tokio::test]
async fn plan_mode_never_touches_the_filesystem() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let report = installer
        .install(
            &["foo".to_string()],
            InstallOptions {
                plan_only: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let plan: Vec<_> = report.plan.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(plan, vec!["bar", "foo"]);
    assert!(report.plan[0].status.is_dependency);
    assert!(report.plan[1].status.is_requested);
    assert!(!paths.target.join("bin/foo").exists());
    assert!(!paths.cache_dir().exists());
}

#[tokio::test]
async fn check_mode_reports_the_plan_and_counts_outdated() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    // Missing tools still yield the full annotated plan so a caller can
    // render it before failing the run.
    let report = installer
        .install(
            &["foo".to_string()],
            InstallOptions {
                check: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let plan: Vec<_> = report.plan.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(plan, vec!["bar", "foo"]);
    assert_eq!(report.outdated, 2);
    assert!(!paths.target.join("bin/foo").exists());

    // After installing, the same check finds nothing outdated.
    installer
        .install(&["foo".to_string()], InstallOptions::default())
        .await
        .unwrap();
    let report = installer
        .install(
            &["foo".to_string()],
            InstallOptions {
                check: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.outdated, 0);
}

#[tokio::test]
async fn skip_deps_installs_only_the_requested_tool() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    // With bar absent, foo's install reports the missing dependency.
    let err = installer
        .install(
            &["foo".to_string()],
            InstallOptions {
                skip_deps: true,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::DependencyMissing { ref dependency, .. } if dependency == "bar"
    ));

    // With bar already on disk, only foo is installed.
    installer
        .install(&["bar".to_string()], InstallOptions::default())
        .await
        .unwrap();
    let report = installer
        .install(
            &["foo".to_string()],
            InstallOptions {
                skip_deps: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(report.installed, vec!["foo"]);
    assert_eq!(
        report.skipped,
        vec![("bar".to_string(), "dependency".to_string())]
    );
}

#[tokio::test]
async fn conflicts_abort_before_any_mutation() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let err = installer
        .install(
            &["new-tool".to_string(), "old-tool".to_string()],
            InstallOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConflictDetected { .. }));
    assert!(!paths.target.join("bin/new-tool").exists());
    assert!(!paths.target.join("bin/old-tool").exists());
}

#[tokio::test]
async fn skip_conflicts_installs_the_rest() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let report = installer
        .install(
            &["new-tool".to_string(), "old-tool".to_string()],
            InstallOptions {
                skip_conflicts: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(report
        .skipped
        .contains(&("new-tool".to_string(), "conflict".to_string())));
    assert_eq!(report.installed, vec!["old-tool"]);
    assert!(!paths.target.join("bin/new-tool").exists());
    assert!(paths.target.join("bin/old-tool").exists());
}

#[tokio::test]
async fn conflict_with_installed_tool_is_classified_as_such() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    installer
        .install(&["old-tool".to_string()], InstallOptions::default())
        .await
        .unwrap();

    let report = installer
        .install(
            &["new-tool".to_string(), "old-tool".to_string()],
            InstallOptions {
                plan_only: true,
                skip_conflicts: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(report.conflicts.with_installed.len(), 1);
    assert_eq!(report.conflicts.with_installed[0].tool, "new-tool");
    assert!(report.conflicts.between_planned.is_empty());
}

fn hostile_layer(name_bytes: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    // set_path refuses these names, so write the name bytes directly.
    header.as_gnu_mut().unwrap().name[..name_bytes.len()].copy_from_slice(name_bytes);
    header.set_size(4);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, &b"oops"[..]).unwrap();
    builder.into_inner().unwrap()
}

#[tokio::test]
async fn traversal_layer_entry_aborts_install_without_escape() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let mut cache = StubCache::new();
    cache
        .layers
        .insert("solo".to_string(), hostile_layer(b"../../etc/passwd"));
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let err = installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExtractFailure(_)));
    // Target is <temp>/usr/local; the traversal name would have resolved
    // to <temp>/etc/passwd.
    assert!(!temp.path().join("etc/passwd").exists());
    assert!(state::read_manifest(&paths, "solo").unwrap().is_none());
    assert!(!state::marker_path(&paths, "solo", "3.0.0").exists());
}

#[tokio::test]
async fn absolute_layer_entry_aborts_install() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let mut cache = StubCache::new();
    cache
        .layers
        .insert("solo".to_string(), hostile_layer(b"/etc/hostile"));
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    let err = installer
        .install(&["solo".to_string()], InstallOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExtractFailure(_)));
    assert!(!Path::new("/etc/hostile").exists());
}

const LAYER_FIXTURE: &[u8] = b"deterministic layer fixture\n";
const LAYER_FIXTURE_DIGEST: &str =
    "sha256:ef3f0689c365586d33949d01012d8a7431f88f9483db61d1c3985d86dad51b0c";

#[tokio::test]
async fn file_cache_warming_serves_the_same_bytes_as_pass_through() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let id = ToolIdentity {
        registry: paths.registry.clone(),
        repository: paths.repository.clone(),
        name: "fixture".to_string(),
        version: "1.0.0".to_string(),
    };

    let mut upstream = StubCache::new();
    upstream
        .layers
        .insert("fixture".to_string(), LAYER_FIXTURE.to_vec());
    let direct = upstream.get(&id).await.unwrap();

    // First call misses and warms the cache through the upstream fetcher.
    let cache = FileCache::with_client(&paths, Box::new(upstream));
    let warmed = cache.get(&id).await.unwrap();
    assert_eq!(warmed, direct);

    // A fresh cache over the same root with an empty upstream can only be
    // served from disk.
    let disk_only = FileCache::with_client(&paths, Box::new(StubCache::new()));
    let hit = disk_only.get(&id).await.unwrap();
    assert_eq!(hit, direct);
    assert_eq!(
        format!("sha256:{:x}", Sha256::digest(&hit)),
        LAYER_FIXTURE_DIGEST
    );
}

#[tokio::test]
async fn manifest_lists_every_written_path() {
    let temp = TempDir::new().unwrap();
    let paths = paths_in(&temp);
    let catalog = catalog();
    let cache = stub();
    let shell = SystemShell;
    let installer = Installer::new(&catalog, &cache, &paths, &shell);

    installer
        .install(&["bar".to_string()], InstallOptions::default())
        .await
        .unwrap();

    let manifest = state::read_manifest(&paths, "bar").unwrap().unwrap();
    assert_eq!(manifest.len(), 2);
    assert!(manifest
        .iter()
        .any(|p| p.ends_with("bin/bar")));
    assert!(manifest
        .iter()
        .any(|p| p.ends_with("share/doc/bar/README")));
}
