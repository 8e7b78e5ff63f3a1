//! Install/uninstall orchestration: resolution, probing, conflict checks,
//! plan/check short-circuits, fetch-extract-rewrite, state recording and the
//! symmetric teardown.

use crate::cache::ArtifactCache;
use crate::catalog::Catalog;
use crate::config::Paths;
use crate::conflict::{self, ConflictReport};
use crate::error::{Error, Result};
use crate::rewrite;
use crate::resolver::{resolve, InstallationPlan};
use crate::shell::Shell;
use crate::state;
use crate::status::Prober;
use crate::types::{Tool, ToolIdentity};
use crate::{archive, archive::Extractor};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Mode flags for one install run.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Report the annotated plan and stop; never touch the filesystem.
    pub plan_only: bool,
    /// Like plan, but fail when any tool is missing or outdated.
    pub check: bool,
    /// Reinstall even when the installed version matches.
    pub reinstall: bool,
    /// Neither probe nor install dependency-only tools.
    pub skip_deps: bool,
    /// Flag conflicting tools as skipped instead of aborting.
    pub skip_conflicts: bool,
}

/// What one run did, for external rendering.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub plan: Vec<Tool>,
    pub installed: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub conflicts: ConflictReport,
    /// Tools a check run found missing or outdated; zero outside check mode.
    /// The report is returned either way so callers can render the plan
    /// before raising the check failure.
    pub outdated: usize,
}

/// Hook applied to every regular file written during extraction, letting a
/// run patch artifact-internal paths into their final shape.
pub type FilePatcher = Box<dyn Fn(&Path) -> Result<()> + Send + Sync>;

pub struct Installer<'a> {
    catalog: &'a Catalog,
    cache: &'a dyn ArtifactCache,
    paths: &'a Paths,
    shell: &'a dyn Shell,
    patcher: Option<FilePatcher>,
}

impl<'a> Installer<'a> {
    pub fn new(
        catalog: &'a Catalog,
        cache: &'a dyn ArtifactCache,
        paths: &'a Paths,
        shell: &'a dyn Shell,
    ) -> Self {
        Self {
            catalog,
            cache,
            paths,
            shell,
            patcher: None,
        }
    }

    pub fn with_patcher(mut self, patcher: FilePatcher) -> Self {
        self.patcher = Some(patcher);
        self
    }

    /// Expand the requested set into one merged, dependency-ordered plan
    /// with requested tools flagged.
    pub fn resolve_requested(&self, requested: &[String]) -> Result<InstallationPlan> {
        let mut plan = InstallationPlan::new();
        for name in requested {
            resolve(self.catalog, name, &mut plan)?;
        }
        for name in requested {
            if let Some(tool) = plan.get_mut(name) {
                tool.status.is_requested = true;
                tool.status.is_dependency = false;
            }
        }
        Ok(plan)
    }

    /// Probe every planned tool; dependency-only tools are left unprobed
    /// under skip-deps.
    pub fn probe_plan(&self, plan: &mut InstallationPlan, skip_deps: bool) -> Result<()> {
        let prober = Prober::new(self.paths, self.shell);
        for tool in plan.tools_mut() {
            if skip_deps && tool.status.is_dependency && !tool.status.is_requested {
                continue;
            }
            prober.probe(tool)?;
        }
        Ok(())
    }

    /// The full state machine: REQUESTED through DONE.
    pub async fn install(
        &self,
        requested: &[String],
        opts: InstallOptions,
    ) -> Result<InstallReport> {
        let mut plan = self.resolve_requested(requested)?;
        self.probe_plan(&mut plan, opts.skip_deps)?;

        let conflicts = conflict::detect(&mut plan, opts.skip_conflicts);
        for pair in conflicts
            .with_installed
            .iter()
            .chain(conflicts.between_planned.iter())
        {
            tracing::warn!(
                "Conflict: {} conflicts with {}",
                pair.tool,
                pair.conflicts_with
            );
        }
        if conflicts.any() && !opts.skip_conflicts {
            let pair = conflicts
                .with_installed
                .first()
                .or(conflicts.between_planned.first())
                .cloned()
                .expect("non-empty conflict report");
            return Err(Error::ConflictDetected {
                tool: pair.tool,
                conflicts: pair.conflicts_with,
            });
        }

        let mut report = InstallReport {
            plan: plan.tools().to_vec(),
            conflicts,
            ..Default::default()
        };

        // Plan and check modes stop here and never mutate the filesystem.
        if opts.check {
            report.outdated = plan
                .tools()
                .iter()
                .filter(|t| !(opts.skip_deps && t.status.is_dependency && !t.status.is_requested))
                .filter(|t| !is_up_to_date(t))
                .count();
            return Ok(report);
        }
        if opts.plan_only {
            return Ok(report);
        }

        let mut installed_now: HashSet<String> = HashSet::new();
        let names: Vec<String> = plan.tools().iter().map(|t| t.name.clone()).collect();
        for name in names {
            let tool = plan.get(&name).expect("planned tool").clone();

            if tool.status.skip_conflict {
                report.skipped.push((name, "conflict".to_string()));
                continue;
            }
            if opts.skip_deps && tool.status.is_dependency && !tool.status.is_requested {
                report.skipped.push((name, "dependency".to_string()));
                continue;
            }
            if is_up_to_date(&tool) && !opts.reinstall {
                tracing::info!("{} {} is already installed", tool.name, tool.version);
                report.skipped.push((name, "up-to-date".to_string()));
                continue;
            }

            // Reinstalls and updates tear the previous version down first.
            if opts.reinstall || tool.status.binary_present || tool.status.marker_present {
                self.uninstall(&tool.name, true)?;
            }

            self.verify_dependencies(&tool, &installed_now)?;

            self.install_tool(&tool).await?;
            installed_now.insert(tool.name.clone());
            report.installed.push(tool.name.clone());
        }

        if self.paths.uses_prefix() {
            tracing::warn!(
                "Installed into prefix {}; post-install integration must be run inside it",
                self.paths.prefix.display()
            );
        }

        Ok(report)
    }

    /// Every runtime dependency must already be on disk or have been
    /// installed earlier in this run. The binary is stat'ed directly so the
    /// check also holds under skip-deps, where dependencies go unprobed.
    fn verify_dependencies(&self, tool: &Tool, installed_now: &HashSet<String>) -> Result<()> {
        for dependency in &tool.runtime_dependencies {
            if installed_now.contains(dependency) {
                continue;
            }
            let present = self
                .catalog
                .get_by_name(dependency)
                .map(|dep| Path::new(&dep.binary_path(&self.paths.target_str())).exists())
                .unwrap_or(false);
            if !present {
                return Err(Error::DependencyMissing {
                    tool: tool.name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }

    async fn install_tool(&self, tool: &Tool) -> Result<()> {
        tracing::info!("Installing {} {}...", tool.name, tool.version);

        let identity = ToolIdentity {
            registry: self.paths.registry.clone(),
            repository: self.paths.repository.clone(),
            name: tool.name.clone(),
            version: tool.version.clone(),
        };
        let layer = self.cache.get(&identity).await?;

        let rules = rewrite::default_rules(self.paths);
        let mut extractor = Extractor::new(Path::new("/"), rules);
        archive::process_entries(&layer[..], |entry| extractor.extract(entry))?;
        let written = extractor.written();

        if let Some(patcher) = &self.patcher {
            for path in &written {
                let path = PathBuf::from(path);
                if path.is_file() {
                    patcher(&path)?;
                }
            }
        }

        state::write_manifest(self.paths, tool, &written)?;
        state::write_marker(self.paths, tool)?;

        if let Some(usage) = &tool.messages.usage {
            tracing::info!("{}", usage.trim_end());
        }
        tracing::info!("Installed {} {} ({} files)", tool.name, tool.version, written.len());
        Ok(())
    }

    /// Reversible teardown driven by the installed-files manifest. Returns
    /// false when nothing recorded the tool as installed (non-fatal).
    pub fn uninstall(&self, name: &str, force: bool) -> Result<bool> {
        let tool = self.catalog.get_by_name(name)?;
        let manifest = state::read_manifest(self.paths, name)?;
        let marker = state::marker_exists(self.paths, tool);

        if manifest.is_none() && !marker && !force {
            tracing::info!("{} is not installed", name);
            return Ok(false);
        }

        let mut first_error = None;
        if let Some(files) = manifest {
            for file in files {
                match fs::remove_file(&file) {
                    Ok(()) => tracing::debug!("Removed {}", file),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!("Already absent: {}", file);
                    }
                    Err(e) => {
                        // Report per path but keep cleaning the rest up.
                        tracing::error!("Could not remove {}: {}", file, e);
                        first_error
                            .get_or_insert_with(|| Error::state(name, format!("remove {file}: {e}")));
                    }
                }
            }
        } else {
            tracing::debug!("No manifest for {}; skipping file removal", name);
        }

        state::remove_markers(self.paths, name)?;
        self.cache.remove_entries(name)?;
        state::remove_manifest(self.paths, name)?;

        match first_error {
            Some(error) => Err(error),
            None => {
                tracing::info!("Uninstalled {}", name);
                Ok(true)
            }
        }
    }
}

/// Marker presence stands in for a version match when a tool defines no
/// version-check command.
pub fn is_up_to_date(tool: &Tool) -> bool {
    tool.status.binary_present
        && (tool.status.version_matches
            || (tool.check.is_none() && tool.status.marker_present))
}
