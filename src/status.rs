//! Status probing: is the binary on disk, does a marker record the install,
//! does the installed version match the catalog.

use crate::config::Paths;
use crate::error::Result;
use crate::shell::Shell;
use crate::state;
use crate::types::Tool;
use std::path::Path;

pub struct Prober<'a> {
    paths: &'a Paths,
    shell: &'a dyn Shell,
}

impl<'a> Prober<'a> {
    pub fn new(paths: &'a Paths, shell: &'a dyn Shell) -> Self {
        Self { paths, shell }
    }

    /// Run the three independent probes against one planned tool. None of
    /// them mutates the filesystem; only `tool.status` is written.
    pub fn probe(&self, tool: &mut Tool) -> Result<()> {
        let binary = tool.binary_path(&self.paths.target_str());
        tool.status.binary_present = Path::new(&binary).exists();
        tool.status.marker_present = state::marker_exists(self.paths, tool);

        if tool.status.binary_present {
            if let Some(check) = tool.check.clone() {
                let command = tool.render(&check, &self.paths.target_str());
                let installed = self.shell.run(&command)?;
                tool.status.version_matches = installed == tool.version;
                tool.status.installed_version = Some(installed);
            }
        }

        tracing::debug!(
            "Probed {}: binary={} marker={} version_matches={}",
            tool.name,
            tool.status.binary_present,
            tool.status.marker_present,
            tool.status.version_matches
        );
        Ok(())
    }
}
