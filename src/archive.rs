//! Streaming tar processing: per-entry callbacks, listing, display and
//! safety-checked extraction beneath a working root.

use crate::error::{Error, Result};
use crate::rewrite::{apply_rules, RewriteRule};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Entry, EntryType};

/// Iterate the entries of a tar stream, invoking `callback` for each.
/// Any callback error aborts the whole iteration.
pub fn process_entries<R, F>(reader: R, mut callback: F) -> Result<()>
where
    R: Read,
    F: FnMut(&mut Entry<'_, R>) -> Result<()>,
{
    let mut archive = Archive::new(reader);
    for entry in archive
        .entries()
        .map_err(|e| Error::ExtractFailure(format!("malformed archive: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| Error::ExtractFailure(format!("malformed entry: {e}")))?;
        callback(&mut entry)?;
    }
    Ok(())
}

/// List entry names without writing anything; links render as
/// `name -> target`.
pub fn list_entries<R: Read>(reader: R) -> Result<Vec<String>> {
    let mut names = Vec::new();
    process_entries(reader, |entry| {
        let name = entry_path(entry)?;
        let line = match link_target(entry)? {
            Some(target) => format!("{name} -> {target}"),
            None => name,
        };
        names.push(line);
        Ok(())
    })?;
    Ok(names)
}

/// Render one entry's permission bits and name, making no filesystem writes.
pub fn display_entry<R: Read>(entry: &mut Entry<'_, R>) -> Result<()> {
    let mode = entry.header().mode().unwrap_or(0);
    let name = entry_path(entry)?;
    match link_target(entry)? {
        Some(target) => println!("{:04o} {} -> {}", mode & 0o7777, name, target),
        None => println!("{:04o} {}", mode & 0o7777, name),
    }
    Ok(())
}

/// Safety-checked extraction: rewrites each entry path through a rule list
/// and materializes the entry beneath a fixed working root, collecting the
/// list of written destination paths.
pub struct Extractor {
    root: PathBuf,
    rules: Vec<RewriteRule>,
    written: Vec<String>,
}

impl Extractor {
    pub fn new(root: &Path, rules: Vec<RewriteRule>) -> Self {
        Self {
            root: root.to_path_buf(),
            rules,
            written: Vec::new(),
        }
    }

    /// Destination paths written so far, post path-rewrite.
    pub fn written(self) -> Vec<String> {
        self.written
    }

    pub fn extract<R: Read>(&mut self, entry: &mut Entry<'_, R>) -> Result<()> {
        let name = entry_path(entry)?;
        ensure_contained(&name)?;
        let rewritten = apply_rules(&name, &self.rules);
        let dest = secure_join(&self.root, &rewritten)?;

        match entry.header().entry_type() {
            // Directories materialize implicitly through their children.
            EntryType::Directory => Ok(()),
            EntryType::Regular => self.extract_file(entry, &rewritten, &dest),
            EntryType::Symlink => self.extract_symlink(entry, &rewritten, &dest),
            EntryType::Link => self.extract_hardlink(entry, &rewritten, &dest),
            other => {
                tracing::debug!("Skipping unsupported entry type {:?}: {}", other, name);
                Ok(())
            }
        }
    }

    fn extract_file<R: Read>(
        &mut self,
        entry: &mut Entry<'_, R>,
        rewritten: &str,
        dest: &Path,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut out = fs::File::create(dest)
            .map_err(|e| Error::ExtractFailure(format!("create {}: {e}", dest.display())))?;
        std::io::copy(entry, &mut out)?;

        let mut mode = entry.header().mode().unwrap_or(0o644);
        if mode & 0o4000 != 0 {
            tracing::warn!(
                "Entry {} requests set-UID; the bit is never honored",
                rewritten
            );
            mode &= !0o4000;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dest, fs::Permissions::from_mode(mode & 0o7777))?;
        }

        tracing::trace!("Extracted {}", dest.display());
        self.written.push(rewritten.to_string());
        Ok(())
    }

    fn extract_symlink<R: Read>(
        &mut self,
        entry: &mut Entry<'_, R>,
        rewritten: &str,
        dest: &Path,
    ) -> Result<()> {
        if dest.symlink_metadata().is_ok() {
            tracing::debug!("Link destination exists, leaving it: {}", dest.display());
            return Ok(());
        }
        let target = link_target(entry)?
            .ok_or_else(|| Error::ExtractFailure(format!("symlink without target: {rewritten}")))?;

        // Absolute targets point at container-image paths; rewrite them
        // relative to the link's own directory so the link survives any
        // target filesystem layout. A not-yet-extracted target is fine.
        let target = if target.starts_with('/') {
            let resolved = apply_rules(target.trim_start_matches('/'), &self.rules);
            let link_dir = Path::new(rewritten).parent().unwrap_or(Path::new(""));
            relativize(Path::new(&resolved), link_dir)
        } else {
            PathBuf::from(target)
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dest)?;
        #[cfg(not(unix))]
        return Err(Error::ExtractFailure("symlinks unsupported".to_string()));

        self.written.push(rewritten.to_string());
        Ok(())
    }

    fn extract_hardlink<R: Read>(
        &mut self,
        entry: &mut Entry<'_, R>,
        rewritten: &str,
        dest: &Path,
    ) -> Result<()> {
        if dest.symlink_metadata().is_ok() {
            return Ok(());
        }
        let target = link_target(entry)?
            .ok_or_else(|| Error::ExtractFailure(format!("link without target: {rewritten}")))?;
        ensure_contained(target.trim_start_matches('/'))?;
        let target = apply_rules(target.trim_start_matches('/'), &self.rules);
        let target_path = secure_join(&self.root, &target)?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::hard_link(&target_path, dest).map_err(|e| {
            Error::ExtractFailure(format!(
                "hard link {} -> {}: {e}",
                dest.display(),
                target_path.display()
            ))
        })?;
        self.written.push(rewritten.to_string());
        Ok(())
    }
}

/// Archive-internal names must be relative and free of `..` components.
/// Checked before rewriting, which may legitimately produce absolute
/// destination paths.
fn ensure_contained(name: &str) -> Result<()> {
    let escapes = name.starts_with('/')
        || Path::new(name)
            .components()
            .any(|c| matches!(c, Component::ParentDir));
    if escapes {
        return Err(Error::ExtractFailure(format!(
            "entry escapes extraction root: {name}"
        )));
    }
    Ok(())
}

/// Join `path` beneath `root`, rejecting any lexical escape above the root.
pub fn secure_join(root: &Path, path: &str) -> Result<PathBuf> {
    let relative = path.trim_start_matches('/');
    let mut joined = root.to_path_buf();
    let mut depth: usize = 0;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                joined.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(Error::ExtractFailure(format!(
                        "entry escapes extraction root: {path}"
                    )));
                }
                joined.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(Error::ExtractFailure(format!(
                    "entry resolves outside extraction root: {path}"
                )));
            }
        }
    }

    Ok(joined)
}

/// Express `target` relative to `from_dir` (both root-relative).
fn relativize(target: &Path, from_dir: &Path) -> PathBuf {
    let target: Vec<_> = target.components().collect();
    let from: Vec<_> = from_dir.components().collect();

    let common = target
        .iter()
        .zip(from.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component);
    }
    relative
}

fn entry_path<R: Read>(entry: &Entry<'_, R>) -> Result<String> {
    Ok(entry
        .path()
        .map_err(|e| Error::ExtractFailure(format!("bad entry path: {e}")))?
        .to_string_lossy()
        .trim_start_matches("./")
        .to_string())
}

fn link_target<R: Read>(entry: &Entry<'_, R>) -> Result<Option<String>> {
    Ok(entry
        .link_name()
        .map_err(|e| Error::ExtractFailure(format!("bad link target: {e}")))?
        .map(|p| p.to_string_lossy().to_string()))
}
