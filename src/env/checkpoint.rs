//! Producing private, renamed copies of a program's source tree.

use crate::env::errors::CheckpointError;
use crate::rewrite::bounded_replace;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Source of private program trees.
pub trait Checkpointer {
    /// Materialize `program` at `revision` as a new program named `new_name`.
    ///
    /// Returns the source root: the directory holding the `new_name`
    /// top-level package directory.
    fn checkpoint(
        &self,
        program: &str,
        revision: &str,
        new_name: &str,
    ) -> Result<PathBuf, CheckpointError>;

    /// Remove everything registered under `name`. Removing a name that was
    /// never checkpointed is not an error.
    fn uninstall(&self, name: &str) -> Result<(), CheckpointError>;

    /// Root of the tree a checkpoint named `name` lives in.
    fn tree_root(&self, name: &str) -> PathBuf;
}

/// Checkpoints by copying `<templates>/<program>/` into `<work_root>/<name>/`.
///
/// The tree is expected to keep its sources under `src/<program>/`; that
/// directory is renamed to `src/<name>/` and bounded occurrences of the
/// program name in source files are rewritten, so the copy compiles as an
/// independent program.
#[derive(Debug, Clone)]
pub struct DirectoryCheckpointer {
    templates_root: PathBuf,
    work_root: PathBuf,
    source_extension: String,
}

impl DirectoryCheckpointer {
    pub fn new(
        templates_root: impl Into<PathBuf>,
        work_root: impl Into<PathBuf>,
        source_extension: impl Into<String>,
    ) -> Self {
        Self {
            templates_root: templates_root.into(),
            work_root: work_root.into(),
            source_extension: source_extension.into(),
        }
    }

    fn copy_entry(
        &self,
        from: &Path,
        to: &Path,
        program: &str,
        new_name: &str,
    ) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: to.to_path_buf(),
            source,
        };

        let is_source = from.extension().and_then(|e| e.to_str()) == Some(self.source_extension.as_str());
        if is_source {
            let text = fs::read_to_string(from).map_err(io_err)?;
            fs::write(to, bounded_replace(&text, program, new_name)).map_err(io_err)?;
        } else {
            fs::copy(from, to).map_err(io_err)?;
        }
        Ok(())
    }
}

impl Checkpointer for DirectoryCheckpointer {
    fn checkpoint(
        &self,
        program: &str,
        revision: &str,
        new_name: &str,
    ) -> Result<PathBuf, CheckpointError> {
        let template = self.templates_root.join(program);
        if !template.is_dir() {
            return Err(CheckpointError::MissingTemplate {
                program: program.to_string(),
                path: template,
            });
        }

        let dest = self.tree_root(new_name);
        if dest.exists() {
            return Err(CheckpointError::TargetExists(dest));
        }
        debug!(program, revision, "template directories are unversioned; copying as-is");

        for entry in WalkDir::new(&template).follow_links(false) {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(&template) else {
                continue;
            };
            if relative.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }

            let to = dest.join(rename_package_dir(relative, program, new_name));
            if entry.file_type().is_dir() {
                fs::create_dir_all(&to).map_err(|source| CheckpointError::Io {
                    path: to.clone(),
                    source,
                })?;
            } else if entry.file_type().is_file() {
                self.copy_entry(entry.path(), &to, program, new_name)?;
            }
        }

        info!(program, name = new_name, tree = %dest.display(), "checkpointed program");
        Ok(dest.join("src"))
    }

    fn uninstall(&self, name: &str) -> Result<(), CheckpointError> {
        let tree = self.tree_root(name);
        match fs::remove_dir_all(&tree) {
            Ok(()) => {
                debug!(name, "removed private tree");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CheckpointError::Io { path: tree, source }),
        }
    }

    fn tree_root(&self, name: &str) -> PathBuf {
        self.work_root.join(name)
    }
}

/// Map `src/<program>/...` to `src/<new_name>/...`; other paths are unchanged.
fn rename_package_dir(relative: &Path, program: &str, new_name: &str) -> PathBuf {
    let mut components = relative.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(src)), Some(Component::Normal(pkg)))
            if src == "src" && pkg == program =>
        {
            Path::new("src").join(new_name).join(components.as_path())
        }
        _ => relative.to_path_buf(),
    }
}
