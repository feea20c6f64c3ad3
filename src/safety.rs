use std::path::{Path, PathBuf};
use thiserror::Error;

/// Keeps writes inside one environment's private tree.
///
/// Submitted programs are untrusted: a symlink inside the checked-out tree
/// could otherwise redirect a file operation to anywhere on disk.
#[derive(Debug, Clone)]
pub struct TreeGuard {
    /// Canonical path to the private tree root
    root: PathBuf,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside the private tree: {path} (tree: {root})")]
    OutsideTree { path: PathBuf, root: PathBuf },

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl SafetyError {
    /// True when the path (or its parent directory) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SafetyError::Canonicalize(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl TreeGuard {
    /// Create a guard for the given tree root.
    ///
    /// The root is canonicalized to handle symlinks correctly.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    /// Check an existing path, returning its canonical form.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let canonical = self.absolute(path.as_ref()).canonicalize()?;
        self.check_canonical(&canonical)?;
        Ok(canonical)
    }

    /// Check a path that may not exist yet.
    ///
    /// The parent directory must exist and lie inside the tree. If the file
    /// itself exists it is resolved too, so a symlinked file is caught.
    pub fn validate_target(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let absolute = self.absolute(path.as_ref());
        if absolute.exists() {
            return self.validate_path(&absolute);
        }

        let not_found = || std::io::Error::new(std::io::ErrorKind::NotFound, "no parent directory");
        let parent = absolute.parent().ok_or_else(not_found)?;
        let file_name = absolute.file_name().ok_or_else(not_found)?;

        let canonical_parent = parent.canonicalize()?;
        self.check_canonical(&canonical_parent)?;
        Ok(canonical_parent.join(file_name))
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn check_canonical(&self, canonical: &Path) -> Result<(), SafetyError> {
        if !canonical.starts_with(&self.root) {
            return Err(SafetyError::OutsideTree {
                path: canonical.to_path_buf(),
                root: self.root.clone(),
            });
        }
        Ok(())
    }

    /// Get the tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_path_inside_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let guard = TreeGuard::new(root).unwrap();

        let file = root.join("env/Robot.java");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, b"").unwrap();

        assert!(guard.validate_path(&file).is_ok());
        assert!(guard.validate_path("env/Robot.java").is_ok());
    }

    #[test]
    fn test_validate_path_outside_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("tree");
        fs::create_dir_all(&root).unwrap();
        let guard = TreeGuard::new(&root).unwrap();

        let outside = temp_dir.path().join("outside.java");
        fs::write(&outside, b"").unwrap();

        let result = guard.validate_path(&outside);
        assert!(matches!(result, Err(SafetyError::OutsideTree { .. })));
    }

    #[test]
    fn test_validate_target_new_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TreeGuard::new(temp_dir.path()).unwrap();
        fs::create_dir_all(temp_dir.path().join("env")).unwrap();

        let resolved = guard.validate_target("env/New.java").unwrap();
        assert!(resolved.ends_with("env/New.java"));
    }

    #[test]
    fn test_validate_target_missing_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TreeGuard::new(temp_dir.path()).unwrap();

        let err = guard.validate_target("nope/New.java").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_directory_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("tree");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, root.join("escape")).unwrap();

        let guard = TreeGuard::new(&root).unwrap();
        let result = guard.validate_target(root.join("escape/Evil.java"));

        assert!(matches!(result, Err(SafetyError::OutsideTree { .. })));
    }
}
