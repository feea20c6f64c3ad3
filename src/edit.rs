use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EditError {
    #[error("Cannot write {0}: path has no parent directory")]
    NoParent(PathBuf),

    #[error("File I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EditError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        EditError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of writing a rewritten file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "WriteOutcome tells whether the file was touched"]
pub enum WriteOutcome {
    /// New contents were written
    Written { file: PathBuf, bytes: usize },
    /// File already held exactly these contents; nothing was touched
    Unchanged { file: PathBuf },
}

impl WriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// Write `content` to `path` unless the file already holds it.
///
/// Writes are atomic and bump the mtime so the subsequent build does not
/// reuse stale compiled output for this file.
pub fn write_if_changed(path: &Path, content: &str) -> Result<WriteOutcome, EditError> {
    match fs::read(path) {
        Ok(existing) if existing == content.as_bytes() => {
            return Ok(WriteOutcome::Unchanged {
                file: path.to_path_buf(),
            });
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(EditError::io(path, e)),
    }

    atomic_write(path, content.as_bytes())?;

    let now = filetime::FileTime::now();
    filetime::set_file_mtime(path, now).map_err(|e| EditError::io(path, e))?;

    Ok(WriteOutcome::Written {
        file: path.to_path_buf(),
        bytes: content.len(),
    })
}

/// Atomic file write: tempfile + fsync + rename.
///
/// Either the full write succeeds or the previous contents stay in place.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), EditError> {
    // Create tempfile in same directory to ensure same filesystem
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| EditError::NoParent(path.to_path_buf()))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| EditError::io(path, e))?;

    temp.write_all(content).map_err(|e| EditError::io(path, e))?;

    // Flush to disk (fsync)
    temp.as_file().sync_all().map_err(|e| EditError::io(path, e))?;

    temp.persist(path).map_err(|e| EditError::io(path, e.error))?;

    Ok(())
}
