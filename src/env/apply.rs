//! Applying queued file and patch operations to a private tree.
//!
//! Operations that cannot find what they need (a missing source class, a
//! missing target directory, a target without the fragment markers) are
//! skipped with a warning rather than failing the environment.

use crate::edit::{write_if_changed, WriteOutcome};
use crate::env::errors::StageError;
use crate::ops::{retarget_text, ClassName, FileOp, PatchOp};
use crate::rewrite::{apply_stubs, extract_fragment, has_fragment, splice_fragment, CallSiteRewriter};
use crate::safety::{SafetyError, TreeGuard};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What happened to one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpOutcome {
    Applied(WriteOutcome),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SourceMissing,
    SourceFragmentMissing,
    TargetMissing,
    TargetMarkersMissing,
    OutsideTree,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SkipReason::SourceMissing => "source class not found",
            SkipReason::SourceFragmentMissing => "source fragment not found",
            SkipReason::TargetMissing => "target not found",
            SkipReason::TargetMarkersMissing => "target lacks fragment markers",
            SkipReason::OutsideTree => "path resolves outside the private tree",
        };
        f.write_str(reason)
    }
}

/// A private tree being patched: its owning package and where it lives.
#[derive(Debug)]
pub struct PatchTarget<'a> {
    /// Top-level package of the tree, i.e. the environment name
    pub owner: &'a str,
    pub source_root: &'a Path,
    pub extension: &'a str,
    guard: TreeGuard,
}

impl<'a> PatchTarget<'a> {
    pub fn new(owner: &'a str, source_root: &'a Path, extension: &'a str) -> Result<Self, StageError> {
        Ok(Self {
            owner,
            source_root,
            extension,
            guard: TreeGuard::new(source_root)?,
        })
    }

    fn class_path(&self, class: &ClassName) -> PathBuf {
        self.source_root.join(class.relative_path(self.extension))
    }

    /// Resolve an existing file, mapping absence and escapes to skips.
    fn existing(
        &self,
        path: &Path,
        missing: SkipReason,
    ) -> Result<Result<PathBuf, SkipReason>, StageError> {
        resolve(self.guard.validate_path(path), missing)
    }

    fn writable(&self, path: &Path) -> Result<Result<PathBuf, SkipReason>, StageError> {
        resolve(self.guard.validate_target(path), SkipReason::TargetMissing)
    }
}

fn resolve(
    result: Result<PathBuf, SafetyError>,
    missing: SkipReason,
) -> Result<Result<PathBuf, SkipReason>, StageError> {
    match result {
        Ok(path) => Ok(Ok(path)),
        Err(e) if e.is_not_found() => Ok(Err(missing)),
        Err(SafetyError::OutsideTree { .. }) => Ok(Err(SkipReason::OutsideTree)),
        Err(e) => Err(e.into()),
    }
}

fn read(path: &Path) -> Result<String, StageError> {
    fs::read_to_string(path).map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply one file operation. Class names are qualified with the tree owner.
pub fn apply_file_op(op: &FileOp, target: &PatchTarget<'_>) -> Result<OpOutcome, StageError> {
    let source_class = op.source_class().qualified(target.owner);
    let target_class = op.target_class().qualified(target.owner);

    let source_path = match target.existing(&target.class_path(&source_class), SkipReason::SourceMissing)? {
        Ok(path) => path,
        Err(reason) => return Ok(OpOutcome::Skipped(reason)),
    };
    let source_text = read(&source_path)?;

    match op {
        FileOp::WholeFile { .. } => {
            let path = match target.writable(&target.class_path(&target_class))? {
                Ok(path) => path,
                Err(reason) => return Ok(OpOutcome::Skipped(reason)),
            };
            let text = retarget_text(&source_text, &source_class, &target_class);
            Ok(OpOutcome::Applied(write_if_changed(&path, &text)?))
        }
        FileOp::Fragment {
            target: target_ref,
            source: source_ref,
        } => {
            let Some(body) = extract_fragment(&source_text, &source_ref.label)? else {
                return Ok(OpOutcome::Skipped(SkipReason::SourceFragmentMissing));
            };
            let path = match target.existing(&target.class_path(&target_class), SkipReason::TargetMissing)? {
                Ok(path) => path,
                Err(reason) => return Ok(OpOutcome::Skipped(reason)),
            };
            let target_text = read(&path)?;
            if !has_fragment(&target_text, &target_ref.label)? {
                return Ok(OpOutcome::Skipped(SkipReason::TargetMarkersMissing));
            }

            let body = retarget_text(&body, &source_class, &target_class);
            let spliced = splice_fragment(&target_text, &target_ref.label, &body)?;
            Ok(OpOutcome::Applied(write_if_changed(&path, &spliced)?))
        }
    }
}

/// Apply every file operation in order, logging skips.
pub fn apply_file_ops(ops: &[FileOp], target: &PatchTarget<'_>) -> Result<usize, StageError> {
    let mut applied = 0;
    for op in ops {
        match apply_file_op(op, target)? {
            OpOutcome::Applied(outcome) => {
                debug!(owner = target.owner, op = %op, written = outcome.is_written(), "applied file operation");
                applied += 1;
            }
            OpOutcome::Skipped(reason) => {
                warn!(owner = target.owner, op = %op, %reason, "skipped file operation");
            }
        }
    }
    Ok(applied)
}

/// Rewrite call sites in every source file under the tree, once per file.
///
/// Returns the number of files whose contents changed. With no operations
/// queued the tree is not scanned at all.
pub fn apply_patch_ops(
    ops: &[PatchOp],
    target: &PatchTarget<'_>,
    self_token: &str,
) -> Result<usize, StageError> {
    if ops.is_empty() {
        return Ok(0);
    }
    let rewriters = ops
        .iter()
        .map(|op| op.rewriter(target.owner, self_token))
        .collect::<Result<Vec<CallSiteRewriter>, _>>()?;

    let mut changed = 0;
    for entry in WalkDir::new(target.source_root).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        let is_source = entry.file_type().is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(target.extension);
        if !is_source {
            continue;
        }

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!(file = %path.display(), "skipping non-UTF-8 source file");
                continue;
            }
            Err(source) => {
                return Err(StageError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let patched = apply_stubs(&text, &rewriters);
        if patched != text && write_if_changed(path, &patched)?.is_written() {
            debug!(file = %path.display(), "rewrote call sites");
            changed += 1;
        }
    }
    Ok(changed)
}
