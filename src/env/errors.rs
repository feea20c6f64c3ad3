use crate::edit::EditError;
use crate::rewrite::RewriteError;
use crate::safety::SafetyError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("template for program '{program}' not found at {path}")]
    MissingTemplate { program: String, path: PathBuf },

    #[error("checkpoint target already exists: {0}")]
    TargetExists(PathBuf),

    #[error("I/O error while checkpointing into {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk template tree: {0}")]
    Walk(#[from] walkdir::Error),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build command is empty")]
    EmptyCommand,

    #[error("failed to spawn build command '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("build did not finish within {}s", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("build I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Setup step during which an unexpected failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStage {
    FileOps,
    PatchOps,
    Build,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupStage::FileOps => write!(f, "file-ops"),
            SetupStage::PatchOps => write!(f, "patch-ops"),
            SetupStage::Build => write!(f, "build"),
        }
    }
}

/// Cause of an unexpected setup failure.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Edit(#[from] EditError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("failed to walk source tree: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Why an environment could not be realized.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("build of {name} failed: log lacks the success marker")]
    Build { name: String, log: String },

    #[error("unexpected failure during {stage}: {source}")]
    Unexpected {
        stage: SetupStage,
        #[source]
        source: StageError,
    },

    #[error("environment {name} already failed setup")]
    PreviouslyFailed { name: String },
}

impl SetupError {
    /// Stable label for logs and reports.
    pub fn classification(&self) -> &'static str {
        match self {
            SetupError::Checkpoint(_) => "checkpoint-failure",
            SetupError::Build { .. } => "build-failure",
            SetupError::Unexpected { .. } => "unexpected-setup-failure",
            SetupError::PreviouslyFailed { .. } => "previously-failed",
        }
    }

    /// Captured build log, when the failure produced one.
    pub fn build_log(&self) -> Option<&str> {
        match self {
            SetupError::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("environment {name} is sealed: operations can only be queued before setup")]
pub struct SealedEnvironment {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = SetupError::Build {
            name: "ptest_x".to_string(),
            log: "BUILD FAILED\n".to_string(),
        };
        assert_eq!(err.classification(), "build-failure");
        assert_eq!(err.build_log(), Some("BUILD FAILED\n"));

        let err = SetupError::Unexpected {
            stage: SetupStage::PatchOps,
            source: StageError::Build(BuildError::EmptyCommand),
        };
        assert_eq!(err.classification(), "unexpected-setup-failure");
        assert_eq!(
            err.to_string(),
            "unexpected failure during patch-ops: build command is empty"
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = BuildError::TimedOut {
            after: Duration::from_secs(90),
        };
        assert_eq!(err.to_string(), "build did not finish within 90s");
    }
}
