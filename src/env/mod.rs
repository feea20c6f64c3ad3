//! Environments: private, uniquely named copies of a program's source tree.
//!
//! An [`Environment`] starts as a blueprint that collects file and patch
//! operations. [`Environment::setup`] realizes it exactly once:
//!
//! 1. checkpoint the template program into a tree named after the environment
//! 2. apply the file operations in order
//! 3. rewrite call sites for the patch operations, one scan per source file
//! 4. run the build and check its log for the success marker
//!
//! Failures never propagate past the environment: they are classified,
//! logged with the build log, and leave the environment unavailable.

pub mod apply;
pub mod build;
pub mod checkpoint;
pub mod errors;

pub use apply::{apply_file_op, apply_file_ops, apply_patch_ops, OpOutcome, PatchTarget, SkipReason};
pub use build::{
    build_tree, log_reports_success, BuildAttempt, BuildDriver, BuildOptions, BuildRequest,
    CommandBuild, SUCCESS_MARKER,
};
pub use checkpoint::{Checkpointer, DirectoryCheckpointer};
pub use errors::{
    BuildError, CheckpointError, SealedEnvironment, SetupError, SetupStage, StageError,
};

use crate::config::HarnessConfig;
use crate::identity;
use crate::ops::{FileOp, PatchOp};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Configuration plus the collaborators environments are realized with.
pub struct Harness {
    config: HarnessConfig,
    checkpointer: Box<dyn Checkpointer>,
    builder: Box<dyn BuildDriver>,
}

impl Harness {
    pub fn new(
        config: HarnessConfig,
        checkpointer: impl Checkpointer + 'static,
        builder: impl BuildDriver + 'static,
    ) -> Self {
        Self {
            config,
            checkpointer: Box::new(checkpointer),
            builder: Box::new(builder),
        }
    }

    /// Directory templates and the configured build command.
    pub fn from_config(
        config: HarnessConfig,
        templates_root: impl Into<PathBuf>,
    ) -> Result<Self, BuildError> {
        let builder = CommandBuild::new(&config.build.command)?;
        let checkpointer = DirectoryCheckpointer::new(
            templates_root,
            config.work_root.clone(),
            config.source_extension.clone(),
        );
        Ok(Self::new(config, checkpointer, builder))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn checkpointer(&self) -> &dyn Checkpointer {
        self.checkpointer.as_ref()
    }
}

impl fmt::Debug for Harness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The program an environment is a private copy of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub program: String,
    pub revision: String,
}

impl Template {
    pub fn new(program: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            revision: revision.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvState {
    /// Collecting operations; not realized
    Blueprint,
    /// Built successfully and usable by matches
    Built,
    /// Setup failed; terminal for this instance
    Failed,
}

#[derive(Debug)]
pub struct Environment {
    name: String,
    file_ops: Vec<FileOp>,
    patch_ops: Vec<PatchOp>,
    /// Set once setup starts; later operations are refused
    sealed: bool,
    state: EnvState,
    source_root: Option<PathBuf>,
    build_log: Option<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// A new blueprint environment with a freshly minted name.
    pub fn new() -> Self {
        Self::with_name(identity::next_environment_name())
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_ops: Vec::new(),
            patch_ops: Vec::new(),
            sealed: false,
            state: EnvState::Blueprint,
            source_root: None,
            build_log: None,
        }
    }

    /// An environment that was already realized elsewhere.
    pub fn prebuilt(name: impl Into<String>, source_root: impl Into<PathBuf>) -> Self {
        Self {
            sealed: true,
            state: EnvState::Built,
            source_root: Some(source_root.into()),
            ..Self::with_name(name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    pub fn available(&self) -> bool {
        self.state == EnvState::Built
    }

    pub fn file_ops(&self) -> &[FileOp] {
        &self.file_ops
    }

    pub fn patch_ops(&self) -> &[PatchOp] {
        &self.patch_ops
    }

    pub fn source_root(&self) -> Option<&Path> {
        self.source_root.as_deref()
    }

    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    pub fn file_op(&mut self, op: FileOp) -> Result<(), SealedEnvironment> {
        self.ensure_open()?;
        debug!(env = %self.name, op = %op, "queued file operation");
        self.file_ops.push(op);
        Ok(())
    }

    pub fn patch_op(&mut self, op: PatchOp) -> Result<(), SealedEnvironment> {
        self.ensure_open()?;
        debug!(env = %self.name, op = %op, "queued patch operation");
        self.patch_ops.push(op);
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SealedEnvironment> {
        if self.sealed {
            return Err(SealedEnvironment {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Path of a map shipped in this environment's copy of the test suite.
    pub fn suite_map_path(&self, harness: &Harness, map: &str) -> PathBuf {
        let config = harness.config();
        harness
            .checkpointer()
            .tree_root(&self.name)
            .join(&config.suite_map_dir)
            .join(format!("{map}.{}", config.map_extension))
    }

    /// Realize the environment. Succeeds immediately if already built.
    pub fn setup(&mut self, harness: &Harness, template: &Template) -> Result<(), SetupError> {
        match self.state {
            EnvState::Built => return Ok(()),
            EnvState::Failed => {
                return Err(SetupError::PreviouslyFailed {
                    name: self.name.clone(),
                })
            }
            EnvState::Blueprint => {}
        }
        self.sealed = true;

        match self.realize(harness, template) {
            Ok(()) => {
                self.state = EnvState::Built;
                info!(env = %self.name, "environment ready");
                Ok(())
            }
            Err(err) => {
                self.fail(harness, &err);
                Err(err)
            }
        }
    }

    fn realize(&mut self, harness: &Harness, template: &Template) -> Result<(), SetupError> {
        let config = harness.config();
        let source_root =
            harness
                .checkpointer()
                .checkpoint(&template.program, &template.revision, &self.name)?;
        self.source_root = Some(source_root.clone());

        let target = PatchTarget::new(&self.name, &source_root, &config.source_extension)
            .map_err(|source| SetupError::Unexpected {
                stage: SetupStage::FileOps,
                source,
            })?;
        let applied = apply_file_ops(&self.file_ops, &target).map_err(|source| {
            SetupError::Unexpected {
                stage: SetupStage::FileOps,
                source,
            }
        })?;
        let patched = apply_patch_ops(&self.patch_ops, &target, &config.self_token).map_err(
            |source| SetupError::Unexpected {
                stage: SetupStage::PatchOps,
                source,
            },
        )?;
        debug!(env = %self.name, applied, patched, "patched private tree");

        let temp_root = config.temp_root();
        let options = BuildOptions {
            temp_root: &temp_root,
            config_name: &config.build.config_name,
            target: &config.build.target,
            timeout: config.build.timeout(),
        };
        let unexpected = |source: BuildError| SetupError::Unexpected {
            stage: SetupStage::Build,
            source: source.into(),
        };
        let attempt = build_tree(harness.builder.as_ref(), &options, &source_root)
            .map_err(unexpected)?;
        self.build_log = Some(attempt.log.clone());
        attempt.outcome.map_err(unexpected)?;

        if !log_reports_success(&attempt.log, &config.build.success_marker) {
            return Err(SetupError::Build {
                name: self.name.clone(),
                log: attempt.log,
            });
        }
        Ok(())
    }

    fn fail(&mut self, harness: &Harness, err: &SetupError) {
        error!(
            env = %self.name,
            classification = err.classification(),
            error = %err,
            build_log = self.build_log.as_deref().unwrap_or(""),
            "environment setup failed"
        );
        self.state = EnvState::Failed;

        let tree_is_ours = !matches!(
            err,
            SetupError::Checkpoint(
                CheckpointError::TargetExists(_) | CheckpointError::MissingTemplate { .. }
            )
        );
        if tree_is_ours && !harness.config().keep_failed_trees {
            if let Err(e) = harness.checkpointer().uninstall(&self.name) {
                warn!(env = %self.name, error = %e, "failed to remove partial tree");
            }
            self.source_root = None;
        }
    }

    /// Release the private tree. Safe to call at any point, any number of times.
    pub fn teardown(&mut self, harness: &Harness) -> Result<(), CheckpointError> {
        if self.state == EnvState::Built {
            self.state = EnvState::Blueprint;
        }
        self.source_root = None;
        harness.checkpointer().uninstall(&self.name)?;
        debug!(env = %self.name, "environment torn down");
        Ok(())
    }
}
