//! External build integration.
//!
//! A build runs in a scratch directory that exists only for one attempt and
//! is removed when the attempt ends, whatever the outcome. Success is decided
//! by the captured log alone: it must contain the success marker on a line
//! of its own.

use crate::env::errors::BuildError;
use crate::identity;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Marker line a successful build prints.
pub const SUCCESS_MARKER: &str = "BUILD SUCCESSFUL";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Everything a build driver needs for one attempt.
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// Scratch directory, removed after the attempt
    pub work_dir: &'a Path,
    pub descriptor: &'a Path,
    /// Where the driver must write the combined build output
    pub log_path: &'a Path,
    pub target: &'a str,
    pub config_name: &'a str,
    /// Source root of the private tree being built
    pub source_root: &'a Path,
    pub timeout: Option<Duration>,
}

/// Integration with the competition's build tooling.
pub trait BuildDriver {
    /// Write the build descriptor the build will be driven by.
    fn write_descriptor(
        &self,
        path: &Path,
        config_name: &str,
        source_root: &Path,
    ) -> Result<(), BuildError>;

    /// Run the build to completion, writing all output to `request.log_path`.
    ///
    /// A build that runs and fails is not an error here; only failures to
    /// run at all (or a timeout) are.
    fn run_build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError>;
}

/// Knobs for one build attempt.
#[derive(Debug, Clone)]
pub struct BuildOptions<'a> {
    pub temp_root: &'a Path,
    pub config_name: &'a str,
    pub target: &'a str,
    pub timeout: Option<Duration>,
}

/// Captured outcome of one build attempt.
#[derive(Debug)]
pub struct BuildAttempt {
    /// Full build log; empty if the build never wrote one
    pub log: String,
    /// `Err` if the build could not run to completion
    pub outcome: Result<(), BuildError>,
}

impl BuildAttempt {
    pub fn succeeded(&self, marker: &str) -> bool {
        self.outcome.is_ok() && log_reports_success(&self.log, marker)
    }
}

/// True if `log` contains `marker` as a line of its own, between newlines.
pub fn log_reports_success(log: &str, marker: &str) -> bool {
    log.contains(&format!("\n{marker}\n"))
}

/// Run one build of `source_root` in a scoped scratch directory.
///
/// The outer `Err` covers failures to prepare the attempt; failures of the
/// build process itself are reported in [`BuildAttempt::outcome`] alongside
/// whatever log was captured.
pub fn build_tree(
    driver: &dyn BuildDriver,
    options: &BuildOptions<'_>,
    source_root: &Path,
) -> Result<BuildAttempt, BuildError> {
    fs::create_dir_all(options.temp_root)?;
    let scratch = tempfile::Builder::new()
        .prefix(&format!("{}_", identity::build_token()))
        .tempdir_in(options.temp_root)?;

    let descriptor = scratch.path().join("build.descriptor");
    let log_path = scratch.path().join("build.log");
    driver.write_descriptor(&descriptor, options.config_name, source_root)?;

    let request = BuildRequest {
        work_dir: scratch.path(),
        descriptor: &descriptor,
        log_path: &log_path,
        target: options.target,
        config_name: options.config_name,
        source_root,
        timeout: options.timeout,
    };
    info!(source_root = %source_root.display(), target = options.target, "starting build");
    let outcome = driver.run_build(&request);

    let log = match fs::read(&log_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    // Scratch directory goes away here; close() surfaces removal errors
    if let Err(e) = scratch.close() {
        warn!(error = %e, "failed to remove build scratch directory");
    }

    Ok(BuildAttempt { log, outcome })
}

/// Builds by running a command, e.g. `["ant", "-f", "build.xml"]`.
///
/// The child runs inside the scratch directory with stdout and stderr both
/// appended to the build log, and sees the attempt through environment
/// variables: `PATCHER_SOURCE_ROOT`, `PATCHER_DESCRIPTOR`, `PATCHER_TARGET`
/// and `PATCHER_CONFIG`.
#[derive(Debug, Clone)]
pub struct CommandBuild {
    program: String,
    args: Vec<String>,
}

impl CommandBuild {
    pub fn new(argv: &[String]) -> Result<Self, BuildError> {
        let (program, args) = argv.split_first().ok_or(BuildError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(BuildError::EmptyCommand);
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl BuildDriver for CommandBuild {
    fn write_descriptor(
        &self,
        path: &Path,
        config_name: &str,
        source_root: &Path,
    ) -> Result<(), BuildError> {
        let descriptor = format!(
            "config = {config_name}\nsource_root = {}\n",
            source_root.display()
        );
        fs::write(path, descriptor)?;
        Ok(())
    }

    fn run_build(&self, request: &BuildRequest<'_>) -> Result<(), BuildError> {
        let log = File::create(request.log_path)?;
        let err_log = log.try_clone()?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(request.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(err_log))
            .env("PATCHER_SOURCE_ROOT", request.source_root)
            .env("PATCHER_DESCRIPTOR", request.descriptor)
            .env("PATCHER_TARGET", request.target)
            .env("PATCHER_CONFIG", request.config_name);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group; a timeout kills everything the build started
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| BuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let status = match request.timeout {
            None => child.wait()?,
            Some(limit) => wait_with_deadline(&mut child, limit)?,
        };
        debug!(program = %self.program, %status, "build command exited");
        Ok(())
    }
}

fn wait_with_deadline(
    child: &mut Child,
    limit: Duration,
) -> Result<std::process::ExitStatus, BuildError> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            warn!(pid = child.id(), ?limit, "build timed out; killing it");
            kill_build(child);
            return Err(BuildError::TimedOut { after: limit });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Kill the build's process group (the child alone elsewhere) and reap it.
fn kill_build(child: &mut Child) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        // SAFETY: plain syscall; the group was created for this child at spawn
        if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
            let error = std::io::Error::last_os_error();
            warn!(pid = pgid, %error, "failed to kill build process group");
            if let Err(error) = child.kill() {
                warn!(pid = pgid, %error, "failed to kill build process");
            }
        }
    }
    #[cfg(not(unix))]
    if let Err(error) = child.kill() {
        warn!(pid = child.id(), %error, "failed to kill build process");
    }

    if let Err(error) = child.wait() {
        warn!(pid = child.id(), %error, "failed to reap build process");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_marker_detection() {
        assert!(log_reports_success("compiling...\nBUILD SUCCESSFUL\n", SUCCESS_MARKER));
        assert!(!log_reports_success("compiling...\nBUILD FAILED\n", SUCCESS_MARKER));
        assert!(!log_reports_success("compiling...\nBUILD SUCCESSFUL", SUCCESS_MARKER));
        assert!(!log_reports_success("x\nNOT BUILD SUCCESSFUL\n", SUCCESS_MARKER));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(CommandBuild::new(&[]), Err(BuildError::EmptyCommand)));
        assert!(matches!(
            CommandBuild::new(&[" ".to_string()]),
            Err(BuildError::EmptyCommand)
        ));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> CommandBuild {
        CommandBuild::new(&["sh".to_string(), "-c".to_string(), script.to_string()]).unwrap()
    }

    #[test]
    #[cfg(unix)]
    fn test_command_build_captures_log_and_cleans_scratch() {
        let temp_root = tempfile::tempdir().unwrap();
        let source_root = tempfile::tempdir().unwrap();
        let driver = sh("echo compiling...; echo \"$PATCHER_TARGET\"; cat \"$PATCHER_DESCRIPTOR\"; echo BUILD SUCCESSFUL");
        let options = BuildOptions {
            temp_root: temp_root.path(),
            config_name: "bc.conf",
            target: "build",
            timeout: None,
        };

        let attempt = build_tree(&driver, &options, source_root.path()).unwrap();

        assert!(attempt.succeeded(SUCCESS_MARKER));
        assert!(attempt.log.starts_with("compiling...\nbuild\nconfig = bc.conf\n"));
        assert_eq!(fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_failed_build_keeps_log() {
        let temp_root = tempfile::tempdir().unwrap();
        let driver = sh("echo compiling...; echo 'Foo.java:3: error' >&2; echo BUILD FAILED; exit 1");
        let options = BuildOptions {
            temp_root: temp_root.path(),
            config_name: "bc.conf",
            target: "build",
            timeout: None,
        };

        let attempt = build_tree(&driver, &options, temp_root.path()).unwrap();

        assert!(attempt.outcome.is_ok());
        assert!(!attempt.succeeded(SUCCESS_MARKER));
        assert!(attempt.log.contains("Foo.java:3: error"));
        assert!(attempt.log.contains("BUILD FAILED"));
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_kills_build() {
        let temp_root = tempfile::tempdir().unwrap();
        let driver = sh("echo started; sleep 30");
        let options = BuildOptions {
            temp_root: temp_root.path(),
            config_name: "bc.conf",
            target: "build",
            timeout: Some(Duration::from_millis(200)),
        };

        let started = Instant::now();
        let attempt = build_tree(&driver, &options, temp_root.path()).unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(matches!(attempt.outcome, Err(BuildError::TimedOut { .. })));
        assert!(attempt.log.contains("started"));
        assert_eq!(fs::read_dir(temp_root.path()).unwrap().count(), 0);
    }

    #[test]
    #[cfg(unix)]
    fn test_timeout_kills_processes_started_by_build() {
        let temp_root = tempfile::tempdir().unwrap();
        let witness = tempfile::tempdir().unwrap();
        let marker = witness.path().join("still-running");
        let driver = sh(&format!(
            "(sleep 1; touch '{}'); echo done",
            marker.display()
        ));
        let options = BuildOptions {
            temp_root: temp_root.path(),
            config_name: "bc.conf",
            target: "build",
            timeout: Some(Duration::from_millis(200)),
        };

        let attempt = build_tree(&driver, &options, temp_root.path()).unwrap();
        assert!(matches!(attempt.outcome, Err(BuildError::TimedOut { .. })));

        thread::sleep(Duration::from_millis(1800));
        assert!(!marker.exists(), "subshell outlived the build timeout");
    }

    #[test]
    fn test_missing_program() {
        let temp_root = tempfile::tempdir().unwrap();
        let driver = CommandBuild::new(&["definitely-not-a-build-tool-xyz".to_string()]).unwrap();
        let options = BuildOptions {
            temp_root: temp_root.path(),
            config_name: "bc.conf",
            target: "build",
            timeout: None,
        };

        let attempt = build_tree(&driver, &options, temp_root.path()).unwrap();
        assert!(matches!(attempt.outcome, Err(BuildError::Spawn { .. })));
        assert!(!attempt.succeeded(SUCCESS_MARKER));
    }
}
