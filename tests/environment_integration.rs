//! End-to-end environment lifecycle: checkpoint, patch, build, teardown.
//!
//! Builds run a real `sh -c` command that fails whenever the private copy of
//! `Nav.java` contains the word BROKEN.

#![cfg(unix)]

use player_patcher::blueprint::{Blueprint, EnvId, MatchId};
use player_patcher::config::{BuildConfig, HarnessConfig};
use player_patcher::env::{EnvState, Harness, Template};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const BUILD_SCRIPT: &str = r#"echo compiling...
if grep -q BROKEN "$PATCHER_SOURCE_ROOT"/*/Nav.java; then
  echo "Nav.java:1: error: BROKEN" >&2
  echo BUILD FAILED
else
  echo BUILD SUCCESSFUL
fi"#;

struct Workspace {
    templates: TempDir,
    work: TempDir,
    scratch: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let templates = TempDir::new().unwrap();
        let root = templates.path().join("alpha");
        let pkg = root.join("src/alpha");
        fs::create_dir_all(pkg.join("tests")).unwrap();
        fs::create_dir_all(root.join("suite/maps")).unwrap();

        fs::write(
            pkg.join("Robot.java"),
            "package alpha;\n\npublic class Robot {\n  void step() {\n    rc.move(dir);\n    //$-stubs\n    rc.move(dir);\n    //$+stubs\n  }\n}\n",
        )
        .unwrap();
        fs::write(
            pkg.join("Nav.java"),
            "package alpha;\n\npublic class Nav {\n  //$+mark:route\n  int route() { return 0; }\n  //$-mark:route\n}\n",
        )
        .unwrap();
        fs::write(
            pkg.join("tests/FakeNav.java"),
            "package alpha.tests;\n\npublic class FakeNav {\n  //$+mark:route\n  int route() { return FakeNav.SOUTH; }\n  //$-mark:route\n  static final int SOUTH = 4;\n}\n",
        )
        .unwrap();
        fs::write(
            pkg.join("tests/BrokenNav.java"),
            "package alpha.tests;\n\npublic class BrokenNav { BROKEN }\n",
        )
        .unwrap();
        fs::write(
            pkg.join("tests/Stubs.java"),
            "package alpha.tests;\n//$-stubs\n\npublic class Stubs {\n  public static void move(Object rc, int dir) {}\n}\n",
        )
        .unwrap();
        fs::write(root.join("suite/maps/maze.xml"), "<map/>\n").unwrap();

        Self {
            templates,
            work: TempDir::new().unwrap(),
            scratch: TempDir::new().unwrap(),
        }
    }

    fn config(&self, script: &str) -> HarnessConfig {
        HarnessConfig {
            work_root: self.work.path().to_path_buf(),
            temp_root: Some(self.scratch.path().to_path_buf()),
            build: BuildConfig {
                command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
                ..BuildConfig::default()
            },
            ..HarnessConfig::default()
        }
    }

    fn harness(&self, script: &str) -> Harness {
        Harness::from_config(self.config(script), self.templates.path()).unwrap()
    }
}

fn template() -> Template {
    Template::new("alpha", "master")
}

fn private_file(work: &Path, env: &str, file: &str) -> String {
    fs::read_to_string(work.join(env).join("src").join(env).join(file)).unwrap()
}

#[test]
fn test_forked_environments_build_independently() {
    let ws = Workspace::new();
    let harness = ws.harness(BUILD_SCRIPT);

    let mut bp = Blueprint::new();
    bp.map("arena");
    bp.vs("sprinter");
    bp.add_match(|m| m.it("wins", |ctx| ctx.assert_contains("A wins")))
        .unwrap();
    bp.stub_member_call("move", "tests.Stubs.move").unwrap();
    bp.add_match(|_| {}).unwrap();
    bp.replace_class("Nav", "tests.BrokenNav").unwrap();
    bp.add_match(|_| {}).unwrap();

    let mut plan = bp.finish();
    assert_eq!(plan.environments().len(), 3);

    let results = plan.setup_all(&harness, &template());
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_ok());
    let failure = results[2].1.as_ref().unwrap_err();
    assert_eq!(failure.classification(), "build-failure");

    let names: Vec<String> = plan
        .environments()
        .iter()
        .map(|env| env.name().to_string())
        .collect();

    // First environment predates the stub
    let robot = private_file(ws.work.path(), &names[0], "Robot.java");
    assert!(robot.contains("    rc.move(dir);\n    //$-stubs"));

    // Second environment is stubbed, except inside the disabled region
    let robot = private_file(ws.work.path(), &names[1], "Robot.java");
    assert!(robot.contains(&format!("    {}.tests.Stubs.move(rc, dir);\n", names[1])));
    assert!(robot.contains("//$-stubs\n    rc.move(dir);\n    //$+stubs"));

    // Failed environment: unavailable, tree gone, log kept
    let broken = plan.environment(EnvId(2)).unwrap();
    assert_eq!(broken.state(), EnvState::Failed);
    assert!(!ws.work.path().join(&names[2]).exists());
    let log = broken.build_log().unwrap();
    assert!(log.contains("Nav.java:1: error: BROKEN"));
    assert!(log.contains("BUILD FAILED"));

    let runnable: Vec<MatchId> = plan.runnable_matches().map(|(id, _)| id).collect();
    assert_eq!(runnable, vec![MatchId(0), MatchId(1)]);

    // Build scratch directories never outlive their attempt
    assert_eq!(fs::read_dir(ws.scratch.path()).unwrap().count(), 0);

    assert!(plan.teardown_all(&harness).is_empty());
    for name in &names {
        assert!(!ws.work.path().join(name).exists());
    }
    assert!(plan.environments().iter().all(|env| !env.available()));
}

#[test]
fn test_fragment_replacement_and_suite_map() {
    let ws = Workspace::new();
    let harness = ws.harness(BUILD_SCRIPT);

    let mut bp = Blueprint::new();
    bp.suite_map("maze");
    bp.vs("sprinter");
    bp.replace_code("Nav", "route", "tests.FakeNav", "route")
        .unwrap();
    let id = bp.add_match(|_| {}).unwrap();

    let mut plan = bp.finish();
    for (_, result) in plan.setup_all(&harness, &template()) {
        result.unwrap();
    }

    let env = plan.environment(EnvId(0)).unwrap();
    let nav = private_file(ws.work.path(), env.name(), "Nav.java");
    assert_eq!(
        nav,
        format!(
            "package {};\n\npublic class Nav {{\n  //$+mark:route\n  int route() {{ return Nav.SOUTH; }}\n  //$-mark:route\n}}\n",
            env.name()
        )
    );

    let map = plan.map_location(id, &harness).unwrap();
    assert!(map.ends_with("suite/maps/maze.xml"));
    assert!(Path::new(&map).exists());

    plan.teardown_all(&harness);
}

#[test]
fn test_missing_targets_are_skipped() {
    let ws = Workspace::new();
    let harness = ws.harness(BUILD_SCRIPT);

    let mut bp = Blueprint::new();
    bp.map("arena");
    bp.vs("sprinter");
    bp.replace_class("nowhere.Nav", "tests.BrokenNav").unwrap();
    bp.replace_class("Nav", "tests.Missing").unwrap();
    bp.replace_code("Robot", "route", "tests.FakeNav", "route")
        .unwrap();
    bp.add_match(|_| {}).unwrap();

    let mut plan = bp.finish();
    let results = plan.setup_all(&harness, &template());
    assert!(results[0].1.is_ok(), "skipped operations must not fail setup");

    let env = plan.environment(EnvId(0)).unwrap();
    let nav = private_file(ws.work.path(), env.name(), "Nav.java");
    assert!(nav.contains("return 0;"));
    let robot = private_file(ws.work.path(), env.name(), "Robot.java");
    assert!(!robot.contains("route"));

    plan.teardown_all(&harness);
}

#[test]
fn test_build_timeout_is_unexpected_failure() {
    let ws = Workspace::new();
    let mut config = ws.config("echo started; sleep 30");
    config.build.timeout_secs = Some(1);
    let harness = Harness::from_config(config, ws.templates.path()).unwrap();

    let mut bp = Blueprint::new();
    bp.map("arena");
    bp.vs("sprinter");
    bp.add_match(|_| {}).unwrap();

    let mut plan = bp.finish();
    let results = plan.setup_all(&harness, &template());
    let err = results[0].1.as_ref().unwrap_err();
    assert_eq!(err.classification(), "unexpected-setup-failure");
    assert!(err.to_string().contains("during build"));

    let env = plan.environment(EnvId(0)).unwrap();
    assert!(!env.available());
    assert!(!ws.work.path().join(env.name()).exists());
}

#[test]
fn test_keep_failed_trees() {
    let ws = Workspace::new();
    let mut config = ws.config("echo BUILD FAILED");
    config.keep_failed_trees = true;
    let harness = Harness::from_config(config, ws.templates.path()).unwrap();

    let mut bp = Blueprint::new();
    bp.map("arena");
    bp.vs("sprinter");
    bp.add_match(|_| {}).unwrap();

    let mut plan = bp.finish();
    let results = plan.setup_all(&harness, &template());
    assert!(results[0].1.is_err());

    let name = plan.environment(EnvId(0)).unwrap().name().to_string();
    assert!(ws.work.path().join(&name).exists());

    plan.teardown_all(&harness);
    assert!(!ws.work.path().join(&name).exists());
}
