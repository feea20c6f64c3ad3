//! Declaring environments, matches and test cases.
//!
//! A [`Blueprint`] is threaded through a suite's declarations and partitions
//! them into environments, matches and test cases. Mutating calls
//! (`replace_class`, `replace_code`, `stub_member_call`, `stub_static_call`)
//! fork a fresh environment once the current one has been used by a match,
//! so a match never sees patches declared after it:
//!
//! ```
//! use player_patcher::blueprint::{Blueprint, EnvId};
//!
//! let mut bp = Blueprint::new();
//! bp.map("arena");
//! bp.vs("sprinter");
//! bp.add_match(|m| m.it("wins", |ctx| ctx.assert_contains("wins"))).unwrap();
//! bp.add_match(|_| {}).unwrap();
//! bp.stub_member_call("move", "tests.Stubs.move").unwrap();
//! bp.add_match(|_| {}).unwrap();
//!
//! let plan = bp.finish();
//! assert_eq!(plan.environments().len(), 2);
//! assert_eq!(plan.matches()[1].environment, EnvId(0));
//! assert_eq!(plan.matches()[2].environment, EnvId(1));
//! ```

use crate::case::{AssertionFailure, MatchContext, TestCase};
use crate::env::{
    CheckpointError, Environment, Harness, SealedEnvironment, SetupError, Template,
};
use crate::ops::{ClassName, FileOp, FragmentRef, InvalidClassName, PatchOp};
use crate::rewrite::{is_identifier_char, is_word_char};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BlueprintError {
    #[error("a match needs a {0} before it can be declared")]
    MissingSetting(&'static str),

    #[error("unknown option name '{name}'{}", suggestion_suffix(.suggestion))]
    UnknownOptionName {
        name: String,
        suggestion: Option<String>,
    },

    #[error("option needs a name or a key")]
    MissingOptionKey,

    #[error("invalid side '{0}': expected 'a' or 'b'")]
    InvalidSide(String),

    #[error(transparent)]
    InvalidClassName(#[from] InvalidClassName),

    #[error("invalid fragment label '{0}': expected letters, digits and underscores")]
    InvalidLabel(String),

    #[error("invalid stub {role} '{name}'")]
    InvalidStubName { role: &'static str, name: String },

    #[error(transparent)]
    Sealed(#[from] SealedEnvironment),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

/// Which side of the match the program under test plays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Side {
    #[default]
    A,
    B,
}

impl FromStr for Side {
    type Err = BlueprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "a" => Ok(Side::A),
            "b" => Ok(Side::B),
            _ => Err(BlueprintError::InvalidSide(s.to_string())),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("a"),
            Side::B => f.write_str("b"),
        }
    }
}

/// A map by name, or a map shipped with the environment's test suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapRef {
    Named(String),
    Suite(String),
}

impl MapRef {
    pub fn name(&self) -> &str {
        match self {
            MapRef::Named(name) | MapRef::Suite(name) => name,
        }
    }
}

/// Index of an environment in a [`SuitePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvId(pub usize);

/// Index of a match in a [`SuitePlan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchId(pub usize);

/// Settings a match is played with, frozen when it is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub side: Side,
    pub opponent: String,
    pub map: MapRef,
    pub environment: EnvId,
    pub options: BTreeMap<String, String>,
}

impl Match {
    pub fn description(&self) -> String {
        let mut description = format!(
            "as {} vs {} on {}",
            self.side,
            self.opponent,
            self.map.name()
        );
        for (key, value) in &self.options {
            description.push_str(&format!(" {key}={value}"));
        }
        description
    }
}

/// Scope of one match declaration; test cases can only be added here.
pub struct MatchScope {
    id: MatchId,
    tests: Vec<TestCase>,
}

impl MatchScope {
    pub fn id(&self) -> MatchId {
        self.id
    }

    /// Add a test case checked against this match's output.
    pub fn it<F>(&mut self, label: impl Into<String>, assertion: F)
    where
        F: Fn(&MatchContext<'_>) -> Result<(), AssertionFailure> + Send + Sync + 'static,
    {
        self.tests
            .push(TestCase::new(label, self.id, Box::new(assertion)));
    }
}

/// Accumulates one suite's declarations.
#[derive(Debug)]
pub struct Blueprint {
    map: Option<MapRef>,
    opponent: Option<String>,
    side: Side,
    options: BTreeMap<String, String>,
    option_names: BTreeMap<String, String>,
    current: Environment,
    current_used: bool,
    environments: Vec<Environment>,
    matches: Vec<Match>,
    tests: Vec<TestCase>,
}

impl Default for Blueprint {
    fn default() -> Self {
        Self::new()
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self {
            map: None,
            opponent: None,
            side: Side::default(),
            options: BTreeMap::new(),
            option_names: BTreeMap::new(),
            current: Environment::new(),
            current_used: false,
            environments: Vec::new(),
            matches: Vec::new(),
            tests: Vec::new(),
        }
    }

    /// Symbolic option names accepted by [`Blueprint::named_option`], mapped
    /// to engine keys.
    pub fn with_option_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.option_names = names;
        self
    }

    pub fn map(&mut self, name: impl Into<String>) {
        self.map = Some(MapRef::Named(name.into()));
    }

    pub fn suite_map(&mut self, name: impl Into<String>) {
        self.map = Some(MapRef::Suite(name.into()));
    }

    pub fn vs(&mut self, opponent: impl Into<String>) {
        self.opponent = Some(opponent.into());
    }

    pub fn side(&mut self, side: Side) {
        self.side = side;
    }

    /// Set an engine option for following matches; `None` removes it.
    pub fn option(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        match value {
            Some(value) => {
                self.options.insert(key, value);
            }
            None => {
                self.options.remove(&key);
            }
        }
    }

    /// Like [`Blueprint::option`], with the key looked up by symbolic name.
    pub fn named_option(&mut self, name: &str, value: Option<String>) -> Result<(), BlueprintError> {
        let Some(key) = self.option_names.get(name).cloned() else {
            return Err(BlueprintError::UnknownOptionName {
                name: name.to_string(),
                suggestion: self.closest_option_name(name),
            });
        };
        self.option(key, value);
        Ok(())
    }

    fn closest_option_name(&self, name: &str) -> Option<String> {
        self.option_names
            .keys()
            .map(|known| (strsim::jaro_winkler(name, known), known))
            .filter(|(score, _)| *score > 0.8)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, known)| known.clone())
    }

    /// Archive the current environment if a match already uses it.
    fn env_change(&mut self) {
        if self.current_used {
            let used = std::mem::replace(&mut self.current, Environment::new());
            debug!(env = used.name(), "forking environment after use by a match");
            self.environments.push(used);
            self.current_used = false;
        }
    }

    pub fn replace_class(&mut self, target: &str, source: &str) -> Result<(), BlueprintError> {
        let op = FileOp::WholeFile {
            target: ClassName::parse(target)?,
            source: ClassName::parse(source)?,
        };
        self.env_change();
        self.current.file_op(op)?;
        Ok(())
    }

    pub fn replace_code(
        &mut self,
        target_class: &str,
        target_label: &str,
        source_class: &str,
        source_label: &str,
    ) -> Result<(), BlueprintError> {
        let op = FileOp::Fragment {
            target: fragment(target_class, target_label)?,
            source: fragment(source_class, source_label)?,
        };
        self.env_change();
        self.current.file_op(op)?;
        Ok(())
    }

    /// Redirect `[recv.]source(...)` calls to the static `target(recv, ...)`.
    pub fn stub_member_call(&mut self, source: &str, target: &str) -> Result<(), BlueprintError> {
        check_stub_names(source, target)?;
        self.env_change();
        self.current.patch_op(PatchOp::StubMember {
            source: source.to_string(),
            target: target.to_string(),
        })?;
        Ok(())
    }

    /// Redirect `[recv.]source(...)` calls to the static `target(...)`.
    pub fn stub_static_call(&mut self, source: &str, target: &str) -> Result<(), BlueprintError> {
        check_stub_names(source, target)?;
        self.env_change();
        self.current.patch_op(PatchOp::StubStatic {
            source: source.to_string(),
            target: target.to_string(),
        })?;
        Ok(())
    }

    /// Declare a match with the current settings and environment.
    ///
    /// Test cases are added through the [`MatchScope`] passed to `block`.
    pub fn add_match<F>(&mut self, block: F) -> Result<MatchId, BlueprintError>
    where
        F: FnOnce(&mut MatchScope),
    {
        let map = self.map.clone().ok_or(BlueprintError::MissingSetting("map"))?;
        let opponent = self
            .opponent
            .clone()
            .ok_or(BlueprintError::MissingSetting("opponent"))?;

        self.current_used = true;
        let id = MatchId(self.matches.len());
        let declared = Match {
            side: self.side,
            opponent,
            map,
            environment: EnvId(self.environments.len()),
            options: self.options.clone(),
        };

        let mut scope = MatchScope {
            id,
            tests: Vec::new(),
        };
        block(&mut scope);
        debug!(
            match_id = id.0,
            env = self.current.name(),
            tests = scope.tests.len(),
            "declared match"
        );
        self.tests.append(&mut scope.tests);
        self.matches.push(declared);
        Ok(id)
    }

    /// End the declarations. The current environment is kept only if used.
    pub fn finish(mut self) -> SuitePlan {
        if self.current_used {
            self.environments.push(self.current);
        }
        SuitePlan {
            environments: self.environments,
            matches: self.matches,
            tests: self.tests,
        }
    }
}

fn fragment(class: &str, label: &str) -> Result<FragmentRef, BlueprintError> {
    if label.is_empty() || !label.chars().all(is_word_char) {
        return Err(BlueprintError::InvalidLabel(label.to_string()));
    }
    Ok(FragmentRef {
        class: ClassName::parse(class)?,
        label: label.to_string(),
    })
}

fn check_stub_names(source: &str, target: &str) -> Result<(), BlueprintError> {
    if source.is_empty() || !source.chars().all(is_word_char) {
        return Err(BlueprintError::InvalidStubName {
            role: "source",
            name: source.to_string(),
        });
    }
    if ClassName::parse(target).is_err() || !target.chars().all(is_identifier_char) {
        return Err(BlueprintError::InvalidStubName {
            role: "target",
            name: target.to_string(),
        });
    }
    Ok(())
}

/// Result of evaluating one test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    pub description: String,
    pub failure: Option<AssertionFailure>,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// The partition a finished [`Blueprint`] produced.
#[derive(Debug)]
pub struct SuitePlan {
    environments: Vec<Environment>,
    matches: Vec<Match>,
    tests: Vec<TestCase>,
}

impl SuitePlan {
    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn environment(&self, id: EnvId) -> Option<&Environment> {
        self.environments.get(id.0)
    }

    pub fn get_match(&self, id: MatchId) -> Option<&Match> {
        self.matches.get(id.0)
    }

    pub fn tests_for(&self, id: MatchId) -> impl Iterator<Item = &TestCase> {
        self.tests.iter().filter(move |t| t.match_id() == id)
    }

    /// Matches whose environment is built.
    pub fn runnable_matches(&self) -> impl Iterator<Item = (MatchId, &Match)> {
        self.matches
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                self.environments
                    .get(m.environment.0)
                    .is_some_and(Environment::available)
            })
            .map(|(i, m)| (MatchId(i), m))
    }

    /// Where the match runner should load the match's map from.
    pub fn map_location(&self, id: MatchId, harness: &Harness) -> Option<String> {
        let m = self.get_match(id)?;
        match &m.map {
            MapRef::Named(name) => Some(name.clone()),
            MapRef::Suite(name) => {
                let env = self.environment(m.environment)?;
                Some(env.suite_map_path(harness, name).display().to_string())
            }
        }
    }

    /// Realize every environment, continuing past failures.
    pub fn setup_all(
        &mut self,
        harness: &Harness,
        template: &Template,
    ) -> Vec<(EnvId, Result<(), SetupError>)> {
        self.environments
            .iter_mut()
            .enumerate()
            .map(|(i, env)| (EnvId(i), env.setup(harness, template)))
            .collect()
    }

    /// Tear down every environment, returning the ones that could not be removed.
    pub fn teardown_all(&mut self, harness: &Harness) -> Vec<(EnvId, CheckpointError)> {
        let mut failures = Vec::new();
        for (i, env) in self.environments.iter_mut().enumerate() {
            if let Err(e) = env.teardown(harness) {
                warn!(env = env.name(), error = %e, "teardown failed");
                failures.push((EnvId(i), e));
            }
        }
        failures
    }

    /// Check every test case of a match against the match output.
    pub fn evaluate(&self, id: MatchId, output: &str) -> Vec<TestOutcome> {
        let Some(m) = self.get_match(id) else {
            return Vec::new();
        };
        let description = m.description();
        let ctx = MatchContext::new(output, &description);
        self.tests_for(id)
            .map(|test| TestOutcome {
                description: test.description(m),
                failure: test.check_output(&ctx),
            })
            .collect()
    }
}
