//! Test cases: a label, a match and an assertion over the match output.

use crate::blueprint::{Match, MatchId};
use crate::cache;
use std::fmt;
use thiserror::Error;

/// A violated expectation. This is a test outcome, not a system fault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct AssertionFailure {
    pub message: String,
}

impl AssertionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// What an assertion can see: the match output and where it came from.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    output: &'a str,
    description: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn new(output: &'a str, description: &'a str) -> Self {
        Self {
            output,
            description,
        }
    }

    pub fn output(&self) -> &'a str {
        self.output
    }

    pub fn description(&self) -> &'a str {
        self.description
    }

    pub fn assert(&self, condition: bool, message: impl Into<String>) -> Result<(), AssertionFailure> {
        if condition {
            Ok(())
        } else {
            Err(AssertionFailure::new(message))
        }
    }

    pub fn assert_contains(&self, needle: &str) -> Result<(), AssertionFailure> {
        self.assert(
            self.output.contains(needle),
            format!("expected output of {} to contain {needle:?}", self.description),
        )
    }

    pub fn assert_not_contains(&self, needle: &str) -> Result<(), AssertionFailure> {
        self.assert(
            !self.output.contains(needle),
            format!("expected output of {} not to contain {needle:?}", self.description),
        )
    }

    /// Passes if any part of the output matches the regular expression.
    pub fn assert_matches(&self, pattern: &str) -> Result<(), AssertionFailure> {
        let regex = cache::get_or_compile(pattern)
            .map_err(|e| AssertionFailure::new(format!("invalid pattern {pattern:?}: {e}")))?;
        self.assert(
            regex.is_match(self.output),
            format!("expected output of {} to match /{pattern}/", self.description),
        )
    }
}

pub type Assertion = Box<dyn Fn(&MatchContext<'_>) -> Result<(), AssertionFailure> + Send + Sync>;

pub struct TestCase {
    label: String,
    match_id: MatchId,
    assertion: Assertion,
}

impl TestCase {
    pub fn new(label: impl Into<String>, match_id: MatchId, assertion: Assertion) -> Self {
        Self {
            label: label.into(),
            match_id,
            assertion,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn match_id(&self) -> MatchId {
        self.match_id
    }

    /// `<match description> <label>`
    pub fn description(&self, m: &Match) -> String {
        format!("{} {}", m.description(), self.label)
    }

    /// Run the assertion. `None` means the case passed.
    ///
    /// Panics inside the assertion are not caught.
    pub fn check_output(&self, ctx: &MatchContext<'_>) -> Option<AssertionFailure> {
        (self.assertion)(ctx).err()
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("label", &self.label)
            .field("match_id", &self.match_id)
            .finish_non_exhaustive()
    }
}
