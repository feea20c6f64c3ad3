use crate::blueprint::Side;
use crate::ops::ClassName;
use crate::rewrite::{is_identifier_char, is_word_char};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Where environments live and how they are built.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Private trees are created as `<work_root>/<environment name>`
    pub work_root: PathBuf,
    /// Build scratch directories; the OS temp dir when unset
    pub temp_root: Option<PathBuf>,
    pub source_extension: String,
    /// First argument passed to member stubs when a call has no receiver
    pub self_token: String,
    pub revision: String,
    pub keep_failed_trees: bool,
    pub suite_map_dir: PathBuf,
    pub map_extension: String,
    pub build: BuildConfig,
    /// Symbolic option name -> engine option key
    pub option_names: BTreeMap<String, String>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".player-patcher/work"),
            temp_root: None,
            source_extension: "java".to_string(),
            self_token: "this".to_string(),
            revision: "master".to_string(),
            keep_failed_trees: false,
            suite_map_dir: PathBuf::from("suite/maps"),
            map_extension: "xml".to_string(),
            build: BuildConfig::default(),
            option_names: BTreeMap::new(),
        }
    }
}

impl HarnessConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.build.command.first().map_or(true, |p| p.trim().is_empty()) {
            issues.push(ValidationIssue::MissingField {
                step: None,
                field: "build.command",
            });
        }
        if self.source_extension.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                step: None,
                field: "source_extension",
            });
        }
        if self.build.success_marker.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                step: None,
                field: "build.success_marker",
            });
        }
        if self.self_token.is_empty() || !self.self_token.chars().all(is_identifier_char) {
            issues.push(ValidationIssue::InvalidValue {
                step: None,
                message: format!("self_token '{}' is not an identifier", self.self_token),
            });
        }
        if self.build.timeout_secs == Some(0) {
            issues.push(ValidationIssue::InvalidValue {
                step: None,
                message: "build.timeout_secs must be positive".to_string(),
            });
        }

        ValidationError::from_issues(issues)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Program and arguments, e.g. `["ant", "-f", "build.xml"]`
    pub command: Vec<String>,
    pub config_name: String,
    pub target: String,
    pub timeout_secs: Option<u64>,
    pub success_marker: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            command: vec!["ant".to_string()],
            config_name: "bc.conf".to_string(),
            target: "build".to_string(),
            timeout_secs: None,
            success_marker: crate::env::SUCCESS_MARKER.to_string(),
        }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// A declarative test suite: steps replayed through a blueprint.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    #[serde(default)]
    pub meta: SuiteMeta,
    /// Template program the suite's environments are copied from
    pub program: String,
    /// Overrides the harness revision
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SuiteMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum Step {
    Map {
        name: String,
    },
    SuiteMap {
        name: String,
    },
    Vs {
        name: String,
    },
    Side {
        value: String,
    },
    /// Exactly one of `name` (symbolic) or `key` (engine key). No `value`
    /// removes the option.
    #[serde(rename = "option")]
    SetOption {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        value: Option<String>,
    },
    ReplaceClass {
        target: String,
        source: String,
    },
    ReplaceCode {
        target: String,
        target_label: String,
        source: String,
        source_label: String,
    },
    StubMemberCall {
        source: String,
        target: String,
    },
    StubStaticCall {
        source: String,
        target: String,
    },
    Match {
        #[serde(default)]
        tests: Vec<TestSpec>,
    },
}

/// One test case of a `match` step, asserting on the match output.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
    pub label: String,
    #[serde(default)]
    pub contains: Option<String>,
    #[serde(default)]
    pub not_contains: Option<String>,
    #[serde(default)]
    pub matches: Option<String>,
}

impl SuiteConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.program.trim().is_empty() {
            issues.push(ValidationIssue::MissingField {
                step: None,
                field: "program",
            });
        }

        for (idx, step) in self.steps.iter().enumerate() {
            let step_no = Some(idx + 1);
            let mut invalid = |message: String| {
                issues.push(ValidationIssue::InvalidValue {
                    step: step_no,
                    message,
                })
            };

            match step {
                Step::Map { name } | Step::SuiteMap { name } | Step::Vs { name } => {
                    if name.trim().is_empty() {
                        invalid("name must not be empty".to_string());
                    }
                }
                Step::Side { value } => {
                    if value.parse::<Side>().is_err() {
                        invalid(format!("side '{value}' must be 'a' or 'b'"));
                    }
                }
                Step::SetOption { name, key, .. } => {
                    if name.is_some() == key.is_some() {
                        invalid("option needs exactly one of 'name' or 'key'".to_string());
                    }
                }
                Step::ReplaceClass { target, source } => {
                    for class in [target, source] {
                        if ClassName::parse(class).is_err() {
                            invalid(format!("'{class}' is not a dotted class name"));
                        }
                    }
                }
                Step::ReplaceCode {
                    target,
                    target_label,
                    source,
                    source_label,
                } => {
                    for class in [target, source] {
                        if ClassName::parse(class).is_err() {
                            invalid(format!("'{class}' is not a dotted class name"));
                        }
                    }
                    for label in [target_label, source_label] {
                        if label.is_empty() || !label.chars().all(is_word_char) {
                            invalid(format!("'{label}' is not a fragment label"));
                        }
                    }
                }
                Step::StubMemberCall { source, target } | Step::StubStaticCall { source, target } => {
                    if source.is_empty() || !source.chars().all(is_word_char) {
                        invalid(format!("stub source '{source}' is not a method name"));
                    }
                    if ClassName::parse(target).is_err() {
                        invalid(format!("stub target '{target}' is not a dotted method name"));
                    }
                }
                Step::Match { tests } => {
                    for test in tests {
                        if let Err(message) = test.validate() {
                            invalid(message);
                        }
                    }
                }
            }
        }

        ValidationError::from_issues(issues)
    }
}

impl TestSpec {
    fn validate(&self) -> Result<(), String> {
        if self.label.trim().is_empty() {
            return Err("test label must not be empty".to_string());
        }
        let assertions = [&self.contains, &self.not_contains, &self.matches]
            .iter()
            .filter(|a| a.is_some())
            .count();
        if assertions != 1 {
            return Err(format!(
                "test '{}' needs exactly one of 'contains', 'not_contains' or 'matches'",
                self.label
            ));
        }
        if let Some(pattern) = &self.matches {
            if let Err(e) = crate::cache::get_or_compile(pattern) {
                return Err(format!("test '{}' has an invalid pattern: {e}", self.label));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    fn from_issues(issues: Vec<ValidationIssue>) -> Result<(), ValidationError> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField {
        step: Option<usize>,
        field: &'static str,
    },
    InvalidValue {
        step: Option<usize>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { step, field } => match step {
                Some(n) => write!(f, "step {n} missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::InvalidValue { step, message } => match step {
                Some(n) => write!(f, "step {n}: {message}"),
                None => write!(f, "invalid configuration: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_defaults() {
        let config = HarnessConfig::default();
        assert_eq!(config.source_extension, "java");
        assert_eq!(config.build.success_marker, "BUILD SUCCESSFUL");
        assert_eq!(config.build.timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_harness_rejects_empty_command_and_extension() {
        let config = HarnessConfig {
            source_extension: " ".to_string(),
            build: BuildConfig {
                command: Vec::new(),
                ..BuildConfig::default()
            },
            ..HarnessConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.issues.len(), 2);
        assert_eq!(
            err.to_string(),
            "missing required field 'build.command'\nmissing required field 'source_extension'"
        );
    }

    #[test]
    fn test_suite_validation_collects_all_issues() {
        let suite = SuiteConfig {
            program: "alpha".to_string(),
            steps: vec![
                Step::Side {
                    value: "c".to_string(),
                },
                Step::ReplaceClass {
                    target: "../Nav".to_string(),
                    source: "tests.FakeNav".to_string(),
                },
                Step::SetOption {
                    name: None,
                    key: None,
                    value: None,
                },
                Step::Match {
                    tests: vec![TestSpec {
                        label: "wins".to_string(),
                        contains: Some("wins".to_string()),
                        not_contains: None,
                        matches: Some("w.*".to_string()),
                    }],
                },
            ],
            ..SuiteConfig::default()
        };

        let err = suite.validate().unwrap_err();
        assert_eq!(err.issues.len(), 4);
        assert!(err.to_string().starts_with("step 1: side 'c'"));
    }
}
