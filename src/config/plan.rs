//! Replaying a declarative suite file through a [`Blueprint`].

use crate::blueprint::{Blueprint, BlueprintError, Side, SuitePlan};
use crate::case::MatchContext;
use crate::config::schema::{HarnessConfig, Step, SuiteConfig, TestSpec};
use crate::env::Template;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("step {step}: {source}")]
pub struct PlanError {
    pub step: usize,
    #[source]
    pub source: BlueprintError,
}

impl SuiteConfig {
    /// Program and revision the suite's environments are copied from.
    pub fn template(&self, harness: &HarnessConfig) -> Template {
        Template::new(
            self.program.clone(),
            self.revision.clone().unwrap_or_else(|| harness.revision.clone()),
        )
    }

    /// Replay the steps in order. Fork semantics match the programmatic API.
    pub fn plan(&self, harness: &HarnessConfig) -> Result<SuitePlan, PlanError> {
        let mut bp = Blueprint::new().with_option_names(harness.option_names.clone());
        for (idx, step) in self.steps.iter().enumerate() {
            replay(&mut bp, step).map_err(|source| PlanError {
                step: idx + 1,
                source,
            })?;
        }
        Ok(bp.finish())
    }
}

fn replay(bp: &mut Blueprint, step: &Step) -> Result<(), BlueprintError> {
    match step {
        Step::Map { name } => bp.map(name.clone()),
        Step::SuiteMap { name } => bp.suite_map(name.clone()),
        Step::Vs { name } => bp.vs(name.clone()),
        Step::Side { value } => bp.side(value.parse::<Side>()?),
        Step::SetOption { name, key, value } => match (name, key) {
            (Some(name), _) => bp.named_option(name, value.clone())?,
            (None, Some(key)) => bp.option(key.clone(), value.clone()),
            (None, None) => return Err(BlueprintError::MissingOptionKey),
        },
        Step::ReplaceClass { target, source } => bp.replace_class(target, source)?,
        Step::ReplaceCode {
            target,
            target_label,
            source,
            source_label,
        } => bp.replace_code(target, target_label, source, source_label)?,
        Step::StubMemberCall { source, target } => bp.stub_member_call(source, target)?,
        Step::StubStaticCall { source, target } => bp.stub_static_call(source, target)?,
        Step::Match { tests } => {
            bp.add_match(|scope| {
                for test in tests {
                    let spec = test.clone();
                    scope.it(test.label.clone(), move |ctx| check(&spec, ctx));
                }
            })?;
        }
    }
    Ok(())
}

fn check(spec: &TestSpec, ctx: &MatchContext<'_>) -> Result<(), crate::case::AssertionFailure> {
    if let Some(needle) = &spec.contains {
        ctx.assert_contains(needle)?;
    }
    if let Some(needle) = &spec.not_contains {
        ctx.assert_not_contains(needle)?;
    }
    if let Some(pattern) = &spec.matches {
        ctx.assert_matches(pattern)?;
    }
    Ok(())
}
