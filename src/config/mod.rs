pub mod loader;
pub mod plan;
pub mod schema;

pub use loader::{
    load_harness_from_path, load_harness_from_str, load_suite_from_path, load_suite_from_str,
    ConfigError,
};
pub use plan::PlanError;
pub use schema::{
    BuildConfig, HarnessConfig, Step, SuiteConfig, SuiteMeta, TestSpec, ValidationError,
    ValidationIssue,
};
