//! Player Patcher: private, patched builds of competition players for testing
//!
//! Test suites declare how a submitted player's source should be mutated
//! before it is compiled and put into simulated matches: whole classes
//! replaced, labeled code fragments spliced in, and method calls redirected
//! to stubs. This crate turns those declarations into uniquely named private
//! copies of the player's tree, patches and builds them, and evaluates test
//! cases against match output.
//!
//! # Architecture
//!
//! - [`rewrite`]: pure, line-oriented text rewriting (bounded renames,
//!   fragment markers, call-site stubs gated by `//$+stubs` / `//$-stubs`)
//! - [`ops`]: the file and patch operations an environment queues
//! - [`env`]: environment lifecycle, checkpointing and the external build
//! - [`blueprint`]: the declaration builder that decides when a new
//!   environment is forked
//! - [`case`]: test cases and assertions over match output
//! - [`config`]: TOML harness settings and declarative suite files
//!
//! Rewriting is regex based and line oriented. It does not parse the target
//! language, so tokens inside string literals or comments can be rewritten
//! too.
//!
//! # Example
//!
//! ```no_run
//! use player_patcher::blueprint::Blueprint;
//! use player_patcher::config::HarnessConfig;
//! use player_patcher::env::{Harness, Template};
//!
//! let mut bp = Blueprint::new();
//! bp.map("arena");
//! bp.vs("sprinter");
//! bp.stub_member_call("move", "tests.Stubs.move").unwrap();
//! bp.add_match(|m| m.it("moves through the stub", |ctx| ctx.assert_contains("stub"))).unwrap();
//!
//! let mut plan = bp.finish();
//! let harness = Harness::from_config(HarnessConfig::default(), "templates").unwrap();
//! for (id, result) in plan.setup_all(&harness, &Template::new("alpha", "master")) {
//!     if let Err(e) = result {
//!         eprintln!("environment {} failed: {}", id.0, e.classification());
//!     }
//! }
//! ```

pub mod blueprint;
pub mod cache;
pub mod case;
pub mod config;
pub mod edit;
pub mod env;
pub mod identity;
pub mod ops;
pub mod rewrite;
pub mod safety;

// Re-exports
pub use blueprint::{Blueprint, BlueprintError, EnvId, MapRef, Match, MatchId, Side, SuitePlan};
pub use case::{AssertionFailure, MatchContext, TestCase};
pub use config::{ConfigError, HarnessConfig, SuiteConfig};
pub use edit::{EditError, WriteOutcome};
pub use env::{Environment, Harness, SetupError, Template};
pub use ops::{ClassName, FileOp, PatchOp};
pub use rewrite::{
    bounded_replace, extract_fragment, rewrite_call_sites, scan_directive, splice_fragment,
    RewriteError, StubMode,
};
pub use safety::{SafetyError, TreeGuard};
