//! File and patch operations queued on an environment blueprint.

use crate::rewrite::{
    bounded_replace, bounded_replace_segment, is_word_char, CallSiteRewriter, RewriteError,
    StubMode,
};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid class name '{0}': expected dot-separated identifiers")]
pub struct InvalidClassName(pub String);

/// A dotted class name such as `tests.Stubs`, relative to the program's
/// top-level package.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassName(String);

impl ClassName {
    /// Parse a dotted name; every segment must be a non-empty identifier.
    pub fn parse(name: &str) -> Result<Self, InvalidClassName> {
        let valid = !name.is_empty()
            && name
                .split('.')
                .all(|segment| !segment.is_empty() && segment.chars().all(is_word_char));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidClassName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix with the owning package, e.g. `tests.Stubs` -> `<owner>.tests.Stubs`.
    pub fn qualified(&self, owner: &str) -> ClassName {
        ClassName(format!("{owner}.{}", self.0))
    }

    /// Everything before the last dot, or `""` for a top-level class.
    pub fn package(&self) -> &str {
        self.0.rsplit_once('.').map_or("", |(package, _)| package)
    }

    /// The last segment.
    pub fn short_name(&self) -> &str {
        self.0.rsplit_once('.').map_or(self.0.as_str(), |(_, short)| short)
    }

    /// Relative source path: dots become separators, `extension` is appended.
    pub fn relative_path(&self, extension: &str) -> PathBuf {
        let mut path: PathBuf = self.0.split('.').collect();
        path.set_extension(extension);
        path
    }
}

impl fmt::Display for ClassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A labeled fragment inside a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentRef {
    pub class: ClassName,
    pub label: String,
}

/// A mutation that copies text from one class file into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOp {
    /// Replace the whole target file with the source file.
    WholeFile { target: ClassName, source: ClassName },
    /// Replace the body of every `target.label` fragment with the source fragment body.
    Fragment {
        target: FragmentRef,
        source: FragmentRef,
    },
}

impl FileOp {
    pub fn target_class(&self) -> &ClassName {
        match self {
            FileOp::WholeFile { target, .. } => target,
            FileOp::Fragment { target, .. } => &target.class,
        }
    }

    pub fn source_class(&self) -> &ClassName {
        match self {
            FileOp::WholeFile { source, .. } => source,
            FileOp::Fragment { source, .. } => &source.class,
        }
    }
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOp::WholeFile { target, source } => write!(f, "replace {target} with {source}"),
            FileOp::Fragment { target, source } => write!(
                f,
                "replace {}#{} with {}#{}",
                target.class, target.label, source.class, source.label
            ),
        }
    }
}

/// A mutation applied to every source file of the private tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOp {
    /// Redirect `[recv.]source(` to `<owner>.target(recv, `.
    StubMember { source: String, target: String },
    /// Redirect `[recv.]source(` to `<owner>.target(`.
    StubStatic { source: String, target: String },
}

impl PatchOp {
    pub fn mode(&self) -> StubMode {
        match self {
            PatchOp::StubMember { .. } => StubMode::Member,
            PatchOp::StubStatic { .. } => StubMode::Static,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            PatchOp::StubMember { source, .. } | PatchOp::StubStatic { source, .. } => source,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            PatchOp::StubMember { target, .. } | PatchOp::StubStatic { target, .. } => target,
        }
    }

    /// Compile this operation for a tree whose top-level package is `owner`.
    pub fn rewriter(&self, owner: &str, self_token: &str) -> Result<CallSiteRewriter, RewriteError> {
        let target = format!("{owner}.{}", self.target());
        Ok(CallSiteRewriter::new(self.source(), target, self.mode())?.with_self_token(self_token))
    }
}

impl fmt::Display for PatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchOp::StubMember { source, target } => write!(f, "stub member {source} -> {target}"),
            PatchOp::StubStatic { source, target } => write!(f, "stub static {source} -> {target}"),
        }
    }
}

/// Rename references to `from` inside copied text so it reads as `to`.
///
/// The package is renamed first (dot-prefixed uses are left alone), then the
/// short class name, bare or qualified.
pub fn retarget_text(text: &str, from: &ClassName, to: &ClassName) -> String {
    let mut text = text.to_string();
    if from.package() != to.package() {
        text = bounded_replace(&text, from.package(), to.package());
    }
    if from.short_name() != to.short_name() {
        text = bounded_replace_segment(&text, from.short_name(), to.short_name());
    }
    text
}
