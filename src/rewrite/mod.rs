//! Pure text rewriting primitives used to patch a private source tree.
//!
//! Nothing in this module touches the filesystem:
//!
//! - [`bounded_replace`] renames identifier-bounded tokens
//! - [`extract_fragment`] / [`splice_fragment`] move labeled code between
//!   `//$+mark:<label>` and `//$-mark:<label>` lines
//! - [`CallSiteRewriter`] and [`apply_stubs`] redirect call sites to stub
//!   implementations, honouring `//$+stubs` / `//$-stubs` directive lines

pub mod bounded;
pub mod errors;
pub mod fragment;
pub mod stubs;

pub use bounded::{bounded_replace, bounded_replace_segment, is_identifier_char, is_word_char};
pub use errors::RewriteError;
pub use fragment::{extract_fragment, has_fragment, splice_fragment};
pub use stubs::{
    apply_stubs, rewrite_call_sites, scan_directive, CallSiteRewriter, Directive, StubMode,
    SELF_TOKEN,
};
