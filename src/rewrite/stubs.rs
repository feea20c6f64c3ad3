//! Call-site redirection with directive-controlled enable state.
//!
//! Rewriting is line-oriented and pattern based, not a parser: a call that
//! happens to appear inside a string literal or comment is rewritten too.
//! Calls whose receiver is an expression other than a dotted name (for
//! example `make().run(` or `make().pos.run(`) are left alone, since the
//! receiver cannot be recovered from the line text.

use crate::cache;
use crate::rewrite::bounded::{is_identifier_char, is_word_char};
use crate::rewrite::errors::RewriteError;
use regex::Regex;
use serde::Deserialize;

/// Receiver passed to member stubs for unqualified calls.
pub const SELF_TOKEN: &str = "this";

/// How a redirected call treats its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StubMode {
    /// `recv.m(args)` becomes `target(recv, args)`; bare `m(args)` passes the self token.
    Member,
    /// `recv.m(args)` becomes `target(args)`; the receiver is dropped.
    Static,
}

/// A `//$` comment line recognised by the patcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// `//$+stubs`
    EnableStubs,
    /// `//$-stubs`
    DisableStubs,
    /// Any other `//$` line, fragment markers included.
    Other,
}

/// Classify a line whose only content is a `//$` directive.
///
/// The directive token is compared case-insensitively after trimming.
pub fn scan_directive(line: &str) -> Option<Directive> {
    let rest = line.trim_start().strip_prefix("//$")?;
    let directive = match rest.trim().to_ascii_lowercase().as_str() {
        "+stubs" => Directive::EnableStubs,
        "-stubs" => Directive::DisableStubs,
        _ => Directive::Other,
    };
    Some(directive)
}

/// A compiled redirection of `source(` call sites to `target(`.
#[derive(Debug, Clone)]
pub struct CallSiteRewriter {
    pattern: Regex,
    target: String,
    mode: StubMode,
    self_token: String,
}

impl CallSiteRewriter {
    /// Compile a rewriter for calls to `source`.
    ///
    /// `target` is emitted verbatim, so it should already carry any owner
    /// qualification (e.g. `ptest_host_1_2.Stubs.move`).
    pub fn new(
        source: &str,
        target: impl Into<String>,
        mode: StubMode,
    ) -> Result<Self, RewriteError> {
        if source.is_empty() || !source.chars().all(is_word_char) {
            return Err(RewriteError::InvalidToken {
                what: "stub source",
                token: source.to_string(),
            });
        }
        let target = target.into();
        if target.is_empty() || !target.chars().all(is_identifier_char) {
            return Err(RewriteError::InvalidToken {
                what: "stub target",
                token: target,
            });
        }

        let pattern = format!(r"(?P<qualifier>[A-Za-z0-9_.]*\.)?{}\(", regex::escape(source));
        let pattern = cache::get_or_compile(&pattern).map_err(|e| RewriteError::Pattern {
            token: source.to_string(),
            source: e,
        })?;

        Ok(Self {
            pattern,
            target,
            mode,
            self_token: SELF_TOKEN.to_string(),
        })
    }

    /// Use a different receiver token for unqualified member calls.
    pub fn with_self_token(mut self, token: impl Into<String>) -> Self {
        self.self_token = token.into();
        self
    }

    pub fn mode(&self) -> StubMode {
        self.mode
    }

    /// Rewrite every matching call site on one line.
    pub fn rewrite_line(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len() + 32);
        let mut copied = 0;

        for caps in self.pattern.captures_iter(line) {
            let Some(whole) = caps.get(0) else {
                continue;
            };

            // The call must not be the tail of a longer identifier
            if line[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(is_identifier_char)
            {
                continue;
            }

            let qualifier = caps
                .name("qualifier")
                .map(|q| q.as_str().strip_suffix('.').unwrap_or(q.as_str()));
            let receiver = match qualifier {
                // Receiver is (or chains off) an expression such as `make()`
                Some(q) if q.is_empty() || q.starts_with('.') => continue,
                Some(q) => q,
                None => self.self_token.as_str(),
            };

            out.push_str(&line[copied..whole.start()]);
            match self.mode {
                StubMode::Member => {
                    out.push_str(&self.target);
                    out.push('(');
                    out.push_str(receiver);
                    out.push_str(", ");
                }
                StubMode::Static => {
                    out.push_str(&self.target);
                    out.push('(');
                }
            }
            copied = whole.end();
        }

        out.push_str(&line[copied..]);
        out
    }
}

/// Rewrite the call sites on a single line.
///
/// ```
/// use player_patcher::rewrite::{rewrite_call_sites, StubMode};
///
/// let line = rewrite_call_sites("result = obj.oldM(1,2);", "oldM", "P.newM", StubMode::Member).unwrap();
/// assert_eq!(line, "result = P.newM(obj, 1,2);");
/// ```
pub fn rewrite_call_sites(
    line: &str,
    source: &str,
    target: &str,
    mode: StubMode,
) -> Result<String, RewriteError> {
    Ok(CallSiteRewriter::new(source, target, mode)?.rewrite_line(line))
}

/// Apply every rewriter, in order, to each enabled line of `text`.
///
/// Stubbing starts enabled and toggles on `//$+stubs` / `//$-stubs` lines.
/// Directive lines are copied verbatim. Line terminators are preserved.
pub fn apply_stubs(text: &str, rewriters: &[CallSiteRewriter]) -> String {
    if rewriters.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut enabled = true;

    for raw in text.split_inclusive('\n') {
        let (line, ending) = split_line_ending(raw);

        match scan_directive(line) {
            Some(Directive::EnableStubs) => enabled = true,
            Some(Directive::DisableStubs) => enabled = false,
            Some(Directive::Other) => {}
            None if enabled => {
                let mut rewritten = line.to_string();
                for rewriter in rewriters {
                    rewritten = rewriter.rewrite_line(&rewritten);
                }
                out.push_str(&rewritten);
                out.push_str(ending);
                continue;
            }
            None => {}
        }

        out.push_str(line);
        out.push_str(ending);
    }

    out
}

fn split_line_ending(raw: &str) -> (&str, &str) {
    if let Some(line) = raw.strip_suffix("\r\n") {
        (line, "\r\n")
    } else if let Some(line) = raw.strip_suffix('\n') {
        (line, "\n")
    } else {
        (raw, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(source: &str, target: &str) -> CallSiteRewriter {
        CallSiteRewriter::new(source, target, StubMode::Member).unwrap()
    }

    #[test]
    fn test_chained_expression_receiver_left_alone() {
        let line = "make().pos.oldM(1);";
        for mode in [StubMode::Member, StubMode::Static] {
            assert_eq!(rewrite_call_sites(line, "oldM", "P.n", mode).unwrap(), line);
        }
        assert_eq!(
            rewrite_call_sites("a.b().oldM(1); c.oldM(2);", "oldM", "P.n", StubMode::Member)
                .unwrap(),
            "a.b().oldM(1); P.n(c, 2);"
        );
    }

    #[test]
    fn test_member_with_qualifier() {
        let line = rewrite_call_sites("result = obj.oldM(1,2);", "oldM", "P.newM", StubMode::Member)
            .unwrap();
        assert_eq!(line, "result = P.newM(obj, 1,2);");
    }

    #[test]
    fn test_member_without_qualifier_passes_self() {
        let line = rewrite_call_sites("oldM(1);", "oldM", "P.newM", StubMode::Member).unwrap();
        assert_eq!(line, "P.newM(this, 1);");
    }

    #[test]
    fn test_member_with_dotted_qualifier() {
        let line =
            rewrite_call_sites("a.b.c.oldM();", "oldM", "P.newM", StubMode::Member).unwrap();
        assert_eq!(line, "P.newM(a.b.c, );");
    }

    #[test]
    fn test_static_drops_qualifier() {
        let line =
            rewrite_call_sites("x = Clock.now(3);", "now", "P.fakeNow", StubMode::Static).unwrap();
        assert_eq!(line, "x = P.fakeNow(3);");
    }

    #[test]
    fn test_no_partial_identifier_match() {
        let line = "mySourceThing(1); xsource(2); source_x(3);";
        let out = rewrite_call_sites(line, "source", "P.t", StubMode::Member).unwrap();
        assert_eq!(out, line);
    }

    #[test]
    fn test_nested_calls() {
        let out = rewrite_call_sites("oldM(oldM(1));", "oldM", "P.n", StubMode::Static).unwrap();
        assert_eq!(out, "P.n(P.n(1));");
    }

    #[test]
    fn test_expression_receiver_left_alone() {
        let line = "make().oldM(1);";
        let out = rewrite_call_sites(line, "oldM", "P.n", StubMode::Member).unwrap();
        assert_eq!(out, line);
    }

    #[test]
    fn test_custom_self_token() {
        let rewriter = member("oldM", "P.n").with_self_token("self");
        assert_eq!(rewriter.rewrite_line("oldM(2)"), "P.n(self, 2)");
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(CallSiteRewriter::new("", "P.n", StubMode::Member).is_err());
        assert!(CallSiteRewriter::new("a(b", "P.n", StubMode::Member).is_err());
        assert!(CallSiteRewriter::new("m", "P n", StubMode::Static).is_err());
    }

    #[test]
    fn test_scan_directive() {
        assert_eq!(scan_directive("//$+stubs"), Some(Directive::EnableStubs));
        assert_eq!(scan_directive("   //$-STUBS  "), Some(Directive::DisableStubs));
        assert_eq!(scan_directive("//$ +Stubs"), Some(Directive::EnableStubs));
        assert_eq!(scan_directive("\t//$+mark:body"), Some(Directive::Other));
        assert_eq!(scan_directive("x = 1; //$-stubs"), None);
        assert_eq!(scan_directive("// $-stubs"), None);
    }

    #[test]
    fn test_directive_gating() {
        let text = "//$-stubs\noldM(1);\n//$+stubs\noldM(2);\n";
        let out = apply_stubs(text, &[member("oldM", "P.newM")]);
        assert_eq!(out, "//$-stubs\noldM(1);\n//$+stubs\nP.newM(this, 2);\n");
    }

    #[test]
    fn test_apply_preserves_line_endings() {
        let text = "oldM(1);\r\nkeep();\r\noldM(2);";
        let out = apply_stubs(text, &[member("oldM", "P.n")]);
        assert_eq!(out, "P.n(this, 1);\r\nkeep();\r\nP.n(this, 2);");
    }

    #[test]
    fn test_rules_apply_in_order() {
        let rules = [
            CallSiteRewriter::new("a", "P.b", StubMode::Static).unwrap(),
            CallSiteRewriter::new("b", "P.c", StubMode::Static).unwrap(),
        ];
        // The second rule sees `P.b(` and drops its `P.` qualifier
        assert_eq!(apply_stubs("a();", &rules), "P.c();");
    }

    #[test]
    fn test_no_rules_is_identity() {
        assert_eq!(apply_stubs("oldM(1);\n", &[]), "oldM(1);\n");
    }
}
