//! Labeled fragment extraction and splicing.
//!
//! A fragment is the text between a `//$+mark:<label>` line and the next
//! `//$-mark:<label>` line. Marker lines are never part of the fragment body
//! and survive a splice untouched.

use crate::cache;
use crate::rewrite::bounded::is_word_char;
use crate::rewrite::errors::RewriteError;
use regex::{Captures, Regex};

/// Body of the first fragment labeled `label`, or `None` if the marker
/// pair is absent.
///
/// The body is returned verbatim, including its trailing newline.
pub fn extract_fragment(text: &str, label: &str) -> Result<Option<String>, RewriteError> {
    let re = fragment_regex(label)?;
    Ok(re.captures(text).map(|caps| caps["body"].to_string()))
}

/// Replace the body of every fragment labeled `label` with `body`.
///
/// Marker lines are preserved. A non-empty body without a trailing newline
/// gets one, so the end marker stays on its own line. Text without the
/// marker pair is returned unchanged.
pub fn splice_fragment(text: &str, label: &str, body: &str) -> Result<String, RewriteError> {
    let re = fragment_regex(label)?;

    let mut body = body.to_string();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    // Closure replacement: fragment bodies may contain `$` sequences
    let spliced = re.replace_all(text, |caps: &Captures<'_>| {
        format!("{}{}{}", &caps["open"], body, &caps["close"])
    });
    Ok(spliced.into_owned())
}

/// True if `text` contains at least one complete marker pair for `label`.
pub fn has_fragment(text: &str, label: &str) -> Result<bool, RewriteError> {
    Ok(fragment_regex(label)?.is_match(text))
}

fn fragment_regex(label: &str) -> Result<Regex, RewriteError> {
    if label.is_empty() || !label.chars().all(is_word_char) {
        return Err(RewriteError::InvalidToken {
            what: "fragment label",
            token: label.to_string(),
        });
    }

    let label_re = regex::escape(label);
    let pattern = format!(
        r"(?m)(?P<open>^[ \t]*//\$[ \t]*\+mark:[ \t]*{label_re}[ \t]*\r?\n)(?P<body>(?s:.*?))(?P<close>^[ \t]*//\$[ \t]*-mark:[ \t]*{label_re}[ \t]*\r?$)"
    );
    cache::get_or_compile(&pattern).map_err(|source| RewriteError::Pattern {
        token: label.to_string(),
        source,
    })
}
