//! Identifier-bounded token replacement.
//!
//! A token only matches where it is not glued to another identifier
//! character, so renaming `Foo` leaves `FooBar` and `my_Foo` alone. A `.`
//! directly after the token is a member access and does not block a match.

/// True for characters that continue an identifier (`[A-Za-z0-9_]`).
pub fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// True for characters that continue a dotted name (`[A-Za-z0-9_.]`).
pub fn is_identifier_char(c: char) -> bool {
    is_word_char(c) || c == '.'
}

/// Replace every bounded occurrence of `old` with `new`.
///
/// The character before a match must not be an identifier character (dots
/// included), and the character after it must not be a word character.
/// This is the rule used for package names, where `pkg.sub` must match `pkg`
/// but `other.pkg` must not.
///
/// ```
/// use player_patcher::rewrite::bounded_replace;
///
/// assert_eq!(
///     bounded_replace("FooBar.baz(Foo.qux())", "Foo", "Zap"),
///     "FooBar.baz(Zap.qux())"
/// );
/// ```
pub fn bounded_replace(text: &str, old: &str, new: &str) -> String {
    replace_flanked(text, old, new, false)
}

/// Replace bounded occurrences of a trailing name segment.
///
/// Same as [`bounded_replace`] except a preceding `.` is allowed, so a short
/// class name is renamed both bare (`Foo`) and qualified (`pkg.Foo`).
pub fn bounded_replace_segment(text: &str, old: &str, new: &str) -> String {
    replace_flanked(text, old, new, true)
}

fn replace_flanked(text: &str, old: &str, new: &str, dot_may_precede: bool) -> String {
    if old.is_empty() || old == new {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find(old) {
        let start = cursor + offset;
        let end = start + old.len();

        let left_ok = match text[..start].chars().next_back() {
            Some('.') => dot_may_precede,
            Some(c) => !is_word_char(c),
            None => true,
        };
        let right_ok = text[end..].chars().next().map_or(true, |c| !is_word_char(c));

        if left_ok && right_ok {
            out.push_str(&text[copied..start]);
            out.push_str(new);
            copied = end;
            cursor = end;
        } else {
            // Step one character so overlapping candidates are still seen
            let step = text[start..].chars().next().map_or(1, char::len_utf8);
            cursor = start + step;
        }
    }

    out.push_str(&text[copied..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_skips_longer_identifiers() {
        assert_eq!(
            bounded_replace("FooBar.baz(Foo.qux())", "Foo", "Zap"),
            "FooBar.baz(Zap.qux())"
        );
    }

    #[test]
    fn test_replaces_at_text_edges() {
        assert_eq!(bounded_replace("Foo x Foo", "Foo", "Zap"), "Zap x Zap");
    }

    #[test]
    fn test_adjacent_occurrences_separated_by_one_char() {
        assert_eq!(bounded_replace("Foo Foo,Foo", "Foo", "Q"), "Q Q,Q");
    }

    #[test]
    fn test_package_rule_rejects_preceding_dot() {
        let text = "import alpha.util.Map; import other.alpha.Thing;";
        assert_eq!(
            bounded_replace(text, "alpha", "beta"),
            "import beta.util.Map; import other.alpha.Thing;"
        );
    }

    #[test]
    fn test_segment_rule_accepts_preceding_dot() {
        let text = "new pkg.Foo(); Foo.run(); FooBar x;";
        assert_eq!(
            bounded_replace_segment(text, "Foo", "Bar"),
            "new pkg.Bar(); Bar.run(); FooBar x;"
        );
    }

    #[test]
    fn test_empty_token_is_noop() {
        assert_eq!(bounded_replace("abc", "", "x"), "abc");
    }

    #[test]
    fn test_multibyte_neighbours() {
        assert_eq!(bounded_replace("é Foo é", "Foo", "Bar"), "é Bar é");
    }

    proptest! {
        #[test]
        fn prop_absent_token_leaves_text_untouched(text in "[a-z .(){};]{0,64}") {
            prop_assert_eq!(bounded_replace(&text, "QQ", "zz"), text);
        }

        #[test]
        fn prop_token_inside_longer_word_never_matches(prefix in "[a-z]{1,8}", suffix in "[a-z]{1,8}") {
            let text = format!("{prefix}Foo{suffix}");
            prop_assert_eq!(bounded_replace(&text, "Foo", "Bar"), text);
        }
    }
}
