//! Shell-style (`fnmatch`) wildcard matching.

use std::borrow::Cow;

use glob::{MatchOptions, Pattern};

/// True if `value` contains characters with wildcard meaning.
pub fn has_wildcards(value: &str) -> bool {
    value.contains(['*', '?', '['])
}

/// True if every character of `value` is `*` or `?`.
pub fn is_all_wildcards(value: &str) -> bool {
    value.chars().all(|ch| ch == '*' || ch == '?')
}

/// Folds each run of `*` into one. The glob syntax only accepts `**` as a
/// whole path component, where fnmatch treats it as a plain `*`.
fn collapse_stars(raw: &str) -> Cow<'_, str> {
    if !raw.contains("**") {
        return Cow::Borrowed(raw);
    }
    let mut collapsed = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch == '*' && collapsed.ends_with('*') {
            continue;
        }
        collapsed.push(ch);
    }
    Cow::Owned(collapsed)
}

/// A compiled wildcard pattern. `*` also matches `/`, and a pattern the
/// glob syntax rejects (such as an unclosed `[`) only matches itself.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    compiled: Option<Pattern>,
    raw: String,
    case_sensitive: bool,
}

impl WildcardPattern {
    pub fn new(raw: &str, case_sensitive: bool) -> Self {
        Self {
            compiled: Pattern::new(&collapse_stars(raw)).ok(),
            raw: raw.to_string(),
            case_sensitive,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match &self.compiled {
            Some(pattern) => pattern.matches_with(
                candidate,
                MatchOptions {
                    case_sensitive: self.case_sensitive,
                    require_literal_separator: false,
                    require_literal_leading_dot: false,
                },
            ),
            None if self.case_sensitive => candidate == self.raw,
            None => candidate.eq_ignore_ascii_case(&self.raw),
        }
    }
}

/// One-shot case-sensitive match.
pub fn fnmatch(candidate: &str, pattern: &str) -> bool {
    WildcardPattern::new(pattern, true).matches(candidate)
}
