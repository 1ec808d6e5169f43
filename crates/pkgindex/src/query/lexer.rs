//! Splits query text into tokens.
//!
//! Spaces separate tokens. Any other whitespace is an error.

use once_cell::sync::Lazy;
use regex::Regex;

use super::parser::ParseError;

static PKG_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[pP](?:[kK](?:[gG][sS]?)?)?)?<").expect("valid regex"));

static FIELD_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:[^'"(\s][^\s]*)?:(?:[^\s('"][^\s]*[^\s)'">]|[^\s()'">])?"#).expect("valid regex")
});

static TERM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^(?:[^\s('"][^\s]*[^\s)'">]|[^\s()'"])"#).expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTokenKind {
    /// `<`, `p<`, `pkg<` or `pkgs<` in any case.
    PkgOpen,
    PkgClose,
    Term(String),
    /// `pkg_name:action_type:key:token`. Missing leading fields are empty.
    FieldTerm {
        pkg_name: String,
        action_type: String,
        key: String,
        token: String,
    },
    LParen,
    RParen,
    SingleQuote,
    DoubleQuote,
    And,
    Or,
}

impl QueryTokenKind {
    fn from_term(value: String) -> Self {
        match value.as_str() {
            "AND" => Self::And,
            "OR" => Self::Or,
            _ => Self::Term(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryToken {
    pub kind: QueryTokenKind,
    /// Matched text as it appeared in the query.
    pub text: String,
    /// Byte offsets into the query.
    pub start: usize,
    pub end: usize,
}

/// Splits on unescaped colons. A `\` before a colon is dropped and the
/// colon kept as part of the field.
fn split_fields(value: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for part in value.split(':') {
        match fields.last_mut() {
            Some(last) if last.ends_with('\\') => {
                last.pop();
                last.push(':');
                last.push_str(part);
            }
            _ => fields.push(part.to_string()),
        }
    }
    fields
}

fn field_term_kind(value: &str) -> QueryTokenKind {
    let mut fields = split_fields(value);
    if fields.len() == 1 {
        return QueryTokenKind::from_term(fields.pop().unwrap_or_default());
    }
    let count = fields.len();
    let nth_from_end = |n: usize| {
        if count >= n {
            fields[count - n].clone()
        } else {
            String::new()
        }
    };
    QueryTokenKind::FieldTerm {
        pkg_name: nth_from_end(4),
        action_type: nth_from_end(3),
        key: nth_from_end(2),
        token: nth_from_end(1),
    }
}

fn next_token(rest: &str) -> Option<(QueryTokenKind, usize)> {
    if let Some(found) = PKG_OPEN.find(rest) {
        return Some((QueryTokenKind::PkgOpen, found.end()));
    }
    if rest.starts_with('>') {
        return Some((QueryTokenKind::PkgClose, 1));
    }
    if let Some(found) = FIELD_TERM.find(rest) {
        return Some((field_term_kind(found.as_str()), found.end()));
    }
    if let Some(found) = TERM.find(rest) {
        return Some((QueryTokenKind::from_term(found.as_str().to_string()), found.end()));
    }
    let kind = match rest.chars().next()? {
        '(' => QueryTokenKind::LParen,
        ')' => QueryTokenKind::RParen,
        '\'' => QueryTokenKind::SingleQuote,
        '"' => QueryTokenKind::DoubleQuote,
        _ => return None,
    };
    Some((kind, 1))
}

pub fn tokenize(input: &str) -> Result<Vec<QueryToken>, ParseError> {
    let mut tokens = Vec::new();
    let mut position = 0;
    while position < input.len() {
        let rest = &input[position..];
        if rest.starts_with(' ') {
            position += 1;
            continue;
        }
        let Some((kind, len)) = next_token(rest) else {
            return Err(ParseError::unparseable(input, position));
        };
        tokens.push(QueryToken {
            kind,
            text: rest[..len].to_string(),
            start: position,
            end: position + len,
        });
        position += len;
    }
    Ok(tokens)
}
