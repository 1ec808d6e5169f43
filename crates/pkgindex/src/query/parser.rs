//! Recursive-descent parser producing a [`TopQuery`].
//!
//! ```text
//! query    := xterm
//! xterm    := baseterm+ (("AND" | "OR") xterm)?
//! baseterm := TERM | fterm | phrase | "(" xterm ")" | PKG_OPEN xterm ">"
//! fterm    := FTERM (TERM | phrase | fterm)?
//! phrase   := QUOTE TERM+ QUOTE
//! ```
//!
//! Adjacent terms are joined with an implicit `AND` and bind tighter than
//! the explicit operators, which associate to the right.

use std::fmt;

use super::lexer::{tokenize, QueryToken, QueryTokenKind};
use super::node::{FieldRestrictions, QueryNode, TopQuery};
use crate::error::Result;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnexpectedToken(String),
    UnexpectedEnd,
    UnparseableCharacter,
}

/// A query that could not be tokenized or parsed. `position` is a byte
/// offset: the start of an unparseable character, or the end of the token
/// the parser choked on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    kind: ParseErrorKind,
    input: String,
    position: usize,
}

impl ParseError {
    pub(crate) fn unparseable(input: &str, position: usize) -> Self {
        Self {
            kind: ParseErrorKind::UnparseableCharacter,
            input: input.to_string(),
            position,
        }
    }

    fn unexpected(input: &str, token: Option<&QueryToken>) -> Self {
        match token {
            Some(token) => Self {
                kind: ParseErrorKind::UnexpectedToken(token.text.clone()),
                input: input.to_string(),
                position: token.end,
            },
            None => Self {
                kind: ParseErrorKind::UnexpectedEnd,
                input: input.to_string(),
                position: input.len(),
            },
        }
    }

    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Column of the caret, counted in characters.
    fn column(&self, offset: usize) -> usize {
        self.input
            .get(..offset)
            .map_or(offset, |prefix| prefix.chars().count())
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match &self.kind {
            ParseErrorKind::UnparseableCharacter => {
                let column = self.column(self.position);
                return write!(
                    f,
                    "An unparseable character in query at position : {}\n{}\n{}^",
                    column + 1,
                    self.input,
                    " ".repeat(column)
                );
            }
            ParseErrorKind::UnexpectedToken(text) => text.as_str(),
            ParseErrorKind::UnexpectedEnd => "end of query",
        };
        let column = self.column(self.position).saturating_sub(1);
        write!(
            f,
            "Could not parse query.\nProblem occurred with: {token}\t\n\t{}\n\t{}^",
            self.input,
            " ".repeat(column)
        )
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub struct QueryParser<'a> {
    input: &'a str,
    tokens: Vec<QueryToken>,
    index: usize,
}

impl<'a> QueryParser<'a> {
    pub fn parse(input: &'a str) -> Result<TopQuery> {
        let tokens = tokenize(input)?;
        let mut parser = Self {
            input,
            tokens,
            index: 0,
        };
        let query = parser.parse_xterm()?;
        if let Some(token) = parser.peek() {
            return Err(ParseError::unexpected(input, Some(token)).into());
        }
        log::debug!("parsed query {input:?} as {query}");
        Ok(TopQuery::new(query))
    }

    fn parse_xterm(&mut self) -> Result<QueryNode> {
        let left = self.parse_baseterm_list()?;
        match self.peek().map(|token| &token.kind) {
            Some(QueryTokenKind::And) => {
                self.index += 1;
                let right = self.parse_xterm()?;
                QueryNode::and(left, right)
            }
            Some(QueryTokenKind::Or) => {
                self.index += 1;
                let right = self.parse_xterm()?;
                QueryNode::or(left, right)
            }
            _ => Ok(left),
        }
    }

    fn parse_baseterm_list(&mut self) -> Result<QueryNode> {
        let first = self.parse_baseterm()?;
        if self.next_starts_baseterm() {
            let rest = self.parse_baseterm_list()?;
            return QueryNode::and(first, rest);
        }
        Ok(first)
    }

    fn parse_baseterm(&mut self) -> Result<QueryNode> {
        let Some(token) = self.next() else {
            return Err(self.error_at(None));
        };
        match &token.kind {
            QueryTokenKind::Term(text) => Ok(QueryNode::term(text)),
            QueryTokenKind::FieldTerm {
                pkg_name,
                action_type,
                key,
                token,
            } => self.parse_field_term(pkg_name, action_type, key, token),
            quote @ (QueryTokenKind::SingleQuote | QueryTokenKind::DoubleQuote) => self.parse_phrase(quote),
            QueryTokenKind::LParen => {
                let inner = self.parse_xterm()?;
                self.expect(&QueryTokenKind::RParen)?;
                Ok(inner)
            }
            QueryTokenKind::PkgOpen => {
                let inner = self.parse_xterm()?;
                self.expect(&QueryTokenKind::PkgClose)?;
                Ok(QueryNode::pkg_conversion(inner))
            }
            _ => Err(self.error_at(Some(&token))),
        }
    }

    /// Called after the `FTERM` token has been consumed.
    fn parse_field_term(&mut self, pkg_name: &str, action_type: &str, key: &str, token: &str) -> Result<QueryNode> {
        let fields = FieldRestrictions::new(pkg_name, action_type, key);
        let argument = match self.peek().map(|next| next.kind.clone()) {
            Some(QueryTokenKind::Term(text)) => {
                self.index += 1;
                Some(QueryNode::term(&text))
            }
            Some(quote @ (QueryTokenKind::SingleQuote | QueryTokenKind::DoubleQuote)) => {
                self.index += 1;
                Some(self.parse_phrase(&quote)?)
            }
            Some(QueryTokenKind::FieldTerm {
                pkg_name,
                action_type,
                key,
                token,
            }) => {
                self.index += 1;
                Some(self.parse_field_term(&pkg_name, &action_type, &key, &token)?)
            }
            _ => None,
        };

        match argument {
            Some(argument) if token.is_empty() => Ok(QueryNode::field(&fields, argument)),
            Some(argument) => QueryNode::and(QueryNode::field(&fields, QueryNode::term(token)), argument),
            None => {
                let token = if token.is_empty() { "*" } else { token };
                Ok(QueryNode::field(&fields, QueryNode::term(token)))
            }
        }
    }

    /// Called after the opening quote has been consumed.
    fn parse_phrase(&mut self, quote: &QueryTokenKind) -> Result<QueryNode> {
        let mut words = Vec::new();
        loop {
            let Some(token) = self.next() else {
                return Err(self.error_at(None));
            };
            match &token.kind {
                QueryTokenKind::Term(word) => words.push(word.clone()),
                kind if kind == quote && !words.is_empty() => break,
                _ => return Err(self.error_at(Some(&token))),
            }
        }
        Ok(QueryNode::phrase(&words))
    }

    fn expect(&mut self, kind: &QueryTokenKind) -> Result<()> {
        match self.next() {
            Some(token) if &token.kind == kind => Ok(()),
            other => Err(self.error_at(other.as_ref())),
        }
    }

    fn next_starts_baseterm(&self) -> bool {
        matches!(
            self.peek().map(|token| &token.kind),
            Some(
                QueryTokenKind::Term(_)
                    | QueryTokenKind::FieldTerm { .. }
                    | QueryTokenKind::SingleQuote
                    | QueryTokenKind::DoubleQuote
                    | QueryTokenKind::LParen
                    | QueryTokenKind::PkgOpen
            )
        )
    }

    fn error_at(&self, token: Option<&QueryToken>) -> crate::error::PkgIndexError {
        ParseError::unexpected(self.input, token).into()
    }

    fn peek(&self) -> Option<&QueryToken> {
        self.tokens.get(self.index)
    }

    fn next(&mut self) -> Option<QueryToken> {
        let token = self.tokens.get(self.index).cloned();
        if token.is_some() {
            self.index += 1;
        }
        token
    }
}
