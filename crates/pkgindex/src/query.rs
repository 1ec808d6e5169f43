//! The search query language.

mod lexer;
mod node;
mod options;
mod parser;

pub use lexer::{tokenize, QueryToken, QueryTokenKind};
pub use node::{
    BooleanQuery, FieldKind, FieldRestrictions, PhraseQuery, QueryNode, ReturnType, TermQuery, TopQuery,
};
pub use options::{Query, SEARCH_V1_HEADER};
pub use parser::{ParseError, ParseErrorKind, QueryParser};
