//! A query plus its search options, and the `_`-separated form used to
//! send both over the wire.

use std::fmt;
use std::str::FromStr;

use super::node::{ReturnType, TopQuery};
use super::parser::QueryParser;
use crate::config::DEFAULT_MAX_QUERY_TOKENS;
use crate::error::{PkgIndexError, Result};

/// First line of a version 1 search response.
pub const SEARCH_V1_HEADER: &str = "Return from search v1\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    text: String,
    case_sensitive: bool,
    return_type: ReturnType,
    num_to_return: Option<usize>,
    start_point: Option<usize>,
}

impl Query {
    pub fn new(
        text: &str,
        case_sensitive: bool,
        return_type: ReturnType,
        num_to_return: Option<usize>,
        start_point: Option<usize>,
    ) -> Result<Self> {
        Self::with_max_tokens(
            text,
            case_sensitive,
            return_type,
            num_to_return,
            start_point,
            DEFAULT_MAX_QUERY_TOKENS,
        )
    }

    /// Like [`new`](Self::new) with an explicit limit on the number of
    /// space separated pieces in `text`.
    pub fn with_max_tokens(
        text: &str,
        case_sensitive: bool,
        return_type: ReturnType,
        num_to_return: Option<usize>,
        start_point: Option<usize>,
        max_tokens: usize,
    ) -> Result<Self> {
        let query = Self {
            text: text.to_string(),
            case_sensitive,
            return_type,
            num_to_return,
            start_point,
        };
        query.check_length(max_tokens)?;
        Ok(query)
    }

    /// Fails with [`PkgIndexError::QueryLengthExceeded`] when the text has
    /// more than `max_tokens` space separated pieces.
    pub fn check_length(&self, max_tokens: usize) -> Result<()> {
        let count = self.text.split(' ').count();
        if count > max_tokens {
            return Err(PkgIndexError::QueryLengthExceeded {
                count,
                max: max_tokens,
            });
        }
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn num_to_return(&self) -> Option<usize> {
        self.num_to_return
    }

    pub fn start_point(&self) -> Option<usize> {
        self.start_point
    }

    /// Parses the text and shapes the tree to the requested return type
    /// and result window.
    pub fn parse(&self) -> Result<TopQuery> {
        let mut top = QueryParser::parse(&self.text)?;
        if self.return_type == ReturnType::Packages {
            top.propagate_pkg_return();
        }
        top.set_info(self.num_to_return, self.start_point);
        Ok(top)
    }
}

fn optional_number(value: Option<usize>) -> String {
    value.map_or_else(|| "None".to_string(), |number| number.to_string())
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}_{}",
            if self.case_sensitive { "True" } else { "False" },
            self.return_type.code(),
            optional_number(self.num_to_return),
            optional_number(self.start_point),
            self.text
        )
    }
}

impl FromStr for Query {
    type Err = PkgIndexError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.splitn(5, '_').collect();
        let &[case_sensitive, return_type, num_to_return, start_point, text] = parts.as_slice() else {
            return Err(PkgIndexError::IncompleteQuery(s.to_string()));
        };
        let bad_value = |name: &str, value: &str| PkgIndexError::DetailedValue {
            name: name.to_string(),
            value: value.to_string(),
            query: s.to_string(),
        };

        let case_sensitive = match case_sensitive {
            "True" => true,
            "False" => false,
            other => return Err(bad_value("case_sensitive", other)),
        };
        let parse_optional = |name: &str, value: &str| -> Result<Option<usize>> {
            if value == "None" {
                return Ok(None);
            }
            value.parse().map(Some).map_err(|_| bad_value(name, value))
        };
        let num_to_return = parse_optional("num_to_return", num_to_return)?;
        let start_point = parse_optional("start_point", start_point)?;
        let return_type = return_type
            .parse::<u8>()
            .ok()
            .and_then(ReturnType::from_code)
            .ok_or_else(|| bad_value("return_type", return_type))?;

        Self::new(text, case_sensitive, return_type, num_to_return, start_point)
    }
}
