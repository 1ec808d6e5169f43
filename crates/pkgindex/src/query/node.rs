//! The query tree.

use std::fmt;
use std::str::FromStr;

use crate::error::{PkgIndexError, Result};
use crate::text_match::WildcardPattern;

/// Whether a query produces matching actions or matching packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    Packages,
    Actions,
}

impl ReturnType {
    /// Numeric form used on the wire.
    pub fn code(self) -> u8 {
        match self {
            Self::Packages => 1,
            Self::Actions => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Packages),
            2 => Some(Self::Actions),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Field restrictions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    PackageName,
    ActionType,
    Key,
}

impl FromStr for FieldKind {
    type Err = PkgIndexError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "pkg_name" => Ok(Self::PackageName),
            "action_type" => Ok(Self::ActionType),
            "key" => Ok(Self::Key),
            other => Err(PkgIndexError::UnknownFieldType(other.to_string())),
        }
    }
}

fn is_wildcard(value: &str) -> bool {
    value == "*" || value.is_empty()
}

/// The `pkg_name:action_type:key:` prefix of a field term. `None` means
/// the field is unrestricted.
///
/// Package names are matched as a prefix: a trailing `*` is added and the
/// pattern is compared case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct FieldRestrictions {
    pkg_name: Option<WildcardPattern>,
    action_type: Option<String>,
    key: Option<String>,
}

impl FieldRestrictions {
    pub fn new(pkg_name: &str, action_type: &str, key: &str) -> Self {
        let mut fields = Self::default();
        fields.set(FieldKind::PackageName, pkg_name);
        fields.set(FieldKind::ActionType, action_type);
        fields.set(FieldKind::Key, key);
        fields
    }

    pub fn set(&mut self, kind: FieldKind, value: &str) {
        let value = (!is_wildcard(value)).then_some(value);
        match kind {
            FieldKind::PackageName => {
                self.pkg_name = value.map(|name| {
                    let pattern = if name.ends_with('*') {
                        name.to_string()
                    } else {
                        format!("{name}*")
                    };
                    WildcardPattern::new(&pattern, false)
                });
            }
            FieldKind::ActionType => self.action_type = value.map(str::to_string),
            FieldKind::Key => self.key = value.map(str::to_string),
        }
    }

    /// Like [`set`](Self::set) with the field given by name.
    pub fn set_named(&mut self, name: &str, value: &str) -> Result<()> {
        self.set(name.parse()?, value);
        Ok(())
    }

    pub fn pkg_name(&self) -> Option<&WildcardPattern> {
        self.pkg_name.as_ref()
    }

    pub fn action_type(&self) -> Option<&str> {
        self.action_type.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.pkg_name.is_none() && self.action_type.is_none() && self.key.is_none()
    }

    /// True when an action of `action_type` and `key` in package
    /// `fmri` passes every restriction.
    pub fn accepts(&self, fmri: &str, action_type: &str, key: &str) -> bool {
        self.pkg_name.as_ref().map_or(true, |pattern| pattern.matches(fmri))
            && self.action_type.as_deref().map_or(true, |wanted| wanted == action_type)
            && self.key.as_deref().map_or(true, |wanted| wanted == key)
    }
}

fn escape_colons(value: &str) -> String {
    value.replace(':', "\\:")
}

impl fmt::Display for FieldRestrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.pkg_name.as_ref().map(|p| escape_colons(p.as_str())).unwrap_or_default(),
            self.action_type.as_deref().map(escape_colons).unwrap_or_default(),
            self.key.as_deref().map(escape_colons).unwrap_or_default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// A single search token, possibly containing `*`, `?` or `[...]`.
#[derive(Debug, Clone)]
pub struct TermQuery {
    term: String,
    glob: bool,
    fields: FieldRestrictions,
}

impl TermQuery {
    pub fn new(term: &str) -> Self {
        let term = term.trim();
        Self {
            term: term.to_string(),
            glob: term.contains(['*', '?', '[']),
            fields: FieldRestrictions::default(),
        }
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn is_glob(&self) -> bool {
        self.glob
    }

    pub fn fields(&self) -> &FieldRestrictions {
        &self.fields
    }

    pub fn add_field_restrictions(&mut self, fields: &FieldRestrictions) {
        self.fields = fields.clone();
    }

    /// Turns the term into a prefix match.
    pub fn add_trailing_wildcard(&mut self) {
        if !self.term.ends_with('*') {
            self.term.push('*');
        }
        self.glob = true;
    }
}

impl fmt::Display for TermQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.fields, escape_colons(&self.term))
    }
}

/// A quoted phrase. The index is searched for the first word and the
/// candidate lines are then filtered for the whole phrase.
#[derive(Debug, Clone)]
pub struct PhraseQuery {
    first: TermQuery,
    phrase: String,
}

impl PhraseQuery {
    pub fn new(words: &[String]) -> Self {
        let mut first = TermQuery::new(words.first().map(String::as_str).unwrap_or_default());
        if words.len() > 1 {
            first.add_trailing_wildcard();
        }
        Self {
            first,
            phrase: words.join(" "),
        }
    }

    pub fn first_term(&self) -> &TermQuery {
        &self.first
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}

impl fmt::Display for PhraseQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:'{}'", self.first.fields, self.phrase)
    }
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// Both sides of an `AND` or `OR`. The sides always share a return type.
#[derive(Debug, Clone)]
pub struct BooleanQuery {
    left: Box<QueryNode>,
    right: Box<QueryNode>,
    return_type: ReturnType,
}

impl BooleanQuery {
    fn new(left: QueryNode, right: QueryNode) -> Result<Self> {
        check_return_types(&left, &right)?;
        Ok(Self {
            return_type: left.return_type(),
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn left(&self) -> &QueryNode {
        &self.left
    }

    pub fn right(&self) -> &QueryNode {
        &self.right
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }
}

fn check_return_types(left: &QueryNode, right: &QueryNode) -> Result<()> {
    if left.return_type() == right.return_type() {
        return Ok(());
    }
    let (actions, packages) = if left.return_type() == ReturnType::Actions {
        (left, right)
    } else {
        (right, left)
    };
    Err(PkgIndexError::BooleanQuery {
        actions: actions.to_string(),
        packages: packages.to_string(),
    })
}

#[derive(Debug, Clone)]
pub enum QueryNode {
    Term(TermQuery),
    Phrase(PhraseQuery),
    /// A term or phrase with field restrictions already pushed into it.
    Field(Box<QueryNode>),
    And(BooleanQuery),
    Or(BooleanQuery),
    /// `<...>`: reduces an action query to the packages it matched.
    PkgConversion(Box<QueryNode>),
}

impl QueryNode {
    pub fn term(term: &str) -> Self {
        Self::Term(TermQuery::new(term))
    }

    pub fn phrase(words: &[String]) -> Self {
        Self::Phrase(PhraseQuery::new(words))
    }

    pub fn field(fields: &FieldRestrictions, mut inner: QueryNode) -> Self {
        inner.add_field_restrictions(fields);
        Self::Field(Box::new(inner))
    }

    /// Fails with [`PkgIndexError::BooleanQuery`] when one side returns
    /// actions and the other packages.
    pub fn and(left: QueryNode, right: QueryNode) -> Result<Self> {
        BooleanQuery::new(left, right).map(Self::And)
    }

    pub fn or(left: QueryNode, right: QueryNode) -> Result<Self> {
        BooleanQuery::new(left, right).map(Self::Or)
    }

    pub fn pkg_conversion(inner: QueryNode) -> Self {
        Self::PkgConversion(Box::new(inner))
    }

    pub fn return_type(&self) -> ReturnType {
        match self {
            Self::Term(_) | Self::Phrase(_) | Self::Field(_) => ReturnType::Actions,
            Self::And(boolean) | Self::Or(boolean) => boolean.return_type,
            Self::PkgConversion(_) => ReturnType::Packages,
        }
    }

    /// Pushes field restrictions down to every leaf. Restrictions applied
    /// later replace earlier ones.
    pub fn add_field_restrictions(&mut self, fields: &FieldRestrictions) {
        match self {
            Self::Term(term) => term.add_field_restrictions(fields),
            Self::Phrase(phrase) => phrase.first.add_field_restrictions(fields),
            Self::Field(inner) | Self::PkgConversion(inner) => inner.add_field_restrictions(fields),
            Self::And(boolean) | Self::Or(boolean) => {
                boolean.left.add_field_restrictions(fields);
                boolean.right.add_field_restrictions(fields);
            }
        }
    }

    /// Rewrites the tree to return packages: every action-returning leaf is
    /// wrapped in a [`QueryNode::PkgConversion`].
    pub fn propagate_pkg_return(&mut self) {
        match self {
            Self::Term(_) | Self::Phrase(_) | Self::Field(_) => {
                let leaf = std::mem::replace(self, Self::term("*"));
                *self = Self::pkg_conversion(leaf);
            }
            Self::PkgConversion(_) => {}
            Self::And(boolean) | Self::Or(boolean) => {
                boolean.left.propagate_pkg_return();
                boolean.right.propagate_pkg_return();
                boolean.return_type = ReturnType::Packages;
            }
        }
    }

    /// Whether this tree can answer a search protocol of version `version`.
    pub fn allow_version(&self, version: u32) -> bool {
        match self {
            Self::Term(_) => true,
            Self::Phrase(_) | Self::Field(_) | Self::PkgConversion(_) => version > 0,
            Self::And(boolean) | Self::Or(boolean) => {
                version > 0 && boolean.left.allow_version(version) && boolean.right.allow_version(version)
            }
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Term(term) => term.fmt(f),
            Self::Phrase(phrase) => phrase.fmt(f),
            Self::Field(inner) => inner.fmt(f),
            Self::And(boolean) => write!(f, "({} AND {})", boolean.left, boolean.right),
            Self::Or(boolean) => write!(f, "({} OR {})", boolean.left, boolean.right),
            Self::PkgConversion(inner) => write!(f, "p<{inner}>"),
        }
    }
}

/// The root of a parsed query. Holds the result window.
#[derive(Debug, Clone)]
pub struct TopQuery {
    query: QueryNode,
    start_point: usize,
    num_to_return: Option<usize>,
}

impl TopQuery {
    pub fn new(query: QueryNode) -> Self {
        Self {
            query,
            start_point: 0,
            num_to_return: None,
        }
    }

    pub fn query(&self) -> &QueryNode {
        &self.query
    }

    pub fn return_type(&self) -> ReturnType {
        self.query.return_type()
    }

    pub fn start_point(&self) -> usize {
        self.start_point
    }

    pub fn num_to_return(&self) -> Option<usize> {
        self.num_to_return
    }

    pub fn set_info(&mut self, num_to_return: Option<usize>, start_point: Option<usize>) {
        if let Some(start_point) = start_point.filter(|start| *start > 0) {
            self.start_point = start_point;
        }
        self.num_to_return = num_to_return;
    }

    /// Whether the result at position `index` falls inside the window.
    pub fn keep(&self, index: usize) -> bool {
        index >= self.start_point
            && self
                .num_to_return
                .map_or(true, |count| index < count + self.start_point)
    }

    pub fn propagate_pkg_return(&mut self) {
        self.query.propagate_pkg_return();
    }

    pub fn allow_version(&self, version: u32) -> bool {
        self.query.allow_version(version)
    }
}

impl fmt::Display for TopQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.query.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_restrictions() {
        let fields = FieldRestrictions::new("system/lib", "file", "*");
        assert_eq!(fields.pkg_name().unwrap().as_str(), "system/lib*");
        assert_eq!(fields.action_type(), Some("file"));
        assert_eq!(fields.key(), None);
        assert!(fields.accepts("System/Library@1.0,5.11", "file", "path"));
        assert!(!fields.accepts("system/library@1.0,5.11", "dir", "path"));
        assert!(!fields.accepts("other@1.0", "file", "path"));
        assert!(FieldRestrictions::new("", "*", "").is_unrestricted());
        assert_eq!(fields.to_string(), "system/lib*:file:");
    }

    #[test]
    fn test_unknown_field_kind() {
        let mut fields = FieldRestrictions::default();
        fields.set_named("key", "path").unwrap();
        assert_eq!(fields.key(), Some("path"));
        assert!(matches!(
            fields.set_named("mode", "0755"),
            Err(PkgIndexError::UnknownFieldType(ref name)) if name == "mode"
        ));
    }

    #[test]
    fn test_mixed_boolean_is_rejected_at_construction() {
        let actions = QueryNode::term("foo");
        let packages = QueryNode::pkg_conversion(QueryNode::term("bar"));
        let error = QueryNode::and(actions.clone(), packages.clone()).unwrap_err();
        match error {
            PkgIndexError::BooleanQuery { actions, packages } => {
                assert_eq!(actions, ":::foo");
                assert_eq!(packages, "p<:::bar>");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(QueryNode::or(packages, actions).is_err());
    }

    #[test]
    fn test_propagate_pkg_return() {
        let mut node = QueryNode::and(
            QueryNode::term("foo"),
            QueryNode::or(QueryNode::term("bar"), QueryNode::term("baz")).unwrap(),
        )
        .unwrap();
        node.propagate_pkg_return();
        assert_eq!(node.return_type(), ReturnType::Packages);
        assert_eq!(node.to_string(), "(p<:::foo> AND (p<:::bar> OR p<:::baz>))");
    }

    #[test]
    fn test_phrase_extends_first_word() {
        let phrase = PhraseQuery::new(&["gconf".to_string(), "xml".to_string()]);
        assert_eq!(phrase.first_term().term(), "gconf*");
        assert!(phrase.first_term().is_glob());
        assert_eq!(phrase.phrase(), "gconf xml");

        let single = PhraseQuery::new(&["gconf".to_string()]);
        assert_eq!(single.first_term().term(), "gconf");
        assert!(!single.first_term().is_glob());
    }

    #[test]
    fn test_window() {
        let mut top = TopQuery::new(QueryNode::term("foo"));
        top.set_info(Some(3), Some(2));
        let kept: Vec<usize> = (0..10).filter(|index| top.keep(*index)).collect();
        assert_eq!(kept, vec![2, 3, 4]);

        top.set_info(None, None);
        assert!(top.keep(2) && top.keep(100) && !top.keep(1));
        assert!(top.allow_version(1));
        assert!(!TopQuery::new(QueryNode::pkg_conversion(QueryNode::term("x"))).allow_version(0));
    }
}
