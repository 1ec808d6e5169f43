//! Matching user patterns such as `foo`, `pkg://test/sys*` or `foo@1.*`
//! against catalog contents.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::fmri::version::{Constraint, MatchingVersion, Version, DEFAULT_BUILD_RELEASE};
use crate::fmri::{fmri_match, is_same_publisher, FmriError, FmriErrorKind, NameMatcher, PkgFmri};

/// Matches sorted newest first, plus the patterns that matched nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult<T> {
    pub matches: Vec<T>,
    pub unmatched: Vec<String>,
}

/// The version half of a pattern. `strict` is set when the pattern is also
/// a plain version, which the non-`Auto` constraints need.
struct VersionPattern {
    wildcard: MatchingVersion,
    strict: Option<Version>,
}

impl VersionPattern {
    fn parse(text: &str) -> std::result::Result<Self, FmriError> {
        let wildcard = MatchingVersion::parse(text, Some(DEFAULT_BUILD_RELEASE)).map_err(|error| {
            FmriError::IllegalMatching {
                fmri: text.to_string(),
                kind: FmriErrorKind::BadVersion(error),
            }
        })?;
        let strict = Version::parse(text, Some(DEFAULT_BUILD_RELEASE)).ok();
        Ok(Self { wildcard, strict })
    }

    fn accepts(&self, version: &Version, constraint: Constraint) -> bool {
        if self.wildcard.matches(version) {
            return true;
        }
        match (&self.strict, constraint) {
            (_, Constraint::Auto) => version.is_successor_of_pattern(&self.wildcard),
            (Some(strict), constraint) => version == strict || version.is_successor(strict, constraint),
            (None, _) => false,
        }
    }
}

struct Pattern {
    text: String,
    fmri: PkgFmri,
    version: Option<VersionPattern>,
}

fn parse_pattern(text: &str) -> std::result::Result<Pattern, FmriError> {
    let (name_part, version_part) = match text.rfind('@') {
        Some(at) => (&text[..at], Some(&text[at + 1..])),
        None => (text, None),
    };
    let fmri = PkgFmri::matching_parse(name_part, Some(DEFAULT_BUILD_RELEASE)).map_err(|error| match error {
        FmriError::IllegalMatching { kind, .. } => FmriError::IllegalMatching {
            fmri: text.to_string(),
            kind,
        },
        other => other,
    })?;
    let version = version_part
        .filter(|v| !v.is_empty())
        .map(VersionPattern::parse)
        .transpose()?;
    Ok(Pattern {
        text: text.to_string(),
        fmri,
        version,
    })
}

/// Returns the FMRIs matching any of `patterns`.
///
/// A pattern's publisher, when present, must be the same publisher as the
/// FMRI's. Names are compared with `matcher` (default [`fmri_match`]). A
/// pattern version is satisfied by wildcard equality or, under
/// `constraint`, by a successor.
pub fn extract_matching_fmris<I>(
    fmris: I,
    patterns: &[&str],
    matcher: Option<NameMatcher>,
    constraint: Constraint,
) -> Result<MatchResult<PkgFmri>>
where
    I: IntoIterator<Item = PkgFmri>,
{
    let matcher = matcher.unwrap_or(fmri_match);
    let parsed = patterns
        .iter()
        .map(|pattern| parse_pattern(pattern))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut matched_patterns = vec![false; parsed.len()];
    let mut matches = BTreeSet::new();
    for fmri in fmris {
        for (index, pattern) in parsed.iter().enumerate() {
            if pattern.fmri.has_publisher()
                && !is_same_publisher(pattern.fmri.get_publisher_str(), fmri.get_publisher_str())
            {
                continue;
            }
            if !matcher(fmri.name(), pattern.fmri.name()) {
                continue;
            }
            let version_ok = match (&pattern.version, fmri.version()) {
                (None, _) => true,
                (Some(wanted), Some(version)) => wanted.accepts(version, constraint),
                (Some(_), None) => false,
            };
            if version_ok {
                matched_patterns[index] = true;
                matches.insert(fmri.clone());
            }
        }
    }

    let unmatched = parsed
        .iter()
        .zip(&matched_patterns)
        .filter(|(_, matched)| !**matched)
        .map(|(pattern, _)| pattern.text.clone())
        .collect();
    Ok(MatchResult {
        matches: matches.into_iter().rev().collect(),
        unmatched,
    })
}

/// Returns the versions matching any of the version `patterns`, newest
/// first.
pub fn extract_matching_versions<I>(
    versions: I,
    patterns: &[&str],
    constraint: Constraint,
) -> Result<MatchResult<Version>>
where
    I: IntoIterator<Item = Version>,
{
    let parsed = patterns
        .iter()
        .map(|pattern| VersionPattern::parse(pattern))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut matched_patterns = vec![false; parsed.len()];
    let mut matches = BTreeSet::new();
    for version in versions {
        for (index, pattern) in parsed.iter().enumerate() {
            if pattern.accepts(&version, constraint) {
                matched_patterns[index] = true;
                matches.insert(version.clone());
            }
        }
    }

    let unmatched = patterns
        .iter()
        .zip(&matched_patterns)
        .filter(|(_, matched)| !**matched)
        .map(|(pattern, _)| pattern.to_string())
        .collect();
    Ok(MatchResult {
        matches: matches.into_iter().rev().collect(),
        unmatched,
    })
}
