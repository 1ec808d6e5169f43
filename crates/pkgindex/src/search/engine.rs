//! Evaluation of a parsed query tree against an index snapshot.

use std::collections::BTreeSet;
use std::path::Path;

use memchr::memmem;

use super::manager::{IndexSnapshot, SearchStats};
use super::term::search_term;
use super::tokenize::ManifestSource;
use crate::error::{PkgIndexError, Result};
use crate::fmri::PkgFmri;
use crate::query::{PhraseQuery, QueryNode, ReturnType, TopQuery};
use crate::storage::MainDict;

/// Protocol version stamped on every result.
pub const SEARCH_PROTOCOL_VERSION: u32 = 1;

/// One matching action line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionResult {
    /// The manifest list entry of the package, without scheme or publisher.
    pub fmri: String,
    pub action_type: String,
    pub key: String,
    pub full_value: String,
    /// The manifest line, without its newline.
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionHit {
    pub fmri: PkgFmri,
    pub full_value: String,
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Actions(ActionHit),
    Packages(PkgFmri),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub version: u32,
    pub result: QueryResult,
}

pub(crate) struct SearchContext<'a> {
    pub dir: &'a Path,
    pub snapshot: &'a IndexSnapshot,
    /// Opened in the same generation as `snapshot`.
    pub main: MainDict,
    pub manifests: &'a dyn ManifestSource,
    pub case_sensitive: bool,
    pub build_release: &'a str,
    pub stats: &'a SearchStats,
}

impl SearchContext<'_> {
    pub(crate) fn parse_fmri(&self, text: &str) -> Result<PkgFmri> {
        Ok(PkgFmri::parse(text, Some(self.build_release), None)?)
    }
}

// ---------------------------------------------------------------------------
// Action results
// ---------------------------------------------------------------------------

/// Runs an action-returning node. With `restriction`, only those actions
/// are considered.
pub(crate) fn search_actions(
    node: &QueryNode,
    context: &mut SearchContext<'_>,
    restriction: Option<&[ActionResult]>,
) -> Result<Vec<ActionResult>> {
    if node.return_type() == ReturnType::Packages {
        return Err(PkgIndexError::BooleanQuery {
            actions: String::new(),
            packages: node.to_string(),
        });
    }
    match node {
        QueryNode::Term(term) => search_term(term, context, restriction),
        QueryNode::Phrase(phrase) => search_phrase(phrase, context, restriction),
        QueryNode::Field(inner) => search_actions(inner, context, restriction),
        QueryNode::And(boolean) => {
            let left = search_actions(boolean.left(), context, restriction)?;
            search_actions(boolean.right(), context, Some(&left))
        }
        QueryNode::Or(boolean) => match restriction {
            None => {
                let mut results = search_actions(boolean.left(), context, None)?;
                results.extend(search_actions(boolean.right(), context, None)?);
                Ok(results)
            }
            Some(items) => {
                let mut results = Vec::new();
                for item in items {
                    let only = std::slice::from_ref(item);
                    results.extend(search_actions(boolean.left(), context, Some(only))?);
                    results.extend(search_actions(boolean.right(), context, Some(only))?);
                }
                Ok(results)
            }
        },
        QueryNode::PkgConversion(_) => Ok(Vec::new()),
    }
}

fn contains(haystack: &str, needle: &str) -> bool {
    memmem::find(haystack.as_bytes(), needle.as_bytes()).is_some()
}

/// Finds the first word, then keeps the lines containing the whole
/// phrase. Outside `set` actions, or when the matched value does not
/// contain the phrase, the phrase itself is reported as the value.
fn search_phrase(
    phrase: &PhraseQuery,
    context: &mut SearchContext<'_>,
    restriction: Option<&[ActionResult]>,
) -> Result<Vec<ActionResult>> {
    let case_sensitive = context.case_sensitive;
    let compare = if case_sensitive {
        phrase.phrase().to_string()
    } else {
        phrase.phrase().to_lowercase()
    };
    let fold = |text: &str| {
        if case_sensitive {
            text.to_string()
        } else {
            text.to_lowercase()
        }
    };

    let candidates = search_term(phrase.first_term(), context, restriction)?;
    Ok(candidates
        .into_iter()
        .filter(|candidate| contains(&fold(&candidate.line), &compare))
        .map(|mut candidate| {
            let keep_value =
                candidate.action_type != "set" || contains(&fold(&candidate.full_value), &compare);
            if !keep_value {
                candidate.full_value = compare.clone();
            }
            candidate
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Package results
// ---------------------------------------------------------------------------

fn newest_first(packages: BTreeSet<PkgFmri>) -> Vec<PkgFmri> {
    packages.into_iter().rev().collect()
}

/// Runs a package-returning node. Results are distinct and sorted newest
/// first.
pub(crate) fn search_packages(node: &QueryNode, context: &mut SearchContext<'_>) -> Result<Vec<PkgFmri>> {
    match node {
        QueryNode::PkgConversion(inner) if inner.return_type() == ReturnType::Packages => {
            search_packages(inner, context)
        }
        QueryNode::PkgConversion(inner) => {
            let mut packages = BTreeSet::new();
            for action in search_actions(inner, context, None)? {
                packages.insert(context.parse_fmri(&action.fmri)?);
            }
            Ok(newest_first(packages))
        }
        QueryNode::And(boolean) if boolean.return_type() == ReturnType::Packages => {
            let left: BTreeSet<PkgFmri> = search_packages(boolean.left(), context)?.into_iter().collect();
            let right: BTreeSet<PkgFmri> = search_packages(boolean.right(), context)?.into_iter().collect();
            Ok(newest_first(left.intersection(&right).cloned().collect()))
        }
        QueryNode::Or(boolean) if boolean.return_type() == ReturnType::Packages => {
            let mut packages: BTreeSet<PkgFmri> = search_packages(boolean.left(), context)?.into_iter().collect();
            packages.extend(search_packages(boolean.right(), context)?);
            Ok(newest_first(packages))
        }
        other => {
            let mut packages = BTreeSet::new();
            for action in search_actions(other, context, None)? {
                packages.insert(context.parse_fmri(&action.fmri)?);
            }
            Ok(newest_first(packages))
        }
    }
}

/// Evaluates `top` and applies its result window.
pub(crate) fn finalize(top: &TopQuery, context: &mut SearchContext<'_>) -> Result<Vec<SearchHit>> {
    match top.return_type() {
        ReturnType::Actions => {
            let actions = search_actions(top.query(), context, None)?;
            let mut hits = Vec::new();
            for (index, action) in actions.into_iter().enumerate() {
                if !top.keep(index) {
                    continue;
                }
                hits.push(SearchHit {
                    version: SEARCH_PROTOCOL_VERSION,
                    result: QueryResult::Actions(ActionHit {
                        fmri: context.parse_fmri(&action.fmri)?,
                        full_value: action.full_value,
                        line: action.line,
                    }),
                });
            }
            Ok(hits)
        }
        ReturnType::Packages => Ok(search_packages(top.query(), context)?
            .into_iter()
            .enumerate()
            .filter(|(index, _)| top.keep(*index))
            .map(|(_, fmri)| SearchHit {
                version: SEARCH_PROTOCOL_VERSION,
                result: QueryResult::Packages(fmri),
            })
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::super::fixture::{manifest_entry, IndexFixture};
    use super::super::tokenize::SimpleActionTokenizer;
    use super::*;
    use crate::query::{Query, QueryParser};
    use crate::storage::IndexStore;

    const PKG0: &[&str] = &[
        "set name=pkg.description value=\"sample tools\"",
        "file path=usr/bin/sample mode=0555",
        "dir path=usr/share",
    ];
    const PKG1: &[&str] = &[
        "file path=usr/bin/other mode=0555",
        "file path=usr/lib/sample.so mode=0444",
        "set name=info.keywords value=\"gconf xml\"",
    ];
    const GCONF: &[&str] = &["file path=etc/gconf/gconf.xml mode=0644", "dir path=usr/bin"];

    fn packages() -> Vec<(&'static str, &'static [&'static str])> {
        vec![
            ("pkg0@1.0,5.11", PKG0),
            ("pkg1@2.0,5.11", PKG1),
            ("tools/gconf@1.0,5.11", GCONF),
        ]
    }

    fn actions(hits: &[SearchHit]) -> Vec<(String, String)> {
        hits.iter()
            .map(|hit| {
                assert_eq!(hit.version, SEARCH_PROTOCOL_VERSION);
                match &hit.result {
                    QueryResult::Actions(action) => (action.fmri.get_fmri(None, true, false), action.line.clone()),
                    QueryResult::Packages(fmri) => panic!("unexpected package result {fmri}"),
                }
            })
            .collect()
    }

    fn packages_of(hits: &[SearchHit]) -> Vec<PkgFmri> {
        hits.iter()
            .map(|hit| match &hit.result {
                QueryResult::Packages(fmri) => fmri.clone(),
                QueryResult::Actions(action) => panic!("unexpected action result {action:?}"),
            })
            .collect()
    }

    fn run(fixture: &IndexFixture, text: &str, case_sensitive: bool, return_type: ReturnType) -> Vec<SearchHit> {
        let query = Query::new(text, case_sensitive, return_type, None, None).unwrap();
        fixture.manager().search(&query).unwrap()
    }

    #[test]
    fn test_exact_term() {
        let fixture = IndexFixture::build(&packages());
        let found = actions(&run(&fixture, "sample", true, ReturnType::Actions));
        assert_eq!(
            found,
            vec![
                ("pkg0@1.0,5.11".to_string(), PKG0[1].to_string()),
                ("pkg0@1.0,5.11".to_string(), PKG0[0].to_string()),
            ]
        );
        assert!(run(&fixture, "missing", true, ReturnType::Actions).is_empty());
    }

    #[test]
    fn test_glob_and_case_folding() {
        let fixture = IndexFixture::build(&packages());
        let globbed: HashSet<String> = actions(&run(&fixture, "sample*", true, ReturnType::Actions))
            .into_iter()
            .map(|(_, line)| line)
            .collect();
        assert_eq!(globbed.len(), 3);
        assert!(globbed.contains(PKG1[1]));

        assert!(run(&fixture, "SAMPLE", true, ReturnType::Actions).is_empty());
        assert_eq!(run(&fixture, "SAMPLE", false, ReturnType::Actions).len(), 2);
    }

    fn line_set(hits: &[SearchHit]) -> HashSet<String> {
        actions(hits).into_iter().map(|(_, line)| line).collect()
    }

    #[test]
    fn test_repeated_and_adjacent_wildcards() {
        let fixture = IndexFixture::build(&packages());
        let single = line_set(&run(&fixture, "samp*", true, ReturnType::Actions));
        assert_eq!(single.len(), 3);
        assert_eq!(line_set(&run(&fixture, "samp**", true, ReturnType::Actions)), single);
        assert_eq!(line_set(&run(&fixture, "SAMP**", false, ReturnType::Actions)), single);

        let ends_in_e = line_set(&run(&fixture, "s**e", true, ReturnType::Actions));
        assert_eq!(ends_in_e, HashSet::from([PKG0[0].to_string(), PKG0[1].to_string(), PKG0[2].to_string()]));

        let exact = line_set(&run(&fixture, "sample", true, ReturnType::Actions));
        assert_eq!(line_set(&run(&fixture, "sa*?ple", true, ReturnType::Actions)), exact);

        let by_package = actions(&run(&fixture, "pkg**:::sample", true, ReturnType::Actions));
        assert_eq!(by_package.len(), 2);
        assert!(by_package.iter().all(|(fmri, _)| fmri == "pkg0@1.0,5.11"));
    }

    #[test]
    fn test_package_patterns_beyond_prefix() {
        let fixture = IndexFixture::build(&packages());
        let manager = fixture.manager();
        let query = Query::new("*gconf:::*", true, ReturnType::Actions, None, None).unwrap();
        let found: HashSet<(String, String)> = actions(&manager.search(&query).unwrap()).into_iter().collect();
        let expected: HashSet<(String, String)> = GCONF
            .iter()
            .map(|line| ("tools/gconf@1.0,5.11".to_string(), line.to_string()))
            .collect();
        assert_eq!(found, expected);
        assert_eq!(manager.stats().full_scans(), 0);

        let found = line_set(&run(&fixture, "pkg?:::sample*", true, ReturnType::Actions));
        assert_eq!(
            found,
            HashSet::from([PKG0[0].to_string(), PKG0[1].to_string(), PKG1[1].to_string()])
        );
        assert_eq!(
            actions(&run(&fixture, "t?ols/*:::bin", true, ReturnType::Actions)),
            vec![("tools/gconf@1.0,5.11".to_string(), GCONF[1].to_string())]
        );
        assert!(run(&fixture, "[!p]*:::sample", true, ReturnType::Actions).is_empty());
    }

    #[test]
    fn test_and_narrows_left_results() {
        let fixture = IndexFixture::build(&packages());
        let found: HashSet<(String, String)> = actions(&run(&fixture, "bin AND sample", true, ReturnType::Actions))
            .into_iter()
            .collect();

        let brute_force: HashSet<(String, String)> = IndexFixture::all_lines(&packages())
            .into_iter()
            .filter(|(_, line)| {
                let tokens = SimpleActionTokenizer.tokenize(line);
                tokens.iter().any(|token| token.token == "bin") && tokens.iter().any(|token| token.token == "sample")
            })
            .collect();
        assert_eq!(found, brute_force);
        assert_eq!(found.len(), 1);

        // Same answer as running the left side and restricting the right.
        let manager = fixture.manager();
        let snapshot = manager.snapshot().unwrap();
        let mut main = MainDict::default();
        main.open(&fixture.index_dir).unwrap();
        let mut context = SearchContext {
            dir: &fixture.index_dir,
            snapshot: &snapshot,
            main,
            manifests: &*fixture.manifests,
            case_sensitive: true,
            build_release: "5.11",
            stats: manager.stats(),
        };
        let left = search_actions(&QueryNode::term("bin"), &mut context, None).unwrap();
        let narrowed = search_actions(&QueryNode::term("sample"), &mut context, Some(&left)).unwrap();
        let narrowed: HashSet<(String, String)> =
            narrowed.into_iter().map(|action| (action.fmri, action.line)).collect();
        assert_eq!(narrowed, found);
    }

    #[test]
    fn test_or_keeps_duplicates_and_splits_restriction() {
        let fixture = IndexFixture::build(&packages());
        assert_eq!(run(&fixture, "sample OR sample", true, ReturnType::Actions).len(), 4);

        let found = actions(&run(&fixture, "sample AND (share OR tools)", true, ReturnType::Actions));
        assert_eq!(found, vec![("pkg0@1.0,5.11".to_string(), PKG0[0].to_string())]);
    }

    #[test]
    fn test_overlapping_or_under_restriction() {
        let fixture = IndexFixture::build(&packages());
        let mut found = actions(&run(&fixture, "bin AND (sample OR usr)", true, ReturnType::Actions));
        found.sort();
        assert_eq!(
            found,
            vec![
                ("pkg0@1.0,5.11".to_string(), PKG0[1].to_string()),
                ("pkg0@1.0,5.11".to_string(), PKG0[1].to_string()),
                ("pkg1@2.0,5.11".to_string(), PKG1[0].to_string()),
                ("tools/gconf@1.0,5.11".to_string(), GCONF[1].to_string()),
            ]
        );
    }

    #[test]
    fn test_phrase_filters_lines() {
        let fixture = IndexFixture::build(&packages());
        let hits = run(&fixture, "'sample tools'", true, ReturnType::Actions);
        assert_eq!(actions(&hits), vec![("pkg0@1.0,5.11".to_string(), PKG0[0].to_string())]);
        let QueryResult::Actions(action) = &hits[0].result else {
            panic!("expected an action");
        };
        assert_eq!(action.full_value, "sample tools");

        assert_eq!(run(&fixture, "'SAMPLE TOOLS'", false, ReturnType::Actions).len(), 1);
        assert!(run(&fixture, "'sample xml'", true, ReturnType::Actions).is_empty());
    }

    #[test]
    fn test_phrase_reports_phrase_for_non_matching_set_value() {
        let fixture = IndexFixture::build(&[(
            "pkg0@1.0,5.11",
            &["set name=gconf value=xml"] as &[&str],
        )]);
        let hits = run(&fixture, "'gconf value'", true, ReturnType::Actions);
        let QueryResult::Actions(action) = &hits[0].result else {
            panic!("expected an action");
        };
        assert_eq!(action.full_value, "gconf value");
    }

    #[test]
    fn test_field_restrictions() {
        let fixture = IndexFixture::build(&packages());
        let by_type = actions(&run(&fixture, "file:path:sample", true, ReturnType::Actions));
        assert_eq!(by_type, vec![("pkg0@1.0,5.11".to_string(), PKG0[1].to_string())]);

        let by_package = actions(&run(&fixture, "pkg1:::sample*", true, ReturnType::Actions));
        assert_eq!(by_package, vec![("pkg1@2.0,5.11".to_string(), PKG1[1].to_string())]);

        let by_key = actions(&run(&fixture, "value:", true, ReturnType::Actions));
        assert_eq!(by_key.len(), 4);
        assert!(by_key.iter().all(|(_, line)| line.starts_with("set ")));
        assert!(run(&fixture, "link::sample", true, ReturnType::Actions).is_empty());
    }

    #[test]
    fn test_package_results_are_distinct_and_descending() {
        let fixture = IndexFixture::build(&packages());
        let found = packages_of(&run(&fixture, "gconf OR sample", true, ReturnType::Packages));
        assert_eq!(found.len(), 3);
        assert!(found.windows(2).all(|pair| pair[0] > pair[1]));

        let both = packages_of(&run(&fixture, "<bin> AND <sample>", true, ReturnType::Actions));
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].get_fmri(None, true, false), manifest_entry("pkg0@1.0,5.11"));
    }

    #[test]
    fn test_unrestricted_wildcard_scans_everything() {
        let fixture = IndexFixture::build(&packages());
        let manager = fixture.manager();
        let query = Query::new("*", true, ReturnType::Packages, None, None).unwrap();
        let found = packages_of(&manager.search(&query).unwrap());
        assert_eq!(found.len(), 3);
        assert_eq!(manager.stats().full_scans(), 1);

        let query = Query::new("file::*", true, ReturnType::Actions, None, None).unwrap();
        let lines: HashSet<(String, String)> = actions(&manager.search(&query).unwrap()).into_iter().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(manager.stats().full_scans(), 1);
    }

    #[test]
    fn test_pagination_window() {
        let lines: Vec<String> = (0..10).map(|index| format!("file path=opt/item mode=0{index}")).collect();
        let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", lines.as_slice())]);
        let manager = fixture.manager();

        let all = actions(&manager.search(&Query::new("item", true, ReturnType::Actions, None, None).unwrap()).unwrap());
        assert_eq!(all.len(), 10);

        let query = Query::new("item", true, ReturnType::Actions, Some(3), Some(2)).unwrap();
        let first = actions(&manager.search(&query).unwrap());
        assert_eq!(first, all[2..5].to_vec());
        assert_eq!(actions(&manager.search(&query).unwrap()), first);
    }

    #[test]
    fn test_package_node_in_action_position_is_rejected() {
        let fixture = IndexFixture::build(&packages());
        let top = QueryParser::parse("<sample>").unwrap();
        let manager = fixture.manager();
        let snapshot = manager.snapshot().unwrap();
        let mut main = MainDict::default();
        main.open(&fixture.index_dir).unwrap();
        let mut context = SearchContext {
            dir: &fixture.index_dir,
            snapshot: &snapshot,
            main,
            manifests: &*fixture.manifests,
            case_sensitive: true,
            build_release: "5.11",
            stats: manager.stats(),
        };
        assert!(matches!(
            search_actions(top.query(), &mut context, None),
            Err(PkgIndexError::BooleanQuery { .. })
        ));
    }
}
