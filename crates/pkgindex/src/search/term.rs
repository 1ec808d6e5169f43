//! Single-term lookups.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};

use super::engine::{ActionResult, SearchContext};
use crate::error::{PkgIndexError, Result};
use crate::query::TermQuery;
use crate::storage::{read_offset_file, IndexStore, ACTION_TYPE_PREFIX, KEY_PREFIX, LEGACY_PKG_DIR};
use crate::text_match::{is_all_wildcards, WildcardPattern};

/// Where the index says a token occurs inside one package.
#[derive(Debug)]
struct IndexHit {
    fmri: String,
    offsets: Vec<u64>,
    action_type: String,
    key: String,
    full_value: String,
}

pub(crate) fn search_term(
    term: &TermQuery,
    context: &mut SearchContext<'_>,
    restriction: Option<&[ActionResult]>,
) -> Result<Vec<ActionResult>> {
    match restriction {
        Some(candidates) => Ok(restricted_search(term, context, candidates)),
        None => {
            let hits = index_search(term, context)?;
            read_manifest_lines(hits, context)
        }
    }
}

/// Keeps the candidates whose action line produces a token matching the
/// term.
fn restricted_search(term: &TermQuery, context: &SearchContext<'_>, candidates: &[ActionResult]) -> Vec<ActionResult> {
    let fields = term.fields();
    let pattern = (term.is_glob() || !context.case_sensitive)
        .then(|| WildcardPattern::new(term.term(), context.case_sensitive));

    candidates
        .iter()
        .filter(|candidate| fields.accepts(&candidate.fmri, &candidate.action_type, &candidate.key))
        .filter(|candidate| {
            let tokens = context.manifests.tokenize(&candidate.line);
            match &pattern {
                Some(pattern) => tokens.iter().any(|token| pattern.matches(&token.token)),
                None => tokens.iter().any(|token| token.token == term.term()),
            }
        })
        .cloned()
        .collect()
}

fn narrow(offsets: &mut Option<HashSet<u64>>, allowed: HashSet<u64>) {
    *offsets = Some(match offsets.take() {
        Some(current) => current.intersection(&allowed).copied().collect(),
        None => allowed,
    });
}

/// Intersects whichever of the token, package, action type and key filters
/// apply, then reads the matching main dictionary lines.
fn index_search(term: &TermQuery, context: &mut SearchContext<'_>) -> Result<Vec<IndexHit>> {
    let case_sensitive = context.case_sensitive;
    let glob = term.is_glob() || !case_sensitive;
    let only_wildcards = is_all_wildcards(term.term());
    let fields = term.fields();
    let token_offsets = context.snapshot.token_offsets();

    // `None` means no filter has applied yet.
    let mut offsets: Option<HashSet<u64>> = None;
    if glob {
        if !only_wildcards {
            let pattern = WildcardPattern::new(term.term(), case_sensitive);
            offsets = Some(
                token_offsets
                    .get_keys()
                    .filter(|token| pattern.matches(token))
                    .filter_map(|token| token_offsets.get_id(token))
                    .collect(),
            );
        }
    } else {
        match token_offsets.get_id(term.term()) {
            Some(offset) => offsets = Some(HashSet::from([offset])),
            None => return Ok(Vec::new()),
        }
    }

    if let Some(pattern) = fields.pkg_name() {
        let allowed = match context.snapshot.fmri_offsets() {
            Some(fmri_offsets) => fmri_offsets.get_offsets(|fmri| pattern.matches(fmri)),
            None => read_legacy_pkg_offsets(pattern, context)?,
        };
        narrow(&mut offsets, allowed);
    }
    if let Some(action_type) = fields.action_type() {
        let path = context.dir.join(format!("{ACTION_TYPE_PREFIX}{action_type}"));
        narrow(&mut offsets, read_offset_file(&path)?);
    }
    if let Some(key) = fields.key() {
        let path = context.dir.join(format!("{KEY_PREFIX}{key}"));
        narrow(&mut offsets, read_offset_file(&path)?);
    }

    let entries = match offsets {
        Some(offsets) => {
            let offsets: Vec<u64> = offsets.into_iter().collect();
            context.main.read_lines_at(&offsets)?
        }
        None => {
            log::warn!(
                "term '{}' is unrestricted, scanning every token in {}",
                term.term(),
                context.dir.display()
            );
            context.stats.record_full_scan();
            context.main.scan()?
        }
    };

    let manifest_list = context.snapshot.manifest_list();
    let mut hits = Vec::new();
    for entry in entries {
        for action_type in &entry.action_types {
            if fields.action_type().is_some_and(|wanted| wanted != action_type.action_type) {
                continue;
            }
            for key in &action_type.keys {
                if fields.key().is_some_and(|wanted| wanted != key.key) {
                    continue;
                }
                for value in &key.values {
                    for package in &value.packages {
                        let fmri = usize::try_from(package.package_id)
                            .ok()
                            .and_then(|id| manifest_list.get_entity(id))
                            .ok_or_else(|| PkgIndexError::CorruptIndex {
                                path: context.dir.join(manifest_list.file_name()),
                                detail: format!("unknown manifest id {}", package.package_id),
                            })?;
                        if fields.pkg_name().is_some_and(|pattern| !pattern.matches(fmri)) {
                            continue;
                        }
                        hits.push(IndexHit {
                            fmri: fmri.to_string(),
                            offsets: package.offsets.clone(),
                            action_type: action_type.action_type.clone(),
                            key: key.key.clone(),
                            full_value: value.full_value.clone(),
                        });
                    }
                }
            }
        }
    }
    Ok(hits)
}

/// Unions the `pkg/<name>/<version>` offset files of every indexed package
/// matching `pattern`. A package without a file contributes nothing.
fn read_legacy_pkg_offsets(pattern: &WildcardPattern, context: &SearchContext<'_>) -> Result<HashSet<u64>> {
    let pkg_dir = context.dir.join(LEGACY_PKG_DIR);
    if !pkg_dir.is_dir() {
        return Err(PkgIndexError::InconsistentIndex {
            dir: context.dir.to_path_buf(),
        });
    }

    let mut offsets = HashSet::new();
    for entry in context.snapshot.manifest_list().entities() {
        if !pattern.matches(entry) {
            continue;
        }
        let fmri = context.parse_fmri(entry)?;
        let Some(version) = fmri.version() else {
            continue;
        };
        let path = pkg_dir.join(fmri.name()).join(version.to_string());
        offsets.extend(read_offset_file(&path)?);
    }
    log::debug!(
        "read {} offsets for '{}' from {}",
        offsets.len(),
        pattern.as_str(),
        pkg_dir.display()
    );
    Ok(offsets)
}

/// Reads the manifest line at each offset of each hit.
fn read_manifest_lines(hits: Vec<IndexHit>, context: &SearchContext<'_>) -> Result<Vec<ActionResult>> {
    let mut results = Vec::new();
    for hit in hits {
        let fmri = context.parse_fmri(&hit.fmri)?;
        let path = context.manifests.manifest_path(&fmri)?;
        let mut reader = BufReader::with_capacity(512, File::open(&path)?);

        let mut offsets = hit.offsets.clone();
        offsets.sort_unstable();
        for offset in offsets {
            reader.seek(SeekFrom::Start(offset))?;
            let mut line = String::new();
            if reader.read_line(&mut line)? == 0 {
                return Err(PkgIndexError::CorruptIndex {
                    path,
                    detail: format!("offset {offset} is past the end of the manifest"),
                });
            }
            results.push(ActionResult {
                fmri: hit.fmri.clone(),
                action_type: hit.action_type.clone(),
                key: hit.key.clone(),
                full_value: hit.full_value.clone(),
                line: line.trim_end_matches('\n').to_string(),
            });
        }
    }
    Ok(results)
}
