//! IndexManager - opens an index directory and answers queries against it.
//!
//! The in-memory stores are read once per index generation and shared as an
//! immutable [`IndexSnapshot`]. Every query re-opens the files to check the
//! generation without holding any lock. Only when something changed is a new
//! snapshot read, one reader at a time, and swapped in.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::engine::{finalize, SearchContext, SearchHit};
use super::tokenize::ManifestSource;
use crate::config::IndexConfig;
use crate::error::{PkgIndexError, Result};
use crate::query::{FieldRestrictions, Query, QueryNode, TopQuery};
use crate::storage::{
    consistent_open, Dict, DictMutable, IndexStore, InvertedDict, MainDict, BYTE_OFFSET_FILE,
    FMRI_OFFSETS_FILE, MANIFEST_LIST_FILE,
};

/// The fully read stores of one index generation.
#[derive(Debug)]
pub struct IndexSnapshot {
    version: u64,
    manifest_list: Dict,
    token_offsets: DictMutable,
    /// Absent for indexes written before the file existed.
    fmri_offsets: Option<InvertedDict>,
}

impl IndexSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn manifest_list(&self) -> &Dict {
        &self.manifest_list
    }

    pub fn token_offsets(&self) -> &DictMutable {
        &self.token_offsets
    }

    pub fn fmri_offsets(&self) -> Option<&InvertedDict> {
        self.fmri_offsets.as_ref()
    }

    fn is_stale(&self) -> Result<bool> {
        if self.manifest_list.should_reread()? || self.token_offsets.should_reread()? {
            return Ok(true);
        }
        match &self.fmri_offsets {
            Some(store) => store.should_reread(),
            None => Ok(false),
        }
    }

    fn read_all(&mut self) -> Result<()> {
        let result = self.read_stores();
        self.close_all();
        result
    }

    fn read_stores(&mut self) -> Result<()> {
        self.manifest_list.read_dict_file()?;
        self.token_offsets.read_dict_file()?;
        if let Some(store) = self.fmri_offsets.as_mut() {
            store.read_dict_file()?;
        }
        Ok(())
    }

    fn close_all(&mut self) {
        self.manifest_list.close_file_handle();
        self.token_offsets.close_file_handle();
        if let Some(store) = self.fmri_offsets.as_mut() {
            store.close_file_handle();
        }
    }
}

/// Counters for the expensive paths.
#[derive(Debug, Default)]
pub struct SearchStats {
    queries: AtomicU64,
    full_scans: AtomicU64,
    refreshes: AtomicU64,
}

impl SearchStats {
    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Searches that had to read every line of the main dictionary.
    pub fn full_scans(&self) -> u64 {
        self.full_scans.load(Ordering::Relaxed)
    }

    /// Snapshots read from disk.
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    pub(crate) fn record_full_scan(&self) {
        self.full_scans.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct IndexManager {
    dir: PathBuf,
    config: IndexConfig,
    manifests: Arc<dyn ManifestSource>,
    current: Mutex<Option<Arc<IndexSnapshot>>>,
    /// Held while a new snapshot is read from disk.
    refresh_lane: Mutex<()>,
    stats: SearchStats,
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}

impl IndexManager {
    pub fn new(dir: impl Into<PathBuf>, manifests: Arc<dyn ManifestSource>) -> Self {
        Self::with_config(dir, manifests, IndexConfig::default())
    }

    pub fn with_config(dir: impl Into<PathBuf>, manifests: Arc<dyn ManifestSource>, config: IndexConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
            manifests,
            current: Mutex::new(None),
            refresh_lane: Mutex::new(()),
            stats: SearchStats::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    /// Parses and runs a query.
    pub fn search(&self, query: &Query) -> Result<Vec<SearchHit>> {
        query.check_length(self.config.max_query_tokens)?;
        let top = query.parse()?;
        self.search_top(&top, query.case_sensitive())
    }

    /// Runs one term restricted by fields given by name (`pkg_name`,
    /// `action_type` or `key`). An empty term matches every token.
    pub fn search_fields(
        &self,
        restrictions: &[(&str, &str)],
        term: &str,
        case_sensitive: bool,
    ) -> Result<Vec<SearchHit>> {
        let mut fields = FieldRestrictions::default();
        for (name, value) in restrictions {
            fields.set_named(name, value)?;
        }
        let term = if term.is_empty() { "*" } else { term };
        let top = TopQuery::new(QueryNode::field(&fields, QueryNode::term(term)));
        self.search_top(&top, case_sensitive)
    }

    pub fn search_top(&self, top: &TopQuery, case_sensitive: bool) -> Result<Vec<SearchHit>> {
        self.stats.queries.fetch_add(1, Ordering::Relaxed);
        let (snapshot, main) = self.checkout()?;
        let mut context = SearchContext {
            dir: &self.dir,
            snapshot: &snapshot,
            main,
            manifests: self.manifests.as_ref(),
            case_sensitive,
            build_release: &self.config.default_build_release,
            stats: &self.stats,
        };
        let hits = finalize(top, &mut context)?;
        log::debug!("query {top} returned {} results from {}", hits.len(), self.dir.display());
        Ok(hits)
    }

    /// The current snapshot, refreshed first if the files changed.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        self.checkout().map(|(snapshot, _)| snapshot)
    }

    /// Forgets the shared snapshot so the next query reads the files again.
    pub fn clear_cache(&self) {
        *self.current.lock() = None;
    }

    /// Returns the snapshot to search plus a main dictionary handle opened
    /// in the same generation.
    fn checkout(&self) -> Result<(Arc<IndexSnapshot>, MainDict)> {
        let (mut probe, main) = self.open_generation()?;
        if let Some(snapshot) = self.reusable(probe.version)? {
            probe.close_all();
            return Ok((snapshot, main));
        }

        let _refresh = self.refresh_lane.lock();
        // Another query may have read this generation while we waited.
        if let Some(snapshot) = self.reusable(probe.version)? {
            probe.close_all();
            return Ok((snapshot, main));
        }

        probe.read_all()?;
        log::info!(
            "read index snapshot version={} manifests={} tokens={} fmri_offsets={} dir={}",
            probe.version,
            probe.manifest_list.len(),
            probe.token_offsets.len(),
            probe.fmri_offsets.is_some(),
            self.dir.display()
        );
        self.stats.refreshes.fetch_add(1, Ordering::Relaxed);
        let snapshot = Arc::new(probe);
        *self.current.lock() = Some(Arc::clone(&snapshot));
        Ok((snapshot, main))
    }

    /// The shared snapshot if it still matches `version` and its files.
    fn reusable(&self, version: u64) -> Result<Option<Arc<IndexSnapshot>>> {
        let current = self.current.lock().clone();
        match current {
            Some(snapshot) if snapshot.version == version && !snapshot.is_stale()? => Ok(Some(snapshot)),
            _ => Ok(None),
        }
    }

    fn open_generation(&self) -> Result<(IndexSnapshot, MainDict)> {
        match self.open_stores(true) {
            Err(PkgIndexError::InconsistentIndex { .. }) => {
                log::info!(
                    "index in {} is inconsistent with {FMRI_OFFSETS_FILE}, retrying without it",
                    self.dir.display()
                );
                self.open_stores(false)
            }
            other => other,
        }
    }

    fn open_stores(&self, with_fmri_offsets: bool) -> Result<(IndexSnapshot, MainDict)> {
        let mut manifest_list = Dict::new(MANIFEST_LIST_FILE);
        let mut token_offsets = DictMutable::new(BYTE_OFFSET_FILE);
        let mut fmri_offsets = with_fmri_offsets.then(|| InvertedDict::new(FMRI_OFFSETS_FILE));
        let mut main = MainDict::default();

        let version = {
            let mut stores: Vec<&mut dyn IndexStore> =
                vec![&mut manifest_list as &mut dyn IndexStore, &mut token_offsets];
            if let Some(store) = fmri_offsets.as_mut() {
                stores.push(store);
            }
            stores.push(&mut main);
            consistent_open(
                &mut stores,
                &self.dir,
                self.config.open_timeout(),
                self.config.open_retry_backoff(),
            )?
        };
        let Some(version) = version else {
            return Err(PkgIndexError::NoIndex { dir: self.dir.clone() });
        };

        let snapshot = IndexSnapshot {
            version,
            manifest_list,
            token_offsets,
            fmri_offsets,
        };
        Ok((snapshot, main))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ReturnType;
    use crate::search::fixture::IndexFixture;
    use crate::search::{QueryResult, SearchHit};
    use tempfile::TempDir;

    const SAMPLE: &[&str] = &["dir path=usr/bin", "file path=usr/bin/sample mode=0555"];

    fn lines(hits: &[SearchHit]) -> Vec<String> {
        hits.iter()
            .filter_map(|hit| match &hit.result {
                QueryResult::Actions(action) => Some(action.line.clone()),
                QueryResult::Packages(_) => None,
            })
            .collect()
    }

    fn query(text: &str) -> Query {
        Query::new(text, true, ReturnType::Actions, None, None).unwrap()
    }

    #[test]
    fn test_missing_index() {
        let temp = TempDir::new().expect("tempdir");
        let manager = IndexManager::new(temp.path(), Arc::new(crate::search::ManifestDir::new(temp.path())));
        assert!(matches!(
            manager.search(&query("sample")),
            Err(PkgIndexError::NoIndex { .. })
        ));
    }

    #[test]
    fn test_reads_line_at_recorded_offset() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let manager = fixture.manager();
        let hits = manager.search(&query("sample")).unwrap();
        assert_eq!(lines(&hits), vec![SAMPLE[1].to_string()]);
        let QueryResult::Actions(action) = &hits[0].result else {
            panic!("expected an action");
        };
        assert_eq!(action.full_value, "usr/bin/sample");
        assert_eq!(manager.stats().queries(), 1);
        assert_eq!(manager.stats().full_scans(), 0);
    }

    #[test]
    fn test_truncated_manifest_is_corrupt() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let fmri = crate::fmri::PkgFmri::parse("pkg0@1.0,5.11", None, None).unwrap();
        let path = fixture.manifests.manifest_path(&fmri).unwrap();
        std::fs::write(&path, "dir path=usr/bin\n").unwrap();
        assert!(matches!(
            fixture.manager().search(&query("sample")),
            Err(PkgIndexError::CorruptIndex { .. })
        ));
    }

    #[test]
    fn test_snapshot_reused_until_files_change() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let manager = fixture.manager();

        let first = manager.snapshot().unwrap();
        assert_eq!(first.version(), 1);
        manager.search(&query("sample")).unwrap();
        let again = manager.snapshot().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(manager.stats().refreshes(), 1);

        fixture.write(
            &[
                ("pkg0@1.0,5.11", SAMPLE),
                ("pkg1@1.0,5.11", &["file path=opt/sample mode=0444"] as &[&str]),
            ],
            2,
        );
        let hits = manager.search(&query("sample")).unwrap();
        assert_eq!(hits.len(), 2);
        let refreshed = manager.snapshot().unwrap();
        assert_eq!(refreshed.version(), 2);
        assert_eq!(refreshed.manifest_list().len(), 2);
        assert!(!Arc::ptr_eq(&first, &refreshed));
        assert_eq!(manager.stats().refreshes(), 2);

        manager.clear_cache();
        manager.snapshot().unwrap();
        assert_eq!(manager.stats().refreshes(), 3);
    }

    #[test]
    fn test_index_without_fmri_offsets() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        std::fs::remove_file(fixture.index_dir.join(FMRI_OFFSETS_FILE)).unwrap();
        let manager = fixture.manager();

        assert_eq!(lines(&manager.search(&query("sample")).unwrap()), vec![SAMPLE[1].to_string()]);
        assert!(manager.snapshot().unwrap().fmri_offsets().is_none());
        assert!(matches!(
            manager.search(&query("pkg0:::sample")),
            Err(PkgIndexError::InconsistentIndex { .. })
        ));
    }

    #[test]
    fn test_package_offsets_from_legacy_pkg_dirs() {
        let other: &[&str] = &["file path=opt/sample mode=0444"];
        let fixture = IndexFixture::build_legacy(&[("pkg0@1.0,5.11", SAMPLE), ("pkg1@2.0,5.11", other)]);
        assert!(!fixture.index_dir.join(FMRI_OFFSETS_FILE).exists());
        let manager = fixture.manager();

        assert_eq!(lines(&manager.search(&query("pkg0:::sample")).unwrap()), vec![SAMPLE[1].to_string()]);
        assert_eq!(lines(&manager.search(&query("pkg1:::sample")).unwrap()), vec![other[0].to_string()]);
        assert_eq!(manager.search(&query("pkg?:::sample")).unwrap().len(), 2);
        assert!(manager.search(&query("pkg0:::opt")).unwrap().is_empty());
        assert_eq!(lines(&manager.search(&query("pkg?:::opt")).unwrap()), vec![other[0].to_string()]);

        std::fs::remove_dir_all(fixture.index_dir.join("pkg").join("pkg1")).unwrap();
        assert!(manager.search(&query("pkg?:::opt")).unwrap().is_empty());
        assert_eq!(lines(&manager.search(&query("pkg0:::sample")).unwrap()), vec![SAMPLE[1].to_string()]);
        assert_eq!(manager.stats().full_scans(), 0);
    }

    #[test]
    fn test_search_by_named_fields() {
        let other: &[&str] = &["file path=opt/sample mode=0444"];
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE), ("pkg1@2.0,5.11", other)]);
        let manager = fixture.manager();

        let hits = manager
            .search_fields(&[("pkg_name", "pkg1"), ("action_type", "file")], "sample", true)
            .unwrap();
        assert_eq!(lines(&hits), vec![other[0].to_string()]);
        let hits = manager.search_fields(&[("key", "path")], "bin", true).unwrap();
        assert_eq!(lines(&hits).len(), 2);
        let dirs = lines(&manager.search_fields(&[("action_type", "dir")], "", true).unwrap());
        assert!(!dirs.is_empty());
        assert!(dirs.iter().all(|line| line == SAMPLE[0]));

        assert!(matches!(
            manager.search_fields(&[("mode", "0555")], "sample", true),
            Err(PkgIndexError::UnknownFieldType(ref name)) if name == "mode"
        ));
        assert_eq!(manager.stats().queries(), 3);
    }

    #[test]
    fn test_configured_query_length() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let config = IndexConfig {
            max_query_tokens: 2,
            ..IndexConfig::default()
        };
        let manager = IndexManager::with_config(&fixture.index_dir, fixture.manifests.clone(), config);
        assert_eq!(manager.search(&query("usr bin")).unwrap().len(), 2);
        assert!(matches!(
            manager.search(&query("usr AND bin")),
            Err(PkgIndexError::QueryLengthExceeded { count: 3, max: 2 })
        ));
    }

    #[test]
    fn test_shared_across_threads() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let manager = fixture.manager();
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..5 {
                        assert_eq!(manager.search(&query("bin")).unwrap().len(), 2);
                    }
                });
            }
        });
        assert_eq!(manager.stats().queries(), 20);
        assert_eq!(manager.stats().refreshes(), 1);
    }

    #[test]
    fn test_unchanged_index_served_while_refresh_in_progress() {
        let fixture = IndexFixture::build(&[("pkg0@1.0,5.11", SAMPLE)]);
        let manager = fixture.manager();
        manager.snapshot().unwrap();

        let _refresh = manager.refresh_lane.lock();
        std::thread::scope(|scope| {
            let worker = scope.spawn(|| manager.search(&query("sample")).map(|hits| lines(&hits)));
            assert_eq!(worker.join().unwrap().unwrap(), vec![SAMPLE[1].to_string()]);
        });
        assert_eq!(manager.stats().refreshes(), 1);
    }
}
