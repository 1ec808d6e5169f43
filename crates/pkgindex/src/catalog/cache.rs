//! In-memory lookup built while merging catalogs.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::record::{is_package_line, parse_package_line};
use super::CATALOG_FILE;
use crate::error::Result;
use crate::fmri::version::Version;
use crate::fmri::PkgFmri;

/// One version of a package and the publishers that carry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedVersion {
    pub fmri: PkgFmri,
    /// Publisher to "known" flag. `None` is the anonymous publisher.
    pub publishers: HashMap<Option<String>, bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedPackage {
    /// Ascending.
    versions: Vec<Version>,
    entries: HashMap<String, CachedVersion>,
}

impl CachedPackage {
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn get(&self, version: &str) -> Option<&CachedVersion> {
        self.entries.get(version)
    }

    /// The newest cached version.
    pub fn latest(&self) -> Option<&CachedVersion> {
        let version = self.versions.last()?;
        self.entries.get(&version.to_string())
    }
}

/// Package name to its cached versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastLookupCache {
    packages: HashMap<String, CachedPackage>,
}

impl FastLookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&CachedPackage> {
        self.packages.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    /// Records `fmri` under `publisher`. Any publisher embedded in the FMRI
    /// is dropped. The first `known` flag recorded for a publisher wins.
    /// Unversioned FMRIs are ignored.
    pub fn cache_fmri(&mut self, fmri: &PkgFmri, publisher: Option<&str>, known: bool) {
        let Some(version) = fmri.version() else {
            return;
        };
        let mut stripped = fmri.clone();
        stripped.remove_publisher();

        let key = version.to_string();
        let package = self.packages.entry(stripped.name().to_string()).or_default();
        let publisher = publisher.map(str::to_string);
        match package.entries.get_mut(&key) {
            Some(entry) => {
                entry.publishers.entry(publisher).or_insert(known);
            }
            None => {
                let at = package.versions.partition_point(|existing| existing <= version);
                package.versions.insert(at, version.clone());
                package.entries.insert(
                    key,
                    CachedVersion {
                        fmri: stripped,
                        publishers: HashMap::from([(publisher, known)]),
                    },
                );
            }
        }
    }
}

/// Reads `path/catalog` into `cache`, skipping everything but package
/// records.
pub fn read_catalog(cache: &mut FastLookupCache, path: &Path, publisher: Option<&str>) -> Result<()> {
    let reader = BufReader::new(File::open(path.join(CATALOG_FILE))?);
    let mut count = 0usize;
    for line in reader.lines() {
        let line = line?;
        if !is_package_line(&line) {
            continue;
        }
        let fmri = parse_package_line(&line, publisher)?;
        cache.cache_fmri(&fmri, publisher, true);
        count += 1;
    }
    log::debug!("cached {count} records from {}", path.display());
    Ok(())
}
