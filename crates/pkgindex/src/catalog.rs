//! Server-side package catalog.
//!
//! A catalog directory holds two files. `catalog` lists every package
//! version the repository knows about, one record per line, and `attrs`
//! holds `S key: value` metadata such as the package count and the time of
//! the last change. Both files are only ever replaced by renaming a fully
//! written temporary file over them, so readers in other processes never
//! see a partial write.
//!
//! Mutations within one process are serialized by the catalog's mutex.
//! Writers in different processes are not coordinated here.

pub mod attrs;
pub mod cache;
pub mod matching;
pub mod record;

use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use parking_lot::Mutex;

use crate::error::{is_permission_error, PkgIndexError, Result};
use crate::fmri::version::Constraint;
use crate::fmri::{is_valid_pkg_name, FmriError, FmriErrorKind, NameMatcher, PkgFmri};
use crate::persist::{commit_temp_file, file_size_or_zero, remove_if_exists, temp_file_in, FILE_MODE};
use attrs::{CatalogAttrs, ATTRS_FILE, LAST_MODIFIED, ORIGIN, PREFIX};
use record::{CatalogLine, RecordKind};

pub use attrs::{timestamp, ts_to_datetime};
pub use cache::{read_catalog, FastLookupCache};
pub use matching::{extract_matching_fmris, extract_matching_versions, MatchResult};

pub const CATALOG_FILE: &str = "catalog";

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// A catalog file whose mode differs from [`FILE_MODE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadFileMode {
    pub path: PathBuf,
    pub expected: u32,
    pub found: u32,
}

impl fmt::Display for BadFileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "\t{}: expected mode: {:o}, found mode: {:o}",
            self.path.display(),
            self.expected,
            self.found
        )
    }
}

#[cfg(unix)]
fn file_mode(path: &Path) -> io::Result<u32> {
    use std::os::unix::fs::PermissionsExt;
    Ok(fs::metadata(path)?.permissions().mode() & 0o7777)
}

#[cfg(unix)]
fn chmod(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(FILE_MODE))
}

/// Returns the mismatch for `path`, if any. Missing files are fine.
#[cfg(unix)]
fn check_mode(path: &Path) -> Result<Option<BadFileMode>> {
    match file_mode(path) {
        Ok(found) if found != FILE_MODE => Ok(Some(BadFileMode {
            path: path.to_path_buf(),
            expected: FILE_MODE,
            found,
        })),
        Ok(_) => Ok(None),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(error.into()),
    }
}

// ---------------------------------------------------------------------------
// Prefix transforms
// ---------------------------------------------------------------------------

/// Hook run by [`Catalog::check_prefix`] for each record kind that the
/// on-disk catalog predates.
pub trait PrefixTransform: Send + Sync {
    fn transform(&self, catalog_root: &Path, kind: RecordKind) -> Result<()> {
        let _ = (catalog_root, kind);
        Ok(())
    }
}

/// Leaves the catalog untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransform;

impl PrefixTransform for NoopTransform {}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CatalogState {
    attrs: CatalogAttrs,
    /// Combined size of both files; recomputed after any write.
    size: Option<u64>,
}

pub struct Catalog {
    root: PathBuf,
    catalog_file: PathBuf,
    publisher: Option<String>,
    read_only: bool,
    state: Mutex<CatalogState>,
    transform: Box<dyn PrefixTransform>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog")
            .field("root", &self.root)
            .field("publisher", &self.publisher)
            .field("read_only", &self.read_only)
            .field("transform", &"<transform>")
            .finish()
    }
}

impl Catalog {
    /// Opens the catalog in `cat_root`, creating the directory for mutable
    /// catalogs. `publisher` is attached to every FMRI read back.
    pub fn open(cat_root: impl Into<PathBuf>, publisher: Option<&str>, read_only: bool) -> Result<Self> {
        Self::open_with_transform(cat_root, publisher, read_only, Box::new(NoopTransform))
    }

    pub fn open_with_transform(
        cat_root: impl Into<PathBuf>,
        publisher: Option<&str>,
        read_only: bool,
        transform: Box<dyn PrefixTransform>,
    ) -> Result<Self> {
        let root = cat_root.into();
        let catalog = Self {
            catalog_file: root.join(CATALOG_FILE),
            root,
            publisher: publisher.map(str::to_string),
            read_only,
            state: Mutex::new(CatalogState::default()),
            transform,
        };

        if !read_only && !catalog.root.exists() {
            if let Err(error) = fs::create_dir_all(&catalog.root) {
                if is_permission_error(&error) {
                    log::warn!(
                        "unable to create catalog directory {}: {error}",
                        catalog.root.display()
                    );
                    return Ok(catalog);
                }
                return Err(error.into());
            }
        }

        catalog.state.lock().attrs = CatalogAttrs::load(&catalog.root)?;
        catalog.check_prefix()?;
        catalog.set_perms()?;
        log::debug!(
            "opened catalog {} read_only={} npkgs={}",
            catalog.root.display(),
            read_only,
            catalog.npkgs()
        );
        Ok(catalog)
    }

    /// Removes the catalog and attribute files under `root`.
    pub fn destroy(root: &Path) -> Result<()> {
        remove_if_exists(&root.join(ATTRS_FILE))?;
        remove_if_exists(&root.join(CATALOG_FILE))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn publisher(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn exists(&self) -> bool {
        self.catalog_file.exists()
    }

    pub fn npkgs(&self) -> u64 {
        self.state.lock().attrs.npkgs()
    }

    pub fn last_modified(&self) -> Option<String> {
        self.state.lock().attrs.last_modified().map(str::to_string)
    }

    pub fn origin(&self) -> Option<String> {
        self.state.lock().attrs.origin().map(str::to_string)
    }

    /// Attribute lines as `send` would emit them.
    pub fn attrs_as_lines(&self) -> Vec<String> {
        self.state.lock().attrs.as_lines()
    }

    /// Size in bytes of the attribute and catalog files together.
    pub fn size(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if let Some(size) = state.size {
            return Ok(size);
        }
        let size = file_size_or_zero(&self.root.join(ATTRS_FILE))? + file_size_or_zero(&self.catalog_file)?;
        state.size = Some(size);
        Ok(size)
    }

    // -- mutation -----------------------------------------------------------

    /// Appends `fmri` to the catalog and returns the new modification time.
    ///
    /// The whole file is copied to a temporary file, checking each existing
    /// line for an identical record on the way, and the copy is renamed
    /// over the original.
    pub fn add_fmri(&self, fmri: &PkgFmri, critical: bool) -> Result<NaiveDateTime> {
        if !fmri.has_version() {
            return Err(PkgIndexError::UnversionedFmri(fmri.to_string()));
        }
        assert!(!self.read_only, "add_fmri called on a read-only catalog");
        if !is_valid_pkg_name(fmri.name()) {
            return Err(FmriError::Illegal {
                fmri: fmri.to_string(),
                kind: FmriErrorKind::BadPackageName(fmri.name().to_string()),
            }
            .into());
        }

        let mut state = self.state.lock();
        let line = record::package_line(fmri, critical);
        self.append_line(&line)?;

        state.size = None;
        let npkgs = state.attrs.npkgs() + 1;
        state.attrs.set_npkgs(npkgs);
        let now = Local::now().naive_local();
        self.set_time_locked(&mut state, Some(now))?;
        log::debug!("added {} to catalog {} (npkgs={npkgs})", line.trim_end(), self.root.display());
        Ok(now)
    }

    fn append_line(&self, line: &str) -> Result<()> {
        let mut temp = temp_file_in(&self.root)?;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            match File::open(&self.catalog_file) {
                Ok(file) => {
                    let mut reader = BufReader::new(file);
                    let mut entry = String::new();
                    while reader.read_line(&mut entry)? != 0 {
                        if entry == line {
                            return Err(PkgIndexError::DuplicatePackage(line.trim_end().to_string()));
                        }
                        out.write_all(entry.as_bytes())?;
                        entry.clear();
                    }
                }
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
            out.write_all(line.as_bytes())?;
            out.flush()?;
        }
        commit_temp_file(temp, &self.catalog_file)
    }

    /// Records `ts` (or now) as the modification time and saves the
    /// attributes.
    pub fn set_time(&self, ts: Option<NaiveDateTime>) -> Result<()> {
        assert!(!self.read_only, "set_time called on a read-only catalog");
        let mut state = self.state.lock();
        self.set_time_locked(&mut state, ts)
    }

    fn set_time_locked(&self, state: &mut CatalogState, ts: Option<NaiveDateTime>) -> Result<()> {
        let value = match ts {
            Some(ts) => attrs::format_timestamp(&ts),
            None => timestamp(),
        };
        state.attrs.set(LAST_MODIFIED, &value)?;
        self.save_attrs_locked(state)
    }

    pub fn save_attrs(&self) -> Result<()> {
        assert!(!self.read_only, "save_attrs called on a read-only catalog");
        let mut state = self.state.lock();
        self.save_attrs_locked(&mut state)
    }

    fn save_attrs_locked(&self, state: &mut CatalogState) -> Result<()> {
        state.attrs.save(&self.root)?;
        state.size = None;
        Ok(())
    }

    /// Brings the recorded `prefix` attribute up to the record kinds this
    /// code understands, running the transform hook for each new one.
    pub fn check_prefix(&self) -> Result<()> {
        let mut state = self.state.lock();
        let known = RecordKind::known_tags();

        let Some(recorded) = state.attrs.get(PREFIX).map(str::to_string) else {
            state.attrs.set(PREFIX, &known)?;
            if !self.read_only {
                self.save_attrs_locked(&mut state)?;
            }
            return Ok(());
        };

        let mut tags: BTreeSet<char> = recorded.chars().collect();
        let new_kinds: Vec<RecordKind> = RecordKind::KNOWN
            .into_iter()
            .filter(|kind| !tags.contains(&kind.tag()))
            .collect();
        if new_kinds.is_empty() {
            return Ok(());
        }

        for kind in new_kinds {
            log::info!("catalog {} learned record kind '{}'", self.root.display(), kind.tag());
            self.transform.transform(&self.root, kind)?;
            tags.insert(kind.tag());
        }
        let updated: String = tags.into_iter().collect();
        state.attrs.set(PREFIX, &updated)?;
        if !self.read_only {
            self.save_attrs_locked(&mut state)?;
        }
        Ok(())
    }

    /// Forces [`FILE_MODE`] on the catalog files. Read-only catalogs only
    /// check the modes and fail listing every mismatch.
    #[cfg(unix)]
    fn set_perms(&self) -> Result<()> {
        let mut bad = Vec::new();
        for path in [self.root.join(ATTRS_FILE), self.catalog_file.clone()] {
            if self.read_only {
                bad.extend(check_mode(&path)?);
                continue;
            }
            match chmod(&path) {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => {
                    log::debug!("unable to chmod {}: {error}", path.display());
                    bad.extend(check_mode(&path)?);
                }
            }
        }
        if bad.is_empty() {
            Ok(())
        } else {
            Err(PkgIndexError::CatalogPermissions(bad))
        }
    }

    #[cfg(not(unix))]
    fn set_perms(&self) -> Result<()> {
        Ok(())
    }

    // -- reading ------------------------------------------------------------

    /// Iterates over the package records in file order. Call again to
    /// restart.
    pub fn fmris(&self) -> Result<CatalogFmris> {
        let reader = match File::open(&self.catalog_file) {
            Ok(file) => Some(BufReader::new(file)),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        Ok(CatalogFmris {
            reader,
            publisher: self.publisher.clone(),
            line: String::new(),
        })
    }

    /// Matches `patterns` against every FMRI in the catalog. Results are
    /// sorted newest first.
    pub fn get_matching_fmris(
        &self,
        patterns: &[&str],
        matcher: Option<NameMatcher>,
        constraint: Constraint,
    ) -> Result<MatchResult<PkgFmri>> {
        let fmris = self.fmris()?.collect::<Result<Vec<_>>>()?;
        extract_matching_fmris(fmris, patterns, matcher, constraint)
    }

    // -- transfer -----------------------------------------------------------

    /// Attribute lines followed by the raw catalog contents.
    pub fn send_lines(&self) -> Result<CatalogLines> {
        let attrs = self.attrs_as_lines();
        let reader = match File::open(&self.catalog_file) {
            Ok(file) => Some(BufReader::new(file)),
            Err(error) if error.kind() == ErrorKind::NotFound => None,
            Err(error) => return Err(error.into()),
        };
        Ok(CatalogLines {
            attrs: attrs.into_iter(),
            reader,
        })
    }

    /// Writes the catalog to `out` and returns the number of bytes written.
    pub fn send<W: Write + ?Sized>(&self, out: &mut W) -> Result<u64> {
        let mut written = 0u64;
        for line in self.send_lines()? {
            let line = line?;
            out.write_all(line.as_bytes())?;
            written += line.len() as u64;
        }
        Ok(written)
    }

    /// Lays down a catalog received from `reader` in `path`.
    ///
    /// Package records are renormalized to the `V pkg name version` layout.
    /// If any record holds an illegal FMRI the rest of the stream is still
    /// read, then both files are discarded and the first error returned.
    /// `origin`, when given, is recorded as the `origin` attribute.
    pub fn recv<R: BufRead>(mut reader: R, path: &Path, origin: Option<&str>) -> Result<()> {
        fs::create_dir_all(path)?;
        let mut attrs_temp = temp_file_in(path)?;
        let mut catalog_temp = temp_file_in(path)?;
        let mut bad_fmri: Option<FmriError> = None;
        let mut records = 0usize;

        {
            let mut attrs_out = BufWriter::new(attrs_temp.as_file_mut());
            let mut catalog_out = BufWriter::new(catalog_temp.as_file_mut());
            let mut line = String::new();
            while reader.read_line(&mut line)? != 0 {
                match record::classify_line(&line) {
                    None => {}
                    Some(CatalogLine::Foreign(raw)) => catalog_out.write_all(raw.as_bytes())?,
                    Some(CatalogLine::Record {
                        kind: RecordKind::Attribute,
                        ..
                    }) => attrs_out.write_all(line.as_bytes())?,
                    Some(CatalogLine::Record {
                        kind: RecordKind::Reserved,
                        ..
                    }) => catalog_out.write_all(line.as_bytes())?,
                    Some(CatalogLine::Record { kind, body }) => match record::parse_package_body(body, None) {
                        Ok(fmri) if fmri.has_version() => {
                            catalog_out.write_all(record::fielded_package_line(kind, &fmri).as_bytes())?;
                            records += 1;
                        }
                        Ok(fmri) => {
                            bad_fmri.get_or_insert(FmriError::MissingVersion(fmri.to_string()));
                        }
                        Err(error) => {
                            bad_fmri.get_or_insert(error);
                        }
                    },
                }
                line.clear();
            }

            if bad_fmri.is_none() {
                if let Some(origin) = origin {
                    writeln!(attrs_out, "S {ORIGIN}: {origin}")?;
                }
            }
            attrs_out.flush()?;
            catalog_out.flush()?;
        }

        if let Some(error) = bad_fmri {
            log::warn!("discarding catalog received into {}: {error}", path.display());
            return Err(error.into());
        }

        commit_temp_file(attrs_temp, &path.join(ATTRS_FILE))?;
        commit_temp_file(catalog_temp, &path.join(CATALOG_FILE))?;
        log::info!("received catalog into {} ({records} package records)", path.display());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// Lazily parsed package records. See [`Catalog::fmris`].
pub struct CatalogFmris {
    reader: Option<BufReader<File>>,
    publisher: Option<String>,
    line: String,
}

impl Iterator for CatalogFmris {
    type Item = Result<PkgFmri>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        loop {
            self.line.clear();
            match reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) if !record::is_package_line(&self.line) => continue,
                Ok(_) => return Some(record::parse_package_line(&self.line, self.publisher.as_deref())),
                Err(error) => {
                    self.reader = None;
                    return Some(Err(error.into()));
                }
            }
        }
    }
}

/// Lines produced by [`Catalog::send_lines`], newlines included.
pub struct CatalogLines {
    attrs: std::vec::IntoIter<String>,
    reader: Option<BufReader<File>>,
}

impl Iterator for CatalogLines {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.attrs.next() {
            return Some(Ok(line));
        }
        let reader = self.reader.as_mut()?;
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => {
                self.reader = None;
                None
            }
            Ok(_) => Some(Ok(line)),
            Err(error) => {
                self.reader = None;
                Some(Err(error.into()))
            }
        }
    }
}
