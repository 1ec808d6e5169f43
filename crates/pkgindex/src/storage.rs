//! The files making up a search index directory.
//!
//! Every store is a text file whose first line is `VERSION: N`. The files of
//! one index generation share `N`; readers use [`consistent_open`] so they
//! never mix files from two generations while an indexer is replacing them.

mod consistent;
mod dict;
mod inverted;
mod list_dict;
mod main_dict;
mod set;

use std::fs::{self, File};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::IndexConfig;
use crate::error::{PkgIndexError, Result};
use crate::persist::write_atomic;

pub use consistent::consistent_open;
pub use dict::{Dict, DictMutable};
pub use inverted::{de_delta, InvertedDict};
pub use list_dict::ListDict;
pub use main_dict::{
    parse_line, parse_line_for_token, transform_line, ActionTypeEntries, KeyEntries, MainDict,
    MainDictEntry, PackageOffsets, ValueEntries, SEPARATORS,
};
pub use set::{Set, SetHash};

pub const MAIN_DICT_FILE: &str = "main_dict.ascii.v2";
pub const BYTE_OFFSET_FILE: &str = "token_byte_offset.v1";
pub const MANIFEST_LIST_FILE: &str = "manf_list.v1";
pub const FULL_FMRI_FILE: &str = "full_fmri_list";
pub const FULL_FMRI_HASH_FILE: &str = "full_fmri_list.hash";
pub const FMRI_OFFSETS_FILE: &str = "fmri_offsets.v1";
pub const FAST_ADD_FILE: &str = "fast_add.v1";
pub const FAST_REMOVE_FILE: &str = "fast_remove.v1";

/// Prefix of the per-action-type offset files, e.g. `__at_file`.
pub const ACTION_TYPE_PREFIX: &str = "__at_";
/// Prefix of the per-key offset files, e.g. `__st_path`.
pub const KEY_PREFIX: &str = "__st_";
/// Directory of `<name>/<version>` offset files kept by indexes written
/// before `fmri_offsets.v1` existed.
pub const LEGACY_PKG_DIR: &str = "pkg";

const VERSION_PREFIX: &str = "VERSION: ";

/// Extracts `N` from a `VERSION: N` header line.
pub fn parse_version_line(line: &str) -> Option<u64> {
    line.split(' ').nth(1)?.trim_end_matches(['\n', '\r']).parse().ok()
}

// ---------------------------------------------------------------------------
// Shared per-file state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    inode: u64,
    mtime: Option<SystemTime>,
    size: u64,
}

impl FileStamp {
    fn of(metadata: &fs::Metadata) -> Self {
        #[cfg(unix)]
        let inode = {
            use std::os::unix::fs::MetadataExt;
            metadata.ino()
        };
        #[cfg(not(unix))]
        let inode = 0;
        Self {
            inode,
            mtime: metadata.modified().ok(),
            size: metadata.len(),
        }
    }
}

/// Name, open handle and change-detection stamp of one store's file.
///
/// The stamp is retaken whenever a handle is set. Handing the store a file
/// that differs from the one it last read clears `have_read`.
#[derive(Debug)]
pub struct StoreFile {
    name: String,
    path: Option<PathBuf>,
    reader: Option<BufReader<File>>,
    stamp: Option<FileStamp>,
    have_read: bool,
}

impl StoreFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            reader: None,
            stamp: None,
            have_read: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn have_read(&self) -> bool {
        self.have_read
    }

    fn set_handle(&mut self, reader: BufReader<File>, path: PathBuf) -> Result<()> {
        if self.reader.is_some() {
            log::debug!("replacing open handle for {}", path.display());
        }
        let stamp = FileStamp::of(&reader.get_ref().metadata()?);
        if self.stamp.as_ref() != Some(&stamp) {
            self.have_read = false;
        }
        self.stamp = Some(stamp);
        self.reader = Some(reader);
        self.path = Some(path);
        Ok(())
    }

    fn close(&mut self) {
        self.reader = None;
    }

    fn should_reread(&self) -> Result<bool> {
        let (Some(path), Some(stamp)) = (&self.path, &self.stamp) else {
            return Ok(true);
        };
        let current = match fs::metadata(path) {
            Ok(metadata) => FileStamp::of(&metadata),
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(true),
            Err(error) => return Err(error.into()),
        };
        Ok(current != *stamp || !self.have_read)
    }

    pub(crate) fn mark_read(&mut self) {
        self.have_read = true;
    }

    pub(crate) fn reader_mut(&mut self) -> Result<&mut BufReader<File>> {
        match self.reader.as_mut() {
            Some(reader) => Ok(reader),
            None => Err(PkgIndexError::CorruptIndex {
                path: self.path.clone().unwrap_or_else(|| PathBuf::from(&self.name)),
                detail: "store is not open".to_string(),
            }),
        }
    }

    pub(crate) fn corrupt(&self, detail: impl Into<String>) -> PkgIndexError {
        PkgIndexError::CorruptIndex {
            path: self.path.clone().unwrap_or_else(|| PathBuf::from(&self.name)),
            detail: detail.into(),
        }
    }

    /// Calls `visit` with each remaining line, newline stripped, and its
    /// zero-based position after the version header.
    pub(crate) fn for_each_line<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(usize, &str) -> Result<()>,
    {
        let reader = self.reader_mut()?;
        let mut line = String::new();
        let mut index = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(());
            }
            visit(index, line.strip_suffix('\n').unwrap_or(&line))?;
            index += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Behavior shared by every index file store.
pub trait IndexStore {
    fn store_file(&self) -> &StoreFile;

    fn store_file_mut(&mut self) -> &mut StoreFile;

    /// Loads the rest of the open file into memory.
    fn read_dict_file(&mut self) -> Result<()>;

    fn file_name(&self) -> &str {
        self.store_file().name()
    }

    /// Hands the store an open handle positioned after the version line.
    fn set_file_handle(&mut self, reader: BufReader<File>, path: PathBuf) -> Result<()> {
        self.store_file_mut().set_handle(reader, path)
    }

    fn close_file_handle(&mut self) {
        self.store_file_mut().close();
    }

    /// True when the file on disk differs in inode, mtime or size from the
    /// one first opened, or when it has not been read yet.
    fn should_reread(&self) -> Result<bool> {
        self.store_file().should_reread()
    }

    /// Entries held in memory that a partial reindex would have to drop.
    fn count_entries_removed_during_partial_indexing(&self) -> usize {
        0
    }

    /// Opens just this store.
    fn open(&mut self, dir: &Path) -> Result<Option<u64>>
    where
        Self: Sized,
    {
        let config = IndexConfig::default();
        consistent_open(
            &mut [self as &mut dyn IndexStore],
            dir,
            config.open_timeout(),
            config.open_retry_backoff(),
        )
    }
}

/// Writes `dir/name` atomically: the version header, then one line per
/// item.
pub fn write_dict_file<I, S>(dir: &Path, name: &str, version: u64, lines: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    write_atomic(&dir.join(name), |out: &mut dyn Write| {
        writeln!(out, "{VERSION_PREFIX}{version}")?;
        for line in lines {
            out.write_all(line.as_ref().as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Reads an `__at_`/`__st_` restriction file: one main-dictionary offset per
/// line. A missing file means nothing was indexed under that name.
pub fn read_offset_file(path: &Path) -> Result<std::collections::HashSet<u64>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Default::default()),
        Err(error) => return Err(error.into()),
    };
    let mut offsets = std::collections::HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let offset = line.parse().map_err(|_| PkgIndexError::CorruptIndex {
            path: path.to_path_buf(),
            detail: format!("bad offset '{line}'"),
        })?;
        offsets.insert(offset);
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_version_line() {
        assert_eq!(parse_version_line("VERSION: 12\n"), Some(12));
        assert_eq!(parse_version_line("VERSION: 0"), Some(0));
        assert_eq!(parse_version_line("VERSION:12"), None);
        assert_eq!(parse_version_line(""), None);
    }

    #[test]
    fn test_write_dict_file_header() {
        let temp = TempDir::new().expect("tempdir");
        write_dict_file(temp.path(), FULL_FMRI_FILE, 4, ["a", "b"]).unwrap();
        let contents = fs::read_to_string(temp.path().join(FULL_FMRI_FILE)).unwrap();
        assert_eq!(contents, "VERSION: 4\na\nb\n");
    }

    #[test]
    fn test_read_offset_file() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("__at_file");
        assert!(read_offset_file(&path).unwrap().is_empty());

        fs::write(&path, "0\n57\n\n120\n").unwrap();
        let offsets = read_offset_file(&path).unwrap();
        assert_eq!(offsets.len(), 3);
        assert!(offsets.contains(&57));

        fs::write(&path, "abc\n").unwrap();
        assert!(matches!(read_offset_file(&path), Err(PkgIndexError::CorruptIndex { .. })));
    }

    #[test]
    fn test_should_reread_tracks_replacement() {
        let temp = TempDir::new().expect("tempdir");
        write_dict_file(temp.path(), FULL_FMRI_FILE, 1, ["pkg:/a@1.0"]).unwrap();

        let mut set = Set::new(FULL_FMRI_FILE);
        assert_eq!(set.open(temp.path()).unwrap(), Some(1));
        assert!(set.should_reread().unwrap());
        set.read_dict_file().unwrap();
        set.close_file_handle();
        assert!(!set.should_reread().unwrap());

        write_dict_file(temp.path(), FULL_FMRI_FILE, 2, ["pkg:/a@1.0", "pkg:/b@1.0"]).unwrap();
        assert!(set.should_reread().unwrap());
    }

    #[test]
    fn test_reopen_takes_new_stamp() {
        let temp = TempDir::new().expect("tempdir");
        write_dict_file(temp.path(), FULL_FMRI_FILE, 1, ["pkg:/a@1.0"]).unwrap();
        let mut set = Set::new(FULL_FMRI_FILE);
        set.open(temp.path()).unwrap();
        set.read_dict_file().unwrap();
        set.close_file_handle();

        write_dict_file(temp.path(), FULL_FMRI_FILE, 2, ["pkg:/a@1.0", "pkg:/b@1.0"]).unwrap();
        assert_eq!(set.open(temp.path()).unwrap(), Some(2));
        assert!(set.should_reread().unwrap());
        set.read_dict_file().unwrap();
        set.close_file_handle();
        assert!(set.contains("pkg:/b@1.0"));
        assert!(!set.should_reread().unwrap());

        // Reopening the same file keeps what was read.
        set.open(temp.path()).unwrap();
        assert!(!set.should_reread().unwrap());
    }
}
