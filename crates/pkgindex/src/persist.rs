//! Crash-safe file replacement.
//!
//! Content is written to a temporary file in the destination directory and
//! renamed over the final path, so readers only ever see a complete file.
//! If writing fails the temporary file is removed when it is dropped.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{PkgIndexError, Result};

/// Mode given to every catalog and index file so unprivileged users can read
/// them.
pub const FILE_MODE: u32 = 0o644;

/// Creates a temporary file next to `dir`'s eventual contents.
pub(crate) fn temp_file_in(dir: &Path) -> Result<NamedTempFile> {
    NamedTempFile::new_in(dir).map_err(PkgIndexError::from)
}

/// Sets [`FILE_MODE`] on `file`.
pub(crate) fn set_file_mode(file: &File) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(FILE_MODE))?;
    }
    #[cfg(not(unix))]
    let _ = file;
    Ok(())
}

/// Flushes `temp`, applies [`FILE_MODE`] and renames it to `path`.
pub(crate) fn commit_temp_file(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.as_file().sync_all()?;
    set_file_mode(temp.as_file())?;
    temp.persist(path).map_err(|error| PkgIndexError::Io(error.error))?;
    Ok(())
}

/// Writes a whole file atomically. `write` receives a buffered writer over
/// the temporary file.
pub(crate) fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = temp_file_in(dir)?;
    {
        let mut output = BufWriter::new(temp.as_file_mut());
        write(&mut output)?;
        output.flush()?;
    }
    commit_temp_file(temp, path)?;
    log::debug!("replaced {}", path.display());
    Ok(())
}

/// Removes `path`, ignoring a file that is already gone.
pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// Size of `path`, or zero when it does not exist.
pub(crate) fn file_size_or_zero(path: &Path) -> Result<u64> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(0),
        Err(error) => Err(error.into()),
    }
}
