use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use super::{parse_version_line, IndexStore};
use crate::error::{PkgIndexError, Result};

enum Attempt {
    Opened(u64),
    Missing,
    Torn,
}

/// Opens every store's file in `dir` as one snapshot.
///
/// Returns the shared version once all files are present with equal
/// `VERSION` headers, or `None` when none of them exist. A mix of present
/// and missing files, or disagreeing versions, is retried with `backoff`
/// between attempts until `timeout` has passed, then reported as
/// [`PkgIndexError::InconsistentIndex`]. Any other I/O failure closes every
/// handle and is returned at once.
pub fn consistent_open(
    stores: &mut [&mut dyn IndexStore],
    dir: &Path,
    timeout: Duration,
    backoff: Duration,
) -> Result<Option<u64>> {
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let attempt = open_attempt(stores, dir);
        match attempt {
            Ok(Attempt::Opened(version)) => {
                log::debug!(
                    "opened {} index files in {} at version {version} after {attempts} attempts",
                    stores.len(),
                    dir.display()
                );
                return Ok(Some(version));
            }
            Ok(Attempt::Missing) => {
                log::debug!("no index files in {}", dir.display());
                return Ok(None);
            }
            Ok(Attempt::Torn) => close_all(stores),
            Err(error) => {
                close_all(stores);
                return Err(error);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            log::warn!(
                "index in {} stayed inconsistent for {}ms over {attempts} attempts",
                dir.display(),
                elapsed.as_millis()
            );
            return Err(PkgIndexError::InconsistentIndex { dir: dir.to_path_buf() });
        }
        thread::sleep(backoff.min(timeout - elapsed));
    }
}

fn open_attempt(stores: &mut [&mut dyn IndexStore], dir: &Path) -> Result<Attempt> {
    let mut missing: Option<bool> = None;
    let mut current: Option<u64> = None;

    for store in stores.iter_mut() {
        let path = dir.join(store.file_name());
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => {
                if missing == Some(false) {
                    return Ok(Attempt::Torn);
                }
                missing = Some(true);
                continue;
            }
            Err(error) => return Err(error.into()),
        };
        if missing == Some(true) {
            return Ok(Attempt::Torn);
        }
        missing = Some(false);

        let mut reader = BufReader::new(file);
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let Some(version) = parse_version_line(&header) else {
            return Err(PkgIndexError::CorruptIndex {
                path,
                detail: format!("bad version line '{}'", header.trim_end()),
            });
        };
        store.set_file_handle(reader, path)?;

        match current {
            None => current = Some(version),
            Some(expected) if expected != version => return Ok(Attempt::Torn),
            Some(_) => {}
        }
    }

    Ok(match current {
        Some(version) => Attempt::Opened(version),
        None => Attempt::Missing,
    })
}

fn close_all(stores: &mut [&mut dyn IndexStore]) {
    for store in stores.iter_mut() {
        store.close_file_handle();
    }
}
