use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use engine_logging::engine_warn;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not move {from:?} into place after {attempts} attempts: {source}")]
    Replace {
        from: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Atomically write content to `{dir}/{filename}` by writing a temp file then renaming.
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn write(&self, filename: &str, content: &str) -> Result<PathBuf, PersistError> {
        ensure_output_dir(&self.dir)?;

        let target = self.dir.join(filename);
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }
}

/// Partial-download path for `dest`: the same name with `.tmp` appended.
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(dest.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Moves `from` over `to`, retrying when the rename is refused.
///
/// Scanners and indexers briefly lock fresh files on some platforms, so a
/// failed rename waits `backoff` and tries again, up to `attempts` times.
pub async fn replace_with_retry(
    from: &Path,
    to: &Path,
    attempts: u32,
    backoff: Duration,
) -> Result<(), PersistError> {
    let attempts = attempts.max(1);
    let mut last_error = None;
    for attempt in 1..=attempts {
        if tokio::fs::try_exists(to).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(to).await;
        }
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_error = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(PersistError::Replace {
        from: from.to_path_buf(),
        attempts,
        source: last_error.unwrap_or_else(|| io::Error::other("rename failed")),
    })
}

/// Removes a file, ignoring a missing one.
pub(crate) async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => engine_warn!("Failed to remove {:?}: {}", path, err),
    }
}
