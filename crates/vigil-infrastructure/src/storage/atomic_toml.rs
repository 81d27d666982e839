//! Atomic TOML file operations.
//!
//! Provides a thin layer for safe read-merge-write access to TOML files that
//! more than one writer may touch.

use serde::{Serialize, de::DeserializeOwned};
use std::fs::{self, File, OpenOptions};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vigil_core::VigilError;

/// Errors that can occur during atomic TOML operations.
#[derive(Error, Debug)]
pub enum AtomicTomlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<AtomicTomlError> for VigilError {
    fn from(err: AtomicTomlError) -> Self {
        VigilError::store(err.to_string())
    }
}

/// A handle to a TOML file that is only ever replaced as a whole.
///
/// - Writes go to a temporary sibling, are fsynced, then renamed over the
///   target, so readers see either the old or the new content.
/// - [`AtomicTomlFile::update`] holds an exclusive lock across
///   read, modify and write.
pub struct AtomicTomlFile<T> {
    path: PathBuf,
    _phantom: PhantomData<T>,
}

impl<T> AtomicTomlFile<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            _phantom: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads and deserializes the file.
    ///
    /// Returns `Ok(None)` when the file doesn't exist or is blank.
    pub fn load(&self) -> Result<Option<T>, AtomicTomlError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)?;
        // Files edited with Windows tools often carry a BOM.
        let content = content.trim_start_matches('\u{feff}');

        if content.trim().is_empty() {
            return Ok(None);
        }

        let data: T = toml::from_str(content)?;
        Ok(Some(data))
    }

    /// Writes `data` via temporary file + rename.
    pub fn save(&self, data: &T) -> Result<(), AtomicTomlError> {
        ensure_parent(&self.path)?;
        let rendered = toml::to_string_pretty(data)?;

        let staging = self.staging_path()?;
        {
            let mut out = File::create(&staging)?;
            out.write_all(rendered.as_bytes())?;
            out.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// Read-merge-write under an exclusive lock.
    ///
    /// `f` sees the latest on-disk value (or `default_value` when there is
    /// none). The value as written is returned.
    pub fn update<F>(&self, default_value: T, f: F) -> Result<T, AtomicTomlError>
    where
        F: FnOnce(&mut T) -> Result<(), AtomicTomlError>,
    {
        let _guard = FileLock::acquire(&self.path)?;
        let mut data = self.load()?.unwrap_or(default_value);
        f(&mut data)?;
        self.save(&data)?;
        Ok(data)
    }

    fn staging_path(&self) -> Result<PathBuf, AtomicTomlError> {
        let name = self.path.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", self.path.display()),
            )
        })?;
        Ok(self
            .path
            .with_file_name(format!(".{}.tmp", name.to_string_lossy())))
    }
}

fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Exclusive lock guard, released when dropped.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: &Path) -> Result<Self, AtomicTomlError> {
        use fs2::FileExt;

        let lock_path = path.with_extension("lock");
        ensure_parent(&lock_path)?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.lock_exclusive().map_err(|e| {
            AtomicTomlError::Lock(format!("{}: {}", lock_path.display(), e))
        })?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        use fs2::FileExt;
        // The lock file stays; removing it would race with a waiting locker.
        let _ = self.file.unlock();
    }
}
