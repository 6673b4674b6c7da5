//! File-backed credential storage, one file per account.
//!
//! Files are never created with broader permissions and narrowed afterwards:
//! the directory is created 0700 and each write goes to a temp file that is
//! created 0600 in the same directory, fsynced, then renamed over the target.
//! A crash at any point leaves either the old file, the new file, or an
//! owner-only temp file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CredentialPersistError;
use crate::types::IntegrationKey;

#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a credential locator: absolute paths are used as-is, anything
    /// else is relative to the credentials directory.
    pub fn resolve(&self, locator: &str) -> PathBuf {
        let path = Path::new(locator.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }

    pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Atomically write `value` as JSON to `path` with owner-only permissions.
    pub fn save_json<T: Serialize>(
        &self,
        key: &IntegrationKey,
        path: &Path,
        value: &T,
    ) -> Result<(), CredentialPersistError> {
        let wrap = |source: std::io::Error| CredentialPersistError {
            key: key.clone(),
            path: path.to_path_buf(),
            source,
        };

        let content = serde_json::to_vec_pretty(value)
            .map_err(|e| wrap(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => self.dir.as_path(),
        };
        ensure_private_dir(parent).map_err(wrap)?;

        let mut tmp = create_private_temp(parent).map_err(wrap)?;
        tmp.write_all(&content).map_err(wrap)?;
        tmp.as_file().sync_all().map_err(wrap)?;
        tmp.persist(path).map_err(|e| wrap(e.error))?;
        Ok(())
    }
}

/// Create the directory (and missing parents) with mode 0700 at creation time.
/// Existing directories are left as they are.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.exists() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Temp file in `dir`, created owner-only (tempfile opens with 0600 on unix).
fn create_private_temp(dir: &Path) -> std::io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".credential-")
        .suffix(".tmp")
        .tempfile_in(dir)
}
