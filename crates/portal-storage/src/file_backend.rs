//! Filesystem storage backend. The production default.
//!
//! Each key maps to one file below the root directory: `wiki/12.json` is
//! stored at `<root>/wiki/12.json`. Key segments are restricted to a safe
//! character set so a key can never escape the root.
//!
//! Writes go to a hidden temp file in the destination directory and are
//! then renamed into place, so readers observe either the old or the new
//! contents of a file, never a torn write. Hidden files are invisible to
//! [`list`](StorageBackend::list); leftover temp files from a crash are
//! removed by [`FileBackend::open`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{StorageBackend, StorageError};

/// Suffix of in-flight write files.
const TEMP_SUFFIX: &str = ".tmp";

/// A storage backend that keeps one file per key.
///
/// # Examples
///
/// ```no_run
/// # use portal_storage::FileBackend;
/// # #[tokio::main]
/// # async fn main() {
/// let backend = FileBackend::open("/var/lib/portal/data").await.unwrap();
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if necessary) a file store rooted at `root`.
    ///
    /// Any temp files left behind by an interrupted write are deleted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the directory cannot be created or
    /// scanned.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let open_err = |e: std::io::Error| StorageError::Open {
            path: root.display().to_string(),
            reason: e.to_string(),
        };

        fs::create_dir_all(&root).await.map_err(open_err)?;

        let mut swept = 0usize;
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(open_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(open_err)? {
                let file_type = entry.file_type().await.map_err(open_err)?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                    fs::remove_file(entry.path()).await.map_err(open_err)?;
                    swept = swept.saturating_add(1);
                }
            }
        }
        if swept > 0 {
            warn!(root = %root.display(), swept, "removed temp files from interrupted writes");
        }

        Ok(Self { root })
    }

    /// Return the root directory of this store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a key onto a path below the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let invalid = |reason: &str| StorageError::InvalidKey {
            key: key.to_owned(),
            reason: reason.to_owned(),
        };

        if key.is_empty() {
            return Err(invalid("key must not be empty"));
        }

        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if segment.starts_with('.') {
                return Err(invalid("segments may not start with '.'"));
            }
            if !segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
            {
                return Err(invalid(
                    "only alphanumeric characters, '_', '-', and '.' are allowed",
                ));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait::async_trait]
impl StorageBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let write_err = |e: std::io::Error| StorageError::Write {
            key: key.to_owned(),
            reason: e.to_string(),
        };

        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StorageError::InvalidKey {
                key: key.to_owned(),
                reason: "key does not name a file".to_owned(),
            });
        };
        fs::create_dir_all(dir).await.map_err(write_err)?;

        let tmp = dir.join(format!(
            ".{}.{}{TEMP_SUFFIX}",
            file_name.to_string_lossy(),
            uuid::Uuid::new_v4().simple()
        ));

        let mut file = fs::File::create(&tmp).await.map_err(write_err)?;
        let written = async {
            file.write_all(value).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        debug!(key, bytes = value.len(), "file written");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete {
                key: key.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let list_err = |e: std::io::Error| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        };

        // Start the walk at the deepest directory the prefix names.
        let (start_dir, start_key) = match prefix.rfind('/') {
            Some(idx) => {
                let dir = &prefix[..idx];
                match self.path_for(dir) {
                    Ok(path) => (path, format!("{dir}/")),
                    // No stored key can contain an invalid segment.
                    Err(_) => return Ok(Vec::new()),
                }
            }
            None => (self.root.clone(), String::new()),
        };

        match fs::metadata(&start_dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(Vec::new()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_err(e)),
        }

        let mut keys = Vec::new();
        let mut pending = vec![(start_dir, start_key)];
        while let Some((dir, key_prefix)) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(list_err)?;
            while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
                let Ok(name) = entry.file_name().into_string() else {
                    warn!(dir = %dir.display(), "skipping non-UTF-8 file name");
                    continue;
                };
                if name.starts_with('.') {
                    continue;
                }
                let key = format!("{key_prefix}{name}");
                let file_type = entry.file_type().await.map_err(list_err)?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        fs::try_exists(&path).await.map_err(|e| StorageError::Read {
            key: key.to_owned(),
            reason: e.to_string(),
        })
    }
}
