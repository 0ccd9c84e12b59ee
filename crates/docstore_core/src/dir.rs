//! Database directory management.
//!
//! On-disk layout:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK                      # Advisory lock for single-process access
//! └─ collection-<cid>/
//!    ├─ parameter.cbor         # Collection descriptor
//!    ├─ index-<id>.cbor        # One descriptor per secondary index
//!    └─ journal-<fid>.db       # Log segments
//! ```
//!
//! The LOCK file ensures only one process opens the database at a time.
//! Descriptor files are replaced with write-temp-then-rename.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{CoreError, CoreResult};
use crate::types::CollectionId;

const LOCK_FILE: &str = "LOCK";
const COLLECTION_PREFIX: &str = "collection-";
const TEMP_SUFFIX: &str = ".tmp";

/// Manages the database directory structure and file locking.
///
/// The `DatabaseDir` holds an exclusive lock on the directory for its whole
/// lifetime; a second instance for the same directory fails with
/// [`CoreError::DatabaseLocked`].
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory.
    ///
    /// # Errors
    ///
    /// - [`CoreError::BadParameter`] if the directory is missing and
    ///   `create_if_missing` is false, or the path is not a directory
    /// - [`CoreError::DatabaseLocked`] if another process holds the lock
    /// - I/O errors
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::bad_parameter(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }
        if !path.is_dir() {
            return Err(CoreError::bad_parameter(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// The database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory of one collection.
    #[must_use]
    pub fn collection_path(&self, cid: CollectionId) -> PathBuf {
        self.path.join(format!("{COLLECTION_PREFIX}{}", cid.as_u64()))
    }

    /// Ids of every collection directory, ascending.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be listed.
    pub fn collection_ids(&self) -> CoreResult<Vec<CollectionId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if let Some(cid) = name
                .to_str()
                .and_then(|n| n.strip_prefix(COLLECTION_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
            {
                ids.push(CollectionId::new(cid));
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Creates the directory of a collection.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if it cannot be created.
    pub fn create_collection_dir(&self, cid: CollectionId) -> CoreResult<PathBuf> {
        let dir = self.collection_path(cid);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            sync_directory(&self.path)?;
        }
        Ok(dir)
    }

    /// Deletes the directory of a collection with everything in it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if removal fails.
    pub fn remove_collection_dir(&self, cid: CollectionId) -> CoreResult<()> {
        let dir = self.collection_path(cid);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            sync_directory(&self.path)?;
        }
        Ok(())
    }
}

/// Replaces `path` with `data`.
///
/// The bytes go to a temporary sibling that is synced and renamed over the
/// target; the parent directory is synced afterwards so the rename is
/// durable.
///
/// # Errors
///
/// Returns an I/O error from any step.
pub fn write_atomic(path: &Path, data: &[u8]) -> CoreResult<()> {
    let mut temp = path.as_os_str().to_os_string();
    temp.push(TEMP_SUFFIX);
    let temp = PathBuf::from(temp);

    let mut file = File::create(&temp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        sync_directory(parent)?;
    }
    Ok(())
}

/// Reads a file, `None` if it does not exist or is empty.
///
/// # Errors
///
/// Returns an I/O error for anything but a missing file.
pub fn read_optional(path: &Path) -> CoreResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) if data.is_empty() => Ok(None),
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Removes a file and syncs its directory. Missing files are ignored.
///
/// # Errors
///
/// Returns an I/O error if the file exists but cannot be removed.
pub fn remove_file(path: &Path) -> CoreResult<()> {
    if path.exists() {
        fs::remove_file(path)?;
        if let Some(parent) = path.parent() {
            sync_directory(parent)?;
        }
    }
    Ok(())
}

/// Makes entry changes in `dir` durable.
///
/// NTFS journals metadata, so there is nothing to do outside Unix.
#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_directory() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("new_db");
        let dir = DatabaseDir::open(&db_path, true).unwrap();
        assert!(db_path.is_dir());
        assert_eq!(dir.path(), db_path);
    }

    #[test]
    fn open_fails_if_not_exists_and_no_create() {
        let temp = tempdir().unwrap();
        let result = DatabaseDir::open(&temp.path().join("nonexistent"), false);
        assert!(matches!(result, Err(CoreError::BadParameter { .. })));
    }

    #[test]
    fn lock_prevents_second_open() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("locked_db");
        let _first = DatabaseDir::open(&db_path, true).unwrap();
        assert!(matches!(
            DatabaseDir::open(&db_path, true),
            Err(CoreError::DatabaseLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let temp = tempdir().unwrap();
        let db_path = temp.path().join("reopen_db");
        drop(DatabaseDir::open(&db_path, true).unwrap());
        let _again = DatabaseDir::open(&db_path, true).unwrap();
    }

    #[test]
    fn collection_directories_are_listed() {
        let temp = tempdir().unwrap();
        let dir = DatabaseDir::open(temp.path(), true).unwrap();
        dir.create_collection_dir(CollectionId::new(20)).unwrap();
        dir.create_collection_dir(CollectionId::new(3)).unwrap();
        fs::create_dir(temp.path().join("unrelated")).unwrap();
        assert_eq!(
            dir.collection_ids().unwrap(),
            vec![CollectionId::new(3), CollectionId::new(20)]
        );

        dir.remove_collection_dir(CollectionId::new(3)).unwrap();
        assert_eq!(dir.collection_ids().unwrap(), vec![CollectionId::new(20)]);
    }

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("parameter.cbor");
        assert!(read_optional(&path).unwrap().is_none());
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(read_optional(&path).unwrap().unwrap(), b"second");
        assert!(!temp.path().join("parameter.cbor.tmp").exists());

        remove_file(&path).unwrap();
        assert!(read_optional(&path).unwrap().is_none());
    }
}
