//! Local filesystem boundary.
//!
//! All disk access of the engine goes through this module: attribute
//! probes, content hashing with lock detection, writes that clear the
//! read-only bit, timestamp stamping, and the destination cleanup that
//! runs before a mirror.

use crate::classify::FileAttr;
use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use vcsmirror_protocol::ContentHash;

/// Attributes of an existing local file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FileMeta {
    /// Whether the read-only attribute is set.
    pub read_only: bool,
}

/// Outcome of hashing a local file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalHash {
    /// The file was readable; its content digest.
    Hash(ContentHash),
    /// The file could not be opened or read, typically because another
    /// process holds it locked.
    Locked,
}

/// Probes a path. Returns `None` when no regular file exists there.
pub fn probe(path: &Path) -> EngineResult<Option<FileMeta>> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(FileMeta {
            read_only: meta.permissions().readonly(),
        })),
        Ok(_) => Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(EngineError::filesystem(path.display().to_string(), err)),
    }
}

/// Hashes a local file's content.
///
/// An open or read failure is reported as `Locked`, never as an error:
/// a file held by another process is skipped, not fatal.
pub fn hash_file(path: &Path) -> LocalHash {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(_) => return LocalHash::Locked,
    };
    match ContentHash::from_reader(file) {
        Ok(hash) => LocalHash::Hash(hash),
        Err(_) => LocalHash::Locked,
    }
}

/// Writes file content, replacing any existing file.
///
/// An existing read-only file has the read-only bit cleared first so
/// the write can proceed.
pub fn write_file(path: &Path, data: &[u8]) -> EngineResult<()> {
    if let Some(meta) = probe(path)? {
        if meta.read_only {
            set_attr(path, FileAttr::Normal)?;
        }
    }
    let mut file =
        File::create(path).map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
    file.write_all(data)
        .map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
    Ok(())
}

/// Sets or clears the read-only attribute.
pub fn set_attr(path: &Path, attr: FileAttr) -> EngineResult<()> {
    let meta =
        fs::metadata(path).map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
    let mut perms = meta.permissions();
    match attr {
        FileAttr::ReadOnly => perms.set_readonly(true),
        FileAttr::Normal => {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                perms.set_mode(perms.mode() | 0o200);
            }
            #[cfg(not(unix))]
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
        }
    }
    fs::set_permissions(path, perms)
        .map_err(|e| EngineError::filesystem(path.display().to_string(), e))
}

/// Stamps the file's last-write time.
pub fn set_file_time(path: &Path, when: DateTime<Utc>) -> EngineResult<()> {
    let mtime = FileTime::from_unix_time(when.timestamp(), when.timestamp_subsec_nanos());
    filetime::set_file_mtime(path, mtime)
        .map_err(|e| EngineError::filesystem(path.display().to_string(), e))
}

/// Creates a directory and any missing parents. Idempotent.
pub fn ensure_dir(path: &Path) -> EngineResult<()> {
    fs::create_dir_all(path).map_err(|e| EngineError::filesystem(path.display().to_string(), e))
}

/// Clears the destination root before a run.
///
/// Every regular file and subdirectory is removed, except the one named
/// control directory (version-control metadata of the destination
/// itself). The root is created when missing, so a fresh destination is
/// valid input.
pub fn clean_destination(root: &Path, control_dir: &str) -> EngineResult<()> {
    ensure_dir(root)?;
    let entries =
        fs::read_dir(root).map_err(|e| EngineError::filesystem(root.display().to_string(), e))?;
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::filesystem(root.display().to_string(), e))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
        if file_type.is_dir() {
            if entry.file_name().to_string_lossy() == control_dir {
                continue;
            }
            fs::remove_dir_all(&path)
                .map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
        } else {
            // Read-only files would survive remove_file on some platforms.
            if let Some(meta) = probe(&path)? {
                if meta.read_only {
                    set_attr(&path, FileAttr::Normal)?;
                }
            }
            fs::remove_file(&path)
                .map_err(|e| EngineError::filesystem(path.display().to_string(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn probe_distinguishes_missing_and_existing() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");

        assert_eq!(probe(&path).unwrap(), None);

        fs::write(&path, b"data").unwrap();
        let meta = probe(&path).unwrap().unwrap();
        assert!(!meta.read_only);
    }

    #[test]
    fn attr_round_trip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"data").unwrap();

        set_attr(&path, FileAttr::ReadOnly).unwrap();
        assert!(probe(&path).unwrap().unwrap().read_only);

        set_attr(&path, FileAttr::Normal).unwrap();
        assert!(!probe(&path).unwrap().unwrap().read_only);
    }

    #[test]
    fn write_replaces_read_only_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"old").unwrap();
        set_attr(&path, FileAttr::ReadOnly).unwrap();

        write_file(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn hash_matches_content() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"payload").unwrap();

        match hash_file(&path) {
            LocalHash::Hash(hash) => assert_eq!(hash, ContentHash::digest(b"payload")),
            LocalHash::Locked => panic!("file should be readable"),
        }
    }

    #[test]
    fn missing_file_hashes_as_locked() {
        let temp = tempdir().unwrap();
        assert_eq!(hash_file(&temp.path().join("gone.txt")), LocalHash::Locked);
    }

    #[test]
    fn file_time_is_applied() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("a.txt");
        fs::write(&path, b"data").unwrap();

        let when = Utc.with_ymd_and_hms(2020, 6, 1, 10, 30, 0).unwrap();
        set_file_time(&path, when).unwrap();

        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        assert_eq!(mtime.unix_seconds(), when.timestamp());
    }

    #[test]
    fn clean_destination_preserves_control_dir() {
        let temp = tempdir().unwrap();
        let root = temp.path();

        fs::write(root.join("stale.txt"), b"x").unwrap();
        set_attr(&root.join("stale.txt"), FileAttr::ReadOnly).unwrap();
        fs::create_dir(root.join("old_project")).unwrap();
        fs::write(root.join("old_project/file"), b"y").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git/HEAD"), b"ref").unwrap();

        clean_destination(root, ".git").unwrap();

        assert!(!root.join("stale.txt").exists());
        assert!(!root.join("old_project").exists());
        assert!(root.join(".git/HEAD").exists());
    }

    #[test]
    fn clean_destination_creates_missing_root() {
        let temp = tempdir().unwrap();
        let root = temp.path().join("fresh");
        clean_destination(&root, ".git").unwrap();
        assert!(root.is_dir());
    }
}
