//! Remote-project to local-directory mapping.

use crate::error::{EngineError, EngineResult};
use crate::localfs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Case-insensitive map from full remote project path to local directory.
///
/// Grows monotonically over a session and never shrinks. An entry is
/// created the first time its project marker is observed; re-observing
/// a marker leaves the existing entry in place.
#[derive(Debug, Default)]
pub struct LocalPathIndex {
    map: HashMap<String, PathBuf>,
}

impl LocalPathIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a project's local directory. First marker wins: returns
    /// false and changes nothing when the project is already mapped.
    pub fn insert(&mut self, remote_project: &str, local_dir: PathBuf) -> bool {
        let key = remote_project.to_lowercase();
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, local_dir);
        true
    }

    /// Looks up a project's local directory.
    pub fn get(&self, remote_project: &str) -> Option<&Path> {
        self.map
            .get(&remote_project.to_lowercase())
            .map(PathBuf::as_path)
    }

    /// Returns the number of mapped projects.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no project has been mapped yet.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Resolves and creates the local directory for a project marker.
///
/// With `build_tree`, the directory is the local root joined with the
/// remote-relative path translated to local separators. Otherwise the
/// marker's checkout-folder hint is used verbatim; a marker without a
/// hint is a protocol violation in that mode. The directory is created
/// idempotently before the caller records the mapping.
pub fn resolve_project_dir(
    local_root: &Path,
    relative_path: &str,
    build_tree: bool,
    hint: Option<&str>,
) -> EngineResult<PathBuf> {
    let dir = if build_tree {
        let mut dir = local_root.to_path_buf();
        for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
            dir.push(segment);
        }
        dir
    } else {
        match hint {
            Some(hint) => PathBuf::from(hint),
            None => {
                return Err(EngineError::Protocol(format!(
                    "project marker '{relative_path}' carries no checkout folder"
                )))
            }
        }
    };
    localfs::ensure_dir(&dir)?;
    Ok(dir)
}
