// SPDX-License-Identifier: MIT OR Apache-2.0

//! Utility functions for cadgrep

use crate::storage::DrawingStore;
use std::path::{Path, PathBuf};

/// Directory holding a drawing store, as found from some start directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRoot {
    pub root: PathBuf,
    /// Set when the store was found above the start directory.
    pub from_parent: bool,
}

/// Nearest directory at or above `start` that holds a store file.
pub fn find_store_root(start: impl AsRef<Path>) -> Option<StoreRoot> {
    let start = start.as_ref();
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| DrawingStore::default_path(dir).is_file())
        .map(|dir| StoreRoot {
            root: dir.to_path_buf(),
            from_parent: dir != start.as_path(),
        })
}

/// Store root for `path`, or `path` itself when no store exists yet.
pub fn get_root_with_store(path: impl AsRef<Path>) -> PathBuf {
    find_store_root(&path)
        .map(|found| found.root)
        .unwrap_or_else(|| path.as_ref().to_path_buf())
}

/// Final path component as a string, or the whole path when there is none
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{STORE_DIR, STORE_FILE};
    use std::fs;
    use tempfile::TempDir;

    fn make_store(dir: &Path) {
        fs::create_dir(dir.join(STORE_DIR)).unwrap();
        fs::write(dir.join(STORE_DIR).join(STORE_FILE), b"").unwrap();
    }

    #[test]
    fn find_store_root_in_current_dir() {
        let dir = TempDir::new().unwrap();
        make_store(dir.path());

        let result = find_store_root(dir.path()).unwrap();
        assert_eq!(result.root, dir.path().canonicalize().unwrap());
        assert!(!result.from_parent);
    }

    #[test]
    fn find_store_root_in_parent() {
        let dir = TempDir::new().unwrap();
        make_store(dir.path());

        let subdir = dir.path().join("drawings");
        fs::create_dir(&subdir).unwrap();

        let result = find_store_root(&subdir).unwrap();
        assert_eq!(result.root, dir.path().canonicalize().unwrap());
        assert!(result.from_parent);
    }

    #[test]
    fn empty_store_dir_is_not_a_store() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(STORE_DIR)).unwrap();
        assert!(find_store_root(dir.path()).is_none());
        assert_eq!(get_root_with_store(dir.path()), dir.path().to_path_buf());
    }

    #[test]
    fn file_name_of_paths() {
        assert_eq!(file_name_of(Path::new("/x/plate.dxf")), "plate.dxf");
        assert_eq!(file_name_of(Path::new("/")), "/");
    }
}
