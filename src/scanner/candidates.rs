//! Lazy enumeration of DICOM-plausible files under the intake root.
//!
//! Safety rules follow the rest of the crate: unreadable directories are
//! skipped, symlinked directories are never descended, and a missing root
//! simply yields nothing. Order is whatever the filesystem returns.

#![allow(missing_docs)]

use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};

/// Lowercase extensions accepted as DICOM. The empty entry admits files
/// with no suffix at all, which is how many modalities export.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["dcm", "dicom", "ima", ""];

/// Single-pass iterator over regular files below a root.
pub struct Candidates {
    stack: Vec<ReadDir>,
    recursive: bool,
    any_extension: bool,
}

impl Candidates {
    fn new(root: &Path, recursive: bool, any_extension: bool) -> Self {
        Self {
            stack: fs::read_dir(root).into_iter().collect(),
            recursive,
            any_extension,
        }
    }
}

impl Iterator for Candidates {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        loop {
            let dir = self.stack.last_mut()?;
            let Some(entry) = dir.next() else {
                self.stack.pop();
                continue;
            };
            let Ok(entry) = entry else {
                continue;
            };
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            let path = entry.path();

            if file_type.is_dir() {
                if self.recursive
                    && let Ok(children) = fs::read_dir(&path)
                {
                    self.stack.push(children);
                }
                continue;
            }

            // Symlinks count when they point at a regular file.
            let is_file = if file_type.is_symlink() {
                fs::metadata(&path).is_ok_and(|meta| meta.is_file())
            } else {
                file_type.is_file()
            };

            if is_file && (self.any_extension || has_supported_extension(&path)) {
                return Some(path);
            }
        }
    }
}

/// Candidate files under `root`: immediate children, or the whole subtree.
pub fn scan(root: &Path, recursive: bool) -> Candidates {
    Candidates::new(root, recursive, false)
}

/// Number of candidates under `root`. Walks the tree on every call.
pub fn count(root: &Path, recursive: bool) -> usize {
    scan(root, recursive).count()
}

/// Number of regular files of any kind below `dir`; 0 if it does not exist.
pub fn count_files(dir: &Path) -> usize {
    Candidates::new(dir, true, true).count()
}

/// Case-insensitive allow-list check on the final extension.
pub fn has_supported_extension(path: &Path) -> bool {
    path.extension().is_none_or(|ext| {
        let ext = ext.to_string_lossy().to_ascii_lowercase();
        SUPPORTED_EXTENSIONS.contains(&ext.as_str())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"DICM").unwrap();
    }

    fn names(paths: impl Iterator<Item = PathBuf>) -> HashSet<String> {
        paths
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("a.dcm"));
        touch(&root.join("B.DCM"));
        touch(&root.join("c.Dicom"));
        touch(&root.join("d.ima"));
        touch(&root.join("IM000001"));
        touch(&root.join("notes.txt"));
        touch(&root.join("report.pdf"));
        touch(&root.join("series1").join("e.dcm"));
        touch(&root.join("series1").join("deeper").join("IM000002"));
        touch(&root.join("series1").join("thumb.png"));
        dir
    }

    #[test]
    fn flat_scan_lists_immediate_candidates() {
        let dir = fixture();
        let found = names(scan(dir.path(), false));
        let expected: HashSet<String> = ["a.dcm", "B.DCM", "c.Dicom", "d.ima", "IM000001"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn recursive_scan_lists_whole_subtree() {
        let dir = fixture();
        let found = names(scan(dir.path(), true));
        assert_eq!(found.len(), 7);
        assert!(found.contains("e.dcm"));
        assert!(found.contains("IM000002"));
        assert!(!found.contains("thumb.png"));
        assert!(!found.contains("series1"), "directories are never candidates");
    }

    #[test]
    fn count_matches_scan() {
        let dir = fixture();
        assert_eq!(count(dir.path(), false), 5);
        assert_eq!(count(dir.path(), true), 7);
    }

    #[test]
    fn count_files_ignores_extension_filter() {
        let dir = fixture();
        assert_eq!(count_files(dir.path()), 10);
        assert_eq!(count_files(&dir.path().join("missing")), 0);
    }

    #[test]
    fn missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scan(&dir.path().join("nope"), true).count(), 0);
    }

    #[test]
    fn scan_is_lazy_and_single_pass() {
        let dir = fixture();
        let mut candidates = scan(dir.path(), false);
        let first = candidates.next().expect("at least one candidate");
        let rest: Vec<PathBuf> = candidates.collect();
        assert_eq!(rest.len(), 4);
        assert!(!rest.contains(&first));
    }

    #[test]
    fn extension_rules() {
        assert!(has_supported_extension(Path::new("x.DcM")));
        assert!(has_supported_extension(Path::new("IM0001")));
        assert!(has_supported_extension(Path::new(".hidden")));
        assert!(has_supported_extension(Path::new("study.tar.dcm")));
        assert!(!has_supported_extension(Path::new("study.dcm.bak")));
        assert!(!has_supported_extension(Path::new("x.jpg")));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_to_files_count_but_dir_links_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        touch(&outside.path().join("linked.dcm"));
        touch(&outside.path().join("sub").join("hidden.dcm"));
        std::os::unix::fs::symlink(
            outside.path().join("linked.dcm"),
            dir.path().join("linked.dcm"),
        )
        .unwrap();
        std::os::unix::fs::symlink(outside.path().join("sub"), dir.path().join("sub")).unwrap();

        let found = names(scan(dir.path(), true));
        assert!(found.contains("linked.dcm"));
        assert!(!found.contains("hidden.dcm"));
    }
}
