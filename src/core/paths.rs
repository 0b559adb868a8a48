//! Path normalization shared by config resolution and file identities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Resolve a configured directory to an absolute, normalized path.
///
/// The deepest existing ancestor is canonicalized (symlinks resolved) and the
/// not-yet-created tail is appended as is. A directory and a missing child of
/// it therefore always share the same prefix.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = lexical_absolute(path);
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = std::fs::canonicalize(existing) {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, part| resolved.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Absolute form of `path` without touching the filesystem.
///
/// Symlinks are never resolved, so the result is stable for a file even
/// after it has been removed. Used to key the processed-set.
pub fn lexical_absolute(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };
    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_existing_path_canonically() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a");
        std::fs::create_dir(&nested).unwrap();
        let resolved = resolve_absolute_path(&nested.join("..").join("a"));
        assert_eq!(resolved, std::fs::canonicalize(&nested).unwrap());
    }

    #[test]
    fn missing_path_is_normalized_syntactically() {
        let input = Path::new("/nonexistent-intake/foo/../bar/./scan.dcm");
        assert!(std::fs::canonicalize(input).is_err());
        assert_eq!(
            resolve_absolute_path(input),
            Path::new("/nonexistent-intake/bar/scan.dcm")
        );
    }

    #[cfg(unix)]
    #[test]
    fn missing_child_of_symlinked_dir_shares_canonical_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir_all(real.join("out")).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let output = resolve_absolute_path(&link.join("out"));
        let quarantine = resolve_absolute_path(&link.join("out").join("private").join("q"));
        assert_eq!(output, std::fs::canonicalize(real.join("out")).unwrap());
        assert!(quarantine.starts_with(&output), "{quarantine:?} vs {output:?}");
        assert!(quarantine.ends_with("out/private/q"));
    }

    #[test]
    fn lexical_absolute_keeps_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        std::fs::create_dir(&target).unwrap();
        #[cfg(unix)]
        {
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&target, &link).unwrap();
            assert_eq!(lexical_absolute(&link.join("x.dcm")), link.join("x.dcm"));
        }
    }

    #[test]
    fn relative_paths_become_absolute() {
        let resolved = lexical_absolute(Path::new("incoming/scan.dcm"));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("incoming/scan.dcm"));
    }

    #[test]
    fn handles_parent_at_root() {
        #[cfg(unix)]
        assert_eq!(normalize_syntactic(Path::new("/../foo")), Path::new("/foo"));
    }
}
