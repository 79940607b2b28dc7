// SPDX-License-Identifier: MIT
//! Path containment for generated-project file operations.
//!
//! Every file path the generation service hands us is relative to one
//! project root. `safe_path` is the single gate that turns such a path into
//! an absolute one, rejecting anything that would escape the root.

use anyhow::{bail, Result};
use std::path::{Component, Path, PathBuf};

/// Resolve `relative` against `root`, refusing absolute paths and any `..`
/// sequence that climbs out of the root.
///
/// The target does not need to exist yet — create_file runs before the file
/// is on disk, so `canonicalize` is not an option here.
pub fn safe_path(root: &Path, relative: &Path) -> Result<PathBuf> {
    if relative.is_absolute() {
        bail!("absolute path not allowed: {}", relative.display());
    }

    let resolved = lexical_normalize(&root.join(relative));
    let root = lexical_normalize(root);
    if !resolved.starts_with(&root) {
        bail!(
            "path {} escapes project root {}",
            relative.display(),
            root.display()
        );
    }

    Ok(resolved)
}

/// Resolve `.` and `..` components textually, without touching the
/// filesystem. `..` at the root is dropped rather than rejected; the
/// containment check in `safe_path` catches escapes.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(out.last(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_plain_relative_path() {
        let root = Path::new("/tmp/projects/proj_a");
        let p = safe_path(root, Path::new("src/App.tsx")).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/projects/proj_a/src/App.tsx"));
    }

    #[test]
    fn rejects_parent_escape() {
        let root = Path::new("/tmp/projects/proj_a");
        assert!(safe_path(root, Path::new("../proj_b/steal.txt")).is_err());
        assert!(safe_path(root, Path::new("../../etc/passwd")).is_err());
    }

    #[test]
    fn rejects_absolute_path() {
        let root = Path::new("/tmp/projects/proj_a");
        assert!(safe_path(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn normalizes_dot_segments_inside_root() {
        let root = Path::new("/tmp/projects/proj_a");
        let p = safe_path(root, Path::new("src/./components/../main.tsx")).unwrap();
        assert_eq!(p, PathBuf::from("/tmp/projects/proj_a/src/main.tsx"));
    }
}
