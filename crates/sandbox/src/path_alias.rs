//! Workspace-boundary enforcement for filesystem paths.
//!
//! Two escapes are caught here: a path whose canonical form lands outside
//! every workspace root, and a symlink in any prefix component whose
//! target escapes. Platform symlinks that point at an *ancestor* of a
//! workspace root (macOS `/var -> /private/var`) are tolerated.

use crate::decode::iterative_uri_decode;
use crate::hardlink::{PathAliasPolicy, assert_no_hardlinked_final_path};
use krill::{Error, ErrorKind, Result};
use std::path::{Component, Path, PathBuf};

fn is_contained_in(child: &Path, root: &Path) -> bool {
    child == root || child.starts_with(root)
}

fn is_within_any_root(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| {
        std::fs::canonicalize(root)
            .map(|canonical_root| is_contained_in(path, &canonical_root))
            .unwrap_or(false)
    })
}

/// Whether `candidate` is an ancestor of (or equal to) any canonical root.
fn is_ancestor_of_any_root(candidate: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| {
        std::fs::canonicalize(root)
            .map(|canonical_root| is_contained_in(&canonical_root, candidate))
            .unwrap_or(false)
    })
}

/// Verify that `path` cannot alias its way out of the workspace roots.
///
/// Fails with `InvalidArgument` when `roots` is empty, and `Forbidden`
/// when the canonical path escapes, when a prefix symlink escapes, or
/// when the raw input hides a malformed/encoded traversal.
pub fn assert_no_path_alias_escape(path: &Path, workspace_roots: &[PathBuf]) -> Result<()> {
    if workspace_roots.is_empty() {
        return Err(Error::new(
            ErrorKind::InvalidArgument,
            "No workspace roots provided for path alias check",
        ));
    }

    // Canonical containment first; this also resolves platform symlinks.
    if let Ok(canonical) = std::fs::canonicalize(path) {
        if !is_within_any_root(&canonical, workspace_roots) {
            log::warn!(
                "Path escapes workspace after canonicalization: {} -> {}",
                path.display(),
                canonical.display()
            );
            return Err(Error::with_detail(
                ErrorKind::Forbidden,
                "Path escapes workspace boundary",
                format!("{} -> {}", path.display(), canonical.display()),
            ));
        }
    }

    // Walk every prefix component looking for symlinks that escape.
    let mut accumulated = PathBuf::new();
    for component in path.components() {
        accumulated.push(component);
        if matches!(component, Component::RootDir) {
            continue;
        }

        if !accumulated.exists() {
            // Component doesn't exist yet, nothing left to resolve.
            break;
        }

        let meta = match std::fs::symlink_metadata(&accumulated) {
            Ok(meta) => meta,
            Err(_) => break,
        };
        if !meta.file_type().is_symlink() {
            continue;
        }

        let target = std::fs::read_link(&accumulated).map_err(|e| {
            Error::with_detail(
                ErrorKind::Io,
                "Failed to read symlink",
                format!("{}: {}", accumulated.display(), e),
            )
        })?;
        let resolved = if target.is_absolute() {
            target
        } else {
            accumulated.parent().unwrap_or(Path::new("/")).join(target)
        };
        let resolved_canonical = std::fs::canonicalize(&resolved).map_err(|e| {
            Error::with_detail(
                ErrorKind::Io,
                "Failed to canonicalize symlink target",
                format!("{}: {}", resolved.display(), e),
            )
        })?;

        // /var -> /private/var style links resolve to ancestors of the
        // workspace, not out of it.
        if is_ancestor_of_any_root(&resolved_canonical, workspace_roots) {
            continue;
        }

        if !is_within_any_root(&resolved_canonical, workspace_roots) {
            log::warn!(
                "Path alias escape detected: {} -> {} escapes workspace",
                accumulated.display(),
                resolved_canonical.display()
            );
            return Err(Error::with_detail(
                ErrorKind::Forbidden,
                "Symlink escapes workspace boundary",
                format!("{} -> {}", accumulated.display(), resolved_canonical.display()),
            ));
        }
    }

    // The raw input must also survive iterative percent-decoding.
    iterative_uri_decode(&path.to_string_lossy())?;

    Ok(())
}

/// Combined escape + hardlink check used by file-writing handlers.
pub fn assert_path_safe(
    path: &Path,
    workspace_roots: &[PathBuf],
    policy: PathAliasPolicy,
) -> Result<()> {
    assert_no_path_alias_escape(path, workspace_roots)?;

    if path.exists() && path.is_file() {
        assert_no_hardlinked_final_path(path, policy)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_roots_is_invalid_argument() {
        let err = assert_no_path_alias_escape(Path::new("/tmp/x"), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn path_inside_root_passes() {
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("notes.txt");
        std::fs::write(&file, "hi").unwrap();
        assert_no_path_alias_escape(&file, &[root.path().to_path_buf()]).unwrap();
    }

    #[test]
    fn canonical_escape_is_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("escape.txt");
        std::fs::write(&file, "x").unwrap();
        let err = assert_no_path_alias_escape(&file, &[root.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_out_of_workspace_is_forbidden() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("secret");
        std::fs::write(&target, "shh").unwrap();
        let link = root.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = assert_no_path_alias_escape(&link, &[root.path().to_path_buf()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_within_workspace_passes() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("real.txt");
        std::fs::write(&target, "ok").unwrap();
        let link = root.path().join("alias.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_no_path_alias_escape(&link, &[root.path().to_path_buf()]).unwrap();
    }

    #[test]
    fn nonexistent_path_under_root_passes() {
        let root = tempfile::tempdir().unwrap();
        let future = root.path().join("not-yet/created.txt");
        assert_no_path_alias_escape(&future, &[root.path().to_path_buf()]).unwrap();
    }
}
