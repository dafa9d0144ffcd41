//! TOCTOU-resistant hardlink detection for final path components.
//!
//! Three stats are taken in sequence: `lstat`, `stat`, then
//! `realpath + stat`. If the file's inode/device identity shifts between
//! the second and third, something raced the check and the path is
//! rejected. A resolved file with `nlink > 1` is rejected (or unlinked,
//! under the `UnlinkTarget` policy).

use krill::{Error, ErrorKind, Result};
use std::path::Path;

/// What to do when the final component turns out to be hardlinked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathAliasPolicy {
    /// Reject the operation.
    #[default]
    Reject,
    /// Unlink the offending path and continue.
    UnlinkTarget,
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy)]
struct StatIdentity {
    device: u64,
    inode: u64,
    nlink: u64,
}

#[cfg(unix)]
fn identity(meta: &std::fs::Metadata) -> StatIdentity {
    use std::os::unix::fs::MetadataExt;
    StatIdentity {
        device: meta.dev(),
        inode: meta.ino(),
        nlink: meta.nlink(),
    }
}

#[cfg(unix)]
pub fn assert_no_hardlinked_final_path(path: &Path, policy: PathAliasPolicy) -> Result<()> {
    // Step 1: lstat (no symlink follow).
    std::fs::symlink_metadata(path).map_err(|e| {
        Error::with_detail(ErrorKind::Io, "lstat failed", format!("{}: {}", path.display(), e))
    })?;

    // Step 2: stat (follows symlinks).
    let stat_meta = std::fs::metadata(path).map_err(|e| {
        Error::with_detail(ErrorKind::Io, "stat failed", format!("{}: {}", path.display(), e))
    })?;
    let stat_id = identity(&stat_meta);

    // Step 3: realpath + stat.
    let canonical = std::fs::canonicalize(path).map_err(|e| {
        Error::with_detail(
            ErrorKind::Io,
            "Failed to canonicalize path",
            format!("{}: {}", path.display(), e),
        )
    })?;
    let real_meta = std::fs::metadata(&canonical).map_err(|e| {
        Error::with_detail(
            ErrorKind::Io,
            "stat failed",
            format!("{}: {}", canonical.display(), e),
        )
    })?;
    let real_id = identity(&real_meta);

    // The lstat identity legitimately differs for symlinks; the race
    // check compares the followed stat against the canonical stat.
    if stat_id.inode != real_id.inode || stat_id.device != real_id.device {
        log::warn!(
            "TOCTOU race detected on {}: inode/device changed between stat calls",
            path.display()
        );
        return Err(Error::with_detail(
            ErrorKind::Forbidden,
            "TOCTOU race detected: file identity changed during verification",
            path.display().to_string(),
        ));
    }

    if real_id.nlink > 1 {
        log::warn!(
            "Hardlinked file detected: {} has {} links",
            canonical.display(),
            real_id.nlink
        );

        if policy == PathAliasPolicy::UnlinkTarget {
            std::fs::remove_file(path).map_err(|e| {
                Error::with_detail(
                    ErrorKind::Forbidden,
                    "Hardlinked file detected and unlink failed",
                    format!("{}: {}", path.display(), e),
                )
            })?;
            log::info!("Unlinked hardlinked file: {}", path.display());
            return Ok(());
        }

        return Err(Error::with_detail(
            ErrorKind::Forbidden,
            "Hardlinked file rejected (nlink > 1)",
            format!("{} has {} links", canonical.display(), real_id.nlink),
        ));
    }

    Ok(())
}

#[cfg(not(unix))]
pub fn assert_no_hardlinked_final_path(_path: &Path, _policy: PathAliasPolicy) -> Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn plain_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.txt");
        std::fs::write(&file, "data").unwrap();
        assert_no_hardlinked_final_path(&file, PathAliasPolicy::Reject).unwrap();
    }

    #[test]
    fn hardlinked_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.txt");
        let link = dir.path().join("link.txt");
        std::fs::write(&original, "data").unwrap();
        std::fs::hard_link(&original, &link).unwrap();

        let err = assert_no_hardlinked_final_path(&link, PathAliasPolicy::Reject).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn unlink_policy_removes_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("original.txt");
        let link = dir.path().join("link.txt");
        std::fs::write(&original, "data").unwrap();
        std::fs::hard_link(&original, &link).unwrap();

        assert_no_hardlinked_final_path(&link, PathAliasPolicy::UnlinkTarget).unwrap();
        assert!(!link.exists());
        assert!(original.exists());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = assert_no_hardlinked_final_path(
            Path::new("/definitely/not/here"),
            PathAliasPolicy::Reject,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
