//! Filesystem helpers: mtimes and output removal.

use std::time::{SystemTime, UNIX_EPOCH};

/// MTime info gathered for a file.  This also models "file is absent".
/// It's not using an Option<> just because it makes the code using it easier
/// to follow.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MTime {
    Missing,
    Stamp(u64),
}

/// stat() an on-disk path, producing its MTime in seconds since the epoch.
/// Existence and timestamp come from one syscall; callers on network
/// filesystems care.
pub fn stat(path: &str) -> std::io::Result<MTime> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let secs = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            Ok(MTime::Stamp(secs))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(MTime::Missing),
        Err(err) => Err(err),
    }
}

/// The current time on the stat() scale.
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Delete a file or directory tree.  A path that is already gone is fine.
pub fn remove_path(path: &str) -> std::io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
