//! Resolution of `open`/`openat` path arguments to absolute paths.

use libc::c_int;
use std::ffi::{CStr, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Absolute form of `path` as the kernel would look it up relative to `dirfd`.
///
/// Returns `None` when the base cannot be determined: an unreadable working
/// directory, a bad descriptor, or a descriptor that is not a directory on the
/// filesystem (sockets, eventfds, emulated devices). The result is not
/// normalized.
pub fn resolve_at(dirfd: c_int, path: &CStr) -> Option<PathBuf> {
    let bytes = path.to_bytes();
    if bytes.is_empty() {
        return None;
    }
    let path = Path::new(OsStr::from_bytes(bytes));
    if path.is_absolute() {
        return Some(path.to_path_buf());
    }

    let base = if dirfd == libc::AT_FDCWD {
        std::env::current_dir().ok()?
    } else {
        descriptor_path(dirfd)?
    };
    Some(base.join(path))
}

/// Filesystem path behind an open descriptor, via `/proc/self/fd`.
pub fn descriptor_path(fd: c_int) -> Option<PathBuf> {
    if fd < 0 {
        return None;
    }
    let target = std::fs::read_link(format!("/proc/self/fd/{}", fd)).ok()?;
    // anon inodes read back as "anon_inode:[eventfd]" and friends
    target.is_absolute().then_some(target)
}
