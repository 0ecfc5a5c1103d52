//! Path normalization shared by the device table and open-time classification.
//!
//! Both sides must agree byte for byte, so configured device paths and the
//! paths applications pass to `open` go through the same routine.

use std::path::{Component, Path, PathBuf};

/// Resolve `.`, `..` and repeated separators without touching the filesystem.
///
/// `..` at the root stays at the root, like the kernel's lookup.
pub fn normalize_lexical(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Normalize a device path: lexical cleanup, then symlink resolution when the
/// target exists (`/dev/v4l/by-id/...` style aliases).
pub fn normalize_device_path(path: &Path) -> PathBuf {
    let lexical = normalize_lexical(path);
    lexical.canonicalize().unwrap_or(lexical)
}
