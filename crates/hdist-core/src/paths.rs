//! Lexical path manipulation for `PWD` tracking.
//!
//! The interpreter tracks the working directory as an environment
//! variable, so `chdir` arithmetic has to happen on paths that may not
//! exist yet. These helpers therefore work purely lexically and never
//! touch the filesystem.

use std::path::{Component, Path, PathBuf};

/// Normalizes a path lexically: `.` components are dropped and `..`
/// components pop their parent where possible. `..` at the root stays at
/// the root; leading `..` on a relative path is preserved.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(prefix) => out.push(prefix.as_os_str()),
            Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    let _ = out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            Component::Normal(part) => out.push(part),
        }
    }
    out
}

/// Joins `path` onto `base` (unless `path` is already absolute) and
/// normalizes the result.
#[must_use]
pub fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        normalize_path(&base.join(path))
    }
}
