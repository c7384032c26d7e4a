//! Path resolution used before any policy check.
//!
//! Policy decisions are only meaningful on canonical paths: a raw
//! caller-supplied string can hide a `..` traversal or a symlink into a
//! prohibited tree. [`resolve_path`] produces the form every check runs on.

use std::path::{Component, Path, PathBuf};

/// Replace a leading `~` component with the user's home directory.
///
/// Paths without a leading `~`, or a missing home directory, are returned
/// unchanged.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Resolve a caller-supplied path to the canonical absolute form.
///
/// `~` is expanded and relative paths are taken relative to `base`. The
/// result follows symlinks for every component that exists on disk.
pub fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    canonicalize_lenient(&absolute)
}

/// Canonicalize a path that may not fully exist yet.
///
/// Components are resolved one at a time. Every prefix that exists is
/// canonicalized by the OS, so a `..` always climbs out of the real
/// directory rather than out of a symlink's name. Components below the
/// first missing one are applied lexically until a `..` climbs back into
/// existing territory, where resolution resumes. A dangling symlink is
/// followed to its target.
pub fn canonicalize_lenient(path: &Path) -> PathBuf {
    resolve_components(PathBuf::new(), path, 0)
}

/// Bound on nested dangling-symlink hops, mirroring the kernel's `ELOOP`.
const MAX_LINK_HOPS: usize = 40;

fn resolve_components(mut current: PathBuf, path: &Path, hops: usize) -> PathBuf {
    // Number of trailing components of `current` that do not exist.
    let mut missing = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) => {
                current = PathBuf::from(component.as_os_str());
                missing = 0;
            }
            Component::RootDir => {
                current.push(component.as_os_str());
                missing = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                current.pop();
                missing = missing.saturating_sub(1);
            }
            Component::Normal(name) => {
                let candidate = current.join(name);
                if missing > 0 {
                    current = candidate;
                    missing += 1;
                    continue;
                }
                match std::fs::canonicalize(&candidate) {
                    Ok(real) => current = real,
                    Err(_) => match std::fs::read_link(&candidate) {
                        Ok(target) if hops < MAX_LINK_HOPS => {
                            current = resolve_components(current, &target, hops + 1);
                            missing = usize::from(!current.exists());
                        }
                        _ => {
                            current = candidate;
                            missing = 1;
                        }
                    },
                }
            }
        }
    }

    current
}
