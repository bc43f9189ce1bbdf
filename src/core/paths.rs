//! Lexical path utilities for the containment and safety layers.
//!
//! Everything here is purely syntactic: no function in this module ever
//! follows a symlink. The containment check requires that; `fs::canonicalize`
//! would resolve the very ancestor links the safety engine must detect.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::core::errors::{Result, SsgError};

/// Make a path absolute (against the current working directory) and resolve
/// `.`/`..` components lexically, without touching the filesystem.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = env::current_dir().map_err(|source| SsgError::StatError {
            path: path.to_path_buf(),
            details: format!("cannot resolve working directory: {source}"),
        })?;
        cwd.join(path)
    };
    Ok(normalize_lexical(&absolute))
}

/// Resolve `.` and `..` components syntactically. `..` at the root is dropped.
pub fn normalize_lexical(path: &Path) -> PathBuf {
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

/// Component-aligned prefix test: is `path` equal to `base` or a proper
/// descendant of it?
///
/// `"/data/a"` is not a prefix of `"/data/abc"`, and `"/"` is a prefix of
/// every absolute path (callers that must treat `"/"` specially do so
/// themselves).
pub fn is_within(path: &Path, base: &Path) -> bool {
    path.starts_with(base)
}

/// Resolve a symlink target string against the directory containing the link,
/// lexically. Absolute targets pass through untouched (modulo normalization).
pub fn resolve_link_target(link_path: &Path, target: &Path) -> PathBuf {
    if target.is_absolute() {
        return normalize_lexical(target);
    }
    let parent = link_path.parent().unwrap_or_else(|| Path::new("/"));
    normalize_lexical(&parent.join(target))
}
