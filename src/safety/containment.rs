//! Root-containment check: can deleting a path escape its allowed root
//! through a symlink at any ancestor or at the path itself?
//!
//! The walk is purely lexical plus `lstat`: no symlink is ever followed, and
//! any stat failure denies (fail-closed). The executor re-runs this check
//! immediately before each unlink, so a mid-flight swap of an ancestor
//! directory for a symlink aborts the deletion rather than following it.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use crate::core::paths;

/// Outcome of a containment check. `Denied` carries the machine reason tag
/// (`outside_root`, `symlink_self:<path>`, `symlink_ancestor:<path>`,
/// `stat_error:<detail>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Containment {
    Contained,
    Denied(String),
}

impl Containment {
    /// Whether the verdict allows the path.
    #[must_use]
    pub const fn is_contained(&self) -> bool {
        matches!(self, Self::Contained)
    }
}

/// Check that `candidate` is lexically under `root` and that no component
/// between them (nor the candidate itself) is a symlink.
///
/// With `allow_root_symlink` false, the root itself is also required to be a
/// real directory.
#[must_use]
pub fn check(root: &Path, candidate: &Path, allow_root_symlink: bool) -> Containment {
    let Ok(root) = paths::absolutize(root) else {
        return Containment::Denied("stat_error:root".to_string());
    };
    let Ok(candidate) = paths::absolutize(candidate) else {
        return Containment::Denied("stat_error:candidate".to_string());
    };

    if !allow_root_symlink {
        match fs::symlink_metadata(&root) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Containment::Denied(format!("symlink_ancestor:{}", root.display()));
            }
            Ok(_) => {}
            Err(err) => {
                return Containment::Denied(format!("stat_error:{err}"));
            }
        }
    }

    if candidate == root {
        return Containment::Contained;
    }
    let Ok(rel) = candidate.strip_prefix(&root) else {
        return Containment::Denied("outside_root".to_string());
    };

    // Walk from the root down, one component at a time, lstat-ing each
    // accumulated prefix. A trailing symlink is reported as the candidate
    // itself; any other symlink is an ancestor.
    let components: Vec<_> = rel.components().collect();
    let mut acc = root;
    for (index, component) in components.iter().enumerate() {
        acc.push(component);
        match fs::symlink_metadata(&acc) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let tag = if index + 1 == components.len() {
                    "symlink_self"
                } else {
                    "symlink_ancestor"
                };
                return Containment::Denied(format!("{tag}:{}", acc.display()));
            }
            Ok(_) => {}
            Err(err) => {
                return Containment::Denied(format!("stat_error:{err}"));
            }
        }
    }

    Containment::Contained
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn plain_descendant_is_contained() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("work/cache")).unwrap();
        fs::write(tmp.path().join("work/cache/file.bin"), "x").unwrap();

        let verdict = check(tmp.path(), &tmp.path().join("work/cache/file.bin"), true);
        assert!(verdict.is_contained());
    }

    #[test]
    fn root_itself_is_contained() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(check(tmp.path(), tmp.path(), true), Containment::Contained);
    }

    #[test]
    fn path_outside_root_is_denied() {
        let tmp = TempDir::new().unwrap();
        let verdict = check(tmp.path(), Path::new("/etc/passwd"), true);
        assert_eq!(verdict, Containment::Denied("outside_root".to_string()));
    }

    #[test]
    fn lexical_escape_via_dotdot_is_denied() {
        let tmp = TempDir::new().unwrap();
        let sneaky = tmp.path().join("sub/../../outside");
        let verdict = check(tmp.path(), &sneaky, true);
        assert_eq!(verdict, Containment::Denied("outside_root".to_string()));
    }

    #[test]
    fn missing_path_is_stat_error() {
        let tmp = TempDir::new().unwrap();
        let verdict = check(tmp.path(), &tmp.path().join("never/created"), true);
        match verdict {
            Containment::Denied(reason) => assert!(reason.starts_with("stat_error:")),
            Containment::Contained => panic!("missing path must fail closed"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_candidate_is_symlink_self() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("link.log");
        std::os::unix::fs::symlink("/etc/shadow", &link).unwrap();

        match check(tmp.path(), &link, true) {
            Containment::Denied(reason) => {
                assert!(reason.starts_with("symlink_self:"), "got {reason}");
                assert!(reason.contains("link.log"));
            }
            Containment::Contained => panic!("symlink candidate must be denied"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_ancestor_is_denied() {
        let tmp = TempDir::new().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(outside.join("cache")).unwrap();
        fs::write(outside.join("cache/file.bin"), "x").unwrap();

        let root = tmp.path().join("root");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("work")).unwrap();

        match check(&root, &root.join("work/cache/file.bin"), true) {
            Containment::Denied(reason) => {
                assert!(reason.starts_with("symlink_ancestor:"), "got {reason}");
                assert!(reason.contains("work"));
            }
            Containment::Contained => panic!("ancestor symlink must be denied"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn deep_ancestor_symlink_detected_at_any_level() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        fs::create_dir_all(real.join("b/c")).unwrap();
        fs::write(real.join("b/c/f"), "x").unwrap();

        let root = tmp.path().join("root");
        fs::create_dir_all(root.join("a")).unwrap();
        std::os::unix::fs::symlink(&real, root.join("a/mid")).unwrap();

        match check(&root, &root.join("a/mid/b/c/f"), true) {
            Containment::Denied(reason) => {
                assert!(reason.starts_with("symlink_ancestor:"));
            }
            Containment::Contained => panic!("deep ancestor symlink must be denied"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn symlink_root_honored_by_option() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real");
        fs::create_dir(&real).unwrap();
        fs::write(real.join("f.tmp"), "x").unwrap();
        let link_root = tmp.path().join("alias");
        std::os::unix::fs::symlink(&real, &link_root).unwrap();

        // Permissive: symlinked root accepted, file checked beneath it.
        assert_eq!(
            check(&link_root, &link_root.join("f.tmp"), true),
            Containment::Contained
        );

        // Strict: the root itself is rejected.
        match check(&link_root, &link_root.join("f.tmp"), false) {
            Containment::Denied(reason) => assert!(reason.starts_with("symlink_ancestor:")),
            Containment::Contained => panic!("strict mode must reject a symlink root"),
        }
    }

    #[test]
    fn sibling_prefix_is_outside_root() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data/a");
        let sibling = tmp.path().join("data/abc");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&sibling).unwrap();

        assert_eq!(
            check(&root, &sibling, true),
            Containment::Denied("outside_root".to_string())
        );
    }
}
