//! Safety engine: ordered rule evaluation over a candidate. The first rule
//! that denies wins; rule order is part of the contract.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use crate::core::paths;
use crate::safety::containment::{self, Containment};
use crate::safety::{SafetyConfig, SafetyVerdict};
use crate::scanner::{Candidate, CandidateKind};

/// Validates candidates against containment, mount-boundary, directory,
/// protected-path, allowed-root, and symlink-target rules.
///
/// Roots and protected paths are normalized once at construction. The engine
/// is cheap to clone and safe to share; `validate` reads live filesystem
/// state (lstat) for the containment rule, which is what makes execute-time
/// re-validation a TOCTOU defense.
#[derive(Debug, Clone)]
pub struct SafetyEngine {
    allowed_roots: Vec<PathBuf>,
    protected_paths: Vec<PathBuf>,
    allow_dir_delete: bool,
    enforce_mount_boundary: bool,
    allow_root_symlink: bool,
}

impl SafetyEngine {
    #[must_use]
    pub fn new(cfg: &SafetyConfig) -> Self {
        let normalize = |list: &[PathBuf]| {
            list.iter()
                .map(|p| paths::absolutize(p).unwrap_or_else(|_| p.clone()))
                .collect::<Vec<_>>()
        };
        Self {
            allowed_roots: normalize(&cfg.allowed_roots),
            protected_paths: normalize(&cfg.protected_paths),
            allow_dir_delete: cfg.allow_dir_delete,
            enforce_mount_boundary: cfg.enforce_mount_boundary,
            allow_root_symlink: cfg.allow_root_symlink,
        }
    }

    #[must_use]
    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    /// Run all safety rules in order; the first denial wins.
    #[must_use]
    pub fn validate(&self, candidate: &Candidate) -> SafetyVerdict {
        // 1. Root witness: with configured roots, every candidate must name
        //    the root it was discovered under.
        let has_roots = !self.allowed_roots.is_empty();
        if has_roots && candidate.root.as_os_str().is_empty() {
            return SafetyVerdict::deny("missing_candidate_root");
        }

        // 2. Containment against the witnessed root, on live lstat state.
        //    Skipped when the path is already gone; the executor reports
        //    that as already_gone, not as a stat failure.
        if std::fs::symlink_metadata(&candidate.path).is_ok() {
            let verdict = containment::check(&candidate.root, &candidate.path, self.allow_root_symlink);
            if let Containment::Denied(reason) = verdict {
                if reason == "outside_root" {
                    return SafetyVerdict::deny("outside_allowed_roots");
                }
                let symlink_denial = reason.starts_with("symlink_self:")
                    || reason.starts_with("symlink_ancestor:");
                if symlink_denial
                    && has_roots
                    && candidate.is_symlink
                    && self.link_escapes_roots(candidate)
                {
                    return SafetyVerdict::deny("symlink_escape");
                }
                return SafetyVerdict::deny(reason);
            }
        }

        // 3. Mount boundary (only when both device IDs are known).
        if self.enforce_mount_boundary
            && candidate.device_id != 0
            && candidate.root_device_id != 0
            && candidate.device_id != candidate.root_device_id
        {
            return SafetyVerdict::deny("mount_boundary");
        }

        // 4. Directory gate.
        if candidate.kind == CandidateKind::Dir && !self.allow_dir_delete {
            return SafetyVerdict::deny("dir_delete_disabled");
        }

        // 5. Protected paths (component-aligned; "/" protects only itself).
        for protected in &self.protected_paths {
            if is_protected_by(&candidate.path, protected) {
                return SafetyVerdict::deny("protected_path");
            }
        }

        // 6. Allowed roots.
        if has_roots && !self.under_any_root(&candidate.path) {
            return SafetyVerdict::deny("outside_allowed_roots");
        }

        // 7. Symlink target re-check: the link itself may sit inside a root
        //    while pointing out of it.
        if has_roots && candidate.is_symlink && self.link_escapes_roots(candidate) {
            return SafetyVerdict::deny("symlink_escape");
        }

        SafetyVerdict::allow()
    }

    fn under_any_root(&self, path: &Path) -> bool {
        let normalized = paths::absolutize(path).unwrap_or_else(|_| path.to_path_buf());
        self.allowed_roots
            .iter()
            .any(|root| paths::is_within(&normalized, root))
    }

    /// Whether the candidate's known link target, resolved against the link's
    /// directory, lands outside every allowed root. Unknown targets do not
    /// trigger the upgrade (the plain containment denial already stands).
    fn link_escapes_roots(&self, candidate: &Candidate) -> bool {
        let Some(target) = &candidate.link_target else {
            return false;
        };
        let resolved = paths::resolve_link_target(&candidate.path, target);
        !self
            .allowed_roots
            .iter()
            .any(|root| paths::is_within(&resolved, root))
    }
}

/// Component-aligned protected-path test. `"/"` protects only `"/"` itself,
/// never the entire tree.
fn is_protected_by(path: &Path, protected: &Path) -> bool {
    if protected == Path::new("/") {
        return path == Path::new("/");
    }
    paths::is_within(path, protected)
}
