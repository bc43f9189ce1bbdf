//! Executor: the only component that mutates the filesystem.
//!
//! Before every action the safety engine is re-run against live lstat state,
//! so a path whose ancestor was swapped for a symlink between plan time and
//! execute time is refused (`safety_deny_execute:…`) instead of followed.
//! Every outcome, including failures, is an `ActionResult`; nothing here
//! panics upward.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::config::RunMode;
use crate::pipeline::{ActionResult, PlanItem};
use crate::safety::SafetyEngine;
use crate::scanner::{Candidate, CandidateKind};

/// Sequential deletion executor. Deletion is I/O-bound and serialization
/// keeps audit ordering simple, so there is exactly one of these per run.
pub struct Executor {
    safety: SafetyEngine,
    /// When set, deletions become same-mount moves into this directory.
    trash_dir: Option<PathBuf>,
}

impl Executor {
    #[must_use]
    pub fn new(safety: SafetyEngine, trash_dir: Option<PathBuf>) -> Self {
        Self { safety, trash_dir }
    }

    /// Apply one plan item under the given mode.
    #[must_use]
    pub fn execute(&self, item: &PlanItem, mode: RunMode) -> ActionResult {
        let path = item.candidate.path.clone();

        // 1. Gate short-circuit: items denied at plan time are never attempted.
        if !item.decision.allow {
            return ActionResult::skip(path, format!("policy_deny:{}", item.decision.reason));
        }
        if !item.verdict.allowed {
            return ActionResult::skip(path, format!("safety_deny:{}", item.verdict.reason));
        }

        // 2. Re-validate against current filesystem state.
        let live = refresh_candidate(&item.candidate);
        let verdict = self.safety.validate(&live);
        if !verdict.allowed {
            return ActionResult::skip(path, format!("safety_deny_execute:{}", verdict.reason));
        }

        // 3. Dry-run never touches the filesystem.
        if mode == RunMode::DryRun {
            return ActionResult {
                path,
                deleted: false,
                bytes_freed: 0,
                reason: "would_delete".to_string(),
                error: None,
                trash_path: None,
            };
        }

        // 4. Execute.
        if let Some(trash_dir) = &self.trash_dir {
            return trash_move(&item.candidate, trash_dir);
        }
        delete_in_place(&item.candidate, &live)
    }
}

/// Unlink a file or remove an (empty) directory. Directory removal is
/// non-recursive: a populated directory fails rather than cascading.
fn delete_in_place(planned: &Candidate, live: &Candidate) -> ActionResult {
    let path = planned.path.clone();
    let outcome = match live.kind {
        CandidateKind::Dir => fs::remove_dir(&path),
        CandidateKind::File => fs::remove_file(&path),
    };

    match outcome {
        Ok(()) => ActionResult {
            path,
            deleted: true,
            bytes_freed: planned.size_bytes,
            reason: "deleted".to_string(),
            error: None,
            trash_path: None,
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => ActionResult {
            path,
            deleted: false,
            bytes_freed: 0,
            reason: "already_gone".to_string(),
            error: None,
            trash_path: None,
        },
        Err(err) => ActionResult {
            path,
            deleted: false,
            bytes_freed: 0,
            reason: "delete_failed".to_string(),
            error: Some(err.to_string()),
            trash_path: None,
        },
    }
}

/// Soft-delete: rename into the trash directory on the same mount. The rename
/// frees no space, so `bytes_freed` stays 0 even though `deleted` holds.
fn trash_move(planned: &Candidate, trash_dir: &Path) -> ActionResult {
    let path = planned.path.clone();

    if let Err(err) = fs::create_dir_all(trash_dir) {
        return ActionResult {
            path,
            deleted: false,
            bytes_freed: 0,
            reason: "delete_failed".to_string(),
            error: Some(format!("trash dir: {err}")),
            trash_path: None,
        };
    }

    let dest = unique_trash_name(trash_dir, &path);
    match fs::rename(&path, &dest) {
        Ok(()) => ActionResult {
            path,
            deleted: true,
            bytes_freed: 0,
            reason: "deleted".to_string(),
            error: None,
            trash_path: Some(dest),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => ActionResult {
            path,
            deleted: false,
            bytes_freed: 0,
            reason: "already_gone".to_string(),
            error: None,
            trash_path: None,
        },
        Err(err) => ActionResult {
            path,
            deleted: false,
            bytes_freed: 0,
            reason: "delete_failed".to_string(),
            error: Some(err.to_string()),
            trash_path: None,
        },
    }
}

/// Pick a non-colliding name inside the trash directory.
fn unique_trash_name(trash_dir: &Path, path: &Path) -> PathBuf {
    let base = path
        .file_name()
        .map_or_else(|| "item".to_string(), |n| n.to_string_lossy().into_owned());
    let mut dest = trash_dir.join(&base);
    let mut counter = 1u32;
    while dest.exists() {
        dest = trash_dir.join(format!("{base}.{counter}"));
        counter += 1;
    }
    dest
}

/// Rebuild the mutable parts of a candidate from live lstat state. A path
/// that no longer exists keeps its planned shape; the safety engine skips
/// containment for missing paths and the deletion step reports
/// `already_gone`.
fn refresh_candidate(planned: &Candidate) -> Candidate {
    let mut live = planned.clone();
    if let Ok(meta) = fs::symlink_metadata(&planned.path) {
        live.kind = if meta.is_dir() {
            CandidateKind::Dir
        } else {
            CandidateKind::File
        };
        live.is_symlink = meta.file_type().is_symlink();
        live.link_target = if live.is_symlink {
            fs::read_link(&planned.path).ok()
        } else {
            None
        };
        live.size_bytes = meta.len();
        live.device_id = crate::scanner::walker::device_id(&meta);
    }
    live
}
