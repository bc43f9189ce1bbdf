//! Reclamation pipeline: planner, executor, and the driver that wires the
//! scanner stream through both gates into the audit log.

#![allow(missing_docs)]

pub mod driver;
pub mod executor;
pub mod planner;

use std::path::PathBuf;

use crate::policy::Decision;
use crate::safety::SafetyVerdict;
use crate::scanner::Candidate;

/// One planned action: a candidate annotated with its policy decision and
/// safety verdict. Immutable once the planner emits it.
#[derive(Debug, Clone)]
pub struct PlanItem {
    pub candidate: Candidate,
    pub decision: Decision,
    pub verdict: SafetyVerdict,
}

impl PlanItem {
    /// Both gates allow: the item may be attempted in execute mode.
    #[must_use]
    pub const fn eligible(&self) -> bool {
        self.decision.allow && self.verdict.allowed
    }
}

/// Outcome of one execute attempt. The executor produces one of these for
/// every plan item it is handed; it never panics upward.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub path: PathBuf,
    pub deleted: bool,
    pub bytes_freed: u64,
    /// Machine tag: `deleted`, `would_delete`, `already_gone`,
    /// `delete_failed`, `policy_deny:<tag>`, `safety_deny:<tag>`,
    /// `safety_deny_execute:<tag>`.
    pub reason: String,
    /// OS error detail for `delete_failed`.
    pub error: Option<String>,
    /// Destination when the item was moved to trash instead of unlinked.
    pub trash_path: Option<PathBuf>,
}

impl ActionResult {
    pub(crate) fn skip(path: PathBuf, reason: String) -> Self {
        Self {
            path,
            deleted: false,
            bytes_freed: 0,
            reason,
            error: None,
            trash_path: None,
        }
    }
}
