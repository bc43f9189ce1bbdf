//! Planner: drain the candidate stream, run both gates exactly once per
//! candidate, and produce the canonically ordered plan.
//!
//! The sort is total and deterministic; it is the order used by both the
//! audit log and the display:
//! 1. items allowed by both gates first,
//! 2. higher policy score,
//! 3. larger size,
//! 4. older modification time,
//! 5. lexicographic path.

#![allow(clippy::cast_precision_loss)]

use std::cmp::Ordering;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::core::cancel::CancelToken;
use crate::core::errors::{Result, SsgError};
use crate::metrics::{self, Metrics};
use crate::pipeline::PlanItem;
use crate::policy::{EnvSnapshot, Policy};
use crate::safety::SafetyEngine;
use crate::scanner::{Candidate, CandidateKind};

/// Poll interval for cancellation while the candidate queue is empty.
const RECV_POLL: Duration = Duration::from_millis(50);

/// Drain `candidates` to completion, evaluating policy and safety per item,
/// and return the sorted plan. Cancellation returns the cancellation error
/// and no plan.
pub fn build_plan(
    candidates: &channel::Receiver<Candidate>,
    policy: &Policy,
    safety: &SafetyEngine,
    env: &EnvSnapshot,
    cancel: &CancelToken,
    metrics: &Metrics,
) -> Result<Vec<PlanItem>> {
    let mut items = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(SsgError::Cancelled {
                reason: cancel.reason(),
            });
        }
        match candidates.recv_timeout(RECV_POLL) {
            Ok(candidate) => {
                metrics.incr(metrics::FILES_SCANNED_TOTAL);

                let decision = policy.evaluate(&candidate, env);
                let verdict = safety.validate(&candidate);

                metrics.incr_labeled("decision_reason", "reason", &decision.reason);
                metrics.incr_labeled(
                    "decision_allow",
                    "allow",
                    if decision.allow { "true" } else { "false" },
                );
                metrics.incr_labeled("safety_reason", "reason", verdict.tag());
                metrics.incr_labeled(
                    "safety_allow",
                    "allow",
                    if verdict.allowed { "true" } else { "false" },
                );

                items.push(PlanItem {
                    candidate,
                    decision,
                    verdict,
                });
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
            Err(channel::RecvTimeoutError::Disconnected) => break,
        }
    }

    items.sort_by(plan_order);

    let (eligible_files, eligible_bytes) = items
        .iter()
        .filter(|item| item.eligible() && item.candidate.kind == CandidateKind::File)
        .fold((0u64, 0u64), |(n, bytes), item| {
            (n + 1, bytes + item.candidate.size_bytes)
        });
    metrics.set_gauge(metrics::ELIGIBLE_FILES, eligible_files as f64);
    metrics.set_gauge(metrics::ELIGIBLE_BYTES, eligible_bytes as f64);

    Ok(items)
}

/// The canonical five-key comparison.
pub fn plan_order(a: &PlanItem, b: &PlanItem) -> Ordering {
    b.eligible()
        .cmp(&a.eligible())
        .then_with(|| b.decision.score.cmp(&a.decision.score))
        .then_with(|| b.candidate.size_bytes.cmp(&a.candidate.size_bytes))
        .then_with(|| a.candidate.mod_time.cmp(&b.candidate.mod_time))
        .then_with(|| a.candidate.path.cmp(&b.candidate.path))
}
