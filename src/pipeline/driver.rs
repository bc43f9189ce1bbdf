//! Pipeline driver: wires scanner → planner → executor for one run,
//! coordinates audit events, and enforces the run deadline.
//!
//! Ordering guarantees: all plan events are appended before any execute
//! event, and for a single item the plan event precedes its execute event.
//! Audit events already appended stay durable across cancellation.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;

use crate::audit::{AuditAction, AuditEvent, AuditLevel, AuditStore};
use crate::core::cancel::CancelToken;
use crate::core::config::RunMode;
use crate::core::errors::{Result, SsgError};
use crate::logger::Logger;
use crate::metrics::{self, Metrics};
use crate::pipeline::executor::Executor;
use crate::pipeline::{ActionResult, PlanItem, planner};
use crate::policy::{EnvSnapshot, Policy};
use crate::safety::SafetyEngine;
use crate::scanner::{CandidateKind, ScanRequest, walker};

/// Everything a single run produced.
#[derive(Debug)]
pub struct RunReport {
    pub mode: RunMode,
    pub plan: Vec<PlanItem>,
    pub results: Vec<ActionResult>,
    pub scan_errors: usize,
    pub deleted: usize,
    pub bytes_freed: u64,
}

impl RunReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.plan.len()
    }

    #[must_use]
    pub fn policy_allowed(&self) -> usize {
        self.plan.iter().filter(|i| i.decision.allow).count()
    }

    #[must_use]
    pub fn safety_allowed(&self) -> usize {
        self.plan.iter().filter(|i| i.verdict.allowed).count()
    }

    #[must_use]
    pub fn eligible(&self) -> usize {
        self.plan.iter().filter(|i| i.eligible()).count()
    }

    #[must_use]
    pub fn eligible_bytes(&self) -> u64 {
        self.plan
            .iter()
            .filter(|i| i.eligible() && i.candidate.kind == CandidateKind::File)
            .map(|i| i.candidate.size_bytes)
            .sum()
    }

    /// Histogram over decision and verdict reason tags across the whole plan.
    #[must_use]
    pub fn reason_histogram(&self) -> BTreeMap<String, u64> {
        let mut histogram = BTreeMap::new();
        for item in &self.plan {
            *histogram.entry(item.decision.reason.clone()).or_insert(0) += 1;
            *histogram
                .entry(item.verdict.tag().to_string())
                .or_insert(0) += 1;
        }
        histogram
    }

    /// Human summary block plus the first `max_items` plan lines in canonical
    /// order (`path | score | policy=<reason> | safety=<reason>`).
    #[must_use]
    pub fn render(&self, max_items: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run mode:        {}", self.mode);
        let _ = writeln!(out, "candidates:      {}", self.total());
        let _ = writeln!(out, "policy allowed:  {}", self.policy_allowed());
        let _ = writeln!(out, "safety allowed:  {}", self.safety_allowed());
        let _ = writeln!(
            out,
            "eligible:        {} ({})",
            self.eligible(),
            human_bytes(self.eligible_bytes())
        );
        let _ = writeln!(
            out,
            "deleted:         {} ({})",
            self.deleted,
            human_bytes(self.bytes_freed)
        );
        let _ = writeln!(out, "scan errors:     {}", self.scan_errors);

        let histogram = self.reason_histogram();
        if !histogram.is_empty() {
            let mut reasons: Vec<(&String, &u64)> = histogram.iter().collect();
            reasons.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
            let _ = writeln!(out, "top reasons:");
            for (reason, count) in reasons.iter().take(8) {
                let _ = writeln!(out, "  {reason:<24} {count}");
            }
        }

        let shown = self.plan.len().min(max_items);
        let _ = writeln!(out, "plan (showing {shown} of {}):", self.plan.len());
        for item in self.plan.iter().take(max_items) {
            let _ = writeln!(
                out,
                "  {} | {} | policy={} | safety={}",
                item.candidate.path.display(),
                item.decision.score,
                item.decision.reason,
                item.verdict.reason
            );
        }
        out
    }
}

/// One-run orchestrator. Logger, metrics, and audit sinks are injected; their
/// lifecycle is bounded by the `run` call.
pub struct PipelineDriver {
    policy: Policy,
    safety: SafetyEngine,
    executor: Executor,
    audit: Vec<Box<dyn AuditStore>>,
    logger: Logger,
    metrics: Metrics,
}

impl PipelineDriver {
    #[must_use]
    pub fn new(
        policy: Policy,
        safety: SafetyEngine,
        executor: Executor,
        audit: Vec<Box<dyn AuditStore>>,
        logger: Logger,
        metrics: Metrics,
    ) -> Self {
        Self {
            policy,
            safety,
            executor,
            audit,
            logger,
            metrics,
        }
    }

    /// Run the full pipeline once: scan, plan, audit, and (in execute mode)
    /// delete. The run is bounded by `timeout`.
    pub fn run(
        &self,
        request: ScanRequest,
        mode: RunMode,
        timeout: Duration,
    ) -> Result<RunReport> {
        self.run_with_token(request, mode, timeout, CancelToken::new())
    }

    /// Like [`Self::run`] with a caller-owned cancellation token (signal
    /// handlers, daemon host shutdown).
    pub fn run_with_token(
        &self,
        request: ScanRequest,
        mode: RunMode,
        timeout: Duration,
        cancel: CancelToken,
    ) -> Result<RunReport> {
        let env = EnvSnapshot::capture();

        // Deadline watchdog: flips the shared token, which every blocking
        // point in the pipeline observes.
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let timer = channel::after(timeout);
        let watchdog_cancel = cancel.clone();
        let watchdog = thread::spawn(move || {
            channel::select! {
                recv(timer) -> _ => watchdog_cancel.cancel("timeout"),
                recv(done_rx) -> _ => {}
            }
        });

        let outcome = self.run_inner(request, mode, &env, &cancel);

        drop(done_tx);
        let _ = watchdog.join();
        self.logger.flush();
        outcome
    }

    fn run_inner(
        &self,
        request: ScanRequest,
        mode: RunMode,
        env: &EnvSnapshot,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        self.logger.info(&format!(
            "starting {mode} run over {} root(s)",
            request.roots.len()
        ));

        let scan = walker::spawn_scan(request, cancel.clone());
        let plan_result = planner::build_plan(
            &scan.candidates,
            &self.policy,
            &self.safety,
            env,
            cancel,
            &self.metrics,
        );

        // Wait for the walker to exit (prompt under cancellation), then
        // drain its side channel.
        let errors_rx = scan.errors.clone();
        scan.join();
        let mut scan_errors = 0usize;
        for err in errors_rx.try_iter() {
            if err.is_cancellation() {
                continue;
            }
            scan_errors += 1;
            self.logger.warn(&format!(
                "scan error [{}] at {}: {}",
                err.reason,
                err.path
                    .as_deref()
                    .map_or_else(|| "<unknown>".to_string(), |p| p.display().to_string()),
                err.detail
            ));
        }

        let plan = plan_result?;

        // Plan events precede every execute event.
        for item in &plan {
            self.record_plan_event(item, mode)?;
        }

        let mut results = Vec::new();
        let mut deleted = 0usize;
        let mut bytes_freed = 0u64;
        for item in plan.iter().filter(|i| i.eligible()) {
            // The executor aborts between items, never mid-unlink.
            if cancel.is_cancelled() {
                return Err(SsgError::Cancelled {
                    reason: cancel.reason(),
                });
            }

            let result = self.executor.execute(item, mode);
            if mode == RunMode::Execute {
                self.record_execute_event(item, &result)?;
                if result.deleted {
                    deleted += 1;
                    bytes_freed += result.bytes_freed;
                    self.metrics.incr(metrics::FILES_DELETED_TOTAL);
                    self.metrics.add(metrics::BYTES_FREED_TOTAL, result.bytes_freed);
                }
            }
            results.push(result);
        }

        self.metrics.mark_run_finished();
        self.logger.info(&format!(
            "run complete: {} candidate(s), {} deleted, {} freed",
            plan.len(),
            deleted,
            human_bytes(bytes_freed)
        ));

        Ok(RunReport {
            mode,
            plan,
            results,
            scan_errors,
            deleted,
            bytes_freed,
        })
    }

    fn record_plan_event(&self, item: &PlanItem, mode: RunMode) -> Result<()> {
        let mod_time: chrono::DateTime<chrono::Utc> = item.candidate.mod_time.into();
        let event = AuditEvent::new(
            AuditAction::Plan,
            AuditLevel::Info,
            mode,
            &item.candidate.path.to_string_lossy(),
            &item.candidate.root.to_string_lossy(),
        )
        .with_field("decision_reason", serde_json::json!(item.decision.reason))
        .with_field("decision_allow", serde_json::json!(item.decision.allow))
        .with_field("decision_score", serde_json::json!(item.decision.score))
        .with_field("safety_reason", serde_json::json!(item.verdict.reason))
        .with_field("safety_allow", serde_json::json!(item.verdict.allowed))
        .with_field("size_bytes", serde_json::json!(item.candidate.size_bytes))
        .with_field(
            "mod_time",
            serde_json::json!(mod_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        self.record(event)
    }

    fn record_execute_event(&self, item: &PlanItem, result: &ActionResult) -> Result<()> {
        let (action, level) = if result.deleted {
            (AuditAction::Delete, AuditLevel::Info)
        } else if result.reason == "already_gone" {
            (AuditAction::Skip, AuditLevel::Info)
        } else if result.reason.starts_with("safety_deny_execute:") {
            (AuditAction::Skip, AuditLevel::Warn)
        } else {
            (AuditAction::Error, AuditLevel::Error)
        };

        let mut event = AuditEvent::new(
            action,
            level,
            RunMode::Execute,
            &result.path.to_string_lossy(),
            &item.candidate.root.to_string_lossy(),
        )
        .with_field("result_reason", serde_json::json!(result.reason))
        .with_field("deleted", serde_json::json!(result.deleted))
        .with_field("bytes_freed", serde_json::json!(result.bytes_freed));
        if let Some(error) = &result.error {
            event = event.with_field("error", serde_json::json!(error));
        }
        if let Some(trash) = &result.trash_path {
            event = event.with_field(
                "trash_path",
                serde_json::json!(trash.to_string_lossy()),
            );
        }
        self.record(event)
    }

    /// Append to every configured audit sink. A write failure is fatal to the
    /// run: an unauditable deletion must not happen.
    fn record(&self, event: AuditEvent) -> Result<()> {
        for store in &self.audit {
            store.record(event.clone())?;
        }
        Ok(())
    }
}

/// Render a byte count with a binary-unit suffix.
#[must_use]
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::jsonl::JsonlAuditStore;
    use crate::audit::{AuditFilter, AuditStore};
    use crate::policy::CompositeMode;
    use crate::safety::SafetyConfig;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const HOUR: Duration = Duration::from_secs(3_600);

    fn driver_for(root: &Path, audit: Vec<Box<dyn AuditStore>>) -> PipelineDriver {
        let safety = SafetyEngine::new(&SafetyConfig {
            allowed_roots: vec![root.to_path_buf()],
            allow_root_symlink: true,
            ..SafetyConfig::default()
        });
        PipelineDriver::new(
            Policy::Composite {
                mode: CompositeMode::And,
                children: vec![Policy::Age { min_age_days: 0 }],
            },
            safety.clone(),
            Executor::new(safety, None),
            audit,
            Logger::stderr(crate::logger::Level::Error),
            Metrics::new(true),
        )
    }

    fn request(root: &Path) -> ScanRequest {
        ScanRequest {
            roots: vec![root.to_path_buf()],
            recursive: true,
            max_depth: -1,
            include_files: true,
            include_dirs: false,
        }
    }

    #[test]
    fn dry_run_produces_results_but_no_execute_events() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.tmp"), "aa").unwrap();
        fs::write(root.join("b.tmp"), "bb").unwrap();

        // Audit log deliberately outside the scan root.
        let audit_path = tmp.path().join("state/audit.jsonl");
        let store = JsonlAuditStore::open(&audit_path).unwrap();
        let driver = driver_for(&root, vec![Box::new(store)]);

        let report = driver.run(request(&root), RunMode::DryRun, HOUR).unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.results.len(), 2);
        assert!(report.results.iter().all(|r| r.reason == "would_delete"));
        assert!(root.join("a.tmp").exists());
        assert!(root.join("b.tmp").exists());

        let store = JsonlAuditStore::open(&audit_path).unwrap();
        let events = store.query(&AuditFilter::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.action == AuditAction::Plan));
    }

    #[test]
    fn execute_deletes_and_audits_in_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("data");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("old.tmp"), "0123456789").unwrap();

        let audit_path = tmp.path().join("state/audit.jsonl");
        let store = JsonlAuditStore::open(&audit_path).unwrap();
        let driver = driver_for(&root, vec![Box::new(store)]);

        let report = driver.run(request(&root), RunMode::Execute, HOUR).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.bytes_freed, 10);
        assert!(!root.join("old.tmp").exists());

        let store = JsonlAuditStore::open(&audit_path).unwrap();
        let events = store.query(&AuditFilter::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Plan);
        assert_eq!(events[1].action, AuditAction::Delete);
        assert!(store.verify_integrity().unwrap().is_empty());
    }

    #[test]
    fn cancelled_token_aborts_the_run() {
        let tmp = TempDir::new().unwrap();
        for i in 0..20 {
            fs::write(tmp.path().join(format!("f{i:02}.tmp")), "x").unwrap();
        }

        let cancel = crate::core::cancel::CancelToken::new();
        cancel.cancel("timeout");
        let driver = driver_for(tmp.path(), Vec::new());
        let err = driver
            .run_with_token(request(tmp.path()), RunMode::DryRun, HOUR, cancel)
            .unwrap_err();
        assert_eq!(err.code(), "SSG-3201");
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn scan_errors_are_counted_not_fatal() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("ok.tmp"), "x").unwrap();

        let driver = driver_for(tmp.path(), Vec::new());
        let req = ScanRequest {
            roots: vec![
                std::path::PathBuf::from("/definitely/does/not/exist"),
                tmp.path().to_path_buf(),
            ],
            recursive: true,
            max_depth: -1,
            include_files: true,
            include_dirs: false,
        };
        let report = driver.run(req, RunMode::DryRun, HOUR).unwrap();
        assert_eq!(report.scan_errors, 1);
        assert_eq!(report.total(), 1);
    }

    #[test]
    fn render_shows_summary_and_canonical_lines() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.tmp"), "aaaa").unwrap();

        let driver = driver_for(tmp.path(), Vec::new());
        let report = driver
            .run(request(tmp.path()), RunMode::DryRun, HOUR)
            .unwrap();

        let text = report.render(10);
        assert!(text.contains("candidates:      1"));
        assert!(text.contains("| policy=age_ok | safety=ok"));
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
