//! Top-level CLI definition and dispatch.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use clap::{ArgGroup, Args, Parser, Subcommand};
use colored::Colorize;

use storage_sage::audit::jsonl::JsonlAuditStore;
#[cfg(feature = "sqlite")]
use storage_sage::audit::sqlite::SqliteAuditStore;
use storage_sage::audit::stats::compute;
use storage_sage::audit::{AuditAction, AuditFilter, AuditLevel, AuditStore};
use storage_sage::core::config::{Config, RunMode};
use storage_sage::core::duration;
use storage_sage::core::errors::{Result, SsgError};
use storage_sage::logger::Logger;
use storage_sage::metrics::Metrics;
use storage_sage::pipeline::driver::PipelineDriver;
use storage_sage::pipeline::executor::Executor;
use storage_sage::policy::{CompositeMode, Policy};
use storage_sage::safety::{SafetyConfig, SafetyEngine};
use storage_sage::scanner::ScanRequest;

/// Storage-Sage — policy-driven, safety-gated filesystem reclamation.
#[derive(Debug, Parser)]
#[command(
    name = "sage",
    author,
    version,
    about = "Storage-Sage - safe filesystem reclamation",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Scan roots, build a plan, and (in execute mode) reclaim space.
    Run(RunArgs),
    /// Query the audit log.
    Query(QueryArgs),
    /// Aggregate statistics over the audit log.
    Stats(StoreArgs),
    /// Verify the audit log's hash chain.
    Verify(StoreArgs),
    /// Show version information.
    Version,
}

#[derive(Debug, Clone, Args, Default)]
#[allow(clippy::struct_excessive_bools)]
struct RunArgs {
    /// Root directory to scan (repeatable; overrides config roots).
    #[arg(long = "root", value_name = "PATH")]
    roots: Vec<PathBuf>,
    /// Run mode: dry-run or execute.
    #[arg(long, value_name = "MODE", value_parser = RunMode::from_str)]
    mode: Option<RunMode>,
    /// Maximum plan items to display.
    #[arg(long = "max", value_name = "N")]
    max_items: Option<usize>,
    /// Maximum traversal depth (-1 = unlimited).
    #[arg(long = "depth", value_name = "N", allow_hyphen_values = true)]
    max_depth: Option<i64>,
    /// Minimum age in days (0 disables the age filter).
    #[arg(long, value_name = "DAYS")]
    min_age_days: Option<u64>,
    /// Minimum size in MiB (0 disables the size filter).
    #[arg(long, value_name = "MB")]
    min_size_mb: Option<u64>,
    /// Comma-separated list of eligible extensions.
    #[arg(long, value_name = "EXTS", value_delimiter = ',')]
    extensions: Vec<String>,
    /// Filename glob to exempt from reclamation (repeatable).
    #[arg(long = "exclude", value_name = "GLOB")]
    excludes: Vec<String>,
    /// Protected path prefix (repeatable).
    #[arg(long = "protected", value_name = "PATH")]
    protected: Vec<PathBuf>,
    /// Permit (empty) directory deletion.
    #[arg(long)]
    allow_dir_delete: bool,
    /// JSONL audit log path.
    #[arg(long = "audit", value_name = "PATH")]
    audit_path: Option<PathBuf>,
    /// SQLite audit database path.
    #[arg(long = "audit-db", value_name = "PATH")]
    audit_db: Option<PathBuf>,
    /// Print the metrics registry after the run.
    #[arg(long)]
    metrics: bool,
    /// Run deadline (e.g. "10m", "1h").
    #[arg(long, value_name = "DURATION")]
    timeout: Option<String>,
    /// Move items into this directory instead of unlinking.
    #[arg(long, value_name = "PATH")]
    trash_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
#[command(group(ArgGroup::new("store").required(true).args(["db", "audit"])))]
struct StoreArgs {
    /// SQLite audit database path.
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
    /// JSONL audit log path.
    #[arg(long, value_name = "PATH")]
    audit: Option<PathBuf>,
}

#[derive(Debug, Clone, Args, Default)]
struct QueryArgs {
    #[command(flatten)]
    store: StoreArgs,
    /// Only events at or after this time (RFC 3339, or an age like "24h").
    #[arg(long, value_name = "TIME")]
    since: Option<String>,
    /// Only events at or before this time (RFC 3339, or an age like "24h").
    #[arg(long, value_name = "TIME")]
    until: Option<String>,
    /// Filter by level (info|warn|error).
    #[arg(long, value_name = "LEVEL", value_parser = AuditLevel::from_str)]
    level: Option<AuditLevel>,
    /// Filter by action (plan|delete|skip|error).
    #[arg(long, value_name = "ACTION", value_parser = AuditAction::from_str)]
    action: Option<AuditAction>,
    /// Filter by path prefix.
    #[arg(long, value_name = "PREFIX")]
    prefix: Option<String>,
    /// Maximum records to return.
    #[arg(long, value_name = "N")]
    limit: Option<usize>,
    /// Emit records as JSON lines.
    #[arg(long)]
    json: bool,
}

/// Dispatch a parsed CLI invocation.
pub fn run(cli: &Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Command::Run(args) => run_pipeline(cli.config.as_deref(), args),
        Command::Query(args) => query_store(args),
        Command::Stats(args) => print_stats(args),
        Command::Verify(args) => verify_store(args),
        Command::Version => {
            println!("sage {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ──────────────────── run ────────────────────

fn run_pipeline(config_path: Option<&std::path::Path>, args: &RunArgs) -> Result<()> {
    let mut cfg = Config::load(config_path)?;
    apply_overrides(&mut cfg, args);
    cfg.validate()?;
    cfg.require_roots()?;

    let policy = build_policy(&cfg)?;
    let safety = SafetyEngine::new(&SafetyConfig {
        allowed_roots: cfg.scan.roots.clone(),
        protected_paths: cfg.safety.protected_paths.clone(),
        allow_dir_delete: cfg.safety.allow_dir_delete,
        enforce_mount_boundary: cfg.safety.enforce_mount_boundary,
        allow_root_symlink: cfg.safety.allow_root_symlink,
    });
    let executor = Executor::new(safety.clone(), cfg.execution.trash_dir.clone());

    let mut audit: Vec<Box<dyn AuditStore>> = Vec::new();
    if let Some(path) = &cfg.execution.audit_path {
        audit.push(Box::new(JsonlAuditStore::open(path)?));
    }
    #[cfg(feature = "sqlite")]
    if let Some(path) = &cfg.execution.audit_db {
        audit.push(Box::new(SqliteAuditStore::open(path)?));
    }

    let logger = Logger::from_config(&cfg.logging);
    let metrics = Metrics::new(cfg.metrics.enabled);
    let driver = PipelineDriver::new(
        policy,
        safety,
        executor,
        audit,
        logger,
        metrics.clone(),
    );

    let request = ScanRequest {
        roots: cfg.scan.roots.clone(),
        recursive: cfg.scan.recursive,
        max_depth: cfg.scan.max_depth,
        include_files: cfg.scan.include_files,
        include_dirs: cfg.scan.include_dirs,
    };
    let report = driver.run(request, cfg.execution.mode, cfg.timeout()?)?;

    println!(
        "{}",
        format!("== storage-sage run ({}) ==", report.mode).bold()
    );
    print!("{}", report.render(cfg.execution.max_items));

    if args.metrics && metrics.is_enabled() {
        println!("{}", "== metrics ==".bold());
        print!("{}", metrics.render_text());
    }
    Ok(())
}

fn apply_overrides(cfg: &mut Config, args: &RunArgs) {
    if !args.roots.is_empty() {
        cfg.scan.roots.clone_from(&args.roots);
    }
    if let Some(mode) = args.mode {
        cfg.execution.mode = mode;
    }
    if let Some(max_items) = args.max_items {
        cfg.execution.max_items = max_items;
    }
    if let Some(depth) = args.max_depth {
        cfg.scan.max_depth = depth;
    }
    if let Some(days) = args.min_age_days {
        cfg.policy.min_age_days = days;
    }
    if let Some(mb) = args.min_size_mb {
        cfg.policy.min_size_mb = mb;
    }
    if !args.extensions.is_empty() {
        cfg.policy.extensions.clone_from(&args.extensions);
    }
    if !args.excludes.is_empty() {
        cfg.policy.excludes.clone_from(&args.excludes);
    }
    if !args.protected.is_empty() {
        cfg.safety.protected_paths.clone_from(&args.protected);
    }
    if args.allow_dir_delete {
        cfg.safety.allow_dir_delete = true;
    }
    if let Some(path) = &args.audit_path {
        cfg.execution.audit_path = Some(path.clone());
    }
    if let Some(path) = &args.audit_db {
        cfg.execution.audit_db = Some(path.clone());
    }
    if args.metrics {
        cfg.metrics.enabled = true;
    }
    if let Some(timeout) = &args.timeout {
        cfg.execution.timeout.clone_from(timeout);
    }
    if let Some(trash) = &args.trash_dir {
        cfg.execution.trash_dir = Some(trash.clone());
    }
}

/// Assemble the configured policy: age AND size AND (extensions, when
/// configured) AND (exclusions, when configured).
fn build_policy(cfg: &Config) -> Result<Policy> {
    let mut children = vec![
        Policy::Age {
            min_age_days: cfg.policy.min_age_days,
        },
        Policy::Size {
            min_size_mb: cfg.policy.min_size_mb,
        },
    ];
    if !cfg.policy.extensions.is_empty() {
        children.push(Policy::extension_set(&cfg.policy.extensions));
    }
    if !cfg.policy.excludes.is_empty() {
        children.push(Policy::exclusion_globs(&cfg.policy.excludes)?);
    }
    Ok(Policy::Composite {
        mode: CompositeMode::And,
        children,
    })
}

// ──────────────────── audit subcommands ────────────────────

fn open_store(args: &StoreArgs) -> Result<Box<dyn AuditStore>> {
    if let Some(db) = &args.db {
        #[cfg(feature = "sqlite")]
        {
            return Ok(Box::new(SqliteAuditStore::open(db)?));
        }
        #[cfg(not(feature = "sqlite"))]
        {
            return Err(SsgError::InvalidConfig {
                details: format!(
                    "--db {} requires the sqlite feature; use --audit for JSONL logs",
                    db.display()
                ),
            });
        }
    }
    let audit = args.audit.as_ref().ok_or_else(|| SsgError::InvalidConfig {
        details: "missing_required: --db or --audit".to_string(),
    })?;
    Ok(Box::new(JsonlAuditStore::open(audit)?))
}

fn query_store(args: &QueryArgs) -> Result<()> {
    let store = open_store(&args.store)?;
    let filter = AuditFilter {
        since: args.since.as_deref().map(parse_time_arg).transpose()?,
        until: args.until.as_deref().map(parse_time_arg).transpose()?,
        level: args.level,
        action: args.action,
        path_prefix: args.prefix.clone(),
        limit: args.limit,
    };

    let events = store.query(&filter)?;
    for event in &events {
        if args.json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!(
                "{} {:<5} {:<6} {} {}",
                event.time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                event.level.label(),
                event.action.label(),
                event.path,
                event
                    .fields
                    .get("result_reason")
                    .or_else(|| event.fields.get("decision_reason"))
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("")
            );
        }
    }
    if !args.json {
        eprintln!("{} record(s)", events.len());
    }
    Ok(())
}

fn print_stats(args: &StoreArgs) -> Result<()> {
    let store = open_store(args)?;
    let events = store.query(&AuditFilter::default())?;
    let stats = compute(&events);

    println!("events:        {}", stats.total);
    for (action, count) in &stats.by_action {
        println!("  {action:<12} {count}");
    }
    println!("files deleted: {}", stats.files_deleted);
    println!(
        "bytes freed:   {}",
        storage_sage::pipeline::driver::human_bytes(stats.bytes_freed)
    );
    if let (Some(first), Some(last)) = (stats.first_time, stats.last_time) {
        println!("first event:   {}", first.to_rfc3339());
        println!("last event:    {}", last.to_rfc3339());
    }
    let top = stats.top_reasons(8);
    if !top.is_empty() {
        println!("top reasons:");
        for (reason, count) in top {
            println!("  {reason:<24} {count}");
        }
    }
    Ok(())
}

fn verify_store(args: &StoreArgs) -> Result<()> {
    let store = open_store(args)?;
    let violations = store.verify_integrity()?;
    if violations.is_empty() {
        println!("{}", "PASS: hash chain intact".green());
        return Ok(());
    }
    println!(
        "{}",
        format!("FAIL: {} corrupted record(s)", violations.len()).red()
    );
    for violation in &violations {
        println!("  record {}: {}", violation.record_id, violation.detail);
    }
    Err(SsgError::HashChainBroken {
        record_id: violations[0].record_id,
        details: violations[0].detail.clone(),
    })
}

/// Accept an RFC 3339 timestamp or a relative age like `"24h"` (meaning that
/// long before now).
fn parse_time_arg(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let age = duration::parse(raw).map_err(|_| SsgError::InvalidConfig {
        details: format!("invalid time {raw:?}: expected RFC 3339 or an age like \"24h\""),
    })?;
    let age = chrono::Duration::from_std(age).map_err(|err| SsgError::InvalidConfig {
        details: format!("invalid time {raw:?}: {err}"),
    })?;
    Ok(Utc::now() - age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "sage",
            "run",
            "--root",
            "/tmp/r1",
            "--root",
            "/tmp/r2",
            "--mode",
            "execute",
            "--min-age-days",
            "30",
            "--extensions",
            "tmp,log",
            "--exclude",
            "keep_*",
            "--max",
            "10",
            "--depth",
            "-1",
        ])
        .unwrap();

        let Command::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.roots.len(), 2);
        assert_eq!(args.mode, Some(RunMode::Execute));
        assert_eq!(args.extensions, vec!["tmp", "log"]);
        assert_eq!(args.excludes, vec!["keep_*"]);
        assert_eq!(args.max_depth, Some(-1));
    }

    #[test]
    fn cli_parses_query_flags() {
        let cli = Cli::try_parse_from([
            "sage", "query", "--db", "/tmp/a.db", "--since", "24h", "--action", "delete",
            "--limit", "5", "--json",
        ])
        .unwrap();
        let Command::Query(args) = cli.command else {
            panic!("expected query subcommand");
        };
        assert_eq!(args.action, Some(AuditAction::Delete));
        assert_eq!(args.limit, Some(5));
        assert!(args.json);
    }

    #[test]
    fn query_requires_a_store() {
        assert!(Cli::try_parse_from(["sage", "query"]).is_err());
        assert!(Cli::try_parse_from(["sage", "verify", "--audit", "/tmp/a.jsonl"]).is_ok());
    }

    #[test]
    fn overrides_replace_config_values() {
        let mut cfg = Config::default();
        let args = RunArgs {
            roots: vec![PathBuf::from("/tmp/x")],
            mode: Some(RunMode::Execute),
            min_age_days: Some(7),
            allow_dir_delete: true,
            ..RunArgs::default()
        };
        apply_overrides(&mut cfg, &args);
        assert_eq!(cfg.scan.roots, vec![PathBuf::from("/tmp/x")]);
        assert_eq!(cfg.execution.mode, RunMode::Execute);
        assert_eq!(cfg.policy.min_age_days, 7);
        assert!(cfg.safety.allow_dir_delete);
    }

    #[test]
    fn unset_flags_leave_config_alone() {
        let mut cfg = Config::default();
        cfg.policy.min_age_days = 90;
        apply_overrides(&mut cfg, &RunArgs::default());
        assert_eq!(cfg.policy.min_age_days, 90);
        assert_eq!(cfg.execution.mode, RunMode::DryRun);
    }

    #[test]
    fn policy_composition_skips_empty_sections() {
        let cfg = Config::default();
        let policy = build_policy(&cfg).unwrap();
        let Policy::Composite { mode, children } = policy else {
            panic!("expected composite policy");
        };
        assert_eq!(mode, CompositeMode::And);
        // Age and size only; no extension or exclusion children configured.
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn time_arg_accepts_rfc3339_and_ages() {
        let absolute = parse_time_arg("2026-08-01T00:00:00Z").unwrap();
        assert_eq!(absolute.to_rfc3339(), "2026-08-01T00:00:00+00:00");

        let relative = parse_time_arg("24h").unwrap();
        assert!(relative < Utc::now());

        assert!(parse_time_arg("whenever").is_err());
    }
}
