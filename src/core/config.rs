//! Configuration system: YAML file + `SSG_CONFIG` resolution + validation.
//!
//! A single YAML document with `scan`, `policy`, `execution`, `safety`,
//! `logging`, `metrics`, and `daemon` sections. Every section has serde
//! defaults so a partial (or absent) file is usable; explicit CLI flags
//! override file values after loading.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::duration;
use crate::core::errors::{Result, SsgError};

/// Full Storage-Sage configuration model.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scan: ScanConfig,
    pub policy: PolicyConfig,
    pub execution: ExecutionConfig,
    pub safety: SafetySection,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub daemon: DaemonConfig,
}

/// Root selection and traversal knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    /// Depth from each root; the root itself is depth 0. `-1` is unlimited.
    pub max_depth: i64,
    pub include_files: bool,
    pub include_dirs: bool,
}

/// Declarative reclamation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Minimum age in days; 0 disables the age filter.
    pub min_age_days: u64,
    /// Minimum size in MiB; 0 disables the size filter.
    pub min_size_mb: u64,
    /// Eligible extensions (case-insensitive, leading dot optional).
    pub extensions: Vec<String>,
    /// Filename globs that exempt matching entries from reclamation.
    pub excludes: Vec<String>,
}

/// Run mode: propose only, or actually delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RunMode {
    #[default]
    #[serde(rename = "dry-run")]
    DryRun,
    #[serde(rename = "execute")]
    Execute,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DryRun => f.write_str("dry-run"),
            Self::Execute => f.write_str("execute"),
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dry-run" | "dryrun" => Ok(Self::DryRun),
            "execute" => Ok(Self::Execute),
            other => Err(format!(
                "invalid mode {other:?}: expected \"dry-run\" or \"execute\""
            )),
        }
    }
}

/// Execution-stage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub mode: RunMode,
    /// Run deadline as a human duration string (`"10m"`, `"1h"`).
    pub timeout: String,
    /// Maximum plan items to display.
    pub max_items: usize,
    /// JSONL audit log path (empty disables the JSONL store).
    pub audit_path: Option<PathBuf>,
    /// SQLite audit database path (empty disables the SQLite store).
    pub audit_db: Option<PathBuf>,
    /// When set, deletions become same-mount moves into this directory.
    pub trash_dir: Option<PathBuf>,
}

/// Safety-engine settings (`allowed_roots` is derived from `scan.roots`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SafetySection {
    pub protected_paths: Vec<PathBuf>,
    pub allow_dir_delete: bool,
    pub enforce_mount_boundary: bool,
    /// Accept a root that is itself a symlink (descendants are still checked).
    pub allow_root_symlink: bool,
}

/// Logger level and destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `"stderr"` or a file path.
    pub output: String,
}

/// Metrics registry switch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

/// Daemon-host settings. Parsed and validated for the collaborator; no daemon
/// runtime lives in this crate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DaemonConfig {
    pub schedule: Option<String>,
    pub http_addr: Option<String>,
    pub metrics_addr: Option<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            recursive: true,
            max_depth: -1,
            include_files: true,
            include_dirs: false,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            min_age_days: 30,
            min_size_mb: 0,
            extensions: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::DryRun,
            timeout: "10m".to_string(),
            max_items: 50,
            audit_path: None,
            audit_db: None,
            trash_dir: None,
        }
    }
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            protected_paths: Vec::new(),
            allow_dir_delete: false,
            enforce_mount_boundary: false,
            allow_root_symlink: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "stderr".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    /// Load config from an explicit path, `SSG_CONFIG`, or defaults.
    ///
    /// A missing file is only an error when the path was explicit (CLI flag
    /// or env var); otherwise defaults apply.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_config = if path.is_none() {
            env::var_os("SSG_CONFIG").map(PathBuf::from)
        } else {
            None
        };
        let explicit = path.map(Path::to_path_buf).or(env_config);

        let cfg = match &explicit {
            Some(p) if p.exists() => {
                let raw = fs::read_to_string(p).map_err(|source| SsgError::Io {
                    path: p.clone(),
                    source,
                })?;
                serde_yaml::from_str::<Self>(&raw)?
            }
            Some(p) => {
                return Err(SsgError::MissingConfig { path: p.clone() });
            }
            None => Self::default(),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse the configured run deadline.
    pub fn timeout(&self) -> Result<Duration> {
        duration::parse(&self.execution.timeout)
    }

    /// Structural validation. Root presence is checked separately at run time
    /// (the audit subcommands need no roots).
    pub fn validate(&self) -> Result<()> {
        if self.scan.max_depth < -1 {
            return Err(SsgError::InvalidConfig {
                details: format!(
                    "scan.max_depth must be >= -1, got {}",
                    self.scan.max_depth
                ),
            });
        }
        duration::parse(&self.execution.timeout).map_err(|_| SsgError::InvalidConfig {
            details: format!(
                "execution.timeout {:?} is not a valid duration",
                self.execution.timeout
            ),
        })?;
        match self.logging.level.to_ascii_lowercase().as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(SsgError::InvalidConfig {
                    details: format!(
                        "logging.level {other:?} is not one of debug|info|warn|error"
                    ),
                });
            }
        }
        for root in &self.scan.roots {
            if root.as_os_str().is_empty() {
                return Err(SsgError::InvalidConfig {
                    details: "missing_required: scan.roots entries must be non-empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Validate that at least one scan root is configured (required by `run`).
    pub fn require_roots(&self) -> Result<()> {
        if self.scan.roots.is_empty() {
            return Err(SsgError::InvalidConfig {
                details: "missing_required: scan.roots (or --root)".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn parses_full_document() {
        let yaml = r#"
scan:
  roots: ["/tmp/r1", "/tmp/r2"]
  recursive: true
  max_depth: 4
  include_files: true
  include_dirs: true
policy:
  min_age_days: 30
  min_size_mb: 10
  extensions: [".tmp", "log"]
  excludes: ["keep_*"]
execution:
  mode: execute
  timeout: "30m"
  max_items: 20
  audit_path: "/var/lib/sage/audit.jsonl"
safety:
  protected_paths: ["/tmp/r1/system"]
  allow_dir_delete: true
  enforce_mount_boundary: true
logging:
  level: debug
metrics:
  enabled: false
daemon:
  schedule: "1h"
  http_addr: "127.0.0.1:8080"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.scan.roots.len(), 2);
        assert_eq!(cfg.execution.mode, RunMode::Execute);
        assert_eq!(cfg.policy.min_size_mb, 10);
        assert!(cfg.safety.enforce_mount_boundary);
        assert!(!cfg.metrics.enabled);
        assert_eq!(cfg.daemon.http_addr.as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: Config = serde_yaml::from_str("scan:\n  roots: [\"/tmp/x\"]\n").unwrap();
        assert_eq!(cfg.execution.mode, RunMode::DryRun);
        assert_eq!(cfg.policy.min_age_days, 30);
        assert!(cfg.scan.include_files);
        assert!(!cfg.scan.include_dirs);
    }

    #[test]
    fn zero_policy_thresholds_are_valid() {
        // 0 means "filter disabled", not a validation error.
        let cfg: Config =
            serde_yaml::from_str("policy:\n  min_age_days: 0\n  min_size_mb: 0\n").unwrap();
        cfg.validate().unwrap();
    }

    #[test]
    fn invalid_yaml_is_config_parse_error() {
        let err = serde_yaml::from_str::<Config>("scan: [not a map")
            .map_err(SsgError::from)
            .unwrap_err();
        assert_eq!(err.code(), "SSG-1003");
    }

    #[test]
    fn bad_depth_rejected() {
        let cfg: Config = serde_yaml::from_str("scan:\n  max_depth: -2\n").unwrap();
        let err = cfg.validate().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn bad_timeout_rejected() {
        let cfg: Config = serde_yaml::from_str("execution:\n  timeout: \"soon\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bad_level_rejected() {
        let cfg: Config = serde_yaml::from_str("logging:\n  level: chatty\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mode_round_trips_through_strings() {
        assert_eq!("dry-run".parse::<RunMode>().unwrap(), RunMode::DryRun);
        assert_eq!("execute".parse::<RunMode>().unwrap(), RunMode::Execute);
        assert_eq!(RunMode::Execute.to_string(), "execute");
        assert!("delete-everything".parse::<RunMode>().is_err());
    }

    #[test]
    fn explicit_missing_file_errors() {
        let err = Config::load(Some(Path::new("/nonexistent/sage.yaml"))).unwrap_err();
        assert_eq!(err.code(), "SSG-1002");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sage.yaml");
        fs::write(&path, "scan:\n  roots: [\"/tmp/q\"]\nexecution:\n  mode: execute\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.scan.roots, vec![PathBuf::from("/tmp/q")]);
        assert_eq!(cfg.execution.mode, RunMode::Execute);
    }

    #[test]
    fn require_roots_guards_run() {
        let cfg = Config::default();
        assert!(cfg.require_roots().is_err());
        let with: Config = serde_yaml::from_str("scan:\n  roots: [\"/tmp/x\"]\n").unwrap();
        with.require_roots().unwrap();
    }
}
