//! Policy engine: pure reclamation predicates and their AND/OR composition.
//!
//! Every policy is a pure function of `(candidate, env)` producing a
//! `Decision` with a machine reason tag and a reclaim-worthiness score.
//! Policies never touch the filesystem; the environment snapshot is captured
//! once per run so all decisions share a consistent clock.

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::time::SystemTime;

use regex::Regex;

use crate::core::errors::{Result, SsgError};
use crate::scanner::Candidate;

const DAY_SECS: u64 = 86_400;
const MIB: u64 = 1 << 20;

/// Environment captured once per pipeline run. Usage percentages are `0.0`
/// when unknown; the daemon host collaborator populates them.
#[derive(Debug, Clone, Copy)]
pub struct EnvSnapshot {
    pub now: SystemTime,
    pub disk_used_pct: f64,
    pub cpu_used_pct: f64,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            now: SystemTime::now(),
            disk_used_pct: 0.0,
            cpu_used_pct: 0.0,
        }
    }

    #[must_use]
    pub const fn at(now: SystemTime) -> Self {
        Self {
            now,
            disk_used_pct: 0.0,
            cpu_used_pct: 0.0,
        }
    }
}

/// Policy verdict. Higher score = more reclaim-worthy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub reason: String,
    pub score: i64,
}

impl Decision {
    fn allow(reason: &str, score: i64) -> Self {
        Self {
            allow: true,
            reason: reason.to_string(),
            score,
        }
    }

    fn deny(reason: String, score: i64) -> Self {
        Self {
            allow: false,
            reason,
            score,
        }
    }
}

/// Composition mode for [`Policy::Composite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeMode {
    /// Every child must allow; the weakest (minimum-score) child dominates.
    And,
    /// Any child may allow; the strongest (maximum-score) child dominates.
    Or,
}

/// A reclamation policy: four leaf predicates plus a combinator, as a tagged
/// variant rather than a trait hierarchy.
#[derive(Debug, Clone)]
pub enum Policy {
    /// Allow entries at least `min_age_days` old (inclusive); 0 disables.
    Age { min_age_days: u64 },
    /// Allow entries at least `min_size_mb` MiB large (inclusive); 0 disables.
    Size { min_size_mb: u64 },
    /// Allow entries whose extension is in the set (case-insensitive).
    Extension { extensions: BTreeSet<String> },
    /// Allow entries whose filename matches none of the globs.
    Exclusion { globs: Vec<Glob> },
    /// AND/OR combination of sub-policies.
    Composite {
        mode: CompositeMode,
        children: Vec<Policy>,
    },
}

impl Policy {
    /// Extension policy from raw configured strings (leading dot and case are
    /// normalized away).
    pub fn extension_set(raw: &[String]) -> Self {
        let extensions = raw
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self::Extension { extensions }
    }

    /// Exclusion policy from raw glob patterns. Invalid patterns are
    /// configuration errors.
    pub fn exclusion_globs(patterns: &[String]) -> Result<Self> {
        let globs = patterns
            .iter()
            .map(|p| Glob::compile(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Exclusion { globs })
    }

    /// Evaluate this policy for a candidate under the given environment.
    #[must_use]
    pub fn evaluate(&self, candidate: &Candidate, env: &EnvSnapshot) -> Decision {
        match self {
            Self::Age { min_age_days } => evaluate_age(candidate, env, *min_age_days),
            Self::Size { min_size_mb } => evaluate_size(candidate, *min_size_mb),
            Self::Extension { extensions } => evaluate_extension(candidate, extensions),
            Self::Exclusion { globs } => evaluate_exclusion(candidate, globs),
            Self::Composite { mode, children } => match mode {
                CompositeMode::And => evaluate_and(candidate, env, children),
                CompositeMode::Or => evaluate_or(candidate, env, children),
            },
        }
    }
}

fn evaluate_age(candidate: &Candidate, env: &EnvSnapshot, min_age_days: u64) -> Decision {
    let age_secs = env
        .now
        .duration_since(candidate.mod_time)
        .map_or(0, |d| d.as_secs());
    let age_days = age_secs / DAY_SECS;
    let score = i64::try_from(age_days).unwrap_or(i64::MAX);
    if age_secs >= min_age_days * DAY_SECS {
        Decision::allow("age_ok", score)
    } else {
        Decision::deny("too_new".to_string(), score)
    }
}

fn evaluate_size(candidate: &Candidate, min_size_mb: u64) -> Decision {
    let score = i64::try_from(candidate.size_bytes / MIB).unwrap_or(i64::MAX);
    if candidate.size_bytes >= min_size_mb * MIB {
        Decision::allow("size_ok", score)
    } else {
        Decision::deny("too_small".to_string(), score)
    }
}

fn evaluate_extension(candidate: &Candidate, extensions: &BTreeSet<String>) -> Decision {
    let matched = candidate
        .extension()
        .is_some_and(|ext| extensions.contains(&ext));
    if matched {
        Decision::allow("ext_match", 1)
    } else {
        Decision::deny("wrong_ext".to_string(), 1)
    }
}

fn evaluate_exclusion(candidate: &Candidate, globs: &[Glob]) -> Decision {
    let name = candidate.file_name();
    for glob in globs {
        if glob.matches(&name) {
            return Decision::deny(format!("excluded:{}", glob.pattern()), 0);
        }
    }
    Decision::allow("not_excluded", 0)
}

fn evaluate_and(candidate: &Candidate, env: &EnvSnapshot, children: &[Policy]) -> Decision {
    let mut weakest: Option<Decision> = None;
    for child in children {
        let decision = child.evaluate(candidate, env);
        if !decision.allow {
            // First denial wins.
            return decision;
        }
        let replace = weakest.as_ref().is_none_or(|w| decision.score < w.score);
        if replace {
            weakest = Some(decision);
        }
    }
    weakest.unwrap_or_else(|| Decision::allow("ok", 0))
}

fn evaluate_or(candidate: &Candidate, env: &EnvSnapshot, children: &[Policy]) -> Decision {
    let mut strongest: Option<Decision> = None;
    for child in children {
        let decision = child.evaluate(candidate, env);
        if decision.allow {
            // First allow wins.
            return decision;
        }
        let replace = strongest.as_ref().is_none_or(|s| decision.score > s.score);
        if replace {
            strongest = Some(decision);
        }
    }
    strongest.unwrap_or_else(|| Decision::deny("ok".to_string(), 0))
}

/// A compiled shell-style glob (`*`, `**`, `?`) kept with its source pattern
/// for reason tags.
#[derive(Debug, Clone)]
pub struct Glob {
    original: String,
    compiled: Regex,
}

impl Glob {
    /// Compile a shell-style glob into an anchored regex.
    pub fn compile(pattern: &str) -> Result<Self> {
        let compiled = glob_to_regex(pattern)?;
        Ok(Self {
            original: pattern.to_string(),
            compiled,
        })
    }

    #[must_use]
    pub fn matches(&self, text: &str) -> bool {
        self.compiled.is_match(text)
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.original
    }
}

/// Convert a shell-style glob pattern to a regex.
///
/// Supports:
/// - `**` → matches any text (including separators)
/// - `*`  → matches anything except `/`
/// - `?`  → matches a single character except `/`
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut regex_str = String::with_capacity(pattern.len() * 2);
    regex_str.push('^');

    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                regex_str.push_str(".*");
                i += 2;
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| SsgError::InvalidConfig {
        details: format!("invalid glob pattern {pattern:?}: {err}"),
    })
}
