//! Scanner: candidate model and the channel-based directory walker.

#![allow(missing_docs)]

pub mod walker;

use std::path::PathBuf;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

/// Filesystem entry class. Symlinks scan as `File` with `is_symlink` set;
/// they are never followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    File,
    Dir,
}

/// A discovered filesystem target, as emitted by the walker.
///
/// `path` is absolute and lexically normalized, and is always under `root`
/// (the configured allowed-root it was discovered beneath). Device IDs are
/// `0` when unknown (non-Unix platforms).
#[derive(Debug, Clone)]
pub struct Candidate {
    pub path: PathBuf,
    pub root: PathBuf,
    pub kind: CandidateKind,
    pub size_bytes: u64,
    pub mod_time: SystemTime,
    pub found_at: DateTime<Utc>,
    pub is_symlink: bool,
    /// Raw link string as stored in the symlink; may be relative.
    pub link_target: Option<PathBuf>,
    pub device_id: u64,
    pub root_device_id: u64,
}

impl Candidate {
    /// Lowercased extension without the leading dot, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    /// Filename component as a string (empty for bare roots like `/`).
    #[must_use]
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Traversal request for one scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    /// Depth counted from the root (root itself is 0); `-1` is unlimited.
    pub max_depth: i64,
    pub include_files: bool,
    pub include_dirs: bool,
}

impl ScanRequest {
    /// Effective depth limit: `recursive: false` caps at the direct children.
    #[must_use]
    pub fn depth_limit(&self) -> i64 {
        if !self.recursive {
            return 1;
        }
        if self.max_depth < 0 { i64::MAX } else { self.max_depth }
    }
}

/// A per-entry scan failure, reported on the side channel. These never abort
/// the traversal; only cancellation does.
#[derive(Debug, Clone)]
pub struct ScanError {
    pub path: Option<PathBuf>,
    /// Machine tag: `permission_denied`, `stat_error`, or `cancelled`.
    pub reason: String,
    pub detail: String,
}

impl ScanError {
    pub(crate) fn from_io(path: PathBuf, err: &std::io::Error) -> Self {
        let reason = if err.kind() == std::io::ErrorKind::PermissionDenied {
            "permission_denied"
        } else {
            "stat_error"
        };
        Self {
            path: Some(path),
            reason: reason.to_string(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn cancelled(detail: String) -> Self {
        Self {
            path: None,
            reason: "cancelled".to_string(),
            detail,
        }
    }

    /// Whether this entry is the cancellation notice.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.reason == "cancelled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str) -> Candidate {
        Candidate {
            path: PathBuf::from(path),
            root: PathBuf::from("/tmp/r"),
            kind: CandidateKind::File,
            size_bytes: 0,
            mod_time: SystemTime::UNIX_EPOCH,
            found_at: Utc::now(),
            is_symlink: false,
            link_target: None,
            device_id: 0,
            root_device_id: 0,
        }
    }

    #[test]
    fn extension_is_lowercased_without_dot() {
        assert_eq!(candidate("/tmp/r/A.TMP").extension().as_deref(), Some("tmp"));
        assert_eq!(candidate("/tmp/r/noext").extension(), None);
    }

    #[test]
    fn depth_limit_honors_recursive_flag() {
        let mut req = ScanRequest {
            roots: vec![],
            recursive: false,
            max_depth: 10,
            include_files: true,
            include_dirs: false,
        };
        assert_eq!(req.depth_limit(), 1);

        req.recursive = true;
        assert_eq!(req.depth_limit(), 10);

        req.max_depth = -1;
        assert_eq!(req.depth_limit(), i64::MAX);
    }

    #[test]
    fn scan_error_classifies_permission_denied() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let e = ScanError::from_io(PathBuf::from("/x"), &err);
        assert_eq!(e.reason, "permission_denied");

        let err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let e = ScanError::from_io(PathBuf::from("/x"), &err);
        assert_eq!(e.reason, "stat_error");
    }
}
