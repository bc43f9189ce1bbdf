//! Lazy, cancellable directory walker.
//!
//! One worker thread walks the requested roots in listed order and emits
//! `Candidate` records onto a bounded channel (backpressure: a slow consumer
//! throttles the walk). Per-entry failures go to an unbounded error side
//! channel and never abort the traversal; cancellation aborts promptly and is
//! reported on the same side channel.
//!
//! No symlink is ever followed: every stat is `symlink_metadata`, and only
//! real directories are descended into.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use crossbeam_channel as channel;

use crate::core::cancel::CancelToken;
use crate::core::paths;
use crate::scanner::{Candidate, CandidateKind, ScanError, ScanRequest};

/// Bound on the candidate queue; a full queue blocks the walker.
const CANDIDATE_QUEUE_CAP: usize = 1024;

/// Poll interval for cancellation while blocked on a full queue.
const SEND_POLL: Duration = Duration::from_millis(50);

/// Running scan: candidate stream, error side channel, and the worker handle.
pub struct ScanHandle {
    pub candidates: channel::Receiver<Candidate>,
    pub errors: channel::Receiver<ScanError>,
    worker: JoinHandle<()>,
}

impl ScanHandle {
    /// Wait for the walker thread to finish. Both channels are closed by the
    /// time this returns.
    pub fn join(self) {
        let _ = self.worker.join();
    }
}

/// Start a scan on a dedicated worker thread.
pub fn spawn_scan(request: ScanRequest, cancel: CancelToken) -> ScanHandle {
    let (cand_tx, cand_rx) = channel::bounded::<Candidate>(CANDIDATE_QUEUE_CAP);
    let (err_tx, err_rx) = channel::unbounded::<ScanError>();

    let worker = thread::spawn(move || {
        walk_roots(&request, &cancel, &cand_tx, &err_tx);
    });

    ScanHandle {
        candidates: cand_rx,
        errors: err_rx,
        worker,
    }
}

fn walk_roots(
    request: &ScanRequest,
    cancel: &CancelToken,
    cand_tx: &channel::Sender<Candidate>,
    err_tx: &channel::Sender<ScanError>,
) {
    let depth_limit = request.depth_limit();

    for root in &request.roots {
        if cancel.is_cancelled() {
            let _ = err_tx.send(ScanError::cancelled(cancel.reason()));
            return;
        }

        let root = match paths::absolutize(root) {
            Ok(p) => p,
            Err(err) => {
                let _ = err_tx.send(ScanError {
                    path: Some(root.clone()),
                    reason: "stat_error".to_string(),
                    detail: err.to_string(),
                });
                continue;
            }
        };

        let root_meta = match fs::symlink_metadata(&root) {
            Ok(m) => m,
            Err(err) => {
                let _ = err_tx.send(ScanError::from_io(root.clone(), &err));
                continue;
            }
        };
        let root_dev = device_id(&root_meta);

        // The root itself is depth 0 and is emitted like any other entry.
        let root_candidate = build_candidate(&root, &root, &root_meta, root_dev);
        if wants(request, &root_candidate) && !send_candidate(cand_tx, root_candidate, cancel) {
            let _ = err_tx.send(ScanError::cancelled(cancel.reason()));
            return;
        }

        if !root_meta.is_dir() || depth_limit == 0 {
            continue;
        }

        // Explicit DFS stack of (directory, depth-of-children).
        let mut stack: Vec<(PathBuf, i64)> = vec![(root.clone(), 1)];
        while let Some((dir, child_depth)) = stack.pop() {
            if cancel.is_cancelled() {
                let _ = err_tx.send(ScanError::cancelled(cancel.reason()));
                return;
            }

            let entries = match read_dir_sorted(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    let _ = err_tx.send(ScanError::from_io(dir, &err));
                    continue;
                }
            };

            for entry_path in entries {
                if cancel.is_cancelled() {
                    let _ = err_tx.send(ScanError::cancelled(cancel.reason()));
                    return;
                }

                let meta = match fs::symlink_metadata(&entry_path) {
                    Ok(m) => m,
                    Err(err) => {
                        let _ = err_tx.send(ScanError::from_io(entry_path, &err));
                        continue;
                    }
                };

                let candidate = build_candidate(&entry_path, &root, &meta, root_dev);
                let descend = meta.is_dir() && child_depth < depth_limit;
                if descend {
                    stack.push((entry_path, child_depth + 1));
                }

                if wants(request, &candidate) && !send_candidate(cand_tx, candidate, cancel) {
                    let _ = err_tx.send(ScanError::cancelled(cancel.reason()));
                    return;
                }
            }
        }
    }
}

/// Sorted directory listing, so scans are reproducible run to run.
fn read_dir_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    entries.sort();
    Ok(entries)
}

fn wants(request: &ScanRequest, candidate: &Candidate) -> bool {
    match candidate.kind {
        CandidateKind::File => request.include_files,
        CandidateKind::Dir => request.include_dirs,
    }
}

/// Blocking send that observes cancellation. Returns false when cancelled.
fn send_candidate(
    tx: &channel::Sender<Candidate>,
    candidate: Candidate,
    cancel: &CancelToken,
) -> bool {
    let mut pending = candidate;
    loop {
        match tx.send_timeout(pending, SEND_POLL) {
            Ok(()) => return true,
            Err(channel::SendTimeoutError::Timeout(back)) => {
                if cancel.is_cancelled() {
                    return false;
                }
                pending = back;
            }
            Err(channel::SendTimeoutError::Disconnected(_)) => return false,
        }
    }
}

fn build_candidate(path: &Path, root: &Path, meta: &fs::Metadata, root_dev: u64) -> Candidate {
    let is_symlink = meta.file_type().is_symlink();
    let link_target = if is_symlink {
        fs::read_link(path).ok()
    } else {
        None
    };
    Candidate {
        path: path.to_path_buf(),
        root: root.to_path_buf(),
        kind: if meta.is_dir() {
            CandidateKind::Dir
        } else {
            CandidateKind::File
        },
        size_bytes: meta.len(),
        mod_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        found_at: Utc::now(),
        is_symlink,
        link_target,
        device_id: device_id(meta),
        root_device_id: root_dev,
    }
}

/// Device ID from metadata (for mount-boundary detection).
pub(crate) fn device_id(meta: &fs::Metadata) -> u64 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        meta.dev()
    }
    #[cfg(not(unix))]
    {
        let _ = meta;
        0
    }
}
