//! Find the session log a running agent process has open.
//!
//! The agent keeps its rollout file open for appending, so the process's open
//! file descriptors name the log directly. The launcher may be a shim that
//! forks the real binary, so descendants are inspected as well.

use crate::paths::is_rollout_path;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Upper bound on processes walked when collecting descendants.
const MAX_PROCESSES: usize = 64;

/// Maps a process id to the session log it is writing.
pub trait PidProbe: Send + Sync {
    fn log_for_pid(&self, pid: u32) -> Option<PathBuf>;
}

/// Inspects live processes via `/proc`, or `lsof` where `/proc` is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessInspector;

impl PidProbe for ProcessInspector {
    fn log_for_pid(&self, pid: u32) -> Option<PathBuf> {
        if pid == 0 {
            return None;
        }
        pick_log(open_logs(pid))
    }
}

/// Session logs held open by `pid` or its descendants.
pub(crate) fn open_logs(pid: u32) -> Vec<PathBuf> {
    let files = if Path::new("/proc/self/fd").is_dir() {
        proc_open_files(pid)
    } else {
        lsof_open_files(pid)
    };
    files
        .into_iter()
        .filter(|path| is_rollout_path(path) && path.exists())
        .collect()
}

/// One candidate wins outright; several resolve to the most recently modified.
pub(crate) fn pick_log(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    if candidates.len() <= 1 {
        return candidates.into_iter().next();
    }
    candidates
        .into_iter()
        .filter_map(|path| crate::rollout::modified(&path).map(|mtime| (mtime, path)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
}

fn proc_open_files(pid: u32) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for pid in process_tree(pid) {
        let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) else {
            continue;
        };
        files.extend(
            entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| std::fs::read_link(entry.path()).ok()),
        );
    }
    files
}

/// `pid` followed by its descendants, breadth first.
fn process_tree(root: u32) -> Vec<u32> {
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    let mut order = Vec::new();
    while let Some(pid) = queue.pop_front() {
        order.push(pid);
        if order.len() >= MAX_PROCESSES {
            break;
        }
        for child in children(pid) {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
    }
    order
}

fn children(pid: u32) -> Vec<u32> {
    let Ok(tasks) = std::fs::read_dir(format!("/proc/{pid}/task")) else {
        return Vec::new();
    };
    tasks
        .filter_map(|task| task.ok())
        .filter_map(|task| std::fs::read_to_string(task.path().join("children")).ok())
        .flat_map(|list| {
            list.split_whitespace()
                .filter_map(|p| p.parse::<u32>().ok())
                .collect::<Vec<_>>()
        })
        .collect()
}

fn lsof_open_files(pid: u32) -> Vec<PathBuf> {
    let output = Command::new("lsof")
        .args(["-p", &pid.to_string(), "-Fn"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            tracing::debug!(pid, error = %e, "lsof unavailable");
            return Vec::new();
        }
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .map(PathBuf::from)
        .collect()
}
