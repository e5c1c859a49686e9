//! Resource usage snapshots for `ps` output.

use serde::{Deserialize, Serialize};

/// Point-in-time resource usage of a live child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Resident set size in bytes.
    pub rss_bytes: u64,
}

/// Samples usage for `pid` from /proc; `None` when the process is gone
/// or the platform offers no procfs.
pub fn sample(pid: i32) -> Option<ResourceUsage> {
    if pid <= 0 {
        return None;
    }
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;

    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page = if page > 0 { page as u64 } else { 4096 };

    Some(ResourceUsage {
        rss_bytes: rss_pages * page,
    })
}
