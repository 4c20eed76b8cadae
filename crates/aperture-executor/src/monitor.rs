//! Resource monitoring for a spawned worker (specification §4.10 "Execute"
//! memory-limit check, §9 "RSS for Windows via `PROCESS_MEMORY_COUNTERS`").
//!
//! `sysinfo` already abstracts the POSIX/Windows RSS query difference the
//! specification calls out, so the monitor is a thin wrapper rather than a
//! second platform split.

use sysinfo::{Pid, System};

pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Current resident set size of `pid` in bytes, or `None` if the
    /// process is no longer running or couldn't be queried.
    pub fn rss_bytes(&mut self, pid: u32) -> Option<u64> {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(&[sys_pid]),
        );
        self.system.process(sys_pid).map(|p| p.memory())
    }

    pub fn is_running(&mut self, pid: u32) -> bool {
        let sys_pid = Pid::from_u32(pid);
        self.system.refresh_processes(
            sysinfo::ProcessesToUpdate::Some(&[sys_pid]),
        );
        self.system.process(sys_pid).is_some()
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_running_and_has_nonzero_rss() {
        let mut monitor = ResourceMonitor::new();
        let pid = std::process::id();
        assert!(monitor.is_running(pid));
        let rss = monitor.rss_bytes(pid);
        assert!(rss.is_some());
    }

    #[test]
    fn bogus_pid_is_not_running() {
        let mut monitor = ResourceMonitor::new();
        assert!(!monitor.is_running(u32::MAX));
    }
}
