//! Cross-platform subprocess spawning (specification §9 "Cross-platform
//! process/pipe"): one `ProcessSpawner` contract, two platform bodies.

use crate::config::{IsolationConfig, IsolationLevel};
use aperture_core::{CoreError, CoreResult};
use std::path::Path;
use std::process::Child;
use std::time::{Duration, Instant};

/// A spawned worker process plus enough state to wait on or kill it.
pub struct SpawnedProcess {
    pub pid: u32,
    child: Child,
}

impl SpawnedProcess {
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Poll `try_wait` until the process exits or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> CoreResult<Option<std::process::ExitStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Ok(Some(status)),
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(CoreError::ProcessCrashed(e.to_string())),
            }
        }
    }

    pub fn kill(&mut self) -> CoreResult<()> {
        self.child
            .kill()
            .or_else(|e| {
                if e.kind() == std::io::ErrorKind::InvalidInput {
                    // Already exited.
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(|e| CoreError::ProcessCrashed(e.to_string()))
    }
}

/// Raw platform handles for the subprocess ends of the two IPC pipes,
/// passed to the worker as command-line arguments (specification §6.2).
#[derive(Debug, Clone, Copy)]
pub enum PipeHandles {
    #[cfg(unix)]
    Posix { read_fd: i32, write_fd: i32 },
    #[cfg(windows)]
    Windows { read_handle: isize, write_handle: isize },
}

impl PipeHandles {
    fn as_args(&self) -> (String, String) {
        match self {
            #[cfg(unix)]
            PipeHandles::Posix { read_fd, write_fd } => (read_fd.to_string(), write_fd.to_string()),
            #[cfg(windows)]
            PipeHandles::Windows {
                read_handle,
                write_handle,
            } => (read_handle.to_string(), write_handle.to_string()),
        }
    }
}

/// Platform-specific process launch, separated from `IsolatedExecutor` so
/// the polling/handshake/cancellation logic above it stays platform-free.
pub trait ProcessSpawner: Send + Sync {
    fn spawn(
        &self,
        worker_path: &Path,
        pipes: PipeHandles,
        config: &IsolationConfig,
    ) -> CoreResult<SpawnedProcess>;
}

fn build_command(worker_path: &Path, pipes: PipeHandles, config: &IsolationConfig) -> std::process::Command {
    let (read_arg, write_arg) = pipes.as_args();
    let mut cmd = std::process::Command::new(worker_path);
    cmd.arg(&read_arg).arg(&write_arg);

    if let Some(dir) = &config.working_directory {
        cmd.current_dir(dir);
    }
    if !config.inherit_environment {
        cmd.env_clear();
    }
    for (key, value) in &config.environment {
        cmd.env(key, value);
    }
    if !config.extra_path.is_empty() {
        if let Some(existing) = std::env::var_os("PATH") {
            let mut paths: Vec<_> = std::env::split_paths(&existing).collect();
            paths.extend(config.extra_path.iter().cloned());
            if let Ok(joined) = std::env::join_paths(paths) {
                cmd.env("PATH", joined);
            }
        }
    }
    cmd
}

#[cfg(unix)]
pub struct PosixSpawner;

#[cfg(unix)]
impl ProcessSpawner for PosixSpawner {
    fn spawn(
        &self,
        worker_path: &Path,
        pipes: PipeHandles,
        config: &IsolationConfig,
    ) -> CoreResult<SpawnedProcess> {
        use std::os::unix::process::CommandExt;

        let mut cmd = build_command(worker_path, pipes, config);

        if matches!(config.level, IsolationLevel::Sandboxed) && config.max_memory_mb > 0 {
            let limit_bytes = config.max_memory_mb * 1024 * 1024;
            // SAFETY: `pre_exec` runs in the forked child before exec, with
            // only async-signal-safe work permitted; `setrlimit` is.
            unsafe {
                cmd.pre_exec(move || {
                    let rlimit = libc::rlimit {
                        rlim_cur: limit_bytes,
                        rlim_max: limit_bytes,
                    };
                    if libc::setrlimit(libc::RLIMIT_AS, &rlimit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let child = cmd
            .spawn()
            .map_err(|e| CoreError::ProcessSpawnFailed(e.to_string()))?;
        let pid = child.id();
        Ok(SpawnedProcess { pid, child })
    }
}

#[cfg(windows)]
pub struct WindowsSpawner;

#[cfg(windows)]
impl ProcessSpawner for WindowsSpawner {
    fn spawn(
        &self,
        worker_path: &Path,
        pipes: PipeHandles,
        config: &IsolationConfig,
    ) -> CoreResult<SpawnedProcess> {
        // Windows has no direct analog of `setrlimit(AS)`; the memory
        // ceiling for `Sandboxed` is enforced by `IsolatedExecutor`'s poll
        // loop reading `PROCESS_MEMORY_COUNTERS` via `ResourceMonitor` and
        // killing the child on excess (specification §9).
        let cmd = build_command(worker_path, pipes, config);
        let child = cmd
            .spawn()
            .map_err(|e| CoreError::ProcessSpawnFailed(e.to_string()))?;
        let pid = child.id();
        Ok(SpawnedProcess { pid, child })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IsolationConfig;

    #[test]
    #[cfg(unix)]
    fn spawns_and_waits_for_a_trivial_child() {
        let spawner = PosixSpawner;
        let config = IsolationConfig::default();
        let mut proc = spawner
            .spawn(
                Path::new("/bin/true"),
                PipeHandles::Posix {
                    read_fd: 0,
                    write_fd: 1,
                },
                &config,
            )
            .unwrap();
        let status = proc.wait(Duration::from_secs(2)).unwrap();
        assert!(status.is_some());
    }

    #[test]
    #[cfg(unix)]
    fn kill_stops_a_long_running_child() {
        // `ProcessSpawner::spawn` always appends the pipe handles as the
        // worker's first two arguments; GNU `sleep` sums multiple numeric
        // arguments, so "100 0" still sleeps ~100s, long enough to kill.
        let spawner = PosixSpawner;
        let config = IsolationConfig::default();
        let mut proc = spawner
            .spawn(
                Path::new("/bin/sleep"),
                PipeHandles::Posix {
                    read_fd: 100,
                    write_fd: 0,
                },
                &config,
            )
            .unwrap();
        assert!(proc.is_running());
        proc.kill().unwrap();
        let status = proc.wait(Duration::from_secs(2)).unwrap();
        assert!(status.is_some());
    }
}
