//! The isolated executor (specification §4.10): spawn a worker, perform the
//! handshake, send `Execute`, poll for progress/log/result messages while
//! enforcing the timeout and memory ceiling, and support cooperative
//! cancellation with an escalation to `kill`.

use crate::config::IsolationConfig;
use crate::discovery::find_worker_executable;
use crate::error::RunnerError;
use crate::monitor::ResourceMonitor;
use crate::spawner::{PipeHandles, ProcessSpawner, SpawnedProcess};
use aperture_core::{CoreError, CoreResult};
use aperture_ipc::{BidirectionalChannel, ExecuteRequest, ExecutionResult, LogMessage, Message, MessageType, ProgressUpdate};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CANCEL_GRACE: Duration = Duration::from_secs(2);
const CLEANUP_WAIT: Duration = Duration::from_secs(5);

pub type ProgressCallback = dyn Fn(ProgressUpdate) + Send + Sync;
pub type LogCallback = dyn Fn(LogMessage) + Send + Sync;

#[cfg(unix)]
fn default_spawner() -> Box<dyn ProcessSpawner> {
    Box::new(crate::spawner::PosixSpawner)
}

#[cfg(windows)]
fn default_spawner() -> Box<dyn ProcessSpawner> {
    Box::new(crate::spawner::WindowsSpawner)
}

#[cfg(unix)]
fn clear_cloexec(fd: i32) {
    // SAFETY: `fd` is a valid descriptor owned by this process; clearing
    // FD_CLOEXEC is required so the worker, exec'd via the numeric-argument
    // handoff in `§6.2`, still has these descriptors open post-exec.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFD);
        if flags >= 0 {
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }
    }
}

/// Runs one operator script to completion inside a spawned worker process.
pub struct IsolatedExecutor {
    config: IsolationConfig,
    spawner: Box<dyn ProcessSpawner>,
    progress_callback: Mutex<Option<Box<ProgressCallback>>>,
    log_callback: Mutex<Option<Box<LogCallback>>>,
    cancel_requested: Arc<AtomicBool>,
    running_pid: Mutex<Option<u32>>,
}

impl IsolatedExecutor {
    pub fn new(config: IsolationConfig) -> Self {
        Self {
            config,
            spawner: default_spawner(),
            progress_callback: Mutex::new(None),
            log_callback: Mutex::new(None),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            running_pid: Mutex::new(None),
        }
    }

    /// Inject a spawner, for tests that need a fake or instrumented
    /// process launch path.
    pub fn with_spawner(config: IsolationConfig, spawner: Box<dyn ProcessSpawner>) -> Self {
        Self {
            config,
            spawner,
            progress_callback: Mutex::new(None),
            log_callback: Mutex::new(None),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            running_pid: Mutex::new(None),
        }
    }

    pub fn set_progress_callback<F>(&self, callback: F)
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        *self.progress_callback.lock() = Some(Box::new(callback));
    }

    pub fn set_log_callback<F>(&self, callback: F)
    where
        F: Fn(LogMessage) + Send + Sync + 'static,
    {
        *self.log_callback.lock() = Some(Box::new(callback));
    }

    /// Request cancellation of the currently running execution, if any.
    /// Cooperative: honored by `execute`'s poll loop within
    /// [`CANCEL_GRACE`] before escalating to a hard kill.
    pub fn cancel(&self) -> bool {
        let was_running = self.running_pid.lock().is_some();
        self.cancel_requested.store(true, Ordering::SeqCst);
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.running_pid.lock().is_some()
    }

    pub fn current_pid(&self) -> Option<u32> {
        *self.running_pid.lock()
    }

    /// Execute one script. Blocking; intended to be called from a thread
    /// the caller has already dedicated to this execution (the teacher's
    /// daq worker-thread convention, mirrored here for hardware-I/O loops).
    pub fn execute(&self, request: ExecuteRequest) -> CoreResult<ExecutionResult> {
        self.config
            .validate()
            .map_err(CoreError::InvalidArgument)?;
        self.cancel_requested.store(false, Ordering::SeqCst);

        let worker_path = find_worker_executable(self.config.worker_path.as_deref())
            .ok_or(RunnerError::WorkerNotFound)?;

        let mut channel = BidirectionalChannel::create()?;
        let pipes = self.build_pipe_handles(&channel)?;

        info!(worker = %worker_path.display(), "spawning isolated worker");
        let mut process = self
            .spawner
            .spawn(&worker_path, pipes, &self.config)
            .inspect_err(|e| warn!(error = %e, "worker spawn failed"))?;
        *self.running_pid.lock() = Some(process.pid);

        channel.setup_parent();

        let handshake_result = channel.perform_handshake(Duration::from_secs(5));
        let ack = match handshake_result {
            Ok(ack) => ack,
            Err(e) => {
                let _ = process.kill();
                *self.running_pid.lock() = None;
                return Err(e);
            }
        };
        debug!(pid = ack.pid, version = %ack.worker_version, "handshake complete");

        let result = self.run_execution_loop(&channel, &mut process, request);

        self.cleanup(&channel, &mut process);
        *self.running_pid.lock() = None;
        result
    }

    #[cfg(unix)]
    fn build_pipe_handles(&self, channel: &BidirectionalChannel) -> CoreResult<PipeHandles> {
        let (read_fd, write_fd) = channel.subprocess_handles()?;
        clear_cloexec(read_fd);
        clear_cloexec(write_fd);
        Ok(PipeHandles::Posix { read_fd, write_fd })
    }

    #[cfg(windows)]
    fn build_pipe_handles(&self, channel: &BidirectionalChannel) -> CoreResult<PipeHandles> {
        let (read_handle, write_handle) = channel.subprocess_handles()?;
        Ok(PipeHandles::Windows {
            read_handle,
            write_handle,
        })
    }

    fn run_execution_loop(
        &self,
        channel: &BidirectionalChannel,
        process: &mut SpawnedProcess,
        request: ExecuteRequest,
    ) -> CoreResult<ExecutionResult> {
        let seq = channel.next_sequence_id();
        let execute_msg = Message::encode(MessageType::Execute, seq, &request)?;
        channel.send(&execute_msg)?;

        let deadline = Instant::now() + Duration::from_secs_f64(request.timeout_s);
        let mut monitor = ResourceMonitor::new();
        let mut cancel_deadline: Option<Instant> = None;

        loop {
            if cancel_deadline.is_none() && self.cancel_requested.load(Ordering::SeqCst) {
                info!(pid = process.pid, "cancellation requested, sending Cancel");
                let seq = channel.next_sequence_id();
                if let Ok(msg) = Message::encode(MessageType::Cancel, seq, &serde_json::json!({})) {
                    let _ = channel.send(&msg);
                }
                cancel_deadline = Some(Instant::now() + CANCEL_GRACE);
            }

            if let Some(grace) = cancel_deadline {
                if Instant::now() >= grace {
                    warn!(pid = process.pid, "cancel grace expired, killing worker");
                    let _ = process.kill();
                    return Err(RunnerError::Cancelled.into());
                }
            }

            if Instant::now() >= deadline {
                warn!(pid = process.pid, "execution timed out, killing worker");
                let _ = process.kill();
                return Err(RunnerError::Timeout.into());
            }

            if self.config.max_memory_mb > 0 {
                if let Some(rss) = monitor.rss_bytes(process.pid) {
                    let limit_bytes = self.config.max_memory_mb * 1024 * 1024;
                    if rss > limit_bytes {
                        warn!(pid = process.pid, rss, limit_bytes, "memory limit exceeded, killing worker");
                        let _ = process.kill();
                        return Err(RunnerError::MemoryLimitExceeded {
                            observed: rss,
                            limit: limit_bytes,
                        }
                        .into());
                    }
                }
            }

            match channel.receive(POLL_INTERVAL) {
                Ok(message) => {
                    if let Some(outcome) = self.handle_message(&message, cancel_deadline.is_some())? {
                        return Ok(outcome);
                    }
                }
                Err(CoreError::Timeout) => continue,
                Err(CoreError::ChannelClosed) => return Err(RunnerError::ProcessNotRunning.into()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Returns `Some(result)` when the loop should terminate.
    fn handle_message(&self, message: &Message, cancelling: bool) -> CoreResult<Option<ExecutionResult>> {
        match message.header.message_type {
            MessageType::Progress => {
                let update: ProgressUpdate = message.decode_payload()?;
                if let Some(cb) = self.progress_callback.lock().as_ref() {
                    cb(update);
                }
                Ok(None)
            }
            MessageType::Log => {
                let log: LogMessage = message.decode_payload()?;
                if let Some(cb) = self.log_callback.lock().as_ref() {
                    cb(log);
                }
                Ok(None)
            }
            MessageType::Result => {
                let result: ExecutionResult = message.decode_payload()?;
                if !result.success {
                    return Err(CoreError::ExecutionFailed {
                        exception: result.exception,
                        exception_type: result.exception_type,
                        traceback: result.traceback,
                    });
                }
                Ok(Some(result))
            }
            MessageType::CancelAck if cancelling => Err(CoreError::Cancelled),
            MessageType::Error => {
                let payload: aperture_ipc::ErrorPayload = message.decode_payload()?;
                Err(CoreError::AdapterError {
                    code: payload.code.unwrap_or(-1),
                    message: payload.message,
                })
            }
            other => {
                debug!(?other, "ignoring message type during execution");
                Ok(None)
            }
        }
    }

    fn cleanup(&self, channel: &BidirectionalChannel, process: &mut SpawnedProcess) {
        match process.wait(CLEANUP_WAIT) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(pid = process.pid, "worker did not exit within cleanup window, killing");
                let _ = process.kill();
            }
            Err(e) => warn!(pid = process.pid, error = %e, "error waiting for worker exit"),
        }
        channel.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_returns_false_when_nothing_is_running() {
        let executor = IsolatedExecutor::new(IsolationConfig::default());
        assert!(!executor.cancel());
    }

    #[test]
    fn callbacks_can_be_set_without_a_running_execution() {
        let executor = IsolatedExecutor::new(IsolationConfig::default());
        executor.set_progress_callback(|_update| {});
        executor.set_log_callback(|_log| {});
        assert!(!executor.is_running());
    }

    #[test]
    fn invalid_config_is_rejected_before_any_spawn_attempt() {
        let mut config = IsolationConfig::secure();
        config.max_memory_mb = 0;
        let executor = IsolatedExecutor::new(config);
        let request = ExecuteRequest {
            script_content: "noop".into(),
            script_path: None,
            function_name: None,
            arguments: serde_json::json!({}),
            timeout_s: 1.0,
            capture_output: true,
            allowed_imports: vec![],
            working_directory: None,
        };
        let result = executor.execute(request);
        assert!(matches!(result, Err(CoreError::InvalidArgument(_))));
    }
}
