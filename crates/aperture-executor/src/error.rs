//! Process-lifecycle error taxonomy for the isolated executor
//! (specification §11 "IPC error taxonomy granularity" /
//! "Python/executor discovery"). Wraps [`aperture_ipc::IpcError`] plus the
//! spawn/handshake/resource-limit failures that only make sense once a
//! child process is involved, then collapses onto `CoreError` at the crate
//! boundary via `?` the same way `IpcError` does.

use aperture_core::{CoreError, ResourceKind};
use aperture_ipc::IpcError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    #[error(transparent)]
    Ipc(#[from] IpcError),

    #[error("failed to spawn worker process: {0}")]
    ProcessSpawnFailed(String),

    #[error("worker executable not found")]
    WorkerNotFound,

    #[error("handshake with worker failed: {0}")]
    HandshakeFailed(String),

    #[error("memory limit exceeded: {observed} bytes (limit {limit} bytes)")]
    MemoryLimitExceeded { observed: u64, limit: u64 },

    #[error("execution timed out")]
    Timeout,

    #[error("execution cancelled")]
    Cancelled,

    #[error("worker process is not running")]
    ProcessNotRunning,
}

impl From<RunnerError> for CoreError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::Ipc(ipc) => ipc.into(),
            RunnerError::ProcessSpawnFailed(m) => CoreError::ProcessSpawnFailed(m),
            RunnerError::WorkerNotFound => {
                CoreError::ProcessSpawnFailed("worker executable not found".into())
            }
            RunnerError::HandshakeFailed(m) => CoreError::HandshakeFailed(m),
            RunnerError::MemoryLimitExceeded { observed, limit } => CoreError::ResourceExceeded {
                kind: ResourceKind::Memory,
                observed,
                limit,
            },
            RunnerError::Timeout => CoreError::Timeout,
            RunnerError::Cancelled => CoreError::Cancelled,
            RunnerError::ProcessNotRunning => {
                CoreError::ProcessCrashed("worker process is not running".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_not_found_maps_to_process_spawn_failed() {
        assert!(matches!(
            CoreError::from(RunnerError::WorkerNotFound),
            CoreError::ProcessSpawnFailed(_)
        ));
    }

    #[test]
    fn memory_limit_exceeded_maps_to_resource_exceeded() {
        let err = RunnerError::MemoryLimitExceeded {
            observed: 200,
            limit: 100,
        };
        match CoreError::from(err) {
            CoreError::ResourceExceeded { kind, observed, limit } => {
                assert_eq!(kind, ResourceKind::Memory);
                assert_eq!(observed, 200);
                assert_eq!(limit, 100);
            }
            other => panic!("expected ResourceExceeded, got {other:?}"),
        }
    }

    #[test]
    fn ipc_error_is_transparently_wrapped() {
        let err: RunnerError = IpcError::ChannelClosed.into();
        assert!(matches!(CoreError::from(err), CoreError::ChannelClosed));
    }
}
