//! Error taxonomy for the device-control substrate.
//!
//! `CoreError` consolidates every failure mode a Device Core, Component, or
//! orchestrator can surface to a caller. The variants mirror the taxonomy in
//! the specification rather than any particular vendor SDK's error codes,
//! so adapters translate their own failures into this set at the boundary.
//!
//! # Recovery
//!
//! - [`CoreError::InvalidArgument`], [`CoreError::NotConnected`],
//!   [`CoreError::AlreadyConnected`] and friends are caller-correctable:
//!   the operation can be retried once the precondition is fixed.
//! - [`CoreError::Timeout`] is usually transient; callers may retry.
//! - [`CoreError::Fatal`] means an internal invariant broke; the Device Core
//!   that raised it should be torn down, not retried.

use thiserror::Error;

/// Primary result alias used across the device-control crates.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Resource kind exceeded by a sandboxed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Memory,
    Cpu,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Cpu => write!(f, "cpu"),
        }
    }
}

/// Consolidated error type for the device-control and isolated-execution
/// substrate (specification §7).
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// A precondition was violated by the caller (out-of-range duration,
    /// unknown filter name, malformed argument). Caller-correctable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation requiring a connected device was issued before connect.
    #[error("device not connected")]
    NotConnected,

    /// `connect` was called on an already-connected device; treated as a
    /// successful no-op by callers per the specification, but surfaced here
    /// so call sites can log it.
    #[error("device already connected")]
    AlreadyConnected,

    /// An operation requiring `initialize()` was issued before it ran.
    #[error("device core not initialized")]
    NotInitialized,

    /// `initialize()` was called twice; treated as a successful no-op.
    #[error("device core already initialized")]
    AlreadyInitialized,

    /// A named component failed to initialize during `initialize()`.
    #[error("component '{name}' failed to initialize: {reason}")]
    ComponentInitFailed { name: String, reason: String },

    /// The protocol adapter failed to initialize.
    #[error("adapter failed to initialize: {0}")]
    AdapterInitFailed(String),

    /// A device with the requested name was not found during connect/scan.
    #[error("device '{0}' not found")]
    NotFound(String),

    /// The adapter could not open the device (vendor-specific code attached).
    #[error("failed to open device (code {code})")]
    OpenFailed { code: i32 },

    /// A bounded wait elapsed (connect, wheel settle, handshake, IPC
    /// receive, temperature convergence).
    #[error("operation timed out")]
    Timeout,

    /// The underlying vendor/protocol adapter reported a failure.
    #[error("adapter error (code {code}): {message}")]
    AdapterError { code: i32, message: String },

    /// A sandbox resource limit was exceeded. `observed`/`limit` are in the
    /// resource's natural unit (bytes for memory, percent for CPU) and are
    /// best-effort: a watchdog that kills on a best-effort poll cannot
    /// promise the exact value at the instant of violation.
    #[error("resource limit exceeded: {kind} (observed {observed}, limit {limit})")]
    ResourceExceeded {
        kind: ResourceKind,
        observed: u64,
        limit: u64,
    },

    /// A cooperative cancellation was honored.
    #[error("operation cancelled")]
    Cancelled,

    /// An IPC channel was closed (EOF on read, or `close()` already called).
    #[error("channel closed")]
    ChannelClosed,

    /// A pipe-level I/O failure (distinct from protocol-level framing
    /// errors).
    #[error("pipe error: {0}")]
    PipeError(String),

    /// A received frame failed header/magic/version validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Payload (de)serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// The child process could not be spawned.
    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    /// The child process exited unexpectedly (crash, signal).
    #[error("process crashed (exit status: {0})")]
    ProcessCrashed(String),

    /// The version/capability handshake with the isolated worker failed or
    /// timed out.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// An internal invariant was violated; the owning Device Core should be
    /// torn down.
    #[error("fatal internal error: {0}")]
    Fatal(String),

    /// The isolated worker surfaced an exception while running a script.
    /// Carries whatever the worker's `Result{success=false, ...}` reported.
    #[error("script execution failed: {}", exception.as_deref().unwrap_or("unknown error"))]
    ExecutionFailed {
        exception: Option<String>,
        exception_type: Option<String>,
        traceback: Option<String>,
    },
}

impl CoreError {
    /// True for errors that are expected to be transient and worth retrying
    /// (as opposed to caller-correctable or fatal errors).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CoreError::Timeout
                | CoreError::AdapterError { .. }
                | CoreError::ChannelClosed
                | CoreError::PipeError(_)
        )
    }

    /// True for errors that should tear down the owning Device Core rather
    /// than simply failing the current operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Fatal(_))
    }
}
