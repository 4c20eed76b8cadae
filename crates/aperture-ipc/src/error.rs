//! Granular IPC-layer error taxonomy (specification §11 "IPC error
//! taxonomy granularity"), mirroring the original implementation's
//! `IPCError` enum. `aperture_core::CoreError` stays the type every
//! device-control and orchestrator API returns; `IpcError` exists so
//! framing/transport code in this crate can distinguish failure modes that
//! `CoreError::PipeError` alone would otherwise flatten, then collapses
//! onto the coarser `CoreError` taxonomy at the crate boundary via `?`.

use aperture_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IpcError {
    /// The underlying OS pipe could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A frame's payload exceeds the protocol's maximum payload size.
    #[error("message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// Encoding a payload to its wire representation failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Decoding a payload from its wire representation failed.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// A bounded wait for a frame elapsed.
    #[error("operation timed out")]
    Timeout,

    /// A read or write on the underlying pipe failed.
    #[error("pipe error: {0}")]
    PipeError(String),

    /// A frame failed header/magic/version/checksum validation.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The pipe was closed (EOF on read, or explicitly closed) before a
    /// complete frame arrived.
    #[error("channel closed")]
    ChannelClosed,

    /// The peer process the channel was reading from or writing to is no
    /// longer running.
    #[error("worker process is not running")]
    ProcessNotRunning,
}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            IpcError::ChannelClosed
        } else {
            IpcError::PipeError(e.to_string())
        }
    }
}

/// Maps the granular taxonomy onto `CoreError`'s coarser framing subset
/// (`ChannelClosed`, `PipeError`, `InvalidMessage`, `SerializationFailed`,
/// `Timeout`), so call sites outside this crate keep matching on
/// `CoreError` as before.
impl From<IpcError> for CoreError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::ConnectionFailed(m) => CoreError::PipeError(m),
            IpcError::MessageTooLarge { size, max } => CoreError::InvalidMessage(format!(
                "message of {size} bytes exceeds the {max} byte limit"
            )),
            IpcError::SerializationFailed(m) => CoreError::SerializationFailed(m),
            IpcError::DeserializationFailed(m) => CoreError::SerializationFailed(m),
            IpcError::Timeout => CoreError::Timeout,
            IpcError::PipeError(m) => CoreError::PipeError(m),
            IpcError::InvalidMessage(m) => CoreError::InvalidMessage(m),
            IpcError::ChannelClosed => CoreError::ChannelClosed,
            IpcError::ProcessNotRunning => {
                CoreError::ProcessCrashed("worker process is not running".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_eof_becomes_channel_closed() {
        let io_err = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        assert!(matches!(IpcError::from(io_err), IpcError::ChannelClosed));
    }

    #[test]
    fn other_io_errors_become_pipe_error() {
        let io_err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(matches!(IpcError::from(io_err), IpcError::PipeError(_)));
    }

    #[test]
    fn message_too_large_maps_to_invalid_message() {
        let err = IpcError::MessageTooLarge { size: 100, max: 10 };
        assert!(matches!(CoreError::from(err), CoreError::InvalidMessage(_)));
    }

    #[test]
    fn process_not_running_maps_to_process_crashed() {
        assert!(matches!(
            CoreError::from(IpcError::ProcessNotRunning),
            CoreError::ProcessCrashed(_)
        ));
    }
}
