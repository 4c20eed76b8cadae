//! Binary framed IPC protocol and pipe-based transport for the isolated
//! script executor: header framing, message types, and the
//! `PipeChannel`/`BidirectionalChannel` abstractions that carry them.

pub mod channel;
pub mod error;
pub mod header;
pub mod message;
pub mod pipe;

pub use channel::BidirectionalChannel;
pub use error::IpcError;
pub use header::{flags, Header, MessageType, HEADER_SIZE, MAGIC, MAX_PAYLOAD_SIZE, PROTOCOL_VERSION};
pub use message::{
    ErrorPayload, ExecuteRequest, ExecutionResult, HandshakeAckPayload, HandshakePayload,
    LogMessage, Message, ProgressUpdate,
};
pub use pipe::PipeChannel;
