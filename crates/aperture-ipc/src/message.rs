//! Typed message payloads carried over the framed protocol (specification
//! §4.9, §4.10, §6.1).

use crate::error::IpcError;
use crate::header::{flags, Header, MessageType, COMPRESSION_THRESHOLD, MAX_PAYLOAD_SIZE};
use aperture_core::CoreResult;
use serde::{Deserialize, Serialize};

/// A decoded header plus its raw JSON payload bytes. Typed payload structs
/// below are encoded into / decoded out of `body` on demand, so a relay
/// that only needs to forward messages never pays for (de)serialization.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Message {
    /// Build a message by serializing `payload` to JSON. Rejects payloads
    /// that would exceed the protocol's 64 MiB limit.
    pub fn encode<T: Serialize>(
        message_type: MessageType,
        sequence_id: u32,
        payload: &T,
    ) -> CoreResult<Self> {
        let body = serde_json::to_vec(payload)
            .map_err(|e| IpcError::SerializationFailed(e.to_string()))?;
        if body.len() > MAX_PAYLOAD_SIZE {
            return Err(IpcError::MessageTooLarge {
                size: body.len(),
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        let mut flag_bits = 0u8;
        if body.len() > COMPRESSION_THRESHOLD {
            // The wire format reserves this bit; no compressor is wired up
            // yet (specification §9), so it is never set by this encoder.
            flag_bits &= !flags::COMPRESSED;
        }
        let header = Header::new(message_type, body.len() as u32, sequence_id, flag_bits);
        Ok(Self { header, body })
    }

    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> CoreResult<T> {
        if self.header.is_compressed() {
            return Err(IpcError::DeserializationFailed(
                "compressed payloads are not supported by this build".into(),
            )
            .into());
        }
        serde_json::from_slice(&self.body)
            .map_err(|e| IpcError::DeserializationFailed(e.to_string()).into())
    }
}

/// Sent by the parent immediately after spawning the child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub protocol_version: u8,
    pub capabilities: Vec<String>,
}

/// Sent by the child in response to `HandshakePayload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeAckPayload {
    pub protocol_version: u8,
    pub worker_version: String,
    pub capabilities: Vec<String>,
    pub pid: u32,
}

/// Payload of an `Execute` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub script_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(default)]
    pub arguments: serde_json::Value,
    pub timeout_s: f64,
    #[serde(default = "default_true")]
    pub capture_output: bool,
    #[serde(default)]
    pub allowed_imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Payload of a `Progress` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percentage: f64,
    pub message: String,
    pub current_step: String,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub est_remaining_ms: Option<u64>,
}

/// Payload of a `Log` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
}

/// Payload of a `Result` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    pub execution_time_ms: u64,
    pub peak_memory_bytes: u64,
}

/// Payload of an `Error` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}
