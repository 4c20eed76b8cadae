//! Frame header and message type classification (specification §4.9, §6.1).
//!
//! Grounded on the original implementation's `message_types.hpp`: the same
//! magic, version, header layout and byte-range classification for message
//! types, re-expressed as a Rust enum with exhaustive matching instead of
//! range checks on a raw byte where that reads more idiomatically.

use crate::error::IpcError;
use aperture_core::CoreResult;
use serde::{Deserialize, Serialize};

pub const MAGIC: u32 = 0x4C49_5448; // "LITH"
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 16;
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Header flag bit meanings.
pub mod flags {
    pub const COMPRESSED: u8 = 0b0000_0001;
    pub const CHECKSUMMED: u8 = 0b0000_0010;
}

/// IPC message type, one byte on the wire, grouped into ranges by concern
/// (specification §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Handshake = 0x01,
    HandshakeAck = 0x02,
    Shutdown = 0x03,
    ShutdownAck = 0x04,
    Heartbeat = 0x05,
    HeartbeatAck = 0x06,
    Execute = 0x10,
    Result = 0x11,
    Error = 0x12,
    Cancel = 0x13,
    CancelAck = 0x14,
    Progress = 0x20,
    Log = 0x21,
    DataChunk = 0x30,
    DataEnd = 0x31,
    DataAck = 0x32,
    Query = 0x40,
    QueryResponse = 0x41,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> CoreResult<Self> {
        Ok(match byte {
            0x01 => MessageType::Handshake,
            0x02 => MessageType::HandshakeAck,
            0x03 => MessageType::Shutdown,
            0x04 => MessageType::ShutdownAck,
            0x05 => MessageType::Heartbeat,
            0x06 => MessageType::HeartbeatAck,
            0x10 => MessageType::Execute,
            0x11 => MessageType::Result,
            0x12 => MessageType::Error,
            0x13 => MessageType::Cancel,
            0x14 => MessageType::CancelAck,
            0x20 => MessageType::Progress,
            0x21 => MessageType::Log,
            0x30 => MessageType::DataChunk,
            0x31 => MessageType::DataEnd,
            0x32 => MessageType::DataAck,
            0x40 => MessageType::Query,
            0x41 => MessageType::QueryResponse,
            other => {
                return Err(IpcError::InvalidMessage(format!(
                    "unknown message type byte 0x{other:02X}"
                ))
                .into())
            }
        })
    }

    pub fn is_control(self) -> bool {
        (0x01..=0x0F).contains(&(self as u8))
    }

    pub fn is_execution(self) -> bool {
        (0x10..=0x1F).contains(&(self as u8))
    }

    pub fn is_progress(self) -> bool {
        (0x20..=0x2F).contains(&(self as u8))
    }

    pub fn is_data(self) -> bool {
        (0x30..=0x3F).contains(&(self as u8))
    }

    pub fn is_query(self) -> bool {
        (0x40..=0x4F).contains(&(self as u8))
    }
}

/// Fixed-layout 16-byte frame header, all multi-byte fields big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u8,
    pub message_type: MessageType,
    pub payload_size: u32,
    pub sequence_id: u32,
    pub flags: u8,
}

impl Header {
    pub fn new(message_type: MessageType, payload_size: u32, sequence_id: u32, flags: u8) -> Self {
        Self {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            message_type,
            payload_size,
            sequence_id,
            flags,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.message_type as u8;
        buf[6..10].copy_from_slice(&self.payload_size.to_be_bytes());
        buf[10..14].copy_from_slice(&self.sequence_id.to_be_bytes());
        buf[14] = self.flags;
        buf[15] = 0; // reserved
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> CoreResult<Self> {
        let magic = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(IpcError::InvalidMessage(format!(
                "bad magic 0x{magic:08X}, expected 0x{MAGIC:08X}"
            ))
            .into());
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(IpcError::InvalidMessage(format!(
                "unsupported protocol version {version}"
            ))
            .into());
        }
        let message_type = MessageType::from_byte(buf[5])?;
        let payload_size = u32::from_be_bytes(buf[6..10].try_into().unwrap());
        if payload_size as usize > MAX_PAYLOAD_SIZE {
            return Err(IpcError::MessageTooLarge {
                size: payload_size as usize,
                max: MAX_PAYLOAD_SIZE,
            }
            .into());
        }
        let sequence_id = u32::from_be_bytes(buf[10..14].try_into().unwrap());
        let flags = buf[14];
        Ok(Self {
            magic,
            version,
            message_type,
            payload_size,
            sequence_id,
            flags,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & flags::COMPRESSED != 0
    }

    pub fn is_checksummed(&self) -> bool {
        self.flags & flags::CHECKSUMMED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_ranges() {
        assert!(MessageType::Handshake.is_control());
        assert!(MessageType::Execute.is_execution());
        assert!(MessageType::Progress.is_progress());
        assert!(MessageType::DataChunk.is_data());
        assert!(MessageType::Query.is_query());
        assert!(!MessageType::Execute.is_control());
    }

    #[test]
    fn from_byte_rejects_unknown() {
        assert!(MessageType::from_byte(0xFF).is_err());
    }

    #[test]
    fn header_round_trips() {
        let header = Header::new(MessageType::Execute, 42, 7, flags::COMPRESSED);
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(header, decoded);
        assert!(decoded.is_compressed());
        assert!(!decoded.is_checksummed());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut buf = Header::new(MessageType::Heartbeat, 0, 0, 0).encode();
        buf[0] = 0;
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn decode_rejects_oversize_payload() {
        let mut buf = Header::new(MessageType::DataChunk, 0, 0, 0).encode();
        buf[6..10].copy_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_be_bytes());
        assert!(Header::decode(&buf).is_err());
    }

    #[test]
    fn decode_accepts_exact_max_payload() {
        let mut buf = Header::new(MessageType::DataChunk, 0, 0, 0).encode();
        buf[6..10].copy_from_slice(&(MAX_PAYLOAD_SIZE as u32).to_be_bytes());
        assert!(Header::decode(&buf).is_ok());
    }
}
