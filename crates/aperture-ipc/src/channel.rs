//! Full-duplex channel composed of two `PipeChannel`s (specification §4.9
//! "BidirectionalChannel").

use crate::header::MessageType;
use crate::message::{HandshakeAckPayload, HandshakePayload, Message};
use crate::pipe::PipeChannel;
use aperture_core::{CoreError, CoreResult};
use std::time::Duration;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const PROTOCOL_VERSION: u8 = crate::header::PROTOCOL_VERSION;

/// Two independent `PipeChannel`s: one carries parent-to-child traffic, the
/// other child-to-parent. Each side reads its own `PipeChannel`'s inbound
/// pipe and writes the other one's outbound pipe.
pub struct BidirectionalChannel {
    parent_to_child: PipeChannel,
    child_to_parent: PipeChannel,
    role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unset,
    Parent,
    Child,
}

impl BidirectionalChannel {
    pub fn create() -> CoreResult<Self> {
        Ok(Self {
            parent_to_child: PipeChannel::create()?,
            child_to_parent: PipeChannel::create()?,
            role: Role::Unset,
        })
    }

    /// Reconstruct the child side of a channel from the raw handles passed
    /// on the worker's command line (specification §6.2): the worker reads
    /// the parent-to-child pipe and writes the child-to-parent pipe.
    #[cfg(unix)]
    pub fn from_worker_handles(read_fd: i32, write_fd: i32) -> Self {
        use std::os::unix::io::FromRawFd;
        // SAFETY: the caller (the worker's `main`) received these as
        // freshly-inherited, still-open descriptors from its parent and
        // passes ownership to this channel exactly once.
        let reader = unsafe { os_pipe::PipeReader::from_raw_fd(read_fd) };
        let writer = unsafe { os_pipe::PipeWriter::from_raw_fd(write_fd) };
        Self {
            parent_to_child: PipeChannel::from_reader(reader),
            child_to_parent: PipeChannel::from_writer(writer),
            role: Role::Child,
        }
    }

    #[cfg(windows)]
    pub fn from_worker_handles(read_handle: isize, write_handle: isize) -> Self {
        use std::os::windows::io::FromRawHandle;
        // SAFETY: see the unix `from_worker_handles` above.
        let reader = unsafe { os_pipe::PipeReader::from_raw_handle(read_handle as _) };
        let writer = unsafe { os_pipe::PipeWriter::from_raw_handle(write_handle as _) };
        Self {
            parent_to_child: PipeChannel::from_reader(reader),
            child_to_parent: PipeChannel::from_writer(writer),
            role: Role::Child,
        }
    }

    /// Raw handles that must be handed to the spawned child process: the
    /// parent-to-child pipe's read end and the child-to-parent pipe's write
    /// end.
    #[cfg(unix)]
    pub fn subprocess_handles(&self) -> CoreResult<(i32, i32)> {
        let read = self
            .parent_to_child
            .read_raw_handle()
            .ok_or(CoreError::ChannelClosed)?;
        let write = self
            .child_to_parent
            .write_raw_handle()
            .ok_or(CoreError::ChannelClosed)?;
        Ok((read, write))
    }

    #[cfg(windows)]
    pub fn subprocess_handles(&self) -> CoreResult<(isize, isize)> {
        let read = self
            .parent_to_child
            .read_raw_handle()
            .ok_or(CoreError::ChannelClosed)?;
        let write = self
            .child_to_parent
            .write_raw_handle()
            .ok_or(CoreError::ChannelClosed)?;
        Ok((read, write))
    }

    /// Drop the ends this process doesn't need once the child has its own
    /// copies (after spawn, with descriptor inheritance already done).
    pub fn setup_parent(&mut self) {
        self.role = Role::Parent;
        self.parent_to_child.close_read();
        self.child_to_parent.close_write();
    }

    pub fn setup_child(&mut self) {
        self.role = Role::Child;
        self.parent_to_child.close_write();
        self.child_to_parent.close_read();
    }

    fn outbound(&self) -> &PipeChannel {
        match self.role {
            Role::Parent => &self.parent_to_child,
            Role::Child => &self.child_to_parent,
            Role::Unset => &self.parent_to_child,
        }
    }

    fn inbound(&self) -> &PipeChannel {
        match self.role {
            Role::Parent => &self.child_to_parent,
            Role::Child => &self.parent_to_child,
            Role::Unset => &self.child_to_parent,
        }
    }

    pub fn send(&self, message: &Message) -> CoreResult<()> {
        self.outbound().send(message)
    }

    pub fn receive(&self, timeout: Duration) -> CoreResult<Message> {
        self.inbound().receive(timeout)
    }

    pub fn has_data(&self) -> bool {
        self.inbound().has_data()
    }

    pub fn next_sequence_id(&self) -> u32 {
        self.outbound().next_sequence_id()
    }

    pub fn close(&self) {
        self.parent_to_child.close();
        self.child_to_parent.close();
    }

    pub fn is_open(&self) -> bool {
        self.parent_to_child.is_open() || self.child_to_parent.is_open()
    }

    /// Parent side: send `Handshake`, wait up to `timeout` for
    /// `HandshakeAck`, validate protocol version.
    pub fn perform_handshake(&self, timeout: Duration) -> CoreResult<HandshakeAckPayload> {
        let seq = self.next_sequence_id();
        let request = HandshakePayload {
            protocol_version: PROTOCOL_VERSION,
            capabilities: vec!["execute".into(), "progress".into(), "cancel".into()],
        };
        let message = Message::encode(MessageType::Handshake, seq, &request)?;
        self.send(&message)?;

        let reply = self
            .receive(timeout)
            .map_err(|e| CoreError::HandshakeFailed(format!("no ack within {timeout:?}: {e}")))?;
        if reply.header.message_type != MessageType::HandshakeAck {
            return Err(CoreError::HandshakeFailed(format!(
                "expected HandshakeAck, got {:?}",
                reply.header.message_type
            )));
        }
        let ack: HandshakeAckPayload = reply
            .decode_payload()
            .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;
        if ack.protocol_version != PROTOCOL_VERSION {
            return Err(CoreError::HandshakeFailed(format!(
                "protocol version mismatch: parent {PROTOCOL_VERSION}, child {}",
                ack.protocol_version
            )));
        }
        Ok(ack)
    }

    /// Child side: wait for `Handshake`, reply with `HandshakeAck` carrying
    /// this process's pid and version.
    pub fn respond_to_handshake(&self, worker_version: &str) -> CoreResult<()> {
        let request = self
            .receive(HANDSHAKE_TIMEOUT)
            .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;
        if request.header.message_type != MessageType::Handshake {
            return Err(CoreError::HandshakeFailed(format!(
                "expected Handshake, got {:?}",
                request.header.message_type
            )));
        }
        let incoming: HandshakePayload = request
            .decode_payload()
            .map_err(|e| CoreError::HandshakeFailed(e.to_string()))?;
        if incoming.protocol_version != PROTOCOL_VERSION {
            return Err(CoreError::HandshakeFailed(format!(
                "protocol version mismatch: child {PROTOCOL_VERSION}, parent {}",
                incoming.protocol_version
            )));
        }

        let ack = HandshakeAckPayload {
            protocol_version: PROTOCOL_VERSION,
            worker_version: worker_version.to_string(),
            capabilities: incoming.capabilities,
            pid: std::process::id(),
        };
        let seq = self.next_sequence_id();
        let message = Message::encode(MessageType::HandshakeAck, seq, &ack)?;
        self.send(&message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn respond_to_handshake_rejects_wrong_message_type() {
        let mut chan = BidirectionalChannel::create().unwrap();
        let bogus = Message::encode(MessageType::Heartbeat, 0, &serde_json::json!({})).unwrap();
        // Write while both ends are still open, then switch to the child
        // role — the OS pipe buffers the already-written bytes, so closing
        // the write end afterward doesn't lose them.
        chan.parent_to_child.send(&bogus).unwrap();
        chan.setup_child();
        let result = chan.respond_to_handshake("test-worker");
        assert!(matches!(result, Err(CoreError::HandshakeFailed(_))));
    }

    #[test]
    fn full_handshake_over_loopback_pipes() {
        let chan = Arc::new(BidirectionalChannel::create().unwrap());
        // Exercise both roles against the same underlying pipe pair by
        // driving sends/receives directly on each named pipe rather than
        // through `setup_parent`/`setup_child`, which would otherwise
        // closes ends this single-process test still needs.
        let parent_req = HandshakePayload {
            protocol_version: PROTOCOL_VERSION,
            capabilities: vec!["execute".into()],
        };
        let seq = chan.parent_to_child.next_sequence_id();
        let msg = Message::encode(MessageType::Handshake, seq, &parent_req).unwrap();
        chan.parent_to_child.send(&msg).unwrap();

        let chan_child = Arc::clone(&chan);
        let worker = thread::spawn(move || {
            let received = chan_child
                .parent_to_child
                .receive(Duration::from_secs(1))
                .unwrap();
            let incoming: HandshakePayload = received.decode_payload().unwrap();
            assert_eq!(incoming.protocol_version, PROTOCOL_VERSION);
            let ack = HandshakeAckPayload {
                protocol_version: PROTOCOL_VERSION,
                worker_version: "test-1.0".into(),
                capabilities: incoming.capabilities,
                pid: std::process::id(),
            };
            let seq = chan_child.child_to_parent.next_sequence_id();
            let ack_msg = Message::encode(MessageType::HandshakeAck, seq, &ack).unwrap();
            chan_child.child_to_parent.send(&ack_msg).unwrap();
        });
        worker.join().unwrap();

        let reply = chan
            .child_to_parent
            .receive(Duration::from_secs(1))
            .unwrap();
        let ack: HandshakeAckPayload = reply.decode_payload().unwrap();
        assert_eq!(ack.worker_version, "test-1.0");
    }
}
