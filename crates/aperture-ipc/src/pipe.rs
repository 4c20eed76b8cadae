//! Unidirectional pipe channel (specification §4.9 "PipeChannel").
//!
//! Grounded on the original `channel.hpp`/`channel.cpp`: one OS pipe with a
//! read end and a write end, used unidirectionally once `close_read` or
//! `close_write` discards the end this process doesn't need. Rust has no
//! portable `select`/timeout on a raw pipe file descriptor without pulling
//! in an async runtime or a polling crate, so `receive(timeout)` is backed
//! by a dedicated blocking reader thread that parses frames off the pipe
//! and forwards them through a channel — the foreground call becomes a
//! plain `recv_timeout`.

use crate::error::IpcError;
use crate::header::{flags, Header, HEADER_SIZE};
use crate::message::Message;
use aperture_core::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

enum ReaderState {
    /// Reader end still owned by this process but no background thread has
    /// started consuming it yet.
    Idle(Option<os_pipe::PipeReader>),
    /// Background thread is draining frames into `rx`.
    Started(mpsc::Receiver<CoreResult<Message>>),
    /// `close_read`/`close` was called, or the background thread observed
    /// EOF and exited.
    Closed,
}

/// A single OS pipe used as a one-way message channel.
pub struct PipeChannel {
    writer: Mutex<Option<os_pipe::PipeWriter>>,
    reader: Mutex<ReaderState>,
    /// At most one frame read ahead of the last `receive`/`has_data` call,
    /// so `has_data` can peek without losing the frame.
    peeked: Mutex<Option<CoreResult<Message>>>,
    sequence_id: AtomicU32,
}

fn read_frame<R: Read>(reader: &mut R) -> CoreResult<Message> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).map_err(IpcError::from)?;
    let header = Header::decode(&header_buf)?;

    let mut body = vec![0u8; header.payload_size as usize];
    reader.read_exact(&mut body).map_err(IpcError::from)?;

    if header.is_checksummed() {
        let mut crc_buf = [0u8; 4];
        reader.read_exact(&mut crc_buf).map_err(IpcError::from)?;
        let expected = u32::from_be_bytes(crc_buf);
        let actual = crc32fast::hash(&body);
        if actual != expected {
            return Err(IpcError::InvalidMessage(format!(
                "checksum mismatch: expected {expected:08x}, got {actual:08x}"
            ))
            .into());
        }
    }

    Ok(Message { header, body })
}

impl PipeChannel {
    /// Allocate a new OS pipe. Mirrors `PipeChannel::create()`.
    pub fn create() -> CoreResult<Self> {
        let (reader, writer) =
            os_pipe::pipe().map_err(|e| IpcError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(ReaderState::Idle(Some(reader))),
            peeked: Mutex::new(None),
            sequence_id: AtomicU32::new(0),
        })
    }

    /// Reconstruct a read-only channel from a file descriptor/handle the
    /// worker inherited from its parent (specification §6.2 launch
    /// contract: the worker receives raw handles as CLI arguments, not a
    /// freshly created pipe pair).
    pub fn from_reader(reader: os_pipe::PipeReader) -> Self {
        Self {
            writer: Mutex::new(None),
            reader: Mutex::new(ReaderState::Idle(Some(reader))),
            peeked: Mutex::new(None),
            sequence_id: AtomicU32::new(0),
        }
    }

    /// Reconstruct a write-only channel from an inherited handle.
    pub fn from_writer(writer: os_pipe::PipeWriter) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(ReaderState::Closed),
            peeked: Mutex::new(None),
            sequence_id: AtomicU32::new(0),
        }
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().is_some() || !matches!(*self.reader.lock(), ReaderState::Closed)
    }

    /// Raw, platform-specific handle for the read end, for passing to a
    /// child process before `close_read` discards this process's copy.
    #[cfg(unix)]
    pub fn read_raw_handle(&self) -> Option<i32> {
        use std::os::unix::io::AsRawFd;
        match &*self.reader.lock() {
            ReaderState::Idle(Some(r)) => Some(r.as_raw_fd()),
            _ => None,
        }
    }

    #[cfg(unix)]
    pub fn write_raw_handle(&self) -> Option<i32> {
        use std::os::unix::io::AsRawFd;
        self.writer.lock().as_ref().map(|w| w.as_raw_fd())
    }

    #[cfg(windows)]
    pub fn read_raw_handle(&self) -> Option<isize> {
        use std::os::windows::io::AsRawHandle;
        match &*self.reader.lock() {
            ReaderState::Idle(Some(r)) => Some(r.as_raw_handle() as isize),
            _ => None,
        }
    }

    #[cfg(windows)]
    pub fn write_raw_handle(&self) -> Option<isize> {
        use std::os::windows::io::AsRawHandle;
        self.writer.lock().as_ref().map(|w| w.as_raw_handle() as isize)
    }

    /// Discard this process's copy of the read end (parent keeping only the
    /// write end, or vice versa, after the child has inherited its copy).
    pub fn close_read(&self) {
        *self.reader.lock() = ReaderState::Closed;
    }

    pub fn close_write(&self) {
        *self.writer.lock() = None;
    }

    pub fn close(&self) {
        self.close_read();
        self.close_write();
    }

    pub fn next_sequence_id(&self) -> u32 {
        self.sequence_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Serialize and write `message`. Retries partial writes until the
    /// whole frame lands or an error occurs.
    pub fn send(&self, message: &Message) -> CoreResult<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(CoreError::ChannelClosed)?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + message.body.len() + 4);
        frame.extend_from_slice(&message.header.encode());
        frame.extend_from_slice(&message.body);
        if message.header.flags & flags::CHECKSUMMED != 0 {
            frame.extend_from_slice(&crc32fast::hash(&message.body).to_be_bytes());
        }

        writer.write_all(&frame).map_err(IpcError::from)?;
        writer.flush().map_err(IpcError::from).map_err(CoreError::from)
    }

    fn ensure_reader_started(&self) {
        let mut guard = self.reader.lock();
        if let ReaderState::Idle(slot) = &mut *guard {
            if let Some(mut reader) = slot.take() {
                let (tx, rx) = mpsc::channel();
                thread::spawn(move || loop {
                    let frame = read_frame(&mut reader);
                    let is_closed = matches!(frame, Err(CoreError::ChannelClosed));
                    if tx.send(frame).is_err() || is_closed {
                        break;
                    }
                });
                *guard = ReaderState::Started(rx);
            }
        }
    }

    /// Block up to `timeout` for the next frame.
    pub fn receive(&self, timeout: Duration) -> CoreResult<Message> {
        if let Some(peeked) = self.peeked.lock().take() {
            return peeked;
        }
        self.ensure_reader_started();
        let guard = self.reader.lock();
        match &*guard {
            ReaderState::Started(rx) => match rx.recv_timeout(timeout) {
                Ok(result) => result,
                Err(mpsc::RecvTimeoutError::Timeout) => Err(CoreError::Timeout),
                Err(mpsc::RecvTimeoutError::Disconnected) => Err(CoreError::ChannelClosed),
            },
            ReaderState::Idle(_) | ReaderState::Closed => Err(CoreError::ChannelClosed),
        }
    }

    /// Non-blocking poll for pending data.
    pub fn has_data(&self) -> bool {
        if self.peeked.lock().is_some() {
            return true;
        }
        self.ensure_reader_started();
        let guard = self.reader.lock();
        if let ReaderState::Started(rx) = &*guard {
            if let Ok(result) = rx.recv_timeout(Duration::from_millis(0)) {
                *self.peeked.lock() = Some(result);
                return true;
            }
        }
        false
    }
}
