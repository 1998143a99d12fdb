//! Per-connection protocol state
//!
//! A [`Session`] turns a non-blocking byte stream into whole [`Message`]s and
//! drains queued response frames back out, tolerating partial reads and
//! partial writes at every step:
//!
//! ```text
//! AwaitingHeader --8 bytes--> AwaitingPayload --N bytes--> Ready(Message)
//!       ^                                                       |
//!       +------------------- take_message() -------------------+
//! ```
//!
//! Any state moves to `Disconnected` on end of stream, on an I/O error, or
//! on a header whose length is above the configured limit. A payload that
//! fails to decode is logged and dropped, and the session goes back to
//! waiting for the next header.
//!
//! The session only ever reads through `std::io::Read` and writes through
//! `std::io::Write`, so the multiplexer can drive it with a real socket and
//! the tests with in-memory mocks.

use crate::error::NotifyError;
use crate::lock;
use log::{debug, warn};
use shared::{decode, FrameHeader, Message, HEADER_LEN};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// Outbound frame queue of one connection.
///
/// This is the only structure shared between the multiplexer thread, which
/// drains it, and the worker pool, which fills it with responses and pushes.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
    awaiting_response: AtomicBool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a complete frame. Returns false once the connection is closed.
    pub fn push(&self, frame: Vec<u8>) -> bool {
        if self.is_closed() {
            return false;
        }
        lock(&self.queue).push_back(frame);
        self.notify.notify_one();
        true
    }

    /// Queues an unsolicited frame, refusing it once `limit` frames are
    /// already waiting to be written.
    pub fn offer(&self, frame: Vec<u8>, limit: usize) -> Result<(), NotifyError> {
        if self.is_closed() {
            return Err(NotifyError::Closed);
        }
        let mut queue = lock(&self.queue);
        if queue.len() >= limit {
            return Err(NotifyError::Backlogged {
                pending: queue.len(),
            });
        }
        queue.push_back(frame);
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    /// Marks a request of this connection as handed to the worker pool.
    pub fn begin_request(&self) {
        self.awaiting_response.store(true, Ordering::SeqCst);
    }

    /// Queues the response to the in-flight request and allows the
    /// connection to read its next request.
    pub fn complete_request(&self, frame: Option<Vec<u8>>) {
        if let Some(frame) = frame {
            self.push(frame);
        }
        self.awaiting_response.store(false, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_awaiting_response(&self) -> bool {
        self.awaiting_response.load(Ordering::SeqCst)
    }

    pub fn has_pending(&self) -> bool {
        !lock(&self.queue).is_empty()
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.queue).clear();
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn take_frames(&self) -> Vec<Vec<u8>> {
        lock(&self.queue).drain(..).collect()
    }

    /// Resolves after the next push, completed request or close.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }
}

/// Observable state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHeader,
    AwaitingPayload,
    Ready,
    Disconnected,
}

#[derive(Debug)]
enum ReadState {
    AwaitingHeader {
        buf: [u8; HEADER_LEN],
        filled: usize,
    },
    AwaitingPayload {
        header: FrameHeader,
        buf: Vec<u8>,
        filled: usize,
    },
    Ready(Message),
    Disconnected,
}

impl ReadState {
    fn awaiting_header() -> Self {
        ReadState::AwaitingHeader {
            buf: [0u8; HEADER_LEN],
            filled: 0,
        }
    }
}

/// Result of one incremental read step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// The socket has no more data for now.
    WouldBlock,
    /// A whole message is waiting in [`Session::take_message`].
    Ready,
    Disconnected,
}

/// Result of one incremental write step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Every queued frame has been flushed.
    Drained,
    /// The socket cannot take more bytes for now.
    WouldBlock,
    Disconnected,
}

pub struct Session {
    id: u64,
    read: ReadState,
    write_offset: usize,
    max_payload: u32,
    discarded: u64,
}

impl Session {
    pub fn new(id: u64, max_payload: u32) -> Self {
        Self {
            id,
            read: ReadState::awaiting_header(),
            write_offset: 0,
            max_payload,
            discarded: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        match self.read {
            ReadState::AwaitingHeader { .. } => SessionState::AwaitingHeader,
            ReadState::AwaitingPayload { .. } => SessionState::AwaitingPayload,
            ReadState::Ready(_) => SessionState::Ready,
            ReadState::Disconnected => SessionState::Disconnected,
        }
    }

    /// Header of the frame whose payload is being read, if any.
    pub fn pending_header(&self) -> Option<FrameHeader> {
        match self.read {
            ReadState::AwaitingPayload { header, .. } => Some(header),
            _ => None,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self.read, ReadState::Disconnected)
    }

    /// Frames dropped because their payload could not be decoded.
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    pub fn disconnect(&mut self) {
        self.read = ReadState::Disconnected;
    }

    /// Hands out the decoded message and starts waiting for the next header.
    pub fn take_message(&mut self) -> Option<Message> {
        if !matches!(self.read, ReadState::Ready(_)) {
            return None;
        }
        match std::mem::replace(&mut self.read, ReadState::awaiting_header()) {
            ReadState::Ready(message) => Some(message),
            _ => None,
        }
    }

    /// Reads as much as the reader has, stopping at the end of one message.
    ///
    /// The header and payload reads never ask for more bytes than the
    /// current frame still needs, so bytes of the next frame stay in the
    /// socket until this one has been taken.
    pub fn read_step<R: Read>(&mut self, reader: &mut R) -> ReadProgress {
        loop {
            let result = match &mut self.read {
                ReadState::Ready(_) => return ReadProgress::Ready,
                ReadState::Disconnected => return ReadProgress::Disconnected,
                ReadState::AwaitingHeader { buf, filled } => reader.read(&mut buf[*filled..]),
                ReadState::AwaitingPayload { buf, filled, .. } => reader.read(&mut buf[*filled..]),
            };

            match result {
                Ok(0) => {
                    debug!("Session {} reached end of stream", self.id);
                    self.read = ReadState::Disconnected;
                    return ReadProgress::Disconnected;
                }
                Ok(n) => self.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadProgress::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Session {} read error: {}", self.id, e);
                    self.read = ReadState::Disconnected;
                    return ReadProgress::Disconnected;
                }
            }
        }
    }

    fn advance(&mut self, n: usize) {
        match &mut self.read {
            ReadState::AwaitingHeader { buf, filled } => {
                *filled += n;
                if *filled < HEADER_LEN {
                    return;
                }
                let header = FrameHeader::parse(buf);
                if let Err(e) = header.check_len(self.max_payload) {
                    warn!("Session {} sent an unacceptable frame: {}", self.id, e);
                    self.read = ReadState::Disconnected;
                    return;
                }
                if header.len == 0 {
                    self.finish_frame(header, &[]);
                } else {
                    self.read = ReadState::AwaitingPayload {
                        header,
                        buf: vec![0u8; header.len as usize],
                        filled: 0,
                    };
                }
            }
            ReadState::AwaitingPayload { header, buf, filled } => {
                *filled += n;
                if *filled < buf.len() {
                    return;
                }
                let header = *header;
                let payload = std::mem::take(buf);
                self.finish_frame(header, &payload);
            }
            ReadState::Ready(_) | ReadState::Disconnected => {}
        }
    }

    fn finish_frame(&mut self, header: FrameHeader, payload: &[u8]) {
        match decode(header.tag, payload) {
            Ok(message) => {
                debug!("Session {} received {}", self.id, message.kind());
                self.read = ReadState::Ready(message);
            }
            Err(e) if e.is_fatal() => {
                warn!("Session {} protocol error: {}", self.id, e);
                self.read = ReadState::Disconnected;
            }
            Err(e) => {
                warn!("Session {} discarded a frame: {}", self.id, e);
                self.discarded += 1;
                self.read = ReadState::awaiting_header();
            }
        }
    }

    /// Writes queued frames until the queue is empty or the writer is full.
    /// A frame leaves the queue only after its last byte has been written.
    pub fn write_step<W: Write>(&mut self, outbox: &Outbox, writer: &mut W) -> WriteProgress {
        loop {
            let mut queue = lock(&outbox.queue);
            let Some(front) = queue.front() else {
                return WriteProgress::Drained;
            };

            match writer.write(&front[self.write_offset..]) {
                Ok(0) => {
                    self.read = ReadState::Disconnected;
                    return WriteProgress::Disconnected;
                }
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset == front.len() {
                        queue.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return WriteProgress::WouldBlock,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Session {} write error: {}", self.id, e);
                    self.read = ReadState::Disconnected;
                    return WriteProgress::Disconnected;
                }
            }
        }
    }

    /// The loop reads only when no request of this connection is in flight
    /// and no decoded message is waiting.
    pub fn wants_read(&self, outbox: &Outbox) -> bool {
        matches!(
            self.read,
            ReadState::AwaitingHeader { .. } | ReadState::AwaitingPayload { .. }
        ) && !outbox.is_awaiting_response()
    }

    pub fn wants_write(&self, outbox: &Outbox) -> bool {
        !self.is_disconnected() && outbox.has_pending()
    }
}
