use crate::logging;
use crate::net::buffer::Buffer;
use crate::net::frame::{self, ControlFrame};
use crate::session::SessionId;
use crate::support::{NetworkError, NetworkResult};
use mio::net::TcpStream;
use std::net::{Shutdown, SocketAddr};

pub type ChannelId = usize;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelState {
    /// Stream accepted, awaiting the login frame.
    Handshake,
    /// Login resolved to a session.
    Connected(SessionId),
    Disconnected,
}

/// A single subscriber stream with buffered nonblocking I/O on both sides.
/// Channels are pooled by the endpoint and recycled across connections.
pub struct Channel {
    id: Option<ChannelId>,

    stream: Option<TcpStream>,
    state: ChannelState,
    peer: Option<SocketAddr>,

    read_buffer: Buffer,
    write_buffer: Buffer,

    log: logging::Logger,
}

impl Channel {
    /// Initializes a pooled channel. Buffer capacities are raised to hold at
    /// least one full control record each way.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        read_capacity: usize,
        write_capacity: usize,
        log: L,
    ) -> Channel {
        let channel_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::null(),
        };

        Channel {
            id: None,
            stream: None,
            state: ChannelState::Disconnected,
            peer: None,
            read_buffer: Buffer::new(read_capacity.max(frame::RECORD_SIZE)),
            write_buffer: Buffer::new(write_capacity.max(frame::RECORD_SIZE)),
            log: channel_log,
        }
    }

    /// Binds the channel to a freshly accepted stream. The channel must be
    /// closed for this operation to succeed.
    pub fn open(&mut self, id: ChannelId, stream: TcpStream) {
        if self.state != ChannelState::Disconnected {
            panic!("Attempted to open an already open channel");
        }

        self.id = Some(id);
        self.peer = stream.peer_addr().ok();
        self.state = ChannelState::Handshake;
        self.stream = Some(stream);

        logging::debug!(self.log, "channel opened"; "channel_id" => id, "peer" => ?self.peer);
    }

    /// Closes the channel and shuts the underlying stream down, dropping any
    /// buffered data.
    pub fn close(&mut self) {
        logging::debug!(self.log, "closing channel";
                        "channel_id" => self.id,
                        "pending_read" => self.read_buffer.len(),
                        "pending_write" => self.write_buffer.len());

        self.read_buffer.clear();
        self.write_buffer.clear();
        self.id = None;
        self.peer = None;
        self.state = ChannelState::Disconnected;

        if let Some(stream) = self.stream.take() {
            // The peer may have torn the stream down already.
            drop(stream.shutdown(Shutdown::Both));
        }
    }

    #[inline]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Marks the handshake as resolved.
    #[inline]
    pub fn set_connected(&mut self, session: SessionId) {
        self.state = ChannelState::Connected(session);
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns true if there is outgoing data pending on the channel.
    #[inline]
    pub fn has_egress(&self) -> bool {
        !self.write_buffer.is_empty()
    }

    /// Registers this channel's stream on the supplied poll.
    pub fn register(&self, token: mio::Token, poll: &mio::Poll) -> NetworkResult<()> {
        poll.register(
            self.stream.as_ref().expect("Can't register disconnected channel"),
            token,
            mio::Ready::readable() | mio::Ready::writable(),
            mio::PollOpt::edge(),
        )
        .map_err(Into::into)
    }

    /// Deregisters this channel's stream from the supplied poll.
    pub fn deregister(&self, poll: &mio::Poll) -> NetworkResult<()> {
        poll.deregister(self.stream.as_ref().expect("Can't deregister disconnected channel"))
            .map_err(Into::into)
    }

    /// Drains the socket into the read buffer. Returns the number of bytes
    /// read before the socket would block; a closed or failed peer is fatal.
    pub fn receive(&mut self) -> NetworkResult<usize> {
        let stream = self.stream.as_ref().expect("Channel must have valid stream");

        self.read_buffer.ingress(stream).map_err(Into::into)
    }

    /// Flushes the write buffer to the socket. A would-block leaves the
    /// remainder for the next writable readiness event.
    pub fn send(&mut self) -> NetworkResult<usize> {
        if self.write_buffer.is_empty() {
            return Ok(0);
        }

        let stream = self.stream.as_ref().expect("Channel must have valid stream");

        self.write_buffer.egress(stream).map_err(Into::into)
    }

    /// Reads one control record off the buffered stream. `Wait` until the
    /// full record has arrived.
    pub fn read_frame(&mut self) -> NetworkResult<ControlFrame> {
        let frame = ControlFrame::read(self.read_buffer.read_slice())?;

        self.read_buffer.move_head(frame::RECORD_SIZE);

        logging::trace!(self.log, "frame read";
                        "channel_id" => self.id,
                        "message" => %frame.message);

        Ok(frame)
    }

    /// Queues one control record. `Wait` means the write buffer cannot take
    /// a full record; callers treat that as a failed (slow) consumer.
    pub fn write_frame(&mut self, frame: &ControlFrame) -> NetworkResult<()> {
        if self.write_buffer.free_capacity() < frame::RECORD_SIZE {
            return Err(NetworkError::Wait);
        }

        let mut slice = self.write_buffer.write_slice();
        frame.write(&mut slice)?;
        self.write_buffer.move_tail(frame::RECORD_SIZE);

        logging::trace!(self.log, "frame queued";
                        "channel_id" => self.id,
                        "message" => %frame.message);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn test_write_read_frame_roundtrip() {
        let mut channel = Channel::new(4096, 4096, None);

        channel
            .write_frame(&ControlFrame::new("subscribe sensors/+"))
            .unwrap();

        mem::swap(&mut channel.read_buffer, &mut channel.write_buffer);

        let frame = channel.read_frame().unwrap();

        assert_eq!(frame.message, "subscribe sensors/+");
        assert!(channel.read_buffer.is_empty());
    }

    #[test]
    fn test_frames_preserve_order() {
        let mut channel = Channel::new(8192, 8192, None);

        channel.write_frame(&ControlFrame::new("first")).unwrap();
        channel.write_frame(&ControlFrame::new("second")).unwrap();

        mem::swap(&mut channel.read_buffer, &mut channel.write_buffer);

        assert_eq!(channel.read_frame().unwrap().message, "first");
        assert_eq!(channel.read_frame().unwrap().message, "second");
        assert_eq!(channel.read_frame().unwrap_err(), NetworkError::Wait);
    }

    #[test]
    fn test_read_frame_waits_for_full_record() {
        let mut channel = Channel::new(4096, 4096, None);

        channel.read_buffer.write_slice()[..10].copy_from_slice(&[1u8; 10]);
        channel.read_buffer.move_tail(10);

        assert_eq!(channel.read_frame().unwrap_err(), NetworkError::Wait);
        // The partial record stays buffered.
        assert_eq!(channel.read_buffer.len(), 10);
    }

    #[test]
    fn test_write_frame_waits_when_buffer_is_full() {
        let mut channel = Channel::new(4096, 4096, None);

        let spare = channel.write_buffer.free_capacity();
        channel.write_buffer.move_tail(spare - frame::RECORD_SIZE + 1);

        let result = channel.write_frame(&ControlFrame::new("Success"));

        assert_eq!(result.unwrap_err(), NetworkError::Wait);
    }

    #[test]
    fn test_buffers_hold_at_least_one_record() {
        let channel = Channel::new(16, 16, None);

        assert!(channel.read_buffer.capacity() >= frame::RECORD_SIZE);
        assert!(channel.write_buffer.capacity() >= frame::RECORD_SIZE);
    }

    #[test]
    fn test_new_channel_is_disconnected() {
        let channel = Channel::new(4096, 4096, None);

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(channel.peer_addr(), None);
        assert!(!channel.has_egress());
    }
}
