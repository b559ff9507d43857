use crate::admin::{AdminCommand, LineReader};
use crate::config::BrokerConfig;
use crate::logging;
use crate::net::channel::{Channel, ChannelId, ChannelState};
use crate::net::frame::{self, Command, ControlFrame};
use crate::net::measurement::{self, Measurement};
use crate::session::{LoginOutcome, SessionId, SessionRegistry};
use crate::subscription::{SubscribeError, SubscriptionIndex};
use crate::support::{ErrorType, ErrorUtils, NetworkError, NetworkResult};
use mio::net::{TcpListener, UdpSocket};
use mio::unix::EventedFd;
use std::io;
use std::net::SocketAddr;

const LISTENER_TOKEN: mio::Token = mio::Token(0);
const INGEST_TOKEN: mio::Token = mio::Token(1);
const ADMIN_TOKEN: mio::Token = mio::Token(2);
/// Channel ids are offset past the fixed endpoint tokens.
const CHANNEL_TOKEN_BASE: usize = 3;

#[inline]
fn channel_token(id: ChannelId) -> mio::Token {
    mio::Token(CHANNEL_TOKEN_BASE + id)
}

#[inline]
fn token_channel(token: mio::Token) -> ChannelId {
    usize::from(token) - CHANNEL_TOKEN_BASE
}

/// The broker endpoint. Owns the listening socket, the datagram ingest
/// socket, the administrator channel, every subscriber stream, the session
/// registry and the subscription index; all mutation is serialized through
/// one readiness loop.
pub struct Endpoint {
    listener: TcpListener,
    ingest: UdpSocket,
    admin: LineReader,

    poll: mio::Poll,
    events: mio::Events,
    ready: Vec<(mio::Token, mio::Ready)>,

    channels: Vec<Channel>,
    free: Vec<ChannelId>,

    registry: SessionRegistry,
    subscriptions: SubscriptionIndex,

    read_capacity: usize,
    write_capacity: usize,
    datagram: Box<[u8]>,

    log: logging::Logger,
}

impl Endpoint {
    /// Binds both endpoints to the given port on all interfaces and wires up
    /// the poll. Any failure here is fatal for startup.
    pub fn new(port: u16, config: &BrokerConfig, log: logging::Logger) -> NetworkResult<Endpoint> {
        let address: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

        let listener = TcpListener::bind(&address)?;
        let ingest = UdpSocket::bind(&address)?;
        let admin = LineReader::stdin();
        let poll = mio::Poll::new()?;

        poll.register(&listener, LISTENER_TOKEN, mio::Ready::readable(), mio::PollOpt::edge())?;
        poll.register(&ingest, INGEST_TOKEN, mio::Ready::readable(), mio::PollOpt::edge())?;
        // The admin descriptor stays blocking and is read once per event, so
        // level triggering keeps leftover lines flowing.
        poll.register(
            &EventedFd(&admin.fd()),
            ADMIN_TOKEN,
            mio::Ready::readable(),
            mio::PollOpt::level(),
        )?;

        logging::info!(log, "broker listening"; "port" => port);

        Ok(Endpoint {
            listener,
            ingest,
            admin,
            poll,
            events: mio::Events::with_capacity(1024),
            ready: Vec::new(),
            channels: Vec::new(),
            free: Vec::new(),
            registry: SessionRegistry::new(),
            subscriptions: SubscriptionIndex::new(),
            read_capacity: config.read_buffer,
            write_capacity: config.write_buffer,
            datagram: vec![0u8; measurement::RECORD_SIZE].into_boxed_slice(),
            log,
        })
    }

    /// Runs the dispatcher until the operator requests shutdown. Each
    /// readiness pass services ready endpoints in order; handlers run to
    /// completion, so none observes concurrent mutation.
    pub fn run(&mut self) -> NetworkResult<()> {
        loop {
            if let Err(err) = self.poll.poll(&mut self.events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            self.ready.clear();
            self.ready
                .extend(self.events.iter().map(|event| (event.token(), event.readiness())));

            for index in 0..self.ready.len() {
                let (token, readiness) = self.ready[index];

                match token {
                    LISTENER_TOKEN => self.handle_accept(),
                    INGEST_TOKEN => self.handle_datagrams(),
                    ADMIN_TOKEN => {
                        if self.handle_admin()? {
                            return Ok(());
                        }
                    }
                    token => self.handle_channel(token_channel(token), readiness),
                }
            }
        }
    }

    /// Accepts all pending connections, parking each on a pooled channel in
    /// handshake state until its login frame arrives.
    fn handle_accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    let id = match self.free.pop() {
                        Some(id) => id,
                        None => {
                            let id = self.channels.len();
                            self.channels
                                .push(Channel::new(self.read_capacity, self.write_capacity, &self.log));
                            id
                        }
                    };

                    self.channels[id].open(id, stream);

                    if self.channels[id].register(channel_token(id), &self.poll).has_failed() {
                        logging::error!(self.log, "stream registration failed";
                                        "channel_id" => id, "peer" => %peer);
                        self.channels[id].close();
                        self.free.push(id);
                        continue;
                    }

                    logging::debug!(self.log, "connection accepted"; "channel_id" => id, "peer" => %peer);
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::error!(self.log, "accept failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    /// Receives all pending datagrams, decoding and fanning each one out.
    /// Malformed datagrams are dropped and the endpoint keeps going.
    fn handle_datagrams(&mut self) {
        loop {
            match self.ingest.recv_from(&mut self.datagram) {
                Ok((len, from)) => self.handle_measurement(len, from),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    logging::error!(self.log, "ingest receive failed"; "error" => %err);
                    break;
                }
            }
        }
    }

    fn handle_measurement(&mut self, len: usize, from: SocketAddr) {
        let measurement = match Measurement::decode(&self.datagram[..len]) {
            Ok(measurement) => measurement,
            Err(err) => {
                logging::warn!(self.log, "malformed datagram dropped";
                               "from" => %from, "len" => len, "error" => ?err);
                return;
            }
        };

        let notification = ControlFrame::new(format!("{}:{} - {}", from.ip(), from.port(), measurement));
        let targets = self.subscriptions.match_topic(&measurement.topic);

        logging::debug!(self.log, "measurement received";
                        "topic" => %measurement.topic,
                        "from" => %from,
                        "matched" => targets.len());

        for session_id in targets {
            self.deliver(session_id, &notification);
        }
    }

    /// Sends one notification to a session, gated on the active flag. A
    /// failed send tears the stream down but leaves the session and its
    /// subscriptions behind for a later reconnect; delivery to the remaining
    /// targets continues.
    fn deliver(&mut self, session_id: SessionId, notification: &ControlFrame) {
        let session = self.registry.session(session_id);

        let channel_id = match (session.active, session.channel) {
            (true, Some(channel_id)) => channel_id,
            _ => return,
        };

        let queued = self.channels[channel_id].write_frame(notification);

        if queued.is_err() || self.channels[channel_id].send().has_failed() {
            logging::warn!(self.log, "notification send failed, dropping stream";
                           "client" => %self.registry.session(session_id).name,
                           "channel_id" => channel_id);
            self.drop_channel(channel_id);
        }
    }

    /// Services the administrator channel. Returns true when the operator
    /// requested shutdown.
    fn handle_admin(&mut self) -> NetworkResult<bool> {
        let lines = match self.admin.read_lines() {
            Ok(lines) => lines,
            Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                logging::info!(self.log, "admin channel closed");
                drop(self.poll.deregister(&EventedFd(&self.admin.fd())));
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        };

        for line in lines {
            match AdminCommand::parse(&line) {
                Some(AdminCommand::Exit) => {
                    self.shutdown();
                    return Ok(true);
                }
                Some(AdminCommand::Unlisted(input)) => {
                    logging::warn!(self.log, "unlisted command"; "input" => %input);
                }
                None => (),
            }
        }

        Ok(false)
    }

    /// Broadcasts a Quit record to every open stream and tears them all
    /// down. The listening and ingest sockets drop with the endpoint.
    fn shutdown(&mut self) {
        logging::info!(self.log, "broker shutting down";
                       "sessions" => self.registry.len(),
                       "patterns" => self.subscriptions.len());

        let quit = ControlFrame::new(frame::REPLY_QUIT);

        for id in 0..self.channels.len() {
            let channel = &mut self.channels[id];

            if let ChannelState::Disconnected = channel.state() {
                continue;
            }

            drop(channel.write_frame(&quit));
            drop(channel.send());
            drop(channel.deregister(&self.poll));
            channel.close();
        }
    }

    /// Services readiness on one subscriber stream.
    fn handle_channel(&mut self, id: ChannelId, readiness: mio::Ready) {
        if let ChannelState::Disconnected = self.channels[id].state() {
            // Stale readiness for a recycled slot.
            return;
        }

        if readiness.is_readable() {
            loop {
                let received = self.channels[id].receive();

                if !self.drain_frames(id) {
                    return;
                }

                match received {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(NetworkError::Wait) => break,
                    Err(NetworkError::Fatal(err)) => {
                        self.stream_failed(id, err);
                        return;
                    }
                }
            }
        }

        if readiness.is_writable() && self.channels[id].has_egress() {
            if let Err(NetworkError::Fatal(err)) = self.channels[id].send() {
                self.stream_failed(id, err);
            }
        }
    }

    /// Interprets every complete frame buffered on the channel. Returns
    /// false once the channel has been torn down.
    fn drain_frames(&mut self, id: ChannelId) -> bool {
        loop {
            let frame = match self.channels[id].read_frame() {
                Ok(frame) => frame,
                Err(NetworkError::Wait) => return true,
                Err(NetworkError::Fatal(err)) => {
                    self.stream_failed(id, err);
                    return false;
                }
            };

            let live = match self.channels[id].state() {
                ChannelState::Handshake => self.handle_login(id, frame),
                ChannelState::Connected(session_id) => self.handle_request(id, session_id, frame),
                ChannelState::Disconnected => false,
            };

            if !live {
                return false;
            }
        }
    }

    /// Applies the login rules to the first frame on a fresh stream.
    fn handle_login(&mut self, id: ChannelId, frame: ControlFrame) -> bool {
        let name = frame.message.trim();

        if !SessionRegistry::valid_identifier(name) {
            logging::warn!(self.log, "invalid client identifier";
                           "channel_id" => id, "identifier" => %name);
            self.drop_channel(id);
            return false;
        }

        let peer = self.channels[id].peer_addr();

        match self.registry.login(name, id, peer) {
            LoginOutcome::Duplicate => {
                logging::info!(self.log, "Client {} already connected.", name);

                drop(self.channels[id].write_frame(&ControlFrame::new(frame::REPLY_QUIT)));
                drop(self.channels[id].send());
                self.drop_channel(id);

                false
            }
            LoginOutcome::Created(session_id) | LoginOutcome::Rebound(session_id) => {
                self.channels[id].set_connected(session_id);

                if !self.acknowledge(id) {
                    return false;
                }

                match peer {
                    Some(peer) => logging::info!(self.log, "New client {} connected from {}.", name, peer),
                    None => logging::info!(self.log, "New client {} connected.", name),
                }

                true
            }
        }
    }

    /// Interprets one request frame from a logged-in subscriber.
    fn handle_request(&mut self, id: ChannelId, session_id: SessionId, frame: ControlFrame) -> bool {
        match Command::parse(&frame.message) {
            Command::Quit => {
                logging::info!(self.log, "Client {} disconnected.", self.registry.session(session_id).name);
                self.drop_channel(id);
                false
            }
            Command::Subscribe(pattern) => {
                match self.subscriptions.subscribe(session_id, pattern) {
                    Ok(()) => logging::debug!(self.log, "subscribed";
                                              "client" => %self.registry.session(session_id).name,
                                              "pattern" => %pattern),
                    Err(SubscribeError::AlreadySubscribed) => {
                        logging::debug!(self.log, "client already subscribed";
                                        "client" => %self.registry.session(session_id).name,
                                        "pattern" => %pattern)
                    }
                    Err(SubscribeError::PatternTooLong) => {
                        logging::warn!(self.log, "pattern rejected, too long";
                                       "client" => %self.registry.session(session_id).name,
                                       "len" => pattern.len())
                    }
                }

                self.acknowledge(id)
            }
            Command::Unsubscribe(selector) => {
                match self.subscriptions.unsubscribe(session_id, selector) {
                    Ok(removed) => logging::debug!(self.log, "unsubscribed";
                                                   "client" => %self.registry.session(session_id).name,
                                                   "selector" => %selector,
                                                   "patterns" => removed),
                    Err(_) => logging::debug!(self.log, "unsubscribe selector did not compile";
                                              "client" => %self.registry.session(session_id).name,
                                              "selector" => %selector),
                }

                self.acknowledge(id)
            }
            Command::Other(message) => {
                // Unknown verbs get no reply.
                logging::debug!(self.log, "ignoring unknown request";
                                "client" => %self.registry.session(session_id).name,
                                "message" => %message);
                true
            }
        }
    }

    /// Queues and flushes the Success acknowledgement. Returns false if the
    /// stream had to be torn down.
    fn acknowledge(&mut self, id: ChannelId) -> bool {
        if self.channels[id].write_frame(&ControlFrame::new(frame::REPLY_SUCCESS)).is_err() {
            self.stream_failed(id, ErrorType::Io(io::ErrorKind::WriteZero));
            return false;
        }

        match self.channels[id].send() {
            Err(NetworkError::Fatal(err)) => {
                self.stream_failed(id, err);
                false
            }
            _ => true,
        }
    }

    /// Records a failed stream and releases it. The session, if one was
    /// bound, goes inactive but keeps its subscriptions.
    fn stream_failed(&mut self, id: ChannelId, err: ErrorType) {
        match self.registry.session_by_channel(id) {
            Some(session_id) => {
                logging::warn!(self.log, "subscriber stream failed";
                               "client" => %self.registry.session(session_id).name,
                               "error" => ?err);
            }
            None => {
                logging::debug!(self.log, "stream dropped during handshake";
                                "channel_id" => id, "error" => ?err);
            }
        }

        self.drop_channel(id);
    }

    /// Releases a stream: detaches the session (if any), deregisters from
    /// the poll and recycles the channel slot.
    fn drop_channel(&mut self, id: ChannelId) {
        if let Some(session_id) = self.registry.session_by_channel(id) {
            self.registry.disconnect(session_id);
        }

        let channel = &mut self.channels[id];

        drop(channel.deregister(&self.poll));
        channel.close();
        self.free.push(id);
    }
}
