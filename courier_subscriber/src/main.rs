use courier_core::admin::LineReader;
use courier_core::logging;
use courier_core::net::buffer::Buffer;
use courier_core::net::frame::{self, ControlFrame};
use courier_core::session::SessionRegistry;
use courier_core::support::{NetworkError, NetworkResult};
use mio::net::TcpStream;
use mio::unix::EventedFd;
use std::collections::VecDeque;
use std::env;
use std::io::{self, Read, Write};
use std::net;
use std::process;

const STDIN_TOKEN: mio::Token = mio::Token(0);
const STREAM_TOKEN: mio::Token = mio::Token(1);

const BUFFER_CAPACITY: usize = 8192;

/// A command sent to the broker and awaiting its Success acknowledgement.
enum Pending {
    Subscribe(String),
    Unsubscribe(String),
}

struct Subscriber {
    stream: TcpStream,
    read_buffer: Buffer,
    write_buffer: Buffer,
    pending: VecDeque<Pending>,
    log: logging::Logger,
}

impl Subscriber {
    fn new(stream: TcpStream, log: logging::Logger) -> Subscriber {
        Subscriber {
            stream,
            read_buffer: Buffer::new(BUFFER_CAPACITY),
            write_buffer: Buffer::new(BUFFER_CAPACITY),
            pending: VecDeque::new(),
            log,
        }
    }

    fn receive(&mut self) -> NetworkResult<usize> {
        self.read_buffer.ingress(&self.stream).map_err(Into::into)
    }

    fn flush(&mut self) -> NetworkResult<usize> {
        if self.write_buffer.is_empty() {
            return Ok(0);
        }

        self.write_buffer.egress(&self.stream).map_err(Into::into)
    }

    /// Queues one record and flushes as much as the socket takes.
    fn send_frame(&mut self, frame_out: &ControlFrame) -> NetworkResult<()> {
        if self.write_buffer.free_capacity() < frame::RECORD_SIZE {
            return Err(NetworkError::Wait);
        }

        let mut slice = self.write_buffer.write_slice();
        frame_out.write(&mut slice)?;
        self.write_buffer.move_tail(frame::RECORD_SIZE);

        match self.flush() {
            Err(NetworkError::Fatal(err)) => Err(NetworkError::Fatal(err)),
            _ => Ok(()),
        }
    }

    /// Interprets every complete record buffered from the broker. Returns
    /// true once the broker said Quit.
    fn drain_frames(&mut self) -> NetworkResult<bool> {
        loop {
            let frame_in = match ControlFrame::read(self.read_buffer.read_slice()) {
                Ok(frame_in) => {
                    self.read_buffer.move_head(frame::RECORD_SIZE);
                    frame_in
                }
                Err(NetworkError::Wait) => return Ok(false),
                Err(err) => return Err(err),
            };

            if frame_in.message == frame::REPLY_QUIT {
                return Ok(true);
            }

            if frame_in.message == frame::REPLY_SUCCESS {
                self.confirm();
                continue;
            }

            // Everything else is a notification.
            println!("{}", frame_in.message);
        }
    }

    fn confirm(&mut self) {
        match self.pending.pop_front() {
            Some(Pending::Subscribe(topic)) => println!("Subscribed to topic {}", topic),
            Some(Pending::Unsubscribe(topic)) => println!("Unsubscribed from topic {}", topic),
            None => logging::debug!(self.log, "unsolicited acknowledgement"),
        }
    }
}

/// Connects and performs the login handshake over the still-blocking stream:
/// one identifier record out, one Success or Quit record back.
fn login(address: net::SocketAddr, client_id: &str) -> Result<net::TcpStream, String> {
    let mut stream = net::TcpStream::connect(&address)
        .map_err(|err| format!("connection to broker failed: {}", err))?;

    drop(stream.set_nodelay(true));

    let mut record = Vec::with_capacity(frame::RECORD_SIZE);
    ControlFrame::new(client_id)
        .write(&mut record)
        .map_err(|err| format!("login frame encoding failed: {:?}", err))?;

    stream
        .write_all(&record)
        .map_err(|err| format!("login send failed: {}", err))?;

    let mut reply = vec![0u8; frame::RECORD_SIZE];
    stream
        .read_exact(&mut reply)
        .map_err(|err| format!("login reply failed: {}", err))?;

    let reply = ControlFrame::read(&reply).map_err(|err| format!("login reply malformed: {:?}", err))?;

    if reply.message == frame::REPLY_SUCCESS {
        Ok(stream)
    } else {
        Err(format!("login rejected, identifier {} is already connected", client_id))
    }
}

/// Services one batch of operator input lines. Returns true when the session
/// should end.
fn handle_input(subscriber: &mut Subscriber, commands: &mut LineReader) -> NetworkResult<bool> {
    let lines = match commands.read_lines() {
        Ok(lines) => lines,
        // Operator input ended; leave like an explicit exit.
        Err(ref err) if err.kind() == io::ErrorKind::UnexpectedEof => {
            drop(subscriber.send_frame(&ControlFrame::new(frame::REPLY_QUIT)));
            return Ok(true);
        }
        Err(err) => return Err(err.into()),
    };

    for line in lines {
        let line = line.trim();

        if line == "exit" {
            drop(subscriber.send_frame(&ControlFrame::new(frame::REPLY_QUIT)));
            return Ok(true);
        }

        let mut tokens = line.split_whitespace();

        match (tokens.next(), tokens.next()) {
            (Some("subscribe"), Some(topic)) => {
                subscriber.send_frame(&ControlFrame::new(line))?;
                subscriber.pending.push_back(Pending::Subscribe(topic.to_owned()));
            }
            (Some("unsubscribe"), Some(topic)) => {
                subscriber.send_frame(&ControlFrame::new(line))?;
                subscriber.pending.push_back(Pending::Unsubscribe(topic.to_owned()));
            }
            (None, _) => (),
            _ => {
                logging::warn!(subscriber.log, "unlisted command, usage: subscribe <TOPIC> / unsubscribe <TOPIC>";
                               "input" => %line);
            }
        }
    }

    Ok(false)
}

/// Services readiness on the broker stream. Returns true when the broker
/// closed the session.
fn handle_stream(subscriber: &mut Subscriber) -> NetworkResult<bool> {
    loop {
        let received = subscriber.receive();

        if subscriber.drain_frames()? {
            return Ok(true);
        }

        match received {
            Ok(0) => return Ok(false),
            Ok(_) => continue,
            Err(NetworkError::Wait) => return Ok(false),
            Err(NetworkError::Fatal(err)) => {
                logging::warn!(subscriber.log, "broker stream failed"; "error" => ?err);
                return Ok(true);
            }
        }
    }
}

fn run(subscriber: &mut Subscriber, commands: &mut LineReader, poll: &mio::Poll) -> NetworkResult<()> {
    let mut events = mio::Events::with_capacity(64);

    loop {
        if let Err(err) = poll.poll(&mut events, None) {
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }

        for event in &events {
            match event.token() {
                STDIN_TOKEN => {
                    if handle_input(subscriber, commands)? {
                        return Ok(());
                    }
                }
                STREAM_TOKEN => {
                    if event.readiness().is_readable() && handle_stream(subscriber)? {
                        return Ok(());
                    }

                    if event.readiness().is_writable() {
                        if let Err(NetworkError::Fatal(err)) = subscriber.flush() {
                            logging::warn!(subscriber.log, "broker stream failed"; "error" => ?err);
                            return Ok(());
                        }
                    }
                }
                _ => (),
            }
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 4 {
        eprintln!("Usage: subscriber <client_id> <broker_ip> <broker_port>");
        process::exit(1);
    }

    let client_id = &args[1];

    if !SessionRegistry::valid_identifier(client_id) {
        eprintln!("subscriber: invalid client id '{}'", client_id);
        process::exit(1);
    }

    let address: net::SocketAddr = match format!("{}:{}", args[2], args[3]).parse() {
        Ok(address) => address,
        Err(_) => {
            eprintln!("subscriber: invalid broker address {}:{}", args[2], args[3]);
            process::exit(1);
        }
    };

    let log = match logging::init(&logging::stderr_config()) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("subscriber: logger setup failed: {}", err);
            process::exit(1);
        }
    };

    let stream = match login(address, client_id) {
        Ok(stream) => stream,
        Err(message) => {
            eprintln!("subscriber: {}", message);
            process::exit(1);
        }
    };

    logging::info!(log, "connected to broker"; "client_id" => %client_id, "broker" => %address);

    let stream = match TcpStream::from_stream(stream) {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!("subscriber: stream setup failed: {}", err);
            process::exit(1);
        }
    };

    let mut commands = LineReader::stdin();

    let poll = match setup_poll(&stream, &commands) {
        Ok(poll) => poll,
        Err(err) => {
            eprintln!("subscriber: poll setup failed: {}", err);
            process::exit(1);
        }
    };

    let mut subscriber = Subscriber::new(stream, log.clone());

    if let Err(err) = run(&mut subscriber, &mut commands, &poll) {
        logging::error!(log, "session failed"; "error" => ?err);
        process::exit(1);
    }
}

fn setup_poll(stream: &TcpStream, commands: &LineReader) -> io::Result<mio::Poll> {
    let poll = mio::Poll::new()?;

    poll.register(
        stream,
        STREAM_TOKEN,
        mio::Ready::readable() | mio::Ready::writable(),
        mio::PollOpt::edge(),
    )?;
    poll.register(
        &EventedFd(&commands.fd()),
        STDIN_TOKEN,
        mio::Ready::readable(),
        mio::PollOpt::level(),
    )?;

    Ok(poll)
}
