use crate::support::{NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

/// Size of the zero-padded text region of a control record.
pub const MESSAGE_SIZE: usize = 2000;
/// Total size of a control record on the wire: the text region followed by a
/// big-endian length field.
pub const RECORD_SIZE: usize = MESSAGE_SIZE + 8;

/// Acknowledgement sent for accepted logins and subscription requests.
pub const REPLY_SUCCESS: &str = "Success";
/// Sent by the broker on rejection and shutdown, and by a subscriber on
/// voluntary disconnect.
pub const REPLY_QUIT: &str = "Quit";

const PADDING: [u8; MESSAGE_SIZE] = [0u8; MESSAGE_SIZE];

/// A fixed-size control record exchanged on a subscriber stream. The message
/// text carries the login identifier, command verbs, acknowledgements and
/// rendered notifications.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ControlFrame {
    pub message: String,
}

impl ControlFrame {
    /// Wraps a message, truncating it to the record's text region if needed.
    pub fn new<S: Into<String>>(message: S) -> ControlFrame {
        let mut message = message.into();

        if message.len() > MESSAGE_SIZE {
            let mut cut = MESSAGE_SIZE;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }

        ControlFrame { message }
    }

    /// Decode one record from the head of the buffer. Fewer than
    /// `RECORD_SIZE` bytes mean the record has not fully arrived yet. The
    /// length field is clamped to the text region and the text additionally
    /// stops at the first NUL, so zero-padded records from laxer writers
    /// still parse.
    pub fn read(buffer: &[u8]) -> NetworkResult<ControlFrame> {
        if buffer.len() < RECORD_SIZE {
            return Err(NetworkError::Wait);
        }

        let mut length = (&buffer[MESSAGE_SIZE..RECORD_SIZE]).read_u64::<BigEndian>()? as usize;

        if length > MESSAGE_SIZE {
            length = MESSAGE_SIZE;
        }

        let text = &buffer[..length];
        let text = match text.iter().position(|&byte| byte == 0) {
            Some(nul) => &text[..nul],
            None => text,
        };

        Ok(ControlFrame {
            message: String::from_utf8_lossy(text).into_owned(),
        })
    }

    /// Encode exactly one record into the stream.
    pub fn write<W: Write>(&self, stream: &mut W) -> NetworkResult<()> {
        let bytes = self.message.as_bytes();

        stream.write_all(bytes)?;
        stream.write_all(&PADDING[..MESSAGE_SIZE - bytes.len()])?;
        stream.write_u64::<BigEndian>(bytes.len() as u64)?;

        Ok(())
    }
}

/// A client request parsed from a control frame. `Quit` is matched on the
/// whole message; the subscription verbs take their argument from the second
/// whitespace token.
#[derive(Debug, Eq, PartialEq)]
pub enum Command<'a> {
    Quit,
    Subscribe(&'a str),
    Unsubscribe(&'a str),
    Other(&'a str),
}

impl<'a> Command<'a> {
    pub fn parse(message: &'a str) -> Command<'a> {
        let message = message.trim_end_matches(|c| c == '\n' || c == '\r');

        if message == REPLY_QUIT {
            return Command::Quit;
        }

        let mut tokens = message.split_whitespace();

        match (tokens.next(), tokens.next()) {
            (Some("subscribe"), Some(pattern)) => Command::Subscribe(pattern),
            (Some("unsubscribe"), Some(pattern)) => Command::Unsubscribe(pattern),
            _ => Command::Other(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &ControlFrame) -> Vec<u8> {
        let mut record = Vec::with_capacity(RECORD_SIZE);
        frame.write(&mut record).unwrap();
        record
    }

    #[test]
    fn test_record_roundtrip() {
        let frame = ControlFrame::new("subscribe sensors/+");

        let record = encode(&frame);

        assert_eq!(record.len(), RECORD_SIZE);
        assert_eq!(ControlFrame::read(&record).unwrap(), frame);
    }

    #[test]
    fn test_short_buffer_waits() {
        let record = encode(&ControlFrame::new("Quit"));

        let result = ControlFrame::read(&record[..RECORD_SIZE - 1]);

        assert_eq!(result.unwrap_err(), NetworkError::Wait);
    }

    #[test]
    fn test_length_field_is_clamped() {
        let mut record = encode(&ControlFrame::new("Success"));

        // Overwrite the length with nonsense larger than the text region.
        record[MESSAGE_SIZE..].copy_from_slice(&u64::max_value().to_be_bytes());

        let frame = ControlFrame::read(&record).unwrap();

        // The zero padding terminates the text.
        assert_eq!(frame.message, "Success");
    }

    #[test]
    fn test_text_stops_at_first_nul() {
        let mut record = encode(&ControlFrame::new("Success"));

        record[4] = 0;

        let frame = ControlFrame::read(&record).unwrap();

        assert_eq!(frame.message, "Succ");
    }

    #[test]
    fn test_oversize_message_is_truncated() {
        let frame = ControlFrame::new("x".repeat(MESSAGE_SIZE + 100));

        assert_eq!(frame.message.len(), MESSAGE_SIZE);
        assert_eq!(encode(&frame).len(), RECORD_SIZE);
    }

    #[test]
    fn test_empty_message() {
        let frame = ControlFrame::new("");

        let record = encode(&frame);

        assert_eq!(ControlFrame::read(&record).unwrap().message, "");
    }

    #[test]
    fn test_parse_quit_is_whole_message() {
        assert_eq!(Command::parse("Quit"), Command::Quit);
        assert_eq!(Command::parse("Quit\n"), Command::Quit);
        assert_eq!(Command::parse("Quit now"), Command::Other("Quit now"));
    }

    #[test]
    fn test_parse_subscribe() {
        assert_eq!(Command::parse("subscribe sensors/+"), Command::Subscribe("sensors/+"));
        assert_eq!(Command::parse("subscribe sensors/+\n"), Command::Subscribe("sensors/+"));
        // Only the second token is taken.
        assert_eq!(Command::parse("subscribe a b"), Command::Subscribe("a"));
    }

    #[test]
    fn test_parse_unsubscribe() {
        assert_eq!(Command::parse("unsubscribe .*"), Command::Unsubscribe(".*"));
    }

    #[test]
    fn test_parse_unknown_verbs() {
        assert_eq!(Command::parse("publish x"), Command::Other("publish x"));
        assert_eq!(Command::parse("subscribe"), Command::Other("subscribe"));
        assert_eq!(Command::parse(""), Command::Other(""));
    }
}
