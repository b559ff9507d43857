use crate::support::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Write;

/// Size of the zero-terminated topic slot at the head of a datagram record.
pub const TOPIC_SIZE: usize = 50;
/// Size of the payload region following the type tag.
pub const PAYLOAD_SIZE: usize = 1500;
/// Total size of a measurement datagram on the wire.
pub const RECORD_SIZE: usize = TOPIC_SIZE + 1 + PAYLOAD_SIZE;

/// A typed value decoded from the datagram payload region. The numeric
/// variants keep the wire representation (sign flag plus unsigned magnitude)
/// so rendering and re-encoding stay exact.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Value {
    Int { negative: bool, magnitude: u32 },
    ShortReal(u16),
    Float { negative: bool, magnitude: u32, exponent: u8 },
    Text(String),
}

impl Value {
    /// Wire type tag.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Int { .. } => 0,
            Value::ShortReal(_) => 1,
            Value::Float { .. } => 2,
            Value::Text(_) => 3,
        }
    }

    /// Type label used in rendered notifications.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int { .. } => "INT",
            Value::ShortReal(_) => "SHORT_REAL",
            Value::Float { .. } => "FLOAT",
            Value::Text(_) => "STRING",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            // The sign is suppressed at zero for INT, but preserved for
            // FLOAT, which renders -0 at whatever width the exponent says.
            Value::Int { negative, magnitude } => {
                if *negative && *magnitude != 0 {
                    f.write_str("-")?;
                }
                write!(f, "{}", magnitude)
            }
            Value::ShortReal(hundredths) => {
                write!(f, "{}.{:02}", hundredths / 100, hundredths % 100)
            }
            Value::Float {
                negative,
                magnitude,
                exponent,
            } => {
                if *negative {
                    f.write_str("-")?;
                }
                f.write_str(&scaled_decimal(*magnitude, *exponent))
            }
            Value::Text(text) => f.write_str(text),
        }
    }
}

/// Renders `magnitude / 10^exponent` with exactly `exponent` fractional
/// digits. Operates on the decimal digit string, so any exponent is exact.
fn scaled_decimal(magnitude: u32, exponent: u8) -> String {
    let mut digits = magnitude.to_string();
    let exponent = exponent as usize;

    if exponent == 0 {
        return digits;
    }

    if digits.len() <= exponent {
        let zeros = "0".repeat(exponent + 1 - digits.len());
        digits.insert_str(0, &zeros);
    }

    digits.insert(digits.len() - exponent, '.');
    digits
}

/// A decoded measurement datagram.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Measurement {
    pub topic: String,
    pub value: Value,
}

impl Measurement {
    /// Decode a full datagram record. Short records and unknown type tags
    /// are fatal for the record; the caller drops the datagram.
    pub fn decode(record: &[u8]) -> NetworkResult<Measurement> {
        if record.len() < RECORD_SIZE {
            return Err(NetworkError::Fatal(ErrorType::ShortRecord));
        }

        let topic = String::from_utf8_lossy(terminated(&record[..TOPIC_SIZE])).into_owned();
        let tag = record[TOPIC_SIZE];
        let payload = &record[TOPIC_SIZE + 1..RECORD_SIZE];

        let value = match tag {
            0 => Value::Int {
                negative: payload[0] == 1,
                magnitude: (&payload[1..5]).read_u32::<BigEndian>()?,
            },
            1 => Value::ShortReal((&payload[..2]).read_u16::<BigEndian>()?),
            2 => Value::Float {
                negative: payload[0] == 1,
                magnitude: (&payload[1..5]).read_u32::<BigEndian>()?,
                exponent: payload[5],
            },
            3 => Value::Text(String::from_utf8_lossy(terminated(payload)).into_owned()),
            _ => return Err(NetworkError::Fatal(ErrorType::UnknownTag)),
        };

        Ok(Measurement { topic, value })
    }

    /// Encode a full zero-padded record. The topic must fit its slot with a
    /// terminator and a text payload must fit the payload region.
    pub fn encode<W: Write>(&self, stream: &mut W) -> NetworkResult<()> {
        if self.topic.len() >= TOPIC_SIZE {
            return Err(NetworkError::Fatal(ErrorType::FieldTooLong));
        }

        let mut payload = [0u8; PAYLOAD_SIZE];

        match &self.value {
            Value::Int { negative, magnitude } => {
                let mut cursor = &mut payload[..];
                cursor.write_u8(*negative as u8)?;
                cursor.write_u32::<BigEndian>(*magnitude)?;
            }
            Value::ShortReal(hundredths) => {
                (&mut payload[..]).write_u16::<BigEndian>(*hundredths)?;
            }
            Value::Float {
                negative,
                magnitude,
                exponent,
            } => {
                let mut cursor = &mut payload[..];
                cursor.write_u8(*negative as u8)?;
                cursor.write_u32::<BigEndian>(*magnitude)?;
                cursor.write_u8(*exponent)?;
            }
            Value::Text(text) => {
                if text.len() >= PAYLOAD_SIZE {
                    return Err(NetworkError::Fatal(ErrorType::FieldTooLong));
                }
                payload[..text.len()].copy_from_slice(text.as_bytes());
            }
        }

        let topic = self.topic.as_bytes();
        let topic_padding = [0u8; TOPIC_SIZE];

        stream.write_all(topic)?;
        stream.write_all(&topic_padding[..TOPIC_SIZE - topic.len()])?;
        stream.write_u8(self.value.tag())?;
        stream.write_all(&payload)?;

        Ok(())
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {} - {}", self.topic, self.value.type_name(), self.value)
    }
}

/// The slot contents up to the first NUL, or the whole slot when it is
/// unterminated.
fn terminated(slot: &[u8]) -> &[u8] {
    match slot.iter().position(|&byte| byte == 0) {
        Some(nul) => &slot[..nul],
        None => slot,
    }
}
