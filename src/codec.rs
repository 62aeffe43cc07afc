//! Tag-length-value codec for the temperature message.
//!
//! The layout is protobuf-compatible:
//!
//! | field | number | wire type | payload |
//! |-------|--------|-----------|---------|
//! | id    | 1      | 2 (length-delimited) | UTF-8 publisher id |
//! | temp  | 2      | 5 (32-bit) | little-endian IEEE-754 `f32` |
//! | time  | 3      | 0 (varint) | optional sender timestamp, `u32` |
//!
//! Every field starts with a varint tag `(number << 3) | wire_type`, so the
//! decoder accepts fields in any order and skips numbers it does not know.

use core::fmt;
use heapless::{String, Vec};
use serde::{Serialize, Serializer};
use static_assertions::const_assert;
use thiserror::Error;

pub const MAX_PUBLISHER_ID_LEN: usize = 32;
pub const MAX_MESSAGE_SIZE: usize = 64;
pub const MAX_VARINT_LEN: usize = 10;

pub const FIELD_ID: u32 = 1;
pub const FIELD_TEMP: u32 = 2;
pub const FIELD_TIME: u32 = 3;

// tag + u32 varint, tag + length + id, tag + fixed32
const MAX_ENCODED_LEN: usize = (1 + 5) + (1 + 1 + MAX_PUBLISHER_ID_LEN) + (1 + 4);
const_assert!(MAX_ENCODED_LEN <= MAX_MESSAGE_SIZE);
// Single-byte length prefix for the id field
const_assert!(MAX_PUBLISHER_ID_LEN < 0x80);

pub type MessageBuffer = Vec<u8, MAX_MESSAGE_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    pub fn from_bits(bits: u8) -> Result<Self, DecodeError> {
        match bits {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(DecodeError::UnsupportedWireType(other)),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        }
    }
}

/// Which field a decode error refers to. Used for error reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Tag,
    Id,
    Temp,
    Time,
    Unknown(u32),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Tag => write!(f, "tag"),
            Field::Id => write!(f, "id"),
            Field::Temp => write!(f, "temp"),
            Field::Time => write!(f, "time"),
            Field::Unknown(number) => write!(f, "field #{}", number),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer truncated inside {0}")]
    Truncated(Field),
    #[error("varint longer than 10 bytes in {0}")]
    VarintOverflow(Field),
    #[error("unsupported wire type {0}")]
    UnsupportedWireType(u8),
    #[error("{field} carried wire type {found:?}, expected {expected:?}")]
    WireTypeMismatch {
        field: Field,
        expected: WireType,
        found: WireType,
    },
    #[error("field number 0 is reserved")]
    InvalidFieldNumber,
    #[error("mandatory field {0} missing")]
    MissingField(Field),
    #[error("publisher id must be 1 to 32 bytes of UTF-8")]
    InvalidId,
    #[error("temperature is not a finite number")]
    InvalidTemperature,
    #[error("sender time does not fit in 32 bits")]
    TimeOutOfRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("encoded message exceeds 64 bytes")]
    BufferOverflow,
    #[error("temperature is not a finite number")]
    InvalidTemperature,
}

/// Identifier of a remote publisher. Non-empty, at most
/// [`MAX_PUBLISHER_ID_LEN`] bytes, stored inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublisherId(String<MAX_PUBLISHER_ID_LEN>);

impl PublisherId {
    pub fn new(id: &str) -> Result<Self, DecodeError> {
        if id.is_empty() {
            return Err(DecodeError::InvalidId);
        }
        let mut inner = String::new();
        inner.push_str(id).map_err(|_| DecodeError::InvalidId)?;
        Ok(Self(inner))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PublisherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PublisherId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A fully decoded wire message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureMessage {
    pub id: PublisherId,
    pub temperature: f32,
    pub sender_time: Option<u32>,
}

impl TemperatureMessage {
    pub fn new(id: PublisherId, temperature: f32) -> Self {
        Self {
            id,
            temperature,
            sender_time: None,
        }
    }

    pub fn with_sender_time(mut self, sender_time: u32) -> Self {
        self.sender_time = Some(sender_time);
        self
    }
}

/// Forward-only cursor over an input buffer.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_varint(&mut self, field: Field) -> Result<u64, DecodeError> {
        let mut value: u64 = 0;
        for index in 0..MAX_VARINT_LEN {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or(DecodeError::Truncated(field))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7F) << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::VarintOverflow(field))
    }

    fn take(&mut self, len: usize, field: Field) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated(field))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_length_delimited(&mut self, field: Field) -> Result<&'a [u8], DecodeError> {
        let len = self.read_varint(field)?;
        let len = usize::try_from(len).map_err(|_| DecodeError::Truncated(field))?;
        self.take(len, field)
    }

    fn skip(&mut self, wire_type: WireType, field: Field) -> Result<(), DecodeError> {
        match wire_type {
            WireType::Varint => self.read_varint(field).map(|_| ()),
            WireType::Fixed64 => self.take(8, field).map(|_| ()),
            WireType::LengthDelimited => self.read_length_delimited(field).map(|_| ()),
            WireType::Fixed32 => self.take(4, field).map(|_| ()),
        }
    }
}

fn expect_wire_type(field: Field, expected: WireType, found: WireType) -> Result<(), DecodeError> {
    if expected == found {
        Ok(())
    } else {
        Err(DecodeError::WireTypeMismatch {
            field,
            expected,
            found,
        })
    }
}

/// Decode a message. Fields 1 and 2 are mandatory, field 3 is optional and
/// unknown fields are skipped. A repeated field keeps its last value.
pub fn decode(bytes: &[u8]) -> Result<TemperatureMessage, DecodeError> {
    let mut reader = Reader::new(bytes);
    let mut id: Option<PublisherId> = None;
    let mut temperature: Option<f32> = None;
    let mut sender_time: Option<u32> = None;

    while !reader.is_empty() {
        let tag = reader.read_varint(Field::Tag)?;
        let wire_type = WireType::from_bits((tag & 0x07) as u8)?;
        let number = u32::try_from(tag >> 3).map_err(|_| DecodeError::VarintOverflow(Field::Tag))?;

        match number {
            0 => return Err(DecodeError::InvalidFieldNumber),
            FIELD_ID => {
                expect_wire_type(Field::Id, WireType::LengthDelimited, wire_type)?;
                let raw = reader.read_length_delimited(Field::Id)?;
                let text = core::str::from_utf8(raw).map_err(|_| DecodeError::InvalidId)?;
                id = Some(PublisherId::new(text)?);
            }
            FIELD_TEMP => {
                expect_wire_type(Field::Temp, WireType::Fixed32, wire_type)?;
                let raw = reader.take(4, Field::Temp)?;
                let value = f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                if !value.is_finite() {
                    return Err(DecodeError::InvalidTemperature);
                }
                temperature = Some(value);
            }
            FIELD_TIME => {
                expect_wire_type(Field::Time, WireType::Varint, wire_type)?;
                let value = reader.read_varint(Field::Time)?;
                sender_time = Some(u32::try_from(value).map_err(|_| DecodeError::TimeOutOfRange)?);
            }
            other => reader.skip(wire_type, Field::Unknown(other))?,
        }
    }

    Ok(TemperatureMessage {
        id: id.ok_or(DecodeError::MissingField(Field::Id))?,
        temperature: temperature.ok_or(DecodeError::MissingField(Field::Temp))?,
        sender_time,
    })
}

pub fn write_varint(buf: &mut MessageBuffer, mut value: u64) -> Result<(), EncodeError> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            return buf.push(byte).map_err(|_| EncodeError::BufferOverflow);
        }
        buf.push(byte | 0x80).map_err(|_| EncodeError::BufferOverflow)?;
    }
}

pub fn write_tag(buf: &mut MessageBuffer, number: u32, wire_type: WireType) -> Result<(), EncodeError> {
    write_varint(buf, (u64::from(number) << 3) | u64::from(wire_type.bits()))
}

/// Encode a message.
///
/// The optional `time` field goes first and the fixed-width `temp` field
/// last, so no strict prefix of the output is itself a decodable message.
/// Non-finite temperatures are refused, as `decode` would reject them.
pub fn encode(message: &TemperatureMessage) -> Result<MessageBuffer, EncodeError> {
    if !message.temperature.is_finite() {
        return Err(EncodeError::InvalidTemperature);
    }
    let mut buf = MessageBuffer::new();

    if let Some(sender_time) = message.sender_time {
        write_tag(&mut buf, FIELD_TIME, WireType::Varint)?;
        write_varint(&mut buf, u64::from(sender_time))?;
    }

    let id = message.id.as_str().as_bytes();
    write_tag(&mut buf, FIELD_ID, WireType::LengthDelimited)?;
    write_varint(&mut buf, id.len() as u64)?;
    buf.extend_from_slice(id).map_err(|_| EncodeError::BufferOverflow)?;

    write_tag(&mut buf, FIELD_TEMP, WireType::Fixed32)?;
    buf.extend_from_slice(&message.temperature.to_le_bytes())
        .map_err(|_| EncodeError::BufferOverflow)?;

    Ok(buf)
}
