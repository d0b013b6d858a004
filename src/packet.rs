//! Length-framed packet container.
//!
//! A [`Packet`] collects values appended in order and hands them back in
//! the same order on the receiving side.
//!
//! ## Wire Format
//!
//! All integers are big-endian.
//!
//! ```text
//! Frame:   <payload length: u32><payload>
//! String:  <byte length: u32><UTF-8 bytes>
//! u8/bool: 1 byte
//! u32/i32: 4 bytes
//! u64:     8 bytes
//!
//! Example (one string "hello"):
//! 00 00 00 09 | 00 00 00 05 | 68 65 6c 6c 6f
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Byte length of the frame header.
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted in a single frame.
pub const MAX_PAYLOAD: usize = 16 * 1024 * 1024; // 16MB

/// Errors raised while reading values back out of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes remain than the value needs.
    Truncated { needed: usize, remaining: usize },
    /// A string field is not valid UTF-8.
    InvalidUtf8,
    /// A frame header announces more than [`MAX_PAYLOAD`] bytes.
    TooLarge(usize),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::Truncated { needed, remaining } => {
                write!(f, "packet truncated: need {needed} bytes, {remaining} remain")
            }
            PacketError::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
            PacketError::TooLarge(len) => {
                write!(f, "frame of {len} bytes exceeds limit of {MAX_PAYLOAD}")
            }
        }
    }
}

impl std::error::Error for PacketError {}

/// A value that can be appended to a packet.
pub trait Encode {
    fn encode(&self, buf: &mut BytesMut);
}

/// A value that can be extracted from a packet.
pub trait Decode: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError>;
}

/// Ordered container of encoded values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    /// Encoded values not yet handed to the transport.
    data: BytesMut,
    /// Received payload not yet extracted.
    read: Bytes,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value after everything already in the packet.
    pub fn append<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(&mut self.data);
        self
    }

    /// Extract the next value in append order.
    pub fn extract<T: Decode>(&mut self) -> Result<T, PacketError> {
        T::decode(&mut self.read)
    }

    /// Drop all content so the packet can be reused.
    pub fn clear(&mut self) {
        self.data.clear();
        self.read = Bytes::new();
    }

    /// Bytes appended and waiting to be sent.
    #[cfg(test)]
    pub fn payload(&self) -> &[u8] {
        &self.data
    }

    /// Total bytes held (appended plus received but not yet extracted).
    pub fn len(&self) -> usize {
        self.data.len() + self.read.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once every received value has been extracted.
    pub fn end_of_packet(&self) -> bool {
        self.read.is_empty()
    }

    /// Encode header and payload into one contiguous frame.
    pub fn to_frame(&self) -> Result<Bytes, PacketError> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(PacketError::TooLarge(self.data.len()));
        }
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + self.data.len());
        frame.put_u32(self.data.len() as u32);
        frame.extend_from_slice(&self.data);
        Ok(frame.freeze())
    }

    /// Try to split one complete frame off the front of `input`.
    ///
    /// Returns `Ok(false)` and leaves `input` untouched when more bytes are
    /// needed. On success the payload replaces this packet's content.
    pub fn take_frame(&mut self, input: &mut BytesMut) -> Result<bool, PacketError> {
        if input.len() < FRAME_HEADER_LEN {
            return Ok(false);
        }

        let len = u32::from_be_bytes([input[0], input[1], input[2], input[3]]) as usize;
        if len > MAX_PAYLOAD {
            return Err(PacketError::TooLarge(len));
        }
        if input.len() < FRAME_HEADER_LEN + len {
            return Ok(false);
        }

        input.advance(FRAME_HEADER_LEN);
        self.data.clear();
        self.read = input.split_to(len).freeze();
        Ok(true)
    }
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), PacketError> {
    if buf.remaining() < needed {
        return Err(PacketError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

impl Encode for str {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.len() as u32);
        buf.extend_from_slice(self.as_bytes());
    }
}

impl Encode for String {
    fn encode(&self, buf: &mut BytesMut) {
        self.as_str().encode(buf);
    }
}

impl Decode for String {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        let len = u32::decode(buf)? as usize;
        ensure(buf, len)?;
        let bytes = buf.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| PacketError::InvalidUtf8)
    }
}

impl Encode for u8 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(*self);
    }
}

impl Decode for u8 {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        ensure(buf, 1)?;
        Ok(buf.get_u8())
    }
}

impl Encode for bool {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl Decode for bool {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        Ok(u8::decode(buf)? != 0)
    }
}

impl Encode for u32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(*self);
    }
}

impl Decode for u32 {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        ensure(buf, 4)?;
        Ok(buf.get_u32())
    }
}

impl Encode for i32 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32(*self);
    }
}

impl Decode for i32 {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        ensure(buf, 4)?;
        Ok(buf.get_i32())
    }
}

impl Encode for u64 {
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(*self);
    }
}

impl Decode for u64 {
    fn decode(buf: &mut Bytes) -> Result<Self, PacketError> {
        ensure(buf, 8)?;
        Ok(buf.get_u64())
    }
}
