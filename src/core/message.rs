//! Wire codec for relay frames
//!
//! A frame is either a framework message, a link (control) string or an
//! opaque payload. Opaque payloads carry no envelope at all: anything whose
//! first byte is not a known tag is returned untouched, and written back out
//! exactly as it was received.

use crate::error::{Result, RustyRelayError};

/// Tag byte of framework messages (`-2` as a signed byte)
pub const FRAMEWORK_ID: u8 = 0xFE;
/// Tag byte of link strings (`-3` as a signed byte)
pub const LINK_ID: u8 = 0xFD;

const PING_ID: u8 = 0;
const DISCOVER_HOST_ID: u8 = 1;
const KEEP_ALIVE_ID: u8 = 2;
const REGISTER_UDP_ID: u8 = 3;
const REGISTER_TCP_ID: u8 = 4;

/// Transport maintenance messages, unrelated to tunneled data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkMessage {
    Ping { id: i32, is_reply: bool },
    DiscoverHost,
    KeepAlive,
    RegisterUdp { connection_id: i32 },
    RegisterTcp { connection_id: i32 },
}

/// A decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Framework(FrameworkMessage),
    Link(String),
    Raw(Vec<u8>),
}

impl Packet {
    /// Decode a complete frame payload
    pub fn decode(frame: &[u8]) -> Result<Packet> {
        let mut reader = Reader::new(frame);

        match reader.u8()? {
            FRAMEWORK_ID => Ok(Packet::Framework(read_framework(&mut reader)?)),
            LINK_ID => Ok(Packet::Link(reader.str()?)),
            // Raw payload keeps its first byte
            _ => Ok(Packet::Raw(frame.to_vec())),
        }
    }

    /// Append the wire form of this packet to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        match self {
            Packet::Raw(payload) => buf.extend_from_slice(payload),
            Packet::Framework(message) => {
                buf.push(FRAMEWORK_ID);
                write_framework(buf, message);
            }
            Packet::Link(text) => {
                let bytes = text.as_bytes();
                let len = u16::try_from(bytes.len())
                    .map_err(|_| RustyRelayError::FrameTooLarge(bytes.len()))?;
                buf.push(LINK_ID);
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(bytes);
            }
        }
        Ok(())
    }

    /// Length of the wire form, without the frame's length prefix
    pub fn encoded_len(&self) -> usize {
        match self {
            Packet::Raw(payload) => payload.len(),
            Packet::Link(text) => 3 + text.len(),
            Packet::Framework(message) => {
                1 + match message {
                    FrameworkMessage::Ping { .. } => 6,
                    FrameworkMessage::DiscoverHost | FrameworkMessage::KeepAlive => 1,
                    FrameworkMessage::RegisterUdp { .. }
                    | FrameworkMessage::RegisterTcp { .. } => 5,
                }
            }
        }
    }

    /// Convenience wrapper around [`Packet::encode`]
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

fn read_framework(reader: &mut Reader<'_>) -> Result<FrameworkMessage> {
    let id = reader.u8()?;

    match id {
        PING_ID => {
            let id = reader.i32()?;
            let is_reply = reader.u8()? == 1;
            Ok(FrameworkMessage::Ping { id, is_reply })
        }
        DISCOVER_HOST_ID => Ok(FrameworkMessage::DiscoverHost),
        KEEP_ALIVE_ID => Ok(FrameworkMessage::KeepAlive),
        REGISTER_UDP_ID => Ok(FrameworkMessage::RegisterUdp {
            connection_id: reader.i32()?,
        }),
        REGISTER_TCP_ID => Ok(FrameworkMessage::RegisterTcp {
            connection_id: reader.i32()?,
        }),
        other => Err(RustyRelayError::UnknownFrameworkMessage(other)),
    }
}

fn write_framework(buf: &mut Vec<u8>, message: &FrameworkMessage) {
    match *message {
        FrameworkMessage::Ping { id, is_reply } => {
            buf.push(PING_ID);
            buf.extend_from_slice(&id.to_be_bytes());
            buf.push(is_reply as u8);
        }
        FrameworkMessage::DiscoverHost => buf.push(DISCOVER_HOST_ID),
        FrameworkMessage::KeepAlive => buf.push(KEEP_ALIVE_ID),
        FrameworkMessage::RegisterUdp { connection_id } => {
            buf.push(REGISTER_UDP_ID);
            buf.extend_from_slice(&connection_id.to_be_bytes());
        }
        FrameworkMessage::RegisterTcp { connection_id } => {
            buf.push(REGISTER_TCP_ID);
            buf.extend_from_slice(&connection_id.to_be_bytes());
        }
    }
}

/// Bounds-checked big-endian cursor over a frame
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                RustyRelayError::MalformedFrame(format!(
                    "needed {} bytes at offset {}, frame has {}",
                    n,
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Length-prefixed UTF-8 string
    pub(crate) fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RustyRelayError::MalformedFrame(format!("invalid string: {}", e)))
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
