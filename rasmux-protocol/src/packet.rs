//! Packet framing for the RAS transport.
//!
//! Packet layout:
//!
//! ```text
//! +--------+-------------+-----------------+
//! | type   | size        | payload         |
//! | 1 byte | varint      | size bytes      |
//! +--------+-------------+-----------------+
//! ```
//!
//! The negotiation packet is the single exception: it is sent as the bare
//! payload with neither type nor size.

use crate::codec::{peek_size, Encoder};
use crate::error::ProtocolError;
use crate::MAX_PAYLOAD_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// Known packet type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Negotiate = 0,
    Connect = 1,
    ConnectAck = 2,
    StartTls = 3,
    Disconnect = 4,
    SaslNegotiate = 5,
    SaslAuth = 6,
    SaslChallenge = 7,
    SaslSuccess = 8,
    SaslFailure = 9,
    SaslAbort = 10,
    EndpointOpen = 11,
    EndpointOpenAck = 12,
    EndpointClose = 13,
    EndpointMessage = 14,
    EndpointFailure = 15,
    KeepAlive = 16,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PacketType::Negotiate,
            1 => PacketType::Connect,
            2 => PacketType::ConnectAck,
            3 => PacketType::StartTls,
            4 => PacketType::Disconnect,
            5 => PacketType::SaslNegotiate,
            6 => PacketType::SaslAuth,
            7 => PacketType::SaslChallenge,
            8 => PacketType::SaslSuccess,
            9 => PacketType::SaslFailure,
            10 => PacketType::SaslAbort,
            11 => PacketType::EndpointOpen,
            12 => PacketType::EndpointOpenAck,
            13 => PacketType::EndpointClose,
            14 => PacketType::EndpointMessage,
            15 => PacketType::EndpointFailure,
            16 => PacketType::KeepAlive,
            other => return Err(other),
        })
    }
}

/// A single transport packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw type tag; may be outside [`PacketType`].
    pub packet_type: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, payload: Bytes) -> Self {
        Self {
            packet_type: packet_type.as_u8(),
            payload,
        }
    }

    /// Returns the known packet type, if any.
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::try_from(self.packet_type).ok()
    }

    pub fn is(&self, packet_type: PacketType) -> bool {
        self.packet_type == packet_type.as_u8()
    }

    /// Encodes the packet for the wire.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let size = self.payload.len();
        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        if self.is(PacketType::Negotiate) {
            return Ok(self.payload.clone());
        }

        let mut enc = Encoder::with_capacity(size + 6);
        enc.put_u8(self.packet_type);
        enc.put_size(size as u64);
        enc.put_slice(&self.payload);
        Ok(enc.into_bytes())
    }

    /// Decodes a packet from the front of `buf`.
    ///
    /// Returns `Ok(Some(packet))` if a complete packet was decoded,
    /// `Ok(None)` if more data is needed (nothing is consumed), or `Err`
    /// on protocol errors.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.is_empty() {
            return Ok(None);
        }

        let packet_type = buf[0];
        let (size, size_len) = match peek_size(&buf[1..])? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let header_len = 1 + size_len;
        if buf.len() < header_len + size {
            return Ok(None);
        }

        buf.advance(header_len);
        let payload = buf.split_to(size).freeze();

        Ok(Some(Self {
            packet_type,
            payload,
        }))
    }
}
