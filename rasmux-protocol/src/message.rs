//! Endpoint envelopes, control messages and remote failures.
//!
//! Control messages travel as their own packet types (negotiate, connect,
//! endpoint open/close). Administrative requests travel inside
//! `ENDPOINT_MESSAGE` packets wrapped in an [`EndpointEnvelope`]:
//!
//! ```text
//! [endpoint_id: nsize][format: i16][kind: u8][message_type: u8][body]
//! ```
//!
//! Void envelopes stop after the kind byte; exception envelopes carry an
//! [`EndpointException`] in place of the type byte and body.

use crate::codec::{Decoder, Encoder, ParamMap};
use crate::error::ProtocolError;
use crate::packet::{Packet, PacketType};
use crate::signature::Signature;
use crate::{NEGOTIATE_MAGIC, PROTOCOL_VERSION, SERVICE_NAME, SERVICE_VERSIONS};
use bytes::Bytes;
use thiserror::Error;

/// Administrative message type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType(pub u8);

impl MessageType {
    pub const GET_AGENT_ADMINS_REQUEST: MessageType = MessageType(0);
    pub const GET_AGENT_ADMINS_RESPONSE: MessageType = MessageType(1);
    pub const GET_CLUSTER_ADMINS_REQUEST: MessageType = MessageType(2);
    pub const GET_CLUSTER_ADMINS_RESPONSE: MessageType = MessageType(3);
    pub const REG_AGENT_ADMIN_REQUEST: MessageType = MessageType(4);
    pub const REG_CLUSTER_ADMIN_REQUEST: MessageType = MessageType(5);
    pub const UNREG_AGENT_ADMIN_REQUEST: MessageType = MessageType(6);
    pub const UNREG_CLUSTER_ADMIN_REQUEST: MessageType = MessageType(7);
    pub const AUTHENTICATE_AGENT_REQUEST: MessageType = MessageType(8);
    pub const AUTHENTICATE_REQUEST: MessageType = MessageType(9);
    pub const ADD_AUTHENTICATION_REQUEST: MessageType = MessageType(10);
    pub const GET_CLUSTERS_REQUEST: MessageType = MessageType(11);
    pub const GET_CLUSTERS_RESPONSE: MessageType = MessageType(12);
    pub const GET_CLUSTER_INFO_REQUEST: MessageType = MessageType(13);
    pub const GET_CLUSTER_INFO_RESPONSE: MessageType = MessageType(14);
    pub const REG_CLUSTER_REQUEST: MessageType = MessageType(15);
    pub const REG_CLUSTER_RESPONSE: MessageType = MessageType(16);
    pub const UNREG_CLUSTER_REQUEST: MessageType = MessageType(17);
    pub const GET_INFOBASE_CONNECTIONS_SHORT_REQUEST: MessageType = MessageType(52);
    pub const GET_INFOBASE_CONNECTIONS_SHORT_RESPONSE: MessageType = MessageType(53);
}

/// Envelope kind byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Void = 0,
    Message = 1,
    Exception = 0xFF,
}

impl TryFrom<u8> for MessageKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageKind::Void),
            1 => Ok(MessageKind::Message),
            0xFF => Ok(MessageKind::Exception),
            other => Err(ProtocolError::UnknownMessageKind(other)),
        }
    }
}

/// A typed administrative request.
///
/// The associated `Response` type names the decoder used for the reply, so
/// a request can only ever be answered with the response it expects.
pub trait EndpointRequest: Send + Sync {
    type Response: EndpointResponse;

    fn message_type(&self) -> MessageType;

    /// Scope the request runs in. Defaults to no scope.
    fn signature(&self) -> Signature {
        Signature::NIL
    }

    /// Writes the request body for the given endpoint version.
    fn encode(&self, enc: &mut Encoder, version: u32);

    /// Whether agent credentials must be applied before sending.
    fn requires_agent_auth(&self) -> bool {
        false
    }
}

/// A typed administrative response.
pub trait EndpointResponse: Sized + Send {
    /// Expected type tag, or `None` for void replies.
    const MESSAGE_TYPE: Option<MessageType>;

    fn decode(dec: &mut Decoder, version: u32) -> Result<Self, ProtocolError>;
}

impl EndpointResponse for () {
    const MESSAGE_TYPE: Option<MessageType> = None;

    fn decode(_dec: &mut Decoder, _version: u32) -> Result<Self, ProtocolError> {
        Ok(())
    }
}

/// Nested cause attached to remote failures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{service}: {message}")]
pub struct CauseError {
    pub service: String,
    pub message: String,
    pub trace: Vec<String>,
    #[source]
    pub cause: Option<Box<CauseError>>,
}

impl CauseError {
    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        let service = dec.get_string()?;
        let message = dec.get_string()?;
        let trace = decode_trace(dec)?;
        let cause = try_decode_cause(dec)
            .filter(|c| !(c.message.is_empty() && c.cause.is_none()))
            .map(Box::new);
        Ok(Self {
            service,
            message,
            trace,
            cause,
        })
    }

    /// Iterates over this cause and every nested one, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &CauseError> {
        std::iter::successors(Some(self), |c| c.cause.as_deref())
    }
}

fn decode_trace(dec: &mut Decoder) -> Result<Vec<String>, ProtocolError> {
    let count = dec.get_size()?;
    let mut trace = Vec::new();
    for _ in 0..count {
        trace.push(dec.get_string()?);
    }
    Ok(trace)
}

/// Decodes a trailing cause if bytes remain. A malformed tail is dropped and
/// the decoder is left untouched.
fn try_decode_cause(dec: &mut Decoder) -> Option<CauseError> {
    if !dec.has_remaining() {
        return None;
    }
    let mut probe = dec.clone();
    match CauseError::decode(&mut probe) {
        Ok(cause) => {
            *dec = probe;
            Some(cause)
        }
        Err(_) => None,
    }
}

/// Exception returned inside an endpoint envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("remote exception from {service_id}: {message}")]
pub struct EndpointException {
    pub endpoint_id: u64,
    pub service_id: String,
    /// Part after `#` in the wire service id, if present.
    pub error_type: Option<String>,
    pub message: String,
    #[source]
    pub cause: Option<Box<CauseError>>,
}

impl EndpointException {
    pub fn decode(dec: &mut Decoder, endpoint_id: u64) -> Result<Self, ProtocolError> {
        let raw_service = dec.get_string()?;
        let message = dec.get_string()?;
        let (service_id, error_type) = match raw_service.split_once('#') {
            Some((svc, kind)) => (svc.to_string(), Some(kind.to_string())),
            None => (raw_service, None),
        };
        let cause = try_decode_cause(dec).map(Box::new);
        Ok(Self {
            endpoint_id,
            service_id,
            error_type,
            message,
            cause,
        })
    }

    pub fn encode(&self, enc: &mut Encoder) {
        match &self.error_type {
            Some(kind) => enc.put_string(&format!("{}#{}", self.service_id, kind)),
            None => enc.put_string(&self.service_id),
        }
        enc.put_string(&self.message);
    }
}

/// Body of an endpoint envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointBody {
    Void,
    Message {
        message_type: MessageType,
        payload: Bytes,
    },
    Exception(EndpointException),
}

impl EndpointBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            EndpointBody::Void => MessageKind::Void,
            EndpointBody::Message { .. } => MessageKind::Message,
            EndpointBody::Exception(_) => MessageKind::Exception,
        }
    }
}

/// Payload of an `ENDPOINT_MESSAGE` packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointEnvelope {
    pub endpoint_id: u64,
    pub format: i16,
    pub body: EndpointBody,
}

impl EndpointEnvelope {
    /// Wraps a typed request for the given endpoint.
    pub fn for_request<R: EndpointRequest + ?Sized>(
        endpoint_id: u64,
        format: i16,
        request: &R,
        version: u32,
    ) -> Self {
        let mut enc = Encoder::new();
        request.encode(&mut enc, version);
        Self {
            endpoint_id,
            format,
            body: EndpointBody::Message {
                message_type: request.message_type(),
                payload: enc.into_bytes(),
            },
        }
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_endpoint_id(self.endpoint_id);
        enc.put_i16(self.format);
        enc.put_u8(self.body.kind() as u8);
        match &self.body {
            EndpointBody::Void => {}
            EndpointBody::Message {
                message_type,
                payload,
            } => {
                enc.put_u8(message_type.0);
                enc.put_slice(payload);
            }
            EndpointBody::Exception(exc) => exc.encode(enc),
        }
    }

    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        let endpoint_id = dec.get_endpoint_id()?;
        let format = dec.get_i16()?;
        let body = match MessageKind::try_from(dec.get_u8()?)? {
            MessageKind::Void => EndpointBody::Void,
            MessageKind::Message => {
                let message_type = MessageType(dec.get_u8()?);
                EndpointBody::Message {
                    message_type,
                    payload: dec.take_rest(),
                }
            }
            MessageKind::Exception => {
                EndpointBody::Exception(EndpointException::decode(dec, endpoint_id)?)
            }
        };
        Ok(Self {
            endpoint_id,
            format,
            body,
        })
    }

    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        Packet::new(PacketType::EndpointMessage, enc.into_bytes())
    }
}

/// First message on a fresh connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateMessage {
    pub magic: u32,
    pub protocol_version: u16,
    pub codec_version: u16,
}

impl NegotiateMessage {
    pub fn new(codec_version: u16) -> Self {
        Self {
            magic: NEGOTIATE_MAGIC,
            protocol_version: PROTOCOL_VERSION,
            codec_version,
        }
    }

    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::with_capacity(8);
        enc.put_u32(self.magic);
        enc.put_u16(self.protocol_version);
        enc.put_u16(self.codec_version);
        Packet::new(PacketType::Negotiate, enc.into_bytes())
    }
}

/// Connection parameters sent after negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectMessage {
    pub params: ParamMap,
}

impl ConnectMessage {
    pub const CONNECT_TIMEOUT_PARAM: &'static str = "connect.timeout";

    pub fn with_timeout_ms(timeout_ms: i64) -> Self {
        Self {
            params: ParamMap::new().with(Self::CONNECT_TIMEOUT_PARAM, timeout_ms),
        }
    }

    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::new();
        enc.put_params(&self.params);
        Packet::new(PacketType::Connect, enc.into_bytes())
    }
}

impl Default for ConnectMessage {
    fn default() -> Self {
        Self::with_timeout_ms(2000)
    }
}

/// Request to open a logical endpoint on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEndpointMessage {
    pub service: String,
    pub version: String,
    pub params: ParamMap,
}

impl OpenEndpointMessage {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
            version: version.into(),
            params: ParamMap::new(),
        }
    }

    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::new();
        enc.put_string(&self.service);
        enc.put_string(&self.version);
        enc.put_params(&self.params);
        Packet::new(PacketType::EndpointOpen, enc.into_bytes())
    }
}

/// Positive reply to [`OpenEndpointMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenEndpointAck {
    pub service_id: String,
    pub version: String,
    pub endpoint_id: u64,
}

impl OpenEndpointAck {
    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        let service_id = dec.get_string()?;
        let version = dec.get_string()?;
        let endpoint_id = dec.get_endpoint_id()?;
        // Trailing parameters are not used by the client.
        Ok(Self {
            service_id,
            version,
            endpoint_id,
        })
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_string(&self.service_id);
        enc.put_string(&self.version);
        enc.put_endpoint_id(self.endpoint_id);
        enc.put_null();
    }

    /// Integer part of the acknowledged service version ("9.0" -> 9).
    pub fn major_version(&self) -> Result<u32, ProtocolError> {
        parse_major_version(&self.version)
    }
}

/// Parses the integer part of a service version string.
pub fn parse_major_version(version: &str) -> Result<u32, ProtocolError> {
    let major = version.split('.').next().unwrap_or_default();
    major
        .trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidServiceVersion(version.to_string()))
}

/// Closes a logical endpoint. No reply is expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseEndpointMessage {
    pub endpoint_id: u64,
}

impl CloseEndpointMessage {
    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::with_capacity(4);
        enc.put_endpoint_id(self.endpoint_id);
        Packet::new(PacketType::EndpointClose, enc.into_bytes())
    }
}

/// Connection-level failure, sent in place of an ack or a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("endpoint failure from {service_id} ({class_cause}): {message}")]
pub struct EndpointFailure {
    pub service_id: String,
    pub version: String,
    pub endpoint_id: u64,
    pub class_cause: String,
    pub message: String,
    pub trace: Vec<String>,
    #[source]
    pub cause: Option<Box<CauseError>>,
}

impl EndpointFailure {
    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        let service_id = dec.get_string()?;
        let version = dec.get_string()?;
        let endpoint_id = dec.get_endpoint_id()?;
        let class_cause = dec.get_string()?;
        let message = dec.get_string()?;
        let trace = decode_trace(dec)?;
        let cause = try_decode_cause(dec).map(Box::new);
        Ok(Self {
            service_id,
            version,
            endpoint_id,
            class_cause,
            message,
            trace,
            cause,
        })
    }

    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_string(&self.service_id);
        enc.put_string(&self.version);
        enc.put_endpoint_id(self.endpoint_id);
        enc.put_string(&self.class_cause);
        enc.put_string(&self.message);
        enc.put_size(self.trace.len() as u64);
        for line in &self.trace {
            enc.put_string(line);
        }
        let mut next = self.cause.as_deref();
        while let Some(cause) = next {
            enc.put_string(&cause.service);
            enc.put_string(&cause.message);
            enc.put_size(cause.trace.len() as u64);
            for line in &cause.trace {
                enc.put_string(line);
            }
            next = cause.cause.as_deref();
        }
    }

    pub fn into_packet(&self) -> Packet {
        let mut enc = Encoder::new();
        self.encode(&mut enc);
        Packet::new(PacketType::EndpointFailure, enc.into_bytes())
    }
}

/// Finds the highest known service version listed by the server in a
/// version-mismatch failure (`... supported=[8.0, 9.0]`).
///
/// The cause chain is searched first, then the failure message itself.
pub fn detect_supported_version(failure: &EndpointFailure) -> Option<&'static str> {
    failure
        .cause
        .iter()
        .flat_map(|c| c.chain())
        .map(|c| c.message.as_str())
        .chain(std::iter::once(failure.message.as_str()))
        .find_map(supported_version_in)
}

fn supported_version_in(message: &str) -> Option<&'static str> {
    let start = message.find("supported=")? + "supported=".len();
    let rest = &message[start..];
    let list = &rest[..rest.find(']')?];
    let listed: Vec<&str> = list
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|s| !s.is_empty())
        .collect();
    SERVICE_VERSIONS
        .iter()
        .rev()
        .find(|v| listed.contains(*v))
        .copied()
}
