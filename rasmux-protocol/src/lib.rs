//! # rasmux-protocol
//!
//! Wire protocol implementation for the cluster remote administration
//! service (RAS).
//!
//! This crate provides:
//! - Codec primitives (fixed-width integers, strings, UUIDs, timestamps,
//!   variable-length sizes, typed values)
//! - Packet framing with a one-byte type tag and a varint length prefix
//! - Endpoint envelopes, control messages and remote failure types
//! - Composite scope signatures used to match requests to endpoints
//! - A small catalog of typed administrative requests

pub mod catalog;
pub mod codec;
pub mod error;
pub mod message;
pub mod packet;
pub mod signature;

pub use codec::{Codec, Decoder, Encoder, ParamMap, TypedValue};
pub use error::ProtocolError;
pub use message::{
    EndpointBody, EndpointEnvelope, EndpointException, EndpointFailure, EndpointRequest,
    EndpointResponse, MessageKind, MessageType,
};
pub use packet::{Packet, PacketType};
pub use signature::Signature;

/// Protocol version sent during negotiation.
pub const PROTOCOL_VERSION: u16 = 256;

/// Magic number opening the negotiation payload.
pub const NEGOTIATE_MAGIC: u32 = 475_223_888;

/// Default port of the remote administration server.
pub const DEFAULT_PORT: u16 = 1545;

/// Service name prefix sent when opening an endpoint.
pub const SERVICE_NAME: &str = "v8.service.Admin.Cluster";

/// Service version requested by default when opening endpoints.
pub const DEFAULT_SERVICE_VERSION: &str = "9.0";

/// Service versions known to this implementation, oldest first.
pub const SERVICE_VERSIONS: &[&str] = &[
    "3.0", "4.0", "5.0", "6.0", "7.0", "8.0", "9.0", "10.0",
];

/// Maximum packet payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Largest slice handed to a single transport write (16 KiB).
pub const SEND_CHUNK_SIZE: usize = 16 * 1024;
