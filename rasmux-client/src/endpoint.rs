//! Logical endpoints opened on a connection.

use crate::connection::{ConnId, PacketIo};
use crate::error::ClientError;
use bytes::Bytes;
use rasmux_protocol::message::EndpointFailure;
use rasmux_protocol::{
    Codec, Decoder, EndpointBody, EndpointEnvelope, EndpointRequest, EndpointResponse, MessageType,
    PacketType, Signature,
};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::time::Instant;

/// Parameters of a freshly opened endpoint, as acknowledged by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub id: u64,
    /// Integer part of the negotiated service version.
    pub version: u32,
    pub format: i16,
    pub service_id: String,
    pub codec: Codec,
}

/// A logical request channel on a connection.
///
/// The endpoint caches a hash of each credential it has applied, so the pool
/// only sends authentication messages when the required credential changes.
#[derive(Debug)]
pub struct Endpoint {
    id: u64,
    version: u32,
    format: i16,
    service_id: String,
    codec: Codec,
    conn_id: ConnId,
    sig: Signature,
    used_at: Instant,
    agent_hash: String,
    cluster_hash: String,
    infobase_hash: String,
}

/// Hashes a credential pair into the form cached on endpoints.
pub fn auth_hash(user: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl Endpoint {
    pub fn new(info: EndpointInfo, conn_id: ConnId) -> Self {
        Self {
            id: info.id,
            version: info.version,
            format: info.format,
            service_id: info.service_id,
            codec: info.codec,
            conn_id,
            sig: Signature::NIL,
            used_at: Instant::now(),
            agent_hash: String::new(),
            cluster_hash: String::new(),
            infobase_hash: String::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn format(&self) -> i16 {
        self.format
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn conn_id(&self) -> ConnId {
        self.conn_id
    }

    pub fn signature(&self) -> Signature {
        self.sig
    }

    pub fn set_signature(&mut self, sig: Signature) {
        self.sig = sig;
    }

    pub fn used_at(&self) -> Instant {
        self.used_at
    }

    pub fn check_agent_auth(&self, user: &str, password: &str) -> bool {
        self.agent_hash == auth_hash(user, password)
    }

    pub fn set_agent_auth(&mut self, user: &str, password: &str) {
        self.agent_hash = auth_hash(user, password);
    }

    pub fn check_cluster_auth(&self, user: &str, password: &str) -> bool {
        self.cluster_hash == auth_hash(user, password)
    }

    pub fn set_cluster_auth(&mut self, user: &str, password: &str) {
        self.cluster_hash = auth_hash(user, password);
    }

    pub fn check_infobase_auth(&self, user: &str, password: &str) -> bool {
        self.infobase_hash == auth_hash(user, password)
    }

    pub fn set_infobase_auth(&mut self, user: &str, password: &str) {
        self.infobase_hash = auth_hash(user, password);
    }

    /// Sends a typed request and waits for its typed reply.
    pub async fn send_request<R>(
        &mut self,
        io: &mut PacketIo,
        request: &R,
        timeout: Duration,
    ) -> Result<R::Response, ClientError>
    where
        R: EndpointRequest + ?Sized,
    {
        self.used_at = Instant::now();

        let envelope = EndpointEnvelope::for_request(self.id, self.format, request, self.version);
        tracing::trace!(
            "Sending message type {} on endpoint {}",
            request.message_type().0,
            self.id
        );
        io.send_packet(&envelope.into_packet(), timeout).await?;

        let packet = io.get_packet(timeout).await?;
        match packet.kind() {
            Some(PacketType::EndpointMessage) => {
                let mut dec = Decoder::new(packet.payload);
                let reply = EndpointEnvelope::decode(&mut dec)?;
                self.decode_body::<R::Response>(reply.body)
            }
            Some(PacketType::EndpointFailure) => {
                let mut dec = Decoder::new(packet.payload);
                Err(ClientError::Remote(EndpointFailure::decode(&mut dec)?))
            }
            _ => Err(ClientError::UnknownMessage {
                packet_type: packet.packet_type,
                endpoint_id: self.id,
                service_id: self.service_id.clone(),
            }),
        }
    }

    fn decode_body<T: EndpointResponse>(&self, body: EndpointBody) -> Result<T, ClientError> {
        match (body, T::MESSAGE_TYPE) {
            (EndpointBody::Exception(exc), _) => Err(ClientError::RemoteException(exc)),
            (EndpointBody::Void, None) => {
                Ok(T::decode(&mut Decoder::new(Bytes::new()), self.version)?)
            }
            (
                EndpointBody::Message {
                    message_type,
                    payload,
                },
                Some(expected),
            ) if message_type == expected => {
                Ok(T::decode(&mut Decoder::new(payload), self.version)?)
            }
            (body, expected) => Err(ClientError::UnexpectedResponse {
                expected: describe(expected),
                actual: match body {
                    EndpointBody::Message { message_type, .. } => describe(Some(message_type)),
                    _ => describe(None),
                },
            }),
        }
    }
}

fn describe(message_type: Option<MessageType>) -> String {
    match message_type {
        Some(t) => format!("message type {}", t.0),
        None => "void".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rasmux_protocol::catalog::{GetClustersRequest, UnregClusterRequest};
    use rasmux_protocol::{EndpointException, Encoder, Packet};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn endpoint() -> Endpoint {
        Endpoint::new(
            EndpointInfo {
                id: 1,
                version: 9,
                format: 0,
                service_id: rasmux_protocol::SERVICE_NAME.into(),
                codec: Codec::V1_0,
            },
            7,
        )
    }

    /// Answers the next packet read from `server` with `reply`.
    async fn answer_once(mut server: tokio::io::DuplexStream, reply: Packet) -> Packet {
        let mut buf = BytesMut::new();
        let request = loop {
            if let Some(p) = Packet::decode(&mut buf).unwrap() {
                break p;
            }
            server.read_buf(&mut buf).await.unwrap();
        };
        server.write_all(&reply.encode().unwrap()).await.unwrap();
        request
    }

    #[test]
    fn test_auth_hash_cache() {
        let mut ep = endpoint();
        assert!(!ep.check_cluster_auth("", ""));
        ep.set_cluster_auth("admin", "secret");
        assert!(ep.check_cluster_auth("admin", "secret"));
        assert!(!ep.check_cluster_auth("admin", "other"));
        assert!(!ep.check_infobase_auth("admin", "secret"));
        assert!(!ep.check_agent_auth("admin", "secret"));

        assert_eq!(auth_hash("a", "b").len(), 64);
        assert_ne!(auth_hash("a", "b"), auth_hash("b", "a"));
    }

    #[test]
    fn test_accessors() {
        let mut ep = endpoint();
        assert_eq!(ep.id(), 1);
        assert_eq!(ep.version(), 9);
        assert_eq!(ep.conn_id(), 7);
        assert_eq!(ep.codec(), Codec::V1_0);
        assert!(ep.signature().is_nil());
        let sig = Signature::from_high(uuid::Uuid::new_v4());
        ep.set_signature(sig);
        assert_eq!(ep.signature(), sig);
    }

    #[tokio::test]
    async fn test_send_request_typed_reply() {
        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        let mut ep = endpoint();

        let mut body = Encoder::new();
        body.put_size(0);
        let reply = EndpointEnvelope {
            endpoint_id: 1,
            format: 0,
            body: EndpointBody::Message {
                message_type: MessageType::GET_CLUSTERS_RESPONSE,
                payload: body.into_bytes(),
            },
        }
        .into_packet();

        let server = tokio::spawn(answer_once(server, reply));
        let resp = ep
            .send_request(&mut io, &GetClustersRequest, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(resp.clusters.is_empty());

        let request = server.await.unwrap();
        assert!(request.is(PacketType::EndpointMessage));
        assert_eq!(request.payload.as_ref(), &[0x01, 0x00, 0x00, 0x01, 11]);
    }

    #[tokio::test]
    async fn test_send_request_void_reply() {
        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        let mut ep = endpoint();

        let reply = EndpointEnvelope {
            endpoint_id: 1,
            format: 0,
            body: EndpointBody::Void,
        }
        .into_packet();
        tokio::spawn(answer_once(server, reply));

        let req = UnregClusterRequest {
            cluster_id: uuid::Uuid::new_v4(),
        };
        ep.send_request(&mut io, &req, Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_send_request_mismatched_reply() {
        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        let mut ep = endpoint();

        let reply = EndpointEnvelope {
            endpoint_id: 1,
            format: 0,
            body: EndpointBody::Void,
        }
        .into_packet();
        tokio::spawn(answer_once(server, reply));

        let err = ep
            .send_request(&mut io, &GetClustersRequest, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_send_request_exception() {
        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        let mut ep = endpoint();

        let reply = EndpointEnvelope {
            endpoint_id: 1,
            format: 0,
            body: EndpointBody::Exception(EndpointException {
                endpoint_id: 1,
                service_id: "svc".into(),
                error_type: Some("AccessDenied".into()),
                message: "denied".into(),
                cause: None,
            }),
        }
        .into_packet();
        tokio::spawn(answer_once(server, reply));

        let err = ep
            .send_request(&mut io, &GetClustersRequest, Duration::from_secs(5))
            .await
            .unwrap_err();
        match err {
            ClientError::RemoteException(exc) => assert_eq!(exc.message, "denied"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_request_failure_and_unknown() {
        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        let mut ep = endpoint();

        let failure = EndpointFailure {
            message: "gone".into(),
            ..Default::default()
        };
        tokio::spawn(answer_once(server, failure.into_packet()));
        let err = ep
            .send_request(&mut io, &GetClustersRequest, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Remote(ref f) if f.message == "gone"));
        assert!(!err.is_transport());

        let (client, server) = tokio::io::duplex(4096);
        let mut io = PacketIo::new(Box::new(client));
        tokio::spawn(answer_once(
            server,
            Packet::new(PacketType::KeepAlive, Bytes::new()),
        ));
        let err = ep
            .send_request(&mut io, &GetClustersRequest, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::UnknownMessage {
                packet_type: 16,
                endpoint_id: 1,
                ..
            }
        ));
    }
}
