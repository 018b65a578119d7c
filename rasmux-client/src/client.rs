//! High-level client API.

use crate::config::ClientConfig;
use crate::connection::PacketIo;
use crate::endpoint::{Endpoint, EndpointInfo};
use crate::error::ClientError;
use crate::pool::{AuthEntry, ConnectionHandler, EndpointPool};
use crate::stream::{tcp_dialer, Dialer};
use parking_lot::Mutex;
use rasmux_protocol::catalog::{
    ClusterInfo, ConnectionShortInfo, GetAgentAdminsRequest, GetClusterInfoRequest,
    GetClustersRequest, GetInfobaseConnectionsShortRequest, UnregClusterRequest, UserInfo,
};
use rasmux_protocol::message::{
    detect_supported_version, CloseEndpointMessage, ConnectMessage, NegotiateMessage,
    OpenEndpointAck, OpenEndpointMessage,
};
use rasmux_protocol::{Codec, Decoder, EndpointFailure, EndpointRequest, PacketType};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Default timeout for handshake and open replies.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection hooks for the cluster administration service.
///
/// Holds the service version shared by every connection of a client. A
/// version rejected by the server is replaced with the best version it
/// advertises.
pub struct AdminHandler {
    version: Mutex<String>,
    codec: Codec,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl AdminHandler {
    pub fn new(version: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            version: Mutex::new(version.into()),
            codec: Codec::V1_0,
            connect_timeout,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Service version requested when opening endpoints.
    pub fn version(&self) -> String {
        self.version.lock().clone()
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Sends one open request. A refusal is returned as the inner error so
    /// the caller can retry with another version.
    async fn try_open(
        &self,
        io: &mut PacketIo,
        version: &str,
    ) -> Result<Result<EndpointInfo, EndpointFailure>, ClientError> {
        io.send_packet(
            &OpenEndpointMessage::new(version).into_packet(),
            self.response_timeout,
        )
        .await?;
        let packet = io.get_packet(self.response_timeout).await?;

        match packet.kind() {
            Some(PacketType::EndpointOpenAck) => {
                let ack = OpenEndpointAck::decode(&mut Decoder::new(packet.payload))?;
                Ok(Ok(EndpointInfo {
                    id: ack.endpoint_id,
                    version: ack.major_version()?,
                    format: 0,
                    service_id: ack.service_id,
                    codec: self.codec,
                }))
            }
            Some(PacketType::EndpointFailure) => {
                let failure = EndpointFailure::decode(&mut Decoder::new(packet.payload))?;
                Ok(Err(failure))
            }
            _ => Err(ClientError::UnknownMessage {
                packet_type: packet.packet_type,
                endpoint_id: 0,
                service_id: String::new(),
            }),
        }
    }
}

impl ConnectionHandler for AdminHandler {
    async fn init_connection(&self, io: &mut PacketIo) -> Result<(), ClientError> {
        let negotiate = NegotiateMessage::new(self.codec.version());
        io.send_packet(&negotiate.into_packet(), self.response_timeout)
            .await?;
        let timeout_ms = self.connect_timeout.as_millis() as i64;
        let connect = ConnectMessage::with_timeout_ms(timeout_ms);
        io.send_packet(&connect.into_packet(), self.response_timeout)
            .await?;

        let packet = io.get_packet(self.response_timeout).await?;
        if !packet.is(PacketType::ConnectAck) {
            return Err(ClientError::Handshake(format!(
                "expected connect ack, got packet type {}",
                packet.packet_type
            )));
        }
        tracing::debug!("Handshake complete (codec {})", self.codec.name());
        Ok(())
    }

    async fn open_endpoint(&self, io: &mut PacketIo) -> Result<EndpointInfo, ClientError> {
        let version = self.version();
        let failure = match self.try_open(io, &version).await? {
            Ok(info) => return Ok(info),
            Err(failure) => failure,
        };

        let Some(supported) = detect_supported_version(&failure) else {
            return Err(failure.into());
        };
        tracing::debug!(
            "Service version {} rejected, retrying with {}",
            version,
            supported
        );
        *self.version.lock() = supported.to_string();

        self.try_open(io, supported).await?.map_err(ClientError::from)
    }

    async fn close_endpoint(
        &self,
        io: &mut PacketIo,
        endpoint: &Endpoint,
    ) -> Result<(), ClientError> {
        let msg = CloseEndpointMessage {
            endpoint_id: endpoint.id(),
        };
        io.send_packet(&msg.into_packet(), self.response_timeout)
            .await
    }
}

/// High-level client for the cluster administration service.
///
/// Requests are multiplexed over a pool of connections; credentials set on
/// the client are applied lazily to whichever endpoint serves a request.
pub struct Client {
    config: ClientConfig,
    pool: EndpointPool<AdminHandler>,
}

impl Client {
    /// Creates a client that dials `config.addr` over TCP.
    ///
    /// No connection is made until the first request, apart from idle
    /// prefill when `min_idle_conns` is set.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let dialer = tcp_dialer(config.addr.clone());
        Self::with_dialer(config, dialer)
    }

    /// Creates a client with a custom transport dialer.
    pub fn with_dialer(config: ClientConfig, dialer: Dialer) -> Result<Self, ClientError> {
        config.validate()?;
        let handler = AdminHandler::new(config.service_version.clone(), config.connect_timeout())
            .with_response_timeout(config.pool.response_timeout());
        let pool = EndpointPool::new(config.pool.clone(), dialer, Arc::new(handler));
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Service version currently used for new endpoints.
    pub fn version(&self) -> String {
        self.pool.handler().version()
    }

    /// Sends a typed request and returns its typed reply.
    ///
    /// The connection goes back to the pool after a reply or a remote
    /// error, and is closed after a transport or protocol failure.
    pub async fn request<R>(&self, request: &R) -> Result<R::Response, ClientError>
    where
        R: EndpointRequest + ?Sized,
    {
        let mut lease = self.pool.get(request.signature()).await?;

        let result = match self.pool.authorize(&mut lease, request).await {
            Ok(()) => lease.send_request(request).await,
            Err(e) => Err(e),
        };

        match &result {
            Err(e) if e.is_transport() => self.pool.remove(lease, Some(e)).await,
            _ => self.pool.put(lease).await,
        }
        result
    }

    /// Closes the pool. Further requests fail with [`ClientError::Closed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        self.pool.close().await
    }

    /// Total number of open connections.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Number of idle connections.
    pub fn idle_len(&self) -> usize {
        self.pool.idle_len()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    pub fn set_agent_auth(&self, user: impl Into<String>, password: impl Into<String>) {
        self.pool.set_agent_auth(user, password);
    }

    /// Sets cluster administrator credentials. Use `Uuid::nil()` for a
    /// default applied to every cluster.
    pub fn set_cluster_auth(
        &self,
        cluster_id: Uuid,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.pool.set_cluster_auth(cluster_id, user, password);
    }

    /// Sets infobase credentials. Use `Uuid::nil()` for a default applied
    /// to every infobase.
    pub fn set_infobase_auth(
        &self,
        infobase_id: Uuid,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.pool.set_infobase_auth(infobase_id, user, password);
    }

    pub fn agent_auth(&self) -> AuthEntry {
        self.pool.agent_auth()
    }

    pub fn cluster_auth(&self, cluster_id: Uuid) -> AuthEntry {
        self.pool.cluster_auth(cluster_id)
    }

    pub fn infobase_auth(&self, infobase_id: Uuid) -> AuthEntry {
        self.pool.infobase_auth(infobase_id)
    }

    // =========================================================================
    // Agent operations
    // =========================================================================

    /// Lists agent administrators.
    pub async fn get_agent_admins(&self) -> Result<Vec<UserInfo>, ClientError> {
        Ok(self.request(&GetAgentAdminsRequest).await?.users)
    }

    /// Unregisters a cluster from the agent.
    pub async fn unreg_cluster(&self, cluster_id: Uuid) -> Result<(), ClientError> {
        self.request(&UnregClusterRequest { cluster_id }).await
    }

    // =========================================================================
    // Cluster operations
    // =========================================================================

    /// Lists registered clusters.
    pub async fn get_clusters(&self) -> Result<Vec<ClusterInfo>, ClientError> {
        Ok(self.request(&GetClustersRequest).await?.clusters)
    }

    /// Gets one cluster's description.
    pub async fn get_cluster_info(&self, cluster_id: Uuid) -> Result<ClusterInfo, ClientError> {
        Ok(self.request(&GetClusterInfoRequest { cluster_id }).await?.info)
    }

    // =========================================================================
    // Infobase operations
    // =========================================================================

    /// Lists client connections of an infobase.
    pub async fn get_infobase_connections(
        &self,
        cluster_id: Uuid,
        infobase_id: Uuid,
    ) -> Result<Vec<ConnectionShortInfo>, ClientError> {
        let req = GetInfobaseConnectionsShortRequest {
            cluster_id,
            infobase_id,
        };
        let mut connections = self.request(&req).await?.connections;
        for conn in &mut connections {
            conn.cluster_id = cluster_id;
        }
        Ok(connections)
    }
}
