//! Typed administrative requests and the records they return.
//!
//! Only a handful of operations live here: authentication, agent
//! administrators, clusters and short infobase connection listings. Each
//! request names its response type through [`EndpointRequest::Response`].

use crate::codec::{Decoder, Encoder};
use crate::error::ProtocolError;
use crate::message::{EndpointRequest, EndpointResponse, MessageType};
use crate::signature::Signature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Service version from which clusters report `kill_by_memory_with_dump`.
const KILL_BY_MEMORY_MIN_VERSION: u32 = 9;

/// Cluster description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub uuid: Uuid,
    pub host: String,
    pub port: i16,
    pub name: String,
    pub expiration_timeout: i32,
    pub lifetime_limit: i32,
    pub max_memory_size: i32,
    pub max_memory_time_limit: i32,
    pub security_level: i32,
    pub session_fault_tolerance_level: i32,
    pub load_balancing_mode: i32,
    pub errors_count_threshold: i32,
    pub kill_problem_processes: bool,
    pub kill_by_memory_with_dump: bool,
}

impl ClusterInfo {
    pub fn decode(dec: &mut Decoder, version: u32) -> Result<Self, ProtocolError> {
        let mut info = ClusterInfo {
            uuid: dec.get_uuid()?,
            expiration_timeout: dec.get_i32()?,
            host: dec.get_string()?,
            lifetime_limit: dec.get_i32()?,
            port: dec.get_i16()?,
            max_memory_size: dec.get_i32()?,
            max_memory_time_limit: dec.get_i32()?,
            name: dec.get_string()?,
            security_level: dec.get_i32()?,
            session_fault_tolerance_level: dec.get_i32()?,
            load_balancing_mode: dec.get_i32()?,
            errors_count_threshold: dec.get_i32()?,
            kill_problem_processes: dec.get_bool()?,
            kill_by_memory_with_dump: false,
        };
        if version >= KILL_BY_MEMORY_MIN_VERSION {
            info.kill_by_memory_with_dump = dec.get_bool()?;
        }
        Ok(info)
    }

    /// Writes the record in the server's field order. Clients only decode
    /// it; the encoder serves fake servers and benchmarks. Fields newer
    /// than `version` are omitted.
    pub fn encode(&self, enc: &mut Encoder, version: u32) {
        enc.put_uuid(&self.uuid);
        enc.put_i32(self.expiration_timeout);
        enc.put_string(&self.host);
        enc.put_i32(self.lifetime_limit);
        enc.put_i16(self.port);
        enc.put_i32(self.max_memory_size);
        enc.put_i32(self.max_memory_time_limit);
        enc.put_string(&self.name);
        enc.put_i32(self.security_level);
        enc.put_i32(self.session_fault_tolerance_level);
        enc.put_i32(self.load_balancing_mode);
        enc.put_i32(self.errors_count_threshold);
        enc.put_bool(self.kill_problem_processes);
        if version >= KILL_BY_MEMORY_MIN_VERSION {
            enc.put_bool(self.kill_by_memory_with_dump);
        }
    }
}

/// Administrator account of the agent or a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub name: String,
    pub description: String,
    pub password: String,
    pub password_auth_allowed: bool,
    pub sys_auth_allowed: bool,
    pub sys_user_name: String,
}

impl UserInfo {
    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        Ok(UserInfo {
            name: dec.get_string()?,
            description: dec.get_string()?,
            password: dec.get_string()?,
            password_auth_allowed: dec.get_bool()?,
            sys_auth_allowed: dec.get_bool()?,
            sys_user_name: dec.get_string()?,
        })
    }

    /// Server-side encoding, the inverse of [`Self::decode`].
    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_string(&self.name);
        enc.put_string(&self.description);
        enc.put_string(&self.password);
        enc.put_bool(self.password_auth_allowed);
        enc.put_bool(self.sys_auth_allowed);
        enc.put_string(&self.sys_user_name);
    }
}

/// Short description of a client connection to an infobase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionShortInfo {
    pub uuid: Uuid,
    pub id: i32,
    pub application: String,
    pub blocked_by_ls: i32,
    pub connected_at: Option<DateTime<Utc>>,
    pub host: String,
    pub infobase_id: Uuid,
    pub process: Uuid,
    pub session_id: i32,
    /// Not on the wire; filled in from the request scope.
    pub cluster_id: Uuid,
}

impl ConnectionShortInfo {
    pub fn decode(dec: &mut Decoder) -> Result<Self, ProtocolError> {
        Ok(ConnectionShortInfo {
            uuid: dec.get_uuid()?,
            application: dec.get_string()?,
            blocked_by_ls: dec.get_i32()?,
            connected_at: dec.get_time()?,
            id: dec.get_i32()?,
            host: dec.get_string()?,
            infobase_id: dec.get_uuid()?,
            process: dec.get_uuid()?,
            session_id: dec.get_i32()?,
            cluster_id: Uuid::nil(),
        })
    }

    /// Server-side encoding, the inverse of [`Self::decode`].
    pub fn encode(&self, enc: &mut Encoder) {
        enc.put_uuid(&self.uuid);
        enc.put_string(&self.application);
        enc.put_i32(self.blocked_by_ls);
        enc.put_time(self.connected_at);
        enc.put_i32(self.id);
        enc.put_string(&self.host);
        enc.put_uuid(&self.infobase_id);
        enc.put_uuid(&self.process);
        enc.put_i32(self.session_id);
    }
}

fn decode_list<T>(
    dec: &mut Decoder,
    mut item: impl FnMut(&mut Decoder) -> Result<T, ProtocolError>,
) -> Result<Vec<T>, ProtocolError> {
    let count = dec.get_size()?;
    // Each record takes at least one byte, so cap the preallocation
    let mut out = Vec::with_capacity((count as usize).min(dec.remaining()));
    for _ in 0..count {
        out.push(item(dec)?);
    }
    Ok(out)
}

/// Applies agent administrator credentials to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateAgentRequest {
    pub user: String,
    pub password: String,
}

impl EndpointRequest for AuthenticateAgentRequest {
    type Response = ();

    fn message_type(&self) -> MessageType {
        MessageType::AUTHENTICATE_AGENT_REQUEST
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_string(&self.user);
        enc.put_string(&self.password);
    }
}

/// Applies cluster administrator credentials to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterAuthenticateRequest {
    pub cluster_id: Uuid,
    pub user: String,
    pub password: String,
}

impl EndpointRequest for ClusterAuthenticateRequest {
    type Response = ();

    fn message_type(&self) -> MessageType {
        MessageType::AUTHENTICATE_REQUEST
    }

    fn signature(&self) -> Signature {
        Signature::from_high(self.cluster_id)
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_uuid(&self.cluster_id);
        enc.put_string(&self.user);
        enc.put_string(&self.password);
    }
}

/// Adds infobase user credentials to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateInfobaseRequest {
    pub cluster_id: Uuid,
    pub user: String,
    pub password: String,
}

impl EndpointRequest for AuthenticateInfobaseRequest {
    type Response = ();

    fn message_type(&self) -> MessageType {
        MessageType::ADD_AUTHENTICATION_REQUEST
    }

    fn signature(&self) -> Signature {
        Signature::from_high(self.cluster_id)
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_uuid(&self.cluster_id);
        enc.put_string(&self.user);
        enc.put_string(&self.password);
    }
}

/// Lists agent administrators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAgentAdminsRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAgentAdminsResponse {
    pub users: Vec<UserInfo>,
}

impl EndpointRequest for GetAgentAdminsRequest {
    type Response = GetAgentAdminsResponse;

    fn message_type(&self) -> MessageType {
        MessageType::GET_AGENT_ADMINS_REQUEST
    }

    fn encode(&self, _enc: &mut Encoder, _version: u32) {}

    fn requires_agent_auth(&self) -> bool {
        true
    }
}

impl EndpointResponse for GetAgentAdminsResponse {
    const MESSAGE_TYPE: Option<MessageType> = Some(MessageType::GET_AGENT_ADMINS_RESPONSE);

    fn decode(dec: &mut Decoder, _version: u32) -> Result<Self, ProtocolError> {
        Ok(Self {
            users: decode_list(dec, UserInfo::decode)?,
        })
    }
}

/// Removes a cluster from the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregClusterRequest {
    pub cluster_id: Uuid,
}

impl EndpointRequest for UnregClusterRequest {
    type Response = ();

    fn message_type(&self) -> MessageType {
        MessageType::UNREG_CLUSTER_REQUEST
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_uuid(&self.cluster_id);
    }

    fn requires_agent_auth(&self) -> bool {
        true
    }
}

/// Lists the clusters registered on the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetClustersRequest;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetClustersResponse {
    pub clusters: Vec<ClusterInfo>,
}

impl EndpointRequest for GetClustersRequest {
    type Response = GetClustersResponse;

    fn message_type(&self) -> MessageType {
        MessageType::GET_CLUSTERS_REQUEST
    }

    fn encode(&self, _enc: &mut Encoder, _version: u32) {}
}

impl EndpointResponse for GetClustersResponse {
    const MESSAGE_TYPE: Option<MessageType> = Some(MessageType::GET_CLUSTERS_RESPONSE);

    fn decode(dec: &mut Decoder, version: u32) -> Result<Self, ProtocolError> {
        Ok(Self {
            clusters: decode_list(dec, |d| ClusterInfo::decode(d, version))?,
        })
    }
}

/// Fetches a single cluster description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetClusterInfoRequest {
    pub cluster_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetClusterInfoResponse {
    pub info: ClusterInfo,
}

impl EndpointRequest for GetClusterInfoRequest {
    type Response = GetClusterInfoResponse;

    fn message_type(&self) -> MessageType {
        MessageType::GET_CLUSTER_INFO_REQUEST
    }

    fn signature(&self) -> Signature {
        Signature::from_high(self.cluster_id)
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_uuid(&self.cluster_id);
    }
}

impl EndpointResponse for GetClusterInfoResponse {
    const MESSAGE_TYPE: Option<MessageType> = Some(MessageType::GET_CLUSTER_INFO_RESPONSE);

    fn decode(dec: &mut Decoder, version: u32) -> Result<Self, ProtocolError> {
        Ok(Self {
            info: ClusterInfo::decode(dec, version)?,
        })
    }
}

/// Lists short connection records of one infobase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetInfobaseConnectionsShortRequest {
    pub cluster_id: Uuid,
    pub infobase_id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetInfobaseConnectionsShortResponse {
    pub connections: Vec<ConnectionShortInfo>,
}

impl EndpointRequest for GetInfobaseConnectionsShortRequest {
    type Response = GetInfobaseConnectionsShortResponse;

    fn message_type(&self) -> MessageType {
        MessageType::GET_INFOBASE_CONNECTIONS_SHORT_REQUEST
    }

    fn signature(&self) -> Signature {
        Signature::new(self.cluster_id, self.infobase_id)
    }

    fn encode(&self, enc: &mut Encoder, _version: u32) {
        enc.put_uuid(&self.cluster_id);
        enc.put_uuid(&self.infobase_id);
    }
}

impl EndpointResponse for GetInfobaseConnectionsShortResponse {
    const MESSAGE_TYPE: Option<MessageType> =
        Some(MessageType::GET_INFOBASE_CONNECTIONS_SHORT_RESPONSE);

    fn decode(dec: &mut Decoder, _version: u32) -> Result<Self, ProtocolError> {
        Ok(Self {
            connections: decode_list(dec, ConnectionShortInfo::decode)?,
        })
    }
}
