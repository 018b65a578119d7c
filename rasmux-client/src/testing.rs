//! In-process RAS server for pool and client tests.
//!
//! Each dial creates a `tokio::io::duplex` pipe and spawns a task serving
//! the server half. The fake speaks enough of the protocol for the
//! handshake, endpoint open/close, authentication and the catalog requests,
//! and counts what it sees.

use crate::stream::{BoxedTransport, BoxFuture, Dialer};
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rasmux_protocol::catalog::{ClusterInfo, ConnectionShortInfo, UserInfo};
use rasmux_protocol::message::{parse_major_version, OpenEndpointAck};
use rasmux_protocol::{
    Decoder, EndpointBody, EndpointEnvelope, EndpointException, EndpointFailure, Encoder,
    MessageType, Packet, PacketType, SERVICE_NAME,
};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering::SeqCst};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use uuid::Uuid;

/// What the fake server observed.
#[derive(Default)]
pub(crate) struct FakeStats {
    pub dial_attempts: AtomicUsize,
    pub dials: AtomicUsize,
    pub negotiates: AtomicUsize,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub requests: AtomicUsize,
    pub agent_auths: AtomicUsize,
    pub cluster_auths: AtomicUsize,
    pub infobase_auths: AtomicUsize,
    opened: Mutex<Vec<String>>,
    last_cluster_auth: Mutex<Option<(String, String)>>,
    last_infobase_auth: Mutex<Option<(String, String)>>,
    last_agent_auth: Mutex<Option<(String, String)>>,
}

impl FakeStats {
    /// Versions requested by every open attempt, in order.
    pub fn opened_versions(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn last_cluster_auth(&self) -> Option<(String, String)> {
        self.last_cluster_auth.lock().clone()
    }

    pub fn last_infobase_auth(&self) -> Option<(String, String)> {
        self.last_infobase_auth.lock().clone()
    }

    pub fn last_agent_auth(&self) -> Option<(String, String)> {
        self.last_agent_auth.lock().clone()
    }
}

#[derive(Clone)]
struct Behavior {
    accepted: Vec<String>,
    advertised: Vec<String>,
    open_delay: Duration,
    cluster_password: Option<String>,
    clusters: Vec<ClusterInfo>,
    admins: Vec<UserInfo>,
    connections: Vec<ConnectionShortInfo>,
}

struct Live {
    stats: Arc<FakeStats>,
    refuse_dials: AtomicBool,
    generation: watch::Sender<u64>,
    next_endpoint: AtomicU64,
}

pub(crate) struct FakeRas {
    behavior: Behavior,
    live: Arc<Live>,
}

impl FakeRas {
    pub fn new() -> Self {
        let versions: Vec<String> = rasmux_protocol::SERVICE_VERSIONS
            .iter()
            .map(|v| v.to_string())
            .collect();
        let (generation, _) = watch::channel(0);

        Self {
            behavior: Behavior {
                accepted: versions.clone(),
                advertised: versions,
                open_delay: Duration::ZERO,
                cluster_password: None,
                clusters: vec![sample_cluster("main", 1541), sample_cluster("backup", 2541)],
                admins: vec![UserInfo {
                    name: "admin".into(),
                    description: "agent administrator".into(),
                    password_auth_allowed: true,
                    ..Default::default()
                }],
                connections: vec![ConnectionShortInfo {
                    uuid: Uuid::new_v4(),
                    id: 7,
                    application: "Designer".into(),
                    host: "workstation".into(),
                    infobase_id: Uuid::new_v4(),
                    process: Uuid::new_v4(),
                    session_id: 3,
                    ..Default::default()
                }],
            },
            live: Arc::new(Live {
                stats: Arc::new(FakeStats::default()),
                refuse_dials: AtomicBool::new(false),
                generation,
                next_endpoint: AtomicU64::new(1),
            }),
        }
    }

    /// Accepts only `versions` when opening endpoints, and lists them in
    /// the rejection message.
    pub fn with_supported_versions(mut self, versions: &[&str]) -> Self {
        self.behavior.accepted = versions.iter().map(|v| v.to_string()).collect();
        self.behavior.advertised = self.behavior.accepted.clone();
        self
    }

    /// Overrides the versions listed in rejection messages.
    pub fn with_advertised_versions(mut self, versions: &[&str]) -> Self {
        self.behavior.advertised = versions.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.behavior.open_delay = delay;
        self
    }

    /// Rejects cluster authentication with any other password.
    pub fn with_cluster_password(mut self, password: impl Into<String>) -> Self {
        self.behavior.cluster_password = Some(password.into());
        self
    }

    pub fn clusters(&self) -> &[ClusterInfo] {
        &self.behavior.clusters
    }

    pub fn admins(&self) -> &[UserInfo] {
        &self.behavior.admins
    }

    pub fn connections(&self) -> &[ConnectionShortInfo] {
        &self.behavior.connections
    }

    pub fn stats(&self) -> Arc<FakeStats> {
        Arc::clone(&self.live.stats)
    }

    pub fn set_refuse_dials(&self, refuse: bool) {
        self.live.refuse_dials.store(refuse, SeqCst);
    }

    /// Drops the server side of every connection dialed so far.
    pub fn drop_connections(&self) {
        self.live.generation.send_modify(|g| *g += 1);
    }

    pub fn dialer(&self) -> Dialer {
        let behavior = Arc::new(self.behavior.clone());
        let live = Arc::clone(&self.live);

        Arc::new(move || -> BoxFuture<io::Result<BoxedTransport>> {
            let behavior = Arc::clone(&behavior);
            let live = Arc::clone(&live);
            Box::pin(async move {
                live.stats.dial_attempts.fetch_add(1, SeqCst);
                if live.refuse_dials.load(SeqCst) {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "connection refused",
                    ));
                }
                live.stats.dials.fetch_add(1, SeqCst);

                let (client, server) = tokio::io::duplex(64 * 1024);
                let shutdown = live.generation.subscribe();
                tokio::spawn(serve(server, behavior, live, shutdown));
                Ok(Box::new(client) as BoxedTransport)
            })
        })
    }
}

fn sample_cluster(name: &str, port: i16) -> ClusterInfo {
    ClusterInfo {
        uuid: Uuid::new_v4(),
        host: "srv".into(),
        port,
        name: name.into(),
        expiration_timeout: 60,
        lifetime_limit: 0,
        max_memory_size: 0,
        max_memory_time_limit: 0,
        security_level: 0,
        session_fault_tolerance_level: 0,
        load_balancing_mode: 0,
        errors_count_threshold: 0,
        kill_problem_processes: true,
        kill_by_memory_with_dump: false,
    }
}

async fn read_packet(stream: &mut DuplexStream, buf: &mut BytesMut) -> Option<Packet> {
    loop {
        match Packet::decode(buf) {
            Ok(Some(packet)) => return Some(packet),
            Ok(None) => {}
            Err(_) => return None,
        }
        match stream.read_buf(buf).await {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

async fn serve(
    mut stream: DuplexStream,
    behavior: Arc<Behavior>,
    live: Arc<Live>,
    mut shutdown: watch::Receiver<u64>,
) {
    shutdown.borrow_and_update();

    let mut negotiate = [0u8; 8];
    tokio::select! {
        res = stream.read_exact(&mut negotiate) => {
            if res.is_err() {
                return;
            }
        }
        _ = shutdown.changed() => return,
    }
    live.stats.negotiates.fetch_add(1, SeqCst);

    let mut buf = BytesMut::new();
    // endpoint id -> major version
    let mut endpoints: HashMap<u64, u32> = HashMap::new();

    loop {
        let packet = tokio::select! {
            packet = read_packet(&mut stream, &mut buf) => match packet {
                Some(packet) => packet,
                None => return,
            },
            _ = shutdown.changed() => return,
        };

        let reply = match packet.kind() {
            Some(PacketType::Connect) => {
                live.stats.connects.fetch_add(1, SeqCst);
                Some(Packet::new(PacketType::ConnectAck, Bytes::new()))
            }
            Some(PacketType::EndpointOpen) => {
                let mut dec = Decoder::new(packet.payload);
                let _service = dec.get_string().unwrap();
                let version = dec.get_string().unwrap();
                live.stats.opened.lock().push(version.clone());
                if !behavior.open_delay.is_zero() {
                    tokio::time::sleep(behavior.open_delay).await;
                }
                Some(open_reply(&behavior, &live, &mut endpoints, version))
            }
            Some(PacketType::EndpointClose) => {
                let mut dec = Decoder::new(packet.payload);
                if let Ok(id) = dec.get_endpoint_id() {
                    endpoints.remove(&id);
                }
                live.stats.closes.fetch_add(1, SeqCst);
                None
            }
            Some(PacketType::EndpointMessage) => {
                let mut dec = Decoder::new(packet.payload);
                let request = EndpointEnvelope::decode(&mut dec).unwrap();
                live.stats.requests.fetch_add(1, SeqCst);
                let version = endpoints.get(&request.endpoint_id).copied().unwrap_or(9);
                let body = match request.body {
                    EndpointBody::Message {
                        message_type,
                        payload,
                    } => handle_request(&behavior, &live.stats, message_type, payload, version),
                    _ => exception("bad request"),
                };
                let reply = EndpointEnvelope {
                    endpoint_id: request.endpoint_id,
                    format: request.format,
                    body,
                };
                Some(reply.into_packet())
            }
            _ => return,
        };

        if let Some(reply) = reply {
            let wire = reply.encode().unwrap();
            if stream.write_all(&wire).await.is_err() {
                return;
            }
        }
    }
}

fn open_reply(
    behavior: &Behavior,
    live: &Live,
    endpoints: &mut HashMap<u64, u32>,
    version: String,
) -> Packet {
    if !behavior.accepted.contains(&version) {
        let failure = EndpointFailure {
            service_id: SERVICE_NAME.into(),
            version: version.clone(),
            class_cause: "com._1c.v8.core.ServiceVersionNotSupported".into(),
            message: format!(
                "Service version {} is not supported, supported=[{}]",
                version,
                behavior.advertised.join(", ")
            ),
            ..Default::default()
        };
        return failure.into_packet();
    }

    let id = live.next_endpoint.fetch_add(1, SeqCst);
    endpoints.insert(id, parse_major_version(&version).unwrap());
    let ack = OpenEndpointAck {
        service_id: SERVICE_NAME.into(),
        version,
        endpoint_id: id,
    };
    let mut enc = Encoder::new();
    ack.encode(&mut enc);
    Packet::new(PacketType::EndpointOpenAck, enc.into_bytes())
}

fn exception(message: &str) -> EndpointBody {
    EndpointBody::Exception(EndpointException {
        service_id: SERVICE_NAME.into(),
        error_type: Some("AdminException".into()),
        message: message.into(),
        ..Default::default()
    })
}

fn credentials(dec: &mut Decoder) -> (String, String) {
    (dec.get_string().unwrap(), dec.get_string().unwrap())
}

fn handle_request(
    behavior: &Behavior,
    stats: &FakeStats,
    message_type: MessageType,
    payload: Bytes,
    version: u32,
) -> EndpointBody {
    let mut dec = Decoder::new(payload);
    let mut enc = Encoder::new();

    let response = match message_type {
        MessageType::AUTHENTICATE_AGENT_REQUEST => {
            stats.agent_auths.fetch_add(1, SeqCst);
            *stats.last_agent_auth.lock() = Some(credentials(&mut dec));
            return EndpointBody::Void;
        }
        MessageType::AUTHENTICATE_REQUEST => {
            let _cluster = dec.get_uuid().unwrap();
            let creds = credentials(&mut dec);
            stats.cluster_auths.fetch_add(1, SeqCst);
            let denied = matches!(&behavior.cluster_password, Some(p) if *p != creds.1);
            *stats.last_cluster_auth.lock() = Some(creds);
            if denied {
                return exception("Administrator authentication error");
            }
            return EndpointBody::Void;
        }
        MessageType::ADD_AUTHENTICATION_REQUEST => {
            let _cluster = dec.get_uuid().unwrap();
            stats.infobase_auths.fetch_add(1, SeqCst);
            *stats.last_infobase_auth.lock() = Some(credentials(&mut dec));
            return EndpointBody::Void;
        }
        MessageType::UNREG_CLUSTER_REQUEST => return EndpointBody::Void,
        MessageType::GET_CLUSTERS_REQUEST => {
            enc.put_size(behavior.clusters.len() as u64);
            for cluster in &behavior.clusters {
                cluster.encode(&mut enc, version);
            }
            MessageType::GET_CLUSTERS_RESPONSE
        }
        MessageType::GET_CLUSTER_INFO_REQUEST => {
            let id = dec.get_uuid().unwrap();
            match behavior.clusters.iter().find(|c| c.uuid == id) {
                Some(cluster) => cluster.encode(&mut enc, version),
                None => return exception("Cluster not found"),
            }
            MessageType::GET_CLUSTER_INFO_RESPONSE
        }
        MessageType::GET_AGENT_ADMINS_REQUEST => {
            enc.put_size(behavior.admins.len() as u64);
            for admin in &behavior.admins {
                admin.encode(&mut enc);
            }
            MessageType::GET_AGENT_ADMINS_RESPONSE
        }
        MessageType::GET_INFOBASE_CONNECTIONS_SHORT_REQUEST => {
            enc.put_size(behavior.connections.len() as u64);
            for conn in &behavior.connections {
                conn.encode(&mut enc);
            }
            MessageType::GET_INFOBASE_CONNECTIONS_SHORT_RESPONSE
        }
        other => return exception(&format!("Unsupported message type {}", other.0)),
    };

    EndpointBody::Message {
        message_type: response,
        payload: enc.into_bytes(),
    }
}
