//! Endpoint pool.
//!
//! Connections are owned by exactly one place at a time: the idle list while
//! parked, or an [`EndpointLease`] while a caller uses one of their
//! endpoints. Admission is bounded by a semaphore sized to the pool; the
//! owned permit travels with the lease and is released when the lease is
//! returned, removed or dropped.
//!
//! Pool bookkeeping lives under a single mutex which is never held across an
//! `.await`. Handshakes, endpoint open/close and authentication run on the
//! leased connection, outside the lock.

use crate::config::PoolConfig;
use crate::connection::{ConnId, Connection, PacketIo};
use crate::endpoint::{Endpoint, EndpointInfo};
use crate::error::ClientError;
use crate::stream::{BoxedTransport, Dialer};
use parking_lot::{Mutex, RwLock};
use rasmux_protocol::catalog::{
    AuthenticateAgentRequest, AuthenticateInfobaseRequest, ClusterAuthenticateRequest,
};
use rasmux_protocol::{EndpointRequest, Signature};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use uuid::Uuid;

/// Delay between background dial attempts once dialing is failing fast.
const DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Endpoint index of a lease whose endpoint is not open yet.
const NO_ENDPOINT: usize = usize::MAX;

/// Protocol hooks the pool runs on its connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Performs the session handshake on a freshly dialed connection.
    fn init_connection(
        &self,
        io: &mut PacketIo,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Opens a new endpoint on an initialized connection.
    fn open_endpoint(
        &self,
        io: &mut PacketIo,
    ) -> impl Future<Output = Result<EndpointInfo, ClientError>> + Send;

    /// Closes an endpoint before its connection is shut down.
    fn close_endpoint(
        &self,
        io: &mut PacketIo,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// User name and password for one authentication scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthEntry {
    pub user: String,
    pub password: String,
}

impl AuthEntry {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

#[derive(Default)]
struct AuthStore {
    agent: AuthEntry,
    clusters: HashMap<Uuid, AuthEntry>,
    infobases: HashMap<Uuid, AuthEntry>,
}

/// Looks up the credential for `id`, falling back to the nil-UUID wildcard.
fn lookup_auth(index: &HashMap<Uuid, AuthEntry>, id: Uuid) -> AuthEntry {
    index
        .get(&id)
        .or_else(|| index.get(&Uuid::nil()))
        .cloned()
        .unwrap_or_default()
}

#[derive(Default)]
struct PoolState {
    /// Every connection the pool knows about, idle or leased.
    conns: Vec<ConnId>,
    /// Parked connections, oldest first.
    idle: Vec<Connection>,
    /// Pooled connections, including ones still being dialed.
    pool_size: usize,
    /// Idle connections, including ones still being dialed.
    idle_len: usize,
}

/// Where a caller's endpoint comes from on a popped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Existing(usize),
    OpenNew,
}

/// Chooses an idle connection for `sig`.
///
/// An endpoint already bound to `sig` wins outright. Otherwise candidates
/// are ranked by class (0: connection without endpoints, 1: endpoint of the
/// same cluster with no infobase bound, 2: any other endpoint), then by the
/// number of endpoints on the connection, then by last use.
fn select_idle(idle: &[Connection], sig: Signature, max_open: usize) -> Option<(usize, Pick)> {
    let mut best: Option<((u8, usize, Instant), usize, Option<usize>)> = None;

    for (conn_idx, conn) in idle.iter().enumerate() {
        let endpoints = conn.endpoints();
        if endpoints.is_empty() {
            let rank = (0, 0, conn.used_at());
            if best.as_ref().map_or(true, |(b, ..)| rank < *b) {
                best = Some((rank, conn_idx, None));
            }
            continue;
        }

        for (ep_idx, endpoint) in endpoints.iter().enumerate() {
            let ep_sig = endpoint.signature();
            if ep_sig == sig {
                return Some((conn_idx, Pick::Existing(ep_idx)));
            }
            let class = if ep_sig.high_bound_eq(&sig.high()) && ep_sig.is_low_nil() {
                1
            } else {
                2
            };
            let rank = (class, endpoints.len(), endpoint.used_at());
            if best.as_ref().map_or(true, |(b, ..)| rank < *b) {
                best = Some((rank, conn_idx, Some(ep_idx)));
            }
        }
    }

    let ((class, open, _), conn_idx, ep_idx) = best?;
    let pick = match (class, ep_idx) {
        (1, Some(ep)) => Pick::Existing(ep),
        (2, Some(ep)) if open >= max_open => Pick::Existing(ep),
        _ => Pick::OpenNew,
    };
    Some((conn_idx, pick))
}

struct PoolInner<H> {
    config: PoolConfig,
    dialer: Dialer,
    handler: Arc<H>,
    queue: Arc<Semaphore>,
    state: Mutex<PoolState>,
    auth: RwLock<AuthStore>,
    closed: AtomicBool,
    dial_errors: AtomicUsize,
    last_dial_error: Mutex<Option<String>>,
    next_conn_id: AtomicU64,
    me: Weak<PoolInner<H>>,
}

impl<H: ConnectionHandler> PoolInner<H> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn wait_turn(&self) -> Result<OwnedSemaphorePermit, ClientError> {
        match Arc::clone(&self.queue).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(ClientError::Closed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let acquire = Arc::clone(&self.queue).acquire_owned();
        match tokio::time::timeout(self.config.pool_timeout(), acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(ClientError::Closed),
            Err(_) => {
                tracing::debug!("Timed out waiting for a free connection");
                Err(ClientError::PoolTimeout)
            }
        }
    }

    fn pop_idle(&self, state: &mut PoolState, sig: Signature) -> Option<(Connection, Pick)> {
        let (idx, pick) = select_idle(&state.idle, sig, self.config.max_open_endpoints)?;
        let conn = state.idle.remove(idx);
        state.idle_len = state.idle_len.saturating_sub(1);
        self.check_min_idle(state);
        Some((conn, pick))
    }

    /// Returns a connection to the idle list, or hands it back if the pool
    /// has been closed in the meantime.
    fn push_idle(&self, conn: Connection) -> Option<Connection> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return Some(conn);
        }
        state.idle.push(conn);
        state.idle_len += 1;
        None
    }

    fn untrack(&self, state: &mut PoolState, conn: &Connection) {
        if let Some(pos) = state.conns.iter().position(|&id| id == conn.id()) {
            state.conns.remove(pos);
            if conn.is_pooled() {
                state.pool_size = state.pool_size.saturating_sub(1);
                self.check_min_idle(state);
            }
        }
    }

    fn untrack_with_lock(&self, conn: &Connection) {
        let mut state = self.state.lock();
        self.untrack(&mut state, conn);
    }

    async fn discard(&self, mut conn: Connection) {
        self.untrack_with_lock(&conn);
        conn.close(&*self.handler, self.config.response_timeout())
            .await;
    }

    fn is_stale(&self, conn: &mut Connection) -> bool {
        if conn.probe_closed() {
            return true;
        }

        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout();
        if !idle_timeout.is_zero() && now.duration_since(conn.used_at()) >= idle_timeout {
            return true;
        }
        let max_age = self.config.max_conn_age();
        if !max_age.is_zero() && now.duration_since(conn.created_at()) >= max_age {
            return true;
        }
        false
    }

    /// Reserves and dials idle connections until `min_idle_conns` is met.
    fn check_min_idle(&self, state: &mut PoolState) {
        if self.config.min_idle_conns == 0 || self.is_closed() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let Some(pool) = self.me.upgrade() else {
            return;
        };

        while state.pool_size < self.config.pool_size
            && state.idle_len < self.config.min_idle_conns
        {
            state.pool_size += 1;
            state.idle_len += 1;

            let pool = Arc::clone(&pool);
            runtime.spawn(async move {
                if let Err(e) = pool.add_idle_conn().await {
                    tracing::debug!("Failed to add idle connection: {}", e);
                    let mut state = pool.state.lock();
                    state.pool_size = state.pool_size.saturating_sub(1);
                    state.idle_len = state.idle_len.saturating_sub(1);
                }
            });
        }
    }

    async fn add_idle_conn(&self) -> Result<(), ClientError> {
        let conn = self.dial_conn(true).await?;

        let mut state = self.state.lock();
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        state.conns.push(conn.id());
        state.idle.push(conn);
        Ok(())
    }

    async fn new_conn(&self, pooled: bool) -> Result<Connection, ClientError> {
        let mut conn = self.dial_conn(pooled).await?;

        let mut state = self.state.lock();
        state.conns.push(conn.id());
        if pooled {
            // Over capacity: the connection is dropped on return.
            if state.pool_size >= self.config.pool_size {
                conn.set_pooled(false);
            } else {
                state.pool_size += 1;
            }
        }
        Ok(conn)
    }

    async fn dial_conn(&self, pooled: bool) -> Result<Connection, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if self.dial_errors.load(Ordering::Acquire) >= self.config.pool_size {
            return Err(self.last_dial_error());
        }

        match self.dial().await {
            Ok(stream) => {
                self.dial_errors.store(0, Ordering::Release);
                let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Connection {} established", id);
                Ok(Connection::new(id, stream, pooled))
            }
            Err(e) => {
                let message = e.to_string();
                *self.last_dial_error.lock() = Some(message.clone());
                let failures = self.dial_errors.fetch_add(1, Ordering::AcqRel) + 1;
                if failures == self.config.pool_size {
                    tracing::warn!("Dial failing repeatedly, retrying in background: {}", message);
                    self.spawn_try_dial();
                }
                Err(ClientError::Dial(message))
            }
        }
    }

    async fn dial(&self) -> io::Result<BoxedTransport> {
        let timeout = self.config.dial_timeout();
        if timeout.is_zero() {
            return (self.dialer)().await;
        }
        match tokio::time::timeout(timeout, (self.dialer)()).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "dial timeout")),
        }
    }

    fn last_dial_error(&self) -> ClientError {
        let message = self
            .last_dial_error
            .lock()
            .clone()
            .unwrap_or_else(|| "too many dial errors".to_string());
        ClientError::Dial(message)
    }

    /// Keeps dialing in the background until the server answers again.
    fn spawn_try_dial(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let weak = self.me.clone();
        runtime.spawn(async move {
            loop {
                let Some(pool) = weak.upgrade() else {
                    return;
                };
                if pool.is_closed() {
                    return;
                }
                match pool.dial().await {
                    Ok(_probe) => {
                        pool.dial_errors.store(0, Ordering::Release);
                        tracing::debug!("Dial recovered");
                        return;
                    }
                    Err(e) => {
                        *pool.last_dial_error.lock() = Some(e.to_string());
                    }
                }
                drop(pool);
                tokio::time::sleep(DIAL_RETRY_INTERVAL).await;
            }
        });
    }

    /// Opens an endpoint on `conn`, running the handshake first if needed.
    async fn open_endpoint(&self, conn: &mut Connection) -> Result<usize, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        if !conn.is_initialized() {
            self.handler.init_connection(conn.io_mut()).await?;
            conn.set_initialized();
        }

        let info = self.handler.open_endpoint(conn.io_mut()).await?;
        tracing::debug!(
            "Opened endpoint {} (version {}) on connection {}",
            info.id,
            info.version,
            conn.id()
        );
        let conn_id = conn.id();
        Ok(conn.add_endpoint(Endpoint::new(info, conn_id)))
    }

    /// Disposes of a connection whose endpoint could not be opened.
    ///
    /// A remote refusal leaves the stream in a clean state, so pooled
    /// connections go back to the idle list.
    async fn release_failed(&self, conn: Connection, err: &ClientError) {
        if !err.is_transport() && conn.is_pooled() {
            match self.push_idle(conn) {
                None => return,
                Some(conn) => return self.discard(conn).await,
            }
        }
        self.discard(conn).await;
    }

    async fn reap_stale_conns(&self) -> usize {
        let timeout = self.config.response_timeout();
        let mut reaped = 0;
        loop {
            let Ok(permit) = Arc::clone(&self.queue).acquire_owned().await else {
                break;
            };
            let oldest = {
                let mut state = self.state.lock();
                Self::take_oldest_idle(&mut state)
            };
            let Some(mut conn) = oldest else {
                break;
            };

            // Checked outside the lock; the connection is invisible to
            // callers meanwhile.
            if !self.is_stale(&mut conn) {
                let leftover = self.restore_oldest_idle(conn);
                drop(permit);
                if let Some(conn) = leftover {
                    self.discard(conn).await;
                }
                break;
            }

            self.untrack_with_lock(&conn);
            drop(permit);
            tracing::debug!("Reaping stale connection {}", conn.id());
            conn.close(&*self.handler, timeout).await;
            reaped += 1;
        }
        reaped
    }

    fn take_oldest_idle(state: &mut PoolState) -> Option<Connection> {
        if state.idle.is_empty() {
            return None;
        }
        state.idle_len = state.idle_len.saturating_sub(1);
        Some(state.idle.remove(0))
    }

    /// Puts a fresh connection back at the head of the idle list, or hands
    /// it back if the pool has been closed in the meantime.
    fn restore_oldest_idle(&self, conn: Connection) -> Option<Connection> {
        let mut state = self.state.lock();
        if self.is_closed() {
            return Some(conn);
        }
        state.idle.insert(0, conn);
        state.idle_len += 1;
        None
    }

    fn spawn_reaper(pool: &Arc<Self>) {
        let frequency = pool.config.idle_check_frequency();
        if pool.config.idle_timeout().is_zero() || frequency.is_zero() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!("No async runtime, idle connection reaper disabled");
            return;
        };

        let weak = Arc::downgrade(pool);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(frequency);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = weak.upgrade() else {
                    break;
                };
                if pool.is_closed() {
                    break;
                }
                let reaped = pool.reap_stale_conns().await;
                if reaped > 0 {
                    tracing::debug!("Reaped {} stale connections", reaped);
                }
            }
            tracing::trace!("Reaper stopped");
        });
    }
}

/// A connection checked out of the pool together with one of its
/// endpoints.
///
/// Return it with [`EndpointPool::put`] or [`EndpointPool::remove`].
/// Dropping a lease instead (e.g. when the request future is cancelled)
/// untracks the connection and drops its stream, since a reply may still
/// be in flight on it.
pub struct EndpointLease<H: ConnectionHandler> {
    pool: Arc<PoolInner<H>>,
    conn: Option<Connection>,
    endpoint: usize,
    permit: Option<OwnedSemaphorePermit>,
}

impl<H: ConnectionHandler> EndpointLease<H> {
    fn new(
        pool: Arc<PoolInner<H>>,
        conn: Connection,
        endpoint: usize,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            conn: Some(conn),
            endpoint,
            permit: Some(permit),
        }
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.conn.as_ref()?.endpoint(self.endpoint)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    fn parts(&mut self) -> Result<(&mut PacketIo, &mut Endpoint), ClientError> {
        let idx = self.endpoint;
        self.conn
            .as_mut()
            .and_then(|conn| conn.split_endpoint(idx))
            .ok_or(ClientError::ConnectionClosed)
    }

    fn take(&mut self) -> (Option<Connection>, Option<OwnedSemaphorePermit>) {
        (self.conn.take(), self.permit.take())
    }

    /// Sends a request on the leased endpoint and waits for its reply.
    pub async fn send_request<R>(&mut self, request: &R) -> Result<R::Response, ClientError>
    where
        R: EndpointRequest + ?Sized,
    {
        let timeout = self.pool.config.response_timeout();
        let (io, endpoint) = self.parts()?;
        endpoint.send_request(io, request, timeout).await
    }
}

impl<H: ConnectionHandler> Drop for EndpointLease<H> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Lease dropped, discarding connection {}", conn.id());
            self.pool.untrack_with_lock(&conn);
        }
    }
}

impl<H: ConnectionHandler> std::fmt::Debug for EndpointLease<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointLease")
            .field("conn", &self.conn)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Pool of connections and the endpoints multiplexed over them.
pub struct EndpointPool<H: ConnectionHandler> {
    inner: Arc<PoolInner<H>>,
}

impl<H: ConnectionHandler> EndpointPool<H> {
    /// Creates a pool. Idle prefill and the reaper start right away when
    /// called inside a tokio runtime.
    pub fn new(config: PoolConfig, dialer: Dialer, handler: Arc<H>) -> Self {
        let config = config.normalized();
        let permits = config.pool_size;

        let inner = Arc::new_cyclic(|me| PoolInner {
            config,
            dialer,
            handler,
            queue: Arc::new(Semaphore::new(permits)),
            state: Mutex::new(PoolState::default()),
            auth: RwLock::new(AuthStore::default()),
            closed: AtomicBool::new(false),
            dial_errors: AtomicUsize::new(0),
            last_dial_error: Mutex::new(None),
            next_conn_id: AtomicU64::new(1),
            me: me.clone(),
        });

        {
            let mut state = inner.state.lock();
            inner.check_min_idle(&mut state);
        }
        PoolInner::spawn_reaper(&inner);

        Self { inner }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.inner.handler
    }

    /// Checks out an endpoint suitable for requests scoped to `sig`.
    pub async fn get(&self, sig: Signature) -> Result<EndpointLease<H>, ClientError> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(ClientError::Closed);
        }
        let permit = inner.wait_turn().await?;

        loop {
            let popped = {
                let mut state = inner.state.lock();
                inner.pop_idle(&mut state, sig)
            };
            let Some((mut conn, pick)) = popped else {
                break;
            };

            if inner.is_stale(&mut conn) {
                tracing::debug!("Discarding stale connection {}", conn.id());
                inner.discard(conn).await;
                continue;
            }

            let lease = EndpointLease::new(Arc::clone(inner), conn, NO_ENDPOINT, permit);
            return self.bind_endpoint(lease, pick).await;
        }

        let conn = inner.new_conn(true).await?;
        let lease = EndpointLease::new(Arc::clone(inner), conn, NO_ENDPOINT, permit);
        self.bind_endpoint(lease, Pick::OpenNew).await
    }

    /// Points the lease at the picked endpoint, opening one if needed.
    ///
    /// The connection stays inside the lease while the handshake runs, so a
    /// cancelled caller still releases its bookkeeping.
    async fn bind_endpoint(
        &self,
        mut lease: EndpointLease<H>,
        pick: Pick,
    ) -> Result<EndpointLease<H>, ClientError> {
        let opened = match (pick, lease.conn.as_mut()) {
            (Pick::Existing(idx), Some(_)) => Ok(idx),
            (Pick::OpenNew, Some(conn)) => self.inner.open_endpoint(conn).await,
            (_, None) => Err(ClientError::ConnectionClosed),
        };

        match opened {
            Ok(idx) => {
                lease.endpoint = idx;
                Ok(lease)
            }
            Err(e) => {
                let (conn, permit) = lease.take();
                drop(lease);
                drop(permit);
                if let Some(conn) = conn {
                    self.inner.release_failed(conn, &e).await;
                }
                Err(e)
            }
        }
    }

    /// Returns a lease to the pool.
    pub async fn put(&self, mut lease: EndpointLease<H>) {
        let (conn, permit) = lease.take();
        drop(lease);
        let Some(conn) = conn else {
            return;
        };

        let leftover = if conn.is_pooled() {
            self.inner.push_idle(conn)
        } else {
            Some(conn)
        };
        drop(permit);

        if let Some(conn) = leftover {
            self.inner.discard(conn).await;
        }
    }

    /// Closes the leased connection instead of returning it.
    pub async fn remove(&self, mut lease: EndpointLease<H>, reason: Option<&ClientError>) {
        let (conn, permit) = lease.take();
        drop(lease);
        let Some(mut conn) = conn else {
            return;
        };

        match reason {
            Some(e) => tracing::debug!("Removing connection {}: {}", conn.id(), e),
            None => tracing::debug!("Removing connection {}", conn.id()),
        }
        self.inner.untrack_with_lock(&conn);
        drop(permit);
        conn.close(&*self.inner.handler, self.inner.config.response_timeout())
            .await;
    }

    /// Applies the credentials `request` needs to the leased endpoint and
    /// binds the endpoint to the request's scope.
    ///
    /// Credentials already applied (same user and password) are not sent
    /// again.
    pub async fn authorize<R>(
        &self,
        lease: &mut EndpointLease<H>,
        request: &R,
    ) -> Result<(), ClientError>
    where
        R: EndpointRequest + ?Sized,
    {
        let timeout = self.inner.config.response_timeout();
        let (io, endpoint) = lease.parts()?;

        if request.requires_agent_auth() {
            let auth = self.agent_auth();
            if !endpoint.check_agent_auth(&auth.user, &auth.password) {
                let req = AuthenticateAgentRequest {
                    user: auth.user.clone(),
                    password: auth.password.clone(),
                };
                endpoint.send_request(io, &req, timeout).await?;
                endpoint.set_agent_auth(&auth.user, &auth.password);
            }
        }

        let sig = request.signature();
        if sig.is_nil() {
            return Ok(());
        }
        let cluster_id = sig.high();

        let auth = self.cluster_auth(cluster_id);
        if !endpoint.check_cluster_auth(&auth.user, &auth.password) {
            let req = ClusterAuthenticateRequest {
                cluster_id,
                user: auth.user.clone(),
                password: auth.password.clone(),
            };
            endpoint.send_request(io, &req, timeout).await?;
            endpoint.set_cluster_auth(&auth.user, &auth.password);
        }

        let auth = self.infobase_auth(sig.low());
        if !endpoint.check_infobase_auth(&auth.user, &auth.password) {
            let req = AuthenticateInfobaseRequest {
                cluster_id,
                user: auth.user.clone(),
                password: auth.password.clone(),
            };
            endpoint.send_request(io, &req, timeout).await?;
            endpoint.set_infobase_auth(&auth.user, &auth.password);
        }

        endpoint.set_signature(sig);
        Ok(())
    }

    /// Closes every idle connection now and closes leased ones as they come
    /// back. A second call fails with [`ClientError::Closed`].
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Err(ClientError::Closed);
        }
        self.inner.queue.close();

        let idle = {
            let mut state = self.inner.state.lock();
            state.conns.clear();
            state.pool_size = 0;
            state.idle_len = 0;
            std::mem::take(&mut state.idle)
        };
        let timeout = self.inner.config.response_timeout();
        for mut conn in idle {
            conn.close(&*self.inner.handler, timeout).await;
        }
        tracing::debug!("Endpoint pool closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes stale idle connections, oldest first. Returns how many were
    /// closed.
    pub async fn reap_stale_conns(&self) -> usize {
        self.inner.reap_stale_conns().await
    }

    /// Total number of connections, idle and leased.
    pub fn len(&self) -> usize {
        self.inner.state.lock().conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of idle connections, including ones being dialed.
    pub fn idle_len(&self) -> usize {
        self.inner.state.lock().idle_len
    }

    pub fn set_agent_auth(&self, user: impl Into<String>, password: impl Into<String>) {
        self.inner.auth.write().agent = AuthEntry::new(user, password);
    }

    /// Sets cluster credentials. `Uuid::nil()` applies to every cluster
    /// without its own entry.
    pub fn set_cluster_auth(
        &self,
        cluster_id: Uuid,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.inner
            .auth
            .write()
            .clusters
            .insert(cluster_id, AuthEntry::new(user, password));
    }

    /// Sets infobase credentials. `Uuid::nil()` applies to every infobase
    /// without its own entry.
    pub fn set_infobase_auth(
        &self,
        infobase_id: Uuid,
        user: impl Into<String>,
        password: impl Into<String>,
    ) {
        self.inner
            .auth
            .write()
            .infobases
            .insert(infobase_id, AuthEntry::new(user, password));
    }

    pub fn agent_auth(&self) -> AuthEntry {
        self.inner.auth.read().agent.clone()
    }

    pub fn cluster_auth(&self, cluster_id: Uuid) -> AuthEntry {
        lookup_auth(&self.inner.auth.read().clusters, cluster_id)
    }

    pub fn infobase_auth(&self, infobase_id: Uuid) -> AuthEntry {
        lookup_auth(&self.inner.auth.read().infobases, infobase_id)
    }
}
