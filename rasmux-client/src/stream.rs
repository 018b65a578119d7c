//! Transport abstraction and dialers.
//!
//! The pool never opens sockets itself: it calls a [`Dialer`] that yields a
//! boxed byte stream. Plain TCP is the production dialer; tests plug in
//! in-memory duplex pipes.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream usable as a connection transport.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Opens a new transport on each call.
pub type Dialer = Arc<dyn Fn() -> BoxFuture<io::Result<BoxedTransport>> + Send + Sync>;

/// Returns a dialer that connects to `addr` over TCP.
pub fn tcp_dialer(addr: impl Into<String>) -> Dialer {
    let addr: Arc<str> = Arc::from(addr.into());
    Arc::new(move || -> BoxFuture<io::Result<BoxedTransport>> {
        let addr = Arc::clone(&addr);
        Box::pin(async move {
            tracing::debug!("Connecting to {}...", addr);
            let stream = TcpStream::connect(&*addr).await?;
            stream.set_nodelay(true).ok();
            Ok(Box::new(stream) as BoxedTransport)
        })
    })
}
