//! # rasmux-client
//!
//! Async client for the cluster remote administration service (RAS).
//!
//! This crate provides:
//! - Packet I/O over a pluggable transport (TCP by default)
//! - Logical endpoints with cached per-scope credentials
//! - An endpoint pool with admission control, idle reuse ranked by scope,
//!   background reaping and a dial circuit breaker
//! - A high-level [`Client`] with typed administrative requests

pub mod client;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod pool;
pub mod stream;

#[cfg(test)]
mod testing;

pub use client::{AdminHandler, Client};
pub use config::{ClientConfig, ConfigError, PoolConfig};
pub use connection::{ConnId, Connection, PacketIo};
pub use endpoint::{Endpoint, EndpointInfo};
pub use error::ClientError;
pub use pool::{AuthEntry, ConnectionHandler, EndpointLease, EndpointPool};
pub use stream::{tcp_dialer, BoxedTransport, Dialer};
