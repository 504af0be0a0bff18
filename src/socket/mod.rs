//! Persistent push channel with bounded reconnection.

pub mod backoff;
pub mod client;
pub mod transport;

pub use backoff::{Backoff, ExponentialBackoff, FixedBackoff};
pub use client::{ConnectionState, ResilientSocketClient, SocketEvent};
pub use transport::{Connector, Transport, WsConnector};
