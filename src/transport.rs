//! The `Transport` plug-in contract.
//!
//! The master and worker runtimes treat a transport as an opaque capability
//! set: a port to listen on, a connection sink, a connection-style flag,
//! and a `start`/`shutdown` pair. Concrete transports (HTTP, a WebSocket-
//! style session protocol, …) are plug-ins supplied by the host application;
//! see `demos/` for two minimal reference implementations.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpStream;

/// Whether the master owns the listening socket (the normal cluster-mode
/// case) or the transport should bind it itself (single-process / non-
/// cluster use, outside this crate's scope but kept so a transport
/// implementation can be exercised standalone in its own tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// The master already owns `port`; the transport must not bind it.
    Delegated,
    /// The transport should bind `port` itself.
    Native,
}

/// Tracks the number of connections a transport has accepted, mirroring
/// the `_connections` counter the worker runtime increments before handing
/// a socket to the transport.
#[derive(Debug, Default)]
pub struct ConnectionCounter(AtomicU64);

impl ConnectionCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment and return the new count. Called by the worker runtime
    /// immediately before emitting a connection to the transport, so that
    /// the counter reflects "connections handed to this transport so far"
    /// exactly as a natively-accepting server would track it.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// A pluggable application-level server.
///
/// Implementors decide what to do with each socket handed to them by
/// [`Transport::handle_connection`]: speak HTTP, upgrade to WebSocket,
/// whatever the application protocol is. The cluster core never inspects
/// bytes on the connection itself.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The port the master binds on behalf of this transport.
    fn port(&self) -> u16;

    /// `true` for long-lived/session-bearing connections (routed sticky by
    /// remote address), `false` for short-lived/stateless ones (routed
    /// round-robin).
    fn is_permanent_connection(&self) -> bool;

    /// The counter the worker runtime increments before each handoff.
    fn connection_counter(&self) -> &ConnectionCounter;

    /// Bind (if `mode` is [`BindMode::Native`]) and perform whatever
    /// one-time startup the transport needs. In cluster mode workers are
    /// always started with [`BindMode::Delegated`]: the master already
    /// owns the port.
    async fn start(&self, mode: BindMode) -> anyhow::Result<()>;

    /// Feed a socket into the transport exactly as if it had been natively
    /// accepted. Called by the worker runtime after incrementing the
    /// connection counter. Must not block the worker's IPC receive loop
    /// for longer than it takes to hand the socket off to its own internal
    /// task scheduling; long-running protocol handling should be spawned.
    async fn handle_connection(&self, socket: TcpStream, remote_addr: SocketAddr);

    /// Resolves when the transport's server voluntarily closes (e.g. the
    /// application called some `shutdown()`/`close()` entry point on it).
    /// The worker runtime awaits this to know when to send the `Close`
    /// control message upstream.
    async fn closed(&self);
}
