//! Master runtime: owns the listening socket, the balancer, and the worker
//! supervisor.
//!
//! The master never speaks to `Transport::handle_connection`/`closed`;
//! those are worker-side only. The master only ever reads a transport's
//! `port()` and `is_permanent_connection()`.

use crate::balancer::Balancer;
use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::role;
use crate::supervisor::{Supervisor, SupervisorEvent, WorkerHandle};
use crate::transport::Transport;
use anyhow::{Context, Result};
use socket2::{Domain, Socket, Type};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Listener backlog, set via `socket2` rather than left at tokio's bare
/// default.
const LISTEN_BACKLOG: i32 = 1024;

/// Run the master to completion: bind, spawn the initial worker pool, then
/// loop accepting connections and worker lifecycle events until a shutdown
/// signal arrives.
pub async fn run(transport: Arc<dyn Transport>, config: ClusterConfig) -> Result<()> {
    // SAFETY: the very first thing a master does, before any worker is
    // spawned and before any other task that might read the environment
    // concurrently is started.
    unsafe {
        role::mark_as_master();
    }

    let port = transport.port();
    let listener =
        bind_listener(port).with_context(|| format!("binding master listener on port {port}"))?;
    info!(port, "master listening");

    // A random 32-bit seed, chosen once and held for the master's lifetime.
    let seed: u32 = rand::random();
    let balancer = Balancer::new(seed);

    // Parse the master's own argv once for an inspect/debug port and record
    // it in its own environment, so the debug-port offsetting below has a
    // base port to work from.
    let own_args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(port) = crate::utils::parse_master_debug_port(&own_args) {
        std::env::set_var(role::DEBUG_PORT_VAR, port.to_string());
    }
    let master_debug_port = std::env::var(role::DEBUG_PORT_VAR)
        .ok()
        .and_then(|s| s.parse().ok());
    let (supervisor, mut events_rx) = Supervisor::new(config.clone(), master_debug_port);

    let mut workers: VecDeque<Arc<WorkerHandle>> = VecDeque::new();
    for _ in 0..supervisor.target_worker_count() {
        let handle = supervisor
            .spawn_worker()
            .await
            .context("spawning initial worker pool")?;
        workers.push_back(handle);
    }

    let mut shutdown = shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, remote_addr)) => {
                        // `accept()` hands back a socket with nothing read
                        // from it yet: pause-on-connect is simply "don't
                        // read before handoff".
                        balancer
                            .route(socket, Some(remote_addr), transport.is_permanent_connection(), &mut workers)
                            .await;
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Some(SupervisorEvent::Closed { worker_id }) => {
                        info!(worker_id, "worker closed voluntarily");
                        remove_and_maybe_respawn(&supervisor, &mut workers, worker_id).await;
                    }
                    Some(SupervisorEvent::Exited { worker_id, success }) => {
                        if success {
                            info!(worker_id, "worker exited");
                        } else {
                            warn!(worker_id, "worker exited with a failure status");
                        }
                        remove_and_maybe_respawn(&supervisor, &mut workers, worker_id).await;
                    }
                    None => {
                        error!("supervisor event channel closed unexpectedly");
                    }
                }
            }
            _ = &mut shutdown => {
                info!(worker_count = workers.len(), "shutdown signal received, terminating workers");
                for worker in &workers {
                    if let Err(err) = supervisor.terminate(worker) {
                        warn!(worker_id = worker.id, error = %err, "failed to terminate worker");
                    }
                }
                break;
            }
        }
    }

    Ok(())
}

/// Remove a gone worker from the routing list and, if the pool is
/// configured to respawn, spawn its replacement, preserving pool size.
async fn remove_and_maybe_respawn(
    supervisor: &Supervisor,
    workers: &mut VecDeque<Arc<WorkerHandle>>,
    worker_id: u32,
) {
    workers.retain(|w| w.id != worker_id);
    if supervisor.respawn_enabled() {
        match supervisor.spawn_worker().await {
            Ok(handle) => workers.push_back(handle),
            Err(err) => error!(error = %err, "failed to respawn worker"),
        }
    }
}

fn bind_listener(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port);
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None).context("creating listener socket")?;
    socket.set_reuse_address(true).context("setting SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("setting listener nonblocking")?;
    socket
        .bind(&addr.into())
        .and_then(|()| socket.listen(LISTEN_BACKLOG))
        .map_err(|source| ClusterError::ListenerBindFailed { port, source })?;
    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener).context("registering listener with tokio")
}

/// Resolves on SIGINT or SIGTERM. Boxed so it can be re-polled across
/// `select!` iterations via a `&mut` borrow.
fn shutdown_signal() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async {
        let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
        match terminate {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler, shutting down on SIGINT only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    })
}
