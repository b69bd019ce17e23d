//! Worker runtime: the code path a re-spawned child process runs.

use crate::error::ClusterError;
use crate::ipc::{ControlMessage, FdChannel};
use crate::role;
use crate::transport::{BindMode, Transport};
use anyhow::{Context, Result};
use std::os::fd::RawFd;
use std::sync::Arc;
use tracing::{info, warn};

/// Run the worker to completion: open the inherited control channel, feed
/// every handed-off socket into the transport, and notify the master when
/// the transport closes.
pub async fn run(transport: Arc<dyn Transport>) -> Result<()> {
    let unique_id: u32 = std::env::var(role::UNIQUE_ID_VAR)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fd: RawFd = std::env::var(role::IPC_FD_VAR)
        .context("worker process missing CLUSTER_IPC_FD")?
        .parse()
        .context("CLUSTER_IPC_FD is not a valid file descriptor number")?;

    // SAFETY: the master duplicated this fd into us via `fork` specifically
    // so we could open it here; it is not otherwise in use in this process.
    let channel = unsafe { FdChannel::from_raw_fd(fd) }.context("opening inherited IPC channel")?;

    info!(worker_id = unique_id, "worker starting");

    // Workers never bind the shared port themselves: the master already
    // owns it.
    if let Err(source) = transport.start(BindMode::Delegated).await {
        let err = ClusterError::TransportStartFailed { worker_id: unique_id, source };
        if err.is_worker_fault() {
            tracing::error!(worker_id = unique_id, error = %err, "worker exiting after transport start failure");
        }
        return Err(err.into());
    }

    // Tell the master this worker's channel is live, once, before serving
    // any traffic, so the master can mark the worker's channel connected.
    channel
        .send(&ControlMessage::Ack { worker_id: unique_id }, None)
        .await
        .context("sending startup ack to master")?;

    let closed = transport.closed();
    tokio::pin!(closed);

    loop {
        tokio::select! {
            received = channel.recv() => {
                match received {
                    Ok((ControlMessage::Balancing, Some(socket))) => {
                        let remote_addr = socket.peer_addr().ok();
                        transport.connection_counter().increment();
                        match remote_addr {
                            Some(addr) => {
                                // Spawned so a slow application handler can
                                // never stall this worker's IPC receive loop.
                                let transport = transport.clone();
                                tokio::spawn(async move {
                                    transport.handle_connection(socket, addr).await;
                                });
                            }
                            None => {
                                warn!(worker_id = unique_id, "handed-off socket has no peer address, dropping");
                            }
                        }
                    }
                    Ok((ControlMessage::Balancing, None)) => {
                        warn!(worker_id = unique_id, "balancing message arrived with no attached socket");
                    }
                    Ok((other, _)) => {
                        warn!(worker_id = unique_id, message = ?other, "unexpected message on worker control channel");
                    }
                    Err(err) => {
                        warn!(worker_id = unique_id, error = %err, "control channel closed, worker exiting");
                        return Ok(());
                    }
                }
            }
            _ = &mut closed => {
                info!(worker_id = unique_id, "transport closed voluntarily, notifying master");
                let _ = channel.send(&ControlMessage::Close, None).await;
                return Ok(());
            }
        }
    }
}
