//! Worker supervisor: spawn/respawn, monotonic ids, debug-port offsetting,
//! and environment overlay.
//!
//! A worker is not `fork(2)`-ed. This process may already be running a
//! multi-threaded tokio runtime, and a raw `fork` of a multi-threaded
//! process is unsound (only the forking thread survives into the child,
//! other threads' locks can be left held forever). Instead the supervisor
//! re-executes the current binary as a fresh child process; the role
//! detector in `role.rs` classifies the re-entered process as a worker via
//! the inherited `CLUSTER_MASTER_PID` variable.

use crate::config::ClusterConfig;
use crate::ipc::{ControlMessage, FdChannel};
use crate::role;
use crate::utils;
use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events the supervisor reports back to the master's single accept/event
/// loop, which is the only task that mutates the routing list: there are no
/// internal locks guarding it.
#[derive(Debug)]
pub enum SupervisorEvent {
    /// The worker's transport voluntarily closed (`{type: "close"}`).
    Closed { worker_id: u32 },
    /// The worker process exited: crash or (after a `Closed` event) a
    /// clean shutdown the master already accounted for.
    Exited { worker_id: u32, success: bool },
}

/// A live handle to one worker process, held in the master's routing list.
pub struct WorkerHandle {
    pub id: u32,
    pub pid: u32,
    channel: FdChannel,
    pub(crate) connected: AtomicBool,
}

impl WorkerHandle {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Hand a freshly accepted, unread socket off to this worker via the
    /// `"balancing"` control message.
    pub async fn hand_off(&self, socket: &TcpStream) -> Result<()> {
        let fd = socket.as_raw_fd();
        self.channel.send(&ControlMessage::balancing(), Some(fd)).await
    }

    #[cfg(test)]
    pub fn new_for_test(id: u32, channel: FdChannel, pid: u32) -> Self {
        Self {
            id,
            pid,
            channel,
            connected: AtomicBool::new(true),
        }
    }
}

/// Spawns and tracks worker processes, and feeds their lifecycle events
/// back to the master over an unbounded channel.
pub struct Supervisor {
    config: ClusterConfig,
    master_debug_port: Option<u16>,
    next_id: AtomicU32,
    debug_offset: AtomicU32,
    events_tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl Supervisor {
    /// `master_debug_port` is `Some` only if the master's own startup
    /// arguments carried an inspector flag.
    pub fn new(
        config: ClusterConfig,
        master_debug_port: Option<u16>,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                master_debug_port,
                next_id: AtomicU32::new(0),
                debug_offset: AtomicU32::new(0),
                events_tx,
            },
            events_rx,
        )
    }

    pub fn respawn_enabled(&self) -> bool {
        self.config.respawn
    }

    pub fn target_worker_count(&self) -> usize {
        self.config.workers
    }

    /// Spawn procedure for one worker: derive its environment and args,
    /// open its control channel, and re-exec the current binary.
    pub async fn spawn_worker(&self) -> Result<Arc<WorkerHandle>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        let current_exe =
            std::env::current_exe().context("resolving current executable for worker spawn")?;
        let mut args: Vec<String> = std::env::args().skip(1).collect();
        if let Some(master_port) = self.master_debug_port {
            if args.iter().any(|a| utils::is_inspect_flag(a)) {
                let offset = self.debug_offset.fetch_add(1, Ordering::SeqCst) + 1;
                let new_port = utils::next_debug_port(master_port, offset);
                args = utils::rewrite_inspect_args(&args, new_port);
            }
        }

        let (parent_channel, child_sock) =
            FdChannel::pair().context("creating worker control channel")?;
        let child_fd = child_sock.as_raw_fd();

        let env = utils::merge_env(std::env::vars(), &self.config.env);

        let mut command = std::process::Command::new(&current_exe);
        command.args(&args).envs(&env);
        command.env(role::UNIQUE_ID_VAR, id.to_string());
        command.env(role::IPC_FD_VAR, child_fd.to_string());

        // SAFETY: the closure only inspects and adjusts flags on `child_fd`,
        // which was duplicated into the child by `fork` before this runs and
        // is not otherwise touched by the parent until after `spawn` returns.
        unsafe {
            command.pre_exec(move || {
                let flags = libc::fcntl(child_fd, libc::F_GETFD);
                if flags == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                if libc::fcntl(child_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut tokio_command = tokio::process::Command::from(command);
        tokio_command.kill_on_drop(false);
        let child = tokio_command
            .spawn()
            .map_err(|source| crate::error::ClusterError::SpawnFailed { source })?;
        // The child's fork-time copy of `child_sock` is what the worker
        // reads CLUSTER_IPC_FD against; this process no longer needs its own.
        drop(child_sock);

        let pid = child.id().unwrap_or(0);
        info!(worker_id = id, pid, "spawned worker");

        let handle = Arc::new(WorkerHandle {
            id,
            pid,
            channel: parent_channel,
            // Marked connected once the worker's startup `Ack` arrives, not
            // optimistically at spawn.
            connected: AtomicBool::new(false),
        });

        self.watch(handle.clone(), child);
        Ok(handle)
    }

    /// Send SIGTERM to a worker (used for graceful master shutdown).
    pub fn terminate(&self, handle: &WorkerHandle) -> Result<()> {
        kill(Pid::from_raw(handle.pid as i32), Signal::SIGTERM)
            .context("sending SIGTERM to worker")?;
        Ok(())
    }

    /// Subscribe to a worker's `exit`/`message`/`error` events in a
    /// background task, forwarding the ones that matter to the routing
    /// list back through `events_tx`.
    fn watch(&self, handle: Arc<WorkerHandle>, mut child: Child) {
        let events_tx = self.events_tx.clone();
        let worker_id = handle.id;
        tokio::spawn(async move {
            let mut reported = false;
            let mut channel_dead = false;
            loop {
                tokio::select! {
                    recv = handle.channel.recv(), if !reported && !channel_dead => {
                        match recv {
                            Ok((ControlMessage::Close, _)) => {
                                handle.connected.store(false, Ordering::SeqCst);
                                reported = true;
                                let _ = events_tx.send(SupervisorEvent::Closed { worker_id });
                            }
                            Ok((ControlMessage::Ack { worker_id: acked_id }, _)) => {
                                if acked_id == worker_id {
                                    handle.connected.store(true, Ordering::SeqCst);
                                    info!(worker_id, "worker acknowledged, now connected");
                                } else {
                                    warn!(worker_id, acked_id, "ack carried a mismatched worker id, ignoring");
                                }
                            }
                            Ok((ControlMessage::Balancing, _)) => {
                                warn!(worker_id, "worker sent a balancing message upstream, ignoring");
                            }
                            Err(err) => {
                                // Log and keep the worker running; the
                                // authoritative teardown signal is the process
                                // exit awaited below, not a channel error.
                                warn!(worker_id, error = %err, "worker control channel error");
                                channel_dead = true;
                            }
                        }
                    }
                    status = child.wait() => {
                        handle.connected.store(false, Ordering::SeqCst);
                        if !reported {
                            let success = status.map(|s| s.success()).unwrap_or(false);
                            let _ = events_tx.send(SupervisorEvent::Exited { worker_id, success });
                        }
                        return;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_offset_increments_independently_of_worker_id() {
        let (supervisor, _rx) = Supervisor::new(ClusterConfig::with_workers(2), Some(9229));
        assert_eq!(supervisor.debug_offset.load(Ordering::SeqCst), 0);
        assert_eq!(supervisor.next_id.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn respawn_and_count_reflect_config() {
        let (supervisor, _rx) =
            Supervisor::new(ClusterConfig::with_workers(4).respawn(false), None);
        assert!(!supervisor.respawn_enabled());
        assert_eq!(supervisor.target_worker_count(), 4);
    }
}
