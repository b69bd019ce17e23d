//! Routing decision and handoff: pick a worker for a freshly accepted
//! socket, then send it across.
//!
//! The balancer itself holds no mutable state beyond the per-master seed.
//! The routing list it operates on is owned by the master's accept loop
//! and passed in by `&mut` reference, so this stays a pure routing
//! function plus a send.

use crate::error::ClusterError;
use crate::hash;
use crate::supervisor::WorkerHandle;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Fallback remote-address bytes used when a socket reports no remote
/// address.
const FALLBACK_ADDR: &str = "127.0.0.1";

pub struct Balancer {
    seed: u32,
}

impl Balancer {
    /// `seed` is chosen once per master (a random 32-bit value) and never
    /// changes for that master's lifetime.
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Route one freshly accepted, unread socket to a worker.
    ///
    /// On success the socket's fd has been handed off and this function's
    /// caller should drop its own `TcpStream` without reading or writing
    /// to it. On failure the socket has already been shut down and closed;
    /// the caller has nothing further to do.
    pub async fn route(
        &self,
        socket: TcpStream,
        remote_addr: Option<SocketAddr>,
        is_permanent_connection: bool,
        workers: &mut VecDeque<Arc<WorkerHandle>>,
    ) {
        let addr_string = remote_addr
            .map(|a| a.ip().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| FALLBACK_ADDR.to_string());

        let chosen = if is_permanent_connection {
            self.pick_sticky(&addr_string, workers)
        } else {
            Self::pick_round_robin(workers)
        };

        let chosen = match chosen {
            Some(w) => w,
            None => {
                let err = ClusterError::NoWorkersAvailable { remote_addr: addr_string };
                warn!(error = %err, "dropping connection");
                Self::drop_socket(socket).await;
                return;
            }
        };

        if !chosen.is_connected() {
            let err = ClusterError::WorkerNotConnected { worker_id: chosen.id };
            warn!(error = %err, "dropping connection");
            Self::drop_socket(socket).await;
            return;
        }

        debug!(
            worker_id = chosen.id,
            remote_addr = %addr_string,
            policy = if is_permanent_connection { "sticky" } else { "round_robin" },
            "routing connection"
        );

        if let Err(err) = chosen.hand_off(&socket).await {
            warn!(worker_id = chosen.id, error = %err, "failed to hand off connection to worker");
            Self::drop_socket(socket).await;
        }
        // On success the worker now owns a duplicate of the fd; drop ours.
    }

    /// Sticky selection: `hash(seed, addr) mod len(workers)`. Does not
    /// mutate the routing list.
    fn pick_sticky(
        &self,
        addr: &str,
        workers: &VecDeque<Arc<WorkerHandle>>,
    ) -> Option<Arc<WorkerHandle>> {
        if workers.is_empty() {
            return None;
        }
        let idx = (hash::mix(self.seed, addr.as_bytes()) as usize) % workers.len();
        workers.get(idx).cloned()
    }

    /// Round-robin selection: pop the head, select it, re-append at the tail.
    fn pick_round_robin(workers: &mut VecDeque<Arc<WorkerHandle>>) -> Option<Arc<WorkerHandle>> {
        let worker = workers.pop_front()?;
        workers.push_back(worker.clone());
        Some(worker)
    }

    async fn drop_socket(mut socket: TcpStream) {
        let _ = socket.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::FdChannel;
    use std::sync::atomic::AtomicBool;

    fn fake_worker(id: u32, connected: bool) -> Arc<WorkerHandle> {
        let (channel, _peer) = FdChannel::pair().unwrap();
        let handle = WorkerHandle::new_for_test(id, channel, 0);
        handle.connected.store(connected, std::sync::atomic::Ordering::SeqCst);
        Arc::new(handle)
    }
    // Quiet the "unused" lint for AtomicBool import used only via WorkerHandle internals.
    #[allow(dead_code)]
    fn _touch(_: &AtomicBool) {}

    #[test]
    fn round_robin_rotates_fifo() {
        let a = fake_worker(1, true);
        let b = fake_worker(2, true);
        let mut workers: VecDeque<Arc<WorkerHandle>> = VecDeque::from([a.clone(), b.clone()]);

        let first = Balancer::pick_round_robin(&mut workers).unwrap();
        assert_eq!(first.id, 1);
        let second = Balancer::pick_round_robin(&mut workers).unwrap();
        assert_eq!(second.id, 2);
        let third = Balancer::pick_round_robin(&mut workers).unwrap();
        assert_eq!(third.id, 1);
    }

    #[test]
    fn sticky_is_stable_for_same_address_and_worker_count() {
        let balancer = Balancer::new(42);
        let workers: VecDeque<Arc<WorkerHandle>> =
            VecDeque::from([fake_worker(1, true), fake_worker(2, true), fake_worker(3, true)]);

        let first = balancer.pick_sticky("10.0.0.7", &workers).unwrap();
        let second = balancer.pick_sticky("10.0.0.7", &workers).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn empty_routing_list_yields_none() {
        let workers: VecDeque<Arc<WorkerHandle>> = VecDeque::new();
        let balancer = Balancer::new(1);
        assert!(balancer.pick_sticky("10.0.0.7", &workers).is_none());
        let mut empty = VecDeque::new();
        assert!(Balancer::pick_round_robin(&mut empty).is_none());
    }
}
