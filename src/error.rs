//! Error taxonomy for the cluster balancer.
//!
//! Call sites that only need to propagate a failure with context use
//! `anyhow::Result`, matching the rest of the crate. Call sites that need
//! to *decide* something based on what went wrong (the supervisor deciding
//! whether to respawn, the master deciding whether a bind failure is
//! fatal) match on [`ClusterError`] instead.

use thiserror::Error;

/// The error kinds this crate needs callers to be able to distinguish.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The master failed to bind the listening socket. Fatal: surfaced to
    /// the caller of [`crate::cluster::Cluster::run`].
    #[error("failed to bind listener on port {port}: {source}")]
    ListenerBindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A worker's `transport.start()` failed. Non-fatal to the master; the
    /// worker process terminates with a non-zero exit code and the
    /// supervisor respawns it if configured to.
    #[error("worker {worker_id} failed to start its transport: {source}")]
    TransportStartFailed {
        worker_id: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Sending the `"balancing"` control message (with attached socket) to
    /// a worker failed. Non-fatal: the balancer drops the connection.
    #[error("failed to hand off connection to worker {worker_id}: {source}")]
    HandoffFailed {
        worker_id: u32,
        #[source]
        source: std::io::Error,
    },

    /// The chosen worker's IPC channel was not connected at routing time.
    #[error("worker {worker_id} is not connected")]
    WorkerNotConnected { worker_id: u32 },

    /// The routing list was empty when a connection needed to be routed.
    #[error("no workers available to route connection from {remote_addr}")]
    NoWorkersAvailable { remote_addr: String },

    /// Spawning a worker process failed.
    #[error("failed to spawn worker: {source}")]
    SpawnFailed {
        #[source]
        source: std::io::Error,
    },
}

impl ClusterError {
    /// Whether this error should trigger a respawn of the worker it names,
    /// independent of the cluster's `respawn` policy (which gates whether
    /// respawn happens at all, not whether this specific error warrants it).
    pub fn is_worker_fault(&self) -> bool {
        matches!(
            self,
            ClusterError::TransportStartFailed { .. } | ClusterError::HandoffFailed { .. }
        )
    }
}
