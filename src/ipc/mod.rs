//! # Master ↔ Worker IPC Protocol
//!
//! The master and each worker communicate over a `UnixStream` pair created
//! by the master at spawn time and handed to the child as a pre-opened,
//! inherited file descriptor (its number passed via the
//! [`crate::role::IPC_FD_VAR`] environment variable).
//!
//! Three message shapes cross this channel:
//!
//! - `Balancing` (master → worker): a routing decision, always accompanied
//!   by one `SCM_RIGHTS`-passed TCP socket file descriptor.
//! - `Close` (worker → master): voluntary server shutdown notification.
//! - `Ack` (worker → master): sent once at worker startup so the master can
//!   mark the worker's channel "connected" before routing anything to it.
//!
//! Framing is a 4-byte little-endian length prefix followed by a
//! `bincode`-encoded [`ControlMessage`], written in a single `sendmsg` so
//! that the ancillary `SCM_RIGHTS` data (when present) rides along with it.

mod fd_channel;

pub use fd_channel::FdChannel;

use serde::{Deserialize, Serialize};

/// Body of a master↔worker control message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Master → worker: route the attached socket to this worker's
    /// transport as though it had been natively accepted.
    Balancing,
    /// Worker → master: the worker's transport server voluntarily closed.
    Close,
    /// Worker → master: handshake sent once at startup, naming the
    /// worker's own id for a sanity check against what the master assigned.
    Ack { worker_id: u32 },
}

impl ControlMessage {
    /// The control-message body the balancer sends when routing a
    /// connection to a worker. Named as a function rather than a bare
    /// variant reference so call sites read like the literal wire message
    /// rather than a magic enum variant.
    pub fn balancing() -> Self {
        ControlMessage::Balancing
    }
}
