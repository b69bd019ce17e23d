//! A multi-process TCP connection balancer.
//!
//! One master process owns the listening socket and accepts connections in
//! pause-on-connect mode (no bytes read). Each accepted socket is routed to
//! one of N long-lived worker child processes: round-robin for
//! short-lived connections, sticky-by-remote-address for long-lived ones.
//! Routing hands the socket off across the process boundary by passing its
//! file descriptor over a Unix domain control channel. Workers re-inject the
//! socket into a host-supplied [`Transport`] exactly as if it had been
//! natively accepted.
//!
//! The entry point for a host application is [`Cluster`]:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use clusterd::{Cluster, ClusterConfig, Transport};
//! # async fn run(transport: Arc<dyn Transport>) -> anyhow::Result<()> {
//! Cluster::new(transport, ClusterConfig::default()).run().await
//! # }
//! ```

pub mod balancer;
pub mod cluster;
pub mod config;
pub mod error;
pub mod hash;
pub mod ipc;
pub mod logging;
pub mod master;
pub mod role;
pub mod supervisor;
pub mod transport;
pub mod utils;
pub mod worker;

pub use cluster::Cluster;
pub use config::ClusterConfig;
pub use error::ClusterError;
pub use transport::{BindMode, ConnectionCounter, Transport};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
