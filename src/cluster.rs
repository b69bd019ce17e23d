//! The top-level entry point a host application calls.
//!
//! `Cluster::new(transport, config).run()` is the one call a binary needs:
//! it detects whether the current process re-entered as a worker, and
//! dispatches to the matching runtime.

use crate::config::ClusterConfig;
use crate::role::{self, Role};
use crate::transport::Transport;
use crate::{master, worker};
use anyhow::Result;
use std::sync::Arc;

/// Ties a transport and its configuration to the role-appropriate runtime.
pub struct Cluster {
    transport: Arc<dyn Transport>,
    config: ClusterConfig,
}

impl Cluster {
    pub fn new(transport: Arc<dyn Transport>, config: ClusterConfig) -> Self {
        Self { transport, config }
    }

    /// Run to completion. In the master process this returns once a
    /// shutdown signal has been handled; in a worker process it returns
    /// once the transport closes or the control channel is lost.
    pub async fn run(self) -> Result<()> {
        match role::detect() {
            Role::Master => master::run(self.transport, self.config).await,
            Role::Worker => worker::run(self.transport).await,
        }
    }
}
