//! Cluster configuration surface.

use std::collections::HashMap;

/// Worker pool sizing, respawn policy, and an environment overlay for
/// spawned children. The transport itself is passed separately to
/// [`crate::cluster::Cluster::new`] rather than stored here, since it is not
/// serializable configuration: it is a live object with a
/// `start`/`handle_connection` implementation.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Number of worker processes to maintain. Defaults to the host's CPU
    /// count via `num_cpus`.
    pub workers: usize,

    /// Whether a worker that exits (crash or voluntary close) is replaced.
    pub respawn: bool,

    /// Environment variables overlaid onto the master's own environment
    /// when spawning each worker. Overlay keys win over inherited ones.
    pub env: HashMap<String, String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            respawn: true,
            env: HashMap::new(),
        }
    }
}

impl ClusterConfig {
    /// Start from defaults with an explicit worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    /// Builder-style setter for `respawn`.
    pub fn respawn(mut self, respawn: bool) -> Self {
        self.respawn = respawn;
        self
    }

    /// Builder-style setter for a single overlay environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_host_cpu_count() {
        let config = ClusterConfig::default();
        assert_eq!(config.workers, num_cpus::get());
        assert!(config.respawn);
        assert!(config.env.is_empty());
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = ClusterConfig::with_workers(3)
            .respawn(false)
            .env("FOO", "bar");
        assert_eq!(config.workers, 3);
        assert!(!config.respawn);
        assert_eq!(config.env.get("FOO"), Some(&"bar".to_string()));
    }
}
