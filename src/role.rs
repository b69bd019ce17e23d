//! Process role detection.
//!
//! The only signal distinguishing a master from a worker is the
//! `CLUSTER_MASTER_PID` environment variable: absent means this process is
//! the master (which then sets it for any children it spawns); present
//! means this process is a worker.

use std::env;

/// Environment variable a master sets on itself (and therefore its
/// children inherit) to mark a process as a worker.
pub const MASTER_PID_VAR: &str = "CLUSTER_MASTER_PID";

/// Environment variable the master assigns on each spawned child: a fresh
/// monotonic id, unique for the master's lifetime.
pub const UNIQUE_ID_VAR: &str = "NODE_UNIQUE_ID";

/// Environment variable carrying the inherited IPC file descriptor number
/// a worker should treat as its control channel to the master.
pub const IPC_FD_VAR: &str = "CLUSTER_IPC_FD";

/// Environment variable the master records for itself once, so spawned
/// children (and the master's own debug-port offsetting logic) can see
/// what `--inspect-brk` port the master itself was started with.
pub const DEBUG_PORT_VAR: &str = "CLUSTER_DEBUG_PORT";

/// The role of the current process, determined once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This process owns the listening socket and routes connections.
    Master,
    /// This process was spawned by a master and speaks the application
    /// protocol on sockets handed to it.
    Worker,
}

/// Detect whether the current process is a master or a worker.
///
/// A process is a worker iff [`MASTER_PID_VAR`] is already present in its
/// environment, which only happens if a master set it before spawning
/// this process (the master sets it on itself, so the child inherits it).
pub fn detect() -> Role {
    if env::var_os(MASTER_PID_VAR).is_some() {
        Role::Worker
    } else {
        Role::Master
    }
}

/// Mark the current process as master by setting [`MASTER_PID_VAR`] to its
/// own pid, so that any process it spawns inherits the marker and is
/// classified as a worker.
///
/// # Safety
///
/// Mutating the process environment is only sound when no other thread is
/// concurrently reading or writing it. This must be called once, at
/// startup, before any worker is spawned or any other thread is started.
pub unsafe fn mark_as_master() {
    env::set_var(MASTER_PID_VAR, std::process::id().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variable mutation races across tests in the same process;
    // serialize the ones that touch CLUSTER_MASTER_PID.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn absent_var_means_master() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(MASTER_PID_VAR);
        assert_eq!(detect(), Role::Master);
    }

    #[test]
    fn present_var_means_worker() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var(MASTER_PID_VAR, "12345");
        assert_eq!(detect(), Role::Worker);
        std::env::remove_var(MASTER_PID_VAR);
    }

    #[test]
    fn mark_as_master_sets_own_pid() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var(MASTER_PID_VAR);
        unsafe {
            mark_as_master();
        }
        let val = std::env::var(MASTER_PID_VAR).unwrap();
        assert_eq!(val, std::process::id().to_string());
        std::env::remove_var(MASTER_PID_VAR);
    }
}
