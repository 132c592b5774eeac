//! Per-identity liveness markers.
//!
//! One pid file per running worker, named after the identity. A marker is
//! only as good as the process it points at: checks consult the live
//! process table, and a marker for a dead pid is removed on sight so a
//! crashed worker can never block a restart.

use std::fs;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, Signal, System};
use tracing::{debug, warn};

use crate::error::LivenessError;

/// Tracks which identities have a live worker on this machine.
pub struct LivenessRegistry {
    dir: PathBuf,
}

impl LivenessRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn marker_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.pid"))
    }

    /// Record the current process as the running worker for `identity`.
    /// Fails if a live worker already holds the marker.
    pub fn register(&self, identity: &str) -> Result<(), LivenessError> {
        if let Some(pid) = self.live_pid(identity) {
            return Err(LivenessError::AlreadyRunning {
                identity: identity.to_string(),
                pid,
            });
        }
        fs::create_dir_all(&self.dir)?;
        fs::write(self.marker_path(identity), std::process::id().to_string())?;
        Ok(())
    }

    /// Remove the marker for `identity`, if any.
    pub fn unregister(&self, identity: &str) {
        if let Err(e) = fs::remove_file(self.marker_path(identity)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(identity, error = %e, "Failed to remove liveness marker");
            }
        }
    }

    /// Whether a live worker holds the marker for `identity`.
    pub fn is_running(&self, identity: &str) -> bool {
        self.live_pid(identity).is_some()
    }

    /// Ask the recorded worker to stop (SIGTERM, or a hard kill where the
    /// platform has no signals). Returns the signalled pid, or `None` when
    /// no live worker exists.
    pub fn signal_stop(&self, identity: &str) -> Option<u32> {
        let pid = self.live_pid(identity)?;
        let sys = System::new_all();
        let process = sys.process(Pid::from_u32(pid))?;

        let delivered = process
            .kill_with(Signal::Term)
            .unwrap_or_else(|| process.kill());
        if delivered { Some(pid) } else { None }
    }

    /// The marker's pid, if it refers to a live process. Stale and garbage
    /// markers are removed as a side effect.
    fn live_pid(&self, identity: &str) -> Option<u32> {
        let path = self.marker_path(identity);
        let raw = fs::read_to_string(&path).ok()?;

        let pid: u32 = match raw.trim().parse() {
            Ok(pid) => pid,
            Err(_) => {
                debug!(identity, "Unreadable liveness marker, removing");
                remove_marker(&path);
                return None;
            }
        };

        if process_alive(pid) {
            Some(pid)
        } else {
            debug!(identity, pid, "Stale liveness marker, removing");
            remove_marker(&path);
            None
        }
    }
}

fn remove_marker(path: &Path) {
    let _ = fs::remove_file(path);
}

fn process_alive(pid: u32) -> bool {
    let sys = System::new_all();
    sys.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (tempfile::TempDir, LivenessRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = LivenessRegistry::new(dir.path());
        (dir, registry)
    }

    #[test]
    fn unregistered_identity_is_not_running() {
        let (_dir, registry) = registry();
        assert!(!registry.is_running("agent-1"));
    }

    #[test]
    fn register_makes_identity_running() {
        let (_dir, registry) = registry();
        registry.register("agent-1").unwrap();

        // Our own pid is alive by definition.
        assert!(registry.is_running("agent-1"));
        assert!(registry.dir.join("agent-1.pid").exists());
    }

    #[test]
    fn live_marker_survives_repeated_checks() {
        let (_dir, registry) = registry();
        registry.register("agent-1").unwrap();

        assert!(registry.is_running("agent-1"));
        assert!(registry.is_running("agent-1"));
        assert!(registry.dir.join("agent-1.pid").exists());
    }

    #[test]
    fn register_twice_is_rejected() {
        let (_dir, registry) = registry();
        registry.register("agent-1").unwrap();

        let err = registry.register("agent-1").unwrap_err();
        assert!(matches!(err, LivenessError::AlreadyRunning { .. }));
    }

    #[test]
    fn unregister_clears_the_marker() {
        let (_dir, registry) = registry();
        registry.register("agent-1").unwrap();
        registry.unregister("agent-1");

        assert!(!registry.is_running("agent-1"));
        assert!(!registry.dir.join("agent-1.pid").exists());
    }

    #[test]
    fn dead_pid_marker_is_stale_and_removed() {
        let (_dir, registry) = registry();
        let path = registry.dir.join("agent-1.pid");
        fs::create_dir_all(&registry.dir).unwrap();
        // Far above any real pid range.
        fs::write(&path, "4000000000").unwrap();

        assert!(!registry.is_running("agent-1"));
        assert!(!path.exists());
    }

    #[test]
    fn garbage_marker_is_removed() {
        let (_dir, registry) = registry();
        let path = registry.dir.join("agent-1.pid");
        fs::create_dir_all(&registry.dir).unwrap();
        fs::write(&path, "not-a-pid").unwrap();

        assert!(!registry.is_running("agent-1"));
        assert!(!path.exists());
    }

    #[test]
    fn identities_do_not_interfere() {
        let (_dir, registry) = registry();
        registry.register("agent-1").unwrap();

        assert!(!registry.is_running("agent-2"));
        registry.unregister("agent-2");
        assert!(registry.is_running("agent-1"));
    }

    #[test]
    fn stop_signal_for_missing_worker_is_none() {
        let (_dir, registry) = registry();
        assert_eq!(registry.signal_stop("agent-1"), None);
    }
}
