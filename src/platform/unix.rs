/// POSIX termination: SIGTERM to the roots of the target tree with a
/// per-process SIGKILL fallback, then SIGKILL for everything left.
use super::{Capabilities, ProcessError};
use crate::config::EscalationSettings;
use crate::escalator::Escalator;
use crate::inventory::{process_alive, ProcessSet};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Granularity of the per-process exit wait.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct UnixEscalator {
    capabilities: Capabilities,
}

impl UnixEscalator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

/// Send `signal` to `pid`, mapping "no such process" to [`ProcessError::Gone`].
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), ProcessError> {
    let raw = i32::try_from(pid).map_err(|_| ProcessError::Gone { pid })?;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ProcessError::Gone { pid }),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied { pid }),
        Err(e) => Err(ProcessError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

/// Send a signal, logging anything other than "already gone".
fn signal_logged(pid: u32, signal: Signal) -> bool {
    match send_signal(pid, signal) {
        Ok(()) => true,
        Err(e) if e.is_gone() => {
            tracing::debug!(pid, ?signal, "process already gone");
            false
        }
        Err(e) => {
            tracing::warn!(pid, ?signal, error = %e, "failed to signal process");
            false
        }
    }
}

/// Wait up to `timeout` for `pid` to exit. Returns `true` once it is gone.
async fn wait_for_exit(pid: u32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}

impl Escalator for UnixEscalator {
    fn name(&self) -> &str {
        "posix-signals"
    }

    fn cooperative_close_available(&self) -> bool {
        self.capabilities.cooperative_close
    }

    fn cooperative_close(&self, _targets: &ProcessSet) -> usize {
        0
    }

    async fn graceful_terminate(&self, targets: &ProcessSet, settings: &EscalationSettings) {
        for process in targets.roots() {
            if !signal_logged(process.pid, Signal::SIGTERM) {
                continue;
            }
            tracing::debug!(pid = process.pid, name = %process.name, "sent SIGTERM");
            if wait_for_exit(process.pid, settings.terminate_wait).await {
                continue;
            }
            tracing::warn!(
                pid = process.pid,
                wait_secs = settings.terminate_wait.as_secs(),
                "process ignored SIGTERM, sending SIGKILL"
            );
            signal_logged(process.pid, Signal::SIGKILL);
        }
    }

    async fn force_kill(&self, targets: &ProcessSet) {
        let killed = targets
            .iter()
            .filter(|p| signal_logged(p.pid, Signal::SIGKILL))
            .count();
        tracing::info!(killed, targets = targets.len(), "sent SIGKILL");
    }
}
