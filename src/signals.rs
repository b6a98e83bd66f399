/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C) and, on Unix, SIGTERM both end the monitor loop at its
/// next wait. Handlers are registered by [`ShutdownSignal::install`], so a
/// signal that arrives while a cycle is running is held until the loop next
/// waits. Nothing is forwarded to the browser.

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// Registered shutdown handlers. Must be created inside the tokio runtime.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
}

impl ShutdownSignal {
    /// Register the handlers now, replacing the default "terminate the
    /// process" action.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Resolve once a shutdown signal arrives. Returns the signal's name.
    #[cfg(unix)]
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(windows)]
    pub async fn recv(mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "CTRL_C"
    }
}

/// Whether this process currently catches SIGTERM, read from
/// `/proc/self/status`.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn sigterm_caught() -> bool {
    const SIGTERM_BIT: u64 = 1 << (15 - 1);
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("SigCgt:"))
                .and_then(|mask| u64::from_str_radix(mask.trim(), 16).ok())
        })
        .is_some_and(|mask| mask & SIGTERM_BIT != 0)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::signal::{kill, Signal as NixSignal};
    use nix::unistd::Pid;
    use std::time::Duration;

    #[tokio::test]
    async fn test_signal_before_first_poll_is_held() {
        let shutdown = ShutdownSignal::install().unwrap();
        #[cfg(target_os = "linux")]
        assert!(sigterm_caught());

        // Raised before anyone awaits the handler.
        kill(Pid::this(), NixSignal::SIGTERM).unwrap();

        let name = tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .unwrap();
        assert_eq!(name, "SIGTERM");
    }
}
