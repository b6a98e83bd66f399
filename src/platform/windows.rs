//! Windows termination: WM_CLOSE to the browser's windows, then `taskkill`
//! with tree termination, then `taskkill /F`.

use super::{classify_taskkill, Capabilities, ProcessError};
use crate::config::EscalationSettings;
use crate::escalator::Escalator;
use crate::inventory::ProcessSet;
use std::collections::HashSet;
use tokio::process::Command;
use windows::Win32::Foundation::{BOOL, HWND, LPARAM, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetWindowThreadProcessId, IsWindowVisible, PostMessageW, WM_CLOSE,
};

pub struct WindowsEscalator {
    capabilities: Capabilities,
}

impl WindowsEscalator {
    pub fn new(capabilities: Capabilities) -> Self {
        Self { capabilities }
    }
}

/// Every top-level window on the desktop with its owning process id.
fn top_level_windows() -> Vec<(HWND, u32)> {
    let mut windows: Vec<(HWND, u32)> = Vec::new();
    let data = &mut windows as *mut Vec<(HWND, u32)>;
    unsafe {
        if let Err(e) = EnumWindows(Some(enum_windows_callback), LPARAM(data as isize)) {
            tracing::warn!(error = %e, "window enumeration failed");
        }
    }
    windows
}

/// Callback for EnumWindows: record visible windows and keep enumerating.
unsafe extern "system" fn enum_windows_callback(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let windows = lparam.0 as *mut Vec<(HWND, u32)>;
    if windows.is_null() || !IsWindowVisible(hwnd).as_bool() {
        return BOOL(1);
    }
    let mut pid: u32 = 0;
    GetWindowThreadProcessId(hwnd, Some(&mut pid as *mut u32));
    if pid != 0 {
        (*windows).push((hwnd, pid));
    }
    BOOL(1)
}

/// Run `taskkill` with the given arguments and interpret its result.
async fn taskkill(args: &[&str]) -> Result<(), ProcessError> {
    let output = Command::new("taskkill")
        .args(args)
        .output()
        .await
        .map_err(|e| ProcessError::Command {
            program: "taskkill".to_string(),
            code: None,
            message: e.to_string(),
        })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    tracing::debug!(
        ?args,
        code = ?output.status.code(),
        stdout = %stdout.trim(),
        stderr = %stderr.trim(),
        "taskkill finished"
    );
    classify_taskkill(output.status.code(), &stdout, &stderr)
}

impl Escalator for WindowsEscalator {
    fn name(&self) -> &str {
        "windows"
    }

    fn cooperative_close_available(&self) -> bool {
        self.capabilities.cooperative_close
    }

    fn cooperative_close(&self, targets: &ProcessSet) -> usize {
        let pids: HashSet<u32> = targets.pids().into_iter().collect();
        top_level_windows()
            .into_iter()
            .filter(|(_, pid)| pids.contains(pid))
            .filter(|(hwnd, pid)| {
                match unsafe { PostMessageW(*hwnd, WM_CLOSE, WPARAM(0), LPARAM(0)) } {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(pid, error = %e, "close request rejected");
                        false
                    }
                }
            })
            .count()
    }

    async fn graceful_terminate(&self, targets: &ProcessSet, _settings: &EscalationSettings) {
        for image in targets.names() {
            match taskkill(&["/IM", image, "/T"]).await {
                Ok(()) => tracing::info!(image, "taskkill requested tree termination"),
                Err(e) => tracing::warn!(image, error = %e, "taskkill failed"),
            }
        }
    }

    async fn force_kill(&self, targets: &ProcessSet) {
        for process in targets.roots() {
            let pid = process.pid.to_string();
            match taskkill(&["/F", "/T", "/PID", &pid]).await {
                Ok(()) => tracing::debug!(pid = process.pid, "taskkill /F succeeded"),
                Err(e) => tracing::warn!(pid = process.pid, error = %e, "taskkill /F failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooperative_close_available() {
        let escalator = WindowsEscalator::new(Capabilities::detect());
        assert!(escalator.cooperative_close_available());
    }

    #[test]
    fn test_cooperative_close_with_no_targets_sends_nothing() {
        let escalator = WindowsEscalator::new(Capabilities::detect());
        assert_eq!(escalator.cooperative_close(&ProcessSet::new()), 0);
    }
}
