//! Platform-specific termination behind the [`Escalator`](crate::escalator::Escalator) trait.
//!
//! Capabilities are detected once at startup and handed to the escalator;
//! nothing below re-checks them at runtime.

#[cfg(unix)]
pub mod unix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use self::unix::UnixEscalator as NativeEscalator;
#[cfg(windows)]
pub use self::windows::WindowsEscalator as NativeEscalator;

/// What the current platform lets the monitor do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The process table can be enumerated at all.
    pub process_inspection: bool,
    /// Top-level windows can be enumerated and sent close requests.
    pub cooperative_close: bool,
    /// Open file handles of other processes can be listed.
    pub open_file_introspection: bool,
}

impl Capabilities {
    pub fn detect() -> Self {
        Self {
            process_inspection: sysinfo::IS_SUPPORTED_SYSTEM,
            cooperative_close: cfg!(windows),
            open_file_introspection: cfg!(target_os = "linux"),
        }
    }
}

/// Build the escalator for this platform.
pub fn native_escalator(capabilities: Capabilities) -> NativeEscalator {
    NativeEscalator::new(capabilities)
}

/// Failures of a single termination request.
#[derive(Debug)]
pub enum ProcessError {
    /// The process no longer exists.
    Gone { pid: u32 },
    PermissionDenied { pid: u32 },
    Signal { pid: u32, message: String },
    /// An external termination command failed for a reason other than "not found".
    #[cfg_attr(not(windows), allow(dead_code))]
    Command {
        program: String,
        code: Option<i32>,
        message: String,
    },
}

impl ProcessError {
    /// Whether the target is already gone, which counts as success.
    pub fn is_gone(&self) -> bool {
        matches!(self, ProcessError::Gone { .. })
    }
}

impl std::fmt::Display for ProcessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Gone { pid } => write!(f, "process {pid} no longer exists"),
            ProcessError::PermissionDenied { pid } => {
                write!(f, "permission denied for process {pid}")
            }
            ProcessError::Signal { pid, message } => {
                write!(f, "failed to signal process {pid}: {message}")
            }
            ProcessError::Command {
                program,
                code,
                message,
            } => match code {
                Some(code) => write!(f, "{program} exited with code {code}: {message}"),
                None => write!(f, "{program} failed: {message}"),
            },
        }
    }
}

impl std::error::Error for ProcessError {}

/// Exit code `taskkill` uses when no process matched.
#[cfg_attr(not(windows), allow(dead_code))]
const TASKKILL_NOT_FOUND: i32 = 128;

/// Interpret the result of a `taskkill` run.
///
/// "Not found" (exit code 128, or the message on either stream) means the
/// target is already gone and is reported as `Ok`.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn classify_taskkill(
    code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> Result<(), ProcessError> {
    if code == Some(0) {
        return Ok(());
    }
    let not_found = code == Some(TASKKILL_NOT_FOUND)
        || [stdout, stderr]
            .iter()
            .any(|s| s.to_lowercase().contains("not found"));
    if not_found {
        return Ok(());
    }
    let message = if stderr.trim().is_empty() {
        stdout.trim()
    } else {
        stderr.trim()
    };
    Err(ProcessError::Command {
        program: "taskkill".to_string(),
        code,
        message: message.to_string(),
    })
}
