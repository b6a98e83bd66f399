/// Status file: writes the monitor's state as JSON on every transition.
///
/// Uses atomic write pattern: write to temp file then rename.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Monitor states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Starting,
    Idle,
    Sampling,
    BelowLimit,
    AboveLimit,
    Escalating,
    Relaunching,
    CoolingDown,
    ShuttingDown,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: MonitorState,
    pub memory_mb: Option<f64>,
    pub memory_limit_mb: u64,
    pub process_count: usize,
    pub profiles: Vec<String>,
    pub restarts: u64,
    pub last_restart_stage: Option<u8>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let tmp_path = self.tmp_path();

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Current contents, or `None` when no monitor has written one.
    pub fn read(&self) -> Result<Option<String>, StatusError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StatusError::Read {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }

    fn tmp_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "status".to_string());
        dir.join(format!(".{name}.tmp.{}", std::process::id()))
    }
}

/// Mutable state tracker that builds StatusData for each update.
pub struct StatusTracker {
    file: StatusFile,
    pid: u32,
    memory_limit_mb: u64,
    memory_mb: Option<f64>,
    process_count: usize,
    profiles: Vec<String>,
    restarts: u64,
    last_restart_stage: Option<u8>,
}

impl StatusTracker {
    pub fn new(status_path: PathBuf, memory_limit_mb: u64) -> Self {
        Self {
            file: StatusFile::new(status_path),
            pid: std::process::id(),
            memory_limit_mb,
            memory_mb: None,
            process_count: 0,
            profiles: Vec::new(),
            restarts: 0,
            last_restart_stage: None,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: MonitorState) {
        let data = StatusData {
            pid: self.pid,
            state,
            memory_mb: self.memory_mb,
            memory_limit_mb: self.memory_limit_mb,
            process_count: self.process_count,
            profiles: self.profiles.clone(),
            restarts: self.restarts,
            last_restart_stage: self.last_restart_stage,
            last_update: Utc::now(),
        };

        if let Err(e) = self.file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Record the latest discovery pass.
    pub fn set_sample(&mut self, memory_mb: f64, process_count: usize, profiles: Vec<String>) {
        self.memory_mb = Some(memory_mb);
        self.process_count = process_count;
        self.profiles = profiles;
    }

    /// Record the browser as not running.
    pub fn clear_sample(&mut self) {
        self.memory_mb = None;
        self.process_count = 0;
        self.profiles.clear();
    }

    /// Count a restart and the stage that ended its escalation.
    pub fn record_restart(&mut self, stage: Option<u8>) {
        self.restarts += 1;
        self.last_restart_stage = stage;
    }

    /// Remove the status file.
    pub fn remove(&self) {
        self.file.remove();
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Read { path, source } => {
                write!(f, "failed to read status file {}: {source}", path.display())
            }
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Read { source, .. } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
