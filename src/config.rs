use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix shared by all environment-variable overrides.
pub const ENV_PREFIX: &str = "BRAVE_MONITOR";

/// Monitor settings loaded from `brave-monitor.toml`.
///
/// The document is flat: every key is optional and falls back to the
/// documented default. The core only ever reads this value.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Memory ceiling in MB; 0 disables enforcement.
    pub memory_limit_mb: u64,
    /// Case-insensitive substring identifying target processes.
    pub process_name: String,
    pub check_interval_s: u64,
    /// Cool-down after a restart before normal polling resumes.
    pub restart_wait_s: u64,
    pub cooperative_close_wait_s: u64,
    /// Extra polling time added on top of `cooperative_close_wait_s`.
    pub cooperative_close_grace_s: u64,
    pub graceful_wait_s: u64,
    /// Per-process wait after SIGTERM before escalating that process to SIGKILL.
    pub terminate_wait_s: u64,
    pub force_kill_settle_s: u64,
    pub escalation_poll_s: u64,
    pub error_retry_s: u64,
    pub log_level: LogLevel,
    /// Browser executable; empty means resolve it at restart time.
    pub browser_path: String,
    /// Substrings of the first command-line argument that mark the main
    /// browser process. A single string is accepted as a one-element list.
    #[serde(deserialize_with = "string_or_list")]
    pub install_path_hint: Vec<String>,
    /// Browser user-data directory; empty means the platform default.
    pub user_data_dir: String,
    /// Status file path; empty disables it.
    pub status_file: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 4096,
            process_name: "brave".to_string(),
            check_interval_s: 60,
            restart_wait_s: 30,
            cooperative_close_wait_s: 10,
            cooperative_close_grace_s: 5,
            graceful_wait_s: 5,
            terminate_wait_s: 2,
            force_kill_settle_s: 2,
            escalation_poll_s: 1,
            error_retry_s: 10,
            log_level: LogLevel::Info,
            browser_path: String::new(),
            install_path_hint: default_install_path_hints()
                .iter()
                .map(|hint| hint.to_string())
                .collect(),
            user_data_dir: String::new(),
            status_file: String::new(),
        }
    }
}

#[cfg(windows)]
fn default_install_path_hints() -> &'static [&'static str] {
    &["bravesoftware"]
}

#[cfg(target_os = "macos")]
fn default_install_path_hints() -> &'static [&'static str] {
    &["brave browser.app"]
}

/// Package locations: the official deb/rpm, snap, distro packages, the AUR
/// build and flatpak (host-side id and in-sandbox prefix).
#[cfg(not(any(windows, target_os = "macos")))]
fn default_install_path_hints() -> &'static [&'static str] {
    &[
        "/opt/brave.com/",
        "/snap/brave/",
        "/usr/lib/brave-browser",
        "/opt/brave-bin/",
        "com.brave.browser",
        "/app/brave/",
    ]
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(hint) => vec![hint],
        OneOrMany::Many(hints) => hints,
    })
}

/// Minimum log verbosity, spelled the way the settings document spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// Parse a level name case-insensitively. `WARN` is accepted for `WARNING`.
    pub fn parse(value: &str) -> Option<LogLevel> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LogLevel::Debug),
            "INFO" => Some(LogLevel::Info),
            "WARNING" | "WARN" => Some(LogLevel::Warning),
            "ERROR" => Some(LogLevel::Error),
            "CRITICAL" => Some(LogLevel::Critical),
            _ => None,
        }
    }

    /// The `tracing` filter directive for this level.
    ///
    /// `tracing` has no level above ERROR, so CRITICAL filters like ERROR;
    /// critical events carry a `severity = "critical"` field instead.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(LogLevel::parse(&raw).unwrap_or_default())
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Wait budgets that drive the shutdown escalation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationSettings {
    pub cooperative_close_wait: Duration,
    pub cooperative_close_grace: Duration,
    pub graceful_wait: Duration,
    pub terminate_wait: Duration,
    pub force_kill_settle: Duration,
    pub poll_interval: Duration,
}

impl MonitorConfig {
    /// Load the config file. `None` when it does not exist; callers start
    /// from defaults.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml_str(&contents).map(Some).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })
    }

    /// Apply `BRAVE_MONITOR_*` overrides from a variable lookup, normally
    /// the process environment.
    ///
    /// Numeric values that fail to parse are ignored and the current value stands.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}_{suffix}"));
        let number = |suffix: &str| var(suffix).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(v) = number("RAM_LIMIT_MB") {
            self.memory_limit_mb = v;
        }
        if let Some(v) = var("PROCESS_NAME") {
            self.process_name = v;
        }
        if let Some(v) = number("CHECK_INTERVAL") {
            self.check_interval_s = v;
        }
        if let Some(v) = number("RESTART_WAIT") {
            self.restart_wait_s = v;
        }
        if let Some(v) = number("GRACEFUL_WAIT") {
            self.graceful_wait_s = v;
        }
        if let Some(v) = number("COOPERATIVE_CLOSE_WAIT") {
            self.cooperative_close_wait_s = v;
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.log_level = LogLevel::parse(&v).unwrap_or_default();
        }
        if let Some(v) = var("BROWSER_PATH") {
            self.browser_path = v;
        }
    }

    /// Reject settings the monitor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.process_name.trim().is_empty() {
            return Err(ConfigError::Invalid("process_name must not be empty".to_string()));
        }
        if self.check_interval_s == 0 {
            return Err(ConfigError::Invalid("check_interval_s must be > 0".to_string()));
        }
        if self.escalation_poll_s == 0 {
            return Err(ConfigError::Invalid("escalation_poll_s must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_s)
    }

    pub fn restart_wait(&self) -> Duration {
        Duration::from_secs(self.restart_wait_s)
    }

    pub fn error_retry(&self) -> Duration {
        Duration::from_secs(self.error_retry_s)
    }

    pub fn escalation(&self) -> EscalationSettings {
        EscalationSettings {
            cooperative_close_wait: Duration::from_secs(self.cooperative_close_wait_s),
            cooperative_close_grace: Duration::from_secs(self.cooperative_close_grace_s),
            graceful_wait: Duration::from_secs(self.graceful_wait_s),
            terminate_wait: Duration::from_secs(self.terminate_wait_s),
            force_kill_settle: Duration::from_secs(self.force_kill_settle_s),
            poll_interval: Duration::from_secs(self.escalation_poll_s),
        }
    }

    /// `None` when the string setting is blank.
    fn optional_path(value: &str) -> Option<PathBuf> {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    pub fn browser_path(&self) -> Option<PathBuf> {
        Self::optional_path(&self.browser_path)
    }

    pub fn user_data_dir(&self) -> Option<PathBuf> {
        Self::optional_path(&self.user_data_dir)
    }

    pub fn status_file(&self) -> Option<PathBuf> {
        Self::optional_path(&self.status_file)
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}
