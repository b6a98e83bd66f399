//! The monitor loop: sample, compare with the limit, restart on breach, sleep.
//!
//! One cycle never fails the loop. Errors are logged at critical severity and
//! turned into a retry delay, and the shutdown signal is raced against every
//! inter-cycle wait.

use crate::config::MonitorConfig;
use crate::escalator::{escalate, EscalationOutcome, Escalator};
use crate::inventory::{Inventory, InventoryError};
use crate::profiles::ProfileId;
use crate::relaunch::{relaunch, resolve_executable, Launcher, RelaunchReport};
use crate::status::{MonitorState, StatusTracker};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

const BYTES_PER_MB: u64 = 1_048_576;

/// How close the sample is to the limit, for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Nominal,
    Warning,
    Critical,
}

impl Severity {
    /// Below 80% is nominal, below 95% a warning, anything above critical.
    pub fn from_percent(percent: f64) -> Self {
        if percent < 80.0 {
            Severity::Nominal
        } else if percent < 95.0 {
            Severity::Warning
        } else {
            Severity::Critical
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Nominal => "nominal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

/// Escalation plus relaunch, as performed after a breach.
#[derive(Debug)]
pub struct RestartOutcome {
    pub escalation: EscalationOutcome,
    pub relaunch: RelaunchReport,
}

/// What one monitoring cycle observed and did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No target process was found.
    NotRunning,
    /// The limit is 0; the sample was only logged.
    Unenforced { memory_mb: f64 },
    BelowLimit { memory_mb: f64, severity: Severity },
    Restarted(RestartOutcome),
}

impl CycleOutcome {
    /// How long to wait before the next cycle.
    pub fn next_wait(&self, config: &MonitorConfig) -> Duration {
        match self {
            CycleOutcome::Restarted(_) => config.restart_wait(),
            _ => config.check_interval(),
        }
    }

    /// One-line summary for `--once`.
    pub fn describe(&self) -> String {
        match self {
            CycleOutcome::NotRunning => "browser not running".to_string(),
            CycleOutcome::Unenforced { memory_mb } => {
                format!("{memory_mb:.1} MB in use, no limit enforced")
            }
            CycleOutcome::BelowLimit {
                memory_mb,
                severity,
            } => format!("{memory_mb:.1} MB in use ({})", severity.as_str()),
            CycleOutcome::Restarted(restart) => {
                let stage = restart
                    .escalation
                    .stage
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "nothing to stop".to_string());
                let relaunch = match &restart.relaunch {
                    RelaunchReport::NoExecutable => "no executable found".to_string(),
                    RelaunchReport::Launched {
                        executable,
                        launches,
                    } => {
                        let mut summary = format!(
                            "{} of {} launches from {} succeeded",
                            restart.relaunch.succeeded(),
                            restart.relaunch.attempted(),
                            executable.display()
                        );
                        let failed: Vec<&str> = launches
                            .iter()
                            .filter(|l| l.result.is_err())
                            .map(|l| l.profile.as_ref().map_or("<none>", ProfileId::as_str))
                            .collect();
                        if !failed.is_empty() {
                            summary.push_str(&format!(" (failed: {})", failed.join(", ")));
                        }
                        summary
                    }
                };
                format!("browser restarted after {stage}; {relaunch}")
            }
        }
    }
}

/// A monitoring cycle that could not complete.
#[derive(Debug)]
pub enum MonitorError {
    Inventory(InventoryError),
}

impl std::fmt::Display for MonitorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorError::Inventory(e) => write!(f, "process discovery failed: {e}"),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Inventory(e) => Some(e),
        }
    }
}

impl From<InventoryError> for MonitorError {
    fn from(e: InventoryError) -> Self {
        MonitorError::Inventory(e)
    }
}

/// Owns the collaborators and drives the sampling loop.
pub struct Monitor<I, E, L> {
    config: MonitorConfig,
    inventory: I,
    escalator: E,
    launcher: L,
    status: Option<StatusTracker>,
}

impl<I, E, L> Monitor<I, E, L>
where
    I: Inventory,
    E: Escalator,
    L: Launcher,
{
    pub fn new(config: MonitorConfig, inventory: I, escalator: E, launcher: L) -> Self {
        let status = config
            .status_file()
            .map(|path| StatusTracker::new(path, config.memory_limit_mb));
        Self {
            config,
            inventory,
            escalator,
            launcher,
            status,
        }
    }

    fn set_state(&self, state: MonitorState) {
        if let Some(status) = &self.status {
            status.update(state);
        }
    }

    /// Run one sample-compare-act cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, MonitorError> {
        self.set_state(MonitorState::Sampling);
        let discovery = self.inventory.discover()?;

        if discovery.processes.is_empty() {
            tracing::info!(process_name = %self.config.process_name, "browser not running");
            if let Some(status) = &mut self.status {
                status.clear_sample();
            }
            self.set_state(MonitorState::Idle);
            return Ok(CycleOutcome::NotRunning);
        }

        let memory_mb = discovery.memory.megabytes();
        let processes = discovery.processes.len();
        if let Some(status) = &mut self.status {
            let profiles = discovery
                .profiles
                .iter()
                .map(|p| p.as_str().to_string())
                .collect();
            status.set_sample(memory_mb, processes, profiles);
        }

        let limit_mb = self.config.memory_limit_mb;
        if limit_mb == 0 {
            tracing::info!(
                memory_mb = format_args!("{memory_mb:.1}"),
                processes,
                "memory sampled, no limit enforced"
            );
            self.set_state(MonitorState::Idle);
            return Ok(CycleOutcome::Unenforced { memory_mb });
        }

        let percent = memory_mb / limit_mb as f64 * 100.0;
        let severity = Severity::from_percent(percent);
        match severity {
            Severity::Nominal => tracing::info!(
                memory_mb = format_args!("{memory_mb:.1}"),
                limit_mb,
                percent = format_args!("{percent:.1}"),
                processes,
                severity = severity.as_str(),
                "memory sampled"
            ),
            Severity::Warning | Severity::Critical => tracing::warn!(
                memory_mb = format_args!("{memory_mb:.1}"),
                limit_mb,
                percent = format_args!("{percent:.1}"),
                processes,
                severity = severity.as_str(),
                "memory approaching limit"
            ),
        }

        let limit_bytes = limit_mb.saturating_mul(BYTES_PER_MB);
        if discovery.memory.bytes <= limit_bytes {
            self.set_state(MonitorState::BelowLimit);
            return Ok(CycleOutcome::BelowLimit {
                memory_mb,
                severity,
            });
        }

        tracing::warn!(
            memory_mb = format_args!("{memory_mb:.1}"),
            limit_mb,
            processes,
            profiles = discovery.profiles.len(),
            "memory limit exceeded, restarting browser"
        );
        self.set_state(MonitorState::AboveLimit);

        self.set_state(MonitorState::Escalating);
        let settings = self.config.escalation();
        let escalation = escalate(
            &discovery.processes,
            &mut self.inventory,
            &self.escalator,
            &settings,
        )
        .await;
        if !escalation.is_clean() {
            tracing::error!(
                survivors = ?escalation.survivors.pids(),
                "browser processes survived escalation, relaunching anyway"
            );
        }

        self.set_state(MonitorState::Relaunching);
        let executable = resolve_executable(self.config.browser_path());
        let report = relaunch(&self.launcher, executable.as_deref(), &discovery.profiles);
        tracing::info!(
            stage = %escalation.stage.map(|s| s.to_string()).unwrap_or_default(),
            launched = report.succeeded(),
            complete = report.all_succeeded(),
            cool_down_secs = self.config.restart_wait_s,
            "browser restart finished"
        );

        if let Some(status) = &mut self.status {
            status.record_restart(escalation.stage.map(|s| s.number()));
        }
        self.set_state(MonitorState::CoolingDown);

        Ok(CycleOutcome::Restarted(RestartOutcome {
            escalation,
            relaunch: report,
        }))
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// The shutdown future is only observed while waiting between cycles, so
    /// an escalation in progress always completes. Browsers launched by the
    /// monitor are left running.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = &'static str>,
    {
        tokio::pin!(shutdown);
        self.set_state(MonitorState::Starting);
        tracing::info!(
            process_name = %self.config.process_name,
            limit_mb = self.config.memory_limit_mb,
            interval_secs = self.config.check_interval_s,
            escalator = self.escalator.name(),
            "monitor started"
        );

        loop {
            let wait = match self.run_cycle().await {
                Ok(outcome) => {
                    if !matches!(outcome, CycleOutcome::Restarted(_)) {
                        self.set_state(MonitorState::Idle);
                    }
                    outcome.next_wait(&self.config)
                }
                Err(e) => {
                    tracing::error!(
                        severity = "critical",
                        error = %e,
                        retry_secs = self.config.error_retry_s,
                        "monitoring cycle failed"
                    );
                    self.set_state(MonitorState::Idle);
                    self.config.error_retry()
                }
            };

            tokio::select! {
                _ = sleep(wait) => {}
                signal = &mut shutdown => {
                    tracing::info!(signal, "shutdown requested, stopping monitor");
                    break;
                }
            }
        }

        self.set_state(MonitorState::ShuttingDown);
        if let Some(status) = &self.status {
            status.remove();
        }
    }
}
