/// Tiered shutdown: cooperative close, graceful terminate, force kill.
///
/// Each stage runs only while target processes remain, and success is judged
/// by re-running discovery rather than trusting the termination call.
use crate::config::EscalationSettings;
use crate::inventory::{Inventory, ProcessSet};
use tokio::time::{sleep, Instant};

/// Termination technique that finally emptied (or last touched) the target set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    CooperativeClose = 1,
    GracefulTerminate = 2,
    ForceKill = 3,
}

impl Stage {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::CooperativeClose => "cooperative close",
            Stage::GracefulTerminate => "graceful terminate",
            Stage::ForceKill => "force kill",
        };
        write!(f, "stage {} ({name})", self.number())
    }
}

/// What one escalation achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOutcome {
    /// `None` when there was nothing to terminate.
    pub stage: Option<Stage>,
    /// Processes still alive after the final stage.
    pub survivors: ProcessSet,
}

impl EscalationOutcome {
    fn nothing_to_do() -> Self {
        Self {
            stage: None,
            survivors: ProcessSet::new(),
        }
    }

    fn finished(stage: Stage, survivors: ProcessSet) -> Self {
        Self {
            stage: Some(stage),
            survivors,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.survivors.is_empty()
    }
}

/// Platform termination primitives.
///
/// Implementations must treat a target that is already gone as success and
/// must log, not propagate, any other per-process failure.
pub trait Escalator {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Whether stage 1 can run on this platform.
    fn cooperative_close_available(&self) -> bool;

    /// Ask every visible top-level window owned by a target to close.
    /// Returns the number of windows that accepted the request.
    fn cooperative_close(&self, targets: &ProcessSet) -> usize;

    /// Request termination of the target tree, escalating stubborn
    /// individual processes where the platform needs it.
    async fn graceful_terminate(&self, targets: &ProcessSet, settings: &EscalationSettings);

    /// Unconditionally kill every target, children included.
    async fn force_kill(&self, targets: &ProcessSet);
}

/// Run the escalation against `targets`.
///
/// Never regresses to an earlier stage and never retries a stage. An empty
/// `targets` set returns immediately without touching any process.
pub async fn escalate<I, E>(
    targets: &ProcessSet,
    inventory: &mut I,
    escalator: &E,
    settings: &EscalationSettings,
) -> EscalationOutcome
where
    I: Inventory,
    E: Escalator,
{
    if targets.is_empty() {
        tracing::debug!("escalation requested for an empty process set, nothing to do");
        return EscalationOutcome::nothing_to_do();
    }

    let mut remaining = targets.clone();

    if escalator.cooperative_close_available() {
        let windows = escalator.cooperative_close(&remaining);
        tracing::info!(
            escalator = escalator.name(),
            windows,
            processes = remaining.len(),
            "stage 1: sent close requests"
        );
        let budget = settings.cooperative_close_wait + settings.cooperative_close_grace;
        match wait_until_empty(inventory, &remaining, budget, settings).await {
            Ok(()) => {
                tracing::info!("stage 1: all browser processes exited");
                return EscalationOutcome::finished(Stage::CooperativeClose, ProcessSet::new());
            }
            Err(left) => {
                tracing::warn!(
                    remaining = ?left.pids(),
                    budget_secs = budget.as_secs(),
                    "stage 1: processes still running after close requests"
                );
                remaining = left;
            }
        }
    } else {
        tracing::debug!(
            escalator = escalator.name(),
            "cooperative close unavailable, skipping stage 1"
        );
    }

    tracing::info!(
        escalator = escalator.name(),
        processes = remaining.len(),
        "stage 2: requesting graceful termination"
    );
    escalator.graceful_terminate(&remaining, settings).await;
    sleep(settings.graceful_wait).await;
    remaining = rediscover(inventory, &remaining);
    if remaining.is_empty() {
        tracing::info!("stage 2: all browser processes exited");
        return EscalationOutcome::finished(Stage::GracefulTerminate, remaining);
    }

    tracing::warn!(
        remaining = ?remaining.pids(),
        "stage 3: graceful termination incomplete, force killing"
    );
    escalator.force_kill(&remaining).await;
    sleep(settings.force_kill_settle).await;
    let survivors = rediscover(inventory, &remaining);
    if survivors.is_empty() {
        tracing::info!("stage 3: all browser processes killed");
    } else {
        tracing::error!(
            survivors = ?survivors.pids(),
            "stage 3: processes survived a forced kill"
        );
    }
    EscalationOutcome::finished(Stage::ForceKill, survivors)
}

/// Poll discovery until the target set is empty or `budget` runs out.
///
/// Returns the last observed set on timeout.
async fn wait_until_empty<I: Inventory>(
    inventory: &mut I,
    known: &ProcessSet,
    budget: std::time::Duration,
    settings: &EscalationSettings,
) -> Result<(), ProcessSet> {
    let deadline = Instant::now() + budget;
    let mut last = known.clone();
    while Instant::now() < deadline {
        sleep(settings.poll_interval).await;
        last = rediscover(inventory, &last);
        if last.is_empty() {
            return Ok(());
        }
    }
    Err(last)
}

/// Fresh view of the target set. A failed pass keeps the previous view.
fn rediscover<I: Inventory>(inventory: &mut I, previous: &ProcessSet) -> ProcessSet {
    match inventory.discover() {
        Ok(discovery) => discovery.processes,
        Err(e) => {
            tracing::warn!(error = %e, "discovery failed during escalation, assuming processes remain");
            previous.clone()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::inventory::tests::{handle, ScriptedInventory};
    use crate::inventory::{Discovery, ProcessSet};
    use std::cell::RefCell;
    use std::collections::BTreeSet;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Call {
        CooperativeClose(Vec<u32>),
        GracefulTerminate(Vec<u32>),
        ForceKill(Vec<u32>),
    }

    /// Escalator that records calls instead of touching processes.
    pub(crate) struct RecordingEscalator {
        pub(crate) cooperative: bool,
        pub(crate) calls: RefCell<Vec<Call>>,
    }

    impl RecordingEscalator {
        pub(crate) fn new(cooperative: bool) -> Self {
            Self {
                cooperative,
                calls: RefCell::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl Escalator for RecordingEscalator {
        fn name(&self) -> &str {
            "recording"
        }

        fn cooperative_close_available(&self) -> bool {
            self.cooperative
        }

        fn cooperative_close(&self, targets: &ProcessSet) -> usize {
            self.calls
                .borrow_mut()
                .push(Call::CooperativeClose(targets.pids()));
            targets.len()
        }

        async fn graceful_terminate(&self, targets: &ProcessSet, _settings: &EscalationSettings) {
            self.calls
                .borrow_mut()
                .push(Call::GracefulTerminate(targets.pids()));
        }

        async fn force_kill(&self, targets: &ProcessSet) {
            self.calls.borrow_mut().push(Call::ForceKill(targets.pids()));
        }
    }

    pub(crate) fn running(pids: &[u32]) -> Discovery {
        let set: ProcessSet = pids.iter().map(|&pid| handle(pid, None, 100)).collect();
        Discovery::new(set, BTreeSet::new())
    }

    pub(crate) fn gone() -> Discovery {
        Discovery::default()
    }

    fn settings() -> EscalationSettings {
        MonitorConfig::default().escalation()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_set_does_nothing() {
        let mut inventory = ScriptedInventory::new(vec![]);
        let escalator = RecordingEscalator::new(true);
        let start = Instant::now();

        let outcome = escalate(&ProcessSet::new(), &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, None);
        assert!(outcome.is_clean());
        assert!(escalator.calls().is_empty());
        assert_eq!(inventory.calls, 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_one_success_stops_escalation() {
        // Two polls still see the browser, the third sees it gone.
        let mut inventory = ScriptedInventory::new(vec![running(&[1, 2]), running(&[1]), gone()]);
        let escalator = RecordingEscalator::new(true);
        let targets = running(&[1, 2]).processes;

        let outcome = escalate(&targets, &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, Some(Stage::CooperativeClose));
        assert!(outcome.is_clean());
        assert_eq!(escalator.calls(), vec![Call::CooperativeClose(vec![1, 2])]);
        assert_eq!(inventory.calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_one_polls_for_full_budget() {
        let mut inventory = ScriptedInventory::new(vec![running(&[1])]);
        let escalator = RecordingEscalator::new(true);
        let settings = settings();
        let start = Instant::now();

        let _ = escalate(&running(&[1]).processes, &mut inventory, &escalator, &settings).await;

        // 10s wait + 5s grace, polled every second, then stage 2 and stage 3 re-checks.
        assert_eq!(inventory.calls, 15 + 2);
        let expected = settings.cooperative_close_wait
            + settings.cooperative_close_grace
            + settings.graceful_wait
            + settings.force_kill_settle;
        assert_eq!(start.elapsed(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_two_runs_only_after_stage_one_times_out() {
        let mut script = vec![running(&[1, 2]); 15];
        script.push(gone());
        let mut inventory = ScriptedInventory::new(script);
        let escalator = RecordingEscalator::new(true);

        let outcome =
            escalate(&running(&[1, 2]).processes, &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, Some(Stage::GracefulTerminate));
        assert!(outcome.is_clean());
        assert_eq!(
            escalator.calls(),
            vec![
                Call::CooperativeClose(vec![1, 2]),
                Call::GracefulTerminate(vec![1, 2]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_two_targets_processes_left_by_stage_one() {
        let mut script = vec![running(&[1, 2, 3]); 14];
        script.push(running(&[3]));
        script.push(gone());
        let mut inventory = ScriptedInventory::new(script);
        let escalator = RecordingEscalator::new(true);

        let outcome =
            escalate(&running(&[1, 2, 3]).processes, &mut inventory, &escalator, &settings())
                .await;

        assert_eq!(outcome.stage, Some(Stage::GracefulTerminate));
        assert_eq!(escalator.calls()[1], Call::GracefulTerminate(vec![3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_cooperative_close_starts_at_stage_two() {
        let mut inventory = ScriptedInventory::new(vec![gone()]);
        let escalator = RecordingEscalator::new(false);

        let outcome = escalate(&running(&[7]).processes, &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, Some(Stage::GracefulTerminate));
        assert_eq!(escalator.calls(), vec![Call::GracefulTerminate(vec![7])]);
        assert_eq!(inventory.calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_three_after_graceful_fails() {
        let mut inventory = ScriptedInventory::new(vec![running(&[7, 8]), gone()]);
        let escalator = RecordingEscalator::new(false);

        let outcome =
            escalate(&running(&[7, 8]).processes, &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, Some(Stage::ForceKill));
        assert!(outcome.is_clean());
        assert_eq!(
            escalator.calls(),
            vec![
                Call::GracefulTerminate(vec![7, 8]),
                Call::ForceKill(vec![7, 8]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unkillable_process_reported_as_survivor() {
        let mut inventory = ScriptedInventory::new(vec![running(&[7, 8]), running(&[8])]);
        let escalator = RecordingEscalator::new(true);

        let outcome =
            escalate(&running(&[7, 8]).processes, &mut inventory, &escalator, &settings()).await;

        assert_eq!(outcome.stage, Some(Stage::ForceKill));
        assert_eq!(outcome.survivors.pids(), vec![8]);
        assert_eq!(escalator.calls().len(), 3);
        assert!(matches!(escalator.calls()[2], Call::ForceKill(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rediscovery_assumes_processes_remain() {
        let mut inventory = ScriptedInventory::new(vec![gone()]).with_failure();
        let escalator = RecordingEscalator::new(false);

        let outcome = escalate(&running(&[5]).processes, &mut inventory, &escalator, &settings()).await;

        // Stage 2 re-check failed, so stage 3 ran; its re-check saw nothing.
        assert_eq!(outcome.stage, Some(Stage::ForceKill));
        assert!(outcome.is_clean());
        assert_eq!(escalator.calls()[1], Call::ForceKill(vec![5]));
    }

    #[test]
    fn test_stage_numbers() {
        assert_eq!(Stage::CooperativeClose.number(), 1);
        assert_eq!(Stage::GracefulTerminate.number(), 2);
        assert_eq!(Stage::ForceKill.number(), 3);
        assert_eq!(Stage::ForceKill.to_string(), "stage 3 (force kill)");
    }
}
