//! Process discovery: enumerate the process table once, keep the browser's
//! processes, sum their resident memory and infer which profiles are open.

use crate::profiles::{self, ProfileId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

const BYTES_PER_MB: f64 = 1_048_576.0;

/// Snapshot of one live OS process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
    pub parent_pid: Option<u32>,
    /// Resident set size at discovery time.
    pub memory_bytes: u64,
}

/// Processes found in one discovery pass, deduplicated by pid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSet {
    processes: BTreeMap<u32, ProcessHandle>,
}

impl ProcessSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle; a second handle with the same pid replaces the first.
    pub fn insert(&mut self, handle: ProcessHandle) {
        self.processes.insert(handle.pid, handle);
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.processes.contains_key(&pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.processes.values()
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.keys().copied().collect()
    }

    /// Members whose parent is not itself a member.
    ///
    /// Signalling only these is enough: the browser cascades a shutdown
    /// request from a parent to its own children.
    pub fn roots(&self) -> impl Iterator<Item = &ProcessHandle> {
        self.iter()
            .filter(|p| !p.parent_pid.is_some_and(|parent| self.contains(parent)))
    }

    /// Distinct process image names, in sorted order.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn names(&self) -> BTreeSet<&str> {
        self.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn memory(&self) -> MemorySample {
        MemorySample::new(self.iter().map(|p| p.memory_bytes).sum())
    }
}

impl FromIterator<ProcessHandle> for ProcessSet {
    fn from_iter<T: IntoIterator<Item = ProcessHandle>>(iter: T) -> Self {
        let mut set = ProcessSet::new();
        for handle in iter {
            set.insert(handle);
        }
        set
    }
}

/// Aggregate resident memory over a process set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemorySample {
    pub bytes: u64,
}

impl MemorySample {
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / BYTES_PER_MB
    }
}

/// Result of one inventory pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub processes: ProcessSet,
    pub memory: MemorySample,
    pub profiles: BTreeSet<ProfileId>,
}

impl Discovery {
    /// Build a discovery from a set, deriving the memory sample.
    pub fn new(processes: ProcessSet, profiles: BTreeSet<ProfileId>) -> Self {
        let memory = processes.memory();
        Self {
            processes,
            memory,
            profiles,
        }
    }
}

/// Decides whether a process belongs to the monitored browser.
#[derive(Debug, Clone)]
pub struct Classifier {
    target: String,
    install_hints: Vec<String>,
    own_pid: u32,
}

impl Classifier {
    /// Blank hints are dropped; with no hints left, only typed children match
    /// when the command line is readable.
    pub fn new<S: AsRef<str>>(target: &str, install_hints: &[S], own_pid: u32) -> Self {
        Self {
            target: target.to_lowercase(),
            install_hints: install_hints
                .iter()
                .map(|hint| hint.as_ref().trim().to_lowercase())
                .filter(|hint| !hint.is_empty())
                .collect(),
            own_pid,
        }
    }

    /// Apply the membership rule.
    ///
    /// The name must contain the target and must not be a crash handler, and the
    /// pid must not be our own. When the command line is readable, the process
    /// must also be a typed child (`--type=...`) or the main process, whose first
    /// argument points into one of the install locations. An unreadable (empty)
    /// command line falls back to the name checks alone.
    pub fn matches(&self, pid: u32, name: &str, cmd: &[String]) -> bool {
        if pid == self.own_pid {
            return false;
        }
        let name = name.to_lowercase();
        if !name.contains(&self.target) || name.contains("crashhandler") {
            return false;
        }
        if cmd.is_empty() {
            return true;
        }
        if cmd.iter().any(|arg| arg.starts_with("--type=")) {
            return true;
        }
        let Some(first) = cmd.first().map(|arg| arg.to_lowercase()) else {
            return false;
        };
        self.install_hints.iter().any(|hint| first.contains(hint))
    }
}

/// Errors from a whole inventory pass.
#[derive(Debug)]
pub enum InventoryError {
    /// The process table came back empty; not even the monitor was visible.
    EmptyProcessTable,
}

impl std::fmt::Display for InventoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventoryError::EmptyProcessTable => {
                write!(f, "process table is empty; process inspection is not working")
            }
        }
    }
}

impl std::error::Error for InventoryError {}

/// Source of process discoveries.
pub trait Inventory {
    fn discover(&mut self) -> Result<Discovery, InventoryError>;
}

/// Inventory backed by the live OS process table.
pub struct SystemInventory {
    system: System,
    classifier: Classifier,
    user_data_dir: Option<PathBuf>,
}

impl SystemInventory {
    pub fn new(classifier: Classifier, user_data_dir: Option<PathBuf>) -> Self {
        Self {
            system: System::new(),
            classifier,
            user_data_dir,
        }
    }

    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing()
            .with_memory()
            .with_cmd(UpdateKind::Always)
    }

    fn profiles_of(&self, processes: &ProcessSet) -> BTreeSet<ProfileId> {
        let Some(root) = &self.user_data_dir else {
            return BTreeSet::new();
        };
        processes
            .iter()
            .filter_map(|p| profiles::open_files(p.pid))
            .flat_map(|files| profiles::profiles_from_paths(root, &files))
            .collect()
    }
}

impl Inventory for SystemInventory {
    fn discover(&mut self) -> Result<Discovery, InventoryError> {
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());

        if self.system.processes().is_empty() {
            return Err(InventoryError::EmptyProcessTable);
        }

        let processes: ProcessSet = self
            .system
            .processes()
            .values()
            .filter(|p| p.thread_kind().is_none())
            .filter(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
            .filter_map(|p| {
                let pid = p.pid().as_u32();
                let name = p.name().to_string_lossy().into_owned();
                let cmd: Vec<String> = p
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect();
                self.classifier
                    .matches(pid, &name, &cmd)
                    .then(|| ProcessHandle {
                        pid,
                        name,
                        cmd,
                        parent_pid: p.parent().map(Pid::as_u32),
                        memory_bytes: p.memory(),
                    })
            })
            .collect();

        let profiles = self.profiles_of(&processes);
        tracing::debug!(
            matched = processes.len(),
            profiles = profiles.len(),
            "inventory pass complete"
        );
        Ok(Discovery::new(processes, profiles))
    }
}

/// Whether `pid` still refers to a running process. Zombies count as gone.
pub fn process_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    system
        .process(pid)
        .is_some_and(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}
