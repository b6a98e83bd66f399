/// Browser relaunch: resolve the executable, then start one detached browser
/// per profile (or a single plain launch when no profile is known).
use crate::profiles::ProfileId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Executable names searched on `PATH`, in order.
#[cfg(not(windows))]
const POSIX_EXECUTABLES: &[&str] = &["brave-browser", "brave-browser-stable", "brave"];

#[cfg(target_os = "macos")]
const MACOS_APP_BUNDLE: &str = "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser";

/// Install-location variables checked on Windows, in order.
const WINDOWS_INSTALL_VARS: &[&str] = &["LOCALAPPDATA", "PROGRAMFILES", "PROGRAMFILES(X86)"];
const WINDOWS_RELATIVE_EXE: &[&str] = &["BraveSoftware", "Brave-Browser", "Application", "brave.exe"];

/// Candidate executables under the standard Windows install roots.
#[cfg_attr(not(windows), allow(dead_code))]
fn windows_candidates<F>(lookup: F) -> Vec<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    WINDOWS_INSTALL_VARS
        .iter()
        .filter_map(|var| lookup(var))
        .filter(|root| !root.trim().is_empty())
        .map(|root| {
            WINDOWS_RELATIVE_EXE
                .iter()
                .fold(PathBuf::from(root), |path, part| path.join(part))
        })
        .collect()
}

/// Locate the browser executable when none is configured.
pub fn resolve_executable(configured: Option<PathBuf>) -> Option<PathBuf> {
    if configured.is_some() {
        return configured;
    }
    platform_search()
}

#[cfg(windows)]
fn platform_search() -> Option<PathBuf> {
    windows_candidates(|var| std::env::var(var).ok())
        .into_iter()
        .find(|candidate| candidate.is_file())
}

#[cfg(not(windows))]
fn platform_search() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        let bundle = PathBuf::from(MACOS_APP_BUNDLE);
        if bundle.is_file() {
            return Some(bundle);
        }
    }
    POSIX_EXECUTABLES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Error starting a browser process.
#[derive(Debug)]
pub enum LaunchError {
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LaunchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchError::Spawn { path, source } => {
                write!(f, "failed to launch {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for LaunchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LaunchError::Spawn { source, .. } => Some(source),
        }
    }
}

/// Starts processes without waiting for them.
pub trait Launcher {
    /// Spawn `program` with `args`; returns the new pid.
    fn launch(&self, program: &Path, args: &[String]) -> Result<u32, LaunchError>;
}

/// Launcher that spawns real, detached browser processes.
///
/// Each browser gets its own process group so a Ctrl-C aimed at the monitor
/// does not reach it. The child handle is dropped immediately and the tokio
/// runtime reaps it in the background.
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> Result<u32, LaunchError> {
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| LaunchError::Spawn {
            path: program.to_path_buf(),
            source: e,
        })?;
        Ok(child.id().unwrap_or(0))
    }
}

/// Result of launching one browser instance.
#[derive(Debug)]
pub struct ProfileLaunch {
    /// `None` for a launch without a profile argument.
    pub profile: Option<ProfileId>,
    pub result: Result<u32, LaunchError>,
}

/// Result of a relaunch attempt.
#[derive(Debug)]
pub enum RelaunchReport {
    /// No executable could be found; a human has to restart the browser.
    NoExecutable,
    Launched {
        executable: PathBuf,
        launches: Vec<ProfileLaunch>,
    },
}

impl RelaunchReport {
    /// Whether every attempted launch succeeded.
    pub fn all_succeeded(&self) -> bool {
        match self {
            RelaunchReport::NoExecutable => false,
            RelaunchReport::Launched { launches, .. } => {
                launches.iter().all(|l| l.result.is_ok())
            }
        }
    }

    pub fn attempted(&self) -> usize {
        match self {
            RelaunchReport::NoExecutable => 0,
            RelaunchReport::Launched { launches, .. } => launches.len(),
        }
    }

    pub fn succeeded(&self) -> usize {
        match self {
            RelaunchReport::NoExecutable => 0,
            RelaunchReport::Launched { launches, .. } => {
                launches.iter().filter(|l| l.result.is_ok()).count()
            }
        }
    }
}

/// Restart the browser, once per profile when profiles are known.
///
/// Never fails as a whole: missing executables and spawn failures are logged
/// and recorded in the report.
pub fn relaunch<L: Launcher>(
    launcher: &L,
    executable: Option<&Path>,
    profiles: &BTreeSet<ProfileId>,
) -> RelaunchReport {
    let Some(executable) = executable else {
        tracing::error!("no browser executable found; restart the browser manually");
        return RelaunchReport::NoExecutable;
    };

    let plan: Vec<Option<&ProfileId>> = if profiles.is_empty() {
        vec![None]
    } else {
        profiles.iter().map(Some).collect()
    };

    let launches = plan
        .into_iter()
        .map(|profile| {
            let args: Vec<String> = profile.map(ProfileId::launch_arg).into_iter().collect();
            let result = launcher.launch(executable, &args);
            match &result {
                Ok(pid) => tracing::info!(
                    pid,
                    profile = profile.map(ProfileId::as_str).unwrap_or("<none>"),
                    executable = %executable.display(),
                    "browser relaunched"
                ),
                Err(e) => tracing::error!(
                    profile = profile.map(ProfileId::as_str).unwrap_or("<none>"),
                    error = %e,
                    "browser relaunch failed"
                ),
            }
            ProfileLaunch {
                profile: profile.cloned(),
                result,
            }
        })
        .collect();

    RelaunchReport::Launched {
        executable: executable.to_path_buf(),
        launches,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Launcher that records launches. Launches whose arguments include
    /// `fail_arg` fail to spawn.
    pub(crate) struct RecordingLauncher {
        pub(crate) launches: RefCell<Vec<(PathBuf, Vec<String>)>>,
        pub(crate) fail_arg: Option<String>,
    }

    impl RecordingLauncher {
        pub(crate) fn new() -> Self {
            Self {
                launches: RefCell::new(Vec::new()),
                fail_arg: None,
            }
        }
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, program: &Path, args: &[String]) -> Result<u32, LaunchError> {
            self.launches
                .borrow_mut()
                .push((program.to_path_buf(), args.to_vec()));
            let fails = self
                .fail_arg
                .as_ref()
                .is_some_and(|bad| args.iter().any(|a| a == bad));
            if fails {
                return Err(LaunchError::Spawn {
                    path: program.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "simulated"),
                });
            }
            Ok(1000 + self.launches.borrow().len() as u32)
        }
    }

    fn profiles(names: &[&str]) -> BTreeSet<ProfileId> {
        names.iter().filter_map(|n| ProfileId::parse(n)).collect()
    }

    #[test]
    fn test_no_executable_reports_failure() {
        let launcher = RecordingLauncher::new();
        let report = relaunch(&launcher, None, &profiles(&["Default"]));
        assert!(matches!(report, RelaunchReport::NoExecutable));
        assert!(!report.all_succeeded());
        assert!(launcher.launches.borrow().is_empty());
    }

    #[test]
    fn test_no_profiles_launches_once_without_args() {
        let launcher = RecordingLauncher::new();
        let exe = PathBuf::from("/usr/bin/brave-browser");
        let report = relaunch(&launcher, Some(&exe), &BTreeSet::new());

        assert!(report.all_succeeded());
        assert_eq!(
            *launcher.launches.borrow(),
            vec![(exe.clone(), Vec::<String>::new())]
        );
    }

    #[test]
    fn test_one_launch_per_profile() {
        let launcher = RecordingLauncher::new();
        let exe = PathBuf::from("/usr/bin/brave-browser");
        let report = relaunch(&launcher, Some(&exe), &profiles(&["Profile 2", "Default"]));

        assert_eq!(report.succeeded(), 2);
        let args: Vec<Vec<String>> = launcher
            .launches
            .borrow()
            .iter()
            .map(|(_, a)| a.clone())
            .collect();
        assert_eq!(
            args,
            vec![
                vec!["--profile-directory=Default".to_string()],
                vec!["--profile-directory=Profile 2".to_string()],
            ]
        );
    }

    #[test]
    fn test_failed_profile_does_not_block_others() {
        let launcher = RecordingLauncher {
            fail_arg: Some("--profile-directory=Default".to_string()),
            ..RecordingLauncher::new()
        };
        let exe = PathBuf::from("/usr/bin/brave-browser");
        let report = relaunch(
            &launcher,
            Some(&exe),
            &profiles(&["Default", "Profile 1", "Profile 2"]),
        );

        assert_eq!(launcher.launches.borrow().len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert!(!report.all_succeeded());
        let RelaunchReport::Launched { launches, .. } = report else {
            panic!("expected launches");
        };
        assert!(launches[0].result.is_err());
        assert_eq!(launches[0].profile, ProfileId::parse("Default"));
    }

    #[test]
    fn test_configured_path_wins() {
        let configured = PathBuf::from("/opt/custom/brave");
        assert_eq!(
            resolve_executable(Some(configured.clone())),
            Some(configured)
        );
    }

    #[test]
    fn test_windows_candidates_order() {
        let lookup = |var: &str| match var {
            "LOCALAPPDATA" => Some("C:\\Users\\u\\AppData\\Local".to_string()),
            "PROGRAMFILES" => Some("C:\\Program Files".to_string()),
            "PROGRAMFILES(X86)" => Some(String::new()),
            _ => None,
        };
        let candidates = windows_candidates(lookup);
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].starts_with("C:\\Users\\u\\AppData\\Local"));
        assert!(candidates[1].starts_with("C:\\Program Files"));
        assert!(candidates[0].ends_with("brave.exe"));
    }

    #[tokio::test]
    async fn test_detached_launcher_spawn_failure() {
        let err = DetachedLauncher
            .launch(Path::new("/nonexistent/brave-xyz"), &[])
            .unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detached_launcher_returns_pid() {
        let pid = DetachedLauncher
            .launch(Path::new("true"), &[])
            .unwrap();
        assert!(pid > 0);
    }
}
