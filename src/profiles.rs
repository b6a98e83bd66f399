/// Browser profile inference from the files a process holds open.
///
/// Profile directories live directly below the user-data directory and are
/// named `Default` or `Profile <n>`. Anything else under that directory
/// (`System Profile`, `Crashpad`, `Guest Profile`, ...) is ignored.
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static PROFILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(Default|Profile [0-9]+)$").unwrap());

/// Name of a browser profile directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProfileId(String);

impl ProfileId {
    /// Accept exactly `Default` and `Profile <nonnegative integer>`.
    pub fn parse(name: &str) -> Option<ProfileId> {
        PROFILE_NAME
            .is_match(name)
            .then(|| ProfileId(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Command-line argument that selects this profile on launch.
    pub fn launch_arg(&self) -> String {
        format!("--profile-directory={}", self.0)
    }
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract the profile a path belongs to, if it lies under `user_data_dir`.
pub fn profile_from_path(user_data_dir: &Path, path: &Path) -> Option<ProfileId> {
    let relative = path.strip_prefix(user_data_dir).ok()?;
    match relative.components().next()? {
        Component::Normal(segment) => ProfileId::parse(segment.to_str()?),
        _ => None,
    }
}

/// Union of the profiles referenced by a set of open file paths.
pub fn profiles_from_paths<'a, I>(user_data_dir: &Path, paths: I) -> BTreeSet<ProfileId>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    paths
        .into_iter()
        .filter_map(|p| profile_from_path(user_data_dir, p))
        .collect()
}

/// Locate the browser's per-user data directory.
///
/// An explicit override wins. Returns `None` when the directory does not exist,
/// which callers treat as "no profile information".
pub fn user_data_dir(override_dir: Option<PathBuf>) -> Option<PathBuf> {
    let dir = override_dir.or_else(default_user_data_dir)?;
    dir.is_dir().then_some(dir)
}

#[cfg(windows)]
fn default_user_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("BraveSoftware").join("Brave-Browser").join("User Data"))
}

#[cfg(target_os = "macos")]
fn default_user_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("BraveSoftware").join("Brave-Browser"))
}

#[cfg(not(any(windows, target_os = "macos")))]
fn default_user_data_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("BraveSoftware").join("Brave-Browser"))
}

/// Paths of the files `pid` currently holds open.
///
/// Reads the `/proc/<pid>/fd` links. Descriptors that are not files
/// (sockets, pipes) or that vanish mid-read are skipped. `None` when the
/// process cannot be inspected.
#[cfg(target_os = "linux")]
pub fn open_files(pid: u32) -> Option<Vec<PathBuf>> {
    let entries = std::fs::read_dir(format!("/proc/{pid}/fd")).ok()?;
    let paths = entries
        .filter_map(Result::ok)
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .filter(|target| target.is_absolute())
        .collect();
    Some(paths)
}

/// Open-file introspection is not available on this platform.
#[cfg(not(target_os = "linux"))]
pub fn open_files(_pid: u32) -> Option<Vec<PathBuf>> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_default() {
        assert_eq!(ProfileId::parse("Default").unwrap().as_str(), "Default");
    }

    #[test]
    fn test_parse_accepts_numbered_profiles() {
        assert!(ProfileId::parse("Profile 0").is_some());
        assert!(ProfileId::parse("Profile 1").is_some());
        assert!(ProfileId::parse("Profile 42").is_some());
    }

    #[test]
    fn test_parse_rejects_other_names() {
        for name in [
            "Profile abc",
            "profile 1",
            "ProfileX",
            "Profile",
            "Profile ",
            "Profile -1",
            "Profile 1 ",
            "default",
            "System Profile",
            "Guest Profile",
            "Crashpad",
            "",
        ] {
            assert!(ProfileId::parse(name).is_none(), "accepted {name:?}");
        }
    }

    #[test]
    fn test_launch_arg() {
        let profile = ProfileId::parse("Profile 3").unwrap();
        assert_eq!(profile.launch_arg(), "--profile-directory=Profile 3");
    }

    #[test]
    fn test_profile_from_path_under_user_data() {
        let root = Path::new("/home/u/.config/BraveSoftware/Brave-Browser");
        let path = root.join("Profile 2").join("History");
        assert_eq!(
            profile_from_path(root, &path),
            ProfileId::parse("Profile 2")
        );
    }

    #[test]
    fn test_profile_from_path_outside_user_data() {
        let root = Path::new("/home/u/.config/BraveSoftware/Brave-Browser");
        assert!(profile_from_path(root, Path::new("/tmp/Default/History")).is_none());
    }

    #[test]
    fn test_profile_from_path_ignores_non_profile_dirs() {
        let root = Path::new("/data");
        assert!(profile_from_path(root, Path::new("/data/Crashpad/settings.dat")).is_none());
        assert!(profile_from_path(root, Path::new("/data/Local State")).is_none());
    }

    #[test]
    fn test_profile_from_path_root_itself() {
        let root = Path::new("/data");
        assert!(profile_from_path(root, root).is_none());
    }

    #[test]
    fn test_profiles_from_paths_deduplicates() {
        let root = Path::new("/data");
        let paths: Vec<PathBuf> = vec![
            "/data/Default/Cookies".into(),
            "/data/Default/History".into(),
            "/data/Profile 1/Cookies".into(),
            "/data/Profile abc/Cookies".into(),
            "/usr/lib/libc.so".into(),
        ];
        let profiles = profiles_from_paths(root, &paths);
        let names: Vec<&str> = profiles.iter().map(ProfileId::as_str).collect();
        assert_eq!(names, vec!["Default", "Profile 1"]);
    }

    #[test]
    fn test_user_data_dir_override_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            user_data_dir(Some(dir.path().to_path_buf())),
            Some(dir.path().to_path_buf())
        );
        assert!(user_data_dir(Some(dir.path().join("missing"))).is_none());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_files_sees_own_handles() {
        let dir = tempfile::tempdir().unwrap();
        let profile_dir = dir.path().join("Profile 7");
        std::fs::create_dir(&profile_dir).unwrap();
        let held = profile_dir.join("Preferences");
        let _file = std::fs::File::create(&held).unwrap();

        let files = open_files(std::process::id()).unwrap();
        let canonical = held.canonicalize().unwrap();
        assert!(files.iter().any(|p| p == &canonical));

        let root = dir.path().canonicalize().unwrap();
        let profiles = profiles_from_paths(&root, &files);
        assert!(profiles.contains(&ProfileId::parse("Profile 7").unwrap()));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_files_unknown_pid() {
        assert!(open_files(u32::MAX - 1).is_none());
    }
}
