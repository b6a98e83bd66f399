mod config;
mod escalator;
mod inventory;
mod monitor;
mod platform;
mod profiles;
mod relaunch;
mod signals;
mod status;

use clap::Parser;
use config::{LogLevel, MonitorConfig};
use inventory::{Classifier, SystemInventory};
use monitor::Monitor;
use platform::Capabilities;
use relaunch::DetachedLauncher;
use status::StatusFile;
use std::path::PathBuf;

/// Watches the Brave browser's total memory use and restarts it, profiles
/// and all, when it grows past a limit.
#[derive(Parser, Debug)]
#[command(name = "brave-monitor", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "brave-monitor.toml")]
    config: PathBuf,

    /// Memory limit in MB, 0 disables enforcement (overrides config)
    #[arg(long, value_name = "MB")]
    limit: Option<u64>,

    /// Process name substring to watch (overrides config)
    #[arg(long)]
    process_name: Option<String>,

    /// Seconds between checks (overrides config)
    #[arg(long, value_name = "SECONDS")]
    interval: Option<u64>,

    /// Browser executable used for relaunching (overrides config)
    #[arg(long, value_name = "PATH")]
    browser_path: Option<PathBuf>,

    /// Run a single check and exit
    #[arg(long)]
    once: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Print the status file of a running monitor and exit
    #[arg(long)]
    status: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings.
    fn apply_overrides(&self, config: &mut MonitorConfig) {
        if let Some(limit) = self.limit {
            config.memory_limit_mb = limit;
        }
        if let Some(name) = &self.process_name {
            config.process_name = name.clone();
        }
        if let Some(interval) = self.interval {
            config.check_interval_s = interval;
        }
        if let Some(path) = &self.browser_path {
            config.browser_path = path.to_string_lossy().into_owned();
        }
        if self.verbose {
            config.log_level = LogLevel::Debug;
        } else if self.quiet {
            config.log_level = LogLevel::Error;
        }
    }

    /// Whether a command-line flag pins the log level, ignoring `RUST_LOG`.
    fn forces_log_level(&self) -> bool {
        self.verbose || self.quiet
    }
}

fn init_logging(level: LogLevel, forced: bool) {
    let filter = if forced {
        tracing_subscriber::EnvFilter::new(level.as_directive())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.as_directive()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Layer the config file (or defaults), `BRAVE_MONITOR_*` variables from
/// `env`, then the command line. Also reports whether the file existed.
fn load_config<F>(cli: &Cli, env: F) -> Result<(MonitorConfig, bool), config::ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let loaded = MonitorConfig::load(&cli.config)?;
    let from_file = loaded.is_some();
    let mut config = loaded.unwrap_or_default();
    config.apply_env_from(env);
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok((config, from_file))
}

fn print_dry_run(cli: &Cli, config: &MonitorConfig, caps: &Capabilities) {
    let browser = relaunch::resolve_executable(config.browser_path());
    let user_data = profiles::user_data_dir(config.user_data_dir());
    println!("brave-monitor v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file: {}", cli.config.display());
    println!("  memory_limit_mb:     {}", config.memory_limit_mb);
    println!("  process_name:        {}", config.process_name);
    println!("  check_interval_s:    {}", config.check_interval_s);
    println!("  restart_wait_s:      {}", config.restart_wait_s);
    println!("  graceful_wait_s:     {}", config.graceful_wait_s);
    println!("  log_level:           {}", config.log_level);
    println!("  install_path_hint:   {}", config.install_path_hint.join(", "));
    println!(
        "  status_file:         {}",
        config
            .status_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(disabled)".to_string())
    );
    println!("Capabilities:");
    println!("  process inspection:     {}", caps.process_inspection);
    println!("  cooperative close:      {}", caps.cooperative_close);
    println!("  open-file introspection: {}", caps.open_file_introspection);
    println!(
        "Browser executable: {}",
        browser
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not found)".to_string())
    );
    println!(
        "User data directory: {}",
        user_data
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not found)".to_string())
    );
}

fn print_status(config: &MonitorConfig) -> Result<(), status::StatusError> {
    let Some(path) = config.status_file() else {
        println!("No status file configured (set status_file in the config).");
        return Ok(());
    };
    match StatusFile::new(path.clone()).read()? {
        Some(contents) => println!("{contents}"),
        None => println!("No monitor running ({} not found).", path.display()),
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let (config, from_file) = match load_config(&cli, |key| std::env::var(key).ok()) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    init_logging(config.log_level, cli.forces_log_level());
    tracing::debug!(?cli, "parsed CLI arguments");
    if !from_file {
        tracing::debug!(path = %cli.config.display(), "config file not found, using defaults");
    }

    if cli.status {
        if let Err(e) = print_status(&config) {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let caps = Capabilities::detect();

    if cli.dry_run {
        print_dry_run(&cli, &config, &caps);
        return;
    }

    if !caps.process_inspection {
        tracing::error!(
            severity = "critical",
            "process inspection is not supported on this platform"
        );
        std::process::exit(1);
    }

    let user_data_dir = if caps.open_file_introspection {
        profiles::user_data_dir(config.user_data_dir())
    } else {
        None
    };
    if user_data_dir.is_none() {
        tracing::info!("profile detection unavailable, relaunches will use the default profile");
    }

    // Registered before the first cycle so an early SIGTERM is not fatal.
    let shutdown = match signals::ShutdownSignal::install() {
        Ok(shutdown) => shutdown,
        Err(e) => {
            tracing::error!(severity = "critical", error = %e, "failed to install signal handlers");
            std::process::exit(1);
        }
    };

    let classifier = Classifier::new(
        &config.process_name,
        &config.install_path_hint,
        std::process::id(),
    );
    let inventory = SystemInventory::new(classifier, user_data_dir);
    let escalator = platform::native_escalator(caps);
    let mut monitor = Monitor::new(config, inventory, escalator, DetachedLauncher);

    if cli.once {
        match monitor.run_cycle().await {
            Ok(outcome) => println!("{}", outcome.describe()),
            Err(e) => {
                tracing::error!(severity = "critical", error = %e, "monitoring cycle failed");
                std::process::exit(1);
            }
        }
        return;
    }

    monitor.run(shutdown.recv()).await;
    tracing::info!("brave-monitor stopped");
}
