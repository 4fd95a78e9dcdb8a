//! Auto-Sidecar - Entry Point
//!
//! Runs the hotplug daemon by default. The subcommands drive the launcher
//! once, edit preferences, or manage the launchd agent.

use anyhow::{bail, Context, Result};
use auto_sidecar::{
    core::config::Config,
    core::preferences::{FilePreferences, PreferenceStore},
    launcher::{log_diagnostics, resolve_launcher_path, ConnectOutcome, LauncherSettings, SidecarLauncher},
    logging,
    orchestrator::{ActivationPolicy, Orchestrator},
    power::PowerMonitor,
    usb::{DeviceClass, HotplugWatcher},
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// launchd label and plist name
const LAUNCHD_LABEL: &str = "com.autosidecar.daemon";

/// How often the power monitor samples the clocks
const POWER_TICK: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "auto-sidecar",
    version,
    about = "Start Sidecar automatically when an iPad is plugged in"
)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default)
    Run,
    /// Find the iPad in the Sidecar device list
    Devices,
    /// Start Sidecar, on the named device or the detected iPad
    Connect { name: Option<String> },
    /// Stop Sidecar, on the named device or the detected iPad
    Disconnect { name: Option<String> },
    /// Show whether Sidecar is connected
    Status,
    /// Turn automatic activation on or off
    Toggle,
    /// Disconnect Sidecar when the iPad is unplugged
    DisconnectOnRemoval {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Install the launchd agent so the daemon starts at login
    Install,
    /// Remove the launchd agent
    Uninstall,
    /// Open the log file
    Logs,
    /// Print the effective configuration
    Config {
        /// Print the config file location instead
        #[arg(long)]
        path: bool,
        /// Write the documented default config file if none exists
        #[arg(long, conflicts_with = "path")]
        init: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Run);

    let _log_guard = logging::init(cli.verbose, matches!(command, Commands::Run))?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match command {
        Commands::Run => run_daemon(config).await,
        Commands::Devices => {
            let launcher = build_launcher(&config);
            let device = launcher
                .list_devices(launcher.settings().list_retries)
                .await?;
            println!("{}", device);
            Ok(())
        }
        Commands::Connect { name } => {
            let launcher = build_launcher(&config);
            let outcome = match name {
                Some(name) => launcher.connect(&name).await?,
                None => launcher.activate().await?,
            };
            match outcome {
                ConnectOutcome::Connected => println!("Sidecar connected"),
                ConnectOutcome::AlreadyActive => println!("Sidecar was already connected"),
            }
            Ok(())
        }
        Commands::Disconnect { name } => {
            let launcher = build_launcher(&config);
            match name {
                Some(name) => launcher.disconnect(&name).await?,
                None => launcher.deactivate().await?,
            }
            println!("Sidecar disconnected");
            Ok(())
        }
        Commands::Status => {
            let launcher = build_launcher(&config);
            if launcher.status().await {
                println!("Sidecar is connected");
            } else {
                println!("Sidecar is not connected");
            }
            Ok(())
        }
        Commands::Toggle => {
            let prefs = FilePreferences::open_default()?;
            let enabled = !prefs.auto_activation_enabled();
            prefs.set_auto_activation_enabled(enabled)?;
            println!(
                "Auto-activation {}",
                if enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
        Commands::DisconnectOnRemoval { state } => {
            let prefs = FilePreferences::open_default()?;
            prefs.set_disconnect_on_removal(state == Switch::On)?;
            println!(
                "Disconnect on removal {}",
                if state == Switch::On { "on" } else { "off" }
            );
            Ok(())
        }
        Commands::Install => install_launchd(&FilePreferences::open_default()?, cli.config.as_deref()),
        Commands::Uninstall => uninstall_launchd(&FilePreferences::open_default()?),
        Commands::Logs => {
            let path = logging::log_file_path().context("Could not determine log file location")?;
            if !path.exists() {
                bail!("No log file yet at {}", path.display());
            }
            open::that(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            Ok(())
        }
        Commands::Config { path, init } => {
            let config_path = match &cli.config {
                Some(path) => path.clone(),
                None => Config::config_path()?,
            };
            if path {
                println!("{}", config_path.display());
            } else if init {
                write_default_config(&config_path)?;
                println!("Wrote {}", config_path.display());
            } else {
                print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            }
            Ok(())
        }
    }
}

fn build_launcher(config: &Config) -> SidecarLauncher {
    let path = resolve_launcher_path(config.launcher.path.as_deref());
    SidecarLauncher::new(path, LauncherSettings::from(&config.launcher))
}

async fn run_daemon(config: Config) -> Result<()> {
    info!("Auto-Sidecar v{} starting", env!("CARGO_PKG_VERSION"));

    let launcher = Arc::new(build_launcher(&config));
    log_diagnostics(launcher.path());

    let prefs = FilePreferences::open_default()?;
    info!("Preferences: {}", prefs.path().display());
    let prefs: Arc<dyn PreferenceStore> = Arc::new(prefs);

    let (hotplug_tx, hotplug_rx) = mpsc::unbounded_channel();
    let (power_tx, power_rx) = mpsc::unbounded_channel();

    let (handle, task) = Orchestrator::spawn(
        launcher,
        prefs,
        DeviceClass::from_config(&config.device),
        ActivationPolicy::from(&config),
        hotplug_rx,
        power_rx,
    );

    let mut watcher = HotplugWatcher::start(
        config.device.vendor_id,
        Duration::from_millis(config.monitor.poll_interval_ms),
        hotplug_tx,
    )
    .context("Failed to start USB hotplug watcher")?;

    let power = PowerMonitor::spawn(
        POWER_TICK,
        Duration::from_secs(config.monitor.resume_gap_secs),
        power_tx,
    );

    let mut updates = handle.subscribe();
    let status_log = tokio::spawn(async move {
        let mut last = String::new();
        while updates.changed().await.is_ok() {
            let status = updates.borrow_and_update().status_text();
            if status != last {
                info!("{}", status);
                last = status;
            }
        }
    });

    info!("Auto-Sidecar running, waiting for iPad connections");
    shutdown_signal().await;
    info!("Shutting down");

    watcher.stop();
    power.stop();
    handle.shutdown();
    if let Err(e) = task.await {
        warn!("Orchestrator task ended abnormally: {}", e);
    }
    status_log.abort();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn write_default_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file already exists: {}", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    std::fs::write(path, Config::default_config_str())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

fn launch_agent_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home
        .join("Library")
        .join("LaunchAgents")
        .join(format!("{}.plist", LAUNCHD_LABEL)))
}

/// launchd agent definition that runs the daemon at login and restarts it on exit
fn launchd_plist(exe: &Path, config: Option<&Path>) -> String {
    let mut args = vec![exe.display().to_string()];
    if let Some(config) = config {
        args.push("--config".to_string());
        args.push(config.display().to_string());
    }
    args.push("run".to_string());
    let args: String = args
        .iter()
        .map(|arg| format!("        <string>{}</string>\n", xml_escape(arg)))
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LAUNCHD_LABEL}</string>
    <key>ProgramArguments</key>
    <array>
{args}    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
    <key>ProcessType</key>
    <string>Interactive</string>
</dict>
</plist>
"#
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn install_launchd(prefs: &dyn PreferenceStore, config: Option<&Path>) -> Result<()> {
    if !cfg!(target_os = "macos") {
        bail!("launchd is only available on macOS");
    }

    let plist_path = launch_agent_path()?;
    let exe = std::env::current_exe().context("Failed to get current exe path")?;
    let config = config
        .map(std::fs::canonicalize)
        .transpose()
        .context("Failed to resolve config path")?;

    if let Some(dir) = plist_path.parent() {
        std::fs::create_dir_all(dir).context("Failed to create LaunchAgents dir")?;
    }
    std::fs::write(&plist_path, launchd_plist(&exe, config.as_deref()))
        .with_context(|| format!("Failed to write {}", plist_path.display()))?;

    let status = std::process::Command::new("launchctl")
        .arg("load")
        .arg(&plist_path)
        .status()
        .context("Failed to run launchctl")?;

    if status.success() {
        println!("Installed and loaded: {}", plist_path.display());
    } else {
        eprintln!("launchctl load failed (exit {})", status.code().unwrap_or(-1));
    }

    prefs.set_launch_at_login(true)
}

fn uninstall_launchd(prefs: &dyn PreferenceStore) -> Result<()> {
    if !cfg!(target_os = "macos") {
        bail!("launchd is only available on macOS");
    }

    let plist_path = launch_agent_path()?;
    if plist_path.exists() {
        let _ = std::process::Command::new("launchctl")
            .arg("unload")
            .arg(&plist_path)
            .status();
        std::fs::remove_file(&plist_path)
            .with_context(|| format!("Failed to remove {}", plist_path.display()))?;
        println!("Uninstalled: {}", plist_path.display());
    } else {
        println!("Plist not found: {}", plist_path.display());
    }

    prefs.set_launch_at_login(false)
}
