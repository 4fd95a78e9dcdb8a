//! Locating the SidecarLauncher executable

use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File name of the launcher executable
pub const LAUNCHER_NAME: &str = "SidecarLauncher";

/// Project directory the launcher is built into by the install script
const PROJECT_DIR: &str = "auto-continuity";

/// Fixed fallback used when no candidate exists
pub fn fallback_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(PROJECT_DIR)
        .join(LAUNCHER_NAME)
}

/// Candidate locations in priority order
///
/// An explicitly configured path comes first, then the app bundle's
/// `Resources` directory, the project checkout, `/usr/local/bin` and finally
/// the current working directory.
pub fn candidate_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }

    if let Some(resources) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("../Resources")))
    {
        paths.push(resources.join(LAUNCHER_NAME));
    }

    paths.push(fallback_path());
    paths.push(PathBuf::from("/usr/local/bin").join(LAUNCHER_NAME));

    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(LAUNCHER_NAME));
    }

    paths
}

/// First existing candidate, or `fallback` unverified
pub fn first_existing(candidates: &[PathBuf], fallback: PathBuf) -> PathBuf {
    candidates
        .iter()
        .find(|path| path.exists())
        .cloned()
        .unwrap_or(fallback)
}

/// Resolve the launcher path from the configured override and the usual locations
pub fn resolve_launcher_path(explicit: Option<&Path>) -> PathBuf {
    first_existing(&candidate_paths(explicit), fallback_path())
}

/// Log startup diagnostics for the resolved launcher
pub fn log_diagnostics(path: &Path) {
    info!("=== Sidecar System Diagnostics ===");
    info!("SidecarLauncher path: {}", path.display());
    let exists = path.exists();
    info!("SidecarLauncher exists: {}", exists);
    if !exists {
        error!("SidecarLauncher not found! Build it or set launcher.path in the config file");
    }
    info!(
        "Platform: {} {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    info!("=== End Diagnostics ===");
}
