//! User preferences
//!
//! A handful of boolean flags that outlive the process: whether automatic
//! activation is enabled, whether to disconnect Sidecar when the iPad is
//! unplugged, and whether the daemon is installed as a login agent.
//!
//! The orchestrator only reads preferences while handling an event, so a
//! file-backed store that re-reads on every access picks up changes made by
//! another process (e.g. `auto-sidecar toggle`) without any notification.

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Legacy marker file that disables auto-activation when present
const LEGACY_DISABLE_FLAG: &str = "Library/Preferences/.auto-sidecar-disabled";

/// Source of the persisted boolean preferences
pub trait PreferenceStore: Send + Sync {
    fn auto_activation_enabled(&self) -> bool;
    fn set_auto_activation_enabled(&self, enabled: bool) -> Result<()>;

    fn disconnect_on_removal(&self) -> bool;
    fn set_disconnect_on_removal(&self, enabled: bool) -> Result<()>;

    fn launch_at_login(&self) -> bool;
    fn set_launch_at_login(&self, enabled: bool) -> Result<()>;
}

/// Persisted preference values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default = "default_true")]
    pub auto_activation_enabled: bool,
    #[serde(default)]
    pub disconnect_on_removal: bool,
    #[serde(default)]
    pub launch_at_login: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            auto_activation_enabled: true,
            disconnect_on_removal: false,
            launch_at_login: false,
        }
    }
}

/// Preferences stored as TOML on disk
pub struct FilePreferences {
    path: PathBuf,
    legacy_flag: Option<PathBuf>,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FilePreferences {
    pub fn new(path: PathBuf, legacy_flag: Option<PathBuf>) -> Self {
        Self {
            path,
            legacy_flag,
            write_lock: Mutex::new(()),
        }
    }

    /// Preferences next to the config file, honoring the legacy disable flag
    pub fn open_default() -> Result<Self> {
        let path = crate::core::config::Config::config_dir()?.join("preferences.toml");
        let legacy_flag = dirs::home_dir().map(|home| home.join(LEGACY_DISABLE_FLAG));
        Ok(Self::new(path, legacy_flag))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current values; unreadable files fall back to defaults
    pub fn load(&self) -> Preferences {
        match self.try_load() {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("{:#}, using default preferences", e);
                Preferences::default()
            }
        }
    }

    fn try_load(&self) -> Result<Preferences> {
        if !self.path.exists() {
            return Ok(Preferences::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read preferences file: {:?}", self.path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse preferences file: {:?}", self.path))
    }

    fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create preferences directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(prefs).context("Failed to serialize preferences")?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write preferences file: {:?}", self.path))?;

        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Preferences)) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut prefs = self.try_load().unwrap_or_default();
        apply(&mut prefs);
        self.save(&prefs)
    }

    fn legacy_flag_set(&self) -> bool {
        self.legacy_flag.as_deref().is_some_and(Path::exists)
    }
}

impl PreferenceStore for FilePreferences {
    fn auto_activation_enabled(&self) -> bool {
        if self.legacy_flag_set() {
            return false;
        }
        self.load().auto_activation_enabled
    }

    fn set_auto_activation_enabled(&self, enabled: bool) -> Result<()> {
        self.update(|prefs| prefs.auto_activation_enabled = enabled)?;

        if let Some(flag) = self.legacy_flag.as_deref().filter(|flag| flag.exists()) {
            std::fs::remove_file(flag)
                .with_context(|| format!("Failed to remove legacy disable flag: {:?}", flag))?;
        }
        Ok(())
    }

    fn disconnect_on_removal(&self) -> bool {
        self.load().disconnect_on_removal
    }

    fn set_disconnect_on_removal(&self, enabled: bool) -> Result<()> {
        self.update(|prefs| prefs.disconnect_on_removal = enabled)
    }

    fn launch_at_login(&self) -> bool {
        self.load().launch_at_login
    }

    fn set_launch_at_login(&self, enabled: bool) -> Result<()> {
        self.update(|prefs| prefs.launch_at_login = enabled)
    }
}

/// Process-local preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    inner: RwLock<Preferences>,
}

impl MemoryPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            inner: RwLock::new(prefs),
        }
    }
}

impl PreferenceStore for MemoryPreferences {
    fn auto_activation_enabled(&self) -> bool {
        self.inner.read().auto_activation_enabled
    }

    fn set_auto_activation_enabled(&self, enabled: bool) -> Result<()> {
        self.inner.write().auto_activation_enabled = enabled;
        Ok(())
    }

    fn disconnect_on_removal(&self) -> bool {
        self.inner.read().disconnect_on_removal
    }

    fn set_disconnect_on_removal(&self, enabled: bool) -> Result<()> {
        self.inner.write().disconnect_on_removal = enabled;
        Ok(())
    }

    fn launch_at_login(&self) -> bool {
        self.inner.read().launch_at_login
    }

    fn set_launch_at_login(&self, enabled: bool) -> Result<()> {
        self.inner.write().launch_at_login = enabled;
        Ok(())
    }
}
