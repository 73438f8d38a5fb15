use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dom::OutputMode;

/// File name of the preference document inside the store directory.
pub const PREFS_FILE: &str = "preferences.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Preferences {
    /// Kept as a raw string so a hand-edited value degrades to the default
    /// instead of making the whole file unreadable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    selector_output_mode: Option<String>,
}

fn prefs_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".locator-synth")
}

/// Persisted output-mode preference.
#[derive(Debug, Clone)]
pub struct ModeStore {
    base: PathBuf,
}

impl Default for ModeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeStore {
    pub fn new() -> Self {
        Self { base: prefs_dir() }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn path(&self) -> PathBuf {
        self.base.join(PREFS_FILE)
    }

    fn read(&self) -> Option<Preferences> {
        let json = fs::read_to_string(self.path()).ok()?;
        match serde_json::from_str(&json) {
            Ok(prefs) => Some(prefs),
            Err(e) => {
                debug!(path = %self.path().display(), error = %e, "ignoring unreadable preferences");
                None
            }
        }
    }

    /// Stored mode; XPath when nothing (valid) is stored.
    pub fn load(&self) -> OutputMode {
        self.read()
            .and_then(|p| p.selector_output_mode)
            .map(|raw| OutputMode::normalize(&raw))
            .unwrap_or_default()
    }

    pub fn store(&self, mode: OutputMode) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.base)?;
        let mut prefs = self.read().unwrap_or_default();
        prefs.selector_output_mode = Some(mode.as_str().to_string());
        let path = self.path();
        fs::write(&path, serde_json::to_string_pretty(&prefs)?)?;
        debug!(path = %path.display(), mode = %mode, "stored output mode");
        Ok(path)
    }
}
