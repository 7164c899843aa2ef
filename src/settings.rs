use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::serial::{framer::DEFAULT_MAX_LINE_BYTES, LinkConfig, DEFAULT_BAUD_RATE};

pub const SETTINGS_FILE_NAME: &str = "settings.json";

const DATA_DIR_ENV: &str = "WEIGHLOG_DATA_DIR";
const DEBUG_ENV: &str = "WEIGHLOG_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path; when unset the operator is asked to pick one.
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_poll_ms: u64,
    pub max_line_bytes: Option<usize>,
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_poll_ms: 100,
            max_line_bytes: Some(DEFAULT_MAX_LINE_BYTES),
            idle_timeout_secs: None,
        }
    }
}

impl SerialSettings {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            baud_rate: self.baud_rate,
            read_poll: Duration::from_millis(self.read_poll_ms.max(1)),
            max_line_bytes: self.max_line_bytes,
            idle_timeout: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
struct UserSettings {
    serial: SerialSettings,
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("ignoring unreadable settings in {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn serial(&self) -> SerialSettings {
        self.read().serial.clone()
    }

    pub fn update_serial(&self, settings: SerialSettings) -> Result<()> {
        let mut guard = self.write();
        guard.serial = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

/// `explicit`, else `$WEIGHLOG_DATA_DIR`, else `~/.weighlog`, else `./.weighlog`.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".weighlog")))
        .unwrap_or_else(|| PathBuf::from(".weighlog"))
}

pub fn debug_enabled() -> bool {
    std::env::var(DEBUG_ENV)
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
