use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
    time::Duration,
};

const DEBUG_ENV: &str = "INTERVIEW_ENGINE_DEBUG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    pub heartbeat_interval_secs: u64,
    /// Capacity of each observer's queue.
    pub subscriber_buffer: usize,
    /// Upper bound on a single write to an observer before it is dropped.
    pub delivery_timeout_secs: u64,
    /// How long a completed or ended room lingers before it is reaped.
    pub completed_idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            subscriber_buffer: 64,
            delivery_timeout_secs: 10,
            completed_idle_timeout_secs: 300,
            reaper_interval_secs: 60,
        }
    }
}

impl EngineSettings {
    /// Applies environment overrides. Debug mode heartbeats every second.
    pub fn with_env_overrides(mut self) -> Self {
        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if debug_mode {
            self.heartbeat_interval_secs = 1;
        }
        self
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1))
    }

    pub fn completed_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.completed_idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }
}

/// JSON-backed settings file.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<EngineSettings>,
}

impl SettingsStore {
    /// Loads from `path` when it exists, otherwise starts from defaults.
    /// A file that exists but cannot be parsed is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse settings in {}", path.display()))?
        } else {
            EngineSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data.with_env_overrides()),
        })
    }

    pub fn get(&self) -> EngineSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replaces and persists the settings. A running `InterviewEngine` keeps
    /// the values it was started with; they apply from the next start.
    pub fn update(&self, settings: EngineSettings) -> Result<()> {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = settings;
        self.persist(&guard)
    }

    fn persist(&self, data: &EngineSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("engine.json")).unwrap();
        let settings = store.get();
        assert_eq!(settings.subscriber_buffer, 64);
        assert_eq!(settings.completed_idle_timeout_secs, 300);
    }

    #[test]
    fn partial_file_fills_remaining_fields_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"subscriberBuffer": 8, "deliveryTimeoutSecs": 3}"#).unwrap();

        let settings = SettingsStore::load(&path).unwrap().get();
        assert_eq!(settings.subscriber_buffer, 8);
        assert_eq!(settings.delivery_timeout(), Duration::from_secs(3));
        assert_eq!(settings.reaper_interval_secs, 60);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, "{not json").unwrap();
        let err = SettingsStore::load(&path).err().unwrap();
        assert!(err.to_string().contains("Failed to parse settings"));
    }

    #[test]
    fn update_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let store = SettingsStore::load(&path).unwrap();
        let mut settings = store.get();
        settings.reaper_interval_secs = 5;
        store.update(settings).unwrap();

        let reloaded = SettingsStore::load(&path).unwrap().get();
        assert_eq!(reloaded.reaper_interval_secs, 5);
    }
}
