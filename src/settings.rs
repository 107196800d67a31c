use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

use crate::models::{ExperimentConfig, ExperimentKind};

pub const DEFAULT_BRIDGE_URL: &str = "http://localhost:5000";
pub const SETTINGS_FILE_ENV: &str = "LABSTREAM_SETTINGS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserSettings {
    pub bridge_url: String,
    pub experiment: ExperimentKind,
    pub time_limit_secs: u32,
    pub sampling_rate_hz: u32,
    pub export_dir: PathBuf,
    pub save_to_profile: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        let config = ExperimentConfig::default();
        Self {
            bridge_url: DEFAULT_BRIDGE_URL.into(),
            experiment: ExperimentKind::default(),
            time_limit_secs: config.time_limit_secs,
            sampling_rate_hz: config.sampling_rate_hz,
            export_dir: PathBuf::from("."),
            save_to_profile: false,
            token: None,
        }
    }
}

impl UserSettings {
    pub fn experiment_config(&self) -> Result<ExperimentConfig> {
        ExperimentConfig::new(self.time_limit_secs, self.sampling_rate_hz)
            .context("invalid experiment settings")
    }

    /// Environment wins over the file. Overrides are not persisted.
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("LABSTREAM_BRIDGE_URL") {
            self.bridge_url = url;
        }
        if let Some(token) = lookup("LABSTREAM_TOKEN") {
            self.token = Some(token);
        }
        if let Some(experiment) = lookup("LABSTREAM_EXPERIMENT") {
            self.experiment = experiment
                .parse()
                .with_context(|| format!("LABSTREAM_EXPERIMENT={experiment}"))?;
        }
        Ok(())
    }
}

/// `LABSTREAM_DEBUG=1` (or `true`) turns on debug logging.
pub fn debug_mode() -> bool {
    std::env::var("LABSTREAM_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os(SETTINGS_FILE_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("labstream.json"))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::load(path, |key| std::env::var(key).ok())
    }

    fn load<F>(path: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Malformed settings in {}", path.display()))?
        } else {
            UserSettings::default()
        };
        data.apply_env(lookup)?;

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> UserSettings {
        self.data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn update_experiment_config(&self, config: ExperimentConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.time_limit_secs = config.time_limit_secs;
        guard.sampling_rate_hz = config.sampling_rate_hz;
        self.persist(&guard)
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        // The token only ever comes from the environment; never write it out.
        let mut on_disk = data.clone();
        on_disk.token = None;
        let serialized = serde_json::to_string_pretty(&on_disk)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
