use staffsplit_ports::settings::{PipelineSettings, SettingsPort, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct FsSettingsStore {
    settings_path: PathBuf,
}

impl FsSettingsStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            settings_path: base_dir.join("settings.json"),
        }
    }

    /// Use an explicit settings file instead of `<base_dir>/settings.json`.
    pub fn from_file(settings_path: PathBuf) -> Self {
        Self { settings_path }
    }

    pub fn default_base_dir() -> Result<PathBuf, StorageError> {
        let base = dirs_next::config_dir()
            .ok_or_else(|| StorageError::Io("config dir not found".to_string()))?;
        Ok(base.join("StaffSplit"))
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
        let data = fs::read(path).map_err(|e| StorageError::Io(e.to_string()))?;
        serde_json::from_slice(&data).map_err(|e| StorageError::Serde(e.to_string()))
    }

    fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let data =
            serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serde(e.to_string()))?;
        fs::write(path, data).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl Default for FsSettingsStore {
    fn default() -> Self {
        let base_dir = Self::default_base_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(base_dir)
    }
}

impl SettingsPort for FsSettingsStore {
    fn load_settings(&self) -> Result<PipelineSettings, StorageError> {
        if !self.settings_path.exists() {
            debug!(path = %self.settings_path.display(), "no settings file, using defaults");
            return Ok(PipelineSettings::default());
        }
        Self::read_json(&self.settings_path)
    }

    fn save_settings(&self, s: &PipelineSettings) -> Result<(), StorageError> {
        Self::write_json(&self.settings_path, s)
    }
}
