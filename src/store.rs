use std::{fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::settings::SyncSettings;

pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<SyncSettings> {
        if !self.path.exists() {
            return Ok(SyncSettings::default());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed reading settings file {}", self.path.display()))?;
        let settings: SyncSettings =
            serde_json::from_str(&raw).context("failed parsing settings json")?;
        settings
            .validate()
            .with_context(|| format!("invalid settings in {}", self.path.display()))?;
        Ok(settings)
    }

    pub fn save(&self, settings: &SyncSettings) -> Result<()> {
        settings.validate().context("refusing to save invalid settings")?;
        let Some(parent) = self.path.parent() else {
            anyhow::bail!("settings path has no parent")
        };
        fs::create_dir_all(parent)?;
        let content = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}
