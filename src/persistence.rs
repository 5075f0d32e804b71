use std::{collections::HashMap, fs, path::PathBuf};

use anyhow::{Context, Result};

use crate::model::{TranscriptResult, Transcription};

/// Write path for committed transcript edits. The stored result is always
/// replaced wholesale.
pub trait TranscriptStore: Send {
    fn find(&self, transcription_id: &str) -> Result<Option<Transcription>>;
    fn update_result(&mut self, transcription_id: &str, result: &TranscriptResult) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTranscriptStore {
    records: HashMap<String, Transcription>,
}

impl MemoryTranscriptStore {
    pub fn insert(&mut self, transcription: Transcription) {
        self.records.insert(transcription.id.clone(), transcription);
    }
}

impl TranscriptStore for MemoryTranscriptStore {
    fn find(&self, transcription_id: &str) -> Result<Option<Transcription>> {
        Ok(self.records.get(transcription_id).cloned())
    }

    fn update_result(&mut self, transcription_id: &str, result: &TranscriptResult) -> Result<()> {
        let Some(record) = self.records.get_mut(transcription_id) else {
            anyhow::bail!("transcription {transcription_id} not found")
        };
        record.result = Some(result.clone());
        Ok(())
    }
}

/// One `<id>.json` file per transcription.
pub struct JsonTranscriptStore {
    dir: PathBuf,
}

impl JsonTranscriptStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, transcription_id: &str) -> Result<PathBuf> {
        if transcription_id.is_empty()
            || transcription_id == "."
            || transcription_id == ".."
            || transcription_id.contains(['/', '\\'])
        {
            anyhow::bail!("invalid transcription id {transcription_id:?}")
        }
        Ok(self.dir.join(format!("{transcription_id}.json")))
    }

    pub fn save(&self, transcription: &Transcription) -> Result<()> {
        let path = self.path_for(&transcription.id)?;
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(transcription)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl TranscriptStore for JsonTranscriptStore {
    fn find(&self, transcription_id: &str) -> Result<Option<Transcription>> {
        let path = self.path_for(transcription_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading transcription {}", path.display()))?;
        let transcription =
            serde_json::from_str(&raw).context("failed parsing transcription json")?;
        Ok(Some(transcription))
    }

    fn update_result(&mut self, transcription_id: &str, result: &TranscriptResult) -> Result<()> {
        let Some(mut transcription) = self.find(transcription_id)? else {
            anyhow::bail!("transcription {transcription_id} not found")
        };
        transcription.result = Some(result.clone());
        self.save(&transcription)
    }
}
