use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl Segment {
    pub fn new(index: usize, start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            index,
            start_time,
            end_time,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Half-open containment, `[start_time, end_time)`.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time
    }
}

/// Output of the alignment step as stored on a transcription record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub timeline: Vec<Segment>,
    #[serde(default)]
    pub transcript: String,
}

impl TranscriptResult {
    pub fn is_aligned(&self) -> bool {
        !self.transcript.is_empty() && !self.timeline.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub id: String,
    pub result: Option<TranscriptResult>,
}

impl Transcription {
    pub fn new(id: impl Into<String>, result: Option<TranscriptResult>) -> Self {
        Self {
            id: id.into(),
            result,
        }
    }

    /// The timeline, if alignment has finished.
    pub fn aligned_result(&self) -> Option<&TranscriptResult> {
        self.result.as_ref().filter(|result| result.is_aligned())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    #[default]
    Single,
    Loop,
    All,
}

impl PlayMode {
    /// Whether playback is confined to the active segment.
    pub fn stays_in_segment(self) -> bool {
        matches!(self, PlayMode::Single | PlayMode::Loop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackCursor {
    pub current_time: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            playback_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Playing(PlayMode),
    Editing,
}

impl SyncState {
    pub fn label(&self) -> &'static str {
        match self {
            SyncState::Idle => "Idle",
            SyncState::Playing(PlayMode::Single) => "Playing-Single",
            SyncState::Playing(PlayMode::Loop) => "Playing-Loop",
            SyncState::Playing(PlayMode::All) => "Playing-All",
            SyncState::Editing => "Editing",
        }
    }

    pub(crate) fn from_playback(is_playing: bool, mode: PlayMode) -> Self {
        if is_playing {
            SyncState::Playing(mode)
        } else {
            SyncState::Idle
        }
    }
}
