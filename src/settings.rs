use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::model::PlayMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub default_play_mode: PlayMode,
    pub playback_rate: f64,
    pub loop_restart_delay_ms: u64,
    pub region_refresh_debounce_ms: u64,
    pub toggle_debounce_ms: u64,
    /// Shortest span, in seconds, a segment may shrink to while a neighbor is edited.
    pub min_segment_span: f64,
    pub segment_region_color: String,
    pub custom_region_color: String,
}

impl SyncSettings {
    /// Rejects values the synchronizer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.playback_rate.is_finite() || self.playback_rate <= 0.0 {
            bail!("playback_rate must be positive, got {}", self.playback_rate);
        }
        if self.loop_restart_delay_ms == 0 {
            bail!("loop_restart_delay_ms must be non-zero");
        }
        if !self.min_segment_span.is_finite() || self.min_segment_span < 0.0 {
            bail!("min_segment_span must be >= 0, got {}", self.min_segment_span);
        }
        Ok(())
    }

    pub fn loop_restart_delay(&self) -> Duration {
        Duration::from_millis(self.loop_restart_delay_ms)
    }

    pub fn region_refresh_debounce(&self) -> Duration {
        Duration::from_millis(self.region_refresh_debounce_ms)
    }

    pub fn toggle_debounce(&self) -> Duration {
        Duration::from_millis(self.toggle_debounce_ms)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_play_mode: PlayMode::Single,
            playback_rate: 1.0,
            loop_restart_delay_ms: 500,
            region_refresh_debounce_ms: 100,
            toggle_debounce_ms: 100,
            min_segment_span: 0.01,
            segment_region_color: "#fb6f9211".to_string(),
            custom_region_color: "rgba(76, 201, 240, 0.2)".to_string(),
        }
    }
}
