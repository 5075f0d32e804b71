use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::region::{Region, RegionId, RegionOptions};

/// Audio/video playback engine backing the waveform.
pub trait MediaEngine: Send {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek_to(&mut self, seconds: f64) -> Result<()>;
    fn set_playback_rate(&mut self, rate: f64) -> Result<()>;
    fn set_scroll_time(&mut self, seconds: f64) -> Result<()>;
    /// Zooms the waveform so `[start, end]` fills the view.
    fn fit_zoom_to(&mut self, start: f64, end: f64) -> Result<()>;
    fn is_playing(&self) -> bool;
}

/// Region plugin drawing editable spans over the waveform.
pub trait RegionOverlay: Send {
    fn add_region(&mut self, region: Region, options: RegionOptions) -> Result<()>;
    fn remove_region(&mut self, id: RegionId) -> Result<()>;
    fn regions(&self) -> Vec<Region>;
    fn set_region_bounds(&mut self, id: RegionId, start: f64, end: f64) -> Result<()>;
    fn enable_drag_selection(&mut self, id: RegionId, options: RegionOptions) -> Result<()>;
    fn disable_drag_selection(&mut self) -> Result<()>;
}

fn lock<T>(inner: &Mutex<T>) -> MutexGuard<'_, T> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCall {
    Play,
    Pause,
    SeekTo(f64),
    SetPlaybackRate(f64),
    SetScrollTime(f64),
    FitZoom(f64, f64),
}

#[derive(Debug, Default)]
struct EngineLog {
    calls: Vec<EngineCall>,
    playing: bool,
}

/// Headless engine that records every call. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingMediaEngine {
    inner: Arc<Mutex<EngineLog>>,
}

impl RecordingMediaEngine {
    pub fn calls(&self) -> Vec<EngineCall> {
        lock(&self.inner).calls.clone()
    }

    pub fn clear(&self) {
        lock(&self.inner).calls.clear();
    }

    fn record(&self, call: EngineCall) {
        let mut log = lock(&self.inner);
        match call {
            EngineCall::Play => log.playing = true,
            EngineCall::Pause => log.playing = false,
            _ => {}
        }
        log.calls.push(call);
    }
}

impl MediaEngine for RecordingMediaEngine {
    fn play(&mut self) -> Result<()> {
        self.record(EngineCall::Play);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.record(EngineCall::Pause);
        Ok(())
    }

    fn seek_to(&mut self, seconds: f64) -> Result<()> {
        self.record(EngineCall::SeekTo(seconds));
        Ok(())
    }

    fn set_playback_rate(&mut self, rate: f64) -> Result<()> {
        self.record(EngineCall::SetPlaybackRate(rate));
        Ok(())
    }

    fn set_scroll_time(&mut self, seconds: f64) -> Result<()> {
        self.record(EngineCall::SetScrollTime(seconds));
        Ok(())
    }

    fn fit_zoom_to(&mut self, start: f64, end: f64) -> Result<()> {
        self.record(EngineCall::FitZoom(start, end));
        Ok(())
    }

    fn is_playing(&self) -> bool {
        lock(&self.inner).playing
    }
}

#[derive(Debug, Default)]
struct OverlayState {
    regions: Vec<(Region, RegionOptions)>,
    drag_selection: Option<(RegionId, RegionOptions)>,
}

/// In-memory region plugin. Clones share the same regions, which lets a
/// host (or a test) simulate user drags on regions the synchronizer owns.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegionOverlay {
    inner: Arc<Mutex<OverlayState>>,
}

impl MemoryRegionOverlay {
    pub fn options(&self, id: RegionId) -> Option<RegionOptions> {
        lock(&self.inner)
            .regions
            .iter()
            .find(|(region, _)| region.id == id)
            .map(|(_, options)| options.clone())
    }

    pub fn region(&self, id: RegionId) -> Option<Region> {
        lock(&self.inner)
            .regions
            .iter()
            .find(|(region, _)| region.id == id)
            .map(|(region, _)| *region)
    }

    pub fn drag_selection(&self) -> Option<RegionId> {
        lock(&self.inner).drag_selection.as_ref().map(|(id, _)| *id)
    }

    /// Finishes a drag-selection, creating the pending custom region.
    pub fn complete_drag(&self, start: f64, end: f64) -> Option<Region> {
        let mut state = lock(&self.inner);
        let (id, options) = state.drag_selection.clone()?;
        let region = Region::new(id, start, end);
        state.regions.retain(|(existing, _)| existing.id != id);
        state.regions.push((region, options));
        Some(region)
    }

    /// Resizes a region the way a user dragging its edges would.
    pub fn drag_edges(&self, id: RegionId, start: f64, end: f64) -> Option<Region> {
        let mut state = lock(&self.inner);
        let (region, _) = state.regions.iter_mut().find(|(region, _)| region.id == id)?;
        region.start = start;
        region.end = end;
        Some(*region)
    }
}

impl RegionOverlay for MemoryRegionOverlay {
    fn add_region(&mut self, region: Region, options: RegionOptions) -> Result<()> {
        let mut state = lock(&self.inner);
        state.regions.retain(|(existing, _)| existing.id != region.id);
        state.regions.push((region, options));
        Ok(())
    }

    fn remove_region(&mut self, id: RegionId) -> Result<()> {
        lock(&self.inner).regions.retain(|(region, _)| region.id != id);
        Ok(())
    }

    fn regions(&self) -> Vec<Region> {
        lock(&self.inner).regions.iter().map(|(region, _)| *region).collect()
    }

    fn set_region_bounds(&mut self, id: RegionId, start: f64, end: f64) -> Result<()> {
        let mut state = lock(&self.inner);
        let Some((region, _)) = state.regions.iter_mut().find(|(region, _)| region.id == id) else {
            anyhow::bail!("region {id} not found")
        };
        region.start = start;
        region.end = end;
        Ok(())
    }

    fn enable_drag_selection(&mut self, id: RegionId, options: RegionOptions) -> Result<()> {
        lock(&self.inner).drag_selection = Some((id, options));
        Ok(())
    }

    fn disable_drag_selection(&mut self) -> Result<()> {
        lock(&self.inner).drag_selection = None;
        Ok(())
    }
}
