use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
    debounce::Debounce,
    error::{SyncError, SyncResult},
    model::{PlayMode, PlaybackCursor, Segment, SyncState, TranscriptResult, Transcription},
    persistence::TranscriptStore,
    region::{Region, RegionId, RegionOptions},
    services::{MediaEngine, RegionOverlay},
    settings::SyncSettings,
    timeline::{resolve_active_index, TranscriptDraft},
};

/// Snapshot of a draft handed to storage. Local edits may continue while the
/// write is in flight; the outcome is applied with [`SegmentSynchronizer::finish_commit`].
#[derive(Debug, Clone)]
pub struct CommitTicket {
    transcription_id: String,
    draft: TranscriptDraft,
}

impl CommitTicket {
    pub fn transcription_id(&self) -> &str {
        &self.transcription_id
    }

    pub fn result(&self) -> &TranscriptResult {
        self.draft.result()
    }
}

/// Keeps the active segment, the waveform regions, the playback cursor and
/// the transcript draft consistent. Every entry point is an event from the
/// host loop; timers only advance when the host calls [`tick`](Self::tick).
pub struct SegmentSynchronizer {
    settings: SyncSettings,
    engine: Option<Box<dyn MediaEngine>>,
    overlay: Option<Box<dyn RegionOverlay>>,
    transcription: Option<Transcription>,
    draft: Option<TranscriptDraft>,
    cursor: PlaybackCursor,
    play_mode: PlayMode,
    active_index: usize,
    active_region: Option<Region>,
    editing: bool,
    selecting_region: bool,
    next_custom_serial: u64,
    region_refresh: Debounce,
    toggle: Debounce,
    loop_restart: Debounce,
}

fn settle(result: SyncResult<()>, event: &'static str) -> SyncResult<()> {
    match result {
        Err(err) if err.is_noop() => {
            debug!(event, %err, "event skipped");
            Ok(())
        }
        other => other,
    }
}

fn remove_regions_where(
    overlay: &mut dyn RegionOverlay,
    predicate: impl Fn(&RegionId) -> bool,
) -> anyhow::Result<()> {
    let doomed: Vec<RegionId> = overlay
        .regions()
        .into_iter()
        .map(|region| region.id)
        .filter(|id| predicate(id))
        .collect();
    for id in doomed {
        overlay.remove_region(id)?;
    }
    Ok(())
}

impl SegmentSynchronizer {
    pub fn new(mut settings: SyncSettings) -> Self {
        if let Err(err) = settings.validate() {
            warn!(%err, "unusable sync settings, falling back to defaults");
            settings = SyncSettings::default();
        }
        let cursor = PlaybackCursor {
            playback_rate: settings.playback_rate,
            ..PlaybackCursor::default()
        };
        Self {
            play_mode: settings.default_play_mode,
            region_refresh: Debounce::new(settings.region_refresh_debounce()),
            toggle: Debounce::new(settings.toggle_debounce()),
            loop_restart: Debounce::new(settings.loop_restart_delay()),
            settings,
            engine: None,
            overlay: None,
            transcription: None,
            draft: None,
            cursor,
            active_index: 0,
            active_region: None,
            editing: false,
            selecting_region: false,
            next_custom_serial: 0,
        }
    }

    pub fn state(&self) -> SyncState {
        if self.editing {
            SyncState::Editing
        } else {
            SyncState::from_playback(self.cursor.is_playing, self.play_mode)
        }
    }

    pub fn play_mode(&self) -> PlayMode {
        self.play_mode
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn active_region(&self) -> Option<Region> {
        self.active_region
    }

    pub fn draft(&self) -> Option<&TranscriptDraft> {
        self.draft.as_ref()
    }

    pub fn transcription(&self) -> Option<&Transcription> {
        self.transcription.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_selecting_region(&self) -> bool {
        self.selecting_region
    }

    fn persisted(&self) -> SyncResult<&TranscriptResult> {
        self.transcription
            .as_ref()
            .and_then(Transcription::aligned_result)
            .ok_or(SyncError::MissingTimeline)
    }

    /// The timeline regions are drawn from: the draft while one exists.
    fn working_timeline(&self) -> SyncResult<&[Segment]> {
        match &self.draft {
            Some(draft) => Ok(draft.timeline()),
            None => Ok(&self.persisted()?.timeline),
        }
    }

    fn engine_mut(&mut self) -> SyncResult<&mut (dyn MediaEngine + 'static)> {
        self.engine
            .as_deref_mut()
            .ok_or(SyncError::StaleHandle("media engine"))
    }

    fn overlay_mut(&mut self) -> SyncResult<&mut (dyn RegionOverlay + 'static)> {
        self.overlay
            .as_deref_mut()
            .ok_or(SyncError::StaleHandle("region overlay"))
    }

    fn ensure_attached(&self) -> SyncResult<()> {
        if self.engine.is_none() {
            return Err(SyncError::StaleHandle("media engine"));
        }
        if self.overlay.is_none() {
            return Err(SyncError::StaleHandle("region overlay"));
        }
        Ok(())
    }

    fn segment_region_on_overlay(&self) -> Option<Region> {
        let id = RegionId::Segment(self.active_index);
        self.overlay
            .as_deref()?
            .regions()
            .into_iter()
            .find(|region| region.id == id)
    }

    /// Binds the waveform collaborators. Any previous binding is released first.
    pub fn attach(
        &mut self,
        engine: Box<dyn MediaEngine>,
        overlay: Box<dyn RegionOverlay>,
    ) -> SyncResult<()> {
        self.detach();
        self.engine = Some(engine);
        self.overlay = Some(overlay);
        info!("waveform attached");

        let rate = self.cursor.playback_rate;
        self.engine_mut()?.set_playback_rate(rate)?;
        settle(self.materialize_regions(), "attach")
    }

    /// Releases the waveform collaborators and cancels every pending timer.
    pub fn detach(&mut self) {
        self.region_refresh.cancel();
        self.toggle.cancel();
        self.loop_restart.cancel();
        self.selecting_region = false;
        self.active_region = None;
        if let Some(overlay) = self.overlay.as_deref_mut() {
            if let Err(err) = overlay.disable_drag_selection() {
                warn!(%err, "failed to disable drag selection on detach");
            }
        }
        self.cursor.is_playing = false;
        let had_engine = self.engine.take().is_some();
        let had_overlay = self.overlay.take().is_some();
        if had_engine || had_overlay {
            info!("waveform detached");
        }
    }

    /// Installs a transcription, either a new one or a storage update of the
    /// current one. Editing ends and pending timers are dropped in both cases.
    pub fn load_transcription(&mut self, transcription: Transcription, now: Instant) -> SyncResult<()> {
        self.region_refresh.cancel();
        self.toggle.cancel();
        self.loop_restart.cancel();
        self.draft = None;
        self.editing = false;

        let same_record = self
            .transcription
            .as_ref()
            .is_some_and(|current| current.id == transcription.id);
        info!(id = %transcription.id, same_record, "transcription loaded");
        self.transcription = Some(transcription);
        if !same_record {
            self.active_index = 0;
            self.active_region = None;
        }

        let first_start = match self.persisted() {
            Ok(result) => {
                let len = result.timeline.len();
                result.timeline.first().map(|segment| (segment.start_time, len))
            }
            Err(err) => {
                debug!(%err, "transcription not aligned yet");
                None
            }
        };
        let Some((first_start, len)) = first_start else {
            return Ok(());
        };

        self.region_refresh.arm(now);
        if same_record {
            self.active_index = self.active_index.min(len - 1);
            return Ok(());
        }

        let seek = match self.engine_mut() {
            Ok(engine) => engine.seek_to(first_start).map_err(SyncError::from),
            Err(err) => Err(err),
        };
        settle(seek, "load-transcription")
    }

    /// Runs whichever debounced actions are due.
    pub fn tick(&mut self, now: Instant) -> SyncResult<()> {
        let mut first_err = None;

        if self.toggle.fire_if_due(now) {
            if let Err(err) = settle(self.toggle_playback(), "toggle") {
                first_err.get_or_insert(err);
            }
        }
        if self.region_refresh.fire_if_due(now) {
            if let Err(err) = settle(self.materialize_regions(), "region-refresh") {
                first_err.get_or_insert(err);
            }
        }
        if self.loop_restart.fire_if_due(now) {
            if let Err(err) = settle(self.restart_loop(), "loop-restart") {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn play(&mut self) -> SyncResult<()> {
        self.loop_restart.cancel();
        self.engine_mut()?.play()?;
        self.cursor.is_playing = true;
        Ok(())
    }

    pub fn pause(&mut self) -> SyncResult<()> {
        self.loop_restart.cancel();
        self.engine_mut()?.pause()?;
        self.cursor.is_playing = false;
        Ok(())
    }

    fn toggle_playback(&mut self) -> SyncResult<()> {
        if self.engine_mut()?.is_playing() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Play/pause button press; bursts of presses collapse into one toggle.
    pub fn request_toggle_playback(&mut self, now: Instant) {
        self.toggle.arm(now);
    }

    pub fn on_playback_started(&mut self) {
        self.cursor.is_playing = true;
    }

    pub fn on_playback_paused(&mut self) -> SyncResult<()> {
        self.cursor.is_playing = false;
        settle(self.keep_cursor_in_active_region(), "paused")
    }

    pub fn set_play_mode(&mut self, mode: PlayMode) {
        if mode != PlayMode::Loop {
            self.loop_restart.cancel();
        }
        info!(from = ?self.play_mode, to = ?mode, "play mode changed");
        self.play_mode = mode;
    }

    pub fn set_playback_rate(&mut self, rate: f64) -> SyncResult<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(SyncError::InvalidPlaybackRate(rate));
        }
        self.cursor.playback_rate = rate;
        if let Some(engine) = self.engine.as_deref_mut() {
            engine.set_playback_rate(rate)?;
        }
        Ok(())
    }

    /// Media time-update event.
    pub fn on_time_update(&mut self, current_time: f64, now: Instant) -> SyncResult<()> {
        self.cursor.current_time = current_time;
        settle(self.resolve_from_time(now), "time-update")
    }

    fn resolve_from_time(&mut self, now: Instant) -> SyncResult<()> {
        // Boundary drags move the cursor; the selection must not follow it.
        if self.editing {
            return Ok(());
        }
        let timeline = &self.persisted()?.timeline;
        let next = resolve_active_index(
            timeline,
            self.cursor.current_time,
            self.play_mode,
            self.active_index,
        );
        self.change_active_index(next, now);
        self.keep_cursor_in_active_region()
    }

    /// While paused in `Single`/`Loop`, a cursor outside the active region is
    /// sent back to the region start.
    fn keep_cursor_in_active_region(&mut self) -> SyncResult<()> {
        if self.cursor.is_playing || self.play_mode == PlayMode::All {
            return Ok(());
        }
        if self.loop_restart.is_armed() {
            return Ok(());
        }
        let Some(region) = self.active_region else {
            return Ok(());
        };
        if region.contains(self.cursor.current_time) {
            return Ok(());
        }
        debug!(time = self.cursor.current_time, start = region.start, "returning cursor to region");
        let engine = self.engine_mut()?;
        engine.set_scroll_time(region.start)?;
        engine.seek_to(region.start)?;
        Ok(())
    }

    /// Media engine left the bounds of `region`.
    pub fn on_region_out(&mut self, region: Region, now: Instant) -> SyncResult<()> {
        settle(self.handle_region_out(region, now), "region-out")
    }

    fn handle_region_out(&mut self, region: Region, now: Instant) -> SyncResult<()> {
        if self.active_region.map(|active| active.id) != Some(region.id) {
            return Err(SyncError::InvalidRegionEdit(format!("{} is not active", region.id)));
        }
        match self.play_mode {
            PlayMode::Loop => {
                self.pause()?;
                self.loop_restart.arm(now);
                debug!(region = %region.id, "loop restart scheduled");
            }
            PlayMode::Single => self.pause()?,
            PlayMode::All => {}
        }
        Ok(())
    }

    /// Media reached its end.
    pub fn on_finish(&mut self) -> SyncResult<()> {
        if self.play_mode != PlayMode::Loop {
            return Ok(());
        }
        settle(self.restart_loop(), "finish")
    }

    fn restart_loop(&mut self) -> SyncResult<()> {
        let region = self
            .active_region
            .ok_or_else(|| SyncError::InvalidRegionEdit("no active region to loop".into()))?;
        info!(region = %region.id, start = region.start, "restarting loop");
        self.engine_mut()?.seek_to(region.start)?;
        self.play()
    }

    pub fn next_segment(&mut self, now: Instant) -> SyncResult<()> {
        self.select_segment(self.active_index + 1, now)
    }

    pub fn previous_segment(&mut self, now: Instant) -> SyncResult<()> {
        match self.active_index.checked_sub(1) {
            Some(index) => self.select_segment(index, now),
            None => Ok(()),
        }
    }

    pub fn select_segment(&mut self, index: usize, now: Instant) -> SyncResult<()> {
        settle(self.try_select_segment(index, now), "select-segment")
    }

    fn try_select_segment(&mut self, index: usize, now: Instant) -> SyncResult<()> {
        self.ensure_attached()?;
        let len = self.persisted()?.timeline.len();
        if index >= len {
            return Err(SyncError::InvalidRegionEdit(format!(
                "segment {index} is outside a timeline of {len}"
            )));
        }
        self.change_active_index(index, now);
        Ok(())
    }

    /// Moving to another segment abandons any boundary edit in progress.
    fn change_active_index(&mut self, index: usize, now: Instant) {
        if index == self.active_index {
            return;
        }
        info!(from = self.active_index, to = index, "active segment changed");
        self.active_index = index;
        if self.editing {
            self.draft = None;
            self.editing = false;
        }
        self.region_refresh.arm(now);
    }

    /// Makes `region` the one that plays, loops and is edited.
    pub fn set_active_region(&mut self, region: Region) -> SyncResult<()> {
        settle(self.activate_region(region), "activate-region")
    }

    fn activate_region(&mut self, region: Region) -> SyncResult<()> {
        self.ensure_attached()?;
        self.active_region = Some(region);
        if region.id.is_custom() {
            let overlay = self.overlay_mut()?;
            remove_regions_where(overlay, RegionId::is_word)?;
            if self.selecting_region {
                // keep custom regions, the activated one is among them
                self.overlay_mut()?.disable_drag_selection()?;
                self.selecting_region = false;
            }
        } else {
            if self.selecting_region {
                self.stop_selecting()?;
            }
            if self.play_mode != PlayMode::All {
                self.engine_mut()?.fit_zoom_to(region.start, region.end)?;
            }
        }
        Ok(())
    }

    /// Replaces the segment region with one mirroring the active segment.
    pub fn materialize_regions(&mut self) -> SyncResult<()> {
        self.ensure_attached()?;
        if self.editing && self.active_region.is_some_and(|region| region.id.is_word()) {
            debug!("word region being edited, segment region left as is");
            return Ok(());
        }

        let index = self.active_index;
        let segment = self
            .working_timeline()?
            .get(index)
            .cloned()
            .ok_or(SyncError::MissingTimeline)?;
        let options = RegionOptions::segment(
            index,
            segment.duration(),
            &self.settings.segment_region_color,
            self.editing,
        );
        let region = Region::new(RegionId::Segment(index), segment.start_time, segment.end_time);

        let overlay = self.overlay_mut()?;
        remove_regions_where(overlay, RegionId::is_segment)?;
        overlay.add_region(region, options)?;
        debug!(segment = index, start = region.start, end = region.end, "segment region drawn");

        if let Some(active) = self.active_region {
            if active.id.is_word() && active.is_within(&region) {
                return Ok(());
            }
        }

        remove_regions_where(self.overlay_mut()?, RegionId::is_word)?;
        self.activate_region(region)?;
        self.engine_mut()?.set_scroll_time(region.start)?;
        Ok(())
    }

    pub fn set_editing(&mut self, editing: bool, now: Instant) -> SyncResult<()> {
        if !editing {
            self.discard(now);
            return Ok(());
        }
        if self.editing {
            return Ok(());
        }
        if let Err(err) = self.persisted() {
            debug!(%err, "editing unavailable");
            return Ok(());
        }
        info!(segment = self.active_index, "editing started");
        self.editing = true;
        self.region_refresh.arm(now);
        Ok(())
    }

    /// Drops the draft and leaves editing; the persisted transcript is untouched.
    pub fn discard(&mut self, now: Instant) {
        if !self.editing && self.draft.is_none() {
            return;
        }
        info!(had_draft = self.draft.is_some(), "editing discarded");
        self.draft = None;
        self.editing = false;
        self.region_refresh.arm(now);
    }

    /// Region plugin reported new bounds for `region`.
    pub fn on_region_updated(&mut self, region: Region) -> SyncResult<()> {
        settle(self.apply_region_edit(region), "region-updated")
    }

    fn apply_region_edit(&mut self, region: Region) -> SyncResult<()> {
        self.persisted()?;
        self.ensure_attached()?;
        let segment_region = self.segment_region_on_overlay().ok_or_else(|| {
            SyncError::InvalidRegionEdit(format!("segment {} is not drawn", self.active_index))
        })?;

        match region.id {
            RegionId::Custom(_) => {
                let clamped = region.clamped_to(&segment_region);
                if clamped != region {
                    debug!(region = %region.id, start = clamped.start, end = clamped.end, "custom region clamped");
                    self.overlay_mut()?
                        .set_region_bounds(region.id, clamped.start, clamped.end)?;
                }
                if self.active_region.map(|active| active.id) == Some(region.id) {
                    self.active_region = Some(clamped);
                }
                Ok(())
            }
            RegionId::Segment(index) if index == self.active_index => {
                if !self.editing {
                    return Err(SyncError::InvalidRegionEdit("not editing".into()));
                }
                self.edit_segment_bounds(index, region)
            }
            other => Err(SyncError::InvalidRegionEdit(format!("{other} is not editable"))),
        }
    }

    fn edit_segment_bounds(&mut self, index: usize, region: Region) -> SyncResult<()> {
        let min_span = self.settings.min_segment_span;
        let (draft, (start, end)) = match &self.draft {
            Some(draft) => draft.with_boundary_edit(index, region.start, region.end, min_span)?,
            None => TranscriptDraft::from_persisted(self.persisted()?)
                .with_boundary_edit(index, region.start, region.end, min_span)?,
        };

        if (start, end) != (region.start, region.end) {
            self.overlay_mut()?.set_region_bounds(region.id, start, end)?;
        }
        if self.active_region.map(|active| active.id) == Some(region.id) {
            self.active_region = Some(Region::new(region.id, start, end));
        }
        info!(segment = index, start, end, revision = draft.revision(), "segment boundaries edited");
        self.draft = Some(draft);
        Ok(())
    }

    /// Snapshot of the current draft for persistence, if there is one.
    pub fn begin_commit(&self) -> Option<CommitTicket> {
        let draft = self.draft.clone()?;
        let transcription_id = self.transcription.as_ref()?.id.clone();
        Some(CommitTicket {
            transcription_id,
            draft,
        })
    }

    /// Applies the storage outcome for `ticket`. A failed write keeps the
    /// draft so the user can retry.
    pub fn finish_commit(
        &mut self,
        ticket: CommitTicket,
        outcome: anyhow::Result<()>,
        now: Instant,
    ) -> SyncResult<()> {
        if let Err(err) = outcome {
            warn!(id = %ticket.transcription_id, %err, "draft commit failed");
            return Err(SyncError::PersistFailure(err));
        }

        let Some(transcription) = self
            .transcription
            .as_mut()
            .filter(|current| current.id == ticket.transcription_id)
        else {
            warn!(id = %ticket.transcription_id, "commit finished for a replaced transcription");
            return Ok(());
        };
        transcription.result = Some(ticket.draft.result().clone());
        info!(id = %ticket.transcription_id, "draft committed");

        // Edits made while the write was in flight stay in the draft.
        if self.draft.as_ref() == Some(&ticket.draft) {
            self.draft = None;
            self.editing = false;
        }
        self.region_refresh.arm(now);
        Ok(())
    }

    pub fn commit(&mut self, store: &mut dyn TranscriptStore, now: Instant) -> SyncResult<()> {
        let Some(ticket) = self.begin_commit() else {
            debug!("nothing to commit");
            return Ok(());
        };
        let outcome = store.update_result(ticket.transcription_id(), ticket.result());
        self.finish_commit(ticket, outcome, now)
    }

    pub fn set_selecting_region(&mut self, selecting: bool) -> SyncResult<()> {
        settle(self.toggle_selecting(selecting), "select-region")
    }

    fn toggle_selecting(&mut self, selecting: bool) -> SyncResult<()> {
        self.persisted()?;
        self.ensure_attached()?;
        if selecting {
            self.start_selecting()
        } else {
            self.stop_selecting()?;
            self.reactivate_segment_region()
        }
    }

    fn start_selecting(&mut self) -> SyncResult<()> {
        let id = RegionId::Custom(self.next_custom_serial);
        self.next_custom_serial += 1;
        let options = RegionOptions::custom(&self.settings.custom_region_color);
        let overlay = self.overlay_mut()?;
        remove_regions_where(overlay, RegionId::is_custom)?;
        overlay.enable_drag_selection(id, options)?;
        self.selecting_region = true;
        debug!(region = %id, "drag selection enabled");
        Ok(())
    }

    fn stop_selecting(&mut self) -> SyncResult<()> {
        let overlay = self.overlay_mut()?;
        overlay.disable_drag_selection()?;
        remove_regions_where(overlay, RegionId::is_custom)?;
        self.selecting_region = false;
        Ok(())
    }

    fn reactivate_segment_region(&mut self) -> SyncResult<()> {
        if self.active_region.is_some_and(|region| !region.id.is_custom()) {
            return Ok(());
        }
        self.active_region = self.segment_region_on_overlay();
        Ok(())
    }

    /// Region plugin created a region, typically at the end of a drag selection.
    pub fn on_region_created(&mut self, region: Region) -> SyncResult<()> {
        if !region.id.is_custom() {
            return Ok(());
        }
        settle(self.adopt_custom_region(region), "region-created")
    }

    /// The first drag ends selection mode; the new region becomes active.
    fn adopt_custom_region(&mut self, region: Region) -> SyncResult<()> {
        self.ensure_attached()?;
        info!(region = %region.id, start = region.start, end = region.end, "custom region selected");
        self.activate_region(region)
    }
}

impl Drop for SegmentSynchronizer {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        model::Segment,
        persistence::MemoryTranscriptStore,
        services::{EngineCall, MemoryRegionOverlay, RecordingMediaEngine},
        timeline::is_non_overlapping,
    };
    use pretty_assertions::assert_eq;

    fn transcription() -> Transcription {
        Transcription::new(
            "t1",
            Some(TranscriptResult {
                timeline: vec![
                    Segment::new(0, 0.0, 2.0, "one"),
                    Segment::new(1, 2.0, 5.0, "two"),
                    Segment::new(2, 5.0, 9.0, "three"),
                ],
                transcript: "one two three".into(),
            }),
        )
    }

    struct Harness {
        sync: SegmentSynchronizer,
        engine: RecordingMediaEngine,
        overlay: MemoryRegionOverlay,
        t0: Instant,
    }

    impl Harness {
        fn new(mode: PlayMode) -> Self {
            let t0 = Instant::now();
            let mut sync = SegmentSynchronizer::new(SyncSettings {
                default_play_mode: mode,
                ..SyncSettings::default()
            });
            let engine = RecordingMediaEngine::default();
            let overlay = MemoryRegionOverlay::default();
            sync.attach(Box::new(engine.clone()), Box::new(overlay.clone()))
                .expect("attach");
            sync.load_transcription(transcription(), t0).expect("load");
            sync.tick(t0 + Duration::from_millis(100)).expect("initial refresh");
            engine.clear();
            Self {
                sync,
                engine,
                overlay,
                t0,
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.t0 + Duration::from_millis(ms)
        }

        fn segment_regions(&self) -> Vec<Region> {
            self.overlay
                .clone()
                .regions()
                .into_iter()
                .filter(|region| region.id.is_segment())
                .collect()
        }

        /// Selects segment `index` and lets the region refresh settle.
        fn select(&mut self, index: usize, ms: u64) {
            self.sync.select_segment(index, self.at(ms)).expect("select");
            self.sync.tick(self.at(ms + 100)).expect("refresh");
            self.engine.clear();
        }
    }

    #[test]
    fn loading_selects_first_segment() {
        let h = Harness::new(PlayMode::Single);
        assert_eq!(h.sync.active_index(), 0);
        assert_eq!(
            h.sync.active_region(),
            Some(Region::new(RegionId::Segment(0), 0.0, 2.0))
        );
        assert_eq!(h.segment_regions().len(), 1);
        assert_eq!(
            h.overlay.options(RegionId::Segment(0)).unwrap().label.as_deref(),
            Some("#1 (2.00s)")
        );
    }

    #[test]
    fn all_mode_follows_playback() {
        let mut h = Harness::new(PlayMode::All);
        h.sync.play().unwrap();
        h.sync.on_time_update(6.0, h.at(200)).unwrap();
        assert_eq!(h.sync.active_index(), 2);

        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(
            h.segment_regions(),
            vec![Region::new(RegionId::Segment(2), 5.0, 9.0)]
        );
        assert_eq!(h.sync.active_region().map(|r| r.id), Some(RegionId::Segment(2)));
    }

    #[test]
    fn single_mode_holds_until_explicit_advance() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.play().unwrap();
        h.sync.on_time_update(3.0, h.at(200)).unwrap();
        h.sync.on_time_update(3.0, h.at(210)).unwrap();
        assert_eq!(h.sync.active_index(), 0);

        h.sync.next_segment(h.at(220)).unwrap();
        assert_eq!(h.sync.active_index(), 1);
        h.sync.previous_segment(h.at(230)).unwrap();
        h.sync.previous_segment(h.at(240)).unwrap();
        assert_eq!(h.sync.active_index(), 0);
    }

    #[test]
    fn switching_to_all_lets_cursor_move_selection() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.play().unwrap();
        h.sync.on_time_update(3.0, h.at(200)).unwrap();
        assert_eq!(h.sync.active_index(), 0);

        h.sync.set_play_mode(PlayMode::All);
        h.sync.on_time_update(3.0, h.at(210)).unwrap();
        assert_eq!(h.sync.active_index(), 1);
    }

    #[test]
    fn rapid_time_updates_coalesce_into_one_refresh() {
        let mut h = Harness::new(PlayMode::All);
        h.sync.play().unwrap();
        h.sync.on_time_update(2.5, h.at(200)).unwrap();
        h.sync.on_time_update(6.0, h.at(250)).unwrap();

        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(h.segment_regions()[0].id, RegionId::Segment(0));

        h.sync.tick(h.at(350)).unwrap();
        assert_eq!(h.segment_regions()[0].id, RegionId::Segment(2));
        assert_eq!(h.engine.calls(), vec![EngineCall::Play, EngineCall::SetScrollTime(5.0)]);
    }

    #[test]
    fn paused_cursor_returns_to_active_region() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.on_time_update(3.0, h.at(200)).unwrap();
        assert_eq!(
            h.engine.calls(),
            vec![EngineCall::SetScrollTime(0.0), EngineCall::SeekTo(0.0)]
        );
    }

    #[test]
    fn editing_end_clamps_following_segment() {
        let mut h = Harness::new(PlayMode::Single);
        h.select(1, 200);
        h.sync.set_editing(true, h.at(400)).unwrap();
        h.sync.tick(h.at(500)).unwrap();
        assert!(h.overlay.options(RegionId::Segment(1)).unwrap().resize);

        let edited = h.overlay.drag_edges(RegionId::Segment(1), 2.0, 6.5).unwrap();
        h.sync.on_region_updated(edited).unwrap();

        let draft = h.sync.draft().expect("draft");
        let original = transcription().result.unwrap();
        assert_eq!(draft.timeline()[0], original.timeline[0]);
        assert_eq!(draft.timeline()[1].end_time, 6.5);
        assert_eq!(draft.timeline()[2].start_time, 6.5);
        assert!(is_non_overlapping(draft.timeline()));
        assert_eq!(h.sync.transcription().unwrap().result, Some(original));
    }

    #[test]
    fn edits_accumulate_in_one_draft() {
        let mut h = Harness::new(PlayMode::Single);
        h.select(1, 200);
        h.sync.set_editing(true, h.at(400)).unwrap();
        h.sync.tick(h.at(500)).unwrap();

        let first = h.overlay.drag_edges(RegionId::Segment(1), 2.0, 6.5).unwrap();
        h.sync.on_region_updated(first).unwrap();
        let second = h.overlay.drag_edges(RegionId::Segment(1), 1.0, 6.5).unwrap();
        h.sync.on_region_updated(second).unwrap();

        let draft = h.sync.draft().unwrap();
        assert_eq!(draft.revision(), 2);
        assert_eq!(draft.timeline()[0].end_time, 1.0);
        assert_eq!(draft.timeline()[2].start_time, 6.5);
    }

    #[test]
    fn discarding_restores_persisted_transcript() {
        let mut h = Harness::new(PlayMode::Single);
        h.select(1, 200);
        h.sync.set_editing(true, h.at(400)).unwrap();
        h.sync.tick(h.at(500)).unwrap();
        for (start, end) in [(2.0, 6.5), (0.5, 4.0), (3.0, 8.0)] {
            let edited = h.overlay.drag_edges(RegionId::Segment(1), start, end).unwrap();
            h.sync.on_region_updated(edited).unwrap();
        }

        h.sync.set_editing(false, h.at(600)).unwrap();
        assert!(h.sync.draft().is_none());
        assert!(!h.sync.is_editing());
        assert_eq!(h.sync.transcription().unwrap(), &transcription());

        h.sync.tick(h.at(700)).unwrap();
        assert_eq!(
            h.segment_regions(),
            vec![Region::new(RegionId::Segment(1), 2.0, 5.0)]
        );
        assert!(!h.overlay.options(RegionId::Segment(1)).unwrap().resize);
    }

    #[test]
    fn segment_edits_outside_editing_are_ignored() {
        let mut h = Harness::new(PlayMode::Single);
        let dragged = h.overlay.drag_edges(RegionId::Segment(0), 0.0, 3.0).unwrap();
        h.sync.on_region_updated(dragged).unwrap();
        assert!(h.sync.draft().is_none());
    }

    #[test]
    fn leaving_the_segment_abandons_the_draft() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_editing(true, h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        let edited = h.overlay.drag_edges(RegionId::Segment(0), 0.0, 1.5).unwrap();
        h.sync.on_region_updated(edited).unwrap();
        assert!(h.sync.draft().is_some());

        h.sync.next_segment(h.at(400)).unwrap();
        assert!(h.sync.draft().is_none());
        assert_eq!(h.sync.state(), SyncState::Idle);
    }

    #[test]
    fn time_updates_do_not_move_selection_while_editing() {
        let mut h = Harness::new(PlayMode::All);
        h.sync.set_editing(true, h.at(200)).unwrap();
        h.sync.on_time_update(6.0, h.at(250)).unwrap();
        assert_eq!(h.sync.active_index(), 0);
        assert!(h.sync.is_editing());
    }

    #[test]
    fn commit_persists_and_ends_editing() {
        let mut h = Harness::new(PlayMode::Single);
        let mut store = MemoryTranscriptStore::default();
        store.insert(transcription());

        h.select(1, 200);
        h.sync.set_editing(true, h.at(400)).unwrap();
        h.sync.tick(h.at(500)).unwrap();
        let edited = h.overlay.drag_edges(RegionId::Segment(1), 2.0, 6.5).unwrap();
        h.sync.on_region_updated(edited).unwrap();
        let expected = h.sync.draft().unwrap().result().clone();

        h.sync.commit(&mut store, h.at(600)).unwrap();
        assert!(h.sync.draft().is_none());
        assert!(!h.sync.is_editing());
        assert_eq!(h.sync.transcription().unwrap().result, Some(expected.clone()));
        assert_eq!(store.find("t1").unwrap().unwrap().result, Some(expected));
    }

    struct FailingStore;

    impl TranscriptStore for FailingStore {
        fn find(&self, _transcription_id: &str) -> anyhow::Result<Option<Transcription>> {
            Ok(None)
        }

        fn update_result(&mut self, _id: &str, _result: &TranscriptResult) -> anyhow::Result<()> {
            anyhow::bail!("database is locked")
        }
    }

    #[test]
    fn failed_commit_keeps_draft_for_retry() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_editing(true, h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        let edited = h.overlay.drag_edges(RegionId::Segment(0), 0.0, 1.5).unwrap();
        h.sync.on_region_updated(edited).unwrap();
        let draft = h.sync.draft().cloned();

        let err = h.sync.commit(&mut FailingStore, h.at(400)).unwrap_err();
        assert!(matches!(err, SyncError::PersistFailure(_)));
        assert_eq!(h.sync.draft().cloned(), draft);
        assert!(h.sync.is_editing());
        assert_eq!(h.sync.transcription().unwrap(), &transcription());

        let mut store = MemoryTranscriptStore::default();
        store.insert(transcription());
        h.sync.commit(&mut store, h.at(500)).unwrap();
        assert!(h.sync.draft().is_none());
    }

    #[test]
    fn edits_during_inflight_commit_survive() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_editing(true, h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        let edited = h.overlay.drag_edges(RegionId::Segment(0), 0.0, 1.5).unwrap();
        h.sync.on_region_updated(edited).unwrap();

        let ticket = h.sync.begin_commit().expect("ticket");
        let later = h.overlay.drag_edges(RegionId::Segment(0), 0.0, 1.2).unwrap();
        h.sync.on_region_updated(later).unwrap();

        h.sync.finish_commit(ticket, Ok(()), h.at(400)).unwrap();
        assert!(h.sync.is_editing());
        assert_eq!(h.sync.draft().unwrap().timeline()[0].end_time, 1.2);
        let persisted = h.sync.transcription().unwrap().result.as_ref().unwrap();
        assert_eq!(persisted.timeline[0].end_time, 1.5);
    }

    #[test]
    fn loop_mode_restarts_after_delay() {
        let mut h = Harness::new(PlayMode::Loop);
        h.select(1, 200);
        h.sync.play().unwrap();
        h.engine.clear();

        let region = h.sync.active_region().unwrap();
        assert_eq!((region.start, region.end), (2.0, 5.0));
        h.sync.on_region_out(region, h.at(1000)).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::Pause]);

        h.sync.on_time_update(5.01, h.at(1100)).unwrap();
        h.sync.tick(h.at(1499)).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::Pause]);

        h.sync.tick(h.at(1500)).unwrap();
        assert_eq!(
            h.engine.calls(),
            vec![EngineCall::Pause, EngineCall::SeekTo(2.0), EngineCall::Play]
        );
        assert_eq!(h.sync.state(), SyncState::Playing(PlayMode::Loop));
    }

    #[test]
    fn single_mode_pauses_and_all_mode_continues() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.play().unwrap();
        h.engine.clear();
        let region = h.sync.active_region().unwrap();
        h.sync.on_region_out(region, h.at(200)).unwrap();
        h.sync.tick(h.at(2000)).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::Pause]);

        let mut h = Harness::new(PlayMode::All);
        h.sync.play().unwrap();
        h.engine.clear();
        let region = h.sync.active_region().unwrap();
        h.sync.on_region_out(region, h.at(200)).unwrap();
        assert_eq!(h.engine.calls(), vec![]);
    }

    #[test]
    fn finish_replays_region_in_loop_mode() {
        let mut h = Harness::new(PlayMode::Loop);
        h.sync.on_finish().unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::SeekTo(0.0), EngineCall::Play]);
    }

    #[test]
    fn custom_region_is_clamped_into_segment() {
        let mut h = Harness::new(PlayMode::Single);
        h.select(1, 200);
        h.sync.set_selecting_region(true).unwrap();
        assert!(h.sync.is_selecting_region());
        assert!(h.overlay.drag_selection().is_some());

        let created = h.overlay.complete_drag(1.0, 7.0).unwrap();
        h.sync.on_region_created(created).unwrap();
        assert!(!h.sync.is_selecting_region());
        assert!(h.overlay.drag_selection().is_none());
        assert_eq!(h.sync.active_region().map(|r| r.id), Some(created.id));

        h.sync.on_region_updated(created).unwrap();
        assert_eq!(
            h.overlay.region(created.id),
            Some(Region::new(created.id, 2.0, 5.0))
        );
        assert_eq!(h.sync.active_region(), Some(Region::new(created.id, 2.0, 5.0)));
        assert!(h.sync.draft().is_none());
    }

    #[test]
    fn leaving_selection_mode_reactivates_segment_region() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_selecting_region(true).unwrap();
        let created = h.overlay.complete_drag(0.5, 1.5).unwrap();
        h.sync.on_region_created(created).unwrap();

        h.sync.set_selecting_region(true).unwrap();
        assert!(h.overlay.region(created.id).is_none());

        h.sync.set_selecting_region(false).unwrap();
        assert!(h.overlay.clone().regions().iter().all(|r| !r.id.is_custom()));
        assert_eq!(h.sync.active_region().map(|r| r.id), Some(RegionId::Segment(0)));
    }

    #[test]
    fn contained_word_region_survives_refresh() {
        let mut h = Harness::new(PlayMode::Single);
        let word = Region::new(RegionId::Word { segment: 0, word: 1 }, 0.5, 1.0);
        h.overlay
            .clone()
            .add_region(word, RegionOptions::custom("#ffffff"))
            .unwrap();
        h.sync.set_active_region(word).unwrap();

        h.sync.load_transcription(transcription(), h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(h.sync.active_region(), Some(word));
        assert!(h.overlay.region(word.id).is_some());

        let mut shrunk = transcription();
        shrunk.result.as_mut().unwrap().timeline[0].end_time = 0.8;
        h.sync.load_transcription(shrunk, h.at(400)).unwrap();
        h.sync.tick(h.at(500)).unwrap();
        assert!(h.overlay.region(word.id).is_none());
        assert_eq!(
            h.sync.active_region(),
            Some(Region::new(RegionId::Segment(0), 0.0, 0.8))
        );
    }

    #[test]
    fn missing_timeline_makes_events_noops() {
        let t0 = Instant::now();
        let mut sync = SegmentSynchronizer::new(SyncSettings::default());
        let engine = RecordingMediaEngine::default();
        let overlay = MemoryRegionOverlay::default();
        sync.attach(Box::new(engine.clone()), Box::new(overlay.clone()))
            .unwrap();
        sync.load_transcription(Transcription::new("pending", None), t0)
            .unwrap();

        sync.on_time_update(3.0, t0).unwrap();
        sync.set_editing(true, t0).unwrap();
        sync.set_selecting_region(true).unwrap();
        sync.on_region_updated(Region::new(RegionId::Segment(0), 0.0, 1.0))
            .unwrap();
        sync.next_segment(t0).unwrap();
        sync.tick(t0 + Duration::from_secs(1)).unwrap();

        assert!(!sync.is_editing());
        assert!(!sync.is_selecting_region());
        assert!(overlay.clone().regions().is_empty());
        assert_eq!(engine.calls(), vec![EngineCall::SetPlaybackRate(1.0)]);
    }

    #[test]
    fn detached_synchronizer_ignores_events() {
        let mut h = Harness::new(PlayMode::Loop);
        h.sync.play().unwrap();
        let region = h.sync.active_region().unwrap();
        h.sync.on_region_out(region, h.at(200)).unwrap();
        h.engine.clear();

        h.sync.detach();
        h.sync.tick(h.at(1000)).unwrap();
        h.sync.on_time_update(6.0, h.at(1100)).unwrap();
        h.sync.next_segment(h.at(1200)).unwrap();
        h.sync.on_region_created(Region::new(RegionId::Custom(9), 0.0, 1.0))
            .unwrap();
        assert!(h.sync.play().unwrap_err().is_noop());
        assert_eq!(h.engine.calls(), vec![]);
        assert_eq!(h.sync.active_index(), 0);
    }

    #[test]
    fn dropping_disables_drag_selection() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_selecting_region(true).unwrap();
        assert!(h.overlay.drag_selection().is_some());
        let overlay = h.overlay.clone();
        drop(h);
        assert!(overlay.drag_selection().is_none());
    }

    #[test]
    fn toggle_presses_are_debounced() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.request_toggle_playback(h.at(200));
        h.sync.request_toggle_playback(h.at(250));
        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(h.engine.calls(), vec![]);

        h.sync.tick(h.at(350)).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::Play]);
        assert_eq!(h.sync.state(), SyncState::Playing(PlayMode::Single));
    }

    #[test]
    fn playback_rate_is_validated() {
        let mut h = Harness::new(PlayMode::Single);
        assert!(matches!(
            h.sync.set_playback_rate(0.0),
            Err(SyncError::InvalidPlaybackRate(_))
        ));
        h.sync.set_playback_rate(0.75).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::SetPlaybackRate(0.75)]);
        assert_eq!(h.sync.cursor().playback_rate, 0.75);
    }

    #[test]
    fn state_transitions() {
        let mut h = Harness::new(PlayMode::Loop);
        assert_eq!(h.sync.state(), SyncState::Idle);
        h.sync.play().unwrap();
        assert_eq!(h.sync.state(), SyncState::Playing(PlayMode::Loop));
        h.sync.set_play_mode(PlayMode::All);
        assert_eq!(h.sync.state().label(), "Playing-All");
        assert_eq!(h.engine.calls(), vec![EngineCall::Play]);

        h.sync.set_editing(true, h.at(200)).unwrap();
        assert_eq!(h.sync.state(), SyncState::Editing);
        h.sync.set_editing(false, h.at(300)).unwrap();
        assert_eq!(h.sync.state(), SyncState::Playing(PlayMode::All));
    }

    #[test]
    fn negative_rate_setting_falls_back_to_defaults() {
        let mut sync = SegmentSynchronizer::new(SyncSettings {
            playback_rate: -2.0,
            ..SyncSettings::default()
        });
        let engine = RecordingMediaEngine::default();
        sync.attach(Box::new(engine.clone()), Box::new(MemoryRegionOverlay::default()))
            .unwrap();
        assert_eq!(engine.calls(), vec![EngineCall::SetPlaybackRate(1.0)]);
        assert_eq!(sync.cursor().playback_rate, 1.0);
    }

    #[test]
    fn activating_a_custom_region_ends_selection_mode() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.set_selecting_region(true).unwrap();
        let custom = Region::new(RegionId::Custom(42), 0.5, 1.5);
        h.sync.set_active_region(custom).unwrap();

        assert!(!h.sync.is_selecting_region());
        assert!(h.overlay.drag_selection().is_none());
        assert_eq!(h.sync.active_region(), Some(custom));
    }

    #[test]
    fn segment_regions_fit_zoom_outside_all_mode() {
        let mut h = Harness::new(PlayMode::Single);
        h.sync.select_segment(1, h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(
            h.engine.calls(),
            vec![EngineCall::FitZoom(2.0, 5.0), EngineCall::SetScrollTime(2.0)]
        );

        let mut h = Harness::new(PlayMode::All);
        h.sync.select_segment(1, h.at(200)).unwrap();
        h.sync.tick(h.at(300)).unwrap();
        assert_eq!(h.engine.calls(), vec![EngineCall::SetScrollTime(2.0)]);
    }
}
