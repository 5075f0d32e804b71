use tracing::debug;

use crate::{
    error::{SyncError, SyncResult},
    model::{PlayMode, Segment, TranscriptResult},
};

/// Index of the segment whose `[start, end)` span holds `time`.
pub fn containing_index(timeline: &[Segment], time: f64) -> Option<usize> {
    timeline.iter().position(|segment| segment.contains(time))
}

/// Resolves the active segment for a playback time.
///
/// Gaps and out-of-range times keep `current`. In `Single` and `Loop` the
/// cursor never moves the selection to another segment; only `All` follows it.
pub fn resolve_active_index(
    timeline: &[Segment],
    time: f64,
    mode: PlayMode,
    current: usize,
) -> usize {
    match containing_index(timeline, time) {
        None => current,
        Some(index) if mode.stays_in_segment() && index != current => current,
        Some(index) => index,
    }
}

pub fn is_non_overlapping(timeline: &[Segment]) -> bool {
    timeline
        .windows(2)
        .all(|pair| pair[0].end_time <= pair[1].start_time)
}

/// Working copy of a transcript produced while editing region boundaries.
///
/// Edits never mutate a draft in place: each one returns a new draft built
/// from the previous value, so the persisted result it was cloned from stays
/// untouched until a commit replaces it wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptDraft {
    result: TranscriptResult,
    revision: u64,
}

impl TranscriptDraft {
    pub fn from_persisted(result: &TranscriptResult) -> Self {
        Self {
            result: result.clone(),
            revision: 0,
        }
    }

    pub fn result(&self) -> &TranscriptResult {
        &self.result
    }

    pub fn timeline(&self) -> &[Segment] {
        &self.result.timeline
    }

    /// Number of edits applied since the draft was cloned.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Moves segment `index` to `[start, end]` and pulls back the immediate
    /// neighbors so no two segments overlap. Only one neighbor on each side
    /// is ever adjusted.
    ///
    /// The requested bounds are first limited so each neighbor keeps at least
    /// `min_span` seconds; the bounds actually applied are returned with the
    /// new draft.
    pub fn with_boundary_edit(
        &self,
        index: usize,
        start: f64,
        end: f64,
        min_span: f64,
    ) -> SyncResult<(TranscriptDraft, (f64, f64))> {
        let timeline = &self.result.timeline;
        if index >= timeline.len() {
            return Err(SyncError::InvalidRegionEdit(format!(
                "segment {index} is outside a timeline of {}",
                timeline.len()
            )));
        }
        if !start.is_finite() || !end.is_finite() {
            return Err(SyncError::InvalidRegionEdit(format!(
                "non-finite bounds [{start}, {end}]"
            )));
        }

        // An edge the user left in place is never pulled, even when a
        // neighbor is already shorter than `min_span`.
        let current = &timeline[index];
        let lower = match index.checked_sub(1) {
            Some(prev) => (timeline[prev].start_time + min_span).min(current.start_time),
            None => 0.0,
        };
        let upper = timeline
            .get(index + 1)
            .map(|next| (next.end_time - min_span).max(current.end_time))
            .unwrap_or(f64::INFINITY);
        let start = start.max(lower);
        let end = end.min(upper);
        if end - start < min_span.max(f64::EPSILON) {
            return Err(SyncError::InvalidRegionEdit(format!(
                "segment {index} would span [{start}, {end}]"
            )));
        }

        let mut next_result = self.result.clone();
        let segments = &mut next_result.timeline;
        segments[index].start_time = start;
        segments[index].end_time = end;

        if index > 0 && segments[index - 1].end_time > start {
            debug!(segment = index - 1, end = start, "clamping previous segment");
            segments[index - 1].end_time = start;
        }
        if let Some(next) = segments.get_mut(index + 1) {
            if next.start_time < end {
                debug!(segment = index + 1, start = end, "clamping following segment");
                next.start_time = end;
            }
        }

        let draft = TranscriptDraft {
            result: next_result,
            revision: self.revision + 1,
        };
        Ok((draft, (start, end)))
    }
}
