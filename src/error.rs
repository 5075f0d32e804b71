//! Error types for the segment synchronizer

use thiserror::Error;

/// Result type alias for synchronizer operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while reconciling the timeline, regions and playback
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("transcript has no aligned timeline yet")]
    MissingTimeline,

    #[error("region edit ignored: {0}")]
    InvalidRegionEdit(String),

    #[error("failed to persist transcript draft: {0}")]
    PersistFailure(#[source] anyhow::Error),

    #[error("{0} handle is not attached")]
    StaleHandle(&'static str),

    #[error("invalid playback rate: {0}")]
    InvalidPlaybackRate(f64),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl SyncError {
    /// Guard failures that event handlers swallow instead of surfacing.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            SyncError::MissingTimeline
                | SyncError::InvalidRegionEdit(_)
                | SyncError::StaleHandle(_)
        )
    }
}
