//! Keeps an aligned transcript, the playback cursor and the editable
//! waveform regions in step while a user listens to and retimes segments.
//!
//! The media engine, the region overlay and transcript storage are reached
//! through the traits in [`services`] and [`persistence`].

pub mod debounce;
pub mod error;
pub mod model;
pub mod persistence;
pub mod region;
pub mod services;
pub mod settings;
pub mod state_machine;
pub mod store;
pub mod timeline;

pub use error::{SyncError, SyncResult};
pub use model::{PlayMode, PlaybackCursor, Segment, SyncState, TranscriptResult, Transcription};
pub use region::{Region, RegionId, RegionOptions};
pub use state_machine::{CommitTicket, SegmentSynchronizer};
pub use timeline::TranscriptDraft;
