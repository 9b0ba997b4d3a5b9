//! Tracker selection and construction.

use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{Bookmark, SequenceNumber, SourceId};
use tracing::info;

use crate::config::{AckTrackerConfig, ReliabilityMode};
use crate::consecutive::ConsecutiveTracker;
use crate::error::AckResult;
use crate::instant::{BookmarklessTracker, InstantTracker};
use crate::storage::{BookmarkStore, PersistedBookmark};
use crate::tracker::{
    AckTracker, AckTrackerKind, AckTrackerStats, BookmarkWriter, ConfirmOutcome, FlushOutcome,
    TrackOutcome,
};

// -----------------------------------------------------------------------------
// Tracker
// -----------------------------------------------------------------------------

/// One of the tracker variants, chosen by [`AckTrackerFactory`].
// One per source, created once and shared behind an `Arc`.
#[allow(clippy::large_enum_variant)]
pub enum Tracker {
    /// See [`InstantTracker`].
    Instant(InstantTracker),
    /// See [`BookmarklessTracker`].
    Bookmarkless(BookmarklessTracker),
    /// See [`ConsecutiveTracker`].
    Consecutive(ConsecutiveTracker),
}

impl Tracker {
    /// Registers a read without suspending on a full window.
    ///
    /// Only the consecutive variant has a window; the others always track.
    ///
    /// # Errors
    ///
    /// Same as [`AckTracker::track_read`].
    pub async fn try_track_read(&self, bookmark: Bookmark) -> AckResult<TrackOutcome> {
        match self {
            Self::Consecutive(tracker) => tracker.try_track_read(bookmark),
            Self::Instant(tracker) => tracker.track_read(bookmark).await.map(TrackOutcome::Tracked),
            Self::Bookmarkless(tracker) => {
                tracker.track_read(bookmark).await.map(TrackOutcome::Tracked)
            }
        }
    }

    /// Resolves once a flush would free window capacity.
    ///
    /// Returns immediately for variants without a window.
    pub async fn wait_for_progress(&self) {
        if let Self::Consecutive(tracker) = self {
            tracker.wait_for_progress().await;
        }
    }

    fn inner(&self) -> &dyn AckTracker {
        match self {
            Self::Instant(tracker) => tracker,
            Self::Bookmarkless(tracker) => tracker,
            Self::Consecutive(tracker) => tracker,
        }
    }
}

#[async_trait]
impl AckTracker for Tracker {
    fn kind(&self) -> AckTrackerKind {
        self.inner().kind()
    }

    async fn track_read(&self, bookmark: Bookmark) -> AckResult<SequenceNumber> {
        self.inner().track_read(bookmark).await
    }

    fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome> {
        self.inner().confirm(sequence)
    }

    fn current_safe_bookmark(&self) -> Option<Bookmark> {
        self.inner().current_safe_bookmark()
    }

    async fn flush(&self) -> AckResult<FlushOutcome> {
        self.inner().flush().await
    }

    fn pending(&self) -> u64 {
        self.inner().pending()
    }

    fn disable_bookmark_saving(&self) {
        self.inner().disable_bookmark_saving();
    }

    async fn wait_all_acked(&self) {
        self.inner().wait_all_acked().await;
    }

    fn stats(&self) -> AckTrackerStats {
        self.inner().stats()
    }
}

// -----------------------------------------------------------------------------
// Factory
// -----------------------------------------------------------------------------

/// Chooses and builds the tracker for a source.
///
/// | mode        | resumable   | not resumable         |
/// |-------------|-------------|-----------------------|
/// | Instant     | Instant     | Instant-Bookmarkless  |
/// | Consecutive | Consecutive | Instant-Bookmarkless  |
#[derive(Debug, Clone, Copy, Default)]
pub struct AckTrackerFactory;

impl AckTrackerFactory {
    /// Returns the tracker kind for a mode and resource capability.
    #[must_use]
    pub const fn select(mode: ReliabilityMode, resumable: bool) -> AckTrackerKind {
        match (mode, resumable) {
            (_, false) => AckTrackerKind::InstantBookmarkless,
            (ReliabilityMode::Instant, true) => AckTrackerKind::Instant,
            (ReliabilityMode::Consecutive, true) => AckTrackerKind::Consecutive,
        }
    }

    /// Builds the tracker for `source_id`.
    ///
    /// `resumed` is the record the source was positioned at on startup; the
    /// tracker reports it as the safe bookmark until something newer is
    /// confirmed and continues its generation numbering.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` fails validation.
    pub fn create(
        config: &AckTrackerConfig,
        source_id: SourceId,
        resumable: bool,
        store: Arc<dyn BookmarkStore>,
        resumed: Option<&PersistedBookmark>,
    ) -> AckResult<Tracker> {
        config.validate()?;

        let kind = Self::select(config.mode, resumable);
        if !resumable && config.mode == ReliabilityMode::Consecutive {
            info!(
                source_id = %source_id,
                "resource has no resumable positions, confirmations will not be tracked"
            );
        }

        let max_bookmark_bytes = config.limits.max_bookmark_bytes;
        let persisted = resumed.map(|record| record.bookmark.clone());

        let tracker = match kind {
            AckTrackerKind::InstantBookmarkless => {
                Tracker::Bookmarkless(BookmarklessTracker::new(source_id))
            }
            AckTrackerKind::Instant => {
                let writer = BookmarkWriter::new(source_id, store, resumed, max_bookmark_bytes);
                Tracker::Instant(InstantTracker::new(writer, persisted, max_bookmark_bytes))
            }
            AckTrackerKind::Consecutive => {
                let writer = BookmarkWriter::new(source_id, store, resumed, max_bookmark_bytes);
                Tracker::Consecutive(ConsecutiveTracker::new(writer, persisted, config))
            }
        };

        info!(
            source_id = %source_id,
            kind = %kind,
            window = config.window_size,
            "created ack tracker"
        );
        Ok(tracker)
    }
}
