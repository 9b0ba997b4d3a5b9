//! Trackers that count a record as delivered the moment it is read.
//!
//! [`InstantTracker`] persists the newest bookmark on every read.
//! [`BookmarklessTracker`] is for resources without resumable positions and
//! holds no store at all.

#![allow(clippy::significant_drop_tightening)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tally_core::{Bookmark, SequenceNumber, SourceId};
use tracing::{debug, info, warn};

use crate::error::AckResult;
use crate::tracker::{
    check_bookmark_size, AckTracker, AckTrackerKind, AckTrackerStats, BookmarkWriter,
    ConfirmOutcome, FlushOutcome, Poison, StatsCounters,
};

/// Classifies a confirmation against an instant-acking tracker.
///
/// Every issued sequence number is already acked, so a confirmation is either
/// a duplicate or refers to a sequence number that was never issued.
const fn is_issued(sequence: SequenceNumber, next: SequenceNumber) -> bool {
    sequence.get() >= SequenceNumber::FIRST.get() && sequence.get() < next.get()
}

// -----------------------------------------------------------------------------
// Instant Tracker
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct InstantState {
    next_sequence: SequenceNumber,
    /// Newest read bookmark that has not been written yet.
    unsaved: Option<(SequenceNumber, Bookmark)>,
    /// Last bookmark the store accepted.
    persisted: Option<Bookmark>,
}

/// Acks on read and writes the read's bookmark before returning.
///
/// A record read but not yet handed to the destination is lost on crash.
pub struct InstantTracker {
    source_id: SourceId,
    state: Mutex<InstantState>,
    writer: tokio::sync::Mutex<BookmarkWriter>,
    saving_enabled: AtomicBool,
    poison: Poison,
    stats: StatsCounters,
    max_bookmark_bytes: u32,
}

impl InstantTracker {
    /// Creates a tracker that writes through `writer`.
    ///
    /// `persisted` is the bookmark the source resumed from, if any.
    pub(crate) fn new(
        writer: BookmarkWriter,
        persisted: Option<Bookmark>,
        max_bookmark_bytes: u32,
    ) -> Self {
        Self {
            source_id: writer.source_id(),
            state: Mutex::new(InstantState {
                next_sequence: SequenceNumber::FIRST,
                unsaved: None,
                persisted,
            }),
            writer: tokio::sync::Mutex::new(writer),
            saving_enabled: AtomicBool::new(true),
            poison: Poison::default(),
            stats: StatsCounters::default(),
            max_bookmark_bytes,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, InstantState> {
        self.state.lock().expect("instant tracker lock poisoned")
    }

    /// Writes the newest unsaved bookmark, if any.
    async fn write_unsaved(&self) -> AckResult<FlushOutcome> {
        let mut writer = self.writer.lock().await;
        if !self.saving_enabled.load(Ordering::Acquire) {
            return Ok(FlushOutcome::Disabled);
        }

        let unsaved = self.state().unsaved.clone();
        let Some((sequence, bookmark)) = unsaved else {
            return Ok(FlushOutcome::Unchanged);
        };

        match writer.write(&bookmark).await {
            Ok(generation) => {
                {
                    let mut state = self.state();
                    state.persisted = Some(bookmark.clone());
                    // A newer read may have replaced the entry during the write.
                    if state.unsaved.as_ref().is_some_and(|(s, _)| *s == sequence) {
                        state.unsaved = None;
                    }
                }
                StatsCounters::bump(&self.stats.flushes);
                debug!(
                    source_id = %self.source_id,
                    generation = %generation,
                    bookmark = %bookmark,
                    "bookmark persisted"
                );
                Ok(FlushOutcome::Persisted {
                    generation,
                    through: bookmark,
                    collected: 0,
                })
            }
            Err(e) => {
                StatsCounters::bump(&self.stats.flush_failures);
                Err(e)
            }
        }
    }
}

#[async_trait]
impl AckTracker for InstantTracker {
    fn kind(&self) -> AckTrackerKind {
        AckTrackerKind::Instant
    }

    async fn track_read(&self, bookmark: Bookmark) -> AckResult<SequenceNumber> {
        self.poison.check()?;
        check_bookmark_size(&bookmark, self.max_bookmark_bytes)?;

        let sequence = {
            let mut state = self.state();
            let sequence = state.next_sequence;
            state.next_sequence = sequence.next();
            state.unsaved = Some((sequence, bookmark));
            sequence
        };
        StatsCounters::bump(&self.stats.tracked);
        StatsCounters::bump(&self.stats.confirmed);

        // The read itself succeeded. A failed write stays unsaved and the
        // next flush retries it and reports the error.
        if let Err(e) = self.write_unsaved().await {
            warn!(
                source_id = %self.source_id,
                sequence = %sequence,
                error = %e,
                "failed to persist bookmark on read"
            );
        }

        Ok(sequence)
    }

    fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome> {
        let next = self.state().next_sequence;
        if !is_issued(sequence, next) {
            return Err(self.poison.trip(self.source_id, sequence, next));
        }

        StatsCounters::bump(&self.stats.duplicate_confirms);
        debug!(source_id = %self.source_id, sequence = %sequence, "record acked on read");
        Ok(ConfirmOutcome::Duplicate)
    }

    fn current_safe_bookmark(&self) -> Option<Bookmark> {
        let state = self.state();
        state
            .unsaved
            .as_ref()
            .map(|(_, bookmark)| bookmark.clone())
            .or_else(|| state.persisted.clone())
    }

    async fn flush(&self) -> AckResult<FlushOutcome> {
        self.poison.check()?;
        if !self.saving_enabled.load(Ordering::Acquire) {
            return Ok(FlushOutcome::Disabled);
        }

        self.write_unsaved().await.map_err(|e| {
            warn!(source_id = %self.source_id, error = %e, "bookmark flush failed");
            e
        })
    }

    fn pending(&self) -> u64 {
        0
    }

    fn disable_bookmark_saving(&self) {
        if self.saving_enabled.swap(false, Ordering::AcqRel) {
            info!(source_id = %self.source_id, "bookmark saving disabled");
        }
    }

    async fn wait_all_acked(&self) {}

    fn stats(&self) -> AckTrackerStats {
        self.stats.snapshot(0)
    }
}

// -----------------------------------------------------------------------------
// Bookmarkless Tracker
// -----------------------------------------------------------------------------

/// Acks on read and never persists. Resuming always starts over.
#[derive(Debug)]
pub struct BookmarklessTracker {
    source_id: SourceId,
    next_sequence: AtomicU64,
    poison: Poison,
    stats: StatsCounters,
}

impl BookmarklessTracker {
    /// Creates a bookmarkless tracker for `source_id`.
    #[must_use]
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            next_sequence: AtomicU64::new(SequenceNumber::FIRST.get()),
            poison: Poison::default(),
            stats: StatsCounters::default(),
        }
    }
}

#[async_trait]
impl AckTracker for BookmarklessTracker {
    fn kind(&self) -> AckTrackerKind {
        AckTrackerKind::InstantBookmarkless
    }

    async fn track_read(&self, _bookmark: Bookmark) -> AckResult<SequenceNumber> {
        self.poison.check()?;

        let raw = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        // TigerStyle: Assert no wraparound.
        assert!(raw < u64::MAX, "sequence overflow");

        StatsCounters::bump(&self.stats.tracked);
        StatsCounters::bump(&self.stats.confirmed);
        Ok(SequenceNumber::new(raw))
    }

    fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome> {
        let next = SequenceNumber::new(self.next_sequence.load(Ordering::Relaxed));
        if !is_issued(sequence, next) {
            return Err(self.poison.trip(self.source_id, sequence, next));
        }

        StatsCounters::bump(&self.stats.duplicate_confirms);
        Ok(ConfirmOutcome::Duplicate)
    }

    fn current_safe_bookmark(&self) -> Option<Bookmark> {
        None
    }

    async fn flush(&self) -> AckResult<FlushOutcome> {
        self.poison.check()?;
        Ok(FlushOutcome::Unchanged)
    }

    fn pending(&self) -> u64 {
        0
    }

    fn disable_bookmark_saving(&self) {}

    async fn wait_all_acked(&self) {}

    fn stats(&self) -> AckTrackerStats {
        self.stats.snapshot(0)
    }
}

/// Builds an instant tracker over a shared store. Test helper.
#[cfg(test)]
pub(crate) fn instant_for_testing(
    store: std::sync::Arc<dyn crate::storage::BookmarkStore>,
) -> InstantTracker {
    let writer = BookmarkWriter::new(SourceId::new(1), store, None, 1024);
    InstantTracker::new(writer, None, 1024)
}
