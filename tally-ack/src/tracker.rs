//! The acknowledgment tracker contract and the plumbing shared by its variants.
//!
//! A tracker sits between the reader of a source and the delivery layer. The
//! reader registers every record it reads with [`AckTracker::track_read`];
//! the delivery layer reports each record it has durably forwarded with
//! [`AckTracker::confirm`]. The tracker only ever persists a bookmark whose
//! records, and every record before them, have all been confirmed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tally_core::{Bookmark, Generation, SequenceNumber, SourceId};
use tracing::error;

use crate::error::{AckError, AckResult};
use crate::storage::{BookmarkStore, PersistedBookmark};

// -----------------------------------------------------------------------------
// Kinds and Outcomes
// -----------------------------------------------------------------------------

/// Discriminant for the closed set of tracker variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckTrackerKind {
    /// Acks on read and persists the newest bookmark immediately.
    Instant,
    /// Acks on read and never persists anything.
    InstantBookmarkless,
    /// Waits for confirmations and persists the contiguous confirmed prefix.
    Consecutive,
}

impl AckTrackerKind {
    /// Returns true if trackers of this kind ever write to a bookmark store.
    #[must_use]
    pub const fn persists(self) -> bool {
        !matches!(self, Self::InstantBookmarkless)
    }
}

impl fmt::Display for AckTrackerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instant => write!(f, "instant"),
            Self::InstantBookmarkless => write!(f, "instant-bookmarkless"),
            Self::Consecutive => write!(f, "consecutive"),
        }
    }
}

/// Result of a confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The record moved from unacked to acked.
    Acked,
    /// The record was already acked; nothing changed.
    Duplicate,
    /// The record was already collected by a flush; nothing changed.
    Stale,
}

/// Result of a flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A new bookmark was written to the store.
    Persisted {
        /// Generation of the written record.
        generation: Generation,
        /// The bookmark that was written.
        through: Bookmark,
        /// Number of ledger entries removed after the write.
        collected: u64,
    },
    /// The safe bookmark has not advanced since the last write.
    Unchanged,
    /// Bookmark saving was disabled; the store was not touched.
    Disabled,
}

impl FlushOutcome {
    /// Returns true if the flush wrote to the store.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Result of a non-suspending read registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    /// The read was registered under this sequence number.
    Tracked(SequenceNumber),
    /// The window is full. The bookmark is handed back untouched.
    WindowFull(Bookmark),
}

/// Point-in-time counters for one tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckTrackerStats {
    /// Reads registered.
    pub tracked: u64,
    /// Confirmations that moved a record to acked.
    pub confirmed: u64,
    /// Confirmations for records already acked or collected.
    pub duplicate_confirms: u64,
    /// Successful bookmark writes.
    pub flushes: u64,
    /// Failed bookmark writes.
    pub flush_failures: u64,
    /// Resident (tracked but not collected) entries.
    pub pending: u64,
}

// -----------------------------------------------------------------------------
// AckTracker Trait
// -----------------------------------------------------------------------------

/// Tracks reads against confirmations and persists the safe resume position.
///
/// One reader calls `track_read`; any number of confirmers call `confirm`
/// concurrently from any thread.
#[async_trait]
pub trait AckTracker: Send + Sync {
    /// Returns which variant this is.
    fn kind(&self) -> AckTrackerKind;

    /// Registers a record that was just read.
    ///
    /// `bookmark` is the position immediately after the record. May suspend
    /// while the pending window is full.
    ///
    /// # Errors
    ///
    /// Returns `Poisoned` after a contract violation, or `BookmarkTooLarge`
    /// if the bookmark exceeds the configured limit.
    async fn track_read(&self, bookmark: Bookmark) -> AckResult<SequenceNumber>;

    /// Records that the destination has accepted the record with `sequence`.
    ///
    /// Idempotent: repeating a confirmation, or confirming a record that was
    /// already collected, changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSequence` if `sequence` was never issued. The tracker
    /// is poisoned afterwards.
    fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome>;

    /// Returns the newest bookmark that is safe to resume from.
    ///
    /// That is the bookmark of the longest fully confirmed prefix of reads, or
    /// the last persisted bookmark if no newer prefix is complete.
    fn current_safe_bookmark(&self) -> Option<Bookmark>;

    /// Persists the safe bookmark if it advanced and collects covered entries.
    ///
    /// # Errors
    ///
    /// Returns `Persist` if the store rejects the write; nothing is collected
    /// and the next flush retries. Returns `Poisoned` after a contract violation.
    async fn flush(&self) -> AckResult<FlushOutcome>;

    /// Returns the number of resident entries.
    fn pending(&self) -> u64;

    /// Stops all further store writes. Flushes return `Disabled` afterwards.
    fn disable_bookmark_saving(&self);

    /// Resolves once every tracked read has been confirmed.
    async fn wait_all_acked(&self);

    /// Returns a snapshot of the tracker's counters.
    fn stats(&self) -> AckTrackerStats;
}

// -----------------------------------------------------------------------------
// Shared Plumbing
// -----------------------------------------------------------------------------

/// Checks a bookmark against the size limit before it enters a tracker.
pub(crate) fn check_bookmark_size(bookmark: &Bookmark, max: u32) -> AckResult<()> {
    if bookmark.len() > max as usize {
        return Err(AckError::BookmarkTooLarge {
            len: bookmark.len(),
            max,
        });
    }
    Ok(())
}

/// Atomic counters behind [`AckTrackerStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub(crate) tracked: AtomicU64,
    pub(crate) confirmed: AtomicU64,
    pub(crate) duplicate_confirms: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: u64) -> AckTrackerStats {
        AckTrackerStats {
            tracked: self.tracked.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            duplicate_confirms: self.duplicate_confirms.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            pending,
        }
    }
}

/// Latch set by the first contract violation.
///
/// Stores the offending sequence number; zero means healthy since sequence
/// numbers start at one.
#[derive(Debug, Default)]
pub(crate) struct Poison(AtomicU64);

impl Poison {
    /// Returns `Poisoned` if the latch is set.
    pub(crate) fn check(&self) -> AckResult<()> {
        match self.0.load(Ordering::Acquire) {
            0 => Ok(()),
            raw => Err(AckError::Poisoned {
                sequence: SequenceNumber::new(raw),
            }),
        }
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }

    /// Sets the latch for a confirmation of a sequence that was never issued
    /// and returns the error to hand back to the confirmer.
    pub(crate) fn trip(
        &self,
        source_id: SourceId,
        sequence: SequenceNumber,
        next: SequenceNumber,
    ) -> AckError {
        // Sequence zero is never issued; latch it as one so the flag sticks.
        let raw = sequence.get().max(1);
        // Keep the first violation.
        let _ = self
            .0
            .compare_exchange(0, raw, Ordering::AcqRel, Ordering::Acquire);

        error!(
            source_id = %source_id,
            sequence = %sequence,
            next = %next,
            "confirmation for unissued sequence, tracker poisoned"
        );

        AckError::UnknownSequence { sequence, next }
    }
}

/// Writes bookmarks for one source and numbers the writes.
///
/// Owned by the tracker's flush lock so writes are serialized.
pub(crate) struct BookmarkWriter {
    source_id: SourceId,
    store: Arc<dyn BookmarkStore>,
    /// Generation of the last successful write (or of the resumed record).
    generation: Generation,
    max_bookmark_bytes: u32,
}

impl BookmarkWriter {
    /// Creates a writer that continues numbering from `resumed`, if any.
    pub(crate) fn new(
        source_id: SourceId,
        store: Arc<dyn BookmarkStore>,
        resumed: Option<&PersistedBookmark>,
        max_bookmark_bytes: u32,
    ) -> Self {
        Self {
            source_id,
            store,
            generation: resumed.map_or(Generation::new(0), |r| r.generation),
            max_bookmark_bytes,
        }
    }

    pub(crate) const fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Writes `bookmark` as the next generation.
    ///
    /// The generation only advances if the store accepts the write.
    pub(crate) async fn write(&mut self, bookmark: &Bookmark) -> AckResult<Generation> {
        check_bookmark_size(bookmark, self.max_bookmark_bytes)?;

        let generation = self.generation.next();
        let record = PersistedBookmark::new(self.source_id, generation, bookmark.clone());

        self.store
            .save(&record)
            .await
            .map_err(|e| AckError::Persist {
                generation,
                message: e.to_string(),
            })?;

        self.generation = generation;
        Ok(generation)
    }
}
