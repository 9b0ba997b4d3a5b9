//! Windowed tracker that waits for the destination to confirm each record.
//!
//! Reads are registered in a [`PendingLedger`]. Confirmations may arrive in any
//! order; the persisted bookmark only advances over the contiguous confirmed
//! prefix. The number of resident entries is bounded by a window of permits:
//! a read takes a permit, a flush that collects entries gives them back.
//!
//! # Locking
//!
//! - The ledger sits behind a `std::sync::Mutex` with short critical sections,
//!   so `confirm` never suspends.
//! - Flushes are serialized by a `tokio::sync::Mutex` around the writer. The
//!   ledger lock is never held across the store write.

#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::cast_possible_truncation)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tally_core::{Bookmark, SequenceNumber, SourceId};
use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

use crate::config::AckTrackerConfig;
use crate::error::{AckError, AckResult};
use crate::ledger::{LedgerAck, PendingLedger};
use crate::tracker::{
    check_bookmark_size, AckTracker, AckTrackerKind, AckTrackerStats, BookmarkWriter,
    ConfirmOutcome, FlushOutcome, Poison, StatsCounters, TrackOutcome,
};

#[derive(Debug)]
struct ConsecutiveState {
    ledger: PendingLedger,
    /// Last bookmark the store accepted (or the one resumed from).
    persisted: Option<Bookmark>,
}

/// Tracker that persists only positions whose records are all confirmed.
pub struct ConsecutiveTracker {
    source_id: SourceId,
    state: Mutex<ConsecutiveState>,
    /// One permit per free slot in the window.
    window: Semaphore,
    window_size: u32,
    writer: tokio::sync::Mutex<BookmarkWriter>,
    /// Signalled when a confirmation extends the acked prefix.
    progress: Notify,
    /// Signalled when the last unacked entry is confirmed.
    all_acked: Notify,
    saving_enabled: AtomicBool,
    poison: Poison,
    stats: StatsCounters,
    max_bookmark_bytes: u32,
}

impl ConsecutiveTracker {
    /// Creates a tracker writing through `writer`.
    ///
    /// # Panics
    ///
    /// Panics if the window size is zero.
    pub(crate) fn new(
        writer: BookmarkWriter,
        persisted: Option<Bookmark>,
        config: &AckTrackerConfig,
    ) -> Self {
        // TigerStyle: Assert precondition.
        assert!(config.window_size > 0, "window size must be positive");

        Self {
            source_id: writer.source_id(),
            state: Mutex::new(ConsecutiveState {
                ledger: PendingLedger::new(),
                persisted,
            }),
            window: Semaphore::new(config.window_size as usize),
            window_size: config.window_size,
            writer: tokio::sync::Mutex::new(writer),
            progress: Notify::new(),
            all_acked: Notify::new(),
            saving_enabled: AtomicBool::new(true),
            poison: Poison::default(),
            stats: StatsCounters::default(),
            max_bookmark_bytes: config.limits.max_bookmark_bytes,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConsecutiveState> {
        self.state.lock().expect("ledger lock poisoned")
    }

    fn has_safe_point(&self) -> bool {
        self.state().ledger.safe_point().is_some()
    }

    fn is_all_acked(&self) -> bool {
        self.state().ledger.all_acked()
    }

    /// Returns the configured window size.
    #[must_use]
    pub const fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Returns the number of free slots in the window.
    #[must_use]
    pub fn available_window(&self) -> usize {
        self.window.available_permits()
    }

    fn poisoned_error(&self) -> AckError {
        self.poison.check().err().unwrap_or(AckError::Poisoned {
            sequence: SequenceNumber::new(0),
        })
    }

    /// Appends an entry. The caller must already hold a forgotten permit.
    fn append(&self, bookmark: Bookmark) -> SequenceNumber {
        let sequence = {
            let mut state = self.state();
            let sequence = state.ledger.track(bookmark);
            // TigerStyle: Assert postcondition.
            assert!(
                state.ledger.len() <= u64::from(self.window_size),
                "ledger grew past window: {} > {}",
                state.ledger.len(),
                self.window_size
            );
            sequence
        };
        StatsCounters::bump(&self.stats.tracked);
        sequence
    }

    /// Registers a read without suspending.
    ///
    /// Returns [`TrackOutcome::WindowFull`] with the bookmark handed back when
    /// no window slot is free.
    ///
    /// # Errors
    ///
    /// Returns `Poisoned` after a contract violation, or `BookmarkTooLarge`.
    pub fn try_track_read(&self, bookmark: Bookmark) -> AckResult<TrackOutcome> {
        self.poison.check()?;
        check_bookmark_size(&bookmark, self.max_bookmark_bytes)?;

        match self.window.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(TrackOutcome::Tracked(self.append(bookmark)))
            }
            Err(TryAcquireError::NoPermits) => {
                debug!(source_id = %self.source_id, window = self.window_size, "window full");
                Ok(TrackOutcome::WindowFull(bookmark))
            }
            Err(TryAcquireError::Closed) => Err(self.poisoned_error()),
        }
    }

    /// Resolves once a flush would collect at least one entry.
    ///
    /// Also resolves if the tracker is poisoned, so a blocked reader can
    /// observe the error.
    pub async fn wait_for_progress(&self) {
        loop {
            let notified = self.progress.notified();
            if self.poison.is_set() || self.has_safe_point() {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl AckTracker for ConsecutiveTracker {
    fn kind(&self) -> AckTrackerKind {
        AckTrackerKind::Consecutive
    }

    async fn track_read(&self, bookmark: Bookmark) -> AckResult<SequenceNumber> {
        self.poison.check()?;
        check_bookmark_size(&bookmark, self.max_bookmark_bytes)?;

        // Suspends while the window is full. The semaphore is closed on poison.
        let permit = self
            .window
            .acquire()
            .await
            .map_err(|_| self.poisoned_error())?;
        permit.forget();

        Ok(self.append(bookmark))
    }

    fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome> {
        let (result, next, all_acked) = {
            let mut state = self.state();
            let result = state.ledger.ack(sequence);
            (
                result,
                state.ledger.next_sequence(),
                state.ledger.all_acked(),
            )
        };

        match result {
            LedgerAck::Acked => {
                StatsCounters::bump(&self.stats.confirmed);
                self.progress.notify_waiters();
                if all_acked {
                    self.all_acked.notify_waiters();
                }
                Ok(ConfirmOutcome::Acked)
            }
            LedgerAck::AlreadyAcked => {
                StatsCounters::bump(&self.stats.duplicate_confirms);
                debug!(source_id = %self.source_id, sequence = %sequence, "duplicate confirmation");
                Ok(ConfirmOutcome::Duplicate)
            }
            LedgerAck::Collected => {
                StatsCounters::bump(&self.stats.duplicate_confirms);
                debug!(source_id = %self.source_id, sequence = %sequence, "confirmation for collected entry");
                Ok(ConfirmOutcome::Stale)
            }
            LedgerAck::Unknown => {
                let err = self.poison.trip(self.source_id, sequence, next);
                // Wake everything that could otherwise wait forever.
                self.window.close();
                self.progress.notify_waiters();
                self.all_acked.notify_waiters();
                Err(err)
            }
        }
    }

    fn current_safe_bookmark(&self) -> Option<Bookmark> {
        let state = self.state();
        state
            .ledger
            .safe_point()
            .map(|entry| entry.bookmark.clone())
            .or_else(|| state.persisted.clone())
    }

    async fn flush(&self) -> AckResult<FlushOutcome> {
        self.poison.check()?;

        let mut writer = self.writer.lock().await;
        if !self.saving_enabled.load(Ordering::Acquire) {
            return Ok(FlushOutcome::Disabled);
        }
        self.poison.check()?;

        // Every flush collects the prefix it writes, so any safe point is new.
        let safe_point = {
            let state = self.state();
            state
                .ledger
                .safe_point()
                .map(|entry| (entry.sequence, entry.bookmark.clone()))
        };
        let Some((through, bookmark)) = safe_point else {
            return Ok(FlushOutcome::Unchanged);
        };

        // Confirmations keep flowing during the write. Entries up to `through`
        // can only stay acked, so collecting them afterwards is safe.
        let generation = match writer.write(&bookmark).await {
            Ok(generation) => generation,
            Err(e) => {
                StatsCounters::bump(&self.stats.flush_failures);
                warn!(
                    source_id = %self.source_id,
                    through = %through,
                    error = %e,
                    "bookmark flush failed, entries kept for retry"
                );
                return Err(e);
            }
        };

        let collected = {
            let mut state = self.state();
            state.persisted = Some(bookmark.clone());
            state.ledger.collect_through(through)
        };
        self.window.add_permits(collected as usize);
        StatsCounters::bump(&self.stats.flushes);

        debug!(
            source_id = %self.source_id,
            generation = %generation,
            through = %through,
            bookmark = %bookmark,
            collected,
            "bookmark persisted"
        );

        Ok(FlushOutcome::Persisted {
            generation,
            through: bookmark,
            collected,
        })
    }

    fn pending(&self) -> u64 {
        self.state().ledger.len()
    }

    fn disable_bookmark_saving(&self) {
        if self.saving_enabled.swap(false, Ordering::AcqRel) {
            info!(source_id = %self.source_id, pending = self.pending(), "bookmark saving disabled");
        }
    }

    async fn wait_all_acked(&self) {
        loop {
            let notified = self.all_acked.notified();
            if self.poison.is_set() || self.is_all_acked() {
                return;
            }
            notified.await;
        }
    }

    fn stats(&self) -> AckTrackerStats {
        self.stats.snapshot(self.pending())
    }
}
