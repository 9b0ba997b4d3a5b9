//! Resumable sources.
//!
//! A [`TrackedSource`] owns one resource and exactly one tracker. On open it
//! loads the persisted bookmark and seeks the resource to it, so reading
//! resumes right after the last record known to be delivered.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{Bookmark, SequenceNumber, SourceId};
use tracing::{info, warn};

use crate::config::AckTrackerConfig;
use crate::error::{AckError, AckResult};
use crate::factory::{AckTrackerFactory, Tracker};
use crate::storage::{BookmarkStore, PersistedBookmark};
use crate::tracker::{AckTracker, AckTrackerKind, ConfirmOutcome, FlushOutcome, TrackOutcome};

// -----------------------------------------------------------------------------
// Resource Boundary
// -----------------------------------------------------------------------------

/// A readable resource that may support resuming from a bookmark.
pub trait ResumableResource: Send {
    /// One unit read from the resource.
    type Record: Send;

    /// Returns true if `bookmark` and `seek` are meaningful.
    fn supports_bookmarks(&self) -> bool;

    /// Returns the position immediately after the last record read.
    fn bookmark(&self) -> Bookmark;

    /// Positions the resource so the next read starts at `bookmark`.
    ///
    /// # Errors
    ///
    /// Returns `Seek` if the position cannot be restored.
    fn seek(&mut self, bookmark: &Bookmark) -> AckResult<()>;

    /// Reads the next record, or `None` at the end of the resource.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the resource cannot be read.
    fn read_record(&mut self) -> AckResult<Option<Self::Record>>;
}

/// A record paired with the sequence number to confirm it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRecord<T> {
    /// Pass to [`Confirmer::confirm`] once the record is delivered.
    pub sequence: SequenceNumber,
    /// The record itself.
    pub record: T,
}

// -----------------------------------------------------------------------------
// Confirmer
// -----------------------------------------------------------------------------

/// Cloneable handle the delivery layer uses to confirm records.
#[derive(Clone)]
pub struct Confirmer {
    tracker: Arc<Tracker>,
}

impl Confirmer {
    /// Confirms delivery of the record with `sequence`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSequence` if `sequence` was never issued.
    pub fn confirm(&self, sequence: SequenceNumber) -> AckResult<ConfirmOutcome> {
        self.tracker.confirm(sequence)
    }

    /// Returns the kind of tracker behind this handle.
    #[must_use]
    pub fn kind(&self) -> AckTrackerKind {
        self.tracker.kind()
    }
}

impl std::fmt::Debug for Confirmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Confirmer")
            .field("kind", &self.tracker.kind())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// Tracked Source
// -----------------------------------------------------------------------------

/// A resource whose reads are tracked until delivery is confirmed.
pub struct TrackedSource<R: ResumableResource> {
    source_id: SourceId,
    resource: R,
    tracker: Arc<Tracker>,
    drain_timeout: Duration,
    window_size: u32,
    resumed_from: Option<Bookmark>,
    /// A record read from the resource that could not be tracked yet.
    held: Option<(R::Record, Bookmark)>,
}

impl<R: ResumableResource> TrackedSource<R> {
    /// Opens a source: loads the persisted bookmark, seeks to it and builds
    /// the tracker.
    ///
    /// A corrupt record is logged and ignored; the source then starts from
    /// the beginning of the resource, replaying rather than losing records.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the store cannot be read,
    /// or the resource cannot seek to the persisted bookmark.
    pub async fn open(
        source_id: SourceId,
        mut resource: R,
        store: Arc<dyn BookmarkStore>,
        config: &AckTrackerConfig,
    ) -> AckResult<Self> {
        config.validate()?;

        let resumable = resource.supports_bookmarks();
        let resumed = if resumable {
            Self::load_resume_point(source_id, store.as_ref()).await?
        } else {
            None
        };

        if let Some(record) = &resumed {
            resource.seek(&record.bookmark)?;
            info!(
                source_id = %source_id,
                bookmark = %record.bookmark,
                generation = %record.generation,
                "resumed source from bookmark"
            );
        }

        let tracker =
            AckTrackerFactory::create(config, source_id, resumable, store, resumed.as_ref())?;

        Ok(Self {
            source_id,
            resource,
            tracker: Arc::new(tracker),
            drain_timeout: config.drain_timeout,
            window_size: config.window_size,
            resumed_from: resumed.map(|record| record.bookmark),
            held: None,
        })
    }

    async fn load_resume_point(
        source_id: SourceId,
        store: &dyn BookmarkStore,
    ) -> AckResult<Option<PersistedBookmark>> {
        match store.load().await {
            Ok(Some(record)) if record.source_id == source_id => Ok(Some(record)),
            Ok(Some(record)) => {
                warn!(
                    source_id = %source_id,
                    stored_source_id = %record.source_id,
                    "bookmark belongs to another source, starting from the beginning"
                );
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(AckError::Corrupt { reason }) => {
                warn!(
                    source_id = %source_id,
                    reason = %reason,
                    "corrupt bookmark, starting from the beginning"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns the source ID.
    #[must_use]
    pub const fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Returns the bookmark the source resumed from, if any.
    #[must_use]
    pub const fn resumed_from(&self) -> Option<&Bookmark> {
        self.resumed_from.as_ref()
    }

    /// Returns the tracker.
    #[must_use]
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Returns a handle for confirming deliveries from other tasks.
    #[must_use]
    pub fn confirmer(&self) -> Confirmer {
        Confirmer {
            tracker: Arc::clone(&self.tracker),
        }
    }

    /// Reads the next record and registers it with the tracker.
    ///
    /// When the window is full this waits for confirmations and flushes to
    /// make room. If tracking fails the record is kept and handed out again
    /// by the next call.
    ///
    /// # Errors
    ///
    /// Returns resource errors, `Poisoned`, or `Persist` if a flush needed to
    /// free the window fails. Returns `SavingDisabled` if the window is full
    /// after [`AckTracker::disable_bookmark_saving`].
    pub async fn next_record(&mut self) -> AckResult<Option<TrackedRecord<R::Record>>> {
        let (record, bookmark) = match self.held.take() {
            Some(held) => held,
            None => {
                let Some(record) = self.resource.read_record()? else {
                    return Ok(None);
                };
                (record, self.resource.bookmark())
            }
        };

        loop {
            let result = match self.tracker.try_track_read(bookmark.clone()).await {
                Ok(TrackOutcome::Tracked(sequence)) => {
                    return Ok(Some(TrackedRecord { sequence, record }));
                }
                Ok(TrackOutcome::WindowFull(_)) => {
                    self.tracker.wait_for_progress().await;
                    self.tracker.flush().await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(FlushOutcome::Persisted { .. } | FlushOutcome::Unchanged) => {}
                Ok(FlushOutcome::Disabled) => {
                    self.held = Some((record, bookmark));
                    return Err(AckError::SavingDisabled {
                        window: self.window_size,
                    });
                }
                Err(e) => {
                    self.held = Some((record, bookmark));
                    return Err(e);
                }
            }
        }
    }

    /// Persists the safe bookmark if it advanced.
    ///
    /// # Errors
    ///
    /// See [`AckTracker::flush`].
    pub async fn flush(&self) -> AckResult<FlushOutcome> {
        self.tracker.flush().await
    }

    /// Drains outstanding confirmations, writes the final bookmark and stops
    /// further writes.
    ///
    /// Waits at most the configured drain timeout. Records still unconfirmed
    /// after that are replayed on the next start.
    ///
    /// # Errors
    ///
    /// Returns the error of the final flush. Saving is disabled either way.
    pub async fn shutdown(self) -> AckResult<FlushOutcome> {
        let drained = tokio::time::timeout(self.drain_timeout, self.tracker.wait_all_acked())
            .await
            .is_ok();
        if !drained {
            warn!(
                source_id = %self.source_id,
                pending = self.tracker.pending(),
                timeout = ?self.drain_timeout,
                "drain timed out, unconfirmed records will be replayed"
            );
        }

        let outcome = self.tracker.flush().await;
        self.tracker.disable_bookmark_saving();

        let stats = self.tracker.stats();
        info!(
            source_id = %self.source_id,
            tracked = stats.tracked,
            confirmed = stats.confirmed,
            flushes = stats.flushes,
            "source shut down"
        );
        outcome
    }
}
