//! Acknowledgment tracking for Tally.
//!
//! This crate knows at all times which records read from a source have been
//! durably forwarded, so the source can resume after a crash without losing
//! records or re-reading confirmed ones.
//!
//! # Overview
//!
//! - **Tracking**: The reader registers each record with `track_read` and gets
//!   a sequence number back.
//! - **Confirmation**: The delivery layer calls `confirm` with that sequence
//!   number once the destination has accepted the record, in any order and
//!   from any thread.
//! - **Flushing**: `flush` persists the bookmark of the longest confirmed
//!   prefix and frees the entries it covers.
//!
//! # Reliability Modes
//!
//! - **Instant**: A record counts as delivered when it is read. The newest
//!   bookmark is persisted on every read.
//!
//! - **Consecutive**: A record counts as delivered when it is confirmed. The
//!   persisted bookmark only moves over a contiguous run of confirmations, and
//!   a bounded window applies backpressure to the reader.
//!
//! Resources without resumable positions always get a bookmarkless tracker.
//!
//! # Example
//!
//! ```ignore
//! use tally_ack::{AckTrackerConfig, SimulatedBookmarkStore, TrackedSource};
//!
//! let store = Arc::new(SimulatedBookmarkStore::new(42));
//! let mut source =
//!     TrackedSource::open(SourceId::new(1), resource, store, &AckTrackerConfig::for_testing())
//!         .await?;
//!
//! let confirmer = source.confirmer();
//! while let Some(tracked) = source.next_record().await? {
//!     deliver(tracked.record).await?;
//!     confirmer.confirm(tracked.sequence)?;
//! }
//!
//! source.shutdown().await?;
//! ```
//!
//! # Testing
//!
//! The [`SimulatedBookmarkStore`] provides deterministic fault injection for
//! DST testing:
//!
//! ```ignore
//! use tally_ack::{BookmarkStoreFaultConfig, SimulatedBookmarkStore};
//!
//! let store = SimulatedBookmarkStore::with_faults(seed, BookmarkStoreFaultConfig::flaky());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
// Allow these for cleaner code in this crate.
#![allow(clippy::module_name_repetitions)]

mod config;
mod consecutive;
mod error;
mod factory;
mod instant;
mod ledger;
mod source;
mod storage;
mod tracker;

// Re-export public API.
pub use config::{AckTrackerConfig, ReliabilityMode};
pub use consecutive::ConsecutiveTracker;
pub use error::{AckError, AckResult};
pub use factory::{AckTrackerFactory, Tracker};
pub use instant::{BookmarklessTracker, InstantTracker};
pub use ledger::{LedgerAck, PendingEntry, PendingLedger};
pub use source::{Confirmer, ResumableResource, TrackedRecord, TrackedSource};
pub use storage::{
    BookmarkStore, BookmarkStoreFaultConfig, FileBookmarkStore, FileBookmarkStoreConfig,
    PersistedBookmark, SimulatedBookmarkStore,
};
pub use tracker::{
    AckTracker, AckTrackerKind, AckTrackerStats, ConfirmOutcome, FlushOutcome, TrackOutcome,
};
