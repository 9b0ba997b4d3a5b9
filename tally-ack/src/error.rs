//! Acknowledgment tracking error types.

use tally_core::{Generation, SequenceNumber};
use thiserror::Error;

/// Result type for tracking and persistence operations.
pub type AckResult<T> = Result<T, AckError>;

/// Errors that can occur while tracking reads or persisting bookmarks.
///
/// Backpressure is deliberately absent: a full window suspends the reader or
/// is reported through [`crate::TrackOutcome::WindowFull`], never as an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AckError {
    /// A confirmation referenced a sequence number that was never issued.
    #[error("confirmation for {sequence} which was never issued (next is {next})")]
    UnknownSequence {
        /// The sequence that was confirmed.
        sequence: SequenceNumber,
        /// The next sequence the tracker would have issued.
        next: SequenceNumber,
    },

    /// The tracker saw a contract violation and refuses further work.
    #[error("tracker poisoned by contract violation at {sequence}")]
    Poisoned {
        /// The sequence number of the offending confirmation.
        sequence: SequenceNumber,
    },

    /// The durable store rejected a bookmark write.
    #[error("failed to persist bookmark {generation}: {message}")]
    Persist {
        /// The generation that was being written.
        generation: Generation,
        /// Error message from the store.
        message: String,
    },

    /// A bookmark exceeds the configured size limit.
    #[error("bookmark of {len} bytes exceeds limit of {max} bytes")]
    BookmarkTooLarge {
        /// Encoded size of the bookmark.
        len: usize,
        /// Maximum allowed size.
        max: u32,
    },

    /// A persisted bookmark record failed validation.
    #[error("corrupt bookmark record: {reason}")]
    Corrupt {
        /// What was wrong with the record.
        reason: String,
    },

    /// The resource could not be positioned at a bookmark.
    #[error("failed to seek resource to {bookmark}: {message}")]
    Seek {
        /// Display form of the bookmark.
        bookmark: String,
        /// Error message from the resource.
        message: String,
    },

    /// The window is full and bookmark saving was disabled, so no flush can
    /// free capacity.
    #[error("window of {window} reads is full and bookmark saving is disabled")]
    SavingDisabled {
        /// Configured window size.
        window: u32,
    },

    /// Invalid configuration.
    #[error("invalid configuration '{name}': {reason}")]
    InvalidConfig {
        /// The offending setting.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// I/O error during storage or resource operation.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },
}

impl AckError {
    /// Returns true if the error means the tracker can no longer be used.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownSequence { .. } | Self::Poisoned { .. })
    }
}
