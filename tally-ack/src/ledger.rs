//! Pending entry ledger.
//!
//! The ledger holds one entry per record that has been read but not yet
//! collected by a flush. Entries are kept in a `VecDeque` in strictly
//! increasing sequence order without gaps, so the entry for a sequence number
//! is found by subtracting the front sequence: confirmation is O(1).
//!
//! The safe point (the last entry of the contiguous acked prefix) is tracked
//! with a cursor that only moves forward as confirmations fill gaps. A flush
//! collects the prefix, which shifts the cursor back by exactly the number of
//! entries removed.
//!
//! ```text
//!   front                                   back
//!   ┌─────┬─────┬─────┬─────┬─────┬─────┐
//!   │ 7 ✓ │ 8 ✓ │ 9 ✗ │10 ✓ │11 ✗ │12 ✓ │
//!   └─────┴─────┴─────┴─────┴─────┴─────┘
//!                  ▲
//!                  acked_prefix = 2, safe point = seq 8
//! ```

#![allow(clippy::cast_possible_truncation)]

use std::collections::VecDeque;

use tally_core::{Bookmark, SequenceNumber};

// -----------------------------------------------------------------------------
// Pending Entry
// -----------------------------------------------------------------------------

/// A record that has been read and not yet collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    /// Sequence number assigned at read time.
    pub sequence: SequenceNumber,
    /// Position to resume from once this record and all before it are delivered.
    pub bookmark: Bookmark,
    /// Whether the destination has confirmed this record.
    pub acked: bool,
}

impl PendingEntry {
    /// Creates a new unacked entry.
    #[must_use]
    pub const fn new(sequence: SequenceNumber, bookmark: Bookmark) -> Self {
        Self {
            sequence,
            bookmark,
            acked: false,
        }
    }
}

// -----------------------------------------------------------------------------
// Ledger Ack Result
// -----------------------------------------------------------------------------

/// Result of marking a sequence number as acked in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerAck {
    /// The entry moved from unacked to acked.
    Acked,
    /// The entry was already acked.
    AlreadyAcked,
    /// The entry was issued but has already been collected.
    Collected,
    /// The sequence number was never issued.
    Unknown,
}

// -----------------------------------------------------------------------------
// Pending Ledger
// -----------------------------------------------------------------------------

/// Ordered ledger of pending entries with a forward-only acked cursor.
#[derive(Debug, Clone)]
pub struct PendingLedger {
    /// Resident entries, strictly increasing by sequence, no gaps.
    entries: VecDeque<PendingEntry>,
    /// Next sequence number to hand out.
    next_sequence: SequenceNumber,
    /// Length of the contiguous acked run at the front of `entries`.
    acked_prefix: usize,
    /// Number of resident entries not yet acked.
    unacked: u64,
}

impl PendingLedger {
    /// Creates an empty ledger. The first tracked read gets [`SequenceNumber::FIRST`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_sequence: SequenceNumber::FIRST,
            acked_prefix: 0,
            unacked: 0,
        }
    }

    /// Allocates the next sequence number and appends an unacked entry for it.
    pub fn track(&mut self, bookmark: Bookmark) -> SequenceNumber {
        let sequence = self.next_sequence;
        self.insert(PendingEntry::new(sequence, bookmark));
        self.next_sequence = sequence.next();
        sequence
    }

    /// Appends an entry.
    ///
    /// # Panics
    ///
    /// Panics if the entry's sequence number is not exactly the next one to be
    /// issued. Two entries sharing a sequence number means the allocation is
    /// broken and continuing could persist a position past undelivered records.
    fn insert(&mut self, entry: PendingEntry) {
        // TigerStyle: Assert preconditions.
        assert!(
            entry.sequence == self.next_sequence,
            "sequence allocation violated: inserting {} but next is {}",
            entry.sequence,
            self.next_sequence
        );
        assert!(
            self.entries
                .back()
                .map_or(true, |back| back.sequence < entry.sequence),
            "duplicate sequence {} in ledger",
            entry.sequence
        );
        assert!(!entry.acked, "new entries must start unacked");

        self.entries.push_back(entry);
        self.unacked += 1;
    }

    /// Marks the entry for `sequence` as acked and advances the cursor.
    pub fn ack(&mut self, sequence: SequenceNumber) -> LedgerAck {
        if sequence < SequenceNumber::FIRST || sequence >= self.next_sequence {
            return LedgerAck::Unknown;
        }

        let Some(front) = self.entries.front() else {
            // Issued, but nothing is resident: it was collected.
            return LedgerAck::Collected;
        };
        let Some(index) = sequence.distance_from(front.sequence) else {
            return LedgerAck::Collected;
        };

        // No gaps among resident entries, and sequence < next_sequence.
        let index = index as usize;
        assert!(index < self.entries.len(), "ledger has a gap at {sequence}");

        let entry = &mut self.entries[index];
        debug_assert_eq!(entry.sequence, sequence);
        if entry.acked {
            return LedgerAck::AlreadyAcked;
        }

        entry.acked = true;
        self.unacked -= 1;
        self.advance_cursor();
        LedgerAck::Acked
    }

    /// Moves the cursor over newly contiguous acked entries.
    fn advance_cursor(&mut self) {
        while self.acked_prefix < self.entries.len() && self.entries[self.acked_prefix].acked {
            self.acked_prefix += 1;
        }
    }

    /// Returns the last entry of the contiguous acked prefix.
    ///
    /// This is the only position that is safe to persist: every record up to
    /// and including it has been confirmed.
    #[must_use]
    pub fn safe_point(&self) -> Option<&PendingEntry> {
        self.acked_prefix
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
    }

    /// Removes every entry up to and including `through`.
    ///
    /// Returns the number of entries removed.
    ///
    /// # Panics
    ///
    /// Panics if `through` lies beyond the acked prefix.
    pub fn collect_through(&mut self, through: SequenceNumber) -> u64 {
        let Some(front) = self.entries.front() else {
            return 0;
        };
        let Some(distance) = through.distance_from(front.sequence) else {
            return 0;
        };

        let count = distance as usize + 1;
        // TigerStyle: Assert precondition.
        assert!(
            count <= self.acked_prefix,
            "cannot collect through {through}: only {} contiguous entries acked",
            self.acked_prefix
        );

        self.entries.drain(..count);
        self.acked_prefix -= count;

        // TigerStyle: Assert postcondition.
        assert!(
            self.entries.front().map_or(true, |e| e.sequence > through),
            "collected entries must not remain resident"
        );

        count as u64
    }

    /// Returns the number of resident entries.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Returns true if no entries are resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the number of resident entries still waiting for confirmation.
    #[must_use]
    pub const fn unacked(&self) -> u64 {
        self.unacked
    }

    /// Returns true if every issued sequence number has been confirmed.
    #[must_use]
    pub const fn all_acked(&self) -> bool {
        self.unacked == 0
    }

    /// Returns the next sequence number the ledger will issue.
    #[must_use]
    pub const fn next_sequence(&self) -> SequenceNumber {
        self.next_sequence
    }

    /// Returns the oldest resident entry.
    #[must_use]
    pub fn front(&self) -> Option<&PendingEntry> {
        self.entries.front()
    }

    /// Iterates over resident entries in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &PendingEntry> {
        self.entries.iter()
    }
}

impl Default for PendingLedger {
    fn default() -> Self {
        Self::new()
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
