//! Strongly-typed identifiers for Tally entities.
//!
//! Following `TigerStyle`: explicit types prevent bugs from mixing up IDs.
//! A sequence number and a flush generation are both counters, but they
//! must never be compared with each other.

use std::fmt;

/// Macro to generate strongly-typed counter wrappers.
///
/// Each type wraps a u64 and provides:
/// - Type safety (can't mix `SequenceNumber` with `Generation`)
/// - Debug/Display formatting with a short prefix
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new value from a raw u64.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next value in sequence.
            ///
            /// # Panics
            /// Panics if the value would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Read tracking.
define_id!(
    SequenceNumber,
    "seq",
    "Per-tracker read counter. Assigned at read time, reset on restart."
);

// Sources and persistence.
define_id!(SourceId, "source", "Unique identifier for a tracked log source.");
define_id!(
    Generation,
    "gen",
    "Counter of successful bookmark flushes for one source."
);

impl SequenceNumber {
    /// The first sequence number handed out by a fresh tracker.
    pub const FIRST: Self = Self(1);

    /// Returns the distance from `base` to `self`, or `None` if `self < base`.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}
