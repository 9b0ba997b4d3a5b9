//! Reusable test scenarios for Tally simulation.
//!
//! Scenarios provide seeds, confirmation orderings and in-memory resources
//! that can be composed to build tracker tests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tally_ack::{AckError, AckResult, ResumableResource};
use tally_core::Bookmark;

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u32 = 100;
}

/// Returns `1..=count` in a seeded random order.
#[must_use]
pub fn shuffled(count: u64, seed: u64) -> Vec<u64> {
    let mut order: Vec<u64> = (1..=count).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    order
}

// -----------------------------------------------------------------------------
// Line Resource
// -----------------------------------------------------------------------------

/// An in-memory log of numbered lines.
///
/// The bookmark after line `n` (1-based) is the offset `n`, so a bookmark
/// names exactly how many lines have been consumed.
#[derive(Debug, Clone)]
pub struct LineResource {
    lines: Vec<String>,
    position: u64,
    resumable: bool,
    /// Every seek performed, for assertions.
    pub seeks: Vec<Bookmark>,
}

impl LineResource {
    /// Creates a resumable resource with `count` lines `line-1..=line-count`.
    #[must_use]
    pub fn numbered(count: u64) -> Self {
        Self {
            lines: (1..=count).map(|n| format!("line-{n}")).collect(),
            position: 0,
            resumable: true,
            seeks: Vec::new(),
        }
    }

    /// Builder: mark the resource as not supporting bookmarks.
    #[must_use]
    pub fn not_resumable(mut self) -> Self {
        self.resumable = false;
        self
    }

    /// Returns the number of lines consumed so far.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.position
    }
}

impl ResumableResource for LineResource {
    type Record = String;

    fn supports_bookmarks(&self) -> bool {
        self.resumable
    }

    fn bookmark(&self) -> Bookmark {
        Bookmark::from_offset(self.position)
    }

    fn seek(&mut self, bookmark: &Bookmark) -> AckResult<()> {
        let offset = bookmark.as_offset().ok_or_else(|| AckError::Seek {
            bookmark: bookmark.to_string(),
            message: "expected an offset bookmark".into(),
        })?;
        if offset > self.lines.len() as u64 {
            return Err(AckError::Seek {
                bookmark: bookmark.to_string(),
                message: format!("past end of {} lines", self.lines.len()),
            });
        }
        self.position = offset;
        self.seeks.push(bookmark.clone());
        Ok(())
    }

    fn read_record(&mut self) -> AckResult<Option<Self::Record>> {
        let Ok(index) = usize::try_from(self.position) else {
            return Ok(None);
        };
        let line = self.lines.get(index).cloned();
        if line.is_some() {
            self.position += 1;
        }
        Ok(line)
    }
}
