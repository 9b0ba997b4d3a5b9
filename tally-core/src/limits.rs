//! System limits and configuration bounds.
//!
//! Following TigerStyle: put limits on everything.
//! The pending window, the size of a bookmark and the drain timeout all have
//! explicit maximums so a stalled destination cannot grow memory without bound.

/// System-wide limits for Tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    // Tracking limits.
    /// Maximum number of resident (read but not collected) entries per tracker.
    pub max_window_size: u32,
    /// Window size used when a source does not configure one.
    pub default_window_size: u32,

    // Persistence limits.
    /// Maximum encoded size of a single bookmark in bytes.
    pub max_bookmark_bytes: u32,

    // Shutdown limits (in microseconds).
    /// Maximum time a source waits for outstanding confirmations on shutdown.
    pub max_drain_timeout_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Tracking: 1M resident entries max, 10k by default.
            max_window_size: 1_000_000,
            default_window_size: 10_000,

            // Persistence: 64KB bookmarks.
            max_bookmark_bytes: 64 * 1024,

            // Shutdown: 5min drain max.
            max_drain_timeout_us: 5 * 60 * 1_000_000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_window_size == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_window_size",
                reason: "must be positive",
            });
        }

        if self.default_window_size == 0 || self.default_window_size > self.max_window_size {
            return Err(crate::Error::InvalidArgument {
                name: "default_window_size",
                reason: "must be in 1..=max_window_size",
            });
        }

        // An offset bookmark must always fit.
        if (self.max_bookmark_bytes as usize) < crate::Bookmark::OFFSET_LEN {
            return Err(crate::Error::InvalidArgument {
                name: "max_bookmark_bytes",
                reason: "must hold at least an offset bookmark",
            });
        }

        Ok(())
    }

    /// Checks a configured pending window against `max_window_size`.
    ///
    /// # Errors
    /// Returns an error if the window is zero or above the limit.
    pub const fn check_window_size(&self, window_size: u32) -> crate::Result<()> {
        if window_size == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "window_size",
                reason: "must be positive",
            });
        }
        if window_size > self.max_window_size {
            return Err(crate::Error::LimitExceeded {
                limit: "max_window_size",
                max: self.max_window_size as u64,
                actual: window_size as u64,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
