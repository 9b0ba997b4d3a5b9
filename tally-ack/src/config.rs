//! Tracker configuration.

use std::time::Duration;

use tally_core::Limits;

use crate::error::{AckError, AckResult};

// -----------------------------------------------------------------------------
// Reliability Mode
// -----------------------------------------------------------------------------

/// How a source wants its reads acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityMode {
    /// A record counts as delivered as soon as it is read.
    ///
    /// The newest bookmark is persisted immediately. On crash, records that
    /// were read but not yet delivered are lost.
    #[default]
    Instant,

    /// A record counts as delivered only once the destination confirms it.
    ///
    /// Confirmations may arrive in any order; the persisted bookmark only
    /// advances over a contiguous run of confirmed records.
    Consecutive,
}

// -----------------------------------------------------------------------------
// Tracker Config
// -----------------------------------------------------------------------------

/// Configuration for acknowledgment tracking of one source.
#[derive(Debug, Clone)]
pub struct AckTrackerConfig {
    /// Reliability mode requested by the source.
    pub mode: ReliabilityMode,
    /// Maximum resident entries for the consecutive tracker.
    pub window_size: u32,
    /// How long shutdown waits for outstanding confirmations.
    pub drain_timeout: Duration,
    /// System limits the settings are checked against.
    pub limits: Limits,
}

impl AckTrackerConfig {
    /// Creates config for the given mode with default limits.
    #[must_use]
    pub const fn new(mode: ReliabilityMode) -> Self {
        Self::from_limits(&Limits::new(), mode)
    }

    /// Creates config from system limits.
    #[must_use]
    pub const fn from_limits(limits: &Limits, mode: ReliabilityMode) -> Self {
        Self {
            mode,
            window_size: limits.default_window_size,
            drain_timeout: Duration::from_secs(30),
            limits: *limits,
        }
    }

    /// Creates config for testing: consecutive mode, small window, short drain.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            mode: ReliabilityMode::Consecutive,
            window_size: 16,
            drain_timeout: Duration::from_millis(200),
            limits: Limits::new(),
        }
    }

    /// Builder: set the reliability mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ReliabilityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Builder: set the window size.
    #[must_use]
    pub const fn with_window_size(mut self, window_size: u32) -> Self {
        self.window_size = window_size;
        self
    }

    /// Builder: set the drain timeout.
    #[must_use]
    pub const fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Validates the settings against the configured limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the window or drain timeout are out of range,
    /// or if the limits themselves are inconsistent.
    pub fn validate(&self) -> AckResult<()> {
        self.limits.validate().map_err(|e| AckError::InvalidConfig {
            name: "limits",
            reason: e.to_string(),
        })?;

        self.limits
            .check_window_size(self.window_size)
            .map_err(|e| AckError::InvalidConfig {
                name: "window_size",
                reason: e.to_string(),
            })?;

        let max_drain = Duration::from_micros(self.limits.max_drain_timeout_us);
        if self.drain_timeout > max_drain {
            return Err(AckError::InvalidConfig {
                name: "drain_timeout",
                reason: format!("{:?} exceeds {max_drain:?}", self.drain_timeout),
            });
        }

        Ok(())
    }
}

impl Default for AckTrackerConfig {
    fn default() -> Self {
        Self::new(ReliabilityMode::default())
    }
}
