//! Bookmark persistence.
//!
//! Provides the `BookmarkStore` trait for persisting the resume position of a
//! source, the on-disk record format, `FileBookmarkStore` for production and
//! `SimulatedBookmarkStore` for deterministic simulation testing.
//!
//! # Record Format
//!
//! ```text
//! [magic: 4][version: 4][source_id: 8][generation: 8]
//! [bookmark_len: 4][bookmark: bookmark_len]
//! [crc32: 4]
//! ```
//!
//! All integers are big-endian. The checksum covers everything before it.

#![allow(clippy::significant_drop_tightening)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tally_core::{Bookmark, Generation, SourceId};
use tokio::io::AsyncWriteExt;

use crate::error::{AckError, AckResult};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes for bookmark record format.
const BOOKMARK_MAGIC: u32 = 0x5441_4C59; // "TALY"

/// Current version of the bookmark record format.
const BOOKMARK_VERSION: u32 = 1;

/// Header size: magic + version + `source_id` + generation + length.
const HEADER_SIZE: usize = 4 + 4 + 8 + 8 + 4;

/// Checksum trailer size.
const CHECKSUM_SIZE: usize = 4;

// =============================================================================
// Persisted Bookmark
// =============================================================================

/// A bookmark as written to durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedBookmark {
    /// Source the bookmark belongs to.
    pub source_id: SourceId,
    /// Flush generation that produced this record.
    pub generation: Generation,
    /// The resume position.
    pub bookmark: Bookmark,
}

impl PersistedBookmark {
    /// Creates a new record.
    #[must_use]
    pub const fn new(source_id: SourceId, generation: Generation, bookmark: Bookmark) -> Self {
        Self {
            source_id,
            generation,
            bookmark,
        }
    }

    /// Serializes the record to bytes.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.bookmark.len() + CHECKSUM_SIZE);

        buf.put_u32(BOOKMARK_MAGIC);
        buf.put_u32(BOOKMARK_VERSION);
        buf.put_u64(self.source_id.get());
        buf.put_u64(self.generation.get());

        // Safe: bookmark size is bounded by max_bookmark_bytes which is a u32.
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32(self.bookmark.len() as u32);
        buf.put_slice(self.bookmark.as_bytes());

        let checksum = crc32fast::hash(&buf);
        buf.put_u32(checksum);

        buf.freeze()
    }

    /// Deserializes a record.
    ///
    /// # Errors
    ///
    /// Returns `Corrupt` if the data is truncated, the magic or version do not
    /// match, the checksum is wrong, or the bookmark exceeds `max_bookmark_bytes`.
    pub fn decode(data: &[u8], max_bookmark_bytes: u32) -> AckResult<Self> {
        if data.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(corrupt(format!(
                "data too short: {} bytes, minimum {}",
                data.len(),
                HEADER_SIZE + CHECKSUM_SIZE
            )));
        }

        // Verify checksum first.
        let (payload, trailer) = data.split_at(data.len() - CHECKSUM_SIZE);
        let expected = crc32fast::hash(payload);
        let stored = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if expected != stored {
            return Err(corrupt(format!(
                "checksum mismatch: expected {expected:#x}, got {stored:#x}"
            )));
        }

        let mut buf = payload;

        let magic = buf.get_u32();
        if magic != BOOKMARK_MAGIC {
            return Err(corrupt(format!(
                "invalid magic: {magic:#x}, expected {BOOKMARK_MAGIC:#x}"
            )));
        }

        let version = buf.get_u32();
        if version != BOOKMARK_VERSION {
            return Err(corrupt(format!(
                "unsupported version: {version}, expected {BOOKMARK_VERSION}"
            )));
        }

        let source_id = SourceId::new(buf.get_u64());
        let generation = Generation::new(buf.get_u64());
        let len = buf.get_u32();

        if len > max_bookmark_bytes {
            return Err(corrupt(format!(
                "bookmark length {len} exceeds limit {max_bookmark_bytes}"
            )));
        }
        if buf.remaining() != len as usize {
            return Err(corrupt(format!(
                "bookmark length {len} does not match remaining {} bytes",
                buf.remaining()
            )));
        }

        let bookmark = Bookmark::from_cursor(Bytes::copy_from_slice(buf));
        Ok(Self::new(source_id, generation, bookmark))
    }
}

fn corrupt(reason: String) -> AckError {
    AckError::Corrupt { reason }
}

// =============================================================================
// BookmarkStore Trait
// =============================================================================

/// Durable storage for a single source's resume position.
///
/// `save` must replace the previous record atomically: if the process dies
/// mid-write, `load` still returns the previous record.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Loads the persisted record.
    ///
    /// Returns `None` if nothing has been saved yet.
    async fn load(&self) -> AckResult<Option<PersistedBookmark>>;

    /// Replaces the persisted record.
    async fn save(&self, record: &PersistedBookmark) -> AckResult<()>;

    /// Removes the persisted record. No-op if nothing is saved.
    async fn clear(&self) -> AckResult<()>;
}

// =============================================================================
// File Store
// =============================================================================

/// Configuration for file-based bookmark storage.
#[derive(Debug, Clone)]
pub struct FileBookmarkStoreConfig {
    /// Path of the bookmark file.
    pub path: PathBuf,

    /// Whether to call fsync after writes for durability.
    ///
    /// Default: `true` for safety. Set to `false` for faster tests.
    pub sync_on_write: bool,

    /// Create the parent directory if it doesn't exist.
    ///
    /// Default: `true`.
    pub create_if_missing: bool,

    /// Largest bookmark accepted when loading.
    pub max_bookmark_bytes: u32,
}

impl FileBookmarkStoreConfig {
    /// Creates a new configuration with safe defaults.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sync_on_write: true,
            create_if_missing: true,
            max_bookmark_bytes: tally_core::Limits::new().max_bookmark_bytes,
        }
    }

    /// Creates a configuration optimized for testing (no fsync).
    #[must_use]
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            sync_on_write: false,
            ..Self::new(path)
        }
    }
}

/// Bookmark storage backed by a single local file.
///
/// Writes go to a temp file next to the target which is then renamed over it,
/// so a crash mid-write leaves the previous record intact.
#[derive(Debug, Clone)]
pub struct FileBookmarkStore {
    config: FileBookmarkStoreConfig,
}

impl FileBookmarkStore {
    /// Creates a new file store.
    ///
    /// # Errors
    ///
    /// Returns an error if `create_if_missing` is true and directory creation fails.
    ///
    /// # Panics
    ///
    /// Panics if `path` is empty.
    pub async fn new(config: FileBookmarkStoreConfig) -> AckResult<Self> {
        assert!(
            !config.path.as_os_str().is_empty(),
            "bookmark path must not be empty"
        );

        if config.create_if_missing {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| AckError::Io {
                            operation: "create_bookmark_dir",
                            message: format!(
                                "failed to create directory '{}': {e}",
                                parent.display()
                            ),
                        })?;
                }
            }
        }

        Ok(Self { config })
    }

    /// Returns the bookmark file path.
    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.config.path
    }

    fn temp_path(&self) -> PathBuf {
        self.config.path.with_extension("tmp")
    }
}

#[async_trait]
impl BookmarkStore for FileBookmarkStore {
    async fn load(&self) -> AckResult<Option<PersistedBookmark>> {
        let data = match tokio::fs::read(&self.config.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AckError::Io {
                    operation: "load_bookmark",
                    message: format!("failed to read '{}': {e}", self.config.path.display()),
                })
            }
        };

        PersistedBookmark::decode(&data, self.config.max_bookmark_bytes).map(Some)
    }

    async fn save(&self, record: &PersistedBookmark) -> AckResult<()> {
        let temp_path = self.temp_path();
        let data = record.encode();

        // Write to temp file first, then rename for atomicity.
        let write_result = async {
            let mut file =
                tokio::fs::File::create(&temp_path)
                    .await
                    .map_err(|e| AckError::Io {
                        operation: "save_bookmark",
                        message: format!("failed to create temp file: {e}"),
                    })?;

            file.write_all(&data).await.map_err(|e| AckError::Io {
                operation: "save_bookmark",
                message: format!("failed to write data: {e}"),
            })?;

            if self.config.sync_on_write {
                file.sync_all().await.map_err(|e| AckError::Io {
                    operation: "save_bookmark",
                    message: format!("failed to sync file: {e}"),
                })?;
            }

            Ok::<(), AckError>(())
        }
        .await;

        // Clean up temp file on error.
        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        // Atomic rename.
        tokio::fs::rename(&temp_path, &self.config.path)
            .await
            .map_err(|e| AckError::Io {
                operation: "save_bookmark",
                message: format!("failed to rename temp file: {e}"),
            })
    }

    async fn clear(&self) -> AckResult<()> {
        match tokio::fs::remove_file(&self.config.path).await {
            Ok(()) => Ok(()),
            // Idempotent: clearing a missing file succeeds.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AckError::Io {
                operation: "clear_bookmark",
                message: format!("failed to delete '{}': {e}", self.config.path.display()),
            }),
        }
    }
}

// =============================================================================
// Fault Configuration
// =============================================================================

/// Fault configuration for simulated bookmark store.
#[derive(Debug, Clone, Default)]
pub struct BookmarkStoreFaultConfig {
    /// Probability of load operations failing (0.0 - 1.0).
    pub load_fail_rate: f64,
    /// Probability of save operations failing (0.0 - 1.0).
    pub save_fail_rate: f64,
    /// Force next load to fail (one-shot).
    pub force_load_fail: bool,
    /// Force next save to fail (one-shot).
    pub force_save_fail: bool,
}

impl BookmarkStoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            load_fail_rate: 0.0,
            save_fail_rate: 0.0,
            force_load_fail: false,
            force_save_fail: false,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            load_fail_rate: 0.05,
            save_fail_rate: 0.1,
            force_load_fail: false,
            force_save_fail: false,
        }
    }

    /// Builder: set load fail rate.
    #[must_use]
    pub const fn with_load_fail_rate(mut self, rate: f64) -> Self {
        self.load_fail_rate = rate;
        self
    }

    /// Builder: set save fail rate.
    #[must_use]
    pub const fn with_save_fail_rate(mut self, rate: f64) -> Self {
        self.save_fail_rate = rate;
        self
    }
}

// =============================================================================
// Simulated Store
// =============================================================================

/// In-memory simulated bookmark store for DST.
///
/// Clones share state via `Arc`, so a test can keep a handle while the tracker
/// owns another. Records are kept in encoded form so every load goes through
/// the real codec.
#[derive(Debug, Clone)]
pub struct SimulatedBookmarkStore {
    /// Encoded record, if any.
    data: Arc<Mutex<Option<Bytes>>>,
    /// Fault configuration.
    fault_config: Arc<Mutex<BookmarkStoreFaultConfig>>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
    /// Number of save calls, successful or not.
    save_count: Arc<AtomicU64>,
}

impl SimulatedBookmarkStore {
    /// Creates a new simulated store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, BookmarkStoreFaultConfig::none())
    }

    /// Creates a simulated store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: BookmarkStoreFaultConfig) -> Self {
        Self {
            data: Arc::new(Mutex::new(None)),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            save_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> std::sync::MutexGuard<'_, BookmarkStoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Deterministic RNG: `(seed + counter) * M`.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Returns the stored record (bypasses faults, for assertions in tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned or the stored bytes do not decode.
    #[must_use]
    pub fn stored(&self) -> Option<PersistedBookmark> {
        let data = self.data.lock().expect("data lock poisoned");
        data.as_ref().map(|bytes| {
            PersistedBookmark::decode(bytes, u32::MAX).expect("stored record must decode")
        })
    }

    /// Overwrites the stored bytes (for corruption tests).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn put_raw(&self, bytes: impl Into<Bytes>) {
        *self.data.lock().expect("data lock poisoned") = Some(bytes.into());
    }

    /// Returns the number of save calls made against this store.
    #[must_use]
    pub fn save_count(&self) -> u64 {
        self.save_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BookmarkStore for SimulatedBookmarkStore {
    async fn load(&self) -> AckResult<Option<PersistedBookmark>> {
        let load_fail_rate = {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_load_fail {
                config.force_load_fail = false;
                return Err(AckError::Io {
                    operation: "load_bookmark",
                    message: "simulated failure (forced)".into(),
                });
            }
            config.load_fail_rate
        };

        if self.should_inject_fault(load_fail_rate) {
            return Err(AckError::Io {
                operation: "load_bookmark",
                message: "simulated failure (random)".into(),
            });
        }

        let data = self.data.lock().expect("data lock poisoned");
        data.as_ref()
            .map(|bytes| PersistedBookmark::decode(bytes, u32::MAX))
            .transpose()
    }

    async fn save(&self, record: &PersistedBookmark) -> AckResult<()> {
        self.save_count.fetch_add(1, Ordering::Relaxed);

        let save_fail_rate = {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_save_fail {
                config.force_save_fail = false;
                return Err(AckError::Io {
                    operation: "save_bookmark",
                    message: "simulated failure (forced)".into(),
                });
            }
            config.save_fail_rate
        };

        if self.should_inject_fault(save_fail_rate) {
            return Err(AckError::Io {
                operation: "save_bookmark",
                message: "simulated failure (random)".into(),
            });
        }

        let mut data = self.data.lock().expect("data lock poisoned");
        *data = Some(record.encode());
        Ok(())
    }

    async fn clear(&self) -> AckResult<()> {
        let mut data = self.data.lock().expect("data lock poisoned");
        *data = None;
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
