//! Resumable positions.
//!
//! A [`Bookmark`] is an opaque token describing where a source can resume
//! reading. For regular files it is usually a byte offset; for cursor-based
//! resources (journals, remote APIs) it is whatever the resource hands back.
//! Trackers never look inside a bookmark: they only store it, compare it for
//! equality, and copy it into durable storage.

use std::fmt;

use bytes::{Buf, Bytes};

/// Opaque, immutable, cheaply clonable resume position.
///
/// Clones share the underlying buffer, so a bookmark can sit in a tracker
/// ledger and in a flush request at the same time without copying.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bookmark(Bytes);

impl Bookmark {
    /// Length of a bookmark created by [`Bookmark::from_offset`].
    pub const OFFSET_LEN: usize = 8;

    /// Creates a bookmark from a byte offset into a seekable resource.
    #[must_use]
    pub fn from_offset(offset: u64) -> Self {
        Self(Bytes::copy_from_slice(&offset.to_be_bytes()))
    }

    /// Creates a bookmark from an opaque cursor.
    #[must_use]
    pub fn from_cursor(cursor: impl Into<Bytes>) -> Self {
        Self(cursor.into())
    }

    /// Interprets the bookmark as a byte offset.
    ///
    /// Returns `None` if the bookmark was not created from an offset.
    #[must_use]
    pub fn as_offset(&self) -> Option<u64> {
        if self.0.len() != Self::OFFSET_LEN {
            return None;
        }
        let mut buf = self.0.as_ref();
        Some(buf.get_u64())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the encoded length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the bookmark carries no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Bytes> for Bookmark {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Bookmark> for Bytes {
    fn from(bookmark: Bookmark) -> Self {
        bookmark.0
    }
}

impl fmt::Debug for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_offset() {
            Some(offset) => write!(f, "Bookmark(@{offset})"),
            None => write!(f, "Bookmark({} bytes)", self.0.len()),
        }
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_offset() {
            Some(offset) => write!(f, "@{offset}"),
            None => {
                for byte in self.0.iter().take(16) {
                    write!(f, "{byte:02x}")?;
                }
                if self.0.len() > 16 {
                    write!(f, "..")?;
                }
                Ok(())
            }
        }
    }
}
