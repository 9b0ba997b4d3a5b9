//! Tally Core - Strongly-typed identifiers, bookmarks and limits for Tally.
//!
//! This crate holds the value types shared by the tracking and persistence
//! layers. It has no I/O and no async code.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `SequenceNumber` with a `Generation`
//! - **Explicit limits**: The pending window and bookmark size have bounded maximums
//! - **Explicit types**: Use u32/u64, not usize, for anything persisted or configured
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod bookmark;
mod error;
mod limits;
mod types;

pub use bookmark::Bookmark;
pub use error::{Error, Result};
pub use limits::Limits;
pub use types::{Generation, SequenceNumber, SourceId};
