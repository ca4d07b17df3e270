//! Index Module
//!
//! Fast key lookup plus crash-durable persistence of key → location.
//!
//! ## Responsibilities
//! - Append every mutation to the index log before it becomes visible
//! - Serve lookups from memory under a read lock
//! - Replay the log on startup (last write wins)
//! - Periodically rewrite the log without superseded entries
//!
//! ## File Format
//! The log is a sequence of ordinary records:
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ [magic][keyLen][valueLen][key][bincode(entry)]    │  put
//! │ [magic][keyLen][0]       [key]                    │  remove
//! └──────────────────────────────────────────────────┘
//! ```

mod entry;
mod log;
mod store;

pub use entry::IndexEntry;
pub use log::{replay, replay_prefix, IndexTable, ReplayReport};
pub use store::{IndexCompaction, IndexStore};
