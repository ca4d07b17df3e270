//! # fragstore
//!
//! An embedded content store for small binary blobs (rendered fragments,
//! cached files) under string keys, with:
//! - Append-only segment files rotated by size
//! - A durable key → location index (write-ahead log, replay, compaction)
//! - Background segment compaction reclaiming overwritten records
//! - An optional bounded LRU cache with its own snapshot/journal
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Engine (set / get)                    │
//! └───────┬──────────────────────┬─────────────────────┬────────┘
//!         │                      │                     │
//!         ▼                      ▼                     ▼
//!  ┌─────────────┐        ┌─────────────┐       ┌─────────────┐
//!  │  Segments   │        │    Index    │       │BoundedCache │
//!  │ (append,    │◄──────►│ (RwLock map │       │ (LRU + rdb) │
//!  │  rotate)    │        │  + log)     │       └─────────────┘
//!  └──────▲──────┘        └──────▲──────┘
//!         │                      │
//!         └──────┬───────────────┘
//!         ┌──────┴──────┐
//!         │  Compactor  │   (background, periodic)
//!         └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod segment;
pub mod index;
pub mod compactor;
pub mod cache;
pub mod scheduler;
pub mod engine;

mod fsutil;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{FormatError, FragError, Result};
pub use config::Config;
pub use engine::{Engine, EngineStats, Maintenance};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of fragstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
