//! mmt-core
//!
//! Building blocks shared by the suffix-array phrase table and the adaptive
//! n-gram LM store (`mmt-phrasetable`, `mmt-lm`).
//!
//! Public API:
//! - `types` - word, memory, generation and stream identifiers
//! - `codec` - fixed-width byte codec and the word-sequence hash
//! - `Options` - TOML configuration of both models
//! - `StreamWatermarks` - per-stream committed positions
//! - `UpdateBatch` / `UpdateManager` - double-buffered update ingestion
//! - `GarbageCollector` - resumable reclamation of deleted memories
//! - `db` - redb helpers for metadata records
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod gc;
pub mod polling;
pub mod streams;
pub mod types;
pub mod update;

pub use config::{LmOptions, Options, PhraseTableOptions, UpdateOptions};
pub use error::{Error, Result};
pub use gc::{Checkpoint, GarbageCollector, Progress, Reclaimer};
pub use polling::{PollingThread, Wakeup};
pub use streams::StreamWatermarks;
pub use types::*;
pub use update::{BatchContent, BatchWriter, UpdateBatch, UpdateManager};
