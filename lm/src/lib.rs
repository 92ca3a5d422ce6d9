//! mmt-lm
//!
//! Incrementally updatable n-gram counts and the context-adaptive language
//! model built on them.
//!
//! Counts live in `ngrams.redb`, keyed by memory, generation and n-gram
//! hash. Batches merge additively; deleting a memory bumps its generation
//! and the garbage collector drops the retired keys in the background.
//!
//! Public API:
//! - `AdaptiveLm` - update pipeline plus probability queries
//! - `NGramStorage` - batched writes and count lookups
//! - `NGramTable` / `Counts` - per-memory counting of a batch
pub mod adaptive;
pub mod batch;
pub mod gc;
pub mod ngram;
pub mod storage;

pub use adaptive::{AdaptiveLm, HistoryKey, ProbabilityCache, LOG_ZERO};
pub use batch::SentenceBatch;
pub use ngram::{hash_ngram, Counts, NGramTable, WORD_COUNTS_HASH};
pub use storage::NGramStorage;
