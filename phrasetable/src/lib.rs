//! mmt-phrasetable
//!
//! Incrementally updatable suffix-array phrase table.
//!
//! Sentence pairs are appended to one memory-mapped bucket per memory
//! generation under `<model>/storage/`; `index.redb` maps fixed-length word
//! prefixes to postings into those buckets, keeps global target phrase
//! counts, the storage manifest, stream watermarks and deletion markers.
//!
//! Public API:
//! - `PhraseTable` - update pipeline plus translation option lookup
//! - `SuffixArray` - batched writes, sampling and occurrence counts
//! - `Collector` - word-by-word phrase extension for the decoder
//! - `TranslationOptionBuilder` / `OrientationCounts` - sample aggregation
pub mod batch;
pub mod bucket;
pub mod collector;
pub mod corpora;
pub mod cursor;
pub mod gc;
pub mod index;
pub mod keys;
pub mod manifest;
pub mod options;
pub mod orientation;
pub mod phrase_table;
pub mod posting;
pub mod suffix_array;

pub use batch::CorpusBatch;
pub use collector::{Collector, Sample};
pub use options::{TranslationOption, TranslationOptionBuilder};
pub use orientation::{AlignmentMatrix, Orientation, OrientationCounts};
pub use phrase_table::PhraseTable;
pub use suffix_array::SuffixArray;
