// core/src/types.rs
//
// Vocabulary shared by the phrase table and the adaptive LM: word ids,
// memories, generations, update identifiers and decoding contexts.

use serde::{Deserialize, Serialize};

/// Vocabulary index of a word. `0` and `1` are reserved.
pub type WordId = u32;

/// Identifier of a memory: an independently deletable group of sentence pairs.
pub type MemoryId = u32;

/// Storage generation of a memory, bumped every time the memory is deleted.
pub type Generation = u16;

/// Logical update channel.
pub type StreamId = u16;

/// Position inside a stream. `-1` means "nothing seen yet".
pub type SeqId = i64;

/// Word position inside a sentence.
pub type Length = u16;

/// Reserved id terminating sentences in the corpus log.
pub const END_OF_SENTENCE: WordId = 0;

/// Reserved id marking the end of a sentence in LM histories.
pub const VOCABULARY_END_SYMBOL: WordId = 1;

/// Word alignment: `(source position, target position)` pairs.
pub type Alignment = Vec<(Length, Length)>;

/// Identifies an update on its stream, used for watermarking and replay protection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId {
    pub stream: StreamId,
    pub seq: SeqId,
}

impl UpdateId {
    pub fn new(stream: StreamId, seq: SeqId) -> Self {
        Self { stream, seq }
    }
}

/// A sentence pair with its alignment, as appended to a memory's bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationUnit {
    pub source: Vec<WordId>,
    pub target: Vec<WordId>,
    pub alignment: Alignment,
}

impl TranslationUnit {
    pub fn new(source: Vec<WordId>, target: Vec<WordId>, alignment: Alignment) -> Self {
        Self {
            source,
            target,
            alignment,
        }
    }
}

/// Weight of one memory inside a decoding context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextScore {
    pub memory: MemoryId,
    pub score: f32,
}

impl ContextScore {
    pub fn new(memory: MemoryId, score: f32) -> Self {
        Self { memory, score }
    }
}

/// Ordered list of memories relevant for the current translation, best first.
pub type Context = Vec<ContextScore>;
