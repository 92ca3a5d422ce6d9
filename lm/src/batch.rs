//! Update batch content of the language model.

use mmt_core::{BatchContent, MemoryId, WordId};

#[derive(Debug, Default)]
pub struct SentenceBatch {
    /// Target sentences in arrival order.
    pub sentences: Vec<(MemoryId, Vec<WordId>)>,
    /// Memories deleted by this batch, applied before `sentences`.
    pub deletions: Vec<MemoryId>,
}

impl BatchContent for SentenceBatch {
    type Entry = Vec<WordId>;

    fn add(&mut self, memory: MemoryId, entry: Vec<WordId>) {
        self.sentences.push((memory, entry));
    }

    fn delete(&mut self, memory: MemoryId) {
        self.sentences.retain(|(m, _)| *m != memory);
        if !self.deletions.contains(&memory) {
            self.deletions.push(memory);
        }
    }

    fn len(&self) -> usize {
        self.sentences.len() + self.deletions.len()
    }

    fn clear(&mut self) {
        self.sentences.clear();
        self.deletions.clear();
    }
}
