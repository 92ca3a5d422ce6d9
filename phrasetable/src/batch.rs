//! Update batch content of the phrase table.

use mmt_core::{BatchContent, MemoryId, TranslationUnit};

#[derive(Debug, Default)]
pub struct CorpusBatch {
    /// Sentence pairs in arrival order.
    pub units: Vec<(MemoryId, TranslationUnit)>,
    /// Memories deleted by this batch, applied before `units`.
    pub deletions: Vec<MemoryId>,
}

impl BatchContent for CorpusBatch {
    type Entry = TranslationUnit;

    fn add(&mut self, memory: MemoryId, entry: TranslationUnit) {
        self.units.push((memory, entry));
    }

    fn delete(&mut self, memory: MemoryId) {
        self.units.retain(|(m, _)| *m != memory);
        if !self.deletions.contains(&memory) {
            self.deletions.push(memory);
        }
    }

    fn len(&self) -> usize {
        self.units.len() + self.deletions.len()
    }

    fn clear(&mut self) {
        self.units.clear();
        self.deletions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_delete_is_recorded_once() {
        let mut batch = CorpusBatch::default();
        batch.add(1, TranslationUnit::new(vec![2], vec![3], vec![(0, 0)]));
        batch.delete(1);
        batch.delete(1);
        batch.add(1, TranslationUnit::new(vec![4], vec![5], vec![]));
        assert_eq!(batch.deletions, vec![1]);
        assert_eq!(batch.units.len(), 1);
        assert_eq!(batch.len(), 2);
    }
}
