//! Cursors over the prefix index.
//!
//! A memory cursor does a single point lookup in the live generation of one
//! memory. A global cursor range-scans every memory sharing the word prefix,
//! skipping excluded memories and retired generations.

use ahash::AHashSet;
use std::sync::Arc;

use mmt_core::{Generation, MemoryId, Result, WordId};

use crate::index::PrefixIndex;
use crate::posting::{PostingList, ENTRY_SIZE};

#[derive(Debug, Clone)]
pub enum CursorScope {
    Memory(MemoryId),
    Global(AHashSet<MemoryId>),
}

pub struct PrefixCursor {
    index: Arc<PrefixIndex>,
    scope: CursorScope,
    values: Vec<(MemoryId, Generation, Vec<u8>)>,
    position: usize,
}

impl PrefixCursor {
    pub fn new(index: Arc<PrefixIndex>, scope: CursorScope) -> Self {
        Self {
            index,
            scope,
            values: Vec::new(),
            position: 0,
        }
    }

    pub fn scope(&self) -> &CursorScope {
        &self.scope
    }

    /// Positions the cursor on `phrase[offset..offset + length]`, at most
    /// `prefix_length` words.
    pub fn seek(&mut self, phrase: &[WordId], offset: usize, length: usize) -> Result<()> {
        let words = &phrase[offset..offset + length];
        self.position = 0;
        self.values = match &self.scope {
            CursorScope::Memory(memory) => match self.index.corpora().generation(*memory) {
                Some(generation) => self
                    .index
                    .postings(words, *memory, generation)?
                    .map(|blob| vec![(*memory, generation, blob)])
                    .unwrap_or_default(),
                None => Vec::new(),
            },
            CursorScope::Global(excluded) => self.index.scan_postings(words, excluded)?,
        };
        Ok(())
    }

    pub fn has_next(&self) -> bool {
        self.position < self.values.len()
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }

    /// Memory owning the current value.
    pub fn memory(&self) -> Option<MemoryId> {
        self.values.get(self.position).map(|(m, _, _)| *m)
    }

    /// Appends the current posting blob to `list`.
    pub fn collect_value(&self, list: &mut PostingList) {
        if let Some((memory, generation, blob)) = self.values.get(self.position) {
            list.append_blob(*memory, *generation, blob);
        }
    }

    /// Number of postings in the current value.
    pub fn count_value(&self) -> usize {
        self.values
            .get(self.position)
            .map_or(0, |(_, _, blob)| blob.len() / ENTRY_SIZE)
    }

    /// Collects every value matching `phrase[offset..offset + length]`.
    pub fn collect(&mut self, phrase: &[WordId], offset: usize, length: usize, list: &mut PostingList) -> Result<()> {
        self.seek(phrase, offset, length)?;
        while self.has_next() {
            self.collect_value(list);
            self.advance();
        }
        Ok(())
    }

    /// Total postings matching `phrase[offset..offset + length]`.
    pub fn count(&mut self, phrase: &[WordId], offset: usize, length: usize) -> Result<usize> {
        self.seek(phrase, offset, length)?;
        let mut total = 0;
        while self.has_next() {
            total += self.count_value();
            self.advance();
        }
        Ok(total)
    }
}
