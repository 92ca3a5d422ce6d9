//! Incremental phrase collection.
//!
//! A collector follows a decoder growing a source phrase word by word. Each
//! search (one per in-context memory, plus the background search over all
//! other memories) caches the posting list of the phrase so far; an
//! extension only looks up the trailing window and joins it positionally
//! with the cached postings.

use std::sync::Arc;

use mmt_core::codec::hash_words;
use mmt_core::{Alignment, ContextScore, Generation, Length, MemoryId, Result, WordId};

use crate::cursor::PrefixCursor;
use crate::index::PrefixIndex;
use crate::posting::{Location, PostingList};

/// A sentence pair containing the phrase, with every position it starts at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub memory: MemoryId,
    pub source: Vec<WordId>,
    pub target: Vec<WordId>,
    pub alignment: Alignment,
    pub offsets: Vec<Length>,
}

struct SearchState {
    cursor: PrefixCursor,
    postings: Option<PostingList>,
    phrase_offset: usize,
}

impl SearchState {
    fn new(cursor: PrefixCursor) -> Self {
        Self {
            cursor,
            postings: None,
            phrase_offset: 0,
        }
    }

    /// Brings the cached postings up to date with `phrase`; returns their size.
    fn collect_locations(&mut self, phrase: &[WordId], prefix_length: usize) -> Result<usize> {
        let cached = self.postings.take();
        let offset = if cached.is_some() { self.phrase_offset } else { 0 };
        let mut postings = cached.unwrap_or_default();
        let length = phrase.len();

        if length < prefix_length {
            postings = PostingList::new();
            self.cursor.collect(phrase, 0, length, &mut postings)?;
        } else {
            let mut start = offset;
            while start < length {
                if start + prefix_length > length {
                    start = length - prefix_length;
                }
                if start == 0 {
                    self.cursor.collect(phrase, 0, prefix_length, &mut postings)?;
                } else {
                    let mut successors = PostingList::new();
                    self.cursor.collect(phrase, start, prefix_length, &mut successors)?;
                    postings.retain(&successors, start);
                }
                if postings.is_empty() {
                    break;
                }
                start += prefix_length;
            }
        }

        let collected = postings.len();
        self.postings = Some(postings);
        self.phrase_offset = length;
        Ok(collected)
    }

    fn locations(&self, limit: usize, seed: u64) -> Vec<Location> {
        self.postings
            .as_ref()
            .map(|p| p.get_locations(limit, seed))
            .unwrap_or_default()
    }

    /// Postings of phrases shorter than the prefix length are looked up
    /// directly, there is nothing to extend.
    fn release_short(&mut self, phrase_len: usize, prefix_length: usize) {
        if phrase_len < prefix_length {
            self.postings = None;
        }
    }
}

/// Occurrences of `phrase` across all live memories.
pub(crate) fn count_occurrences(index: &Arc<PrefixIndex>, phrase: &[WordId]) -> Result<usize> {
    if phrase.is_empty() {
        return Ok(0);
    }
    let mut state = SearchState::new(index.global_cursor(std::iter::empty()));
    state.collect_locations(phrase, index.prefix_length())
}

pub struct Collector {
    index: Arc<PrefixIndex>,
    phrase: Vec<WordId>,
    in_context: Vec<SearchState>,
    background: Option<SearchState>,
}

impl Collector {
    /// Searches the memories of `context` first, in order, then (optionally)
    /// every other memory.
    pub fn new(index: Arc<PrefixIndex>, context: &[ContextScore], search_in_background: bool) -> Self {
        let in_context = context
            .iter()
            .map(|score| SearchState::new(index.memory_cursor(score.memory)))
            .collect();
        let background = search_in_background
            .then(|| SearchState::new(index.global_cursor(context.iter().map(|score| score.memory))));
        Self {
            index,
            phrase: Vec::with_capacity(20),
            in_context,
            background,
        }
    }

    pub fn phrase(&self) -> &[WordId] {
        &self.phrase
    }

    /// Appends `words` to the phrase and returns up to `limit` samples
    /// (`0` for all), in-context memories first.
    pub fn extend(&mut self, words: &[WordId], limit: usize) -> Result<Vec<Sample>> {
        self.phrase.extend_from_slice(words);
        if self.phrase.is_empty() {
            return Ok(Vec::new());
        }
        let prefix_length = self.index.prefix_length();
        let seed = hash_words(&self.phrase).max(1);

        let mut in_context = Vec::new();
        let mut in_context_size = 0usize;
        let mut i = 0;
        while i < self.in_context.len() {
            let state = &mut self.in_context[i];
            let collected = state.collect_locations(&self.phrase, prefix_length)?;
            if collected == 0 {
                self.in_context.remove(i);
                continue;
            }

            let remaining = limit.saturating_sub(in_context_size);
            let exhausted = limit > 0 && collected >= remaining;
            let mut locations = if exhausted {
                state.locations(remaining, seed)
            } else {
                state.locations(0, seed)
            };
            locations.sort_unstable();
            in_context_size += locations.len();
            in_context.extend(locations);
            state.release_short(self.phrase.len(), prefix_length);

            if exhausted {
                break;
            }
            i += 1;
        }

        let mut background = Vec::new();
        if limit == 0 || in_context_size < limit {
            if let Some(state) = self.background.as_mut() {
                let collected = state.collect_locations(&self.phrase, prefix_length)?;
                if collected == 0 {
                    self.background = None;
                } else {
                    let budget = if limit == 0 { 0 } else { limit - in_context_size };
                    background = state.locations(budget, seed);
                    background.sort_unstable();
                    state.release_short(self.phrase.len(), prefix_length);
                }
            }
        }

        let mut samples = Vec::with_capacity(in_context.len() + background.len());
        self.retrieve(&in_context, &mut samples)?;
        self.retrieve(&background, &mut samples)?;
        Ok(samples)
    }

    /// Resolves locations sorted by record; consecutive hits in the same
    /// record become one sample. Locations of a generation deleted since they
    /// were collected are dropped.
    fn retrieve(&self, locations: &[Location], out: &mut Vec<Sample>) -> Result<()> {
        let corpora = self.index.corpora();
        let mut last: Option<(MemoryId, Generation, i64)> = None;
        for location in locations {
            let record = (location.memory, location.generation, location.pointer);
            if last == Some(record) {
                if let Some(sample) = out.last_mut() {
                    sample.offsets.push(location.offset);
                }
                continue;
            }
            let Some(unit) = corpora.retrieve(location.memory, location.generation, location.pointer as u64)? else {
                continue;
            };
            out.push(Sample {
                memory: location.memory,
                source: unit.source,
                target: unit.target,
                alignment: unit.alignment,
                offsets: vec![location.offset],
            });
            last = Some(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PhraseTable;
    use mmt_core::{Options, UpdateId};

    fn options() -> Options {
        let mut options = Options::default();
        options.phrasetable.prefix_length = 2;
        options.phrasetable.gc_timeout_secs = 3600.0;
        options.updates.max_delay_secs = 3600.0;
        options
    }

    #[test]
    fn locations_of_a_deleted_generation_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let table = PhraseTable::open(dir.path(), &options()).unwrap();
        table.add(UpdateId::new(0, 0), 1, vec![4, 5, 6], vec![7], vec![(0, 0)]).unwrap();
        table.flush().unwrap();

        let suffix_array = table.suffix_array();
        let index = suffix_array.index();
        let mut global = SearchState::new(index.global_cursor(std::iter::empty()));
        let mut scoped = SearchState::new(index.memory_cursor(1));
        assert_eq!(global.collect_locations(&[4, 5], 2).unwrap(), 1);
        assert_eq!(scoped.collect_locations(&[4, 5], 2).unwrap(), 1);
        let mut stale = global.locations(0, 1);
        stale.extend(scoped.locations(0, 1));
        assert!(stale.iter().all(|l| l.generation == 0 && l.pointer == 0));

        // the memory is replaced before the locations are resolved
        table.delete(UpdateId::new(0, 1), 1).unwrap();
        table.add(UpdateId::new(0, 2), 1, vec![8, 9], vec![10], vec![]).unwrap();
        table.flush().unwrap();

        let collector = suffix_array.new_collector(&[], true);
        let mut samples = Vec::new();
        collector.retrieve(&stale, &mut samples).unwrap();
        assert!(samples.is_empty());

        let mut fresh = SearchState::new(index.global_cursor(std::iter::empty()));
        assert_eq!(fresh.collect_locations(&[8, 9], 2).unwrap(), 1);
        let locations = fresh.locations(0, 1);
        assert_eq!(locations[0].generation, 1);
        collector.retrieve(&locations, &mut samples).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].source, vec![8, 9]);

        assert!(suffix_array.get_random_samples(&[4, 5], 0, &[]).unwrap().is_empty());
    }
}
