//! N-gram hashing and per-memory counting of update batches.

use ahash::AHashMap;
use std::iter;

use mmt_core::codec::hash_extend;
use mmt_core::{WordId, VOCABULARY_END_SYMBOL};

/// Hash of the per-memory record holding `(word_count, unique_word_count)`.
pub const WORD_COUNTS_HASH: u64 = 0;

/// Continues the hash of a history with one more word.
#[inline]
pub fn hash_ngram(history: u64, word: WordId) -> u64 {
    hash_extend(history, word)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub count: u32,
    /// Distinct words seen after this n-gram.
    pub successors: u32,
}

impl Counts {
    pub fn new(count: u32, successors: u32) -> Self {
        Self { count, successors }
    }

    pub fn merge(self, other: Counts) -> Counts {
        Counts {
            count: self.count.saturating_add(other.count),
            successors: self.successors.saturating_add(other.successors),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.count == 0 && self.successors == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct NGram {
    pub counts: Counts,
    /// Hash of the n-gram without its last word, `0` for unigrams.
    pub predecessor: u64,
    /// Known to be stored already, so no lookup is needed.
    pub is_in_db_for_sure: bool,
}

/// N-grams of one memory, indexed by order (`orders[0]` holds unigrams).
#[derive(Debug, Clone)]
pub struct NGramTable {
    orders: Vec<AHashMap<u64, NGram>>,
}

impl NGramTable {
    pub fn new(order: usize) -> Self {
        Self {
            orders: (0..order.max(1)).map(|_| AHashMap::new()).collect(),
        }
    }

    pub fn order(&self) -> usize {
        self.orders.len()
    }

    /// Counts every n-gram of `sentence` terminated by the end-of-sentence symbol.
    pub fn add_sentence(&mut self, sentence: &[WordId]) {
        let words: Vec<WordId> = sentence.iter().copied().chain(iter::once(VOCABULARY_END_SYMBOL)).collect();
        for start in 0..words.len() {
            let mut predecessor = 0;
            for (n, &word) in words[start..].iter().take(self.orders.len()).enumerate() {
                let key = hash_ngram(predecessor, word);
                let ngram = self.orders[n].entry(key).or_insert_with(|| NGram {
                    predecessor,
                    ..NGram::default()
                });
                ngram.counts.count += 1;
                predecessor = key;
            }
        }
    }

    /// N-grams of order `n` (1-based).
    pub fn ngrams(&self, n: usize) -> &AHashMap<u64, NGram> {
        &self.orders[n - 1]
    }

    pub(crate) fn ngrams_mut(&mut self, n: usize) -> &mut AHashMap<u64, NGram> {
        &mut self.orders[n - 1]
    }

    /// Occurrences of all unigrams, end-of-sentence symbols included.
    pub fn word_count(&self) -> u64 {
        self.orders[0].values().map(|ngram| u64::from(ngram.counts.count)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.orders[0].is_empty()
    }

    /// Every n-gram of every order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &NGram)> + '_ {
        self.orders.iter().flat_map(|order| order.iter().map(|(k, v)| (*k, v)))
    }
}
