//! Context-adaptive interpolated language model over the n-gram store.
//!
//! Each memory of the decoding context contributes its own estimate,
//! weighted by the context score:
//!
//! ```text
//! p(w | h) = Σ score · f*(w | h) + (Σ score · λ(h)) · p(w | h')
//! f*(w | h) = c(hw) / (c(h) + s(h))
//! λ(h)      = s(h) / (c(h) + s(h))      (1 when h is unseen)
//! ```
//!
//! where `h'` drops the oldest word of `h`, `c` is a count and `s` the
//! number of distinct successors. The recursion ends at a unigram estimate
//! with an out-of-vocabulary class.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use mmt_core::codec::hash_words;
use mmt_core::{
    ContextScore, Error, MemoryId, Options, Result, SeqId, StreamId, UpdateId, UpdateManager, WordId,
    END_OF_SENTENCE, VOCABULARY_END_SYMBOL,
};

use crate::batch::SentenceBatch;
use crate::ngram::{hash_ngram, WORD_COUNTS_HASH};
use crate::storage::{CountsReader, NGramStorage};

/// Log-probability reported for impossible events.
pub const LOG_ZERO: f32 = -100.0;

/// Assumed upper bound on the vocabulary size, for the OOV class.
const DICTIONARY_UPPER_BOUND: f64 = 10_000_000.0;

const UNIGRAM_EPSILON: f64 = 1.0;

/// The words an estimate was conditioned on, most recent last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    words: Vec<WordId>,
}

impl HistoryKey {
    pub fn words(&self) -> &[WordId] {
        &self.words
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn hash(&self) -> u64 {
        hash_words(&self.words)
    }
}

#[derive(Debug, Clone, Copy)]
struct Estimate {
    probability: f64,
    /// Words of history plus word matched by some memory.
    length: usize,
}

/// Memoised sub-estimates, valid for a single context.
pub struct ProbabilityCache {
    entries: LruCache<u64, Estimate>,
}

impl ProbabilityCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

pub struct AdaptiveLm {
    updates: UpdateManager<SentenceBatch, NGramStorage>,
    storage: Arc<NGramStorage>,
    order: usize,
    cache_size: usize,
}

impl AdaptiveLm {
    pub fn open<P: AsRef<Path>>(model_dir: P, options: &Options) -> Result<Self> {
        let storage = Arc::new(NGramStorage::open(model_dir, options)?);
        let watermarks = storage.streams();
        let updates = UpdateManager::new("lm-updates", storage.clone(), &options.updates, watermarks)?;
        Ok(Self {
            updates,
            order: storage.order(),
            storage,
            cache_size: options.lm.cache_size,
        })
    }

    pub fn storage(&self) -> &Arc<NGramStorage> {
        &self.storage
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Queues the target sentence of a translation unit for `memory`.
    pub fn add(&self, id: UpdateId, memory: MemoryId, sentence: Vec<WordId>) -> Result<()> {
        if let Some(word) = sentence
            .iter()
            .find(|&&w| w == END_OF_SENTENCE || w == VOCABULARY_END_SYMBOL)
        {
            return Err(Error::InvalidArgument(format!("word id {word} is reserved")));
        }
        self.updates.add(id, memory, sentence)
    }

    pub fn delete(&self, id: UpdateId, memory: MemoryId) -> Result<()> {
        self.updates.delete(id, memory)
    }

    pub fn flush(&self) -> Result<()> {
        self.updates.flush()
    }

    pub fn get_latest_updates_identifier(&self) -> HashMap<StreamId, SeqId> {
        self.storage.get_latest_updates_identifier()
    }

    /// A cache sized from the options, `None` when caching is disabled.
    pub fn new_cache(&self) -> Option<ProbabilityCache> {
        NonZeroUsize::new(self.cache_size).map(ProbabilityCache::new)
    }

    /// History made of the last `order - 1` words of `words`.
    pub fn make_history_key(&self, words: &[WordId]) -> HistoryKey {
        let keep = words.len().min(self.order - 1);
        HistoryKey {
            words: words[words.len() - keep..].to_vec(),
        }
    }

    /// Drops memories without counts and rescales the rest to sum to one.
    pub fn normalize_context(&self, context: &[ContextScore]) -> Result<Vec<ContextScore>> {
        let reader = self.storage.reader()?;
        let mut normalized = Vec::with_capacity(context.len());
        for score in context {
            if score.score > 0.0 && reader.get(score.memory, WORD_COUNTS_HASH)?.count > 0 {
                normalized.push(*score);
            }
        }
        let total: f32 = normalized.iter().map(|score| score.score).sum();
        if total > 0.0 {
            for score in &mut normalized {
                score.score /= total;
            }
        }
        Ok(normalized)
    }

    /// Whether no memory of `context` has seen `word`.
    pub fn is_oov(&self, context: &[ContextScore], word: WordId) -> Result<bool> {
        let reader = self.storage.reader()?;
        let hash = hash_ngram(0, word);
        for score in context {
            if reader.get(score.memory, hash)?.count > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Natural-log probability of `word` after `history`, and the history
    /// to use for the next word.
    pub fn compute_probability(
        &self,
        word: WordId,
        history: &HistoryKey,
        context: &[ContextScore],
        mut cache: Option<&mut ProbabilityCache>,
    ) -> Result<(f32, HistoryKey)> {
        if context.is_empty() {
            return Ok((LOG_ZERO, HistoryKey::default()));
        }
        let reader = self.storage.reader()?;
        let words = history.words();
        let words = &words[words.len().saturating_sub(self.order - 1)..];
        let estimate = self.estimate(&reader, context, words, word, &mut cache)?;

        let log_prob = if estimate.probability > 0.0 {
            estimate.probability.ln() as f32
        } else {
            LOG_ZERO
        };
        let next = if word == VOCABULARY_END_SYMBOL {
            HistoryKey::default()
        } else {
            let mut extended = words.to_vec();
            extended.push(word);
            HistoryKey {
                words: extended[extended.len() - estimate.length..].to_vec(),
            }
        };
        Ok((log_prob, next))
    }

    fn estimate(
        &self,
        reader: &CountsReader<'_>,
        context: &[ContextScore],
        history: &[WordId],
        word: WordId,
        cache: &mut Option<&mut ProbabilityCache>,
    ) -> Result<Estimate> {
        let history_hash = hash_words(history);
        let ngram_hash = hash_ngram(history_hash, word);
        if let Some(hit) = cache.as_mut().and_then(|c| c.entries.get(&ngram_hash).copied()) {
            return Ok(hit);
        }

        let estimate = if history.is_empty() {
            self.unigram(reader, context, ngram_hash)?
        } else {
            let mut discounted = 0.0;
            let mut backoff = 0.0;
            let mut length = 0;
            for score in context {
                let weight = f64::from(score.score);
                let h = reader.get(score.memory, history_hash)?;
                if h.count == 0 {
                    backoff += weight;
                    continue;
                }
                let denominator = f64::from(h.count) + f64::from(h.successors);
                let hw = reader.get(score.memory, ngram_hash)?;
                if hw.count > 0 {
                    discounted += weight * f64::from(hw.count) / denominator;
                    length = length.max((history.len() + 1).min(self.order - 1));
                }
                backoff += weight * f64::from(h.successors) / denominator;
            }
            let lower = self.estimate(reader, context, &history[1..], word, cache)?;
            Estimate {
                probability: discounted + backoff * lower.probability,
                length: length.max(lower.length),
            }
        };

        if let Some(cache) = cache.as_mut() {
            cache.entries.put(ngram_hash, estimate);
        }
        Ok(estimate)
    }

    fn unigram(&self, reader: &CountsReader<'_>, context: &[ContextScore], hash: u64) -> Result<Estimate> {
        let mut probability = 0.0;
        let mut seen = false;
        for score in context {
            let totals = reader.get(score.memory, WORD_COUNTS_HASH)?;
            let word_count = f64::from(totals.count);
            let unique_words = f64::from(totals.successors);
            let denominator = word_count + unique_words + UNIGRAM_EPSILON * unique_words;
            if denominator <= 0.0 {
                continue;
            }
            let count = reader.get(score.memory, hash)?.count;
            let p = if count > 0 {
                seen = true;
                (f64::from(count) + UNIGRAM_EPSILON) / denominator
            } else {
                (unique_words + UNIGRAM_EPSILON) / denominator / oov_class_size(unique_words)
            };
            probability += f64::from(score.score) * p;
        }
        Ok(Estimate {
            probability,
            length: if seen { 1.min(self.order - 1) } else { 0 },
        })
    }

    pub fn close(&self) -> Result<()> {
        self.updates.shutdown()?;
        self.storage.close()?;
        info!("adaptive LM closed");
        Ok(())
    }
}

/// Words outside the dictionary, assuming a bounded vocabulary.
fn oov_class_size(dictionary_size: f64) -> f64 {
    if DICTIONARY_UPPER_BOUND > dictionary_size {
        DICTIONARY_UPPER_BOUND - dictionary_size
    } else {
        dictionary_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oov_class_shrinks_with_the_dictionary() {
        assert_eq!(oov_class_size(0.0), DICTIONARY_UPPER_BOUND);
        assert_eq!(oov_class_size(1_000.0), DICTIONARY_UPPER_BOUND - 1_000.0);
        assert_eq!(oov_class_size(2e7), 2e7);
    }

    #[test]
    fn history_hash_matches_word_hash() {
        let key = HistoryKey { words: vec![3, 4] };
        assert_eq!(key.hash(), hash_ngram(hash_ngram(0, 3), 4));
        assert!(HistoryKey::default().is_empty());
    }
}
