//! Suffix-array phrase index: corpora storage, prefix index, batched
//! updates and the garbage collector of deleted memories.

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use redb::ReadableTable;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use mmt_core::db::{self, STREAMS_KEY};
use mmt_core::{
    BatchWriter, ContextScore, Error, GarbageCollector, Length, MemoryId, Options, PhraseTableOptions, Progress,
    Result, SeqId, StreamId, StreamWatermarks, TranslationUnit, UpdateBatch, WordId,
};

use crate::batch::CorpusBatch;
use crate::collector::{self, Collector, Sample};
use crate::gc::PhraseTableReclaimer;
use crate::index::{PrefixIndex, DELETIONS, PREFIXES, TARGET_COUNTS};
use crate::keys;
use crate::manifest;
use crate::posting::encode_entry;

pub struct SuffixArray {
    index: Arc<PrefixIndex>,
    options: PhraseTableOptions,
    streams: RwLock<StreamWatermarks>,
    gc: GarbageCollector<PhraseTableReclaimer>,
}

impl SuffixArray {
    /// Opens (or creates) the model in `model_dir` and starts its garbage
    /// collector, which resumes any deletion left pending.
    pub fn open<P: AsRef<Path>>(model_dir: P, options: &Options) -> Result<Self> {
        options.validate()?;
        let dir = model_dir.as_ref();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::InvalidArgument(format!("{} is not a directory", dir.display())));
        }
        std::fs::create_dir_all(dir)?;

        let index = Arc::new(PrefixIndex::open(dir, options.phrasetable.prefix_length as usize)?);
        let streams = index.streams()?;
        let gc = GarbageCollector::start(
            "sapt-gc",
            Arc::new(PhraseTableReclaimer::new(index.clone())),
            options.phrasetable.gc_batch_size,
            options.phrasetable_gc_timeout(),
        )?;
        info!(
            model = %dir.display(),
            prefix_length = index.prefix_length(),
            memories = index.corpora().memories().len(),
            "suffix array opened"
        );

        Ok(Self {
            index,
            options: options.phrasetable.clone(),
            streams: RwLock::new(streams),
            gc,
        })
    }

    pub fn index(&self) -> &Arc<PrefixIndex> {
        &self.index
    }

    pub fn prefix_length(&self) -> usize {
        self.index.prefix_length()
    }

    /// Samples up to `limit` occurrences of `phrase` (`0` for all), drawing
    /// from `context` memories first and then from the rest of the corpus.
    pub fn get_random_samples(&self, phrase: &[WordId], limit: usize, context: &[ContextScore]) -> Result<Vec<Sample>> {
        let started = Instant::now();
        let mut collector = self.new_collector(context, true);
        let samples = collector.extend(phrase, limit)?;
        debug!(
            words = phrase.len(),
            samples = samples.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "random samples collected"
        );
        Ok(samples)
    }

    /// Source occurrences across live memories, or the global count of a
    /// target phrase no longer than the prefix length.
    pub fn count_occurrences(&self, is_source: bool, phrase: &[WordId]) -> Result<u64> {
        if is_source {
            Ok(collector::count_occurrences(&self.index, phrase)? as u64)
        } else {
            self.index.target_count(phrase)
        }
    }

    pub fn new_collector(&self, context: &[ContextScore], search_in_background: bool) -> Collector {
        Collector::new(self.index.clone(), context, search_in_background)
    }

    /// Committed position of every stream seen so far.
    pub fn get_latest_updates_identifier(&self) -> HashMap<StreamId, SeqId> {
        self.streams.read().to_map()
    }

    pub fn streams(&self) -> StreamWatermarks {
        self.streams.read().clone()
    }

    /// Record at `offset` in the live generation of `memory`.
    pub fn retrieve(&self, memory: MemoryId, offset: u64) -> Result<Option<TranslationUnit>> {
        let corpora = self.index.corpora();
        match corpora.generation(memory) {
            Some(generation) => corpora.retrieve(memory, generation, offset),
            None => Ok(None),
        }
    }

    /// Whether `memory` holds committed sentence pairs.
    pub fn contains_memory(&self, memory: MemoryId) -> bool {
        self.index.corpora().has_data(memory)
    }

    pub fn force_compaction(&self) -> Result<()> {
        let compacted = self.index.compact()?;
        info!(compacted, "index compaction finished");
        Ok(())
    }

    /// Runs garbage collection on the calling thread, at most `budget` batches.
    pub fn collect_garbage(&self, budget: Option<usize>) -> Result<Progress> {
        self.gc.collect(budget)
    }

    pub fn garbage_backlog(&self) -> Vec<(MemoryId, mmt_core::Generation)> {
        self.gc.backlog()
    }

    pub fn options(&self) -> &PhraseTableOptions {
        &self.options
    }

    /// Stops the garbage collector. Pending work resumes at the next open.
    pub fn close(&self) -> Result<()> {
        self.gc.stop()
    }
}

impl BatchWriter<CorpusBatch> for SuffixArray {
    /// Appends the batch to storage and flushes it, then commits postings,
    /// target counts, manifest, deletion markers and watermarks at once.
    fn put_batch(&self, batch: &UpdateBatch<CorpusBatch>) -> Result<()> {
        let started = Instant::now();
        let content = batch.content();
        let corpora = self.index.corpora();
        let prefix_length = self.index.prefix_length();

        let mut deletions = Vec::with_capacity(content.deletions.len());
        for &memory in &content.deletions {
            let next = corpora.generation(memory).unwrap_or_default().wrapping_add(1);
            self.gc.reclaim_before_reuse(memory, next)?;
            deletions.push(corpora.delete(memory));
        }

        let mut postings: AHashMap<Vec<u8>, Vec<u8>> = AHashMap::new();
        let mut target_counts: AHashMap<Vec<u8>, u64> = AHashMap::new();
        let mut touched = Vec::new();
        let mut seen = AHashSet::new();
        for (memory, unit) in &content.units {
            let Some((generation, bucket)) = corpora.get_bucket(*memory, true)? else {
                continue;
            };
            let offset = bucket.append(&unit.source, &unit.target, &unit.alignment)? as i64;
            for (start, words) in keys::sentence_prefixes(&unit.source, prefix_length) {
                let key = keys::prefix_key(words, prefix_length, *memory, generation);
                encode_entry(postings.entry(key).or_default(), offset, start as Length);
            }
            for (_, words) in keys::sentence_prefixes(&unit.target, prefix_length) {
                *target_counts.entry(keys::word_prefix(words, prefix_length)).or_insert(0) += 1;
            }
            if seen.insert(*memory) {
                touched.push(*memory);
            }
        }

        let flushed = corpora.flush(&touched)?;

        let txn = self.index.database().begin_write()?;
        {
            let mut table = txn.open_table(PREFIXES)?;
            for (key, blob) in &postings {
                let mut merged = table.get(key.as_slice())?.map(|v| v.value().to_vec()).unwrap_or_default();
                merged.extend_from_slice(blob);
                table.insert(key.as_slice(), merged.as_slice())?;
            }
            let mut table = txn.open_table(TARGET_COUNTS)?;
            for (key, delta) in &target_counts {
                let current = table.get(key.as_slice())?.map_or(0, |v| v.value());
                table.insert(key.as_slice(), current + delta)?;
            }
            let mut table = txn.open_table(DELETIONS)?;
            for (retired, _) in &deletions {
                table.insert((retired.memory, retired.generation), retired.size)?;
            }
        }
        for (retired, fresh) in &deletions {
            manifest::put(&txn, retired.memory, fresh)?;
        }
        for (memory, entry) in &flushed {
            manifest::put(&txn, *memory, entry)?;
        }
        db::put_meta(&txn, STREAMS_KEY, batch.watermarks())?;
        txn.commit()?;

        *self.streams.write() = batch.watermarks().clone();
        let retired: Vec<_> = deletions.iter().map(|(r, _)| (r.memory, r.generation)).collect();
        self.gc.mark_for_deletion(&retired);

        debug!(
            units = content.units.len(),
            deletions = retired.len(),
            prefixes = postings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch committed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::PhraseTable;
    use mmt_core::{Generation, UpdateId};

    #[test]
    fn wrapped_generation_is_collected_before_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        options.phrasetable.prefix_length = 2;
        options.phrasetable.gc_timeout_secs = 3600.0;
        options.updates.max_delay_secs = 3600.0;
        {
            let table = PhraseTable::open(dir.path(), &options).unwrap();
            table.add(UpdateId::new(0, 0), 1, vec![4, 5], vec![6], vec![(0, 0)]).unwrap();
            table.flush().unwrap();
            table.delete(UpdateId::new(0, 1), 1).unwrap();
            table.flush().unwrap();
            let suffix_array = table.suffix_array();
            assert_eq!(suffix_array.garbage_backlog(), vec![(1, 0)]);

            // the live generation is the last one before the wrap
            let txn = suffix_array.index().database().begin_write().unwrap();
            manifest::put(&txn, 1, &ManifestEntry::fresh(Generation::MAX)).unwrap();
            txn.commit().unwrap();
            table.close().unwrap();
        }

        let table = PhraseTable::open(dir.path(), &options).unwrap();
        let suffix_array = table.suffix_array();
        assert_eq!(suffix_array.index().corpora().generation(1), Some(Generation::MAX));
        assert_eq!(suffix_array.garbage_backlog(), vec![(1, 0)]);

        table.delete(UpdateId::new(0, 2), 1).unwrap();
        table.flush().unwrap();
        assert_eq!(suffix_array.index().corpora().generation(1), Some(0));
        assert_eq!(suffix_array.garbage_backlog(), vec![(1, Generation::MAX)]);

        table.add(UpdateId::new(0, 3), 1, vec![7, 8], vec![9], vec![(0, 0)]).unwrap();
        table.flush().unwrap();
        assert!(suffix_array.get_random_samples(&[4, 5], 0, &[]).unwrap().is_empty());
        let samples = suffix_array.get_random_samples(&[7, 8], 0, &[]).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].source, vec![7, 8]);
        assert_eq!(suffix_array.count_occurrences(false, &[6]).unwrap(), 0);
    }
}
