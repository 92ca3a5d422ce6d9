use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use mmt_core::{
    Alignment, ContextScore, Error, MemoryId, Options, Result, SeqId, StreamId, TranslationUnit, UpdateId,
    UpdateManager, WordId, END_OF_SENTENCE,
};

use crate::batch::CorpusBatch;
use crate::options::{TranslationOption, TranslationOptionBuilder};
use crate::suffix_array::SuffixArray;

/// Suffix-array phrase table fed through the double-buffered update pipeline.
pub struct PhraseTable {
    updates: UpdateManager<CorpusBatch, SuffixArray>,
    suffix_array: Arc<SuffixArray>,
    samples: usize,
}

impl PhraseTable {
    pub fn open<P: AsRef<Path>>(model_dir: P, options: &Options) -> Result<Self> {
        let suffix_array = Arc::new(SuffixArray::open(model_dir, options)?);
        let watermarks = suffix_array.streams();
        let updates = UpdateManager::new("sapt-updates", suffix_array.clone(), &options.updates, watermarks)?;
        Ok(Self {
            updates,
            suffix_array,
            samples: options.phrasetable.samples,
        })
    }

    pub fn suffix_array(&self) -> &Arc<SuffixArray> {
        &self.suffix_array
    }

    /// Queues a sentence pair for `memory`. Replayed or stale ids are ignored.
    pub fn add(
        &self,
        id: UpdateId,
        memory: MemoryId,
        source: Vec<WordId>,
        target: Vec<WordId>,
        alignment: Alignment,
    ) -> Result<()> {
        let unit = TranslationUnit::new(source, target, alignment);
        validate(&unit)?;
        self.updates.add(id, memory, unit)
    }

    pub fn delete(&self, id: UpdateId, memory: MemoryId) -> Result<()> {
        self.updates.delete(id, memory)
    }

    /// Persists every queued update on the calling thread.
    pub fn flush(&self) -> Result<()> {
        self.updates.flush()
    }

    pub fn get_latest_updates_identifier(&self) -> HashMap<StreamId, SeqId> {
        self.suffix_array.get_latest_updates_identifier()
    }

    /// Drops memories without stored sentence pairs and rescales the rest
    /// so that scores sum to one.
    pub fn normalize_context(&self, context: &[ContextScore]) -> Vec<ContextScore> {
        let mut normalized: Vec<ContextScore> = context
            .iter()
            .filter(|score| score.score > 0.0 && self.suffix_array.contains_memory(score.memory))
            .copied()
            .collect();
        let total: f32 = normalized.iter().map(|score| score.score).sum();
        if total > 0.0 {
            for score in &mut normalized {
                score.score /= total;
            }
        }
        normalized
    }

    /// Target phrases of `phrase` found in up to `limit` samples (the
    /// configured sample size when `limit` is `0`), most frequent first.
    pub fn get_translation_options(
        &self,
        phrase: &[WordId],
        limit: usize,
        context: &[ContextScore],
    ) -> Result<Vec<TranslationOption>> {
        let limit = if limit == 0 { self.samples } else { limit };
        let samples = self.suffix_array.get_random_samples(phrase, limit, context)?;
        let (builders, valid) = TranslationOptionBuilder::extract(phrase, &samples);

        let mut options: Vec<TranslationOption> = builders.into_iter().map(TranslationOptionBuilder::build).collect();
        options.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.target_phrase.cmp(&b.target_phrase)));
        debug!(
            words = phrase.len(),
            samples = samples.len(),
            valid,
            options = options.len(),
            "translation options extracted"
        );
        Ok(options)
    }

    /// Flushes pending updates and stops the background threads.
    pub fn close(&self) -> Result<()> {
        self.updates.shutdown()?;
        self.suffix_array.close()?;
        info!("phrase table closed");
        Ok(())
    }
}

fn validate(unit: &TranslationUnit) -> Result<()> {
    let max = usize::from(u16::MAX);
    if unit.source.len() > max || unit.target.len() > max {
        return Err(Error::InvalidArgument("sentence longer than 65535 words".into()));
    }
    if unit.source.contains(&END_OF_SENTENCE) || unit.target.contains(&END_OF_SENTENCE) {
        return Err(Error::InvalidArgument(format!("word id {END_OF_SENTENCE} is reserved")));
    }
    let (source_len, target_len) = (unit.source.len(), unit.target.len());
    if let Some(&(s, t)) = unit
        .alignment
        .iter()
        .find(|(s, t)| usize::from(*s) >= source_len || usize::from(*t) >= target_len)
    {
        return Err(Error::InvalidArgument(format!("alignment point {s}-{t} out of bounds")));
    }
    Ok(())
}
