//! Reclamation of retired memory generations from the prefix index.
//!
//! Each batch re-reads records of the retired bucket, recomputes the prefix
//! keys they produced and the target counts they added, then deletes the
//! former and subtracts the latter together with the resume position.

use ahash::{AHashMap, AHashSet};
use redb::ReadableTable;
use std::sync::Arc;

use mmt_core::db::{self, open_read_table, PENDING_DELETION_KEY};
use mmt_core::gc::INTERRUPT_CHECK_INTERVAL;
use mmt_core::{Checkpoint, Error, Generation, MemoryId, Reclaimer, Result, Wakeup};

use crate::corpora::Retired;
use crate::index::{PrefixIndex, DELETIONS, PREFIXES, TARGET_COUNTS};
use crate::keys;

pub struct PhraseTableReclaimer {
    index: Arc<PrefixIndex>,
}

impl PhraseTableReclaimer {
    pub fn new(index: Arc<PrefixIndex>) -> Self {
        Self { index }
    }

    fn retired(&self, memory: MemoryId, generation: Generation) -> Result<Retired> {
        let txn = self.index.database().begin_read()?;
        let size = match open_read_table(&txn, DELETIONS)? {
            Some(table) => table.get((memory, generation))?.map_or(0, |v| v.value()),
            None => 0,
        };
        Ok(Retired {
            memory,
            generation,
            size,
        })
    }
}

impl Reclaimer for PhraseTableReclaimer {
    fn pending(&self) -> Result<Option<Checkpoint>> {
        db::get_meta(&self.index.database(), PENDING_DELETION_KEY)
    }

    fn queued(&self) -> Result<Vec<(MemoryId, Generation)>> {
        Ok(self
            .index
            .retired()?
            .into_iter()
            .map(|r| (r.memory, r.generation))
            .collect())
    }

    fn reclaim_batch(&self, checkpoint: &Checkpoint, batch_size: usize, wakeup: &Wakeup) -> Result<Option<u64>> {
        let retired = self.retired(checkpoint.memory, checkpoint.generation)?;
        let mut records = self.index.corpora().iter_retired(&retired, checkpoint.position)?;
        let prefix_length = self.index.prefix_length();

        let mut prefixes: AHashSet<Vec<u8>> = AHashSet::new();
        let mut counts: AHashMap<Vec<u8>, u64> = AHashMap::new();
        let mut loaded = 0usize;
        while loaded < batch_size {
            if loaded > 0 && loaded % INTERRUPT_CHECK_INTERVAL == 0 && !wakeup.is_running() {
                return Err(Error::Interrupted);
            }
            let Some((_, unit)) = records.next_record()? else {
                break;
            };
            for (_, words) in keys::sentence_prefixes(&unit.source, prefix_length) {
                prefixes.insert(keys::prefix_key(words, prefix_length, retired.memory, retired.generation));
            }
            for (_, words) in keys::sentence_prefixes(&unit.target, prefix_length) {
                *counts.entry(keys::word_prefix(words, prefix_length)).or_insert(0) += 1;
            }
            loaded += 1;
        }
        if loaded == 0 {
            return Ok(None);
        }

        let position = records.position();
        let txn = self.index.database().begin_write()?;
        {
            let mut table = txn.open_table(PREFIXES)?;
            for key in &prefixes {
                table.remove(key.as_slice())?;
            }
            let mut table = txn.open_table(TARGET_COUNTS)?;
            for (key, delta) in &counts {
                let current = table.get(key.as_slice())?.map_or(0, |v| v.value());
                let updated = current.saturating_sub(*delta);
                if updated == 0 {
                    table.remove(key.as_slice())?;
                } else {
                    table.insert(key.as_slice(), updated)?;
                }
            }
        }
        db::put_meta(&txn, PENDING_DELETION_KEY, &Checkpoint { position, ..*checkpoint })?;
        txn.commit()?;
        Ok(Some(position))
    }

    fn finish(&self, memory: MemoryId, generation: Generation) -> Result<()> {
        let retired = self.retired(memory, generation)?;
        self.index.corpora().remove_retired(&retired)?;
        let txn = self.index.database().begin_write()?;
        {
            let mut table = txn.open_table(DELETIONS)?;
            table.remove((memory, generation))?;
        }
        db::remove_meta(&txn, PENDING_DELETION_KEY)?;
        txn.commit()?;
        Ok(())
    }
}
