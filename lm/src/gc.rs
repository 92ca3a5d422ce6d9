//! Reclamation of retired memory generations from the n-gram store.
//!
//! Keys of one generation are contiguous, so each batch is a range scan from
//! the checkpoint hash followed by deletes committed with the next position.

use redb::ReadableTable;
use std::sync::Arc;

use mmt_core::db::{self, PENDING_DELETION_KEY};
use mmt_core::gc::INTERRUPT_CHECK_INTERVAL;
use mmt_core::{Checkpoint, Error, Generation, MemoryId, Reclaimer, Result, Wakeup};

use crate::storage::{ngram_key, parse_key, NGramDatabase, DELETIONS, NGRAMS};

pub struct NGramReclaimer {
    store: Arc<NGramDatabase>,
}

impl NGramReclaimer {
    pub fn new(store: Arc<NGramDatabase>) -> Self {
        Self { store }
    }
}

impl Reclaimer for NGramReclaimer {
    fn pending(&self) -> Result<Option<Checkpoint>> {
        db::get_meta(&self.store.database(), PENDING_DELETION_KEY)
    }

    fn queued(&self) -> Result<Vec<(MemoryId, Generation)>> {
        self.store.retired()
    }

    fn reclaim_batch(&self, checkpoint: &Checkpoint, batch_size: usize, wakeup: &Wakeup) -> Result<Option<u64>> {
        let start = ngram_key(checkpoint.memory, checkpoint.generation, checkpoint.position);
        let end = ngram_key(checkpoint.memory, checkpoint.generation, u64::MAX);

        let txn = self.store.database().begin_write()?;
        let last = {
            let mut table = txn.open_table(NGRAMS)?;
            let mut keys: Vec<Vec<u8>> = Vec::new();
            for item in table.range(start.as_slice()..=end.as_slice())? {
                if keys.len() >= batch_size {
                    break;
                }
                if !keys.is_empty() && keys.len() % INTERRUPT_CHECK_INTERVAL == 0 && !wakeup.is_running() {
                    return Err(Error::Interrupted);
                }
                let (key, _) = item?;
                keys.push(key.value().to_vec());
            }
            for key in &keys {
                table.remove(key.as_slice())?;
            }
            keys.last().and_then(|key| parse_key(key)).map(|(_, _, hash)| hash)
        };
        let Some(last) = last else {
            return Ok(None);
        };

        let position = last.saturating_add(1);
        db::put_meta(&txn, PENDING_DELETION_KEY, &Checkpoint { position, ..*checkpoint })?;
        txn.commit()?;
        Ok(Some(position))
    }

    fn finish(&self, memory: MemoryId, generation: Generation) -> Result<()> {
        let txn = self.store.database().begin_write()?;
        {
            let mut table = txn.open_table(DELETIONS)?;
            table.remove((memory, generation))?;
        }
        db::remove_meta(&txn, PENDING_DELETION_KEY)?;
        txn.commit()?;
        Ok(())
    }
}
