//! N-gram count storage: `(memory, generation, n-gram hash) -> (count, successors)`
//! in redb, with additive merges at write time and per-memory generations.
//!
//! A deleted memory gets a new generation immediately; keys of the retired
//! generation stay invisible to readers until the garbage collector removes
//! them.

use parking_lot::{RwLock, RwLockReadGuard};
use redb::{Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use mmt_core::codec::{put_u16_be, put_u32_be, put_u64_be, read_u16_be, read_u32_be, read_u64_be};
use mmt_core::db::{self, open_read_table, META, STREAMS_KEY};
use mmt_core::{
    BatchWriter, Error, GarbageCollector, Generation, MemoryId, Options, Progress, Result, SeqId, StreamId,
    StreamWatermarks, UpdateBatch,
};

use crate::batch::SentenceBatch;
use crate::gc::NGramReclaimer;
use crate::ngram::{Counts, NGramTable, WORD_COUNTS_HASH};

/// `memory ‖ generation ‖ hash -> (count, successors)`
pub(crate) const NGRAMS: TableDefinition<&[u8], (u32, u32)> = TableDefinition::new("ngrams");

/// `memory -> live generation`
pub(crate) const GENERATIONS: TableDefinition<u32, u16> = TableDefinition::new("generations");

/// Retired generations still holding keys.
pub(crate) const DELETIONS: TableDefinition<(u32, u16), ()> = TableDefinition::new("deletions");

const ORDER_KEY: &str = "order";

pub const DATABASE_FILE: &str = "ngrams.redb";

pub const KEY_LEN: usize = 14;

type CountsTable<'txn> = redb::Table<'txn, &'static [u8], (u32, u32)>;

pub fn ngram_key(memory: MemoryId, generation: Generation, hash: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(KEY_LEN);
    put_u32_be(&mut key, memory);
    put_u16_be(&mut key, generation);
    put_u64_be(&mut key, hash);
    key
}

pub fn parse_key(key: &[u8]) -> Option<(MemoryId, Generation, u64)> {
    if key.len() != KEY_LEN {
        return None;
    }
    let mut ptr = 0;
    let memory = read_u32_be(key, &mut ptr)?;
    let generation = read_u16_be(key, &mut ptr)?;
    let hash = read_u64_be(key, &mut ptr)?;
    Some((memory, generation, hash))
}

/// The redb file and the live generation of every memory.
pub struct NGramDatabase {
    // Write-locked only to compact.
    db: RwLock<Database>,
    generations: RwLock<HashMap<MemoryId, Generation>>,
}

impl NGramDatabase {
    /// Opens the database at `path`. The n-gram order is fixed at creation.
    pub fn open<P: AsRef<Path>>(path: P, order: usize) -> Result<Self> {
        let database = db::open_database(path)?;
        match db::get_meta::<u64>(&database, ORDER_KEY)? {
            Some(stored) if stored as usize != order => {
                return Err(Error::Config(format!(
                    "n-gram store was built with order {stored}, configured {order}"
                )));
            }
            Some(_) => {}
            None => {
                let txn = database.begin_write()?;
                db::put_meta(&txn, ORDER_KEY, &(order as u64))?;
                txn.commit()?;
            }
        }

        let mut generations = HashMap::new();
        {
            let txn = database.begin_read()?;
            if let Some(table) = open_read_table(&txn, GENERATIONS)? {
                for item in table.iter()? {
                    let (memory, generation) = item?;
                    generations.insert(memory.value(), generation.value());
                }
            }
        }

        Ok(Self {
            db: RwLock::new(database),
            generations: RwLock::new(generations),
        })
    }

    pub fn database(&self) -> RwLockReadGuard<'_, Database> {
        self.db.read()
    }

    pub fn generation(&self, memory: MemoryId) -> Option<Generation> {
        self.generations.read().get(&memory).copied()
    }

    pub fn generations(&self) -> HashMap<MemoryId, Generation> {
        self.generations.read().clone()
    }

    /// Retired generations still holding keys, in key order.
    pub fn retired(&self) -> Result<Vec<(MemoryId, Generation)>> {
        let txn = self.database().begin_read()?;
        let mut out = Vec::new();
        if let Some(table) = open_read_table(&txn, DELETIONS)? {
            for item in table.iter()? {
                let (key, _) = item?;
                out.push(key.value());
            }
        }
        Ok(out)
    }

    /// Entry counts of the store tables, by table name.
    pub fn table_sizes(&self) -> Result<Vec<(&'static str, u64)>> {
        let database = self.database();
        Ok(vec![
            ("ngrams", db::table_len(&database, NGRAMS)?),
            ("generations", db::table_len(&database, GENERATIONS)?),
            ("deletions", db::table_len(&database, DELETIONS)?),
            ("meta", db::table_len(&database, META)?),
        ])
    }

    pub fn compact(&self) -> Result<bool> {
        Ok(self.db.write().compact()?)
    }
}

/// Point lookups against one read snapshot.
pub struct CountsReader<'a> {
    store: &'a NGramDatabase,
    table: Option<ReadOnlyTable<&'static [u8], (u32, u32)>>,
    _txn: ReadTransaction,
}

impl CountsReader<'_> {
    /// Counts of `hash` in the live generation of `memory`, zero when absent.
    pub fn get(&self, memory: MemoryId, hash: u64) -> Result<Counts> {
        let (Some(table), Some(generation)) = (&self.table, self.store.generation(memory)) else {
            return Ok(Counts::default());
        };
        let key = ngram_key(memory, generation, hash);
        Ok(table
            .get(key.as_slice())?
            .map(|v| {
                let (count, successors) = v.value();
                Counts::new(count, successors)
            })
            .unwrap_or_default())
    }
}

pub struct NGramStorage {
    store: Arc<NGramDatabase>,
    order: usize,
    streams: RwLock<StreamWatermarks>,
    gc: GarbageCollector<NGramReclaimer>,
}

impl NGramStorage {
    /// Opens (or creates) the store in `model_dir` and starts its garbage
    /// collector, which resumes any deletion left pending.
    pub fn open<P: AsRef<Path>>(model_dir: P, options: &Options) -> Result<Self> {
        options.validate()?;
        let dir = model_dir.as_ref();
        if dir.exists() && !dir.is_dir() {
            return Err(Error::InvalidArgument(format!("{} is not a directory", dir.display())));
        }
        std::fs::create_dir_all(dir)?;

        let order = options.lm.order as usize;
        let store = Arc::new(NGramDatabase::open(dir.join(DATABASE_FILE), order)?);
        let streams = db::load_streams(&store.database())?;
        let gc = GarbageCollector::start(
            "lm-gc",
            Arc::new(NGramReclaimer::new(store.clone())),
            options.lm.gc_batch_size,
            options.lm_gc_timeout(),
        )?;
        info!(model = %dir.display(), order, memories = store.generations().len(), "n-gram storage opened");

        Ok(Self {
            store,
            order,
            streams: RwLock::new(streams),
            gc,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn store(&self) -> &Arc<NGramDatabase> {
        &self.store
    }

    pub fn reader(&self) -> Result<CountsReader<'_>> {
        let txn = self.store.database().begin_read()?;
        let table = open_read_table(&txn, NGRAMS)?;
        Ok(CountsReader {
            store: &self.store,
            table,
            _txn: txn,
        })
    }

    pub fn get_counts(&self, memory: MemoryId, hash: u64) -> Result<Counts> {
        self.reader()?.get(memory, hash)
    }

    /// `(word_count, unique_word_count)` of `memory`, as `count` and `successors`.
    pub fn get_word_counts(&self, memory: MemoryId) -> Result<Counts> {
        self.get_counts(memory, WORD_COUNTS_HASH)
    }

    /// Every live `(memory, hash, counts)` entry, word-count records included.
    pub fn iter(&self) -> Result<impl Iterator<Item = (MemoryId, u64, Counts)>> {
        let txn = self.store.database().begin_read()?;
        let mut entries = Vec::new();
        if let Some(table) = open_read_table(&txn, NGRAMS)? {
            let generations = self.store.generations();
            for item in table.iter()? {
                let (key, value) = item?;
                let Some((memory, generation, hash)) = parse_key(key.value()) else {
                    continue;
                };
                if generations.get(&memory) != Some(&generation) {
                    continue;
                }
                let (count, successors) = value.value();
                entries.push((memory, hash, Counts::new(count, successors)));
            }
        }
        Ok(entries.into_iter())
    }

    /// Stored keys, retired generations included.
    pub fn estimate_size(&self) -> Result<u64> {
        db::table_len(&self.store.database(), NGRAMS)
    }

    pub fn force_compaction(&self) -> Result<()> {
        let compacted = self.store.compact()?;
        info!(compacted, "n-gram storage compaction finished");
        Ok(())
    }

    pub fn get_latest_updates_identifier(&self) -> HashMap<StreamId, SeqId> {
        self.streams.read().to_map()
    }

    pub fn streams(&self) -> StreamWatermarks {
        self.streams.read().clone()
    }

    pub fn collect_garbage(&self, budget: Option<usize>) -> Result<Progress> {
        self.gc.collect(budget)
    }

    pub fn garbage_backlog(&self) -> Vec<(MemoryId, Generation)> {
        self.gc.backlog()
    }

    pub fn close(&self) -> Result<()> {
        self.gc.stop()
    }
}

/// Finds the n-grams of `table` missing from the store: each one adds a
/// successor to its history, or a unique word for unigrams. Orders are
/// walked from the highest down, so a stored n-gram spares the lookups of
/// its whole history chain. Returns the number of new unique words.
fn count_new_ngrams(
    ngrams: &CountsTable<'_>,
    memory: MemoryId,
    generation: Generation,
    table: &mut NGramTable,
) -> Result<u32> {
    let mut unique_words = 0u32;
    for n in (1..=table.order()).rev() {
        let hashes: Vec<u64> = table.ngrams(n).keys().copied().collect();
        for hash in hashes {
            let (in_db_for_sure, predecessor) = {
                let ngram = &table.ngrams(n)[&hash];
                (ngram.is_in_db_for_sure, ngram.predecessor)
            };
            if in_db_for_sure {
                continue;
            }

            let stored = ngrams.get(ngram_key(memory, generation, hash).as_slice())?.is_some();
            if !stored {
                if n == 1 {
                    unique_words += 1;
                } else if let Some(history) = table.ngrams_mut(n - 1).get_mut(&predecessor) {
                    history.counts.successors += 1;
                }
            } else {
                // unigrams are always looked up
                let mut cursor = predecessor;
                for m in (2..n).rev() {
                    let Some(history) = table.ngrams_mut(m).get_mut(&cursor) else {
                        break;
                    };
                    history.is_in_db_for_sure = true;
                    cursor = history.predecessor;
                }
            }
        }
    }
    Ok(unique_words)
}

/// Adds `delta` to the stored counts of `key`; a zero result removes the key.
fn merge_counts(ngrams: &mut CountsTable<'_>, key: &[u8], delta: Counts) -> Result<()> {
    let current = ngrams
        .get(key)?
        .map(|v| {
            let (count, successors) = v.value();
            Counts::new(count, successors)
        })
        .unwrap_or_default();
    let merged = current.merge(delta);
    if merged.is_zero() {
        ngrams.remove(key)?;
    } else {
        ngrams.insert(key, (merged.count, merged.successors))?;
    }
    Ok(())
}

impl BatchWriter<SentenceBatch> for NGramStorage {
    /// Counts the batch per memory and merges it into the store together
    /// with generation changes, deletion markers and watermarks in one commit.
    fn put_batch(&self, batch: &UpdateBatch<SentenceBatch>) -> Result<()> {
        let started = Instant::now();
        let content = batch.content();

        let mut generations = self.store.generations();
        let mut changed = Vec::new();
        let mut retired = Vec::new();
        for &memory in &content.deletions {
            let current = generations.get(&memory).copied().unwrap_or(0);
            let next = current.wrapping_add(1);
            self.gc.reclaim_before_reuse(memory, next)?;
            generations.insert(memory, next);
            retired.push((memory, current));
            changed.push(memory);
        }

        let mut tables: BTreeMap<MemoryId, NGramTable> = BTreeMap::new();
        for (memory, sentence) in &content.sentences {
            tables
                .entry(*memory)
                .or_insert_with(|| NGramTable::new(self.order))
                .add_sentence(sentence);
        }
        for memory in tables.keys() {
            if !generations.contains_key(memory) {
                generations.insert(*memory, 0);
                changed.push(*memory);
            }
        }

        let mut entries = 0usize;
        let txn = self.store.database().begin_write()?;
        {
            let mut ngrams = txn.open_table(NGRAMS)?;
            for (memory, table) in &mut tables {
                let generation = generations.get(memory).copied().unwrap_or(0);
                let unique_words = count_new_ngrams(&ngrams, *memory, generation, table)?;
                let word_count = u32::try_from(table.word_count()).unwrap_or(u32::MAX);
                merge_counts(
                    &mut ngrams,
                    &ngram_key(*memory, generation, WORD_COUNTS_HASH),
                    Counts::new(word_count, unique_words),
                )?;
                for (hash, ngram) in table.iter() {
                    merge_counts(&mut ngrams, &ngram_key(*memory, generation, hash), ngram.counts)?;
                    entries += 1;
                }
            }
            let mut table = txn.open_table(GENERATIONS)?;
            for memory in &changed {
                if let Some(generation) = generations.get(memory) {
                    table.insert(*memory, *generation)?;
                }
            }
            let mut table = txn.open_table(DELETIONS)?;
            for deletion in &retired {
                table.insert(*deletion, ())?;
            }
        }
        db::put_meta(&txn, STREAMS_KEY, batch.watermarks())?;
        txn.commit()?;

        *self.store.generations.write() = generations;
        *self.streams.write() = batch.watermarks().clone();
        self.gc.mark_for_deletion(&retired);

        debug!(
            sentences = content.sentences.len(),
            deletions = retired.len(),
            entries,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch committed"
        );
        Ok(())
    }
}
