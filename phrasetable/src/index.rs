//! Prefix index: redb tables mapping phrase prefixes to corpus postings,
//! plus the corpora storage the postings point into.

use parking_lot::{RwLock, RwLockReadGuard};
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use mmt_core::db::{self, open_read_table, META};
use mmt_core::{Error, Generation, MemoryId, Result, StreamWatermarks, WordId};

use crate::corpora::{CorporaStorage, Retired};
use crate::cursor::{CursorScope, PrefixCursor};
use crate::keys;
use crate::manifest::{self, ManifestEntry, MANIFEST};

/// `prefix key -> posting blob`
pub(crate) const PREFIXES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("prefixes");

/// `target word prefix -> occurrences`, across memories.
pub(crate) const TARGET_COUNTS: TableDefinition<&[u8], u64> = TableDefinition::new("target_counts");

/// `(memory, retired generation) -> committed bucket size`
pub(crate) const DELETIONS: TableDefinition<(u32, u16), u64> = TableDefinition::new("deletions");

const PREFIX_LENGTH_KEY: &str = "prefix_length";

pub const INDEX_FILE: &str = "index.redb";
pub const STORAGE_DIR: &str = "storage";

pub struct PrefixIndex {
    // Write-locked only to compact.
    db: RwLock<Database>,
    corpora: CorporaStorage,
    prefix_length: usize,
}

impl PrefixIndex {
    /// Opens the index under `model_dir`. The prefix length is fixed at creation.
    pub fn open<P: AsRef<Path>>(model_dir: P, prefix_length: usize) -> Result<Self> {
        let dir = model_dir.as_ref();
        let database = db::open_database(dir.join(INDEX_FILE))?;

        match db::get_meta::<u64>(&database, PREFIX_LENGTH_KEY)? {
            Some(stored) if stored as usize != prefix_length => {
                return Err(Error::Config(format!(
                    "index was built with prefix length {stored}, configured {prefix_length}"
                )));
            }
            Some(_) => {}
            None => {
                let txn = database.begin_write()?;
                db::put_meta(&txn, PREFIX_LENGTH_KEY, &(prefix_length as u64))?;
                txn.commit()?;
            }
        }

        let corpora = CorporaStorage::open(dir.join(STORAGE_DIR), manifest::load(&database)?)?;
        Ok(Self {
            db: RwLock::new(database),
            corpora,
            prefix_length,
        })
    }

    pub fn prefix_length(&self) -> usize {
        self.prefix_length
    }

    pub fn database(&self) -> RwLockReadGuard<'_, Database> {
        self.db.read()
    }

    pub fn corpora(&self) -> &CorporaStorage {
        &self.corpora
    }

    pub fn streams(&self) -> Result<StreamWatermarks> {
        db::load_streams(&self.database())
    }

    pub fn memory_cursor(self: &Arc<Self>, memory: MemoryId) -> PrefixCursor {
        PrefixCursor::new(self.clone(), CursorScope::Memory(memory))
    }

    /// Cursor over all memories but `excluded`.
    pub fn global_cursor(self: &Arc<Self>, excluded: impl IntoIterator<Item = MemoryId>) -> PrefixCursor {
        PrefixCursor::new(self.clone(), CursorScope::Global(excluded.into_iter().collect()))
    }

    /// Postings of `words` (at most `prefix_length` long) in one memory generation.
    pub(crate) fn postings(&self, words: &[WordId], memory: MemoryId, generation: Generation) -> Result<Option<Vec<u8>>> {
        let key = keys::prefix_key(words, self.prefix_length, memory, generation);
        let txn = self.database().begin_read()?;
        let Some(table) = open_read_table(&txn, PREFIXES)? else {
            return Ok(None);
        };
        Ok(table.get(key.as_slice())?.map(|v| v.value().to_vec()))
    }

    /// Postings of `words` in every live memory generation not in `excluded`.
    pub(crate) fn scan_postings(
        &self,
        words: &[WordId],
        excluded: &ahash::AHashSet<MemoryId>,
    ) -> Result<Vec<(MemoryId, Generation, Vec<u8>)>> {
        let start = keys::word_prefix(words, self.prefix_length);
        let txn = self.database().begin_read()?;
        let Some(table) = open_read_table(&txn, PREFIXES)? else {
            return Ok(Vec::new());
        };
        let range = match keys::prefix_successor(&start) {
            Some(end) => table.range(start.as_slice()..end.as_slice())?,
            None => table.range(start.as_slice()..)?,
        };

        let mut values = Vec::new();
        for item in range {
            let (key, value) = item?;
            let Some((memory, generation)) = keys::parse_owner(key.value(), self.prefix_length) else {
                continue;
            };
            if excluded.contains(&memory) || self.corpora.generation(memory) != Some(generation) {
                continue;
            }
            values.push((memory, generation, value.value().to_vec()));
        }
        Ok(values)
    }

    /// Occurrences of a target phrase of at most `prefix_length` words.
    pub fn target_count(&self, phrase: &[WordId]) -> Result<u64> {
        if phrase.is_empty() || phrase.len() > self.prefix_length {
            return Err(Error::InvalidArgument(format!(
                "target phrase length must be in 1..={}",
                self.prefix_length
            )));
        }
        let key = keys::word_prefix(phrase, self.prefix_length);
        let txn = self.database().begin_read()?;
        let Some(table) = open_read_table(&txn, TARGET_COUNTS)? else {
            return Ok(0);
        };
        Ok(table.get(key.as_slice())?.map_or(0, |v| v.value()))
    }

    /// Retired generations still holding index entries.
    pub fn retired(&self) -> Result<Vec<Retired>> {
        let txn = self.database().begin_read()?;
        let mut out = Vec::new();
        if let Some(table) = open_read_table(&txn, DELETIONS)? {
            for item in table.iter()? {
                let (key, size) = item?;
                let (memory, generation) = key.value();
                out.push(Retired {
                    memory,
                    generation,
                    size: size.value(),
                });
            }
        }
        Ok(out)
    }

    pub fn manifest(&self) -> HashMap<MemoryId, ManifestEntry> {
        self.corpora.manifest()
    }

    /// Entry counts of the index tables, by table name.
    pub fn table_sizes(&self) -> Result<Vec<(&'static str, u64)>> {
        let database = self.database();
        Ok(vec![
            ("prefixes", db::table_len(&database, PREFIXES)?),
            ("target_counts", db::table_len(&database, TARGET_COUNTS)?),
            ("manifest", db::table_len(&database, MANIFEST)?),
            ("deletions", db::table_len(&database, DELETIONS)?),
            ("meta", db::table_len(&database, META)?),
        ])
    }

    /// Compacts the database file; fails while read transactions are open.
    pub fn compact(&self) -> Result<bool> {
        Ok(self.db.write().compact()?)
    }
}
