//! Storage manifest: per-memory generation and committed bucket size.

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use mmt_core::db::open_read_table;
use mmt_core::{Generation, MemoryId, Result};

pub(crate) const MANIFEST: TableDefinition<u32, &[u8]> = TableDefinition::new("manifest");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub generation: Generation,
    /// Committed bytes of the generation's bucket, `-1` for a fresh generation.
    pub size: i64,
}

impl ManifestEntry {
    pub fn fresh(generation: Generation) -> Self {
        Self { generation, size: -1 }
    }
}

impl Default for ManifestEntry {
    fn default() -> Self {
        Self::fresh(0)
    }
}

pub fn load(db: &Database) -> Result<HashMap<MemoryId, ManifestEntry>> {
    let txn = db.begin_read()?;
    let mut entries = HashMap::new();
    if let Some(table) = open_read_table(&txn, MANIFEST)? {
        for item in table.iter()? {
            let (memory, value) = item?;
            entries.insert(memory.value(), bincode::deserialize(value.value())?);
        }
    }
    Ok(entries)
}

pub fn put(txn: &WriteTransaction, memory: MemoryId, entry: &ManifestEntry) -> Result<()> {
    let bytes = bincode::serialize(entry)?;
    let mut table = txn.open_table(MANIFEST)?;
    table.insert(memory, bytes.as_slice())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.redb");
        {
            let db = mmt_core::db::open_database(&path).unwrap();
            assert!(load(&db).unwrap().is_empty());
            let txn = db.begin_write().unwrap();
            put(&txn, 4, &ManifestEntry { generation: 2, size: 120 }).unwrap();
            put(&txn, 9, &ManifestEntry::fresh(1)).unwrap();
            txn.commit().unwrap();
        }
        let db = mmt_core::db::open_database(&path).unwrap();
        let entries = load(&db).unwrap();
        assert_eq!(entries[&4], ManifestEntry { generation: 2, size: 120 });
        assert_eq!(entries[&9].size, -1);
    }
}
