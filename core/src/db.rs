//! redb helpers shared by the phrase-table index and the n-gram store.
//!
//! Small structured records (watermarks, checkpoints, manifests) live in a
//! `meta` table as bincode blobs keyed by name.

use redb::{Database, ReadTransaction, ReadableTable, ReadableTableMetadata, TableDefinition, TableError, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use crate::streams::StreamWatermarks;
use crate::Result;

pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Committed stream watermarks.
pub const STREAMS_KEY: &str = "streams";

/// Garbage-collection checkpoint of the deletion in progress.
pub const PENDING_DELETION_KEY: &str = "pending_deletion";

/// Create or open the database at `path`, creating parent directories.
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<Database> {
    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Database::create(path.as_ref())?)
}

/// Opens `table` for reading; a table never written to reads as `None`.
pub fn open_read_table<K, V>(
    txn: &ReadTransaction,
    table: TableDefinition<K, V>,
) -> Result<Option<redb::ReadOnlyTable<K, V>>>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    match txn.open_table(table) {
        Ok(t) => Ok(Some(t)),
        Err(TableError::TableDoesNotExist(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_meta<T: DeserializeOwned>(db: &Database, key: &str) -> Result<Option<T>> {
    let txn = db.begin_read()?;
    let Some(table) = open_read_table(&txn, META)? else {
        return Ok(None);
    };
    match table.get(key)? {
        Some(value) => Ok(Some(bincode::deserialize(value.value())?)),
        None => Ok(None),
    }
}

pub fn put_meta<T: Serialize>(txn: &WriteTransaction, key: &str, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value)?;
    let mut table = txn.open_table(META)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

pub fn remove_meta(txn: &WriteTransaction, key: &str) -> Result<()> {
    let mut table = txn.open_table(META)?;
    table.remove(key)?;
    Ok(())
}

pub fn load_streams(db: &Database) -> Result<StreamWatermarks> {
    Ok(get_meta(db, STREAMS_KEY)?.unwrap_or_default())
}

/// Number of entries in `table`, `0` if it does not exist yet.
pub fn table_len<K, V>(db: &Database, table: TableDefinition<K, V>) -> Result<u64>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    let txn = db.begin_read()?;
    match open_read_table(&txn, table)? {
        Some(t) => Ok(t.len()?),
        None => Ok(0),
    }
}
