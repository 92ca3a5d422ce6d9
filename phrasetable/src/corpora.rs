//! Corpora storage: one bucket per live memory generation, created lazily.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use mmt_core::{Error, Generation, MemoryId, Result, TranslationUnit};

use crate::bucket::{map_retired, StorageBucket, StorageIterator};
use crate::manifest::ManifestEntry;

struct Partition {
    entry: ManifestEntry,
    bucket: Option<Arc<StorageBucket>>,
}

/// A deleted generation awaiting garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retired {
    pub memory: MemoryId,
    pub generation: Generation,
    /// Committed bytes of the retired bucket.
    pub size: u64,
}

pub struct CorporaStorage {
    dir: PathBuf,
    partitions: RwLock<HashMap<MemoryId, Partition>>,
}

impl CorporaStorage {
    pub fn open<P: AsRef<Path>>(dir: P, manifest: HashMap<MemoryId, ManifestEntry>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::storage_io(format!("cannot create {}", dir.display()), e))?;
        let partitions = manifest
            .into_iter()
            .map(|(memory, entry)| (memory, Partition { entry, bucket: None }))
            .collect();
        Ok(Self {
            dir,
            partitions: RwLock::new(partitions),
        })
    }

    pub fn bucket_path(&self, memory: MemoryId, generation: Generation) -> PathBuf {
        self.dir.join(format!("_{memory}_{generation}"))
    }

    /// Bucket of the live generation of `memory`. A bucket file is created
    /// only when `put_if_absent` is set; otherwise only a generation holding
    /// committed records is opened.
    pub fn get_bucket(
        &self,
        memory: MemoryId,
        put_if_absent: bool,
    ) -> Result<Option<(Generation, Arc<StorageBucket>)>> {
        let partitions = self.partitions.upgradable_read();
        let committed = match partitions.get(&memory) {
            Some(Partition {
                entry,
                bucket: Some(bucket),
            }) => return Ok(Some((entry.generation, bucket.clone()))),
            Some(partition) => partition.entry.size > 0,
            None => false,
        };
        if !committed && !put_if_absent {
            return Ok(None);
        }

        let mut partitions = RwLockUpgradableReadGuard::upgrade(partitions);
        let partition = partitions.entry(memory).or_insert_with(|| Partition {
            entry: ManifestEntry::default(),
            bucket: None,
        });
        let path = self.bucket_path(memory, partition.entry.generation);
        let bucket = if put_if_absent {
            StorageBucket::open(path, partition.entry.size)?
        } else {
            StorageBucket::open_existing(path, partition.entry.size)?
        };
        let bucket = Arc::new(bucket);
        debug!(memory, generation = partition.entry.generation, "bucket opened");
        partition.bucket = Some(bucket.clone());
        Ok(Some((partition.entry.generation, bucket)))
    }

    /// Live generation of `memory`, `None` if it never existed.
    pub fn generation(&self, memory: MemoryId) -> Option<Generation> {
        self.partitions.read().get(&memory).map(|p| p.entry.generation)
    }

    /// Record at `offset` in `generation` of `memory`. `None` once that
    /// generation is no longer live.
    pub fn retrieve(&self, memory: MemoryId, generation: Generation, offset: u64) -> Result<Option<TranslationUnit>> {
        match self.get_bucket(memory, false)? {
            Some((live, bucket)) if live == generation => bucket.retrieve(offset).map(Some),
            _ => Ok(None),
        }
    }

    /// Flushes the buckets of `memories` and returns their manifest entries.
    pub fn flush(&self, memories: &[MemoryId]) -> Result<Vec<(MemoryId, ManifestEntry)>> {
        let mut updated = Vec::with_capacity(memories.len());
        for &memory in memories {
            let Some((_, bucket)) = self.get_bucket(memory, false)? else {
                continue;
            };
            let size = bucket.flush()?;
            let mut partitions = self.partitions.write();
            if let Some(partition) = partitions.get_mut(&memory) {
                partition.entry.size = size as i64;
                updated.push((memory, partition.entry));
            }
        }
        Ok(updated)
    }

    /// Retires the live generation of `memory` and starts a fresh one.
    pub fn delete(&self, memory: MemoryId) -> (Retired, ManifestEntry) {
        let mut partitions = self.partitions.write();
        let old = partitions
            .remove(&memory)
            .map(|p| p.entry)
            .unwrap_or_default();
        let fresh = ManifestEntry::fresh(old.generation.wrapping_add(1));
        partitions.insert(
            memory,
            Partition {
                entry: fresh,
                bucket: None,
            },
        );
        let retired = Retired {
            memory,
            generation: old.generation,
            size: old.size.max(0) as u64,
        };
        (retired, fresh)
    }

    /// Reads a retired generation from `position`.
    pub fn iter_retired(&self, retired: &Retired, position: u64) -> Result<StorageIterator> {
        let map = map_retired(self.bucket_path(retired.memory, retired.generation), retired.size)?;
        Ok(StorageIterator::new(map, position))
    }

    /// Unlinks the bucket file of a collected generation. Readers still
    /// holding its mapping keep reading until they drop it.
    pub fn remove_retired(&self, retired: &Retired) -> Result<()> {
        let path = self.bucket_path(retired.memory, retired.generation);
        if !path.exists() {
            debug!(memory = retired.memory, generation = retired.generation, "retired bucket already removed");
            return Ok(());
        }
        let bucket = StorageBucket::open_existing(&path, retired.size as i64)?;
        bucket.mark_for_deletion();
        Ok(())
    }

    pub fn memories(&self) -> Vec<MemoryId> {
        let mut memories: Vec<MemoryId> = self.partitions.read().keys().copied().collect();
        memories.sort_unstable();
        memories
    }

    /// Memories holding committed records.
    pub fn has_data(&self, memory: MemoryId) -> bool {
        self.partitions
            .read()
            .get(&memory)
            .is_some_and(|p| p.entry.size > 0)
    }

    pub fn manifest(&self) -> HashMap<MemoryId, ManifestEntry> {
        self.partitions
            .read()
            .iter()
            .map(|(memory, p)| (*memory, p.entry))
            .collect()
    }
}
