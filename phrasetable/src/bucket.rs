//! Append-only, memory-mapped storage of one memory generation.
//!
//! Record layout (little-endian): source word ids followed by a `0`
//! terminator, target words likewise, then the alignment as a `u32` count and
//! `count` pairs of `u16` positions. A record is addressed by its byte offset.

use memmap2::{Mmap, MmapOptions};
use parking_lot::{Mutex, RwLock};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

use mmt_core::codec::{put_u16_le, put_u32_le, read_u16_le, read_u32_le};
use mmt_core::{Alignment, Error, Result, TranslationUnit, WordId, END_OF_SENTENCE};

pub fn encode_record(source: &[WordId], target: &[WordId], alignment: &Alignment) -> Vec<u8> {
    let size = (source.len() + target.len() + 2) * 4 + 4 + alignment.len() * 4;
    let mut buf = Vec::with_capacity(size);
    for &w in source {
        put_u32_le(&mut buf, w);
    }
    put_u32_le(&mut buf, END_OF_SENTENCE);
    for &w in target {
        put_u32_le(&mut buf, w);
    }
    put_u32_le(&mut buf, END_OF_SENTENCE);
    put_u32_le(&mut buf, alignment.len() as u32);
    for &(s, t) in alignment {
        put_u16_le(&mut buf, s);
        put_u16_le(&mut buf, t);
    }
    buf
}

fn read_sentence(data: &[u8], ptr: &mut usize) -> Option<Vec<WordId>> {
    let mut words = Vec::new();
    loop {
        let word = read_u32_le(data, ptr)?;
        if word == END_OF_SENTENCE {
            return Some(words);
        }
        words.push(word);
    }
}

fn read_alignment(data: &[u8], ptr: &mut usize) -> Option<Alignment> {
    let count = read_u32_le(data, ptr)? as usize;
    if data.len().saturating_sub(*ptr) < count.checked_mul(4)? {
        return None;
    }
    let mut alignment = Vec::with_capacity(count);
    for _ in 0..count {
        let s = read_u16_le(data, ptr)?;
        let t = read_u16_le(data, ptr)?;
        alignment.push((s, t));
    }
    Some(alignment)
}

/// Decodes the record at `offset`; returns it with the offset of the next record.
pub fn decode_record(data: &[u8], offset: u64) -> Option<(TranslationUnit, u64)> {
    let mut ptr = usize::try_from(offset).ok()?;
    if ptr >= data.len() {
        return None;
    }
    let source = read_sentence(data, &mut ptr)?;
    let target = read_sentence(data, &mut ptr)?;
    let alignment = read_alignment(data, &mut ptr)?;
    Some((TranslationUnit::new(source, target, alignment), ptr as u64))
}

struct Writer {
    file: File,
    cursor: u64,
}

pub struct StorageBucket {
    path: PathBuf,
    writer: Mutex<Writer>,
    map: RwLock<Option<Arc<Mmap>>>,
    delete_on_drop: AtomicBool,
}

impl StorageBucket {
    /// Opens or creates the bucket at `path`. A committed `size >= 0` drops any
    /// bytes written past it; `-1` starts an empty file.
    pub fn open<P: AsRef<Path>>(path: P, size: i64) -> Result<Self> {
        Self::open_with(path.as_ref(), size, true)
    }

    /// Opens the bucket at `path` only if its file exists.
    pub fn open_existing<P: AsRef<Path>>(path: P, size: i64) -> Result<Self> {
        Self::open_with(path.as_ref(), size, false)
    }

    fn open_with(path: &Path, size: i64, create: bool) -> Result<Self> {
        let path = path.to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::storage_io(format!("cannot open file {}", path.display()), e))?;

        let cursor = if size < 0 { 0 } else { size as u64 };
        let length = file.metadata()?.len();
        if length < cursor {
            return Err(Error::storage(format!(
                "invalid file size specified for {}: {} > {}",
                path.display(),
                cursor,
                length
            )));
        }
        if length > cursor {
            file.set_len(cursor)?;
        }
        file.seek(SeekFrom::Start(cursor))?;

        let map = map_file(&file, cursor)?;
        Ok(Self {
            path,
            writer: Mutex::new(Writer { file, cursor }),
            map: RwLock::new(map),
            delete_on_drop: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record and returns its permanent offset. The record becomes
    /// readable after the next [`flush`](StorageBucket::flush).
    pub fn append(&self, source: &[WordId], target: &[WordId], alignment: &Alignment) -> Result<u64> {
        let buffer = encode_record(source, target, alignment);
        let mut writer = self.writer.lock();
        let offset = writer.cursor;
        writer
            .file
            .write_all(&buffer)
            .map_err(|e| Error::storage_io("unable to append data to corpus storage", e))?;
        writer.cursor += buffer.len() as u64;
        Ok(offset)
    }

    /// Syncs appended data to disk and extends the mapping over it.
    /// Returns the new mapped size.
    pub fn flush(&self) -> Result<u64> {
        let writer = self.writer.lock();
        writer
            .file
            .sync_data()
            .map_err(|e| Error::storage_io("failed to flush data to disk", e))?;
        let map = map_file(&writer.file, writer.cursor)?;
        *self.map.write() = map;
        Ok(writer.cursor)
    }

    pub fn mapped_size(&self) -> u64 {
        self.map.read().as_ref().map_or(0, |m| m.len() as u64)
    }

    /// Size including appended but not yet flushed records.
    pub fn size(&self) -> u64 {
        self.writer.lock().cursor
    }

    pub fn retrieve(&self, offset: u64) -> Result<TranslationUnit> {
        let map = self.map.read().clone();
        let data = map.as_deref().map_or(&[][..], |m| &m[..]);
        decode_record(data, offset)
            .map(|(unit, _)| unit)
            .ok_or(Error::Corrupted { offset })
    }

    /// Sequential reader over the currently mapped records, from `offset`.
    pub fn iter_from(&self, offset: u64) -> StorageIterator {
        StorageIterator::new(self.map.read().clone(), offset)
    }

    /// Unlinks the file when the last reference is dropped.
    pub fn mark_for_deletion(&self) {
        self.delete_on_drop.store(true, Ordering::Release);
    }
}

impl Drop for StorageBucket {
    fn drop(&mut self) {
        if self.delete_on_drop.load(Ordering::Acquire) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %self.path.display(), error = %e, "unable to remove bucket");
                }
            }
        }
    }
}

fn map_file(file: &File, len: u64) -> Result<Option<Arc<Mmap>>> {
    if len == 0 {
        return Ok(None);
    }
    let len = usize::try_from(len).map_err(|_| Error::storage("bucket too large to map"))?;
    // SAFETY: the mapping is read-only and the file is only ever appended to
    // or truncated at open, before any mapping exists.
    let map = unsafe { MmapOptions::new().len(len).map(file) }
        .map_err(|e| Error::storage_io("unable to map bucket", e))?;
    Ok(Some(Arc::new(map)))
}

/// Maps the first `size` bytes of a retired bucket without modifying it.
/// A missing file reads as empty.
pub fn map_retired<P: AsRef<Path>>(path: P, size: u64) -> Result<Option<Arc<Mmap>>> {
    let file = match File::open(path.as_ref()) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::storage_io(format!("cannot open file {}", path.as_ref().display()), e)),
    };
    let len = file.metadata()?.len().min(size);
    map_file(&file, len)
}

/// Walks records sequentially; used to enumerate a generation being deleted.
pub struct StorageIterator {
    map: Option<Arc<Mmap>>,
    position: u64,
}

impl StorageIterator {
    pub fn new(map: Option<Arc<Mmap>>, position: u64) -> Self {
        Self { map, position }
    }

    /// Offset of the next record to read.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_eof(&self) -> bool {
        self.position >= self.map.as_ref().map_or(0, |m| m.len() as u64)
    }

    /// Next `(offset, record)`, `None` at end of data.
    pub fn next_record(&mut self) -> Result<Option<(u64, TranslationUnit)>> {
        if self.is_eof() {
            return Ok(None);
        }
        let data = self.map.as_deref().map_or(&[][..], |m| &m[..]);
        let offset = self.position;
        let (unit, next) = decode_record(data, offset).ok_or(Error::Corrupted { offset })?;
        self.position = next;
        Ok(Some((offset, unit)))
    }
}
