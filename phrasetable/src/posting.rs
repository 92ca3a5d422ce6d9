//! Posting lists: sequences of `(storage offset, word offset)` entries grouped
//! by the memory generation whose bucket they point into.

use std::collections::BTreeMap;

use mmt_core::codec::{put_i64_le, put_u16_le, read_i64_le, read_u16_le};
use mmt_core::{Generation, Length, MemoryId};

/// Encoded size of one posting entry.
pub const ENTRY_SIZE: usize = 10;

/// A phrase occurrence: record offset in the bucket of one memory generation
/// plus the position of the phrase's first word in the source sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub memory: MemoryId,
    pub generation: Generation,
    pub pointer: i64,
    pub offset: Length,
}

pub fn encode_entry(buf: &mut Vec<u8>, pointer: i64, offset: Length) {
    put_i64_le(buf, pointer);
    put_u16_le(buf, offset);
}

/// Decodes a posting blob; a trailing partial entry is ignored.
pub fn decode_entries(blob: &[u8]) -> impl Iterator<Item = (i64, Length)> + '_ {
    blob.chunks_exact(ENTRY_SIZE).filter_map(|chunk| {
        let mut ptr = 0;
        Some((read_i64_le(chunk, &mut ptr)?, read_u16_le(chunk, &mut ptr)?))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostingList {
    data: BTreeMap<(MemoryId, Generation), Vec<u8>>,
    entries: usize,
}

impl PostingList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an encoded posting blob of `generation` of `memory`.
    pub fn append_blob(&mut self, memory: MemoryId, generation: Generation, blob: &[u8]) {
        let usable = blob.len() - blob.len() % ENTRY_SIZE;
        if usable == 0 {
            return;
        }
        self.data
            .entry((memory, generation))
            .or_default()
            .extend_from_slice(&blob[..usable]);
        self.entries += usable / ENTRY_SIZE;
    }

    pub fn append(&mut self, memory: MemoryId, generation: Generation, pointer: i64, offset: Length) {
        encode_entry(self.data.entry((memory, generation)).or_default(), pointer, offset);
        self.entries += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn len(&self) -> usize {
        self.entries
    }

    /// Memory generations holding entries.
    pub fn owners(&self) -> impl Iterator<Item = (MemoryId, Generation)> + '_ {
        self.data.keys().copied()
    }

    /// Keeps the entries at `(pointer, offset)` for which `other` holds
    /// `(pointer, offset + start)` in the same memory generation.
    pub fn retain(&mut self, other: &PostingList, start: usize) {
        let mut entries = 0;
        self.data.retain(|owner, blob| {
            let Some(successors) = other.data.get(owner) else {
                return false;
            };
            let successors: ahash::AHashSet<(i64, Length)> = decode_entries(successors).collect();
            let kept: Vec<u8> = blob
                .chunks_exact(ENTRY_SIZE)
                .filter(|chunk| {
                    decode_entries(chunk).next().is_some_and(|(pointer, offset)| {
                        usize::from(offset)
                            .checked_add(start)
                            .and_then(|o| Length::try_from(o).ok())
                            .is_some_and(|shifted| successors.contains(&(pointer, shifted)))
                    })
                })
                .flatten()
                .copied()
                .collect();
            *blob = kept;
            entries += blob.len() / ENTRY_SIZE;
            !blob.is_empty()
        });
        self.entries = entries;
    }

    /// All locations, or `limit` of them drawn by a shuffle seeded with `seed`.
    /// The output keeps owner order and, within an owner, insertion order.
    pub fn get_locations(&self, limit: usize, seed: u64) -> Vec<Location> {
        let all = self.data.iter().flat_map(|(&(memory, generation), blob)| {
            decode_entries(blob).map(move |(pointer, offset)| Location {
                memory,
                generation,
                pointer,
                offset,
            })
        });
        if limit == 0 || self.entries <= limit {
            return all.collect();
        }

        let mut rng = fastrand::Rng::with_seed(seed);
        let mut indexes: Vec<usize> = (0..self.entries).collect();
        rng.shuffle(&mut indexes);
        indexes.truncate(limit);
        indexes.sort_unstable();

        let mut selected = indexes.into_iter().peekable();
        let mut out = Vec::with_capacity(limit);
        for (i, location) in all.enumerate() {
            match selected.peek() {
                Some(&next) if next == i => {
                    out.push(location);
                    selected.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(MemoryId, i64, Length)]) -> PostingList {
        let mut list = PostingList::new();
        for &(m, p, o) in entries {
            list.append(m, 0, p, o);
        }
        list
    }

    #[test]
    fn blob_and_entry_appends_agree() {
        let mut blob = Vec::new();
        encode_entry(&mut blob, 40, 2);
        encode_entry(&mut blob, -1, 0);
        let mut from_blob = PostingList::new();
        from_blob.append_blob(7, 0, &blob);
        assert_eq!(from_blob, list(&[(7, 40, 2), (7, -1, 0)]));
        assert_eq!(from_blob.len(), 2);
    }

    #[test]
    fn retain_keeps_shifted_successors_only() {
        let mut prefixes = list(&[(1, 0, 0), (1, 0, 3), (1, 50, 1), (2, 10, 0)]);
        let successors = list(&[(1, 0, 2), (1, 50, 3), (3, 10, 2)]);
        prefixes.retain(&successors, 2);
        assert_eq!(prefixes, list(&[(1, 0, 0), (1, 50, 1)]));
        assert_eq!(prefixes.owners().collect::<Vec<_>>(), vec![(1, 0)]);

        prefixes.retain(&PostingList::new(), 1);
        assert!(prefixes.is_empty());
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let entries: Vec<(MemoryId, i64, Length)> = (0..200).map(|i| (i % 3, i as i64 * 10, 0)).collect();
        let l = list(&entries);
        let a = l.get_locations(20, 99);
        let b = l.get_locations(20, 99);
        assert_eq!(a.len(), 20);
        assert_eq!(a, b);
        assert_eq!(l.get_locations(0, 99).len(), 200);
        assert_eq!(l.get_locations(500, 1).len(), 200);
        assert_ne!(l.get_locations(20, 99), l.get_locations(20, 12345));
    }

    #[test]
    fn generations_of_one_memory_do_not_join() {
        let mut prefixes = PostingList::new();
        prefixes.append(4, 0, 30, 0);
        prefixes.append(4, 1, 30, 0);
        let mut successors = PostingList::new();
        successors.append(4, 1, 30, 1);
        prefixes.retain(&successors, 1);
        assert_eq!(prefixes.owners().collect::<Vec<_>>(), vec![(4, 1)]);

        let locations = prefixes.get_locations(0, 1);
        assert_eq!(
            locations,
            vec![Location {
                memory: 4,
                generation: 1,
                pointer: 30,
                offset: 0
            }]
        );
    }
}
