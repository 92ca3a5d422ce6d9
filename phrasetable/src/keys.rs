//! Prefix-index key layout.
//!
//! `P` big-endian word ids (zero padded) followed by the memory id and its
//! generation, both big-endian. Keys sharing a word prefix are contiguous so
//! a global lookup is a range scan over all memories.

use mmt_core::codec::{put_u16_be, put_u32_be, read_u16_be, read_u32_be};
use mmt_core::{Generation, MemoryId, WordId};

/// Word part of a key: the first `prefix_length` words of `words`, zero padded.
pub fn word_prefix(words: &[WordId], prefix_length: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix_length * 4 + 6);
    for i in 0..prefix_length {
        put_u32_be(&mut key, words.get(i).copied().unwrap_or(0));
    }
    key
}

pub fn prefix_key(words: &[WordId], prefix_length: usize, memory: MemoryId, generation: Generation) -> Vec<u8> {
    let mut key = word_prefix(words, prefix_length);
    put_u32_be(&mut key, memory);
    put_u16_be(&mut key, generation);
    key
}

/// Memory and generation of a full prefix key.
pub fn parse_owner(key: &[u8], prefix_length: usize) -> Option<(MemoryId, Generation)> {
    let mut ptr = prefix_length * 4;
    let memory = read_u32_be(key, &mut ptr)?;
    let generation = read_u16_be(key, &mut ptr)?;
    Some((memory, generation))
}

/// Exclusive upper bound of the keys starting with `prefix`, `None` when unbounded.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Source keys of every phrase of length `1..=prefix_length` in `sentence`,
/// each with the position where the phrase starts.
pub fn sentence_prefixes(sentence: &[WordId], prefix_length: usize) -> impl Iterator<Item = (usize, &[WordId])> + '_ {
    (0..sentence.len()).flat_map(move |start| {
        let max = prefix_length.min(sentence.len() - start);
        (1..=max).map(move |len| (start, &sentence[start..start + len]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_phrases_are_zero_padded() {
        let key = prefix_key(&[7, 8], 3, 5, 1);
        assert_eq!(key.len(), 3 * 4 + 6);
        assert_eq!(&key[..12], &[0, 0, 0, 7, 0, 0, 0, 8, 0, 0, 0, 0]);
        assert_eq!(parse_owner(&key, 3), Some((5, 1)));
        assert!(key.starts_with(&word_prefix(&[7, 8, 0, 4], 3)));
    }

    #[test]
    fn successor_bounds_the_prefix_range() {
        assert_eq!(prefix_successor(&[1, 2]), Some(vec![1, 3]));
        assert_eq!(prefix_successor(&[1, 255]), Some(vec![2]));
        assert_eq!(prefix_successor(&[255, 255]), None);
    }

    #[test]
    fn every_start_and_length_is_enumerated() {
        let prefixes: Vec<(usize, Vec<WordId>)> = sentence_prefixes(&[1, 2, 3], 2)
            .map(|(s, p)| (s, p.to_vec()))
            .collect();
        assert_eq!(
            prefixes,
            vec![
                (0, vec![1]),
                (0, vec![1, 2]),
                (1, vec![2]),
                (1, vec![2, 3]),
                (2, vec![3]),
            ]
        );
    }
}
