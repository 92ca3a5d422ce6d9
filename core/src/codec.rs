//! Byte codec for the on-disk formats.
//!
//! Record payloads (corpus buckets, posting entries, counts) are little-endian,
//! keys are big-endian so redb orders them by their numeric components.
//! All readers take a cursor and return `None` when the buffer is too short.

#[inline]
pub fn put_u16_le(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_u32_le(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_i64_le(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn put_u16_be(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn put_u32_be(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

#[inline]
pub fn put_u64_be(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

#[inline]
fn take<const N: usize>(data: &[u8], ptr: &mut usize) -> Option<[u8; N]> {
    let end = ptr.checked_add(N)?;
    let bytes: [u8; N] = data.get(*ptr..end)?.try_into().ok()?;
    *ptr = end;
    Some(bytes)
}

#[inline]
pub fn read_u16_le(data: &[u8], ptr: &mut usize) -> Option<u16> {
    take::<2>(data, ptr).map(u16::from_le_bytes)
}

#[inline]
pub fn read_u32_le(data: &[u8], ptr: &mut usize) -> Option<u32> {
    take::<4>(data, ptr).map(u32::from_le_bytes)
}

#[inline]
pub fn read_i64_le(data: &[u8], ptr: &mut usize) -> Option<i64> {
    take::<8>(data, ptr).map(i64::from_le_bytes)
}

#[inline]
pub fn read_u16_be(data: &[u8], ptr: &mut usize) -> Option<u16> {
    take::<2>(data, ptr).map(u16::from_be_bytes)
}

#[inline]
pub fn read_u32_be(data: &[u8], ptr: &mut usize) -> Option<u32> {
    take::<4>(data, ptr).map(u32::from_be_bytes)
}

#[inline]
pub fn read_u64_be(data: &[u8], ptr: &mut usize) -> Option<u64> {
    take::<8>(data, ptr).map(u64::from_be_bytes)
}

/// 64-bit avalanche mix (splitmix64 finalizer).
#[inline]
pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Extends the hash of a word sequence by one word.
///
/// The result is never `0`, which stays reserved for the empty sequence.
#[inline]
pub fn hash_extend(prefix: u64, word: u32) -> u64 {
    let h = mix64(prefix ^ mix64(u64::from(word).wrapping_add(0x9e37_79b9_7f4a_7c15)));
    if h == 0 {
        1
    } else {
        h
    }
}

/// Hash of a word sequence; `0` for the empty sequence.
pub fn hash_words(words: &[u32]) -> u64 {
    words.iter().fold(0, |h, &w| hash_extend(h, w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian_layout_matches_wire_format() {
        let mut buf = Vec::new();
        put_u32_le(&mut buf, 0x0403_0201);
        put_u16_le(&mut buf, 0x0605);
        assert_eq!(buf, vec![1, 2, 3, 4, 5, 6]);

        let mut ptr = 0;
        assert_eq!(read_u32_le(&buf, &mut ptr), Some(0x0403_0201));
        assert_eq!(read_u16_le(&buf, &mut ptr), Some(0x0605));
        assert_eq!(ptr, 6);
    }

    #[test]
    fn big_endian_keys_sort_numerically() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        put_u32_be(&mut a, 255);
        put_u32_be(&mut b, 256);
        assert!(a < b);
    }

    #[test]
    fn short_buffers_do_not_advance_cursor() {
        let buf = [1u8, 2, 3];
        let mut ptr = 0;
        assert_eq!(read_u32_le(&buf, &mut ptr), None);
        assert_eq!(ptr, 0);
        assert_eq!(read_i64_le(&buf, &mut ptr), None);
    }

    #[test]
    fn negative_offsets_survive_i64_codec() {
        let mut buf = Vec::new();
        put_i64_le(&mut buf, -42);
        let mut ptr = 0;
        assert_eq!(read_i64_le(&buf, &mut ptr), Some(-42));
    }

    #[test]
    fn word_hash_is_incremental_and_never_zero() {
        let words = [7u32, 11, 13];
        let stepwise = hash_extend(hash_extend(hash_extend(0, 7), 11), 13);
        assert_eq!(hash_words(&words), stepwise);
        assert_eq!(hash_words(&[]), 0);
        assert_ne!(hash_words(&[0]), 0);
        assert_ne!(hash_words(&[7, 11]), hash_words(&[11, 7]));
    }
}
