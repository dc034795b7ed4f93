// Licensed under the Apache-2.0 license

//! Checksum primitives shared by every container in this crate.
//!
//! Word sums read little-endian words. A trailing partial word is summed as
//! if it were zero padded to the word size.

use crc32fast::Hasher;

/// Standard reflected CRC-32 (polynomial 0xEDB88320), seed 0.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Wrapping sum of little-endian 32-bit words.
pub fn sum32(data: &[u8]) -> u32 {
    let mut words = data.chunks_exact(4);
    let sum = words
        .by_ref()
        .fold(0u32, |acc, w| acc.wrapping_add(u32::from_le_bytes([w[0], w[1], w[2], w[3]])));
    let rest = words.remainder();
    if rest.is_empty() {
        return sum;
    }
    let mut tail = [0u8; 4];
    tail[..rest.len()].copy_from_slice(rest);
    sum.wrapping_add(u32::from_le_bytes(tail))
}

pub fn sum32_complement(data: &[u8]) -> u32 {
    u32::MAX.wrapping_sub(sum32(data))
}

/// Wrapping sum of little-endian 16-bit words.
pub fn sum16(data: &[u8]) -> u16 {
    let mut words = data.chunks_exact(2);
    let sum = words
        .by_ref()
        .fold(0u16, |acc, w| acc.wrapping_add(u16::from_le_bytes([w[0], w[1]])));
    match words.remainder() {
        [last] => sum.wrapping_add(*last as u16),
        _ => sum,
    }
}

pub fn sum16_complement(data: &[u8]) -> u16 {
    u16::MAX.wrapping_sub(sum16(data))
}
