// Licensed under the Apache-2.0 license

use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// "LZMA" read as a little-endian word.
pub const LZMA_BLOCK_MAGIC: u32 = 0x414d_5a4c;
pub const LZMA_BLOCK_HEADER_LEN: usize = core::mem::size_of::<LzmaBlockHeader>();

/// Block size used for OTA partition files.
pub const OTA_BLOCK_SIZE: usize = 0x8000;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LzmaBlockHeader {
    pub magic: U32,
    pub header_size: U32,
    pub compressed_size: U32,
    pub original_size: U32,
}

impl LzmaBlockHeader {
    pub fn new(compressed_size: u32, original_size: u32) -> Self {
        Self {
            magic: LZMA_BLOCK_MAGIC.into(),
            header_size: (LZMA_BLOCK_HEADER_LEN as u32).into(),
            compressed_size: compressed_size.into(),
            original_size: original_size.into(),
        }
    }
}

/// Decompression block size the loader can buffer for a given PSRAM size.
pub fn block_size_for_psram(psram_kb: u32) -> usize {
    match psram_kb {
        4096.. => 0x20_0000,
        1024.. => 0x4_0000,
        _ => OTA_BLOCK_SIZE,
    }
}
