// Licensed under the Apache-2.0 license

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::trim_name;

pub const ATF_MAGIC: [u8; 8] = *b"ACTATF\0\0";
pub const ATF_HEADER_AREA: usize = 512;
pub const ATF_MAX_FILES: usize = 15;
pub const ATF_ALIGN: usize = 512;
/// `head_checksum` covers the header area from here on.
pub const ATF_HEAD_CHECKSUM_START: usize = 8;

pub const DIR_NAME_LEN: usize = 12;
pub const DIR_ENTRY_LEN: usize = core::mem::size_of::<DirEntry>();
pub const ATF_HEADER_LEN: usize = core::mem::size_of::<AtfHeader>();

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct AtfHeader {
    pub magic: [u8; 8],
    pub version_tag: [u8; 4],
    pub file_count: U16,
    pub reserved0: [u8; 2],
    pub data_checksum: U32,
    pub head_checksum: U32,
    pub reserved1: [u8; 8],
}

/// Directory slot shared by the archive and the OTA package.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct DirEntry {
    pub name: [u8; DIR_NAME_LEN],
    pub reserved0: [u8; 4],
    pub offset: U32,
    pub length: U32,
    pub reserved1: [u8; 4],
    /// CRC-32 of the unpadded file.
    pub checksum: U32,
}

impl DirEntry {
    pub fn name(&self) -> &[u8] {
        trim_name(&self.name)
    }

    pub fn is_used(&self) -> bool {
        self.name[0] != 0
    }
}
