// Licensed under the Apache-2.0 license

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::trim_name;

pub const OTA_MAGIC: [u8; 4] = *b"AOTA";
pub const OTA_HEADER_VERSION: u16 = 0x0100;
pub const OTA_HEADER_SIZE: u16 = 0x400;
pub const OTA_DIR_OFFSET: u16 = 0x200;
pub const OTA_DATA_OFFSET: u16 = 0x400;
pub const OTA_NEW_VERSION_OFFSET: usize = 0x40;
pub const OTA_OLD_VERSION_OFFSET: usize = 0xa0;
/// `header_checksum` covers everything from here up to `data_offset`.
pub const OTA_HEADER_CHECKSUM_START: usize = 8;
pub const OTA_MAX_FILES: usize = 16;
pub const OTA_ALIGN: usize = 512;

pub const OTA_HEADER_LEN: usize = core::mem::size_of::<OtaHeader>();
pub const FIRMWARE_VERSION_LEN: usize = core::mem::size_of::<FirmwareVersion>();

pub const VERSION_NAME_LEN: usize = 32;
pub const BOARD_NAME_LEN: usize = 24;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct OtaHeader {
    pub magic: [u8; 4],
    pub header_checksum: U32,
    pub header_version: U16,
    pub header_size: U16,
    pub file_cnt: U16,
    pub flag: U16,
    pub dir_offset: U16,
    pub data_offset: U16,
    /// End offset of the padded payload region.
    pub data_size: U32,
    pub data_checksum: U32,
    pub reserved: [u8; 36],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct FirmwareVersion {
    pub version_name: [u8; VERSION_NAME_LEN],
    pub board_name: [u8; BOARD_NAME_LEN],
    pub reserved0: [u8; 4],
    pub version_code: U32,
    pub version_res: U32,
    pub reserved1: [u8; 28],
}

impl FirmwareVersion {
    pub fn version_name(&self) -> &[u8] {
        trim_name(&self.version_name)
    }

    pub fn board_name(&self) -> &[u8] {
        trim_name(&self.board_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::offset_of;

    #[test]
    fn test_layout() {
        assert_eq!(OTA_HEADER_LEN, 0x40);
        assert_eq!(FIRMWARE_VERSION_LEN, 96);
        assert_eq!(OTA_NEW_VERSION_OFFSET + FIRMWARE_VERSION_LEN, OTA_OLD_VERSION_OFFSET);
        assert_eq!(offset_of!(OtaHeader, file_cnt), 0x0c);
        assert_eq!(offset_of!(OtaHeader, data_size), 0x14);
        assert_eq!(offset_of!(OtaHeader, data_checksum), 0x18);
        assert_eq!(offset_of!(FirmwareVersion, version_code), 0x3c);
        assert!(OTA_MAX_FILES * crate::archive::DIR_ENTRY_LEN <= (OTA_DATA_OFFSET - OTA_DIR_OFFSET) as usize);
    }
}
