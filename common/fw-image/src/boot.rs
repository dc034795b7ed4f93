// Licensed under the Apache-2.0 license

use core::mem::offset_of;

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::checksum::crc32;

/// "BPAR" read as a little-endian word.
pub const BOOT_PARAMS_MAGIC: u32 = 0x5241_5042;
/// Where the legacy boot image keeps its parameter block.
pub const BOOT_PARAMS_OFFSET: usize = 0x30;
pub const BOOT_PARAMS_LEN: usize = core::mem::size_of::<BootParameters>();
pub const LEGACY_BOOT_HEADER_LEN: usize = core::mem::size_of::<LegacyBootHeader>();
pub const LEGACY_HEADER_CHKSUM_OFFSET: usize = offset_of!(LegacyBootHeader, header_chksum);

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct BootParameters {
    pub magic: U32,
    pub uart_baudrate: U32,
    pub uart_id: u8,
    pub uart_mfp: u8,
    pub jtag_group: u8,
    pub psram_mfp: u8,
    pub adfu_txrx: u8,
    pub adfu_gpio: u8,
    pub reserved: [u8; 14],
    /// CRC-32 of every byte before this field.
    pub checksum: U32,
}

impl BootParameters {
    pub fn update_checksum(&mut self) {
        let crc = crc32(&self.as_bytes()[..offset_of!(BootParameters, checksum)]);
        self.checksum.set(crc);
    }

    pub fn verify(&self) -> bool {
        self.magic.get() == BOOT_PARAMS_MAGIC
            && crc32(&self.as_bytes()[..offset_of!(BootParameters, checksum)])
                == self.checksum.get()
    }
}

/// Header of boot images that predate the TLV trailer; checksummed with
/// 16-bit word sums.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct LegacyBootHeader {
    pub magic0: U32,
    pub magic1: U32,
    pub load_addr: U32,
    pub name: [u8; 4],
    pub version: U16,
    pub header_size: U16,
    pub header_chksum: U16,
    pub data_chksum: U16,
    pub body_size: U32,
    /// Length of the image before padding.
    pub tail_size: U32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromZeros;

    #[test]
    fn test_layout() {
        assert_eq!(BOOT_PARAMS_LEN, 32);
        assert_eq!(LEGACY_BOOT_HEADER_LEN, 32);
        assert_eq!(offset_of!(BootParameters, checksum), 28);
        assert_eq!(LEGACY_HEADER_CHKSUM_OFFSET, 0x14);
        assert_eq!(offset_of!(LegacyBootHeader, body_size), 0x18);
    }

    #[test]
    fn test_boot_parameters_checksum() {
        let mut params = BootParameters::new_zeroed();
        params.magic.set(BOOT_PARAMS_MAGIC);
        params.uart_baudrate.set(115200);
        assert!(!params.verify());
        params.update_checksum();
        assert!(params.verify());
        params.uart_id = 1;
        assert!(!params.verify());
    }
}
