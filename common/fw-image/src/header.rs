// Licensed under the Apache-2.0 license

use core::mem::offset_of;
use core::ops::Range;

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const IMAGE_MAGIC0: u32 = 0x4854_4341;
pub const IMAGE_MAGIC1: u32 = 0x4143_5448;

/// The image carries a signature in its public TLV region.
pub const IMAGE_FLAG_SIGNED: u32 = 0x04;

/// Header area size written when a header has to be synthesized.
pub const DEFAULT_HEADER_SIZE: u16 = 0x200;
pub const IMAGE_ALIGN: usize = 512;

pub const IMAGE_HEADER_LEN: usize = core::mem::size_of::<ImageHeader>();
pub const HDR_CHKSUM_OFFSET: usize = offset_of!(ImageHeader, hdr_chksum);

pub const NAME_BOOT: [u8; 4] = *b"boot";
pub const NAME_BREC: [u8; 4] = *b"brec";

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct ImageHeader {
    pub magic0: U32,
    pub magic1: U32,
    pub load_addr: U32,
    pub name: [u8; 4],
    pub reserved: [u8; 4],
    pub run_addr: U32,
    pub img_size: U32,
    pub img_chksum: U32,
    pub hdr_chksum: U32,
    pub header_size: U16,
    pub ptlv_size: U16,
    pub tlv_size: U16,
    pub version: U16,
    pub flags: U32,
}

impl ImageHeader {
    pub fn has_valid_magic(&self) -> bool {
        self.magic0.get() == IMAGE_MAGIC0 && self.magic1.get() == IMAGE_MAGIC1
    }

    pub fn is_signed(&self) -> bool {
        self.flags.get() & IMAGE_FLAG_SIGNED != 0
    }

    /// Offset of the protected TLV region, right after the body.
    pub fn protected_tlv_offset(&self) -> usize {
        self.header_size.get() as usize + self.img_size.get() as usize
    }

    /// Offset of the public TLV region, right after the protected one.
    pub fn public_tlv_offset(&self) -> usize {
        self.protected_tlv_offset() + self.ptlv_size.get() as usize
    }

    /// Bytes covered by `img_chksum`: body plus protected TLV region.
    pub fn body_range(&self) -> Range<usize> {
        self.header_size.get() as usize..self.public_tlv_offset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_offsets() {
        assert_eq!(IMAGE_HEADER_LEN, 0x30);
        assert_eq!(offset_of!(ImageHeader, name), 0x0c);
        assert_eq!(offset_of!(ImageHeader, run_addr), 0x14);
        assert_eq!(offset_of!(ImageHeader, img_size), 0x18);
        assert_eq!(HDR_CHKSUM_OFFSET, 0x20);
        assert_eq!(offset_of!(ImageHeader, header_size), 0x24);
        assert_eq!(offset_of!(ImageHeader, ptlv_size), 0x26);
        assert_eq!(offset_of!(ImageHeader, tlv_size), 0x28);
        assert_eq!(offset_of!(ImageHeader, flags), 0x2c);
    }

    #[test]
    fn test_regions() {
        let mut raw = [0u8; IMAGE_HEADER_LEN];
        raw[..4].copy_from_slice(&IMAGE_MAGIC0.to_le_bytes());
        raw[4..8].copy_from_slice(&IMAGE_MAGIC1.to_le_bytes());
        let mut header = ImageHeader::read_from_bytes(&raw).unwrap();
        assert!(header.has_valid_magic());
        header.header_size.set(0x200);
        header.img_size.set(0x1000);
        header.ptlv_size.set(0x10);
        assert_eq!(header.protected_tlv_offset(), 0x1200);
        assert_eq!(header.public_tlv_offset(), 0x1210);
        assert_eq!(header.body_range(), 0x200..0x1210);
        assert!(!header.is_signed());
    }
}
