// Licensed under the Apache-2.0 license

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic of the protected region, covered by the body checksum.
pub const TLV_PROT_INFO_MAGIC: u16 = 0x593a;
/// Magic of the public region, which holds the signature.
pub const TLV_INFO_MAGIC: u16 = 0x5935;

pub const TLV_TYPE_KEYHASH: u16 = 0x01;
pub const TLV_TYPE_PUBKEY: u16 = 0x02;
pub const TLV_TYPE_SHA256: u16 = 0x04;
pub const TLV_TYPE_RSA2048_PSS: u16 = 0x08;
pub const TLV_TYPE_PUBKEY_BROM: u16 = 0x10;
pub const TLV_TYPE_BOOTINI: u16 = 0x1000;
pub const TLV_TYPE_NANDID: u16 = 0x2000;

/// Public region budget reserved by the signing tool.
pub const DEFAULT_TLV_RESERVE: u16 = 2048;

pub const TLV_INFO_LEN: usize = core::mem::size_of::<TlvInfo>();
pub const TLV_RECORD_HEADER_LEN: usize = core::mem::size_of::<TlvRecordHeader>();

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TlvInfo {
    pub magic: U16,
    pub total_size: U16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct TlvRecordHeader {
    pub kind: U16,
    pub len: U16,
}

impl TlvInfo {
    pub fn new(magic: u16, total_size: u16) -> Self {
        Self {
            magic: magic.into(),
            total_size: total_size.into(),
        }
    }

    /// Bytes the region occupies in the image.
    pub fn footprint(&self) -> usize {
        self.total_size.get() as usize + TLV_INFO_LEN
    }
}
