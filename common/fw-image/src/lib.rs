// Licensed under the Apache-2.0 license

//! On-flash layouts for Actions firmware images, archives and OTA packages.
//!
//! Everything here is plain data: fixed little-endian structures that can be
//! read straight out of a byte buffer, plus the checksum primitives the boot
//! code uses to validate them. The host-side builder lives in `fw-builder`.

#![cfg_attr(target_arch = "riscv32", no_std)]

pub mod archive;
pub mod boot;
pub mod checksum;
pub mod header;
pub mod lzma;
pub mod ota;
pub mod tlv;

pub use archive::{AtfHeader, DirEntry};
pub use boot::{BootParameters, LegacyBootHeader};
pub use header::ImageHeader;
pub use lzma::LzmaBlockHeader;
pub use ota::{FirmwareVersion, OtaHeader};
pub use tlv::{TlvInfo, TlvRecordHeader};

/// Round `len` up to the next multiple of `align`.
pub const fn align_up(len: usize, align: usize) -> usize {
    len.div_ceil(align) * align
}

/// Copy `src` into a fixed-size, NUL padded name field.
///
/// Returns `None` when `src` does not fit.
pub fn fixed_name<const N: usize>(src: &[u8]) -> Option<[u8; N]> {
    if src.len() > N {
        return None;
    }
    let mut name = [0u8; N];
    name[..src.len()].copy_from_slice(src);
    Some(name)
}

/// The bytes of a NUL padded name field up to the first NUL.
pub fn trim_name(name: &[u8]) -> &[u8] {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    &name[..end]
}
