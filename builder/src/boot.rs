// Licensed under the Apache-2.0 license

//! Post-build steps for boot loader images: boot parameters, NAND id tables
//! and the final checksums.

use std::path::Path;

use fw_image::boot::{
    BootParameters, LegacyBootHeader, BOOT_PARAMS_LEN, BOOT_PARAMS_MAGIC, BOOT_PARAMS_OFFSET,
    LEGACY_BOOT_HEADER_LEN, LEGACY_HEADER_CHKSUM_OFFSET,
};
use fw_image::checksum::sum16_complement;
use fw_image::header::{IMAGE_ALIGN, IMAGE_MAGIC0, IMAGE_MAGIC1, NAME_BREC};
use fw_image::tlv::{TLV_TYPE_BOOTINI, TLV_TYPE_NANDID};
use fw_image::align_up;
use log::{info, warn};
use serde::Deserialize;
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::error::{FormatError, Result};
use crate::image::FirmwareImage;
use crate::tlv::{region_footprint, TlvRegion};

/// Boot parameters as written in a boot config file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct BootParamsConfig {
    pub uart_baudrate: u32,
    #[serde(default)]
    pub uart_id: u8,
    #[serde(default)]
    pub uart_mfp: u8,
    #[serde(default)]
    pub jtag_group: u8,
    #[serde(default)]
    pub psram_mfp: u8,
    #[serde(default)]
    pub adfu_txrx: u8,
    #[serde(default)]
    pub adfu_gpio: u8,
}

impl BootParamsConfig {
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    pub fn to_parameters(&self) -> BootParameters {
        let mut params = BootParameters::new_zeroed();
        params.magic.set(BOOT_PARAMS_MAGIC);
        params.uart_baudrate.set(self.uart_baudrate);
        params.uart_id = self.uart_id;
        params.uart_mfp = self.uart_mfp;
        params.jtag_group = self.jtag_group;
        params.psram_mfp = self.psram_mfp;
        params.adfu_txrx = self.adfu_txrx;
        params.adfu_gpio = self.adfu_gpio;
        params.update_checksum();
        params
    }
}

/// Add boot parameters and the NAND id table to a boot image as public TLV
/// records, then checksum and pad it.
///
/// A recovery loader (`brec`) only gets the boot parameters.
pub fn boot_post_build(
    image: Vec<u8>,
    params: Option<&BootParameters>,
    nand_id: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut image = FirmwareImage::new(image);
    let header = image.check_header(false)?;

    let mut records: Vec<(u16, &[u8])> = Vec::new();
    match params {
        Some(params) => records.push((TLV_TYPE_BOOTINI, params.as_bytes())),
        None => warn!("boot: no boot parameters"),
    }
    if header.name != NAME_BREC {
        if let Some(nand_id) = nand_id {
            records.push((TLV_TYPE_NANDID, nand_id));
        }
    }

    let lens: Vec<usize> = records.iter().map(|(_, value)| value.len()).collect();
    let tlv_size = u16::try_from(region_footprint(&lens))
        .map_err(|_| FormatError::Overflow("public TLV region"))?;
    image.update_header(|h| h.tlv_size.set(tlv_size))?;
    for (kind, value) in records {
        image.append_tlv(TlvRegion::Public, kind, value)?;
    }
    image.recompute_checksums()?;
    image.pad_to(IMAGE_ALIGN);
    info!(
        "boot: {:?} post build done, tlv {:#x}, {} bytes",
        String::from_utf8_lossy(&header.name),
        tlv_size,
        image.len()
    );
    Ok(image.into_bytes())
}

/// Finish a boot image that carries the 32 byte legacy header.
///
/// Boot parameters go to their fixed slot, the NAND id table is appended,
/// and both 16-bit checksums are written over the padded image.
pub fn legacy_boot_post_build(
    mut image: Vec<u8>,
    params: Option<&BootParameters>,
    nand_id: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let (mut header, _) = LegacyBootHeader::read_from_prefix(&image)
        .map_err(|_| FormatError::Truncated("boot header"))?;
    if header.magic0.get() != IMAGE_MAGIC0 || header.magic1.get() != IMAGE_MAGIC1 {
        return Err(FormatError::BadMagic("boot header").into());
    }
    let header_size = header.header_size.get() as usize;
    if header_size < LEGACY_BOOT_HEADER_LEN {
        return Err(FormatError::Malformed("boot header size").into());
    }

    if let Some(params) = params {
        let end = BOOT_PARAMS_OFFSET + BOOT_PARAMS_LEN;
        if image.len() < end || header_size < end {
            return Err(FormatError::Truncated("boot parameter slot").into());
        }
        image[BOOT_PARAMS_OFFSET..end].copy_from_slice(params.as_bytes());
    }
    // tail_size records the loader size before the NAND id table.
    let tail_size = image.len();
    if let Some(nand_id) = nand_id.filter(|id| !id.is_empty()) {
        info!("boot: appending {} byte NAND id table", nand_id.len());
        image.extend_from_slice(nand_id);
    }
    image.resize(align_up(image.len(), IMAGE_ALIGN), 0);
    if image.len() < header_size {
        return Err(FormatError::Truncated("boot image").into());
    }
    let body_size = image.len() - header_size;

    header.body_size.set(body_size as u32);
    header.tail_size.set(tail_size as u32);
    header
        .data_chksum
        .set(sum16_complement(&image[header_size..]));
    header.header_chksum.set(0);
    image[..LEGACY_BOOT_HEADER_LEN].copy_from_slice(header.as_bytes());
    let header_chksum = sum16_complement(&image[..header_size]);
    image[LEGACY_HEADER_CHKSUM_OFFSET..LEGACY_HEADER_CHKSUM_OFFSET + 2]
        .copy_from_slice(&header_chksum.to_le_bytes());
    Ok(image)
}
