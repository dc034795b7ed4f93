// Licensed under the Apache-2.0 license

//! TLV trailer regions that follow the image body.
//!
//! A region is a `{magic, total_size}` sub-header followed by records. The
//! first record sets `total_size` to `len + 8`; each later record is written
//! at `start + total_size + 4` and adds `len + 4`. The region footprint is
//! always `total_size + 4`, which is also where the next record goes.

use fw_image::tlv::{
    TlvInfo, TlvRecordHeader, TLV_INFO_LEN, TLV_INFO_MAGIC, TLV_PROT_INFO_MAGIC,
    TLV_RECORD_HEADER_LEN,
};
use fw_image::ImageHeader;
use log::debug;
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{FormatError, Result};
use crate::image::FirmwareImage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TlvRegion {
    /// Covered by the body checksum; its footprint is the header's `ptlv_size`.
    Protected,
    /// Holds the signature; bounded by the header's `tlv_size` reservation.
    Public,
}

impl TlvRegion {
    pub fn magic(self) -> u16 {
        match self {
            TlvRegion::Protected => TLV_PROT_INFO_MAGIC,
            TlvRegion::Public => TLV_INFO_MAGIC,
        }
    }

    fn start(self, header: &ImageHeader) -> usize {
        match self {
            TlvRegion::Protected => header.protected_tlv_offset(),
            TlvRegion::Public => header.public_tlv_offset(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlvRecord {
    pub kind: u16,
    pub value: Vec<u8>,
}

/// Footprint of a region holding records with the given value lengths.
pub fn region_footprint(value_lens: &[usize]) -> usize {
    match value_lens.split_first() {
        None => 0,
        Some((first, rest)) => {
            first + 8 + rest.iter().map(|len| len + TLV_RECORD_HEADER_LEN).sum::<usize>()
                + TLV_INFO_LEN
        }
    }
}

fn read_record_header(data: &[u8], offset: usize) -> Result<TlvRecordHeader> {
    let bytes = data
        .get(offset..offset + TLV_RECORD_HEADER_LEN)
        .ok_or(FormatError::Truncated("TLV record"))?;
    Ok(TlvRecordHeader::read_from_bytes(bytes).map_err(|_| FormatError::Malformed("TLV record"))?)
}

impl FirmwareImage {
    /// The sub-header of `region`, or `None` when the region is absent.
    fn tlv_info(&self, header: &ImageHeader, region: TlvRegion) -> Result<Option<TlvInfo>> {
        let start = region.start(header);
        let data = self.as_bytes();
        match region {
            TlvRegion::Protected if header.ptlv_size.get() == 0 => return Ok(None),
            TlvRegion::Public if data.len() <= start => return Ok(None),
            _ => {}
        }
        let bytes = data
            .get(start..start + TLV_INFO_LEN)
            .ok_or(FormatError::Truncated("TLV region"))?;
        let info = TlvInfo::read_from_bytes(bytes).map_err(|_| FormatError::Malformed("TLV region"))?;
        // Zero padding after the body is not a region.
        if region == TlvRegion::Public && info.magic.get() == 0 && info.total_size.get() == 0 {
            return Ok(None);
        }
        if info.magic.get() != region.magic() {
            return Err(FormatError::BadMagic("TLV region").into());
        }
        Ok(Some(info))
    }

    /// Offset just past the end of `region`; equal to its start when the
    /// region is absent.
    pub fn region_tail_offset(&self, region: TlvRegion) -> Result<u32> {
        let header = self.header()?;
        let start = region.start(&header);
        let footprint = self
            .tlv_info(&header, region)?
            .map_or(0, |info| info.footprint());
        Ok((start + footprint) as u32)
    }

    /// Append one record to `region`, creating the region if needed, and
    /// return the new `total_size`.
    ///
    /// Protected appends move `ptlv_size` to the new footprint. Public appends
    /// must fit the header's `tlv_size` reservation. Nothing is written when
    /// the append fails.
    pub fn append_tlv(&mut self, region: TlvRegion, kind: u16, value: &[u8]) -> Result<u16> {
        let header = self.header()?;
        let start = region.start(&header);
        if self.len() < start {
            return Err(FormatError::Truncated("image body").into());
        }
        if region == TlvRegion::Protected
            && self.tlv_info(&header, TlvRegion::Public)?.is_some()
        {
            return Err(FormatError::RegionOrder.into());
        }

        let len = u16::try_from(value.len()).map_err(|_| FormatError::Overflow("TLV record"))?;
        let (offset, total) = match self.tlv_info(&header, region)? {
            None => (start + TLV_INFO_LEN, value.len() + 8),
            Some(info) => (
                start + info.footprint(),
                info.total_size.get() as usize + value.len() + TLV_RECORD_HEADER_LEN,
            ),
        };
        let total = u16::try_from(total).map_err(|_| FormatError::Overflow("TLV region"))?;
        let footprint = total as usize + TLV_INFO_LEN;
        if region == TlvRegion::Public && footprint > header.tlv_size.get() as usize {
            debug!(
                "public TLV footprint {:#x} exceeds reservation {:#x}",
                footprint,
                header.tlv_size.get()
            );
            return Err(FormatError::Overflow("public TLV region").into());
        }
        let ptlv_size = u16::try_from(footprint).map_err(|_| FormatError::Overflow("TLV region"))?;

        let record = TlvRecordHeader {
            kind: kind.into(),
            len: len.into(),
        };
        let data = self.data_mut();
        let end = (start + footprint).max(data.len());
        data.resize(end, 0);
        data[start..start + TLV_INFO_LEN]
            .copy_from_slice(TlvInfo::new(region.magic(), total).as_bytes());
        data[offset..offset + TLV_RECORD_HEADER_LEN].copy_from_slice(record.as_bytes());
        data[offset + TLV_RECORD_HEADER_LEN..offset + TLV_RECORD_HEADER_LEN + value.len()]
            .copy_from_slice(value);

        if region == TlvRegion::Protected {
            self.update_header(|h| h.ptlv_size.set(ptlv_size))?;
        }
        debug!(
            "added TLV {:#06x} ({} bytes) to {:?} region at {:#x}, total {:#x}",
            kind,
            value.len(),
            region,
            offset,
            total
        );
        Ok(total)
    }

    /// Walk the records of `region` the way they were appended.
    pub fn tlv_records(&self, region: TlvRegion) -> Result<Vec<TlvRecord>> {
        let header = self.header()?;
        let Some(info) = self.tlv_info(&header, region)? else {
            return Ok(Vec::new());
        };
        let start = region.start(&header);
        let total = info.total_size.get() as usize;
        let data = self.as_bytes();

        let mut records = Vec::new();
        let mut offset = start + TLV_INFO_LEN;
        let mut running = 0;
        while running < total {
            let record = read_record_header(data, offset)?;
            let len = record.len.get() as usize;
            let value_start = offset + TLV_RECORD_HEADER_LEN;
            let value = data
                .get(value_start..value_start + len)
                .ok_or(FormatError::Truncated("TLV record"))?;
            records.push(TlvRecord {
                kind: record.kind.get(),
                value: value.to_vec(),
            });
            running += if running == 0 {
                len + 8
            } else {
                len + TLV_RECORD_HEADER_LEN
            };
            offset = start + running + TLV_INFO_LEN;
        }
        if running != total {
            return Err(FormatError::Malformed("TLV region").into());
        }
        Ok(records)
    }
}
