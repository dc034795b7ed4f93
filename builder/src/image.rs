// Licensed under the Apache-2.0 license

//! The image header: parsing, size bookkeeping and checksums.

use fw_image::checksum::sum32_complement;
use fw_image::header::{
    ImageHeader, DEFAULT_HEADER_SIZE, HDR_CHKSUM_OFFSET, IMAGE_HEADER_LEN, IMAGE_MAGIC0,
    IMAGE_MAGIC1, NAME_BOOT,
};
use fw_image::align_up;
use log::{debug, info};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::error::{checksum_mismatch, FormatError, Result};

/// Parse the header at the start of `data`.
pub fn parse(data: &[u8]) -> Result<ImageHeader> {
    if data.len() < IMAGE_HEADER_LEN {
        return Err(FormatError::Truncated("image header").into());
    }
    let header = ImageHeader::read_from_bytes(&data[..IMAGE_HEADER_LEN])
        .map_err(|_| FormatError::Malformed("image header"))?;
    if !header.has_valid_magic() {
        return Err(FormatError::BadMagic("image header").into());
    }
    Ok(header)
}

/// An image being built, owned as a single buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn header(&self) -> Result<ImageHeader> {
        parse(&self.data)
    }

    pub(crate) fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    /// Apply `f` to the header and write it back.
    pub fn update_header(&mut self, f: impl FnOnce(&mut ImageHeader)) -> Result<ImageHeader> {
        let mut header = self.header()?;
        f(&mut header);
        self.data[..IMAGE_HEADER_LEN].copy_from_slice(header.as_bytes());
        Ok(header)
    }

    /// Record new region sizes. Checksums are left stale until
    /// [`FirmwareImage::recompute_checksums`].
    pub fn finalize_sizes(
        &mut self,
        header_size: u16,
        img_size: u32,
        ptlv_size: u16,
        tlv_size: u16,
    ) -> Result<ImageHeader> {
        self.update_header(|h| {
            h.header_size.set(header_size);
            h.img_size.set(img_size);
            h.ptlv_size.set(ptlv_size);
            h.tlv_size.set(tlv_size);
        })
    }

    /// Recompute the body checksum and then the header checksum, which
    /// covers the new body checksum.
    pub fn recompute_checksums(&mut self) -> Result<ImageHeader> {
        let header = self.header()?;
        let header_size = header.header_size.get() as usize;
        let body = header.body_range();
        if header_size < IMAGE_HEADER_LEN {
            return Err(FormatError::Malformed("image header size").into());
        }
        if body.end > self.data.len() {
            return Err(FormatError::Truncated("image body").into());
        }

        let img_chksum = sum32_complement(&self.data[body]);
        self.update_header(|h| {
            h.img_chksum.set(img_chksum);
            h.hdr_chksum.set(0);
        })?;
        let hdr_chksum = sum32_complement(&self.data[..header_size]);
        let header = self.update_header(|h| h.hdr_chksum.set(hdr_chksum))?;
        debug!(
            "img_chksum {:#010x}, hdr_chksum {:#010x}",
            img_chksum, hdr_chksum
        );
        Ok(header)
    }

    /// Prepare a freshly linked image for signing.
    ///
    /// Pads the buffer to a word boundary, makes `img_size` cover everything
    /// after the header and clears the header checksum and protected TLV
    /// size. When the magic is missing and `synthesize` is set, a header is
    /// generated from the entry vector at 0x200 instead.
    pub fn check_header(&mut self, synthesize: bool) -> Result<ImageHeader> {
        self.pad_to(4);
        if let Err(e) = self.header() {
            if !synthesize || e.as_format() != Some(&FormatError::BadMagic("image header")) {
                return Err(e);
            }
            self.synthesize_header()?;
        }

        let len = self.data.len();
        let header = self.header()?;
        let header_size = header.header_size.get() as usize;
        if len < header_size {
            return Err(FormatError::Truncated("image body").into());
        }
        let img_size =
            u32::try_from(len - header_size).map_err(|_| FormatError::Overflow("image size"))?;
        self.update_header(|h| {
            h.img_size.set(img_size);
            h.hdr_chksum.set(0);
            h.ptlv_size.set(0);
        })
    }

    fn synthesize_header(&mut self) -> Result<()> {
        let header_size = DEFAULT_HEADER_SIZE as usize;
        if self.data.len() < header_size + 8 {
            return Err(FormatError::Truncated("image entry vector").into());
        }
        let word = |off: usize| {
            u32::from_le_bytes([
                self.data[off],
                self.data[off + 1],
                self.data[off + 2],
                self.data[off + 3],
            ])
        };
        let sp = word(header_size);
        let run_addr = word(header_size + 4);
        info!(
            "no image header, synthesizing one (sp {:#010x}, entry {:#010x})",
            sp, run_addr
        );

        let mut header = ImageHeader::new_zeroed();
        header.magic0.set(IMAGE_MAGIC0);
        header.magic1.set(IMAGE_MAGIC1);
        header.load_addr.set(run_addr);
        header.name = NAME_BOOT;
        header.run_addr.set(run_addr);
        header.header_size.set(DEFAULT_HEADER_SIZE);
        header
            .img_size
            .set((self.data.len() - header_size) as u32);
        self.data[..IMAGE_HEADER_LEN].copy_from_slice(header.as_bytes());
        Ok(())
    }

    /// Check magic and both checksums.
    pub fn verify(&self) -> Result<ImageHeader> {
        verify(&self.data)
    }

    /// Zero-pad the buffer to a multiple of `align`.
    pub fn pad_to(&mut self, align: usize) {
        let len = align_up(self.data.len(), align);
        self.data.resize(len, 0);
    }
}

/// Check the header magic, the header checksum and the body checksum.
pub fn verify(data: &[u8]) -> Result<ImageHeader> {
    let header = parse(data)?;
    let header_size = header.header_size.get() as usize;
    let body = header.body_range();
    if header_size < IMAGE_HEADER_LEN {
        return Err(FormatError::Malformed("image header size").into());
    }
    if body.end > data.len() {
        return Err(FormatError::Truncated("image body").into());
    }

    let mut head = data[..header_size].to_vec();
    head[HDR_CHKSUM_OFFSET..HDR_CHKSUM_OFFSET + 4].fill(0);
    let computed = sum32_complement(&head);
    if computed != header.hdr_chksum.get() {
        return Err(checksum_mismatch("image header", header.hdr_chksum.get(), computed));
    }

    let computed = sum32_complement(&data[body]);
    if computed != header.img_chksum.get() {
        return Err(checksum_mismatch("image body", header.img_chksum.get(), computed));
    }
    Ok(header)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{Error, IntegrityError};
    use fw_image::checksum::sum32;

    /// A 0x200 byte header area followed by `body`.
    pub(crate) fn test_image(body: &[u8]) -> FirmwareImage {
        let mut header = ImageHeader::new_zeroed();
        header.magic0.set(IMAGE_MAGIC0);
        header.magic1.set(IMAGE_MAGIC1);
        header.name = *b"app\0";
        header.header_size.set(0x200);
        header.img_size.set(body.len() as u32);
        let mut data = vec![0u8; 0x200];
        data[..IMAGE_HEADER_LEN].copy_from_slice(header.as_bytes());
        data.extend_from_slice(body);
        FirmwareImage::new(data)
    }

    #[test]
    fn test_parse_bad_magic() {
        let data = vec![0u8; 0x200];
        let err = parse(&data).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::BadMagic("image header")));
        let err = parse(&data[..0x10]).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Truncated("image header")));
    }

    #[test]
    fn test_checksums() {
        let mut image = test_image(&[1, 0, 0, 0, 2, 0, 0, 0]);
        let header = image.recompute_checksums().unwrap();
        assert_eq!(header.img_chksum.get(), 0xffff_fffc);
        // A header area including its checksum sums to all ones.
        assert_eq!(sum32(&image.as_bytes()[..0x200]), u32::MAX);
        image.verify().unwrap();
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut image = test_image(b"firmware body 0123456789abcdef");
        image.recompute_checksums().unwrap();

        let mut body_flip = image.clone();
        body_flip.data_mut()[0x204] ^= 0x01;
        match body_flip.verify() {
            Err(Error::Integrity(IntegrityError::ChecksumMismatch { what, .. })) => {
                assert_eq!(what, "image body")
            }
            other => panic!("unexpected result {:?}", other),
        }

        let mut header_flip = image.clone();
        header_flip.data_mut()[0x100] ^= 0x80;
        match header_flip.verify() {
            Err(Error::Integrity(IntegrityError::ChecksumMismatch { what, .. })) => {
                assert_eq!(what, "image header")
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_finalize_sizes_leaves_checksums_stale() {
        let mut image = test_image(&[0xaa; 16]);
        image.recompute_checksums().unwrap();
        let header = image.finalize_sizes(0x200, 8, 0, 64).unwrap();
        assert_eq!(header.img_size.get(), 8);
        assert_eq!(header.tlv_size.get(), 64);
        assert!(image.verify().is_err());
        image.recompute_checksums().unwrap();
        image.verify().unwrap();
    }

    #[test]
    fn test_check_header_pads_and_resizes() {
        let mut image = test_image(&[1, 2, 3, 4, 5, 6]);
        image.update_header(|h| {
            h.img_size.set(0);
            h.ptlv_size.set(0x20);
            h.hdr_chksum.set(0x1234);
        })
        .unwrap();
        let header = image.check_header(false).unwrap();
        assert_eq!(image.len(), 0x208);
        assert_eq!(header.img_size.get(), 8);
        assert_eq!(header.ptlv_size.get(), 0);
        assert_eq!(header.hdr_chksum.get(), 0);
    }

    #[test]
    fn test_check_header_synthesizes() {
        let mut data = vec![0u8; 0x300];
        data[0x200..0x204].copy_from_slice(&0x2000_8000u32.to_le_bytes());
        data[0x204..0x208].copy_from_slice(&0x1000_0211u32.to_le_bytes());
        let mut image = FirmwareImage::new(data.clone());
        let header = image.check_header(true).unwrap();
        assert_eq!(header.name, NAME_BOOT);
        assert_eq!(header.run_addr.get(), 0x1000_0211);
        assert_eq!(header.load_addr.get(), 0x1000_0211);
        assert_eq!(header.header_size.get(), 0x200);
        assert_eq!(header.img_size.get(), 0x100);

        let mut image = FirmwareImage::new(data);
        let err = image.check_header(false).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::BadMagic("image header")));

        let mut short = FirmwareImage::new(vec![0u8; 0x100]);
        let err = short.check_header(true).unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Truncated("image entry vector")));
    }

    #[test]
    fn test_pad_to() {
        let mut image = test_image(&[1]);
        image.pad_to(512);
        assert_eq!(image.len(), 0x400);
        image.pad_to(512);
        assert_eq!(image.len(), 0x400);
    }
}
