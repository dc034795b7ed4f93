// Licensed under the Apache-2.0 license

//! Fixed-slot archive used for low-level multi-file bundles.
//!
//! A 512 byte header area (32 byte header plus 15 directory slots) is
//! followed by the files, each padded to 512 bytes.

use std::mem::offset_of;

use fw_image::archive::{
    AtfHeader, DirEntry, ATF_ALIGN, ATF_HEADER_AREA, ATF_HEADER_LEN, ATF_HEAD_CHECKSUM_START,
    ATF_MAGIC, ATF_MAX_FILES, DIR_ENTRY_LEN,
};
use fw_image::checksum::crc32;
use fw_image::{align_up, fixed_name};
use log::{debug, info};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::error::{checksum_mismatch, Error, FormatError, Result};
use crate::NamedFile;

const HEAD_CHECKSUM_OFFSET: usize = offset_of!(AtfHeader, head_checksum);

/// Lay out `files` in an archive tagged with `version_tag`.
pub fn build(files: &[NamedFile], version_tag: [u8; 4]) -> Result<Vec<u8>> {
    if files.len() > ATF_MAX_FILES {
        return Err(FormatError::Overflow("archive directory").into());
    }

    let mut out = vec![0u8; ATF_HEADER_AREA];
    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let name = fixed_name(file.name.as_bytes())
            .ok_or_else(|| FormatError::NameTooLong(file.name.clone()))?;
        if file.data.is_empty() {
            return Err(FormatError::EmptyFile(file.name.clone()).into());
        }
        let mut entry = DirEntry::new_zeroed();
        entry.name = name;
        entry.offset.set(out.len() as u32);
        entry.length.set(file.data.len() as u32);
        entry.checksum.set(crc32(&file.data));
        debug!(
            "archive: {} at {:#x}, {} bytes",
            file.name,
            out.len(),
            file.data.len()
        );
        entries.push(entry);

        out.extend_from_slice(&file.data);
        out.resize(align_up(out.len(), ATF_ALIGN), 0);
    }

    let mut header = AtfHeader::new_zeroed();
    header.magic = ATF_MAGIC;
    header.version_tag = version_tag;
    header.file_count.set(files.len() as u16);
    header
        .data_checksum
        .set(crc32(&out[ATF_HEADER_AREA..]));
    out[..ATF_HEADER_LEN].copy_from_slice(header.as_bytes());
    for (i, entry) in entries.iter().enumerate() {
        let offset = ATF_HEADER_LEN + i * DIR_ENTRY_LEN;
        out[offset..offset + DIR_ENTRY_LEN].copy_from_slice(entry.as_bytes());
    }
    let head_checksum = crc32(&out[ATF_HEAD_CHECKSUM_START..ATF_HEADER_AREA]);
    out[HEAD_CHECKSUM_OFFSET..HEAD_CHECKSUM_OFFSET + 4]
        .copy_from_slice(&head_checksum.to_le_bytes());

    info!(
        "archive: {} files, {} bytes",
        files.len(),
        out.len()
    );
    Ok(out)
}

fn parse_header(archive: &[u8]) -> Result<AtfHeader> {
    if archive.len() < ATF_HEADER_AREA {
        return Err(FormatError::Truncated("archive header").into());
    }
    let header = AtfHeader::read_from_bytes(&archive[..ATF_HEADER_LEN])
        .map_err(|_| FormatError::Malformed("archive header"))?;
    if header.magic != ATF_MAGIC {
        return Err(FormatError::BadMagic("archive header").into());
    }
    Ok(header)
}

fn slots(archive: &[u8]) -> impl Iterator<Item = DirEntry> + '_ {
    archive[ATF_HEADER_LEN..ATF_HEADER_AREA]
        .chunks_exact(DIR_ENTRY_LEN)
        .filter_map(|slot| DirEntry::read_from_bytes(slot).ok())
}

fn payload<'a>(archive: &'a [u8], entry: &DirEntry) -> Result<&'a [u8]> {
    let start = entry.offset.get() as usize;
    let end = start + entry.length.get() as usize;
    archive
        .get(start..end)
        .ok_or_else(|| FormatError::Truncated("archive payload").into())
}

/// Find `name` the way the boot code does: a linear scan of the slots that
/// stops at the first empty one.
pub fn extract<'a>(archive: &'a [u8], name: &str) -> Result<&'a [u8]> {
    parse_header(archive)?;
    for entry in slots(archive) {
        if entry.length.get() == 0 {
            break;
        }
        if entry.name() == name.as_bytes() {
            return payload(archive, &entry);
        }
    }
    Err(Error::NotFound(name.to_string()))
}

/// Check both archive CRCs and every file CRC, returning the used slots.
pub fn verify(archive: &[u8]) -> Result<Vec<DirEntry>> {
    let header = parse_header(archive)?;

    let mut head = archive[..ATF_HEADER_AREA].to_vec();
    head[HEAD_CHECKSUM_OFFSET..HEAD_CHECKSUM_OFFSET + 4].fill(0);
    let computed = crc32(&head[ATF_HEAD_CHECKSUM_START..]);
    if computed != header.head_checksum.get() {
        return Err(checksum_mismatch(
            "archive header",
            header.head_checksum.get(),
            computed,
        ));
    }

    let computed = crc32(&archive[ATF_HEADER_AREA..]);
    if computed != header.data_checksum.get() {
        return Err(checksum_mismatch(
            "archive data",
            header.data_checksum.get(),
            computed,
        ));
    }

    let count = header.file_count.get() as usize;
    if count > ATF_MAX_FILES {
        return Err(FormatError::Malformed("archive file count").into());
    }
    let entries: Vec<DirEntry> = slots(archive).take(count).collect();
    for entry in &entries {
        let computed = crc32(payload(archive, entry)?);
        if computed != entry.checksum.get() {
            return Err(checksum_mismatch(
                String::from_utf8_lossy(entry.name()),
                entry.checksum.get(),
                computed,
            ));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IntegrityError;

    fn files() -> Vec<NamedFile> {
        vec![
            NamedFile::new("mbrec.bin", vec![0xa5; 700]),
            NamedFile::new("param.bin", b"baudrate=2000000".to_vec()),
            NamedFile::new("nand_id.bin", vec![0x3c; 512]),
        ]
    }

    #[test]
    fn test_build_layout() {
        let archive = build(&files(), *b"1.00").unwrap();
        assert_eq!(archive.len(), 512 + 1024 + 512 + 512);
        assert_eq!(&archive[..8], &ATF_MAGIC);

        let entries = verify(&archive).unwrap();
        let offsets: Vec<u32> = entries.iter().map(|e| e.offset.get()).collect();
        assert_eq!(offsets, vec![512, 1536, 2048]);
        assert_eq!(entries[0].length.get(), 700);
        assert_eq!(entries[1].name(), b"param.bin");

        // Head CRC is taken after the data CRC is stored.
        let mut head = archive[..512].to_vec();
        head[0x14..0x18].fill(0);
        assert_eq!(
            u32::from_le_bytes(archive[0x14..0x18].try_into().unwrap()),
            crc32(&head[8..])
        );
    }

    #[test]
    fn test_extract() {
        let archive = build(&files(), *b"1.00").unwrap();
        assert_eq!(extract(&archive, "param.bin").unwrap(), b"baudrate=2000000");
        assert_eq!(extract(&archive, "nand_id.bin").unwrap(), &[0x3c; 512][..]);
        assert!(matches!(
            extract(&archive, "missing.bin"),
            Err(Error::NotFound(name)) if name == "missing.bin"
        ));
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let too_many: Vec<NamedFile> = (0..16)
            .map(|i| NamedFile::new(format!("f{}.bin", i), vec![i as u8 + 1]))
            .collect();
        let err = build(&too_many, *b"1.00").unwrap_err();
        assert_eq!(err.as_format(), Some(&FormatError::Overflow("archive directory")));

        let err = build(&[NamedFile::new("a_very_long_name.bin", vec![1])], *b"1.00").unwrap_err();
        assert!(matches!(err.as_format(), Some(FormatError::NameTooLong(_))));

        let err = build(&[NamedFile::new("empty.bin", vec![])], *b"1.00").unwrap_err();
        assert_eq!(
            err.as_format(),
            Some(&FormatError::EmptyFile("empty.bin".to_string()))
        );
    }

    #[test]
    fn test_fifteen_files_fit() {
        let files: Vec<NamedFile> = (0..15)
            .map(|i| NamedFile::new(format!("f{}.bin", i), vec![i as u8 + 1; 3]))
            .collect();
        let archive = build(&files, *b"1.00").unwrap();
        assert_eq!(verify(&archive).unwrap().len(), 15);
        assert_eq!(extract(&archive, "f14.bin").unwrap(), &[15, 15, 15]);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let mut archive = build(&files(), *b"1.00").unwrap();
        archive[600] ^= 0xff;
        assert!(matches!(
            verify(&archive),
            Err(Error::Integrity(IntegrityError::ChecksumMismatch { .. }))
        ));

        let mut archive = build(&files(), *b"1.00").unwrap();
        archive[0] = b'X';
        assert_eq!(
            verify(&archive).unwrap_err().as_format(),
            Some(&FormatError::BadMagic("archive header"))
        );
        assert!(extract(&archive[..100], "param.bin").is_err());
    }
}
