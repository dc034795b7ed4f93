// Licensed under the Apache-2.0 license

//! OTA packages: a 1 KiB header area (header, version records, directory)
//! followed by the partition files, each padded to 512 bytes.

use std::fs;
use std::mem::offset_of;
use std::path::{Path, PathBuf};

use fw_image::archive::{DirEntry, DIR_ENTRY_LEN};
use fw_image::checksum::crc32;
use fw_image::ota::{
    FirmwareVersion, OtaHeader, BOARD_NAME_LEN, FIRMWARE_VERSION_LEN, OTA_ALIGN, OTA_DATA_OFFSET,
    OTA_DIR_OFFSET, OTA_HEADER_CHECKSUM_START, OTA_HEADER_LEN, OTA_HEADER_SIZE,
    OTA_HEADER_VERSION, OTA_MAGIC, OTA_MAX_FILES, OTA_NEW_VERSION_OFFSET, OTA_OLD_VERSION_OFFSET,
    VERSION_NAME_LEN,
};
use fw_image::{align_up, fixed_name};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use zerocopy::{FromBytes, FromZeros, IntoBytes};

use crate::config::VersionConfig;
use crate::error::{checksum_mismatch, Error, FormatError, Result};
use crate::NamedFile;

const HEADER_CHECKSUM_OFFSET: usize = offset_of!(OtaHeader, header_checksum);

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OtaVersion {
    pub version_name: String,
    pub board_name: String,
    pub version_code: u32,
    pub version_res: u32,
}

impl OtaVersion {
    pub fn from_config(config: &VersionConfig, board_name: &str) -> Self {
        Self {
            version_name: config.version_name.clone(),
            board_name: board_name.to_string(),
            version_code: config.version_code,
            version_res: config.version_res,
        }
    }

    fn to_record(&self) -> Result<FirmwareVersion> {
        let mut record = FirmwareVersion::new_zeroed();
        record.version_name = fixed_name::<VERSION_NAME_LEN>(self.version_name.as_bytes())
            .ok_or_else(|| FormatError::NameTooLong(self.version_name.clone()))?;
        record.board_name = fixed_name::<BOARD_NAME_LEN>(self.board_name.as_bytes())
            .ok_or_else(|| FormatError::NameTooLong(self.board_name.clone()))?;
        record.version_code.set(self.version_code);
        record.version_res.set(self.version_res);
        Ok(record)
    }

    fn from_record(record: &FirmwareVersion) -> Self {
        Self {
            version_name: String::from_utf8_lossy(record.version_name()).into_owned(),
            board_name: String::from_utf8_lossy(record.board_name()).into_owned(),
            version_code: record.version_code.get(),
            version_res: record.version_res.get(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OtaMetadata {
    pub new_version: OtaVersion,
    pub old_version: Option<OtaVersion>,
}

/// Assemble `files`, in the given order, into an OTA package.
pub fn pack(files: &[NamedFile], metadata: &OtaMetadata) -> Result<Vec<u8>> {
    if files.len() > OTA_MAX_FILES {
        return Err(FormatError::Overflow("OTA directory").into());
    }
    let data_offset = OTA_DATA_OFFSET as usize;
    let mut out = vec![0u8; data_offset];

    let new_version = metadata.new_version.to_record()?;
    out[OTA_NEW_VERSION_OFFSET..OTA_NEW_VERSION_OFFSET + FIRMWARE_VERSION_LEN]
        .copy_from_slice(new_version.as_bytes());
    if let Some(old) = &metadata.old_version {
        let old_version = old.to_record()?;
        out[OTA_OLD_VERSION_OFFSET..OTA_OLD_VERSION_OFFSET + FIRMWARE_VERSION_LEN]
            .copy_from_slice(old_version.as_bytes());
    }

    for (i, file) in files.iter().enumerate() {
        let mut entry = DirEntry::new_zeroed();
        entry.name = fixed_name(file.name.as_bytes())
            .ok_or_else(|| FormatError::NameTooLong(file.name.clone()))?;
        entry.offset.set(out.len() as u32);
        entry.length.set(file.data.len() as u32);
        entry.checksum.set(crc32(&file.data));
        let slot = OTA_DIR_OFFSET as usize + i * DIR_ENTRY_LEN;
        out[slot..slot + DIR_ENTRY_LEN].copy_from_slice(entry.as_bytes());
        debug!(
            "ota: {} at {:#x}, {} bytes, crc {:#010x}",
            file.name,
            out.len(),
            file.data.len(),
            entry.checksum.get()
        );

        out.extend_from_slice(&file.data);
        out.resize(align_up(out.len(), OTA_ALIGN), 0);
    }

    let data_size =
        u32::try_from(out.len()).map_err(|_| FormatError::Overflow("OTA package size"))?;
    let mut header = OtaHeader::new_zeroed();
    header.magic = OTA_MAGIC;
    header.header_version.set(OTA_HEADER_VERSION);
    header.header_size.set(OTA_HEADER_SIZE);
    header.file_cnt.set(files.len() as u16);
    header.dir_offset.set(OTA_DIR_OFFSET);
    header.data_offset.set(OTA_DATA_OFFSET);
    header.data_size.set(data_size);
    header.data_checksum.set(crc32(&out[data_offset..]));
    out[..OTA_HEADER_LEN].copy_from_slice(header.as_bytes());

    let header_checksum = crc32(&out[OTA_HEADER_CHECKSUM_START..data_offset]);
    out[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4]
        .copy_from_slice(&header_checksum.to_le_bytes());

    info!(
        "ota: packed {} files, {} bytes, version {}",
        files.len(),
        out.len(),
        metadata.new_version.version_name
    );
    Ok(out)
}

/// A parsed view of an OTA package.
#[derive(Debug)]
pub struct OtaPackage<'a> {
    header: OtaHeader,
    metadata: OtaMetadata,
    entries: Vec<DirEntry>,
    data: &'a [u8],
}

impl<'a> OtaPackage<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let (header, _) = OtaHeader::read_from_prefix(data)
            .map_err(|_| FormatError::Truncated("OTA header"))?;
        if header.magic != OTA_MAGIC {
            return Err(FormatError::BadMagic("OTA header").into());
        }
        let file_cnt = header.file_cnt.get() as usize;
        if file_cnt > OTA_MAX_FILES {
            return Err(FormatError::Malformed("OTA file count").into());
        }

        let version_at = |offset: usize| -> Result<FirmwareVersion> {
            let bytes = data
                .get(offset..offset + FIRMWARE_VERSION_LEN)
                .ok_or(FormatError::Truncated("OTA version record"))?;
            Ok(FirmwareVersion::read_from_bytes(bytes)
                .map_err(|_| FormatError::Malformed("OTA version record"))?)
        };
        let new_version = version_at(OTA_NEW_VERSION_OFFSET)?;
        let old_version = version_at(OTA_OLD_VERSION_OFFSET)?;
        let metadata = OtaMetadata {
            new_version: OtaVersion::from_record(&new_version),
            old_version: old_version
                .as_bytes()
                .iter()
                .any(|&b| b != 0)
                .then(|| OtaVersion::from_record(&old_version)),
        };

        let dir_start = header.dir_offset.get() as usize;
        let dir = data
            .get(dir_start..dir_start + file_cnt * DIR_ENTRY_LEN)
            .ok_or(FormatError::Truncated("OTA directory"))?;
        let entries = dir
            .chunks_exact(DIR_ENTRY_LEN)
            .map(|slot| {
                DirEntry::read_from_bytes(slot).map_err(|_| FormatError::Malformed("OTA directory"))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            header,
            metadata,
            entries,
            data,
        })
    }

    pub fn header(&self) -> &OtaHeader {
        &self.header
    }

    pub fn metadata(&self) -> &OtaMetadata {
        &self.metadata
    }

    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    pub fn payload(&self, entry: &DirEntry) -> Result<&'a [u8]> {
        let start = entry.offset.get() as usize;
        let end = start + entry.length.get() as usize;
        self.data
            .get(start..end)
            .ok_or_else(|| FormatError::Truncated("OTA payload").into())
    }

    pub fn file(&self, name: &str) -> Result<&'a [u8]> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name() == name.as_bytes())
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        self.payload(entry)
    }

    /// Check the header CRC, the data CRC and every file CRC.
    pub fn verify(&self) -> Result<()> {
        let data_offset = self.header.data_offset.get() as usize;
        let data_size = self.header.data_size.get() as usize;
        if data_offset < OTA_HEADER_CHECKSUM_START || data_offset > data_size {
            return Err(FormatError::Malformed("OTA header").into());
        }
        if data_size > self.data.len() {
            return Err(FormatError::Truncated("OTA package").into());
        }

        let mut head = self.data[..data_offset].to_vec();
        head[HEADER_CHECKSUM_OFFSET..HEADER_CHECKSUM_OFFSET + 4].fill(0);
        let computed = crc32(&head[OTA_HEADER_CHECKSUM_START..]);
        let stored = self.header.header_checksum.get();
        if computed != stored {
            return Err(checksum_mismatch("OTA header", stored, computed));
        }

        let computed = crc32(&self.data[data_offset..data_size]);
        let stored = self.header.data_checksum.get();
        if computed != stored {
            return Err(checksum_mismatch("OTA data", stored, computed));
        }

        for entry in &self.entries {
            let computed = crc32(self.payload(entry)?);
            if computed != entry.checksum.get() {
                return Err(checksum_mismatch(
                    String::from_utf8_lossy(entry.name()),
                    entry.checksum.get(),
                    computed,
                ));
            }
        }
        Ok(())
    }

    /// Write every named entry into `out_dir`, returning the paths written.
    pub fn unpack(&self, out_dir: &Path) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)?;
        let mut written = Vec::new();
        for entry in self.entries.iter().filter(|e| e.is_used()) {
            let name = String::from_utf8_lossy(entry.name()).into_owned();
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                return Err(FormatError::Malformed("OTA directory entry name").into());
            }
            let path = out_dir.join(&name);
            fs::write(&path, self.payload(entry)?)?;
            debug!("ota: unpacked {}", path.display());
            written.push(path);
        }
        info!("ota: unpacked {} files to {}", written.len(), out_dir.display());
        Ok(written)
    }
}

/// Parse `package` and write its files into `out_dir`.
pub fn unpack(package: &[u8], out_dir: &Path) -> Result<Vec<PathBuf>> {
    OtaPackage::parse(package)?.unpack(out_dir)
}
