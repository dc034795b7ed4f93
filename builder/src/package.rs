// Licensed under the Apache-2.0 license

//! Builds a complete OTA package from a firmware config and a directory of
//! partition files.

use std::collections::BTreeMap;
use std::path::PathBuf;

use fw_image::checksum::crc32;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::compress::{block_size_for_psram, compress_stream, OTA_BLOCK_SIZE};
use crate::config::FirmwareConfig;
use crate::error::{Error, Result};
use crate::ota::{pack, OtaMetadata, OtaVersion};
use crate::partition::{sequence_number, Partition, PartitionRecord};
use crate::{read_file, NamedFile};

/// Name of the manifest entry, always the first file of a package.
pub const MANIFEST_NAME: &str = "ota.toml";

/// Partition file unpacked by the OTA app rather than the loader.
pub const TEMP_FILE_NAME: &str = "TEMP.bin";

/// Updater app stored uncompressed in front of `TEMP.bin`.
pub const OTA_APP_FILE_NAME: &str = "ota_app.bin";

/// Manifest stored in every package, listing the partitions it updates.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OtaManifest {
    pub firmware_version: OtaVersion,
    pub old_firmware_version: Option<OtaVersion>,
    pub partitions: Vec<PartitionRecord>,
}

impl OtaManifest {
    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[derive(Debug)]
pub struct OtaBuild {
    pub package: Vec<u8>,
    pub manifest: OtaManifest,
}

struct PartitionFile {
    seq: u32,
    partition: Partition,
    file_name: String,
    data: Vec<u8>,
    /// Already in its final form, skipped by the compression pass.
    prepared: bool,
}

pub struct OtaBuilder<'a> {
    config: &'a FirmwareConfig,
    input_dir: PathBuf,
    board_name: String,
}

impl<'a> OtaBuilder<'a> {
    pub fn new(
        config: &'a FirmwareConfig,
        input_dir: impl Into<PathBuf>,
        board_name: impl Into<String>,
    ) -> Self {
        Self {
            config,
            input_dir: input_dir.into(),
            board_name: board_name.into(),
        }
    }

    pub fn build(&self) -> Result<OtaBuild> {
        let mut files = Vec::new();
        let mut embedded: BTreeMap<&str, Vec<PartitionFile>> = BTreeMap::new();
        for (index, partition) in self.config.partitions.iter().enumerate() {
            if !partition.is_ota() {
                continue;
            }
            let file = self.load(index, partition)?;
            match partition.ota_embed.as_deref() {
                Some(group) => embedded.entry(group).or_default().push(file),
                None => files.push(file),
            }
        }

        // Each embed group becomes a nested package standing in for the
        // partition whose type names the group.
        for (group, members) in embedded {
            let (index, target) = self
                .config
                .partitions
                .iter()
                .enumerate()
                .find(|(_, p)| p.part_type == group)
                .ok_or_else(|| Error::NotFound(format!("partition of type {}", group)))?;
            let mut partition = target.clone();
            let file_name = format!("{}.bin", group);
            partition.file_name = Some(file_name.clone());
            partition.enable_ota = true;
            let nested = self.package(members, false)?;
            info!(
                "ota: nested package {} for {} ({} bytes)",
                file_name,
                partition.name,
                nested.package.len()
            );
            files.push(PartitionFile {
                seq: sequence_number(index, &partition),
                partition,
                file_name,
                data: nested.package,
                prepared: false,
            });
        }

        if files.is_empty() {
            return Err(Error::InvalidInput("no partition is enabled for OTA".into()));
        }
        self.package(files, self.config.ota.compress)
    }

    fn load(&self, index: usize, partition: &Partition) -> Result<PartitionFile> {
        let file_name = partition.file_name.clone().unwrap_or_default();
        let mut data = read_file(&self.input_dir.join(&file_name))?;
        if data.is_empty() {
            warn!("ota: partition {} has an empty file {}", partition.name, file_name);
        }
        let prepared = file_name == TEMP_FILE_NAME;
        if prepared {
            data = self.temp_image(data)?;
        }
        Ok(PartitionFile {
            seq: sequence_number(index, partition),
            partition: partition.clone(),
            file_name,
            data,
            prepared,
        })
    }

    /// Compress `TEMP.bin` in blocks sized for the PSRAM it is unpacked into
    /// and put the updater app, when there is one, in front of it.
    fn temp_image(&self, temp: Vec<u8>) -> Result<Vec<u8>> {
        let ota = &self.config.ota;
        let temp = if ota.compress {
            let block_size = ota
                .psram_kb
                .map(block_size_for_psram)
                .unwrap_or(OTA_BLOCK_SIZE);
            debug!("ota: {} blocks of {:#x}", TEMP_FILE_NAME, block_size);
            compress_stream(&temp, block_size)?
        } else {
            temp
        };
        match read_file(&self.input_dir.join(OTA_APP_FILE_NAME)) {
            Ok(mut image) => {
                info!(
                    "ota: {} ({} bytes) in front of {}",
                    OTA_APP_FILE_NAME,
                    image.len(),
                    TEMP_FILE_NAME
                );
                image.extend_from_slice(&temp);
                Ok(image)
            }
            Err(Error::NotFound(_)) => Ok(temp),
            Err(e) => Err(e),
        }
    }

    fn metadata(&self) -> OtaMetadata {
        OtaMetadata {
            new_version: OtaVersion::from_config(&self.config.firmware_version, &self.board_name),
            old_version: self
                .config
                .old_firmware_version
                .as_ref()
                .map(|v| OtaVersion::from_config(v, &self.board_name)),
        }
    }

    fn package(&self, mut files: Vec<PartitionFile>, compress: bool) -> Result<OtaBuild> {
        files.sort_by_key(|f| f.seq);

        let mut records = Vec::with_capacity(files.len());
        let mut entries = Vec::with_capacity(files.len() + 1);
        for file in files {
            let orig_size = file.data.len() as u32;
            let checksum = crc32(&file.data);
            let data = if compress && !file.prepared {
                compress_stream(&file.data, self.config.ota.block_size)?
            } else {
                file.data
            };
            records.push(PartitionRecord {
                part_type: file.partition.part_type.clone(),
                name: file.partition.name.clone(),
                file_id: file.partition.file_id,
                storage_id: file.partition.storage_id,
                file_name: file.file_name.clone(),
                file_size: data.len() as u32,
                orig_size,
                checksum,
            });
            entries.push(NamedFile::new(file.file_name, data));
        }

        let metadata = self.metadata();
        let manifest = OtaManifest {
            firmware_version: metadata.new_version.clone(),
            old_firmware_version: metadata.old_version.clone(),
            partitions: records,
        };
        let manifest_text = toml::to_string(&manifest)?;
        entries.insert(0, NamedFile::new(MANIFEST_NAME, manifest_text.into_bytes()));

        let package = pack(&entries, &metadata)?;
        Ok(OtaBuild { package, manifest })
    }
}
