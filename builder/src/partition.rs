// Licensed under the Apache-2.0 license

//! Partition descriptors and the order they are written into an OTA package.

use serde::{Deserialize, Serialize};

/// Sequence number of the boot partition; sorts after every ordinary one.
pub const SEQ_BOOT: u32 = 0x10000;
/// Sequence number of the system parameter partition; written last.
pub const SEQ_SYS_PARAM: u32 = 0x10001;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionRole {
    Boot,
    SysParam,
    Normal,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub file_id: u32,
    #[serde(default)]
    pub storage_id: u32,
    pub file_name: Option<String>,
    #[serde(default)]
    pub enable_ota: bool,
    pub size: Option<u32>,
    /// Group name; partitions sharing it are bundled into a nested package.
    pub ota_embed: Option<String>,
}

impl Partition {
    pub fn role(&self) -> PartitionRole {
        match self.part_type.as_str() {
            "BOOT" => PartitionRole::Boot,
            "SYS_PARAM" => PartitionRole::SysParam,
            _ => PartitionRole::Normal,
        }
    }

    /// Whether this partition contributes a file to the OTA package.
    pub fn is_ota(&self) -> bool {
        self.enable_ota && self.file_name.as_deref().is_some_and(|f| !f.is_empty())
    }
}

/// Position of the partition in the OTA package; `index` is its position in
/// the partition table.
///
/// The boot partition and the system parameters go last so an interrupted
/// update never leaves new boot code pointing at old partitions. Partitions
/// that are not updated get 0.
pub fn sequence_number(index: usize, partition: &Partition) -> u32 {
    if !partition.is_ota() {
        return 0;
    }
    match partition.role() {
        PartitionRole::Boot => SEQ_BOOT,
        PartitionRole::SysParam => SEQ_SYS_PARAM,
        PartitionRole::Normal => index as u32 + 1,
    }
}

/// The OTA partitions of `table` with their sequence numbers, in package order.
pub fn ota_order(table: &[Partition]) -> Vec<(u32, &Partition)> {
    let mut order: Vec<(u32, &Partition)> = table
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_ota())
        .map(|(i, p)| (sequence_number(i, p), p))
        .collect();
    order.sort_by_key(|(seq, _)| *seq);
    order
}

/// Size and CRC of one partition file, as listed in the package manifest.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct PartitionRecord {
    #[serde(rename = "type")]
    pub part_type: String,
    pub name: String,
    pub file_id: u32,
    pub storage_id: u32,
    pub file_name: String,
    /// Bytes stored in the package.
    pub file_size: u32,
    /// Bytes before compression.
    pub orig_size: u32,
    /// CRC-32 of the uncompressed file.
    pub checksum: u32,
}
