// Licensed under the Apache-2.0 license

//! Firmware configuration: version information and the partition table.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Local};
use fw_image::archive::DIR_NAME_LEN;
use fw_image::lzma::OTA_BLOCK_SIZE;
use fw_image::ota::VERSION_NAME_LEN;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FormatError, Result};
use crate::partition::Partition;

/// Placeholder in a version name replaced with the build time.
pub const BUILD_TIME_PLACEHOLDER: &str = "$(build_time)";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct VersionConfig {
    pub version_name: String,
    #[serde(default)]
    pub version_code: u32,
    #[serde(default)]
    pub version_res: u32,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct OtaOptions {
    #[serde(default = "default_compress")]
    pub compress: bool,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// PSRAM (KiB) left to the loader for unpacking `TEMP.bin`.
    #[serde(default)]
    pub psram_kb: Option<u32>,
}

fn default_compress() -> bool {
    true
}

fn default_block_size() -> usize {
    OTA_BLOCK_SIZE
}

impl Default for OtaOptions {
    fn default() -> Self {
        Self {
            compress: default_compress(),
            block_size: default_block_size(),
            psram_kb: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FirmwareConfig {
    pub disk_size: Option<u32>,
    pub firmware_version: VersionConfig,
    pub old_firmware_version: Option<VersionConfig>,
    #[serde(default)]
    pub ota: OtaOptions,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

impl FirmwareConfig {
    /// Parse a TOML config, substituting the build time into version names.
    pub fn parse(contents: &str) -> Result<Self> {
        Self::parse_at(contents, Local::now())
    }

    pub fn parse_at(contents: &str, now: DateTime<Local>) -> Result<Self> {
        let mut config: FirmwareConfig = toml::from_str(contents)?;
        config.firmware_version.version_name =
            expand_build_time(&config.firmware_version.version_name, now);
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    fn validate(&self) -> Result<()> {
        for version in std::iter::once(&self.firmware_version).chain(&self.old_firmware_version) {
            if version.version_name.len() > VERSION_NAME_LEN {
                return Err(FormatError::NameTooLong(version.version_name.clone()).into());
            }
        }
        if self.ota.block_size == 0 {
            return Err(Error::InvalidInput("ota.block_size must not be zero".into()));
        }

        let mut names = HashSet::new();
        for partition in &self.partitions {
            if !names.insert(partition.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate partition name {}",
                    partition.name
                )));
            }
            if !partition.is_ota() {
                continue;
            }
            if let Some(file_name) = &partition.file_name {
                if partition.ota_embed.is_none() && file_name.len() > DIR_NAME_LEN {
                    return Err(FormatError::NameTooLong(file_name.clone()).into());
                }
            }
        }
        Ok(())
    }
}

/// Replace the build time placeholder with `now` as `%y%m%d%H%M`.
pub fn expand_build_time(name: &str, now: DateTime<Local>) -> String {
    if !name.contains(BUILD_TIME_PLACEHOLDER) {
        return name.to_string();
    }
    name.replace(
        BUILD_TIME_PLACEHOLDER,
        &now.format("%y%m%d%H%M").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CONFIG: &str = r#"
disk_size = 0x400000

[firmware_version]
version_name = "sdk_$(build_time)"
version_code = 0x10203
version_res = 2

[ota]
block_size = 0x8000

[[partitions]]
name = "boot"
type = "BOOT"
file_id = 1
file_name = "mbrec.bin"
enable_ota = true

[[partitions]]
name = "app"
type = "SYSTEM"
file_id = 3
storage_id = 0
file_name = "app.bin"
enable_ota = true

[[partitions]]
name = "nvram"
type = "DATA"
"#;

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap()
    }

    #[test]
    fn test_parse() {
        let config = FirmwareConfig::parse_at(CONFIG, now()).unwrap();
        assert_eq!(config.disk_size, Some(0x40_0000));
        assert_eq!(config.firmware_version.version_name, "sdk_2403091405");
        assert_eq!(config.firmware_version.version_code, 0x10203);
        assert!(config.old_firmware_version.is_none());
        assert!(config.ota.compress);
        assert_eq!(config.partitions.len(), 3);
        assert_eq!(config.partitions[1].part_type, "SYSTEM");
        assert!(!config.partitions[2].enable_ota);
        assert!(config.partitions[2].file_name.is_none());
    }

    #[test]
    fn test_rejects_duplicate_partition() {
        let contents = format!("{}\n[[partitions]]\nname = \"app\"\ntype = \"DATA\"\n", CONFIG);
        let err = FirmwareConfig::parse_at(&contents, now()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_long_file_name() {
        let contents = CONFIG.replace("\"app.bin\"", "\"application.bin\"");
        let err = FirmwareConfig::parse_at(&contents, now()).unwrap_err();
        assert!(matches!(err.as_format(), Some(FormatError::NameTooLong(_))));
    }

    #[test]
    fn test_syntax_error() {
        let err = FirmwareConfig::parse("[firmware_version").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_expand_build_time() {
        assert_eq!(expand_build_time("plain", now()), "plain");
        assert_eq!(expand_build_time("v_$(build_time)", now()), "v_2403091405");
    }
}
