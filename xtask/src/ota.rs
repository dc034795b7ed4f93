// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use fw_builder::config::FirmwareConfig;
use fw_builder::ota::{self, OtaPackage};
use fw_builder::output::write_atomic;
use fw_builder::package::OtaBuilder;
use fw_builder::read_file;
use log::info;
use std::path::Path;

pub(crate) fn create(config: &Path, input_dir: &Path, board: &str, output: &Path) -> Result<()> {
    let config = FirmwareConfig::load(config)
        .with_context(|| format!("loading {}", config.display()))?;
    let build = OtaBuilder::new(&config, input_dir, board).build()?;
    write_atomic(output, &build.package)?;
    info!(
        "ota: version {} for {} with {} partitions",
        build.manifest.firmware_version.version_name,
        build.manifest.firmware_version.board_name,
        build.manifest.partitions.len()
    );
    Ok(())
}

pub(crate) fn unpack(package: &Path, dir: &Path) -> Result<()> {
    let data = read_file(package)?;
    ota::unpack(&data, dir).with_context(|| format!("unpacking {}", package.display()))?;
    Ok(())
}

pub(crate) fn verify(file: &Path) -> Result<()> {
    let data = read_file(file)?;
    let package = OtaPackage::parse(&data)?;
    package
        .verify()
        .with_context(|| format!("verifying {}", file.display()))?;

    let version = &package.metadata().new_version;
    println!(
        "{}: {} ({:#x}) for {}",
        file.display(),
        version.version_name,
        version.version_code,
        version.board_name
    );
    if let Some(old) = &package.metadata().old_version {
        println!("  upgrades from {} ({:#x})", old.version_name, old.version_code);
    }
    for entry in package.entries() {
        println!(
            "  {:<12} offset {:#08x} length {:#08x} crc {:#010x}",
            String::from_utf8_lossy(entry.name()),
            entry.offset.get(),
            entry.length.get(),
            entry.checksum.get()
        );
    }
    Ok(())
}
