// Licensed under the Apache-2.0 license

use anyhow::{anyhow, Context, Result};
use fw_builder::output::write_atomic;
use fw_builder::{archive, read_file, NamedFile};
use fw_image::fixed_name;
use log::info;
use std::path::{Path, PathBuf};

pub(crate) fn create(files: &[PathBuf], version_tag: &str, output: &Path) -> Result<()> {
    let tag = fixed_name::<4>(version_tag.as_bytes())
        .ok_or_else(|| anyhow!("version tag {:?} is longer than 4 bytes", version_tag))?;
    let files = files
        .iter()
        .map(|path| NamedFile::load(path))
        .collect::<Result<Vec<_>, _>>()?;

    let data = archive::build(&files, tag)?;
    write_atomic(output, &data)?;
    info!("atf: {} files, version tag {:?}", files.len(), version_tag);
    Ok(())
}

pub(crate) fn extract(archive_path: &Path, name: &str, output: &Path) -> Result<()> {
    let data = read_file(archive_path)?;
    let file = archive::extract(&data, name)
        .with_context(|| format!("extracting {} from {}", name, archive_path.display()))?;
    write_atomic(output, file)?;
    Ok(())
}

pub(crate) fn verify(file: &Path) -> Result<()> {
    let data = read_file(file)?;
    let entries =
        archive::verify(&data).with_context(|| format!("verifying {}", file.display()))?;
    println!("{}: {} files", file.display(), entries.len());
    for entry in &entries {
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
