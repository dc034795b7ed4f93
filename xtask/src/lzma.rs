// Licensed under the Apache-2.0 license

use anyhow::Result;
use fw_builder::compress::{
    block_size_for_psram, compress_stream, decompress_stream, OTA_BLOCK_SIZE,
};
use fw_builder::output::write_atomic;
use fw_builder::read_file;
use log::info;
use std::path::Path;

pub(crate) fn compress(
    input: &Path,
    output: &Path,
    block_size: Option<usize>,
    psram_kb: Option<u32>,
) -> Result<()> {
    let block_size = block_size
        .or_else(|| psram_kb.map(block_size_for_psram))
        .unwrap_or(OTA_BLOCK_SIZE);
    let data = read_file(input)?;
    let compressed = compress_stream(&data, block_size)?;
    write_atomic(output, &compressed)?;
    info!(
        "lzma: {} bytes to {} bytes, block size {:#x}",
        data.len(),
        compressed.len(),
        block_size
    );
    Ok(())
}

pub(crate) fn decompress(input: &Path, output: &Path) -> Result<()> {
    let data = read_file(input)?;
    let decompressed = decompress_stream(&data)?;
    write_atomic(output, &decompressed)?;
    info!("lzma: {} bytes to {} bytes", data.len(), decompressed.len());
    Ok(())
}
