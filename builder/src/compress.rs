// Licensed under the Apache-2.0 license

//! Block-framed XZ compression.
//!
//! The source is cut into `block_size` chunks so the loader can decompress
//! into a bounded buffer. Each chunk becomes a 16 byte [`LzmaBlockHeader`]
//! followed by an independent XZ stream.

use std::io::{Read, Write};

use fw_image::lzma::{LzmaBlockHeader, LZMA_BLOCK_HEADER_LEN, LZMA_BLOCK_MAGIC};
use liblzma::read::XzDecoder;
use liblzma::write::XzEncoder;
use log::debug;
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{Error, FormatError, IntegrityError, Result};

pub use fw_image::lzma::{block_size_for_psram, OTA_BLOCK_SIZE};

/// XZ preset used for every block.
pub const XZ_PRESET: u32 = 6;

fn compress_block(block: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = XzEncoder::new(Vec::new(), XZ_PRESET);
    encoder.write_all(block).map_err(Error::Compression)?;
    encoder.finish().map_err(Error::Compression)
}

fn decompress_block(block: &[u8], original_size: usize) -> Result<Vec<u8>> {
    // One byte past the declared size is enough to detect an oversized block.
    let limit = original_size as u64 + 1;
    let mut out = Vec::new();
    XzDecoder::new(block)
        .take(limit)
        .read_to_end(&mut out)
        .map_err(Error::Compression)?;
    Ok(out)
}

/// Compress `source` into a stream of framed blocks of at most `block_size`
/// input bytes each. An empty source gives an empty stream.
pub fn compress_stream(source: &[u8], block_size: usize) -> Result<Vec<u8>> {
    if block_size == 0 {
        return Err(Error::InvalidInput("block size must not be zero".into()));
    }
    let mut out = Vec::new();
    for block in source.chunks(block_size) {
        let compressed = compress_block(block)?;
        let original_size =
            u32::try_from(block.len()).map_err(|_| FormatError::Overflow("compressed block"))?;
        let compressed_size = u32::try_from(compressed.len())
            .map_err(|_| FormatError::Overflow("compressed block"))?;
        out.extend_from_slice(LzmaBlockHeader::new(compressed_size, original_size).as_bytes());
        out.extend_from_slice(&compressed);
    }
    debug!(
        "compressed {} bytes to {} bytes in blocks of {:#x}",
        source.len(),
        out.len(),
        block_size
    );
    Ok(out)
}

/// Decompress a stream produced by [`compress_stream`].
pub fn decompress_stream(stream: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = stream;
    while !rest.is_empty() {
        let (header, _) = LzmaBlockHeader::read_from_prefix(rest)
            .map_err(|_| FormatError::Truncated("compressed block header"))?;
        if header.magic.get() != LZMA_BLOCK_MAGIC {
            return Err(FormatError::BadMagic("compressed block").into());
        }
        let header_size = header.header_size.get() as usize;
        if header_size < LZMA_BLOCK_HEADER_LEN {
            return Err(FormatError::Malformed("compressed block header").into());
        }
        let end = header_size + header.compressed_size.get() as usize;
        let payload = rest
            .get(header_size..end)
            .ok_or(FormatError::Truncated("compressed block"))?;

        let expected = header.original_size.get() as usize;
        let block = decompress_block(payload, expected)?;
        if block.len() != expected {
            return Err(IntegrityError::SizeMismatch {
                what: "decompressed block",
                expected,
                actual: block.len(),
            }
            .into());
        }
        out.extend_from_slice(&block);
        rest = &rest[end..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    #[test]
    fn test_blocks_are_framed() {
        let source = sample(0x8000 * 2 + 100);
        let stream = compress_stream(&source, 0x8000).unwrap();

        let mut rest = &stream[..];
        let mut sizes = Vec::new();
        while !rest.is_empty() {
            let (header, _) = LzmaBlockHeader::read_from_prefix(rest).unwrap();
            assert_eq!(header.magic.get(), LZMA_BLOCK_MAGIC);
            assert_eq!(header.header_size.get(), 16);
            sizes.push(header.original_size.get());
            rest = &rest[16 + header.compressed_size.get() as usize..];
        }
        assert_eq!(sizes, vec![0x8000, 0x8000, 100]);
        assert_eq!(decompress_stream(&stream).unwrap(), source);
    }

    #[test]
    fn test_empty_source() {
        assert!(compress_stream(&[], 0x8000).unwrap().is_empty());
        assert!(decompress_stream(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_zero_block_size() {
        assert!(matches!(
            compress_stream(b"data", 0),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let mut stream = compress_stream(&sample(64), 0x8000).unwrap();
        stream[0] = b'X';
        assert_eq!(
            decompress_stream(&stream).unwrap_err().as_format(),
            Some(&FormatError::BadMagic("compressed block"))
        );
    }

    #[test]
    fn test_length_mismatch() {
        let mut stream = compress_stream(&sample(64), 0x8000).unwrap();
        stream[12..16].copy_from_slice(&65u32.to_le_bytes());
        assert!(matches!(
            decompress_stream(&stream),
            Err(Error::Integrity(IntegrityError::SizeMismatch { expected: 65, actual: 64, .. }))
        ));
    }

    #[test]
    fn test_declared_size_bounds_decompression() {
        let mut stream = compress_stream(&sample(64), 0x8000).unwrap();
        stream[12..16].copy_from_slice(&10u32.to_le_bytes());
        assert!(matches!(
            decompress_stream(&stream),
            Err(Error::Integrity(IntegrityError::SizeMismatch { expected: 10, actual: 11, .. }))
        ));

        stream[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            decompress_stream(&stream),
            Err(Error::Integrity(IntegrityError::SizeMismatch { actual: 64, .. }))
        ));
    }

    #[test]
    fn test_truncated() {
        let stream = compress_stream(&sample(64), 0x8000).unwrap();
        assert_eq!(
            decompress_stream(&stream[..stream.len() - 1]).unwrap_err().as_format(),
            Some(&FormatError::Truncated("compressed block"))
        );
        assert_eq!(
            decompress_stream(&stream[..8]).unwrap_err().as_format(),
            Some(&FormatError::Truncated("compressed block header"))
        );
    }
}
