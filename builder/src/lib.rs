// Licensed under the Apache-2.0 license

//! Host-side tools that assemble, checksum and sign Actions firmware images.

pub mod archive;
pub mod boot;
pub mod compress;
pub mod config;
mod error;
pub mod image;
pub mod ota;
pub mod output;
pub mod package;
pub mod partition;
pub mod sign;
mod sign_sm;
pub mod tlv;

pub use error::{Error, FormatError, IntegrityError, Result};
pub use image::FirmwareImage;
pub use sign::{SignOptions, SignState, SigningPipeline, SigningTool};
pub use tlv::{TlvRecord, TlvRegion};

use std::path::Path;

/// A file as it is stored in an archive or package: a short name and its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamedFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl NamedFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Read `path`, naming the entry after the file name.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("no file name in {}", path.display())))?;
        let data = std::fs::read(path).map_err(|e| {
            std::io::Error::new(e.kind(), format!("cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::new(name, data))
    }
}

/// Read a whole input file, with the path in the error message.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(path.display().to_string())
        } else {
            std::io::Error::new(e.kind(), format!("cannot read {}: {}", path.display(), e)).into()
        }
    })
}
