// Licensed under the Apache-2.0 license

use thiserror::Error;

use crate::sign::SignState;

/// The input does not have the shape the format requires.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic in {0}")]
    BadMagic(&'static str),

    #[error("{0} exceeds its capacity")]
    Overflow(&'static str),

    #[error("{0} is truncated")]
    Truncated(&'static str),

    #[error("name does not fit its field: {0}")]
    NameTooLong(String),

    #[error("empty file: {0}")]
    EmptyFile(String),

    #[error("protected TLV records cannot be added after the public region")]
    RegionOrder,

    #[error("malformed {0}")]
    Malformed(&'static str),
}

/// The input has the right shape but its contents fail validation.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("{what} checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        what: String,
        stored: u32,
        computed: u32,
    },

    #[error("{what} size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot {step} in state {state:?}")]
    InvalidTransition { step: &'static str, state: SignState },

    #[error("compression error: {0}")]
    Compression(std::io::Error),

    #[error("signer error: {0}")]
    Signer(String),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_integrity(&self) -> Option<&IntegrityError> {
        match self {
            Error::Integrity(e) => Some(e),
            _ => None,
        }
    }
}

pub(crate) fn checksum_mismatch(what: impl Into<String>, stored: u32, computed: u32) -> Error {
    IntegrityError::ChecksumMismatch {
        what: what.into(),
        stored,
        computed,
    }
    .into()
}
