use std::io;

use thiserror::Error;

use crate::flash::StorageError;
use crate::image::ImageError;

/// Errors produced while decompressing, flashing or validating a firmware image.
#[derive(Debug, Error)]
pub enum Error {
    #[error("The compressed source was exhausted before the stream ended")]
    SourceExhausted,

    #[error("The compressed data is corrupt: {}", _0)]
    DataCorrupt(&'static str),

    #[error(
        "Checksum mismatch - the trailer says {:#010x} but the output was {:#010x}",
        expected,
        computed
    )]
    ChecksumError { expected: u32, computed: u32 },

    #[error(
        "Length mismatch - the trailer says {} bytes but the output was {} bytes",
        expected,
        computed
    )]
    LengthError { expected: u32, computed: u32 },

    #[error("Invalid ROM image: {}", _0)]
    ImageInvalid(#[from] ImageError),

    #[error("Storage error: {}", _0)]
    StorageError(#[from] StorageError),

    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}
