use thiserror::Error;

use crate::descriptor::DecodeError;
use crate::storage::StorageError;

/// Failure to bring a dataset into the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Zero or several open files carry the requested tag.
    #[error("no unique open file tagged {tag:#010x} ({matches} matches)")]
    FileNotFound { tag: u32, matches: usize },

    #[error("dataset '{path}' has rank {rank}, expected 3 or 4")]
    UnsupportedRank { path: String, rank: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Failure while reading the raw image slice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("raw dataset has rank {actual}, algorithm reads rank {expected}")]
    RankMismatch { expected: usize, actual: usize },

    #[error("raw read returned {got} samples, expected {expected}")]
    ShortRead { expected: usize, got: usize },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalibrationError {
    /// A calibration index fell outside the materialized buffer.
    #[error("calibration index {index} out of range for {len} values")]
    OutOfRange { index: u64, len: usize },

    #[error("raw buffer holds {got} samples, kernel needs {expected}")]
    RawLength { expected: usize, got: usize },
}

/// Any failure of a single filter invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("descriptor error: {0}")]
    Decode(#[from] DecodeError),

    #[error("dataset cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("raw read error: {0}")]
    Read(#[from] ReadError),

    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Writing to a calibrated dataset without a descriptor.
    #[error("calibrated dataset is read-only: chunk has no calibration descriptor")]
    ReadOnly,
}
