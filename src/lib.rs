//! Read-time calibration filter for detector datasets.
//!
//! A calibrated dataset stores, per chunk, only a small descriptor naming a
//! raw dataset, an image index, a calibration dataset and a correction
//! algorithm. On read the filter fetches the raw image, applies the
//! correction and hands calibrated `f32` pixels to the caller.

pub mod cache;
pub mod cli_error;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod filter;
#[cfg(feature = "hdf5")]
pub mod hdf5_storage;
pub mod kernels;
pub mod memory;
pub mod plugin;
pub mod reader;
pub mod storage;
pub mod synth;

pub use cache::DatasetCache;
pub use config::FilterConfig;
pub use descriptor::{decode, encoded_length, Algorithm, DecodeError, Descriptor, DESCRIPTOR_MAGIC};
pub use error::{CacheError, CalibrationError, FilterError, ReadError};
pub use filter::{ChunkFilter, Direction, Filter};
#[cfg(feature = "hdf5")]
pub use hdf5_storage::Hdf5Storage;
pub use memory::{MemoryStorage, StorageStats};
pub use storage::{Storage, StorageError};

/// Filter identifier registered with the host.
pub const FILTER_ID: u32 = 57836;
/// Root attribute carrying a file's tag.
pub const FILE_TAG_ATTRIBUTE: &str = "h5calib_file_magic";
