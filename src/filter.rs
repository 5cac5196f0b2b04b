//! Filter entry point.
//!
//! Encoding keeps only the descriptor at the start of a chunk. Decoding
//! resolves the descriptor against open storage, reads the referenced raw
//! image and returns calibrated `f32` pixels in native byte order.

use std::borrow::Cow;

use log::{debug, warn};

use crate::cache::DatasetCache;
use crate::config::FilterConfig;
use crate::descriptor::{self, DecodeError, Descriptor};
use crate::error::{CalibrationError, FilterError};
use crate::kernels;
use crate::reader;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Write path: store the descriptor only.
    Encode,
    /// Read path: produce calibrated data.
    Decode,
}

/// Object-safe view of a filter, used by the host plugin surface.
pub trait ChunkFilter {
    /// Transform one chunk. `Cow::Borrowed` means the chunk passes through
    /// unchanged.
    fn filter<'a>(
        &mut self,
        direction: Direction,
        chunk: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, FilterError>;
}

/// Calibration filter bound to one storage backend.
///
/// The filter owns the dataset cache; cached handles are closed when the
/// filter is dropped.
pub struct Filter<S: Storage> {
    storage: S,
    cache: DatasetCache<S::Dataset>,
    config: FilterConfig,
}

impl<S: Storage> Filter<S> {
    pub fn new(storage: S) -> Self {
        Self::with_config(storage, FilterConfig::default())
    }

    pub fn with_config(storage: S, config: FilterConfig) -> Self {
        Self {
            cache: DatasetCache::new(config.file_tag_attribute.clone()),
            storage,
            config,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the backend, e.g. to open or close files. Cached
    /// handles invalidated this way are refreshed on the next decode.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn cache(&self) -> &DatasetCache<S::Dataset> {
        &self.cache
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Write path. Returns exactly the descriptor bytes of `chunk`.
    ///
    /// A chunk without a descriptor is rejected with [`FilterError::ReadOnly`]:
    /// calibrated datasets cannot be written with plain data.
    pub fn encode(&self, chunk: &[u8]) -> Result<Vec<u8>, FilterError> {
        let len = match descriptor::encoded_length(chunk) {
            Ok(len) => len,
            Err(DecodeError::NotCalibratable) => {
                warn!("refusing to write {} bytes to a calibrated dataset", chunk.len());
                return Err(FilterError::ReadOnly);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(
            "encoded {} bytes into {} bytes for a ratio of {:.6}",
            chunk.len(),
            len,
            len as f64 / chunk.len() as f64
        );
        Ok(chunk[..len].to_vec())
    }

    /// Calibrated pixels for an already decoded descriptor.
    pub fn decode_pixels(&mut self, desc: &Descriptor) -> Result<Vec<f32>, FilterError> {
        let cached = self.cache.ensure(
            &self.storage,
            desc.raw_path(),
            desc.calib_path(),
            desc.file_tag(),
            !self.config.cache_calibration,
        )?;
        if self.config.validate_calib_len {
            let expected = desc.calib_element_count();
            if (cached.calib.len() as u64) < expected {
                return Err(CalibrationError::OutOfRange {
                    index: expected - 1,
                    len: cached.calib.len(),
                }
                .into());
            }
        }
        let raw = reader::read_slice(&self.storage, desc, cached.raw.handle, cached.raw.shape)?;
        let pixels = kernels::apply(desc.algorithm(), raw, cached.calib, desc.image_size())?;
        Ok(pixels)
    }

    /// Read path. Chunks without a descriptor pass through unchanged.
    pub fn decode<'a>(&mut self, chunk: &'a [u8]) -> Result<Cow<'a, [u8]>, FilterError> {
        let desc = match descriptor::decode(chunk) {
            Ok(desc) => desc,
            Err(DecodeError::NotCalibratable) => {
                debug!("chunk of {} bytes has no descriptor, passing through", chunk.len());
                return Ok(Cow::Borrowed(chunk));
            }
            Err(e) => return Err(e.into()),
        };
        let pixels = self.decode_pixels(&desc)?;
        let out: Vec<u8> = bytemuck::cast_slice(&pixels).to_vec();
        debug!("decompressed {} bytes into {} bytes", chunk.len(), out.len());
        Ok(Cow::Owned(out))
    }
}

/// Reinterpret decoded chunk bytes as native-endian `f32` pixels.
pub fn pixels_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl<S: Storage> ChunkFilter for Filter<S> {
    fn filter<'a>(
        &mut self,
        direction: Direction,
        chunk: &'a [u8],
    ) -> Result<Cow<'a, [u8]>, FilterError> {
        match direction {
            Direction::Encode => self.encode(chunk).map(Cow::Owned),
            Direction::Decode => self.decode(chunk),
        }
    }
}

impl<S: Storage> Drop for Filter<S> {
    fn drop(&mut self) {
        self.cache.release(&self.storage);
    }
}
