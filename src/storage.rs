//! Storage collaborator consumed by the filter.
//!
//! The storage layer owns files, datasets and attributes. The filter only
//! needs to find the file a descriptor points at, open datasets inside it
//! and read whole datasets or rectangular hyperslabs as `f32`.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("no dataset at '{0}'")]
    NoSuchDataset(String),
    #[error("no attribute '{0}'")]
    NoSuchAttribute(String),
    #[error("handle is no longer valid")]
    InvalidHandle,
    #[error("selection start {start:?} count {count:?} outside dataset shape {shape:?}")]
    OutOfBounds {
        start: Vec<u64>,
        count: Vec<u64>,
        shape: Vec<u64>,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub trait Storage {
    /// Handle to an open file.
    type File;
    /// Handle to an open dataset.
    type Dataset;

    /// All files currently open in the storage layer.
    fn open_files(&self) -> Result<Vec<Self::File>, StorageError>;

    fn has_attr(&self, file: &Self::File, name: &str) -> Result<bool, StorageError>;

    /// Read a scalar `u32` attribute from the root of `file`.
    fn read_attr_u32(&self, file: &Self::File, name: &str) -> Result<u32, StorageError>;

    fn open_dataset(&self, file: &Self::File, path: &str) -> Result<Self::Dataset, StorageError>;

    fn shape(&self, dataset: &Self::Dataset) -> Result<Vec<u64>, StorageError>;

    /// False once the owning file has been closed or reopened.
    fn is_valid(&self, dataset: &Self::Dataset) -> bool;

    /// Read the whole dataset, converted to `f32`, in row-major order.
    fn read_all(&self, dataset: &Self::Dataset) -> Result<Vec<f32>, StorageError>;

    /// Read the block starting at `start` with extent `count` per axis.
    fn read_hyperslab(
        &self,
        dataset: &Self::Dataset,
        start: &[u64],
        count: &[u64],
    ) -> Result<Vec<f32>, StorageError>;

    /// Release a dataset handle. Called exactly once per opened handle.
    fn close_dataset(&self, dataset: Self::Dataset);
}
