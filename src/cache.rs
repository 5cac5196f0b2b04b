//! Single-slot dataset cache.
//!
//! One raw dataset and one calibration dataset are kept open at a time.
//! Chunks arrive in dataset order, so a one-entry slot per role catches
//! nearly every repeat. A slot is refilled when the requested path or file
//! tag changes, or the storage layer reports the cached handle as no longer
//! valid.

use log::{debug, warn};

use crate::error::CacheError;
use crate::storage::Storage;

#[derive(Debug)]
struct Entry<D> {
    tag: u32,
    path: String,
    handle: D,
    shape: Vec<u64>,
}

#[derive(Debug)]
struct CalibEntry<D> {
    entry: Entry<D>,
    data: Vec<f32>,
}

/// Open raw dataset handle with its shape.
#[derive(Debug)]
pub struct RawDataset<'a, D> {
    pub handle: &'a D,
    pub shape: &'a [u64],
}

/// Both cache slots after a successful refresh.
#[derive(Debug)]
pub struct Cached<'a, D> {
    pub raw: RawDataset<'a, D>,
    pub calib: &'a [f32],
}

#[derive(Debug)]
pub struct DatasetCache<D> {
    file_tag_attribute: String,
    raw: Option<Entry<D>>,
    calib: Option<CalibEntry<D>>,
}

fn is_fresh<S: Storage>(storage: &S, entry: &Entry<S::Dataset>, path: &str, tag: u32) -> bool {
    entry.tag == tag && entry.path == path && storage.is_valid(&entry.handle)
}

/// Locate the single open file whose `attr` equals `tag`.
pub fn find_file<S: Storage>(storage: &S, attr: &str, tag: u32) -> Result<S::File, CacheError> {
    let mut found = Vec::new();
    for file in storage.open_files()? {
        if !storage.has_attr(&file, attr)? {
            continue;
        }
        if storage.read_attr_u32(&file, attr)? == tag {
            found.push(file);
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        matches => {
            if matches > 1 {
                warn!("{matches} open files carry tag {tag:#010x}");
            }
            Err(CacheError::FileNotFound { tag, matches })
        }
    }
}

fn open<S: Storage>(
    storage: &S,
    attr: &str,
    path: &str,
    tag: u32,
) -> Result<Entry<S::Dataset>, CacheError> {
    let file = find_file(storage, attr, tag)?;
    let handle = storage.open_dataset(&file, path)?;
    let shape = match storage.shape(&handle) {
        Ok(shape) => shape,
        Err(e) => {
            storage.close_dataset(handle);
            return Err(e.into());
        }
    };
    Ok(Entry {
        tag,
        path: path.to_owned(),
        handle,
        shape,
    })
}

fn fill_raw<'a, S: Storage>(
    slot: &'a mut Option<Entry<S::Dataset>>,
    storage: &S,
    attr: &str,
    path: &str,
    tag: u32,
) -> Result<&'a Entry<S::Dataset>, CacheError> {
    let entry = match slot.take() {
        Some(e) if is_fresh(storage, &e, path, tag) => e,
        stale => {
            if let Some(old) = stale {
                storage.close_dataset(old.handle);
            }
            let entry = open(storage, attr, path, tag)?;
            let rank = entry.shape.len();
            if rank != 3 && rank != 4 {
                storage.close_dataset(entry.handle);
                return Err(CacheError::UnsupportedRank {
                    path: path.to_owned(),
                    rank,
                });
            }
            debug!("raw cache refilled with {path} shape {:?}", entry.shape);
            entry
        }
    };
    Ok(slot.insert(entry))
}

fn fill_calib<'a, S: Storage>(
    slot: &'a mut Option<CalibEntry<S::Dataset>>,
    storage: &S,
    attr: &str,
    path: &str,
    tag: u32,
    force: bool,
) -> Result<&'a [f32], CacheError> {
    let cached = match slot.take() {
        Some(c) if !force && is_fresh(storage, &c.entry, path, tag) => c,
        stale => {
            if let Some(old) = stale {
                storage.close_dataset(old.entry.handle);
            }
            let entry = open(storage, attr, path, tag)?;
            let data = match storage.read_all(&entry.handle) {
                Ok(data) => data,
                Err(e) => {
                    storage.close_dataset(entry.handle);
                    return Err(e.into());
                }
            };
            debug!(
                "calibration cache refilled with {path} shape {:?} ({} values)",
                entry.shape,
                data.len()
            );
            CalibEntry { entry, data }
        }
    };
    Ok(&slot.insert(cached).data)
}

impl<D> DatasetCache<D> {
    pub fn new(file_tag_attribute: impl Into<String>) -> Self {
        Self {
            file_tag_attribute: file_tag_attribute.into(),
            raw: None,
            calib: None,
        }
    }

    pub fn raw_path(&self) -> Option<&str> {
        self.raw.as_ref().map(|e| e.path.as_str())
    }

    pub fn calib_path(&self) -> Option<&str> {
        self.calib.as_ref().map(|c| c.entry.path.as_str())
    }

    /// Make sure the raw slot holds a valid handle for `path`.
    pub fn ensure_raw<S>(
        &mut self,
        storage: &S,
        path: &str,
        tag: u32,
    ) -> Result<RawDataset<'_, D>, CacheError>
    where
        S: Storage<Dataset = D>,
    {
        let entry = fill_raw(&mut self.raw, storage, &self.file_tag_attribute, path, tag)?;
        Ok(RawDataset {
            handle: &entry.handle,
            shape: &entry.shape,
        })
    }

    /// Make sure the calibration slot holds `path`, fully read into memory.
    ///
    /// `force` refreshes the slot even when the cached entry is still valid.
    pub fn ensure_calib<S>(
        &mut self,
        storage: &S,
        path: &str,
        tag: u32,
        force: bool,
    ) -> Result<&[f32], CacheError>
    where
        S: Storage<Dataset = D>,
    {
        fill_calib(&mut self.calib, storage, &self.file_tag_attribute, path, tag, force)
    }

    /// Refresh both slots and borrow them together.
    pub fn ensure<S>(
        &mut self,
        storage: &S,
        raw_path: &str,
        calib_path: &str,
        tag: u32,
        force_calib: bool,
    ) -> Result<Cached<'_, D>, CacheError>
    where
        S: Storage<Dataset = D>,
    {
        let attr = &self.file_tag_attribute;
        let raw = fill_raw(&mut self.raw, storage, attr, raw_path, tag)?;
        let calib = fill_calib(&mut self.calib, storage, attr, calib_path, tag, force_calib)?;
        Ok(Cached {
            raw: RawDataset {
                handle: &raw.handle,
                shape: &raw.shape,
            },
            calib,
        })
    }

    /// Close both cached handles.
    pub fn release<S>(&mut self, storage: &S)
    where
        S: Storage<Dataset = D>,
    {
        if let Some(e) = self.raw.take() {
            storage.close_dataset(e.handle);
        }
        if let Some(c) = self.calib.take() {
            storage.close_dataset(c.entry.handle);
        }
    }
}
