//! In-process storage backend.
//!
//! Files hold `f32` datasets and `u32` root attributes. Closing or reopening
//! a file bumps its generation, which invalidates every dataset handle opened
//! before, the same way a real storage layer invalidates ids.

use std::cell::Cell;
use std::collections::HashMap;

use crate::storage::{Storage, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    slot: usize,
    generation: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct DatasetId {
    file: FileId,
    path: String,
}

/// Counters for every call the filter makes into the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub file_scans: usize,
    pub dataset_opens: usize,
    pub dataset_closes: usize,
    pub full_reads: usize,
    pub hyperslab_reads: usize,
}

impl StorageStats {
    /// Dataset handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        self.dataset_opens - self.dataset_closes
    }
}

#[derive(Debug, Clone)]
struct MemDataset {
    shape: Vec<u64>,
    data: Vec<f32>,
}

#[derive(Debug)]
struct MemFile {
    name: String,
    open: bool,
    generation: u64,
    attrs: HashMap<String, u32>,
    datasets: HashMap<String, MemDataset>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    files: Vec<MemFile>,
    generation: u64,
    file_scans: Cell<usize>,
    dataset_opens: Cell<usize>,
    dataset_closes: Cell<usize>,
    full_reads: Cell<usize>,
    hyperslab_reads: Cell<usize>,
}

fn bump(c: &Cell<usize>) {
    c.set(c.get() + 1);
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn file(&self, id: FileId) -> Result<&MemFile, StorageError> {
        match self.files.get(id.slot) {
            Some(f) if f.open && f.generation == id.generation => Ok(f),
            _ => Err(StorageError::InvalidHandle),
        }
    }

    fn file_mut(&mut self, id: FileId) -> Result<&mut MemFile, StorageError> {
        match self.files.get_mut(id.slot) {
            Some(f) if f.open && f.generation == id.generation => Ok(f),
            _ => Err(StorageError::InvalidHandle),
        }
    }

    /// Open `name`, creating an empty file the first time. Opening a file
    /// that is already open reopens it and invalidates older handles.
    pub fn open_file(&mut self, name: &str) -> FileId {
        let generation = self.next_generation();
        if let Some(slot) = self.files.iter().position(|f| f.name == name) {
            let f = &mut self.files[slot];
            f.open = true;
            f.generation = generation;
            return FileId { slot, generation };
        }
        self.files.push(MemFile {
            name: name.to_owned(),
            open: true,
            generation,
            attrs: HashMap::new(),
            datasets: HashMap::new(),
        });
        FileId {
            slot: self.files.len() - 1,
            generation,
        }
    }

    /// Close `name`. Contents are kept for a later [`open_file`](Self::open_file).
    pub fn close_file(&mut self, name: &str) -> bool {
        let generation = self.next_generation();
        match self.files.iter_mut().find(|f| f.name == name && f.open) {
            Some(f) => {
                f.open = false;
                f.generation = generation;
                true
            }
            None => false,
        }
    }

    pub fn set_attr_u32(&mut self, file: FileId, name: &str, value: u32) -> Result<(), StorageError> {
        self.file_mut(file)?.attrs.insert(name.to_owned(), value);
        Ok(())
    }

    /// Create or replace the dataset at `path`.
    pub fn write_dataset(
        &mut self,
        file: FileId,
        path: &str,
        shape: &[u64],
        data: Vec<f32>,
    ) -> Result<(), StorageError> {
        let expected: u64 = shape.iter().product();
        if expected != data.len() as u64 {
            return Err(StorageError::Backend(format!(
                "dataset '{path}' shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        self.file_mut(file)?.datasets.insert(
            path.to_owned(),
            MemDataset {
                shape: shape.to_vec(),
                data,
            },
        );
        Ok(())
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            file_scans: self.file_scans.get(),
            dataset_opens: self.dataset_opens.get(),
            dataset_closes: self.dataset_closes.get(),
            full_reads: self.full_reads.get(),
            hyperslab_reads: self.hyperslab_reads.get(),
        }
    }

    fn dataset(&self, id: &DatasetId) -> Result<&MemDataset, StorageError> {
        self.file(id.file)?
            .datasets
            .get(&id.path)
            .ok_or_else(|| StorageError::NoSuchDataset(id.path.clone()))
    }
}

impl Storage for MemoryStorage {
    type File = FileId;
    type Dataset = DatasetId;

    fn open_files(&self) -> Result<Vec<FileId>, StorageError> {
        bump(&self.file_scans);
        Ok(self
            .files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.open)
            .map(|(slot, f)| FileId {
                slot,
                generation: f.generation,
            })
            .collect())
    }

    fn has_attr(&self, file: &FileId, name: &str) -> Result<bool, StorageError> {
        Ok(self.file(*file)?.attrs.contains_key(name))
    }

    fn read_attr_u32(&self, file: &FileId, name: &str) -> Result<u32, StorageError> {
        self.file(*file)?
            .attrs
            .get(name)
            .copied()
            .ok_or_else(|| StorageError::NoSuchAttribute(name.to_owned()))
    }

    fn open_dataset(&self, file: &FileId, path: &str) -> Result<DatasetId, StorageError> {
        if !self.file(*file)?.datasets.contains_key(path) {
            return Err(StorageError::NoSuchDataset(path.to_owned()));
        }
        bump(&self.dataset_opens);
        Ok(DatasetId {
            file: *file,
            path: path.to_owned(),
        })
    }

    fn shape(&self, dataset: &DatasetId) -> Result<Vec<u64>, StorageError> {
        Ok(self.dataset(dataset)?.shape.clone())
    }

    fn is_valid(&self, dataset: &DatasetId) -> bool {
        self.dataset(dataset).is_ok()
    }

    fn read_all(&self, dataset: &DatasetId) -> Result<Vec<f32>, StorageError> {
        bump(&self.full_reads);
        Ok(self.dataset(dataset)?.data.clone())
    }

    fn read_hyperslab(
        &self,
        dataset: &DatasetId,
        start: &[u64],
        count: &[u64],
    ) -> Result<Vec<f32>, StorageError> {
        bump(&self.hyperslab_reads);
        let ds = self.dataset(dataset)?;
        let shape = &ds.shape;
        let in_bounds = start.len() == shape.len()
            && count.len() == shape.len()
            && start
                .iter()
                .zip(count)
                .zip(shape)
                .all(|((s, c), n)| s.checked_add(*c).is_some_and(|end| end <= *n));
        if !in_bounds || shape.is_empty() {
            return Err(StorageError::OutOfBounds {
                start: start.to_vec(),
                count: count.to_vec(),
                shape: shape.clone(),
            });
        }

        let rank = shape.len();
        let row = count[rank - 1] as usize;
        let total: u64 = count.iter().product();
        let mut out = Vec::with_capacity(total as usize);
        if total == 0 {
            return Ok(out);
        }

        // Odometer over every axis but the last; each step copies one row.
        let mut idx = vec![0u64; rank - 1];
        loop {
            let mut flat = 0u64;
            for axis in 0..rank {
                let i = if axis < rank - 1 { start[axis] + idx[axis] } else { start[axis] };
                flat = flat * shape[axis] + i;
            }
            let flat = flat as usize;
            out.extend_from_slice(&ds.data[flat..flat + row]);

            let mut axis = rank - 1;
            loop {
                if axis == 0 {
                    return Ok(out);
                }
                axis -= 1;
                idx[axis] += 1;
                if idx[axis] < count[axis] {
                    break;
                }
                idx[axis] = 0;
            }
        }
    }

    fn close_dataset(&self, _dataset: DatasetId) {
        bump(&self.dataset_closes);
    }
}
