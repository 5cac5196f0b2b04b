//! HDF5 storage backend (feature `hdf5`).
//!
//! A descriptor's file tag is resolved against every file the HDF5 library
//! has open in this process, including files the host application opened.
//! Files opened through [`Hdf5Storage::open_file`] are kept open by the
//! backend until closed.

use hdf5::{Dataset, File};
use hdf5_sys::h5f::{H5Fget_obj_count, H5Fget_obj_ids, H5F_OBJ_ALL, H5F_OBJ_FILE};
use hdf5_sys::h5i::{hid_t, H5Iinc_ref};
use ndarray::s;

use crate::storage::{Storage, StorageError};

fn backend(e: hdf5::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Every file the library currently has open.
fn library_files() -> Result<Vec<File>, StorageError> {
    let all = H5F_OBJ_ALL as hid_t;
    let count = unsafe { H5Fget_obj_count(all, H5F_OBJ_FILE) };
    if count < 0 {
        return Err(StorageError::Backend("cannot count open files".into()));
    }
    let mut ids: Vec<hid_t> = vec![0; count as usize];
    let found = unsafe { H5Fget_obj_ids(all, H5F_OBJ_FILE, ids.len(), ids.as_mut_ptr()) };
    if found < 0 {
        return Err(StorageError::Backend("cannot list open files".into()));
    }
    ids.truncate(found as usize);

    let mut files: Vec<File> = Vec::with_capacity(ids.len());
    for id in ids {
        // The ids belong to whoever opened the files; the wrapper releases
        // its own reference on drop. A file closed since the listing is skipped.
        if unsafe { H5Iinc_ref(id) } < 0 {
            continue;
        }
        let file = hdf5::from_id::<File>(id).map_err(backend)?;
        // One physical file opened twice yields two ids.
        if !files.iter().any(|f| f.filename() == file.filename()) {
            files.push(file);
        }
    }
    Ok(files)
}

#[derive(Default)]
pub struct Hdf5Storage {
    files: Vec<(String, File)>,
}

impl Hdf5Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` read-only and keep it open until [`close_file`](Self::close_file).
    /// Reopening an already registered path replaces the old handle.
    pub fn open_file(&mut self, path: &str) -> Result<(), StorageError> {
        let file = File::open(path).map_err(backend)?;
        self.close_file(path);
        self.files.push((path.to_owned(), file));
        Ok(())
    }

    pub fn close_file(&mut self, path: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|(p, _)| p != path);
        self.files.len() != before
    }
}

impl Storage for Hdf5Storage {
    type File = File;
    type Dataset = Dataset;

    fn open_files(&self) -> Result<Vec<File>, StorageError> {
        library_files()
    }

    fn has_attr(&self, file: &File, name: &str) -> Result<bool, StorageError> {
        Ok(file.attr_names().map_err(backend)?.iter().any(|n| n == name))
    }

    fn read_attr_u32(&self, file: &File, name: &str) -> Result<u32, StorageError> {
        file.attr(name)
            .map_err(|_| StorageError::NoSuchAttribute(name.to_owned()))?
            .read_scalar::<u32>()
            .map_err(backend)
    }

    fn open_dataset(&self, file: &File, path: &str) -> Result<Dataset, StorageError> {
        file.dataset(path)
            .map_err(|_| StorageError::NoSuchDataset(path.to_owned()))
    }

    fn shape(&self, dataset: &Dataset) -> Result<Vec<u64>, StorageError> {
        Ok(dataset.shape().into_iter().map(|n| n as u64).collect())
    }

    fn is_valid(&self, dataset: &Dataset) -> bool {
        dataset.is_valid()
    }

    fn read_all(&self, dataset: &Dataset) -> Result<Vec<f32>, StorageError> {
        dataset.read_raw::<f32>().map_err(backend)
    }

    fn read_hyperslab(
        &self,
        dataset: &Dataset,
        start: &[u64],
        count: &[u64],
    ) -> Result<Vec<f32>, StorageError> {
        let st: Vec<usize> = start.iter().map(|&v| v as usize).collect();
        let end: Vec<usize> = start.iter().zip(count).map(|(&a, &c)| (a + c) as usize).collect();
        let out = match st.len() {
            3 => dataset
                .read_slice::<f32, _, ndarray::Ix3>(s![st[0]..end[0], st[1]..end[1], st[2]..end[2]])
                .map(|a| a.into_raw_vec()),
            4 => dataset
                .read_slice::<f32, _, ndarray::Ix4>(s![
                    st[0]..end[0],
                    st[1]..end[1],
                    st[2]..end[2],
                    st[3]..end[3]
                ])
                .map(|a| a.into_raw_vec()),
            _ => {
                return Err(StorageError::OutOfBounds {
                    start: start.to_vec(),
                    count: count.to_vec(),
                    shape: self.shape(dataset)?,
                })
            }
        };
        out.map_err(backend)
    }

    fn close_dataset(&self, dataset: Dataset) {
        drop(dataset);
    }
}
