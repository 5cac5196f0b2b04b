use crate::descriptor::{Algorithm, Descriptor};
use crate::error::ReadError;
use crate::storage::Storage;

/// Hyperslab `(start, count)` covering one image of the raw dataset.
pub fn raw_selection(desc: &Descriptor) -> (Vec<u64>, Vec<u64>) {
    let (h, w) = (desc.height(), desc.width());
    match desc.algorithm() {
        Algorithm::AgipdV2 { .. } => (vec![desc.image_index(), 0, 0, 0], vec![1, h, w, 2]),
        Algorithm::PedestalV1 | Algorithm::AgipdV1 { .. } => {
            (vec![desc.image_index(), 0, 0], vec![1, h, w])
        }
    }
}

/// Read the raw samples for the image `desc` points at.
///
/// `shape` is the raw dataset's shape as cached on open.
pub fn read_slice<S: Storage>(
    storage: &S,
    desc: &Descriptor,
    handle: &S::Dataset,
    shape: &[u64],
) -> Result<Vec<f32>, ReadError> {
    let (start, count) = raw_selection(desc);
    if shape.len() != start.len() {
        return Err(ReadError::RankMismatch {
            expected: start.len(),
            actual: shape.len(),
        });
    }
    let data = storage.read_hyperslab(handle, &start, &count)?;
    let expected = desc.image_size() * desc.algorithm().samples_per_pixel();
    if data.len() != expected {
        return Err(ReadError::ShortRead {
            expected,
            got: data.len(),
        });
    }
    Ok(data)
}
