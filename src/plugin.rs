//! Dynamic filter plugin surface.
//!
//! The host loads the library, asks for the plugin type and class record, and
//! then calls [`h5calib_filter`] once per chunk. An embedding application
//! may install its own [`ChunkFilter`] with [`install`]. With the `hdf5`
//! feature, the first call from a host that installed nothing sets up a
//! filter over the files the HDF5 library has open.
//!
//! # Safety
//!
//! Chunk buffers cross the boundary as `malloc` allocations. On success the
//! input buffer is freed and replaced by a new allocation; on failure (a
//! return value of `0`) the input buffer is left untouched for the host.

use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};

use libc::size_t;
#[cfg(feature = "hdf5")]
use log::info;
use log::error;

use crate::filter::{ChunkFilter, Direction};
#[cfg(feature = "hdf5")]
use crate::{filter::Filter, hdf5_storage::Hdf5Storage};
use crate::FILTER_ID;

/// Set in `flags` when the host is reading (decoding) a chunk.
pub const FLAG_REVERSE: c_uint = 0x0100;
/// Version of the class record layout.
pub const CLASS_VERSION: c_int = 1;
/// Plugin type code for filters.
pub const PLUGIN_TYPE_FILTER: c_int = 0;

const FILTER_NAME: &[u8] = b"h5calib: read-time detector calibration\0";

pub type Hid = i64;
pub type CanApplyFn = unsafe extern "C" fn(dcpl: Hid, dtype: Hid, space: Hid) -> c_int;
pub type SetLocalFn = unsafe extern "C" fn(dcpl: Hid, dtype: Hid, space: Hid) -> c_int;
pub type FilterFn = unsafe extern "C" fn(
    flags: c_uint,
    cd_nelmts: size_t,
    cd_values: *const c_uint,
    nbytes: size_t,
    buf_size: *mut size_t,
    buf: *mut *mut c_void,
) -> size_t;

/// Filter class record as the host expects it.
#[repr(C)]
pub struct FilterClass {
    pub version: c_int,
    pub id: c_int,
    pub encoder_present: c_uint,
    pub decoder_present: c_uint,
    pub name: *const c_char,
    pub can_apply: Option<CanApplyFn>,
    pub set_local: Option<SetLocalFn>,
    pub filter: Option<FilterFn>,
}

#[repr(transparent)]
struct SharedClass(FilterClass);

// The record is immutable and its name points at a static string.
unsafe impl Sync for SharedClass {}

static FILTER_CLASS: SharedClass = SharedClass(FilterClass {
    version: CLASS_VERSION,
    id: FILTER_ID as c_int,
    encoder_present: 1,
    decoder_present: 1,
    name: FILTER_NAME.as_ptr().cast::<c_char>(),
    can_apply: None,
    set_local: None,
    filter: Some(h5calib_filter),
});

type Installed = Option<Box<dyn ChunkFilter + Send>>;

static INSTALLED: Mutex<Installed> = Mutex::new(None);

fn installed() -> MutexGuard<'static, Installed> {
    INSTALLED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Install the filter used for every chunk, returning the previous one.
///
/// All invocations are serialized on a single lock, so cache refills never
/// race with reads on other threads.
pub fn install<F>(filter: F) -> Installed
where
    F: ChunkFilter + Send + 'static,
{
    installed().replace(Box::new(filter))
}

/// Remove the installed filter. Dropping it closes its cached handles.
pub fn uninstall() -> Installed {
    installed().take()
}

/// Filter used when the host calls in before anything was installed: one
/// reading from the files the HDF5 library has open.
#[cfg(feature = "hdf5")]
fn default_filter() -> Installed {
    info!("installing default HDF5-backed calibration filter");
    Some(Box::new(Filter::new(Hdf5Storage::new())))
}

#[cfg(not(feature = "hdf5"))]
fn default_filter() -> Installed {
    None
}

/// The class record, for hosts that register the filter directly.
pub fn filter_class() -> &'static FilterClass {
    &FILTER_CLASS.0
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn H5PLget_plugin_type() -> c_int {
    PLUGIN_TYPE_FILTER
}

#[no_mangle]
#[allow(non_snake_case)]
pub extern "C" fn H5PLget_plugin_info() -> *const c_void {
    (filter_class() as *const FilterClass).cast()
}

/// Filter callback.
///
/// Returns the size of the data now in `*buf`, or `0` on failure.
///
/// # Safety
///
/// `buf` must point at a `malloc` allocation of at least `nbytes` bytes and
/// `buf_size` must be writable.
#[no_mangle]
pub unsafe extern "C" fn h5calib_filter(
    flags: c_uint,
    _cd_nelmts: size_t,
    _cd_values: *const c_uint,
    nbytes: size_t,
    buf_size: *mut size_t,
    buf: *mut *mut c_void,
) -> size_t {
    if buf.is_null() || buf_size.is_null() || (*buf).is_null() {
        return 0;
    }
    let direction = if flags & FLAG_REVERSE != 0 {
        Direction::Decode
    } else {
        Direction::Encode
    };
    let input = std::slice::from_raw_parts((*buf).cast::<u8>(), nbytes);

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut guard = installed();
        if guard.is_none() {
            *guard = default_filter();
        }
        guard.as_mut().map(|filter| {
            filter.filter(direction, input).map(|out| match out {
                Cow::Borrowed(_) => None,
                Cow::Owned(bytes) => Some(bytes),
            })
        })
    }));

    let out = match result {
        Ok(Some(Ok(Some(out)))) => out,
        Ok(Some(Ok(None))) => return nbytes,
        Ok(None) => {
            error!("h5calib filter invoked with no filter installed");
            return 0;
        }
        Ok(Some(Err(e))) => {
            error!("h5calib filter failed: {e}");
            return 0;
        }
        Err(_) => {
            error!("h5calib filter panicked");
            return 0;
        }
    };
    if out.is_empty() {
        return 0;
    }

    let new_buf = libc::malloc(out.len());
    if new_buf.is_null() {
        return 0;
    }
    std::ptr::copy_nonoverlapping(out.as_ptr(), new_buf.cast::<u8>(), out.len());
    libc::free(*buf);
    *buf = new_buf;
    *buf_size = out.len();
    out.len()
}
