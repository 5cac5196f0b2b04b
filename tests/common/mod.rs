#![allow(dead_code)]

use h5calib::memory::FileId;
use h5calib::{MemoryStorage, FILE_TAG_ATTRIBUTE};

pub const TAG: u32 = 0xA5A5_0001;

/// Descriptor bytes laid out the way the writer produces them.
pub fn writer_bytes(words: &[u32], raw: &str, calib: &str) -> Vec<u8> {
    let mut out: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    out.extend_from_slice(raw.as_bytes());
    out.push(0);
    out.extend_from_slice(calib.as_bytes());
    out.push(0);
    out
}

/// Storage with one tagged file and no datasets.
pub fn tagged_storage(name: &str, tag: u32) -> (MemoryStorage, FileId) {
    let mut st = MemoryStorage::new();
    let file = st.open_file(name);
    st.set_attr_u32(file, FILE_TAG_ATTRIBUTE, tag).unwrap();
    (st, file)
}
