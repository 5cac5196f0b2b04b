mod common;

use std::borrow::Cow;

use common::{tagged_storage, writer_bytes, TAG};
use h5calib::filter::pixels_from_bytes;
use h5calib::{
    synth, CacheError, CalibrationError, ChunkFilter, DecodeError, Descriptor, Direction, Filter,
    FilterConfig, FilterError, MemoryStorage, ReadError, DESCRIPTOR_MAGIC,
};

const H: u32 = 3;
const W: u32 = 4;
const PIXELS: usize = (H * W) as usize;

/// Three raw images and a pedestal per algorithm family.
fn storage() -> MemoryStorage {
    let (mut st, f) = tagged_storage("run.h5", TAG);
    let (h, w) = (H as u64, W as u64);

    let pedestal: Vec<f32> = (0..PIXELS).map(|p| p as f32).collect();
    let raw1: Vec<f32> = (0..3)
        .flat_map(|i| pedestal.iter().map(move |v| v + 7.0 + i as f32))
        .collect();
    st.write_dataset(f, "/raw1", &[3, h, w], raw1).unwrap();
    st.write_dataset(f, "/pedestal", &[1, h, w], pedestal).unwrap();

    let raw_v1: Vec<f32> = (0..3).flat_map(|i| vec![100.0 * (i + 1) as f32; PIXELS]).collect();
    let calib_v1: Vec<f32> = (0..2).flat_map(|c| vec![c as f32 + 0.5; PIXELS]).collect();
    st.write_dataset(f, "/raw_v1", &[3, h, w], raw_v1).unwrap();
    st.write_dataset(f, "/calib", &[2, h, w], calib_v1).unwrap();

    let constants = synth::agipd_calibration_constants(2, H as usize, W as usize);
    let raw_v2: Vec<f32> = (0..3)
        .flat_map(|i| {
            let image: Vec<f32> = (0..PIXELS).map(|p| (p * 50 + i) as f32).collect();
            synth::agipd_encode(&image, &constants, i % 2).unwrap()
        })
        .collect();
    st.write_dataset(f, "/raw_v2", &[3, h, w, 2], raw_v2).unwrap();
    st.write_dataset(f, "/calib_v2", &[2, h, w, 8], constants).unwrap();
    st
}

fn decode(filter: &mut Filter<MemoryStorage>, desc: &Descriptor) -> Vec<f32> {
    let chunk = desc.to_chunk(4, PIXELS * 4).unwrap();
    match filter.decode(&chunk).unwrap() {
        Cow::Owned(bytes) => pixels_from_bytes(&bytes),
        Cow::Borrowed(_) => panic!("descriptor chunk passed through"),
    }
}

#[test]
fn pedestal_v1_end_to_end() {
    let mut filter = Filter::new(storage());
    for i in 0..3 {
        let d = Descriptor::pedestal_v1(TAG, i, H, W, "/raw1", "/pedestal").unwrap();
        assert_eq!(decode(&mut filter, &d), vec![7.0 + i as f32; PIXELS]);
    }
}

#[test]
fn agipd_v1_end_to_end() {
    let mut filter = Filter::new(storage());
    for i in 0..3u32 {
        let cell = i % 2;
        let d = Descriptor::agipd_v1(TAG, cell, i, 2, H, W, "/raw_v1", "/calib").unwrap();
        let expected = 100.0 * (i + 1) as f32 - (cell as f32 + 0.5);
        assert_eq!(decode(&mut filter, &d), vec![expected; PIXELS]);
    }
}

#[test]
fn agipd_v2_recovers_synthetic_images() {
    let mut filter = Filter::new(storage());
    for i in 0..3u32 {
        let d = Descriptor::agipd_v2(TAG, i % 2, i, 2, H, W, "/raw_v2", "/calib_v2").unwrap();
        let expected: Vec<f32> = (0..PIXELS).map(|p| (p * 50 + i as usize) as f32).collect();
        assert_eq!(decode(&mut filter, &d), expected);
    }
}

#[test]
fn output_is_sized_for_corrected_pixels() {
    let mut filter = Filter::new(storage());
    let d = Descriptor::agipd_v2(TAG, 0, 0, 2, H, W, "/raw_v2", "/calib_v2").unwrap();
    let bytes = d.to_bytes();
    let out = filter.decode(&bytes).unwrap();
    assert_eq!(out.len(), PIXELS * 4);
}

#[test]
fn repeated_chunks_reuse_cached_datasets() {
    let mut filter = Filter::new(storage());
    for i in 0..3 {
        let d = Descriptor::pedestal_v1(TAG, i, H, W, "/raw1", "/pedestal").unwrap();
        decode(&mut filter, &d);
    }
    let stats = filter.storage().stats();
    assert_eq!(stats.dataset_opens, 2);
    assert_eq!(stats.full_reads, 1);
    assert_eq!(stats.hyperslab_reads, 3);
}

#[test]
fn reopened_file_is_picked_up() {
    let mut filter = Filter::new(storage());
    let d = Descriptor::pedestal_v1(TAG, 0, H, W, "/raw1", "/pedestal").unwrap();
    decode(&mut filter, &d);
    filter.storage_mut().close_file("run.h5");
    filter.storage_mut().open_file("run.h5");
    assert_eq!(decode(&mut filter, &d), vec![7.0; PIXELS]);
    let stats = filter.storage().stats();
    assert_eq!(stats.dataset_opens, 4);
    assert_eq!(stats.open_handles(), 2);
}

#[test]
fn closed_file_fails_decode() {
    let mut filter = Filter::new(storage());
    let d = Descriptor::pedestal_v1(TAG, 0, H, W, "/raw1", "/pedestal").unwrap();
    decode(&mut filter, &d);
    filter.storage_mut().close_file("run.h5");
    let err = filter.decode(&d.to_bytes()).unwrap_err();
    assert!(matches!(
        err,
        FilterError::Cache(CacheError::FileNotFound { matches: 0, .. })
    ));
    assert_eq!(filter.cache().raw_path(), None);
}

#[test]
fn encode_keeps_descriptor_only() {
    let filter = Filter::new(MemoryStorage::new());
    let d = Descriptor::agipd_v1(TAG, 1, 2, 2, H, W, "/raw_v1", "/calib").unwrap();
    let chunk = d.to_chunk(4, PIXELS * 4).unwrap();
    let out = filter.encode(&chunk).unwrap();
    assert_eq!(out, d.to_bytes());
    assert_eq!(out.len(), d.encoded_length());
    assert_eq!(filter.storage().stats(), Default::default());
}

#[test]
fn encode_without_descriptor_is_read_only() {
    let filter = Filter::new(MemoryStorage::new());
    let plain = vec![0u8; PIXELS * 4];
    assert_eq!(filter.encode(&plain), Err(FilterError::ReadOnly));
}

#[test]
fn decode_without_descriptor_passes_through() {
    let mut filter = Filter::new(storage());
    let plain: Vec<u8> = (0..PIXELS as u32).flat_map(|v| (v as f32).to_ne_bytes()).collect();
    let out = filter.filter(Direction::Decode, &plain).unwrap();
    assert!(matches!(out, Cow::Borrowed(_)));
    assert_eq!(&*out, &plain[..]);
}

#[test]
fn unknown_algorithm_does_no_io() {
    let mut filter = Filter::new(storage());
    let before = filter.storage().stats();
    let bytes = writer_bytes(&[DESCRIPTOR_MAGIC, TAG, 0x0009_0001, 0, 3, 4], "/raw1", "/pedestal");
    assert_eq!(
        filter.decode(&bytes),
        Err(FilterError::Decode(DecodeError::UnknownAlgorithm(0x0009_0001)))
    );
    assert_eq!(filter.storage().stats(), before);
    assert_eq!(filter.cache().raw_path(), None);
}

#[test]
fn cell_past_calibration_is_out_of_range() {
    let config = FilterConfig {
        validate_calib_len: false,
        ..FilterConfig::default()
    };
    let mut filter = Filter::with_config(storage(), config);
    let d = Descriptor::agipd_v1(TAG, 2, 0, 2, H, W, "/raw_v1", "/calib").unwrap();
    let err = filter.decode(&d.to_bytes()).unwrap_err();
    assert_eq!(
        err,
        FilterError::Calibration(CalibrationError::OutOfRange {
            index: 3 * PIXELS as u64 - 1,
            len: 2 * PIXELS
        })
    );
}

#[test]
fn undersized_calibration_rejected_up_front() {
    let mut filter = Filter::new(storage());
    // Claims three cells; the dataset holds two.
    let d = Descriptor::agipd_v1(TAG, 0, 0, 3, H, W, "/raw_v1", "/calib").unwrap();
    let err = filter.decode(&d.to_bytes()).unwrap_err();
    assert_eq!(
        err,
        FilterError::Calibration(CalibrationError::OutOfRange {
            index: 3 * PIXELS as u64 - 1,
            len: 2 * PIXELS
        })
    );
    assert_eq!(filter.storage().stats().hyperslab_reads, 0);
}

#[test]
fn rank_mismatch_is_read_error() {
    let mut filter = Filter::new(storage());
    let d = Descriptor::agipd_v2(TAG, 0, 0, 2, H, W, "/raw1", "/calib_v2").unwrap();
    assert_eq!(
        filter.decode(&d.to_bytes()).unwrap_err(),
        FilterError::Read(ReadError::RankMismatch {
            expected: 4,
            actual: 3
        })
    );
}

#[test]
fn image_past_end_is_storage_error() {
    let mut filter = Filter::new(storage());
    let d = Descriptor::pedestal_v1(TAG, 3, H, W, "/raw1", "/pedestal").unwrap();
    assert!(matches!(
        filter.decode(&d.to_bytes()),
        Err(FilterError::Read(ReadError::Storage(_)))
    ));
}

#[test]
fn uncached_calibration_rereads_every_chunk() {
    let config = FilterConfig {
        cache_calibration: false,
        ..FilterConfig::default()
    };
    let mut filter = Filter::with_config(storage(), config);
    for i in 0..3 {
        let d = Descriptor::pedestal_v1(TAG, i, H, W, "/raw1", "/pedestal").unwrap();
        decode(&mut filter, &d);
    }
    let stats = filter.storage().stats();
    assert_eq!(stats.full_reads, 3);
    assert_eq!(stats.open_handles(), 2);
}

#[test]
fn oversized_shape_is_rejected_without_io() {
    let mut filter = Filter::new(storage());
    let before = filter.storage().stats();
    let words = [DESCRIPTOR_MAGIC, TAG, 0x0002_0002, 0, 0, 2, u32::MAX, u32::MAX];
    let bytes = writer_bytes(&words, "/raw_v2", "/calib_v2");
    let err = filter.decode(&bytes).unwrap_err();
    assert!(matches!(
        err,
        FilterError::Decode(DecodeError::ShapeOverflow(_))
    ));
    assert_eq!(filter.storage().stats(), before);

    // Still usable afterwards.
    let d = Descriptor::agipd_v2(TAG, 0, 0, 2, H, W, "/raw_v2", "/calib_v2").unwrap();
    assert_eq!(decode(&mut filter, &d).len(), PIXELS);
}
