//! Calibration kernels.
//!
//! Every kernel corrects the raw buffer in place. Calibration offsets are
//! checked against the materialized calibration buffer before any pixel is
//! written, so a failing chunk never leaves partial output behind.

use crate::descriptor::{Algorithm, GAIN_RECORD_LEN};
use crate::error::CalibrationError;

/// Gain level for a gain-indicator sample against two ascending thresholds.
///
/// A sample equal to a threshold stays at the lower level.
pub fn gain_level(gain: f32, t0: f32, t1: f32) -> usize {
    if gain > t1 {
        2
    } else if gain > t0 {
        1
    } else {
        0
    }
}

fn check_range(calib: &[f32], first: u64, len: u64) -> Result<usize, CalibrationError> {
    let end = first
        .checked_add(len)
        .ok_or(CalibrationError::OutOfRange {
            index: first,
            len: calib.len(),
        })?;
    if end > calib.len() as u64 {
        return Err(CalibrationError::OutOfRange {
            index: end - 1,
            len: calib.len(),
        });
    }
    Ok(first as usize)
}

fn check_raw(raw: &[f32], expected: usize) -> Result<(), CalibrationError> {
    if raw.len() < expected {
        return Err(CalibrationError::RawLength {
            expected,
            got: raw.len(),
        });
    }
    Ok(())
}

/// `raw[i] -= calib[offset + i]` for every pixel.
fn subtract_pedestal(
    raw: &mut [f32],
    calib: &[f32],
    image_size: usize,
    cell_id: u64,
) -> Result<(), CalibrationError> {
    check_raw(raw, image_size)?;
    let first = cell_id
        .checked_mul(image_size as u64)
        .ok_or(CalibrationError::OutOfRange {
            index: cell_id,
            len: calib.len(),
        })?;
    let base = check_range(calib, first, image_size as u64)?;
    for (r, c) in raw[..image_size].iter_mut().zip(&calib[base..base + image_size]) {
        *r -= *c;
    }
    Ok(())
}

/// Static pedestal, one calibration image.
pub fn pedestal_v1(raw: &mut [f32], calib: &[f32], image_size: usize) -> Result<(), CalibrationError> {
    subtract_pedestal(raw, calib, image_size, 0)
}

/// Per memory cell pedestal.
pub fn agipd_v1(
    raw: &mut [f32],
    calib: &[f32],
    image_size: usize,
    cell_id: u64,
) -> Result<(), CalibrationError> {
    subtract_pedestal(raw, calib, image_size, cell_id)
}

/// Gain switching correction.
///
/// `raw` holds `(signal, gain)` pairs per pixel. Each pixel's calibration
/// record is `[t0, t1, offset0, slope0, offset1, slope1, offset2, slope2]`.
/// On return the first `image_size` values of `raw` hold
/// `(signal - offset[level]) / slope[level]`.
pub fn agipd_v2(
    raw: &mut [f32],
    calib: &[f32],
    image_size: usize,
    cell_id: u64,
) -> Result<(), CalibrationError> {
    let samples = image_size.checked_mul(2).ok_or(CalibrationError::RawLength {
        expected: usize::MAX,
        got: raw.len(),
    })?;
    check_raw(raw, samples)?;
    let record = GAIN_RECORD_LEN as usize;
    let span = (image_size as u64).checked_mul(GAIN_RECORD_LEN);
    let first = span
        .and_then(|span| cell_id.checked_mul(span))
        .ok_or(CalibrationError::OutOfRange {
            index: u64::MAX,
            len: calib.len(),
        })?;
    let base = check_range(calib, first, image_size as u64 * GAIN_RECORD_LEN)?;
    let records = &calib[base..base + image_size * record];

    // Writing raw[i] only touches samples already consumed (i <= 2i).
    for (i, rec) in records.chunks_exact(record).enumerate() {
        let signal = raw[2 * i];
        let gain = raw[2 * i + 1];
        let level = gain_level(gain, rec[0], rec[1]);
        let offset = rec[2 + 2 * level];
        let slope = rec[3 + 2 * level];
        raw[i] = (signal - offset) / slope;
    }
    Ok(())
}

/// Run the kernel selected by `algorithm` and return the corrected pixels.
pub fn apply(
    algorithm: Algorithm,
    mut raw: Vec<f32>,
    calib: &[f32],
    image_size: usize,
) -> Result<Vec<f32>, CalibrationError> {
    match algorithm {
        Algorithm::PedestalV1 => pedestal_v1(&mut raw, calib, image_size)?,
        Algorithm::AgipdV1 { cell_id } => agipd_v1(&mut raw, calib, image_size, cell_id)?,
        Algorithm::AgipdV2 { cell_id } => agipd_v2(&mut raw, calib, image_size, cell_id)?,
    }
    raw.truncate(image_size);
    Ok(raw)
}
