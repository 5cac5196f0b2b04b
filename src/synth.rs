//! Synthetic AGIPD-like data for demos and tests.
//!
//! Calibration constants use one value per record slot for every cell and
//! pixel. [`agipd_encode`] inverts the Agipd_v2 correction, so calibrating
//! its output returns the input image.

use crate::descriptor::GAIN_RECORD_LEN;
use crate::kernels::gain_level;

/// Record used for every cell and pixel:
/// thresholds, then `(pedestal, slope)` for high, medium and low gain.
pub const DEFAULT_RECORD: [f32; GAIN_RECORD_LEN as usize] =
    [1000.0, 3000.0, 4231.0, 20.0, 3232.0, 6.0, 2512.0, 2.0];

/// Signal at which the encoder switches from high to medium gain.
pub const MEDIUM_GAIN_SIGNAL: f32 = 100.0;
/// Signal at which the encoder switches from medium to low gain.
pub const LOW_GAIN_SIGNAL: f32 = 500.0;

/// Calibration dataset of shape `[n_cells, height, width, 8]`, flattened.
pub fn agipd_calibration_constants(n_cells: usize, height: usize, width: usize) -> Vec<f32> {
    let pixels = n_cells * height * width;
    let mut out = Vec::with_capacity(pixels * DEFAULT_RECORD.len());
    for _ in 0..pixels {
        out.extend_from_slice(&DEFAULT_RECORD);
    }
    out
}

/// Gain-interleaved raw samples `[signal, gain]` per pixel for `image`,
/// using the records of `cell` in `constants`.
///
/// Returns `None` if `constants` holds no records for `cell`.
pub fn agipd_encode(image: &[f32], constants: &[f32], cell: usize) -> Option<Vec<f32>> {
    let record = GAIN_RECORD_LEN as usize;
    let base = cell.checked_mul(image.len() * record)?;
    let records = constants.get(base..base + image.len() * record)?;

    let mut raw = Vec::with_capacity(image.len() * 2);
    for (&value, rec) in image.iter().zip(records.chunks_exact(record)) {
        let level = if value > LOW_GAIN_SIGNAL {
            2
        } else if value > MEDIUM_GAIN_SIGNAL {
            1
        } else {
            0
        };
        let (t0, t1) = (rec[0], rec[1]);
        let pedestal = rec[2 + 2 * level];
        let slope = rec[3 + 2 * level];
        // One below the level's upper threshold, or one above t1 for low gain.
        let gain = match level {
            0 => t0 - 1.0,
            1 => t1 - 1.0,
            _ => t1 + 1.0,
        };
        debug_assert_eq!(gain_level(gain, t0, t1), level);
        raw.push(value * slope + pedestal);
        raw.push(gain);
    }
    Some(raw)
}

/// Frame `index` of a ramp image: pixel `p` holds `p + index`.
pub fn ramp_image(height: usize, width: usize, index: usize) -> Vec<f32> {
    (0..height * width).map(|p| (p + index) as f32).collect()
}
