//! Chunk descriptor codec.
//!
//! A calibrated chunk is stored as a small header instead of pixel data.
//! All numeric fields are little-endian `u32` words:
//!
//! ```text
//! [magic][file_tag][algorithm][words...][raw_path\0][calib_path\0]
//! ```
//!
//! * **Pedestal_v1** words: `image_index, height, width`
//! * **Agipd_v1 / Agipd_v2** words: `cell_id, image_index, n_cells, height, width`
//!
//! Agipd_v2 calibration data carries a trailing axis of 8 values per pixel,
//! so its `calib_shape` is 4-dimensional.

use serde::Serialize;
use thiserror::Error;

/// Marks the start of every calibrated chunk.
pub const DESCRIPTOR_MAGIC: u32 = 0x6290_D662;
/// Values per pixel in an Agipd_v2 calibration record.
pub const GAIN_RECORD_LEN: u64 = 8;

const PEDESTAL_V1_TAG: u32 = 0x0001_0001;
const AGIPD_V1_TAG: u32 = 0x0002_0001;
const AGIPD_V2_TAG: u32 = 0x0002_0002;

/// Errors produced while parsing a descriptor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The chunk does not start with [`DESCRIPTOR_MAGIC`]. Not fatal on read.
    #[error("chunk carries no calibration descriptor")]
    NotCalibratable,
    #[error("unknown calibration algorithm tag {0:#010x}")]
    UnknownAlgorithm(u32),
    #[error("descriptor truncated at byte {offset}: need {needed} more bytes, {available} left")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("descriptor path at byte {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("descriptor path at byte {0} is empty")]
    EmptyPath(usize),
    #[error("descriptor image shape {height}x{width} has no pixels")]
    InvalidShape { height: u64, width: u64 },
    #[error("descriptor calibration shape {0:?} is too large")]
    ShapeOverflow(Vec<u64>),
}

impl DecodeError {
    /// True for the pass-through signal rather than a malformed chunk.
    pub fn is_not_calibratable(&self) -> bool {
        matches!(self, DecodeError::NotCalibratable)
    }
}

/// Correction applied to a chunk on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Algorithm {
    PedestalV1,
    AgipdV1 { cell_id: u64 },
    AgipdV2 { cell_id: u64 },
}

impl Algorithm {
    /// Wire tag written after the file tag.
    pub fn tag(&self) -> u32 {
        match self {
            Algorithm::PedestalV1 => PEDESTAL_V1_TAG,
            Algorithm::AgipdV1 { .. } => AGIPD_V1_TAG,
            Algorithm::AgipdV2 { .. } => AGIPD_V2_TAG,
        }
    }

    pub fn cell_id(&self) -> Option<u64> {
        match *self {
            Algorithm::PedestalV1 => None,
            Algorithm::AgipdV1 { cell_id } | Algorithm::AgipdV2 { cell_id } => Some(cell_id),
        }
    }

    /// Raw samples stored per output pixel.
    pub fn samples_per_pixel(&self) -> usize {
        match self {
            Algorithm::AgipdV2 { .. } => 2,
            _ => 1,
        }
    }
}

/// Decoded chunk descriptor.
///
/// Only [`decode`] and the constructors produce one, so every numeric field
/// fits a wire word and the shape products fit in memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    magic: u32,
    file_tag: u32,
    algorithm: Algorithm,
    image_index: u64,
    calib_shape: Vec<u64>,
    raw_path: String,
    calib_path: String,
    encoded_length: usize,
}

/// Bounds-checked reader over the descriptor bytes.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_word(&mut self) -> Result<u64, DecodeError> {
        self.read_u32().map(u64::from)
    }

    /// Read a NUL-terminated UTF-8 string, consuming the terminator.
    pub fn read_cstr(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let rest = &self.data[start..];
        let len = rest.iter().position(|&b| b == 0).ok_or(DecodeError::Truncated {
            offset: start,
            needed: rest.len() + 1,
            available: rest.len(),
        })?;
        if len == 0 {
            return Err(DecodeError::EmptyPath(start));
        }
        let s = std::str::from_utf8(&rest[..len]).map_err(|_| DecodeError::InvalidUtf8(start))?;
        self.pos += len + 1;
        Ok(s.to_owned())
    }
}

/// Parse the descriptor at the start of `bytes`.
///
/// Trailing bytes (the writer's zero padding) are ignored.
pub fn decode(bytes: &[u8]) -> Result<Descriptor, DecodeError> {
    let mut cur = Cursor::new(bytes);
    match cur.read_u32() {
        Ok(DESCRIPTOR_MAGIC) => {}
        _ => return Err(DecodeError::NotCalibratable),
    }
    let file_tag = cur.read_u32()?;
    let tag = cur.read_u32()?;

    let (algorithm, image_index, calib_shape) = match tag {
        PEDESTAL_V1_TAG => {
            let image_index = cur.read_word()?;
            let height = cur.read_word()?;
            let width = cur.read_word()?;
            (Algorithm::PedestalV1, image_index, vec![1, height, width])
        }
        AGIPD_V1_TAG | AGIPD_V2_TAG => {
            let cell_id = cur.read_word()?;
            let image_index = cur.read_word()?;
            let n_cells = cur.read_word()?;
            let height = cur.read_word()?;
            let width = cur.read_word()?;
            if tag == AGIPD_V1_TAG {
                (
                    Algorithm::AgipdV1 { cell_id },
                    image_index,
                    vec![n_cells, height, width],
                )
            } else {
                (
                    Algorithm::AgipdV2 { cell_id },
                    image_index,
                    vec![n_cells, height, width, GAIN_RECORD_LEN],
                )
            }
        }
        other => return Err(DecodeError::UnknownAlgorithm(other)),
    };

    check_shape(&calib_shape)?;

    let raw_path = cur.read_cstr()?;
    let calib_path = cur.read_cstr()?;

    Ok(Descriptor {
        magic: DESCRIPTOR_MAGIC,
        file_tag,
        algorithm,
        image_index,
        calib_shape,
        raw_path,
        calib_path,
        encoded_length: cur.position(),
    })
}

/// Reject shapes with no pixels, and shapes whose element counts do not
/// fit: the calibration product in `u64`, and one image of Agipd_v2
/// records in `usize`.
fn check_shape(calib_shape: &[u64]) -> Result<(), DecodeError> {
    let (height, width) = (calib_shape[1], calib_shape[2]);
    if height == 0 || width == 0 {
        return Err(DecodeError::InvalidShape { height, width });
    }
    let elements = calib_shape.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d));
    let records = height
        .checked_mul(width)
        .and_then(|p| p.checked_mul(GAIN_RECORD_LEN))
        .and_then(|p| usize::try_from(p).ok());
    if elements.is_none() || records.is_none() {
        return Err(DecodeError::ShapeOverflow(calib_shape.to_vec()));
    }
    Ok(())
}

/// Byte length of the descriptor at the start of `bytes`.
pub fn encoded_length(bytes: &[u8]) -> Result<usize, DecodeError> {
    decode(bytes).map(|d| d.encoded_length)
}

fn word(v: u64) -> [u8; 4] {
    // Every field was widened from a u32 word; see `Descriptor`.
    (v as u32).to_le_bytes()
}

impl Descriptor {
    fn build(
        file_tag: u32,
        algorithm: Algorithm,
        image_index: u32,
        calib_shape: Vec<u64>,
        raw_path: &str,
        calib_path: &str,
    ) -> Result<Self, DecodeError> {
        let mut d = Descriptor {
            magic: DESCRIPTOR_MAGIC,
            file_tag,
            algorithm,
            image_index: image_index as u64,
            calib_shape,
            raw_path: raw_path.to_owned(),
            calib_path: calib_path.to_owned(),
            encoded_length: 0,
        };
        let bytes = d.to_bytes();
        // Same checks a reader applies: empty paths and unusable shapes.
        decode(&bytes)?;
        d.encoded_length = bytes.len();
        Ok(d)
    }

    /// Static pedestal subtraction over a `height x width` image.
    pub fn pedestal_v1(
        file_tag: u32,
        image_index: u32,
        height: u32,
        width: u32,
        raw_path: &str,
        calib_path: &str,
    ) -> Result<Self, DecodeError> {
        Self::build(
            file_tag,
            Algorithm::PedestalV1,
            image_index,
            vec![1, height as u64, width as u64],
            raw_path,
            calib_path,
        )
    }

    /// Memory-cell pedestal subtraction.
    #[allow(clippy::too_many_arguments)]
    pub fn agipd_v1(
        file_tag: u32,
        cell_id: u32,
        image_index: u32,
        n_cells: u32,
        height: u32,
        width: u32,
        raw_path: &str,
        calib_path: &str,
    ) -> Result<Self, DecodeError> {
        Self::build(
            file_tag,
            Algorithm::AgipdV1 {
                cell_id: cell_id as u64,
            },
            image_index,
            vec![n_cells as u64, height as u64, width as u64],
            raw_path,
            calib_path,
        )
    }

    /// Gain-switching correction over gain-interleaved raw data.
    #[allow(clippy::too_many_arguments)]
    pub fn agipd_v2(
        file_tag: u32,
        cell_id: u32,
        image_index: u32,
        n_cells: u32,
        height: u32,
        width: u32,
        raw_path: &str,
        calib_path: &str,
    ) -> Result<Self, DecodeError> {
        Self::build(
            file_tag,
            Algorithm::AgipdV2 {
                cell_id: cell_id as u64,
            },
            image_index,
            vec![n_cells as u64, height as u64, width as u64, GAIN_RECORD_LEN],
            raw_path,
            calib_path,
        )
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    pub fn file_tag(&self) -> u32 {
        self.file_tag
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn image_index(&self) -> u64 {
        self.image_index
    }

    /// `[n_cells, height, width]`, with a trailing 8 for Agipd_v2.
    pub fn calib_shape(&self) -> &[u64] {
        &self.calib_shape
    }

    pub fn raw_path(&self) -> &str {
        &self.raw_path
    }

    pub fn calib_path(&self) -> &str {
        &self.calib_path
    }

    /// Bytes this descriptor occupies at the start of the chunk.
    pub fn encoded_length(&self) -> usize {
        self.encoded_length
    }

    pub fn height(&self) -> u64 {
        self.calib_shape[1]
    }

    pub fn width(&self) -> u64 {
        self.calib_shape[2]
    }

    /// Pixels in one corrected image.
    pub fn image_size(&self) -> usize {
        (self.height() * self.width()) as usize
    }

    /// Elements the calibration dataset is expected to hold.
    pub fn calib_element_count(&self) -> u64 {
        self.calib_shape.iter().product()
    }

    /// Canonical serialization, identical to the bytes a decode consumed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(44 + self.raw_path.len() + self.calib_path.len());
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.file_tag.to_le_bytes());
        out.extend_from_slice(&self.algorithm.tag().to_le_bytes());
        match self.algorithm {
            Algorithm::PedestalV1 => {
                out.extend_from_slice(&word(self.image_index));
            }
            Algorithm::AgipdV1 { cell_id } | Algorithm::AgipdV2 { cell_id } => {
                out.extend_from_slice(&word(cell_id));
                out.extend_from_slice(&word(self.image_index));
                out.extend_from_slice(&word(self.calib_shape[0]));
            }
        }
        out.extend_from_slice(&word(self.height()));
        out.extend_from_slice(&word(self.width()));
        out.extend_from_slice(self.raw_path.as_bytes());
        out.push(0);
        out.extend_from_slice(self.calib_path.as_bytes());
        out.push(0);
        out
    }

    /// Chunk image as the writer stores it: the descriptor, zero padded to a
    /// multiple of `item_size`, then zero filled to `chunk_len` bytes.
    ///
    /// Returns `None` if the padded descriptor does not fit in `chunk_len`.
    pub fn to_chunk(&self, item_size: usize, chunk_len: usize) -> Option<Vec<u8>> {
        let mut out = self.to_bytes();
        let item_size = item_size.max(1);
        let padded = out.len().div_ceil(item_size) * item_size;
        if padded > chunk_len {
            return None;
        }
        out.resize(chunk_len, 0);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_rejects_unterminated_string() {
        let mut cur = Cursor::new(b"/raw");
        assert_eq!(
            cur.read_cstr(),
            Err(DecodeError::Truncated {
                offset: 0,
                needed: 5,
                available: 4
            })
        );
        assert_eq!(cur.position(), 0);
    }

    #[test]
    fn chunk_padding_rounds_to_item_size() {
        let d = Descriptor::pedestal_v1(7, 0, 2, 2, "/r", "/c").unwrap();
        // 24 bytes of words + "/r\0" + "/c\0"
        assert_eq!(d.encoded_length, 30);
        assert!(d.to_chunk(4, 30).is_none());
        let chunk = d.to_chunk(4, 32).unwrap();
        assert_eq!(chunk.len(), 32);
        assert_eq!(encoded_length(&chunk), Ok(30));
    }

    #[test]
    fn constructors_reject_what_decode_rejects() {
        assert_eq!(
            Descriptor::pedestal_v1(7, 0, 0, 2, "/r", "/c"),
            Err(DecodeError::InvalidShape { height: 0, width: 2 })
        );
        assert_eq!(
            Descriptor::agipd_v2(7, 0, 0, 2, u32::MAX, u32::MAX, "/r", "/c"),
            Err(DecodeError::ShapeOverflow(vec![
                2,
                u32::MAX as u64,
                u32::MAX as u64,
                GAIN_RECORD_LEN
            ]))
        );
        assert!(matches!(
            Descriptor::agipd_v1(7, 0, 0, 2, 2, 2, "", "/c"),
            Err(DecodeError::EmptyPath(_))
        ));
    }
}
