use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::FILE_TAG_ATTRIBUTE;

/// Runtime configuration for the calibration filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Root attribute that identifies which open file a descriptor refers to.
    pub file_tag_attribute: String,
    /// Keep the calibration dataset in memory between chunks. When off, the
    /// calibration slot is refreshed on every decode.
    pub cache_calibration: bool,
    /// Reject calibration data smaller than the descriptor's calibration
    /// shape before running a kernel.
    pub validate_calib_len: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            file_tag_attribute: FILE_TAG_ATTRIBUTE.to_owned(),
            cache_calibration: true,
            validate_calib_len: true,
        }
    }
}

impl FilterConfig {
    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
