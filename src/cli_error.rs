//! Errors reported by the `h5calib` binary.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::descriptor::DecodeError;
use crate::error::CacheError;
use crate::FilterError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}. {}", hint(source))]
    Filter {
        context: &'static str,
        #[source]
        source: FilterError,
    },

    #[error("cannot serialize output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

impl CliError {
    pub fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        CliError::Io {
            action,
            path: path.to_owned(),
            source,
        }
    }

    pub fn filter(context: &'static str, source: impl Into<FilterError>) -> Self {
        CliError::Filter {
            context,
            source: source.into(),
        }
    }
}

/// What to check next for a failed filter call.
pub fn hint(err: &FilterError) -> &'static str {
    match err {
        FilterError::Decode(DecodeError::NotCalibratable) => {
            "The chunk was not written by the calibration writer."
        }
        FilterError::Decode(_) => "The descriptor is malformed.",
        FilterError::Cache(CacheError::FileNotFound { .. }) => {
            "Open the file holding the raw and calibration datasets."
        }
        FilterError::Cache(_) => "Check the dataset paths and shapes.",
        FilterError::Read(_) => "The raw dataset does not match the descriptor.",
        FilterError::Calibration(_) => {
            "The calibration dataset is smaller than the descriptor expects."
        }
        FilterError::ReadOnly => "Write descriptors, not pixel data.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_carry_a_hint() {
        let err = CliError::filter("decoding descriptor", DecodeError::UnknownAlgorithm(9));
        assert_eq!(
            err.to_string(),
            "decoding descriptor: descriptor error: unknown calibration algorithm tag \
             0x00000009. The descriptor is malformed."
        );
    }
}
