//! Error taxonomy for the converter.
//!
//! Missing counterpart files are not errors: they are logged as warnings and
//! counted in [`ProcessingStats`](crate::types::ProcessingStats).

use std::path::PathBuf;
use thiserror::Error;

/// Broad class of a [`ConvertError`], used to pick the propagation policy and exit code.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nothing can be produced: bad root, missing or malformed labelmap.
    Configuration,
    /// Input data disagrees with itself: bad rows, unknown labels, box/image mismatch.
    DataIntegrity,
    /// Failure while writing output.
    Io,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("dataset root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("category directory not found: {}", .0.display())]
    CategoryNotFound(PathBuf),

    #[error("labelmap not found: {}", .0.display())]
    MissingLabelMap(PathBuf),

    #[error("malformed labelmap {}: {source}", .path.display())]
    MalformedLabelMap {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("duplicate label_id {label_id} in {}", .path.display())]
    DuplicateLabelId { path: PathBuf, label_id: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{}:{line}: label_id {label_id} is not in the labelmap", .path.display())]
    UnknownLabel {
        path: PathBuf,
        line: u64,
        label_id: u32,
    },

    #[error("{}:{line}: malformed row: {reason}", .path.display())]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("{}:{line}: box has non-positive size {width}x{height}", .path.display())]
    InvalidBox {
        path: PathBuf,
        line: u64,
        width: u32,
        height: u32,
    },

    #[error(
        "{}:{line}: box [{x}, {y}, {width}, {height}] exceeds image size {image_width}x{image_height}",
        .path.display()
    )]
    BoxOutOfBounds {
        path: PathBuf,
        line: u64,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        image_width: u32,
        image_height: u32,
    },

    #[error("cannot read image dimensions of {}: {reason}", .path.display())]
    UnreadableImage { path: PathBuf, reason: String },

    #[error("inconsistent document {}: {reason}", .path.display())]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ConvertError {
    pub fn kind(&self) -> ErrorKind {
        use ConvertError::*;
        match self {
            RootNotFound(_)
            | CategoryNotFound(_)
            | MissingLabelMap(_)
            | MalformedLabelMap { .. }
            | DuplicateLabelId { .. }
            | InvalidConfig(_) => ErrorKind::Configuration,
            UnknownLabel { .. }
            | MalformedRow { .. }
            | InvalidBox { .. }
            | BoxOutOfBounds { .. }
            | UnreadableImage { .. }
            | InvalidDocument { .. } => ErrorKind::DataIntegrity,
            Io { .. } | Serialize { .. } => ErrorKind::Io,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConvertError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let missing = ConvertError::MissingLabelMap(PathBuf::from("strawberries/labelmap.json"));
        assert_eq!(missing.kind(), ErrorKind::Configuration);

        let unknown = ConvertError::UnknownLabel {
            path: PathBuf::from("a.csv"),
            line: 2,
            label_id: 9,
        };
        assert_eq!(unknown.kind(), ErrorKind::DataIntegrity);
        assert_eq!(
            unknown.to_string(),
            "a.csv:2: label_id 9 is not in the labelmap"
        );

        let io = ConvertError::io("out", std::io::Error::other("disk full"));
        assert_eq!(io.kind(), ErrorKind::Io);
    }
}
