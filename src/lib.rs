//! CSV bounding-box annotations to COCO format converter
//!
//! This library reads a dataset tree of per-image CSV box annotations and
//! per-category labelmaps and writes one COCO JSON document per split.

pub mod coco;
pub mod coco_dataset;
pub mod config;
pub mod error;
pub mod io;
pub mod labelmap;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions
pub use coco::{CocoFile, CocoWriter};
pub use coco_dataset::{convert, exit_code, ConversionReport, DocumentSummary};
pub use config::{Args, ConvertConfig, IntegrityPolicy, MissingCsvPolicy};
pub use error::{ConvertError, ErrorKind};
pub use labelmap::LabelMap;
