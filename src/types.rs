use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

// Supported image formats, in lookup priority order when several files share a stem
pub const IMG_FORMATS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Directory names under a category that are never subcategories.
pub const RESERVED_DIRS: &[&str] = &["sets"];

// One entry of a category's labelmap.json
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    #[serde(default)]
    pub object_id: Option<u32>,
    pub label_id: u32,
    #[serde(default)]
    pub keyboard_shortcut: Option<String>,
    pub object_name: String,
}

// One bounding-box row of a per-image CSV file: `#item,x,y,width,height,label`
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationRow {
    #[serde(rename = "#item", default)]
    pub item_index: Option<u32>,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "label")]
    pub label_id: u32,
}

impl AnnotationRow {
    pub fn bbox(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// An image discovered under `{subcategory}/images/` with its optional CSV counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub stem: String,
    pub image_path: PathBuf,
    pub csv_path: Option<PathBuf>,
    /// Path relative to the dataset root, as written to `file_name`.
    pub file_name: String,
}

/// A subcategory directory and its images, sorted by stem.
#[derive(Debug, Clone)]
pub struct Subcategory {
    pub name: String,
    pub dir: PathBuf,
    pub images: Vec<ImageRecord>,
}

// Struct to hold processing statistics for one output document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub images_written: usize,
    pub annotations_written: usize,
    pub images_without_csv: usize,
    pub unmatched_split_entries: usize,
    pub rejected_rows: usize,
    pub rejected_images: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> usize {
        self.images_without_csv + self.unmatched_split_entries
    }

    pub fn print_summary(&self, label: &str) {
        log::info!("=== {} ===", label);
        log::info!("Images written: {}", self.images_written);
        log::info!("Annotations written: {}", self.annotations_written);
        if self.warnings() > 0 {
            log::warn!(
                "Skipped counterparts: {} (image without csv: {}, unmatched split entries: {})",
                self.warnings(),
                self.images_without_csv,
                self.unmatched_split_entries
            );
        }
        if self.rejected_rows + self.rejected_images > 0 {
            log::error!(
                "Rejected data: {} rows, {} images",
                self.rejected_rows,
                self.rejected_images
            );
        }
    }
}
