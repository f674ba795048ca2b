use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};

/// Read an image's pixel dimensions from its file header without decoding it.
pub fn read_image_dimensions(path: &Path) -> Result<(u32, u32)> {
    let size = imagesize::size(path).map_err(|e| ConvertError::UnreadableImage {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let width = u32::try_from(size.width);
    let height = u32::try_from(size.height);
    match (width, height) {
        (Ok(width), Ok(height)) if width > 0 && height > 0 => Ok((width, height)),
        _ => Err(ConvertError::UnreadableImage {
            path: path.to_path_buf(),
            reason: format!("unsupported dimensions {}x{}", size.width, size.height),
        }),
    }
}

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// Create the output directory if needed; existing contents are left alone.
pub fn create_output_directory(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        log::info!("Creating output directory {}", path.display());
    }
    fs::create_dir_all(path).map_err(|e| ConvertError::io(path, e))?;
    Ok(path.to_path_buf())
}

/// Supercategory for a category directory name: one trailing `s` is dropped.
pub fn supercategory_name(category: &str) -> &str {
    category.strip_suffix('s').unwrap_or(category)
}

/// Output file name for one category/split document.
pub fn output_file_name(category: &str, split: &str) -> String {
    format!("{}_instances_{}.json", category, split)
}
