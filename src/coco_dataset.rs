//! COCO dataset processing module
//!
//! Walks `{root}/{category}/{subcategory}/{images,csv,sets}`, resolves split
//! membership and writes one `{category}_instances_{split}.json` per requested
//! split. Every category's labelmap is loaded before any output is produced, so
//! a configuration error never leaves a partial set of documents behind.

use indicatif::{MultiProgress, ProgressDrawTarget};
use log::{error, info, warn};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::coco::{CocoFile, CocoWriter, Info};
use crate::config::{ConvertConfig, IntegrityPolicy, MissingCsvPolicy, STANDARD_SPLITS};
use crate::error::{ConvertError, ErrorKind, Result};
use crate::io::{
    parse_csv_rows, read_split_list, scan_category, split_file, write_json_atomic, CategoryScan,
};
use crate::labelmap::LabelMap;
use crate::types::{AnnotationRow, ImageRecord, ProcessingStats, Subcategory};
use crate::utils::{
    create_output_directory, create_progress_bar, output_file_name, read_image_dimensions,
    supercategory_name,
};

/// One written output document.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub category: String,
    pub split: String,
    pub path: PathBuf,
    pub stats: ProcessingStats,
}

/// Outcome of a run whose configuration was valid.
#[derive(Debug, Default)]
pub struct ConversionReport {
    pub documents: Vec<DocumentSummary>,
    /// Data-integrity errors that were reported without stopping the run.
    pub errors: Vec<ConvertError>,
    /// `(category, split)` pairs whose document was not written.
    pub aborted: Vec<(String, String)>,
    pub orphan_csv_files: usize,
}

impl ConversionReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn document(&self, category: &str, split: &str) -> Option<&DocumentSummary> {
        self.documents
            .iter()
            .find(|d| d.category == category && d.split == split)
    }
}

/// Process exit code for a finished run or a fatal error.
pub fn exit_code(result: &Result<ConversionReport>) -> u8 {
    match result {
        Ok(report) if !report.has_errors() => 0,
        Ok(_) => 1,
        Err(e) if e.kind() == ErrorKind::DataIntegrity => 1,
        Err(_) => 2,
    }
}

/// A category whose labelmap and directory tree have been loaded.
#[derive(Debug)]
struct LoadedCategory {
    name: String,
    dir: PathBuf,
    labelmap: LabelMap,
    scan: CategoryScan,
}

/// Which images of a subcategory belong to a split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    All,
    Listed(HashSet<String>),
}

impl Membership {
    pub fn contains(&self, stem: &str) -> bool {
        match self {
            Membership::All => true,
            Membership::Listed(stems) => stems.contains(stem),
        }
    }
}

/// Split membership for a subcategory: its own list, else the category list,
/// else every image for the standard split names and none for any other name.
pub fn resolve_membership(
    sub_dir: &Path,
    split: &str,
    category_list: Option<&[String]>,
) -> Result<(Membership, Option<Vec<String>>)> {
    if let Some(stems) = read_split_list(&split_file(sub_dir, split))? {
        let set = stems.iter().cloned().collect();
        return Ok((Membership::Listed(set), Some(stems)));
    }
    let membership = match category_list {
        Some(stems) => Membership::Listed(stems.iter().cloned().collect()),
        None if STANDARD_SPLITS.contains(&split) => Membership::All,
        None => Membership::Listed(HashSet::new()),
    };
    Ok((membership, None))
}

/// Main conversion pipeline.
///
/// Returns `Err` for configuration errors, output failures, and, under
/// [`IntegrityPolicy::AbortRun`], the first data-integrity error.
pub fn convert(config: &ConvertConfig) -> Result<ConversionReport> {
    config.validate().map_err(ConvertError::InvalidConfig)?;
    if !config.root.is_dir() {
        return Err(ConvertError::RootNotFound(config.root.clone()));
    }

    let mut categories = Vec::with_capacity(config.categories.len());
    for name in &config.categories {
        let dir = config.root.join(name);
        if !dir.is_dir() {
            return Err(ConvertError::CategoryNotFound(dir));
        }
        let labelmap = LabelMap::load(&dir)?;
        info!(
            "Loaded {} classes from {}",
            labelmap.len(),
            labelmap.path().display()
        );
        let scan = scan_category(&dir, name)?;
        categories.push(LoadedCategory {
            name: name.clone(),
            dir,
            labelmap,
            scan,
        });
    }

    create_output_directory(&config.out)?;

    let multi = if config.show_progress {
        MultiProgress::new()
    } else {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    };

    let mut report = ConversionReport::default();
    for category in &categories {
        report.orphan_csv_files += category.scan.orphan_csv_files.len();

        // Splits are independent documents.
        let outcomes = config
            .splits
            .par_iter()
            .map(|split| convert_split(config, category, split, &multi))
            .collect::<Result<Vec<_>>>()?;

        for (split, outcome) in config.splits.iter().zip(outcomes) {
            report.errors.extend(outcome.errors);
            match outcome.document {
                Some(document) => report.documents.push(document),
                None => report.aborted.push((category.name.clone(), split.clone())),
            }
        }
    }

    if report.has_errors() {
        error!(
            "Conversion finished with {} data integrity error(s)",
            report.errors.len()
        );
    } else {
        info!("Conversion completed successfully.");
    }
    Ok(report)
}

#[derive(Debug, Default)]
struct SplitOutcome {
    document: Option<DocumentSummary>,
    errors: Vec<ConvertError>,
}

enum Flow {
    Continue,
    Abort,
}

// Log a data-integrity error and decide how to proceed under the configured policy.
fn report_data_error(
    policy: IntegrityPolicy,
    err: ConvertError,
    errors: &mut Vec<ConvertError>,
) -> Result<Flow> {
    error!("{}", err);
    match policy {
        IntegrityPolicy::AbortRun => Err(err),
        IntegrityPolicy::AbortSplit => {
            errors.push(err);
            Ok(Flow::Abort)
        }
        IntegrityPolicy::SkipRow => {
            errors.push(err);
            Ok(Flow::Continue)
        }
    }
}

fn convert_split(
    config: &ConvertConfig,
    category: &LoadedCategory,
    split: &str,
    multi: &MultiProgress,
) -> Result<SplitOutcome> {
    let mut outcome = SplitOutcome::default();
    let mut stats = ProcessingStats::new();
    let mut writer = CocoWriter::new(supercategory_name(&category.name));

    if config.all_categories {
        for (id, name) in category.labelmap.iter() {
            writer.add_category(id, name);
        }
    }

    let category_list = read_split_list(&split_file(&category.dir, split))?;
    if let Some(stems) = &category_list {
        stats.unmatched_split_entries += warn_unmatched(
            stems,
            category.scan.subcategories.iter(),
            &split_file(&category.dir, split),
        );
    }

    let mut members: Vec<&ImageRecord> = Vec::new();
    for sub in &category.scan.subcategories {
        let (membership, own_list) = resolve_membership(&sub.dir, split, category_list.as_deref())?;
        if let Some(stems) = &own_list {
            stats.unmatched_split_entries +=
                warn_unmatched(stems, std::iter::once(sub), &split_file(&sub.dir, split));
        }
        members.extend(sub.images.iter().filter(|image| membership.contains(&image.stem)));
    }

    let path = config.out.join(output_file_name(&category.name, split));
    let label = format!("{} {}", category.name, split);
    let pb = multi.add(create_progress_bar(members.len() as u64, &label, config.show_progress));

    for image in members {
        pb.inc(1);
        match add_image(config, category, image, &mut writer, &mut stats, &mut outcome.errors)? {
            Flow::Continue => {}
            Flow::Abort => {
                pb.abandon_with_message("aborted");
                warn!("No document written for {} split of {}", split, category.name);
                remove_stale_output(&path)?;
                return Ok(outcome);
            }
        }
    }
    pb.finish_and_clear();

    let coco = writer.build(Info::from_template(&config.info, &category.name, split));
    if let Err(reason) = coco.validate() {
        let err = ConvertError::InvalidDocument {
            path: path.clone(),
            reason,
        };
        report_data_error(config.on_data_error, err, &mut outcome.errors)?;
        remove_stale_output(&path)?;
        return Ok(outcome);
    }

    write_document(config, &path, &coco)?;
    stats.images_written = coco.images.len();
    stats.annotations_written = coco.annotations.len();
    stats.print_summary(&label);

    outcome.document = Some(DocumentSummary {
        category: category.name.clone(),
        split: split.to_string(),
        path,
        stats,
    });
    Ok(outcome)
}

fn write_document(config: &ConvertConfig, path: &Path, coco: &CocoFile) -> Result<()> {
    write_json_atomic(path, coco, config.pretty)?;
    info!(
        "Generated: {} ({} images, {} annotations)",
        path.display(),
        coco.images.len(),
        coco.annotations.len()
    );
    Ok(())
}

// A document from an earlier run must not pass for the output of an aborted split.
fn remove_stale_output(path: &Path) -> Result<()> {
    if path.is_file() {
        warn!("Removing stale output {}", path.display());
        std::fs::remove_file(path).map_err(|e| ConvertError::io(path, e))?;
    }
    Ok(())
}

// Split entries with no image in any of the given subcategories.
fn warn_unmatched<'a>(
    stems: &[String],
    subs: impl Iterator<Item = &'a Subcategory>,
    list_path: &Path,
) -> usize {
    let known: HashSet<&str> = subs
        .flat_map(|sub| sub.images.iter().map(|image| image.stem.as_str()))
        .collect();
    let mut unmatched = 0;
    for stem in stems {
        if !known.contains(stem.as_str()) {
            warn!(
                "{}: '{}' has no matching image, skipping",
                list_path.display(),
                stem
            );
            unmatched += 1;
        }
    }
    unmatched
}

fn add_image(
    config: &ConvertConfig,
    category: &LoadedCategory,
    image: &ImageRecord,
    writer: &mut CocoWriter,
    stats: &mut ProcessingStats,
    errors: &mut Vec<ConvertError>,
) -> Result<Flow> {
    let (width, height) = match read_image_dimensions(&image.image_path) {
        Ok(dims) => dims,
        Err(e) => {
            stats.rejected_images += 1;
            return report_data_error(config.on_data_error, e, errors);
        }
    };

    let csv_path = match &image.csv_path {
        Some(path) => path,
        None => {
            warn!("Image without matching CSV: {}", image.image_path.display());
            stats.images_without_csv += 1;
            if config.missing_csv == MissingCsvPolicy::KeepImage {
                writer.add_image(image.file_name.clone(), width, height);
            }
            return Ok(Flow::Continue);
        }
    };

    // A CSV that cannot be parsed at all drops the image; only read failures are fatal.
    let rows = match parse_csv_rows(csv_path) {
        Ok(rows) => rows,
        Err(e) if e.kind() == ErrorKind::DataIntegrity => {
            stats.rejected_images += 1;
            return report_data_error(config.on_data_error, e, errors);
        }
        Err(e) => return Err(e),
    };

    let mut boxes: Vec<AnnotationRow> = Vec::new();
    for row in rows {
        let checked = row.and_then(|(line, row)| {
            check_row(csv_path, line, &row, &category.labelmap, width, height).map(|_| row)
        });
        match checked {
            Ok(row) => boxes.push(row),
            Err(e) => {
                stats.rejected_rows += 1;
                if let Flow::Abort = report_data_error(config.on_data_error, e, errors)? {
                    return Ok(Flow::Abort);
                }
            }
        }
    }

    let image_id = writer.add_image(image.file_name.clone(), width, height);
    for row in boxes {
        if let Some(name) = category.labelmap.name(row.label_id) {
            writer.add_category(row.label_id, name);
        }
        writer.add_annotation(image_id, row.label_id, row.bbox());
    }
    Ok(Flow::Continue)
}

/// Validate one CSV row against the labelmap and the image's pixel dimensions.
pub fn check_row(
    csv_path: &Path,
    line: u64,
    row: &AnnotationRow,
    labelmap: &LabelMap,
    image_width: u32,
    image_height: u32,
) -> Result<()> {
    if !labelmap.contains(row.label_id) {
        return Err(ConvertError::UnknownLabel {
            path: csv_path.to_path_buf(),
            line,
            label_id: row.label_id,
        });
    }
    if row.width == 0 || row.height == 0 {
        return Err(ConvertError::InvalidBox {
            path: csv_path.to_path_buf(),
            line,
            width: row.width,
            height: row.height,
        });
    }
    let right = u64::from(row.x) + u64::from(row.width);
    let bottom = u64::from(row.y) + u64::from(row.height);
    if right > u64::from(image_width) || bottom > u64::from(image_height) {
        return Err(ConvertError::BoxOutOfBounds {
            path: csv_path.to_path_buf(),
            line,
            x: row.x,
            y: row.y,
            width: row.width,
            height: row.height,
            image_width,
            image_height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelEntry;
    use std::fs;

    fn labelmap() -> LabelMap {
        LabelMap::from_entries(
            PathBuf::from("labelmap.json"),
            vec![LabelEntry {
                object_id: Some(1),
                label_id: 1,
                keyboard_shortcut: Some("1".to_string()),
                object_name: "leaf_spot".to_string(),
            }],
        )
        .unwrap()
    }

    fn row(x: u32, y: u32, width: u32, height: u32, label_id: u32) -> AnnotationRow {
        AnnotationRow {
            item_index: Some(0),
            x,
            y,
            width,
            height,
            label_id,
        }
    }

    #[test]
    fn test_check_row() {
        let path = Path::new("a.csv");
        let labels = labelmap();
        assert!(check_row(path, 2, &row(0, 0, 100, 50, 1), &labels, 100, 50).is_ok());
        assert!(matches!(
            check_row(path, 2, &row(0, 0, 10, 10, 7), &labels, 100, 50),
            Err(ConvertError::UnknownLabel { label_id: 7, .. })
        ));
        assert!(matches!(
            check_row(path, 3, &row(0, 0, 0, 10, 1), &labels, 100, 50),
            Err(ConvertError::InvalidBox { line: 3, .. })
        ));
        assert!(matches!(
            check_row(path, 4, &row(90, 0, 11, 10, 1), &labels, 100, 50),
            Err(ConvertError::BoxOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_resolve_membership() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sub = temp_dir.path().join("leaf_spot");
        fs::create_dir_all(&sub).unwrap();

        let (membership, _) = resolve_membership(&sub, "train", None).unwrap();
        assert_eq!(membership, Membership::All);

        let (membership, _) = resolve_membership(&sub, "holdout", None).unwrap();
        assert!(!membership.contains("a"));

        let category_list = vec!["a".to_string()];
        let (membership, own) = resolve_membership(&sub, "train", Some(category_list.as_slice())).unwrap();
        assert!(membership.contains("a") && !membership.contains("b"));
        assert!(own.is_none());

        fs::create_dir_all(sub.join("sets")).unwrap();
        fs::write(sub.join("sets/train.txt"), "b\n").unwrap();
        let (membership, own) = resolve_membership(&sub, "train", Some(category_list.as_slice())).unwrap();
        assert!(membership.contains("b") && !membership.contains("a"));
        assert_eq!(own, Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(&Ok(ConversionReport::default())), 0);

        let report = ConversionReport {
            errors: vec![ConvertError::UnreadableImage {
                path: PathBuf::from("a.png"),
                reason: "truncated".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(exit_code(&Ok(report)), 1);
        assert_eq!(
            exit_code(&Err(ConvertError::RootNotFound(PathBuf::from("nope")))),
            2
        );
    }
}
