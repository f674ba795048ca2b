use glob::{glob_with, MatchOptions, Pattern};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::types::{
    get_image_extensions_set, AnnotationRow, ImageRecord, Subcategory, IMG_FORMATS, RESERVED_DIRS,
};

pub const IMAGES_DIR: &str = "images";
pub const CSV_DIR: &str = "csv";
pub const SETS_DIR: &str = "sets";

/// A CSV row that parsed, with the 1-based line it came from.
pub type ParsedRow = (u64, AnnotationRow);

/// Parse every row of a per-image CSV file.
///
/// The outer error is an unreadable file; each row carries its own result so a
/// malformed line does not hide the rows after it.
pub fn parse_csv_rows(path: &Path) -> Result<Vec<Result<ParsedRow>>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_io_error(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| csv_io_error(path, e))?
        .clone();

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let line = record.position().map_or(0, |p| p.line());
                // Trailing blank lines come through as a single empty field.
                if record.iter().all(str::is_empty) {
                    continue;
                }
                let row = record
                    .deserialize::<AnnotationRow>(Some(&headers))
                    .map(|row| (line, row))
                    .map_err(|e| ConvertError::MalformedRow {
                        path: path.to_path_buf(),
                        line,
                        reason: e.to_string(),
                    });
                rows.push(row);
            }
            Err(e) if e.is_io_error() => return Err(csv_io_error(path, e)),
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                rows.push(Err(ConvertError::MalformedRow {
                    path: path.to_path_buf(),
                    line,
                    reason: e.to_string(),
                }));
            }
        }
    }
    Ok(rows)
}

fn csv_io_error(path: &Path, e: csv::Error) -> ConvertError {
    let reason = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(source) => ConvertError::io(path, source),
        _ => ConvertError::MalformedRow {
            path: path.to_path_buf(),
            line: 1,
            reason,
        },
    }
}

/// Read image basenames from a split file; `None` when the file does not exist.
pub fn read_split_list(path: &Path) -> Result<Option<Vec<String>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| ConvertError::io(path, e))?;
    let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
    Ok(Some(
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
    ))
}

/// Path of `{dir}/sets/{split}.txt`.
pub fn split_file(dir: &Path, split: &str) -> PathBuf {
    dir.join(SETS_DIR).join(format!("{}.txt", split))
}

/// Result of scanning one category directory.
#[derive(Debug, Clone, Default)]
pub struct CategoryScan {
    pub subcategories: Vec<Subcategory>,
    /// CSV files with no image of the same stem.
    pub orphan_csv_files: Vec<PathBuf>,
}

/// Enumerate subcategories (sorted by name) and their images (sorted by stem).
pub fn scan_category(category_dir: &Path, category: &str) -> Result<CategoryScan> {
    let entries = fs::read_dir(category_dir).map_err(|e| ConvertError::io(category_dir, e))?;
    let mut dirs: Vec<(String, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| match entry.file_name().to_str() {
            Some(name) => Some((name.to_string(), entry.path())),
            None => {
                warn!(
                    "Skipping subcategory with a non UTF-8 name: {}",
                    entry.path().display()
                );
                None
            }
        })
        .filter(|(name, _)| !name.starts_with('.') && !RESERVED_DIRS.contains(&name.as_str()))
        .collect();
    dirs.sort();

    let mut scan = CategoryScan::default();
    for (name, dir) in dirs {
        let images_dir = dir.join(IMAGES_DIR);
        if !images_dir.is_dir() {
            debug!("Skipping {}: no {}/ directory", dir.display(), IMAGES_DIR);
            continue;
        }

        let image_files = collect_images_by_stem(&images_dir)?;
        let csv_dir = dir.join(CSV_DIR);
        let csv_files = collect_files_by_stem(&csv_dir, "csv")?;

        for (stem, csv_path) in &csv_files {
            if !image_files.contains_key(stem) {
                warn!("CSV without matching image, skipping: {}", csv_path.display());
                scan.orphan_csv_files.push(csv_path.clone());
            }
        }

        let images = image_files
            .into_iter()
            .map(|(stem, image_path)| {
                let file = image_path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default();
                ImageRecord {
                    csv_path: csv_files.get(&stem).cloned(),
                    file_name: format!("{}/{}/{}/{}", category, name, IMAGES_DIR, file),
                    stem,
                    image_path,
                }
            })
            .collect::<Vec<_>>();

        debug!("Found {} images in {}", images.len(), images_dir.display());
        scan.subcategories.push(Subcategory { name, dir, images });
    }
    Ok(scan)
}

// Image files keyed by stem; when several share a stem the extension earliest in IMG_FORMATS wins.
fn collect_images_by_stem(images_dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut by_stem: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in list_files(images_dir, "*")? {
        let ext = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => continue,
        };
        if !get_image_extensions_set().contains(&ext) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            by_stem.entry(stem.to_string()).or_default().push(path);
        }
    }

    Ok(by_stem
        .into_iter()
        .map(|(stem, mut paths)| {
            paths.sort_by_key(|p| (extension_rank(p), p.clone()));
            let chosen = paths.remove(0);
            for other in &paths {
                warn!(
                    "Multiple images share stem '{}', using {} and ignoring {}",
                    stem,
                    chosen.display(),
                    other.display()
                );
            }
            (stem, chosen)
        })
        .collect())
}

fn extension_rank(path: &Path) -> usize {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .and_then(|e| IMG_FORMATS.iter().position(|f| *f == e))
        .unwrap_or(IMG_FORMATS.len())
}

fn collect_files_by_stem(dir: &Path, ext: &str) -> Result<BTreeMap<String, PathBuf>> {
    if !dir.is_dir() {
        return Ok(BTreeMap::new());
    }
    Ok(list_files(dir, &format!("*.{}", ext))?
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_string();
            Some((stem, path))
        })
        .collect())
}

fn list_files(dir: &Path, file_pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/{}",
        Pattern::escape(&dir.to_string_lossy()),
        file_pattern
    );
    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: true,
    };
    let entries = glob_with(&pattern, options)
        .map_err(|e| ConvertError::InvalidConfig(format!("bad path {}: {}", dir.display(), e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Cannot read {}: {}", e.path().display(), e.error());
                None
            }
        })
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    Ok(files)
}

/// Serialize `value` as JSON into a temp file next to `path`, then rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T, pretty: bool) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".csv2coco-")
        .suffix(".json.tmp")
        .tempfile_in(dir)
        .map_err(|e| ConvertError::io(dir, e))?;

    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let serialized = if pretty {
            serde_json::to_writer_pretty(&mut writer, value)
        } else {
            serde_json::to_writer(&mut writer, value)
        };
        serialized.map_err(|source| ConvertError::Serialize {
            path: path.to_path_buf(),
            source,
        })?;
        writer
            .write_all(b"\n")
            .and_then(|_| writer.flush())
            .map_err(|e| ConvertError::io(path, e))?;
    }

    tmp.persist(path)
        .map_err(|e| ConvertError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_csv_rows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("leaf.csv");
        fs::write(
            &path,
            "#item,x,y,width,height,label\n0,10,20,30,40,1\n1, 5, 6, 7, 8, 2\n2,a,1,1,1,1\n\n",
        )
        .unwrap();

        let rows = parse_csv_rows(&path).unwrap();
        assert_eq!(rows.len(), 3);

        let (line, first) = rows[0].as_ref().unwrap();
        assert_eq!(*line, 2);
        assert_eq!(first.bbox(), [10, 20, 30, 40]);
        assert_eq!(first.area(), 1200);
        assert_eq!(first.label_id, 1);
        assert_eq!(first.item_index, Some(0));

        assert_eq!(rows[1].as_ref().unwrap().1.label_id, 2);
        assert!(matches!(
            rows[2],
            Err(ConvertError::MalformedRow { line: 4, .. })
        ));
    }

    #[test]
    fn test_parse_csv_without_item_column() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("leaf.csv");
        fs::write(&path, "x,y,width,height,label\n1,2,3,4,5\n").unwrap();

        let rows = parse_csv_rows(&path).unwrap();
        let (_, row) = rows[0].as_ref().unwrap();
        assert_eq!(row.item_index, None);
        assert_eq!(row.label_id, 5);
    }

    #[test]
    fn test_read_split_list() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = split_file(temp_dir.path(), "train");
        assert_eq!(read_split_list(&path).unwrap(), None);

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "a\n  b  \n\n\tc\n").unwrap();
        assert_eq!(
            read_split_list(&path).unwrap(),
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_scan_category() {
        let temp_dir = tempfile::tempdir().unwrap();
        let category = temp_dir.path().join("strawberries");
        let sub = category.join("leaf_spot");
        fs::create_dir_all(sub.join("images")).unwrap();
        fs::create_dir_all(sub.join("csv")).unwrap();
        fs::create_dir_all(category.join("sets")).unwrap();
        fs::write(sub.join("images/b.JPG"), b"").unwrap();
        fs::write(sub.join("images/a.png"), b"").unwrap();
        fs::write(sub.join("images/a.jpg"), b"").unwrap();
        fs::write(sub.join("images/notes.txt"), b"").unwrap();
        fs::write(sub.join("csv/a.csv"), b"").unwrap();
        fs::write(sub.join("csv/orphan.csv"), b"").unwrap();

        let scan = scan_category(&category, "strawberries").unwrap();
        assert_eq!(scan.subcategories.len(), 1);

        let images = &scan.subcategories[0].images;
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].stem, "a");
        assert_eq!(images[0].file_name, "strawberries/leaf_spot/images/a.jpg");
        assert!(images[0].csv_path.is_some());
        assert_eq!(images[1].stem, "b");
        assert!(images[1].csv_path.is_none());
        assert_eq!(scan.orphan_csv_files, vec![sub.join("csv/orphan.csv")]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_scan_skips_non_utf8_subcategory() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = tempfile::tempdir().unwrap();
        let category = temp_dir.path().join("strawberries");
        let bad = category.join(OsStr::from_bytes(b"leaf_\xffspot"));
        fs::create_dir_all(bad.join("images")).unwrap();
        fs::create_dir_all(category.join("healthy/images")).unwrap();

        let scan = scan_category(&category, "strawberries").unwrap();
        let names: Vec<&str> = scan.subcategories.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["healthy"]);
    }

    #[test]
    fn test_write_json_atomic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("out.json");
        write_json_atomic(&path, &vec![1, 2, 3], false).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[1,2,3]\n");

        let leftovers = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
