//! Per-category label maps.
//!
//! A category's `labelmap.json` is an array of [`LabelEntry`] objects. Entries
//! named `background` describe the unannotated class and are never emitted as
//! COCO categories.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{ConvertError, Result};
use crate::types::LabelEntry;

pub const LABELMAP_FILE: &str = "labelmap.json";
const BACKGROUND: &str = "background";

/// Read-only mapping from `label_id` to class name for one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    path: PathBuf,
    names: BTreeMap<u32, String>,
}

impl LabelMap {
    /// Load `{category_dir}/labelmap.json`, rejecting duplicate label ids.
    pub fn load(category_dir: &Path) -> Result<Self> {
        let path = category_dir.join(LABELMAP_FILE);
        if !path.is_file() {
            return Err(ConvertError::MissingLabelMap(path));
        }
        let file = File::open(&path).map_err(|e| ConvertError::io(&path, e))?;
        let entries: Vec<LabelEntry> = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConvertError::MalformedLabelMap {
                path: path.clone(),
                source,
            })?;
        Self::from_entries(path, entries)
    }

    pub fn from_entries(path: PathBuf, entries: Vec<LabelEntry>) -> Result<Self> {
        let mut names = BTreeMap::new();
        let mut seen = std::collections::HashSet::new();
        for entry in entries {
            if !seen.insert(entry.label_id) {
                return Err(ConvertError::DuplicateLabelId {
                    path,
                    label_id: entry.label_id,
                });
            }
            if entry.object_name != BACKGROUND {
                names.insert(entry.label_id, entry.object_name);
            }
        }
        Ok(Self { path, names })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self, label_id: u32) -> Option<&str> {
        self.names.get(&label_id).map(String::as_str)
    }

    pub fn contains(&self, label_id: u32) -> bool {
        self.names.contains_key(&label_id)
    }

    /// All classes, ordered by label id.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.names.iter().map(|(&id, name)| (id, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(label_id: u32, name: &str) -> LabelEntry {
        LabelEntry {
            object_id: Some(label_id),
            label_id,
            keyboard_shortcut: None,
            object_name: name.to_string(),
        }
    }

    #[test]
    fn test_load_skips_background() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join(LABELMAP_FILE),
            r#"[
                {"object_id": 0, "label_id": 0, "keyboard_shortcut": "0", "object_name": "background"},
                {"object_id": 1, "label_id": 1, "keyboard_shortcut": "1", "object_name": "angular_leafspot"},
                {"object_id": 2, "label_id": 2, "keyboard_shortcut": "2", "object_name": "leaf_spot"}
            ]"#,
        )
        .unwrap();

        let labelmap = LabelMap::load(temp_dir.path()).unwrap();
        assert_eq!(labelmap.len(), 2);
        assert_eq!(labelmap.name(1), Some("angular_leafspot"));
        assert!(!labelmap.contains(0));
        assert_eq!(
            labelmap.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_duplicate_label_id() {
        let result = LabelMap::from_entries(
            PathBuf::from("labelmap.json"),
            vec![entry(1, "a"), entry(1, "b")],
        );
        assert!(matches!(
            result,
            Err(ConvertError::DuplicateLabelId { label_id: 1, .. })
        ));
    }

    #[test]
    fn test_missing_and_malformed() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LabelMap::load(temp_dir.path()),
            Err(ConvertError::MissingLabelMap(_))
        ));

        fs::write(temp_dir.path().join(LABELMAP_FILE), "{not json").unwrap();
        assert!(matches!(
            LabelMap::load(temp_dir.path()),
            Err(ConvertError::MalformedLabelMap { .. })
        ));
    }
}
