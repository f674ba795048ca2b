//! COCO format data structures and utilities
//!
//! This module holds the COCO document model written by the converter and the
//! [`CocoWriter`] that hands out sequential image and annotation ids.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::config::InfoTemplate;

/// COCO dataset information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub year: u32,
    pub version: String,
    pub description: String,
    pub url: String,
    pub date_created: String,
}

impl Info {
    pub fn from_template(template: &InfoTemplate, category: &str, split: &str) -> Self {
        Self {
            year: template.year,
            version: template.version.clone(),
            description: template.description_for(category, split),
            url: template.url.clone(),
            date_created: template.date_created.clone(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    pub url: String,
}

/// COCO category information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

/// COCO image information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub id: u32,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

/// COCO annotation information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    pub image_id: u32,
    pub category_id: u32,
    pub bbox: [u32; 4], // [x, y, width, height]
    pub area: u64,
    pub iscrowd: u8,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CocoFile {
    pub info: Info,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
    #[serde(default)]
    pub licenses: Vec<License>,
}

impl CocoFile {
    /// Check the document's internal consistency: unique ids starting at 1,
    /// resolvable image and category references, and `area == w * h`.
    pub fn validate(&self) -> Result<(), String> {
        let image_ids = unique_ids(self.images.iter().map(|i| i.id), "image")?;
        unique_ids(self.annotations.iter().map(|a| a.id), "annotation")?;
        let category_ids = unique_ids(self.categories.iter().map(|c| c.id), "category")?;

        for ann in &self.annotations {
            if !image_ids.contains(&ann.image_id) {
                return Err(format!(
                    "annotation {} references missing image {}",
                    ann.id, ann.image_id
                ));
            }
            if !category_ids.contains(&ann.category_id) {
                return Err(format!(
                    "annotation {} references missing category {}",
                    ann.id, ann.category_id
                ));
            }
            let [_, _, w, h] = ann.bbox;
            if ann.area != u64::from(w) * u64::from(h) {
                return Err(format!(
                    "annotation {} has area {} for a {}x{} box",
                    ann.id, ann.area, w, h
                ));
            }
        }
        Ok(())
    }
}

fn unique_ids(ids: impl Iterator<Item = u32>, what: &str) -> Result<HashSet<u32>, String> {
    let mut seen = HashSet::new();
    for id in ids {
        if id == 0 {
            return Err(format!("{} id 0 is not allowed", what));
        }
        if !seen.insert(id) {
            return Err(format!("duplicate {} id {}", what, id));
        }
    }
    Ok(seen)
}

/// Builder for one COCO document. Ids are assigned in call order starting at 1.
#[derive(Debug)]
pub struct CocoWriter {
    supercategory: String,
    next_image_id: u32,
    next_annotation_id: u32,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
    categories: BTreeMap<u32, String>,
}

impl CocoWriter {
    pub fn new(supercategory: impl Into<String>) -> Self {
        Self {
            supercategory: supercategory.into(),
            next_image_id: 1,
            next_annotation_id: 1,
            images: Vec::new(),
            annotations: Vec::new(),
            categories: BTreeMap::new(),
        }
    }

    /// Register a category; re-adding an id keeps the first name.
    pub fn add_category(&mut self, id: u32, name: &str) {
        self.categories.entry(id).or_insert_with(|| name.to_string());
    }

    /// Add an image and return its id
    pub fn add_image(&mut self, file_name: String, width: u32, height: u32) -> u32 {
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.images.push(Image {
            id: image_id,
            file_name,
            width,
            height,
        });
        image_id
    }

    /// Add a box annotation for an already added image and return its id
    pub fn add_annotation(&mut self, image_id: u32, category_id: u32, bbox: [u32; 4]) -> u32 {
        let annotation_id = self.next_annotation_id;
        self.next_annotation_id += 1;
        let [_, _, width, height] = bbox;
        self.annotations.push(Annotation {
            id: annotation_id,
            image_id,
            category_id,
            bbox,
            area: u64::from(width) * u64::from(height),
            iscrowd: 0,
        });
        annotation_id
    }

    /// Build the complete COCO dataset structure
    pub fn build(self, info: Info) -> CocoFile {
        let supercategory = self.supercategory;
        CocoFile {
            info,
            images: self.images,
            annotations: self.annotations,
            categories: self
                .categories
                .into_iter()
                .map(|(id, name)| Category {
                    id,
                    name,
                    supercategory: supercategory.clone(),
                })
                .collect(),
            licenses: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> Info {
        Info::from_template(&InfoTemplate::default(), "strawberries", "train")
    }

    #[test]
    fn test_writer_assigns_sequential_ids() {
        let mut writer = CocoWriter::new("strawberrie");
        writer.add_category(2, "leaf_spot");
        writer.add_category(1, "angular_leafspot");
        writer.add_category(2, "ignored");

        let first = writer.add_image("a.jpg".to_string(), 100, 80);
        let second = writer.add_image("b.jpg".to_string(), 100, 80);
        assert_eq!((first, second), (1, 2));

        assert_eq!(writer.add_annotation(first, 1, [0, 0, 10, 5]), 1);
        assert_eq!(writer.add_annotation(second, 2, [1, 1, 3, 3]), 2);

        let coco = writer.build(info());
        assert_eq!(coco.annotations[0].area, 50);
        assert_eq!(coco.annotations[1].image_id, 2);
        assert_eq!(
            coco.categories
                .iter()
                .map(|c| (c.id, c.name.as_str()))
                .collect::<Vec<_>>(),
            vec![(1, "angular_leafspot"), (2, "leaf_spot")]
        );
        assert!(coco.categories.iter().all(|c| c.supercategory == "strawberrie"));
        assert!(coco.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_dangling_references() {
        let mut writer = CocoWriter::new("x");
        writer.add_category(1, "a");
        let image_id = writer.add_image("a.jpg".to_string(), 10, 10);
        writer.add_annotation(image_id, 1, [0, 0, 2, 2]);
        let mut coco = writer.build(info());

        coco.annotations[0].image_id = 9;
        assert!(coco.validate().unwrap_err().contains("missing image"));

        coco.annotations[0].image_id = 1;
        coco.annotations[0].category_id = 4;
        assert!(coco.validate().unwrap_err().contains("missing category"));

        coco.annotations[0].category_id = 1;
        coco.annotations[0].area = 5;
        assert!(coco.validate().is_err());
    }

    #[test]
    fn test_serialized_field_order() {
        let coco = CocoWriter::new("x").build(info());
        let json = serde_json::to_string(&coco).unwrap();
        let info_pos = json.find("\"info\"").unwrap();
        let images_pos = json.find("\"images\"").unwrap();
        let categories_pos = json.find("\"categories\"").unwrap();
        assert!(info_pos < images_pos && images_pos < categories_pos);
        assert!(json.ends_with("\"licenses\":[]}"));
    }
}
