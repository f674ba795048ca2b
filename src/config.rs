use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Split names that are included by default when no split list exists.
pub const STANDARD_SPLITS: &[&str] = &["train", "val", "test"];

pub const DEFAULT_CATEGORY: &str = "strawberries";
pub const DEFAULT_URL: &str = "https://www.kaggle.com/datasets/abdallahalidev/plantvillage-dataset";
pub const DEFAULT_YEAR: u32 = 2015;
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Command-line arguments for converting CSV box annotations to COCO JSON.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Dataset root directory containing one directory per category
    #[arg(long = "root")]
    pub root: PathBuf,

    /// Output directory for COCO JSON files (default: <root>/annotations)
    #[arg(long = "out")]
    pub out: Option<PathBuf>,

    /// Dataset splits to generate
    #[arg(long = "splits", num_args = 1.., default_values_t = STANDARD_SPLITS.iter().map(|s| s.to_string()).collect::<Vec<_>>())]
    pub splits: Vec<String>,

    /// Category directories to convert
    #[arg(long = "category", default_values_t = vec![DEFAULT_CATEGORY.to_string()])]
    pub categories: Vec<String>,

    /// What to do when a CSV row or image fails an integrity check
    #[arg(long = "on-data-error", value_enum, default_value = "skip-row")]
    pub on_data_error: IntegrityPolicy,

    /// What to do with an image that has no CSV annotation file
    #[arg(long = "missing-csv", value_enum, default_value = "keep-image")]
    pub missing_csv: MissingCsvPolicy,

    /// Emit every labelmap class in `categories`, not only the ones used
    #[arg(long = "all-categories")]
    pub all_categories: bool,

    /// Description for the info block; `{category}` and `{split}` are substituted
    #[arg(long = "description", default_value = "PlantVillage {category} {split} split")]
    pub description: String,

    /// URL for the info block
    #[arg(long = "url", default_value = DEFAULT_URL)]
    pub url: String,

    /// Year for the info block
    #[arg(long = "year", default_value_t = DEFAULT_YEAR)]
    pub year: u32,

    /// Dataset version for the info block
    #[arg(long = "version-tag", default_value = DEFAULT_VERSION)]
    pub version_tag: String,

    /// Date for the info block (YYYY-MM-DD, default: today in UTC)
    #[arg(long = "date-created")]
    pub date_created: Option<String>,

    /// Write compact JSON instead of indented JSON
    #[arg(long = "compact")]
    pub compact: bool,

    /// Hide progress bars
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,
}

/// Propagation policy for data-integrity errors.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum IntegrityPolicy {
    /// Report the error, drop the offending row (or image) and continue
    #[default]
    SkipRow,
    /// Report the error and write no document for the affected split
    AbortSplit,
    /// Stop the whole run on the first error
    AbortRun,
}

/// Handling of images that have no matching CSV file.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum MissingCsvPolicy {
    /// Emit the image entry with zero annotations
    #[default]
    KeepImage,
    /// Leave the image out of the document
    SkipImage,
}

/// Fields of the COCO `info` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoTemplate {
    pub description: String,
    pub url: String,
    pub year: u32,
    pub version: String,
    pub date_created: String,
}

impl InfoTemplate {
    pub fn description_for(&self, category: &str, split: &str) -> String {
        self.description
            .replace("{category}", category)
            .replace("{split}", split)
    }
}

impl Default for InfoTemplate {
    fn default() -> Self {
        Self {
            description: "PlantVillage {category} {split} split".to_string(),
            url: DEFAULT_URL.to_string(),
            year: DEFAULT_YEAR,
            version: DEFAULT_VERSION.to_string(),
            date_created: chrono::Utc::now().date_naive().to_string(),
        }
    }
}

/// Validated, immutable settings for one conversion run.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub root: PathBuf,
    pub out: PathBuf,
    pub splits: Vec<String>,
    pub categories: Vec<String>,
    pub on_data_error: IntegrityPolicy,
    pub missing_csv: MissingCsvPolicy,
    pub all_categories: bool,
    pub info: InfoTemplate,
    pub pretty: bool,
    pub show_progress: bool,
}

impl ConvertConfig {
    /// Configuration with default policies for the given root; output goes to `<root>/annotations`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            out: root.join("annotations"),
            root,
            splits: STANDARD_SPLITS.iter().map(|s| s.to_string()).collect(),
            categories: vec![DEFAULT_CATEGORY.to_string()],
            on_data_error: IntegrityPolicy::default(),
            missing_csv: MissingCsvPolicy::default(),
            all_categories: false,
            info: InfoTemplate::default(),
            pretty: true,
            show_progress: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.splits.is_empty() {
            return Err("at least one split is required".to_string());
        }
        if self.categories.is_empty() {
            return Err("at least one category is required".to_string());
        }
        for name in self.splits.iter().chain(self.categories.iter()) {
            validate_name(name)?;
        }
        Ok(())
    }
}

impl Args {
    pub fn to_convert_config(&self) -> Result<ConvertConfig, String> {
        let date_created = match &self.date_created {
            Some(date) => chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .map_err(|e| format!("invalid --date-created '{}': {}", date, e))?
                .to_string(),
            None => chrono::Utc::now().date_naive().to_string(),
        };

        let config = ConvertConfig {
            root: self.root.clone(),
            out: self
                .out
                .clone()
                .unwrap_or_else(|| self.root.join("annotations")),
            // Repeated names would convert twice and overwrite the same output file.
            splits: dedup_names(&self.splits),
            categories: dedup_names(&self.categories),
            on_data_error: self.on_data_error,
            missing_csv: self.missing_csv,
            all_categories: self.all_categories,
            info: InfoTemplate {
                description: self.description.clone(),
                url: self.url.clone(),
                year: self.year,
                version: self.version_tag.clone(),
                date_created,
            },
            pretty: !self.compact,
            show_progress: !self.quiet,
        };
        config.validate()?;
        Ok(config)
    }
}

fn dedup_names(names: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(name) {
            unique.push(name.clone());
        }
    }
    unique
}

// Split and category names become file name components.
fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("names must not be empty".to_string());
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(format!("'{}' is not a valid split or category name", name));
    }
    Ok(())
}
