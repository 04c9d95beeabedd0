use serde::Deserialize;
use std::{collections::HashMap, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CategoryMapError {
    #[error("cannot read category map `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid category map: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct CategoryFile {
    #[serde(default)]
    categories: Vec<CategoryEntry>,
}

#[derive(Debug, Deserialize)]
struct CategoryEntry {
    sheet: String,
    marketplace: String,
}

/// Maps spreadsheet category labels onto the marketplace option text.
/// Unmapped labels pass through unchanged.
#[derive(Debug, Clone, Default)]
pub struct CategoryMap {
    entries: HashMap<String, String>,
}

impl CategoryMap {
    pub fn from_yaml_str(raw: &str) -> Result<Self, CategoryMapError> {
        let file: CategoryFile =
            serde_yaml::from_str(raw).map_err(|err| CategoryMapError::Parse(err.to_string()))?;
        let entries = file
            .categories
            .into_iter()
            .filter(|entry| !entry.marketplace.trim().is_empty())
            .map(|entry| (normalize(&entry.sheet), entry.marketplace.trim().to_string()))
            .collect();
        Ok(Self { entries })
    }

    pub fn from_file(path: &Path) -> Result<Self, CategoryMapError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CategoryMapError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn resolve<'a>(&'a self, sheet_label: &'a str) -> &'a str {
        self.entries
            .get(&normalize(sheet_label))
            .map(String::as_str)
            .unwrap_or_else(|| sheet_label.trim())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
