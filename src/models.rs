use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// Header text of every tracked spreadsheet column.
pub mod columns {
    pub const TITLE_OVERRIDE: &str = "Annonce LBC";
    pub const LISTING_URL: &str = "Lien de l'annonce";
    pub const PHOTOS: &str = "Photos";
    pub const PHOTO_FOLDER: &str = "Dossier photos";
    pub const CATEGORY: &str = "Catégorie";
    pub const PART: &str = "Pièces";
    pub const OBJECT: &str = "Objet";
    pub const BRAND: &str = "Marques";
    pub const MODEL: &str = "Modèle";
    pub const QUANTITY: &str = "Quantité";
    pub const CONDITION: &str = "État";
    pub const NEW_UNIT_PRICE: &str = "Prix neuf à l'unité";
    pub const NEW_TOTAL_PRICE: &str = "Prix total";
    // The live sheet carries a double space in this header.
    pub const ASKING_UNIT_PRICE: &str = "Prix  demandé à l'unité";
    pub const ASKING_TOTAL_PRICE: &str = "Prix total demandé";
    pub const STATUS: &str = "Status";
    pub const PUBLISH_FLAG: &str = "A publier";

    pub const TRACKED: [&str; 17] = [
        TITLE_OVERRIDE,
        LISTING_URL,
        PHOTOS,
        PHOTO_FOLDER,
        CATEGORY,
        PART,
        OBJECT,
        BRAND,
        MODEL,
        QUANTITY,
        CONDITION,
        NEW_UNIT_PRICE,
        NEW_TOTAL_PRICE,
        ASKING_UNIT_PRICE,
        ASKING_TOTAL_PRICE,
        STATUS,
        PUBLISH_FLAG,
    ];
}

pub const STATUS_PUBLISHED: &str = "PUBLISHED";
pub const MAX_TITLE_CHARS: usize = 70;
pub const MAX_IMAGES: usize = 10;
const MAX_STATUS_CHARS: usize = 200;

/// One spreadsheet record, snapshotted once per run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Row {
    /// 1-based position in the sheet (the header is row 1).
    pub row_index: u32,
    pub title_override: String,
    pub listing_url: String,
    pub photos: String,
    pub photo_folder: String,
    pub category: String,
    pub part: String,
    pub object: String,
    pub brand: String,
    pub model: String,
    pub quantity: String,
    pub condition: String,
    pub new_unit_price: String,
    pub new_total_price: String,
    pub asking_unit_price: String,
    pub asking_total_price: String,
    pub status: String,
    pub publish_flag: String,
}

impl Row {
    /// Builds a row from a header-name cell lookup. Absent cells read as empty.
    pub fn from_cells<'a>(row_index: u32, cell: impl Fn(&str) -> Option<&'a str>) -> Self {
        let text = |name: &str| cell(name).unwrap_or_default().to_string();
        Self {
            row_index,
            title_override: text(columns::TITLE_OVERRIDE),
            listing_url: text(columns::LISTING_URL),
            photos: text(columns::PHOTOS),
            photo_folder: text(columns::PHOTO_FOLDER),
            category: text(columns::CATEGORY),
            part: text(columns::PART),
            object: text(columns::OBJECT),
            brand: text(columns::BRAND),
            model: text(columns::MODEL),
            quantity: text(columns::QUANTITY),
            condition: text(columns::CONDITION),
            new_unit_price: text(columns::NEW_UNIT_PRICE),
            new_total_price: text(columns::NEW_TOTAL_PRICE),
            asking_unit_price: text(columns::ASKING_UNIT_PRICE),
            asking_total_price: text(columns::ASKING_TOTAL_PRICE),
            status: text(columns::STATUS),
            publish_flag: text(columns::PUBLISH_FLAG),
        }
    }
}

/// The immutable bundle submitted to the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdPayload {
    title: String,
    description: String,
    price_eur: u64,
    category_label: String,
    images: Vec<PathBuf>,
}

impl AdPayload {
    /// Clamps the title to the marketplace limit and keeps at most [`MAX_IMAGES`] images.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        price_eur: u64,
        category_label: impl Into<String>,
        mut images: Vec<PathBuf>,
    ) -> Self {
        images.truncate(MAX_IMAGES);
        Self {
            title: truncate_chars(&title.into(), MAX_TITLE_CHARS),
            description: description.into(),
            price_eur,
            category_label: category_label.into(),
            images,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn price_eur(&self) -> u64 {
        self.price_eur
    }

    pub fn category_label(&self) -> &str {
        &self.category_label
    }

    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }
}

/// Result of one row's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Published { url: String },
    Failed { error: String },
}

impl RunOutcome {
    /// Header-named cell values written back for this outcome.
    pub fn cell_updates(&self) -> Vec<(&'static str, String)> {
        match self {
            RunOutcome::Published { url } => vec![
                (columns::LISTING_URL, url.clone()),
                (columns::STATUS, STATUS_PUBLISHED.to_string()),
            ],
            RunOutcome::Failed { error } => vec![(
                columns::STATUS,
                truncate_chars(&format!("ERROR: {error}"), MAX_STATUS_CHARS),
            )],
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, RunOutcome::Published { .. })
    }
}

/// Timing and output of one pipeline stage for one row.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_clamps_title_and_images() {
        let images = (0..14).map(|i| PathBuf::from(format!("{i:02}.jpg"))).collect();
        let payload = AdPayload::new("T".repeat(90), "desc", 10, "Meubles", images);
        assert_eq!(payload.title().chars().count(), MAX_TITLE_CHARS);
        assert_eq!(payload.images().len(), MAX_IMAGES);
        assert_eq!(payload.images()[0], PathBuf::from("00.jpg"));
    }

    #[test]
    fn failed_outcome_writes_truncated_status_only() {
        let outcome = RunOutcome::Failed {
            error: "é".repeat(500),
        };
        let updates = outcome.cell_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, columns::STATUS);
        assert!(updates[0].1.starts_with("ERROR: "));
        assert_eq!(updates[0].1.chars().count(), 200);
    }

    #[test]
    fn published_outcome_writes_link_and_marker() {
        let outcome = RunOutcome::Published {
            url: "https://www.leboncoin.fr/ad/123".into(),
        };
        let updates = outcome.cell_updates();
        assert_eq!(
            updates,
            vec![
                (columns::LISTING_URL, "https://www.leboncoin.fr/ad/123".to_string()),
                (columns::STATUS, "PUBLISHED".to_string()),
            ]
        );
    }

    #[test]
    fn row_from_cells_defaults_missing_columns() {
        let row = Row::from_cells(4, |name| match name {
            columns::OBJECT => Some("Chaise"),
            columns::ASKING_UNIT_PRICE => Some("12,00 €"),
            _ => None,
        });
        assert_eq!(row.row_index, 4);
        assert_eq!(row.object, "Chaise");
        assert_eq!(row.asking_unit_price, "12,00 €");
        assert!(row.brand.is_empty());
    }
}
