use crate::ad::amount::parse_amount;
use crate::models::{MAX_TITLE_CHARS, Row, truncate_chars};

const PLACEHOLDER_TITLE: &str = "Annonce";

pub fn build_title(row: &Row) -> String {
    let override_title = row.title_override.trim();
    if !override_title.is_empty() {
        return override_title.to_string();
    }

    let joined = [&row.object, &row.brand, &row.model]
        .into_iter()
        .filter_map(|part| meaningful(part))
        .collect::<Vec<_>>()
        .join(" - ");
    let title = truncate_chars(&joined, MAX_TITLE_CHARS);
    if title.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        title
    }
}

pub fn build_description(row: &Row) -> String {
    let text_fields = [
        ("Objet", &row.object),
        ("Marque", &row.brand),
        ("Modèle", &row.model),
        ("État", &row.condition),
        ("Quantité", &row.quantity),
        ("Pièce", &row.part),
        ("Catégorie (source)", &row.category),
    ];
    let price_fields = [
        ("Prix neuf (unité)", &row.new_unit_price),
        ("Prix neuf (total)", &row.new_total_price),
        ("Prix demandé (unité)", &row.asking_unit_price),
        ("Prix demandé (total)", &row.asking_total_price),
    ];

    let mut lines = Vec::new();
    for (label, value) in text_fields {
        if let Some(value) = meaningful(value) {
            lines.push(format!("{label}: {value}"));
        }
    }
    for (label, value) in price_fields {
        if let Some(amount) = parse_amount(value) {
            lines.push(format!("{label}: {amount} €"));
        }
    }
    lines.join("\n")
}

/// Trimmed cell text, unless blank or a bare dash placeholder.
fn meaningful(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() || matches!(trimmed, "-" | "—" | "–") {
        None
    } else {
        Some(trimmed)
    }
}
