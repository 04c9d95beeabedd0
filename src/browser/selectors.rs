//! Marketplace locations, visible labels and the XPath queries built from them.
//!
//! Labels are matched against the French UI; a wording change on the
//! marketplace breaks the matching lookups.

use crate::browser::driver::{Role, Target};

pub const HOME_URL: &str = "https://www.leboncoin.fr";
pub const DEPOSIT_URL: &str = "https://www.leboncoin.fr/deposer-une-annonce";
pub const MARKETPLACE_DOMAIN: &str = "leboncoin.fr";

pub const LOGIN_LABEL: &str = "Se connecter";
pub const CATEGORY_CHOOSER_LABEL: &str = "Catégorie";
pub const TITLE_LABEL: &str = "Titre";
pub const DESCRIPTION_LABEL: &str = "Description";
pub const PRICE_LABEL: &str = "Prix";
/// Tried in order; the flow variant decides which one is shown.
pub const SUBMIT_LABELS: [&str; 2] = ["Valider", "Publier"];

pub const TYPING_CHUNK_CHARS: usize = 40;
pub const VIEWPORT: (u32, u32) = (1366, 768);
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
pub const LOCALE: &str = "fr-FR";
pub const TIMEZONE: &str = "Europe/Paris";

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZÀÂÄÇÉÈÊËÎÏÔÖÙÛÜŸ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyzàâäçéèêëîïôöùûüÿ";

/// True when the URL's host is the marketplace domain or one of its subdomains.
pub fn is_marketplace_url(url: &str) -> bool {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    host == MARKETPLACE_DOMAIN || host.ends_with(&format!(".{MARKETPLACE_DOMAIN}"))
}

/// Quotes a string as an XPath 1.0 literal.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

fn lowered(expr: &str) -> String {
    format!("translate({expr}, '{UPPER}', '{LOWER}')")
}

/// Folds case with the same table `translate()` applies on the page side.
fn fold_case(value: &str) -> String {
    value
        .chars()
        .map(|ch| match UPPER.chars().position(|upper| upper == ch) {
            Some(idx) => LOWER.chars().nth(idx).unwrap_or(ch),
            None => ch,
        })
        .collect()
}

fn contains_ci(expr: &str, needle: &str) -> String {
    format!(
        "contains({}, {})",
        lowered(expr),
        xpath_literal(&fold_case(needle.trim()))
    )
}

pub fn xpath_for(target: &Target) -> String {
    match target {
        Target::Role {
            role: Role::Link,
            name,
        } => format!(
            "//*[self::a or @role='link'][{} or {}]",
            contains_ci("normalize-space(.)", name),
            contains_ci("@aria-label", name)
        ),
        Target::Role {
            role: Role::Button,
            name,
        } => format!(
            "//*[self::button or @role='button' or (self::input and (@type='submit' or @type='button'))][{} or {} or {}]",
            contains_ci("normalize-space(.)", name),
            contains_ci("@aria-label", name),
            contains_ci("@value", name)
        ),
        Target::Text(text) => format!(
            "//*[not(self::script) and not(self::style)][text()[{}]]",
            contains_ci("normalize-space(.)", text)
        ),
        Target::Label(label) => {
            let label_match = contains_ci("normalize-space(.)", label);
            format!(
                "//*[self::input or self::textarea or self::select][not(@type='file') and not(@type='hidden')][@id = //label[{label_match}]/@for or ancestor::label[{label_match}] or {} or {}]",
                contains_ci("@aria-label", label),
                contains_ci("@placeholder", label)
            )
        }
        Target::FileInput => "//input[@type='file']".to_string(),
    }
}
