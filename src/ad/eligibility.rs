use crate::models::Row;

const AFFIRMATIVE_TOKENS: [&str; 5] = ["oui", "true", "1", "x", "yes"];
const AVAILABLE_STATUS: &str = "en vente";

/// A row is a publish candidate when it is flagged for publication, still
/// available, and has no listing link yet.
pub fn should_publish(row: &Row) -> bool {
    let flag = row.publish_flag.trim().to_lowercase();
    let status = row.status.trim().to_lowercase();

    let flagged = AFFIRMATIVE_TOKENS.contains(&flag.as_str());
    let available = status.is_empty() || status == AVAILABLE_STATUS;
    let unlisted = row.listing_url.trim().is_empty();

    flagged && available && unlisted
}
