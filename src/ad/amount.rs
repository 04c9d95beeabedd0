/// Parses a French-formatted euro cell into whole euros.
///
/// `"1 500,50 €"` yields `1500`: the fraction is truncated, never rounded.
/// Blank, dash and unparseable cells yield `None`, which callers must keep
/// distinct from a zero price.
pub fn parse_amount(value: &str) -> Option<u64> {
    let compact: String = value
        .trim()
        .chars()
        .filter(|ch| !matches!(ch, '€' | ' ' | '\u{a0}' | '\u{202f}'))
        .collect();
    if matches!(compact.as_str(), "" | "-" | "–") {
        return None;
    }

    let kept: String = compact
        .chars()
        .filter(|ch| ch.is_ascii_digit() || matches!(ch, ',' | '.'))
        .collect();
    if kept.is_empty() {
        return None;
    }

    let amount: f64 = kept.replace(',', ".").parse().ok()?;
    if !amount.is_finite() {
        return None;
    }
    Some(amount.trunc() as u64)
}
