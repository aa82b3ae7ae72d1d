//! Value normalization shared by the XBRL mapper and the HTML parser.
//!
//! Reported numbers arrive with thousand separators (ASCII and full-width),
//! percent signs, currency suffixes and CJK date formats. Everything
//! monetary is arbitrary-precision decimal; binary floating point never
//! touches these values.

use std::str::FromStr;

use bigdecimal::rounding::RoundingMode;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

/// Parse a numeric cell or fact value into a decimal.
///
/// Strips separators and a trailing currency marker; dashes and empty cells
/// come back as `None`.
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '，' | ' ' | '\u{3000}'))
        .collect();
    let cleaned = cleaned.trim_end_matches('元').trim();
    if cleaned.is_empty() || cleaned == "-" || cleaned == "--" || cleaned == "—" {
        return None;
    }
    BigDecimal::from_str(cleaned).ok()
}

/// Parse a net-value ratio into `[0, 1]`.
///
/// Reports are split on representation: tagged facts are usually plain
/// decimals, HTML cells almost always percentages. An explicit percent sign
/// or a magnitude above 1 marks the percent shape; the boolean reports
/// whether rescaling happened so callers can record a warning.
pub fn parse_ratio(raw: &str) -> Option<(BigDecimal, bool)> {
    let trimmed = raw.trim();
    let had_percent = trimmed.ends_with('%') || trimmed.ends_with('％');
    let bare = trimmed.trim_end_matches(['%', '％']);
    let value = parse_decimal(bare)?;
    if had_percent || value > BigDecimal::from(1) {
        Some((value / BigDecimal::from(100), true))
    } else {
        Some((value, false))
    }
}

/// Honor the XBRL `decimals` attribute by rounding the value to the stated
/// power of ten (`decimals="-2"` rounds to hundreds).
pub fn apply_decimals(value: BigDecimal, decimals: Option<i32>) -> BigDecimal {
    match decimals {
        Some(d) => value.with_scale_round(i64::from(d), RoundingMode::HalfUp),
        None => value,
    }
}

/// Parse a share count, tolerating decimal formatting of integral values.
pub fn parse_shares(raw: &str) -> Option<i64> {
    use bigdecimal::ToPrimitive;
    parse_decimal(raw)?
        .with_scale_round(0, RoundingMode::HalfUp)
        .to_i64()
}

/// Parse a holding rank.
pub fn parse_rank(raw: &str) -> Option<i32> {
    raw.trim().parse::<i32>().ok()
}

/// Parse a reported date in ISO or CJK form.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in ["%Y-%m-%d", "%Y年%m月%d日", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    // Timestamps like "2024-12-31 00:00:00" degrade to their date part.
    let head: String = trimmed.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, "%Y-%m-%d").ok()
}
