//! Field-level parsing for messy categorical, temporal and numeric cells.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{BarrioId, MAX_VALID_YEAR, MIN_VALID_YEAR};

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// `2021M03`, `2021T2`, `2021Q2`, `2021S1`
static PERIOD_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(\d{4})\s*([MTQS])\s*(\d{1,2})$").unwrap());

static YEAR_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(?:\.0+)?$").unwrap());

/// Cell values that stand for "no data" in the published extracts
const MISSING_MARKERS: [&str; 6] = ["..", "...", "-", "n/a", "na", "nd"];

/// Temporal encodings used by the sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalFormat {
    /// `2021`
    Year,
    /// INE style `2021M03`, `2021T2`, `2021Q2`, `2021S1`
    PeriodCode,
    /// `2021-03-15` or `2021-03-15T10:00:00`
    IsoDate,
    /// `15/03/2021`
    EuropeanDate,
    /// Try every format above in order
    Auto,
}

/// Canonical lower bound of a household-size bucket: `"> 4"` -> 4,
/// `"2-3"` -> 2, `"1"` -> 1. Labels without digits yield `None`.
pub fn parse_household_size(label: &str) -> Option<u32> {
    DIGITS.find(label).and_then(|m| m.as_str().parse().ok())
}

/// Four-digit year from a temporal code, `None` when it cannot be derived or
/// falls outside the valid range
pub fn derive_year(code: &str, format: TemporalFormat) -> Option<i32> {
    parse_temporal(code, format)
        .map(|(year, _)| year)
        .filter(|year| (MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(year))
}

/// Month carried by a temporal code, if any. Quarter, semester and plain
/// year codes carry no month.
pub fn derive_month(code: &str, format: TemporalFormat) -> Option<u32> {
    parse_temporal(code, format).and_then(|(_, month)| month)
}

fn parse_temporal(code: &str, format: TemporalFormat) -> Option<(i32, Option<u32>)> {
    let code = code.trim();
    if code.is_empty() {
        return None;
    }
    match format {
        TemporalFormat::Year => parse_year(code),
        TemporalFormat::PeriodCode => parse_period_code(code).or_else(|| parse_year(code)),
        TemporalFormat::IsoDate => parse_iso(code),
        TemporalFormat::EuropeanDate => parse_european(code),
        TemporalFormat::Auto => parse_year(code)
            .or_else(|| parse_period_code(code))
            .or_else(|| parse_iso(code))
            .or_else(|| parse_european(code)),
    }
}

fn parse_year(code: &str) -> Option<(i32, Option<u32>)> {
    let caps = YEAR_ONLY.captures(code)?;
    caps[1].parse().ok().map(|year| (year, None))
}

fn parse_period_code(code: &str) -> Option<(i32, Option<u32>)> {
    let caps = PERIOD_CODE.captures(code)?;
    let year: i32 = caps[1].parse().ok()?;
    let index: u32 = caps[3].parse().ok()?;
    let month = match caps[2].to_ascii_uppercase().as_str() {
        "M" if (1..=12).contains(&index) => Some(index),
        "T" | "Q" if (1..=4).contains(&index) => None,
        "S" if (1..=2).contains(&index) => None,
        _ => return None,
    };
    Some((year, month))
}

fn parse_iso(code: &str) -> Option<(i32, Option<u32>)> {
    let date = NaiveDate::parse_from_str(code, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(code, "%Y-%m-%dT%H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| NaiveDateTime::parse_from_str(code, "%Y-%m-%d %H:%M:%S").ok().map(|dt| dt.date()))
        .or_else(|| NaiveDate::parse_from_str(&format!("{}-01", code), "%Y-%m-%d").ok())?;
    Some((date.year(), Some(date.month())))
}

fn parse_european(code: &str) -> Option<(i32, Option<u32>)> {
    let date = NaiveDate::parse_from_str(code, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(code, "%d-%m-%Y"))
        .ok()?;
    Some((date.year(), Some(date.month())))
}

/// Parse a numeric cell. Accepts decimal commas and thousands dots
/// (`"1.234,5"`), currency and percent suffixes. Missing markers yield `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '€' | '%' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() || MISSING_MARKERS.contains(&cleaned.to_lowercase().as_str()) {
        return None;
    }

    let canonical = match (cleaned.rfind(','), cleaned.rfind('.')) {
        // 1.234,5
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        // 1,234.5
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        // 3,5
        (Some(_), None) => cleaned.replace(',', "."),
        // 1.234.567 is a thousands-grouped integer
        (None, Some(_)) if cleaned.matches('.').count() > 1 => cleaned.replace('.', ""),
        _ => cleaned,
    };
    canonical.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Barrio codes appear as `"07"`, `"7"` or `"7.0"`; zero is not a barrio
pub fn parse_barrio_id(raw: &str) -> Option<BarrioId> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 || value < 1.0 || value > f64::from(u32::MAX) {
        return None;
    }
    Some(value as BarrioId)
}

/// Month cells: integral values in 1..=12, anything else is no month
pub fn parse_month(raw: &str) -> Option<u32> {
    let value = parse_number(raw)?;
    if value.fract() != 0.0 || !(1.0..=12.0).contains(&value) {
        return None;
    }
    Some(value as u32)
}

/// Yes/no cells as 1.0/0.0; numeric shares between 0 and 1 pass through
pub fn parse_flag(raw: &str) -> Option<f64> {
    match raw.trim().to_lowercase().as_str() {
        "si" | "sí" | "s" | "yes" | "y" | "true" | "x" => Some(1.0),
        "no" | "n" | "false" => Some(0.0),
        other => parse_number(other).filter(|v| (0.0..=1.0).contains(v)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_household_size_buckets() {
        assert_eq!(parse_household_size("> 4"), Some(4));
        assert_eq!(parse_household_size("1"), Some(1));
        assert_eq!(parse_household_size("2-3"), Some(2));
        assert_eq!(parse_household_size("sin datos"), None);
        assert_eq!(parse_household_size(""), None);
    }

    #[test]
    fn test_derive_year_formats() {
        assert_eq!(derive_year("2021", TemporalFormat::Year), Some(2021));
        assert_eq!(derive_year("2021M03", TemporalFormat::PeriodCode), Some(2021));
        assert_eq!(derive_year("2019T4", TemporalFormat::PeriodCode), Some(2019));
        assert_eq!(derive_year("2020-06-30", TemporalFormat::IsoDate), Some(2020));
        assert_eq!(derive_year("15/03/2018", TemporalFormat::EuropeanDate), Some(2018));
        assert_eq!(derive_year("2022-01-01T00:00:00", TemporalFormat::Auto), Some(2022));
    }

    #[test]
    fn test_derive_year_failures_are_none() {
        assert_eq!(derive_year("", TemporalFormat::Auto), None);
        assert_eq!(derive_year("desconocido", TemporalFormat::Auto), None);
        assert_eq!(derive_year("2021M13", TemporalFormat::PeriodCode), None);
        assert_eq!(derive_year("1850", TemporalFormat::Year), None);
        assert_eq!(derive_year("2021-03-15", TemporalFormat::Year), None);
    }

    #[test]
    fn test_derive_month() {
        assert_eq!(derive_month("2021M03", TemporalFormat::PeriodCode), Some(3));
        assert_eq!(derive_month("2021T2", TemporalFormat::PeriodCode), None);
        assert_eq!(derive_month("2021-07", TemporalFormat::Auto), Some(7));
        assert_eq!(derive_month("2021", TemporalFormat::Auto), None);
    }

    #[test]
    fn test_parse_number_locales() {
        assert_eq!(parse_number("1.234,5"), Some(1234.5));
        assert_eq!(parse_number("1,234.5"), Some(1234.5));
        assert_eq!(parse_number("3,5"), Some(3.5));
        assert_eq!(parse_number("4.250 €"), Some(4.25));
        assert_eq!(parse_number("1.234.567"), Some(1234567.0));
        assert_eq!(parse_number(".."), None);
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("-12"), Some(-12.0));
    }

    #[test]
    fn test_parse_month_rejects_fractions_and_out_of_range() {
        assert_eq!(parse_month("3"), Some(3));
        assert_eq!(parse_month("03"), Some(3));
        assert_eq!(parse_month("12.0"), Some(12));
        assert_eq!(parse_month("3.9"), None);
        assert_eq!(parse_month("-2"), None);
        assert_eq!(parse_month("0"), None);
        assert_eq!(parse_month("13"), None);
        assert_eq!(parse_month(".."), None);
    }

    #[test]
    fn test_parse_barrio_id() {
        assert_eq!(parse_barrio_id("07"), Some(7));
        assert_eq!(parse_barrio_id("7.0"), Some(7));
        assert_eq!(parse_barrio_id("0"), None);
        assert_eq!(parse_barrio_id("7.5"), None);
        assert_eq!(parse_barrio_id("Raval"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("Sí"), Some(1.0));
        assert_eq!(parse_flag("no"), Some(0.0));
        assert_eq!(parse_flag("0,6"), Some(0.6));
        assert_eq!(parse_flag("3"), None);
    }
}
