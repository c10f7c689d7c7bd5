//! Date interpretation for schedule cells.
//!
//! Schedules write dates every way a hand can: "15/03/2024", "15-03",
//! "15 de marzo", "sab 15/03". Everything is read day-first, matching
//! the es-CL documents this bot is pointed at. Cells without a year
//! borrow it from the reference date of the parse.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

use crate::roster::normalize_lookup;

/// Two-digit years below this map to 2000-2069, the rest to 1970-1999.
const TWO_DIGIT_YEAR_PIVOT: i32 = 70;

/// Day-first numeric date: 15/3, 15/03/2024, 15-03-24, 15.03.2024.
static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[/\-.](\d{1,2})(?:[/\-.](\d{4}|\d{2}))?$").unwrap()
});

/// Spelled-out month: "15 de marzo de 2024", "15 marzo", "1 sept 2024".
static NAMED_MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})\s+(?:de\s+)?([a-z]+)\.?(?:\s+(?:(?:de|del)\s+)?(\d{4}|\d{2}))?$")
        .unwrap()
});

/// Interpret one cell of text as a calendar date.
///
/// Returns `None` when the text is not a date or names an impossible
/// one (31/02). Never guesses beyond a single leading-word retry for
/// weekday prefixes.
pub fn parse_date_token(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let normalized = normalize_date_text(text);
    if let Some(date) = parse_normalized(&normalized, reference) {
        return Some(date);
    }

    // Tables often prefix the date with a weekday ("sab 15/03"); retry
    // once without the leading word.
    match normalized.split_once(' ') {
        Some((_, rest)) => parse_normalized(rest.trim(), reference),
        None => None,
    }
}

fn normalize_date_text(text: &str) -> String {
    let trimmed = text.trim().trim_end_matches([',', '.', ';', ':']);
    normalize_lookup(trimmed)
}

fn parse_normalized(text: &str, reference: NaiveDate) -> Option<NaiveDate> {
    if let Some(caps) = NUMERIC_DATE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let year = resolve_year(caps.get(3).map(|m| m.as_str()), reference)?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    if let Some(caps) = NAMED_MONTH_DATE.captures(text) {
        let day: u32 = caps[1].parse().ok()?;
        let month = month_number(&caps[2])?;
        let year = resolve_year(caps.get(3).map(|m| m.as_str()), reference)?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    None
}

/// Absent year falls back to the reference date's year.
fn resolve_year(text: Option<&str>, reference: NaiveDate) -> Option<i32> {
    let Some(raw) = text else {
        return Some(reference.year());
    };
    let value: i32 = raw.parse().ok()?;
    if raw.len() == 2 {
        Some(if value < TWO_DIGIT_YEAR_PIVOT {
            2000 + value
        } else {
            1900 + value
        })
    } else {
        Some(value)
    }
}

/// Spanish and English month names and their common abbreviations.
/// Input must already be lowercased and accent-stripped.
fn month_number(name: &str) -> Option<u32> {
    let month = match name {
        "enero" | "ene" | "january" | "jan" => 1,
        "febrero" | "feb" | "february" => 2,
        "marzo" | "mar" | "march" => 3,
        "abril" | "abr" | "april" | "apr" => 4,
        "mayo" | "may" => 5,
        "junio" | "jun" | "june" => 6,
        "julio" | "jul" | "july" => 7,
        "agosto" | "ago" | "august" | "aug" => 8,
        "septiembre" | "setiembre" | "sep" | "sept" | "set" | "september" => 9,
        "octubre" | "oct" | "october" => 10,
        "noviembre" | "nov" | "november" => 11,
        "diciembre" | "dic" | "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}
