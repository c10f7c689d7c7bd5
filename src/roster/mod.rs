pub mod store;

pub use store::*;

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════
// Shift labels
// ═══════════════════════════════════════════════════════════

/// Matches explicit time ranges used as shift labels: "08:00-20:00",
/// "8-20", "20 a 8", "8.00 - 20.00h".
static TIME_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,2}(?:[:.]\d{2})?\s*(?:-|–|a)\s*\d{1,2}(?:[:.]\d{2})?\s*(?:h|hrs)?$").unwrap()
});

/// Shift label recognized in a schedule cell.
///
/// Covers the Spanish labels seen on on-call sheets plus their English
/// equivalents. An explicit time range ("08:00-20:00") is kept verbatim as
/// `Custom` so the original wording survives into replies. The set is not
/// assumed exhaustive; unmatched cells simply don't classify as shifts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShiftLabel {
    Day,
    Night,
    Morning,
    Afternoon,
    Custom(String),
}

impl ShiftLabel {
    /// Recognize a cell's text as a shift label.
    ///
    /// Matching is case- and accent-insensitive ("NOCHE", "Día", "dia" all
    /// match). Returns `None` when the text is not in the vocabulary and is
    /// not a time range.
    pub fn from_text(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_end_matches([':', '.', ',']);
        if trimmed.is_empty() {
            return None;
        }

        match normalize_lookup(trimmed).as_str() {
            "dia" | "day" | "diurno" | "diurna" => Some(Self::Day),
            "noche" | "night" | "nocturno" | "nocturna" => Some(Self::Night),
            "manana" | "morning" => Some(Self::Morning),
            "tarde" | "afternoon" => Some(Self::Afternoon),
            _ if TIME_RANGE.is_match(trimmed) => Some(Self::Custom(trimmed.to_string())),
            _ => None,
        }
    }

    /// Display name in the locale of the schedules (Spanish).
    pub fn display_name(&self) -> &str {
        match self {
            Self::Day => "Día",
            Self::Night => "Noche",
            Self::Morning => "Mañana",
            Self::Afternoon => "Tarde",
            Self::Custom(s) => s,
        }
    }
}

impl fmt::Display for ShiftLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

// Persisted as a plain string so roster files stay readable and stable
// even if the enum grows.
impl Serialize for ShiftLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.display_name())
    }
}

impl<'de> Deserialize<'de> for ShiftLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_text(&s).unwrap_or(Self::Custom(s)))
    }
}

/// Lowercase and strip Spanish diacritics for lookup comparisons.
///
/// Original casing and accents are always retained for display; this is
/// only used to match user input ("Perez", "quien") against stored text.
pub fn normalize_lookup(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            'ñ' => 'n',
            _ => c,
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════
// Roster
// ═══════════════════════════════════════════════════════════

/// One on-call assignment fact: who covers which shift on which date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftRecord {
    /// ISO calendar date of the shift.
    pub date: NaiveDate,
    pub shift: ShiftLabel,
    /// Person name as written on the schedule (original casing kept).
    pub person: String,
}

/// Non-fatal condition recorded while parsing, kept in the roster so a
/// human can follow up on what was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseNote {
    /// A row whose date cell did not match any accepted date format.
    /// The row was dropped, never guessed.
    DateParseError { page: usize, line: usize, text: String },
    /// A page where no tabular structure could be recovered.
    UnparsablePage { page: usize },
}

/// How much of the document made it into records.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceSummary {
    /// Mean OCR confidence over every token consumed, in [0, 1].
    pub mean_token_confidence: f32,
    /// Tokens flagged below the configured confidence threshold.
    pub low_confidence_tokens: usize,
    /// Candidate rows that produced at least one record.
    pub parsed_rows: usize,
    /// Candidate rows dropped for missing date, shift or name.
    pub unparsed_rows: usize,
}

/// Structured roster extracted from one uploaded document.
///
/// Immutable once built: a newer upload supersedes it in the store, it is
/// never merged or patched. Duplicate (date, shift) pairs are preserved
/// as-is since a schedule can genuinely list several people per shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Roster {
    /// Upload id this roster was parsed from.
    pub source_id: Uuid,
    pub parsed_at: DateTime<Utc>,
    /// Records in document order (page, then row, then cell order).
    pub records: Vec<ShiftRecord>,
    pub confidence: ConfidenceSummary,
    pub notes: Vec<ParseNote>,
    /// Count of `UnparsablePage` notes, denormalized for the on-disk shape.
    pub unparsed_page_count: usize,
}

impl Roster {
    /// All records for a calendar date, in document order.
    pub fn records_for_date(&self, date: NaiveDate) -> Vec<&ShiftRecord> {
        self.records.iter().filter(|r| r.date == date).collect()
    }

    /// Distinct person names, first-seen order, deduplicated
    /// case/accent-insensitively.
    pub fn people(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for record in &self.records {
            let key = normalize_lookup(&record.person);
            if !seen.contains(&key) {
                seen.push(key);
                out.push(record.person.clone());
            }
        }
        out
    }

    /// Earliest and latest record dates, if any records exist.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.records.iter().map(|r| r.date).min()?;
        let max = self.records.iter().map(|r| r.date).max()?;
        Some((min, max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(date: &str, shift: ShiftLabel, person: &str) -> ShiftRecord {
        ShiftRecord {
            date: date.parse().unwrap(),
            shift,
            person: person.to_string(),
        }
    }

    fn roster_with(records: Vec<ShiftRecord>) -> Roster {
        Roster {
            source_id: Uuid::nil(),
            parsed_at: "2024-03-01T12:00:00Z".parse().unwrap(),
            records,
            confidence: ConfidenceSummary::default(),
            notes: vec![],
            unparsed_page_count: 0,
        }
    }

    // --- ShiftLabel tests ---

    #[test]
    fn label_matches_spanish_vocabulary() {
        assert_eq!(ShiftLabel::from_text("Día"), Some(ShiftLabel::Day));
        assert_eq!(ShiftLabel::from_text("dia"), Some(ShiftLabel::Day));
        assert_eq!(ShiftLabel::from_text("NOCHE"), Some(ShiftLabel::Night));
        assert_eq!(ShiftLabel::from_text("Mañana"), Some(ShiftLabel::Morning));
        assert_eq!(ShiftLabel::from_text("tarde"), Some(ShiftLabel::Afternoon));
    }

    #[test]
    fn label_matches_english_vocabulary() {
        assert_eq!(ShiftLabel::from_text("Day"), Some(ShiftLabel::Day));
        assert_eq!(ShiftLabel::from_text("night"), Some(ShiftLabel::Night));
        assert_eq!(ShiftLabel::from_text("Morning"), Some(ShiftLabel::Morning));
        assert_eq!(ShiftLabel::from_text("afternoon"), Some(ShiftLabel::Afternoon));
    }

    #[test]
    fn label_accepts_trailing_punctuation() {
        assert_eq!(ShiftLabel::from_text("Noche:"), Some(ShiftLabel::Night));
        assert_eq!(ShiftLabel::from_text("Día."), Some(ShiftLabel::Day));
    }

    #[test]
    fn label_keeps_time_range_verbatim() {
        assert_eq!(
            ShiftLabel::from_text("08:00-20:00"),
            Some(ShiftLabel::Custom("08:00-20:00".to_string()))
        );
        assert_eq!(
            ShiftLabel::from_text("20 a 8"),
            Some(ShiftLabel::Custom("20 a 8".to_string()))
        );
    }

    #[test]
    fn label_rejects_names_and_headers() {
        assert_eq!(ShiftLabel::from_text("Alice"), None);
        assert_eq!(ShiftLabel::from_text("Turno"), None);
        assert_eq!(ShiftLabel::from_text("Guardia"), None);
        assert_eq!(ShiftLabel::from_text("15/03/2024"), None);
        assert_eq!(ShiftLabel::from_text(""), None);
    }

    #[test]
    fn label_serializes_as_plain_string() {
        let json = serde_json::to_value(ShiftLabel::Night).unwrap();
        assert_eq!(json, serde_json::json!("Noche"));

        let back: ShiftLabel = serde_json::from_value(json).unwrap();
        assert_eq!(back, ShiftLabel::Night);
    }

    #[test]
    fn unknown_label_string_deserializes_as_custom() {
        let label: ShiftLabel = serde_json::from_value(serde_json::json!("refuerzo")).unwrap();
        assert_eq!(label, ShiftLabel::Custom("refuerzo".to_string()));
    }

    #[test]
    fn normalize_strips_accents_and_case() {
        assert_eq!(normalize_lookup("Pérez"), "perez");
        assert_eq!(normalize_lookup("QUIÉN"), "quien");
        assert_eq!(normalize_lookup("Muñoz"), "munoz");
    }

    // --- Roster tests ---

    #[test]
    fn records_for_date_filters_exactly() {
        let roster = roster_with(vec![
            record("2024-03-15", ShiftLabel::Day, "Alice"),
            record("2024-03-15", ShiftLabel::Night, "Bob"),
            record("2024-03-16", ShiftLabel::Day, "Carla"),
        ]);

        let matches = roster.records_for_date("2024-03-15".parse().unwrap());
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|r| r.date.to_string() == "2024-03-15"));
    }

    #[test]
    fn people_dedupes_accent_insensitively() {
        let roster = roster_with(vec![
            record("2024-03-15", ShiftLabel::Day, "José Pérez"),
            record("2024-03-16", ShiftLabel::Day, "Jose Perez"),
            record("2024-03-17", ShiftLabel::Day, "Ana"),
        ]);

        let people = roster.people();
        assert_eq!(people, vec!["José Pérez", "Ana"], "first spelling wins");
    }

    #[test]
    fn date_range_spans_records() {
        let roster = roster_with(vec![
            record("2024-03-20", ShiftLabel::Day, "Alice"),
            record("2024-03-01", ShiftLabel::Night, "Bob"),
        ]);

        let (min, max) = roster.date_range().unwrap();
        assert_eq!(min.to_string(), "2024-03-01");
        assert_eq!(max.to_string(), "2024-03-20");
        assert!(roster_with(vec![]).date_range().is_none());
    }

    #[test]
    fn roster_json_has_persistence_fields() {
        let roster = roster_with(vec![record("2024-03-15", ShiftLabel::Day, "Alice")]);
        let json = serde_json::to_value(&roster).unwrap();

        assert!(json.get("source_id").is_some());
        assert!(json.get("parsed_at").is_some());
        assert!(json.get("unparsed_page_count").is_some());
        assert_eq!(json["records"][0]["date"], serde_json::json!("2024-03-15"));
        assert_eq!(json["records"][0]["shift"], serde_json::json!("Día"));
        assert_eq!(json["records"][0]["person"], serde_json::json!("Alice"));
    }

    #[test]
    fn parse_note_json_is_tagged() {
        let note = ParseNote::UnparsablePage { page: 2 };
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["kind"], serde_json::json!("unparsable_page"));
        assert_eq!(json["page"], serde_json::json!(2));
    }
}
