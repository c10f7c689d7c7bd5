//! Query interpretation over a parsed roster.
//!
//! Turns free-form WhatsApp text ("¿quién está de guardia mañana?") into
//! a structured [`Query`], then answers it against a [`Roster`]. Rendering
//! the answer into Spanish reply text is the bot's job, not this module's.

use chrono::{Duration, NaiveDate};

use crate::pipeline::dates::parse_date_token;
use crate::roster::{normalize_lookup, Roster, ShiftLabel, ShiftRecord};

/// Longest run of words tried as a single date phrase ("15 de marzo de 2024").
const MAX_DATE_PHRASE_WORDS: usize = 5;

// ═══════════════════════════════════════════════════════════
// Query shapes
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Who is on call right now (today in the bot's timezone).
    OnCallNow,
    /// Who is on call on a specific date.
    OnCallOn(NaiveDate),
    /// Who covers a specific shift on a date.
    OnCallForShift(ShiftLabel, NaiveDate),
    /// Every person appearing in the roster.
    ListPeople,
    Help,
}

/// Structured answer, ready for rendering. Multiple people on the same
/// shift come back as multiple matches, never collapsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    OnCall {
        date: NaiveDate,
        /// Present when the query narrowed to one shift.
        shift: Option<ShiftLabel>,
        matches: Vec<ShiftRecord>,
    },
    People(Vec<String>),
    Help,
}

// ═══════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════

/// Interpret message text as a query.
///
/// `reference` is today's date in the bot's timezone; it anchors relative
/// words ("mañana") and year-less dates ("15/03"). Returns `None` when the
/// text doesn't look like any supported question.
pub fn parse_query(text: &str, reference: NaiveDate) -> Option<Query> {
    let cleaned: String = text
        .chars()
        .map(|c| match c {
            '¿' | '?' | '¡' | '!' => ' ',
            _ => c,
        })
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let normalized: Vec<String> = words.iter().map(|w| normalize_lookup(w)).collect();

    if normalized
        .iter()
        .any(|w| matches!(w.as_str(), "ayuda" | "help" | "comandos"))
    {
        return Some(Query::Help);
    }
    if normalized
        .iter()
        .any(|w| matches!(w.as_str(), "personas" | "lista" | "registrados" | "equipo" | "people"))
    {
        return Some(Query::ListPeople);
    }

    let date = find_date_phrase(&words, reference);
    let (shift, relative_date) = find_shift_and_relative(&words, &normalized, reference);
    let date = date.or(relative_date);

    match (shift, date) {
        (Some(s), Some(d)) => Some(Query::OnCallForShift(s, d)),
        (Some(s), None) => Some(Query::OnCallForShift(s, reference)),
        (None, Some(d)) => Some(Query::OnCallOn(d)),
        (None, None) => {
            let asks_on_call = normalized.iter().any(|w| {
                matches!(
                    w.as_str(),
                    "guardia" | "guardias" | "quien" | "quienes" | "turno" | "hoy"
                )
            });
            asks_on_call.then_some(Query::OnCallNow)
        }
    }
}

/// Scan word windows for a date, longest phrase first so "15 de marzo de
/// 2024" beats the bare "15" inside it. Date regexes are anchored, so a
/// window only matches when it is exactly a date phrase.
fn find_date_phrase(words: &[&str], reference: NaiveDate) -> Option<NaiveDate> {
    for size in (1..=MAX_DATE_PHRASE_WORDS.min(words.len())).rev() {
        for start in 0..=(words.len() - size) {
            let candidate = words[start..start + size].join(" ");
            if let Some(date) = parse_date_token(&candidate, reference) {
                return Some(date);
            }
        }
    }
    None
}

/// Find a shift label and resolve relative day words.
///
/// "mañana" is the morning shift only right after "turno" (with an
/// optional "de" / "de la" in between); anywhere else it means tomorrow.
/// "día" followed by a number ("el día 15/03") is date phrasing, not the
/// day shift.
fn find_shift_and_relative(
    words: &[&str],
    normalized: &[String],
    reference: NaiveDate,
) -> (Option<ShiftLabel>, Option<NaiveDate>) {
    let mut shift: Option<ShiftLabel> = None;
    let mut relative: Option<NaiveDate> = None;

    let follows_turno = |i: usize| -> bool {
        let before: Vec<&str> = normalized[..i]
            .iter()
            .rev()
            .take(3)
            .map(String::as_str)
            .collect();
        matches!(
            before.as_slice(),
            ["turno", ..] | ["de", "turno", ..] | ["la", "de", "turno"]
        )
    };

    let mut i = 0;
    while i < words.len() {
        match normalized[i].as_str() {
            "dia" if words
                .get(i + 1)
                .is_some_and(|w| w.starts_with(|c: char| c.is_ascii_digit())) =>
            {
                i += 2;
                continue;
            }
            "manana" => {
                if follows_turno(i) {
                    shift.get_or_insert(ShiftLabel::Morning);
                } else if relative.is_none() {
                    relative = Some(reference + Duration::days(1));
                }
            }
            _ => {
                if shift.is_none() {
                    shift = ShiftLabel::from_text(words[i]);
                }
            }
        }
        i += 1;
    }

    (shift, relative)
}

// ═══════════════════════════════════════════════════════════
// Resolution
// ═══════════════════════════════════════════════════════════

/// Answer a query against a roster. `today` is the current date in the
/// bot's timezone, used by [`Query::OnCallNow`].
pub fn resolve(query: &Query, roster: &Roster, today: NaiveDate) -> Answer {
    match query {
        Query::OnCallNow => on_call(roster, today, None),
        Query::OnCallOn(date) => on_call(roster, *date, None),
        Query::OnCallForShift(shift, date) => on_call(roster, *date, Some(shift.clone())),
        Query::ListPeople => Answer::People(roster.people()),
        Query::Help => Answer::Help,
    }
}

fn on_call(roster: &Roster, date: NaiveDate, shift: Option<ShiftLabel>) -> Answer {
    let matches: Vec<ShiftRecord> = roster
        .records_for_date(date)
        .into_iter()
        .filter(|r| shift.as_ref().map_or(true, |s| &r.shift == s))
        .cloned()
        .collect();
    Answer::OnCall { date, shift, matches }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::ConfidenceSummary;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(d: NaiveDate, shift: ShiftLabel, person: &str) -> ShiftRecord {
        ShiftRecord {
            date: d,
            shift,
            person: person.to_string(),
        }
    }

    fn roster(records: Vec<ShiftRecord>) -> Roster {
        Roster {
            source_id: Uuid::from_u128(1),
            parsed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            records,
            confidence: ConfidenceSummary::default(),
            notes: vec![],
            unparsed_page_count: 0,
        }
    }

    // --- parse_query tests ---

    #[test]
    fn plain_on_call_question_is_now() {
        assert_eq!(
            parse_query("¿Quién está de guardia?", reference()),
            Some(Query::OnCallNow)
        );
        assert_eq!(
            parse_query("quien esta de guardia hoy", reference()),
            Some(Query::OnCallNow)
        );
    }

    #[test]
    fn explicit_date_is_extracted() {
        assert_eq!(
            parse_query("¿Quién está de guardia el 15/03/2024?", reference()),
            Some(Query::OnCallOn(date(2024, 3, 15)))
        );
    }

    #[test]
    fn spanish_date_phrase_is_extracted() {
        assert_eq!(
            parse_query("guardia el 15 de marzo", reference()),
            Some(Query::OnCallOn(date(2024, 3, 15)))
        );
        assert_eq!(
            parse_query("guardia el 15 de marzo de 2025", reference()),
            Some(Query::OnCallOn(date(2025, 3, 15)))
        );
    }

    #[test]
    fn manana_alone_means_tomorrow() {
        assert_eq!(
            parse_query("¿quién tiene guardia mañana?", reference()),
            Some(Query::OnCallOn(date(2024, 3, 2)))
        );
    }

    #[test]
    fn turno_de_manana_means_morning_shift() {
        assert_eq!(
            parse_query("¿quién tiene el turno de mañana?", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Morning, reference()))
        );
        assert_eq!(
            parse_query("turno mañana", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Morning, reference()))
        );
    }

    #[test]
    fn shift_and_date_combine() {
        assert_eq!(
            parse_query("guardia de noche el 15/03/2024", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Night, date(2024, 3, 15)))
        );
    }

    #[test]
    fn shift_with_tomorrow_combines() {
        assert_eq!(
            parse_query("guardia de noche mañana", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Night, date(2024, 3, 2)))
        );
    }

    #[test]
    fn shift_without_date_defaults_to_today() {
        assert_eq!(
            parse_query("¿quién cubre la noche?", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Night, reference()))
        );
    }

    #[test]
    fn dia_before_a_number_is_date_phrasing_not_the_day_shift() {
        assert_eq!(
            parse_query("guardia el día 15/03/2024", reference()),
            Some(Query::OnCallOn(date(2024, 3, 15)))
        );
    }

    #[test]
    fn dia_without_a_number_is_the_day_shift() {
        assert_eq!(
            parse_query("¿quién tiene la guardia de día?", reference()),
            Some(Query::OnCallForShift(ShiftLabel::Day, reference()))
        );
    }

    #[test]
    fn people_listing_keywords() {
        assert_eq!(parse_query("personas", reference()), Some(Query::ListPeople));
        assert_eq!(
            parse_query("lista de guardias", reference()),
            Some(Query::ListPeople)
        );
        assert_eq!(
            parse_query("guardias registrados", reference()),
            Some(Query::ListPeople)
        );
    }

    #[test]
    fn help_keyword() {
        assert_eq!(parse_query("ayuda", reference()), Some(Query::Help));
    }

    #[test]
    fn unrelated_text_is_not_a_query() {
        assert_eq!(parse_query("hola", reference()), None);
        assert_eq!(parse_query("", reference()), None);
        assert_eq!(parse_query("gracias!", reference()), None);
    }

    // --- resolve tests ---

    #[test]
    fn resolve_now_uses_today() {
        let roster = roster(vec![
            record(date(2024, 3, 1), ShiftLabel::Day, "Alice"),
            record(date(2024, 3, 2), ShiftLabel::Day, "Bob"),
        ]);

        let answer = resolve(&Query::OnCallNow, &roster, date(2024, 3, 1));
        match answer {
            Answer::OnCall { date: d, shift, matches } => {
                assert_eq!(d, date(2024, 3, 1));
                assert_eq!(shift, None);
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].person, "Alice");
            }
            other => panic!("expected OnCall, got {other:?}"),
        }
    }

    #[test]
    fn resolve_returns_every_match_as_a_list() {
        let roster = roster(vec![
            record(date(2024, 3, 15), ShiftLabel::Day, "Alice"),
            record(date(2024, 3, 15), ShiftLabel::Day, "Bob"),
            record(date(2024, 3, 15), ShiftLabel::Night, "Carla"),
        ]);

        let answer = resolve(&Query::OnCallOn(date(2024, 3, 15)), &roster, reference());
        match answer {
            Answer::OnCall { matches, .. } => {
                let people: Vec<&str> = matches.iter().map(|r| r.person.as_str()).collect();
                assert_eq!(people, vec!["Alice", "Bob", "Carla"]);
            }
            other => panic!("expected OnCall, got {other:?}"),
        }
    }

    #[test]
    fn resolve_filters_by_shift() {
        let roster = roster(vec![
            record(date(2024, 3, 15), ShiftLabel::Day, "Alice"),
            record(date(2024, 3, 15), ShiftLabel::Night, "Bob"),
        ]);

        let query = Query::OnCallForShift(ShiftLabel::Night, date(2024, 3, 15));
        let answer = resolve(&query, &roster, reference());
        match answer {
            Answer::OnCall { shift, matches, .. } => {
                assert_eq!(shift, Some(ShiftLabel::Night));
                assert_eq!(matches.len(), 1);
                assert_eq!(matches[0].person, "Bob");
            }
            other => panic!("expected OnCall, got {other:?}"),
        }
    }

    #[test]
    fn resolve_empty_date_yields_no_matches_not_an_error() {
        let roster = roster(vec![record(date(2024, 3, 15), ShiftLabel::Day, "Alice")]);

        let answer = resolve(&Query::OnCallOn(date(2024, 7, 1)), &roster, reference());
        match answer {
            Answer::OnCall { matches, .. } => assert!(matches.is_empty()),
            other => panic!("expected OnCall, got {other:?}"),
        }
    }

    #[test]
    fn resolve_people_deduplicates() {
        let roster = roster(vec![
            record(date(2024, 3, 15), ShiftLabel::Day, "José Pérez"),
            record(date(2024, 3, 16), ShiftLabel::Night, "Jose Perez"),
            record(date(2024, 3, 17), ShiftLabel::Day, "Ana"),
        ]);

        let answer = resolve(&Query::ListPeople, &roster, reference());
        assert_eq!(
            answer,
            Answer::People(vec!["José Pérez".to_string(), "Ana".to_string()])
        );
    }
}
