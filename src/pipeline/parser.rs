//! Layout reconstruction: positioned OCR tokens in, shift records out.
//!
//! Schedules arrive as tables, but OCR returns an unordered bag of words
//! with bounding boxes. This module rebuilds the grid: tokens cluster
//! into lines, lines into cells, cell left-edges into column bands, and
//! the band that reads as dates anchors every row. Parsing is pure; the
//! same tokens and context always produce the same roster.

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::dates::parse_date_token;
use super::types::RecognizedToken;
use crate::roster::{ConfidenceSummary, ParseNote, Roster, ShiftLabel, ShiftRecord};

// ═══════════════════════════════════════════════════════════
// Tuning constants
// ═══════════════════════════════════════════════════════════

/// Tokens whose vertical centers sit within this many line heights of the
/// running line center belong to the same line. Line height is estimated
/// as the median token height on the page.
const LINE_GROUP_FACTOR: f32 = 1.0;

/// Tokens in a line closer than this fraction of the line height merge
/// into one cell; anything wider is a column gap.
const INTRA_CELL_GAP_FACTOR: f32 = 0.8;

/// Cell left edges closer than this fraction of the line height fall
/// into the same column band.
const COLUMN_GAP_FACTOR: f32 = 1.5;

/// Share of a band's cells that must read as dates for it to be the
/// date column.
const DATE_COLUMN_MIN_RATIO: f32 = 0.5;

// ═══════════════════════════════════════════════════════════
// Parser
// ═══════════════════════════════════════════════════════════

/// Per-parse inputs that anchor an otherwise pure computation. The
/// parser never consults the clock; callers pass identity and time in.
#[derive(Debug, Clone)]
pub struct ParseContext {
    pub source_id: Uuid,
    pub parsed_at: DateTime<Utc>,
    /// Anchors year inference for dates written without one.
    pub reference_date: NaiveDate,
}

/// Turns per-page token lists into a structured roster.
#[derive(Default)]
pub struct ScheduleParser;

impl ScheduleParser {
    pub fn new() -> Self {
        Self
    }

    /// `pages[i]` holds the tokens recognized on page `i`. Pages that
    /// yield no tabular structure are recorded as notes, never as
    /// errors; a partially readable document still produces a roster.
    pub fn parse(&self, pages: &[Vec<RecognizedToken>], context: &ParseContext) -> Roster {
        let mut records = Vec::new();
        let mut notes = Vec::new();
        let mut summary = ConfidenceSummary::default();
        let mut unparsed_page_count = 0;

        let mut confidence_sum = 0.0f64;
        let mut token_count = 0usize;

        for (page, tokens) in pages.iter().enumerate() {
            for token in tokens {
                confidence_sum += token.confidence as f64;
                token_count += 1;
                if token.low_confidence {
                    summary.low_confidence_tokens += 1;
                }
            }

            if !parse_page(tokens, page, context, &mut records, &mut notes, &mut summary) {
                warn!(page, "No tabular structure recovered from page");
                notes.push(ParseNote::UnparsablePage { page });
                unparsed_page_count += 1;
            }
        }

        summary.mean_token_confidence = if token_count == 0 {
            0.0
        } else {
            (confidence_sum / token_count as f64) as f32
        };

        Roster {
            source_id: context.source_id,
            parsed_at: context.parsed_at,
            records,
            confidence: summary,
            notes,
            unparsed_page_count,
        }
    }
}

/// Returns false when the page has no recoverable table (no tokens, or
/// no column reads as dates).
fn parse_page(
    tokens: &[RecognizedToken],
    page: usize,
    context: &ParseContext,
    records: &mut Vec<ShiftRecord>,
    notes: &mut Vec<ParseNote>,
    summary: &mut ConfidenceSummary,
) -> bool {
    if tokens.is_empty() {
        return false;
    }

    let line_height = median_token_height(tokens);
    let lines = cluster_lines(tokens, line_height);
    let cells: Vec<Vec<Cell>> = lines.iter().map(|l| merge_cells(l, line_height)).collect();
    let bands = column_bands(&cells, line_height);

    let Some(date_band) = date_column(&cells, &bands, context.reference_date) else {
        return false;
    };

    debug!(
        page,
        lines = lines.len(),
        bands = bands.len(),
        date_band,
        "Reconstructed page layout"
    );

    for (line, line_cells) in cells.iter().enumerate() {
        extract_row(
            page, line, line_cells, &bands, date_band, context, records, notes, summary,
        );
    }
    true
}

// ── Geometry reconstruction ──

/// A run of tokens with only word-sized gaps between them.
struct Cell {
    text: String,
    left: u32,
    right: u32,
}

/// Range of left edges that make up one column.
struct Band {
    min_left: u32,
    max_left: u32,
}

fn median_token_height(tokens: &[RecognizedToken]) -> f32 {
    let mut heights: Vec<u32> = tokens.iter().map(|t| t.bounding_box.height).collect();
    heights.sort_unstable();
    heights[heights.len() / 2] as f32
}

/// Group tokens into visual lines, top to bottom, each line sorted left
/// to right. Uses a running mean of the line's centers so a gently
/// sloping baseline does not split rows.
fn cluster_lines(tokens: &[RecognizedToken], line_height: f32) -> Vec<Vec<&RecognizedToken>> {
    let mut sorted: Vec<&RecognizedToken> = tokens.iter().collect();
    sorted.sort_by(|a, b| {
        a.bounding_box
            .center_y()
            .total_cmp(&b.bounding_box.center_y())
            .then_with(|| a.bounding_box.x.cmp(&b.bounding_box.x))
    });

    let mut lines: Vec<Vec<&RecognizedToken>> = Vec::new();
    let mut current: Vec<&RecognizedToken> = Vec::new();
    let mut center_sum = 0.0f32;

    for token in sorted {
        let center = token.bounding_box.center_y();
        if !current.is_empty() {
            let mean = center_sum / current.len() as f32;
            if (center - mean).abs() > line_height * LINE_GROUP_FACTOR {
                lines.push(std::mem::take(&mut current));
                center_sum = 0.0;
            }
        }
        center_sum += center;
        current.push(token);
    }
    if !current.is_empty() {
        lines.push(current);
    }

    for line in &mut lines {
        line.sort_by_key(|t| t.bounding_box.x);
    }
    lines
}

/// Merge a line's tokens into cells wherever the horizontal gap stays
/// below the word-spacing threshold.
fn merge_cells(line: &[&RecognizedToken], line_height: f32) -> Vec<Cell> {
    let gap_limit = line_height * INTRA_CELL_GAP_FACTOR;
    let mut cells: Vec<Cell> = Vec::new();

    for token in line {
        let bb = &token.bounding_box;
        match cells.last_mut() {
            Some(cell) if (bb.x.saturating_sub(cell.right)) as f32 <= gap_limit => {
                cell.text.push(' ');
                cell.text.push_str(&token.text);
                cell.right = cell.right.max(bb.right());
            }
            _ => cells.push(Cell {
                text: token.text.clone(),
                left: bb.x,
                right: bb.right(),
            }),
        }
    }
    cells
}

/// 1-D clustering of cell left edges across the whole page. Recovers the
/// virtual column grid even though the OCR text has no table lines.
fn column_bands(lines: &[Vec<Cell>], line_height: f32) -> Vec<Band> {
    let mut lefts: Vec<u32> = lines.iter().flatten().map(|c| c.left).collect();
    lefts.sort_unstable();

    let gap = line_height * COLUMN_GAP_FACTOR;
    let mut bands: Vec<Band> = Vec::new();
    for left in lefts {
        match bands.last_mut() {
            Some(band) if (left - band.max_left) as f32 <= gap => band.max_left = left,
            _ => bands.push(Band {
                min_left: left,
                max_left: left,
            }),
        }
    }
    bands
}

fn band_of(bands: &[Band], left: u32) -> Option<usize> {
    bands
        .iter()
        .position(|b| left >= b.min_left && left <= b.max_left)
}

/// The band whose cells most often parse as dates, if any clears the
/// minimum ratio. Ties go to the leftmost band.
fn date_column(lines: &[Vec<Cell>], bands: &[Band], reference: NaiveDate) -> Option<usize> {
    let mut date_hits = vec![0usize; bands.len()];
    let mut totals = vec![0usize; bands.len()];

    for cell in lines.iter().flatten() {
        if let Some(band) = band_of(bands, cell.left) {
            totals[band] += 1;
            if parse_date_token(&cell.text, reference).is_some() {
                date_hits[band] += 1;
            }
        }
    }

    let mut best: Option<(usize, f32)> = None;
    for band in 0..bands.len() {
        if date_hits[band] == 0 {
            continue;
        }
        let ratio = date_hits[band] as f32 / totals[band] as f32;
        if ratio >= DATE_COLUMN_MIN_RATIO && best.map_or(true, |(_, r)| ratio > r) {
            best = Some((band, ratio));
        }
    }
    best.map(|(band, _)| band)
}

// ── Row extraction ──

/// Piece of a row's content region. `ends_group` marks a ';' boundary,
/// which closes one (shift, people) pairing within the row.
struct Chunk {
    text: String,
    ends_group: bool,
}

#[allow(clippy::too_many_arguments)]
fn extract_row(
    page: usize,
    line: usize,
    cells: &[Cell],
    bands: &[Band],
    date_band: usize,
    context: &ParseContext,
    records: &mut Vec<ShiftRecord>,
    notes: &mut Vec<ParseNote>,
    summary: &mut ConfidenceSummary,
) {
    let (date_cells, region): (Vec<&Cell>, Vec<&Cell>) = cells
        .iter()
        .partition(|c| band_of(bands, c.left) == Some(date_band));

    let date = date_cells
        .iter()
        .find_map(|c| parse_date_token(&c.text, context.reference_date));

    let segments = split_segments(&region);

    if let Some(date) = date {
        let mut emitted = 0usize;
        for segment in &segments {
            let (label, names) = interpret_segment(segment);
            if let Some(shift) = label {
                for person in names {
                    records.push(ShiftRecord {
                        date,
                        shift: shift.clone(),
                        person,
                    });
                    emitted += 1;
                }
            }
        }
        if emitted > 0 {
            summary.parsed_rows += 1;
        } else {
            summary.unparsed_rows += 1;
        }
        return;
    }

    // No usable date. Only rows that otherwise look like schedule rows
    // count as unparsed; titles and headers stay silent.
    let looks_like_schedule_row = segments
        .iter()
        .any(|segment| interpret_segment(segment).0.is_some());
    if !looks_like_schedule_row {
        return;
    }

    summary.unparsed_rows += 1;
    let date_text = date_cells
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    if !date_text.trim().is_empty() {
        notes.push(ParseNote::DateParseError {
            page,
            line,
            text: date_text,
        });
    }
}

/// Split the row's non-date cells at ';' boundaries into person-group
/// segments, preserving left-to-right order.
fn split_segments(region: &[&Cell]) -> Vec<Vec<Chunk>> {
    let mut chunks: Vec<Chunk> = Vec::new();
    for cell in region {
        let parts: Vec<&str> = cell.text.split(';').collect();
        let last = parts.len() - 1;
        for (i, part) in parts.iter().enumerate() {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                // A bare ';' still closes the current group
                if i < last {
                    if let Some(prev) = chunks.last_mut() {
                        prev.ends_group = true;
                    }
                }
                continue;
            }
            chunks.push(Chunk {
                text: trimmed.to_string(),
                ends_group: i < last,
            });
        }
    }

    let mut segments: Vec<Vec<Chunk>> = Vec::new();
    let mut current: Vec<Chunk> = Vec::new();
    for chunk in chunks {
        let ends = chunk.ends_group;
        current.push(chunk);
        if ends {
            segments.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        segments.push(current);
    }
    segments
}

/// Pull the shift label out of a segment; everything else is people.
/// The label may be a whole chunk ("Noche") or lead a merged chunk
/// ("Noche Bob"). Order does not matter, so name-before-shift column
/// layouts work too.
fn interpret_segment(segment: &[Chunk]) -> (Option<ShiftLabel>, Vec<String>) {
    let mut label: Option<ShiftLabel> = None;
    let mut name_parts: Vec<&str> = Vec::new();

    for chunk in segment {
        if let Some(found) = ShiftLabel::from_text(&chunk.text) {
            if label.is_none() {
                label = Some(found);
            }
            continue;
        }

        if label.is_none() {
            if let Some((first, rest)) = chunk.text.split_once(char::is_whitespace) {
                if let Some(found) = ShiftLabel::from_text(first) {
                    label = Some(found);
                    name_parts.push(rest.trim());
                    continue;
                }
            }
        }

        name_parts.push(&chunk.text);
    }

    (label, expand_names(&name_parts.join(" ")))
}

/// "Juan Pérez, María / Luis" lists three people. Names are kept as
/// written; only separators and stray punctuation are stripped.
fn expand_names(text: &str) -> Vec<String> {
    text.split([',', '/'])
        .map(|part| part.trim().trim_end_matches(['.', ',', ';']).trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::BoundingBox;
    use chrono::TimeZone;

    fn tok(text: &str, x: u32, y: u32, page: usize) -> RecognizedToken {
        RecognizedToken {
            text: text.to_string(),
            bounding_box: BoundingBox {
                x,
                y,
                width: text.chars().count() as u32 * 12,
                height: 20,
            },
            page_number: page,
            confidence: 0.9,
            low_confidence: false,
        }
    }

    /// One table row: date at x=10, shift at x=250, names from x=450
    /// with word-sized gaps so they merge into a single cell.
    fn schedule_row(date: &str, shift: &str, names: &[&str], y: u32, page: usize) -> Vec<RecognizedToken> {
        let mut tokens = vec![tok(date, 10, y, page), tok(shift, 250, y, page)];
        let mut x = 450;
        for name in names {
            tokens.push(tok(name, x, y, page));
            x += name.chars().count() as u32 * 12 + 8;
        }
        tokens
    }

    fn context() -> ParseContext {
        ParseContext {
            source_id: Uuid::from_u128(7),
            parsed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            reference_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn rec(d: NaiveDate, shift: ShiftLabel, person: &str) -> ShiftRecord {
        ShiftRecord {
            date: d,
            shift,
            person: person.to_string(),
        }
    }

    // --- table reconstruction tests ---

    #[test]
    fn three_column_table_parses() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.extend(schedule_row("16/03/2024", "Noche", &["María"], 80, 0));
        tokens.extend(schedule_row("17/03/2024", "Día", &["Pedro"], 120, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![
                rec(date(2024, 3, 15), ShiftLabel::Day, "Juan"),
                rec(date(2024, 3, 16), ShiftLabel::Night, "María"),
                rec(date(2024, 3, 17), ShiftLabel::Day, "Pedro"),
            ]
        );
        assert_eq!(roster.confidence.parsed_rows, 3);
        assert_eq!(roster.confidence.unparsed_rows, 0);
        assert!(roster.notes.is_empty());
        assert_eq!(roster.unparsed_page_count, 0);
    }

    #[test]
    fn header_row_is_ignored_silently() {
        let mut tokens = vec![
            tok("Fecha", 10, 40, 0),
            tok("Turno", 250, 40, 0),
            tok("Nombre", 450, 40, 0),
        ];
        tokens.extend(schedule_row("15/03/2024", "Día", &["Juan"], 80, 0));
        tokens.extend(schedule_row("16/03/2024", "Noche", &["María"], 120, 0));
        tokens.extend(schedule_row("17/03/2024", "Día", &["Pedro"], 160, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 3);
        assert_eq!(roster.confidence.unparsed_rows, 0, "headers are not unparsed rows");
        assert!(roster.notes.is_empty());
    }

    #[test]
    fn scrambled_token_order_is_restored() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.extend(schedule_row("16/03/2024", "Noche", &["María"], 80, 0));
        tokens.reverse();

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 2);
        assert_eq!(roster.records[0].date, date(2024, 3, 15));
        assert_eq!(roster.records[1].date, date(2024, 3, 16));
    }

    #[test]
    fn vertical_jitter_stays_on_one_line() {
        let mut tokens = vec![
            tok("15/03/2024", 10, 40, 0),
            tok("Día", 250, 44, 0),
            tok("Juan", 450, 37, 0),
        ];
        tokens.extend(schedule_row("16/03/2024", "Noche", &["Ana"], 100, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 2);
        assert_eq!(roster.records[0], rec(date(2024, 3, 15), ShiftLabel::Day, "Juan"));
    }

    // --- multi-person and multi-shift tests ---

    #[test]
    fn comma_separated_people_expand() {
        let tokens = schedule_row(
            "15/03/2024",
            "Día",
            &["Juan", "Pérez,", "María", "López"],
            40,
            0,
        );

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![
                rec(date(2024, 3, 15), ShiftLabel::Day, "Juan Pérez"),
                rec(date(2024, 3, 15), ShiftLabel::Day, "María López"),
            ]
        );
        assert_eq!(roster.confidence.parsed_rows, 1);
    }

    #[test]
    fn slash_separated_people_expand() {
        let tokens = schedule_row("15/03/2024", "Noche", &["Ana", "/", "Luis"], 40, 0);

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![
                rec(date(2024, 3, 15), ShiftLabel::Night, "Ana"),
                rec(date(2024, 3, 15), ShiftLabel::Night, "Luis"),
            ]
        );
    }

    #[test]
    fn semicolon_groups_pair_each_shift_with_its_people() {
        // "15/03/2024  Día Alice; Noche Bob" in one content run
        let tokens = vec![
            tok("15/03/2024", 10, 40, 0),
            tok("Día", 250, 40, 0),
            tok("Alice;", 294, 40, 0),
            tok("Noche", 374, 40, 0),
            tok("Bob", 442, 40, 0),
        ];

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![
                rec(date(2024, 3, 15), ShiftLabel::Day, "Alice"),
                rec(date(2024, 3, 15), ShiftLabel::Night, "Bob"),
            ]
        );
        assert_eq!(roster.confidence.parsed_rows, 1);
    }

    #[test]
    fn name_column_before_shift_column_still_pairs() {
        let tokens = vec![
            tok("15/03/2024", 10, 40, 0),
            tok("Juan", 250, 40, 0),
            tok("Día", 450, 40, 0),
        ];

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![rec(date(2024, 3, 15), ShiftLabel::Day, "Juan")]
        );
    }

    #[test]
    fn time_range_shift_label_is_kept_verbatim() {
        let tokens = schedule_row("15/03/2024", "08-20h", &["Ana"], 40, 0);

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(
            roster.records,
            vec![rec(
                date(2024, 3, 15),
                ShiftLabel::Custom("08-20h".to_string()),
                "Ana"
            )]
        );
    }

    #[test]
    fn duplicate_rows_are_preserved() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.extend(schedule_row("15/03/2024", "Día", &["Juan"], 80, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 2);
        assert_eq!(roster.records[0], roster.records[1]);
    }

    // --- dropped row accounting tests ---

    #[test]
    fn unparsable_date_drops_row_and_notes_it() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.extend(schedule_row("16/03/2024", "Noche", &["Ana"], 80, 0));
        tokens.extend(schedule_row("31/02/2024", "Día", &["Mario"], 120, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 2, "the impossible date never becomes a record");
        assert_eq!(roster.confidence.parsed_rows, 2);
        assert_eq!(roster.confidence.unparsed_rows, 1);
        assert_eq!(
            roster.notes,
            vec![ParseNote::DateParseError {
                page: 0,
                line: 2,
                text: "31/02/2024".to_string(),
            }]
        );
    }

    #[test]
    fn row_missing_people_counts_unparsed_without_note() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.push(tok("16/03/2024", 10, 80, 0));
        tokens.push(tok("Noche", 250, 80, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 1);
        assert_eq!(roster.confidence.unparsed_rows, 1);
        assert!(roster.notes.is_empty(), "a valid date needs no DateParseError note");
    }

    #[test]
    fn row_missing_shift_counts_unparsed() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens.push(tok("16/03/2024", 10, 80, 0));
        tokens.push(tok("Pedro", 450, 80, 0));

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.records.len(), 1);
        assert_eq!(roster.confidence.unparsed_rows, 1);
    }

    // --- page-level failure tests ---

    #[test]
    fn page_without_date_column_notes_unparsable() {
        let tokens = vec![
            tok("Reunión", 10, 40, 0),
            tok("general", 200, 40, 0),
            tok("equipo", 10, 80, 0),
            tok("médico", 200, 80, 0),
        ];

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert!(roster.records.is_empty());
        assert_eq!(roster.notes, vec![ParseNote::UnparsablePage { page: 0 }]);
        assert_eq!(roster.unparsed_page_count, 1);
    }

    #[test]
    fn empty_page_notes_unparsable() {
        let roster = ScheduleParser::new().parse(&[vec![]], &context());

        assert!(roster.records.is_empty());
        assert_eq!(roster.notes, vec![ParseNote::UnparsablePage { page: 0 }]);
        assert_eq!(roster.unparsed_page_count, 1);
    }

    #[test]
    fn bad_page_does_not_block_good_page() {
        let prose = vec![tok("Circular", 10, 40, 0), tok("interna", 200, 40, 0)];
        let table = schedule_row("15/03/2024", "Día", &["Juan"], 40, 1);

        let roster = ScheduleParser::new().parse(&[prose, table], &context());

        assert_eq!(roster.records.len(), 1);
        assert_eq!(roster.unparsed_page_count, 1);
        assert_eq!(roster.notes, vec![ParseNote::UnparsablePage { page: 0 }]);
    }

    // --- ordering and determinism tests ---

    #[test]
    fn records_follow_page_then_row_order() {
        let mut page_zero = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        page_zero.extend(schedule_row("16/03/2024", "Noche", &["Ana"], 80, 0));
        page_zero.reverse();
        let mut page_one = schedule_row("17/03/2024", "Día", &["Luis"], 40, 1);
        page_one.extend(schedule_row("18/03/2024", "Noche", &["Eva"], 80, 1));
        page_one.reverse();

        let roster = ScheduleParser::new().parse(&[page_zero, page_one], &context());

        let dates: Vec<NaiveDate> = roster.records.iter().map(|r| r.date).collect();
        assert_eq!(
            dates,
            vec![
                date(2024, 3, 15),
                date(2024, 3, 16),
                date(2024, 3, 17),
                date(2024, 3, 18),
            ]
        );
    }

    #[test]
    fn parsing_is_deterministic_and_byte_identical() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan", "Pérez,", "Ana"], 40, 0);
        tokens.extend(schedule_row("31/02/2024", "Noche", &["X"], 80, 0));
        tokens.extend(schedule_row("16/03/2024", "Noche", &["María"], 120, 0));

        let parser = ScheduleParser::new();
        let first = parser.parse(std::slice::from_ref(&tokens), &context());
        let second = parser.parse(std::slice::from_ref(&tokens), &context());

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn records_never_fabricate_dates_or_people() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan", "Pérez,", "María"], 40, 0);
        tokens.extend(schedule_row("16/03/2024", "Noche", &["Ana"], 80, 0));

        let roster = ScheduleParser::new().parse(std::slice::from_ref(&tokens), &context());

        let reference = context().reference_date;
        let token_dates: Vec<NaiveDate> = tokens
            .iter()
            .filter_map(|t| parse_date_token(&t.text, reference))
            .collect();
        assert!(!roster.records.is_empty());
        for record in &roster.records {
            assert!(
                token_dates.contains(&record.date),
                "date {} not present in any input token",
                record.date
            );
            for word in record.person.split_whitespace() {
                assert!(
                    tokens.iter().any(|t| t.text.contains(word)),
                    "person fragment {word:?} not present in any input token"
                );
            }
        }
    }

    // --- confidence accounting tests ---

    #[test]
    fn confidence_summary_counts_tokens() {
        let mut tokens = schedule_row("15/03/2024", "Día", &["Juan"], 40, 0);
        tokens[0].confidence = 1.0;
        tokens[1].confidence = 0.8;
        tokens[2].confidence = 0.2;
        tokens[2].low_confidence = true;

        let roster = ScheduleParser::new().parse(&[tokens], &context());

        assert_eq!(roster.confidence.low_confidence_tokens, 1);
        let expected_mean = (1.0 + 0.8 + 0.2) / 3.0;
        assert!((roster.confidence.mean_token_confidence - expected_mean).abs() < 1e-6);
        assert_eq!(roster.records.len(), 1, "low-confidence tokens are kept, not dropped");
    }

    #[test]
    fn empty_input_produces_empty_summary() {
        let roster = ScheduleParser::new().parse(&[], &context());

        assert!(roster.records.is_empty());
        assert_eq!(roster.confidence.mean_token_confidence, 0.0);
        assert_eq!(roster.unparsed_page_count, 0);
        assert_eq!(roster.source_id, context().source_id);
    }
}
