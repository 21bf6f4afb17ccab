//! Core domain model for DAPH: canonical posting records, shared text
//! inference rules, and scan-window selection.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "daph-core";

/// Upper bound for free-form text columns persisted downstream
/// (title, company name, location). Measured in characters, not bytes.
pub const MAX_TEXT_FIELD_LEN: usize = 100;

/// Job boards the harvester knows how to scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Pracuj,
    Indeed,
    Linkedin,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Pracuj, Source::Indeed, Source::Linkedin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Pracuj => "pracuj",
            Source::Indeed => "indeed",
            Source::Linkedin => "linkedin",
        }
    }

    pub fn parse(input: &str) -> Option<Source> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pracuj" => Some(Source::Pracuj),
            "indeed" => Some(Source::Indeed),
            "linkedin" => Some(Source::Linkedin),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seniority level inferred from title or position-level text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seniority {
    Intern,
    Junior,
    Middle,
    Senior,
}

impl Seniority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Seniority::Intern => "intern",
            Seniority::Junior => "junior",
            Seniority::Middle => "middle",
            Seniority::Senior => "senior",
        }
    }
}

impl fmt::Display for Seniority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical normalized posting. Optional fields degrade to `None` when the
/// source page does not carry them; they are never a reason to drop a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub title: String,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub published_date: Option<NaiveDate>,
    pub scraped_date: NaiveDate,
    pub requires_polish: Option<bool>,
    pub position: Option<Seniority>,
    pub source: Source,
    pub description: Option<String>,
}

/// Truncates `value` to at most `max_chars` characters. Bounded columns are
/// truncated, never rejected; the cut is on a character boundary because the
/// text routinely carries Polish diacritics.
pub fn truncate_field(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

/// Convenience wrapper applying [`MAX_TEXT_FIELD_LEN`] to an optional field.
pub fn bounded_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| truncate_field(v.trim(), MAX_TEXT_FIELD_LEN))
        .filter(|v| !v.is_empty())
}

/// One ascending bucket table per source: the widest filter each board
/// supports differs, the selection algorithm does not.
#[derive(Debug, Clone, Copy)]
pub struct WindowTable {
    buckets: &'static [(i64, &'static str)],
}

impl WindowTable {
    /// `buckets` must be ascending in `max_days`.
    pub const fn new(buckets: &'static [(i64, &'static str)]) -> Self {
        Self { buckets }
    }

    /// Picks the narrowest bucket covering the days elapsed since the last
    /// run. `None` means an unbounded scan: either the source has never been
    /// scanned, or the gap exceeds the widest filter the board offers (some
    /// postings in between may be missed; that trade-off is accepted).
    pub fn select(&self, last_run: Option<NaiveDate>, today: NaiveDate) -> Option<&'static str> {
        let last_run = last_run?;
        let delta = (today - last_run).num_days();
        self.buckets
            .iter()
            .find(|(max_days, _)| delta <= *max_days)
            .map(|(_, token)| *token)
    }
}

/// Ordered seniority keyword table. First matching row wins, so the order is
/// the tie-break priority: junior, intern, middle, senior.
pub const SENIORITY_RULES: &[(Seniority, &[&str])] = &[
    (Seniority::Junior, &["junior", "entry", "asystent"]),
    (
        Seniority::Intern,
        &["intern", "staż", "train", "praktykant"],
    ),
    (
        Seniority::Middle,
        &["mid", "associate", "assosiate", "intermediate"],
    ),
    (
        Seniority::Senior,
        &[
            "senior",
            "executive",
            "starszy",
            "lead",
            "expert",
            "ekspert",
            "kierownik",
            "koordynator",
            "manager",
            "menedżer",
            "dyrektor",
            "director",
        ],
    ),
];

/// Infers a seniority level from free text (a title or a position-level
/// block) against [`SENIORITY_RULES`].
pub fn infer_seniority(text: &str) -> Option<Seniority> {
    let lower = text.to_lowercase();
    for (level, keywords) in SENIORITY_RULES {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return Some(*level);
        }
    }
    None
}

/// Substrings that mark a title as a data-analyst posting.
pub const ANALYST_TITLE_KEYWORDS: &[&str] = &["anal", "sql", "bi", "excel"];

pub fn is_analyst_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    ANALYST_TITLE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

const POLISH_DIACRITICS: &str = "żśćźóąęłń";

/// True when the text itself is written in Polish (carries Polish
/// diacritics).
pub fn is_polish_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    POLISH_DIACRITICS.chars().any(|c| lower.contains(c))
}

/// Infers whether a posting requires Polish. An explicit mention wins; when
/// the description itself is written in Polish and English is not mentioned,
/// Polish is inferred as required. A tunable heuristic, not a classifier.
pub fn infer_polish_requirement(text: &str) -> bool {
    let lower = text.to_lowercase();
    if text.contains("Polish") || lower.contains("język polski") || lower.contains("polskiego") {
        return true;
    }
    let english_mentioned = text.contains("English") || lower.contains("angielski");
    is_polish_text(text) && !english_mentioned
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_TABLE: WindowTable =
        WindowTable::new(&[(1, "24h"), (3, "3d"), (7, "1w"), (14, "2w")]);

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn absent_watermark_selects_unbounded_window() {
        assert_eq!(TEST_TABLE.select(None, date(2024, 1, 12)), None);
    }

    #[test]
    fn window_selection_is_monotonic_over_delta() {
        let today = date(2024, 2, 1);
        let cases = [
            (0, Some("24h")),
            (1, Some("24h")),
            (3, Some("3d")),
            (7, Some("1w")),
            (14, Some("2w")),
            (30, None),
        ];
        for (delta, expected) in cases {
            let last = today - chrono::Duration::days(delta);
            assert_eq!(TEST_TABLE.select(Some(last), today), expected, "delta {delta}");
        }
    }

    #[test]
    fn truncation_cuts_exactly_at_the_bound() {
        let at_max = "x".repeat(MAX_TEXT_FIELD_LEN);
        let over_max = "x".repeat(MAX_TEXT_FIELD_LEN + 1);
        assert_eq!(truncate_field(&at_max, MAX_TEXT_FIELD_LEN), at_max);
        assert_eq!(
            truncate_field(&over_max, MAX_TEXT_FIELD_LEN).chars().count(),
            MAX_TEXT_FIELD_LEN
        );
        assert_eq!(truncate_field("short", MAX_TEXT_FIELD_LEN), "short");
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let polish = "ż".repeat(MAX_TEXT_FIELD_LEN + 5);
        let cut = truncate_field(&polish, MAX_TEXT_FIELD_LEN);
        assert_eq!(cut.chars().count(), MAX_TEXT_FIELD_LEN);
    }

    #[test]
    fn seniority_priority_order_breaks_ties() {
        // "junior" is checked before "intern" and "senior".
        assert_eq!(
            infer_seniority("Junior Intern Analyst"),
            Some(Seniority::Junior)
        );
        assert_eq!(
            infer_seniority("Senior Data Engineer"),
            Some(Seniority::Senior)
        );
        assert_eq!(
            infer_seniority("Starszy specjalista ds. danych"),
            Some(Seniority::Senior)
        );
        assert_eq!(infer_seniority("Praktykant BI"), Some(Seniority::Intern));
        assert_eq!(infer_seniority("Mid Data Analyst"), Some(Seniority::Middle));
        assert_eq!(infer_seniority("Data Analyst"), None);
    }

    #[test]
    fn explicit_polish_mention_wins() {
        assert!(infer_polish_requirement("Fluent Polish required"));
        assert!(infer_polish_requirement("wymagany język polski"));
        assert!(infer_polish_requirement("znajomość języka polskiego"));
    }

    #[test]
    fn polish_text_without_english_implies_requirement() {
        assert!(infer_polish_requirement(
            "Wymagania: doświadczenie z SQL, znajomość narzędzi BI"
        ));
        assert!(!infer_polish_requirement(
            "Wymagania: doświadczenie z SQL, English fluency"
        ));
        assert!(!infer_polish_requirement(
            "Requirements: SQL experience and dashboarding"
        ));
    }

    #[test]
    fn analyst_filter_matches_on_substrings() {
        assert!(is_analyst_title("Data Analyst"));
        assert!(is_analyst_title("SQL Developer"));
        assert!(is_analyst_title("Power BI Specialist"));
        assert!(!is_analyst_title("Frontend Developer"));
    }

    #[test]
    fn source_names_round_trip() {
        for source in Source::ALL {
            assert_eq!(Source::parse(source.as_str()), Some(source));
        }
        assert_eq!(Source::parse("unknown"), None);
    }
}
