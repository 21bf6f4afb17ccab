//! Per-source extraction: listing parsers, detail parsers, and the
//! window-token vocabulary of each job board.

use chrono::{Duration, NaiveDate};
use daph_core::{
    bounded_text, infer_polish_requirement, infer_seniority, is_analyst_title, is_polish_text,
    truncate_field, JobRecord, Source, WindowTable, MAX_TEXT_FIELD_LEN,
};
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "daph-adapters";

/// One posting located on a listing page. Listing-level fields ride along so
/// detail parsing can degrade to them when the detail payload is thinner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingRef {
    pub job_id: String,
    pub detail_url: String,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub published: Option<NaiveDate>,
}

impl PostingRef {
    fn new(job_id: String, detail_url: String) -> Self {
        Self {
            job_id,
            detail_url,
            title: None,
            company: None,
            location: None,
            published: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The one hard per-record failure: a payload whose identifying field
    /// cannot be located. A record without an id cannot be deduplicated.
    #[error("posting id missing in {0}")]
    MissingId(String),
    #[error("selector `{0}` is invalid")]
    Selector(String),
    #[error("unexpected detail payload: {0}")]
    Payload(String),
}

/// Capability set every source implements. Parsing is pure; all network I/O
/// lives in the pipeline.
pub trait SourceExtractor: Send + Sync {
    fn source(&self) -> Source;

    /// This board's time-filter vocabulary, ascending.
    fn window_table(&self) -> &'static WindowTable;

    /// Listing URL for a page index, with or without a window token.
    fn listing_url(&self, window_token: Option<&str>, page: usize) -> String;

    /// Bounded outer iteration count for one run.
    fn max_pages(&self) -> usize;

    /// Extracts posting refs from a listing page. Cards without an
    /// identifying attribute are dropped here, not surfaced as errors.
    fn parse_listing(&self, content: &str) -> Result<Vec<PostingRef>, ExtractError>;

    /// Builds the canonical record from a detail payload. Missing optional
    /// fields resolve to `None`; only a missing identifying field is an
    /// error.
    fn parse_detail(
        &self,
        content: &str,
        posting: &PostingRef,
        run_date: NaiveDate,
    ) -> Result<JobRecord, ExtractError>;
}

pub fn extractor_for(source: Source) -> Box<dyn SourceExtractor> {
    match source {
        Source::Pracuj => Box::new(PracujExtractor),
        Source::Indeed => Box::new(IndeedExtractor),
        Source::Linkedin => Box::new(LinkedinExtractor),
    }
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|_| ExtractError::Selector(selector.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn select_first_text(scope: ElementRef<'_>, selector: &str) -> Result<Option<String>, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|node| text_or_none(node.text().collect::<String>())))
}

fn select_first_attr(
    scope: ElementRef<'_>,
    selector: &str,
    attr: &str,
) -> Result<Option<String>, ExtractError> {
    let sel = parse_selector(selector)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|node| node.value().attr(attr))
        .and_then(|value| text_or_none(value.to_string())))
}

/// Language-requirement inference over an HTML description. Bullet points are
/// `<li>` tags, falling back to `<p>`; a description with no bullets at all
/// yields `None` rather than a guess.
fn polish_requirement_from_html(html: &str) -> Option<bool> {
    let fragment = Html::parse_fragment(html);
    let li = Selector::parse("li").ok()?;
    let p = Selector::parse("p").ok()?;

    let mut bullets: Vec<String> = fragment
        .select(&li)
        .filter_map(|node| text_or_none(node.text().collect::<String>()))
        .collect();
    if bullets.is_empty() {
        bullets = fragment
            .select(&p)
            .filter_map(|node| text_or_none(node.text().collect::<String>()))
            .collect();
    }
    if bullets.is_empty() {
        return None;
    }

    let mut english_mentioned = false;
    for bullet in &bullets {
        let lower = bullet.to_lowercase();
        if bullet.contains("Polish")
            || lower.contains("język polski")
            || lower.contains("polskiego")
        {
            return Some(true);
        }
        if bullet.contains("English") || lower.contains("angielski") {
            english_mentioned = true;
        }
    }

    let full_text: String = fragment.root_element().text().collect();
    Some(is_polish_text(&full_text) && !english_mentioned)
}

/// Abbreviated Polish month names, matched by substring so both "cze" and
/// "czerwca" resolve.
const POLISH_MONTHS: &[(&str, u32)] = &[
    ("sty", 1),
    ("lut", 2),
    ("mar", 3),
    ("kwi", 4),
    ("maj", 5),
    ("cze", 6),
    ("lip", 7),
    ("sie", 8),
    ("wrz", 9),
    ("paź", 10),
    ("lis", 11),
    ("gru", 12),
];

/// Parses an absolute Polish-worded date like `3 czerwca 2024`.
fn parse_polish_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split_whitespace();
    let day: u32 = parts.next()?.parse().ok()?;
    let month_name = parts.next()?.to_lowercase();
    let year: i32 = parts.next()?.parse().ok()?;
    let month = POLISH_MONTHS
        .iter()
        .find(|(abbrev, _)| month_name.contains(abbrev))
        .map(|(_, number)| *number)?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Converts a relative-age string (`Dzisiaj`, `wczoraj`, `5 dni temu`) into
/// days before the run date.
fn parse_relative_age(interval: &str) -> Option<i64> {
    let trimmed = interval.trim();
    let lower = trimmed.to_lowercase();
    if lower == "dzisiaj" || lower.contains("przed chwilą") {
        return Some(0);
    }
    if lower == "wczoraj" {
        return Some(1);
    }
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

// ---------------------------------------------------------------------------
// Pracuj
// ---------------------------------------------------------------------------

pub static PRACUJ_WINDOWS: WindowTable = WindowTable::new(&[
    (1, "ostatnich%2024h;p,1"),
    (3, "ostatnich%203%20dni;p,3"),
    (7, "ostatnich%207%20dni;p,7"),
    (14, "ostatnich%2014%20dni;p,14"),
    (30, "ostatnich%2030%20dni;p,30"),
]);

#[derive(Debug, Clone, Copy)]
pub struct PracujExtractor;

impl PracujExtractor {
    fn card_to_ref(&self, card: ElementRef<'_>) -> Result<Option<PostingRef>, ExtractError> {
        let Some(job_id) = card
            .value()
            .attr("data-test-offerid")
            .and_then(|id| text_or_none(id.to_string()))
        else {
            return Ok(None);
        };

        let title = select_first_text(card, r#"h2[data-test="offer-title"]"#)?;
        if let Some(title) = &title {
            if !is_analyst_title(title) {
                return Ok(None);
            }
        }

        let detail_url = select_first_attr(card, "a[href]", "href")?
            .unwrap_or_else(|| format!("https://www.pracuj.pl/praca/oferta,{job_id}"));
        let published = select_first_text(card, r#"p[data-test="text-added"]"#)?
            .and_then(|added| parse_polish_date(added.rsplit(": ").next().unwrap_or(&added)));

        Ok(Some(PostingRef {
            job_id,
            detail_url,
            title,
            company: None,
            location: None,
            published,
        }))
    }
}

impl SourceExtractor for PracujExtractor {
    fn source(&self) -> Source {
        Source::Pracuj
    }

    fn window_table(&self) -> &'static WindowTable {
        &PRACUJ_WINDOWS
    }

    fn listing_url(&self, window_token: Option<&str>, page: usize) -> String {
        let mut url = String::from("https://it.pracuj.pl/praca/data%20analyst;kw/");
        if let Some(token) = window_token {
            url.push_str(token);
        }
        if page > 0 {
            url.push_str(&format!("?pn={}", page + 1));
        }
        url
    }

    fn max_pages(&self) -> usize {
        50
    }

    fn parse_listing(&self, content: &str) -> Result<Vec<PostingRef>, ExtractError> {
        let document = Html::parse_document(content);
        let mut refs = Vec::new();
        // Promoted cards come first, matching their placement on the board.
        for selector in [
            r#"div[data-test="positioned-offer"]"#,
            r#"div[data-test="default-offer"]"#,
        ] {
            let sel = parse_selector(selector)?;
            for card in document.select(&sel) {
                if let Some(posting) = self.card_to_ref(card)? {
                    refs.push(posting);
                }
            }
        }
        Ok(refs)
    }

    fn parse_detail(
        &self,
        content: &str,
        posting: &PostingRef,
        run_date: NaiveDate,
    ) -> Result<JobRecord, ExtractError> {
        let document = Html::parse_document(content);
        let root = document.root_element();

        let title = select_first_text(root, r#"h1[data-scroll-id="job-title"]"#)?
            .or_else(|| posting.title.clone())
            .unwrap_or_default();
        let company = select_first_text(root, r#"h2[data-test="text-employerName"]"#)?;
        let location = select_first_text(root, r#"li[data-scroll-id="workplaces"]"#)?;
        let position_level = select_first_text(root, r#"li[data-scroll-id="position-levels"]"#)?;
        let description = select_first_text(root, r#"div[data-scroll-id="requirements-expected-1"]"#)?;

        let position = position_level
            .as_deref()
            .and_then(infer_seniority)
            .or_else(|| infer_seniority(&title));
        let requires_polish = description.as_deref().map(infer_polish_requirement);

        Ok(JobRecord {
            job_id: posting.job_id.clone(),
            title: truncate_field(&title, MAX_TEXT_FIELD_LEN),
            company_name: bounded_text(company),
            location: bounded_text(location),
            published_date: posting.published,
            scraped_date: run_date,
            requires_polish,
            position,
            source: Source::Pracuj,
            description,
        })
    }
}

// ---------------------------------------------------------------------------
// Indeed
// ---------------------------------------------------------------------------

pub static INDEED_WINDOWS: WindowTable =
    WindowTable::new(&[(1, "1"), (3, "3"), (7, "7"), (14, "14")]);

#[derive(Debug, Clone, Copy)]
pub struct IndeedExtractor;

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

impl SourceExtractor for IndeedExtractor {
    fn source(&self) -> Source {
        Source::Indeed
    }

    fn window_table(&self) -> &'static WindowTable {
        &INDEED_WINDOWS
    }

    fn listing_url(&self, window_token: Option<&str>, page: usize) -> String {
        let mut url = format!(
            "https://pl.indeed.com/jobs?q=data+analyst&l=Polska&start={}",
            page * 10
        );
        if let Some(token) = window_token {
            url.push_str(&format!("&fromage={token}"));
        }
        url
    }

    fn max_pages(&self) -> usize {
        100
    }

    fn parse_listing(&self, content: &str) -> Result<Vec<PostingRef>, ExtractError> {
        let document = Html::parse_document(content);
        let sel = parse_selector("a[data-jk]")?;
        let mut refs = Vec::new();
        for anchor in document.select(&sel) {
            let Some(job_id) = anchor
                .value()
                .attr("data-jk")
                .and_then(|id| text_or_none(id.to_string()))
            else {
                continue;
            };
            let detail_url = format!(
                "https://pl.indeed.com/viewjob?jk={job_id}&from=vjs&viewtype=embedded&spa=1&hidecmpheader=0"
            );
            refs.push(PostingRef::new(job_id, detail_url));
        }
        Ok(refs)
    }

    fn parse_detail(
        &self,
        content: &str,
        posting: &PostingRef,
        run_date: NaiveDate,
    ) -> Result<JobRecord, ExtractError> {
        let payload: JsonValue = serde_json::from_str(content)
            .map_err(|err| ExtractError::Payload(format!("invalid detail JSON: {err}")))?;

        let job = json_at(
            &payload,
            &["body", "hostQueryExecutionResult", "data", "jobData", "results"],
        )
        .and_then(|results| results.get(0))
        .and_then(|first| first.get("job"))
        .ok_or_else(|| ExtractError::Payload("job node missing".into()))?;

        let job_id = json_str(job, &["key"])
            .map(str::to_string)
            .ok_or_else(|| ExtractError::MissingId(posting.detail_url.clone()))?;

        let title = json_str(job, &["title"]).unwrap_or_default();
        let company = json_str(job, &["sourceEmployerName"]).map(str::to_string);
        let location = json_str(job, &["location", "city"]).map(str::to_string);
        let description_text = json_str(job, &["description", "text"])
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());
        let description_html = json_str(job, &["description", "html"]);

        let published = json_str(&payload, &["body", "hiringInsightsModel", "age"])
            .and_then(parse_relative_age)
            .map(|days| run_date - Duration::days(days));
        let requires_polish = description_html.and_then(polish_requirement_from_html);

        Ok(JobRecord {
            job_id,
            title: truncate_field(title, MAX_TEXT_FIELD_LEN),
            company_name: bounded_text(company),
            location: bounded_text(location),
            published_date: published,
            scraped_date: run_date,
            requires_polish,
            position: infer_seniority(title),
            source: Source::Indeed,
            description: description_text,
        })
    }
}

// ---------------------------------------------------------------------------
// LinkedIn
// ---------------------------------------------------------------------------

pub static LINKEDIN_WINDOWS: WindowTable =
    WindowTable::new(&[(1, "r86400"), (7, "r604800"), (30, "r2592000")]);

#[derive(Debug, Clone, Copy)]
pub struct LinkedinExtractor;

impl LinkedinExtractor {
    /// The job id is the trailing dash-segment of the card url, before the
    /// query string.
    fn job_id_from_url(card_url: &str) -> Option<String> {
        let without_query = card_url.split('?').next().unwrap_or(card_url);
        let id = without_query.rsplit('-').next().unwrap_or_default();
        text_or_none(id.to_string())
    }

    /// `"City, Voivodship, Country"` collapses to the voivodship; anything
    /// else passes through untouched.
    fn parse_location(location: &str) -> String {
        let parts: Vec<&str> = location.split(',').collect();
        if parts.len() == 3 {
            parts[1].trim().to_string()
        } else {
            location.to_string()
        }
    }

    fn card_to_ref(&self, card: ElementRef<'_>) -> Result<Option<PostingRef>, ExtractError> {
        let Some(card_url) = select_first_attr(card, "a.base-card__full-link", "href")? else {
            return Ok(None);
        };
        let Some(job_id) = Self::job_id_from_url(&card_url) else {
            return Ok(None);
        };

        let title = select_first_text(card, "span.sr-only")?;
        if let Some(title) = &title {
            if !is_analyst_title(title) {
                return Ok(None);
            }
        }

        let company = select_first_text(card, "h4.base-search-card__subtitle a")?;
        let location = select_first_text(card, "span.job-search-card__location")?
            .map(|loc| Self::parse_location(&loc));
        let published = select_first_attr(card, "time", "datetime")?
            .and_then(|datetime| NaiveDate::parse_from_str(datetime.trim(), "%Y-%m-%d").ok());

        let detail_url = format!(
            "https://www.linkedin.com/jobs-guest/jobs/api/jobPosting/{job_id}"
        );

        Ok(Some(PostingRef {
            job_id,
            detail_url,
            title,
            company,
            location,
            published,
        }))
    }
}

impl SourceExtractor for LinkedinExtractor {
    fn source(&self) -> Source {
        Source::Linkedin
    }

    fn window_table(&self) -> &'static WindowTable {
        &LINKEDIN_WINDOWS
    }

    fn listing_url(&self, window_token: Option<&str>, page: usize) -> String {
        let mut url = format!(
            "https://www.linkedin.com/jobs-guest/jobs/api/seeMoreJobPostings/search?keywords=data%20analyst&location=Polska&start={}",
            page * 10
        );
        if let Some(token) = window_token {
            url.push_str(&format!("&f_TPR={token}"));
        }
        url
    }

    fn max_pages(&self) -> usize {
        10
    }

    fn parse_listing(&self, content: &str) -> Result<Vec<PostingRef>, ExtractError> {
        let document = Html::parse_document(content);
        let sel = parse_selector("div.base-search-card")?;
        let mut refs = Vec::new();
        for card in document.select(&sel) {
            if let Some(posting) = self.card_to_ref(card)? {
                refs.push(posting);
            }
        }
        Ok(refs)
    }

    fn parse_detail(
        &self,
        content: &str,
        posting: &PostingRef,
        run_date: NaiveDate,
    ) -> Result<JobRecord, ExtractError> {
        let document = Html::parse_document(content);
        let root = document.root_element();

        let description = select_first_text(root, "div.show-more-less-html__markup")?;
        let requires_polish = polish_requirement_from_html(content);
        let title = posting.title.clone().unwrap_or_default();

        Ok(JobRecord {
            job_id: posting.job_id.clone(),
            title: truncate_field(&title, MAX_TEXT_FIELD_LEN),
            company_name: bounded_text(posting.company.clone()),
            location: bounded_text(posting.location.clone()),
            published_date: posting.published,
            scraped_date: run_date,
            requires_polish,
            position: infer_seniority(&title),
            source: Source::Linkedin,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn polish_dates_parse_by_month_abbreviation() {
        assert_eq!(parse_polish_date("3 czerwca 2024"), Some(date(2024, 6, 3)));
        assert_eq!(parse_polish_date("15 paź 2023"), Some(date(2023, 10, 15)));
        assert_eq!(parse_polish_date("not a date"), None);
    }

    #[test]
    fn relative_ages_resolve_to_day_offsets() {
        assert_eq!(parse_relative_age("Dzisiaj"), Some(0));
        assert_eq!(parse_relative_age("Dodano przed chwilą"), Some(0));
        assert_eq!(parse_relative_age("wczoraj"), Some(1));
        assert_eq!(parse_relative_age("5 dni temu"), Some(5));
        assert_eq!(parse_relative_age("dawno"), None);
    }

    #[test]
    fn bullet_inference_reads_li_then_p_then_gives_up() {
        assert_eq!(
            polish_requirement_from_html("<ul><li>Polish fluency</li></ul>"),
            Some(true)
        );
        assert_eq!(
            polish_requirement_from_html("<p>znajomość języka polskiego</p>"),
            Some(true)
        );
        assert_eq!(
            polish_requirement_from_html(
                "<ul><li>doświadczenie z SQL</li><li>English required</li></ul>"
            ),
            Some(false)
        );
        assert_eq!(
            polish_requirement_from_html("<ul><li>doświadczenie z narzędziami BI</li></ul>"),
            Some(true)
        );
        assert_eq!(polish_requirement_from_html("<div>no bullets here</div>"), None);
    }

    const PRACUJ_LISTING: &str = r#"
        <html><body>
          <div data-test="positioned-offer" data-test-offerid="900001">
            <h2 data-test="offer-title">Senior Data Analyst</h2>
            <a href="https://www.pracuj.pl/praca/senior-data-analyst,oferta,900001"></a>
            <p data-test="text-added">Opublikowana: 3 czerwca 2024</p>
          </div>
          <div data-test="default-offer" data-test-offerid="900002">
            <h2 data-test="offer-title">Junior SQL Developer</h2>
            <a href="https://www.pracuj.pl/praca/junior-sql,oferta,900002"></a>
            <p data-test="text-added">Opublikowana: 1 czerwca 2024</p>
          </div>
          <div data-test="default-offer" data-test-offerid="900003">
            <h2 data-test="offer-title">Magazynier</h2>
            <a href="https://www.pracuj.pl/praca/magazynier,oferta,900003"></a>
          </div>
          <div data-test="default-offer">
            <h2 data-test="offer-title">BI Analyst without id</h2>
          </div>
        </body></html>"#;

    #[test]
    fn pracuj_listing_keeps_analyst_cards_with_ids() {
        let refs = PracujExtractor.parse_listing(PRACUJ_LISTING).expect("parse");
        assert_eq!(refs.len(), 2);
        // Promoted card first.
        assert_eq!(refs[0].job_id, "900001");
        assert_eq!(refs[0].published, Some(date(2024, 6, 3)));
        assert_eq!(refs[1].job_id, "900002");
        assert!(refs[1].detail_url.contains("oferta,900002"));
    }

    #[test]
    fn pracuj_detail_degrades_missing_fields_to_none() {
        let detail = r#"
            <html><body>
              <h1 data-scroll-id="job-title">Junior Data Analyst</h1>
              <li data-scroll-id="position-levels">praktykant / stażysta</li>
            </body></html>"#;
        let posting = PostingRef::new("900002".into(), "https://example/detail".into());
        let record = PracujExtractor
            .parse_detail(detail, &posting, date(2024, 6, 5))
            .expect("record");

        assert_eq!(record.job_id, "900002");
        assert_eq!(record.title, "Junior Data Analyst");
        assert_eq!(record.company_name, None);
        assert_eq!(record.location, None);
        assert_eq!(record.description, None);
        assert_eq!(record.requires_polish, None);
        // Position-levels text wins over the title.
        assert_eq!(record.position, Some(daph_core::Seniority::Intern));
        assert_eq!(record.scraped_date, date(2024, 6, 5));
    }

    fn indeed_detail_json(key: Option<&str>) -> String {
        let key_field = key
            .map(|k| format!(r#""key": "{k}","#))
            .unwrap_or_default();
        format!(
            r#"{{
              "body": {{
                "hostQueryExecutionResult": {{
                  "data": {{
                    "jobData": {{
                      "results": [
                        {{
                          "job": {{
                            {key_field}
                            "title": "Senior Data Analyst",
                            "sourceEmployerName": "Acme Analytics",
                            "location": {{"city": "Warszawa"}},
                            "description": {{
                              "html": "<ul><li>doświadczenie z SQL</li><li>znajomość narzędzi BI</li></ul>",
                              "text": "doświadczenie z SQL, znajomość narzędzi BI"
                            }}
                          }}
                        }}
                      ]
                    }}
                  }}
                }},
                "hiringInsightsModel": {{"age": "3 dni temu"}}
              }}
            }}"#
        )
    }

    #[test]
    fn indeed_detail_builds_a_full_record() {
        let posting = PostingRef::new("abc123".into(), "https://example/viewjob".into());
        let record = IndeedExtractor
            .parse_detail(&indeed_detail_json(Some("abc123")), &posting, date(2024, 1, 12))
            .expect("record");

        assert_eq!(record.job_id, "abc123");
        assert_eq!(record.title, "Senior Data Analyst");
        assert_eq!(record.company_name.as_deref(), Some("Acme Analytics"));
        assert_eq!(record.location.as_deref(), Some("Warszawa"));
        assert_eq!(record.published_date, Some(date(2024, 1, 9)));
        assert_eq!(record.requires_polish, Some(true));
        assert_eq!(record.position, Some(daph_core::Seniority::Senior));
        assert_eq!(record.source, Source::Indeed);
    }

    #[test]
    fn indeed_detail_without_key_is_a_hard_failure() {
        let posting = PostingRef::new("abc123".into(), "https://example/viewjob".into());
        let err = IndeedExtractor
            .parse_detail(&indeed_detail_json(None), &posting, date(2024, 1, 12))
            .expect_err("must fail");
        assert!(matches!(err, ExtractError::MissingId(_)));
    }

    #[test]
    fn indeed_listing_collects_ids_from_anchors() {
        let listing = r##"
            <html><body>
              <a data-jk="A" href="#">Data Analyst</a>
              <a data-jk="B" href="#">Analityk danych</a>
              <a href="#">no id</a>
            </body></html>"##;
        let refs = IndeedExtractor.parse_listing(listing).expect("parse");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].job_id, "A");
        assert!(refs[0].detail_url.contains("jk=A"));
    }

    #[test]
    fn indeed_window_tokens_follow_the_fromage_vocabulary() {
        let today = date(2024, 1, 12);
        let token = INDEED_WINDOWS.select(Some(date(2024, 1, 10)), today);
        assert_eq!(token, Some("3"));
        let url = IndeedExtractor.listing_url(token, 0);
        assert!(url.contains("&fromage=3"));
        assert!(IndeedExtractor.listing_url(None, 2).contains("start=20"));
    }

    const LINKEDIN_LISTING: &str = r#"
        <html><body>
          <div class="base-search-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/data-analyst-3801234567?refId=x"></a>
            <span class="sr-only">Data Analyst</span>
            <h4 class="base-search-card__subtitle"><a>DataWorks</a></h4>
            <span class="job-search-card__location">Kraków, Małopolskie, Poland</span>
            <time datetime="2024-01-11"></time>
          </div>
          <div class="base-search-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/chef-3809999999?refId=y"></a>
            <span class="sr-only">Chef de Partie</span>
          </div>
        </body></html>"#;

    #[test]
    fn linkedin_listing_extracts_card_fields_and_filters_titles() {
        let refs = LinkedinExtractor.parse_listing(LINKEDIN_LISTING).expect("parse");
        assert_eq!(refs.len(), 1);
        let posting = &refs[0];
        assert_eq!(posting.job_id, "3801234567");
        assert_eq!(posting.title.as_deref(), Some("Data Analyst"));
        assert_eq!(posting.company.as_deref(), Some("DataWorks"));
        assert_eq!(posting.location.as_deref(), Some("Małopolskie"));
        assert_eq!(posting.published, Some(date(2024, 1, 11)));
        assert!(posting.detail_url.ends_with("/jobPosting/3801234567"));
    }

    #[test]
    fn linkedin_detail_attaches_description_and_language_flag() {
        let detail = r#"
            <html><body>
              <div class="show-more-less-html__markup">
                <ul><li>Wymagana znajomość języka polskiego</li></ul>
              </ul></div>
            </body></html>"#;
        let mut posting = PostingRef::new(
            "3801234567".into(),
            "https://www.linkedin.com/jobs-guest/jobs/api/jobPosting/3801234567".into(),
        );
        posting.title = Some("Data Analyst".into());
        posting.company = Some("DataWorks".into());
        posting.location = Some("Małopolskie".into());
        posting.published = Some(date(2024, 1, 11));

        let record = LinkedinExtractor
            .parse_detail(detail, &posting, date(2024, 1, 12))
            .expect("record");
        assert_eq!(record.title, "Data Analyst");
        assert_eq!(record.company_name.as_deref(), Some("DataWorks"));
        assert_eq!(record.requires_polish, Some(true));
        assert!(record
            .description
            .as_deref()
            .expect("description")
            .contains("języka polskiego"));
    }

    #[test]
    fn linkedin_job_ids_come_from_the_url_tail() {
        assert_eq!(
            LinkedinExtractor::job_id_from_url(
                "https://www.linkedin.com/jobs/view/data-analyst-12345?refId=abc"
            ),
            Some("12345".to_string())
        );
        assert_eq!(LinkedinExtractor::job_id_from_url(""), None);
    }

    #[test]
    fn every_source_resolves_an_extractor() {
        for source in Source::ALL {
            assert_eq!(extractor_for(source).source(), source);
        }
    }
}
