//! Incremental ingestion runs: watermark state, id-based dedup,
//! column-consistent batch accumulation, and durable sinks.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, NaiveDate, Utc};
use daph_adapters::{extractor_for, ExtractError, SourceExtractor};
use daph_core::{JobRecord, Seniority, Source};
use daph_fetch::{DelayRange, FetchFailure, FetchPolicy, IdentityRotator, ResilientFetcher};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "daph-pipeline";

// ---------------------------------------------------------------------------
// Watermark store
// ---------------------------------------------------------------------------

/// Per-source last-run date, one plain-text ISO-date file per source.
/// An absent file is the "never run" state, not an error.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    dir: PathBuf,
}

impl WatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, source: Source) -> PathBuf {
        self.dir.join(format!("{source}_last_run.txt"))
    }

    pub fn load(&self, source: Source) -> Result<Option<NaiveDate>> {
        let path = self.path_for(source);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading watermark {}", path.display()))
            }
        };
        let date = text
            .trim()
            .parse::<NaiveDate>()
            .with_context(|| format!("parsing watermark {}", path.display()))?;
        Ok(Some(date))
    }

    pub fn save(&self, source: Source, date: NaiveDate) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating state directory {}", self.dir.display()))?;
        let path = self.path_for(source);
        fs::write(&path, format!("{date}\n"))
            .with_context(|| format!("writing watermark {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Dedup filter
// ---------------------------------------------------------------------------

/// Admission filter over previously ingested ids. The set can grow to the
/// full historical corpus of a source, so lookups must stay O(1).
#[derive(Debug, Default)]
pub struct DedupFilter {
    known: HashSet<String>,
}

impl DedupFilter {
    pub fn new(known: HashSet<String>) -> Self {
        Self { known }
    }

    /// Returns false for an already-seen id; on admission the id becomes
    /// known for the remainder of the run.
    pub fn admit(&mut self, job_id: &str) -> bool {
        self.known.insert(job_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Batch accumulator
// ---------------------------------------------------------------------------

/// Parallel field-columns for one run's admitted records. `push` appends
/// every column as one step; `truncate_to_min_length` is the last-resort
/// repair that restores the equal-length invariant before a flush.
#[derive(Debug, Default)]
pub struct JobBatch {
    job_id: Vec<String>,
    title: Vec<String>,
    company_name: Vec<Option<String>>,
    location: Vec<Option<String>>,
    published_date: Vec<Option<NaiveDate>>,
    scraped_date: Vec<NaiveDate>,
    requires_polish: Vec<Option<bool>>,
    position: Vec<Option<Seniority>>,
    source: Vec<Source>,
    description: Vec<Option<String>>,
}

impl JobBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append-none-or-append-all: a fully constructed record lands in every
    /// column, nothing else ever touches the columns.
    pub fn push(&mut self, record: JobRecord) {
        self.job_id.push(record.job_id);
        self.title.push(record.title);
        self.company_name.push(record.company_name);
        self.location.push(record.location);
        self.published_date.push(record.published_date);
        self.scraped_date.push(record.scraped_date);
        self.requires_polish.push(record.requires_polish);
        self.position.push(record.position);
        self.source.push(record.source);
        self.description.push(record.description);
    }

    pub fn len(&self) -> usize {
        self.job_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.job_id.is_empty()
    }

    pub fn column_lengths(&self) -> [usize; 10] {
        [
            self.job_id.len(),
            self.title.len(),
            self.company_name.len(),
            self.location.len(),
            self.published_date.len(),
            self.scraped_date.len(),
            self.requires_polish.len(),
            self.position.len(),
            self.source.len(),
            self.description.len(),
        ]
    }

    /// Trims every column to the shortest column's length, discarding any
    /// partially written trailing record. Returns the number of rows dropped
    /// from the longest column.
    pub fn truncate_to_min_length(&mut self) -> usize {
        let lengths = self.column_lengths();
        let min = *lengths.iter().min().unwrap_or(&0);
        let max = *lengths.iter().max().unwrap_or(&0);
        self.job_id.truncate(min);
        self.title.truncate(min);
        self.company_name.truncate(min);
        self.location.truncate(min);
        self.published_date.truncate(min);
        self.scraped_date.truncate(min);
        self.requires_polish.truncate(min);
        self.position.truncate(min);
        self.source.truncate(min);
        self.description.truncate(min);
        max - min
    }

    fn csv_row(&self, idx: usize) -> [String; 10] {
        [
            self.job_id[idx].clone(),
            self.title[idx].clone(),
            self.company_name[idx].clone().unwrap_or_default(),
            self.location[idx].clone().unwrap_or_default(),
            self.published_date[idx]
                .map(|d| d.to_string())
                .unwrap_or_default(),
            self.scraped_date[idx].to_string(),
            self.requires_polish[idx]
                .map(|b| b.to_string())
                .unwrap_or_default(),
            self.position[idx]
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
            self.source[idx].as_str().to_string(),
            self.description[idx].clone().unwrap_or_default(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Durable destination for a run's batch. Idempotent on schema, not on
/// content: duplicates are prevented upstream by the dedup filter.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Ids already persisted for a source, used to seed the dedup filter.
    async fn known_ids(&self, source: Source) -> Result<HashSet<String>>;

    /// Appends the whole batch; returns the number of rows written.
    async fn append(&self, batch: &JobBatch) -> Result<usize>;
}

const CSV_HEADER: [&str; 10] = [
    "job_id",
    "title",
    "company_name",
    "location",
    "published_date",
    "scraped_date",
    "requires_polish",
    "position",
    "source",
    "description",
];

/// Append-only tabular file. A missing file is created with the header row;
/// an existing file gets rows appended without one.
#[derive(Debug, Clone)]
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for CsvSink {
    async fn known_ids(&self, source: Source) -> Result<HashSet<String>> {
        if !self.path.exists() {
            return Ok(HashSet::new());
        }
        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let headers = reader
            .headers()
            .with_context(|| format!("reading header of {}", self.path.display()))?
            .clone();
        let id_idx = headers
            .iter()
            .position(|h| h == "job_id")
            .context("output file has no job_id column")?;
        let source_idx = headers
            .iter()
            .position(|h| h == "source")
            .context("output file has no source column")?;

        let mut ids = HashSet::new();
        for record in reader.records() {
            let record =
                record.with_context(|| format!("reading row of {}", self.path.display()))?;
            if record.get(source_idx) == Some(source.as_str()) {
                if let Some(id) = record.get(id_idx) {
                    ids.insert(id.to_string());
                }
            }
        }
        Ok(ids)
    }

    async fn append(&self, batch: &JobBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }

        let write_header = !self.path.exists();
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if write_header {
            writer
                .write_record(CSV_HEADER)
                .context("writing csv header")?;
        }
        for idx in 0..batch.len() {
            writer
                .write_record(&batch.csv_row(idx))
                .with_context(|| format!("writing row {idx}"))?;
        }
        writer.flush().context("flushing csv output")?;
        Ok(batch.len())
    }
}

/// Insert-only relational sink. The table keeps a primary key on the
/// source-native id; `is_degree_required` and `technologies_found` stay
/// null here and are populated by the downstream enrichment step.
pub struct PostgresSink {
    pool: PgPool,
}

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS postings (
    job_id VARCHAR(100) PRIMARY KEY,
    title VARCHAR(150),
    company_name VARCHAR(150),
    location VARCHAR(150),
    published_date DATE,
    scraped_date DATE,
    requires_polish BOOLEAN,
    is_degree_required BOOLEAN,
    position VARCHAR(30),
    technologies_found TEXT,
    source VARCHAR(20),
    description TEXT
)
"#;

impl PostgresSink {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        sqlx::query(CREATE_TABLE_SQL)
            .execute(&pool)
            .await
            .context("ensuring postings table exists")?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn known_ids(&self, source: Source) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT job_id FROM postings WHERE source = $1")
            .bind(source.as_str())
            .fetch_all(&self.pool)
            .await
            .context("selecting known ids")?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("job_id"))
            .collect())
    }

    async fn append(&self, batch: &JobBatch) -> Result<usize> {
        for idx in 0..batch.len() {
            sqlx::query(
                r#"
                INSERT INTO postings
                    (job_id, title, company_name, location, published_date,
                     scraped_date, requires_polish, position, source, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(&batch.job_id[idx])
            .bind(&batch.title[idx])
            .bind(&batch.company_name[idx])
            .bind(&batch.location[idx])
            .bind(batch.published_date[idx])
            .bind(batch.scraped_date[idx])
            .bind(batch.requires_polish[idx])
            .bind(batch.position[idx].map(|p| p.as_str()))
            .bind(batch.source[idx].as_str())
            .bind(&batch.description[idx])
            .execute(&self.pool)
            .await
            .with_context(|| format!("inserting posting {}", batch.job_id[idx]))?;
        }
        Ok(batch.len())
    }
}

// ---------------------------------------------------------------------------
// Page source seam
// ---------------------------------------------------------------------------

/// Fetch seam between the pipeline and the network, so runs can be driven
/// against canned pages in tests.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn get_page(&self, url: &str) -> Result<String, FetchFailure>;
}

#[async_trait]
impl PageSource for ResilientFetcher {
    async fn get_page(&self, url: &str) -> Result<String, FetchFailure> {
        self.fetch_text(url).await
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Knobs for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub run_date: NaiveDate,
    pub page_delay: DelayRange,
    pub detail_delay: DelayRange,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub source: Source,
    pub window_token: Option<String>,
    pub pages_scanned: usize,
    pub pages_unreachable: usize,
    pub listed: usize,
    pub skipped_known: usize,
    pub skipped_unreachable: usize,
    pub dropped_invalid: usize,
    pub admitted: usize,
    pub repaired_rows: usize,
    pub flushed: usize,
    pub aborted: bool,
}

impl RunSummary {
    fn new(run_id: Uuid, source: Source, window_token: Option<&str>) -> Self {
        Self {
            run_id,
            source,
            window_token: window_token.map(str::to_string),
            pages_scanned: 0,
            pages_unreachable: 0,
            listed: 0,
            skipped_known: 0,
            skipped_unreachable: 0,
            dropped_invalid: 0,
            admitted: 0,
            repaired_rows: 0,
            flushed: 0,
            aborted: false,
        }
    }
}

/// One incremental ingestion run for one source: watermark window, paginated
/// listing scan, dedup, detail extraction, batch flush.
pub struct IngestPipeline {
    extractor: Box<dyn SourceExtractor>,
    pages: Arc<dyn PageSource>,
    sinks: Vec<Arc<dyn Sink>>,
    watermarks: WatermarkStore,
    options: RunOptions,
}

impl IngestPipeline {
    pub fn new(
        extractor: Box<dyn SourceExtractor>,
        pages: Arc<dyn PageSource>,
        sinks: Vec<Arc<dyn Sink>>,
        watermarks: WatermarkStore,
        options: RunOptions,
    ) -> Self {
        Self {
            extractor,
            pages,
            sinks,
            watermarks,
            options,
        }
    }

    /// Runs the scan and always finishes with the repair/flush/watermark
    /// epilogue, whether the scan completed or aborted. Setup failures before
    /// any scanning propagate without advancing the watermark.
    pub async fn run(&self) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let source = self.extractor.source();

        let last_run = self.watermarks.load(source)?;
        let token = self
            .extractor
            .window_table()
            .select(last_run, self.options.run_date);

        let mut known = HashSet::new();
        for sink in &self.sinks {
            known.extend(sink.known_ids(source).await?);
        }
        let mut dedup = DedupFilter::new(known);
        let mut batch = JobBatch::new();
        let mut summary = RunSummary::new(run_id, source, token);

        info!(
            %run_id,
            %source,
            window = ?token,
            last_run = ?last_run,
            known_ids = dedup.len(),
            "ingestion run started"
        );

        if let Err(err) = self
            .scan(token, &mut dedup, &mut batch, &mut summary)
            .await
        {
            error!(
                %run_id,
                %source,
                at = %Utc::now().to_rfc3339(),
                cause = %format!("{err:#}"),
                "run aborted; flushing what was accumulated"
            );
            summary.aborted = true;
        }

        summary.repaired_rows = batch.truncate_to_min_length();
        if summary.repaired_rows > 0 {
            warn!(
                %run_id,
                repaired = summary.repaired_rows,
                "column lengths repaired before flush"
            );
        }

        let mut flush_error: Option<anyhow::Error> = None;
        for sink in &self.sinks {
            match sink.append(&batch).await {
                Ok(written) => summary.flushed = written,
                Err(err) => {
                    error!(%run_id, cause = %format!("{err:#}"), "sink flush failed");
                    flush_error.get_or_insert(err);
                }
            }
        }

        // The watermark advances even on an aborted run: re-scanning the same
        // window forever costs more than the postings a partial run missed.
        self.watermarks.save(source, self.options.run_date)?;

        if let Some(err) = flush_error {
            return Err(err.context("flushing batch"));
        }

        info!(
            %run_id,
            %source,
            pages = summary.pages_scanned,
            listed = summary.listed,
            admitted = summary.admitted,
            skipped_known = summary.skipped_known,
            flushed = summary.flushed,
            aborted = summary.aborted,
            "ingestion run finished"
        );
        Ok(summary)
    }

    async fn scan(
        &self,
        token: Option<&str>,
        dedup: &mut DedupFilter,
        batch: &mut JobBatch,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for page in 0..self.extractor.max_pages() {
            if page > 0 {
                self.options.page_delay.pause().await;
            }
            let listing_url = self.extractor.listing_url(token, page);
            let listing = match self.pages.get_page(&listing_url).await {
                Ok(listing) => listing,
                Err(err) => {
                    warn!(url = %listing_url, %err, "listing page unreachable, skipping");
                    summary.pages_unreachable += 1;
                    continue;
                }
            };
            summary.pages_scanned += 1;

            let postings = self.extractor.parse_listing(&listing)?;
            if postings.is_empty() {
                break;
            }

            for posting in postings {
                summary.listed += 1;
                if !dedup.admit(&posting.job_id) {
                    summary.skipped_known += 1;
                    continue;
                }

                self.options.detail_delay.pause().await;
                let detail = match self.pages.get_page(&posting.detail_url).await {
                    Ok(detail) => detail,
                    Err(err) => {
                        warn!(url = %posting.detail_url, %err, "detail unreachable, skipping posting");
                        summary.skipped_unreachable += 1;
                        continue;
                    }
                };

                match self
                    .extractor
                    .parse_detail(&detail, &posting, self.options.run_date)
                {
                    Ok(record) => {
                        batch.push(record);
                        summary.admitted += 1;
                    }
                    Err(ExtractError::MissingId(target)) => {
                        warn!(%target, "posting without identifying field dropped");
                        summary.dropped_invalid += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Environment-driven configuration with defaults for every knob.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub state_dir: PathBuf,
    pub csv_path: PathBuf,
    pub proxy_file: PathBuf,
    pub database_url: Option<String>,
    pub max_fetch_attempts: usize,
    pub http_timeout_secs: u64,
    pub page_delay: DelayRange,
    pub detail_delay: DelayRange,
}

impl PipelineSettings {
    pub fn from_env() -> Self {
        Self {
            state_dir: std::env::var("DAPH_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./state")),
            csv_path: std::env::var("DAPH_CSV_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/postings.csv")),
            proxy_file: std::env::var("DAPH_PROXY_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./proxies.txt")),
            database_url: std::env::var("DATABASE_URL").ok(),
            max_fetch_attempts: std::env::var("DAPH_MAX_FETCH_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            http_timeout_secs: std::env::var("DAPH_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            page_delay: std::env::var("DAPH_PAGE_DELAY_MS")
                .ok()
                .and_then(|v| parse_delay_range(&v))
                .unwrap_or_else(|| DelayRange::from_millis(1_000, 10_000)),
            detail_delay: std::env::var("DAPH_DETAIL_DELAY_MS")
                .ok()
                .and_then(|v| parse_delay_range(&v))
                .unwrap_or_else(|| DelayRange::from_millis(1_000, 7_000)),
        }
    }
}

/// Parses `min..max` in milliseconds.
fn parse_delay_range(raw: &str) -> Option<DelayRange> {
    let (min, max) = raw.split_once("..")?;
    Some(DelayRange::from_millis(
        min.trim().parse().ok()?,
        max.trim().parse().ok()?,
    ))
}

/// Assembles and runs one source's pipeline from settings.
pub async fn run_source(settings: &PipelineSettings, source: Source) -> Result<RunSummary> {
    let rotator = IdentityRotator::from_proxy_file(&settings.proxy_file)?;
    let fetcher = ResilientFetcher::new(
        rotator,
        FetchPolicy {
            max_attempts: settings.max_fetch_attempts,
            timeout: Duration::from_secs(settings.http_timeout_secs),
        },
    );

    let mut sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(CsvSink::new(&settings.csv_path))];
    if let Some(database_url) = &settings.database_url {
        sinks.push(Arc::new(PostgresSink::connect(database_url).await?));
    }

    let pipeline = IngestPipeline::new(
        extractor_for(source),
        Arc::new(fetcher),
        sinks,
        WatermarkStore::new(&settings.state_dir),
        RunOptions {
            run_date: Local::now().date_naive(),
            page_delay: settings.page_delay,
            detail_delay: settings.detail_delay,
        },
    );
    pipeline.run().await
}
