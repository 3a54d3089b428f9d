//! HTTP fetch utilities and the canonical holiday catalog store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use phc_core::{countries_match, normalize_country, HolidayRecord, HolidayType};
use reqwest::StatusCode;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "phc-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared HTTP client with a hard timeout, capped exponential retry, and
/// global plus per-source concurrency limits.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        let span = info_span!("http_fetch", source_id, url);
        let _guard = span.enter();

        let mut attempt = 0;
        loop {
            match self.client.get(url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    let body = resp.bytes().await?.to_vec();
                    return Ok(FetchedResponse {
                        status,
                        final_url,
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    let exhausted = attempt >= self.backoff.max_retries;
                    if exhausted || classify_status(status) == RetryDisposition::NonRetryable {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                }
                Err(err) => {
                    let exhausted = attempt >= self.backoff.max_retries;
                    if exhausted || classify_reqwest_error(&err) == RetryDisposition::NonRetryable {
                        return Err(FetchError::Request(err));
                    }
                }
            }
            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("database failure: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failure: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt catalog row: {0}")]
    Decode(String),
}

/// One transactional write against the catalog. Either the whole plan commits
/// or none of it does; a year is never left half-populated.
#[derive(Debug, Clone, Default)]
pub struct CommitPlan {
    /// Hard-delete every record dated in this year before inserting.
    /// Reserved for the explicit clean-before-load path.
    pub clean_year: Option<i32>,
    /// Soft-delete: mark these previously canonical records inactive.
    pub retire: Vec<Uuid>,
    pub insert: Vec<HolidayRecord>,
}

impl CommitPlan {
    pub fn replace(year: i32, insert: Vec<HolidayRecord>) -> Self {
        Self {
            clean_year: Some(year),
            retire: Vec::new(),
            insert,
        }
    }

    pub fn incremental(retire: Vec<Uuid>, insert: Vec<HolidayRecord>) -> Self {
        Self {
            clean_year: None,
            retire,
            insert,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub cleaned: usize,
    pub retired: usize,
    pub inserted: usize,
}

/// Downstream read contract: only ACTIVE canonical records, filtered by
/// country (any identifier form), optional region/city, and a date range.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn commit_year(&self, plan: CommitPlan) -> Result<CommitOutcome, CatalogError>;
    /// ACTIVE records dated in the year, ordered deterministically.
    async fn records_for_year(&self, year: i32) -> Result<Vec<HolidayRecord>, CatalogError>;
    async fn query(&self, filter: &CatalogQuery) -> Result<Vec<HolidayRecord>, CatalogError>;
}

fn year_bounds(year: i32) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year start");
    let end = NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year end");
    (start, end)
}

fn sort_records(records: &mut [HolidayRecord]) {
    records.sort_by(|a, b| {
        (&a.date, &a.country_normalized, &a.region, &a.city, &a.name)
            .cmp(&(&b.date, &b.country_normalized, &b.region, &b.city, &b.name))
    });
}

/// In-memory catalog. Commits apply under one write lock, so a plan is
/// observed either fully or not at all.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    records: RwLock<Vec<HolidayRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full contents including retired records, for test assertions.
    pub async fn snapshot(&self) -> Vec<HolidayRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn commit_year(&self, plan: CommitPlan) -> Result<CommitOutcome, CatalogError> {
        let mut records = self.records.write().await;
        let mut outcome = CommitOutcome::default();
        let now = Utc::now();

        if let Some(year) = plan.clean_year {
            let before = records.len();
            records.retain(|r| r.date.year() != year);
            outcome.cleaned = before - records.len();
        }

        for id in &plan.retire {
            if let Some(record) = records.iter_mut().find(|r| r.id == *id && r.active) {
                record.active = false;
                record.updated_at = now;
                outcome.retired += 1;
            }
        }

        for incoming in plan.insert {
            match records.iter_mut().find(|r| r.id == incoming.id) {
                Some(existing) => {
                    let created_at = existing.created_at;
                    *existing = incoming;
                    existing.created_at = created_at;
                }
                None => records.push(incoming),
            }
            outcome.inserted += 1;
        }

        Ok(outcome)
    }

    async fn records_for_year(&self, year: i32) -> Result<Vec<HolidayRecord>, CatalogError> {
        let records = self.records.read().await;
        let mut out: Vec<HolidayRecord> = records
            .iter()
            .filter(|r| r.active && r.date.year() == year)
            .cloned()
            .collect();
        sort_records(&mut out);
        Ok(out)
    }

    async fn query(&self, filter: &CatalogQuery) -> Result<Vec<HolidayRecord>, CatalogError> {
        let records = self.records.read().await;
        let mut out: Vec<HolidayRecord> = records
            .iter()
            .filter(|r| r.active && r.date >= filter.from && r.date <= filter.to)
            .filter(|r| {
                filter
                    .country
                    .as_deref()
                    .map(|c| countries_match(c, &r.country))
                    .unwrap_or(true)
            })
            .filter(|r| match filter.region.as_deref() {
                Some(region) => r
                    .region
                    .as_deref()
                    .is_some_and(|have| have.to_lowercase() == region.to_lowercase()),
                None => true,
            })
            .filter(|r| match filter.city.as_deref() {
                Some(city) => r
                    .city
                    .as_deref()
                    .is_some_and(|have| have.to_lowercase() == city.to_lowercase()),
                None => true,
            })
            .cloned()
            .collect();
        sort_records(&mut out);
        Ok(out)
    }
}

/// Postgres-backed catalog. A year's canonical set commits in a single
/// transaction.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub async fn connect(database_url: &str) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<(), CatalogError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<HolidayRecord, CatalogError> {
    let holiday_type: String = row.try_get("holiday_type")?;
    let holiday_type: HolidayType = holiday_type.parse().map_err(CatalogError::Decode)?;
    let source_native_id: i64 = row.try_get("source_native_id")?;
    Ok(HolidayRecord {
        id: row.try_get("id")?,
        date: row.try_get("date")?,
        name: row.try_get("name")?,
        country: row.try_get("country")?,
        country_normalized: row.try_get("country_normalized")?,
        country_code: row.try_get("country_code")?,
        region: row.try_get("region")?,
        city: row.try_get("city")?,
        holiday_type,
        description: row.try_get("description")?,
        is_fixed: row.try_get("is_fixed")?,
        source: row.try_get("source")?,
        source_native_id: source_native_id as u32,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const SELECT_COLUMNS: &str = "id, date, name, country, country_normalized, country_code, region, \
     city, holiday_type, description, is_fixed, source, source_native_id, active, created_at, \
     updated_at";

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn commit_year(&self, plan: CommitPlan) -> Result<CommitOutcome, CatalogError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = CommitOutcome::default();
        let now = Utc::now();

        if let Some(year) = plan.clean_year {
            let (start, end) = year_bounds(year);
            let result = sqlx::query("DELETE FROM holidays WHERE date >= $1 AND date <= $2")
                .bind(start)
                .bind(end)
                .execute(&mut *tx)
                .await?;
            outcome.cleaned = result.rows_affected() as usize;
        }

        if !plan.retire.is_empty() {
            let result = sqlx::query(
                "UPDATE holidays SET active = FALSE, updated_at = $2 WHERE id = ANY($1) AND active",
            )
            .bind(&plan.retire)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            outcome.retired = result.rows_affected() as usize;
        }

        for record in &plan.insert {
            sqlx::query(
                "INSERT INTO holidays (id, date, name, country, country_normalized, country_code, \
                 region, city, holiday_type, description, is_fixed, source, source_native_id, \
                 active, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
                 ON CONFLICT (id) DO UPDATE SET date = EXCLUDED.date, name = EXCLUDED.name, \
                 country = EXCLUDED.country, country_normalized = EXCLUDED.country_normalized, \
                 country_code = EXCLUDED.country_code, region = EXCLUDED.region, \
                 city = EXCLUDED.city, holiday_type = EXCLUDED.holiday_type, \
                 description = EXCLUDED.description, is_fixed = EXCLUDED.is_fixed, \
                 source = EXCLUDED.source, source_native_id = EXCLUDED.source_native_id, \
                 active = EXCLUDED.active, updated_at = EXCLUDED.updated_at",
            )
            .bind(record.id)
            .bind(record.date)
            .bind(&record.name)
            .bind(&record.country)
            .bind(&record.country_normalized)
            .bind(&record.country_code)
            .bind(&record.region)
            .bind(&record.city)
            .bind(record.holiday_type.as_str())
            .bind(&record.description)
            .bind(record.is_fixed)
            .bind(&record.source)
            .bind(record.source_native_id as i64)
            .bind(record.active)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
            outcome.inserted += 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn records_for_year(&self, year: i32) -> Result<Vec<HolidayRecord>, CatalogError> {
        let (start, end) = year_bounds(year);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM holidays \
             WHERE active AND date >= $1 AND date <= $2 \
             ORDER BY date, country_normalized, region, city, name"
        );
        let rows = sqlx::query(&sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn query(&self, filter: &CatalogQuery) -> Result<Vec<HolidayRecord>, CatalogError> {
        let country_normalized = filter
            .country
            .as_deref()
            .map(|c| normalize_country(c).0);
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM holidays \
             WHERE active AND date >= $1 AND date <= $2 \
             AND ($3::text IS NULL OR lower(country_normalized) = lower($3)) \
             AND ($4::text IS NULL OR lower(region) = lower($4)) \
             AND ($5::text IS NULL OR lower(city) = lower($5)) \
             ORDER BY date, country_normalized, region, city, name"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.from)
            .bind(filter.to)
            .bind(country_normalized)
            .bind(&filter.region)
            .bind(&filter.city)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_record).collect()
    }
}
