//! Source adapter contracts + the national API and regional bulletin adapters.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use phc_core::{
    countries_match, normalize_country, HolidayCandidate, HolidayType, Scope, SourceError,
};
use phc_store::HttpFetcher;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;

pub const CRATE_NAME: &str = "phc-adapters";

/// Result of one adapter invocation. Partial failure is data: a fetch that
/// loses some rows still returns the rows it could parse, alongside the
/// per-row errors.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    pub candidates: Vec<HolidayCandidate>,
    pub errors: Vec<SourceError>,
}

/// One external data source. `fetch` never returns `Err`; every failure mode
/// is folded into the outcome so the caller can continue with other sources.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &str;

    /// The canonical fetch scope this adapter would use for `scope`, or
    /// `None` when the scope is outside its coverage. Distinct in-use scopes
    /// that map to the same canonical scope are fetched once.
    fn fetch_scope(&self, scope: &Scope) -> Option<Scope>;

    async fn fetch(&self, http: &HttpFetcher, scope: &Scope, year: i32) -> FetchOutcome;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Bulletin,
    Placeholder,
}

/// Per-source configuration as declared in the source registry file. Passed
/// explicitly into adapter constructors; there is no global source state.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub kind: SourceKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiSourceConfig {
    pub source_id: String,
    pub base_url: String,
}

/// Adapter for the holiday-by-country HTTP API. One call per (country, year);
/// entries carrying subdivision codes become one `regional` candidate per
/// subdivision, the rest become `national`.
#[derive(Debug, Clone)]
pub struct PublicHolidayApiAdapter {
    config: ApiSourceConfig,
}

impl PublicHolidayApiAdapter {
    pub fn new(config: ApiSourceConfig) -> Self {
        Self { config }
    }
}

/// Wire schema of the holiday API, validated before any conversion.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiHoliday {
    date: NaiveDate,
    local_name: String,
    name: String,
    #[serde(default)]
    fixed: bool,
    #[serde(default)]
    counties: Option<Vec<String>>,
}

pub fn parse_api_payload(
    source_id: &str,
    requested_country: &str,
    body: &[u8],
) -> Result<Vec<HolidayCandidate>, SourceError> {
    let payload: Vec<ApiHoliday> =
        serde_json::from_slice(body).map_err(|e| SourceError::parse(source_id, e))?;

    let mut candidates = Vec::new();
    let mut native_id = 0u32;
    for entry in payload {
        let description = (entry.name != entry.local_name).then(|| entry.name.clone());
        let subdivisions = entry.counties.unwrap_or_default();
        if subdivisions.is_empty() {
            candidates.push(HolidayCandidate {
                date: entry.date,
                name: entry.local_name,
                country: requested_country.to_string(),
                region: None,
                city: None,
                holiday_type: HolidayType::National,
                description,
                is_fixed: entry.fixed,
                source: source_id.to_string(),
                source_native_id: native_id,
            });
            native_id += 1;
        } else {
            for subdivision in subdivisions {
                candidates.push(HolidayCandidate {
                    date: entry.date,
                    name: entry.local_name.clone(),
                    country: requested_country.to_string(),
                    region: Some(subdivision),
                    city: None,
                    holiday_type: HolidayType::Regional,
                    description: description.clone(),
                    is_fixed: entry.fixed,
                    source: source_id.to_string(),
                    source_native_id: native_id,
                });
                native_id += 1;
            }
        }
    }
    Ok(candidates)
}

#[async_trait]
impl SourceAdapter for PublicHolidayApiAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn fetch_scope(&self, scope: &Scope) -> Option<Scope> {
        // One fetch per country covers every region/city scope within it.
        Some(Scope::country(scope.country.clone()))
    }

    async fn fetch(&self, http: &HttpFetcher, scope: &Scope, year: i32) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();
        let (_, code) = normalize_country(&scope.country);
        let Some(code) = code else {
            outcome.errors.push(SourceError::UnknownCountry {
                source: self.config.source_id.clone(),
                country: scope.country.clone(),
            });
            return outcome;
        };

        let url = format!(
            "{}/api/v3/PublicHolidays/{year}/{code}",
            self.config.base_url.trim_end_matches('/')
        );
        let body = match http.fetch_bytes(&self.config.source_id, &url).await {
            Ok(resp) => resp.body,
            Err(err) => {
                outcome
                    .errors
                    .push(SourceError::unavailable(&self.config.source_id, err));
                return outcome;
            }
        };

        match parse_api_payload(&self.config.source_id, &scope.country, &body) {
            Ok(candidates) => outcome.candidates = candidates,
            Err(err) => outcome.errors.push(err),
        }
        outcome
    }
}

#[derive(Debug, Clone)]
pub struct BulletinSourceConfig {
    pub source_id: String,
    pub country: String,
    pub region: String,
    pub index_url: String,
}

/// Adapter for one administrative region's official bulletin. Publication
/// formats vary per region and year; zero parsed rows is a normal outcome,
/// not a failure.
#[derive(Debug, Clone)]
pub struct RegionalBulletinAdapter {
    config: BulletinSourceConfig,
}

impl RegionalBulletinAdapter {
    pub fn new(config: BulletinSourceConfig) -> Self {
        Self { config }
    }
}

fn cell_text(row: ElementRef<'_>, selector: &Selector) -> Option<String> {
    row.select(selector).next().and_then(|cell| {
        let text = cell.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

fn parse_bulletin_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
}

pub fn parse_bulletin_html(config: &BulletinSourceConfig, year: i32, html: &str) -> FetchOutcome {
    let mut outcome = FetchOutcome::default();
    let document = Html::parse_document(html);
    let row_selector = Selector::parse("table.holidays tr").expect("static selector");
    let date_selector = Selector::parse("td.date").expect("static selector");
    let name_selector = Selector::parse("td.name").expect("static selector");
    let city_selector = Selector::parse("td.city").expect("static selector");

    let mut native_id = 0u32;
    for row in document.select(&row_selector) {
        // Header and separator rows carry no date cell.
        let Some(date_text) = cell_text(row, &date_selector) else {
            continue;
        };
        let Some(date) = parse_bulletin_date(&date_text) else {
            outcome.errors.push(SourceError::parse(
                &config.source_id,
                format!("unreadable bulletin date {date_text:?}"),
            ));
            continue;
        };
        if date.year() != year {
            continue;
        }
        let Some(name) = cell_text(row, &name_selector) else {
            outcome.errors.push(SourceError::parse(
                &config.source_id,
                format!("bulletin row for {date} has no holiday name"),
            ));
            continue;
        };
        let city = cell_text(row, &city_selector);
        let holiday_type = if city.is_some() {
            HolidayType::Local
        } else {
            HolidayType::Regional
        };
        outcome.candidates.push(HolidayCandidate {
            date,
            name,
            country: config.country.clone(),
            region: Some(config.region.clone()),
            city,
            holiday_type,
            description: None,
            is_fixed: false,
            source: config.source_id.clone(),
            source_native_id: native_id,
        });
        native_id += 1;
    }
    outcome
}

fn bulletin_covers(config_country: &str, config_region: &str, scope: &Scope) -> bool {
    if !countries_match(&scope.country, config_country) {
        return false;
    }
    match scope.region.as_deref() {
        // A country-only scope still pulls the country's bulletins; the cost
        // is an extra fetch, never missing data.
        None => true,
        Some(region) => region.to_lowercase() == config_region.to_lowercase(),
    }
}

#[async_trait]
impl SourceAdapter for RegionalBulletinAdapter {
    fn source_id(&self) -> &str {
        &self.config.source_id
    }

    fn fetch_scope(&self, scope: &Scope) -> Option<Scope> {
        bulletin_covers(&self.config.country, &self.config.region, scope).then(|| {
            Scope::with_region(self.config.country.clone(), self.config.region.clone())
        })
    }

    async fn fetch(&self, http: &HttpFetcher, _scope: &Scope, year: i32) -> FetchOutcome {
        let body = match http
            .fetch_bytes(&self.config.source_id, &self.config.index_url)
            .await
        {
            Ok(resp) => resp.body,
            Err(err) => {
                let mut outcome = FetchOutcome::default();
                outcome
                    .errors
                    .push(SourceError::unavailable(&self.config.source_id, err));
                return outcome;
            }
        };
        let html = String::from_utf8_lossy(&body);
        parse_bulletin_html(&self.config, year, &html)
    }
}

/// Explicit stand-in for a region whose bulletin parsing is not implemented
/// yet. Always returns an empty candidate set, which downstream treats as
/// missing coverage rather than failure.
#[derive(Debug, Clone)]
pub struct PlaceholderBulletinAdapter {
    pub source_id: String,
    pub country: String,
    pub region: String,
}

#[async_trait]
impl SourceAdapter for PlaceholderBulletinAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn fetch_scope(&self, scope: &Scope) -> Option<Scope> {
        bulletin_covers(&self.country, &self.region, scope)
            .then(|| Scope::with_region(self.country.clone(), self.region.clone()))
    }

    async fn fetch(&self, _http: &HttpFetcher, _scope: &Scope, _year: i32) -> FetchOutcome {
        FetchOutcome::default()
    }
}

/// Instantiate the adapter a registry entry describes.
pub fn build_adapter(spec: &SourceSpec) -> anyhow::Result<Box<dyn SourceAdapter>> {
    match spec.kind {
        SourceKind::Api => {
            let base_url = spec
                .base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no base_url", spec.source_id))?;
            Ok(Box::new(PublicHolidayApiAdapter::new(ApiSourceConfig {
                source_id: spec.source_id.clone(),
                base_url,
            })))
        }
        SourceKind::Bulletin => {
            let country = spec
                .country
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no country", spec.source_id))?;
            let region = spec
                .region
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no region", spec.source_id))?;
            let index_url = spec
                .base_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no base_url", spec.source_id))?;
            Ok(Box::new(RegionalBulletinAdapter::new(BulletinSourceConfig {
                source_id: spec.source_id.clone(),
                country,
                region,
                index_url,
            })))
        }
        SourceKind::Placeholder => {
            let country = spec
                .country
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no country", spec.source_id))?;
            let region = spec
                .region
                .clone()
                .ok_or_else(|| anyhow::anyhow!("source {} has no region", spec.source_id))?;
            Ok(Box::new(PlaceholderBulletinAdapter {
                source_id: spec.source_id.clone(),
                country,
                region,
            }))
        }
    }
}
