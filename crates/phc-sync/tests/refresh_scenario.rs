//! End-to-end refresh scenario over stub sources and the in-memory catalog.

use std::sync::Arc;

use async_trait::async_trait;
use phc_adapters::{FetchOutcome, SourceAdapter};
use phc_core::{countries_match, HolidayCandidate, HolidayType, RefreshStatus, Scope};
use phc_store::{CatalogQuery, CatalogStore, HttpClientConfig, HttpFetcher, MemoryCatalog};
use phc_sync::{RefreshPipeline, StaticDirectory};

struct StubAdapter {
    source_id: String,
    country: String,
    candidates: Vec<HolidayCandidate>,
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn fetch_scope(&self, scope: &Scope) -> Option<Scope> {
        countries_match(&scope.country, &self.country)
            .then(|| Scope::country(self.country.clone()))
    }

    async fn fetch(&self, _http: &HttpFetcher, _scope: &Scope, _year: i32) -> FetchOutcome {
        FetchOutcome {
            candidates: self.candidates.clone(),
            errors: vec![],
        }
    }
}

fn candidate(
    source: &str,
    native_id: u32,
    date: &str,
    country: &str,
    region: Option<&str>,
    name: &str,
    holiday_type: HolidayType,
) -> HolidayCandidate {
    HolidayCandidate {
        date: date.parse().expect("date"),
        name: name.to_string(),
        country: country.to_string(),
        region: region.map(str::to_string),
        city: None,
        holiday_type,
        description: None,
        is_fixed: false,
        source: source.to_string(),
        source_native_id: native_id,
    }
}

fn scenario_pipeline(store: Arc<MemoryCatalog>) -> RefreshPipeline {
    let national: Arc<dyn SourceAdapter> = Arc::new(StubAdapter {
        source_id: "holiday-api".into(),
        country: "España".into(),
        candidates: vec![
            candidate(
                "holiday-api",
                0,
                "2026-01-01",
                "España",
                None,
                "Año Nuevo",
                HolidayType::National,
            ),
            candidate(
                "holiday-api",
                1,
                "2026-04-23",
                "España",
                Some("Aragón"),
                "San Jorge",
                HolidayType::Regional,
            ),
        ],
    });
    let bulletin: Arc<dyn SourceAdapter> = Arc::new(StubAdapter {
        source_id: "boa-aragon".into(),
        country: "Spain".into(),
        candidates: vec![candidate(
            "boa-aragon",
            0,
            "2026-01-01",
            "Spain",
            None,
            "New Year's Day",
            HolidayType::National,
        )],
    });
    let http = Arc::new(HttpFetcher::new(HttpClientConfig::default()).expect("fetcher"));
    let directory = Arc::new(StaticDirectory::new(vec![Scope::with_region(
        "España", "Aragón",
    )]));
    RefreshPipeline::new(store, http, directory, vec![national, bulletin])
}

#[tokio::test]
async fn clean_refresh_dedupes_across_sources_and_keeps_the_localized_record() {
    let store = Arc::new(MemoryCatalog::new());
    let pipeline = scenario_pipeline(store.clone());

    let result = pipeline.refresh_for_year(2026, true).await.expect("refresh");
    assert_eq!(result.status, RefreshStatus::Done);
    assert_eq!(result.total_loaded, 2);
    assert_eq!(result.duplicates_skipped, 1);
    assert_eq!(result.countries, vec!["Spain".to_string()]);

    let records = store.records_for_year(2026).await.expect("records");
    assert_eq!(records.len(), 2);

    let jan1 = records
        .iter()
        .find(|r| r.date.to_string() == "2026-01-01")
        .expect("new year record");
    assert_eq!(jan1.country, "España");
    assert_eq!(jan1.country_normalized, "Spain");
    assert_eq!(jan1.country_code.as_deref(), Some("ES"));
    assert_eq!(jan1.holiday_type, HolidayType::National);

    let apr23 = records
        .iter()
        .find(|r| r.date.to_string() == "2026-04-23")
        .expect("regional record");
    assert_eq!(apr23.region.as_deref(), Some("Aragón"));
    assert_eq!(apr23.holiday_type, HolidayType::Regional);
}

#[tokio::test]
async fn clean_refresh_is_idempotent_against_unchanged_upstream_data() {
    let store = Arc::new(MemoryCatalog::new());
    let pipeline = scenario_pipeline(store.clone());

    let canonical_tuples = |records: &[phc_core::HolidayRecord]| {
        records
            .iter()
            .map(|r| {
                (
                    r.date,
                    r.country.clone(),
                    r.region.clone(),
                    r.city.clone(),
                    r.name.clone(),
                )
            })
            .collect::<Vec<_>>()
    };

    let first = pipeline.refresh_for_year(2026, true).await.expect("first");
    let after_first = canonical_tuples(&store.records_for_year(2026).await.expect("records"));

    let second = pipeline.refresh_for_year(2026, true).await.expect("second");
    let after_second = canonical_tuples(&store.records_for_year(2026).await.expect("records"));

    assert_eq!(first.total_loaded, second.total_loaded);
    assert_eq!(after_first, after_second);
    assert_eq!(second.cleaned, 2);
}

#[tokio::test]
async fn downstream_reads_see_only_active_canonical_records() {
    let store = Arc::new(MemoryCatalog::new());
    let pipeline = scenario_pipeline(store.clone());
    pipeline.refresh_for_year(2026, true).await.expect("refresh");

    let all_spain = store
        .query(&CatalogQuery {
            country: Some("ES".into()),
            region: None,
            city: None,
            from: "2026-01-01".parse().expect("from"),
            to: "2026-12-31".parse().expect("to"),
        })
        .await
        .expect("query");
    assert_eq!(all_spain.len(), 2);
    assert!(all_spain.iter().all(|r| r.active));

    let aragon_only = store
        .query(&CatalogQuery {
            country: Some("Spain".into()),
            region: Some("Aragón".into()),
            city: None,
            from: "2026-01-01".parse().expect("from"),
            to: "2026-12-31".parse().expect("to"),
        })
        .await
        .expect("query");
    assert_eq!(aragon_only.len(), 1);
    assert_eq!(aragon_only[0].name, "San Jorge");
}
