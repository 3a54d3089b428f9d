//! Core domain model and country normalization for the Public Holiday Catalog.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "phc-core";

/// Classification assigned by the originating adapter. Deduplication selects
/// records; it never rewrites this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HolidayType {
    National,
    Regional,
    Local,
}

impl HolidayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolidayType::National => "national",
            HolidayType::Regional => "regional",
            HolidayType::Local => "local",
        }
    }
}

impl fmt::Display for HolidayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HolidayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "national" => Ok(HolidayType::National),
            "regional" => Ok(HolidayType::Regional),
            "local" => Ok(HolidayType::Local),
            other => Err(format!("unknown holiday type {other:?}")),
        }
    }
}

/// A (country, region, city) triple bounding what adapters are asked to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub country: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

impl Scope {
    pub fn country(country: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: None,
            city: None,
        }
    }

    pub fn with_region(country: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            region: Some(region.into()),
            city: None,
        }
    }
}

/// Adapter-produced holiday prior to deduplication and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayCandidate {
    pub date: NaiveDate,
    pub name: String,
    /// Country identifier exactly as the source (or the requesting scope)
    /// spelled it. Preserved verbatim through persistence.
    pub country: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub holiday_type: HolidayType,
    pub description: Option<String>,
    pub is_fixed: bool,
    pub source: String,
    pub source_native_id: u32,
}

/// Identity key shared by the dedup engine and the incremental persistence
/// path: (date, canonical country, region, city).
pub type GroupKey = (NaiveDate, String, String, String);

impl HolidayCandidate {
    pub fn group_key(&self) -> GroupKey {
        group_key(self.date, &self.country, self.region.as_deref(), self.city.as_deref())
    }

    /// Stable id derived from source identity, so re-running a refresh against
    /// unchanged upstream data re-creates the same record ids.
    pub fn record_id(&self) -> Uuid {
        let seed = format!(
            "{}:{}:{}:{}",
            self.source, self.source_native_id, self.date, self.country
        );
        Uuid::new_v5(&Uuid::NAMESPACE_URL, seed.as_bytes())
    }

    pub fn into_record(self, now: DateTime<Utc>) -> HolidayRecord {
        let id = self.record_id();
        let (country_normalized, country_code) = normalize_country(&self.country);
        HolidayRecord {
            id,
            date: self.date,
            name: self.name,
            country: self.country,
            country_normalized,
            country_code: country_code.map(str::to_string),
            region: self.region,
            city: self.city,
            holiday_type: self.holiday_type,
            description: self.description,
            is_fixed: self.is_fixed,
            source: self.source,
            source_native_id: self.source_native_id,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Canonical persisted holiday. `country_code == None` flags an unrecognized
/// country string awaiting reconciliation; the verbatim input is kept in
/// `country` and `country_normalized`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolidayRecord {
    pub id: Uuid,
    pub date: NaiveDate,
    pub name: String,
    pub country: String,
    pub country_normalized: String,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub holiday_type: HolidayType,
    pub description: Option<String>,
    pub is_fixed: bool,
    pub source: String,
    pub source_native_id: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HolidayRecord {
    pub fn group_key(&self) -> GroupKey {
        group_key(self.date, &self.country, self.region.as_deref(), self.city.as_deref())
    }
}

pub fn group_key(
    date: NaiveDate,
    country: &str,
    region: Option<&str>,
    city: Option<&str>,
) -> GroupKey {
    let (english, _code) = normalize_country(country);
    (
        date,
        english,
        region.unwrap_or_default().to_string(),
        city.unwrap_or_default().to_string(),
    )
}

/// Per-source failure taxonomy. Recoverable by construction: adapters return
/// these as data and the refresh continues with other sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    Unavailable { source: String, message: String },
    Parse { source: String, message: String },
    UnknownCountry { source: String, country: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unavailable { source, message } => {
                write!(f, "source {source} unavailable: {message}")
            }
            SourceError::Parse { source, message } => {
                write!(f, "source {source} returned an unparseable payload: {message}")
            }
            SourceError::UnknownCountry { source, country } => {
                write!(f, "source {source} has no usable country code for {country:?}")
            }
        }
    }
}

impl std::error::Error for SourceError {}

impl SourceError {
    pub fn unavailable(source: &str, message: impl fmt::Display) -> Self {
        SourceError::Unavailable {
            source: source.to_string(),
            message: message.to_string(),
        }
    }

    pub fn parse(source: &str, message: impl fmt::Display) -> Self {
        SourceError::Parse {
            source: source.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Done,
    DoneWithErrors,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub loaded: usize,
    pub errors: Vec<String>,
}

/// Aggregated outcome of one year-scoped refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub year: i32,
    pub status: RefreshStatus,
    pub cleaned: usize,
    pub countries: Vec<String>,
    pub reports: Vec<SourceReport>,
    pub total_loaded: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
}

impl RefreshResult {
    pub fn summary(&self, max_errors: usize) -> String {
        let mut lines = vec![
            format!("refresh {}: {:?}", self.year, self.status),
            format!("countries processed: {}", self.countries.join(", ")),
            format!(
                "holidays loaded: {} (cleaned {}, duplicates skipped {})",
                self.total_loaded, self.cleaned, self.duplicates_skipped
            ),
        ];
        if !self.errors.is_empty() {
            lines.push(format!("errors ({} total):", self.errors.len()));
            for err in self.errors.iter().take(max_errors) {
                lines.push(format!("  - {err}"));
            }
        }
        lines.join("\n")
    }
}

/// Read-only per-year counts for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStatistics {
    pub year: i32,
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_country: BTreeMap<String, usize>,
}

/// Single-method strategy for the "does this holiday name look localized"
/// judgement used by dedup scoring. Swappable for a real language detector
/// without touching grouping or selection.
pub trait LocalizedNameJudge: Send + Sync {
    fn looks_localized(&self, name: &str) -> bool;
}

/// Approximate accent/keyword heuristic: accented characters, or any of a
/// curated set of localized keyword substrings (day, saints, Christmas,
/// epiphany, independence, constitution equivalents).
#[derive(Debug, Clone)]
pub struct AccentKeywordJudge {
    keywords: Vec<&'static str>,
}

impl Default for AccentKeywordJudge {
    fn default() -> Self {
        Self {
            keywords: vec![
                "día",
                "dia de",
                "festividad",
                "fiesta",
                "navidad",
                "nadal",
                "reyes",
                "epifanía",
                "epifania",
                "befana",
                "independencia",
                "constitución",
                "constitucion",
                "todos los santos",
                "ognissanti",
                "toussaint",
                "allerheiligen",
                "san ",
                "santa ",
                "virgen",
                "asunción",
                "inmaculada",
                "pascua",
                "semana santa",
                "año nuevo",
                "ano novo",
                "natale",
                "noël",
                "weihnachten",
            ],
        }
    }
}

impl LocalizedNameJudge for AccentKeywordJudge {
    fn looks_localized(&self, name: &str) -> bool {
        if name.chars().any(|c| c.is_alphabetic() && !c.is_ascii()) {
            return true;
        }
        let lower = name.to_lowercase();
        self.keywords.iter().any(|kw| lower.contains(kw))
    }
}

/// Static reference entry: ISO-2 code, english name, localized form(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountryEntry {
    pub code: &'static str,
    pub english: &'static str,
    pub localized: &'static [&'static str],
}

pub const COUNTRIES: &[CountryEntry] = &[
    CountryEntry { code: "ES", english: "Spain", localized: &["España"] },
    CountryEntry { code: "PT", english: "Portugal", localized: &[] },
    CountryEntry { code: "FR", english: "France", localized: &["Francia"] },
    CountryEntry { code: "DE", english: "Germany", localized: &["Alemania", "Deutschland"] },
    CountryEntry { code: "IT", english: "Italy", localized: &["Italia"] },
    CountryEntry { code: "GB", english: "United Kingdom", localized: &["Reino Unido"] },
    CountryEntry { code: "IE", english: "Ireland", localized: &["Irlanda", "Éire"] },
    CountryEntry { code: "NL", english: "Netherlands", localized: &["Países Bajos", "Nederland"] },
    CountryEntry { code: "BE", english: "Belgium", localized: &["Bélgica", "België", "Belgique"] },
    CountryEntry { code: "LU", english: "Luxembourg", localized: &["Luxemburgo"] },
    CountryEntry { code: "AT", english: "Austria", localized: &["Österreich"] },
    CountryEntry { code: "CH", english: "Switzerland", localized: &["Suiza", "Schweiz", "Suisse"] },
    CountryEntry { code: "PL", english: "Poland", localized: &["Polonia", "Polska"] },
    CountryEntry { code: "CZ", english: "Czechia", localized: &["Chequia", "Česko"] },
    CountryEntry { code: "SE", english: "Sweden", localized: &["Suecia", "Sverige"] },
    CountryEntry { code: "NO", english: "Norway", localized: &["Noruega", "Norge"] },
    CountryEntry { code: "DK", english: "Denmark", localized: &["Dinamarca", "Danmark"] },
    CountryEntry { code: "FI", english: "Finland", localized: &["Finlandia", "Suomi"] },
    CountryEntry { code: "GR", english: "Greece", localized: &["Grecia"] },
    CountryEntry { code: "RO", english: "Romania", localized: &["Rumanía", "România"] },
    CountryEntry { code: "US", english: "United States", localized: &["Estados Unidos"] },
    CountryEntry { code: "CA", english: "Canada", localized: &["Canadá"] },
    CountryEntry { code: "MX", english: "Mexico", localized: &["México"] },
    CountryEntry { code: "AR", english: "Argentina", localized: &[] },
    CountryEntry { code: "BR", english: "Brazil", localized: &["Brasil"] },
    CountryEntry { code: "CL", english: "Chile", localized: &[] },
    CountryEntry { code: "CO", english: "Colombia", localized: &[] },
    CountryEntry { code: "PE", english: "Peru", localized: &["Perú"] },
    CountryEntry { code: "UY", english: "Uruguay", localized: &[] },
    CountryEntry { code: "MA", english: "Morocco", localized: &["Marruecos"] },
];

pub const ISO3_TO_ISO2: &[(&str, &str)] = &[
    ("ESP", "ES"),
    ("PRT", "PT"),
    ("FRA", "FR"),
    ("DEU", "DE"),
    ("ITA", "IT"),
    ("GBR", "GB"),
    ("IRL", "IE"),
    ("NLD", "NL"),
    ("BEL", "BE"),
    ("LUX", "LU"),
    ("AUT", "AT"),
    ("CHE", "CH"),
    ("POL", "PL"),
    ("CZE", "CZ"),
    ("SWE", "SE"),
    ("NOR", "NO"),
    ("DNK", "DK"),
    ("FIN", "FI"),
    ("GRC", "GR"),
    ("ROU", "RO"),
    ("USA", "US"),
    ("CAN", "CA"),
    ("MEX", "MX"),
    ("ARG", "AR"),
    ("BRA", "BR"),
    ("CHL", "CL"),
    ("COL", "CO"),
    ("PER", "PE"),
    ("URY", "UY"),
    ("MAR", "MA"),
];

fn entry_by_code(code: &str) -> Option<&'static CountryEntry> {
    COUNTRIES.iter().find(|e| e.code.eq_ignore_ascii_case(code))
}

fn entry_by_name(name: &str) -> Option<&'static CountryEntry> {
    let lower = name.to_lowercase();
    COUNTRIES.iter().find(|e| {
        e.english.to_lowercase() == lower || e.localized.iter().any(|l| l.to_lowercase() == lower)
    })
}

// Containment guard: short fragments like "in" would match half the table.
const CONTAINMENT_MIN_LEN: usize = 4;

fn entry_by_containment(identifier: &str) -> Option<&'static CountryEntry> {
    let lower = identifier.to_lowercase();
    if lower.chars().count() < CONTAINMENT_MIN_LEN {
        return None;
    }
    COUNTRIES.iter().find(|e| {
        let english = e.english.to_lowercase();
        if lower.contains(&english) || english.contains(&lower) {
            return true;
        }
        e.localized.iter().any(|l| {
            let l = l.to_lowercase();
            lower.contains(&l) || l.contains(&lower)
        })
    })
}

/// Lookup, in order: exact ISO-2 code, ISO-3 code via the static map, exact
/// case-insensitive english or localized name, then substring containment as
/// a last resort. Containment may yield false positives; callers needing
/// certainty should pass code identifiers.
pub fn country_variants(identifier: &str) -> Option<&'static CountryEntry> {
    let trimmed = identifier.trim();
    if trimmed.len() == 2 {
        if let Some(entry) = entry_by_code(trimmed) {
            return Some(entry);
        }
    }
    if trimmed.len() == 3 {
        if let Some((_, iso2)) = ISO3_TO_ISO2
            .iter()
            .find(|(iso3, _)| iso3.eq_ignore_ascii_case(trimmed))
        {
            return entry_by_code(iso2);
        }
    }
    if let Some(entry) = entry_by_name(trimmed) {
        return Some(entry);
    }
    entry_by_containment(trimmed)
}

/// Maps any country identifier form to a canonical (english name, ISO-2)
/// pair. Unrecognized input is preserved verbatim with no code.
pub fn normalize_country(identifier: &str) -> (String, Option<&'static str>) {
    match country_variants(identifier) {
        Some(entry) => (entry.english.to_string(), Some(entry.code)),
        None => (identifier.to_string(), None),
    }
}

/// True when the identifier is a localized-language form from the reference
/// table (e.g. "España"), as opposed to an english name or a code.
pub fn is_localized_form(identifier: &str) -> bool {
    let lower = identifier.trim().to_lowercase();
    COUNTRIES.iter().any(|e| {
        e.localized.iter().any(|l| l.to_lowercase() == lower)
            && e.english.to_lowercase() != lower
    })
}

/// Symmetric equivalence built on `normalize_country`.
pub fn countries_match(a: &str, b: &str) -> bool {
    let (name_a, code_a) = normalize_country(a);
    let (name_b, code_b) = normalize_country(b);
    match (code_a, code_b) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => name_a.to_lowercase() == name_b.to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candidate(country: &str, date: &str) -> HolidayCandidate {
        HolidayCandidate {
            date: date.parse().expect("date"),
            name: "New Year".into(),
            country: country.into(),
            region: None,
            city: None,
            holiday_type: HolidayType::National,
            description: None,
            is_fixed: true,
            source: "test".into(),
            source_native_id: 0,
        }
    }

    #[test]
    fn normalize_round_trips_every_table_entry() {
        for entry in COUNTRIES {
            assert_eq!(
                normalize_country(entry.code),
                (entry.english.to_string(), Some(entry.code)),
                "code lookup for {}",
                entry.code
            );
            assert_eq!(
                normalize_country(entry.english),
                (entry.english.to_string(), Some(entry.code)),
                "name lookup for {}",
                entry.english
            );
            for localized in entry.localized {
                assert_eq!(
                    normalize_country(localized),
                    (entry.english.to_string(), Some(entry.code)),
                    "localized lookup for {localized}"
                );
            }
        }
    }

    #[test]
    fn normalize_resolves_codes_names_and_localized_forms() {
        assert_eq!(normalize_country("ES"), ("Spain".to_string(), Some("ES")));
        assert_eq!(normalize_country("es"), ("Spain".to_string(), Some("ES")));
        assert_eq!(normalize_country("ESP"), ("Spain".to_string(), Some("ES")));
        assert_eq!(normalize_country("España"), ("Spain".to_string(), Some("ES")));
        assert_eq!(normalize_country("españa"), ("Spain".to_string(), Some("ES")));
    }

    #[test]
    fn normalize_preserves_unrecognized_input_verbatim() {
        assert_eq!(normalize_country("Atlantis"), ("Atlantis".to_string(), None));
    }

    #[test]
    fn containment_is_a_last_resort() {
        assert_eq!(
            normalize_country("Kingdom of Spain"),
            ("Spain".to_string(), Some("ES"))
        );
        // Too short to trigger containment.
        assert_eq!(normalize_country("Sp"), ("Sp".to_string(), None));
    }

    #[test]
    fn countries_match_is_symmetric() {
        let pairs = [
            ("ES", "España"),
            ("ES", "France"),
            ("Deutschland", "DE"),
            ("Atlantis", "atlantis"),
            ("Atlantis", "ES"),
        ];
        for (a, b) in pairs {
            assert_eq!(countries_match(a, b), countries_match(b, a), "{a} vs {b}");
        }
        assert!(countries_match("ES", "España"));
        assert!(!countries_match("ES", "France"));
        assert!(countries_match("Atlantis", "atlantis"));
    }

    #[test]
    fn variants_exposes_the_full_entry() {
        let entry = country_variants("Suiza").expect("entry");
        assert_eq!(entry.code, "CH");
        assert_eq!(entry.english, "Switzerland");
        assert!(country_variants("Nowhere").is_none());
    }

    #[test]
    fn localized_form_detection_excludes_english_and_codes() {
        assert!(is_localized_form("España"));
        assert!(is_localized_form("Alemania"));
        assert!(!is_localized_form("Spain"));
        assert!(!is_localized_form("ES"));
        assert!(!is_localized_form("Atlantis"));
    }

    #[test]
    fn accent_keyword_judge_flags_localized_names() {
        let judge = AccentKeywordJudge::default();
        assert!(judge.looks_localized("Día de la Constitución"));
        assert!(judge.looks_localized("Navidad"));
        assert!(judge.looks_localized("Todos los Santos"));
        assert!(!judge.looks_localized("Christmas Day"));
        assert!(!judge.looks_localized("Independence Day"));
        // "independencia" is curated even without accents.
        assert!(judge.looks_localized("Dia de la Independencia"));
    }

    #[test]
    fn group_key_unifies_country_spellings() {
        let a = candidate("España", "2026-01-01");
        let b = candidate("Spain", "2026-01-01");
        assert_eq!(a.group_key(), b.group_key());

        let c = candidate("ES", "2026-01-06");
        assert_ne!(a.group_key(), c.group_key());
    }

    #[test]
    fn record_promotion_keeps_original_country_and_flags_unknown() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("ts");
        let record = candidate("España", "2026-01-01").into_record(now);
        assert_eq!(record.country, "España");
        assert_eq!(record.country_normalized, "Spain");
        assert_eq!(record.country_code.as_deref(), Some("ES"));
        assert!(record.active);

        let unknown = candidate("Atlantis", "2026-01-01").into_record(now);
        assert_eq!(unknown.country, "Atlantis");
        assert_eq!(unknown.country_normalized, "Atlantis");
        assert_eq!(unknown.country_code, None);
    }

    #[test]
    fn record_ids_are_stable_across_promotions() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().expect("ts");
        let later = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).single().expect("ts");
        let a = candidate("ES", "2026-01-01").into_record(now);
        let b = candidate("ES", "2026-01-01").into_record(later);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn refresh_summary_lists_first_errors_only() {
        let result = RefreshResult {
            year: 2026,
            status: RefreshStatus::DoneWithErrors,
            cleaned: 3,
            countries: vec!["Spain".into(), "France".into()],
            reports: vec![],
            total_loaded: 12,
            duplicates_skipped: 2,
            errors: vec!["e1".into(), "e2".into(), "e3".into()],
        };
        let summary = result.summary(2);
        assert!(summary.contains("Spain, France"));
        assert!(summary.contains("e1"));
        assert!(summary.contains("e2"));
        assert!(!summary.contains("e3"));
    }
}
