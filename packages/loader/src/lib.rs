#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident CSV loader and row validator.
//!
//! Reads a raw incident extract, applies the validation rules, and
//! produces the canonical record set every downstream stage consumes.
//! Rows are either loaded, repaired (geometry nulled, class coerced),
//! or rejected with a counted reason; nothing is silently dropped.

pub mod parsing;

use std::io::Read;
use std::path::Path;

use incident_atlas_incident_models::{BoundingBox, IncidentClass, IncidentRecord};
use serde::{Deserialize, Serialize};

/// Errors that can occur while loading an incident extract.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// The source file is missing or unreadable.
    #[error("Source data unavailable at {path}: {source}")]
    DataUnavailable {
        /// Path that could not be opened.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The header row lacks a required column.
    #[error("Source is missing a required column: {name}")]
    MissingColumn {
        /// Logical name of the missing column.
        name: &'static str,
    },

    /// The header row itself could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Counters describing what validation did to the raw rows.
///
/// `rows_total` always equals `rows_loaded` plus the sum of the
/// rejection counters; repairs (nulled geometry, coerced class) apply
/// to loaded rows and are counted separately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Data rows seen in the source (header excluded).
    pub rows_total: u64,
    /// Rows that produced a record.
    pub rows_loaded: u64,
    /// Rows rejected because the timestamp field was empty.
    pub rejected_missing_timestamp: u64,
    /// Rows rejected because the timestamp would not parse.
    pub rejected_unparseable_timestamp: u64,
    /// Rows rejected because the row structure was broken.
    pub rejected_malformed: u64,
    /// Loaded rows whose coordinate pair was absent, unparseable, or
    /// outside the configured bounds.
    pub coordinates_nulled: u64,
    /// Loaded rows whose category was outside the known code space.
    pub categories_coerced: u64,
}

impl ValidationReport {
    /// Total rows rejected, across all reasons.
    #[must_use]
    pub const fn rows_rejected(&self) -> u64 {
        self.rejected_missing_timestamp
            + self.rejected_unparseable_timestamp
            + self.rejected_malformed
    }
}

/// A loaded record set together with its validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadOutcome {
    /// Validated records, sorted by occurrence time ascending. Ties
    /// keep their source file order.
    pub records: Vec<IncidentRecord>,
    /// What validation accepted, repaired, and rejected.
    pub report: ValidationReport,
}

/// Logical columns resolved from the header row.
struct ColumnMap {
    timestamp: usize,
    category: usize,
    latitude: Option<usize>,
    longitude: Option<usize>,
    district: Option<usize>,
}

const TIMESTAMP_ALIASES: &[&str] = &[
    "occurred_at",
    "occurred_on_date",
    "incident_datetime",
    "datetime",
    "date_occ",
    "date",
];
const CATEGORY_ALIASES: &[&str] = &[
    "category",
    "incident_category",
    "primary_type",
    "offense",
    "crime_type",
];
const LATITUDE_ALIASES: &[&str] = &["latitude", "lat", "y"];
const LONGITUDE_ALIASES: &[&str] = &["longitude", "lon", "lng", "long", "x"];
const DISTRICT_ALIASES: &[&str] = &["district", "police_district", "precinct", "beat", "area"];

/// Loads and validates an incident extract from disk.
///
/// # Errors
///
/// Returns [`LoaderError::DataUnavailable`] if the file cannot be
/// opened, and the errors documented on [`load_from_reader`] otherwise.
pub fn load(path: &Path, bounds: &BoundingBox) -> Result<LoadOutcome, LoaderError> {
    log::info!("Loading incident extract from {}", path.display());
    let file = std::fs::File::open(path).map_err(|source| LoaderError::DataUnavailable {
        path: path.display().to_string(),
        source,
    })?;
    load_from_reader(file, bounds)
}

/// Loads and validates an incident extract from any reader.
///
/// # Errors
///
/// Returns [`LoaderError::MissingColumn`] if the header lacks a
/// timestamp or category column, or [`LoaderError::Csv`] if the header
/// row itself cannot be read. Broken data rows are counted and skipped,
/// never fatal.
pub fn load_from_reader<R: Read>(
    reader: R,
    bounds: &BoundingBox,
) -> Result<LoadOutcome, LoaderError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let columns = resolve_columns(&headers)?;

    let mut records = Vec::new();
    let mut report = ValidationReport::default();

    for row in csv_reader.records() {
        report.rows_total += 1;
        let Ok(row) = row else {
            report.rejected_malformed += 1;
            continue;
        };

        let Some(raw_timestamp) = row.get(columns.timestamp).filter(|s| !s.is_empty()) else {
            report.rejected_missing_timestamp += 1;
            continue;
        };
        let Some(occurred_at) = parsing::parse_timestamp(raw_timestamp) else {
            report.rejected_unparseable_timestamp += 1;
            continue;
        };

        let raw_category = row.get(columns.category).unwrap_or("").trim();
        let category = if raw_category.is_empty() {
            "UNKNOWN".to_string()
        } else {
            raw_category.to_uppercase()
        };
        let class = IncidentClass::classify(&category).unwrap_or_else(|| {
            report.categories_coerced += 1;
            IncidentClass::Other
        });

        let raw_lon = columns.longitude.and_then(|i| row.get(i));
        let raw_lat = columns.latitude.and_then(|i| row.get(i));
        let coordinates = parsing::parse_coordinates(raw_lon, raw_lat)
            .filter(|&(lon, lat)| bounds.contains(lon, lat));
        if coordinates.is_none() {
            report.coordinates_nulled += 1;
        }

        let district = columns
            .district
            .and_then(|i| row.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string);

        records.push(IncidentRecord {
            occurred_at,
            category,
            class,
            longitude: coordinates.map(|(lon, _)| lon),
            latitude: coordinates.map(|(_, lat)| lat),
            district,
        });
        report.rows_loaded += 1;
    }

    records.sort_by_key(|r| r.occurred_at);

    log::info!(
        "Validated {} rows: {} loaded, {} rejected",
        report.rows_total,
        report.rows_loaded,
        report.rows_rejected()
    );
    if report.rows_rejected() > 0 {
        log::warn!(
            "Rejected rows: {} missing timestamp, {} unparseable timestamp, {} malformed",
            report.rejected_missing_timestamp,
            report.rejected_unparseable_timestamp,
            report.rejected_malformed
        );
    }
    log::debug!(
        "Repairs: {} coordinate pairs nulled, {} categories coerced",
        report.coordinates_nulled,
        report.categories_coerced
    );

    Ok(LoadOutcome { records, report })
}

fn resolve_columns(headers: &csv::StringRecord) -> Result<ColumnMap, LoaderError> {
    let normalized: Vec<String> = headers
        .iter()
        .map(|h| h.trim().to_lowercase().replace(' ', "_"))
        .collect();
    let find = |aliases: &[&str]| {
        aliases
            .iter()
            .find_map(|alias| normalized.iter().position(|h| h == alias))
    };

    let timestamp =
        find(TIMESTAMP_ALIASES).ok_or(LoaderError::MissingColumn { name: "timestamp" })?;
    let category = find(CATEGORY_ALIASES).ok_or(LoaderError::MissingColumn { name: "category" })?;

    Ok(ColumnMap {
        timestamp,
        category,
        latitude: find(LATITUDE_ALIASES),
        longitude: find(LONGITUDE_ALIASES),
        district: find(DISTRICT_ALIASES),
    })
}
