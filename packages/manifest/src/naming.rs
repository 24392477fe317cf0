//! The file-naming contract shared with artifact consumers.
//!
//! A serving layer locates a run's outputs purely through these names,
//! so they are the stable interface of the pipeline. Every version must
//! carry the [`REQUIRED_ARTIFACTS`]; the spatial names in
//! [`OPTIONAL_ARTIFACTS`] may be legitimately absent and are then
//! recorded as omitted in the manifest instead of being written as
//! empty stubs.

use incident_atlas_temporal::Granularity;

/// Logical name of the yearly count artifact.
pub const TEMPORAL_YEAR: &str = "temporal_year";
/// Logical name of the monthly count artifact.
pub const TEMPORAL_MONTH: &str = "temporal_month";
/// Logical name of the weekday count artifact.
pub const TEMPORAL_WEEKDAY: &str = "temporal_weekday";
/// Logical name of the hour-of-day count artifact.
pub const TEMPORAL_HOUR: &str = "temporal_hour";
/// Logical name of the forecast artifact.
pub const FORECAST: &str = "forecast";
/// Logical name of the hotspot cluster artifact.
pub const HOTSPOTS: &str = "hotspots";
/// Logical name of the area severity artifact.
pub const SEVERITY: &str = "severity";

/// Artifacts every complete version must include. A reader that cannot
/// find one of these for its configured version should fail its own
/// startup health check.
pub const REQUIRED_ARTIFACTS: [&str; 5] = [
    TEMPORAL_YEAR,
    TEMPORAL_MONTH,
    TEMPORAL_WEEKDAY,
    TEMPORAL_HOUR,
    FORECAST,
];

/// Artifacts that are omitted when spatial support is unavailable.
pub const OPTIONAL_ARTIFACTS: [&str; 2] = [HOTSPOTS, SEVERITY];

/// Manifest file name for a version label.
#[must_use]
pub fn manifest_file(version: &str) -> String {
    format!("manifest_{version}.json")
}

/// Temporal count file name for a granularity and version label.
#[must_use]
pub fn temporal_file(granularity: Granularity, version: &str) -> String {
    format!(
        "temporal_{}_{version}.csv",
        granularity.as_ref().to_ascii_lowercase()
    )
}

/// Logical artifact name for a granularity.
#[must_use]
pub const fn temporal_name(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Year => TEMPORAL_YEAR,
        Granularity::Month => TEMPORAL_MONTH,
        Granularity::Weekday => TEMPORAL_WEEKDAY,
        Granularity::Hour => TEMPORAL_HOUR,
    }
}

/// Forecast file name for a version label.
#[must_use]
pub fn forecast_file(version: &str) -> String {
    format!("forecast_{version}.json")
}

/// Hotspot cluster file name for a version label.
#[must_use]
pub fn hotspots_file(version: &str) -> String {
    format!("hotspots_{version}.geojson")
}

/// Area severity file name for a version label.
#[must_use]
pub fn severity_file(version: &str) -> String {
    format!("severity_{version}.geojson")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_embed_the_version_label() {
        assert_eq!(manifest_file("v3"), "manifest_v3.json");
        assert_eq!(temporal_file(Granularity::Month, "v3"), "temporal_month_v3.csv");
        assert_eq!(forecast_file("v3"), "forecast_v3.json");
        assert_eq!(hotspots_file("v3"), "hotspots_v3.geojson");
        assert_eq!(severity_file("v3"), "severity_v3.geojson");
    }

    #[test]
    fn required_and_optional_sets_are_disjoint() {
        for name in REQUIRED_ARTIFACTS {
            assert!(!OPTIONAL_ARTIFACTS.contains(&name));
        }
    }

    #[test]
    fn every_granularity_has_a_logical_name() {
        for &granularity in Granularity::all() {
            assert!(REQUIRED_ARTIFACTS.contains(&temporal_name(granularity)));
        }
    }
}
