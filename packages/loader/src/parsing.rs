//! Shared parsing helpers for incident feeds.
//!
//! Civic data portals publish timestamps and coordinates in a handful of
//! common layouts; these functions accept all of them so that source
//! quirks stay out of the validation loop.

use chrono::{NaiveDate, NaiveDateTime};

/// Accepted timestamp layouts, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
];

/// Parses a timestamp in any accepted layout.
///
/// Bare dates (`2024-01-15`, `01/15/2024`) load as midnight. Returns
/// `None` for anything unrecognized.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return date.and_hms_opt(0, 0, 0);
    }
    None
}

/// Parses a coordinate pair from raw text fields. Returns `None` if
/// either half is missing, unparseable, non-finite, or zero.
#[must_use]
pub fn parse_coordinates(lon: Option<&str>, lat: Option<&str>) -> Option<(f64, f64)> {
    let longitude = lon?.trim().parse::<f64>().ok()?;
    let latitude = lat?.trim().parse::<f64>().ok()?;
    if !longitude.is_finite() || !latitude.is_finite() {
        return None;
    }
    if longitude == 0.0 || latitude == 0.0 {
        return None;
    }
    Some((longitude, latitude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_with_fractional() {
        let dt = parse_timestamp("2024-01-15T14:30:00.000").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn parses_iso_without_fractional() {
        let dt = parse_timestamp("2024-01-15T14:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn parses_space_separated() {
        let dt = parse_timestamp("2024-01-15 14:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn parses_us_twelve_hour() {
        let dt = parse_timestamp("01/15/2024 02:30:00 PM").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 14:30:00");
    }

    #[test]
    fn parses_bare_date_as_midnight() {
        let dt = parse_timestamp("2024-01-15").unwrap();
        assert_eq!(dt.to_string(), "2024-01-15 00:00:00");
    }

    #[test]
    fn rejects_invalid_timestamp() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn parses_coordinate_pair() {
        let (lon, lat) = parse_coordinates(Some("-87.6298"), Some("41.8781")).unwrap();
        assert!((lon - -87.6298).abs() < f64::EPSILON);
        assert!((lat - 41.8781).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_zero_coordinates() {
        assert!(parse_coordinates(Some("0.0"), Some("41.8781")).is_none());
        assert!(parse_coordinates(Some("-87.6298"), Some("0")).is_none());
    }

    #[test]
    fn rejects_missing_half() {
        assert!(parse_coordinates(None, Some("41.8781")).is_none());
        assert!(parse_coordinates(Some("-87.6298"), Some("")).is_none());
    }

    #[test]
    fn rejects_non_numeric() {
        assert!(parse_coordinates(Some("east"), Some("41.8781")).is_none());
    }
}
