#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Temporal rollups and category-by-period cross-tabulations.
//!
//! Aggregation is exhaustive and exact: every record contributes to
//! exactly one `(period, category)` row per granularity, counts are
//! plain integers, and period buckets inside the observed range are
//! emitted even when empty. Buckets the data never traverses are
//! omitted entirely, so a feed covering November through February
//! yields four month rows, not twelve.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use chrono::{Datelike, Duration, NaiveDateTime, Timelike, Weekday};
use incident_atlas_incident_models::{IncidentClass, IncidentRecord};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Aggregation granularities, in artifact emission order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Granularity {
    /// Calendar year (`2024`).
    Year,
    /// Month of year (`01`..`12`), cyclic across years.
    Month,
    /// Day of week (`MONDAY`..`SUNDAY`), cyclic.
    Weekday,
    /// Hour of day (`00`..`23`), cyclic.
    Hour,
}

impl Granularity {
    /// Returns all granularities in a fixed, stable order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Year, Self::Month, Self::Weekday, Self::Hour]
    }
}

/// One `(period, category, count)` rollup row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalAggregate {
    /// Period bucket label, formatted per [`Granularity`].
    pub period: String,
    /// Coarse incident class.
    pub category: IncidentClass,
    /// Exact record count for this bucket and class.
    pub count: u64,
}

/// One point of the chronological monthly timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    /// Year-month label (`2024-03`).
    pub period: String,
    /// Incident count for the month.
    pub value: f64,
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Groups records by `(period, category)` at the given granularity.
///
/// Rows come back ordered by period (canonical ascending order), then
/// by class. An empty record set yields no rows: with nothing observed
/// there is no range to fill.
#[must_use]
pub fn aggregate(records: &[IncidentRecord], granularity: Granularity) -> Vec<TemporalAggregate> {
    let Some((min, max)) = observed_range(records) else {
        return Vec::new();
    };

    let mut counts: BTreeMap<(String, IncidentClass), u64> = BTreeMap::new();
    for record in records {
        let key = (period_key(granularity, record.occurred_at), record.class);
        *counts.entry(key).or_insert(0) += 1;
    }

    let domain = period_domain(granularity, min, max);
    let mut rows = Vec::with_capacity(domain.len() * IncidentClass::all().len());
    for period in &domain {
        for class in IncidentClass::all() {
            let count = counts
                .get(&(period.clone(), *class))
                .copied()
                .unwrap_or(0);
            rows.push(TemporalAggregate {
                period: period.clone(),
                category: *class,
                count,
            });
        }
    }
    rows
}

/// Builds the chronological monthly count series used for forecasting.
///
/// Months between the first and last observation with no records are
/// zero-filled so the series has no gaps.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn monthly_series(records: &[IncidentRecord]) -> Vec<SeriesPoint> {
    let Some((min, max)) = observed_range(records) else {
        return Vec::new();
    };

    let mut counts: BTreeMap<(i32, u32), u64> = BTreeMap::new();
    for record in records {
        let key = (record.occurred_at.year(), record.occurred_at.month());
        *counts.entry(key).or_insert(0) += 1;
    }

    let mut points = Vec::new();
    let mut year = min.year();
    let mut month = min.month();
    loop {
        let value = counts.get(&(year, month)).copied().unwrap_or(0);
        points.push(SeriesPoint {
            period: format!("{year:04}-{month:02}"),
            value: value as f64,
        });
        if year == max.year() && month == max.month() {
            break;
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    points
}

fn observed_range(records: &[IncidentRecord]) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let first = records.first()?.occurred_at;
    let mut min = first;
    let mut max = first;
    for record in records {
        min = min.min(record.occurred_at);
        max = max.max(record.occurred_at);
    }
    Some((min, max))
}

fn period_key(granularity: Granularity, at: NaiveDateTime) -> String {
    match granularity {
        Granularity::Year => at.year().to_string(),
        Granularity::Month => format!("{:02}", at.month()),
        Granularity::Weekday => weekday_name(at.weekday()).to_string(),
        Granularity::Hour => format!("{:02}", at.hour()),
    }
}

/// Period buckets the observed range traverses, in canonical order.
fn period_domain(granularity: Granularity, min: NaiveDateTime, max: NaiveDateTime) -> Vec<String> {
    match granularity {
        Granularity::Year => (min.year()..=max.year()).map(|y| y.to_string()).collect(),
        Granularity::Month => {
            let mut seen = BTreeSet::new();
            let mut year = min.year();
            let mut month = min.month();
            loop {
                seen.insert(month);
                if seen.len() == 12 || (year == max.year() && month == max.month()) {
                    break;
                }
                month += 1;
                if month > 12 {
                    month = 1;
                    year += 1;
                }
            }
            seen.iter().map(|m| format!("{m:02}")).collect()
        }
        Granularity::Weekday => {
            let mut seen = BTreeSet::new();
            let mut day = min.date();
            while day <= max.date() {
                seen.insert(day.weekday().num_days_from_monday());
                if seen.len() == 7 {
                    break;
                }
                day += Duration::days(1);
            }
            WEEKDAYS
                .iter()
                .filter(|w| seen.contains(&w.num_days_from_monday()))
                .map(|w| weekday_name(*w).to_string())
                .collect()
        }
        Granularity::Hour => {
            let start = min.and_utc().timestamp().div_euclid(3600);
            let end = max.and_utc().timestamp().div_euclid(3600);
            let mut seen = BTreeSet::new();
            let mut bucket = start;
            while bucket <= end {
                seen.insert(bucket.rem_euclid(24));
                if seen.len() == 24 {
                    break;
                }
                bucket += 1;
            }
            seen.iter().map(|h| format!("{h:02}")).collect()
        }
    }
}

const fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MONDAY",
        Weekday::Tue => "TUESDAY",
        Weekday::Wed => "WEDNESDAY",
        Weekday::Thu => "THURSDAY",
        Weekday::Fri => "FRIDAY",
        Weekday::Sat => "SATURDAY",
        Weekday::Sun => "SUNDAY",
    }
}
