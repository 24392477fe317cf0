#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Short-horizon incident volume forecasting.
//!
//! The primary model is additive Holt-Winters over the monthly
//! timeline; it needs the `seasonal` build feature, the runtime
//! configuration switch, and at least two full seasons of history.
//! Whenever any of those is missing the engine degrades to an ordinary
//! least-squares linear trend with a fixed-width band. Forecasting
//! never fails: the produced series always discloses which model built
//! it through its `model` tag.

#[cfg(feature = "seasonal")]
mod seasonal;

use incident_atlas_temporal::SeriesPoint;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Seasonal cycle length of the monthly timeline.
pub const SEASON_LENGTH: usize = 12;

/// Minimum history for the primary model: two full seasons.
pub const MIN_PRIMARY_POINTS: usize = 2 * SEASON_LENGTH;

/// Normal quantile for the ~95% band.
const CONFIDENCE_Z: f64 = 1.96;

/// Which model family produced a forecast.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelTag {
    /// Seasonal Holt-Winters.
    Primary,
    /// Ordinary least-squares linear trend.
    Fallback,
}

/// Forecast stage configuration, recorded in the manifest parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastConfig {
    /// Runtime switch for the seasonal primary model.
    pub enabled: bool,
    /// Number of future periods to forecast.
    pub horizon: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            horizon: 6,
        }
    }
}

/// One forecast period with its uncertainty band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    /// Period label continuing the historical timeline.
    pub period: String,
    /// Point forecast.
    pub value: f64,
    /// Lower band edge.
    pub lower: f64,
    /// Upper band edge.
    pub upper: f64,
}

/// Historical timeline plus its forecast extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    /// The history the forecast was fitted on.
    pub historical: Vec<SeriesPoint>,
    /// Forecast points for the configured horizon.
    pub forecast: Vec<ForecastPoint>,
    /// Which model family produced the forecast.
    pub model: ModelTag,
}

/// Forecast engine with its capability resolved at construction.
pub struct ForecastEngine {
    primary_available: bool,
    config: ForecastConfig,
}

impl ForecastEngine {
    /// Resolves the seasonal capability from the build and the runtime
    /// configuration.
    #[must_use]
    pub fn resolve(config: ForecastConfig) -> Self {
        let compiled = cfg!(feature = "seasonal");
        let primary_available = compiled && config.enabled;
        if !primary_available {
            log::warn!(
                "Seasonal model unavailable ({}); forecasts will use the linear fallback",
                if compiled {
                    "disabled by configuration"
                } else {
                    "seasonal support not compiled in"
                }
            );
        }
        Self {
            primary_available,
            config,
        }
    }

    /// Returns `true` if the seasonal primary model can run.
    #[must_use]
    pub const fn is_primary_available(&self) -> bool {
        self.primary_available
    }

    /// The configuration the engine was resolved with.
    #[must_use]
    pub const fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Forecasts the series for the configured horizon.
    ///
    /// Infallible: a missing capability or a history too short for the
    /// seasonal model degrades to the linear fallback, and an empty
    /// history yields a flat zero forecast. The result's `model` tag
    /// always discloses the path taken.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn forecast(&self, series: &[SeriesPoint]) -> ForecastSeries {
        let horizon = self.config.horizon;
        let periods = future_periods(series, horizon);
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();

        #[cfg(feature = "seasonal")]
        if self.primary_available && values.len() >= MIN_PRIMARY_POINTS {
            let fit = seasonal::holt_winters(&values, horizon);
            let forecast = periods
                .into_iter()
                .zip(fit.forecasts)
                .enumerate()
                .map(|(step, (period, value))| {
                    let width = CONFIDENCE_Z * fit.sigma * ((step + 1) as f64).sqrt();
                    ForecastPoint {
                        period,
                        value,
                        lower: value - width,
                        upper: value + width,
                    }
                })
                .collect();
            log::info!("Produced a {horizon}-period forecast with the seasonal model");
            return ForecastSeries {
                historical: series.to_vec(),
                forecast,
                model: ModelTag::Primary,
            };
        }

        if self.primary_available && values.len() < MIN_PRIMARY_POINTS {
            log::info!(
                "History too short for the seasonal model ({} of {MIN_PRIMARY_POINTS} points), using the linear fallback",
                values.len()
            );
        }

        let (intercept, slope, sigma) = linear_trend(&values);
        let width = CONFIDENCE_Z * sigma;
        let history_len = values.len();
        let forecast = periods
            .into_iter()
            .enumerate()
            .map(|(step, period)| {
                let value = intercept + slope * ((history_len + step) as f64);
                ForecastPoint {
                    period,
                    value,
                    lower: value - width,
                    upper: value + width,
                }
            })
            .collect();
        log::info!("Produced a {horizon}-period forecast with the linear fallback");
        ForecastSeries {
            historical: series.to_vec(),
            forecast,
            model: ModelTag::Fallback,
        }
    }
}

/// Ordinary least-squares fit over `(index, value)`.
///
/// Returns `(intercept, slope, residual_sigma)`. Degenerate histories
/// flatten out: one point keeps its value, none forecasts zero.
#[allow(clippy::cast_precision_loss)]
fn linear_trend(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len();
    if n == 0 {
        return (0.0, 0.0, 0.0);
    }
    if n == 1 {
        return (values[0], 0.0, 0.0);
    }

    let n_f = n as f64;
    let x_mean = (n_f - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n_f;

    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxx += dx * dx;
        sxy += dx * (y - y_mean);
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let squared_error: f64 = values
        .iter()
        .enumerate()
        .map(|(i, &y)| (y - (intercept + slope * i as f64)).powi(2))
        .sum();
    let sigma = (squared_error / n_f).sqrt();
    (intercept, slope, sigma)
}

/// Period labels for the forecast horizon.
///
/// Continues the monthly timeline when the last historical label parses
/// as `YYYY-MM`; otherwise falls back to relative `t+N` labels.
fn future_periods(series: &[SeriesPoint], horizon: usize) -> Vec<String> {
    let continuation = series.last().and_then(|p| parse_year_month(&p.period));
    continuation.map_or_else(
        || (1..=horizon).map(|i| format!("t+{i}")).collect(),
        |(mut year, mut month)| {
            (0..horizon)
                .map(|_| {
                    month += 1;
                    if month > 12 {
                        month = 1;
                        year += 1;
                    }
                    format!("{year:04}-{month:02}")
                })
                .collect()
        },
    )
}

fn parse_year_month(period: &str) -> Option<(i32, u32)> {
    let (year, month) = period.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}
