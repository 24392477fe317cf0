//! Additive Holt-Winters seasonal smoothing.
//!
//! Fixed smoothing constants keep the fit fully deterministic; there is
//! no parameter search. Callers must supply at least two full seasons
//! of history.

use crate::SEASON_LENGTH;

const ALPHA: f64 = 0.2;
const BETA: f64 = 0.1;
const GAMMA: f64 = 0.3;

/// A fitted seasonal model's point forecasts and residual spread.
pub struct SeasonalFit {
    /// Point forecasts for steps `1..=horizon`.
    pub forecasts: Vec<f64>,
    /// Root mean squared one-step-ahead residual over the history.
    pub sigma: f64,
}

/// Fits additive Holt-Winters to `values` and extrapolates `horizon`
/// steps ahead.
#[allow(clippy::cast_precision_loss)]
pub fn holt_winters(values: &[f64], horizon: usize) -> SeasonalFit {
    let season_one = mean(&values[..SEASON_LENGTH]);
    let season_two = mean(&values[SEASON_LENGTH..2 * SEASON_LENGTH]);

    let mut level = season_one;
    let mut trend = (season_two - season_one) / SEASON_LENGTH as f64;
    let mut seasonal: Vec<f64> = values[..SEASON_LENGTH]
        .iter()
        .map(|v| v - season_one)
        .collect();

    let mut squared_error = 0.0;
    for (t, &observed) in values.iter().enumerate() {
        let idx = t % SEASON_LENGTH;
        let fitted = level + trend + seasonal[idx];
        squared_error += (observed - fitted).powi(2);

        let previous_level = level;
        level = ALPHA * (observed - seasonal[idx]) + (1.0 - ALPHA) * (level + trend);
        trend = BETA * (level - previous_level) + (1.0 - BETA) * trend;
        seasonal[idx] = GAMMA * (observed - level) + (1.0 - GAMMA) * seasonal[idx];
    }
    let sigma = (squared_error / values.len() as f64).sqrt();

    let forecasts = (1..=horizon)
        .map(|step| {
            level + trend * step as f64 + seasonal[(values.len() + step - 1) % SEASON_LENGTH]
        })
        .collect();
    SeasonalFit { forecasts, sigma }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfectly_periodic_history_forecasts_its_own_pattern() {
        let pattern = [
            12.0, 9.0, 8.0, 10.0, 14.0, 18.0, 22.0, 21.0, 17.0, 13.0, 11.0, 10.0,
        ];
        let values: Vec<f64> = pattern.iter().chain(pattern.iter()).copied().collect();

        let fit = holt_winters(&values, 3);
        assert!(fit.sigma.abs() < 1e-9, "clean data leaves no residual");
        for (step, forecast) in fit.forecasts.iter().enumerate() {
            assert!(
                (forecast - pattern[step]).abs() < 1e-9,
                "step {step}: expected {} got {forecast}",
                pattern[step]
            );
        }
    }

    #[test]
    fn captures_a_linear_trend_across_seasons() {
        // Flat seasonality, level rising by 1 each month.
        let values: Vec<f64> = (0..36).map(f64::from).collect();
        let fit = holt_winters(&values, 2);
        assert!(
            fit.forecasts[1] > fit.forecasts[0],
            "upward trend must carry into the forecast"
        );
        assert!(fit.forecasts[0] > 30.0);
    }
}
