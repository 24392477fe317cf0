#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Command-line front end for the export pipeline.
//!
//! `export` produces one versioned artifact set, `verify` re-runs a
//! recorded version and reports hash drift, and `clear-cache` drops the
//! stage cache. Logging goes through `indicatif-log-bridge` so log
//! lines and the progress bar never fight for the terminal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use incident_atlas_cache::CacheStore;
use incident_atlas_export::progress::ProgressCallback;
use incident_atlas_export::{ExportConfig, Orchestrator};
use incident_atlas_forecast::ForecastConfig;
use incident_atlas_incident_models::{BoundingBox, WeightTable};
use incident_atlas_spatial::SpatialConfig;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "incident_atlas_export", about = "Incident analytics export pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export one versioned artifact set
    Export(RunArgs),
    /// Re-run a recorded version and report hash drift
    Verify(RunArgs),
    /// Remove every cached stage result
    ClearCache(CacheArgs),
}

/// Arguments shared by `export` and `verify`: a verification run must
/// be able to reconstruct the exact configuration of the original.
#[derive(Args)]
struct RunArgs {
    /// Version label for the artifact set
    #[arg(long)]
    version: String,

    /// Incident extract CSV
    #[arg(long)]
    source: PathBuf,

    /// Administrative boundary GeoJSON for severity scoring
    #[arg(long)]
    boundaries: Option<PathBuf>,

    /// Output directory for artifacts and manifests
    #[arg(long, default_value = "data/exports")]
    output_dir: PathBuf,

    /// Stage cache directory
    #[arg(long, default_value = "data/cache")]
    cache_dir: PathBuf,

    /// Geographic filter as min-lon min-lat max-lon max-lat
    #[arg(
        long,
        num_args = 4,
        allow_negative_numbers = true,
        value_names = ["MIN_LON", "MIN_LAT", "MAX_LON", "MAX_LAT"]
    )]
    bbox: Option<Vec<f64>>,

    /// Custom severity weight table (TOML)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Forecast horizon in months
    #[arg(long, default_value_t = 6)]
    horizon: usize,

    /// Neighborhood radius for hotspot detection, in meters
    #[arg(long, default_value_t = 250.0)]
    epsilon_meters: f64,

    /// Minimum neighborhood size for a hotspot core point
    #[arg(long, default_value_t = 5)]
    min_points: usize,

    /// Normalize severity scores per thousand residents
    #[arg(long)]
    per_thousand: bool,

    /// Disable hotspot detection for this run
    #[arg(long)]
    no_spatial: bool,

    /// Disable the seasonal forecast model for this run
    #[arg(long)]
    no_seasonal: bool,
}

impl RunArgs {
    fn into_config(self) -> Result<(ExportConfig, String), Box<dyn std::error::Error>> {
        let weights = match &self.weights {
            Some(path) => WeightTable::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => WeightTable::default_table(),
        };
        let bounds = self.bbox.as_deref().map_or_else(
            BoundingBox::contiguous_us,
            |b| BoundingBox::new(b[0], b[1], b[2], b[3]),
        );
        let config = ExportConfig {
            source: self.source,
            boundaries: self.boundaries,
            output_dir: self.output_dir,
            cache_dir: self.cache_dir,
            bounds,
            weights,
            spatial: SpatialConfig {
                enabled: !self.no_spatial,
                epsilon_meters: self.epsilon_meters,
                min_points: self.min_points,
                normalize_per_thousand: self.per_thousand,
            },
            forecast: ForecastConfig {
                enabled: !self.no_seasonal,
                horizon: self.horizon,
            },
        };
        Ok((config, self.version))
    }
}

#[derive(Args)]
struct CacheArgs {
    /// Stage cache directory
    #[arg(long, default_value = "data/cache")]
    cache_dir: PathBuf,
}

/// An `indicatif` progress bar behind [`ProgressCallback`].
struct IndicatifProgress {
    bar: ProgressBar,
    /// Style to switch to once `set_total()` provides a known length.
    bar_style: ProgressStyle,
}

impl IndicatifProgress {
    /// Creates a stage progress bar that starts as a spinner and
    /// transitions to a full bar once the stage count is known.
    fn stage_bar(multi: &MultiProgress) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        let bar_style = ProgressStyle::with_template("{msg} {wide_bar:.cyan/dim} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

impl ProgressCallback for IndicatifProgress {
    fn set_total(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.bar_style.clone());
    }

    fn inc(&self, delta: u64) {
        self.bar.inc(delta);
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        self.bar.finish_with_message(msg);
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so
/// `log` output is suspended while progress bars redraw.
#[must_use]
fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if a logger was already set

    log::set_max_level(level);

    multi
}

fn main() -> ExitCode {
    let multi = init_logger();
    let cli = Cli::parse();

    match run(cli, &multi) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, multi: &MultiProgress) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Export(args) => {
            let (config, version) = args.into_config()?;
            let mut orchestrator = Orchestrator::new(config);
            let progress = IndicatifProgress::stage_bar(multi);
            let manifest = orchestrator.export_all(&version, progress.as_ref())?;
            println!(
                "Exported version {}: {} of {} artifacts written",
                manifest.version,
                manifest.written_count(),
                manifest.artifacts.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Verify(args) => {
            let (config, version) = args.into_config()?;
            let orchestrator = Orchestrator::new(config);
            let progress = IndicatifProgress::stage_bar(multi);
            let report = orchestrator.verify_reproducible(&version, progress.as_ref())?;
            if report.is_reproducible() {
                println!(
                    "Version {} is reproducible ({} artifacts)",
                    report.version,
                    report.artifacts.len()
                );
                return Ok(ExitCode::SUCCESS);
            }
            if !report.source_revision_matched {
                println!("Source file no longer matches the recorded revision");
            }
            for diff in report.mismatches() {
                println!(
                    "{}: recorded {} ({}), re-run {} ({})",
                    diff.name,
                    diff.expected_status,
                    diff.expected_hash.as_deref().unwrap_or("-"),
                    diff.actual_status,
                    diff.actual_hash.as_deref().unwrap_or("-"),
                );
            }
            Ok(ExitCode::FAILURE)
        }
        Commands::ClearCache(args) => {
            let mut store = CacheStore::new(args.cache_dir);
            store.clear()?;
            println!("Cache cleared");
            Ok(ExitCode::SUCCESS)
        }
    }
}
