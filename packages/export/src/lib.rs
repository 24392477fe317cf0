#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Export orchestration: one versioned, reproducible artifact set per
//! run.
//!
//! The [`Orchestrator`] sequences load → aggregate → forecast →
//! hotspots → severity → manifest, calling every stage exactly once.
//! Artifacts are rendered whole-buffer in memory, hashed, and renamed
//! into place, so a terminated run never leaves a partial file under a
//! version label. An unavailable spatial capability omits the two
//! spatial artifacts — recorded in the manifest with reasons — without
//! touching the rest of the run; the forecast degrades internally and
//! never fails. Version labels are append-only: re-exporting an
//! existing version is refused, and [`Orchestrator::verify_reproducible`]
//! re-runs a recorded version into a scratch directory to report hash
//! drift artifact by artifact.

pub mod progress;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

use incident_atlas_cache::{CacheStore, Fingerprint};
use incident_atlas_forecast::{ForecastConfig, ForecastEngine, ForecastSeries};
use incident_atlas_incident_models::{BoundingBox, IncidentRecord, WeightTable};
use incident_atlas_loader::{load_from_reader, LoadOutcome, LoaderError};
use incident_atlas_manifest::{
    compare, hash_bytes, load_manifest, manifest_exists, naming, write_manifest, Artifact,
    ArtifactDiff, Manifest, ManifestError,
};
use incident_atlas_spatial::{combined_score, SpatialConfig, SpatialEngine};
use incident_atlas_temporal::{aggregate, monthly_series, Granularity, TemporalAggregate};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::progress::ProgressCallback;

/// Errors that abort a whole export or verification run.
///
/// Per-record validation issues and unavailable optional capabilities
/// never surface here; they end up in the [`Manifest`] as counters and
/// omitted artifacts instead.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The source extract is missing, unreadable, or structurally
    /// broken.
    #[error(transparent)]
    Data(#[from] LoaderError),

    /// A directory or artifact file could not be written.
    #[error("Failed to write {path}: {source}")]
    Io {
        /// Path of the failed write.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A JSON document could not be encoded.
    #[error("Failed to encode {name}: {source}")]
    Encode {
        /// What was being encoded.
        name: &'static str,
        /// Underlying encode error.
        #[source]
        source: serde_json::Error,
    },

    /// A CSV artifact could not be rendered.
    #[error("Failed to render {name}: {source}")]
    Csv {
        /// Logical artifact name.
        name: &'static str,
        /// Underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// The manifest could not be read or written.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The version label was already exported.
    #[error("Version {version} already has a manifest; versions are append-only")]
    VersionExists {
        /// The refused version label.
        version: String,
    },

    /// The recorded run parameters differ from this configuration.
    #[error("Recorded parameters for version {version} do not match the current configuration")]
    ParamsDrift {
        /// The version whose parameters were compared.
        version: String,
    },
}

/// Everything one export run depends on.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Incident extract (CSV) to load.
    pub source: PathBuf,
    /// Administrative boundary `GeoJSON` for severity scoring, if any.
    pub boundaries: Option<PathBuf>,
    /// Directory artifacts and manifests are written into.
    pub output_dir: PathBuf,
    /// Stage cache directory.
    pub cache_dir: PathBuf,
    /// Geographic filter applied at load time.
    pub bounds: BoundingBox,
    /// Severity weights.
    pub weights: WeightTable,
    /// Hotspot detection parameters and runtime switch.
    pub spatial: SpatialConfig,
    /// Forecast parameters and runtime switch.
    pub forecast: ForecastConfig,
}

/// The analytic parameters echoed into the manifest.
///
/// Deliberately excludes filesystem paths: verification compares what
/// shaped the artifacts, not where they were stored.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunParams {
    bounds: BoundingBox,
    weights: WeightTable,
    spatial: SpatialConfig,
    forecast: ForecastConfig,
}

/// Artifact-by-artifact outcome of a reproducibility check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    /// Version label that was checked.
    pub version: String,
    /// Whether the source file still hashes to the recorded revision.
    pub source_revision_matched: bool,
    /// One diff per artifact name, in recorded order.
    pub artifacts: Vec<ArtifactDiff>,
}

impl VerifyReport {
    /// `true` when the source revision and every artifact matched.
    #[must_use]
    pub fn is_reproducible(&self) -> bool {
        self.source_revision_matched && self.artifacts.iter().all(|d| d.matched)
    }

    /// The diffs that did not match.
    #[must_use]
    pub fn mismatches(&self) -> Vec<&ArtifactDiff> {
        self.artifacts.iter().filter(|d| !d.matched).collect()
    }
}

/// Sequences one export run end to end.
///
/// Both optional capabilities are resolved once at construction; the
/// stages afterwards just run and read availability off their results.
/// The stage cache is owned here, scoped by the configured directory,
/// so tests and verification runs substitute their own.
pub struct Orchestrator {
    config: ExportConfig,
    spatial: SpatialEngine,
    forecast: ForecastEngine,
    cache: CacheStore,
}

impl Orchestrator {
    /// Builds an orchestrator, resolving both optional capabilities.
    #[must_use]
    pub fn new(config: ExportConfig) -> Self {
        let spatial = SpatialEngine::resolve(config.spatial.clone());
        let forecast = ForecastEngine::resolve(config.forecast.clone());
        let cache = CacheStore::new(config.cache_dir.clone());
        Self {
            config,
            spatial,
            forecast,
            cache,
        }
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub const fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Runs every export stage exactly once and writes the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is unavailable, the version was
    /// already exported, or an artifact or the manifest cannot be
    /// written. Unavailable optional capabilities are not errors.
    pub fn export_all(
        &mut self,
        version: &str,
        progress: &dyn ProgressCallback,
    ) -> Result<Manifest, ExportError> {
        let started = Instant::now();
        let output_dir = self.config.output_dir.clone();
        fs::create_dir_all(&output_dir).map_err(|source| ExportError::Io {
            path: output_dir.clone(),
            source,
        })?;
        if manifest_exists(&output_dir, version) {
            return Err(ExportError::VersionExists {
                version: version.to_string(),
            });
        }
        log::info!("Exporting version {version} to {}", output_dir.display());

        // 4 temporal + forecast + 2 spatial artifacts, then the manifest.
        progress.set_total(8);
        progress.set_message(format!("Loading {}", self.config.source.display()));

        let (outcome, source_revision) = self.load_cached()?;
        let LoadOutcome { records, report } = outcome;
        log::info!(
            "Loaded {} of {} rows ({} rejected, {} without geometry)",
            report.rows_loaded,
            report.rows_total,
            report.rows_rejected(),
            report.coordinates_nulled
        );

        let params = encode_json("params", &self.run_params())?;
        let mut manifest = Manifest::new(version, source_revision.clone(), params, report);

        for &granularity in Granularity::all() {
            progress.set_message(format!("Aggregating {granularity} counts"));
            let rows = aggregate(&records, granularity);
            let bytes = render_csv(&rows).map_err(|source| ExportError::Csv {
                name: naming::temporal_name(granularity),
                source,
            })?;
            let artifact = self.write_artifact(
                naming::temporal_name(granularity),
                &naming::temporal_file(granularity, version),
                &bytes,
                json!({ "granularity": granularity }),
            )?;
            manifest.artifacts.push(artifact);
            progress.inc(1);
        }

        progress.set_message("Forecasting monthly volume".to_string());
        let forecast = self.forecast_cached(&records, &source_revision)?;
        log::info!(
            "Forecast covers {} periods with the {} model",
            forecast.forecast.len(),
            forecast.model
        );
        let forecast_params = encode_json(naming::FORECAST, self.forecast.config())?;
        let bytes = encode_pretty(naming::FORECAST, &forecast)?;
        let artifact = self.write_artifact(
            naming::FORECAST,
            &naming::forecast_file(version),
            &bytes,
            forecast_params,
        )?;
        manifest.artifacts.push(artifact);
        progress.inc(1);

        progress.set_message("Detecting hotspots".to_string());
        let spatial_params = encode_json(naming::HOTSPOTS, self.spatial.config())?;
        let fingerprint = self
            .hotspot_fingerprint(&source_revision)
            .map_err(|source| ExportError::Encode {
                name: naming::HOTSPOTS,
                source,
            })?;
        let engine = &self.spatial;
        let detection = self
            .cache
            .get_or_compute("hotspots", &fingerprint, || engine.detect_hotspots(&records));
        let artifact = match detection {
            Ok(set) => {
                log::info!(
                    "Found {} hotspot clusters ({} noise points)",
                    set.clusters.len(),
                    set.noise_count
                );
                let bytes = encode_pretty(naming::HOTSPOTS, &set.to_geojson())?;
                self.write_artifact(
                    naming::HOTSPOTS,
                    &naming::hotspots_file(version),
                    &bytes,
                    spatial_params,
                )?
            }
            Err(error) => {
                log::warn!("Hotspot artifact omitted: {error}");
                Artifact::omitted(naming::HOTSPOTS, error.to_string(), spatial_params)
            }
        };
        manifest.artifacts.push(artifact);
        progress.inc(1);

        progress.set_message("Scoring administrative areas".to_string());
        let severity_params = json!({
            "weights": self.config.weights,
            "normalizePerThousand": self.config.spatial.normalize_per_thousand,
        });
        let artifact = if let Some(boundaries) = self.config.boundaries.clone() {
            match self
                .spatial
                .score_areas(&records, &boundaries, &self.config.weights)
            {
                Ok(set) => {
                    log::info!(
                        "Scored {} areas (combined severity {:.1})",
                        set.scores.len(),
                        combined_score(&set.scores)
                    );
                    let bytes = encode_pretty(naming::SEVERITY, &set.collection)?;
                    self.write_artifact(
                        naming::SEVERITY,
                        &naming::severity_file(version),
                        &bytes,
                        severity_params,
                    )?
                }
                Err(error) => {
                    log::warn!("Severity artifact omitted: {error}");
                    Artifact::omitted(naming::SEVERITY, error.to_string(), severity_params)
                }
            }
        } else {
            log::info!("No boundaries file configured, omitting the severity artifact");
            Artifact::omitted(naming::SEVERITY, "no boundaries file configured", severity_params)
        };
        manifest.artifacts.push(artifact);
        progress.inc(1);

        progress.set_message("Writing manifest".to_string());
        write_manifest(&output_dir, &manifest)?;
        progress.inc(1);
        progress.finish(format!("Exported version {version}"));
        log::info!(
            "Export {version} complete: {}/{} artifacts written, cache {} hits / {} misses, {:.2?} elapsed",
            manifest.written_count(),
            manifest.artifacts.len(),
            self.cache.hits(),
            self.cache.misses(),
            started.elapsed()
        );
        Ok(manifest)
    }

    /// Re-runs the export for `version` and compares artifact hashes.
    ///
    /// The re-run uses a scratch directory with a fresh cache inside
    /// it, so it never touches the recorded artifacts or the shared
    /// cache. Differences are reported artifact by artifact with both
    /// hashes; the scratch tree is kept on mismatch for inspection and
    /// removed when the check passes.
    ///
    /// # Errors
    ///
    /// Returns an error if no manifest exists for `version`, the
    /// recorded parameters do not match this configuration, or the
    /// re-run itself fails.
    pub fn verify_reproducible(
        &self,
        version: &str,
        progress: &dyn ProgressCallback,
    ) -> Result<VerifyReport, ExportError> {
        let recorded = load_manifest(&self.config.output_dir, version)?;
        let params = encode_json("params", &self.run_params())?;
        if recorded.params != params {
            return Err(ExportError::ParamsDrift {
                version: version.to_string(),
            });
        }

        let scratch = self.config.output_dir.join(format!(".verify_{version}"));
        if scratch.exists() {
            fs::remove_dir_all(&scratch).map_err(|source| ExportError::Io {
                path: scratch.clone(),
                source,
            })?;
        }

        let mut rerun = Self::new(ExportConfig {
            output_dir: scratch.clone(),
            cache_dir: scratch.join("cache"),
            ..self.config.clone()
        });
        let actual = rerun.export_all(version, progress)?;

        let report = VerifyReport {
            version: version.to_string(),
            source_revision_matched: actual.source_revision == recorded.source_revision,
            artifacts: compare(&recorded, &actual),
        };

        if report.is_reproducible() {
            log::info!(
                "Version {version} verified reproducible ({} artifacts)",
                report.artifacts.len()
            );
            if let Err(e) = fs::remove_dir_all(&scratch) {
                log::warn!("Failed to remove scratch directory {}: {e}", scratch.display());
            }
        } else {
            log::warn!(
                "Version {version} is NOT reproducible ({} mismatches); re-run kept under {}",
                report.mismatches().len(),
                scratch.display()
            );
        }
        Ok(report)
    }

    /// Loads the source through the stage cache.
    ///
    /// Reads the source bytes once: the same bytes feed the revision
    /// hash, the cache fingerprint, and the parser.
    fn load_cached(&mut self) -> Result<(LoadOutcome, String), ExportError> {
        let source_bytes =
            fs::read(&self.config.source).map_err(|source| LoaderError::DataUnavailable {
                path: self.config.source.display().to_string(),
                source,
            })?;
        let source_revision = hash_bytes(&source_bytes);
        let fingerprint = Fingerprint::new()
            .with_str("source", &source_revision)
            .with_param("bounds", &self.config.bounds)
            .map_err(|source| ExportError::Encode {
                name: "fingerprint",
                source,
            })?;
        let bounds = self.config.bounds;
        let outcome = self.cache.get_or_compute("load", &fingerprint, || {
            load_from_reader(source_bytes.as_slice(), &bounds)
        })?;
        Ok((outcome, source_revision))
    }

    fn forecast_cached(
        &mut self,
        records: &[IncidentRecord],
        source_revision: &str,
    ) -> Result<ForecastSeries, ExportError> {
        let fingerprint = self
            .forecast_fingerprint(source_revision)
            .map_err(|source| ExportError::Encode {
                name: naming::FORECAST,
                source,
            })?;
        let series = monthly_series(records);
        let engine = &self.forecast;
        self.cache.get_or_compute("forecast", &fingerprint, || {
            Ok::<_, ExportError>(engine.forecast(&series))
        })
    }

    fn forecast_fingerprint(
        &self,
        source_revision: &str,
    ) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::new()
            .with_str("source", source_revision)
            .with_param("bounds", &self.config.bounds)?
            .with_param("forecast", self.forecast.config())?
            .with_param("seasonal", &self.forecast.is_primary_available())
    }

    fn hotspot_fingerprint(&self, source_revision: &str) -> Result<Fingerprint, serde_json::Error> {
        Fingerprint::new()
            .with_str("source", source_revision)
            .with_param("bounds", &self.config.bounds)?
            .with_param("spatial", self.spatial.config())?
            .with_param("clustering", &self.spatial.is_available())
    }

    fn run_params(&self) -> RunParams {
        RunParams {
            bounds: self.config.bounds,
            weights: self.config.weights,
            spatial: self.config.spatial.clone(),
            forecast: self.config.forecast.clone(),
        }
    }

    /// Writes one artifact whole-buffer, renames it into place, and
    /// returns its manifest entry.
    fn write_artifact(
        &self,
        name: &str,
        file_name: &str,
        bytes: &[u8],
        params: serde_json::Value,
    ) -> Result<Artifact, ExportError> {
        let path = self.config.output_dir.join(file_name);
        let tmp_path = self.config.output_dir.join(format!("{file_name}.tmp"));
        fs::write(&tmp_path, bytes).map_err(|source| ExportError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &path).map_err(|source| ExportError::Io {
            path: path.clone(),
            source,
        })?;
        let hash = hash_bytes(bytes);
        log::info!("Wrote {} ({} bytes)", path.display(), bytes.len());
        Ok(Artifact::written(name, file_name, hash, params))
    }
}

/// Renders temporal rows as CSV with a `period,category,count` header.
///
/// The header is written explicitly so an empty rollup still renders a
/// well-formed artifact.
fn render_csv(rows: &[TemporalAggregate]) -> Result<Vec<u8>, csv::Error> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        writer.write_record(["period", "category", "count"])?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    Ok(buf)
}

fn encode_json<T: Serialize>(
    name: &'static str,
    value: &T,
) -> Result<serde_json::Value, ExportError> {
    serde_json::to_value(value).map_err(|source| ExportError::Encode { name, source })
}

fn encode_pretty<T: Serialize>(name: &'static str, value: &T) -> Result<Vec<u8>, ExportError> {
    serde_json::to_vec_pretty(value).map_err(|source| ExportError::Encode { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use incident_atlas_manifest::ArtifactStatus;
    use std::fmt::Write as _;
    use std::path::Path;

    fn sample_csv(rows: usize) -> String {
        let mut csv = String::from("occurred_at,category,latitude,longitude,district\n");
        for i in 0..rows {
            let category = match i % 3 {
                0 => "ASSAULT",
                1 => "BURGLARY",
                _ => "THEFT",
            };
            let month = i % 12 + 1;
            let day = i % 28 + 1;
            let hour = i % 24;
            #[allow(clippy::cast_precision_loss)]
            let lat = 41.80 + (i % 40) as f64 * 0.0002;
            #[allow(clippy::cast_precision_loss)]
            let lon = -87.70 + (i / 40) as f64 * 0.0002;
            writeln!(
                csv,
                "2023-{month:02}-{day:02}T{hour:02}:30:00,{category},{lat},{lon},D{}",
                i % 4
            )
            .unwrap();
        }
        csv
    }

    fn boundaries_geojson() -> &'static str {
        r#"{
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"id": "D1", "name": "Near West", "population": 50000},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[
                        [-87.75, 41.75], [-87.60, 41.75],
                        [-87.60, 41.90], [-87.75, 41.90],
                        [-87.75, 41.75]
                    ]]
                }
            }]
        }"#
    }

    fn config(dir: &Path) -> ExportConfig {
        ExportConfig {
            source: dir.join("incidents.csv"),
            boundaries: None,
            output_dir: dir.join("out"),
            cache_dir: dir.join("cache"),
            bounds: BoundingBox::contiguous_us(),
            weights: WeightTable::default_table(),
            spatial: SpatialConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }

    fn write_source(dir: &Path, rows: usize) {
        std::fs::write(dir.join("incidents.csv"), sample_csv(rows)).unwrap();
    }

    #[test]
    fn export_writes_required_artifacts_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 120);
        let mut orchestrator = Orchestrator::new(config(dir.path()));

        let manifest = orchestrator.export_all("v1", &NullProgress).unwrap();

        assert_eq!(manifest.artifacts.len(), 7);
        for name in naming::REQUIRED_ARTIFACTS {
            let artifact = manifest.artifact(name).unwrap();
            assert_eq!(artifact.status, ArtifactStatus::Written, "{name}");
            let file = dir.path().join("out").join(artifact.path.as_deref().unwrap());
            assert!(file.exists(), "{name} file missing");
            assert_eq!(
                incident_atlas_manifest::hash_file(&file).unwrap(),
                artifact.hash.clone().unwrap(),
                "{name} file must hash to its recorded value"
            );
        }
        assert!(manifest_exists(&dir.path().join("out"), "v1"));

        let forecast_path = dir.path().join("out").join(naming::forecast_file("v1"));
        let body: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(forecast_path).unwrap()).unwrap();
        assert!(body.get("model").is_some());
        assert_eq!(body["forecast"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn versions_are_append_only() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 30);
        let mut orchestrator = Orchestrator::new(config(dir.path()));

        orchestrator.export_all("v1", &NullProgress).unwrap();
        let err = orchestrator.export_all("v1", &NullProgress).unwrap_err();
        assert!(matches!(err, ExportError::VersionExists { .. }));

        // A different label is still fine.
        orchestrator.export_all("v2", &NullProgress).unwrap();
    }

    #[test]
    fn independent_runs_produce_identical_hashes() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write_source(dir_a.path(), 200);
        write_source(dir_b.path(), 200);

        let manifest_a = Orchestrator::new(config(dir_a.path()))
            .export_all("v1", &NullProgress)
            .unwrap();
        let manifest_b = Orchestrator::new(config(dir_b.path()))
            .export_all("v1", &NullProgress)
            .unwrap();

        assert_eq!(manifest_a.source_revision, manifest_b.source_revision);
        assert_eq!(manifest_a.artifacts.len(), manifest_b.artifacts.len());
        for artifact in &manifest_a.artifacts {
            let other = manifest_b.artifact(&artifact.name).unwrap();
            assert_eq!(artifact.hash, other.hash, "{}", artifact.name);
            assert_eq!(artifact.status, other.status, "{}", artifact.name);
        }
    }

    #[test]
    fn repeat_exports_hit_the_cache_with_equal_output() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 80);
        let mut orchestrator = Orchestrator::new(config(dir.path()));

        let first = orchestrator.export_all("v1", &NullProgress).unwrap();
        let second = orchestrator.export_all("v2", &NullProgress).unwrap();

        assert!(orchestrator.cache.hits() > 0);
        for artifact in &first.artifacts {
            let other = second.artifact(&artifact.name).unwrap();
            assert_eq!(artifact.hash, other.hash, "{}", artifact.name);
        }
    }

    #[test]
    fn disabled_spatial_omits_only_the_spatial_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 1000);
        let mut cfg = config(dir.path());
        cfg.spatial.enabled = false;
        let mut orchestrator = Orchestrator::new(cfg);

        let manifest = orchestrator.export_all("v1", &NullProgress).unwrap();

        for name in naming::OPTIONAL_ARTIFACTS {
            let artifact = manifest.artifact(name).unwrap();
            assert_eq!(artifact.status, ArtifactStatus::Omitted, "{name}");
            assert!(artifact.reason.is_some(), "{name}");
            assert!(artifact.hash.is_none(), "{name}");
        }
        for name in naming::REQUIRED_ARTIFACTS {
            assert_eq!(
                manifest.artifact(name).unwrap().status,
                ArtifactStatus::Written,
                "{name}"
            );
        }
        assert!(!dir.path().join("out").join(naming::hotspots_file("v1")).exists());
        assert!(!dir.path().join("out").join(naming::severity_file("v1")).exists());
    }

    #[cfg(feature = "clustering")]
    #[test]
    fn boundaries_enable_the_severity_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 300);
        std::fs::write(dir.path().join("areas.geojson"), boundaries_geojson()).unwrap();
        let mut cfg = config(dir.path());
        cfg.boundaries = Some(dir.path().join("areas.geojson"));
        let mut orchestrator = Orchestrator::new(cfg);

        let manifest = orchestrator.export_all("v1", &NullProgress).unwrap();

        let severity = manifest.artifact(naming::SEVERITY).unwrap();
        assert_eq!(severity.status, ArtifactStatus::Written);
        let body: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("out").join(naming::severity_file("v1")))
                .unwrap(),
        )
        .unwrap();
        let features = body["features"].as_array().unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0]["properties"]["areaId"], "D1");
        assert!(features[0]["properties"]["score"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn an_unreadable_boundaries_file_omits_severity_without_failing() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 50);
        let mut cfg = config(dir.path());
        cfg.boundaries = Some(dir.path().join("nope.geojson"));
        let mut orchestrator = Orchestrator::new(cfg);

        let manifest = orchestrator.export_all("v1", &NullProgress).unwrap();

        let severity = manifest.artifact(naming::SEVERITY).unwrap();
        assert_eq!(severity.status, ArtifactStatus::Omitted);
        for name in naming::REQUIRED_ARTIFACTS {
            assert_eq!(
                manifest.artifact(name).unwrap().status,
                ArtifactStatus::Written,
                "{name}"
            );
        }
    }

    #[test]
    fn missing_source_is_fatal_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut orchestrator = Orchestrator::new(config(dir.path()));

        let err = orchestrator.export_all("v1", &NullProgress).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Data(LoaderError::DataUnavailable { .. })
        ));
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert!(entries.is_empty());
    }

    #[test]
    fn verification_passes_on_an_untouched_run() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 150);
        let mut orchestrator = Orchestrator::new(config(dir.path()));
        orchestrator.export_all("v1", &NullProgress).unwrap();

        let report = orchestrator
            .verify_reproducible("v1", &NullProgress)
            .unwrap();

        assert!(report.is_reproducible());
        assert!(report.mismatches().is_empty());
        assert_eq!(report.artifacts.len(), 7);
        assert!(!dir.path().join("out").join(".verify_v1").exists());
    }

    #[test]
    fn verification_reports_a_changed_source_per_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 90);
        let mut orchestrator = Orchestrator::new(config(dir.path()));
        orchestrator.export_all("v1", &NullProgress).unwrap();

        write_source(dir.path(), 91);
        let report = orchestrator
            .verify_reproducible("v1", &NullProgress)
            .unwrap();

        assert!(!report.is_reproducible());
        assert!(!report.source_revision_matched);
        let drifted = report
            .mismatches()
            .into_iter()
            .find(|d| d.name == naming::TEMPORAL_YEAR)
            .unwrap();
        assert!(drifted.expected_hash.is_some());
        assert!(drifted.actual_hash.is_some());
        assert_ne!(drifted.expected_hash, drifted.actual_hash);
        assert!(dir.path().join("out").join(".verify_v1").exists());
    }

    #[test]
    fn verification_refuses_drifted_parameters() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 40);
        let mut orchestrator = Orchestrator::new(config(dir.path()));
        orchestrator.export_all("v1", &NullProgress).unwrap();

        let mut cfg = config(dir.path());
        cfg.forecast.horizon = 12;
        let other = Orchestrator::new(cfg);
        let err = other.verify_reproducible("v1", &NullProgress).unwrap_err();
        assert!(matches!(err, ExportError::ParamsDrift { .. }));
    }

    #[test]
    fn verifying_an_unknown_version_reports_the_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        write_source(dir.path(), 10);
        let orchestrator = Orchestrator::new(config(dir.path()));
        let err = orchestrator.verify_reproducible("v1", &NullProgress).unwrap_err();
        assert!(matches!(
            err,
            ExportError::Manifest(ManifestError::Missing { .. })
        ));
    }

    #[test]
    fn rendered_csv_has_the_stable_header() {
        let rows = vec![TemporalAggregate {
            period: "2023".to_string(),
            category: incident_atlas_incident_models::IncidentClass::Violent,
            count: 4,
        }];
        let bytes = render_csv(&rows).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("period,category,count\n"));
        assert!(text.contains("2023,VIOLENT,4"));
        assert_eq!(text.matches("period").count(), 1, "header must appear once");
    }

    #[test]
    fn empty_rollup_still_renders_the_header() {
        let bytes = render_csv(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "period,category,count\n");
    }
}
