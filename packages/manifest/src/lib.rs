#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Run manifests and the versioned artifact contract.
//!
//! Every export run ends in exactly one manifest: the authoritative
//! record of which artifacts were produced (or explicitly omitted),
//! their content hashes, the parameters that shaped them, and the
//! validation outcome of the source load. Manifests are append-only per
//! version label and written atomically, so the output directory can
//! always be trusted mid-crash. [`compare`] turns two manifests into
//! per-artifact diffs, which is how reproducibility checks report
//! drift.

pub mod naming;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::Utc;
use incident_atlas_loader::ValidationReport;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Bumped whenever the manifest schema changes shape.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors raised while reading or writing manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// No manifest file exists for the requested version.
    #[error("No manifest found at {path}")]
    Missing {
        /// Path that was probed.
        path: PathBuf,
    },
    /// The manifest file could not be read or written.
    #[error("Failed to access manifest {path}: {source}")]
    Io {
        /// Path of the failed access.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The manifest file exists but does not parse as this schema.
    #[error("Failed to parse manifest {path}: {source}")]
    Parse {
        /// Path of the unparseable file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
    /// The manifest could not be serialized.
    #[error("Failed to encode manifest: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Whether an artifact was produced or deliberately skipped.
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
pub enum ArtifactStatus {
    /// The artifact file exists and is hashed.
    Written,
    /// The artifact was skipped, with a recorded reason.
    Omitted,
}

/// One named, versioned output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Logical name from [`naming`].
    pub name: String,
    /// Written or omitted.
    pub status: ArtifactStatus,
    /// File name relative to the output directory. Absent when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// SHA-256 of the file contents, lowercase hex. Absent when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Why the artifact was omitted. Absent when written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Parameters that shaped this artifact.
    pub params: Value,
}

impl Artifact {
    /// A written artifact entry.
    #[must_use]
    pub fn written(
        name: impl Into<String>,
        path: impl Into<String>,
        hash: impl Into<String>,
        params: Value,
    ) -> Self {
        Self {
            name: name.into(),
            status: ArtifactStatus::Written,
            path: Some(path.into()),
            hash: Some(hash.into()),
            reason: None,
            params,
        }
    }

    /// An omitted artifact entry carrying the omission reason.
    #[must_use]
    pub fn omitted(name: impl Into<String>, reason: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            status: ArtifactStatus::Omitted,
            path: None,
            hash: None,
            reason: Some(reason.into()),
            params,
        }
    }
}

/// The authoritative record of one export run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version of this document.
    pub manifest_version: u32,
    /// Version label the run was exported under.
    pub version: String,
    /// UTC timestamp of the run, RFC 3339.
    pub generated_at: String,
    /// SHA-256 of the source file the run consumed.
    pub source_revision: String,
    /// Run parameters, echoed for reproduction.
    pub params: Value,
    /// What validation accepted, repaired, and rejected.
    pub validation: ValidationReport,
    /// Artifact entries in production order.
    pub artifacts: Vec<Artifact>,
}

impl Manifest {
    /// A manifest with no artifacts yet, stamped with the current time.
    #[must_use]
    pub fn new(
        version: impl Into<String>,
        source_revision: impl Into<String>,
        params: Value,
        validation: ValidationReport,
    ) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION,
            version: version.into(),
            generated_at: Utc::now().to_rfc3339(),
            source_revision: source_revision.into(),
            params,
            validation,
            artifacts: Vec::new(),
        }
    }

    /// Finds an artifact entry by logical name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// Count of entries with [`ArtifactStatus::Written`].
    #[must_use]
    pub fn written_count(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| a.status == ArtifactStatus::Written)
            .count()
    }
}

/// SHA-256 of a byte buffer, lowercase hex.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's contents, lowercase hex.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<String, io::Error> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Returns `true` if a manifest for `version` already exists in `dir`.
#[must_use]
pub fn manifest_exists(dir: &Path, version: &str) -> bool {
    dir.join(naming::manifest_file(version)).exists()
}

/// Writes the manifest to `dir/manifest_<version>.json`.
///
/// Uses an atomic write pattern (write to `.tmp`, then rename) so an
/// interrupted run never leaves a corrupt manifest behind. Returns the
/// final path.
///
/// # Errors
///
/// Returns an error if serialization or the file write fails.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<PathBuf, ManifestError> {
    let path = dir.join(naming::manifest_file(&manifest.version));
    let tmp_path = dir.join(format!("{}.tmp", naming::manifest_file(&manifest.version)));
    let contents = serde_json::to_string_pretty(manifest)?;
    fs::write(&tmp_path, contents).map_err(|source| ManifestError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, &path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;
    log::info!("Saved manifest to {}", path.display());
    Ok(path)
}

/// Loads the manifest for `version` from `dir`.
///
/// # Errors
///
/// Returns [`ManifestError::Missing`] if no manifest exists for the
/// version, or an error if the file cannot be read or parsed.
pub fn load_manifest(dir: &Path, version: &str) -> Result<Manifest, ManifestError> {
    let path = dir.join(naming::manifest_file(version));
    if !path.exists() {
        return Err(ManifestError::Missing { path });
    }
    let contents = fs::read_to_string(&path).map_err(|source| ManifestError::Io {
        path: path.clone(),
        source,
    })?;
    let manifest =
        serde_json::from_str(&contents).map_err(|source| ManifestError::Parse {
            path: path.clone(),
            source,
        })?;
    log::debug!("Loaded manifest from {}", path.display());
    Ok(manifest)
}

/// One artifact's outcome in a manifest comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDiff {
    /// Logical artifact name.
    pub name: String,
    /// Status recorded in the reference manifest.
    pub expected_status: ArtifactStatus,
    /// Status produced by the comparison run.
    pub actual_status: ArtifactStatus,
    /// Hash recorded in the reference manifest, if written.
    pub expected_hash: Option<String>,
    /// Hash produced by the comparison run, if written.
    pub actual_hash: Option<String>,
    /// `true` when status and hash both agree.
    pub matched: bool,
}

/// Compares two manifests artifact-by-artifact.
///
/// Every artifact name present in either manifest yields one diff, in
/// the expected manifest's order with extras appended; a name missing
/// from one side counts as omitted there. A diff matches only when both
/// the status and the content hash agree — never as a single collapsed
/// boolean for the whole run.
#[must_use]
pub fn compare(expected: &Manifest, actual: &Manifest) -> Vec<ArtifactDiff> {
    let mut diffs = Vec::new();
    for artifact in &expected.artifacts {
        diffs.push(diff_pair(
            &artifact.name,
            Some(artifact),
            actual.artifact(&artifact.name),
        ));
    }
    for artifact in &actual.artifacts {
        if expected.artifact(&artifact.name).is_none() {
            diffs.push(diff_pair(&artifact.name, None, Some(artifact)));
        }
    }
    diffs
}

fn diff_pair(name: &str, expected: Option<&Artifact>, actual: Option<&Artifact>) -> ArtifactDiff {
    let expected_status = expected.map_or(ArtifactStatus::Omitted, |a| a.status);
    let actual_status = actual.map_or(ArtifactStatus::Omitted, |a| a.status);
    let expected_hash = expected.and_then(|a| a.hash.clone());
    let actual_hash = actual.and_then(|a| a.hash.clone());
    let matched = expected_status == actual_status && expected_hash == actual_hash;
    ArtifactDiff {
        name: name.to_string(),
        expected_status,
        actual_status,
        expected_hash,
        actual_hash,
        matched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_manifest() -> Manifest {
        let mut manifest = Manifest::new(
            "v1",
            hash_bytes(b"source"),
            json!({"bbox": [-125.0, 24.0, -66.0, 50.0]}),
            ValidationReport {
                rows_total: 10,
                rows_loaded: 9,
                rejected_malformed: 1,
                ..ValidationReport::default()
            },
        );
        manifest.artifacts.push(Artifact::written(
            naming::FORECAST,
            naming::forecast_file("v1"),
            hash_bytes(b"forecast"),
            json!({"horizon": 6}),
        ));
        manifest.artifacts.push(Artifact::omitted(
            naming::HOTSPOTS,
            "spatial support unavailable",
            json!({}),
        ));
        manifest
    }

    #[test]
    fn hashes_are_stable_and_hex() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
    }

    #[test]
    fn file_hash_matches_byte_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.bin");
        std::fs::write(&path, b"payload").unwrap();
        assert_eq!(hash_file(&path).unwrap(), hash_bytes(b"payload"));
    }

    #[test]
    fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = sample_manifest();

        assert!(!manifest_exists(dir.path(), "v1"));
        write_manifest(dir.path(), &manifest).unwrap();
        assert!(manifest_exists(dir.path(), "v1"));

        let loaded = load_manifest(dir.path(), "v1").unwrap();
        assert_eq!(loaded, manifest);
    }

    #[test]
    fn loading_an_unknown_version_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_manifest(dir.path(), "v9").unwrap_err();
        assert!(matches!(err, ManifestError::Missing { .. }));
    }

    #[test]
    fn written_entries_skip_the_reason_and_omitted_skip_the_hash() {
        let manifest = sample_manifest();
        let written = serde_json::to_string(manifest.artifact(naming::FORECAST).unwrap()).unwrap();
        let omitted = serde_json::to_string(manifest.artifact(naming::HOTSPOTS).unwrap()).unwrap();

        assert!(!written.contains("reason"));
        assert!(written.contains("\"status\":\"written\""));
        assert!(!omitted.contains("hash"));
        assert!(omitted.contains("\"status\":\"omitted\""));
        assert!(omitted.contains("spatial support unavailable"));
    }

    #[test]
    fn identical_manifests_compare_clean() {
        let manifest = sample_manifest();
        let diffs = compare(&manifest, &manifest);
        assert_eq!(diffs.len(), 2);
        assert!(diffs.iter().all(|d| d.matched));
    }

    #[test]
    fn a_drifted_hash_is_reported_with_both_values() {
        let expected = sample_manifest();
        let mut actual = sample_manifest();
        actual.artifacts[0].hash = Some(hash_bytes(b"different"));

        let diffs = compare(&expected, &actual);
        let drifted = diffs.iter().find(|d| d.name == naming::FORECAST).unwrap();
        assert!(!drifted.matched);
        assert_eq!(drifted.expected_hash.as_deref(), Some(hash_bytes(b"forecast").as_str()));
        assert_eq!(
            drifted.actual_hash.as_deref(),
            Some(hash_bytes(b"different").as_str())
        );
        assert!(diffs.iter().find(|d| d.name == naming::HOTSPOTS).unwrap().matched);
    }

    #[test]
    fn a_status_flip_is_a_mismatch() {
        let expected = sample_manifest();
        let mut actual = sample_manifest();
        actual.artifacts[1] = Artifact::written(
            naming::HOTSPOTS,
            naming::hotspots_file("v1"),
            hash_bytes(b"clusters"),
            json!({}),
        );

        let diffs = compare(&expected, &actual);
        let flipped = diffs.iter().find(|d| d.name == naming::HOTSPOTS).unwrap();
        assert!(!flipped.matched);
        assert_eq!(flipped.expected_status, ArtifactStatus::Omitted);
        assert_eq!(flipped.actual_status, ArtifactStatus::Written);
    }

    #[test]
    fn an_artifact_absent_from_one_side_still_gets_a_diff() {
        let expected = sample_manifest();
        let mut actual = sample_manifest();
        actual.artifacts.remove(1);

        let diffs = compare(&expected, &actual);
        assert_eq!(diffs.len(), 2);
        let absent = diffs.iter().find(|d| d.name == naming::HOTSPOTS).unwrap();
        assert_eq!(absent.actual_status, ArtifactStatus::Omitted);
    }
}
