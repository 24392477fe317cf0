#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Density-based hotspot detection and boundary severity scoring.
//!
//! The clustering capability is resolved once, at engine construction:
//! it requires the `clustering` build feature and the runtime
//! configuration switch. When either is missing, every spatial
//! operation reports [`SpatialError::Unavailable`] and the caller omits
//! the spatial artifacts instead of fabricating them.
//!
//! Only records with live geometry participate here. Records whose
//! coordinates were nulled during validation are already counted in
//! the temporal rollups but are invisible to clustering and scoring.

#[cfg(feature = "clustering")]
mod boundaries;
#[cfg(feature = "clustering")]
mod cluster;

use std::path::Path;

use incident_atlas_incident_models::{IncidentRecord, WeightTable};
use serde::{Deserialize, Serialize};

#[cfg(feature = "clustering")]
use incident_atlas_incident_models::IncidentClass;

/// Errors raised by spatial operations.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// The clustering capability is not compiled in or is disabled.
    #[error("Spatial clustering capability is unavailable ({reason})")]
    Unavailable {
        /// Which leg of the capability resolution was missing.
        reason: &'static str,
    },

    /// The boundaries file could not be read.
    #[error("Failed to read boundaries file {path}: {source}")]
    BoundariesUnreadable {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The boundaries document was not usable `GeoJSON`.
    #[error("Invalid boundaries document: {message}")]
    BoundariesInvalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Spatial stage configuration, recorded in the manifest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpatialConfig {
    /// Runtime switch for the clustering capability.
    pub enabled: bool,
    /// DBSCAN neighborhood radius in meters.
    pub epsilon_meters: f64,
    /// Minimum neighborhood size (the point itself included) for a
    /// core point.
    pub min_points: usize,
    /// Emit per-thousand-residents severity alongside the raw score
    /// for areas that carry a population.
    pub normalize_per_thousand: bool,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            epsilon_meters: 250.0,
            min_points: 5,
            normalize_per_thousand: false,
        }
    }
}

/// One detected hotspot cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotCluster {
    /// Cluster label. Arbitrary: stable for a given point set but not
    /// meaningful across different inputs.
    pub id: usize,
    /// Number of member points.
    pub count: usize,
    /// Mean member position as `[longitude, latitude]`.
    pub centroid: [f64; 2],
    /// Indices of member records in the validated record set.
    pub members: Vec<usize>,
    /// Convex hull ring of the members, closed, or empty when the
    /// cluster is too small to enclose an area.
    pub hull: Vec<[f64; 2]>,
}

/// Full output of one clustering pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotspotSet {
    /// Detected clusters, ordered by label.
    pub clusters: Vec<HotspotCluster>,
    /// Points that met no density threshold. Excluded from cluster
    /// output but still present in every non-spatial rollup.
    pub noise_count: usize,
}

impl HotspotSet {
    /// Renders the clusters as a `GeoJSON` `FeatureCollection`.
    ///
    /// Clusters with a hull become polygon features; smaller ones fall
    /// back to a point at their centroid.
    #[must_use]
    pub fn to_geojson(&self) -> serde_json::Value {
        let features: Vec<serde_json::Value> = self
            .clusters
            .iter()
            .map(|cluster| {
                let geometry = if cluster.hull.len() >= 4 {
                    serde_json::json!({
                        "type": "Polygon",
                        "coordinates": [cluster.hull],
                    })
                } else {
                    serde_json::json!({
                        "type": "Point",
                        "coordinates": cluster.centroid,
                    })
                };
                serde_json::json!({
                    "type": "Feature",
                    "geometry": geometry,
                    "properties": {
                        "id": cluster.id,
                        "count": cluster.count,
                        "label": "cluster",
                        "centroid": cluster.centroid,
                    },
                })
            })
            .collect();
        serde_json::json!({
            "type": "FeatureCollection",
            "features": features,
        })
    }
}

/// Severity for one administrative area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeverityScore {
    /// Area identifier from the boundary properties.
    pub area_id: String,
    /// Area name, when the boundary carries one.
    pub area_name: Option<String>,
    /// Located violent incidents in the area.
    pub violent: u64,
    /// Located property incidents in the area.
    pub property: u64,
    /// Located other incidents in the area.
    pub other: u64,
    /// Weighted severity: `sum(count[class] * weight[class])`.
    pub score: f64,
    /// Resident population, when the boundary carries one.
    pub population: Option<u64>,
    /// Severity per thousand residents, when normalization is
    /// configured and the area has a population.
    pub score_per_thousand: Option<f64>,
}

/// Scored areas plus their rendered `GeoJSON` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaScoreSet {
    /// Per-area severity scores, ordered by area id.
    pub scores: Vec<SeverityScore>,
    /// `FeatureCollection` of boundary polygons with score properties.
    pub collection: serde_json::Value,
}

/// Combines severity across several areas.
///
/// Multi-area severity is a plain sum of the per-area scores; it is
/// never averaged or re-weighted by area size.
#[must_use]
pub fn combined_score(scores: &[SeverityScore]) -> f64 {
    scores.iter().map(|s| s.score).sum()
}

/// Spatial engine with its capability resolved at construction.
pub struct SpatialEngine {
    /// Why the capability is unavailable, or `None` when it can run.
    blocked: Option<&'static str>,
    config: SpatialConfig,
}

impl SpatialEngine {
    /// Resolves the clustering capability from the build and the
    /// runtime configuration.
    #[must_use]
    pub fn resolve(config: SpatialConfig) -> Self {
        let blocked = if !cfg!(feature = "clustering") {
            Some("clustering support not compiled in")
        } else if !config.enabled {
            Some("disabled by configuration")
        } else {
            None
        };
        if let Some(reason) = blocked {
            log::warn!(
                "Spatial capability unavailable ({reason}); spatial artifacts will be omitted"
            );
        }
        Self { blocked, config }
    }

    /// Returns `true` if spatial operations can run.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.blocked.is_none()
    }

    /// The configuration the engine was resolved with.
    #[must_use]
    pub const fn config(&self) -> &SpatialConfig {
        &self.config
    }

    /// Clusters the located records into density-based hotspots.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Unavailable`] when the capability is
    /// missing.
    pub fn detect_hotspots(&self, records: &[IncidentRecord]) -> Result<HotspotSet, SpatialError> {
        if let Some(reason) = self.blocked {
            return Err(SpatialError::Unavailable { reason });
        }
        #[cfg(not(feature = "clustering"))]
        {
            let _ = records;
            Err(SpatialError::Unavailable { reason: "clustering support not compiled in" })
        }
        #[cfg(feature = "clustering")]
        {
            let points: Vec<(usize, f64, f64)> = records
                .iter()
                .enumerate()
                .filter_map(|(i, r)| r.coordinates().map(|(lon, lat)| (i, lon, lat)))
                .collect();
            let set = cluster::dbscan(&points, self.config.epsilon_meters, self.config.min_points);
            log::info!(
                "Clustered {} located records into {} hotspots ({} noise)",
                points.len(),
                set.clusters.len(),
                set.noise_count
            );
            Ok(set)
        }
    }

    /// Scores each administrative area by weighted incident counts.
    ///
    /// Every boundary area yields a score row, zero-count areas
    /// included. Located records falling outside every polygon are
    /// attributed by their reported district id when it names a known
    /// area; the rest are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::Unavailable`] when the capability is
    /// missing, or a boundaries error when the file is unreadable or
    /// not usable `GeoJSON`.
    pub fn score_areas(
        &self,
        records: &[IncidentRecord],
        boundaries_path: &Path,
        weights: &WeightTable,
    ) -> Result<AreaScoreSet, SpatialError> {
        if let Some(reason) = self.blocked {
            return Err(SpatialError::Unavailable { reason });
        }
        #[cfg(not(feature = "clustering"))]
        {
            let _ = (records, boundaries_path, weights);
            Err(SpatialError::Unavailable { reason: "clustering support not compiled in" })
        }
        #[cfg(feature = "clustering")]
        {
            let areas = boundaries::Boundaries::from_geojson_file(boundaries_path)?;
            log::info!(
                "Loaded {} boundary areas from {}",
                areas.len(),
                boundaries_path.display()
            );

            let mut tallies: std::collections::BTreeMap<String, ClassTally> = areas
                .iter()
                .map(|area| (area.id.clone(), ClassTally::default()))
                .collect();

            let mut rescued = 0_usize;
            let mut unassigned = 0_usize;
            for record in records {
                let Some((lon, lat)) = record.coordinates() else {
                    continue;
                };
                if let Some(area) = areas.lookup(lon, lat) {
                    if let Some(tally) = tallies.get_mut(&area.id) {
                        tally.add(record.class);
                    }
                    continue;
                }
                let by_district = record.district.as_deref().and_then(|id| tallies.get_mut(id));
                if let Some(tally) = by_district {
                    tally.add(record.class);
                    rescued += 1;
                } else {
                    unassigned += 1;
                }
            }
            if rescued > 0 {
                log::debug!("{rescued} out-of-polygon records attributed by reported district id");
            }
            if unassigned > 0 {
                log::debug!("{unassigned} located records could not be attributed to any area");
            }

            let scores: Vec<SeverityScore> = tallies
                .iter()
                .map(|(id, tally)| {
                    let area = areas.get(id);
                    let score = tally.weighted(weights);
                    let population = area.and_then(|a| a.population);
                    let score_per_thousand = if self.config.normalize_per_thousand {
                        population.filter(|&p| p > 0).map(|p| {
                            #[allow(clippy::cast_precision_loss)]
                            let residents = p as f64;
                            score / residents * 1000.0
                        })
                    } else {
                        None
                    };
                    SeverityScore {
                        area_id: id.clone(),
                        area_name: area.and_then(|a| a.name.clone()),
                        violent: tally.violent,
                        property: tally.property,
                        other: tally.other,
                        score,
                        population,
                        score_per_thousand,
                    }
                })
                .collect();

            let collection = render_area_collection(&scores, &areas)?;
            Ok(AreaScoreSet { scores, collection })
        }
    }
}

#[cfg(feature = "clustering")]
#[derive(Debug, Clone, Copy, Default)]
struct ClassTally {
    violent: u64,
    property: u64,
    other: u64,
}

#[cfg(feature = "clustering")]
impl ClassTally {
    const fn add(&mut self, class: IncidentClass) {
        match class {
            IncidentClass::Violent => self.violent += 1,
            IncidentClass::Property => self.property += 1,
            IncidentClass::Other => self.other += 1,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn weighted(&self, weights: &WeightTable) -> f64 {
        self.violent as f64 * weights.weight(IncidentClass::Violent)
            + self.property as f64 * weights.weight(IncidentClass::Property)
            + self.other as f64 * weights.weight(IncidentClass::Other)
    }
}

#[cfg(feature = "clustering")]
fn render_area_collection(
    scores: &[SeverityScore],
    areas: &boundaries::Boundaries,
) -> Result<serde_json::Value, SpatialError> {
    let mut features = Vec::with_capacity(scores.len());
    for score in scores {
        let Some(area) = areas.get(&score.area_id) else {
            continue;
        };
        let geometry = geojson::Geometry::new(geojson::Value::from(area.polygon()));
        let feature = serde_json::json!({
            "type": "Feature",
            "geometry": serde_json::to_value(geometry).map_err(|e| {
                SpatialError::BoundariesInvalid {
                    message: e.to_string(),
                }
            })?,
            "properties": serde_json::to_value(score).map_err(|e| {
                SpatialError::BoundariesInvalid {
                    message: e.to_string(),
                }
            })?,
        });
        features.push(feature);
    }
    Ok(serde_json::json!({
        "type": "FeatureCollection",
        "features": features,
    }))
}
