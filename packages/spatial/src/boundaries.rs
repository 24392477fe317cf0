//! Administrative boundary index for severity scoring.
//!
//! Loads boundary polygons from a `GeoJSON` `FeatureCollection`, builds
//! an R-tree, and answers point-in-polygon lookups. Overlapping areas
//! resolve to the smallest polygon containing the point.

use std::path::Path;

use geo::{Area, BoundingRect, Contains, MultiPolygon};
use geojson::GeoJson;
use rstar::{AABB, RTree, RTreeObject};

use crate::SpatialError;

/// A boundary polygon stored in the R-tree with its metadata.
pub struct BoundaryArea {
    /// Stable area identifier taken from the feature properties.
    pub id: String,
    /// Human-readable area name, when the feature carries one.
    pub name: Option<String>,
    /// Resident population, when the feature carries one.
    pub population: Option<u64>,
    area: f64,
    envelope: AABB<[f64; 2]>,
    polygon: MultiPolygon<f64>,
}

impl BoundaryArea {
    /// The area's polygon geometry.
    #[must_use]
    pub const fn polygon(&self) -> &MultiPolygon<f64> {
        &self.polygon
    }
}

impl RTreeObject for BoundaryArea {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Pre-built boundary index.
pub struct Boundaries {
    tree: RTree<BoundaryArea>,
}

impl Boundaries {
    /// Loads boundary polygons from a `GeoJSON` file.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::BoundariesUnreadable`] if the file cannot
    /// be read, or [`SpatialError::BoundariesInvalid`] if it does not
    /// parse into a `FeatureCollection` with at least one usable polygon.
    pub fn from_geojson_file(path: &Path) -> Result<Self, SpatialError> {
        let contents =
            std::fs::read_to_string(path).map_err(|source| SpatialError::BoundariesUnreadable {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_geojson_str(&contents)
    }

    /// Parses boundary polygons from a `GeoJSON` document.
    ///
    /// # Errors
    ///
    /// Returns [`SpatialError::BoundariesInvalid`] if the document is
    /// not a `FeatureCollection` or yields no usable polygons.
    pub fn from_geojson_str(doc: &str) -> Result<Self, SpatialError> {
        let geojson: GeoJson = doc
            .parse()
            .map_err(|e: geojson::Error| SpatialError::BoundariesInvalid {
                message: e.to_string(),
            })?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(SpatialError::BoundariesInvalid {
                message: "expected a FeatureCollection".to_string(),
            });
        };

        let mut entries = Vec::new();
        for feature in collection.features {
            let Some(id) = feature_id(&feature) else {
                log::warn!("Skipping boundary feature without an id property");
                continue;
            };
            let Some(geometry) = feature.geometry else {
                log::warn!("Skipping boundary {id} without geometry");
                continue;
            };
            let Ok(geo_geometry) = geo::Geometry::<f64>::try_from(geometry) else {
                log::warn!("Skipping boundary {id} with unsupported geometry");
                continue;
            };
            let polygon = match geo_geometry {
                geo::Geometry::MultiPolygon(mp) => mp,
                geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
                _ => {
                    log::warn!("Skipping boundary {id}: geometry is not polygonal");
                    continue;
                }
            };

            let name = feature
                .properties
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string);
            let population = feature
                .properties
                .as_ref()
                .and_then(|p| p.get("population"))
                .and_then(serde_json::Value::as_u64);

            entries.push(BoundaryArea {
                id,
                name,
                population,
                area: polygon.unsigned_area(),
                envelope: compute_envelope(&polygon),
                polygon,
            });
        }

        if entries.is_empty() {
            return Err(SpatialError::BoundariesInvalid {
                message: "no usable boundary polygons".to_string(),
            });
        }
        Ok(Self {
            tree: RTree::bulk_load(entries),
        })
    }

    /// Number of indexed areas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    /// Returns `true` if no areas are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Finds the area containing a point.
    ///
    /// Areas can overlap; the smallest one containing the point wins.
    #[must_use]
    pub fn lookup(&self, lon: f64, lat: f64) -> Option<&BoundaryArea> {
        let point = geo::Point::new(lon, lat);
        let query_env = AABB::from_point([lon, lat]);

        let mut best: Option<&BoundaryArea> = None;
        for entry in self.tree.locate_in_envelope_intersecting(&query_env) {
            if entry.polygon.contains(&point) {
                match best {
                    None => best = Some(entry),
                    Some(current) if entry.area < current.area => best = Some(entry),
                    _ => {}
                }
            }
        }
        best
    }

    /// Returns the area with the given identifier.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&BoundaryArea> {
        self.tree.iter().find(|entry| entry.id == id)
    }

    /// Iterates over all indexed areas in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = &BoundaryArea> {
        self.tree.iter()
    }
}

/// Picks the first id-like property of a feature.
fn feature_id(feature: &geojson::Feature) -> Option<String> {
    let properties = feature.properties.as_ref()?;
    for key in ["id", "geoid", "district", "name"] {
        match properties.get(key) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(serde_json::Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Compute the bounding box envelope for a [`MultiPolygon`].
fn compute_envelope(mp: &MultiPolygon<f64>) -> AABB<[f64; 2]> {
    mp.bounding_rect().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, min: f64, max: f64, population: Option<u64>) -> String {
        let pop = population.map_or("null".to_string(), |p| p.to_string());
        format!(
            r#"{{"type": "Feature",
                 "properties": {{"id": "{id}", "name": "Area {id}", "population": {pop}}},
                 "geometry": {{"type": "Polygon", "coordinates": [[
                     [{min}, {min}], [{max}, {min}], [{max}, {max}], [{min}, {max}], [{min}, {min}]
                 ]]}}}}"#
        )
    }

    fn collection(features: &[String]) -> String {
        format!(
            r#"{{"type": "FeatureCollection", "features": [{}]}}"#,
            features.join(",")
        )
    }

    #[test]
    fn loads_and_looks_up_areas() {
        let doc = collection(&[
            square("A", 0.0, 1.0, Some(1000)),
            square("B", 2.0, 3.0, None),
        ]);
        let boundaries = Boundaries::from_geojson_str(&doc).unwrap();
        assert_eq!(boundaries.len(), 2);

        let hit = boundaries.lookup(0.5, 0.5).unwrap();
        assert_eq!(hit.id, "A");
        assert_eq!(hit.population, Some(1000));
        assert_eq!(hit.name.as_deref(), Some("Area A"));
        assert!(boundaries.lookup(5.0, 5.0).is_none());
    }

    #[test]
    fn overlapping_areas_resolve_to_smallest() {
        let doc = collection(&[
            square("big", 0.0, 10.0, None),
            square("small", 4.0, 6.0, None),
        ]);
        let boundaries = Boundaries::from_geojson_str(&doc).unwrap();
        assert_eq!(boundaries.lookup(5.0, 5.0).unwrap().id, "small");
        assert_eq!(boundaries.lookup(1.0, 1.0).unwrap().id, "big");
    }

    #[test]
    fn rejects_document_without_polygons() {
        let doc = r#"{"type": "FeatureCollection", "features": []}"#;
        assert!(matches!(
            Boundaries::from_geojson_str(doc),
            Err(SpatialError::BoundariesInvalid { .. })
        ));
    }

    #[test]
    fn rejects_non_geojson() {
        assert!(Boundaries::from_geojson_str("[1, 2, 3]").is_err());
    }

    #[test]
    fn skips_features_without_ids() {
        let with_id = square("A", 0.0, 1.0, None);
        let without_id = r#"{"type": "Feature", "properties": {},
            "geometry": {"type": "Polygon", "coordinates": [[[2,2],[3,2],[3,3],[2,3],[2,2]]]}}"#
            .to_string();
        let doc = collection(&[with_id, without_id]);
        let boundaries = Boundaries::from_geojson_str(&doc).unwrap();
        assert_eq!(boundaries.len(), 1);
    }
}
