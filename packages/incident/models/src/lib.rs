#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Incident record schema and coarse class taxonomy.
//!
//! This crate defines the canonical types shared by every stage of the
//! export pipeline: the validated [`IncidentRecord`], the coarse
//! [`IncidentClass`] taxonomy that all source-specific category codes
//! normalize into, the configured [`BoundingBox`] used for coordinate
//! validation, and the versioned [`WeightTable`] consumed by severity
//! scoring.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Embedded default weight table (compiled into the binary).
const DEFAULT_WEIGHTS_TOML: &str = include_str!("../weights.toml");

/// Coarse incident classification.
///
/// Every raw category code maps onto exactly one of these classes. The
/// taxonomy is deliberately coarse: severity weighting and the exported
/// cross-tabulations only distinguish crimes against persons, crimes
/// against property, and everything else.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentClass {
    /// Crimes against persons (homicide, assault, robbery, sexual assault).
    Violent,
    /// Crimes against property (burglary, theft, arson, vandalism).
    Property,
    /// Everything else (drugs, public order, fraud, non-criminal).
    Other,
}

impl IncidentClass {
    /// Returns all variants in a fixed, stable order.
    ///
    /// Aggregation and artifact emission iterate this slice so that
    /// output row order never depends on map iteration order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Violent, Self::Property, Self::Other]
    }

    /// Maps a raw category code to its coarse class.
    ///
    /// Matching is case-insensitive and keyword-based because every
    /// upstream feed spells its codes differently. Returns `None` when
    /// the code is outside the known code space; the loader coerces
    /// those to [`IncidentClass::Other`] and counts the coercion.
    #[must_use]
    pub fn classify(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_lowercase();
        if lower.is_empty() {
            return None;
        }

        if contains_any(
            &lower,
            &[
                "homicide",
                "murder",
                "manslaughter",
                "assault",
                "battery",
                "robbery",
                "rape",
                "sex offense",
                "sexual",
                "kidnap",
                "shooting",
            ],
        ) {
            return Some(Self::Violent);
        }

        if contains_any(
            &lower,
            &[
                "burglary",
                "breaking and entering",
                "theft",
                "larceny",
                "stolen",
                "shoplifting",
                "arson",
                "vandalism",
                "criminal damage",
                "criminal mischief",
                "motor vehicle",
            ],
        ) {
            return Some(Self::Property);
        }

        // Recognized codes that fold into the catch-all class. Listing
        // them keeps "known but uninteresting" distinct from "unknown".
        if contains_any(
            &lower,
            &[
                "narcotics",
                "drug",
                "weapons",
                "trespass",
                "fraud",
                "forgery",
                "embezzlement",
                "dui",
                "disorderly",
                "prostitution",
                "gambling",
                "liquor",
                "missing person",
                "non-criminal",
                "non criminal",
                "other offense",
            ],
        ) {
            return Some(Self::Other);
        }

        None
    }
}

/// Returns `true` if `haystack` contains any of the given keywords.
fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

/// One validated incident.
///
/// Records are immutable once the loader has produced them: the
/// validator may null the coordinate pair or coerce the class during
/// loading, but downstream stages only ever read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    /// When the incident occurred, in civic local time.
    pub occurred_at: NaiveDateTime,
    /// Raw category code as reported by the source (uppercased).
    pub category: String,
    /// Coarse class derived from the category code.
    pub class: IncidentClass,
    /// Longitude, if a valid in-bounds coordinate pair was reported.
    pub longitude: Option<f64>,
    /// Latitude, if a valid in-bounds coordinate pair was reported.
    pub latitude: Option<f64>,
    /// Administrative district identifier, if reported.
    pub district: Option<String>,
}

impl IncidentRecord {
    /// Returns the coordinate pair, or `None` when the geometry was
    /// nulled during validation.
    ///
    /// The loader guarantees longitude and latitude are either both
    /// present or both absent.
    #[must_use]
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => None,
        }
    }

    /// Returns `true` if this record carries usable geometry.
    #[must_use]
    pub const fn has_coordinates(&self) -> bool {
        self.longitude.is_some() && self.latitude.is_some()
    }
}

/// Coordinate bounds used to validate reported geometry.
///
/// Points outside the box are treated as geocoding noise: the record is
/// kept but its coordinate pair is nulled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Western edge (minimum longitude).
    pub min_lon: f64,
    /// Southern edge (minimum latitude).
    pub min_lat: f64,
    /// Eastern edge (maximum longitude).
    pub max_lon: f64,
    /// Northern edge (maximum latitude).
    pub max_lat: f64,
}

impl BoundingBox {
    /// Creates a bounding box from its corner coordinates.
    #[must_use]
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// A box covering the contiguous United States.
    ///
    /// The default for feeds that don't configure a tighter city extent.
    #[must_use]
    pub const fn contiguous_us() -> Self {
        Self::new(-125.0, 24.0, -66.0, 50.0)
    }

    /// Returns `true` if the point lies within the box (edges inclusive).
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

/// Error returned when a weight table fails to parse or validate.
#[derive(Debug, thiserror::Error)]
pub enum WeightTableError {
    /// The TOML document could not be parsed.
    #[error("Failed to parse weight table: {0}")]
    Parse(#[from] toml::de::Error),

    /// The parsed table contains an unusable weight.
    #[error("Invalid weight table: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Per-class severity weights.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct ClassWeights {
    violent: f64,
    property: f64,
    other: f64,
}

/// Versioned severity weight table.
///
/// Scoring multiplies per-area class counts by these weights. The table
/// is policy, not code: callers supply whichever table their reporting
/// layer has adopted, and the manifest records the version that produced
/// each artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    /// Weight table schema version, recorded in the manifest.
    pub version: u32,
    weights: ClassWeights,
}

impl WeightTable {
    /// Returns the embedded default table (violent 3.0, property 1.0,
    /// other 0.5).
    ///
    /// # Panics
    ///
    /// Panics if the embedded `weights.toml` is malformed, which would
    /// be a build defect rather than a runtime condition.
    #[must_use]
    pub fn default_table() -> Self {
        toml::from_str(DEFAULT_WEIGHTS_TOML).expect("embedded weights.toml must parse")
    }

    /// Parses a weight table from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`WeightTableError`] if the document cannot be parsed or
    /// any weight is negative or non-finite.
    pub fn from_toml_str(doc: &str) -> Result<Self, WeightTableError> {
        let table: Self = toml::from_str(doc)?;
        table.validate()?;
        Ok(table)
    }

    /// Returns the weight applied to one incident of the given class.
    #[must_use]
    pub const fn weight(&self, class: IncidentClass) -> f64 {
        match class {
            IncidentClass::Violent => self.weights.violent,
            IncidentClass::Property => self.weights.property,
            IncidentClass::Other => self.weights.other,
        }
    }

    fn validate(&self) -> Result<(), WeightTableError> {
        for class in IncidentClass::all() {
            let w = self.weight(*class);
            if !w.is_finite() || w < 0.0 {
                return Err(WeightTableError::Invalid {
                    message: format!("weight for {class} must be a non-negative number, got {w}"),
                });
            }
        }
        Ok(())
    }
}
