//! Region boundaries (states, counties) and point containment
//!
//! Boundaries arrive as a GeoJSON FeatureCollection of Polygon and
//! MultiPolygon features. Feature names are normalized into the same key
//! space as the postal lookup so the two can be joined.

use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{GeoError, GeoResult};
use crate::models::RegionLevel;
use crate::region_names::{county_key, normalize_state};

/// Feature property holding the region's own name
pub const NAME_PROPERTY: &str = "NAME";

/// Feature property holding a county's state (name, USPS code, or FIPS code)
pub const STATE_PROPERTY: &str = "STATE";

/// Document root; any other `type` (or none) is rejected.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    FeatureCollection { features: Vec<Feature> },
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<Vec<f64>>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<Vec<f64>>>> },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct Region {
    /// Normalized key, identical to what the postal lookup produces
    pub key: String,
    pub shape: MultiPolygon<f64>,
}

impl Region {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.shape.contains(&Point::new(lon, lat))
    }
}

/// Every region at one level, indexed by key
#[derive(Debug, Clone)]
pub struct RegionBoundaries {
    level: RegionLevel,
    regions: Vec<Region>,
    index: HashMap<String, usize>,
}

impl RegionBoundaries {
    pub fn empty(level: RegionLevel) -> Self {
        Self {
            level,
            regions: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn from_geojson(bytes: &[u8], level: RegionLevel) -> GeoResult<Self> {
        let GeoJson::FeatureCollection { features } =
            serde_json::from_slice(bytes).map_err(|source| GeoError::Parse {
                what: format!("{} boundaries", level),
                source,
            })?;

        let mut boundaries = Self::empty(level);
        for feature in features {
            let Some(key) = feature_key(&feature.properties, level) else {
                warn!(%level, properties = ?feature.properties, "boundary feature without a usable name, skipping");
                continue;
            };
            let shape = match feature.geometry {
                Some(Geometry::Polygon { coordinates }) => {
                    to_polygon(coordinates).into_iter().collect()
                }
                Some(Geometry::MultiPolygon { coordinates }) => {
                    coordinates.into_iter().filter_map(to_polygon).collect()
                }
                Some(Geometry::Unsupported) | None => {
                    debug!(%level, region = %key, "feature has no polygon geometry");
                    MultiPolygon::new(Vec::new())
                }
            };
            boundaries.insert(key, shape);
        }
        Ok(boundaries)
    }

    /// Add a shape under `key`; features sharing a key are merged.
    pub fn insert(&mut self, key: String, shape: MultiPolygon<f64>) {
        match self.index.get(&key) {
            Some(&i) => self.regions[i].shape.0.extend(shape.0),
            None => {
                self.index.insert(key.clone(), self.regions.len());
                self.regions.push(Region { key, shape });
            }
        }
    }

    pub fn level(&self) -> RegionLevel {
        self.level
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn get(&self, key: &str) -> Option<&Region> {
        self.index.get(key).map(|&i| &self.regions[i])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// First region containing the point, in feature order.
    pub fn locate(&self, lon: f64, lat: f64) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(lon, lat))
    }
}

fn feature_key(
    properties: &serde_json::Map<String, serde_json::Value>,
    level: RegionLevel,
) -> Option<String> {
    let name = property_str(properties, NAME_PROPERTY)?;
    match level {
        RegionLevel::State => Some(normalize_state(&name)),
        RegionLevel::County => {
            let state = property_str(properties, STATE_PROPERTY)?;
            Some(county_key(&state, &name))
        }
    }
}

/// String property; numeric FIPS codes are rendered zero-padded.
fn property_str(
    properties: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Option<String> {
    match properties.get(key)? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => n.as_u64().map(|n| format!("{:02}", n)),
        _ => None,
    }
}

/// GeoJSON rings (`[lon, lat]` points) into a polygon; the first ring is
/// the exterior, the rest are holes.
fn to_polygon(rings: Vec<Vec<Vec<f64>>>) -> Option<Polygon<f64>> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

fn to_ring(points: Vec<Vec<f64>>) -> LineString<f64> {
    points
        .into_iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect()
}
