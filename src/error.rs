//! Error taxonomy for the aggregation pipeline
//!
//! Nothing here is fatal to the host process: a refresh cycle either
//! recovers locally (missing mappings) or fails as a whole and leaves the
//! previously published overlay in place.

use std::path::PathBuf;
use std::time::Duration;

use crate::models::RegionLevel;

pub type GeoResult<T> = Result<T, GeoError>;

#[derive(Debug, thiserror::Error)]
pub enum GeoError {
    /// A postal code has no entry in the lookup table.
    #[error("No region mapping for postal code {postal_code}")]
    MissingMapping { postal_code: String },

    /// The time-series source returned no series for the query window.
    #[error("Time-series query returned no series")]
    EmptySeries,

    /// A region average has no geography feature with the same key.
    #[error("Region name '{region}' ({level}) does not match any boundary feature")]
    MalformedRegionName { region: String, level: RegionLevel },

    /// The time-series endpoint reported a query error.
    #[error("Time-series query error: {0}")]
    Query(String),

    #[error("Request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {what}: {source}")]
    Parse {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to parse postal lookup CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Coordinate out of range: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("Badness divisor must be in (0, 1], got {0}")]
    InvalidDivisor(f64),

    #[error("Slider value must be in 1..=99, got {0}")]
    InvalidSlider(i64),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl GeoError {
    /// Whether a retry of the same request could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GeoError::Fetch { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            GeoError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            GeoError::Timeout(_) => true,
            _ => false,
        }
    }
}
