//! Latency -> experience ratio -> normalized color input
//!
//! `to_ratio` compares an average latency to the reference fragment length;
//! `normalize` folds that ratio into (0, 1] for the color scale. Missing data
//! travels through both as `NO_DATA_SENTINEL` and is never mistaken for a
//! good or bad score.

use serde::Serialize;

use crate::error::{GeoError, GeoResult};

/// Marks a region with no usable samples. Never a valid ratio.
pub const NO_DATA_SENTINEL: f64 = -1.0;

/// Reference ("ideal") fragment duration in milliseconds
pub const REFERENCE_FRAGMENT_MS: f64 = 2000.0;

/// Ratios at or above this are all rendered as the best color
pub const MAX_RATIO: f64 = 2.0;

/// Floor applied to a zero average before dividing
pub const MIN_LATENCY_MS: f64 = 0.001;

/// Floor of the normalized value, keeps it strictly positive
pub const MIN_NORMALIZED: f64 = 0.0001;

pub fn is_no_data(value: f64) -> bool {
    value == NO_DATA_SENTINEL
}

/// `REFERENCE_FRAGMENT_MS / avg`, or the sentinel when there is no average.
pub fn to_ratio(avg_latency_ms: Option<f64>) -> f64 {
    to_ratio_with(avg_latency_ms, REFERENCE_FRAGMENT_MS)
}

/// Same as `to_ratio` with a caller-supplied reference latency.
pub fn to_ratio_with(avg_latency_ms: Option<f64>, reference_ms: f64) -> f64 {
    let Some(mut avg) = avg_latency_ms else {
        return NO_DATA_SENTINEL;
    };
    if avg.is_nan() || avg < 0.0 {
        return NO_DATA_SENTINEL;
    }
    if avg == 0.0 {
        avg = MIN_LATENCY_MS;
    }
    reference_ms / avg
}

/// Sensitivity control applied to ratios before normalization, in (0, 1].
///
/// Smaller divisors shift every region toward the "bad" end of the scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BadnessDivisor(f64);

impl BadnessDivisor {
    pub const NEUTRAL: BadnessDivisor = BadnessDivisor(1.0);

    pub fn new(value: f64) -> GeoResult<Self> {
        if value > 0.0 && value <= 1.0 {
            Ok(Self(value))
        } else {
            Err(GeoError::InvalidDivisor(value))
        }
    }

    /// Map a 1..=99 slider position to `(100 - v) / 100`.
    pub fn from_slider(position: i64) -> GeoResult<Self> {
        if !(1..=99).contains(&position) {
            return Err(GeoError::InvalidSlider(position));
        }
        Self::new((100 - position) as f64 / 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for BadnessDivisor {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Fold a ratio into (0, 1]: `1 - min(ratio * divisor, 2) / 2`, floored at
/// `MIN_NORMALIZED`. The sentinel passes through unchanged.
///
/// Lower values mean better service; 0.5 is a ratio of exactly 1.0 at the
/// neutral divisor.
pub fn normalize(ratio: f64, divisor: BadnessDivisor) -> f64 {
    if is_no_data(ratio) || ratio.is_nan() {
        return NO_DATA_SENTINEL;
    }
    let scaled = (ratio * divisor.value()).clamp(0.0, MAX_RATIO);
    let normalized = 1.0 - scaled / MAX_RATIO;
    normalized.max(MIN_NORMALIZED)
}

/// Text shown for a region: two decimals, or a note when there is no data.
pub fn display_ratio(ratio: f64) -> String {
    if is_no_data(ratio) {
        "no recent customers".to_string()
    } else {
        format!("{:.2}", ratio)
    }
}
