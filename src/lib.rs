//! Latency choropleth for CDN customer experience
//!
//! Turns per-postal-code latency samples into per-state and per-county
//! ratios and colors for a map overlay.

pub mod aggregate;
pub mod api;
pub mod color;
pub mod config;
pub mod error;
pub mod fetch;
pub mod geography;
pub mod lookup;
pub mod models;
pub mod overlay;
pub mod pipeline;
pub mod ratio;
pub mod region_names;

pub use error::{GeoError, GeoResult};
