//! Refresh pipeline
//!
//! Stage 1 loads reference data once (postal lookup, then state boundaries,
//! then county boundaries). Stage 2 runs per refresh: fetch samples,
//! aggregate, build the overlay. A refresh is a single future under one
//! timeout; dropping it cancels every fetch in flight.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::aggregate::aggregate;
use crate::error::{GeoError, GeoResult};
use crate::fetch::{DataLocation, Fetcher, QueryTarget};
use crate::geography::RegionBoundaries;
use crate::lookup::{TableFormat, ZipLookup};
use crate::models::{RegionLevel, Sample};
use crate::overlay::{build_overlay, Overlay, OverlayInputs, ServiceLabels};

/// Where the reference inputs come from
#[derive(Debug, Clone)]
pub struct ReferenceSources {
    pub zip_table: DataLocation,
    pub states: Option<DataLocation>,
    pub counties: Option<DataLocation>,
}

/// Immutable snapshot of everything that does not change between refreshes
#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub lookup: Arc<ZipLookup>,
    pub states: Arc<RegionBoundaries>,
    pub counties: Arc<RegionBoundaries>,
}

/// Regions containing a coordinate
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Location {
    pub state: Option<String>,
    pub county: Option<String>,
}

impl ReferenceData {
    pub fn new(lookup: ZipLookup, states: RegionBoundaries, counties: RegionBoundaries) -> Self {
        Self {
            lookup: Arc::new(lookup),
            states: Arc::new(states),
            counties: Arc::new(counties),
        }
    }

    pub async fn load(fetcher: &Fetcher, sources: &ReferenceSources) -> GeoResult<Self> {
        info!(source = %sources.zip_table.describe(), "loading postal lookup table");
        let bytes = fetcher.bytes(&sources.zip_table).await?;
        let format = TableFormat::from_location(&sources.zip_table.describe());
        let lookup = ZipLookup::parse(&bytes, format)?;
        info!(postal_codes = lookup.len(), "postal lookup table loaded");

        let states = load_boundaries(fetcher, sources.states.as_ref(), RegionLevel::State).await?;
        let counties = load_boundaries(fetcher, sources.counties.as_ref(), RegionLevel::County).await?;

        Ok(Self::new(lookup, states, counties))
    }

    /// State and county containing `[lon, lat]`.
    pub fn locate(&self, lon: f64, lat: f64) -> Location {
        Location {
            state: self.states.locate(lon, lat).map(|r| r.key.clone()),
            county: self.counties.locate(lon, lat).map(|r| r.key.clone()),
        }
    }
}

async fn load_boundaries(
    fetcher: &Fetcher,
    location: Option<&DataLocation>,
    level: RegionLevel,
) -> GeoResult<RegionBoundaries> {
    let Some(location) = location else {
        info!(%level, "no boundary data configured, layers will list averaged regions only");
        return Ok(RegionBoundaries::empty(level));
    };
    info!(%level, source = %location.describe(), "loading boundaries");
    let bytes = fetcher.bytes(location).await?;
    let boundaries = RegionBoundaries::from_geojson(&bytes, level)?;
    info!(%level, regions = boundaries.len(), "boundaries loaded");
    Ok(boundaries)
}

/// Per-refresh settings
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub target: QueryTarget,
    pub measurement: String,
    pub reference_ms: f64,
    pub labels: ServiceLabels,
    pub cycle_timeout: Duration,
}

/// Outcome of one successful refresh
#[derive(Debug, Clone)]
pub struct RefreshReport {
    pub overlay: Overlay,
    pub samples: usize,
    pub postal_codes: usize,
    pub unmapped: usize,
    pub without_values: usize,
}

/// Pure part of a refresh: samples in, overlay out.
///
/// A refresh with nothing to average (no samples, only null values, or only
/// unmapped postal codes) is `EmptySeries`, reported to the caller rather
/// than published as an empty overlay.
pub fn compute_overlay(
    samples: &[Sample],
    reference: &ReferenceData,
    settings: &PipelineSettings,
) -> GeoResult<RefreshReport> {
    if samples.is_empty() {
        return Err(GeoError::EmptySeries);
    }

    let (latest, averages) = aggregate(samples, &reference.lookup);
    if averages.is_empty() {
        warn!(
            samples = samples.len(),
            unmapped = latest.unmapped.len(),
            without_values = latest.without_values,
            "no sample resolved to a region"
        );
        return Err(GeoError::EmptySeries);
    }
    let overlay = build_overlay(
        &averages,
        &OverlayInputs {
            states: &reference.states,
            counties: &reference.counties,
            labels: &settings.labels,
            reference_ms: settings.reference_ms,
        },
    );

    Ok(RefreshReport {
        samples: samples.len(),
        postal_codes: latest.values.values().map(|codes| codes.len()).sum(),
        unmapped: latest.unmapped.len(),
        without_values: latest.without_values,
        overlay,
    })
}

/// One full refresh cycle under `settings.cycle_timeout`.
pub async fn refresh(
    fetcher: &Fetcher,
    reference: &ReferenceData,
    settings: &PipelineSettings,
) -> GeoResult<RefreshReport> {
    let cycle = async {
        let samples = fetcher.samples(&settings.target, &settings.measurement).await?;
        compute_overlay(&samples, reference, settings)
    };
    match tokio::time::timeout(settings.cycle_timeout, cycle).await {
        Ok(result) => result,
        Err(_) => Err(GeoError::Timeout(settings.cycle_timeout)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshState {
    Pending,
    Ok,
    NoData,
    Failed,
}

/// Last refresh outcome, as shown to users
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshStatus {
    pub state: RefreshState,
    pub at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub samples: usize,
    pub postal_codes: usize,
    pub unmapped_postal_codes: usize,
    pub unmatched_regions: usize,
    /// Whether a previously published overlay is still being served
    pub serving_stale: bool,
}

impl Default for RefreshStatus {
    fn default() -> Self {
        Self {
            state: RefreshState::Pending,
            at: None,
            message: Some("waiting for first refresh".to_string()),
            samples: 0,
            postal_codes: 0,
            unmapped_postal_codes: 0,
            unmatched_regions: 0,
            serving_stale: false,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    overlay: Option<Arc<Overlay>>,
    status: RefreshStatus,
}

/// Published overlay plus the status of the latest refresh.
///
/// Only a successful refresh replaces the overlay; failures update the
/// status and leave the last good overlay in place.
#[derive(Debug, Clone, Default)]
pub struct OverlayStore {
    inner: Arc<RwLock<StoreState>>,
}

impl OverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, result: GeoResult<RefreshReport>) {
        let now = Utc::now();
        let mut state = self.inner.write().await;
        let has_overlay = state.overlay.is_some();

        state.status = match result {
            Ok(report) => {
                info!(
                    samples = report.samples,
                    postal_codes = report.postal_codes,
                    unmapped = report.unmapped,
                    layers = report.overlay.layers.len(),
                    "refresh complete"
                );
                let status = RefreshStatus {
                    state: RefreshState::Ok,
                    at: Some(now),
                    message: None,
                    samples: report.samples,
                    postal_codes: report.postal_codes,
                    unmapped_postal_codes: report.unmapped,
                    unmatched_regions: report.overlay.unmatched_regions.len(),
                    serving_stale: false,
                };
                state.overlay = Some(Arc::new(report.overlay));
                status
            }
            Err(GeoError::EmptySeries) => {
                warn!("refresh returned no series");
                RefreshStatus {
                    state: RefreshState::NoData,
                    at: Some(now),
                    message: Some(GeoError::EmptySeries.to_string()),
                    serving_stale: has_overlay,
                    ..RefreshStatus::default()
                }
            }
            Err(err) => {
                warn!(error = %err, "refresh failed, keeping previous overlay");
                RefreshStatus {
                    state: RefreshState::Failed,
                    at: Some(now),
                    message: Some(err.to_string()),
                    serving_stale: has_overlay,
                    ..RefreshStatus::default()
                }
            }
        };
    }

    pub async fn overlay(&self) -> Option<Arc<Overlay>> {
        self.inner.read().await.overlay.clone()
    }

    pub async fn status(&self) -> RefreshStatus {
        self.inner.read().await.status.clone()
    }
}
