//! Shared state behind the REST handlers
//!
//! Owns the reference data, the published overlay and the refresh loop.
//! Handlers only read; the loop is the single writer.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::color::{legend, LegendEntry};
use crate::error::{GeoError, GeoResult};
use crate::fetch::Fetcher;
use crate::models::RegionLevel;
use crate::overlay::{NoDataPolicy, RenderedLayer, RenderedOverlay};
use crate::pipeline::{refresh, Location, OverlayStore, PipelineSettings, ReferenceData, RefreshStatus};
use crate::ratio::BadnessDivisor;

/// Divisor a request asked for: explicit value, slider position, or neither
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DivisorRequest {
    pub divisor: Option<f64>,
    pub slider: Option<i64>,
}

pub struct OverlayService {
    fetcher: Fetcher,
    reference: ReferenceData,
    pipeline: PipelineSettings,
    store: OverlayStore,
    default_divisor: BadnessDivisor,
    no_data: NoDataPolicy,
}

impl OverlayService {
    pub fn new(
        fetcher: Fetcher,
        reference: ReferenceData,
        pipeline: PipelineSettings,
        default_divisor: BadnessDivisor,
        no_data: NoDataPolicy,
    ) -> Self {
        Self {
            fetcher,
            reference,
            pipeline,
            store: OverlayStore::new(),
            default_divisor,
            no_data,
        }
    }

    pub fn store(&self) -> &OverlayStore {
        &self.store
    }

    pub fn default_no_data(&self) -> NoDataPolicy {
        self.no_data
    }

    /// Resolve a request's divisor. A slider wins over a raw divisor.
    pub fn divisor(&self, request: DivisorRequest) -> GeoResult<BadnessDivisor> {
        match (request.slider, request.divisor) {
            (Some(position), _) => BadnessDivisor::from_slider(position),
            (None, Some(value)) => BadnessDivisor::new(value),
            (None, None) => Ok(self.default_divisor),
        }
    }

    pub async fn refresh_once(&self) {
        let result = refresh(&self.fetcher, &self.reference, &self.pipeline).await;
        self.store.record(result).await;
    }

    /// Refresh now, then every `interval`, until `shutdown` changes.
    ///
    /// A refresh in flight when shutdown arrives is dropped.
    pub async fn run_refresh_loop(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = async {
                    ticker.tick().await;
                    debug!("starting refresh");
                    self.refresh_once().await;
                } => {}
            }
        }
        info!("refresh loop stopped");
    }

    pub async fn status(&self) -> RefreshStatus {
        self.store.status().await
    }

    pub async fn rendered(
        &self,
        divisor: BadnessDivisor,
        policy: NoDataPolicy,
    ) -> Option<RenderedOverlay> {
        let overlay = self.store.overlay().await?;
        Some(overlay.render(divisor, policy))
    }

    /// One layer by service id (or label) and level; `None` when unknown or
    /// nothing has been published yet.
    pub async fn layer(
        &self,
        service: &str,
        level: RegionLevel,
        divisor: BadnessDivisor,
        policy: NoDataPolicy,
    ) -> Option<RenderedLayer> {
        let overlay = self.store.overlay().await?;
        overlay
            .layer(service, level)
            .map(|layer| layer.render(divisor, policy))
    }

    pub fn legend(&self, divisor: BadnessDivisor) -> Vec<LegendEntry> {
        legend(divisor)
    }

    pub fn locate(&self, lat: f64, lon: f64) -> GeoResult<Location> {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(GeoError::InvalidCoordinate { lat, lon });
        }
        Ok(self.reference.locate(lon, lat))
    }
}

pub type AppState = Arc<OverlayService>;
