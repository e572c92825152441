//! Choropleth overlay: per-service, per-level region ratios
//!
//! An `Overlay` stores raw ratios only. Colors depend on the badness
//! divisor, which is a runtime control, so they are produced on demand by
//! `Overlay::render`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::aggregate::RegionAverages;
use crate::color::{color_for, legend, LegendEntry};
use crate::error::GeoError;
use crate::geography::RegionBoundaries;
use crate::models::RegionLevel;
use crate::ratio::{display_ratio, is_no_data, normalize, to_ratio_with, BadnessDivisor};

/// What to do with regions that have boundaries but no data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NoDataPolicy {
    /// Leave the region out of the layer entirely
    #[default]
    Suppress,
    /// Keep the region, drawn in the neutral no-data color
    Neutral,
}

/// Display labels per service id ("col-jitp2" -> "VOD").
///
/// With no labels configured every service is shown under its own id. Once
/// any label is configured, unlabelled services are left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceLabels(BTreeMap<String, String>);

impl ServiceLabels {
    pub fn new(labels: impl IntoIterator<Item = (String, String)>) -> Self {
        Self(labels.into_iter().collect())
    }

    pub fn label_for<'a>(&'a self, service_id: &'a str) -> Option<&'a str> {
        if self.0.is_empty() {
            return Some(service_id);
        }
        self.0.get(service_id).map(String::as_str)
    }
}

pub fn layer_name(label: &str, level: RegionLevel) -> String {
    format!("{} Customer Experience Ratio by {}", label, level.title())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionRatio {
    pub region: String,
    /// `NO_DATA_SENTINEL` when no postal code contributed
    pub ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layer {
    pub service_id: String,
    pub label: String,
    pub level: RegionLevel,
    pub name: String,
    pub regions: Vec<RegionRatio>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    pub generated_at: DateTime<Utc>,
    pub layers: Vec<Layer>,
    /// Averaged regions with no boundary feature under the same key
    pub unmatched_regions: Vec<(RegionLevel, String)>,
}

/// The (key, normalized ratio, color) triple handed to a renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionShade {
    pub region: String,
    pub ratio: f64,
    pub normalized: f64,
    pub color: String,
    pub has_data: bool,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedLayer {
    pub service_id: String,
    pub label: String,
    pub level: RegionLevel,
    pub name: String,
    pub regions: Vec<RegionShade>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedOverlay {
    pub generated_at: DateTime<Utc>,
    pub divisor: BadnessDivisor,
    pub no_data: NoDataPolicy,
    pub layers: Vec<RenderedLayer>,
    pub legend: Vec<LegendEntry>,
}

/// Inputs needed to turn averages into layers
pub struct OverlayInputs<'a> {
    pub states: &'a RegionBoundaries,
    pub counties: &'a RegionBoundaries,
    pub labels: &'a ServiceLabels,
    pub reference_ms: f64,
}

impl<'a> OverlayInputs<'a> {
    fn boundaries(&self, level: RegionLevel) -> &'a RegionBoundaries {
        match level {
            RegionLevel::State => self.states,
            RegionLevel::County => self.counties,
        }
    }
}

/// Build every layer from one refresh's averages.
///
/// Regions come from the boundary data in feature order, so regions without
/// data are present (as the sentinel) and the no-data policy can decide at
/// render time. When a level has no boundary data at all, the averaged
/// regions themselves form the layer.
pub fn build_overlay(averages: &RegionAverages, inputs: &OverlayInputs<'_>) -> Overlay {
    let mut layers = Vec::new();
    let mut unmatched = Vec::new();

    for service_id in averages.services() {
        let Some(label) = inputs.labels.label_for(service_id) else {
            info!(service = service_id, "no label configured for service, skipping");
            continue;
        };

        for level in RegionLevel::ALL {
            let boundaries = inputs.boundaries(level);
            let means = averages.level(service_id, level);

            let regions: Vec<RegionRatio> = if boundaries.is_empty() {
                means
                    .into_iter()
                    .flatten()
                    .map(|(region, &mean)| RegionRatio {
                        region: region.clone(),
                        ratio: to_ratio_with(Some(mean), inputs.reference_ms),
                    })
                    .collect()
            } else {
                for region in means.into_iter().flat_map(|m| m.keys()) {
                    if !boundaries.contains_key(region) {
                        let err = GeoError::MalformedRegionName {
                            region: region.clone(),
                            level,
                        };
                        warn!(service = service_id, error = %err, "averaged region not drawn");
                        unmatched.push((level, region.clone()));
                    }
                }
                boundaries
                    .regions()
                    .iter()
                    .map(|r| RegionRatio {
                        region: r.key.clone(),
                        ratio: to_ratio_with(
                            averages.get(service_id, level, &r.key),
                            inputs.reference_ms,
                        ),
                    })
                    .collect()
            };

            layers.push(Layer {
                service_id: service_id.to_string(),
                label: label.to_string(),
                level,
                name: layer_name(label, level),
                regions,
            });
        }
    }

    unmatched.sort();
    unmatched.dedup();

    Overlay {
        generated_at: Utc::now(),
        layers,
        unmatched_regions: unmatched,
    }
}

impl Layer {
    pub fn render(&self, divisor: BadnessDivisor, policy: NoDataPolicy) -> RenderedLayer {
        let regions = self
            .regions
            .iter()
            .filter(|r| policy == NoDataPolicy::Neutral || !is_no_data(r.ratio))
            .map(|r| shade(&r.region, r.ratio, divisor))
            .collect();
        RenderedLayer {
            service_id: self.service_id.clone(),
            label: self.label.clone(),
            level: self.level,
            name: self.name.clone(),
            regions,
        }
    }
}

pub fn shade(region: &str, ratio: f64, divisor: BadnessDivisor) -> RegionShade {
    let normalized = normalize(ratio, divisor);
    RegionShade {
        region: region.to_string(),
        ratio,
        normalized,
        color: color_for(normalized),
        has_data: !is_no_data(ratio),
        label: display_ratio(ratio),
    }
}

impl Overlay {
    /// Layer by service id, falling back to display label.
    pub fn layer(&self, service: &str, level: RegionLevel) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.level == level && l.service_id == service)
            .or_else(|| {
                self.layers
                    .iter()
                    .find(|l| l.level == level && l.label == service)
            })
    }

    pub fn render(&self, divisor: BadnessDivisor, policy: NoDataPolicy) -> RenderedOverlay {
        RenderedOverlay {
            generated_at: self.generated_at,
            divisor,
            no_data: policy,
            layers: self.layers.iter().map(|l| l.render(divisor, policy)).collect(),
            legend: legend(divisor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::aggregate;
    use crate::color::NO_DATA_COLOR;
    use geo::MultiPolygon;
    use crate::lookup::ZipLookup;
    use crate::models::Sample;
    use crate::ratio::{NO_DATA_SENTINEL, REFERENCE_FRAGMENT_MS};

    fn states() -> RegionBoundaries {
        let mut b = RegionBoundaries::empty(RegionLevel::State);
        for name in ["California", "Colorado", "Texas"] {
            b.insert(name.to_string(), MultiPolygon::new(Vec::new()));
        }
        b
    }

    fn averages() -> RegionAverages {
        let lookup = ZipLookup::from_json(
            br#"{"result": [
                {"Zipcode": "90210", "State": "California", "County": "Los Angeles"},
                {"Zipcode": "90211", "State": "California", "County": "Los Angeles"},
                {"Zipcode": "80202", "State": "Colorado", "County": "Denver"},
                {"Zipcode": "20001", "State": "Atlantis", "County": "Deep"}
            ]}"#,
        )
        .unwrap();
        let samples: Vec<Sample> = [
            ("90210", "col-jitp2", 1000.0),
            ("90211", "col-jitp2", 3000.0),
            ("80202", "col-jitp2", 500.0),
            ("20001", "col-jitp2", 900.0),
            ("80202", "unknown-ds", 500.0),
        ]
        .iter()
        .map(|(code, ds, ms)| Sample {
            postal_code: code.to_string(),
            service_id: ds.to_string(),
            bucket: None,
            latency_ms: Some(*ms),
        })
        .collect();
        aggregate(&samples, &lookup).1
    }

    #[test]
    fn test_build_with_boundaries() {
        let states = states();
        let counties = RegionBoundaries::empty(RegionLevel::County);
        let labels = ServiceLabels::new([("col-jitp2".to_string(), "VOD".to_string())]);
        let overlay = build_overlay(
            &averages(),
            &OverlayInputs {
                states: &states,
                counties: &counties,
                labels: &labels,
                reference_ms: REFERENCE_FRAGMENT_MS,
            },
        );

        // unknown-ds has no label -> skipped
        assert_eq!(overlay.layers.len(), 2);
        let state_layer = overlay.layer("VOD", RegionLevel::State).unwrap();
        assert_eq!(state_layer.name, "VOD Customer Experience Ratio by State");
        assert_eq!(state_layer.regions.len(), 3);
        assert_eq!(state_layer.regions[0].ratio, 1.0);
        assert_eq!(state_layer.regions[1].ratio, 4.0);
        assert_eq!(state_layer.regions[2].ratio, NO_DATA_SENTINEL);

        assert!(overlay
            .unmatched_regions
            .contains(&(RegionLevel::State, "Atlantis".to_string())));

        // No county boundaries: layer built from averages
        let county_layer = overlay.layer("col-jitp2", RegionLevel::County).unwrap();
        assert!(county_layer.regions.iter().any(|r| r.region == "California, Los Angeles"));
    }

    #[test]
    fn test_no_data_policy() {
        let states = states();
        let counties = RegionBoundaries::empty(RegionLevel::County);
        let labels = ServiceLabels::default();
        let overlay = build_overlay(
            &averages(),
            &OverlayInputs {
                states: &states,
                counties: &counties,
                labels: &labels,
                reference_ms: REFERENCE_FRAGMENT_MS,
            },
        );
        let layer = overlay.layer("col-jitp2", RegionLevel::State).unwrap();

        let suppressed = layer.render(BadnessDivisor::NEUTRAL, NoDataPolicy::Suppress);
        assert_eq!(suppressed.regions.len(), 2);
        assert!(suppressed.regions.iter().all(|r| r.has_data));

        let neutral = layer.render(BadnessDivisor::NEUTRAL, NoDataPolicy::Neutral);
        assert_eq!(neutral.regions.len(), 3);
        let texas = neutral.regions.iter().find(|r| r.region == "Texas").unwrap();
        assert_eq!(texas.color, NO_DATA_COLOR);
        assert_eq!(texas.normalized, NO_DATA_SENTINEL);
        assert_eq!(texas.label, "no recent customers");

        let california = &neutral.regions[0];
        assert_eq!(california.color, "#ffff00");
        assert_eq!(california.label, "1.00");
    }

    #[test]
    fn test_unlabelled_services_shown_without_labels() {
        let labels = ServiceLabels::default();
        assert_eq!(labels.label_for("cdvr"), Some("cdvr"));

        let labels = ServiceLabels::new([("cdvr".to_string(), "DVR".to_string())]);
        assert_eq!(labels.label_for("cdvr"), Some("DVR"));
        assert_eq!(labels.label_for("linear"), None);
    }

    #[test]
    fn test_render_includes_legend() {
        let overlay = Overlay {
            generated_at: Utc::now(),
            layers: vec![],
            unmatched_regions: vec![],
        };
        let rendered = overlay.render(BadnessDivisor::NEUTRAL, NoDataPolicy::Suppress);
        assert_eq!(rendered.legend.len(), 5);
    }

    #[test]
    fn test_layer_prefers_service_id_over_label() {
        let layer = |service_id: &str, label: &str| Layer {
            service_id: service_id.to_string(),
            label: label.to_string(),
            level: RegionLevel::State,
            name: layer_name(label, RegionLevel::State),
            regions: vec![],
        };
        // "linear" is shown as "cdvr", and "cdvr" is a service of its own
        let overlay = Overlay {
            generated_at: Utc::now(),
            layers: vec![layer("linear", "cdvr"), layer("cdvr", "DVR")],
            unmatched_regions: vec![],
        };
        assert_eq!(overlay.layer("cdvr", RegionLevel::State).unwrap().service_id, "cdvr");
        assert_eq!(overlay.layer("DVR", RegionLevel::State).unwrap().service_id, "cdvr");
        assert_eq!(overlay.layer("linear", RegionLevel::State).unwrap().service_id, "linear");
        assert!(overlay.layer("cdvr", RegionLevel::County).is_none());
    }
}
