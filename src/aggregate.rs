//! Per-region latency averaging
//!
//! Two steps: reduce samples to the latest value per (service, postal code),
//! then average those values per state and, independently, per county.
//! Ordered maps keep summation order fixed so the result does not depend on
//! the order samples arrived in.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::error::GeoError;
use crate::lookup::ZipLookup;
use crate::models::{RegionLevel, Sample};

/// service -> postal code -> latest latency ms
pub type LatestValues = BTreeMap<String, BTreeMap<String, f64>>;

/// region key -> mean latency ms
pub type RegionMeans = BTreeMap<String, f64>;

/// Result of reducing a batch of samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestByPostalCode {
    pub values: LatestValues,
    /// Postal codes with no lookup entry (MissingMapping)
    pub unmapped: BTreeSet<String>,
    /// (service, postal code) pairs whose samples were all null
    pub without_values: usize,
}

/// Mean latency per region, per service, per level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionAverages {
    services: BTreeMap<String, BTreeMap<RegionLevel, RegionMeans>>,
}

impl RegionAverages {
    pub fn get(&self, service: &str, level: RegionLevel, region: &str) -> Option<f64> {
        self.services.get(service)?.get(&level)?.get(region).copied()
    }

    pub fn level(&self, service: &str, level: RegionLevel) -> Option<&RegionMeans> {
        self.services.get(service)?.get(&level)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn insert(&mut self, service: &str, level: RegionLevel, region: String, mean: f64) {
        self.services
            .entry(service.to_string())
            .or_default()
            .entry(level)
            .or_default()
            .insert(region, mean);
    }
}

/// Latest non-null value per (service, postal code).
///
/// "Latest" is the greatest bucket timestamp; samples without a timestamp
/// sort before all timestamped ones, and ties go to the greater value.
/// Postal codes that do not resolve to a state are skipped and reported.
pub fn latest_by_postal_code(samples: &[Sample], lookup: &ZipLookup) -> LatestByPostalCode {
    let mut best: BTreeMap<(&str, &str), (Option<DateTime<Utc>>, f64)> = BTreeMap::new();
    let mut seen: BTreeSet<(&str, &str)> = BTreeSet::new();
    let mut unmapped = BTreeSet::new();

    for sample in samples {
        if lookup.resolve_state(&sample.postal_code).is_none() {
            if unmapped.insert(sample.postal_code.clone()) {
                debug!(error = %GeoError::MissingMapping { postal_code: sample.postal_code.clone() }, "skipping samples");
            }
            continue;
        }
        let key = (sample.service_id.as_str(), sample.postal_code.as_str());
        seen.insert(key);

        let Some(value) = sample.latency_ms.filter(|v| v.is_finite()) else {
            continue;
        };
        let candidate = (sample.bucket, value);
        best.entry(key)
            .and_modify(|current| {
                if is_later(&candidate, current) {
                    *current = candidate;
                }
            })
            .or_insert(candidate);
    }

    if !unmapped.is_empty() {
        warn!(count = unmapped.len(), "postal codes missing from lookup table");
    }

    let without_values = seen.iter().filter(|k| !best.contains_key(*k)).count();

    let mut values: LatestValues = BTreeMap::new();
    for ((service, postal_code), (_, value)) in best {
        values
            .entry(service.to_string())
            .or_default()
            .insert(postal_code.to_string(), value);
    }

    LatestByPostalCode {
        values,
        unmapped,
        without_values,
    }
}

fn is_later(a: &(Option<DateTime<Utc>>, f64), b: &(Option<DateTime<Utc>>, f64)) -> bool {
    match a.0.cmp(&b.0) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => a.1.total_cmp(&b.1).is_gt(),
    }
}

/// Arithmetic mean of the latest values per state and per county.
///
/// A region only appears when at least one postal code contributed to it.
/// A code that resolves to a state but has no county still counts toward
/// its state.
pub fn average_by_region(latest: &LatestValues, lookup: &ZipLookup) -> RegionAverages {
    let mut averages = RegionAverages::default();

    for (service, by_code) in latest {
        let mut buckets: BTreeMap<(RegionLevel, &str), (f64, usize)> = BTreeMap::new();

        for (postal_code, &value) in by_code {
            let regions = [
                (RegionLevel::State, lookup.resolve_state(postal_code)),
                (RegionLevel::County, lookup.resolve_county(postal_code)),
            ];
            for (level, region) in regions {
                let Some(region) = region else { continue };
                let (sum, count) = buckets.entry((level, region)).or_insert((0.0, 0));
                *sum += value;
                *count += 1;
            }
        }

        for ((level, region), (sum, count)) in buckets {
            averages.insert(service, level, region.to_string(), sum / count as f64);
        }
    }

    averages
}

/// Both steps in one call.
pub fn aggregate(samples: &[Sample], lookup: &ZipLookup) -> (LatestByPostalCode, RegionAverages) {
    let latest = latest_by_postal_code(samples, lookup);
    let averages = average_by_region(&latest.values, lookup);
    (latest, averages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn lookup() -> ZipLookup {
        ZipLookup::from_json(
            br#"{"result": [
                {"Zipcode": "90210", "State": "California", "County": "Los Angeles"},
                {"Zipcode": "90211", "State": "California", "County": "Los Angeles"},
                {"Zipcode": "94103", "State": "California", "County": "San Francisco"},
                {"Zipcode": "80202", "State": "Colorado", "County": "Denver"},
                {"Zipcode": "96799", "State": "American Samoa"}
            ]}"#,
        )
        .unwrap()
    }

    fn sample(code: &str, service: &str, day: u32, latency: Option<f64>) -> Sample {
        Sample {
            postal_code: code.to_string(),
            service_id: service.to_string(),
            bucket: Some(Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()),
            latency_ms: latency,
        }
    }

    #[test]
    fn test_latest_non_null_wins() {
        let samples = vec![
            sample("90210", "vod", 1, Some(500.0)),
            sample("90210", "vod", 3, None),
            sample("90210", "vod", 2, Some(800.0)),
        ];
        let latest = latest_by_postal_code(&samples, &lookup());
        assert_eq!(latest.values["vod"]["90210"], 800.0);
        assert_eq!(latest.without_values, 0);
    }

    #[test]
    fn test_all_null_code_is_dropped() {
        let samples = vec![
            sample("90210", "vod", 1, None),
            sample("90211", "vod", 1, Some(1000.0)),
        ];
        let latest = latest_by_postal_code(&samples, &lookup());
        assert!(!latest.values["vod"].contains_key("90210"));
        assert_eq!(latest.without_values, 1);
    }

    #[test]
    fn test_unmapped_codes_skipped() {
        let samples = vec![
            sample("00000", "vod", 1, Some(10.0)),
            sample("80202", "vod", 1, Some(1000.0)),
        ];
        let (latest, averages) = aggregate(&samples, &lookup());
        assert!(latest.unmapped.contains("00000"));
        assert_eq!(averages.get("vod", RegionLevel::State, "Colorado"), Some(1000.0));
    }

    #[test]
    fn test_state_and_county_means() {
        let samples = vec![
            sample("90210", "vod", 1, Some(1000.0)),
            sample("90211", "vod", 1, Some(3000.0)),
            sample("94103", "vod", 1, Some(500.0)),
            sample("80202", "live", 1, Some(250.0)),
        ];
        let (_, averages) = aggregate(&samples, &lookup());

        assert_eq!(averages.get("vod", RegionLevel::State, "California"), Some(1500.0));
        assert_eq!(
            averages.get("vod", RegionLevel::County, "California, Los Angeles"),
            Some(2000.0)
        );
        assert_eq!(
            averages.get("vod", RegionLevel::County, "California, San Francisco"),
            Some(500.0)
        );
        assert_eq!(averages.get("live", RegionLevel::State, "Colorado"), Some(250.0));
        assert_eq!(averages.services().collect::<Vec<_>>(), vec!["live", "vod"]);
    }

    #[test]
    fn test_empty_region_absent() {
        let samples = vec![sample("90210", "vod", 1, Some(1000.0))];
        let (_, averages) = aggregate(&samples, &lookup());
        assert_eq!(averages.get("vod", RegionLevel::State, "Colorado"), None);
        assert!(!averages.level("vod", RegionLevel::State).unwrap().contains_key("Colorado"));
        assert_eq!(averages.get("live", RegionLevel::State, "California"), None);
    }

    #[test]
    fn test_state_without_county_counts_for_state_only() {
        let samples = vec![sample("96799", "vod", 1, Some(700.0))];
        let (_, averages) = aggregate(&samples, &lookup());
        assert_eq!(averages.get("vod", RegionLevel::State, "American Samoa"), Some(700.0));
        assert!(averages.level("vod", RegionLevel::County).is_none());
    }

    #[test]
    fn test_order_independent() {
        let mut samples = Vec::new();
        let codes = ["90210", "90211", "94103", "80202", "96799"];
        for (i, code) in codes.iter().enumerate() {
            for day in 1..=5u32 {
                let value = 100.0 + (i as f64) * 37.3 + (day as f64) * 11.1;
                samples.push(sample(code, "vod", day, Some(value)));
                samples.push(sample(code, "live", day, Some(value * 1.7)));
            }
            // duplicate bucket with a different value
            samples.push(sample(code, "vod", 5, Some(42.0)));
        }
        let (_, expected) = aggregate(&samples, &lookup());

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..20 {
            samples.shuffle(&mut rng);
            let (_, shuffled) = aggregate(&samples, &lookup());
            assert_eq!(shuffled, expected);
        }
    }
}
