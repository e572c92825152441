use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tag carrying the postal code on each time-series series
pub const POSTAL_CODE_TAG: &str = "postcode";

/// Tag carrying the delivery service (xml id) on each time-series series
pub const SERVICE_TAG: &str = "deliveryservice";

/// Raw response from the time-series query endpoint (InfluxDB 1.x JSON)
#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<StatementResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: Option<i64>,
    #[serde(default)]
    pub series: Option<Vec<Series>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One series: a tag set plus rows of `[time, value, ...]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

/// A single latency observation for one postal code and service
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub postal_code: String,
    pub service_id: String,
    pub bucket: Option<DateTime<Utc>>,
    pub latency_ms: Option<f64>,
}

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionLevel {
    State,
    County,
}

impl RegionLevel {
    pub const ALL: [RegionLevel; 2] = [RegionLevel::State, RegionLevel::County];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionLevel::State => "state",
            RegionLevel::County => "county",
        }
    }

    /// Title used in layer names ("... by State")
    pub fn title(&self) -> &'static str {
        match self {
            RegionLevel::State => "State",
            RegionLevel::County => "County",
        }
    }
}

impl fmt::Display for RegionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "state" | "states" => Ok(RegionLevel::State),
            "county" | "counties" => Ok(RegionLevel::County),
            other => Err(format!("unknown region level '{}'", other)),
        }
    }
}

impl QueryResponse {
    /// Flatten every matching series into samples.
    ///
    /// Returns `Ok(None)` when the first statement carries no series at all,
    /// which the caller treats as an empty result set.
    pub fn into_samples(self, measurement: &str) -> Result<Option<Vec<Sample>>, String> {
        let Some(first) = self.results.into_iter().next() else {
            return Ok(None);
        };
        if let Some(err) = first.error {
            return Err(err);
        }
        let Some(series) = first.series else {
            return Ok(None);
        };

        let mut samples = Vec::new();
        for serie in series.into_iter().filter(|s| s.name == measurement) {
            samples.extend(serie.into_samples());
        }
        Ok(Some(samples))
    }
}

impl Series {
    /// Rows become samples; the series tags supply postal code and service.
    ///
    /// The value column is the first non-time column. Series without a
    /// postal code or service tag yield nothing.
    pub fn into_samples(self) -> Vec<Sample> {
        let (Some(postal_code), Some(service_id)) = (
            self.tags.get(POSTAL_CODE_TAG).map(|s| s.trim().to_string()),
            self.tags.get(SERVICE_TAG).cloned(),
        ) else {
            return Vec::new();
        };

        let time_idx = self.columns.iter().position(|c| c == "time").unwrap_or(0);
        let value_idx = self
            .columns
            .iter()
            .enumerate()
            .find(|(i, _)| *i != time_idx)
            .map(|(i, _)| i)
            .unwrap_or(1);

        self.values
            .iter()
            .map(|row| Sample {
                postal_code: postal_code.clone(),
                service_id: service_id.clone(),
                bucket: row.get(time_idx).and_then(parse_bucket),
                latency_ms: row.get(value_idx).and_then(|v| v.as_f64()),
            })
            .collect()
    }
}

fn parse_bucket(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        // epoch=ms style responses
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "results": [{
            "statement_id": 0,
            "series": [
                {
                    "name": "ttms_data",
                    "tags": {"deliveryservice": "vod", "postcode": "90210"},
                    "columns": ["time", "mean"],
                    "values": [
                        ["2024-05-01T00:00:00Z", 1200.5],
                        ["2024-05-02T00:00:00Z", null]
                    ]
                },
                {
                    "name": "other_measurement",
                    "tags": {"deliveryservice": "vod", "postcode": "90211"},
                    "columns": ["time", "mean"],
                    "values": [["2024-05-01T00:00:00Z", 10.0]]
                }
            ]
        }]
    }"#;

    #[test]
    fn test_flatten_series() {
        let response: QueryResponse = serde_json::from_str(RESPONSE).unwrap();
        let samples = response.into_samples("ttms_data").unwrap().unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].postal_code, "90210");
        assert_eq!(samples[0].service_id, "vod");
        assert_eq!(samples[0].latency_ms, Some(1200.5));
        assert!(samples[0].bucket.is_some());
        assert_eq!(samples[1].latency_ms, None);
    }

    #[test]
    fn test_missing_series_is_empty_not_error() {
        let response: QueryResponse =
            serde_json::from_str(r#"{"results":[{"statement_id":0}]}"#).unwrap();
        assert_eq!(response.into_samples("ttms_data"), Ok(None));

        let response: QueryResponse = serde_json::from_str(r#"{"results":[]}"#).unwrap();
        assert_eq!(response.into_samples("ttms_data"), Ok(None));
    }

    #[test]
    fn test_statement_error_surfaces() {
        let response: QueryResponse = serde_json::from_str(
            r#"{"results":[{"statement_id":0,"error":"database not found: latlon_stats"}]}"#,
        )
        .unwrap();
        assert_eq!(
            response.into_samples("ttms_data"),
            Err("database not found: latlon_stats".to_string())
        );
    }

    #[test]
    fn test_series_without_tags_yields_nothing() {
        let serie = Series {
            name: "ttms_data".into(),
            tags: HashMap::new(),
            columns: vec!["time".into(), "mean".into()],
            values: vec![vec![serde_json::json!("2024-05-01T00:00:00Z"), serde_json::json!(5.0)]],
        };
        assert!(serie.into_samples().is_empty());
    }

    #[test]
    fn test_region_level_parse() {
        assert_eq!("State".parse::<RegionLevel>(), Ok(RegionLevel::State));
        assert_eq!("counties".parse::<RegionLevel>(), Ok(RegionLevel::County));
        assert!("zip".parse::<RegionLevel>().is_err());
    }
}
