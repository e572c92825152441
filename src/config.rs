//! Command-line and environment configuration shared by the binaries

use anyhow::{bail, Result};
use clap::Args;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::{DataLocation, Fetcher, QueryTarget, RetryPolicy};
use crate::overlay::{NoDataPolicy, ServiceLabels};
use crate::pipeline::{PipelineSettings, ReferenceSources};
use crate::ratio::{BadnessDivisor, REFERENCE_FRAGMENT_MS};

pub const DEFAULT_DATABASE: &str = "latlon_stats";
pub const DEFAULT_MEASUREMENT: &str = "ttms_data";
pub const DEFAULT_QUERY: &str = "select mean(ttms) from ttms_data where time > now() - 24h group by postcode, deliveryservice, time(24h)";

/// `id=Label` pair from `--service-label`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLabel {
    pub service_id: String,
    pub label: String,
}

impl FromStr for ServiceLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, label) = s
            .split_once('=')
            .ok_or_else(|| format!("expected id=Label, got '{}'", s))?;
        let (id, label) = (id.trim(), label.trim());
        if id.is_empty() || label.is_empty() {
            return Err(format!("expected id=Label, got '{}'", s));
        }
        Ok(Self {
            service_id: id.to_string(),
            label: label.to_string(),
        })
    }
}

/// Data sources and pipeline knobs
#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Ready-made time-series response, query URL or file, used as-is
    /// (takes precedence over --influx-url)
    #[arg(long, env = "GEO_QUERY_SOURCE")]
    pub query_source: Option<DataLocation>,

    /// InfluxDB base URL; `/query?db=..&q=..` is appended
    #[arg(long, env = "GEO_INFLUX_URL")]
    pub influx_url: Option<String>,

    #[arg(long, env = "GEO_INFLUX_DB", default_value = DEFAULT_DATABASE)]
    pub influx_db: String,

    #[arg(long, env = "GEO_INFLUX_QUERY", default_value = DEFAULT_QUERY)]
    pub influx_query: String,

    /// Series name to read from the response
    #[arg(long, env = "GEO_MEASUREMENT", default_value = DEFAULT_MEASUREMENT)]
    pub measurement: String,

    /// Postal lookup table (JSON or .csv), file path or URL
    #[arg(long, env = "GEO_ZIP_TABLE", default_value = "data/us-state-county-zips.min.json")]
    pub zip_table: DataLocation,

    /// State boundaries GeoJSON, file path or URL
    #[arg(long, env = "GEO_STATES")]
    pub states: Option<DataLocation>,

    /// County boundaries GeoJSON, file path or URL
    #[arg(long, env = "GEO_COUNTIES")]
    pub counties: Option<DataLocation>,

    /// Reference fragment latency in milliseconds
    #[arg(long, env = "GEO_REFERENCE_MS", default_value_t = REFERENCE_FRAGMENT_MS)]
    pub reference_ms: f64,

    /// Display label for a service, e.g. `col-jitp2=VOD` (repeatable)
    #[arg(long = "service-label", value_name = "ID=LABEL")]
    pub service_labels: Vec<ServiceLabel>,

    /// Rendering of regions with boundaries but no data
    #[arg(long, env = "GEO_NO_DATA", value_enum, default_value_t = NoDataPolicy::Suppress)]
    pub no_data: NoDataPolicy,

    /// Default badness divisor in (0, 1]
    #[arg(long, env = "GEO_DIVISOR", default_value_t = 1.0, conflicts_with = "slider")]
    pub divisor: f64,

    /// Default divisor as a 1..=99 slider position
    #[arg(long, env = "GEO_SLIDER")]
    pub slider: Option<i64>,

    #[arg(long, env = "GEO_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Attempts per request, including the first
    #[arg(long, env = "GEO_RETRIES", default_value_t = 3)]
    pub retries: u32,

    #[arg(long, env = "GEO_RETRY_DELAY_MS", default_value_t = 500)]
    pub retry_delay_ms: u64,

    /// Upper bound on one full refresh
    #[arg(long, env = "GEO_CYCLE_TIMEOUT_SECS", default_value_t = 60)]
    pub cycle_timeout_secs: u64,
}

impl Settings {
    pub fn query_target(&self) -> Result<QueryTarget> {
        if let Some(source) = &self.query_source {
            return Ok(QueryTarget::Direct(source.clone()));
        }
        match &self.influx_url {
            Some(base_url) => Ok(QueryTarget::Influx {
                base_url: base_url.clone(),
                database: self.influx_db.clone(),
                query: self.influx_query.clone(),
            }),
            None => bail!("no time-series source: pass --query-source or --influx-url"),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn labels(&self) -> ServiceLabels {
        ServiceLabels::new(
            self.service_labels
                .iter()
                .map(|l| (l.service_id.clone(), l.label.clone())),
        )
    }

    pub fn default_divisor(&self) -> Result<BadnessDivisor> {
        let divisor = match self.slider {
            Some(position) => BadnessDivisor::from_slider(position)?,
            None => BadnessDivisor::new(self.divisor)?,
        };
        Ok(divisor)
    }

    pub fn fetcher(&self) -> Result<Fetcher> {
        Ok(Fetcher::new(
            Duration::from_secs(self.request_timeout_secs),
            self.retry_policy(),
        )?)
    }

    pub fn reference_sources(&self) -> ReferenceSources {
        ReferenceSources {
            zip_table: self.zip_table.clone(),
            states: self.states.clone(),
            counties: self.counties.clone(),
        }
    }

    pub fn pipeline(&self) -> Result<PipelineSettings> {
        if !(self.reference_ms.is_finite() && self.reference_ms > 0.0) {
            bail!("--reference-ms must be positive, got {}", self.reference_ms);
        }
        Ok(PipelineSettings {
            target: self.query_target()?,
            measurement: self.measurement.clone(),
            reference_ms: self.reference_ms,
            labels: self.labels(),
            cycle_timeout: Duration::from_secs(self.cycle_timeout_secs),
        })
    }
}
