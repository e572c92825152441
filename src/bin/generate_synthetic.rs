//! Synthetic Input Generator
//!
//! Writes a postal lookup table and a time-series query response with the
//! same shapes the pipeline reads, for local runs without live sources.
//!
//! Usage:
//!   ./target/release/generate_synthetic --postal-codes 500 --seed 42
//!   geo_experience --zip-table data/synthetic_zips.json \
//!       --query-source data/synthetic_ttms.json

use anyhow::{Context, Result};
use chrono::{Duration, DurationRound, Utc};
use clap::Parser;
use geo_experience::models::{POSTAL_CODE_TAG, SERVICE_TAG};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "generate_synthetic")]
#[command(about = "Generate a synthetic postal lookup table and latency series")]
struct Args {
    /// Number of distinct postal codes
    #[arg(long, default_value = "300")]
    postal_codes: usize,

    /// Delivery service ids to emit series for
    #[arg(long, value_delimiter = ',', default_value = "col-jitp2,col-linear")]
    services: Vec<String>,

    /// Daily buckets per series
    #[arg(long, default_value = "3")]
    buckets: u32,

    /// Share of bucket values emitted as null
    #[arg(long, default_value = "0.05")]
    null_rate: f64,

    /// Share of postal codes left out of the lookup table
    #[arg(long, default_value = "0.02")]
    unmapped_rate: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Lookup table output
    #[arg(long, default_value = "data/synthetic_zips.json")]
    lookup_output: PathBuf,

    /// Time-series response output
    #[arg(long, default_value = "data/synthetic_ttms.json")]
    series_output: PathBuf,
}

/// (state, counties, typical fragment latency ms)
const REGIONS: &[(&str, &[&str], f64)] = &[
    ("California", &["Los Angeles", "San Diego", "Santa Clara", "Alameda"], 1400.0),
    ("Colorado", &["Denver", "Boulder", "El Paso", "Arapahoe"], 1900.0),
    ("Texas", &["Harris", "Travis", "Dallas", "Bexar"], 2300.0),
    ("New York", &["Kings", "Queens", "New York", "Erie"], 1700.0),
    ("Pennsylvania", &["Philadelphia", "Allegheny", "Montgomery"], 2600.0),
    ("Georgia", &["Fulton", "Cobb", "De Kalb"], 3100.0),
    ("Washington", &["King", "Pierce", "Spokane"], 1600.0),
    ("District Of Columbia", &["District Of Columbia"], 2000.0),
];

/// Distinct 5-digit codes available in 00501..99950
const MAX_POSTAL_CODES: usize = 99_449;

struct PostalCode {
    code: String,
    state: &'static str,
    county: &'static str,
    base_latency: f64,
    mapped: bool,
}

fn generate_postal_codes(args: &Args, rng: &mut impl Rng) -> Vec<PostalCode> {
    let target = args.postal_codes.min(MAX_POSTAL_CODES);
    let mut seen = BTreeSet::new();
    let mut codes = Vec::with_capacity(target);
    while codes.len() < target {
        let code = format!("{:05}", rng.gen_range(501..99950));
        if !seen.insert(code.clone()) {
            continue;
        }
        let (state, counties, latency) = REGIONS[rng.gen_range(0..REGIONS.len())];
        let county = counties[rng.gen_range(0..counties.len())];
        codes.push(PostalCode {
            code,
            state,
            county,
            base_latency: latency * rng.gen_range(0.7..1.3),
            mapped: rng.gen::<f64>() >= args.unmapped_rate,
        });
    }
    codes
}

fn lookup_table(codes: &[PostalCode]) -> Value {
    let rows: Vec<Value> = codes
        .iter()
        .filter(|c| c.mapped)
        .map(|c| json!({"Zipcode": c.code, "State": c.state, "County": c.county}))
        .collect();
    json!({ "result": rows })
}

fn series_response(args: &Args, codes: &[PostalCode], rng: &mut impl Rng) -> Value {
    let today = Utc::now()
        .duration_trunc(Duration::days(1))
        .unwrap_or_else(|_| Utc::now());
    let mut series = Vec::new();

    for service in &args.services {
        let service_factor = rng.gen_range(0.8..1.2);
        for code in codes {
            let values: Vec<Value> = (0..args.buckets)
                .rev()
                .map(|days_back| {
                    let time = today - Duration::days(days_back as i64);
                    let value = if rng.gen::<f64>() < args.null_rate {
                        Value::Null
                    } else {
                        let jitter = rng.gen_range(0.85..1.15);
                        json!((code.base_latency * service_factor * jitter).round())
                    };
                    json!([time.to_rfc3339(), value])
                })
                .collect();

            series.push(json!({
                "name": "ttms_data",
                "tags": { POSTAL_CODE_TAG: code.code, SERVICE_TAG: service },
                "columns": ["time", "mean"],
                "values": values,
            }));
        }
    }

    json!({ "results": [ { "statement_id": 0, "series": series } ] })
}

fn write_json(path: &PathBuf, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    println!("🔧 Synthetic Input Generator");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Postal codes:     {}", args.postal_codes);
    println!("Services:         {}", args.services.join(", "));
    println!("Buckets:          {}", args.buckets);
    println!("Null rate:        {:.1}%", args.null_rate * 100.0);
    println!("Unmapped rate:    {:.1}%", args.unmapped_rate * 100.0);
    if let Some(seed) = args.seed {
        println!("Random seed:      {}", seed);
    }
    println!();

    let mut rng: StdRng = match args.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let codes = generate_postal_codes(&args, &mut rng);
    let mapped = codes.iter().filter(|c| c.mapped).count();

    write_json(&args.lookup_output, &lookup_table(&codes))?;
    println!("📖 Lookup table:   {} ({} mapped codes)", args.lookup_output.display(), mapped);

    let response = series_response(&args, &codes, &mut rng);
    write_json(&args.series_output, &response)?;
    println!(
        "🏭 Series:         {} ({} series)",
        args.series_output.display(),
        codes.len() * args.services.len()
    );

    println!("\n✅ Done");
    Ok(())
}
