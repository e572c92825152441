//! One-shot refresh: load reference data, run a single cycle, print the overlay.
//!
//! Usage:
//!   geo_experience --influx-url http://influx:8086 --states data/us-states.json [--json]

use anyhow::{Context, Result};
use clap::Parser;
use geo_experience::config::Settings;
use geo_experience::overlay::RenderedOverlay;
use geo_experience::pipeline::{refresh, ReferenceData};
use geo_experience::GeoError;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "geo_experience")]
#[command(about = "Compute the customer experience overlay once and print it")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    /// Print the rendered overlay as JSON instead of a summary
    #[arg(long)]
    json: bool,

    /// Write the JSON overlay to a file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Regions listed per layer in the summary
    #[arg(long, default_value_t = 10)]
    top: usize,
}

fn print_summary(overlay: &RenderedOverlay, top: usize) {
    println!("============================================================");
    println!("         CUSTOMER EXPERIENCE OVERLAY");
    println!("============================================================");
    println!("  Generated:  {}", overlay.generated_at.to_rfc3339());
    println!("  Divisor:    {:.2}", overlay.divisor.value());
    println!();

    for layer in &overlay.layers {
        println!("{} ({} regions)", layer.name, layer.regions.len());
        let mut regions: Vec<_> = layer.regions.iter().filter(|r| r.has_data).collect();
        regions.sort_by(|a, b| a.ratio.total_cmp(&b.ratio));
        for shade in regions.iter().take(top) {
            println!("  {:<40} {:>8}  {}", shade.region, shade.label, shade.color);
        }
        if regions.len() > top {
            println!("  ... {} more", regions.len() - top);
        }
        println!();
    }

    println!("Legend:");
    for band in &overlay.legend {
        println!("  {:<14} {}", band.label, band.color);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();

    let cli = Cli::parse();
    let settings = &cli.settings;

    let divisor = settings.default_divisor()?;
    let pipeline = settings.pipeline()?;
    let fetcher = settings.fetcher()?;

    let reference = ReferenceData::load(&fetcher, &settings.reference_sources())
        .await
        .context("loading reference data")?;

    let report = match refresh(&fetcher, &reference, &pipeline).await {
        Ok(report) => report,
        Err(GeoError::EmptySeries) => {
            warn!("time-series source returned no data for the query window");
            return Ok(());
        }
        Err(e) => return Err(e).context("refresh failed"),
    };
    info!(
        samples = report.samples,
        postal_codes = report.postal_codes,
        unmapped = report.unmapped,
        without_values = report.without_values,
        unmatched_regions = report.overlay.unmatched_regions.len(),
        "refresh complete"
    );

    let rendered = report.overlay.render(divisor, settings.no_data);

    if let Some(path) = &cli.output {
        let json = serde_json::to_vec_pretty(&rendered)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "overlay written");
    }

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&rendered)?);
    } else {
        print_summary(&rendered, cli.top);
    }

    Ok(())
}
