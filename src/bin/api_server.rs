//! REST API server for the customer experience overlay
//!
//! Loads reference data once, refreshes the overlay on an interval and
//! serves the latest good one.
//!
//! Usage:
//!   ./target/release/api_server --influx-url http://influx:8086 \
//!       --states data/us-states.json --counties data/us-counties.json [options]
//!
//! REST endpoints:
//!   GET /api/v1/health                   - Health check
//!   GET /api/v1/status                   - Last refresh outcome
//!   GET /api/v1/overlay                  - All layers (?divisor= or ?slider=, ?no_data=)
//!   GET /api/v1/overlay/:service/:level  - One layer
//!   GET /api/v1/legend                   - Legend bands for a divisor
//!   GET /api/v1/locate?lat=..&lon=..     - State and county at a coordinate

use anyhow::{Context, Result};
use clap::Parser;
use geo_experience::api::{router, OverlayService};
use geo_experience::config::Settings;
use geo_experience::pipeline::ReferenceData;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "api_server")]
#[command(about = "Serve the customer experience overlay over REST")]
struct Args {
    #[command(flatten)]
    settings: Settings,

    /// Port to listen on
    #[arg(long, env = "GEO_PORT", default_value_t = 8080)]
    port: u16,

    /// Seconds between refreshes
    #[arg(long, env = "GEO_REFRESH_INTERVAL_SECS", default_value_t = 300)]
    refresh_interval_secs: u64,
}

fn print_banner(port: u16, interval: Duration) {
    println!("============================================================");
    println!("         CUSTOMER EXPERIENCE OVERLAY API SERVER");
    println!("============================================================");
    println!();
    println!("  Port:     {}", port);
    println!("  REST:     http://localhost:{}/api/v1/", port);
    println!("  Refresh:  every {}s", interval.as_secs());
    println!();
    println!("REST Endpoints:");
    println!("  GET /api/v1/health                   Health check");
    println!("  GET /api/v1/status                   Refresh status");
    println!("  GET /api/v1/overlay                  All layers");
    println!("  GET /api/v1/overlay/:service/:level  One layer");
    println!("  GET /api/v1/legend                   Legend");
    println!("  GET /api/v1/locate                   Point lookup");
    println!("============================================================");
}

async fn shutdown_signal(tx: watch::Sender<bool>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {}", e);
    }
    tracing::info!("shutting down");
    let _ = tx.send(true);
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .init();

    let args = Args::parse();
    let settings = &args.settings;
    let interval = Duration::from_secs(args.refresh_interval_secs.max(1));

    let divisor = settings.default_divisor()?;
    let pipeline = settings.pipeline()?;
    let fetcher = settings.fetcher()?;

    print_banner(args.port, interval);

    let reference = ReferenceData::load(&fetcher, &settings.reference_sources())
        .await
        .context("loading reference data")?;

    let service = Arc::new(OverlayService::new(
        fetcher,
        reference,
        pipeline,
        divisor,
        settings.no_data,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh_handle = {
        let service = service.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { service.run_refresh_loop(interval, shutdown).await })
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let app = router(service);
    tracing::info!("Starting REST server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let mut server_shutdown = shutdown_rx;
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.changed().await;
    });

    tokio::spawn(shutdown_signal(shutdown_tx));

    if let Err(e) = server.await {
        tracing::error!("REST server error: {}", e);
    }

    // stops the loop if the server exited on its own
    refresh_handle.abort();
    let _ = refresh_handle.await;

    Ok(())
}
