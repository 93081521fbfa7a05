//! Boss Fight Node
//!
//! Tracks movement against a CO2 boss and serves boss health.
//!
//! Usage:
//!   bossfight-node [OPTIONS]
//!
//! Run with `--help` for the full option list.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bossfight_node::{
    api::{self, events::EventLog, NodeState},
    geo::DistanceMode,
    storage::{BossDirectory, Storage},
    tracking::provider::{GeolocationProvider, ReportedPositionProvider, SimulatedProvider},
    tracking::{Tracker, TrackingConfig},
    types::{Difficulty, NewBoss, Position, CO2_G_PER_KM},
};

#[derive(Parser, Debug)]
#[command(name = "bossfight-node", version, about = "Boss Fight movement tracking node")]
struct Config {
    /// API port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Data directory
    #[arg(long, default_value = "./bossfight-data")]
    data_dir: String,

    /// Position request interval in milliseconds
    #[arg(long, default_value_t = 3000)]
    interval_ms: u64,

    /// CO2 grams credited per km
    #[arg(long, default_value_t = CO2_G_PER_KM)]
    co2_per_km: f64,

    /// Count every sample as a fixed distance instead of measuring it.
    /// Without a value uses the default dev increment.
    #[arg(long, num_args = 0..=1, default_missing_value = "0.42", value_parser = parse_increment)]
    dev_increment_km: Option<f64>,

    /// Oldest device fix still accepted, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    max_fix_age_ms: u64,

    /// Generate positions with a random walk instead of device reports
    #[arg(long)]
    simulate: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log: String,
}

fn parse_increment(raw: &str) -> Result<f64, String> {
    let km: f64 = raw.parse().map_err(|e| format!("{}", e))?;
    if km.is_finite() && km >= 0.0 {
        Ok(km)
    } else {
        Err(format!("must be a finite, non-negative km value, got {}", raw))
    }
}

impl Config {
    fn distance_mode(&self) -> DistanceMode {
        match self.dev_increment_km {
            Some(increment_km) => DistanceMode::Fixed { increment_km },
            None => DistanceMode::Haversine,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!(r#"
    ╔═══════════════════════════════════════════════════════════╗
    ║                                                           ║
    ║   👾  BOSS FIGHT NODE                                     ║
    ║       Move more, emit less                                ║
    ║                                                           ║
    ╚═══════════════════════════════════════════════════════════╝
    "#);

    let tracking = TrackingConfig {
        sample_interval_ms: config.interval_ms,
        co2_grams_per_km: config.co2_per_km,
        distance_mode: config.distance_mode(),
    };

    info!("Starting Boss Fight node...");
    info!("  API Port: {}", config.port);
    info!("  Data Dir: {}", config.data_dir);
    info!("  Sample Interval: {}ms", tracking.sample_interval_ms);
    info!("  CO2 per km: {} g", tracking.co2_grams_per_km);

    let storage = Arc::new(Storage::open(&config.data_dir)?);

    let positions = if config.simulate {
        None
    } else {
        Some(Arc::new(ReportedPositionProvider::new(Duration::from_millis(config.max_fix_age_ms))))
    };
    let provider: Arc<dyn GeolocationProvider> = match &positions {
        Some(reported) => reported.clone(),
        None => {
            info!("🎭 Simulating positions with a random walk");
            let start = Position::new(48.8566, 2.3522);
            Arc::new(SimulatedProvider::new(start, 0.05, 0.05, 42))
        }
    };

    if config.simulate && storage.list().await?.is_empty() {
        storage
            .register(NewBoss {
                name: "Smog Lord".to_string(),
                location: "Paris".to_string(),
                image: "one".to_string(),
                difficulty: Some(Difficulty::Easy),
                health_grams: None,
            })
            .await?;
    }

    let tracker = Arc::new(Tracker::new(tracking, provider, storage.clone(), storage.clone()));

    let events = EventLog::new();
    events.record(tracker.subscribe());

    let state = Arc::new(NodeState {
        tracker,
        store: storage.clone(),
        bosses: storage,
        positions,
        events,
    });

    // Start API server
    let addr = format!("0.0.0.0:{}", config.port);
    api::start_server(state, &addr).await?;

    Ok(())
}
