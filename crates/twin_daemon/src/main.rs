mod probe;
mod routes;
mod state;
mod tick_loop;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use state::{AppState, LineRuntime, MesState, WallClock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use twin_control::{MesDriver, OrderRequest};
use twin_core::{EnvironmentSensor, PlantContent};
use twin_world::{build_lines, build_plant, load_content, seeded_rng};

#[derive(Parser)]
#[command(name = "twin_daemon", about = "Manufacturing line digital twin daemon")]
struct Cli {
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = "./content")]
    content_dir: String,
    #[arg(long, default_value = "127.0.0.1:3001")]
    listen: SocketAddr,
    /// Overrides `tick_interval_ms` from constants.json.
    #[arg(long)]
    tick_ms: Option<u64>,
    /// JSON array of orders for a scripted MES. Without it the lines only
    /// take commands over HTTP.
    #[arg(long)]
    mes_orders: Option<String>,
    #[arg(long, default_value_t = 2)]
    mes_ack_delay: u64,
}

fn load_mes(cli: &Cli) -> Result<Option<Arc<Mutex<MesState>>>> {
    let Some(path) = &cli.mes_orders else {
        return Ok(None);
    };
    let json =
        std::fs::read_to_string(path).with_context(|| format!("reading MES orders: {path}"))?;
    let orders: Vec<OrderRequest> =
        serde_json::from_str(&json).with_context(|| format!("parsing MES orders: {path}"))?;
    tracing::info!(orders = orders.len(), "scripted MES enabled");
    Ok(Some(Arc::new(Mutex::new(MesState {
        driver: MesDriver::new(orders).with_ack_delay(cli.mes_ack_delay),
        next_command_id: 0,
    }))))
}

/// Each line draws from its own rng so lines never contend on one lock.
fn build_app_state(plant: &PlantContent, seed: u64, tick_interval_ms: u64) -> AppState {
    let lines = build_lines(plant)
        .into_iter()
        .zip(0u64..)
        .map(|(line, idx)| {
            Arc::new(Mutex::new(LineRuntime {
                line,
                rng: seeded_rng(seed.wrapping_add(idx + 1)),
            }))
        })
        .collect();
    let (stream_tx, _) = broadcast::channel(256);
    AppState {
        lines: Arc::new(lines),
        stream_tx,
        clock: WallClock::default(),
        content_version: plant.content_version.clone(),
        seed,
        tick_interval_ms,
        mes: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let library = load_content(&cli.content_dir)?;
    let seed = cli.seed.unwrap_or_else(|| chrono::Utc::now().timestamp_millis().unsigned_abs());
    let mut world_rng = seeded_rng(seed);
    let plant = build_plant(&library, chrono::Utc::now(), &mut world_rng)?;
    let c = &plant.constants;
    let tick_interval_ms = cli.tick_ms.unwrap_or(c.tick_interval_ms).max(1);

    let mut app_state = build_app_state(&plant, seed, tick_interval_ms);
    app_state.mes = load_mes(&cli)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ticker = tokio::spawn(tick_loop::run_tick_loop(
        app_state.clone(),
        Duration::from_millis(tick_interval_ms),
        shutdown_rx.clone(),
    ));
    let probe = tokio::spawn(probe::run_environment_probe(
        app_state.clone(),
        EnvironmentSensor::new(c.env_nominal_temperature_c, c.env_nominal_humidity_pct),
        world_rng,
        Duration::from_millis(c.env_probe_interval_ms),
        shutdown_rx.clone(),
    ));

    let router = routes::make_router(app_state);
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    tracing::info!(
        addr = %cli.listen,
        seed,
        content_version = %plant.content_version,
        tick_interval_ms,
        "twin_daemon listening"
    );

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = server_shutdown.changed() => {}
            }
        })
        .await
        .context("serving HTTP")?;

    let _ = shutdown_tx.send(true);
    ticker.await.context("joining tick loop")?;
    probe.await.context("joining environment probe")?;
    tracing::info!("twin_daemon stopped");
    Ok(())
}
