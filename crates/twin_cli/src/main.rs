use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand_chacha::ChaCha8Rng;
use twin_control::{CommandSource, MesDriver, OrderRequest};
use twin_core::{
    compute_metrics, EnvironmentSensor, Event, LineId, LineOrchestrator, MetricsFileWriter,
    OrderId, OrderStatus, PlantContent, Severity,
};
use twin_world::{build_lines, build_plant, load_content, seeded_rng};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "twin_cli", about = "Manufacturing line digital twin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the plant headless for a fixed number of ticks on a simulated clock.
    Run(RunArgs),
    /// Load and validate a content directory, then print the resolved lines.
    Check {
        #[arg(long, default_value = "./content")]
        content_dir: String,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    ticks: u64,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value = "./content")]
    content_dir: String,
    /// JSON array of orders for the MES driver. Without it every line gets
    /// `--orders-per-line` orders of `--order-qty` units.
    #[arg(long)]
    orders: Option<String>,
    #[arg(long, default_value_t = 3)]
    orders_per_line: u32,
    #[arg(long, default_value_t = 20)]
    order_qty: u64,
    /// Ticks the MES waits before acknowledging a completed order.
    #[arg(long, default_value_t = 2)]
    ack_delay: u64,
    #[arg(long, default_value_t = 60)]
    print_every: u64,
    /// Sample metrics every N ticks.
    #[arg(long, default_value_t = 10)]
    metrics_every: u64,
    /// Disable metrics collection to the runs/ directory.
    #[arg(long)]
    no_metrics: bool,
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn generate_run_id(seed: u64) -> String {
    format!("{}_seed{seed}", chrono::Utc::now().format("%Y%m%d_%H%M%S"))
}

fn create_run_dir(run_id: &str) -> Result<std::path::PathBuf> {
    let dir = std::path::PathBuf::from("runs").join(run_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating run directory: {}", dir.display()))?;
    Ok(dir)
}

fn write_run_info(dir: &std::path::Path, run_id: &str, seed: u64, args: &RunArgs, content_version: &str) -> Result<()> {
    let info = serde_json::json!({
        "run_id": run_id,
        "seed": seed,
        "content_version": content_version,
        "metrics_every": args.metrics_every,
        "runner": "twin_cli",
        "args": {
            "ticks": args.ticks,
            "orders": args.orders,
            "ack_delay": args.ack_delay,
            "print_every": args.print_every,
        }
    });
    let path = dir.join("run_info.json");
    let file =
        std::fs::File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(file, &info)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn load_orders(args: &RunArgs, plant: &PlantContent) -> Result<Vec<OrderRequest>> {
    if let Some(path) = &args.orders {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading orders file: {path}"))?;
        return serde_json::from_str(&json).with_context(|| format!("parsing orders file: {path}"));
    }
    let mut orders = Vec::new();
    for n in 1..=args.orders_per_line {
        for line in &plant.lines {
            orders.push(OrderRequest {
                line_id: line.id.clone(),
                order_id: OrderId(format!("{}-ORD{n:04}", line.id)),
                target_qty: args.order_qty,
                ppm: 0.0,
            });
        }
    }
    Ok(orders)
}

fn open_metrics(args: &RunArgs, seed: u64, content_version: &str) -> Result<Option<MetricsFileWriter>> {
    if args.no_metrics {
        return Ok(None);
    }
    let run_id = generate_run_id(seed);
    let run_dir = create_run_dir(&run_id)?;
    write_run_info(&run_dir, &run_id, seed, args, content_version)?;
    let writer = MetricsFileWriter::new(run_dir.clone())
        .with_context(|| format!("opening metrics CSV in {}", run_dir.display()))?;
    println!("Run directory: {}", run_dir.display());
    Ok(Some(writer))
}

/// Apply this tick's MES commands. Rejections are already logged by the line.
fn dispatch_commands(
    lines: &mut [LineOrchestrator],
    mes: &mut MesDriver,
    next_command_id: &mut u64,
    now_ms: u64,
) {
    for cmd in mes.generate_commands(lines, next_command_id) {
        if let Some(line) = lines.iter_mut().find(|l| *l.id() == cmd.line_id) {
            let _ = line.handle_command(&cmd.command, now_ms);
        }
    }
}

fn print_notable(line_id: &LineId, tick: u64, event: &Event) {
    match event {
        Event::OrderStatusChanged {
            order_id,
            status: OrderStatus::WaitingAck,
            ..
        } => println!("*** {line_id}: ORDER {order_id} COMPLETE at tick={tick:05} ***"),
        Event::AlarmRaised {
            station_id,
            code,
            severity,
            ..
        } if *severity >= Severity::Fault => {
            println!("!!! {station_id}: {} {code} at tick={tick:05}", severity.as_str());
        }
        _ => {}
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let library = load_content(&args.content_dir)?;
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng: ChaCha8Rng = seeded_rng(seed);
    let plant = build_plant(&library, chrono::Utc::now(), &mut rng)?;
    let mut lines = build_lines(&plant);
    let c = &plant.constants;
    tracing::info!(seed, lines = lines.len(), "plant built");

    let mut mes = MesDriver::new(load_orders(args, &plant)?).with_ack_delay(args.ack_delay);
    let mut next_command_id = 0u64;
    let mut env = EnvironmentSensor::new(c.env_nominal_temperature_c, c.env_nominal_humidity_pct);
    let mut metrics_writer = open_metrics(args, seed, &plant.content_version)?;

    println!(
        "Starting plant: ticks={} seed={seed} lines={} stations={} content_version={}",
        args.ticks,
        lines.len(),
        lines.iter().map(|l| l.stations().len()).sum::<usize>(),
        plant.content_version,
    );
    println!("{}", "-".repeat(80));

    let mut now_ms = 0u64;
    let mut next_probe_ms = 0u64;
    for tick in 1..=args.ticks {
        dispatch_commands(&mut lines, &mut mes, &mut next_command_id, now_ms);
        now_ms += c.tick_interval_ms;

        if now_ms >= next_probe_ms {
            let reading = env.sample(&mut rng);
            for line in &mut lines {
                line.publish_environment(reading);
            }
            next_probe_ms = now_ms + c.env_probe_interval_ms;
        }

        for line in &mut lines {
            let out = line.tick(now_ms, &mut rng);
            for event in &out.events {
                print_notable(line.id(), tick, &event.event);
            }
        }

        if args.print_every > 0 && tick % args.print_every == 0 {
            print_status(tick, &lines);
        }
        if let Some(writer) = metrics_writer.as_mut() {
            if args.metrics_every > 0 && tick % args.metrics_every == 0 {
                for line in &lines {
                    writer.write_row(&compute_metrics(line)).context("writing metrics row")?;
                }
            }
        }
    }

    println!("{}", "-".repeat(80));
    println!("Done after {} ticks. All orders released: {}", args.ticks, mes.is_drained());
    print_status(args.ticks, &lines);

    if let Some(writer) = metrics_writer.as_mut() {
        writer.flush().context("final metrics flush")?;
        println!("Metrics written to runs/ directory.");
    }
    Ok(())
}

fn print_status(tick: u64, lines: &[LineOrchestrator]) {
    for line in lines {
        let m = compute_metrics(line);
        println!(
            "[tick={tick:05}] {line_id:<4} order={order:<14} {status:<11} \
             {produced:>4}/{target:<4} exec={exec} starved={starved} \
             ok={ok} ng={ng} oee={oee:.3} energy={energy:.2}kWh alarms={alarms}",
            line_id = m.line_id,
            order = m.order_no,
            status = m.order_status,
            produced = m.order_produced_qty,
            target = m.order_target_qty,
            exec = m.stations_executing,
            starved = m.stations_starved,
            ok = m.total_ok,
            ng = m.total_ng,
            oee = m.avg_oee,
            energy = m.total_energy_kwh,
            alarms = m.active_alarm_count,
        );
    }
}

fn check(content_dir: &str) -> Result<()> {
    let library = load_content(content_dir)?;
    let plant = build_plant(&library, chrono::Utc::now(), &mut seeded_rng(0))?;
    println!("content_version={} OK", plant.content_version);
    for line in &plant.lines {
        let names: Vec<&str> = line.stations.iter().map(|s| s.name.as_str()).collect();
        println!("  {}: {}", line.id, names.join(" -> "));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(&args),
        Commands::Check { content_dir } => check(&content_dir),
    }
}
