//! Gait Sensor Agent CLI
//!
//! Gait aggregation and transmission for longitudinal MS symptom tracking.

use clap::{Parser, Subcommand};
use crossbeam_channel::RecvTimeoutError;
use gait_sensor_agent::{
    config::Config,
    core::{alerts, analyze_trends, GaitRecord, TrendStatus},
    Delivery, GaitEngine, TransmissionChannel, CLINICAL_DISCLAIMER, VERSION,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gait-sensor")]
#[command(version = VERSION)]
#[command(about = "Gait aggregation and transmission for MS symptom tracking", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate the trailing window periodically and print each record
    Monitor {
        /// Stream each record to the collector
        #[arg(long)]
        stream: bool,

        /// Seconds between ticks (overrides the configured interval)
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Aggregate one record per calendar day over past days
    Backfill {
        /// Number of days (defaults to the configured backfill_days)
        #[arg(long)]
        days: Option<u32>,

        /// Send the records to the collector as one batch, exporting if it is unreachable
        #[arg(long)]
        stream: bool,

        /// Write the records to an XML export file
        #[arg(long)]
        export: bool,
    },

    /// Write past days to a health-data XML export file
    Export {
        /// Number of days (defaults to the configured backfill_days)
        #[arg(long)]
        days: Option<u32>,

        /// Output directory for the export file
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show configuration, collector reachability and statistics
    Status,

    /// Show configuration
    Config,

    /// Display the clinical use notice
    Disclaimer,

    /// Run the reference collector
    #[cfg(feature = "server")]
    Serve {
        /// Port to listen on
        #[arg(long, default_value = "8000")]
        port: u16,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Monitor { stream, interval } => {
            cmd_monitor(stream, interval);
        }
        Commands::Backfill {
            days,
            stream,
            export,
        } => {
            cmd_backfill(days, stream, export);
        }
        Commands::Export { days, output } => {
            cmd_export(days, output);
        }
        Commands::Status => {
            cmd_status();
        }
        Commands::Config => {
            cmd_config();
        }
        Commands::Disclaimer => {
            cmd_disclaimer();
        }
        #[cfg(feature = "server")]
        Commands::Serve { port } => {
            cmd_serve(port);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cmd_monitor(stream: bool, interval: Option<u64>) {
    let mut config = load_config();
    if let Some(secs) = interval {
        config.monitor_interval = Duration::from_secs(secs.max(1));
    }

    println!("Gait Sensor Agent v{VERSION}");
    println!();
    println!("Starting live monitoring...");
    println!("  Patient: {}", config.patient_id);
    println!("  Interval: {}s", config.monitor_interval.as_secs());
    println!("  Window: {}s", config.live_window.as_secs());

    let runtime = build_runtime();
    let _guard = runtime.enter();
    let engine = build_engine(config);

    if stream {
        connect(&runtime, &engine);
    } else {
        println!("  Streaming: disabled");
    }

    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone());

    let (record_tx, record_rx) = crossbeam_channel::unbounded::<GaitRecord>();
    engine.start_monitoring(move |record| {
        let _ = record_tx.send(record);
    });
    let errors = engine.transmission_errors();

    while running.load(Ordering::SeqCst) {
        match record_rx.recv_timeout(Duration::from_millis(250)) {
            Ok(record) => print_record(&record),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(e) = errors.try_recv() {
            eprintln!("Transmission error: {e}");
        }
    }

    println!();
    println!("Stopping...");
    runtime.block_on(engine.shutdown());

    println!();
    println!("{}", engine.transparency().summary());
}

fn cmd_backfill(days: Option<u32>, stream: bool, export: bool) {
    let config = load_config();
    let days = days.unwrap_or(config.backfill_days);

    let runtime = build_runtime();
    let _guard = runtime.enter();
    let engine = build_engine(config);

    if stream {
        connect(&runtime, &engine);
    }

    println!("Aggregating {days} day(s)...");
    let records = match runtime.block_on(engine.request_days(days)) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    println!();

    for record in &records {
        print_record(record);
    }
    print_trends(&records);

    if stream {
        let sent_before = delivery_count(&engine);
        match engine.deliver_historical(&records) {
            Ok(Delivery::Transmitted { records }) => {
                runtime.block_on(wait_for_delivery(&engine, sent_before));
                println!("Sent {records} record(s) to the collector as one batch");
            }
            Ok(Delivery::Exported(path)) => {
                println!("Collector unreachable; exported to {}", path.display());
            }
            Err(e) => eprintln!("Error writing export: {e}"),
        }
    } else if export {
        match engine.request_export(&records) {
            Ok(path) => println!("Exported to {}", path.display()),
            Err(e) => eprintln!("Error writing export: {e}"),
        }
    }

    runtime.block_on(engine.shutdown());
}

fn cmd_export(days: Option<u32>, output: Option<PathBuf>) {
    let config = load_config();
    let days = days.unwrap_or(config.backfill_days);

    let runtime = build_runtime();
    let _guard = runtime.enter();
    let engine = build_engine(config);

    let records = match runtime.block_on(engine.request_days(days)) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let present = records.iter().filter(|r| !r.is_empty()).count();
    println!("Aggregated {} day(s), {present} with data", records.len());

    let result = match output {
        Some(dir) => engine.export_to(&dir, &records),
        None => engine.request_export(&records),
    };

    match result {
        Ok(path) => println!("Exported to {}", path.display()),
        Err(e) => {
            eprintln!("Error writing export: {e}");
            std::process::exit(1);
        }
    }

    runtime.block_on(engine.shutdown());
}

fn cmd_status() {
    let config = load_config();

    println!("Gait Sensor Agent Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!("  Patient: {}", config.patient_id);
    println!("  Source: {:?}", config.source.kind);
    println!("  Monitor interval: {}s", config.monitor_interval.as_secs());
    println!("  Live window: {}s", config.live_window.as_secs());
    println!("  Backfill days: {}", config.backfill_days);
    println!("  Time zone: {}", config.timezone);
    println!();

    let runtime = build_runtime();
    let channel = TransmissionChannel::new(config.collector.url.clone());
    let reachable = runtime.block_on(channel.probe_health());
    println!(
        "Collector ({}): {}",
        config.collector.url,
        match reachable {
            Ok(true) => "Reachable ✓".to_string(),
            Ok(false) => "Unhealthy ✗".to_string(),
            Err(e) => format!("Unreachable ✗ ({e})"),
        }
    );
    println!();

    // Load and show transparency stats if available
    let stats_path = config.transparency_path();
    if stats_path.exists() {
        if let Ok(content) = std::fs::read_to_string(&stats_path) {
            if let Ok(stats) = serde_json::from_str::<serde_json::Value>(&content) {
                println!("Cumulative Statistics:");
                if let Some(windows) = stats.get("windows_aggregated") {
                    println!("  Windows aggregated: {windows}");
                }
                if let Some(emitted) = stats.get("records_emitted") {
                    println!("  Live records emitted: {emitted}");
                }
                if let Some(sent) = stats.get("payloads_sent") {
                    println!("  Payloads sent: {sent}");
                }
                if let Some(failed) = stats.get("send_failures") {
                    println!("  Failed sends: {failed}");
                }
                if let Some(exported) = stats.get("records_exported") {
                    println!("  Records exported: {exported}");
                }
            }
        }
    } else {
        println!("No previous session data found.");
    }
}

fn cmd_config() {
    let config = load_config();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

fn cmd_disclaimer() {
    println!("{CLINICAL_DISCLAIMER}");
}

#[cfg(feature = "server")]
fn cmd_serve(port: u16) {
    use gait_sensor_agent::server::{run, ServerConfig};

    let runtime = build_runtime();
    let result: anyhow::Result<()> = runtime.block_on(async {
        let (addr, shutdown_tx, state) = run(ServerConfig::new(port)).await?;
        println!("Gait collector listening on ws://{addr}/ws");
        println!("Press Ctrl+C to stop");

        tokio::signal::ctrl_c().await?;
        let _ = shutdown_tx.send(());

        println!();
        println!("Records received: {}", state.records().await.len());
        println!("Alerts triggered: {}", state.alerts_triggered());
        Ok(())
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config() -> Config {
    match Config::load() {
        Ok(config) => {
            if let Err(e) = config.ensure_directories() {
                eprintln!("Warning: Could not create directories: {e}");
            }
            config
        }
        Err(e) => {
            eprintln!("Error loading config from {:?}: {e}", Config::config_path());
            std::process::exit(1);
        }
    }
}

fn build_runtime() -> Runtime {
    match Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error starting async runtime: {e}");
            std::process::exit(1);
        }
    }
}

fn build_engine(config: Config) -> GaitEngine {
    match GaitEngine::from_config(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn connect(runtime: &Runtime, engine: &GaitEngine) {
    let url = &engine.config().collector.url;
    match runtime.block_on(engine.connect()) {
        Ok(()) => println!("  Collector: connected ({url})"),
        Err(e) => {
            eprintln!("Warning: Could not connect to collector at {url}: {e}");
            eprintln!("Continuing without streaming.");
        }
    }
}

fn delivery_count(engine: &GaitEngine) -> u64 {
    let stats = engine.transparency().stats();
    stats.payloads_sent + stats.send_failures
}

/// Wait until a spawned send has settled, bounded by a timeout.
async fn wait_for_delivery(engine: &GaitEngine, before: u64) {
    let settled = async {
        while delivery_count(engine) <= before {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(5), settled)
        .await
        .is_err()
    {
        eprintln!("Warning: batch delivery not confirmed");
    }
}

fn format_value(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{v:.2} {unit}"),
        None => "n/a".to_string(),
    }
}

fn print_record(record: &GaitRecord) {
    if record.is_empty() {
        println!("[{}] no gait data", record.timestamp().format("%Y-%m-%d %H:%M"));
        return;
    }

    println!(
        "[{}] {} | speed {} | step {} | asym {} | dst {} | steps {}",
        record.timestamp().format("%Y-%m-%d %H:%M"),
        record.speed_category(),
        format_value(record.walking_speed(), "m/s"),
        format_value(record.step_length(), "m"),
        format_value(record.walking_asymmetry(), "%"),
        format_value(record.double_support_time(), "%"),
        record
            .step_count()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "n/a".to_string()),
    );

    for alert in alerts(record) {
        println!("    ! {}", alert.message);
    }
}

fn print_trends(records: &[GaitRecord]) {
    let trends = analyze_trends(records);
    if trends.is_empty() {
        return;
    }

    println!();
    println!("Trends against personal baseline:");
    for trend in trends {
        let marker = match trend.status {
            TrendStatus::BeyondPopulationThreshold | TrendStatus::WellBeyondBaseline => "✗",
            TrendStatus::DriftingFromBaseline => "~",
            TrendStatus::WithinNormalRange => "✓",
            TrendStatus::InsufficientData => "?",
        };
        println!(
            "  {marker} {:<22} latest {:>8} | baseline {:>8} | {}",
            trend.metric.label(),
            trend
                .latest
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
            trend
                .baseline_mean
                .map(|v| format!("{v:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
            trend.status
        );
    }
    println!();
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) {
    if let Err(e) = ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    }) {
        eprintln!("Warning: Could not set Ctrl+C handler: {e}");
    }
}
