//! Demonstration of the gait aggregation pipeline over a simulated flare.
//!
//! This example shows how to:
//! 1. Build a mock MS patient source with a two-week flare
//! 2. Aggregate a single window by hand
//! 3. Backfill one record per day and compare against the personal baseline
//! 4. Run live monitoring for a few ticks
//! 5. Fall back to an XML export when no collector is connected
//!
//! Run with: cargo run --example flare_demo

use chrono::{Duration as ChronoDuration, Utc};
use gait_sensor_agent::{
    analyze_trends, config::Config, source::FlarePeriod, transparency::create_shared_log,
    AggregationWindow, Delivery, GaitEngine, MockProfile, MockSource, WindowAggregator,
    CLINICAL_DISCLAIMER,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("Gait Sensor Agent - Flare Demo");
    println!("==============================");
    println!("{CLINICAL_DISCLAIMER}");

    let today = Utc::now().date_naive();
    let flare = FlarePeriod::new(today - ChronoDuration::days(20), today - ChronoDuration::days(7));
    let source = Arc::new(
        MockSource::new(MockProfile::MultipleSclerosis)
            .with_sample_interval(1800)
            .with_flares(vec![flare.clone()]),
    );
    println!("Flare from {} to {}", flare.start, flare.end);
    println!();

    // One window by hand
    let aggregator = WindowAggregator::new(source.clone());
    let window = AggregationWindow::trailing(Utc::now(), ChronoDuration::hours(6))?;
    let record = aggregator.aggregate(window).await;
    println!("Last 6 hours ({window}):");
    println!("  Speed category: {}", record.speed_category());
    println!("  Walking speed: {:?}", record.walking_speed());
    println!("  Step count: {:?}", record.step_count());
    println!();

    // Engine over the same source, exporting to a temp directory
    let export_dir = std::env::temp_dir().join("gait-flare-demo");
    let mut config = Config::default();
    config.patient_id = "DEMO-001".to_string();
    config.export_path = export_dir.clone();
    config.data_path = export_dir.join("data");
    config.monitor_interval = Duration::from_secs(1);
    // Samples arrive every half hour, so watch the last hour
    config.live_window = Duration::from_secs(3600);
    config.backfill_days = 45;

    let engine = GaitEngine::new(config, source, create_shared_log())?;

    let history = engine.request_historical().await?;
    println!("Backfilled {} days", history.len());
    for record in history.iter().rev().take(3) {
        println!(
            "  {} {:>18} speed {:?}",
            record.timestamp().format("%Y-%m-%d"),
            record.speed_category().to_string(),
            record.walking_speed()
        );
    }
    println!();

    println!("Trends:");
    for trend in analyze_trends(&history) {
        println!("  {:<22} {}", trend.metric.label(), trend.status);
    }
    println!();

    println!("Monitoring for 3 seconds...");
    engine.start_monitoring(|record| {
        println!(
            "  live {} {}",
            record.timestamp().format("%H:%M:%S"),
            record.speed_category()
        );
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.stop_monitoring();
    println!();

    match engine.deliver_historical(&history)? {
        Delivery::Transmitted { records } => println!("Sent {records} records"),
        Delivery::Exported(path) => println!("No collector; exported to {}", path.display()),
    }

    println!();
    println!("{}", engine.transparency().summary());
    Ok(())
}
