//! Sensor simulator CLI: publishes random readings to a Kinesis stream.

use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stream_batch_processor::config::LogFormat;
use stream_batch_processor::logging::init_tracing;
use stream_batch_processor::simulator::{simulate, KinesisPublisher, SimulatorConfig};
use tokio::sync::watch;

/// Sensor data simulator for Kinesis
#[derive(Debug, Parser)]
#[command(name = "simulator", version, about)]
struct Args {
    /// Kinesis stream name
    #[arg(long, env = "STREAM_NAME")]
    stream: String,

    /// Number of sensors to simulate
    #[arg(long, default_value_t = 5)]
    sensors: usize,

    /// Interval between data points (seconds)
    #[arg(long, default_value_t = 0.2)]
    interval: f64,

    /// Duration of simulation (seconds)
    #[arg(long, default_value_t = 300)]
    duration: u64,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_format);

    if !args.interval.is_finite() || args.interval < 0.0 {
        return Err(format!("--interval must be a non-negative number, got {}", args.interval).into());
    }

    let config = SimulatorConfig {
        sensors: args.sensors,
        interval: Duration::from_secs_f64(args.interval),
        duration: Duration::from_secs(args.duration),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping simulation...");
            shutdown_tx.send(true).ok();
        }
    });

    println!(
        "Starting simulation with {} sensors for {} seconds",
        config.sensors, args.duration
    );
    println!("Sending data to Kinesis stream: {}", args.stream);

    let publisher = KinesisPublisher::from_env(args.stream).await;
    let mut rng = StdRng::from_entropy();
    let stats = simulate(&publisher, &config, &mut rng, shutdown_rx).await;

    println!(
        "\nSimulation complete. Sent {} records in {:.2} seconds",
        stats.sent,
        stats.elapsed.as_secs_f64()
    );
    println!("Average throughput: {:.2} records/second", stats.throughput());

    if stats.failed > 0 {
        return Err(format!("{} record(s) could not be published", stats.failed).into());
    }
    Ok(())
}
