//! `kinelog`: record and query kinematic sensor data over BLE.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kinelog_core::ble::{self, BleResolver, ScanOptions};
use kinelog_core::{ConnectionManager, Event, ManagerConfig, SampleBuffer};
use kinelog_store::SampleStore;
use kinelog_types::{Sample, SampleSink};

#[derive(Parser)]
#[command(name = "kinelog")]
#[command(author, version, about = "Recorder for BLE kinematic sensors", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database path (defaults to the platform data directory)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for nearby sensor units
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,

        /// List every BLE device, not just sensor units
        #[arg(long)]
        all: bool,
    },

    /// Connect to devices and record until Ctrl-C
    Record {
        /// Device address; repeat for multiple devices
        #[arg(short, long = "device", required = true)]
        devices: Vec<String>,
    },

    /// Query stored samples
    Query {
        /// Range start, unix milliseconds (defaults to earliest stored)
        #[arg(long)]
        from: Option<i64>,

        /// Range end, exclusive, unix milliseconds (defaults past the latest stored)
        #[arg(long)]
        to: Option<i64>,

        /// Downsampling window in milliseconds (raw rows when omitted)
        #[arg(short, long)]
        window: Option<i64>,

        /// How to reduce each window
        #[arg(short, long, value_enum, default_value = "mean")]
        mode: Mode,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Export stored samples to CSV
    Export {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Range start, unix milliseconds
        #[arg(long)]
        from: Option<i64>,

        /// Range end, exclusive, unix milliseconds
        #[arg(long)]
        to: Option<i64>,

        /// Delete the exported range from the database afterwards
        #[arg(long)]
        delete: bool,
    },

    /// Import samples from a CSV file
    Import {
        /// Input file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show database statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// First sample of each window
    First,
    /// Per-window arithmetic means
    Mean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(kinelog_store::default_db_path);

    match cli.command {
        Commands::Scan { timeout, all } => cmd_scan(timeout, all).await,
        Commands::Record { devices } => cmd_record(&db_path, devices).await,
        Commands::Query {
            from,
            to,
            window,
            mode,
            json,
        } => cmd_query(&db_path, from, to, window, mode, json),
        Commands::Export {
            output,
            from,
            to,
            delete,
        } => cmd_export(&db_path, &output, from, to, delete),
        Commands::Import { input } => cmd_import(&db_path, &input),
        Commands::Stats => cmd_stats(&db_path),
    }
}

async fn cmd_scan(timeout: u64, all: bool) -> Result<()> {
    let mut options = ScanOptions::new().duration(Duration::from_secs(timeout));
    if all {
        options = options.all_devices();
    }

    let devices = ble::scan(options).await.context("scan failed")?;
    if devices.is_empty() {
        println!("No devices found.");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}  {}  rssi={}  {}",
            device.address,
            device.name.as_deref().unwrap_or("(unnamed)"),
            device
                .rssi
                .map(|r| r.to_string())
                .unwrap_or_else(|| "?".into()),
            if device.is_sensor { "sensor" } else { "" },
        );
    }
    Ok(())
}

async fn cmd_record(db_path: &PathBuf, devices: Vec<String>) -> Result<()> {
    let store = Arc::new(SampleStore::open(db_path).context("failed to open database")?);
    let buffer = Arc::new(SampleBuffer::new(store.clone() as Arc<dyn SampleSink>));
    let resolver = Arc::new(BleResolver::new().await.context("no Bluetooth adapter")?);
    let manager = Arc::new(ConnectionManager::new(
        resolver,
        Arc::clone(&buffer),
        ManagerConfig::default(),
    ));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    let mut events = manager.subscribe();
    manager
        .connect(&devices)
        .await
        .context("connect failed")?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(Event::ServicesDiscovered { address, .. }) => {
                    match manager.enable_notifications(&address).await {
                        Ok(true) => info!(address, "recording"),
                        Ok(false) => warn!(address, "no notifiable characteristics"),
                        Err(err) => warn!(address, %err, "failed to enable notifications"),
                    }
                }
                Ok(Event::Disconnected { address, reason }) => {
                    info!(address, ?reason, "device disconnected");
                }
                Ok(Event::Error { address, error }) => {
                    warn!(address, error, "device error");
                }
                Ok(_) => {}
                Err(_) => break,
            },
        }
    }

    if let Err(err) = manager.disconnect(&devices).await {
        warn!(%err, "teardown incomplete");
    }
    let flushed = buffer.flush().context("final flush failed")?;
    info!(flushed, "recording stopped");
    Ok(())
}

fn cmd_query(
    db_path: &PathBuf,
    from: Option<i64>,
    to: Option<i64>,
    window: Option<i64>,
    mode: Mode,
    json: bool,
) -> Result<()> {
    let store = SampleStore::open(db_path).context("failed to open database")?;
    let Some((stored_min, stored_max)) = store.min_max_time()? else {
        bail!("database is empty");
    };
    let min = from.unwrap_or(stored_min);
    let max = to.unwrap_or(stored_max + 1);

    let samples = match window {
        None => store.range_query(min, max)?,
        Some(window) => match mode {
            Mode::First => store.first_per_window(min, max, window)?,
            Mode::Mean => store.mean_per_window(min, max, window)?,
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&samples)?);
    } else {
        for sample in &samples {
            print_sample(sample);
        }
        println!("{} rows", samples.len());
    }
    Ok(())
}

fn print_sample(sample: &Sample) {
    println!(
        "{}  acc=({:.1}, {:.1}, {:.1})  gyro=({:.1}, {:.1}, {:.1})  pitch={:.1}  roll={:.1}  force={:.1}",
        sample.time,
        sample.accel_x,
        sample.accel_y,
        sample.accel_z,
        sample.gyro_x,
        sample.gyro_y,
        sample.gyro_z,
        sample.pitch,
        sample.roll,
        sample.force,
    );
}

fn cmd_export(
    db_path: &PathBuf,
    output: &PathBuf,
    from: Option<i64>,
    to: Option<i64>,
    delete: bool,
) -> Result<()> {
    let store = SampleStore::open(db_path).context("failed to open database")?;
    let written = store
        .export_csv_file(output, from, to)
        .context("export failed")?;
    println!("Exported {} rows to {}", written, output.display());

    if delete && written > 0 {
        let Some((stored_min, stored_max)) = store.min_max_time()? else {
            return Ok(());
        };
        let deleted =
            store.delete_range(from.unwrap_or(stored_min), to.unwrap_or(stored_max + 1))?;
        println!("Deleted {deleted} exported rows");
    }
    Ok(())
}

fn cmd_import(db_path: &PathBuf, input: &PathBuf) -> Result<()> {
    let store = SampleStore::open(db_path).context("failed to open database")?;
    let imported = store.import_csv_file(input).context("import failed")?;
    println!("Imported {} rows from {}", imported, input.display());
    Ok(())
}

fn cmd_stats(db_path: &PathBuf) -> Result<()> {
    let store = SampleStore::open(db_path).context("failed to open database")?;
    let count = store.count()?;
    println!("Samples: {count}");

    if let Some((min, max)) = store.min_max_time()? {
        println!("Earliest: {} ({})", min, format_ms(min));
        println!("Latest:   {} ({})", max, format_ms(max));
        let span_secs = (max - min) as f64 / 1000.0;
        println!("Span:     {span_secs:.1}s");
    } else {
        println!("Database is empty.");
    }
    Ok(())
}

fn format_ms(ms: i64) -> String {
    time::OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .ok()
        .and_then(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .ok()
        })
        .unwrap_or_else(|| "invalid timestamp".into())
}
