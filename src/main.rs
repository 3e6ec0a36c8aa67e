use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use shuntread::{
    spawn_device, BluestTransport, Config, EngineError, LogSink, Record, RecordSink,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Poll BLE battery monitors and charge controllers and report what they say.
#[derive(Parser, Debug)]
#[command(name = "shuntread", version, about, long_about = None)]
struct Cli {
    /// Configuration file listing the devices to poll.
    #[arg(short, long, default_value = "shuntread.toml")]
    config: PathBuf,

    /// Print each record to stdout as one line of JSON instead of logging it.
    #[arg(long)]
    json: bool,
}

/// Writes records to stdout as JSON lines.
struct JsonSink;

impl RecordSink for JsonSink {
    fn on_record(&self, _device: &str, record: &Record) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(record)?);
        Ok(())
    }

    fn on_error(&self, device: &str, err: &EngineError) -> anyhow::Result<()> {
        error!(device, error = %err, "device stopped");
        Ok(())
    }

    fn on_write_complete(&self, device: &str, register: u16, value: u16) -> anyhow::Result<()> {
        info!(device, register, value, "register written");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let devices = config.device_settings()?;

    let transport = Arc::new(
        BluestTransport::new()
            .await
            .context("failed to open the Bluetooth adapter")?,
    );
    let sink: Arc<dyn RecordSink> = if cli.json {
        Arc::new(JsonSink)
    } else {
        Arc::new(LogSink)
    };

    let handles: Vec<_> = devices
        .into_iter()
        .map(|settings| spawn_device(Arc::clone(&transport), settings, Arc::clone(&sink)))
        .collect();
    info!(devices = handles.len(), "polling");

    let all_finished = async {
        while !handles.iter().all(|h| h.is_finished()) {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    };
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            info!("shutting down");
        }
        _ = all_finished => {}
    }

    for handle in &handles {
        handle.shutdown();
    }
    for handle in handles {
        handle.join().await;
    }
    Ok(())
}
