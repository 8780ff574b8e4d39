use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use roomba_oi::config::{BaseConfig, READINGS_HZ, RuntimeConfig};

/// Drive a Roomba over its serial Open Interface and bridge it to Zenoh
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(short, long, required_unless_present = "config")]
    port: Option<String>,

    /// Wheelbase width in mm (0 = default)
    #[arg(long, default_value_t = 0)]
    width_mm: i32,

    /// Wheel circumference in mm (0 = default)
    #[arg(long, default_value_t = 0)]
    wheel_circumference_mm: i32,

    /// Sensor publish rate
    #[arg(long, default_value_t = READINGS_HZ)]
    readings_hz: f64,

    /// JSON config file; overrides the other flags
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> roomba_oi::error::Result<RuntimeConfig> {
        if let Some(path) = &self.config {
            return RuntimeConfig::load(path);
        }
        let config = RuntimeConfig {
            base: BaseConfig {
                serial_port: self.port.unwrap_or_default(),
                width_mm: self.width_mm,
                wheel_circumference_mm: self.wheel_circumference_mm,
            },
            sensor: None,
            readings_hz: self.readings_hz,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let config = match Args::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Config error: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = roomba_oi::runtime::run(config).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
