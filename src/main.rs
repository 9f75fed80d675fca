use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use std::path::PathBuf;

use lorawan_indoor_simulator::common::config::{ConfigOverrides, ScenarioConfig, load_config};
use lorawan_indoor_simulator::common::report::{format_summary, write_layout_listings, write_summary};
use lorawan_indoor_simulator::simulation::run_scenario;

/// Simulate a dense indoor LoRaWAN deployment and report per-gateway packet outcomes.
#[derive(Parser, Debug)]
#[command(name = "lorawan-indoor-simulator", version, about)]
struct Cli {
    /// Scenario file (TOML, or JSON with a .json extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of end devices
    #[arg(long)]
    n_devices: Option<u32>,

    /// Number of gateways
    #[arg(long)]
    n_gateways: Option<u32>,

    /// Simulated time in seconds
    #[arg(long)]
    simulation_time: Option<f64>,

    /// Seconds between two uplinks of one device
    #[arg(long)]
    app_period: Option<f64>,

    /// Write the device, gateway and building listings
    #[arg(long)]
    print: Option<bool>,

    /// Seed for the whole run
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for the result files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Use shadowing and building penetration on top of log-distance loss
    #[arg(long)]
    realistic_channel: Option<bool>,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            device_count: self.n_devices,
            gateway_count: self.n_gateways,
            simulation_duration_s: self.simulation_time,
            app_period_s: self.app_period,
            print: self.print,
            seed: self.seed,
            output_directory: self.output_dir.clone(),
            realistic_channel_model: self.realistic_channel,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Logging setup
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("lorawan_indoor_simulator"), LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("Failed to load scenario {}", path.display()))?,
        None => ScenarioConfig::default(),
    };
    let config = config.with_overrides(&cli.overrides()).context("Invalid scenario")?;

    let (scenario, result) = run_scenario(&config).context("Simulation failed")?;

    let output = &config.output.directory;
    if config.output.print {
        write_layout_listings(output, &scenario)?;
    }

    let breakdown = result.gateway_breakdown();
    let summary = format_summary(&result.global_count(), &breakdown);
    let summary_path = write_summary(output, &summary)?;
    info!("Results written to {}", summary_path.display());

    if !result.tracker.dropped().is_empty() {
        warn!("{} transmissions were dropped as invalid", result.tracker.dropped().len());
    }
    print!("{}", summary);

    Ok(())
}
