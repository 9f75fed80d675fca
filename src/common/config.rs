//! Scenario configuration loading, overriding and validation.
//!
//! A scenario is read from TOML (or JSON when the file name ends in `.json`).
//! Every field has a default, so an empty file describes the reference
//! deployment: 700 devices in two office blocks and a rooftop gateway.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::simulation::buildings::GridBuildingParameters;
use crate::simulation::classifier::GatewayParameters;
use crate::simulation::layout::LayoutParameters;
use crate::simulation::propagation::PathLossParameters;
use crate::simulation::signal_calculations::LoraParameters;

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse scenario: {}", msg),
            ConfigLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

/// Devices, gateways and traffic.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct NetworkParameters {
    pub device_count: u32,
    pub gateway_count: u32,
    /// Gateway coordinates `[x, y, z]`; reused round-robin if there are fewer
    /// positions than gateways.
    pub gateway_positions: Vec<[f64; 3]>,
    pub simulation_duration_s: f64,
    pub app_period_s: f64,
    /// Application payload in bytes.
    pub payload_size: usize,
    /// EU868 data rate, DR5 = SF7 ... DR0 = SF12.
    pub data_rate: u8,
    pub tx_power_dbm: f64,
    /// Gateways acknowledge every received uplink in RX1.
    pub confirmed_messages: bool,
    pub seed: u64,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        Self {
            device_count: 700,
            gateway_count: 1,
            gateway_positions: vec![[50.0, 50.0, 23.0]],
            simulation_duration_s: 86_400.0,
            app_period_s: 300.0,
            payload_size: 20,
            data_rate: 5,
            tx_power_dbm: 14.0,
            confirmed_messages: false,
            seed: 1,
        }
    }
}

/// Where and whether to write the result artifacts.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct OutputParameters {
    /// Write the device, gateway and building listings for plotting.
    pub print: bool,
    pub directory: PathBuf,
}

impl Default for OutputParameters {
    fn default() -> Self {
        Self {
            print: true,
            directory: PathBuf::from("."),
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ScenarioConfig {
    pub network: NetworkParameters,
    pub propagation: PathLossParameters,
    pub buildings: GridBuildingParameters,
    pub layout: LayoutParameters,
    pub gateway: GatewayParameters,
    pub lora: LoraParameters,
    pub output: OutputParameters,
}

/// Command-line switches that take precedence over the scenario file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub device_count: Option<u32>,
    pub gateway_count: Option<u32>,
    pub simulation_duration_s: Option<f64>,
    pub app_period_s: Option<f64>,
    pub print: Option<bool>,
    pub seed: Option<u64>,
    pub output_directory: Option<PathBuf>,
    pub realistic_channel_model: Option<bool>,
}

impl ScenarioConfig {
    /// Apply overrides and re-validate.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self, ConfigLoadError> {
        if let Some(v) = overrides.device_count {
            self.network.device_count = v;
        }
        if let Some(v) = overrides.gateway_count {
            self.network.gateway_count = v;
        }
        if let Some(v) = overrides.simulation_duration_s {
            self.network.simulation_duration_s = v;
        }
        if let Some(v) = overrides.app_period_s {
            self.network.app_period_s = v;
        }
        if let Some(v) = overrides.print {
            self.output.print = v;
        }
        if let Some(v) = overrides.seed {
            self.network.seed = v;
        }
        if let Some(v) = &overrides.output_directory {
            self.output.directory = v.clone();
        }
        if let Some(v) = overrides.realistic_channel_model {
            self.propagation.realistic_channel_model = v;
        }
        validate_config(&self).map_err(ConfigLoadError::ValidationError)?;
        Ok(self)
    }
}

/// Load a scenario file. JSON when the extension is `.json`, TOML otherwise.
pub fn load_config(path: &Path) -> Result<ScenarioConfig, ConfigLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| ConfigLoadError::FileReadError(e.to_string()))?;

    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let config = if is_json {
        parse_json(&data)?
    } else {
        parse_toml(&data)?
    };

    validate_config(&config).map_err(ConfigLoadError::ValidationError)?;
    log::info!("Loaded scenario from {}", path.display());
    Ok(config)
}

pub fn parse_toml(data: &str) -> Result<ScenarioConfig, ConfigLoadError> {
    toml::from_str(data)
        .context("Invalid TOML format")
        .map_err(|e| ConfigLoadError::ParseError(format!("{:#}", e)))
}

pub fn parse_json(data: &str) -> Result<ScenarioConfig, ConfigLoadError> {
    serde_json::from_str(data)
        .context("Invalid JSON format")
        .map_err(|e| ConfigLoadError::ParseError(format!("{:#}", e)))
}

/// Validate a scenario.
///
/// Returns `Err(String)` describing the first problem found.
pub fn validate_config(config: &ScenarioConfig) -> Result<(), String> {
    const MAX_DEVICES: u32 = 100_000;
    const MIN_TX_POWER: f64 = -20.0;
    const MAX_TX_POWER: f64 = 30.0;

    let network = &config.network;
    if network.device_count == 0 {
        return Err("device_count must be positive".to_string());
    }
    if network.device_count > MAX_DEVICES {
        return Err(format!("device_count {} exceeds maximum of {}", network.device_count, MAX_DEVICES));
    }
    if network.gateway_count == 0 {
        return Err("gateway_count must be positive".to_string());
    }
    if network.gateway_positions.is_empty() {
        return Err("gateway_positions must list at least one position".to_string());
    }
    if network.gateway_positions.iter().flatten().any(|c| !c.is_finite()) {
        return Err("gateway_positions must be finite".to_string());
    }
    if !(network.simulation_duration_s > 0.0) || !network.simulation_duration_s.is_finite() {
        return Err(format!(
            "simulation_duration_s must be positive, got {}",
            network.simulation_duration_s
        ));
    }
    if !(network.app_period_s > 0.0) || !network.app_period_s.is_finite() {
        return Err(format!("app_period_s must be positive, got {}", network.app_period_s));
    }
    if network.data_rate > 5 {
        return Err(format!("Invalid data_rate {}, must be 0-5", network.data_rate));
    }
    if !(MIN_TX_POWER..=MAX_TX_POWER).contains(&network.tx_power_dbm) {
        return Err(format!(
            "tx_power_dbm {} outside realistic range ({} to {} dBm)",
            network.tx_power_dbm, MIN_TX_POWER, MAX_TX_POWER
        ));
    }

    // Building grid
    let buildings = &config.buildings;
    if buildings.count < 0 {
        return Err(format!("buildings.count must not be negative, got {}", buildings.count));
    }
    if buildings.count > 0
        && (buildings.grid_width <= 0 || buildings.rooms_x <= 0 || buildings.rooms_y <= 0 || buildings.floors <= 0)
    {
        return Err("building grid_width, rooms and floors must be positive".to_string());
    }
    if buildings.count > 0 && (!(buildings.length_x > 0.0) || !(buildings.length_y > 0.0) || !(buildings.height > 0.0)) {
        return Err("building dimensions must be positive".to_string());
    }

    // Device layout
    let layout = &config.layout;
    if layout.rooms_x == 0 || layout.rooms_y == 0 {
        return Err("layout rooms_x and rooms_y must be positive".to_string());
    }
    if layout.rooms_x.checked_mul(layout.rooms_y).is_none() {
        return Err(format!(
            "layout room grid {}x{} has too many rooms per floor",
            layout.rooms_x, layout.rooms_y
        ));
    }
    if !(layout.room_spacing > 0.0) || !(layout.floor_height > 0.0) {
        return Err("layout room_spacing and floor_height must be positive".to_string());
    }

    // Gateway radio
    let gateway = &config.gateway;
    if gateway.receive_paths == 0 {
        return Err("gateway receive_paths must be positive".to_string());
    }
    if !(gateway.capture_threshold_db >= 0.0) {
        return Err("gateway capture_threshold_db must be non-negative".to_string());
    }
    if gateway.sensitivity_dbm.iter().any(|s| !s.is_finite()) {
        return Err("gateway sensitivity_dbm must be finite".to_string());
    }

    // LoRa parameters
    let lora = &config.lora;
    if lora.bandwidth == 0 {
        return Err("Invalid bandwidth, must be positive".to_string());
    }
    if lora.coding_rate < 1 || lora.coding_rate > 4 {
        return Err(format!(
            "Invalid coding_rate {}, must be 1-4 (representing 4/5 to 4/8)",
            lora.coding_rate
        ));
    }
    if lora.preamble_symbols < 0.0 {
        return Err("Invalid preamble_symbols, must be non-negative".to_string());
    }
    if lora.channels_mhz.is_empty() {
        return Err("At least one channel must be configured".to_string());
    }

    // Path loss parameters
    let propagation = &config.propagation;
    if !(propagation.path_loss_exponent > 0.0) {
        return Err("Invalid path_loss_exponent, must be positive".to_string());
    }
    if !(propagation.reference_distance_m > 0.0) || !propagation.reference_loss_db.is_finite() {
        return Err("Invalid reference distance or loss".to_string());
    }
    if !(propagation.shadowing_sigma_db >= 0.0) {
        return Err("Invalid shadowing_sigma_db, must be non-negative".to_string());
    }
    if !(propagation.shadowing_correlation_distance_m > 0.0) {
        return Err("Invalid shadowing_correlation_distance_m, must be positive".to_string());
    }

    Ok(())
}
