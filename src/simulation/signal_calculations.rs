//! Radio signal and timing calculations.
//!
//! Contains helpers for:
//! - Log-distance path loss
//! - LoRa airtime of a LoRaWAN uplink
//! - Gateway sensitivity lookup per spreading factor
//!
//! Units:
//! - Power: dBm
//! - Time: seconds (f64) for mathematical expressions, `Duration` for API
//! - Distance: meters

use serde::Deserialize;
use std::time::Duration;

use super::types::SpreadingFactor;

/// Bytes LoRaWAN adds around the application payload: MHDR (1), FHDR (7),
/// FPort (1) and MIC (4).
pub const LORAWAN_OVERHEAD_BYTES: usize = 13;

/// Symbol duration above which low data rate optimization is mandatory.
const LOW_DATA_RATE_SYMBOL_TIME: f64 = 0.016;

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LoraParameters {
    /// Channel bandwidth in Hz.
    pub bandwidth: u32,
    /// 1..4 representing 4/5..4/8.
    pub coding_rate: u32,
    // Number of preamble symbols (typically 8 for LoRa)
    pub preamble_symbols: f64,
    // Whether a 16-bit CRC is enabled on the payload
    pub crc_enabled: bool,
    /// Forced low data rate optimization; derived from the symbol time when unset.
    pub low_data_rate_optimization: Option<bool>,
    /// Uplink carriers in MHz. Devices pick one at random for every frame.
    pub channels_mhz: Vec<f64>,
}

impl Default for LoraParameters {
    fn default() -> Self {
        Self {
            bandwidth: 125_000,
            coding_rate: 1,
            preamble_symbols: 8.0,
            crc_enabled: true,
            low_data_rate_optimization: None,
            channels_mhz: vec![868.1, 868.3, 868.5],
        }
    }
}

impl LoraParameters {
    /// LoRa symbol time in seconds: T_sym = 2^SF / BW
    pub fn symbol_time(&self, sf: SpreadingFactor) -> f64 {
        2.0_f64.powi(sf.value() as i32) / self.bandwidth as f64
    }

    fn low_data_rate(&self, sf: SpreadingFactor) -> bool {
        self.low_data_rate_optimization
            .unwrap_or_else(|| self.symbol_time(sf) >= LOW_DATA_RATE_SYMBOL_TIME)
    }
}

/// Log-distance attenuation in dB.
///
/// ```text
/// PL(d) = PL(d₀) + 10 × n × log₁₀(d/d₀)
/// ```
///
/// Distances below the reference distance return the reference loss so the
/// result stays finite and non-decreasing for co-located endpoints.
pub fn calculate_log_distance_loss(distance: f64, exponent: f64, reference_distance: f64, reference_loss: f64) -> f64 {
    if distance <= reference_distance {
        return reference_loss;
    }
    reference_loss + 10.0 * exponent * (distance / reference_distance).log10()
}

/// Time on air (seconds) of a frame with `phy_payload_size` bytes.
pub fn calculate_air_time(lora_parameters: &LoraParameters, sf: SpreadingFactor, phy_payload_size: usize) -> f64 {
    let symbol_time = lora_parameters.symbol_time(sf);

    // Effective preamble duration: (N_preamble + 4.25) * T_sym
    let preamble_time = (lora_parameters.preamble_symbols + 4.25) * symbol_time;

    // Standard LoRa payload symbol count (SX127x datasheet)
    // N_payload = 8 + max( ceil((8*PL - 4*SF + 28 + 16*CRC - 20*IH) / (4 * (SF - 2*DE))) * (CR + 4), 0 )
    // LoRaWAN uplinks always use the explicit header (IH = 0).
    let sf_value = sf.value() as f64;
    let pl = phy_payload_size as f64;
    let crc = if lora_parameters.crc_enabled { 1.0 } else { 0.0 };
    let de = if lora_parameters.low_data_rate(sf) { 1.0 } else { 0.0 };
    let cr = lora_parameters.coding_rate as f64;

    let denom = 4.0 * (sf_value - 2.0 * de);
    let numerator = 8.0 * pl - 4.0 * sf_value + 28.0 + 16.0 * crc;
    let base = (numerator / denom).ceil();
    let payload_symbols = 8.0 + (base * (cr + 4.0)).max(0.0);

    preamble_time + payload_symbols * symbol_time
}

/// Airtime of an uplink carrying `app_payload_size` application bytes.
pub fn uplink_air_time(lora_parameters: &LoraParameters, sf: SpreadingFactor, app_payload_size: usize) -> Duration {
    Duration::from_secs_f64(calculate_air_time(lora_parameters, sf, app_payload_size + LORAWAN_OVERHEAD_BYTES))
}

/// Gateway sensitivity (dBm) for `sf` from a [SF7..SF12] table.
pub fn gateway_sensitivity(table: &[f64; 6], sf: SpreadingFactor) -> f64 {
    table[sf.index()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::DEFAULT_GATEWAY_SENSITIVITY;

    #[test]
    fn sf7_uplink_matches_reference_airtime() {
        let lp = LoraParameters::default();
        // 20 byte payload + 13 byte overhead at SF7/125 kHz: 12.25 + 58 symbols of 1.024 ms
        let t = calculate_air_time(&lp, SpreadingFactor::SF7, 33);
        assert!((t - 0.071_936).abs() < 1e-6, "got {t}");
        let uplink = uplink_air_time(&lp, SpreadingFactor::SF7, 20);
        assert!((uplink.as_secs_f64() - t).abs() < 1e-9);
    }

    #[test]
    fn airtime_increases_with_payload_and_sf() {
        let lp = LoraParameters::default();
        let t_small = calculate_air_time(&lp, SpreadingFactor::SF7, 10);
        let t_big = calculate_air_time(&lp, SpreadingFactor::SF7, 100);
        assert!(t_big > t_small);

        let mut previous = 0.0;
        for sf in SpreadingFactor::ALL {
            let t = calculate_air_time(&lp, sf, 33);
            assert!(t > previous, "{sf} airtime {t} not above {previous}");
            previous = t;
        }
    }

    #[test]
    fn low_data_rate_enabled_for_long_symbols() {
        let lp = LoraParameters::default();
        assert!(!lp.low_data_rate(SpreadingFactor::SF10));
        assert!(lp.low_data_rate(SpreadingFactor::SF11));
        assert!(lp.low_data_rate(SpreadingFactor::SF12));
    }

    #[test]
    fn log_distance_loss_reference_and_slope() {
        assert_eq!(calculate_log_distance_loss(0.5, 2.3, 1.0, 42.0), 42.0);
        assert_eq!(calculate_log_distance_loss(1.0, 2.3, 1.0, 42.0), 42.0);
        let at_10 = calculate_log_distance_loss(10.0, 2.3, 1.0, 42.0);
        assert!((at_10 - 65.0).abs() < 1e-9);
    }

    #[test]
    fn sensitivity_table_lookup() {
        assert_eq!(gateway_sensitivity(&DEFAULT_GATEWAY_SENSITIVITY, SpreadingFactor::SF7), -130.0);
        assert_eq!(gateway_sensitivity(&DEFAULT_GATEWAY_SENSITIVITY, SpreadingFactor::SF12), -142.5);
    }
}
