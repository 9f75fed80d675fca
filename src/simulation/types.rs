//! Type definitions for the simulation.
//!
//! Contains all value records shared across the simulation:
//! - Positions and building descriptions
//! - Devices, gateways and their identifiers
//! - Transmissions and per-gateway packet outcomes
//!
//! Records are immutable once created and are looked up by integer id from
//! plain vectors (building table, device table, gateway table).

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Simulation time, measured from the start of the run.
pub type SimTime = Duration;

/// Index into the building table.
pub type BuildingId = usize;
/// Index into the device table.
pub type DeviceId = u32;
/// Index into the gateway table.
pub type GatewayId = u32;
/// Monotonic transmission identifier assigned by the runner.
pub type TransmissionId = u64;

/// Minimum power dominance (dB) for the capture effect. A reception survives
/// overlapping co-channel, co-SF traffic only if it is stronger than every
/// interferer by at least this margin.
pub const CAPTURE_THRESHOLD: f64 = 6.0;

/// Number of parallel demodulation paths of a typical 8-channel gateway.
pub const DEFAULT_RECEIVE_PATHS: usize = 8;

/// Gateway sensitivity (dBm) for SF7..SF12, indexed as [SF-7].
pub const DEFAULT_GATEWAY_SENSITIVITY: [f64; 6] = [-130.0, -132.5, -135.0, -137.5, -140.0, -142.5];

/// Simple 3D point in meters.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)).sqrt()
    }
}

impl From<[f64; 3]> for Point {
    fn from(v: [f64; 3]) -> Self {
        Point::new(v[0], v[1], v[2])
    }
}

/// External wall construction of a building.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WallMaterial {
    Wood,
    ConcreteWithWindows,
    ConcreteWithoutWindows,
    Brick,
}

impl WallMaterial {
    /// Loss (dB) added every time a link passes through an external wall.
    pub fn external_wall_loss_db(self) -> f64 {
        match self {
            WallMaterial::Wood => 4.0,
            WallMaterial::ConcreteWithWindows => 7.0,
            WallMaterial::ConcreteWithoutWindows => 15.0,
            WallMaterial::Brick => 12.0,
        }
    }
}

/// What a building is used for; selects the floor attenuation factor.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildingUse {
    Residential,
    Office,
    Commercial,
}

impl BuildingUse {
    /// Floor penetration loss factor (dB) for `floors` crossed slabs.
    ///
    /// ```text
    /// residential: 4n
    /// office:      15 + 4(n-1)
    /// commercial:  6 + 3(n-1)
    /// ```
    pub fn floor_penetration_loss_db(self, floors: u32) -> f64 {
        if floors == 0 {
            return 0.0;
        }
        let n = floors as f64;
        match self {
            BuildingUse::Residential => 4.0 * n,
            BuildingUse::Office => 15.0 + 4.0 * (n - 1.0),
            BuildingUse::Commercial => 6.0 + 3.0 * (n - 1.0),
        }
    }
}

/// Axis-aligned building with a room grid and a number of floors.
///
/// Created by the building allocator and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Building {
    pub id: BuildingId,
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
    pub height: f64,
    pub rooms_x: u32,
    pub rooms_y: u32,
    pub floors: u32,
    pub wall_material: WallMaterial,
    pub building_use: BuildingUse,
}

/// LoRa spreading factor. Fixed per device for a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpreadingFactor {
    SF7,
    SF8,
    SF9,
    SF10,
    SF11,
    SF12,
}

impl SpreadingFactor {
    pub const ALL: [SpreadingFactor; 6] = [
        SpreadingFactor::SF7,
        SpreadingFactor::SF8,
        SpreadingFactor::SF9,
        SpreadingFactor::SF10,
        SpreadingFactor::SF11,
        SpreadingFactor::SF12,
    ];

    /// EU868 data rate mapping: DR5 = SF7 ... DR0 = SF12.
    pub fn from_data_rate(data_rate: u8) -> Option<Self> {
        match data_rate {
            0..=5 => Some(Self::ALL[(5 - data_rate) as usize]),
            _ => None,
        }
    }

    /// Numeric spreading factor, 7..=12.
    pub fn value(self) -> u8 {
        self.index() as u8 + 7
    }

    /// Position in per-SF tables such as sensitivities.
    pub fn index(self) -> usize {
        match self {
            SpreadingFactor::SF7 => 0,
            SpreadingFactor::SF8 => 1,
            SpreadingFactor::SF9 => 2,
            SpreadingFactor::SF10 => 3,
            SpreadingFactor::SF11 => 4,
            SpreadingFactor::SF12 => 5,
        }
    }
}

impl fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SF{}", self.value())
    }
}

/// LoRaWAN device address: 7-bit network id followed by a 25-bit network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevAddr(pub u32);

impl DevAddr {
    pub fn new(nwk_id: u8, nwk_addr: u32) -> Self {
        DevAddr(((nwk_id as u32 & 0x7F) << 25) | (nwk_addr & 0x01FF_FFFF))
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Static end device.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub position: Point,
    pub spreading_factor: SpreadingFactor,
    pub address: DevAddr,
}

/// Static gateway. `receive_paths` bounds how many receptions it can
/// demodulate at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct Gateway {
    pub id: GatewayId,
    pub position: Point,
    pub receive_paths: usize,
}

/// One uplink frame on the air.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub id: TransmissionId,
    pub device_id: DeviceId,
    pub start: SimTime,
    /// Time on air. Zero is invalid and rejected by the classifier.
    pub duration: Duration,
    pub spreading_factor: SpreadingFactor,
    /// Index into the configured carrier list.
    pub channel: usize,
    /// Received power (dBm) at each gateway, indexed by gateway id.
    pub rx_power_dbm: Vec<f64>,
}

impl Transmission {
    /// End of the frame; the transmission occupies `[start, end)`.
    pub fn end(&self) -> SimTime {
        self.start + self.duration
    }
}

/// Final result of one transmission at one gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PacketOutcome {
    Received,
    Interfered,
    NoMoreReceivers,
    UnderSensitivity,
    LostBecauseTx,
}

impl PacketOutcome {
    pub const ALL: [PacketOutcome; 5] = [
        PacketOutcome::Received,
        PacketOutcome::Interfered,
        PacketOutcome::NoMoreReceivers,
        PacketOutcome::UnderSensitivity,
        PacketOutcome::LostBecauseTx,
    ];

    pub fn label(self) -> &'static str {
        match self {
            PacketOutcome::Received => "received",
            PacketOutcome::Interfered => "interfered",
            PacketOutcome::NoMoreReceivers => "no more receivers",
            PacketOutcome::UnderSensitivity => "under sensitivity",
            PacketOutcome::LostBecauseTx => "lost because TX",
        }
    }
}

impl fmt::Display for PacketOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_rate_maps_to_spreading_factor() {
        assert_eq!(SpreadingFactor::from_data_rate(5), Some(SpreadingFactor::SF7));
        assert_eq!(SpreadingFactor::from_data_rate(0), Some(SpreadingFactor::SF12));
        assert_eq!(SpreadingFactor::from_data_rate(6), None);
        assert_eq!(SpreadingFactor::from_data_rate(3).map(|sf| sf.value()), Some(9));
    }

    #[test]
    fn dev_addr_packs_network_id_and_address() {
        let addr = DevAddr::new(54, 1864);
        assert_eq!(addr.0, (54 << 25) | 1864);
        assert_eq!(addr.to_string(), "6c000748");
        // Network address is truncated to 25 bits
        assert_eq!(DevAddr::new(54, 0x0200_0000 | 1864), addr);
    }

    #[test]
    fn floor_loss_depends_on_use() {
        assert_eq!(BuildingUse::Office.floor_penetration_loss_db(0), 0.0);
        assert_eq!(BuildingUse::Residential.floor_penetration_loss_db(2), 8.0);
        assert_eq!(BuildingUse::Office.floor_penetration_loss_db(2), 19.0);
        assert_eq!(BuildingUse::Commercial.floor_penetration_loss_db(3), 12.0);
    }
}
