//! Spatial layout of end devices and gateways.
//!
//! Devices fill rooms row-major and wrap onto the next floor once every room
//! of the current floor holds one device. Gateways sit at fixed coordinates.
//! The plain-text listings written here are only meant for offline plotting.

use serde::Deserialize;
use std::io::{self, Write};

use super::error::{Result, SimulationError};
use super::types::{Building, DevAddr, Device, Gateway, GatewayId, Point, SpreadingFactor};

/// Network id used when generating device addresses.
pub const DEFAULT_NWK_ID: u8 = 54;
/// First network address handed out to devices.
pub const DEFAULT_FIRST_NWK_ADDR: u32 = 1864;

/// Room grid used to place devices.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LayoutParameters {
    pub rooms_x: u32,
    pub rooms_y: u32,
    /// Room pitch in meters; devices sit in the room center.
    pub room_spacing: f64,
    pub floor_height: f64,
    /// Height of a device above its floor.
    pub floor_base: f64,
}

impl Default for LayoutParameters {
    fn default() -> Self {
        Self {
            rooms_x: 10,
            rooms_y: 10,
            room_spacing: 10.0,
            floor_height: 3.0,
            floor_base: 1.2,
        }
    }
}

impl LayoutParameters {
    /// Devices that fit on one floor. Saturates for grids rejected by validation.
    pub fn rooms_per_floor(&self) -> u32 {
        self.rooms_x.saturating_mul(self.rooms_y)
    }

    /// Floors needed to host `n` devices.
    pub fn floors_for(&self, n: u32) -> u32 {
        n.div_ceil(self.rooms_per_floor())
    }

    fn validate(&self) -> Result<()> {
        if self.rooms_x == 0 || self.rooms_y == 0 {
            return Err(SimulationError::invalid_configuration(format!(
                "room grid must be positive, got {}x{}",
                self.rooms_x, self.rooms_y
            )));
        }
        if self.rooms_x.checked_mul(self.rooms_y).is_none() {
            return Err(SimulationError::invalid_configuration(format!(
                "room grid {}x{} has too many rooms per floor",
                self.rooms_x, self.rooms_y
            )));
        }
        if !(self.room_spacing > 0.0) || !(self.floor_height > 0.0) || !self.floor_base.is_finite() {
            return Err(SimulationError::invalid_configuration(format!(
                "room spacing ({}) and floor height ({}) must be positive",
                self.room_spacing, self.floor_height
            )));
        }
        Ok(())
    }
}

/// Place `n` devices deterministically.
///
/// Device `i` goes to room `(i mod rooms_x, (i / rooms_x) mod rooms_y)` on
/// floor `i / (rooms_x * rooms_y)`, at the center of the room and
/// `floor_base` meters above the floor.
pub fn place_devices(n: u32, params: &LayoutParameters, spreading_factor: SpreadingFactor) -> Result<Vec<Device>> {
    params.validate()?;

    let devices = (0..n)
        .map(|i| {
            let room_x = i % params.rooms_x;
            let room_y = (i / params.rooms_x) % params.rooms_y;
            let floor = i / params.rooms_per_floor();
            Device {
                id: i,
                position: Point::new(
                    params.room_spacing * room_x as f64 + params.room_spacing / 2.0,
                    params.room_spacing * room_y as f64 + params.room_spacing / 2.0,
                    params.floor_height * floor as f64 + params.floor_base,
                ),
                spreading_factor,
                address: DevAddr::new(DEFAULT_NWK_ID, DEFAULT_FIRST_NWK_ADDR + i),
            }
        })
        .collect();

    Ok(devices)
}

/// Create one gateway per position, in order.
pub fn place_gateways(positions: &[Point], receive_paths: usize) -> Result<Vec<Gateway>> {
    if receive_paths == 0 {
        return Err(SimulationError::invalid_configuration("gateway receive paths must be positive"));
    }
    Ok(positions
        .iter()
        .enumerate()
        .map(|(i, position)| Gateway {
            id: i as GatewayId,
            position: *position,
            receive_paths,
        })
        .collect())
}

/// One line per device: `index is: <i>, Xpos: <x>, Ypos: <y>, Zpos: <z>`.
pub fn write_device_listing<W: Write>(out: &mut W, devices: &[Device]) -> io::Result<()> {
    for (index, device) in devices.iter().enumerate() {
        write_position_line(out, index, &device.position)?;
    }
    Ok(())
}

/// Same format as the device listing.
pub fn write_gateway_listing<W: Write>(out: &mut W, gateways: &[Gateway]) -> io::Result<()> {
    for (index, gateway) in gateways.iter().enumerate() {
        write_position_line(out, index, &gateway.position)?;
    }
    Ok(())
}

/// Gnuplot rectangles: `set object <j> rect from <xmin>,<ymin> to <xmax>,<ymax>`.
pub fn write_building_listing<W: Write>(out: &mut W, buildings: &[Building]) -> io::Result<()> {
    for (j, building) in buildings.iter().enumerate() {
        writeln!(
            out,
            "set object {} rect from {},{} to {},{}",
            j + 1,
            building.x_min,
            building.y_min,
            building.x_max,
            building.y_max
        )?;
    }
    Ok(())
}

fn write_position_line<W: Write>(out: &mut W, index: usize, p: &Point) -> io::Result<()> {
    writeln!(out, "index is: {}, Xpos: {}, Ypos: {}, Zpos: {}", index, p.x, p.y, p.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(p: &Point) -> (u64, u64, u64) {
        (p.x.to_bits(), p.y.to_bits(), p.z.to_bits())
    }

    #[test]
    fn placement_is_deterministic() {
        let params = LayoutParameters::default();
        let a = place_devices(700, &params, SpreadingFactor::SF7).unwrap();
        let b = place_devices(700, &params, SpreadingFactor::SF7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn fills_rooms_row_major_then_floors() {
        let devices = place_devices(205, &LayoutParameters::default(), SpreadingFactor::SF7).unwrap();
        assert_eq!(devices[0].position, Point::new(5.0, 5.0, 1.2));
        assert_eq!(devices[9].position, Point::new(95.0, 5.0, 1.2));
        assert_eq!(devices[10].position, Point::new(5.0, 15.0, 1.2));
        assert_eq!(devices[99].position, Point::new(95.0, 95.0, 1.2));
        assert_eq!(devices[100].position, Point::new(5.0, 5.0, 3.0 + 1.2));
        assert_eq!(devices[204].position.z, 6.0 + 1.2);
    }

    #[test]
    fn floors_stay_in_range_and_positions_are_unique() {
        let params = LayoutParameters::default();
        let n = 731;
        let devices = place_devices(n, &params, SpreadingFactor::SF7).unwrap();
        let floors = params.floors_for(n);
        assert_eq!(floors, 8);
        let mut seen = HashSet::new();
        for device in &devices {
            let floor = ((device.position.z - params.floor_base) / params.floor_height).round() as u32;
            assert!(floor < floors);
            assert!(seen.insert(key(&device.position)), "duplicate position {:?}", device.position);
        }
    }

    #[test]
    fn addresses_are_consecutive() {
        let devices = place_devices(3, &LayoutParameters::default(), SpreadingFactor::SF9).unwrap();
        assert_eq!(devices[2].address, DevAddr::new(DEFAULT_NWK_ID, DEFAULT_FIRST_NWK_ADDR + 2));
        assert_eq!(devices[2].spreading_factor, SpreadingFactor::SF9);
    }

    #[test]
    fn rejects_degenerate_grid() {
        let params = LayoutParameters {
            rooms_x: 0,
            ..Default::default()
        };
        assert!(place_devices(10, &params, SpreadingFactor::SF7).is_err());
        assert!(place_gateways(&[Point::new(0.0, 0.0, 0.0)], 0).is_err());
    }

    #[test]
    fn rejects_room_grid_that_overflows() {
        let params = LayoutParameters {
            rooms_x: u32::MAX,
            rooms_y: 2,
            ..Default::default()
        };
        assert!(matches!(
            place_devices(10, &params, SpreadingFactor::SF7),
            Err(SimulationError::InvalidConfiguration(_))
        ));
        assert_eq!(params.rooms_per_floor(), u32::MAX);
    }

    #[test]
    fn listings_use_plotting_format() {
        let devices = place_devices(2, &LayoutParameters::default(), SpreadingFactor::SF7).unwrap();
        let gateways = place_gateways(&[Point::new(50.0, 50.0, 23.0)], 8).unwrap();
        let mut out = Vec::new();
        write_device_listing(&mut out, &devices).unwrap();
        write_gateway_listing(&mut out, &gateways).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "index is: 0, Xpos: 5, Ypos: 5, Zpos: 1.2");
        assert_eq!(lines[1], "index is: 1, Xpos: 15, Ypos: 5, Zpos: 1.2");
        assert_eq!(lines[2], "index is: 0, Xpos: 50, Ypos: 50, Zpos: 23");
    }
}
