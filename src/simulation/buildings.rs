//! Building/floor allocator.
//!
//! Tiles identical buildings on a regular grid, row-major, starting at
//! `(min_x, min_y)`. No randomness is involved so identical parameters always
//! yield identical buildings.

use serde::Deserialize;

use super::error::{Result, SimulationError};
use super::types::{Building, BuildingUse, Point, WallMaterial};

/// Parameters of a building grid.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GridBuildingParameters {
    /// Buildings per row.
    pub grid_width: i64,
    pub length_x: f64,
    pub length_y: f64,
    /// Gap between neighbouring buildings along x.
    pub delta_x: f64,
    /// Gap between neighbouring buildings along y.
    pub delta_y: f64,
    pub height: f64,
    pub rooms_x: i64,
    pub rooms_y: i64,
    pub floors: i64,
    pub wall_material: WallMaterial,
    pub building_use: BuildingUse,
    pub min_x: f64,
    pub min_y: f64,
    /// Number of buildings to create.
    pub count: i64,
}

impl Default for GridBuildingParameters {
    fn default() -> Self {
        Self {
            grid_width: 3,
            length_x: 100.0,
            length_y: 100.0,
            delta_x: 7.5,
            delta_y: 7.5,
            height: 21.0,
            rooms_x: 10,
            rooms_y: 10,
            floors: 7,
            wall_material: WallMaterial::ConcreteWithWindows,
            building_use: BuildingUse::Commercial,
            min_x: 0.0,
            min_y: 0.0,
            count: 2,
        }
    }
}

/// Generate `params.count` buildings on the grid.
///
/// Building `i` is placed in column `i % grid_width` and row `i / grid_width`,
/// with a pitch of `(length_x + delta_x, length_y + delta_y)`.
pub fn generate(params: &GridBuildingParameters) -> Result<Vec<Building>> {
    validate(params)?;

    let pitch_x = params.length_x + params.delta_x;
    let pitch_y = params.length_y + params.delta_y;
    let grid_width = params.grid_width as usize;

    let buildings: Vec<Building> = (0..params.count as usize)
        .map(|i| {
            let column = (i % grid_width) as f64;
            let row = (i / grid_width) as f64;
            let x_min = params.min_x + column * pitch_x;
            let y_min = params.min_y + row * pitch_y;
            Building {
                id: i,
                x_min,
                y_min,
                x_max: x_min + params.length_x,
                y_max: y_min + params.length_y,
                height: params.height,
                rooms_x: params.rooms_x as u32,
                rooms_y: params.rooms_y as u32,
                floors: params.floors as u32,
                wall_material: params.wall_material,
                building_use: params.building_use,
            }
        })
        .collect();

    log::debug!("Allocated {} buildings on a grid {} wide", buildings.len(), grid_width);
    Ok(buildings)
}

fn validate(params: &GridBuildingParameters) -> Result<()> {
    if params.count < 0 {
        return Err(SimulationError::invalid_configuration(format!(
            "building count must not be negative, got {}",
            params.count
        )));
    }
    if params.grid_width <= 0 {
        return Err(SimulationError::invalid_configuration(format!(
            "building grid width must be positive, got {}",
            params.grid_width
        )));
    }
    for (name, value) in [("length_x", params.length_x), ("length_y", params.length_y), ("height", params.height)] {
        if !(value > 0.0) || !value.is_finite() {
            return Err(SimulationError::invalid_configuration(format!(
                "building {} must be positive, got {}",
                name, value
            )));
        }
    }
    for (name, value) in [("delta_x", params.delta_x), ("delta_y", params.delta_y)] {
        if !(value >= 0.0) || !value.is_finite() {
            return Err(SimulationError::invalid_configuration(format!(
                "building {} must not be negative, got {}",
                name, value
            )));
        }
    }
    for (name, value) in [("rooms_x", params.rooms_x), ("rooms_y", params.rooms_y), ("floors", params.floors)] {
        if value <= 0 {
            return Err(SimulationError::invalid_configuration(format!(
                "building {} must be positive, got {}",
                name, value
            )));
        }
    }
    Ok(())
}

impl Building {
    /// Height of one storey; floors are evenly stacked from z = 0.
    pub fn floor_height(&self) -> f64 {
        self.height / self.floors as f64
    }

    /// Inclusive point-in-box test.
    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.x_min && p.x <= self.x_max && p.y >= self.y_min && p.y <= self.y_max && p.z >= 0.0 && p.z <= self.height
    }

    /// `(room_x, room_y, floor)` of a point inside the building.
    pub fn room_of(&self, p: &Point) -> Option<(u32, u32, u32)> {
        if !self.contains(p) {
            return None;
        }
        let room_w = (self.x_max - self.x_min) / self.rooms_x as f64;
        let room_d = (self.y_max - self.y_min) / self.rooms_y as f64;
        let rx = (((p.x - self.x_min) / room_w) as u32).min(self.rooms_x - 1);
        let ry = (((p.y - self.y_min) / room_d) as u32).min(self.rooms_y - 1);
        let floor = ((p.z / self.floor_height()) as u32).min(self.floors - 1);
        Some((rx, ry, floor))
    }
}
