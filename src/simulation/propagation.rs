//! Composite propagation model.
//!
//! The total path loss between two positions is the sum of an ordered list of
//! stages, each a pure function of (tx position, rx position, buildings):
//!
//! 1. `LogDistance` - deterministic distance attenuation
//! 2. `CorrelatedShadowing` - spatially correlated Gaussian shadowing
//! 3. `BuildingPenetration` - external wall loss for every envelope crossing
//! 4. `FloorPenetration` - optional loss for floor slabs crossed indoors
//!
//! Stages 2-4 are independently optional. With `realistic_channel_model`
//! disabled the model degrades to the distance-only loss.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::geometry::{boundary_crossings, floor_slabs_crossed};
use super::signal_calculations::calculate_log_distance_loss;
use super::types::{Building, Point};

/// Parameters defining the radio channel propagation model.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PathLossParameters {
    /// Path loss exponent (n).
    ///
    /// - n = 2.0: Free space
    /// - n = 2.3: Default for this indoor/outdoor mix
    /// - n = 3.0 to 4.0: Dense indoor environments
    pub path_loss_exponent: f64,

    /// Reference distance d₀ in meters.
    pub reference_distance_m: f64,

    /// Path loss at the reference distance in dB.
    pub reference_loss_db: f64,

    /// Enables shadowing and building penetration. When false only the
    /// log-distance stage is used.
    pub realistic_channel_model: bool,

    /// Standard deviation of the shadowing term (σ) in dB. 0 disables it.
    pub shadowing_sigma_db: f64,

    /// Side of a shadowing cell in meters. Receivers much closer than this see
    /// strongly correlated shadowing.
    pub shadowing_correlation_distance_m: f64,

    /// External wall loss for links entering or leaving buildings.
    pub building_penetration: bool,

    /// Additional loss for floor slabs crossed inside buildings.
    pub floor_penetration: bool,
}

impl Default for PathLossParameters {
    fn default() -> Self {
        Self {
            path_loss_exponent: 2.3,
            reference_distance_m: 1.0,
            reference_loss_db: 42.0,
            realistic_channel_model: true,
            shadowing_sigma_db: 8.0,
            shadowing_correlation_distance_m: 110.0,
            building_penetration: true,
            floor_penetration: false,
        }
    }
}

/// Spatially correlated shadowing.
///
/// The plane is split into square cells whose side is the correlation
/// distance. A transmitter located in cell `c` sees a lattice of N(0, σ)
/// samples at the cell corners; the shadowing toward a receiver is the
/// bilinear interpolation of the four samples around the receiver, normalized
/// so the variance stays σ² everywhere. Samples are derived from
/// `(seed, tx cell, lattice point)` so queries are order independent.
#[derive(Debug, Clone)]
pub struct CorrelatedShadowing {
    sigma: f64,
    correlation_distance: f64,
    seed: u64,
}

impl CorrelatedShadowing {
    pub fn new(sigma: f64, correlation_distance: f64, seed: u64) -> Self {
        Self {
            sigma,
            correlation_distance,
            seed,
        }
    }

    /// Shadowing (dB) on the link from `tx` to `rx`. Zero when σ or the
    /// correlation distance is not positive.
    pub fn loss_db(&self, tx: &Point, rx: &Point) -> f64 {
        if !(self.sigma > 0.0) || !(self.correlation_distance > 0.0) {
            return 0.0;
        }
        let cell = (self.lattice_index(tx.x), self.lattice_index(tx.y));

        let gx = rx.x / self.correlation_distance;
        let gy = rx.y / self.correlation_distance;
        let (ix, iy) = (gx.floor() as i64, gy.floor() as i64);
        let (fx, fy) = (gx - ix as f64, gy - iy as f64);

        let corners = [
            ((1.0 - fx) * (1.0 - fy), (ix, iy)),
            (fx * (1.0 - fy), (ix + 1, iy)),
            ((1.0 - fx) * fy, (ix, iy + 1)),
            (fx * fy, (ix + 1, iy + 1)),
        ];
        let mut value = 0.0;
        let mut weight_energy = 0.0;
        for (weight, point) in corners {
            value += weight * self.lattice_sample(cell, point);
            weight_energy += weight * weight;
        }
        value / weight_energy.sqrt()
    }

    fn lattice_index(&self, coordinate: f64) -> i64 {
        (coordinate / self.correlation_distance).floor() as i64
    }

    fn lattice_sample(&self, cell: (i64, i64), point: (i64, i64)) -> f64 {
        let mut state = self.seed;
        for word in [cell.0, cell.1, point.0, point.1] {
            state = splitmix64(state ^ word as u64);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(state);
        match Normal::new(0.0, self.sigma) {
            Ok(normal) => normal.sample(&mut rng),
            Err(_) => 0.0,
        }
    }
}

fn splitmix64(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// One stage of the propagation pipeline.
#[derive(Debug, Clone)]
pub enum PropagationStage {
    LogDistance {
        exponent: f64,
        reference_distance: f64,
        reference_loss: f64,
    },
    CorrelatedShadowing(CorrelatedShadowing),
    BuildingPenetration,
    FloorPenetration,
}

impl PropagationStage {
    pub fn loss_db(&self, tx: &Point, rx: &Point, buildings: &[Building]) -> f64 {
        match self {
            PropagationStage::LogDistance {
                exponent,
                reference_distance,
                reference_loss,
            } => calculate_log_distance_loss(tx.distance(rx), *exponent, *reference_distance, *reference_loss),
            PropagationStage::CorrelatedShadowing(shadowing) => shadowing.loss_db(tx, rx),
            PropagationStage::BuildingPenetration => buildings
                .iter()
                .map(|b| boundary_crossings(tx, rx, b) as f64 * b.wall_material.external_wall_loss_db())
                .sum(),
            PropagationStage::FloorPenetration => buildings
                .iter()
                .map(|b| b.building_use.floor_penetration_loss_db(floor_slabs_crossed(tx, rx, b)))
                .sum(),
        }
    }
}

/// Ordered composition of propagation stages.
#[derive(Debug, Clone)]
pub struct PropagationModel {
    stages: Vec<PropagationStage>,
}

impl PropagationModel {
    /// Build the stage list from configuration. `seed` feeds the shadowing lattice.
    pub fn from_config(params: &PathLossParameters, seed: u64) -> Self {
        let mut stages = vec![PropagationStage::LogDistance {
            exponent: params.path_loss_exponent,
            reference_distance: params.reference_distance_m,
            reference_loss: params.reference_loss_db,
        }];
        if params.realistic_channel_model {
            if params.shadowing_sigma_db > 0.0 {
                stages.push(PropagationStage::CorrelatedShadowing(CorrelatedShadowing::new(
                    params.shadowing_sigma_db,
                    params.shadowing_correlation_distance_m,
                    seed,
                )));
            }
            if params.building_penetration {
                stages.push(PropagationStage::BuildingPenetration);
            }
            if params.floor_penetration {
                stages.push(PropagationStage::FloorPenetration);
            }
        }
        Self::with_stages(stages)
    }

    /// Model applying `stages` in order; their losses add up.
    pub fn with_stages(stages: Vec<PropagationStage>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[PropagationStage] {
        &self.stages
    }

    /// Total path loss in dB between `tx` and `rx`.
    pub fn path_loss(&self, tx: &Point, rx: &Point, buildings: &[Building]) -> f64 {
        self.stages.iter().map(|stage| stage.loss_db(tx, rx, buildings)).sum()
    }

    /// Received power in dBm. May be far below any sensitivity; that is a
    /// valid result, not an error.
    pub fn received_power(&self, tx_power_dbm: f64, tx: &Point, rx: &Point, buildings: &[Building]) -> f64 {
        tx_power_dbm - self.path_loss(tx, rx, buildings)
    }
}
