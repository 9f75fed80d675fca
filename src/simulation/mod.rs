//! Indoor LoRaWAN deployment simulation core.
//!
//! Places end devices room by room inside a grid of multi-floor buildings,
//! lets them send periodic uplinks toward one or more gateways, and classifies
//! every (transmission, gateway) pair into exactly one outcome.
//!
//! ## Module Organization
//!
//! - `types`: Core value records (buildings, devices, gateways, transmissions)
//! - `error`: Error taxonomy of the core
//! - `buildings`: Grid building allocator
//! - `layout`: Device/gateway placement and plotting listings
//! - `geometry`: Link vs. building intersection logic
//! - `signal_calculations`: Path loss, airtime and sensitivity helpers
//! - `propagation`: Ordered propagation stage pipeline
//! - `classifier`: Per-gateway outcome classification
//! - `metrics`: Packet accounting and windowed queries
//! - `context`, `scheduler`, `traffic`: Clock/RNG, event queue, periodic senders
//! - `network`: Scenario builder and event loop
//!
//! ## Public API
//!
//! The main entry point is `network::run_scenario`, which builds the world from
//! a `ScenarioConfig` and returns the filled packet tracker.

pub mod buildings;
pub mod classifier;
pub mod context;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod metrics;
pub mod network;
pub mod propagation;
pub mod scheduler;
pub mod signal_calculations;
pub mod traffic;
pub mod types;

// Re-export the runner for convenience
pub use network::{SimulationResult, run_scenario};

// Re-export commonly used types
pub use error::SimulationError;
pub use types::{PacketOutcome, Point, SpreadingFactor};
