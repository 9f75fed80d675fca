//! Discrete-event simulator for dense indoor LoRaWAN deployments.

pub mod common;
pub mod simulation;
