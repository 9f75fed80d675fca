//! Error taxonomy of the simulation core.

use std::time::Duration;

use super::types::{DeviceId, GatewayId, TransmissionId};

/// Errors raised by layout generation, classification and metrics.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Non-positive counts or dimensions. Fatal before the run starts.
    InvalidConfiguration(String),
    /// A transmission the classifier refuses to evaluate. Dropped and counted.
    InvalidTransmission {
        transmission_id: TransmissionId,
        device_id: DeviceId,
        time: Duration,
        reason: String,
    },
    /// A second outcome for a (transmission, gateway) pair.
    OutcomeAlreadyRecorded {
        transmission_id: TransmissionId,
        gateway_id: GatewayId,
    },
    /// An outcome reported for a transmission that was never sent.
    UnknownTransmission(TransmissionId),
    /// An outcome reported at a gateway the tracker does not know.
    UnknownGateway {
        transmission_id: TransmissionId,
        gateway_id: GatewayId,
    },
}

impl SimulationError {
    pub(crate) fn invalid_configuration(msg: impl Into<String>) -> Self {
        SimulationError::InvalidConfiguration(msg.into())
    }
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::InvalidConfiguration(msg) => write!(f, "Invalid configuration: {}", msg),
            SimulationError::InvalidTransmission {
                transmission_id,
                device_id,
                time,
                reason,
            } => write!(
                f,
                "Invalid transmission {} from device {} at {:.6}s: {}",
                transmission_id,
                device_id,
                time.as_secs_f64(),
                reason
            ),
            SimulationError::OutcomeAlreadyRecorded { transmission_id, gateway_id } => write!(
                f,
                "Outcome already recorded for transmission {} at gateway {}",
                transmission_id, gateway_id
            ),
            SimulationError::UnknownTransmission(id) => write!(f, "Unknown transmission {}", id),
            SimulationError::UnknownGateway {
                transmission_id,
                gateway_id,
            } => write!(
                f,
                "Unknown gateway {} for transmission {}",
                gateway_id, transmission_id
            ),
        }
    }
}

impl std::error::Error for SimulationError {}

pub type Result<T> = std::result::Result<T, SimulationError>;
