//! Scenario runner.
//!
//! Builds the static world (buildings, devices, gateways, link budgets) from a
//! `ScenarioConfig` and drives the discrete-event loop:
//!
//! - `Uplink` events create a transmission, hand it to the classifier and
//!   schedule the device's next uplink until the stop time is reached
//! - `ReceptionEnd` events only advance the clock so that receptions ending
//!   at that instant get committed
//!
//! After the stop time no new uplinks are created, but every reception still
//! on the air is drained so each (transmission, gateway) pair ends up with
//! exactly one outcome.

use log::{debug, info, warn};
use std::time::Duration;

use crate::common::config::ScenarioConfig;

use super::buildings;
use super::classifier::{FinalizedOutcome, PacketClassifier};
use super::context::SimContext;
use super::error::{Result, SimulationError};
use super::layout::{place_devices, place_gateways};
use super::metrics::{GatewayBreakdown, GlobalCount, PacketTracker};
use super::propagation::PropagationModel;
use super::scheduler::EventQueue;
use super::signal_calculations::{calculate_air_time, uplink_air_time};
use super::traffic::PeriodicSender;
use super::types::{
    Building, Device, DeviceId, Gateway, PacketOutcome, Point, SimTime, SpreadingFactor, Transmission,
    TransmissionId,
};

/// Delay between the end of a confirmed uplink and the ACK in the first receive window.
pub const RX1_DELAY: Duration = Duration::from_secs(1);

/// PHY payload of an empty ACK downlink: MHDR, FHDR and MIC without FPort.
const ACK_PHY_PAYLOAD_BYTES: usize = 12;

/// Payload of the event queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimEvent {
    /// The device sends its next uplink now.
    Uplink { device_id: DeviceId },
    /// A reception ends; only wakes the loop so outcomes get committed.
    ReceptionEnd,
}

/// Static world of a run. Nothing here changes once the event loop starts.
#[derive(Debug)]
pub struct Scenario {
    /// Building table, indexed by building id.
    pub buildings: Vec<Building>,
    /// Device table, indexed by device id.
    pub devices: Vec<Device>,
    /// Gateway table, indexed by gateway id.
    pub gateways: Vec<Gateway>,
    /// Loss chain used to fill the link budget.
    pub propagation: PropagationModel,
    /// Received power (dBm) indexed by `[device][gateway]`.
    link_budget: Vec<Vec<f64>>,
}

impl Scenario {
    /// Received power (dBm) of `device_id` at every gateway, indexed by gateway id.
    pub fn rx_power_dbm(&self, device_id: DeviceId) -> Option<&[f64]> {
        self.link_budget.get(device_id as usize).map(Vec::as_slice)
    }

    /// Devices whose position lies in a room of some building.
    pub fn indoor_devices(&self) -> usize {
        self.devices
            .iter()
            .filter(|device| self.buildings.iter().any(|b| b.room_of(&device.position).is_some()))
            .count()
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct SimulationResult {
    /// Sent transmissions and the outcome of every (transmission, gateway) pair.
    pub tracker: PacketTracker,
    /// End of the uplink window; no uplink starts at or after it.
    pub stop_time: SimTime,
    /// Devices expected to send, used to flag undercounted windows.
    pub n_devices: usize,
    /// ACK downlinks scheduled for confirmed traffic.
    pub acks_sent: u64,
}

impl SimulationResult {
    /// Network-level sent/received over the whole run.
    pub fn global_count(&self) -> GlobalCount {
        self.tracker.count_globally(SimTime::ZERO, self.stop_time)
    }

    /// Per-gateway breakdown over the whole run.
    pub fn gateway_breakdown(&self) -> GatewayBreakdown {
        self.tracker
            .per_gateway_breakdown(SimTime::ZERO, self.stop_time, self.n_devices)
    }
}

/// Create buildings, devices and gateways and precompute the link budgets.
///
/// Layout is fully deterministic. The seed only enters through the shadowing
/// stage of the propagation model, so the same config always yields the same
/// link budget table.
pub fn build_scenario(config: &ScenarioConfig) -> Result<Scenario> {
    let network = &config.network;
    let spreading_factor = SpreadingFactor::from_data_rate(network.data_rate).ok_or_else(|| {
        SimulationError::invalid_configuration(format!("data rate {} outside DR0..DR5", network.data_rate))
    })?;
    if network.gateway_positions.is_empty() && network.gateway_count > 0 {
        return Err(SimulationError::invalid_configuration("no gateway positions configured"));
    }

    let buildings = buildings::generate(&config.buildings)?;
    let devices = place_devices(network.device_count, &config.layout, spreading_factor)?;
    // Positions are reused round-robin when there are more gateways than positions.
    let positions: Vec<Point> = (0..network.gateway_count as usize)
        .map(|i| Point::from(network.gateway_positions[i % network.gateway_positions.len()]))
        .collect();
    let gateways = place_gateways(&positions, config.gateway.receive_paths)?;
    let propagation = PropagationModel::from_config(&config.propagation, network.seed);

    let link_budget: Vec<Vec<f64>> = devices
        .iter()
        .map(|device| {
            gateways
                .iter()
                .map(|gateway| {
                    propagation.received_power(network.tx_power_dbm, &device.position, &gateway.position, &buildings)
                })
                .collect()
        })
        .collect();

    info!(
        "Scenario: {} buildings, {} devices on {} floors, {} gateways, {}",
        buildings.len(),
        devices.len(),
        config.layout.floors_for(network.device_count),
        gateways.len(),
        spreading_factor
    );
    for gateway in &gateways {
        let powers: Vec<f64> = link_budget.iter().map(|row| row[gateway.id as usize]).collect();
        let strongest = powers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let weakest = powers.iter().copied().fold(f64::INFINITY, f64::min);
        debug!(
            "Gateway {} at ({}, {}, {}): rx power {:.1} .. {:.1} dBm",
            gateway.id, gateway.position.x, gateway.position.y, gateway.position.z, weakest, strongest
        );
    }

    let scenario = Scenario {
        buildings,
        devices,
        gateways,
        propagation,
        link_budget,
    };
    let indoor = scenario.indoor_devices();
    if indoor < scenario.devices.len() {
        warn!(
            "{} of {} devices are placed outside every building",
            scenario.devices.len() - indoor,
            scenario.devices.len()
        );
    }
    if let (Some(first), Some(last)) = (scenario.devices.first(), scenario.devices.last()) {
        debug!("Device addresses {} .. {}", first.address, last.address);
    }
    Ok(scenario)
}

/// Run the event loop until every scheduled event is consumed.
///
/// Every device sends its first uplink at a random offset within one period
/// and then strictly periodically until `simulation_duration_s`. Before each
/// event the classifier commits every reception that has ended, and the
/// outcomes go to the tracker. Invalid transmissions are logged, counted as
/// dropped and skipped. Any other error aborts the run.
pub fn run(config: &ScenarioConfig, scenario: &Scenario, ctx: &mut SimContext) -> Result<SimulationResult> {
    let network = &config.network;
    let stop_time = Duration::try_from_secs_f64(network.simulation_duration_s).map_err(|e| {
        SimulationError::invalid_configuration(format!("simulation duration {}: {}", network.simulation_duration_s, e))
    })?;
    let period = Duration::try_from_secs_f64(network.app_period_s)
        .map_err(|e| SimulationError::invalid_configuration(format!("app period {}: {}", network.app_period_s, e)))?;
    if period.is_zero() {
        return Err(SimulationError::invalid_configuration("app period must be positive"));
    }
    let sender = PeriodicSender::new(period, network.payload_size);
    let n_channels = config.lora.channels_mhz.len();

    let mut classifier = PacketClassifier::new(&scenario.gateways, &config.gateway, n_channels);
    let mut tracker = PacketTracker::new(scenario.gateways.iter().map(|gw| gw.id));
    let mut queue = EventQueue::new();
    let mut next_transmission_id: TransmissionId = 0;
    let mut acks_sent = 0u64;

    for device in &scenario.devices {
        let first = sender.first_send(ctx);
        if first < stop_time {
            queue.schedule(first, SimEvent::Uplink { device_id: device.id });
        }
    }

    info!(
        "Running {} devices ({} first uplinks queued) for {:.0}s, one {}-byte uplink every {:.0}s",
        scenario.devices.len(),
        queue.len(),
        stop_time.as_secs_f64(),
        sender.payload_size(),
        period.as_secs_f64()
    );

    while let Some(scheduled) = queue.pop_earliest() {
        ctx.advance_to(scheduled.time());
        let finalized = classifier.finalize_until(ctx.now());
        acks_sent += commit(config, &mut classifier, &mut tracker, &finalized)?;

        match scheduled.into_event() {
            SimEvent::Uplink { device_id } => {
                let (Some(device), Some(rx_power_dbm)) =
                    (scenario.devices.get(device_id as usize), scenario.rx_power_dbm(device_id))
                else {
                    continue;
                };
                let transmission = Transmission {
                    id: next_transmission_id,
                    device_id,
                    start: ctx.now(),
                    duration: uplink_air_time(&config.lora, device.spreading_factor, sender.payload_size()),
                    spreading_factor: device.spreading_factor,
                    channel: sender.pick_channel(ctx, n_channels),
                    rx_power_dbm: rx_power_dbm.to_vec(),
                };
                next_transmission_id += 1;

                match classifier.submit(&transmission) {
                    Ok(()) => {
                        tracker.record_sent(&transmission);
                        queue.schedule(transmission.end(), SimEvent::ReceptionEnd);
                    }
                    Err(err @ SimulationError::InvalidTransmission { .. }) => {
                        warn!("Dropping transmission: {}", err);
                        tracker.record_dropped(&err);
                    }
                    Err(err) => return Err(err),
                }

                if let Some(next) = sender.next_send(ctx.now(), stop_time) {
                    queue.schedule(next, SimEvent::Uplink { device_id });
                }
            }
            SimEvent::ReceptionEnd => {}
        }
    }

    // Nothing is left on the queue, so every reception has ended by now.
    let finalized = classifier.finalize_until(ctx.now());
    acks_sent += commit(config, &mut classifier, &mut tracker, &finalized)?;
    if classifier.pending() > 0 || tracker.pending_pairs() > 0 {
        warn!(
            "{} receptions and {} outcome pairs still pending after drain",
            classifier.pending(),
            tracker.pending_pairs()
        );
    }

    info!(
        "Simulation finished at {:.3}s: {} transmissions, {} dropped, {} ACKs",
        ctx.now().as_secs_f64(),
        tracker.sent_count(),
        tracker.dropped().len(),
        acks_sent
    );

    Ok(SimulationResult {
        tracker,
        stop_time,
        n_devices: scenario.devices.len(),
        acks_sent,
    })
}

/// Build the scenario and run it with a fresh context seeded from the config.
pub fn run_scenario(config: &ScenarioConfig) -> Result<(Scenario, SimulationResult)> {
    let scenario = build_scenario(config)?;
    let mut ctx = SimContext::new(config.network.seed);
    let result = run(config, &scenario, &mut ctx)?;
    Ok((scenario, result))
}

/// Record committed outcomes and, for confirmed traffic, schedule the ACK
/// downlinks. Returns the number of ACKs scheduled.
fn commit(
    config: &ScenarioConfig,
    classifier: &mut PacketClassifier,
    tracker: &mut PacketTracker,
    finalized: &[FinalizedOutcome],
) -> Result<u64> {
    for outcome in finalized {
        tracker.record(outcome.transmission_id, outcome.gateway_id, outcome.outcome, outcome.time)?;
    }
    if !config.network.confirmed_messages {
        return Ok(0);
    }

    // `finalized` is sorted by (end, transmission id): all gateways of one
    // transmission are adjacent.
    let mut acks = 0;
    for group in finalized.chunk_by(|a, b| a.transmission_id == b.transmission_id) {
        let best = group
            .iter()
            .filter(|o| o.outcome == PacketOutcome::Received)
            .max_by(|a, b| a.rx_power_dbm.total_cmp(&b.rx_power_dbm).then(b.gateway_id.cmp(&a.gateway_id)));
        let Some(best) = best else {
            continue;
        };
        // RX1 uses the uplink data rate
        let airtime = Duration::from_secs_f64(calculate_air_time(&config.lora, best.spreading_factor, ACK_PHY_PAYLOAD_BYTES));
        if let Some(receiver) = classifier.receiver_mut(best.gateway_id) {
            debug!(
                "Gateway {} acknowledges transmission {} at {:.6}s",
                best.gateway_id,
                best.transmission_id,
                (best.time + RX1_DELAY).as_secs_f64()
            );
            receiver.schedule_transmit(best.time + RX1_DELAY, airtime);
            acks += 1;
        }
    }
    Ok(acks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ScenarioConfig {
        let mut config = ScenarioConfig::default();
        config.network.device_count = 30;
        config.network.simulation_duration_s = 1_200.0;
        config.network.app_period_s = 300.0;
        config
    }

    #[test]
    fn link_budget_matches_propagation_model() {
        let config = small_config();
        let scenario = build_scenario(&config).unwrap();
        let device = &scenario.devices[3];
        let gateway = &scenario.gateways[0];
        let expected = scenario.propagation.received_power(
            config.network.tx_power_dbm,
            &device.position,
            &gateway.position,
            &scenario.buildings,
        );
        assert_eq!(scenario.rx_power_dbm(3), Some(&[expected][..]));
        assert_eq!(scenario.rx_power_dbm(30), None);
    }

    #[test]
    fn default_layout_keeps_devices_indoors() {
        let mut config = small_config();
        config.network.device_count = 700;
        assert_eq!(build_scenario(&config).unwrap().indoor_devices(), 700);

        // Eight floors of devices do not fit a seven-floor building
        config.network.device_count = 750;
        let scenario = build_scenario(&config).unwrap();
        assert_eq!(scenario.indoor_devices(), 700);
    }

    #[test]
    fn every_pair_gets_exactly_one_outcome() {
        let config = small_config();
        let (scenario, result) = run_scenario(&config).unwrap();
        assert_eq!(result.tracker.pending_pairs(), 0);
        // Four periods, one uplink per device per period
        assert_eq!(result.tracker.sent_count(), 4 * scenario.devices.len());
        for id in 0..result.tracker.sent_count() as TransmissionId {
            assert!(result.tracker.outcome_of(id, 0).is_some());
        }
    }

    #[test]
    fn extra_gateways_reuse_positions() {
        let mut config = small_config();
        config.network.gateway_count = 3;
        config.network.gateway_positions = vec![[50.0, 50.0, 23.0], [150.0, 50.0, 23.0]];
        let scenario = build_scenario(&config).unwrap();
        assert_eq!(scenario.gateways.len(), 3);
        assert_eq!(scenario.gateways[2].position, Point::new(50.0, 50.0, 23.0));
    }

    #[test]
    fn confirmed_traffic_sends_acks() {
        let mut config = small_config();
        config.network.confirmed_messages = true;
        config.network.device_count = 100;
        config.network.app_period_s = 10.0;
        config.network.simulation_duration_s = 300.0;
        let (_, result) = run_scenario(&config).unwrap();
        let breakdown = result.gateway_breakdown();
        let row = breakdown.rows[&0];
        assert_eq!(result.acks_sent, row.received);
        assert_eq!(row.total_outcomes(), row.sent);
    }

    #[test]
    fn rejects_bad_data_rate() {
        let mut config = small_config();
        config.network.data_rate = 9;
        assert!(matches!(build_scenario(&config), Err(SimulationError::InvalidConfiguration(_))));
    }
}
