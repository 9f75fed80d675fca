//! Per-gateway packet outcome classification.
//!
//! Every gateway keeps a list of receptions that are still on the air or may
//! still interfere with something on the air. A reception gets its final
//! outcome only once the clock has passed its end; until then a later, stronger
//! arrival can still turn it into `Interfered`.
//!
//! ## Evaluation order
//!
//! 1. **LostBecauseTx**: the gateway was transmitting during the reception
//! 2. **UnderSensitivity**: received power below the per-SF sensitivity
//! 3. **NoMoreReceivers**: decided on arrival, when more capturable receptions
//!    are in flight than the gateway has receive paths
//! 4. **Capture**: received only if stronger than every co-channel, co-SF
//!    overlapping interferer by at least the capture threshold

use serde::Deserialize;
use std::time::Duration;

use super::error::{Result, SimulationError};
use super::signal_calculations::gateway_sensitivity;
use super::types::{
    CAPTURE_THRESHOLD, DEFAULT_GATEWAY_SENSITIVITY, DEFAULT_RECEIVE_PATHS, DeviceId, Gateway, GatewayId, PacketOutcome,
    SimTime, SpreadingFactor, Transmission, TransmissionId,
};

/// Gateway radio parameters.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct GatewayParameters {
    /// Receptions the gateway can demodulate at the same time, across all channels.
    pub receive_paths: usize,
    /// Margin (dB) by which a reception must beat every interferer to be captured.
    pub capture_threshold_db: f64,
    /// Sensitivity (dBm) for SF7..SF12.
    pub sensitivity_dbm: [f64; 6],
}

impl Default for GatewayParameters {
    fn default() -> Self {
        Self {
            receive_paths: DEFAULT_RECEIVE_PATHS,
            capture_threshold_db: CAPTURE_THRESHOLD,
            sensitivity_dbm: DEFAULT_GATEWAY_SENSITIVITY,
        }
    }
}

/// A committed outcome, handed to the metrics tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedOutcome {
    pub transmission_id: TransmissionId,
    pub device_id: DeviceId,
    pub gateway_id: GatewayId,
    pub outcome: PacketOutcome,
    pub spreading_factor: SpreadingFactor,
    /// End of the reception.
    pub time: SimTime,
    pub rx_power_dbm: f64,
}

#[derive(Debug, Clone)]
struct Reception {
    transmission_id: TransmissionId,
    device_id: DeviceId,
    start: SimTime,
    end: SimTime,
    spreading_factor: SpreadingFactor,
    channel: usize,
    rx_power_dbm: f64,
    /// Outcome decided before the end of the reception (sensitivity, capacity).
    provisional: Option<PacketOutcome>,
    committed: Option<PacketOutcome>,
}

impl Reception {
    fn overlaps(&self, start: SimTime, end: SimTime) -> bool {
        self.start < end && self.end > start
    }
}

/// Reception state of one gateway.
///
/// Holds the receptions that are still on the air together with committed
/// ones that may still overlap them, plus the gateway's own downlink windows.
#[derive(Debug)]
pub struct GatewayReceiver {
    gateway_id: GatewayId,
    receive_paths: usize,
    capture_threshold_db: f64,
    sensitivity_dbm: [f64; 6],
    receptions: Vec<Reception>,
    /// Downlink windows `[start, end)` during which the gateway cannot receive.
    transmit_windows: Vec<(SimTime, SimTime)>,
}

impl GatewayReceiver {
    /// Empty receiver for `gateway`. Receive paths come from the gateway record,
    /// capture threshold and sensitivities from `params`.
    pub fn new(gateway: &Gateway, params: &GatewayParameters) -> Self {
        Self {
            gateway_id: gateway.id,
            receive_paths: gateway.receive_paths,
            capture_threshold_db: params.capture_threshold_db,
            sensitivity_dbm: params.sensitivity_dbm,
            receptions: Vec::new(),
            transmit_windows: Vec::new(),
        }
    }

    /// Receptions without a committed outcome.
    pub fn pending(&self) -> usize {
        self.receptions.iter().filter(|r| r.committed.is_none()).count()
    }

    /// Register a downlink. Receptions overlapping `[start, start + duration)`
    /// end up `LostBecauseTx`.
    pub fn schedule_transmit(&mut self, start: SimTime, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.transmit_windows.push((start, start + duration));
    }

    /// Whether any downlink window overlaps `[start, end)`.
    pub fn is_transmitting_during(&self, start: SimTime, end: SimTime) -> bool {
        self.transmit_windows.iter().any(|&(tx_start, tx_end)| tx_start < end && tx_end > start)
    }

    fn below_sensitivity(&self, reception: &Reception) -> bool {
        reception.rx_power_dbm < gateway_sensitivity(&self.sensitivity_dbm, reception.spreading_factor)
    }

    /// Whether a reception takes part in contention and capture.
    fn competes(&self, reception: &Reception) -> bool {
        !self.below_sensitivity(reception) && !self.is_transmitting_during(reception.start, reception.end)
    }

    /// Add a new reception. `transmission` must already be validated and must
    /// not start before anything ingested or finalized earlier.
    fn ingest(&mut self, transmission: &Transmission, rx_power_dbm: f64) {
        let mut reception = Reception {
            transmission_id: transmission.id,
            device_id: transmission.device_id,
            start: transmission.start,
            end: transmission.end(),
            spreading_factor: transmission.spreading_factor,
            channel: transmission.channel,
            rx_power_dbm,
            provisional: None,
            committed: None,
        };
        if self.below_sensitivity(&reception) {
            reception.provisional = Some(PacketOutcome::UnderSensitivity);
        }
        self.receptions.push(reception);
        self.allocate_receive_paths(transmission.start);
    }

    /// Block the excess of capturable receptions in flight at `now`: lowest
    /// power first, then earliest start, then lowest transmission id.
    fn allocate_receive_paths(&mut self, now: SimTime) {
        let mut active: Vec<usize> = self
            .receptions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.committed.is_none() && r.provisional.is_none())
            .filter(|(_, r)| r.start <= now && now < r.end)
            .filter(|(_, r)| self.competes(r))
            .map(|(i, _)| i)
            .collect();
        if active.len() <= self.receive_paths {
            return;
        }

        active.sort_by(|&a, &b| {
            let (ra, rb) = (&self.receptions[a], &self.receptions[b]);
            ra.rx_power_dbm
                .total_cmp(&rb.rx_power_dbm)
                .then(ra.start.cmp(&rb.start))
                .then(ra.transmission_id.cmp(&rb.transmission_id))
        });
        let excess = active.len() - self.receive_paths;
        for &index in &active[..excess] {
            let reception = &mut self.receptions[index];
            log::debug!(
                "Gateway {}: no receive path left for transmission {}",
                self.gateway_id,
                reception.transmission_id
            );
            reception.provisional = Some(PacketOutcome::NoMoreReceivers);
        }
    }

    fn classify(&self, index: usize) -> PacketOutcome {
        let reception = &self.receptions[index];
        if self.is_transmitting_during(reception.start, reception.end) {
            return PacketOutcome::LostBecauseTx;
        }
        if let Some(outcome) = reception.provisional {
            return outcome;
        }

        let captured = self
            .receptions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, other)| other)
            .filter(|other| other.channel == reception.channel && other.spreading_factor == reception.spreading_factor)
            .filter(|other| other.overlaps(reception.start, reception.end))
            .filter(|other| self.competes(other))
            .all(|other| {
                let margin = reception.rx_power_dbm - other.rx_power_dbm;
                // At most one of two overlapping receptions can be captured
                margin > 0.0 && margin >= self.capture_threshold_db
            });

        if captured {
            PacketOutcome::Received
        } else {
            PacketOutcome::Interfered
        }
    }

    /// Commit every reception that ended at or before `now`.
    fn finalize_until(&mut self, now: SimTime, out: &mut Vec<FinalizedOutcome>) {
        let ready: Vec<usize> = self
            .receptions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.committed.is_none() && r.end <= now)
            .map(|(i, _)| i)
            .collect();

        // Classify everything first so each decision sees the same state.
        let outcomes: Vec<(usize, PacketOutcome)> = ready.iter().map(|&i| (i, self.classify(i))).collect();
        for (index, outcome) in outcomes {
            let reception = &mut self.receptions[index];
            reception.committed = Some(outcome);
            out.push(FinalizedOutcome {
                transmission_id: reception.transmission_id,
                device_id: reception.device_id,
                gateway_id: self.gateway_id,
                outcome,
                spreading_factor: reception.spreading_factor,
                time: reception.end,
                rx_power_dbm: reception.rx_power_dbm,
            });
        }

        self.prune(now);
    }

    /// Drop committed receptions and transmit windows that can no longer
    /// overlap a pending or future reception.
    fn prune(&mut self, now: SimTime) {
        let horizon = self
            .receptions
            .iter()
            .filter(|r| r.committed.is_none())
            .map(|r| r.start)
            .min()
            .map_or(now, |earliest| earliest.min(now));

        self.receptions.retain(|r| r.committed.is_none() || r.end > horizon);
        self.transmit_windows.retain(|&(_, end)| end > horizon);
    }
}

/// Classifier over all gateways of the network.
///
/// Transmissions are submitted in non-decreasing start order and fanned out to
/// one [`GatewayReceiver`] per gateway. Outcomes come back through
/// [`PacketClassifier::finalize_until`] once the clock has passed the end of
/// each reception.
#[derive(Debug)]
pub struct PacketClassifier {
    receivers: Vec<GatewayReceiver>,
    n_channels: usize,
    /// Latest arrival or finalization time; arrivals must not go back in time.
    horizon: SimTime,
}

impl PacketClassifier {
    /// One receiver per gateway, indexed by gateway id. `n_channels` bounds the
    /// channel index a transmission may use.
    pub fn new(gateways: &[Gateway], params: &GatewayParameters, n_channels: usize) -> Self {
        Self {
            receivers: gateways.iter().map(|gw| GatewayReceiver::new(gw, params)).collect(),
            n_channels,
            horizon: SimTime::ZERO,
        }
    }

    /// Receiver of `gateway_id`, used to register downlinks.
    pub fn receiver_mut(&mut self, gateway_id: GatewayId) -> Option<&mut GatewayReceiver> {
        self.receivers.get_mut(gateway_id as usize)
    }

    /// Check that a transmission can be evaluated.
    pub fn validate(&self, transmission: &Transmission) -> Result<()> {
        let reject = |reason: String| SimulationError::InvalidTransmission {
            transmission_id: transmission.id,
            device_id: transmission.device_id,
            time: transmission.start,
            reason,
        };

        if transmission.duration.is_zero() {
            return Err(reject("zero duration".to_string()));
        }
        if transmission.channel >= self.n_channels {
            return Err(reject(format!(
                "unknown channel {} ({} configured)",
                transmission.channel, self.n_channels
            )));
        }
        if transmission.rx_power_dbm.len() != self.receivers.len() {
            return Err(reject(format!(
                "{} received powers for {} gateways",
                transmission.rx_power_dbm.len(),
                self.receivers.len()
            )));
        }
        if transmission.rx_power_dbm.iter().any(|p| !p.is_finite()) {
            return Err(reject("non-finite received power".to_string()));
        }
        if transmission.start < self.horizon {
            return Err(reject(format!(
                "starts at {:.6}s, behind the classifier horizon at {:.6}s",
                transmission.start.as_secs_f64(),
                self.horizon.as_secs_f64()
            )));
        }
        Ok(())
    }

    /// Validate and hand a transmission to every gateway.
    ///
    /// Sensitivity and receive-path decisions are taken right away; capture is
    /// only decided when the reception is finalized. Invalid transmissions are
    /// returned as `InvalidTransmission` and leave the classifier unchanged.
    pub fn submit(&mut self, transmission: &Transmission) -> Result<()> {
        self.validate(transmission)?;
        self.horizon = transmission.start;
        for (receiver, &power) in self.receivers.iter_mut().zip(&transmission.rx_power_dbm) {
            receiver.ingest(transmission, power);
        }
        Ok(())
    }

    /// Commit every reception that ended at or before `now`, ordered by
    /// (end, transmission id, gateway id).
    pub fn finalize_until(&mut self, now: SimTime) -> Vec<FinalizedOutcome> {
        self.horizon = self.horizon.max(now);
        let mut finalized = Vec::new();
        for receiver in &mut self.receivers {
            receiver.finalize_until(now, &mut finalized);
        }
        finalized.sort_by(|a, b| {
            a.time
                .cmp(&b.time)
                .then(a.transmission_id.cmp(&b.transmission_id))
                .then(a.gateway_id.cmp(&b.gateway_id))
        });
        finalized
    }

    /// Receptions without a committed outcome, summed over gateways.
    pub fn pending(&self) -> usize {
        self.receivers.iter().map(GatewayReceiver::pending).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::Point;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn gateways(n: u32, receive_paths: usize) -> Vec<Gateway> {
        (0..n)
            .map(|id| Gateway {
                id,
                position: Point::new(0.0, 0.0, 0.0),
                receive_paths,
            })
            .collect()
    }

    fn tx(id: TransmissionId, start_ms: u64, duration_ms: u64, power: f64) -> Transmission {
        Transmission {
            id,
            device_id: id as DeviceId,
            start: ms(start_ms),
            duration: ms(duration_ms),
            spreading_factor: SpreadingFactor::SF7,
            channel: 0,
            rx_power_dbm: vec![power],
        }
    }

    fn classifier(receive_paths: usize) -> PacketClassifier {
        PacketClassifier::new(&gateways(1, receive_paths), &GatewayParameters::default(), 3)
    }

    fn outcome(finalized: &[FinalizedOutcome], id: TransmissionId) -> Option<PacketOutcome> {
        finalized.iter().find(|f| f.transmission_id == id).map(|f| f.outcome)
    }

    #[test]
    fn lone_strong_transmission_is_received() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -90.0)).unwrap();
        assert!(c.finalize_until(ms(99)).is_empty());
        let done = c.finalize_until(ms(100));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Received));
        assert_eq!(done[0].time, ms(100));
        assert_eq!(c.pending(), 0);
    }

    #[test]
    fn three_db_apart_both_interfered() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 50, 100, -77.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Interfered));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Interfered));
    }

    #[test]
    fn ten_db_apart_stronger_captures() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 50, 100, -70.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Interfered));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
    }

    #[test]
    fn exactly_threshold_margin_captures() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -86.0)).unwrap();
        c.submit(&tx(1, 10, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Interfered));
    }

    #[test]
    fn equal_powers_are_never_both_captured() {
        let params = GatewayParameters {
            capture_threshold_db: 0.0,
            ..Default::default()
        };
        let mut c = PacketClassifier::new(&gateways(1, 8), &params, 3);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 0, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(100));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Interfered));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Interfered));

        // Without a margin the stronger of two frames still wins
        c.submit(&tx(2, 200, 100, -80.0)).unwrap();
        c.submit(&tx(3, 200, 100, -79.5)).unwrap();
        let done = c.finalize_until(ms(300));
        assert_eq!(outcome(&done, 2), Some(PacketOutcome::Interfered));
        assert_eq!(outcome(&done, 3), Some(PacketOutcome::Received));
    }

    #[test]
    fn late_arrival_still_interferes_with_earlier_reception() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        // Nothing is committed while the first reception is on the air
        assert!(c.finalize_until(ms(60)).is_empty());
        c.submit(&tx(1, 60, 100, -79.0)).unwrap();
        let done = c.finalize_until(ms(100));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Interfered));
        assert_eq!(outcome(&done, 1), None);
        let done = c.finalize_until(ms(160));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Interfered));
    }

    #[test]
    fn back_to_back_frames_do_not_overlap() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 100, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::Received));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
    }

    #[test]
    fn different_channel_or_sf_does_not_interfere() {
        let mut c = classifier(8);
        let mut other_channel = tx(1, 10, 100, -78.0);
        other_channel.channel = 1;
        let mut other_sf = tx(2, 20, 100, -78.0);
        other_sf.spreading_factor = SpreadingFactor::SF9;
        other_sf.duration = ms(300);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&other_channel).unwrap();
        c.submit(&other_sf).unwrap();
        let done = c.finalize_until(ms(400));
        assert_eq!(done.len(), 3);
        assert!(done.iter().all(|f| f.outcome == PacketOutcome::Received));
    }

    #[test]
    fn weak_signal_is_under_sensitivity_and_does_not_interfere() {
        let mut c = classifier(8);
        c.submit(&tx(0, 0, 100, -131.0)).unwrap();
        c.submit(&tx(1, 10, 100, -127.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::UnderSensitivity));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
    }

    #[test]
    fn capacity_one_blocks_weakest_receptions() {
        let mut c = classifier(1);
        c.submit(&tx(0, 0, 100, -90.0)).unwrap();
        c.submit(&tx(1, 0, 100, -70.0)).unwrap();
        c.submit(&tx(2, 0, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(100));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::NoMoreReceivers));
        assert_eq!(outcome(&done, 2), Some(PacketOutcome::NoMoreReceivers));
        // Blocked energy still counts, but -70 beats -80 by 10 dB
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
    }

    #[test]
    fn capacity_tie_blocks_earliest_start() {
        let mut c = classifier(1);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 5, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::NoMoreReceivers));
        // The blocked frame still interferes at equal power
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Interfered));
    }

    #[test]
    fn path_frees_up_after_reception_ends() {
        let mut c = classifier(1);
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.finalize_until(ms(100));
        let mut second = tx(1, 100, 100, -80.0);
        second.channel = 2;
        c.submit(&second).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
    }

    #[test]
    fn downlink_window_loses_overlapping_uplinks() {
        let mut c = classifier(8);
        c.receiver_mut(0).unwrap().schedule_transmit(ms(50), ms(30));
        c.submit(&tx(0, 0, 100, -80.0)).unwrap();
        c.submit(&tx(1, 100, 100, -80.0)).unwrap();
        let done = c.finalize_until(ms(200));
        assert_eq!(outcome(&done, 0), Some(PacketOutcome::LostBecauseTx));
        assert_eq!(outcome(&done, 1), Some(PacketOutcome::Received));
        assert!(!c.receivers[0].is_transmitting_during(ms(200), ms(300)));
    }

    #[test]
    fn every_gateway_gets_its_own_outcome() {
        let mut c = PacketClassifier::new(&gateways(2, 8), &GatewayParameters::default(), 3);
        let mut t = tx(7, 0, 100, 0.0);
        t.rx_power_dbm = vec![-90.0, -140.0];
        c.submit(&t).unwrap();
        let done = c.finalize_until(ms(100));
        assert_eq!(done.len(), 2);
        assert_eq!((done[0].gateway_id, done[0].outcome), (0, PacketOutcome::Received));
        assert_eq!((done[1].gateway_id, done[1].outcome), (1, PacketOutcome::UnderSensitivity));
    }

    #[test]
    fn rejects_invalid_transmissions() {
        let mut c = classifier(8);
        let zero = tx(0, 0, 0, -80.0);
        let mut bad_channel = tx(1, 0, 100, -80.0);
        bad_channel.channel = 3;
        let mut bad_power = tx(2, 0, 100, -80.0);
        bad_power.rx_power_dbm = vec![f64::NAN];
        let mut missing_power = tx(3, 0, 100, -80.0);
        missing_power.rx_power_dbm.clear();
        for t in [&zero, &bad_channel, &bad_power, &missing_power] {
            assert!(matches!(
                c.submit(t),
                Err(SimulationError::InvalidTransmission { transmission_id, .. }) if transmission_id == t.id
            ));
        }
        assert_eq!(c.pending(), 0);

        c.submit(&tx(4, 500, 100, -80.0)).unwrap();
        assert!(c.submit(&tx(5, 400, 100, -80.0)).is_err());
    }

    #[test]
    fn committed_receptions_are_pruned() {
        let mut c = classifier(8);
        for i in 0..50 {
            c.submit(&tx(i, i * 200, 100, -80.0)).unwrap();
            c.finalize_until(ms(i * 200 + 100));
        }
        assert!(c.receivers[0].receptions.len() <= 1);
    }
}
