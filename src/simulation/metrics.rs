//! Packet accounting.
//!
//! The tracker records every sent transmission and the single outcome of each
//! (transmission, gateway) pair. All queries are read-only and window by
//! *send time* over the half-open interval `[from, to)`.

use std::collections::{BTreeMap, BTreeSet};

use super::error::{Result, SimulationError};
use super::types::{DeviceId, GatewayId, PacketOutcome, SimTime, Transmission, TransmissionId};

/// Network-level count: a transmission is received once if any gateway got it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlobalCount {
    /// Transmissions sent in the window.
    pub sent: u64,
    /// Transmissions received by at least one gateway.
    pub received: u64,
}

/// Outcome counts of one gateway.
///
/// `sent` counts every transmission in the window, since every gateway hears
/// every transmission. The other fields split those by outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub sent: u64,
    pub received: u64,
    pub interfered: u64,
    pub no_more_receivers: u64,
    pub under_sensitivity: u64,
    pub lost_because_tx: u64,
}

impl OutcomeCounts {
    /// Count one more pair with `outcome`.
    pub fn add(&mut self, outcome: PacketOutcome) {
        *self.slot(outcome) += 1;
    }

    /// Count for `outcome`.
    pub fn get(&self, outcome: PacketOutcome) -> u64 {
        match outcome {
            PacketOutcome::Received => self.received,
            PacketOutcome::Interfered => self.interfered,
            PacketOutcome::NoMoreReceivers => self.no_more_receivers,
            PacketOutcome::UnderSensitivity => self.under_sensitivity,
            PacketOutcome::LostBecauseTx => self.lost_because_tx,
        }
    }

    /// Sum over all outcome kinds. Equals `sent` once every pair is final.
    pub fn total_outcomes(&self) -> u64 {
        PacketOutcome::ALL.iter().map(|&o| self.get(o)).sum()
    }

    fn slot(&mut self, outcome: PacketOutcome) -> &mut u64 {
        match outcome {
            PacketOutcome::Received => &mut self.received,
            PacketOutcome::Interfered => &mut self.interfered,
            PacketOutcome::NoMoreReceivers => &mut self.no_more_receivers,
            PacketOutcome::UnderSensitivity => &mut self.under_sensitivity,
            PacketOutcome::LostBecauseTx => &mut self.lost_because_tx,
        }
    }
}

/// Per-gateway breakdown over a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatewayBreakdown {
    /// One row per gateway known to the tracker, including silent ones.
    pub rows: BTreeMap<GatewayId, OutcomeCounts>,
    /// Distinct devices that sent at least once in the window.
    pub observed_senders: usize,
    /// Devices that should have sent at least once.
    pub expected_senders: usize,
}

impl GatewayBreakdown {
    /// Fewer devices sent in the window than were expected to.
    pub fn is_undercounted(&self) -> bool {
        self.observed_senders < self.expected_senders
    }
}

/// A transmission the classifier refused. It has no outcome at any gateway
/// and is not part of the sent count.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedTransmission {
    pub transmission_id: TransmissionId,
    pub device_id: DeviceId,
    pub time: SimTime,
    /// Why the classifier refused it.
    pub reason: String,
}

#[derive(Debug, Clone)]
struct PacketStatus {
    device_id: DeviceId,
    send_time: SimTime,
    outcomes: BTreeMap<GatewayId, PacketOutcome>,
}

/// Write-once ledger of sent transmissions and their per-gateway outcomes.
///
/// The runner calls [`record_sent`](PacketTracker::record_sent) when a
/// transmission is accepted and [`record`](PacketTracker::record) once per
/// gateway when its outcome is committed. Queries never mutate the ledger, so
/// the same tracker can be summarised over any number of windows.
#[derive(Debug, Clone)]
pub struct PacketTracker {
    gateway_ids: Vec<GatewayId>,
    packets: BTreeMap<TransmissionId, PacketStatus>,
    dropped: Vec<DroppedTransmission>,
}

impl PacketTracker {
    /// Empty tracker for the given gateways. Outcomes at any other gateway are refused.
    pub fn new(gateway_ids: impl IntoIterator<Item = GatewayId>) -> Self {
        Self {
            gateway_ids: gateway_ids.into_iter().collect(),
            packets: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    /// Register an accepted transmission. Registering the same id again is a no-op.
    pub fn record_sent(&mut self, transmission: &Transmission) {
        self.packets.entry(transmission.id).or_insert_with(|| PacketStatus {
            device_id: transmission.device_id,
            send_time: transmission.start,
            outcomes: BTreeMap::new(),
        });
    }

    /// Record the outcome of a pair. Each pair is written exactly once.
    ///
    /// Fails with `UnknownGateway` for gateways the tracker was not built with,
    /// `UnknownTransmission` for ids never passed to `record_sent`, and
    /// `OutcomeAlreadyRecorded` for a second write to the same pair.
    pub fn record(
        &mut self,
        transmission_id: TransmissionId,
        gateway_id: GatewayId,
        outcome: PacketOutcome,
        time: SimTime,
    ) -> Result<()> {
        if !self.gateway_ids.contains(&gateway_id) {
            return Err(SimulationError::UnknownGateway {
                transmission_id,
                gateway_id,
            });
        }
        let status = self
            .packets
            .get_mut(&transmission_id)
            .ok_or(SimulationError::UnknownTransmission(transmission_id))?;
        if status.outcomes.contains_key(&gateway_id) {
            return Err(SimulationError::OutcomeAlreadyRecorded {
                transmission_id,
                gateway_id,
            });
        }
        log::debug!(
            "{:.6}s transmission {} at gateway {}: {}",
            time.as_secs_f64(),
            transmission_id,
            gateway_id,
            outcome
        );
        status.outcomes.insert(gateway_id, outcome);
        Ok(())
    }

    /// Count a transmission refused by the classifier. Only
    /// `InvalidTransmission` errors are kept.
    pub fn record_dropped(&mut self, error: &SimulationError) {
        if let SimulationError::InvalidTransmission {
            transmission_id,
            device_id,
            time,
            reason,
        } = error
        {
            self.dropped.push(DroppedTransmission {
                transmission_id: *transmission_id,
                device_id: *device_id,
                time: *time,
                reason: reason.clone(),
            });
        }
    }

    /// Transmissions refused by the classifier, in the order they were dropped.
    pub fn dropped(&self) -> &[DroppedTransmission] {
        &self.dropped
    }

    /// Number of accepted transmissions over the whole run.
    pub fn sent_count(&self) -> usize {
        self.packets.len()
    }

    /// Committed outcome of a pair, `None` while it is still pending.
    pub fn outcome_of(&self, transmission_id: TransmissionId, gateway_id: GatewayId) -> Option<PacketOutcome> {
        self.packets
            .get(&transmission_id)
            .and_then(|status| status.outcomes.get(&gateway_id).copied())
    }

    /// (transmission, gateway) pairs still without an outcome.
    pub fn pending_pairs(&self) -> usize {
        self.packets
            .values()
            .map(|status| self.gateway_ids.len().saturating_sub(status.outcomes.len()))
            .sum()
    }

    fn in_window(&self, from: SimTime, to: SimTime) -> impl Iterator<Item = &PacketStatus> {
        self.packets
            .values()
            .filter(move |status| status.send_time >= from && status.send_time < to)
    }

    /// Sent and network-level received counts of transmissions sent in
    /// `[from, to)`. A transmission counts as received once, however many
    /// gateways received it.
    pub fn count_globally(&self, from: SimTime, to: SimTime) -> GlobalCount {
        self.in_window(from, to).fold(GlobalCount::default(), |mut count, status| {
            count.sent += 1;
            if status.outcomes.values().any(|&o| o == PacketOutcome::Received) {
                count.received += 1;
            }
            count
        })
    }

    /// Per-gateway outcome counts of transmissions sent in `[from, to)`.
    ///
    /// Logs a warning when fewer than `n_devices_expected` distinct devices
    /// sent in the window, because rates over such a window are biased.
    pub fn per_gateway_breakdown(&self, from: SimTime, to: SimTime, n_devices_expected: usize) -> GatewayBreakdown {
        let mut rows: BTreeMap<GatewayId, OutcomeCounts> =
            self.gateway_ids.iter().map(|&gw| (gw, OutcomeCounts::default())).collect();
        let mut senders = BTreeSet::new();

        for status in self.in_window(from, to) {
            senders.insert(status.device_id);
            for row in rows.values_mut() {
                row.sent += 1;
            }
            for (gateway_id, &outcome) in &status.outcomes {
                if let Some(row) = rows.get_mut(gateway_id) {
                    row.add(outcome);
                }
            }
        }

        let breakdown = GatewayBreakdown {
            rows,
            observed_senders: senders.len(),
            expected_senders: n_devices_expected,
        };
        if breakdown.is_undercounted() {
            log::warn!(
                "Only {} of {} devices sent between {:.3}s and {:.3}s",
                breakdown.observed_senders,
                breakdown.expected_senders,
                from.as_secs_f64(),
                to.as_secs_f64()
            );
        }
        breakdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::SpreadingFactor;
    use std::time::Duration;

    fn sent(tracker: &mut PacketTracker, id: TransmissionId, device_id: DeviceId, start_s: u64) {
        tracker.record_sent(&Transmission {
            id,
            device_id,
            start: Duration::from_secs(start_s),
            duration: Duration::from_millis(70),
            spreading_factor: SpreadingFactor::SF7,
            channel: 0,
            rx_power_dbm: vec![-80.0, -80.0],
        });
    }

    fn s(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[test]
    fn outcomes_are_write_once() {
        let mut tracker = PacketTracker::new([0, 1]);
        sent(&mut tracker, 0, 0, 1);
        tracker.record(0, 0, PacketOutcome::Received, s(1)).unwrap();
        assert_eq!(
            tracker.record(0, 0, PacketOutcome::Interfered, s(1)),
            Err(SimulationError::OutcomeAlreadyRecorded {
                transmission_id: 0,
                gateway_id: 0
            })
        );
        assert_eq!(tracker.outcome_of(0, 0), Some(PacketOutcome::Received));
        assert_eq!(
            tracker.record(9, 0, PacketOutcome::Received, s(1)),
            Err(SimulationError::UnknownTransmission(9))
        );
    }

    #[test]
    fn outcomes_at_unknown_gateways_are_refused() {
        let mut tracker = PacketTracker::new([0]);
        sent(&mut tracker, 0, 0, 1);
        tracker.record(0, 0, PacketOutcome::Received, s(1)).unwrap();
        assert_eq!(
            tracker.record(0, 7, PacketOutcome::Interfered, s(1)),
            Err(SimulationError::UnknownGateway {
                transmission_id: 0,
                gateway_id: 7
            })
        );
        assert_eq!(tracker.outcome_of(0, 7), None);
        assert_eq!(tracker.pending_pairs(), 0);
    }

    #[test]
    fn global_count_deduplicates_across_gateways() {
        let mut tracker = PacketTracker::new([0, 1]);
        sent(&mut tracker, 0, 0, 1);
        sent(&mut tracker, 1, 1, 2);
        sent(&mut tracker, 2, 2, 3);
        tracker.record(0, 0, PacketOutcome::Received, s(1)).unwrap();
        tracker.record(0, 1, PacketOutcome::Received, s(1)).unwrap();
        tracker.record(1, 0, PacketOutcome::Interfered, s(2)).unwrap();
        tracker.record(1, 1, PacketOutcome::Received, s(2)).unwrap();
        tracker.record(2, 0, PacketOutcome::UnderSensitivity, s(3)).unwrap();
        tracker.record(2, 1, PacketOutcome::NoMoreReceivers, s(3)).unwrap();

        assert_eq!(tracker.count_globally(s(0), s(10)), GlobalCount { sent: 3, received: 2 });

        let breakdown = tracker.per_gateway_breakdown(s(0), s(10), 3);
        let per_gateway_received: u64 = breakdown.rows.values().map(|r| r.received).sum();
        assert_eq!(per_gateway_received, 3);
        assert_eq!(breakdown.rows[&0].interfered, 1);
        assert_eq!(breakdown.rows[&1].no_more_receivers, 1);
        for row in breakdown.rows.values() {
            assert_eq!(row.sent, 3);
            assert_eq!(row.total_outcomes(), row.sent);
        }
        assert!(!breakdown.is_undercounted());
        assert_eq!(tracker.pending_pairs(), 0);
    }

    #[test]
    fn windows_are_half_open_on_send_time() {
        let mut tracker = PacketTracker::new([0]);
        for (id, t) in [(0, 10), (1, 20), (2, 30)] {
            sent(&mut tracker, id, id as DeviceId, t);
            tracker.record(id, 0, PacketOutcome::Received, s(t + 1)).unwrap();
        }
        assert_eq!(tracker.count_globally(s(10), s(30)), GlobalCount { sent: 2, received: 2 });
        assert_eq!(tracker.count_globally(s(30), s(31)).sent, 1);
        assert_eq!(tracker.count_globally(s(31), s(100)), GlobalCount::default());
    }

    #[test]
    fn breakdown_flags_missing_senders() {
        let mut tracker = PacketTracker::new([0]);
        sent(&mut tracker, 0, 4, 1);
        sent(&mut tracker, 1, 4, 2);
        let breakdown = tracker.per_gateway_breakdown(s(0), s(10), 2);
        assert_eq!(breakdown.observed_senders, 1);
        assert!(breakdown.is_undercounted());
        assert_eq!(tracker.pending_pairs(), 2);
    }

    #[test]
    fn dropped_transmissions_are_kept_apart() {
        let mut tracker = PacketTracker::new([0]);
        tracker.record_dropped(&SimulationError::InvalidTransmission {
            transmission_id: 3,
            device_id: 1,
            time: s(5),
            reason: "zero duration".to_string(),
        });
        tracker.record_dropped(&SimulationError::InvalidConfiguration("ignored".to_string()));
        assert_eq!(tracker.dropped().len(), 1);
        assert_eq!(tracker.dropped()[0].transmission_id, 3);
        assert_eq!(tracker.sent_count(), 0);
    }
}
