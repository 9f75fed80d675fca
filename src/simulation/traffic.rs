//! Periodic uplink traffic.
//!
//! Every device sends a fixed-size frame once per period. The first frame of
//! each device is delayed by a uniform offset in `[0, period)` so that the
//! population does not transmit in lockstep.

use std::time::Duration;

use super::context::SimContext;
use super::types::SimTime;

/// Traffic model shared by every device: one frame of `payload_size` bytes
/// per `period`.
#[derive(Debug, Clone)]
pub struct PeriodicSender {
    period: Duration,
    payload_size: usize,
}

impl PeriodicSender {
    pub fn new(period: Duration, payload_size: usize) -> Self {
        Self { period, payload_size }
    }

    /// Application payload in bytes, before LoRaWAN framing.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    /// Time of a device's first uplink.
    pub fn first_send(&self, ctx: &mut SimContext) -> SimTime {
        let period_ns = self.period.as_nanos().min(u64::MAX as u128) as u64;
        Duration::from_nanos(ctx.random_range(0, period_ns))
    }

    /// Time of the uplink following one sent at `last`, or `None` at or past `stop`.
    pub fn next_send(&self, last: SimTime, stop: SimTime) -> Option<SimTime> {
        let next = last.checked_add(self.period)?;
        (next < stop).then_some(next)
    }

    /// Carrier for the next frame, uniform over `n_channels`.
    pub fn pick_channel(&self, ctx: &mut SimContext, n_channels: usize) -> usize {
        ctx.random_range(0, n_channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_send_falls_within_one_period() {
        let sender = PeriodicSender::new(Duration::from_secs(300), 20);
        let mut ctx = SimContext::new(11);
        for _ in 0..1_000 {
            assert!(sender.first_send(&mut ctx) < Duration::from_secs(300));
        }
    }

    #[test]
    fn next_send_stops_at_the_stop_time() {
        let sender = PeriodicSender::new(Duration::from_secs(300), 20);
        let stop = Duration::from_secs(900);
        assert_eq!(sender.next_send(Duration::from_secs(100), stop), Some(Duration::from_secs(400)));
        assert_eq!(sender.next_send(Duration::from_secs(600), stop), None);
        assert_eq!(sender.next_send(Duration::from_secs(700), stop), None);
    }

    #[test]
    fn channels_are_spread() {
        let sender = PeriodicSender::new(Duration::from_secs(300), 20);
        let mut ctx = SimContext::new(5);
        let mut seen = [0usize; 3];
        for _ in 0..300 {
            seen[sender.pick_channel(&mut ctx, 3)] += 1;
        }
        assert!(seen.iter().all(|&count| count > 50), "{seen:?}");
    }
}
