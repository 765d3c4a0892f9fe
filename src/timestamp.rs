//! Reconstruction of a monotonic millisecond clock out of BLE-MIDI timestamps.
//!
//! BLE-MIDI packets carry a 13-bit millisecond counter that wraps every 8192ms and jitters with
//! the device's radio scheduling.
//! The host also observes an arrival timestamp for every packet, which never wraps but carries
//! the connection interval jitter.
//! `BleClock` combines both: the device counter gives precise relative timing, while the host
//! clock tells how many times the counter wrapped in between packets.

use crate::prelude::*;

/// Period of the BLE-MIDI timestamp counter, in milliseconds.
pub const TIMESTAMP_PERIOD: i64 = 8192;

/// The timestamp state of one packet decoder.
#[derive(Clone, Debug)]
pub(crate) struct BleClock {
    /// May grow past 6 bits when `timestampLow` rolls over inside a packet.
    ts_high: i64,
    ts_low: i64,
    prev_ble: Option<i64>,
    prev_host: Option<f64>,
    /// Unwrapped offset to add to the first fragment after a header.
    pending: i64,
    awaiting_stability: bool,
    error_threshold: f64,
}
impl BleClock {
    pub(crate) fn new(error_threshold_ms: u32, wait_until_stable: bool) -> BleClock {
        BleClock {
            ts_high: 0,
            ts_low: 0,
            prev_ble: None,
            prev_host: None,
            pending: 0,
            awaiting_stability: wait_until_stable,
            error_threshold: error_threshold_ms as f64,
        }
    }

    #[inline]
    pub(crate) fn awaiting_stability(&self) -> bool {
        self.awaiting_stability
    }

    #[inline]
    pub(crate) fn set_awaiting_stability(&mut self, wait: bool) {
        self.awaiting_stability = wait;
    }

    #[inline]
    fn ble_timestamp(&self) -> i64 {
        (self.ts_high << 7) | self.ts_low
    }

    /// Reconcile the header timestamp of a new packet with its host arrival time.
    ///
    /// `ts_low` is `None` for packets that continue a system exclusive message, in which case the
    /// last known `timestampLow` is reused.
    pub(crate) fn set_header(&mut self, ts_high: u8, ts_low: Option<u8>, host_ms: f64) {
        self.ts_high = ts_high as i64;
        if let Some(ts_low) = ts_low {
            self.ts_low = ts_low as i64;
        }

        let ble_ts = self.ble_timestamp();
        let ble_delta = self.prev_ble.map_or(0, |prev| ble_ts - prev);
        self.prev_ble = Some(ble_ts);

        let host_delta = self.prev_host.map_or(0.0, |prev| host_ms - prev);
        self.prev_host = Some(host_ms);

        let wraps = round_half_up((host_delta - ble_delta as f64) / TIMESTAMP_PERIOD as f64);
        self.pending = TIMESTAMP_PERIOD * wraps + ble_delta;

        if ble_delta == 0 && host_delta == 0.0 {
            debug!("initial packet");
            return;
        }

        if self.pending < 0 {
            warn!(
                pending = self.pending,
                "unstable timestamp: negative delta"
            );
            let periods = (-self.pending + TIMESTAMP_PERIOD - 1) / TIMESTAMP_PERIOD;
            self.pending += periods * TIMESTAMP_PERIOD;
        } else {
            let diff = (host_delta - ble_delta as f64).abs() % TIMESTAMP_PERIOD as f64;
            if self.error_threshold < diff && diff < TIMESTAMP_PERIOD as f64 - self.error_threshold
            {
                warn!(
                    host_delta,
                    ble_delta,
                    diff,
                    threshold = self.error_threshold,
                    "unstable timestamp: differential error exceeds threshold"
                );
            } else if self.awaiting_stability {
                info!("timestamp stabilized");
                self.pending = 0;
                self.awaiting_stability = false;
            }
        }
    }

    /// Compute the delta of the next fragment in the packet.
    ///
    /// `ts_low` is `None` for fragments that carry no timestamp byte of their own.
    /// The first fragment after a header additionally consumes the reconciled header offset.
    pub(crate) fn fragment_delta(&mut self, ts_low: Option<u8>) -> i64 {
        if let Some(ts_low) = ts_low {
            let ts_low = ts_low as i64;
            if ts_low < self.ts_low {
                self.ts_high += 1;
            }
            self.ts_low = ts_low;
        }

        let ble_ts = self.ble_timestamp();
        let ble_delta = ble_ts - self.prev_ble.unwrap_or(ble_ts);
        self.prev_ble = Some(ble_ts);

        let delta = self.pending + ble_delta;
        self.pending = 0;
        delta
    }
}

/// Rounds halves towards positive infinity, the way browsers round.
fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// Converts host timestamps of already assembled MIDI messages into millisecond deltas.
///
/// Timestamps are rounded before subtracting, so rounding errors never accumulate over a long
/// recording.
/// Timestamps that go backwards yield a delta of 0.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HostClock {
    prev: Option<i64>,
}
impl HostClock {
    /// Create a clock that has seen no message yet.
    #[inline]
    pub fn new() -> HostClock {
        HostClock::default()
    }

    /// Forget the previous timestamp, so that the next delta is 0.
    #[inline]
    pub fn initialize(&mut self) {
        self.prev = None;
    }

    /// The delta between this message and the previous one, in milliseconds.
    pub fn delta(&mut self, host_ms: f64) -> u32 {
        let now = round_half_up(host_ms);
        let delta = match self.prev {
            Some(prev) if now < prev => {
                warn!(now, prev, "host timestamp went backwards");
                0
            }
            Some(prev) => now - prev,
            None => 0,
        };
        self.prev = Some(self.prev.map_or(now, |prev| prev.max(now)));
        delta.min(u32::MAX as i64) as u32
    }
}
