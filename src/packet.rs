//! Decoding of BLE-MIDI notification packets into timed MIDI fragments.
//!
//! A BLE-MIDI packet looks like this:
//!
//! ```text
//! header  timestamp status data...  [timestamp] [status] data...  ...
//! 10hhhhhh 1lllllll 1sssssss 0ddddddd
//! ```
//!
//! The header carries the top 6 bits of a 13-bit millisecond timestamp, and every message is
//! preceded by a timestamp byte carrying the bottom 7 bits.
//! Messages may omit their status byte (running status), several messages may share a
//! timestamp byte, and system exclusive messages may span several packets, in which case the
//! continuation packets start with data bytes right after the header.
//!
//! The decoder produces *fragments*: complete channel and realtime messages, but possibly
//! partial system exclusive messages, which must be glued back together by the
//! [`Reassembler`](struct.Reassembler.html).

use crate::{
    message::{is_realtime, MidiMessage, SYSEX_START},
    prelude::*,
    timer::{Scheduler, TimerKind, TimerToken, TokenSource},
    timestamp::BleClock,
};

/// Tuning knobs for the packet decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct DecoderConfig {
    /// Discrepancy in milliseconds between the device and host clocks over which the device
    /// timestamp is considered unstable.
    pub timestamp_error_threshold_ms: u32,
    /// How long to wait for the device timestamp to stabilize before accepting fragments anyway.
    pub stabilization_timeout_ms: u32,
    /// Whether to discard fragments until the device timestamp is known to be stable.
    pub wait_until_stable: bool,
}
impl Default for DecoderConfig {
    fn default() -> DecoderConfig {
        DecoderConfig {
            timestamp_error_threshold_ms: 100,
            stabilization_timeout_ms: 500,
            wait_until_stable: true,
        }
    }
}

/// The header of a BLE-MIDI packet.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct PacketHeader {
    /// The top 6 bits of the packet timestamp.
    pub timestamp_high: u8,
    /// The bottom 7 bits of the first message timestamp, or `None` if the packet continues a
    /// system exclusive message from a previous packet.
    pub timestamp_low: Option<u8>,
}
impl PacketHeader {
    /// Smallest packet that carries any MIDI data: a header, a timestamp and a status byte.
    pub const MIN_PACKET_LEN: usize = 3;

    /// Parse the header of a raw BLE-MIDI packet.
    pub fn parse(raw: &[u8]) -> Result<PacketHeader> {
        ensure!(
            raw.len() >= Self::MIN_PACKET_LEN,
            err_malformed!("packet is too short")
        );
        ensure!(raw[0] & 0xC0 == 0x80, err_malformed!("invalid header byte"));
        let timestamp_low = if raw[1] & 0x80 != 0 {
            Some(raw[1] & 0x7F)
        } else {
            None
        };
        Ok(PacketHeader {
            timestamp_high: raw[0] & 0x3F,
            timestamp_low,
        })
    }

    /// Whether the packet starts by continuing a system exclusive message.
    #[inline]
    pub fn continues_sysex(&self) -> bool {
        self.timestamp_low.is_none()
    }
}

/// A decoded MIDI message, which might only be a piece of a larger system exclusive message.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct Fragment<'a> {
    /// Milliseconds since the previous fragment.
    pub delta: u32,
    /// The raw MIDI bytes.
    ///
    /// A system exclusive continuation starts with a data byte instead of a status byte.
    pub bytes: &'a [u8],
    /// Whether this fragment is a system exclusive piece whose end has not been seen yet.
    pub sysex_continues: bool,
}

/// Stateful BLE-MIDI packet decoder.
///
/// Holds the timestamp reconstruction state, so a single decoder must be used per connection,
/// and reinitialized whenever the device reconnects.
#[derive(Clone, Debug)]
pub struct PacketDecoder {
    config: DecoderConfig,
    clock: BleClock,
    tokens: TokenSource,
    armed: Option<TimerToken>,
    scratch: Vec<u8>,
}
impl PacketDecoder {
    /// Create a decoder with the given configuration.
    ///
    /// The decoder starts waiting for stable timestamps if configured to, but no stabilization
    /// timeout is armed until [`initialize`](#method.initialize) or
    /// [`start_stabilization_timeout`](#method.start_stabilization_timeout) is called.
    pub fn new(config: DecoderConfig) -> PacketDecoder {
        PacketDecoder {
            clock: BleClock::new(
                config.timestamp_error_threshold_ms,
                config.wait_until_stable,
            ),
            config,
            tokens: TokenSource::new(TimerKind::Stabilization),
            armed: None,
            scratch: Vec::new(),
        }
    }

    /// Reset the decoder state, so that the next decoded fragment has a delta of 0, and start
    /// waiting for the timestamps to stabilize.
    pub fn initialize(&mut self, timers: &mut dyn Scheduler) {
        self.clock = BleClock::new(
            self.config.timestamp_error_threshold_ms,
            self.config.wait_until_stable,
        );
        if self.config.wait_until_stable {
            self.start_stabilization_timeout(timers);
        } else if let Some(token) = self.armed.take() {
            timers.cancel(token);
        }
    }

    /// Choose whether to discard fragments until the timestamps stabilize.
    #[inline]
    pub fn set_wait_until_stable(&mut self, wait: bool) {
        self.clock.set_awaiting_stability(wait);
    }

    /// Whether fragments are currently being discarded.
    #[inline]
    pub fn is_waiting_until_stable(&self) -> bool {
        self.clock.awaiting_stability()
    }

    /// (Re)arm the timeout after which the decoder stops waiting for stable timestamps.
    pub fn start_stabilization_timeout(&mut self, timers: &mut dyn Scheduler) {
        if let Some(token) = self.armed.take() {
            timers.cancel(token);
        }
        let token = self.tokens.next();
        timers.arm(token, self.config.stabilization_timeout_ms);
        self.armed = Some(token);
    }

    /// Notify the decoder that a timer expired.
    ///
    /// Tokens that do not belong to this decoder, or that were superseded, are ignored.
    pub fn fire(&mut self, token: TimerToken) {
        if self.armed != Some(token) {
            return;
        }
        self.armed = None;
        if self.clock.awaiting_stability() {
            info!(
                timeout_ms = self.config.stabilization_timeout_ms,
                "timeout waiting for timestamp stabilization"
            );
            self.clock.set_awaiting_stability(false);
        }
    }

    /// Decode a BLE-MIDI packet, calling `handle` for every decoded fragment.
    ///
    /// `host_ms` is the time at which the host received the packet, in milliseconds.
    ///
    /// Malformed packets are logged and dropped without altering the decoder state.
    /// If the packet violates the MIDI protocol midway, fragments decoded up to that point are
    /// kept and the remainder of the packet is dropped.
    ///
    /// While a packet continues a system exclusive message, a timestamp byte followed by a data
    /// byte resumes the system exclusive data, typically after an interleaved realtime message.
    /// It is not read as a channel message with running status.
    pub fn decode(&mut self, host_ms: f64, raw: &[u8], mut handle: impl FnMut(Fragment)) {
        let header = match PacketHeader::parse(raw) {
            Ok(header) => header,
            Err(err) => {
                warn!(len = raw.len(), "dropping ble-midi packet: {}", err);
                return;
            }
        };
        self.clock
            .set_header(header.timestamp_high, header.timestamp_low, host_ms);
        if let Err(err) = self
            .decode_body(header, &raw[1..], &mut handle)
            .context(err_protocol!("failed to decode packet body"))
        {
            warn!("dropping rest of ble-midi packet: {:?}", err);
        }
    }

    fn decode_body(
        &mut self,
        header: PacketHeader,
        mut raw: &[u8],
        handle: &mut impl FnMut(Fragment),
    ) -> Result<()> {
        let mut running_status: Option<u8> = None;
        let mut continuing_sysex = header.continues_sysex();
        while let Some(&byte) = raw.first() {
            let next_is_status = raw.get(1).map_or(false, |next| next & 0x80 != 0);
            let (ts_low, status) = if byte & 0x80 != 0 && next_is_status {
                //Timestamp and status byte
                let status = raw[1];
                raw = &raw[2..];
                (Some(byte & 0x7F), Some(status))
            } else if byte & 0x80 != 0 {
                //Timestamp and running status, or sysex data resuming after a realtime message
                raw = &raw[1..];
                if continuing_sysex {
                    (Some(byte & 0x7F), Some(SYSEX_START))
                } else {
                    (Some(byte & 0x7F), running_status)
                }
            } else if continuing_sysex {
                (None, Some(SYSEX_START))
            } else {
                //No timestamp and running status
                (None, running_status)
            };
            let status = status.ok_or(err_protocol!("data byte with no running status"))?;

            self.scratch.clear();
            let sysex_continues;
            if let Some(len) = MidiMessage::data_len(status) {
                let data = raw
                    .split_checked(len)
                    .ok_or(err_protocol!("truncated channel message"))?;
                ensure!(
                    data.iter().all(|byte| byte & 0x80 == 0),
                    err_protocol!("channel message data byte with top bit set")
                );
                self.scratch.push(status);
                self.scratch.extend_from_slice(data);
                running_status = Some(status);
                continuing_sysex = false;
                sysex_continues = false;
            } else if is_realtime(status) {
                self.scratch.push(status);
                sysex_continues = false;
            } else {
                //System exclusive or system common, up to the next byte with the top bit set
                if !continuing_sysex || status != SYSEX_START {
                    self.scratch.push(status);
                }
                let run = raw.iter().take_while(|byte| **byte & 0x80 == 0).count();
                self.scratch.extend_from_slice(&raw[..run]);
                raw = &raw[run..];
                continuing_sysex = status == SYSEX_START;
                sysex_continues = continuing_sysex;
            }

            //Only a fragment that decoded cleanly advances the clock, so an aborted one leaves its
            //time to the next fragment
            let delta = self.clock.fragment_delta(ts_low);
            if self.clock.awaiting_stability() {
                trace!(len = self.scratch.len(), "discarding fragment until timestamps stabilize");
                continue;
            }
            let delta = if delta < 0 {
                warn!(delta, "negative fragment delta, clamping to 0");
                0
            } else {
                delta.min(u32::MAX as i64) as u32
            };
            handle(Fragment {
                delta,
                bytes: &self.scratch,
                sysex_continues,
            });
        }
        Ok(())
    }
}
