//! Detection of silent periods between groups of notes.
//!
//! A period counts as silent when no note is sounding and neither the damper nor the sostenuto
//! pedal is held down, on any channel.
//! Silences are reported either when a message arrives after a long enough delta, or through an
//! idle timer when nothing arrives at all.

use crate::{
    message::MidiMessage,
    prelude::*,
    timer::{Scheduler, TimerKind, TimerToken, TokenSource},
};

/// Controller number of the damper (hold) pedal.
pub const CC_DAMPER: u8 = 0x40;
/// Controller number of the sostenuto pedal.
pub const CC_SOSTENUTO: u8 = 0x42;
/// Controller numbers at and above this one are channel mode messages, such as "all notes off".
pub const CC_CHANNEL_MODE: u8 = 0x78;

/// Settings for the gap detector.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct GapConfig {
    /// Minimum silent period in milliseconds to be considered a gap.
    pub min_gap_ms: u32,
}
impl Default for GapConfig {
    fn default() -> GapConfig {
        GapConfig { min_gap_ms: 1000 }
    }
}

/// How a gap was detected.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Gap {
    /// A message arrived after a silence of `delta` milliseconds.
    ///
    /// The gap lies *before* the message that revealed it.
    Silence {
        /// The delta of the message that ended the silence.
        delta: u32,
    },
    /// The idle timer expired with nothing playing.
    Timeout,
}

/// Watches a MIDI message stream for gaps in the playing.
#[derive(Clone)]
pub struct GapDetector {
    config: GapConfig,
    notes: [[u32; 128]; 16],
    damper: [u8; 16],
    sostenuto: [u8; 16],
    no_notes: bool,
    no_pedals: bool,
    in_gap: bool,
    tokens: TokenSource,
    armed: Option<TimerToken>,
}
impl GapDetector {
    /// Create a detector, initially in a gap.
    pub fn new(config: GapConfig) -> GapDetector {
        GapDetector {
            config,
            notes: [[0; 128]; 16],
            damper: [0; 16],
            sostenuto: [0; 16],
            no_notes: true,
            no_pedals: true,
            in_gap: true,
            tokens: TokenSource::new(TimerKind::Gap),
            armed: None,
        }
    }

    /// Forget every note and pedal, and go back into a gap.
    ///
    /// An armed idle timer is disowned: firing it afterwards does nothing.
    pub fn initialize(&mut self) {
        self.notes = [[0; 128]; 16];
        self.damper = [0; 16];
        self.sostenuto = [0; 16];
        self.no_notes = true;
        self.no_pedals = true;
        self.in_gap = true;
        self.armed = None;
    }

    /// Whether the stream is currently in a gap.
    #[inline]
    pub fn is_in_gap(&self) -> bool {
        self.in_gap
    }

    /// Whether any note is sounding.
    #[inline]
    pub fn has_active_notes(&self) -> bool {
        !self.no_notes
    }

    /// Whether a damper or sostenuto pedal is held down on any channel.
    #[inline]
    pub fn has_active_pedals(&self) -> bool {
        !self.no_pedals
    }

    /// The configured minimum gap.
    #[inline]
    pub fn min_gap_ms(&self) -> u32 {
        self.config.min_gap_ms
    }

    /// Observe a message, calling `on_gap` if the silence before it is a gap.
    ///
    /// Afterwards, if nothing is playing, an idle timer is armed through `timers`, which must be
    /// handed back to [`fire`](#method.fire) when it expires.
    pub fn detect(
        &mut self,
        delta: u32,
        msg: &[u8],
        timers: &mut dyn Scheduler,
        mut on_gap: impl FnMut(Gap),
    ) {
        if let Some(token) = self.armed.take() {
            timers.cancel(token);
        }

        if !self.in_gap && self.no_notes && self.no_pedals && delta >= self.config.min_gap_ms {
            info!(delta, min_gap_ms = self.config.min_gap_ms, "gap detected: long delta");
            on_gap(Gap::Silence { delta });
        }
        self.in_gap = false;

        if let Some((channel, msg)) = MidiMessage::parse(msg) {
            let channel = channel.as_int() as usize;
            match msg {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => self.note_on(channel, key),
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    self.note_off(channel, key)
                }
                MidiMessage::Controller { controller, value } => match controller.as_int() {
                    CC_DAMPER => {
                        self.damper[channel] = value.as_int();
                        self.pedal_changed(value);
                    }
                    CC_SOSTENUTO => {
                        self.sostenuto[channel] = value.as_int();
                        self.pedal_changed(value);
                    }
                    cc if cc >= CC_CHANNEL_MODE => {
                        debug!(channel, controller = cc, "channel mode message, resetting");
                        self.initialize();
                    }
                    _ => {}
                },
                _ => {}
            }
        }

        if self.no_notes && self.no_pedals {
            let token = self.tokens.next();
            timers.arm(token, self.config.min_gap_ms);
            self.armed = Some(token);
        }
    }

    /// Notify the detector that a timer expired, calling `on_gap` if it was the idle timer.
    ///
    /// Tokens that were cancelled, superseded or not armed by this detector are ignored.
    pub fn fire(&mut self, token: TimerToken, mut on_gap: impl FnMut(Gap)) {
        if self.armed != Some(token) {
            return;
        }
        self.armed = None;
        if self.no_notes && self.no_pedals {
            self.in_gap = true;
            info!(min_gap_ms = self.config.min_gap_ms, "gap detected: timeout");
            on_gap(Gap::Timeout);
        }
    }

    fn note_on(&mut self, channel: usize, key: u7) {
        self.notes[channel][key.as_int() as usize] += 1;
        self.no_notes = false;
    }

    fn note_off(&mut self, channel: usize, key: u7) {
        let count = &mut self.notes[channel][key.as_int() as usize];
        *count = count.saturating_sub(1);
        if !self.any_note_on() {
            self.no_notes = true;
        }
    }

    fn pedal_changed(&mut self, value: u7) {
        if value.as_int() == 0 {
            if !self.any_pedal_on() {
                self.no_pedals = true;
            }
        } else {
            self.no_pedals = false;
        }
    }

    fn any_note_on(&self) -> bool {
        self.notes.iter().flatten().any(|&count| count != 0)
    }

    fn any_pedal_on(&self) -> bool {
        self.damper
            .iter()
            .zip(self.sostenuto.iter())
            .any(|(&damper, &sostenuto)| damper != 0 || sostenuto != 0)
    }
}
impl fmt::Debug for GapDetector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("GapDetector")
            .field("config", &self.config)
            .field("no_notes", &self.no_notes)
            .field("no_pedals", &self.no_pedals)
            .field("in_gap", &self.in_gap)
            .field("armed", &self.armed)
            .finish()
    }
}
