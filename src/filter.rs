//! Suppression of unwanted messages without losing time.

use crate::prelude::*;

/// The set of status bytes the filter drops.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct FilterConfig {
    /// Status bytes to suppress.
    ///
    /// By default, every system common and system realtime message except system exclusive
    /// (`F0` and `F7`) is dropped.
    pub drop: Vec<u8>,
}
impl Default for FilterConfig {
    fn default() -> FilterConfig {
        FilterConfig {
            drop: (0xF1..=0xF6).chain(0xF8..=0xFF).collect(),
        }
    }
}

/// Drops messages by status byte, folding their delta time into the next message that passes.
#[derive(Clone)]
pub struct MidiFilter {
    dropped: [bool; 256],
    carry: u32,
}
impl MidiFilter {
    /// Create a filter dropping the status bytes listed in `config`.
    pub fn new(config: &FilterConfig) -> MidiFilter {
        let mut dropped = [false; 256];
        for &status in config.drop.iter() {
            dropped[status as usize] = true;
        }
        MidiFilter { dropped, carry: 0 }
    }

    /// Forget any time accumulated from dropped messages.
    #[inline]
    pub fn initialize(&mut self) {
        self.carry = 0;
    }

    /// Whether messages with the given status byte are dropped.
    #[inline]
    pub fn drops(&self, status: u8) -> bool {
        self.dropped[status as usize]
    }

    /// Stop or start dropping a status byte.
    #[inline]
    pub fn set_drop(&mut self, status: u8, drop: bool) {
        self.dropped[status as usize] = drop;
    }

    /// Pass a message through the filter, calling `handle` if it survives.
    ///
    /// Empty messages and messages that do not start with a status byte never survive.
    pub fn filter(&mut self, delta: u32, msg: &[u8], handle: impl FnOnce(u32, &[u8])) {
        match msg.first() {
            Some(&status) if status < 0x80 => {
                warn!(?msg, delta, "message without status byte, dropping it");
                self.carry = self.carry.saturating_add(delta);
            }
            Some(&status) if !self.drops(status) => {
                let delta = self.carry.saturating_add(delta);
                self.carry = 0;
                handle(delta, msg);
            }
            _ => {
                trace!(?msg, delta, "filtering out message");
                self.carry = self.carry.saturating_add(delta);
            }
        }
    }
}
impl fmt::Debug for MidiFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dropped: Vec<String> = (0..=255u8)
            .filter(|&status| self.drops(status))
            .map(|status| format!("{:02X}", status))
            .collect();
        f.debug_struct("MidiFilter")
            .field("dropped", &dropped)
            .field("carry", &self.carry)
            .finish()
    }
}
