//! Gluing system exclusive fragments back into complete messages.

use crate::{
    message::{is_realtime, SYSEX_END, SYSEX_START},
    prelude::*,
};

/// Merges system exclusive fragments spread over several packets into single messages.
///
/// System realtime messages that arrive while a system exclusive message is incomplete are held
/// back and emitted right after it, in arrival order, each with the time elapsed since the
/// previous one.
/// No time is ever lost: whatever elapsed after the last piece of a system exclusive message is
/// carried over to the next emitted message.
#[derive(Clone, Debug, Default)]
pub struct Reassembler {
    sysex: Vec<u8>,
    realtime: Vec<(u32, u8)>,
    in_sysex: bool,
    sysex_start_delta: u32,
    after: u32,
    carry: u32,
}
impl Reassembler {
    /// Create an idle reassembler.
    #[inline]
    pub fn new() -> Reassembler {
        Reassembler::default()
    }

    /// Drop any partial message and pending time, as if freshly created.
    pub fn initialize(&mut self) {
        if self.in_sysex {
            debug!(
                len = self.sysex.len(),
                "discarding unterminated system exclusive message"
            );
        }
        self.sysex.clear();
        self.realtime.clear();
        self.in_sysex = false;
        self.sysex_start_delta = 0;
        self.after = 0;
        self.carry = 0;
    }

    /// Whether a system exclusive message is being buffered.
    #[inline]
    pub fn is_in_sysex(&self) -> bool {
        self.in_sysex
    }

    /// Feed a decoded fragment, calling `handle` with every message it completes.
    pub fn reassemble(&mut self, delta: u32, fragment: &[u8], mut handle: impl FnMut(u32, &[u8])) {
        let first = match fragment.first() {
            Some(&first) => first,
            None => {
                if self.in_sysex {
                    self.after = self.after.saturating_add(delta);
                } else {
                    self.carry = self.carry.saturating_add(delta);
                }
                return;
            }
        };
        if !self.in_sysex {
            match first {
                SYSEX_START => self.start(delta, fragment, &mut handle),
                SYSEX_END => {
                    warn!("unexpected end of exclusive with no start, dropping it");
                    self.carry = self.carry.saturating_add(delta);
                }
                first if first < 0x80 => {
                    warn!(
                        len = fragment.len(),
                        "system exclusive continuation with no start, dropping it"
                    );
                    self.carry = self.carry.saturating_add(delta);
                }
                _ => self.emit(delta, fragment, &mut handle),
            }
        } else if first < 0x80 {
            //Continuation
            self.sysex.extend_from_slice(fragment);
            self.after = self.after.saturating_add(delta);
            if fragment.last() == Some(&SYSEX_END) {
                self.flush(&mut handle);
            }
        } else if is_realtime(first) {
            self.realtime
                .push((self.after.saturating_add(delta), first));
            self.after = 0;
        } else if first == SYSEX_END {
            self.sysex.extend_from_slice(fragment);
            self.after = self.after.saturating_add(delta);
            self.flush(&mut handle);
        } else if first == SYSEX_START {
            debug!("system exclusive message interrupted by another one");
            self.flush(&mut handle);
            self.start(delta, fragment, &mut handle);
        } else {
            debug!(
                status = first,
                "system exclusive message interrupted without end of exclusive"
            );
            self.flush(&mut handle);
            self.emit(delta, fragment, &mut handle);
        }
    }

    fn emit(&mut self, delta: u32, msg: &[u8], handle: &mut impl FnMut(u32, &[u8])) {
        handle(self.carry.saturating_add(delta), msg);
        self.carry = 0;
    }

    fn start(&mut self, delta: u32, fragment: &[u8], handle: &mut impl FnMut(u32, &[u8])) {
        self.sysex.clear();
        self.sysex.extend_from_slice(fragment);
        self.sysex_start_delta = self.carry.saturating_add(delta);
        self.carry = 0;
        self.after = 0;
        self.in_sysex = true;
        if fragment.len() > 1 && fragment.last() == Some(&SYSEX_END) {
            //Already complete
            self.flush(handle);
        }
    }

    fn flush(&mut self, handle: &mut impl FnMut(u32, &[u8])) {
        handle(self.sysex_start_delta, &self.sysex);
        for &(delta, status) in self.realtime.iter() {
            handle(delta, &[status]);
        }
        self.sysex.clear();
        self.realtime.clear();
        self.carry = self.after;
        self.after = 0;
        self.sysex_start_delta = 0;
        self.in_sysex = false;
    }
}
