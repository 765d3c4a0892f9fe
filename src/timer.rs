//! One-shot timers, expressed as requests to the host instead of real callbacks.
//!
//! The recording pipeline is synchronous and single-threaded, yet two of its stages need to act
//! after a period with no input: the packet decoder gives up waiting for stable timestamps, and
//! the gap detector declares a gap after a period of silence.
//!
//! Instead of spawning timers, these stages ask a [`Scheduler`](trait.Scheduler.html) to arm or
//! cancel a [`TimerToken`](struct.TimerToken.html).
//! Whoever drives the pipeline must hand expired tokens back through the owner's `fire` method
//! (see [`Recorder::fire`](../struct.Recorder.html#method.fire)), serialized with regular input.
//!
//! Firing a token that was cancelled or superseded is harmless: owners only react to the token
//! they armed last, so every arm fires at most once.

use crate::prelude::*;

/// Which pipeline stage a timer belongs to.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum TimerKind {
    /// The packet decoder stops waiting for the device clock to stabilize.
    Stabilization,
    /// The gap detector declares a gap after a period of inactivity.
    Gap,
}

/// Identifies one arming of a timer.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct TimerToken {
    kind: TimerKind,
    generation: u64,
}
impl TimerToken {
    pub(crate) fn new(kind: TimerKind, generation: u64) -> TimerToken {
        TimerToken { kind, generation }
    }

    /// The stage that armed this timer.
    #[inline]
    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

/// Hands out fresh tokens of a single kind.
#[derive(Clone, Debug)]
pub(crate) struct TokenSource {
    kind: TimerKind,
    generation: u64,
}
impl TokenSource {
    pub(crate) fn new(kind: TimerKind) -> TokenSource {
        TokenSource {
            kind,
            generation: 0,
        }
    }

    pub(crate) fn next(&mut self) -> TimerToken {
        self.generation += 1;
        TimerToken::new(self.kind, self.generation)
    }
}

/// Something that can run one-shot timers on behalf of the pipeline.
pub trait Scheduler {
    /// Request `token` to be fired once, `after_ms` milliseconds from now.
    fn arm(&mut self, token: TimerToken, after_ms: u32);

    /// Withdraw a previously armed token.
    /// Cancelling a token that already fired or was never armed does nothing.
    fn cancel(&mut self, token: TimerToken);
}

/// A `Scheduler` that never fires anything.
///
/// Useful when timeouts are not wanted at all, such as when converting a complete capture where
/// only explicit gaps matter.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoTimers;
impl Scheduler for NoTimers {
    #[inline]
    fn arm(&mut self, _token: TimerToken, _after_ms: u32) {}
    #[inline]
    fn cancel(&mut self, _token: TimerToken) {}
}

/// A scheduler driven by an explicit, virtual millisecond clock.
///
/// Time only moves when told to, which makes timeouts deterministic.
///
/// ```rust
/// use bletrack::timer::{Scheduler, VirtualClock};
/// # use bletrack::{GapConfig, GapDetector};
///
/// let mut clock = VirtualClock::new();
/// let mut gaps = GapDetector::new(GapConfig::default());
/// // Note on followed by note off: the detector arms its idle timer
/// gaps.detect(0, &[0x90, 60, 100], &mut clock, |_| {});
/// gaps.detect(250, &[0x80, 60, 0], &mut clock, |_| {});
///
/// let mut fired = 0;
/// while let Some(token) = clock.next_due(clock.now() + 1000) {
///     gaps.fire(token, |_gap| fired += 1);
/// }
/// assert_eq!(fired, 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: u64,
    seq: u64,
    pending: Vec<(u64, u64, TimerToken)>,
}
impl VirtualClock {
    /// Create a clock at time 0 with no pending timers.
    #[inline]
    pub fn new() -> VirtualClock {
        VirtualClock::default()
    }

    /// The current virtual time, in milliseconds.
    #[inline]
    pub fn now(&self) -> u64 {
        self.now
    }

    /// How many timers are currently armed.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to its due time.
    ///
    /// Returns `None` once no timer is due, leaving the clock at `until`.
    /// Timers armed while handling a fired token are taken into account by the next call.
    pub fn next_due(&mut self, until: u64) -> Option<TimerToken> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, (due, _, _))| *due <= until)
            .min_by_key(|(_, (due, seq, _))| (*due, *seq))
            .map(|(idx, _)| idx);
        match idx {
            Some(idx) => {
                let (due, _, token) = self.pending.remove(idx);
                self.now = self.now.max(due);
                Some(token)
            }
            None => {
                self.now = self.now.max(until);
                None
            }
        }
    }

    /// Move the clock forward by `ms`, collecting every token that became due.
    ///
    /// Unlike `next_due`, handlers cannot interleave with the firing order, so prefer `next_due`
    /// when fired tokens may arm new timers.
    pub fn advance(&mut self, ms: u64) -> Vec<TimerToken> {
        let until = self.now + ms;
        let mut fired = Vec::new();
        while let Some(token) = self.next_due(until) {
            fired.push(token);
        }
        fired
    }
}
impl Scheduler for VirtualClock {
    fn arm(&mut self, token: TimerToken, after_ms: u32) {
        self.seq += 1;
        trace!(?token, after_ms, "arming virtual timer");
        self.pending
            .push((self.now + after_ms as u64, self.seq, token));
    }

    fn cancel(&mut self, token: TimerToken) {
        self.pending.retain(|(_, _, armed)| *armed != token);
    }
}
