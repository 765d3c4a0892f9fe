//! # Overview
//!
//! `bletrack` turns the notifications of a BLE-MIDI device into Standard Midi Files (SMF).
//!
//! The recording pipeline is made of small, synchronous stages that can be used on their own or
//! wired together through the [`Recorder`](struct.Recorder.html):
//!
//! - [`PacketDecoder`](struct.PacketDecoder.html) reconstructs a millisecond clock from the
//!   13-bit BLE-MIDI timestamps and splits packets into timed MIDI fragments.
//! - [`Reassembler`](struct.Reassembler.html) glues system exclusive fragments back together.
//! - [`MidiFilter`](struct.MidiFilter.html) drops unwanted messages without losing time.
//! - [`GapDetector`](struct.GapDetector.html) watches for silences between groups of notes.
//! - [`SmfEncoder`](struct.SmfEncoder.html) writes the recorded messages as a single-track SMF,
//!   one tick per millisecond.
//!
//! Usage of the whole pipeline is as simple as:
//!
//! ```rust
//! use bletrack::{timer::VirtualClock, Recorder, RecorderConfig};
//!
//! let mut recorder = Recorder::new(RecorderConfig::default());
//! let mut clock = VirtualClock::new();
//! recorder.start(&mut clock);
//!
//! // (host timestamp in milliseconds, raw packet) pairs, as received from the device
//! let packets: &[(f64, &[u8])] = &[
//!     (0.0, &[0x80, 0x80, 0x90, 0x3C, 0x40]),
//!     (250.0, &[0x81, 0xFA, 0x80, 0x3C, 0x00]),
//! ];
//! for &(host_ms, raw) in packets {
//!     recorder.push_packet(host_ms, raw, &mut clock);
//! }
//!
//! let file = recorder.build();
//! println!("recorded {} bytes of midi", file.len());
//! ```
//!
//! # About timers
//!
//! Two stages act after a period without input: the decoder stops waiting for the device clock
//! to stabilize, and the gap detector declares a gap.
//! Instead of spawning threads or requiring an async runtime, these stages request timers from a
//! [`Scheduler`](timer/trait.Scheduler.html) supplied by the caller, who hands expired timers back
//! through [`Recorder::fire`](struct.Recorder.html#method.fire).
//! The [`VirtualClock`](timer/struct.VirtualClock.html) scheduler is enough for offline
//! conversion and for tests.
//!
//! # About errors
//!
//! Recording never fails: malformed packets and protocol violations are logged through `tracing`
//! and dropped, and the pipeline carries on with the next packet.
//! Only the standalone parsing functions, such as
//! [`PacketHeader::parse`](struct.PacketHeader.html#method.parse), return errors.
//!
//! # About features
//!
//! - The `serde` feature derives `Serialize` and `Deserialize` for the configuration structs.
//! - The `cli` feature builds the `bletrack-replay` tool, which converts captures of timestamped
//!   packets into `.mid` files.

macro_rules! bail {
    ($err:expr) => {{
        return Err($err.into());
    }};
}
macro_rules! ensure {
    ($cond:expr, $err:expr) => {{
        if !$cond {
            bail!($err)
        }
    }};
}

/// All of the errors this crate produces.
#[macro_use]
mod error;

mod prelude {
    pub(crate) use crate::{
        error::{ErrorKind, Result, ResultExt, StdResult},
        io::{IoResult, Write},
        primitive::{u14, u15, u24, u28, u4, u7, SplitChecked},
    };
    pub(crate) use core::{fmt, mem};
    pub(crate) use std::{fs::File, io, path::Path};
    pub(crate) use tracing::{debug, info, trace, warn};
}

mod filter;
mod gap;
pub mod io;
mod message;
mod packet;
mod primitive;
mod reassemble;
mod recorder;
pub mod smf;
pub mod timer;
mod timestamp;

pub use crate::{
    error::{Error, ErrorKind, Result},
    filter::{FilterConfig, MidiFilter},
    gap::{Gap, GapConfig, GapDetector, CC_CHANNEL_MODE, CC_DAMPER, CC_SOSTENUTO},
    message::{is_realtime, MidiMessage, SYSEX_END, SYSEX_START},
    packet::{DecoderConfig, Fragment, PacketDecoder, PacketHeader},
    reassemble::Reassembler,
    recorder::{LogObserver, Observer, Recorder, RecorderConfig},
    smf::SmfEncoder,
    timestamp::{HostClock, TIMESTAMP_PERIOD},
};

/// Exotically-sized integers used by the MIDI standard, and the variable-length quantities of
/// Standard Midi Files.
pub mod num {
    pub use crate::primitive::{read_varlen, u14, u15, u24, u28, u4, u7};
}
