//! Encoding of recorded messages into a single-track Standard Midi File.

use crate::{
    io::IoWrap,
    message::SYSEX_START,
    prelude::*,
    primitive::write_varlen_slice,
};

/// Ticks per quarter note of every produced file.
pub const TICKS_PER_QUARTER: u15 = u15::new(480);

/// Microseconds per quarter note of every produced file.
///
/// Together with [`TICKS_PER_QUARTER`](constant.TICKS_PER_QUARTER.html), one tick lasts exactly
/// one millisecond.
pub const TEMPO: u24 = u24::new(480_000);

/// Meta event types.
pub mod meta {
    /// Sequence number, 2 bytes of binary data.
    pub const SEQUENCE_NUMBER: u8 = 0x00;
    /// Arbitrary text.
    pub const TEXT: u8 = 0x01;
    /// Copyright notice.
    pub const COPYRIGHT: u8 = 0x02;
    /// Name of the sequence or track.
    pub const TRACK_NAME: u8 = 0x03;
    /// Instrument name.
    pub const INSTRUMENT_NAME: u8 = 0x04;
    /// Lyric.
    pub const LYRIC: u8 = 0x05;
    /// Marker.
    pub const MARKER: u8 = 0x06;
    /// Cue point.
    pub const CUE_POINT: u8 = 0x07;
    /// Device name.
    pub const DEVICE_NAME: u8 = 0x09;
    /// MIDI channel prefix, 1 byte of binary data.
    pub const CHANNEL_PREFIX: u8 = 0x20;
    /// End of track. Written automatically.
    pub const END_OF_TRACK: u8 = 0x2F;
    /// Tempo in microseconds per quarter note. Written automatically.
    pub const TEMPO: u8 = 0x51;
    /// Time signature, 4 bytes of binary data.
    pub const TIME_SIGNATURE: u8 = 0x58;
    /// Key signature, 2 bytes of binary data.
    pub const KEY_SIGNATURE: u8 = 0x59;
}

/// Prepended to text meta events that are not pure ASCII.
const UTF8_MARKER: &str = "{@UTF-8}";

const HEADER_LEN: usize = 4 + 4 + 6 + 4 + 4;
/// `00 FF 51 03 tt tt tt`
const PROLOGUE_LEN: usize = 7;
/// `00 FF 2F 00`
const EPILOGUE_LEN: usize = 4;
/// Largest amount of event bytes that still fits in a 32-bit chunk length.
const MAX_TRACK_LEN: usize = u32::MAX as usize - PROLOGUE_LEN - EPILOGUE_LEN;

/// Accumulates timed MIDI messages and meta events into a track, and builds SMF files out of it.
///
/// The produced files are Format 0 with a single track, and use a fixed tempo so that delta
/// times in milliseconds can be written as ticks unchanged.
///
/// ```rust
/// use bletrack::{smf::meta, SmfEncoder};
///
/// let mut encoder = SmfEncoder::new();
/// encoder.meta_text(0, meta::TEXT, "take 1");
/// encoder.encode(0, &[0x90, 60, 100]);
/// encoder.encode(480, &[0x80, 60, 0]);
/// let file = encoder.build();
/// assert_eq!(&file[..4], b"MThd");
/// ```
#[derive(Clone, Debug, Default)]
pub struct SmfEncoder {
    track: Vec<u8>,
    /// Time of events that could not be encoded.
    carry: u32,
}
impl SmfEncoder {
    /// Create an encoder with an empty track.
    #[inline]
    pub fn new() -> SmfEncoder {
        SmfEncoder::default()
    }

    /// Clear the track, in order to start a new file.
    #[inline]
    pub fn initialize(&mut self) {
        self.track.clear();
        self.carry = 0;
    }

    /// Length in bytes of the events encoded so far, excluding the automatic tempo and
    /// end-of-track events.
    #[inline]
    pub fn track_len(&self) -> usize {
        self.track.len()
    }

    /// Whether no event has been encoded since the last initialization.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    /// Encode a raw MIDI message.
    ///
    /// Channel messages are written as-is, system exclusive messages become SMF sysex events and
    /// any other system message is escaped.
    /// Running status is never used: messages that do not start with a status byte are skipped,
    /// and their delta is added to the next event.
    pub fn encode(&mut self, delta: u32, msg: &[u8]) {
        match msg.first() {
            None => {
                debug!(delta, "not encoding empty message");
                self.carry = self.carry.saturating_add(delta);
            }
            Some(&status) if status < 0x80 => {
                warn!(delta, ?msg, "not encoding message without status byte");
                self.carry = self.carry.saturating_add(delta);
            }
            Some(&status) if status < 0xF0 => {
                self.push_event(delta, |out| out.write_all(msg));
            }
            Some(&SYSEX_START) => {
                self.push_event(delta, |out| {
                    out.write_all(&[0xF0])?;
                    write_varlen_slice(&msg[1..], out)
                });
            }
            Some(_) => {
                self.push_event(delta, |out| {
                    out.write_all(&[0xF7])?;
                    write_varlen_slice(msg, out)
                });
            }
        }
    }

    /// Encode a text meta event.
    ///
    /// Text that is not pure ASCII is written as UTF-8 prefixed by `{@UTF-8}`, so that readers
    /// expecting a legacy encoding can tell.
    pub fn meta_text(&mut self, delta: u32, ty: u8, text: &str) {
        if text.is_ascii() {
            self.meta_binary(delta, ty, text.as_bytes());
        } else {
            let marked = format!("{}{}", UTF8_MARKER, text);
            self.meta_binary(delta, ty, marked.as_bytes());
        }
    }

    /// Encode a meta event with arbitrary data.
    pub fn meta_binary(&mut self, delta: u32, ty: u8, data: &[u8]) {
        self.push_event(delta, |out| {
            out.write_all(&[0xFF, ty])?;
            write_varlen_slice(data, out)
        });
    }

    /// Append a delta time and an event to the track, atomically.
    fn push_event(
        &mut self,
        delta: u32,
        event: impl FnOnce(&mut Vec<u8>) -> IoResult<Vec<u8>>,
    ) {
        let start = self.track.len();
        let delta = self.carry.saturating_add(delta);
        let result = u28::saturating_from(delta)
            .write_varlen(&mut self.track)
            .and_then(|()| event(&mut self.track))
            .and_then(|()| {
                if self.track.len() > MAX_TRACK_LEN {
                    Err("track exceeds 32 bit chunk length")
                } else {
                    Ok(())
                }
            });
        match result {
            Ok(()) => self.carry = 0,
            Err(err) => {
                warn!(delta, "dropping smf event: {}", err);
                self.track.truncate(start);
                self.carry = delta;
            }
        }
    }

    /// Write the complete file into the given writer.
    pub fn write<W: Write>(&self, out: &mut W) -> IoResult<W> {
        //Track events are bounded by `MAX_TRACK_LEN`
        let track_len = (PROLOGUE_LEN + self.track.len() + EPILOGUE_LEN) as u32;

        let mut header = [0; HEADER_LEN];
        header[0..4].copy_from_slice(b"MThd");
        header[4..8].copy_from_slice(&6u32.to_be_bytes());
        //Format 0
        header[8..10].copy_from_slice(&0u16.to_be_bytes());
        //Track count
        header[10..12].copy_from_slice(&1u16.to_be_bytes());
        header[12..14].copy_from_slice(&TICKS_PER_QUARTER.as_int().to_be_bytes());
        header[14..18].copy_from_slice(b"MTrk");
        header[18..22].copy_from_slice(&track_len.to_be_bytes());
        out.write_all(&header)?;

        let tempo = TEMPO.as_int().to_be_bytes();
        out.write_all(&[0x00, 0xFF, meta::TEMPO, 0x03, tempo[1], tempo[2], tempo[3]])?;
        out.write_all(&self.track)?;
        out.write_all(&[0x00, 0xFF, meta::END_OF_TRACK, 0x00])?;
        Ok(())
    }

    /// Build the complete file in memory.
    pub fn build(&self) -> Vec<u8> {
        let mut file =
            Vec::with_capacity(HEADER_LEN + PROLOGUE_LEN + self.track.len() + EPILOGUE_LEN);
        let built: IoResult<Vec<u8>> = self.write(&mut file);
        if let Err(err) = built {
            //Writing to a `Vec` never fails
            warn!("failed to build smf: {}", err);
        }
        file
    }

    /// Write the complete file to the given path, creating or truncating it.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fn save_impl(encoder: &SmfEncoder, path: &Path) -> io::Result<()> {
            let mut out = IoWrap(io::BufWriter::new(File::create(path)?));
            encoder.write(&mut out)?;
            io::Write::flush(&mut out.0)
        }
        save_impl(self, path.as_ref())
    }
}
