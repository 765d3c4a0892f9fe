//! Raw MIDI status classification and channel message parsing.

use crate::prelude::*;

/// Status byte of a system exclusive start.
pub const SYSEX_START: u8 = 0xF0;
/// Status byte of a system exclusive end ("EOX").
pub const SYSEX_END: u8 = 0xF7;

/// System realtime messages are one-byte messages that may appear anywhere in a stream, even in
/// the middle of a system exclusive message.
#[inline]
pub fn is_realtime(status: u8) -> bool {
    status >= 0xF8
}

/// Represents a MIDI message associated to a MIDI channel.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum MidiMessage {
    /// Stop playing a note.
    NoteOff {
        /// The MIDI key to stop playing.
        key: u7,
        /// The velocity with which to stop playing it.
        vel: u7,
    },
    /// Start playing a note.
    NoteOn {
        /// The key to start playing.
        key: u7,
        /// The velocity (strength) with which to press it.
        ///
        /// Note that by convention a `NoteOn` message with a velocity of 0 is equivalent to a
        /// `NoteOff`.
        vel: u7,
    },
    /// Modify the velocity of a note after it has been played.
    Aftertouch {
        /// The key for which to modify its velocity.
        key: u7,
        /// The new velocity for the key.
        vel: u7,
    },
    /// Modify the value of a MIDI controller.
    Controller {
        /// The controller to modify.
        controller: u7,
        /// The value to set it to.
        value: u7,
    },
    /// Change the program (also known as instrument) for a channel.
    ProgramChange {
        /// The new program to use for the channel.
        program: u7,
    },
    /// Change the note velocity of a whole channel at once, without starting new notes.
    ChannelAftertouch {
        /// The new velocity for all notes currently playing in the channel.
        vel: u7,
    },
    /// Set the pitch bend value for the entire channel.
    ///
    /// `0x2000` indicates no bend.
    PitchBend {
        /// The raw 14-bit bend value.
        bend: u14,
    },
}
impl MidiMessage {
    /// Channel messages have a known amount of data bytes, given by their status nibble.
    ///
    /// Returns `None` for system messages (`0xF0..=0xFF`) and data bytes.
    #[inline]
    pub fn data_len(status: u8) -> Option<usize> {
        const LENGTH_BY_STATUS: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 2, 2, 2, 2, 1, 1, 2, 0];
        match status {
            0x80..=0xEF => Some(LENGTH_BY_STATUS[(status >> 4) as usize] as usize),
            _ => None,
        }
    }

    /// Parse a complete channel message from its raw bytes, including the status byte.
    ///
    /// Returns `None` if the bytes are not a channel message, are truncated or carry data bytes
    /// with the top bit set.
    /// Extra trailing bytes are ignored.
    pub fn parse(raw: &[u8]) -> Option<(u4, MidiMessage)> {
        let (&status, data) = raw.split_first()?;
        let len = Self::data_len(status)?;
        let data = data.get(..len)?;
        let mut args = [u7::new(0); 2];
        for (arg, &byte) in args.iter_mut().zip(data) {
            *arg = u7::try_from(byte)?;
        }
        Some(Self::read(status, args))
    }

    /// Receives status byte and midi args separately.
    fn read(status: u8, data: [u7; 2]) -> (u4, MidiMessage) {
        let channel = u4::from(status);
        let msg = match status >> 4 {
            0x8 => MidiMessage::NoteOff {
                key: data[0],
                vel: data[1],
            },
            0x9 => MidiMessage::NoteOn {
                key: data[0],
                vel: data[1],
            },
            0xA => MidiMessage::Aftertouch {
                key: data[0],
                vel: data[1],
            },
            0xB => MidiMessage::Controller {
                controller: data[0],
                value: data[1],
            },
            0xC => MidiMessage::ProgramChange { program: data[0] },
            0xD => MidiMessage::ChannelAftertouch { vel: data[0] },
            _ => {
                //Note the little-endian order, contrasting with the default big-endian order of
                //Standard Midi Files
                let lsb = data[0].as_int() as u16;
                let msb = data[1].as_int() as u16;
                MidiMessage::PitchBend {
                    bend: u14::from(msb << 7 | lsb),
                }
            }
        };
        (channel, msg)
    }
}
