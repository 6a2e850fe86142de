//! Standard MIDI File reading and writing.
//!
//! [`SmfReader`] parses format 0/1/2 files: VLQ delta times, running
//! status (per track), `F0`/`F7` SysEx events and `FF` meta events.
//! [`SmfWriter`] serializes the inverse, using running status where legal
//! and terminating every track with the mandatory end-of-track event.

mod event;
mod reader;
pub(crate) mod vlq;
mod writer;

pub use event::{MetaEvent, TrackEvent, TrackMessage};
pub use reader::{ParseVerdict, SmfReader};
pub use writer::SmfWriter;

use crate::errors::{Error, ErrorKind, Result};

/// The file's track layout, from the header chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// A single multi-channel track.
    Single,
    /// One or more simultaneous tracks of one sequence.
    #[default]
    Multi,
    /// Sequentially independent single-track patterns.
    Sequential,
}

impl Format {
    pub(crate) fn from_u16(value: u16) -> Result<Format> {
        match value {
            0 => Ok(Format::Single),
            1 => Ok(Format::Multi),
            2 => Ok(Format::Sequential),
            _ => Err(Error::core(ErrorKind::Malformed)),
        }
    }

    pub(crate) fn to_u16(self) -> u16 {
        match self {
            Format::Single => 0,
            Format::Multi => 1,
            Format::Sequential => 2,
        }
    }
}

/// Meaning of delta-time ticks, from the header's division word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Division {
    /// Positive division: ticks per quarter note.
    TicksPerQuarter(u16),
    /// Negative division: SMPTE frames per second and ticks per frame.
    Smpte {
        frames_per_second: u8,
        ticks_per_frame: u8,
    },
}

impl Default for Division {
    fn default() -> Self {
        Division::TicksPerQuarter(480)
    }
}

impl Division {
    pub(crate) fn from_raw(raw: i16) -> Result<Division> {
        if raw >= 0 {
            Ok(Division::TicksPerQuarter(raw as u16))
        } else {
            let [hi, lo] = raw.to_be_bytes();
            let fps = (hi as i8).unsigned_abs();
            match fps {
                24 | 25 | 29 | 30 => Ok(Division::Smpte {
                    frames_per_second: fps,
                    ticks_per_frame: lo,
                }),
                _ => Err(Error::core(ErrorKind::Malformed)),
            }
        }
    }

    pub(crate) fn to_raw(self) -> i16 {
        match self {
            Division::TicksPerQuarter(ticks) => (ticks & 0x7FFF) as i16,
            Division::Smpte {
                frames_per_second,
                ticks_per_frame,
            } => i16::from_be_bytes([(-(frames_per_second as i8)) as u8, ticks_per_frame]),
        }
    }
}
