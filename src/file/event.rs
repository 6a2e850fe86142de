//! Track events: MIDI messages, SysEx events and meta events as they
//! appear inside an `MTrk` chunk.

use crate::errors::{Error, ErrorKind, Result};
use crate::file::vlq::write_vlq;
use crate::message::MidiMessage;

/// One `<delta-time> <event>` pair of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackEvent {
    /// Ticks since the previous event of the track.
    pub delta: u32,
    pub message: TrackMessage,
}

impl TrackEvent {
    pub fn new(delta: u32, message: TrackMessage) -> TrackEvent {
        TrackEvent { delta, message }
    }

    /// The channel/system message, when this is a MIDI or SysEx event.
    pub fn midi(&self) -> Option<&MidiMessage> {
        match &self.message {
            TrackMessage::Midi(m) | TrackMessage::SysEx(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_end_of_track(&self) -> bool {
        matches!(self.message, TrackMessage::Meta(MetaEvent::EndOfTrack))
    }
}

/// `<event> = <MIDI event> | <sysex event> | <meta-event>`
#[derive(Debug, Clone, PartialEq)]
pub enum TrackMessage {
    /// A channel message. Running status applies within a track.
    Midi(MidiMessage),
    /// An `F0` system-exclusive event, reconstructed with its leading
    /// `F0` byte.
    SysEx(MidiMessage),
    /// An `F7` escape event: raw bytes emitted verbatim on playback.
    Escape(Vec<u8>),
    Meta(MetaEvent),
}

impl From<MidiMessage> for TrackMessage {
    fn from(m: MidiMessage) -> TrackMessage {
        if m.is_sysex() {
            TrackMessage::SysEx(m)
        } else {
            TrackMessage::Midi(m)
        }
    }
}

/// `FF <type> <length> <data>` events.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaEvent {
    /// `FF 00 02 ssss`; `None` when the length-0 form was used.
    SequenceNumber(Option<u16>),
    /// `FF 01`
    Text(String),
    /// `FF 02`
    Copyright(String),
    /// `FF 03`
    TrackName(String),
    /// `FF 04`
    InstrumentName(String),
    /// `FF 05`
    Lyric(String),
    /// `FF 06`
    Marker(String),
    /// `FF 07`
    CuePoint(String),
    /// `FF 08`
    ProgramName(String),
    /// `FF 09`
    DeviceName(String),
    /// `FF 20 01 cc`
    ChannelPrefix(u8),
    /// `FF 21 01 pp`
    PortPrefix(u8),
    /// `FF 2F 00`, mandatory as the last event of every track.
    EndOfTrack,
    /// `FF 51 03 tttttt`: microseconds per quarter note.
    SetTempo(u32),
    /// `FF 54 05 hr mn se fr ff`
    SmpteOffset {
        hr: u8,
        mn: u8,
        se: u8,
        fr: u8,
        ff: u8,
    },
    /// `FF 58 04 nn dd cc bb`; `dd` is the negative power of two of the
    /// denominator.
    TimeSignature {
        numerator: u8,
        denominator_pow2: u8,
        clocks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    },
    /// `FF 59 02 sf mi`
    KeySignature { accidentals: i8, minor: bool },
    /// `FF 7F len data`
    SequencerSpecific(Vec<u8>),
    /// Any type this library does not interpret; carried verbatim.
    Unknown { meta_type: u8, data: Vec<u8> },
}

impl MetaEvent {
    pub(crate) fn from_raw(meta_type: u8, data: &[u8]) -> Result<MetaEvent> {
        let text = || String::from_utf8_lossy(data).into_owned();
        Ok(match meta_type {
            0x00 => match data.len() {
                0 => MetaEvent::SequenceNumber(None),
                2 => MetaEvent::SequenceNumber(Some(u16::from_be_bytes([data[0], data[1]]))),
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x01 => MetaEvent::Text(text()),
            0x02 => MetaEvent::Copyright(text()),
            0x03 => MetaEvent::TrackName(text()),
            0x04 => MetaEvent::InstrumentName(text()),
            0x05 => MetaEvent::Lyric(text()),
            0x06 => MetaEvent::Marker(text()),
            0x07 => MetaEvent::CuePoint(text()),
            0x08 => MetaEvent::ProgramName(text()),
            0x09 => MetaEvent::DeviceName(text()),
            0x20 => match data {
                [channel] => MetaEvent::ChannelPrefix(*channel),
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x21 => match data {
                [port] => MetaEvent::PortPrefix(*port),
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x2F => {
                if !data.is_empty() {
                    return Err(Error::core(ErrorKind::Malformed));
                }
                MetaEvent::EndOfTrack
            }
            0x51 => match data {
                [a, b, c] => MetaEvent::SetTempo(u32::from_be_bytes([0, *a, *b, *c])),
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x54 => match data {
                [hr, mn, se, fr, ff] => MetaEvent::SmpteOffset {
                    hr: *hr,
                    mn: *mn,
                    se: *se,
                    fr: *fr,
                    ff: *ff,
                },
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x58 => match data {
                [nn, dd, cc, bb] => MetaEvent::TimeSignature {
                    numerator: *nn,
                    denominator_pow2: *dd,
                    clocks_per_click: *cc,
                    thirty_seconds_per_quarter: *bb,
                },
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x59 => match data {
                [sf, mi] => MetaEvent::KeySignature {
                    accidentals: *sf as i8,
                    minor: *mi == 1,
                },
                _ => return Err(Error::core(ErrorKind::Malformed)),
            },
            0x7F => MetaEvent::SequencerSpecific(data.to_vec()),
            _ => MetaEvent::Unknown {
                meta_type,
                data: data.to_vec(),
            },
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        out.push(0xFF);
        let (meta_type, data): (u8, Vec<u8>) = match self {
            MetaEvent::SequenceNumber(None) => (0x00, Vec::new()),
            MetaEvent::SequenceNumber(Some(n)) => (0x00, n.to_be_bytes().to_vec()),
            MetaEvent::Text(s) => (0x01, s.as_bytes().to_vec()),
            MetaEvent::Copyright(s) => (0x02, s.as_bytes().to_vec()),
            MetaEvent::TrackName(s) => (0x03, s.as_bytes().to_vec()),
            MetaEvent::InstrumentName(s) => (0x04, s.as_bytes().to_vec()),
            MetaEvent::Lyric(s) => (0x05, s.as_bytes().to_vec()),
            MetaEvent::Marker(s) => (0x06, s.as_bytes().to_vec()),
            MetaEvent::CuePoint(s) => (0x07, s.as_bytes().to_vec()),
            MetaEvent::ProgramName(s) => (0x08, s.as_bytes().to_vec()),
            MetaEvent::DeviceName(s) => (0x09, s.as_bytes().to_vec()),
            MetaEvent::ChannelPrefix(c) => (0x20, vec![*c]),
            MetaEvent::PortPrefix(p) => (0x21, vec![*p]),
            MetaEvent::EndOfTrack => (0x2F, Vec::new()),
            MetaEvent::SetTempo(us) => (0x51, us.to_be_bytes()[1..].to_vec()),
            MetaEvent::SmpteOffset { hr, mn, se, fr, ff } => {
                (0x54, vec![*hr, *mn, *se, *fr, *ff])
            }
            MetaEvent::TimeSignature {
                numerator,
                denominator_pow2,
                clocks_per_click,
                thirty_seconds_per_quarter,
            } => (
                0x58,
                vec![
                    *numerator,
                    *denominator_pow2,
                    *clocks_per_click,
                    *thirty_seconds_per_quarter,
                ],
            ),
            MetaEvent::KeySignature { accidentals, minor } => {
                (0x59, vec![*accidentals as u8, u8::from(*minor)])
            }
            MetaEvent::SequencerSpecific(data) => (0x7F, data.clone()),
            MetaEvent::Unknown { meta_type, data } => (*meta_type, data.clone()),
        };
        out.push(meta_type);
        write_vlq(data.len() as u32, out);
        out.extend_from_slice(&data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(event: MetaEvent) {
        let mut bytes = Vec::new();
        event.write(&mut bytes);
        assert_eq!(bytes[0], 0xFF);
        let meta_type = bytes[1];
        let (len, used) = crate::file::vlq::read_vlq(&bytes[2..]).unwrap();
        let data = &bytes[2 + used..];
        assert_eq!(data.len(), len as usize);
        assert_eq!(MetaEvent::from_raw(meta_type, data).unwrap(), event);
    }

    #[test]
    fn meta_events_survive_serialization() {
        round_trip(MetaEvent::SequenceNumber(Some(3)));
        round_trip(MetaEvent::TrackName("lead".to_owned()));
        round_trip(MetaEvent::ChannelPrefix(9));
        round_trip(MetaEvent::EndOfTrack);
        round_trip(MetaEvent::SetTempo(500_000));
        round_trip(MetaEvent::SmpteOffset {
            hr: 1,
            mn: 2,
            se: 3,
            fr: 4,
            ff: 5,
        });
        round_trip(MetaEvent::TimeSignature {
            numerator: 6,
            denominator_pow2: 3,
            clocks_per_click: 36,
            thirty_seconds_per_quarter: 8,
        });
        round_trip(MetaEvent::KeySignature {
            accidentals: -3,
            minor: true,
        });
        round_trip(MetaEvent::SequencerSpecific(vec![0x42, 0x00]));
        round_trip(MetaEvent::Unknown {
            meta_type: 0x60,
            data: vec![1, 2, 3],
        });
    }

    #[test]
    fn tempo_is_24_bit() {
        let mut bytes = Vec::new();
        MetaEvent::SetTempo(500_000).write(&mut bytes);
        assert_eq!(bytes, [0xFF, 0x51, 0x03, 0x07, 0xA1, 0x20]);
    }
}
