use std::io::{self, Write};

use log::debug;

use crate::file::event::{MetaEvent, TrackEvent, TrackMessage};
use crate::file::vlq::write_vlq;
use crate::file::{Division, Format};
use crate::message::{is_channel_voice_status, MidiMessage};

/// Builds and serializes a Standard MIDI File.
///
/// Events are collected per track with [`add_event`](SmfWriter::add_event);
/// [`write`](SmfWriter::write) emits the header and track chunks, using
/// running status where legal and terminating every track with the
/// mandatory end-of-track event.
#[derive(Default)]
pub struct SmfWriter {
    pub division: Division,
    tracks: Vec<Vec<TrackEvent>>,
}

impl SmfWriter {
    pub fn new() -> SmfWriter {
        SmfWriter::default()
    }

    pub fn with_division(division: Division) -> SmfWriter {
        SmfWriter {
            division,
            tracks: Vec::new(),
        }
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Appends an event to `track`, creating intermediate empty tracks as
    /// needed. `delta` is in ticks since the previous event of that track.
    pub fn add_event(&mut self, delta: u32, track: usize, message: impl Into<TrackMessage>) {
        if self.tracks.len() <= track {
            self.tracks.resize_with(track + 1, Vec::new);
        }
        self.tracks[track].push(TrackEvent::new(delta, message.into()));
    }

    /// Convenience for channel/SysEx messages.
    pub fn add_message(&mut self, delta: u32, track: usize, message: MidiMessage) {
        self.add_event(delta, track, message);
    }

    /// Serializes the file. Format is 0 for a single track, 1 otherwise.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let format = if self.tracks.len() <= 1 {
            Format::Single
        } else {
            Format::Multi
        };
        debug!(
            "writing {} tracks, format {:?}, division {:?}",
            self.tracks.len(),
            format,
            self.division
        );

        writer.write_all(b"MThd")?;
        writer.write_all(&6u32.to_be_bytes())?;
        writer.write_all(&format.to_u16().to_be_bytes())?;
        writer.write_all(&(self.tracks.len() as u16).to_be_bytes())?;
        writer.write_all(&self.division.to_raw().to_be_bytes())?;

        for track in &self.tracks {
            let body = serialize_track(track);
            writer.write_all(b"MTrk")?;
            writer.write_all(&(body.len() as u32).to_be_bytes())?;
            writer.write_all(&body)?;
        }
        Ok(())
    }
}

fn serialize_track(events: &[TrackEvent]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut running_status: Option<u8> = None;
    let mut terminated = false;

    for event in events {
        if terminated {
            break;
        }
        write_vlq(event.delta, &mut out);
        match &event.message {
            TrackMessage::Midi(m) => {
                let Some((&status, data)) = m.bytes.split_first() else {
                    continue;
                };
                if is_channel_voice_status(status) {
                    if running_status != Some(status) {
                        out.push(status);
                        running_status = Some(status);
                    }
                    out.extend_from_slice(data);
                } else {
                    // system messages are not legal as bare track events;
                    // emit them as an escape so the bytes survive
                    running_status = None;
                    out.push(0xF7);
                    write_vlq(m.bytes.len() as u32, &mut out);
                    out.extend_from_slice(&m.bytes);
                }
            }
            TrackMessage::SysEx(m) => {
                running_status = None;
                let data = match m.bytes.split_first() {
                    Some((&0xF0, rest)) => rest,
                    _ => &m.bytes[..],
                };
                out.push(0xF0);
                write_vlq(data.len() as u32, &mut out);
                out.extend_from_slice(data);
            }
            TrackMessage::Escape(data) => {
                running_status = None;
                out.push(0xF7);
                write_vlq(data.len() as u32, &mut out);
                out.extend_from_slice(data);
            }
            TrackMessage::Meta(meta) => {
                running_status = None;
                meta.write(&mut out);
                if matches!(meta, MetaEvent::EndOfTrack) {
                    terminated = true;
                }
            }
        }
    }

    if !terminated {
        write_vlq(0, &mut out);
        MetaEvent::EndOfTrack.write(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::reader::{ParseVerdict, SmfReader};

    #[test]
    fn empty_writer_produces_a_header_only_file() {
        let writer = SmfWriter::new();
        let mut bytes = Vec::new();
        writer.write(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"MThd");
        assert_eq!(bytes.len(), 14);
    }

    #[test]
    fn tracks_always_end_with_end_of_track() {
        let mut writer = SmfWriter::new();
        writer.add_message(0, 0, MidiMessage::note_on(0, 60, 100));
        let mut bytes = Vec::new();
        writer.write(&mut bytes).unwrap();

        let reader = SmfReader::parse(&bytes).unwrap();
        assert_eq!(reader.verdict(), ParseVerdict::Validated);
        assert!(reader.tracks[0].last().unwrap().is_end_of_track());
    }

    #[test]
    fn running_status_collapses_repeated_statuses() {
        let mut writer = SmfWriter::new();
        writer.add_message(0, 0, MidiMessage::note_on(2, 60, 100));
        writer.add_message(10, 0, MidiMessage::note_on(2, 62, 100));
        writer.add_message(10, 0, MidiMessage::note_off(2, 60, 0));
        let mut bytes = Vec::new();
        writer.write(&mut bytes).unwrap();

        // one 0x92 in the whole file
        let count = bytes.iter().filter(|&&b| b == 0x92).count();
        assert_eq!(count, 1);

        // and the reader reconstructs all three messages
        let reader = SmfReader::parse(&bytes).unwrap();
        let midi: Vec<_> = reader.tracks[0]
            .iter()
            .filter_map(|e| e.midi().cloned())
            .collect();
        assert_eq!(midi.len(), 3);
        assert_eq!(midi[1].bytes, vec![0x92, 62, 100]);
        assert_eq!(midi[2].bytes, vec![0x82, 60, 0]);
    }

    #[test]
    fn division_is_written_verbatim() {
        let mut writer = SmfWriter::with_division(Division::Smpte {
            frames_per_second: 25,
            ticks_per_frame: 40,
        });
        writer.add_message(0, 0, MidiMessage::note_on(0, 60, 1));
        let mut bytes = Vec::new();
        writer.write(&mut bytes).unwrap();
        let reader = SmfReader::parse(&bytes).unwrap();
        assert_eq!(
            reader.division,
            Division::Smpte {
                frames_per_second: 25,
                ticks_per_frame: 40
            }
        );
    }
}
