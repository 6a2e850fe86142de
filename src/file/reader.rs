use log::{debug, trace, warn};

use crate::errors::{Error, ErrorKind, Result};
use crate::file::event::{MetaEvent, TrackEvent, TrackMessage};
use crate::file::vlq::read_vlq;
use crate::file::{Division, Format};
use crate::message::{channel_voice_data_len, is_channel_voice_status, MidiMessage};

/// Outcome of a successful parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseVerdict {
    /// Every track terminated with the mandatory end-of-track event.
    Validated,
    /// The file was readable but violated a should-level rule (e.g. a
    /// track without end-of-track).
    ParsedWithWarnings,
}

/// A parsed Standard MIDI File.
#[derive(Debug)]
pub struct SmfReader {
    pub format: Format,
    pub division: Division,
    /// One event list per `MTrk` chunk, in file order.
    pub tracks: Vec<Vec<TrackEvent>>,
    verdict: ParseVerdict,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Cursor<'a> {
        Cursor { data, pos: 0 }
    }

    fn is_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::core(ErrorKind::Truncated));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::core(ErrorKind::Truncated))
    }

    fn u16_be(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32_be(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn vlq(&mut self) -> Result<u32> {
        let (value, used) = read_vlq(&self.data[self.pos..])?;
        self.pos += used;
        Ok(value)
    }

    fn expect_tag(&mut self, tag: &[u8; 4]) -> Result<()> {
        if self.take(4)? != tag {
            return Err(Error::core(ErrorKind::Malformed));
        }
        Ok(())
    }
}

impl SmfReader {
    /// Parses a complete file image.
    ///
    /// Hard format violations (bad header, bad chunk structure, undecodable
    /// events) are errors; should-level violations degrade the verdict to
    /// [`ParseVerdict::ParsedWithWarnings`].
    pub fn parse(bytes: &[u8]) -> Result<SmfReader> {
        let mut cursor = Cursor::new(bytes);
        trace!("parsing header chunk");
        cursor.expect_tag(b"MThd")?;
        let header_len = cursor.u32_be()?;
        if header_len < 6 {
            return Err(Error::core(ErrorKind::Malformed));
        }
        let format = Format::from_u16(cursor.u16_be()?)?;
        let ntracks = cursor.u16_be()?;
        let division = Division::from_raw(cursor.u16_be()? as i16)?;
        // skip any header extension
        cursor.take(header_len as usize - 6)?;

        if ntracks == 0 {
            return Err(Error::core(ErrorKind::Malformed));
        }
        if format == Format::Single && ntracks != 1 {
            return Err(Error::core(ErrorKind::Malformed));
        }

        let mut verdict = ParseVerdict::Validated;
        let mut tracks = Vec::with_capacity(ntracks as usize);
        for index in 0..ntracks {
            trace!("parsing track chunk {index} of {ntracks}");
            cursor.expect_tag(b"MTrk")?;
            let length = cursor.u32_be()? as usize;
            let chunk = cursor.take(length)?;
            let track = parse_track(chunk, &mut verdict)?;
            tracks.push(track);
        }

        debug!(
            "parsed {} tracks, format {:?}, division {:?}",
            tracks.len(),
            format,
            division
        );
        Ok(SmfReader {
            format,
            division,
            tracks,
            verdict,
        })
    }

    /// `Validated` iff every track ended with end-of-track.
    pub fn verdict(&self) -> ParseVerdict {
        self.verdict
    }
}

fn parse_track(chunk: &[u8], verdict: &mut ParseVerdict) -> Result<Vec<TrackEvent>> {
    let mut cursor = Cursor::new(chunk);
    let mut events = Vec::new();
    // running status does not carry across tracks
    let mut running_status: Option<u8> = None;
    let mut terminated = false;

    while !cursor.is_end() {
        let delta = cursor.vlq()?;
        let message = parse_event(&mut cursor, &mut running_status)?;
        trace!("delta {delta}, event {message:?}");
        let event = TrackEvent::new(delta, message);
        let is_end = event.is_end_of_track();
        events.push(event);
        if is_end {
            terminated = true;
            if !cursor.is_end() {
                warn!("end-of-track before the end of the chunk, skipping trailing bytes");
                *verdict = ParseVerdict::ParsedWithWarnings;
            }
            break;
        }
    }

    if !terminated {
        warn!("track is missing the end-of-track event");
        *verdict = ParseVerdict::ParsedWithWarnings;
    }
    Ok(events)
}

fn parse_event(cursor: &mut Cursor, running_status: &mut Option<u8>) -> Result<TrackMessage> {
    let first = cursor.peek()?;
    match first {
        0xFF => {
            cursor.u8()?;
            let meta_type = cursor.u8()?;
            let length = cursor.vlq()? as usize;
            let data = cursor.take(length)?;
            // meta events cancel running status
            *running_status = None;
            Ok(TrackMessage::Meta(MetaEvent::from_raw(meta_type, data)?))
        }
        0xF0 => {
            cursor.u8()?;
            let length = cursor.vlq()? as usize;
            let data = cursor.take(length)?;
            *running_status = None;
            let mut bytes = Vec::with_capacity(length + 1);
            bytes.push(0xF0);
            bytes.extend_from_slice(data);
            Ok(TrackMessage::SysEx(MidiMessage::from_bytes(bytes, 0)))
        }
        0xF7 => {
            cursor.u8()?;
            let length = cursor.vlq()? as usize;
            let data = cursor.take(length)?;
            *running_status = None;
            Ok(TrackMessage::Escape(data.to_vec()))
        }
        status if is_channel_voice_status(status) => {
            cursor.u8()?;
            *running_status = Some(status);
            read_channel_message(cursor, status)
        }
        data if data < 0x80 => {
            let status = running_status.ok_or_else(|| Error::core(ErrorKind::Malformed))?;
            read_channel_message(cursor, status)
        }
        // F1-F6 system common bytes have no defined encoding in a file
        _ => Err(Error::core(ErrorKind::Malformed)),
    }
}

fn read_channel_message(cursor: &mut Cursor, status: u8) -> Result<TrackMessage> {
    let len = channel_voice_data_len(status);
    let mut bytes = Vec::with_capacity(len + 1);
    bytes.push(status);
    for _ in 0..len {
        let byte = cursor.u8()?;
        if byte >= 0x80 {
            return Err(Error::core(ErrorKind::Malformed));
        }
        bytes.push(byte);
    }
    Ok(TrackMessage::Midi(MidiMessage::from_bytes(bytes, 0)))
}
