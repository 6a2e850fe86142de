//! Framing of raw byte and word streams into MIDI messages and UMPs.
//!
//! The decoders only frame; they never rewrite payload. Backends feed
//! whatever the OS hands them, together with a per-buffer timestamp, and
//! receive well-formed messages through a [`MessageSink`].

use log::warn;

use crate::errors::{Error, ErrorKind};
use crate::message::{
    channel_voice_data_len, is_channel_voice_status, is_realtime_byte, is_status_byte,
    system_common_data_len, MidiMessage,
};
use crate::ump::{words_for_type, Ump};

/// Receives framed messages and recoverable protocol violations.
///
/// The message handed to [`message`](MessageSink::message) lives in a
/// buffer owned by the decoder and is only valid for the duration of the
/// call; implementations that retain data must copy. The reference is
/// mutable so a sink may rewrite the timestamp in place before forwarding.
pub trait MessageSink {
    fn message(&mut self, message: &mut MidiMessage);

    fn warning(&mut self, error: Error) {
        let _ = error;
    }
}

impl MessageSink for Vec<MidiMessage> {
    fn message(&mut self, message: &mut MidiMessage) {
        self.push(message.clone());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecoderState {
    /// Awaiting a status byte (or a running-status data byte).
    Idle,
    /// Collecting the fixed number of data bytes of a channel message.
    ChannelVoice { status: u8, expected: usize },
    /// Like `ChannelVoice` but without running-status carry.
    SystemCommon { expected: usize },
    /// Appending to the SysEx buffer until `F7`.
    SysEx,
}

/// Streaming decoder for byte-oriented MIDI 1.0.
///
/// Handles running status, SysEx reassembly and real-time bytes
/// interleaved anywhere in the stream (including inside a SysEx), per the
/// MIDI 1.0 data format. One instance services one port; feeding it from
/// multiple threads requires external serialization.
pub struct MidiStreamDecoder {
    state: DecoderState,
    message: MidiMessage,
    realtime: MidiMessage,
    running_status: Option<u8>,
}

impl Default for MidiStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiStreamDecoder {
    pub fn new() -> MidiStreamDecoder {
        MidiStreamDecoder {
            state: DecoderState::Idle,
            message: MidiMessage::new(),
            realtime: MidiMessage::new(),
            running_status: None,
        }
    }

    /// Feeds a buffer of raw bytes stamped with `timestamp`.
    ///
    /// A message spanning several buffers keeps the timestamp of the buffer
    /// that carried its first byte.
    pub fn feed<S: MessageSink>(&mut self, bytes: &[u8], timestamp: i64, sink: &mut S) {
        for &byte in bytes {
            self.feed_byte(byte, timestamp, sink);
        }
    }

    /// Signals end-of-stream. A partially collected message is discarded
    /// with a `Truncated` warning.
    pub fn finish<S: MessageSink>(&mut self, sink: &mut S) {
        if self.state != DecoderState::Idle {
            sink.warning(Error::core(ErrorKind::Truncated));
            self.state = DecoderState::Idle;
        }
        self.message.bytes.clear();
    }

    fn feed_byte<S: MessageSink>(&mut self, byte: u8, timestamp: i64, sink: &mut S) {
        // Real-time bytes are standalone messages and leave the prevailing
        // state untouched, even mid-SysEx.
        if is_realtime_byte(byte) {
            self.realtime.bytes.clear();
            self.realtime.bytes.push(byte);
            self.realtime.timestamp = timestamp;
            sink.message(&mut self.realtime);
            return;
        }

        match self.state {
            DecoderState::Idle => self.feed_idle(byte, timestamp, sink),
            DecoderState::ChannelVoice { status, expected } => {
                if is_status_byte(byte) {
                    warn!("status byte 0x{byte:02X} interrupts a channel message, dropping it");
                    sink.warning(Error::core(ErrorKind::Malformed));
                    self.state = DecoderState::Idle;
                    self.feed_idle(byte, timestamp, sink);
                    return;
                }
                self.message.bytes.push(byte);
                if self.message.bytes.len() == expected + 1 {
                    self.running_status = Some(status);
                    self.emit(sink);
                }
            }
            DecoderState::SystemCommon { expected } => {
                if is_status_byte(byte) {
                    warn!("status byte 0x{byte:02X} interrupts a system message, dropping it");
                    sink.warning(Error::core(ErrorKind::Malformed));
                    self.state = DecoderState::Idle;
                    self.feed_idle(byte, timestamp, sink);
                    return;
                }
                self.message.bytes.push(byte);
                if self.message.bytes.len() == expected + 1 {
                    self.emit(sink);
                }
            }
            DecoderState::SysEx => {
                if byte == 0xF7 {
                    self.message.bytes.push(byte);
                    self.emit(sink);
                } else if is_status_byte(byte) {
                    // Terminator never arrived; emit what we have and
                    // reprocess the interrupting status.
                    warn!("SysEx interrupted by status byte 0x{byte:02X}, emitting truncated");
                    sink.warning(Error::core(ErrorKind::Malformed));
                    self.emit(sink);
                    self.feed_idle(byte, timestamp, sink);
                } else {
                    self.message.bytes.push(byte);
                }
            }
        }
    }

    fn feed_idle<S: MessageSink>(&mut self, byte: u8, timestamp: i64, sink: &mut S) {
        if !is_status_byte(byte) {
            // Data byte with no pending message: continue the previous
            // channel message under running status, or drop it.
            let Some(status) = self.running_status else {
                warn!("discarding data byte 0x{byte:02X} with no running status");
                sink.warning(Error::core(ErrorKind::Malformed));
                return;
            };
            let expected = channel_voice_data_len(status);
            self.begin(&[status, byte], timestamp);
            if expected == 1 {
                self.emit(sink);
            } else {
                self.state = DecoderState::ChannelVoice { status, expected };
            }
            return;
        }

        if is_channel_voice_status(byte) {
            let expected = channel_voice_data_len(byte);
            self.begin(&[byte], timestamp);
            self.state = DecoderState::ChannelVoice {
                status: byte,
                expected,
            };
            return;
        }

        // Everything system-side clears running status.
        self.running_status = None;
        match byte {
            0xF0 => {
                self.begin(&[0xF0], timestamp);
                self.state = DecoderState::SysEx;
            }
            0xF7 => {
                warn!("discarding end-of-exclusive with no SysEx in progress");
                sink.warning(Error::core(ErrorKind::Malformed));
            }
            _ => match system_common_data_len(byte) {
                Some(0) => {
                    self.begin(&[byte], timestamp);
                    self.emit(sink);
                }
                Some(expected) => {
                    self.begin(&[byte], timestamp);
                    self.state = DecoderState::SystemCommon { expected };
                }
                // F4/F5 are reserved; skip them.
                None => {
                    warn!("discarding undefined status byte 0x{byte:02X}");
                    sink.warning(Error::core(ErrorKind::Malformed));
                }
            },
        }
    }

    fn begin(&mut self, bytes: &[u8], timestamp: i64) {
        self.message.bytes.clear();
        self.message.bytes.extend_from_slice(bytes);
        self.message.timestamp = timestamp;
    }

    fn emit<S: MessageSink>(&mut self, sink: &mut S) {
        self.state = DecoderState::Idle;
        sink.message(&mut self.message);
        self.message.bytes.clear();
    }
}

/// Streaming framer for 32-bit-word UMP input.
///
/// Carries partial packets across feeds; the packet length is derived from
/// the type nibble of the leading word via [`words_for_type`].
#[derive(Default)]
pub struct UmpStreamDecoder {
    pending: [u32; 4],
    have: usize,
    need: usize,
}

impl UmpStreamDecoder {
    pub fn new() -> UmpStreamDecoder {
        UmpStreamDecoder::default()
    }

    pub fn feed<F: FnMut(Ump)>(&mut self, words: &[u32], timestamp: i64, mut emit: F) {
        for &word in words {
            if self.have == 0 {
                self.need = words_for_type((word >> 28) as u8);
            }
            self.pending[self.have] = word;
            self.have += 1;
            if self.have == self.need {
                let ump = Ump::from_words(&self.pending[..self.need])
                    .expect("length taken from the type table")
                    .with_timestamp(timestamp);
                self.have = 0;
                emit(ump);
            }
        }
    }

    /// Signals end-of-stream; errors if a packet is partially collected.
    pub fn finish(&mut self) -> crate::errors::Result<()> {
        if self.have != 0 {
            self.have = 0;
            return Err(Error::core(ErrorKind::Truncated));
        }
        Ok(())
    }
}
