//! The per-port input state machine: drives the codec and the timestamp
//! engine, filters ignored message classes, and invokes the user callback
//! on message boundaries.

use crate::codec::{MessageSink, MidiStreamDecoder, UmpStreamDecoder};
use crate::config::{ErrorCallback, Ignore, InputConfig, InputHandler};
use crate::errors::Error;
use crate::message::MidiMessage;
use crate::timestamp::{ClockInfo, TimestampEngine};

/// Drives one open input port.
///
/// The backend guarantees single-threaded delivery (or serializes), so at
/// most one user callback runs at a time. The message handed to the
/// callback is a view into the decoder's buffer, valid only for the call.
pub(crate) struct InputStateMachine {
    decoder: MidiStreamDecoder,
    ump_decoder: UmpStreamDecoder,
    engine: TimestampEngine,
    handler: Option<InputHandler>,
    ignore: Ignore,
    on_error: Option<ErrorCallback>,
    on_warning: Option<ErrorCallback>,
    /// Elides nested reports when an error callback re-enters the library.
    first_error: bool,
}

impl InputStateMachine {
    pub fn new(config: InputConfig, clock: ClockInfo) -> InputStateMachine {
        InputStateMachine {
            decoder: MidiStreamDecoder::new(),
            ump_decoder: UmpStreamDecoder::new(),
            engine: TimestampEngine::new(config.timestamps, clock),
            handler: config.handler,
            ignore: config.ignore,
            on_error: config.on_error,
            on_warning: config.on_warning,
            first_error: false,
        }
    }

    /// Marks the port-open instant for timestamp derivation.
    pub fn begin_session(&mut self, now_ns: i64) {
        self.engine.begin_session(now_ns);
    }

    /// Processes one delivery of raw bytes stamped `raw_ns`.
    pub fn on_bytes(&mut self, bytes: &[u8], raw_ns: i64) {
        let mut sink = Dispatch {
            engine: &mut self.engine,
            handler: &mut self.handler,
            ignore: self.ignore,
            on_warning: &mut self.on_warning,
            first_error: &mut self.first_error,
            raw_ns,
        };
        self.decoder.feed(bytes, raw_ns, &mut sink);
    }

    /// Processes one delivery of UMP words stamped `raw_ns`.
    pub fn on_words(&mut self, words: &[u32], raw_ns: i64) {
        let engine = &mut self.engine;
        let handler = &mut self.handler;
        self.ump_decoder.feed(words, raw_ns, |mut ump| {
            ump.timestamp = engine.stamp(raw_ns, None);
            if let Some(InputHandler::Ump(callback)) = handler {
                callback(&ump);
            }
        });
    }

    /// Signals end-of-stream, e.g. at port close. A partially collected
    /// message is reported as `Truncated`: through `on_warning` for the
    /// byte decoder (the port stays usable), through `on_error` for the
    /// word framer.
    pub fn finish(&mut self) {
        let mut sink = Dispatch {
            engine: &mut self.engine,
            handler: &mut self.handler,
            ignore: self.ignore,
            on_warning: &mut self.on_warning,
            first_error: &mut self.first_error,
            raw_ns: 0,
        };
        self.decoder.finish(&mut sink);
        if let Err(err) = self.ump_decoder.finish() {
            self.report_error(err);
        }
    }

    /// Reports an error through the registered callback, guarding against
    /// infinite recursion from reentrant callbacks.
    pub fn report_error(&mut self, error: Error) {
        report(&mut self.on_error, &mut self.first_error, error);
    }
}

fn report(callback: &mut Option<ErrorCallback>, first_error: &mut bool, error: Error) {
    if let Some(callback) = callback {
        if *first_error {
            return;
        }
        *first_error = true;
        callback(error);
        *first_error = false;
    } else {
        log::error!("{error}");
    }
}

fn ignored(ignore: Ignore, bytes: &[u8]) -> bool {
    match bytes.first() {
        Some(0xF0) => ignore.contains(Ignore::SYSEX),
        Some(0xF1) | Some(0xF8) | Some(0xF9) => ignore.contains(Ignore::TIME),
        Some(0xFE) => ignore.contains(Ignore::ACTIVE_SENSE),
        _ => false,
    }
}

struct Dispatch<'a> {
    engine: &'a mut TimestampEngine,
    handler: &'a mut Option<InputHandler>,
    ignore: Ignore,
    on_warning: &'a mut Option<ErrorCallback>,
    first_error: &'a mut bool,
    raw_ns: i64,
}

impl MessageSink for Dispatch<'_> {
    fn message(&mut self, message: &mut MidiMessage) {
        if ignored(self.ignore, &message.bytes) {
            return;
        }
        // the engine runs exactly once per emitted message, whether or not
        // a handler consumes it
        message.timestamp = self.engine.stamp(self.raw_ns, None);
        if let Some(InputHandler::Midi1(callback)) = self.handler {
            callback(message);
        }
    }

    fn warning(&mut self, error: Error) {
        report(self.on_warning, self.first_error, error);
    }
}
