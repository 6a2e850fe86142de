//! A cross-platform, realtime MIDI processing library, inspired by RtMidi.
//!
//! `unimidi` presents one interface over heterogeneous OS MIDI subsystems
//! and over both MIDI wire formats: the classic byte-oriented MIDI 1.0
//! stream and the 32-bit-word Universal MIDI Packet (UMP) used by
//! MIDI 2.0. Applications enumerate endpoints with an [`Observer`], open
//! ports with [`MidiInput`]/[`MidiOutput`], receive timestamped messages
//! through callbacks and send with realtime latency guarantees.
//!
//! Backends are selected at runtime through the API-specific half of each
//! configuration pair; see [`ApiConfig`] and [`Api`]. This build compiles
//! in the software loopback backend (always available, also the test
//! backend) and the dummy backend. The [`file`] module reads and writes
//! Standard MIDI Files.

mod api;
mod backend;
mod client;
mod codec;
mod common;
mod config;
mod convert;
mod errors;
mod input;
mod message;
mod observer;
mod output;
mod ports;
mod timestamp;
mod ump;

pub mod file;

pub use api::{available_apis, Api};
pub use backend::loopback::LoopbackHub;
pub use client::{ClientConfig, MidiClient, Router, RoutingCallback};
pub use codec::{MessageSink, MidiStreamDecoder, UmpStreamDecoder};
pub use common::{MidiInput, MidiOutput};
pub use config::{
    AlsaRawConfig, AlsaSeqConfig, ApiConfig, ChunkingParameters, CoreMidiConfig, EndpointCallback,
    ErrorCallback, Ignore, InputConfig, InputHandler, InputPortCallback, JackConfig, KdmapiConfig,
    LoopbackConfig, ManualPollHook, MessageCallback, NetworkConfig, ObserverConfig, ObserverFlags,
    OutputConfig, OutputPortCallback, PipeWireConfig, PollRegistration, StopPollHook, UmpCallback,
    WinMmConfig,
};
pub use convert::{midi1_to_ump, ump_to_midi1, ConvertError, Midi1ToUmpContext, UmpToMidi1Context};
pub use errors::{Error, ErrorDomain, ErrorKind, Result};
pub use message::{MidiMessage, Status};
pub use observer::Observer;
pub use ports::{
    BlockDirection, FunctionBlock, InputPort, OutputPort, PortDirection, PortInfo, Protocols,
    Transport, UmpEndpointInfo,
};
pub use timestamp::{Timestamp, TimestampMode};
pub use ump::{words_for_type, Ump, UmpVersion};
