//! Configuration records.
//!
//! Every instance is configured by a pair of records: a generic one shared
//! across APIs (callbacks, timestamp mode, tracking flags) and an
//! API-specific one carrying library-private parameters. The API-specific
//! record also selects the backend; see [`ApiConfig`].

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;

use crate::api::Api;
use crate::backend::loopback::LoopbackHub;
use crate::errors::Error;
use crate::message::MidiMessage;
use crate::ports::{InputPort, OutputPort, UmpEndpointInfo};
use crate::timestamp::TimestampMode;
use crate::ump::Ump;

/// Invoked for errors reported outside a `Result` return path (e.g. from a
/// backend's delivery thread). Warnings never invalidate the instance.
pub type ErrorCallback = Box<dyn FnMut(Error) + Send>;

/// Invoked once per framed MIDI 1.0 message. The reference is only valid
/// for the duration of the call; copy if you need to retain it.
pub type MessageCallback = Box<dyn FnMut(&MidiMessage) + Send>;

/// Invoked once per framed UMP.
pub type UmpCallback = Box<dyn FnMut(&Ump) + Send>;

pub type InputPortCallback = Box<dyn FnMut(&InputPort) + Send>;
pub type OutputPortCallback = Box<dyn FnMut(&OutputPort) + Send>;
pub type EndpointCallback = Box<dyn FnMut(&UmpEndpointInfo) + Send>;

bitflags! {
    /// Message classes an input filters out before user dispatch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Ignore: u8 {
        const SYSEX = 0x01;
        const TIME = 0x02;
        const ACTIVE_SENSE = 0x04;
    }
}

/// The wire format an input delivers, together with its callback.
pub enum InputHandler {
    Midi1(MessageCallback),
    Ump(UmpCallback),
}

impl InputHandler {
    pub(crate) fn is_ump(&self) -> bool {
        matches!(self, InputHandler::Ump(_))
    }
}

/// Generic input configuration, shared across APIs.
#[derive(Default)]
pub struct InputConfig {
    /// Where framed messages go. Without a handler every message is
    /// silently dropped.
    pub handler: Option<InputHandler>,
    pub on_error: Option<ErrorCallback>,
    pub on_warning: Option<ErrorCallback>,
    pub timestamps: TimestampMode,
    pub ignore: Ignore,
}

impl InputConfig {
    /// Configuration delivering byte-oriented MIDI 1.0 messages.
    pub fn with_callback<F>(callback: F) -> InputConfig
    where
        F: FnMut(&MidiMessage) + Send + 'static,
    {
        InputConfig {
            handler: Some(InputHandler::Midi1(Box::new(callback))),
            ..Default::default()
        }
    }

    /// Configuration delivering UMPs.
    pub fn with_ump_callback<F>(callback: F) -> InputConfig
    where
        F: FnMut(&Ump) + Send + 'static,
    {
        InputConfig {
            handler: Some(InputHandler::Ump(Box::new(callback))),
            ..Default::default()
        }
    }
}

/// Generic output configuration, shared across APIs.
#[derive(Default)]
pub struct OutputConfig {
    pub on_error: Option<ErrorCallback>,
    pub on_warning: Option<ErrorCallback>,
    /// Timestamp mode for the timestamps passed to `schedule_message`.
    pub timestamps: TimestampMode,
}

bitflags! {
    /// What an observer tracks and which endpoints it reports.
    ///
    /// A port is reported iff its transport matches an enabled `TRACK_*`
    /// flag and it satisfies every enabled `REQUIRE_*` flag.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObserverFlags: u32 {
        /// Observe hardware ports.
        const TRACK_HARDWARE = 1 << 0;
        /// Observe software (virtual) ports if the API provides them.
        const TRACK_VIRTUAL = 1 << 1;
        /// Observe network ports if the API provides them.
        const TRACK_NETWORK = 1 << 2;
        /// Observe every port, whatever its transport.
        const TRACK_ANY = 1 << 3;
        /// Synthesize `added` callbacks for the ports already present
        /// before the observer constructor returns.
        const NOTIFY_IN_CONSTRUCTOR = 1 << 4;
        /// Only report endpoints that support the MIDI 1 protocol.
        const REQUIRE_MIDI1 = 1 << 5;
        /// Only report endpoints that support the MIDI 2 protocol.
        const REQUIRE_MIDI2 = 1 << 6;
        /// Only report endpoints with input capability.
        const REQUIRE_INPUT = 1 << 7;
        /// Only report endpoints with output capability.
        const REQUIRE_OUTPUT = 1 << 8;
        /// Only report bidirectional endpoints.
        const REQUIRE_BIDIRECTIONAL = 1 << 9;
    }
}

impl Default for ObserverFlags {
    fn default() -> Self {
        ObserverFlags::TRACK_HARDWARE | ObserverFlags::NOTIFY_IN_CONSTRUCTOR
    }
}

/// Generic observer configuration.
#[derive(Default)]
pub struct ObserverConfig {
    pub on_error: Option<ErrorCallback>,
    pub on_warning: Option<ErrorCallback>,

    pub input_added: Option<InputPortCallback>,
    pub input_removed: Option<InputPortCallback>,
    pub input_updated: Option<InputPortCallback>,
    pub output_added: Option<OutputPortCallback>,
    pub output_removed: Option<OutputPortCallback>,
    pub output_updated: Option<OutputPortCallback>,

    pub endpoint_added: Option<EndpointCallback>,
    pub endpoint_removed: Option<EndpointCallback>,
    pub endpoint_updated: Option<EndpointCallback>,

    pub flags: ObserverFlags,
}

impl ObserverConfig {
    pub fn has_callbacks(&self) -> bool {
        self.input_added.is_some()
            || self.input_removed.is_some()
            || self.input_updated.is_some()
            || self.output_added.is_some()
            || self.output_removed.is_some()
            || self.output_updated.is_some()
            || self.endpoint_added.is_some()
            || self.endpoint_removed.is_some()
            || self.endpoint_updated.is_some()
    }
}

/// Determines how large sent messages are chunked.
pub struct ChunkingParameters {
    pub interval: Duration,
    /// Bytes per chunk.
    pub size: usize,
    /// Called between chunks with the time to wait and the bytes written
    /// so far. Return `false` to abort the transfer.
    pub wait: Box<dyn FnMut(Duration, usize) -> bool + Send>,
}

impl ChunkingParameters {
    pub fn new(interval: Duration, size: usize) -> ChunkingParameters {
        ChunkingParameters {
            interval,
            size,
            wait: Box::new(Self::default_wait),
        }
    }

    /// The default pacing: sleep for the requested time and continue.
    pub fn default_wait(time_to_wait: Duration, _written_bytes: usize) -> bool {
        std::thread::sleep(time_to_wait);
        true
    }
}

/// Lets the application drive input delivery from its own event loop
/// instead of a backend thread; see [`LoopbackConfig::manual_poll`].
pub struct PollRegistration {
    /// Identifies this registration to the `stop_poll` hook.
    pub token: u64,
    /// Drains pending input, dispatching user callbacks on the calling
    /// thread. Returns `false` once the port is closed; no callback is
    /// delivered after that.
    pub poll: Box<dyn FnMut() -> bool + Send>,
}

pub type ManualPollHook = Box<dyn FnMut(PollRegistration) -> bool + Send>;
pub type StopPollHook = Box<dyn FnMut(u64) -> bool + Send>;

// Per-backend records. The ones for APIs without a compiled-in backend are
// part of the public configuration surface; constructing on them reports
// `BackendUnavailable`.

pub struct AlsaSeqConfig {
    pub client_name: String,
}

pub struct AlsaRawConfig {
    /// For large messages, chunk their content and wait.
    /// `None` disables chunking.
    pub chunking: Option<ChunkingParameters>,
}

pub struct JackConfig {
    pub client_name: String,
    pub ringbuffer_size: usize,
}

pub struct PipeWireConfig {
    pub client_name: String,
    pub output_buffer_size: usize,
}

pub struct WinMmConfig {
    pub sysex_buffer_size: usize,
    pub sysex_buffer_count: usize,
    /// Hot-plug poll period in milliseconds.
    pub poll_period: u32,
}

pub struct CoreMidiConfig {
    pub client_name: String,
}

pub struct NetworkConfig {
    pub client_name: String,
    pub host: String,
    pub port: u16,
    pub accept: String,
    pub broadcast: bool,
}

pub struct KdmapiConfig {
    /// Use the no-buffer send variant for lowest latency.
    pub use_no_buffer: bool,
}

/// Configuration of the in-process loopback backend.
pub struct LoopbackConfig {
    pub client_name: String,
    /// Shared hub session. When set, the instances attach to this hub and
    /// the library neither creates nor destroys it; when `None` the
    /// process-global hub is used.
    pub context: Option<Arc<LoopbackHub>>,
    /// Capacity of the per-input delivery ring, in bytes.
    pub ringbuffer_size: usize,
    /// Chunk large outgoing SysEx messages.
    pub chunking: Option<ChunkingParameters>,
    /// When set, opening a port spawns no delivery thread; the hook
    /// receives a [`PollRegistration`] and the application polls.
    pub manual_poll: Option<ManualPollHook>,
    /// Invoked with the registration token when the port closes.
    pub stop_poll: Option<StopPollHook>,
}

impl Default for AlsaSeqConfig {
    fn default() -> Self {
        AlsaSeqConfig {
            client_name: default_client_name(),
        }
    }
}

impl Default for AlsaRawConfig {
    fn default() -> Self {
        AlsaRawConfig { chunking: None }
    }
}

impl Default for JackConfig {
    fn default() -> Self {
        JackConfig {
            client_name: default_client_name(),
            ringbuffer_size: DEFAULT_RINGBUFFER_SIZE,
        }
    }
}

impl Default for PipeWireConfig {
    fn default() -> Self {
        PipeWireConfig {
            client_name: default_client_name(),
            output_buffer_size: 65536,
        }
    }
}

impl Default for WinMmConfig {
    fn default() -> Self {
        WinMmConfig {
            sysex_buffer_size: 1024,
            sysex_buffer_count: 4,
            poll_period: 100,
        }
    }
}

impl Default for CoreMidiConfig {
    fn default() -> Self {
        CoreMidiConfig {
            client_name: default_client_name(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            client_name: default_client_name(),
            host: "127.0.0.1".to_owned(),
            port: 0,
            accept: "0.0.0.0".to_owned(),
            broadcast: false,
        }
    }
}

impl Default for KdmapiConfig {
    fn default() -> Self {
        KdmapiConfig { use_no_buffer: false }
    }
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        LoopbackConfig {
            client_name: default_client_name(),
            context: None,
            ringbuffer_size: DEFAULT_RINGBUFFER_SIZE,
            chunking: None,
            manual_poll: None,
            stop_poll: None,
        }
    }
}

pub(crate) const DEFAULT_RINGBUFFER_SIZE: usize = 16384;

fn default_client_name() -> String {
    "unimidi client".to_owned()
}

/// The API-specific half of a configuration pair. The variant selects the
/// backend; `Unspecified` searches the compiled-in backends in
/// platform-preferred order and uses that backend's defaults.
pub enum ApiConfig {
    Unspecified,
    CoreMidi(CoreMidiConfig),
    AlsaSeq(AlsaSeqConfig),
    AlsaRaw(AlsaRawConfig),
    Jack(JackConfig),
    WinMm(WinMmConfig),
    WinUwp,
    WebMidi,
    PipeWire(PipeWireConfig),
    Network(NetworkConfig),
    Kdmapi(KdmapiConfig),
    Loopback(LoopbackConfig),
    CoreMidiUmp(CoreMidiConfig),
    AlsaSeqUmp(AlsaSeqConfig),
    AlsaRawUmp(AlsaRawConfig),
    WindowsMidiServices(WinMmConfig),
    JackUmp(JackConfig),
    PipeWireUmp(PipeWireConfig),
    NetworkUmp(NetworkConfig),
    LoopbackUmp(LoopbackConfig),
    Dummy,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig::Unspecified
    }
}

impl ApiConfig {
    /// The default configuration record for `api`.
    pub fn default_for(api: Api) -> ApiConfig {
        match api {
            Api::Unspecified => ApiConfig::Unspecified,
            Api::CoreMidi => ApiConfig::CoreMidi(Default::default()),
            Api::AlsaSeq => ApiConfig::AlsaSeq(Default::default()),
            Api::AlsaRaw => ApiConfig::AlsaRaw(Default::default()),
            Api::Jack => ApiConfig::Jack(Default::default()),
            Api::WindowsMm => ApiConfig::WinMm(Default::default()),
            Api::WindowsUwp => ApiConfig::WinUwp,
            Api::WebMidi => ApiConfig::WebMidi,
            Api::PipeWire => ApiConfig::PipeWire(Default::default()),
            Api::Network => ApiConfig::Network(Default::default()),
            Api::Kdmapi => ApiConfig::Kdmapi(Default::default()),
            Api::Loopback => ApiConfig::Loopback(Default::default()),
            Api::CoreMidiUmp => ApiConfig::CoreMidiUmp(Default::default()),
            Api::AlsaSeqUmp => ApiConfig::AlsaSeqUmp(Default::default()),
            Api::AlsaRawUmp => ApiConfig::AlsaRawUmp(Default::default()),
            Api::WindowsMidiServices => ApiConfig::WindowsMidiServices(Default::default()),
            Api::JackUmp => ApiConfig::JackUmp(Default::default()),
            Api::PipeWireUmp => ApiConfig::PipeWireUmp(Default::default()),
            Api::NetworkUmp => ApiConfig::NetworkUmp(Default::default()),
            Api::LoopbackUmp => ApiConfig::LoopbackUmp(Default::default()),
            Api::Dummy => ApiConfig::Dummy,
        }
    }

    /// The API this record belongs to.
    pub fn api(&self) -> Api {
        match self {
            ApiConfig::Unspecified => Api::Unspecified,
            ApiConfig::CoreMidi(_) => Api::CoreMidi,
            ApiConfig::AlsaSeq(_) => Api::AlsaSeq,
            ApiConfig::AlsaRaw(_) => Api::AlsaRaw,
            ApiConfig::Jack(_) => Api::Jack,
            ApiConfig::WinMm(_) => Api::WindowsMm,
            ApiConfig::WinUwp => Api::WindowsUwp,
            ApiConfig::WebMidi => Api::WebMidi,
            ApiConfig::PipeWire(_) => Api::PipeWire,
            ApiConfig::Network(_) => Api::Network,
            ApiConfig::Kdmapi(_) => Api::Kdmapi,
            ApiConfig::Loopback(_) => Api::Loopback,
            ApiConfig::CoreMidiUmp(_) => Api::CoreMidiUmp,
            ApiConfig::AlsaSeqUmp(_) => Api::AlsaSeqUmp,
            ApiConfig::AlsaRawUmp(_) => Api::AlsaRawUmp,
            ApiConfig::WindowsMidiServices(_) => Api::WindowsMidiServices,
            ApiConfig::JackUmp(_) => Api::JackUmp,
            ApiConfig::PipeWireUmp(_) => Api::PipeWireUmp,
            ApiConfig::NetworkUmp(_) => Api::NetworkUmp,
            ApiConfig::LoopbackUmp(_) => Api::LoopbackUmp,
            ApiConfig::Dummy => Api::Dummy,
        }
    }
}
