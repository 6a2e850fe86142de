//! MIDI API identifiers and the runtime backend selection rules.

use crate::backend;

/// MIDI API specifier.
///
/// Every API the library knows about is listed, whether or not a backend
/// for it is compiled into this build; [`Api::is_available`] tells them
/// apart at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Api {
    /// Search the compiled-in backends in platform-preferred order.
    Unspecified,

    // MIDI 1.0 APIs
    /// macOS CoreMIDI.
    CoreMidi,
    /// Linux ALSA sequencer.
    AlsaSeq,
    /// Linux raw ALSA.
    AlsaRaw,
    /// JACK low-latency MIDI server.
    Jack,
    /// Microsoft Multimedia MIDI.
    WindowsMm,
    /// Microsoft WinRT MIDI.
    WindowsUwp,
    /// Web MIDI in a browser runtime.
    WebMidi,
    /// PipeWire.
    PipeWire,
    /// MIDI over IP.
    Network,
    /// OmniMIDI KDMAPI (output only).
    Kdmapi,
    /// In-process software loopback hub.
    Loopback,

    // MIDI 2.0 (UMP) APIs
    /// macOS CoreMIDI with UMP. Requires macOS 11+.
    CoreMidiUmp,
    /// ALSA sequencer for MIDI 2.0.
    AlsaSeqUmp,
    /// Raw ALSA for MIDI 2.0.
    AlsaRawUmp,
    /// Windows MIDI Services. Requires Windows 11.
    WindowsMidiServices,
    /// MIDI 2 over JACK.
    JackUmp,
    /// MIDI 2 over PipeWire. Requires v1.4+.
    PipeWireUmp,
    /// MIDI 2 over IP.
    NetworkUmp,
    /// In-process software loopback hub carrying UMP.
    LoopbackUmp,

    /// Compilable but non-functional.
    Dummy,
}

impl Api {
    /// Short identifier, stable across versions.
    pub fn name(self) -> &'static str {
        match self {
            Api::Unspecified => "unspecified",
            Api::CoreMidi => "coremidi",
            Api::AlsaSeq => "alsa_seq",
            Api::AlsaRaw => "alsa_raw",
            Api::Jack => "jack",
            Api::WindowsMm => "winmm",
            Api::WindowsUwp => "winuwp",
            Api::WebMidi => "webmidi",
            Api::PipeWire => "pipewire",
            Api::Network => "network",
            Api::Kdmapi => "kdmapi",
            Api::Loopback => "loopback",
            Api::CoreMidiUmp => "coremidi_ump",
            Api::AlsaSeqUmp => "alsa_seq_ump",
            Api::AlsaRawUmp => "alsa_raw_ump",
            Api::WindowsMidiServices => "winmidi",
            Api::JackUmp => "jack_ump",
            Api::PipeWireUmp => "pipewire_ump",
            Api::NetworkUmp => "network_ump",
            Api::LoopbackUmp => "loopback_ump",
            Api::Dummy => "dummy",
        }
    }

    /// Human-readable name.
    pub fn display_name(self) -> &'static str {
        match self {
            Api::Unspecified => "Unspecified",
            Api::CoreMidi => "CoreMIDI",
            Api::AlsaSeq => "ALSA (sequencer)",
            Api::AlsaRaw => "ALSA (raw)",
            Api::Jack => "JACK",
            Api::WindowsMm => "Windows Multimedia",
            Api::WindowsUwp => "Windows UWP",
            Api::WebMidi => "Web MIDI",
            Api::PipeWire => "PipeWire",
            Api::Network => "Network",
            Api::Kdmapi => "KDMAPI",
            Api::Loopback => "Software loopback",
            Api::CoreMidiUmp => "CoreMIDI UMP",
            Api::AlsaSeqUmp => "ALSA (sequencer, UMP)",
            Api::AlsaRawUmp => "ALSA (raw, UMP)",
            Api::WindowsMidiServices => "Windows MIDI Services",
            Api::JackUmp => "JACK UMP",
            Api::PipeWireUmp => "PipeWire UMP",
            Api::NetworkUmp => "Network UMP",
            Api::LoopbackUmp => "Software loopback (UMP)",
            Api::Dummy => "Dummy",
        }
    }

    /// Protocol family: true for the APIs whose native wire format is the
    /// Universal MIDI Packet.
    pub fn is_ump(self) -> bool {
        matches!(
            self,
            Api::CoreMidiUmp
                | Api::AlsaSeqUmp
                | Api::AlsaRawUmp
                | Api::WindowsMidiServices
                | Api::JackUmp
                | Api::PipeWireUmp
                | Api::NetworkUmp
                | Api::LoopbackUmp
        )
    }

    /// Whether a backend for this API is compiled in and usable right now.
    pub fn is_available(self) -> bool {
        backend::lookup(self).map_or(false, |spec| (spec.available)())
    }

    /// Look an API up by its short identifier.
    pub fn from_name(name: &str) -> Option<Api> {
        ALL_APIS.iter().copied().find(|api| api.name() == name)
    }
}

pub(crate) const ALL_APIS: &[Api] = &[
    Api::CoreMidi,
    Api::AlsaSeq,
    Api::AlsaRaw,
    Api::Jack,
    Api::WindowsMm,
    Api::WindowsUwp,
    Api::WebMidi,
    Api::PipeWire,
    Api::Network,
    Api::Kdmapi,
    Api::Loopback,
    Api::CoreMidiUmp,
    Api::AlsaSeqUmp,
    Api::AlsaRawUmp,
    Api::WindowsMidiServices,
    Api::JackUmp,
    Api::PipeWireUmp,
    Api::NetworkUmp,
    Api::LoopbackUmp,
    Api::Dummy,
];

/// The compiled-in APIs whose backends report themselves usable.
pub fn available_apis() -> Vec<Api> {
    ALL_APIS.iter().copied().filter(|api| api.is_available()).collect()
}

/// Platform-preferred search order used for [`Api::Unspecified`].
///
/// OS APIs come first on their platform; the loopback hub is the
/// always-available software fallback, and the dummy backend is never
/// selected implicitly.
pub(crate) fn platform_order() -> &'static [Api] {
    if cfg!(any(target_os = "macos", target_os = "ios")) {
        &[Api::CoreMidi, Api::Loopback]
    } else if cfg!(target_os = "windows") {
        &[
            Api::WindowsMidiServices,
            Api::WindowsMm,
            Api::WindowsUwp,
            Api::Loopback,
        ]
    } else if cfg!(target_os = "linux") {
        &[Api::AlsaSeq, Api::PipeWire, Api::Loopback]
    } else if cfg!(target_arch = "wasm32") {
        &[Api::WebMidi, Api::Loopback]
    } else {
        &[Api::Loopback]
    }
}
