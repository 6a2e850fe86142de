//! Port and endpoint observation: enumeration plus hot-plug notification.

use crate::api::Api;
use crate::backend::{self, ObserverApi};
use crate::config::{ApiConfig, ObserverConfig, ObserverFlags};
use crate::errors::Result;
use crate::ports::{InputPort, OutputPort, Transport, UmpEndpointInfo};

/// Capabilities a port or endpoint is filtered on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PortCaps {
    pub transport: Transport,
    pub has_input: bool,
    pub has_output: bool,
    pub midi1: bool,
    pub midi2: bool,
}

/// The filtering predicate shared by enumeration and hot-plug callbacks:
/// the transport must match an enabled `TRACK_*` flag and every enabled
/// `REQUIRE_*` flag must hold.
pub(crate) fn accepts(flags: ObserverFlags, caps: PortCaps) -> bool {
    let tracked = flags.contains(ObserverFlags::TRACK_ANY)
        || match caps.transport {
            Transport::Hardware | Transport::Usb | Transport::Bluetooth | Transport::Pci => {
                flags.contains(ObserverFlags::TRACK_HARDWARE)
            }
            Transport::Software | Transport::Loopback => {
                flags.contains(ObserverFlags::TRACK_VIRTUAL)
            }
            Transport::Network => flags.contains(ObserverFlags::TRACK_NETWORK),
            Transport::Unknown => false,
        };
    if !tracked {
        return false;
    }

    if flags.contains(ObserverFlags::REQUIRE_MIDI1) && !caps.midi1 {
        return false;
    }
    if flags.contains(ObserverFlags::REQUIRE_MIDI2) && !caps.midi2 {
        return false;
    }
    if flags.contains(ObserverFlags::REQUIRE_INPUT) && !caps.has_input {
        return false;
    }
    if flags.contains(ObserverFlags::REQUIRE_OUTPUT) && !caps.has_output {
        return false;
    }
    if flags.contains(ObserverFlags::REQUIRE_BIDIRECTIONAL) && !(caps.has_input && caps.has_output)
    {
        return false;
    }
    true
}

/// Maintains the set of currently present ports/endpoints for one backend
/// and delivers hot-plug notifications through the configured callbacks.
///
/// For each port, `added` strictly precedes `removed` and no duplicate
/// `added` is delivered without an intervening `removed`. With
/// [`ObserverFlags::NOTIFY_IN_CONSTRUCTOR`] the ports present at
/// construction are announced before `new` returns. Callbacks run on the
/// backend's notification thread and must return promptly.
pub struct Observer {
    imp: Box<dyn ObserverApi>,
}

impl Observer {
    pub fn new(config: ObserverConfig, api_config: ApiConfig) -> Result<Observer> {
        let spec = backend::resolve(&api_config)?;
        (spec.observer)(config, api_config).map(|imp| Observer { imp })
    }

    /// The API the observer ended up using.
    pub fn current_api(&self) -> Api {
        self.imp.api()
    }

    /// The input ports currently present, after filtering.
    pub fn get_input_ports(&self) -> Vec<InputPort> {
        self.imp.input_ports()
    }

    /// The output ports currently present, after filtering.
    pub fn get_output_ports(&self) -> Vec<OutputPort> {
        self.imp.output_ports()
    }

    /// The UMP endpoints currently present, after filtering. Empty on
    /// byte-oriented APIs.
    pub fn get_endpoints(&self) -> Vec<UmpEndpointInfo> {
        self.imp.endpoints()
    }
}
