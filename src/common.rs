use crate::api::Api;
use crate::backend::{self, MidiInApi, MidiOutApi};
use crate::config::{ApiConfig, InputConfig, OutputConfig};
use crate::errors::{Error, ErrorKind, Result};
use crate::ports::{InputPort, OutputPort};

fn check_family(wants_ump: Option<bool>, api: Api) -> Result<()> {
    // a byte-oriented handler on a UMP API (or vice versa) is a
    // configuration error, reported at construction
    match wants_ump {
        Some(ump) if ump != api.is_ump() => Err(Error::core(ErrorKind::ApiConfigMismatch)),
        _ => Ok(()),
    }
}

/// Receives MIDI messages from one input port at a time.
///
/// Create with [`MidiInput::new`], then open a port enumerated by an
/// [`Observer`](crate::Observer) (or a virtual one). Messages arrive
/// through the callback configured in the [`InputConfig`], on a thread
/// owned by the backend unless manual polling is configured.
pub struct MidiInput {
    imp: Box<dyn MidiInApi>,
}

impl std::fmt::Debug for MidiInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiInput").finish()
    }
}

impl MidiInput {
    /// Creates an input on the backend selected by `api_config`.
    ///
    /// Fails with `BackendUnavailable` when the requested API is not
    /// compiled in, and with `ApiConfigMismatch` when the configured
    /// handler's wire format does not match the API's protocol family.
    pub fn new(config: InputConfig, api_config: ApiConfig) -> Result<MidiInput> {
        let spec = backend::resolve(&api_config)?;
        check_family(config.handler.as_ref().map(|h| h.is_ump()), spec.api)?;
        (spec.input)(config, api_config).map(|imp| MidiInput { imp })
    }

    /// The API the input ended up using.
    pub fn current_api(&self) -> Api {
        self.imp.api()
    }

    /// Opens `port` for receiving. An already-open port is closed first.
    /// `port_name` names the connection on backends that support it.
    pub fn open_port(&mut self, port: &InputPort, port_name: &str) -> Result<()> {
        self.imp.open_port(port, port_name)
    }

    /// Advertises a virtual (software) port under `port_name` and starts
    /// receiving on it. Fails with `UnsupportedOperation` on backends
    /// without virtual ports.
    pub fn open_virtual_port(&mut self, port_name: &str) -> Result<()> {
        self.imp.open_virtual_port(port_name)
    }

    /// Closes the open port. In-flight deliveries complete first; no
    /// callback runs after this returns.
    pub fn close_port(&mut self) -> Result<()> {
        self.imp.close_port()
    }

    pub fn is_port_open(&self) -> bool {
        self.imp.is_port_open()
    }

    /// The backend clock's current reading, in nanoseconds. Comparable to
    /// the timestamps of incoming messages in `Absolute` mode.
    pub fn absolute_timestamp(&self) -> i64 {
        self.imp.absolute_timestamp()
    }

    pub fn set_client_name(&mut self, name: &str) -> Result<()> {
        self.imp.set_client_name(name)
    }

    /// Renames the open port. Observers see an `updated` event with the
    /// handle unchanged.
    pub fn set_port_name(&mut self, name: &str) -> Result<()> {
        self.imp.set_port_name(name)
    }
}

/// Sends MIDI messages to one output port at a time.
pub struct MidiOutput {
    imp: Box<dyn MidiOutApi>,
}

impl MidiOutput {
    /// Creates an output on the backend selected by `api_config`.
    pub fn new(config: OutputConfig, api_config: ApiConfig) -> Result<MidiOutput> {
        let spec = backend::resolve(&api_config)?;
        (spec.output)(config, api_config).map(|imp| MidiOutput { imp })
    }

    /// The API the output ended up using.
    pub fn current_api(&self) -> Api {
        self.imp.api()
    }

    /// Opens `port` for sending. An already-open port is closed first.
    pub fn open_port(&mut self, port: &OutputPort, port_name: &str) -> Result<()> {
        self.imp.open_port(port, port_name)
    }

    /// Advertises a virtual (software) port under `port_name`; peers that
    /// open its input end receive what is sent here.
    pub fn open_virtual_port(&mut self, port_name: &str) -> Result<()> {
        self.imp.open_virtual_port(port_name)
    }

    pub fn close_port(&mut self) -> Result<()> {
        self.imp.close_port()
    }

    pub fn is_port_open(&self) -> bool {
        self.imp.is_port_open()
    }

    pub fn set_client_name(&mut self, name: &str) -> Result<()> {
        self.imp.set_client_name(name)
    }

    pub fn set_port_name(&mut self, name: &str) -> Result<()> {
        self.imp.set_port_name(name)
    }

    /// Sends one MIDI 1.0 message. Oversize SysEx is chunked when the
    /// backend is configured for it; every submitted byte reaches the wire
    /// exactly once, in order. UMP-only backends refuse with
    /// `UnsupportedOperation`.
    pub fn send_message(&mut self, bytes: &[u8]) -> Result<()> {
        self.imp.send(bytes)
    }

    /// Sends a UMP word stream, one packet at a time; zero words are
    /// treated as padding and skipped. Byte-oriented backends refuse with
    /// `UnsupportedOperation`.
    pub fn send_ump(&mut self, words: &[u32]) -> Result<()> {
        self.imp.send_ump(words)
    }

    /// Schedules `bytes` for delivery at `timestamp`, on backends that
    /// expose scheduling; others refuse with `UnsupportedOperation`.
    pub fn schedule_message(&mut self, timestamp: i64, bytes: &[u8]) -> Result<()> {
        self.imp.schedule(timestamp, bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MidiMessage;
    use crate::ump::Ump;

    #[test]
    fn instances_are_send() {
        fn is_send<T: Send>() {}
        is_send::<MidiInput>();
        is_send::<MidiOutput>();
        is_send::<InputPort>();
        is_send::<OutputPort>();
    }

    #[test]
    fn ump_handler_on_byte_api_is_a_mismatch() {
        let config = InputConfig::with_ump_callback(|_: &Ump| {});
        let err = MidiInput::new(config, ApiConfig::Loopback(Default::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiConfigMismatch);
    }

    #[test]
    fn byte_handler_on_ump_api_is_a_mismatch() {
        let config = InputConfig::with_callback(|_: &MidiMessage| {});
        let err = MidiInput::new(config, ApiConfig::LoopbackUmp(Default::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ApiConfigMismatch);
    }

    #[test]
    fn requesting_a_missing_backend_fails() {
        let config = InputConfig::with_callback(|_: &MidiMessage| {});
        let err = MidiInput::new(config, ApiConfig::Jack(Default::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }
}
