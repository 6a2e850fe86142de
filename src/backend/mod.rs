//! The abstract operations every backend satisfies, and the dispatch table
//! the façade selects backends from at runtime.

pub(crate) mod dummy;
pub(crate) mod loopback;

use crate::api::{platform_order, Api};
use crate::config::{ApiConfig, InputConfig, ObserverConfig, OutputConfig};
use crate::errors::{Error, ErrorKind, Result};
use crate::ports::{InputPort, OutputPort, UmpEndpointInfo};

/// Observer operations a backend provides. Event streams are wired through
/// the [`ObserverConfig`] callbacks at construction.
pub(crate) trait ObserverApi: Send {
    fn api(&self) -> Api;
    fn input_ports(&self) -> Vec<InputPort>;
    fn output_ports(&self) -> Vec<OutputPort>;
    fn endpoints(&self) -> Vec<UmpEndpointInfo> {
        Vec::new()
    }
}

/// Input operations a backend provides.
pub(crate) trait MidiInApi: Send {
    fn api(&self) -> Api;
    fn open_port(&mut self, port: &InputPort, port_name: &str) -> Result<()>;
    fn open_virtual_port(&mut self, port_name: &str) -> Result<()>;
    fn close_port(&mut self) -> Result<()>;
    fn is_port_open(&self) -> bool;
    /// The backend clock's current reading, in nanoseconds.
    fn absolute_timestamp(&self) -> i64;
    fn set_client_name(&mut self, name: &str) -> Result<()>;
    fn set_port_name(&mut self, name: &str) -> Result<()>;
}

/// Output operations a backend provides. Backends supporting only one wire
/// format refuse the other with `UnsupportedOperation`.
pub(crate) trait MidiOutApi: Send {
    fn api(&self) -> Api;
    fn open_port(&mut self, port: &OutputPort, port_name: &str) -> Result<()>;
    fn open_virtual_port(&mut self, port_name: &str) -> Result<()>;
    fn close_port(&mut self) -> Result<()>;
    fn is_port_open(&self) -> bool;
    fn set_client_name(&mut self, name: &str) -> Result<()>;
    fn set_port_name(&mut self, name: &str) -> Result<()>;
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
    fn send_ump(&mut self, words: &[u32]) -> Result<()>;
    fn schedule(&mut self, timestamp: i64, bytes: &[u8]) -> Result<()> {
        let _ = (timestamp, bytes);
        Err(Error::core(ErrorKind::UnsupportedOperation))
    }
}

/// One compiled-in backend: availability probe plus the constructor trio.
#[derive(Debug)]
pub(crate) struct BackendSpec {
    pub api: Api,
    pub available: fn() -> bool,
    pub observer: fn(ObserverConfig, ApiConfig) -> Result<Box<dyn ObserverApi>>,
    pub input: fn(InputConfig, ApiConfig) -> Result<Box<dyn MidiInApi>>,
    pub output: fn(OutputConfig, ApiConfig) -> Result<Box<dyn MidiOutApi>>,
}

static BACKENDS: &[BackendSpec] = &[loopback::MIDI1_BACKEND, loopback::UMP_BACKEND, dummy::BACKEND];

pub(crate) fn lookup(api: Api) -> Option<&'static BackendSpec> {
    BACKENDS.iter().find(|spec| spec.api == api)
}

/// Applies the selection rules to an API-specific configuration: a concrete
/// API resolves to its backend or `BackendUnavailable`; `Unspecified`
/// searches the platform-preferred order.
pub(crate) fn resolve(config: &ApiConfig) -> Result<&'static BackendSpec> {
    match config.api() {
        Api::Unspecified => platform_order()
            .iter()
            .filter_map(|&api| lookup(api))
            .find(|spec| (spec.available)())
            .ok_or_else(|| Error::core(ErrorKind::BackendUnavailable)),
        api => match lookup(api) {
            Some(spec) if (spec.available)() => Ok(spec),
            _ => Err(Error::core(ErrorKind::BackendUnavailable)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_resolves_to_loopback() {
        // no OS backend is compiled in, so the software fallback wins
        let spec = resolve(&ApiConfig::Unspecified).unwrap();
        assert_eq!(spec.api, Api::Loopback);
    }

    #[test]
    fn unknown_apis_report_backend_unavailable() {
        let err = resolve(&ApiConfig::AlsaSeq(Default::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[test]
    fn dummy_is_resolvable_but_never_implicit() {
        assert_eq!(resolve(&ApiConfig::Dummy).unwrap().api, Api::Dummy);
    }
}
