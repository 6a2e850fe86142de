//! A compilable but non-functional backend: it enumerates nothing and
//! every open fails. Useful as an explicit "no MIDI" selection.

use log::warn;

use crate::api::Api;
use crate::backend::{BackendSpec, MidiInApi, MidiOutApi, ObserverApi};
use crate::config::{ApiConfig, InputConfig, ObserverConfig, OutputConfig};
use crate::errors::{Error, ErrorKind, Result};
use crate::ports::{InputPort, OutputPort};
use crate::timestamp::monotonic_now;

struct DummyObserver;

impl ObserverApi for DummyObserver {
    fn api(&self) -> Api {
        Api::Dummy
    }

    fn input_ports(&self) -> Vec<InputPort> {
        Vec::new()
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        Vec::new()
    }
}

struct DummyMidiIn;

impl MidiInApi for DummyMidiIn {
    fn api(&self) -> Api {
        Api::Dummy
    }

    fn open_port(&mut self, _port: &InputPort, _port_name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::InvalidPort))
    }

    fn open_virtual_port(&mut self, _port_name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::UnsupportedOperation))
    }

    fn close_port(&mut self) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }

    fn is_port_open(&self) -> bool {
        false
    }

    fn absolute_timestamp(&self) -> i64 {
        monotonic_now()
    }

    fn set_client_name(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn set_port_name(&mut self, _name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }
}

struct DummyMidiOut;

impl MidiOutApi for DummyMidiOut {
    fn api(&self) -> Api {
        Api::Dummy
    }

    fn open_port(&mut self, _port: &OutputPort, _port_name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::InvalidPort))
    }

    fn open_virtual_port(&mut self, _port_name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::UnsupportedOperation))
    }

    fn close_port(&mut self) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }

    fn is_port_open(&self) -> bool {
        false
    }

    fn set_client_name(&mut self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn set_port_name(&mut self, _name: &str) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }

    fn send(&mut self, _bytes: &[u8]) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }

    fn send_ump(&mut self, _words: &[u32]) -> Result<()> {
        Err(Error::core(ErrorKind::NotConnected))
    }
}

fn check_config(api_config: &ApiConfig) -> Result<()> {
    match api_config {
        ApiConfig::Dummy | ApiConfig::Unspecified => Ok(()),
        _ => Err(Error::core(ErrorKind::ApiConfigMismatch)),
    }
}

fn available() -> bool {
    true
}

fn observer(_config: ObserverConfig, api_config: ApiConfig) -> Result<Box<dyn ObserverApi>> {
    check_config(&api_config)?;
    warn!("dummy backend selected, no MIDI functionality is available");
    Ok(Box::new(DummyObserver))
}

fn input(_config: InputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiInApi>> {
    check_config(&api_config)?;
    warn!("dummy backend selected, no MIDI functionality is available");
    Ok(Box::new(DummyMidiIn))
}

fn output(_config: OutputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiOutApi>> {
    check_config(&api_config)?;
    warn!("dummy backend selected, no MIDI functionality is available");
    Ok(Box::new(DummyMidiOut))
}

pub(crate) const BACKEND: BackendSpec = BackendSpec {
    api: Api::Dummy,
    available,
    observer,
    input,
    output,
};
