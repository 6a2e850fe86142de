//! A convenience client that routes between several inputs and outputs.
//!
//! The client owns an observer and any number of open inputs and outputs.
//! Each incoming message invokes the routing callback, which may forward
//! it to any owned output through the [`Router`]. Hot-plugged ports are
//! opened automatically under the stable names `input_{k}` / `output_{k}`
//! with monotonically increasing `k`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::api::Api;
use crate::common::{MidiInput, MidiOutput};
use crate::config::{
    ApiConfig, InputConfig, InputPortCallback, LoopbackConfig, ObserverConfig, ObserverFlags,
    OutputPortCallback,
};
use crate::backend::loopback::LoopbackHub;
use crate::errors::{Error, ErrorKind, Result};
use crate::message::MidiMessage;
use crate::observer::Observer;
use crate::ports::{InputPort, OutputPort};

/// Routing callback: the port a message arrived on, the message, and a
/// router to forward it with.
pub type RoutingCallback = Box<dyn FnMut(&InputPort, &MidiMessage, &Router) + Send>;

/// Configuration of a [`MidiClient`].
pub struct ClientConfig {
    pub api: Api,
    pub client_name: String,
    /// Observer filter; the default tracks every transport so software
    /// ports are routed too.
    pub flags: ObserverFlags,
    pub on_message: Option<RoutingCallback>,
    /// Open every matching port that appears, as `input_{k}`/`output_{k}`.
    pub auto_open: bool,
    pub input_added: Option<InputPortCallback>,
    pub input_removed: Option<InputPortCallback>,
    pub output_added: Option<OutputPortCallback>,
    pub output_removed: Option<OutputPortCallback>,
    /// Shared loopback session, when the client runs on the loopback API.
    pub context: Option<Arc<LoopbackHub>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api: Api::Unspecified,
            client_name: "unimidi client".to_owned(),
            flags: ObserverFlags::TRACK_ANY | ObserverFlags::NOTIFY_IN_CONSTRUCTOR,
            on_message: None,
            auto_open: false,
            input_added: None,
            input_removed: None,
            output_added: None,
            output_removed: None,
            context: None,
        }
    }
}

struct Shared {
    api: Api,
    client_name: String,
    context: Option<Arc<LoopbackHub>>,
    inputs: Mutex<HashMap<u64, MidiInput>>,
    outputs: Mutex<HashMap<u64, MidiOutput>>,
    on_message: Mutex<Option<RoutingCallback>>,
    input_k: AtomicU64,
    output_k: AtomicU64,
}

impl Shared {
    fn api_config(&self) -> ApiConfig {
        match self.api {
            Api::Loopback => ApiConfig::Loopback(self.loopback_config()),
            Api::LoopbackUmp => ApiConfig::LoopbackUmp(self.loopback_config()),
            api => ApiConfig::default_for(api),
        }
    }

    fn loopback_config(&self) -> LoopbackConfig {
        LoopbackConfig {
            client_name: self.client_name.clone(),
            context: self.context.clone(),
            ..Default::default()
        }
    }

    fn add_input(self: &Arc<Self>, port: &InputPort, name: &str) -> Result<()> {
        let shared = self.clone();
        let source = port.clone();
        let router = Router {
            shared: self.clone(),
        };
        let config = InputConfig::with_callback(move |message: &MidiMessage| {
            if let Some(callback) = shared.on_message.lock().as_mut() {
                callback(&source, message, &router);
            }
        });
        let mut input = MidiInput::new(config, self.api_config())?;
        input.open_port(port, name)?;
        self.inputs.lock().insert(port.handle, input);
        Ok(())
    }

    fn add_output(self: &Arc<Self>, port: &OutputPort, name: &str) -> Result<()> {
        let mut output = MidiOutput::new(Default::default(), self.api_config())?;
        output.open_port(port, name)?;
        self.outputs.lock().insert(port.handle, output);
        Ok(())
    }
}

/// Forwards messages to the client's owned outputs. Cheap to clone; safe
/// to use from the routing callback.
pub struct Router {
    shared: Arc<Shared>,
}

impl Clone for Router {
    fn clone(&self) -> Router {
        Router {
            shared: self.shared.clone(),
        }
    }
}

impl Router {
    /// Sends `bytes` to every owned output, in port order. The first
    /// failure is returned after all sends were attempted.
    pub fn send_message(&self, bytes: &[u8]) -> Result<()> {
        let mut outputs = self.shared.outputs.lock();
        let mut first_err = None;
        for output in outputs.values_mut() {
            if let Err(err) = output.send_message(bytes) {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Sends `bytes` to the owned output opened on `port`.
    pub fn send_to(&self, port: &OutputPort, bytes: &[u8]) -> Result<()> {
        let mut outputs = self.shared.outputs.lock();
        match outputs.get_mut(&port.handle) {
            Some(output) => output.send_message(bytes),
            None => Err(Error::core(ErrorKind::InvalidPort)),
        }
    }
}

/// The pass-through client.
pub struct MidiClient {
    shared: Arc<Shared>,
    observer: Observer,
}

impl MidiClient {
    pub fn new(mut config: ClientConfig) -> Result<MidiClient> {
        let shared = Arc::new(Shared {
            api: config.api,
            client_name: config.client_name.clone(),
            context: config.context.take(),
            inputs: Mutex::new(HashMap::new()),
            outputs: Mutex::new(HashMap::new()),
            on_message: Mutex::new(config.on_message.take()),
            input_k: AtomicU64::new(1),
            output_k: AtomicU64::new(1),
        });

        let auto_open = config.auto_open;
        let mut user_input_added = config.input_added.take();
        let mut user_input_removed = config.input_removed.take();
        let mut user_output_added = config.output_added.take();
        let mut user_output_removed = config.output_removed.take();

        let observer_config = ObserverConfig {
            flags: config.flags,
            input_added: Some({
                let shared = shared.clone();
                Box::new(move |port: &InputPort| {
                    if auto_open {
                        let k = shared.input_k.fetch_add(1, Ordering::Relaxed);
                        let name = format!("input_{k}");
                        if let Err(err) = shared.add_input(port, &name) {
                            warn!("could not open appearing input '{}': {err}", port.port_name);
                        }
                    }
                    if let Some(f) = user_input_added.as_mut() {
                        f(port);
                    }
                })
            }),
            input_removed: Some({
                let shared = shared.clone();
                Box::new(move |port: &InputPort| {
                    shared.inputs.lock().remove(&port.handle);
                    if let Some(f) = user_input_removed.as_mut() {
                        f(port);
                    }
                })
            }),
            output_added: Some({
                let shared = shared.clone();
                Box::new(move |port: &OutputPort| {
                    if auto_open {
                        let k = shared.output_k.fetch_add(1, Ordering::Relaxed);
                        let name = format!("output_{k}");
                        if let Err(err) = shared.add_output(port, &name) {
                            warn!("could not open appearing output '{}': {err}", port.port_name);
                        }
                    }
                    if let Some(f) = user_output_added.as_mut() {
                        f(port);
                    }
                })
            }),
            output_removed: Some({
                let shared = shared.clone();
                Box::new(move |port: &OutputPort| {
                    shared.outputs.lock().remove(&port.handle);
                    if let Some(f) = user_output_removed.as_mut() {
                        f(port);
                    }
                })
            }),
            ..Default::default()
        };

        let api_config = shared.api_config();
        let observer = Observer::new(observer_config, api_config)?;
        Ok(MidiClient { shared, observer })
    }

    pub fn current_api(&self) -> Api {
        self.observer.current_api()
    }

    pub fn get_input_ports(&self) -> Vec<InputPort> {
        self.observer.get_input_ports()
    }

    pub fn get_output_ports(&self) -> Vec<OutputPort> {
        self.observer.get_output_ports()
    }

    /// Opens `port` for receiving under `name` and routes its messages.
    pub fn add_input(&self, port: &InputPort, name: &str) -> Result<()> {
        self.shared.add_input(port, name)
    }

    /// Closes the input previously added for `port`.
    pub fn remove_input(&self, port: &InputPort) {
        self.shared.inputs.lock().remove(&port.handle);
    }

    /// Opens `port` for sending under `name`.
    pub fn add_output(&self, port: &OutputPort, name: &str) -> Result<()> {
        self.shared.add_output(port, name)
    }

    /// Closes the output previously added for `port`.
    pub fn remove_output(&self, port: &OutputPort) {
        self.shared.outputs.lock().remove(&port.handle);
    }

    /// Broadcasts `bytes` to every owned output.
    pub fn send_message(&self, bytes: &[u8]) -> Result<()> {
        self.router().send_message(bytes)
    }

    /// A router handle usable outside the routing callback.
    pub fn router(&self) -> Router {
        Router {
            shared: self.shared.clone(),
        }
    }
}
