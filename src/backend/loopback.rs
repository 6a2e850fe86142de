//! The in-process software loopback backend.
//!
//! A [`LoopbackHub`] models the MIDI subsystem: it owns *cables*, each with
//! an input end and an output end. Whatever is written to a cable's output
//! end is delivered to the instance that opened its input end. Cables can
//! be added and removed while the hub is live, which drives the same
//! hot-plug machinery a hardware backend would; tests use this to inject
//! plug/unplug sequences.

use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::api::Api;
use crate::backend::{BackendSpec, MidiInApi, MidiOutApi, ObserverApi};
use crate::config::{
    ApiConfig, ChunkingParameters, InputConfig, LoopbackConfig, ManualPollHook, ObserverConfig,
    ObserverFlags, OutputConfig, PollRegistration, StopPollHook,
};
use crate::errors::{Error, ErrorDomain, ErrorKind, Result};
use crate::input::InputStateMachine;
use crate::observer::{accepts, PortCaps};
use crate::output::{send_chunked, segment_ump_stream, RingBuffer};
use crate::ports::{
    BlockDirection, FunctionBlock, InputPort, OutputPort, PortDirection, PortInfo, Protocols,
    Transport, UmpEndpointInfo,
};
use crate::timestamp::{monotonic_now, ClockInfo};

const DEVICE_NAME: &str = "Loopback Hub";
const MANUFACTURER: &str = "unimidi";

fn loopback_error(kind: ErrorKind) -> Error {
    Error::new(ErrorDomain::Loopback, kind)
}

fn clock_info() -> ClockInfo {
    ClockInfo {
        has_absolute_timestamps: true,
        absolute_is_monotonic: true,
        has_samples: false,
    }
}

// ---------------------------------------------------------------------------
// Hub

struct Cable {
    id: u64,
    ump: bool,
    /// Endpoint name; the per-end names start out equal to it.
    name: String,
    input_name: String,
    output_name: String,
    input_handle: u64,
    output_handle: u64,
    input_busy: bool,
    output_busy: bool,
    /// Delivery queue of the instance holding the input end.
    receiver: Option<Arc<InputQueue>>,
}

impl Cable {
    fn api(&self) -> Api {
        if self.ump {
            Api::LoopbackUmp
        } else {
            Api::Loopback
        }
    }

    fn caps(&self, direction: PortDirection) -> PortCaps {
        PortCaps {
            transport: Transport::Loopback,
            has_input: direction == PortDirection::Input,
            has_output: direction == PortDirection::Output,
            midi1: !self.ump,
            midi2: self.ump,
        }
    }

    fn endpoint_caps(&self) -> PortCaps {
        PortCaps {
            transport: Transport::Loopback,
            has_input: true,
            has_output: true,
            midi1: !self.ump,
            midi2: self.ump,
        }
    }

    fn input_port(&self) -> InputPort {
        InputPort(self.port_info(PortDirection::Input))
    }

    fn output_port(&self) -> OutputPort {
        OutputPort(self.port_info(PortDirection::Output))
    }

    fn port_info(&self, direction: PortDirection) -> PortInfo {
        let (handle, name) = match direction {
            PortDirection::Input => (self.input_handle, &self.input_name),
            PortDirection::Output => (self.output_handle, &self.output_name),
        };
        PortInfo {
            api: self.api(),
            handle,
            port_name: name.clone(),
            display_name: name.clone(),
            device_name: DEVICE_NAME.to_owned(),
            manufacturer: MANUFACTURER.to_owned(),
            direction,
            transport: Transport::Loopback,
        }
    }

    fn endpoint_info(&self) -> UmpEndpointInfo {
        UmpEndpointInfo {
            name: self.name.clone(),
            product_instance_id: format!("loopback:{}", self.id),
            version: Default::default(),
            protocols: Protocols::MIDI1 | Protocols::MIDI2,
            function_blocks: vec![FunctionBlock {
                name: self.name.clone(),
                direction: BlockDirection::Bidirectional,
                first_group: 0,
                group_count: 1,
                active: true,
            }],
            static_function_blocks: true,
        }
    }
}

struct Subscriber {
    id: u64,
    api: Api,
    flags: ObserverFlags,
    callbacks: Arc<Mutex<ObserverConfig>>,
}

enum HubEvent {
    InputAdded(InputPort),
    InputRemoved(InputPort),
    InputUpdated(InputPort),
    OutputAdded(OutputPort),
    OutputRemoved(OutputPort),
    OutputUpdated(OutputPort),
    EndpointAdded(UmpEndpointInfo),
    EndpointRemoved(UmpEndpointInfo),
}

type Notification = (Arc<Mutex<ObserverConfig>>, Vec<HubEvent>);

#[derive(Default)]
struct HubState {
    next_handle: u64,
    next_subscriber: u64,
    cables: Vec<Cable>,
    subscribers: Vec<Subscriber>,
}

impl HubState {
    fn cable_by_id(&mut self, id: u64) -> Option<&mut Cable> {
        self.cables.iter_mut().find(|c| c.id == id)
    }
}

/// The process-local software MIDI subsystem.
///
/// Multiple `MidiInput`/`MidiOutput`/`Observer` instances attach to one hub
/// either implicitly (the [`global`](LoopbackHub::global) hub) or through
/// [`LoopbackConfig::context`], in which case the caller owns the session.
///
/// Observer callbacks run on the thread that mutates the hub (the one
/// adding or removing a cable). They must return promptly and must not
/// create or remove ports themselves.
pub struct LoopbackHub {
    state: Mutex<HubState>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        LoopbackHub {
            state: Mutex::new(HubState::default()),
        }
    }
}

impl LoopbackHub {
    pub fn new() -> Arc<LoopbackHub> {
        Arc::new(LoopbackHub::default())
    }

    /// The hub used when a configuration carries no explicit context.
    pub fn global() -> Arc<LoopbackHub> {
        static GLOBAL: OnceLock<Arc<LoopbackHub>> = OnceLock::new();
        GLOBAL.get_or_init(LoopbackHub::new).clone()
    }

    /// Creates a byte-oriented cable and announces both ends.
    pub fn add_cable(&self, name: &str) -> (InputPort, OutputPort) {
        self.add_cable_inner(name, false)
    }

    /// Creates a UMP cable and announces both ends (and the endpoint).
    pub fn add_ump_cable(&self, name: &str) -> (InputPort, OutputPort) {
        self.add_cable_inner(name, true)
    }

    fn add_cable_inner(&self, name: &str, ump: bool) -> (InputPort, OutputPort) {
        let (ports, notifications) = {
            let mut state = self.state.lock();
            let id = state.next_handle;
            state.next_handle += 3;
            let cable = Cable {
                id,
                ump,
                name: name.to_owned(),
                input_name: name.to_owned(),
                output_name: name.to_owned(),
                input_handle: id + 1,
                output_handle: id + 2,
                input_busy: false,
                output_busy: false,
                receiver: None,
            };
            debug!("loopback: adding {} cable '{name}'", if ump { "ump" } else { "midi1" });
            let ports = (cable.input_port(), cable.output_port());
            let notifications = collect_cable_events(&state, &cable, CableChange::Added);
            state.cables.push(cable);
            (ports, notifications)
        };
        dispatch(notifications);
        ports
    }

    /// Removes the cable one of whose ends is `port`, firing `removed`
    /// events exactly once. An input open on the cable stops receiving;
    /// its next operations report the port gone.
    pub fn remove_cable(&self, port: &PortInfo) -> Result<()> {
        let notifications = {
            let mut state = self.state.lock();
            let idx = state
                .cables
                .iter()
                .position(|c| c.input_handle == port.handle || c.output_handle == port.handle)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?;
            let cable = state.cables.remove(idx);
            if let Some(queue) = &cable.receiver {
                queue.close();
            }
            collect_cable_events(&state, &cable, CableChange::Removed)
        };
        dispatch(notifications);
        Ok(())
    }

    fn rename_end(&self, cable_id: u64, direction: PortDirection, name: &str) -> Result<()> {
        let notifications = {
            let mut state = self.state.lock();
            let idx = state
                .cables
                .iter()
                .position(|c| c.id == cable_id)
                .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
            match direction {
                PortDirection::Input => state.cables[idx].input_name = name.to_owned(),
                PortDirection::Output => state.cables[idx].output_name = name.to_owned(),
            }
            let cable = &state.cables[idx];
            let mut out = Vec::new();
            for sub in &state.subscribers {
                if sub.api != cable.api() {
                    continue;
                }
                if !accepts(sub.flags, cable.caps(direction)) {
                    continue;
                }
                let event = match direction {
                    PortDirection::Input => HubEvent::InputUpdated(cable.input_port()),
                    PortDirection::Output => HubEvent::OutputUpdated(cable.output_port()),
                };
                out.push((sub.callbacks.clone(), vec![event]));
            }
            out
        };
        dispatch(notifications);
        Ok(())
    }

    /// Routes one packet to the cable's receiver, growing the receiver's
    /// ring once when it is full. Packets sent while no input is attached
    /// vanish, like notes played into an unconnected cable.
    fn deliver(&self, cable_id: u64, payload: &[u8], timestamp: i64) -> Result<()> {
        let queue = {
            let mut state = self.state.lock();
            let cable = state
                .cable_by_id(cable_id)
                .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
            match &cable.receiver {
                Some(queue) => queue.clone(),
                None => return Ok(()),
            }
        };
        queue.push(payload, timestamp)
    }

    fn subscribe(&self, api: Api, config: ObserverConfig) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_subscriber;
        state.next_subscriber += 1;
        let flags = config.flags;
        state.subscribers.push(Subscriber {
            id,
            api,
            flags,
            callbacks: Arc::new(Mutex::new(config)),
        });
        id
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        state.subscribers.retain(|s| s.id != id);
    }

    fn list_inputs(&self, api: Api, flags: ObserverFlags) -> Vec<InputPort> {
        let state = self.state.lock();
        state
            .cables
            .iter()
            .filter(|c| c.api() == api && accepts(flags, c.caps(PortDirection::Input)))
            .map(Cable::input_port)
            .collect()
    }

    fn list_outputs(&self, api: Api, flags: ObserverFlags) -> Vec<OutputPort> {
        let state = self.state.lock();
        state
            .cables
            .iter()
            .filter(|c| c.api() == api && accepts(flags, c.caps(PortDirection::Output)))
            .map(Cable::output_port)
            .collect()
    }

    fn list_endpoints(&self, api: Api, flags: ObserverFlags) -> Vec<UmpEndpointInfo> {
        if !api.is_ump() {
            return Vec::new();
        }
        let state = self.state.lock();
        state
            .cables
            .iter()
            .filter(|c| c.api() == api && accepts(flags, c.endpoint_caps()))
            .map(Cable::endpoint_info)
            .collect()
    }
}

#[derive(Clone, Copy)]
enum CableChange {
    Added,
    Removed,
}

fn collect_cable_events(
    state: &HubState,
    cable: &Cable,
    change: CableChange,
) -> Vec<Notification> {
    let mut out = Vec::new();
    for sub in &state.subscribers {
        if sub.api != cable.api() {
            continue;
        }
        let mut events = Vec::new();
        if accepts(sub.flags, cable.caps(PortDirection::Input)) {
            events.push(match change {
                CableChange::Added => HubEvent::InputAdded(cable.input_port()),
                CableChange::Removed => HubEvent::InputRemoved(cable.input_port()),
            });
        }
        if accepts(sub.flags, cable.caps(PortDirection::Output)) {
            events.push(match change {
                CableChange::Added => HubEvent::OutputAdded(cable.output_port()),
                CableChange::Removed => HubEvent::OutputRemoved(cable.output_port()),
            });
        }
        if cable.ump && accepts(sub.flags, cable.endpoint_caps()) {
            events.push(match change {
                CableChange::Added => HubEvent::EndpointAdded(cable.endpoint_info()),
                CableChange::Removed => HubEvent::EndpointRemoved(cable.endpoint_info()),
            });
        }
        if !events.is_empty() {
            out.push((sub.callbacks.clone(), events));
        }
    }
    out
}

/// Runs callbacks with the hub lock released, on the mutating thread.
fn dispatch(notifications: Vec<Notification>) {
    for (callbacks, events) in notifications {
        let mut cb = callbacks.lock();
        for event in events {
            match event {
                HubEvent::InputAdded(p) => {
                    if let Some(f) = cb.input_added.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::InputRemoved(p) => {
                    if let Some(f) = cb.input_removed.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::InputUpdated(p) => {
                    if let Some(f) = cb.input_updated.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::OutputAdded(p) => {
                    if let Some(f) = cb.output_added.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::OutputRemoved(p) => {
                    if let Some(f) = cb.output_removed.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::OutputUpdated(p) => {
                    if let Some(f) = cb.output_updated.as_mut() {
                        f(&p);
                    }
                }
                HubEvent::EndpointAdded(e) => {
                    if let Some(f) = cb.endpoint_added.as_mut() {
                        f(&e);
                    }
                }
                HubEvent::EndpointRemoved(e) => {
                    if let Some(f) = cb.endpoint_removed.as_mut() {
                        f(&e);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Input delivery queue

struct QueueState {
    ring: RingBuffer,
    closed: bool,
}

struct InputQueue {
    inner: Mutex<QueueState>,
    cond: Condvar,
}

impl InputQueue {
    fn new(capacity: usize) -> Arc<InputQueue> {
        Arc::new(InputQueue {
            inner: Mutex::new(QueueState {
                ring: RingBuffer::new(capacity),
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn push(&self, payload: &[u8], timestamp: i64) -> Result<()> {
        let ts = timestamp.to_ne_bytes();
        let mut q = self.inner.lock();
        if q.closed {
            return Ok(());
        }
        if q.ring.push_parts(&[&ts[..], payload]).is_err() {
            // grow once outside any realtime path, then give up
            q.ring.grow();
            q.ring
                .push_parts(&[&ts[..], payload])
                .map_err(|_| loopback_error(ErrorKind::NoBufferSpace))?;
        }
        drop(q);
        self.cond.notify_one();
        Ok(())
    }

    fn close(&self) {
        let mut q = self.inner.lock();
        q.closed = true;
        drop(q);
        self.cond.notify_all();
    }
}

fn deliver_packet(sm: &Mutex<InputStateMachine>, packet: &[u8], ump: bool) {
    let (ts, payload) = packet.split_at(std::mem::size_of::<i64>());
    let ts = i64::from_ne_bytes(ts.try_into().expect("fixed prefix"));
    let mut sm = sm.lock();
    if ump {
        let words: Vec<u32> = payload
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes(c.try_into().expect("word aligned")))
            .collect();
        sm.on_words(&words, ts);
    } else {
        sm.on_bytes(payload, ts);
    }
}

fn delivery_loop(queue: Arc<InputQueue>, sm: Arc<Mutex<InputStateMachine>>, ump: bool) {
    let mut packet = Vec::new();
    loop {
        let live = {
            let mut q = queue.inner.lock();
            loop {
                packet.clear();
                if q.ring.pop(&mut packet).is_some() {
                    break true;
                }
                if q.closed {
                    break false;
                }
                queue.cond.wait(&mut q);
            }
        };
        if !live {
            return;
        }
        deliver_packet(&sm, &packet, ump);
    }
}

// ---------------------------------------------------------------------------
// Input

struct OpenInput {
    cable_id: u64,
    queue: Arc<InputQueue>,
    thread: Option<JoinHandle<()>>,
    poll_token: Option<u64>,
    owns_cable: bool,
}

struct LoopbackMidiIn {
    hub: Arc<LoopbackHub>,
    api: Api,
    client_name: String,
    ringbuffer_size: usize,
    manual_poll: Option<ManualPollHook>,
    stop_poll: Option<StopPollHook>,
    sm: Arc<Mutex<InputStateMachine>>,
    open: Option<OpenInput>,
}

impl LoopbackMidiIn {
    fn new(config: InputConfig, api_config: LoopbackConfig, api: Api) -> LoopbackMidiIn {
        let hub = api_config.context.unwrap_or_else(LoopbackHub::global);
        LoopbackMidiIn {
            hub,
            api,
            client_name: api_config.client_name,
            ringbuffer_size: api_config.ringbuffer_size,
            manual_poll: api_config.manual_poll,
            stop_poll: api_config.stop_poll,
            sm: Arc::new(Mutex::new(InputStateMachine::new(config, clock_info()))),
            open: None,
        }
    }

    fn attach(&mut self, cable_id: u64, port_handle: u64, owns_cable: bool) -> Result<()> {
        let queue = {
            let mut state = self.hub.state.lock();
            let cable = state
                .cable_by_id(cable_id)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?;
            if cable.input_busy {
                return Err(loopback_error(ErrorKind::PortBusy));
            }
            let queue = InputQueue::new(self.ringbuffer_size);
            cable.input_busy = true;
            cable.receiver = Some(queue.clone());
            queue
        };

        self.sm.lock().begin_session(monotonic_now());

        let ump = self.api.is_ump();
        let mut open = OpenInput {
            cable_id,
            queue: queue.clone(),
            thread: None,
            poll_token: None,
            owns_cable,
        };

        if let Some(register) = self.manual_poll.as_mut() {
            let sm = self.sm.clone();
            let poll_queue = queue;
            let registration = PollRegistration {
                token: port_handle,
                poll: Box::new(move || {
                    let mut packet = Vec::new();
                    loop {
                        let popped = {
                            let mut q = poll_queue.inner.lock();
                            if q.closed {
                                return false;
                            }
                            packet.clear();
                            q.ring.pop(&mut packet).is_some()
                        };
                        if !popped {
                            return true;
                        }
                        deliver_packet(&sm, &packet, ump);
                    }
                }),
            };
            register(registration);
            open.poll_token = Some(port_handle);
        } else {
            let sm = self.sm.clone();
            let handle = std::thread::Builder::new()
                .name("unimidi-loopback-in".to_owned())
                .spawn(move || delivery_loop(queue, sm, ump))
                .map_err(|_| loopback_error(ErrorKind::SystemError(0)))?;
            open.thread = Some(handle);
        }

        self.open = Some(open);
        Ok(())
    }

    fn close_internal(&mut self) -> Result<()> {
        let mut open = self
            .open
            .take()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        {
            let mut state = self.hub.state.lock();
            if let Some(cable) = state.cable_by_id(open.cable_id) {
                cable.input_busy = false;
                cable.receiver = None;
            }
        }
        open.queue.close();
        if let Some(thread) = open.thread.take() {
            let _ = thread.join();
        }
        if let (Some(stop), Some(token)) = (self.stop_poll.as_mut(), open.poll_token) {
            stop(token);
        }
        // delivery has stopped; flag anything cut off mid-message
        self.sm.lock().finish();
        if open.owns_cable {
            let port = {
                let mut state = self.hub.state.lock();
                state.cable_by_id(open.cable_id).map(|c| c.input_port().0)
            };
            if let Some(port) = port {
                let _ = self.hub.remove_cable(&port);
            }
        }
        Ok(())
    }
}

impl MidiInApi for LoopbackMidiIn {
    fn api(&self) -> Api {
        self.api
    }

    fn open_port(&mut self, port: &InputPort, _port_name: &str) -> Result<()> {
        if self.open.is_some() {
            self.close_internal()?;
        }
        if port.api() != self.api {
            return Err(loopback_error(ErrorKind::InvalidPort));
        }
        let cable_id = {
            let state = self.hub.state.lock();
            state
                .cables
                .iter()
                .find(|c| c.input_handle == port.handle)
                .map(|c| c.id)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?
        };
        self.attach(cable_id, port.handle, false)
    }

    fn open_virtual_port(&mut self, port_name: &str) -> Result<()> {
        if self.open.is_some() {
            self.close_internal()?;
        }
        let (input, _output) = if self.api.is_ump() {
            self.hub.add_ump_cable(port_name)
        } else {
            self.hub.add_cable(port_name)
        };
        let cable_id = {
            let state = self.hub.state.lock();
            state
                .cables
                .iter()
                .find(|c| c.input_handle == input.handle)
                .map(|c| c.id)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?
        };
        self.attach(cable_id, input.handle, true)
    }

    fn close_port(&mut self) -> Result<()> {
        self.close_internal()
    }

    fn is_port_open(&self) -> bool {
        self.open.is_some()
    }

    fn absolute_timestamp(&self) -> i64 {
        monotonic_now()
    }

    fn set_client_name(&mut self, name: &str) -> Result<()> {
        self.client_name = name.to_owned();
        Ok(())
    }

    fn set_port_name(&mut self, name: &str) -> Result<()> {
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        self.hub.rename_end(open.cable_id, PortDirection::Input, name)
    }
}

impl Drop for LoopbackMidiIn {
    fn drop(&mut self) {
        if self.open.is_some() {
            let _ = self.close_internal();
        }
    }
}

// ---------------------------------------------------------------------------
// Output

struct OpenOutput {
    cable_id: u64,
    owns_cable: bool,
}

struct LoopbackMidiOut {
    hub: Arc<LoopbackHub>,
    api: Api,
    client_name: String,
    chunking: Option<ChunkingParameters>,
    open: Option<OpenOutput>,
    /// Reused per send to serialize UMP words; keeps the send path free of
    /// per-packet allocation.
    scratch: Vec<u8>,
}

impl LoopbackMidiOut {
    fn new(_config: OutputConfig, api_config: LoopbackConfig, api: Api) -> LoopbackMidiOut {
        let hub = api_config.context.unwrap_or_else(LoopbackHub::global);
        LoopbackMidiOut {
            hub,
            api,
            client_name: api_config.client_name,
            chunking: api_config.chunking,
            open: None,
            scratch: Vec::with_capacity(16),
        }
    }

    fn attach(&mut self, cable_id: u64, owns_cable: bool) -> Result<()> {
        let mut state = self.hub.state.lock();
        let cable = state
            .cable_by_id(cable_id)
            .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?;
        if cable.output_busy {
            return Err(loopback_error(ErrorKind::PortBusy));
        }
        cable.output_busy = true;
        drop(state);
        self.open = Some(OpenOutput { cable_id, owns_cable });
        Ok(())
    }

    fn close_internal(&mut self) -> Result<()> {
        let open = self
            .open
            .take()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        let port = {
            let mut state = self.hub.state.lock();
            match state.cable_by_id(open.cable_id) {
                Some(cable) => {
                    cable.output_busy = false;
                    Some(cable.output_port().0.clone())
                }
                None => None,
            }
        };
        if open.owns_cable {
            if let Some(port) = port {
                let _ = self.hub.remove_cable(&port);
            }
        }
        Ok(())
    }
}

impl MidiOutApi for LoopbackMidiOut {
    fn api(&self) -> Api {
        self.api
    }

    fn open_port(&mut self, port: &OutputPort, _port_name: &str) -> Result<()> {
        if self.open.is_some() {
            self.close_internal()?;
        }
        if port.api() != self.api {
            return Err(loopback_error(ErrorKind::InvalidPort));
        }
        let cable_id = {
            let state = self.hub.state.lock();
            state
                .cables
                .iter()
                .find(|c| c.output_handle == port.handle)
                .map(|c| c.id)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?
        };
        self.attach(cable_id, false)
    }

    fn open_virtual_port(&mut self, port_name: &str) -> Result<()> {
        if self.open.is_some() {
            self.close_internal()?;
        }
        let (_input, output) = if self.api.is_ump() {
            self.hub.add_ump_cable(port_name)
        } else {
            self.hub.add_cable(port_name)
        };
        let cable_id = {
            let state = self.hub.state.lock();
            state
                .cables
                .iter()
                .find(|c| c.output_handle == output.handle)
                .map(|c| c.id)
                .ok_or_else(|| loopback_error(ErrorKind::InvalidPort))?
        };
        self.attach(cable_id, true)
    }

    fn close_port(&mut self) -> Result<()> {
        self.close_internal()
    }

    fn is_port_open(&self) -> bool {
        self.open.is_some()
    }

    fn set_client_name(&mut self, name: &str) -> Result<()> {
        self.client_name = name.to_owned();
        Ok(())
    }

    fn set_port_name(&mut self, name: &str) -> Result<()> {
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        self.hub
            .rename_end(open.cable_id, PortDirection::Output, name)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.api.is_ump() {
            return Err(loopback_error(ErrorKind::UnsupportedOperation));
        }
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        let hub = &self.hub;
        let cable_id = open.cable_id;
        send_chunked(bytes, self.chunking.as_mut(), |chunk| {
            hub.deliver(cable_id, chunk, monotonic_now())
        })
    }

    fn send_ump(&mut self, words: &[u32]) -> Result<()> {
        if !self.api.is_ump() {
            return Err(loopback_error(ErrorKind::UnsupportedOperation));
        }
        let open = self
            .open
            .as_ref()
            .ok_or_else(|| loopback_error(ErrorKind::NotConnected))?;
        let hub = &self.hub;
        let cable_id = open.cable_id;
        let scratch = &mut self.scratch;
        segment_ump_stream(
            words,
            |packet| {
                scratch.clear();
                for word in packet {
                    scratch.extend_from_slice(&word.to_ne_bytes());
                }
                hub.deliver(cable_id, scratch, monotonic_now())
            },
            || Ok(()),
        )
    }
}

impl Drop for LoopbackMidiOut {
    fn drop(&mut self) {
        if self.open.is_some() {
            let _ = self.close_internal();
        }
    }
}

// ---------------------------------------------------------------------------
// Observer

struct LoopbackObserver {
    hub: Arc<LoopbackHub>,
    api: Api,
    flags: ObserverFlags,
    subscriber: u64,
}

impl LoopbackObserver {
    fn new(mut config: ObserverConfig, api_config: LoopbackConfig, api: Api) -> LoopbackObserver {
        let hub = api_config.context.unwrap_or_else(LoopbackHub::global);
        let flags = config.flags;

        if flags.contains(ObserverFlags::NOTIFY_IN_CONSTRUCTOR) {
            // announce what already exists before anyone subscribes us
            for port in hub.list_inputs(api, flags) {
                if let Some(f) = config.input_added.as_mut() {
                    f(&port);
                }
            }
            for port in hub.list_outputs(api, flags) {
                if let Some(f) = config.output_added.as_mut() {
                    f(&port);
                }
            }
            for endpoint in hub.list_endpoints(api, flags) {
                if let Some(f) = config.endpoint_added.as_mut() {
                    f(&endpoint);
                }
            }
        }

        let subscriber = hub.subscribe(api, config);
        LoopbackObserver {
            hub,
            api,
            flags,
            subscriber,
        }
    }
}

impl ObserverApi for LoopbackObserver {
    fn api(&self) -> Api {
        self.api
    }

    fn input_ports(&self) -> Vec<InputPort> {
        self.hub.list_inputs(self.api, self.flags)
    }

    fn output_ports(&self) -> Vec<OutputPort> {
        self.hub.list_outputs(self.api, self.flags)
    }

    fn endpoints(&self) -> Vec<UmpEndpointInfo> {
        self.hub.list_endpoints(self.api, self.flags)
    }
}

impl Drop for LoopbackObserver {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.subscriber);
    }
}

// ---------------------------------------------------------------------------
// Registry entries

fn take_loopback_config(api_config: ApiConfig, ump: bool) -> Result<LoopbackConfig> {
    match (api_config, ump) {
        (ApiConfig::Loopback(c), false) | (ApiConfig::LoopbackUmp(c), true) => Ok(c),
        (ApiConfig::Unspecified, _) => Ok(LoopbackConfig::default()),
        _ => Err(loopback_error(ErrorKind::ApiConfigMismatch)),
    }
}

fn available() -> bool {
    true
}

fn observer_midi1(config: ObserverConfig, api_config: ApiConfig) -> Result<Box<dyn ObserverApi>> {
    let api_config = take_loopback_config(api_config, false)?;
    Ok(Box::new(LoopbackObserver::new(config, api_config, Api::Loopback)))
}

fn observer_ump(config: ObserverConfig, api_config: ApiConfig) -> Result<Box<dyn ObserverApi>> {
    let api_config = take_loopback_config(api_config, true)?;
    Ok(Box::new(LoopbackObserver::new(config, api_config, Api::LoopbackUmp)))
}

fn input_midi1(config: InputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiInApi>> {
    let api_config = take_loopback_config(api_config, false)?;
    Ok(Box::new(LoopbackMidiIn::new(config, api_config, Api::Loopback)))
}

fn input_ump(config: InputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiInApi>> {
    let api_config = take_loopback_config(api_config, true)?;
    Ok(Box::new(LoopbackMidiIn::new(config, api_config, Api::LoopbackUmp)))
}

fn output_midi1(config: OutputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiOutApi>> {
    let api_config = take_loopback_config(api_config, false)?;
    Ok(Box::new(LoopbackMidiOut::new(config, api_config, Api::Loopback)))
}

fn output_ump(config: OutputConfig, api_config: ApiConfig) -> Result<Box<dyn MidiOutApi>> {
    let api_config = take_loopback_config(api_config, true)?;
    Ok(Box::new(LoopbackMidiOut::new(config, api_config, Api::LoopbackUmp)))
}

pub(crate) const MIDI1_BACKEND: BackendSpec = BackendSpec {
    api: Api::Loopback,
    available,
    observer: observer_midi1,
    input: input_midi1,
    output: output_midi1,
};

pub(crate) const UMP_BACKEND: BackendSpec = BackendSpec {
    api: Api::LoopbackUmp,
    available,
    observer: observer_ump,
    input: input_ump,
    output: output_ump,
};

