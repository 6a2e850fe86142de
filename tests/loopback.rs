//! End-to-end tests against the software loopback backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use unimidi::{
    Api, ApiConfig, ChunkingParameters, ErrorKind, InputConfig, LoopbackConfig, LoopbackHub,
    MidiInput, MidiMessage, MidiOutput, Observer, ObserverConfig, ObserverFlags, PollRegistration,
    TimestampMode, Ump,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn loopback(hub: &Arc<LoopbackHub>) -> ApiConfig {
    ApiConfig::Loopback(LoopbackConfig {
        context: Some(hub.clone()),
        ..Default::default()
    })
}

fn loopback_ump(hub: &Arc<LoopbackHub>) -> ApiConfig {
    ApiConfig::LoopbackUmp(LoopbackConfig {
        context: Some(hub.clone()),
        ..Default::default()
    })
}

#[test]
fn midi1_messages_round_trip_with_monotonic_timestamps() {
    init_logging();
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_cable("piano");

    let (tx, rx) = mpsc::channel();
    let mut config = InputConfig::with_callback(move |m: &MidiMessage| {
        tx.send(m.clone()).unwrap();
    });
    config.timestamps = TimestampMode::Absolute;

    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();
    assert!(midi_in.is_port_open());

    let mut midi_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    midi_out.open_port(&output_port, "out").unwrap();

    midi_out.send_message(&[0x90, 60, 127]).unwrap();
    midi_out.send_message(&[0x80, 60, 0]).unwrap();
    midi_out.send_message(&[0xF8]).unwrap();

    let a = rx.recv_timeout(TIMEOUT).unwrap();
    let b = rx.recv_timeout(TIMEOUT).unwrap();
    let c = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(a.bytes, vec![0x90, 60, 127]);
    assert_eq!(b.bytes, vec![0x80, 60, 0]);
    assert_eq!(c.bytes, vec![0xF8]);
    assert!(a.timestamp >= 0);
    assert!(b.timestamp >= a.timestamp);
    assert!(c.timestamp >= b.timestamp);

    midi_in.close_port().unwrap();
    assert!(!midi_in.is_port_open());
}

#[test]
fn running_status_is_reconstructed_across_buffers() {
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_cable("rs");

    let (tx, rx) = mpsc::channel();
    let config = InputConfig::with_callback(move |m: &MidiMessage| {
        tx.send(m.bytes.clone()).unwrap();
    });
    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();

    let mut midi_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    midi_out.open_port(&output_port, "out").unwrap();

    midi_out
        .send_message(&[0x90, 0x3C, 0x7F, 0x3E, 0x7F])
        .unwrap();
    midi_out.send_message(&[0x40, 0x00]).unwrap();

    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec![0x90, 0x3C, 0x7F]);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec![0x90, 0x3E, 0x7F]);
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec![0x90, 0x40, 0x00]);
}

#[test]
fn chunked_sysex_arrives_once_and_in_order() {
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_cable("bulk");

    let (tx, rx) = mpsc::channel();
    let config = InputConfig::with_callback(move |m: &MidiMessage| {
        tx.send(m.clone()).unwrap();
    });
    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();

    let waits = Arc::new(Mutex::new(Vec::new()));
    let waits2 = waits.clone();
    let mut midi_out = MidiOutput::new(
        Default::default(),
        ApiConfig::Loopback(LoopbackConfig {
            context: Some(hub.clone()),
            chunking: Some(ChunkingParameters {
                interval: Duration::from_millis(1),
                size: 4096,
                wait: Box::new(move |_, written| {
                    waits2.lock().unwrap().push(written);
                    true
                }),
            }),
            ..Default::default()
        }),
    )
    .unwrap();
    midi_out.open_port(&output_port, "out").unwrap();

    let mut sysex = vec![0xF0];
    sysex.extend((0..16382u32).map(|i| (i % 128) as u8));
    sysex.push(0xF7);
    assert_eq!(sysex.len(), 16384);

    midi_out.send_message(&sysex).unwrap();

    assert_eq!(*waits.lock().unwrap(), vec![4096, 8192, 12288]);
    let received = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received.bytes, sysex);
}

#[test]
fn ump_streams_are_segmented_and_framed() {
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_ump_cable("synth");

    let (tx, rx) = mpsc::channel();
    let config = InputConfig::with_ump_callback(move |u: &Ump| {
        tx.send(*u).unwrap();
    });
    let mut midi_in = MidiInput::new(config, loopback_ump(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();

    let mut midi_out = MidiOutput::new(Default::default(), loopback_ump(&hub)).unwrap();
    midi_out.open_port(&output_port, "out").unwrap();

    // NOOP padding around a type-2 and a type-4 packet
    midi_out
        .send_ump(&[0x0000_0000, 0x2090_3C7F, 0x0000_0000, 0x4091_3C00, 0xFFFF_0000])
        .unwrap();

    let first = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(first.words(), &[0x2090_3C7F]);
    let second = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(second.words(), &[0x4091_3C00, 0xFFFF_0000]);
}

#[test]
fn wire_format_mismatches_are_refused() {
    let hub = LoopbackHub::new();
    let (_input1, output1) = hub.add_cable("bytes");
    let (_input2, output2) = hub.add_ump_cable("words");

    let mut byte_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    byte_out.open_port(&output1, "out").unwrap();
    assert_eq!(
        byte_out.send_ump(&[0x2090_3C7F]).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );

    let mut ump_out = MidiOutput::new(Default::default(), loopback_ump(&hub)).unwrap();
    ump_out.open_port(&output2, "out").unwrap();
    assert_eq!(
        ump_out.send_message(&[0x90, 60, 1]).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );
}

#[test]
fn port_state_errors() {
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_cable("exclusive");

    // not connected yet
    let mut midi_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    assert_eq!(
        midi_out.send_message(&[0xF8]).unwrap_err().kind(),
        ErrorKind::NotConnected
    );
    midi_out.open_port(&output_port, "out").unwrap();

    // the output end is held exclusively
    let mut second = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    assert_eq!(
        second.open_port(&output_port, "out2").unwrap_err().kind(),
        ErrorKind::PortBusy
    );

    let config = InputConfig::with_callback(|_: &MidiMessage| {});
    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();

    let config = InputConfig::with_callback(|_: &MidiMessage| {});
    let mut second_in = MidiInput::new(config, loopback(&hub)).unwrap();
    assert_eq!(
        second_in.open_port(&input_port, "in2").unwrap_err().kind(),
        ErrorKind::PortBusy
    );

    // schedule is not available on the loopback backend
    assert_eq!(
        midi_out.schedule_message(0, &[0xF8]).unwrap_err().kind(),
        ErrorKind::UnsupportedOperation
    );

    // a removed cable invalidates its ports
    hub.remove_cable(&input_port.0).unwrap();
    let config = InputConfig::with_callback(|_: &MidiMessage| {});
    let mut late = MidiInput::new(config, loopback(&hub)).unwrap();
    assert_eq!(
        late.open_port(&input_port, "late").unwrap_err().kind(),
        ErrorKind::InvalidPort
    );
    assert_eq!(
        midi_out.send_message(&[0xF8]).unwrap_err().kind(),
        ErrorKind::NotConnected
    );
}

#[test]
fn virtual_ports_appear_to_observers_and_carry_data() {
    let hub = LoopbackHub::new();

    let added = Arc::new(Mutex::new(Vec::new()));
    let added2 = added.clone();
    let observer_config = ObserverConfig {
        flags: ObserverFlags::TRACK_VIRTUAL | ObserverFlags::NOTIFY_IN_CONSTRUCTOR,
        input_added: Some(Box::new(move |port| {
            added2.lock().unwrap().push(port.port_name.clone());
        })),
        ..Default::default()
    };
    let observer = Observer::new(observer_config, loopback(&hub)).unwrap();
    assert!(observer.get_input_ports().is_empty());

    // a virtual output advertises an input end others can open
    let mut midi_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    midi_out.open_virtual_port("virtual synth").unwrap();

    assert_eq!(added.lock().unwrap().as_slice(), ["virtual synth"]);
    let ports = observer.get_input_ports();
    assert_eq!(ports.len(), 1);

    let (tx, rx) = mpsc::channel();
    let config = InputConfig::with_callback(move |m: &MidiMessage| {
        tx.send(m.bytes.clone()).unwrap();
    });
    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&ports[0], "listener").unwrap();

    midi_out.send_message(&[0x90, 64, 80]).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), vec![0x90, 64, 80]);

    // closing the virtual port unplugs the cable
    midi_out.close_port().unwrap();
    assert!(observer.get_input_ports().is_empty());
}

#[test]
fn hotplug_sequence_fires_in_order() {
    init_logging();
    let hub = LoopbackHub::new();

    let events = Arc::new(Mutex::new(Vec::new()));
    let handles = Arc::new(Mutex::new(Vec::new()));
    let (ev1, ev2) = (events.clone(), events.clone());
    let (h1, h2) = (handles.clone(), handles.clone());

    let observer_config = ObserverConfig {
        flags: ObserverFlags::TRACK_VIRTUAL,
        input_added: Some(Box::new(move |port| {
            ev1.lock().unwrap().push(format!("input_added:{}", port.port_name));
            h1.lock().unwrap().push(port.handle);
        })),
        input_removed: Some(Box::new(move |port| {
            ev2.lock().unwrap().push(format!("input_removed:{}", port.port_name));
            h2.lock().unwrap().push(port.handle);
        })),
        ..Default::default()
    };
    let _observer = Observer::new(observer_config, loopback(&hub)).unwrap();

    let (first_in, _) = hub.add_cable("X");
    hub.remove_cable(&first_in.0).unwrap();
    let (_second_in, _) = hub.add_cable("X");

    assert_eq!(
        events.lock().unwrap().as_slice(),
        [
            "input_added:X".to_owned(),
            "input_removed:X".to_owned(),
            "input_added:X".to_owned(),
        ]
    );
    // the re-plugged port may carry a fresh handle; the first two refer to
    // the same cable
    let handles = handles.lock().unwrap();
    assert_eq!(handles[0], handles[1]);
}

#[test]
fn notify_in_constructor_announces_existing_ports() {
    let hub = LoopbackHub::new();
    hub.add_cable("one");
    hub.add_cable("two");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen2 = seen.clone();
    let observer_config = ObserverConfig {
        flags: ObserverFlags::TRACK_VIRTUAL | ObserverFlags::NOTIFY_IN_CONSTRUCTOR,
        input_added: Some(Box::new(move |port| {
            seen2.lock().unwrap().push(port.port_name.clone());
        })),
        ..Default::default()
    };
    let _observer = Observer::new(observer_config, loopback(&hub)).unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), ["one", "two"]);
}

#[test]
fn rename_fires_updated_with_stable_handle() {
    let hub = LoopbackHub::new();
    let (input_port, _output_port) = hub.add_cable("old name");

    let updated = Arc::new(Mutex::new(Vec::new()));
    let updated2 = updated.clone();
    let observer_config = ObserverConfig {
        flags: ObserverFlags::TRACK_VIRTUAL,
        input_updated: Some(Box::new(move |port| {
            updated2
                .lock()
                .unwrap()
                .push((port.handle, port.port_name.clone()));
        })),
        ..Default::default()
    };
    let _observer = Observer::new(observer_config, loopback(&hub)).unwrap();

    let config = InputConfig::with_callback(|_: &MidiMessage| {});
    let mut midi_in = MidiInput::new(config, loopback(&hub)).unwrap();
    midi_in.open_port(&input_port, "in").unwrap();
    midi_in.set_port_name("new name").unwrap();

    let updated = updated.lock().unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0], (input_port.handle, "new name".to_owned()));
}

#[test]
fn manual_poll_drives_delivery_on_the_caller_thread() {
    let hub = LoopbackHub::new();
    let (input_port, output_port) = hub.add_cable("polled");

    let registration: Arc<Mutex<Option<PollRegistration>>> = Arc::new(Mutex::new(None));
    let registration2 = registration.clone();
    let stopped = Arc::new(AtomicU64::new(0));
    let stopped2 = stopped.clone();

    let (tx, rx) = mpsc::channel();
    let config = InputConfig::with_callback(move |m: &MidiMessage| {
        tx.send(m.bytes.clone()).unwrap();
    });
    let mut midi_in = MidiInput::new(
        config,
        ApiConfig::Loopback(LoopbackConfig {
            context: Some(hub.clone()),
            manual_poll: Some(Box::new(move |r| {
                *registration2.lock().unwrap() = Some(r);
                true
            })),
            stop_poll: Some(Box::new(move |token| {
                stopped2.store(token, Ordering::SeqCst);
                true
            })),
            ..Default::default()
        }),
    )
    .unwrap();
    midi_in.open_port(&input_port, "in").unwrap();

    let mut midi_out = MidiOutput::new(Default::default(), loopback(&hub)).unwrap();
    midi_out.open_port(&output_port, "out").unwrap();
    midi_out.send_message(&[0x90, 61, 10]).unwrap();

    // nothing is delivered until the application polls
    assert!(rx.try_recv().is_err());
    let mut registration = registration.lock().unwrap().take().unwrap();
    assert!((registration.poll)());
    assert_eq!(rx.try_recv().unwrap(), vec![0x90, 61, 10]);

    midi_in.close_port().unwrap();
    assert!(!(registration.poll)());
    assert_eq!(stopped.load(Ordering::SeqCst), registration.token);
}

#[test]
fn unspecified_api_selects_the_loopback_backend() {
    let config = InputConfig::with_callback(|_: &MidiMessage| {});
    let midi_in = MidiInput::new(config, ApiConfig::Unspecified).unwrap();
    assert_eq!(midi_in.current_api(), Api::Loopback);
}
