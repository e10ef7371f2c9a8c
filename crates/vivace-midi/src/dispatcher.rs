//! The MIDI dispatcher.
//!
//! Translates between the wire and the engine in both directions:
//!
//! - **Incoming** (on the event dispatcher thread): raw bytes are decoded,
//!   matched against the connection tables, and pushed onto the engine's RT
//!   input fifo as keyboard, parameter-change, or program-change events.
//! - **Outgoing** (as an [`EventObserver`]): keyboard and parameter-change
//!   notifications from the RT output are serialized to the mapped
//!   `(port, channel)` of the output frontend. Parameter feedback reuses
//!   the CC input mappings (absolute ones only) so motorized controllers
//!   track automation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use vivace_core::rt_event::{KeyboardEventKind, KeyboardRtEvent};
use vivace_core::{
    Event, EventObserver, EventPayload, ObjectId, ProcessorRegistry, RtEvent, RtEventFifo,
};

use crate::connection::{
    CcInputConnection, ConnectionSnapshot, ConnectionTables, KbdInputConnection,
    KbdOutputConnection, MidiDispatcherStatus, PcInputConnection,
};
use crate::frontend::MidiReceiver;
use crate::message::ChannelMessage;

pub struct MidiDispatcher {
    tables: Mutex<ConnectionTables>,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
    rt_input: Arc<RtEventFifo>,
    registry: Arc<ProcessorRegistry>,
    output: RwLock<Option<Arc<dyn MidiReceiver>>>,
    /// Events dropped because the RT input fifo was full.
    dropped_events: AtomicU64,
}

impl MidiDispatcher {
    pub fn new(
        midi_inputs: usize,
        midi_outputs: usize,
        rt_input: Arc<RtEventFifo>,
        registry: Arc<ProcessorRegistry>,
    ) -> Self {
        let tables = ConnectionTables::new(midi_inputs, midi_outputs);
        let snapshot = tables.snapshot_arc();
        Self {
            tables: Mutex::new(tables),
            snapshot,
            rt_input,
            registry,
            output: RwLock::new(None),
            dropped_events: AtomicU64::new(0),
        }
    }

    pub fn get_midi_inputs(&self) -> usize {
        self.tables.lock().midi_inputs()
    }

    pub fn get_midi_outputs(&self) -> usize {
        self.tables.lock().midi_outputs()
    }

    pub fn set_output_frontend(&self, output: Arc<dyn MidiReceiver>) {
        *self.output.write() = Some(output);
    }

    pub fn dropped_event_count(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    // Connection surface. Must be called on the event dispatcher thread;
    // the controller enforces this by wrapping every call in an engine-op
    // event.

    pub fn connect_kb_to_track(
        &self,
        port: usize,
        track: ObjectId,
        channel: u8,
        raw: bool,
    ) -> MidiDispatcherStatus {
        if !self.is_track(track) {
            return MidiDispatcherStatus::InvalidTarget;
        }
        self.with_tables(|t| t.connect_kb_to_track(port, track, channel, raw))
    }

    pub fn disconnect_kb_from_track(
        &self,
        port: usize,
        track: ObjectId,
        channel: u8,
        raw: bool,
    ) -> MidiDispatcherStatus {
        self.with_tables(|t| t.disconnect_kb_from_track(port, track, channel, raw))
    }

    pub fn connect_kb_output_from_track(
        &self,
        track: ObjectId,
        port: usize,
        channel: u8,
    ) -> MidiDispatcherStatus {
        if !self.is_track(track) {
            return MidiDispatcherStatus::InvalidTarget;
        }
        self.with_tables(|t| t.connect_kb_output_from_track(track, port, channel))
    }

    pub fn disconnect_kb_output_from_track(
        &self,
        track: ObjectId,
        port: usize,
        channel: u8,
    ) -> MidiDispatcherStatus {
        self.with_tables(|t| t.disconnect_kb_output_from_track(track, port, channel))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &self,
        port: usize,
        channel: u8,
        cc: u8,
        processor: ObjectId,
        parameter: ObjectId,
        min: f32,
        max: f32,
        relative: bool,
    ) -> MidiDispatcherStatus {
        if self.registry.parameter_handle(processor, parameter).is_none() {
            return MidiDispatcherStatus::InvalidTarget;
        }
        self.with_tables(|t| {
            t.connect_cc_to_parameter(port, channel, cc, processor, parameter, min, max, relative)
        })
    }

    pub fn disconnect_cc(
        &self,
        port: usize,
        channel: u8,
        cc: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        self.with_tables(|t| t.disconnect_cc(port, channel, cc, processor))
    }

    pub fn disconnect_all_cc_from_processor(&self, processor: ObjectId) {
        self.with_tables(|t| t.disconnect_all_cc_from_processor(processor));
    }

    pub fn connect_pc_to_processor(
        &self,
        port: usize,
        channel: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        if !self.registry.contains(processor) {
            return MidiDispatcherStatus::InvalidTarget;
        }
        self.with_tables(|t| t.connect_pc_to_processor(port, channel, processor))
    }

    pub fn disconnect_pc(
        &self,
        port: usize,
        channel: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        self.with_tables(|t| t.disconnect_pc(port, channel, processor))
    }

    pub fn disconnect_all_pc_from_processor(&self, processor: ObjectId) {
        self.with_tables(|t| t.disconnect_all_pc_from_processor(processor));
    }

    /// Sweep every table when a graph node is deleted.
    pub fn remove_target(&self, id: ObjectId) {
        self.with_tables(|t| t.remove_target(id));
    }

    // Snapshot reads, safe from any thread

    pub fn get_all_kb_input_connections(&self) -> Vec<KbdInputConnection> {
        self.snapshot.load().all_kb_input_connections().to_vec()
    }

    pub fn get_all_kb_output_connections(&self) -> Vec<KbdOutputConnection> {
        self.snapshot.load().all_kb_output_connections().to_vec()
    }

    pub fn get_all_cc_input_connections(&self) -> Vec<CcInputConnection> {
        self.snapshot.load().all_cc_input_connections().to_vec()
    }

    pub fn get_all_pc_input_connections(&self) -> Vec<PcInputConnection> {
        self.snapshot.load().all_pc_input_connections().to_vec()
    }

    pub fn get_cc_input_connections_for_processor(
        &self,
        processor: ObjectId,
    ) -> Vec<CcInputConnection> {
        self.snapshot.load().cc_connections_for_processor(processor)
    }

    pub fn get_pc_input_connections_for_processor(
        &self,
        processor: ObjectId,
    ) -> Vec<PcInputConnection> {
        self.snapshot.load().pc_connections_for_processor(processor)
    }

    // Incoming wire traffic

    /// Decode and route one incoming message. Called on the event
    /// dispatcher thread.
    pub fn send_midi(&self, port: usize, data: [u8; 3], _timestamp: Duration) {
        let Some(message) = ChannelMessage::parse(&data) else {
            debug!(?data, "ignoring non-channel MIDI message");
            return;
        };
        let channel = message.channel();
        let snapshot = self.snapshot.load();

        for connection in snapshot.kb_connections(port, channel) {
            if connection.raw {
                self.push_rt(RtEvent::WrappedMidi {
                    target: connection.target,
                    offset: 0,
                    data,
                });
                continue;
            }
            if let Some(kind_value) = keyboard_payload(&message) {
                let (kind, note, value) = kind_value;
                self.push_rt(RtEvent::Keyboard(KeyboardRtEvent {
                    kind,
                    target: connection.target,
                    offset: 0,
                    channel,
                    note,
                    value,
                }));
            }
        }

        if let ChannelMessage::ControlChange { cc, value, .. } = message {
            for connection in snapshot.cc_connections(port, channel, cc) {
                if let Some(event) = self.map_cc(&connection, value) {
                    self.push_rt(event);
                }
            }
        }

        if let ChannelMessage::ProgramChange { program, .. } = message {
            for connection in snapshot.pc_connections(port, channel) {
                self.push_rt(RtEvent::ProgramChange {
                    target: connection.processor,
                    offset: 0,
                    program,
                });
            }
        }
    }

    /// Map a CC value through one connection into a normalized parameter
    /// change.
    fn map_cc(&self, connection: &CcInputConnection, value: u8) -> Option<RtEvent> {
        let (store, handle) = self
            .registry
            .parameter_handle(connection.processor, connection.parameter)?;
        let descriptor = store.descriptor(handle)?;

        let lo = connection.min.min(connection.max);
        let hi = connection.max.max(connection.min);
        let domain = if connection.relative {
            // Two's-complement 7-bit delta: values above 63 step downward
            let delta = if value > 63 {
                value as f32 - 128.0
            } else {
                value as f32
            };
            let quantum = (connection.max - connection.min) / 127.0;
            (store.value(handle) + delta * quantum).clamp(lo, hi)
        } else {
            let mapped =
                connection.min + value as f32 / 127.0 * (connection.max - connection.min);
            mapped.clamp(lo, hi)
        };

        let normalized = descriptor
            .scale
            .normalized_from_domain(descriptor.min, descriptor.max, domain);
        Some(RtEvent::ParameterChange {
            target: connection.processor,
            offset: 0,
            parameter: connection.parameter,
            value: normalized,
        })
    }

    fn push_rt(&self, event: RtEvent) {
        if self.rt_input.push(event).is_err() {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
            warn!("RT input fifo full, MIDI event dropped");
        }
    }

    fn with_tables<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ConnectionTables) -> R,
    {
        let mut tables = self.tables.lock();
        let result = f(&mut tables);
        tables.commit();
        result
    }

    fn is_track(&self, id: ObjectId) -> bool {
        self.registry.info(id).is_some_and(|info| info.is_track)
    }

    fn send_out(&self, port: usize, message: ChannelMessage) {
        if let Some(output) = self.output.read().as_ref() {
            output.receive(port, message.to_bytes(), Duration::ZERO);
        }
    }
}

impl EventObserver for MidiDispatcher {
    fn notify(&self, event: &Event) {
        match event.payload() {
            EventPayload::KeyboardNotification(kb) => {
                let snapshot = self.snapshot.load();
                for out in snapshot.kb_outputs(kb.target) {
                    if let Some(message) = serialize_keyboard(kb, out.channel) {
                        self.send_out(out.port, message);
                    }
                }
            }
            EventPayload::ParameterChangeNotification {
                processor,
                parameter,
                domain,
                ..
            } => {
                let snapshot = self.snapshot.load();
                for connection in snapshot.cc_feedback(*processor, *parameter) {
                    // Encoders get no absolute feedback
                    if connection.relative {
                        continue;
                    }
                    let span = connection.max - connection.min;
                    if span.abs() < f32::EPSILON {
                        continue;
                    }
                    let value = (((domain - connection.min) / span) * 127.0)
                        .round()
                        .clamp(0.0, 127.0) as u8;
                    self.send_out(
                        connection.port,
                        ChannelMessage::ControlChange {
                            channel: connection.channel.unwrap_or(0),
                            cc: connection.cc,
                            value,
                        },
                    );
                }
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for MidiDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiDispatcher")
            .field("dropped_events", &self.dropped_event_count())
            .finish()
    }
}

/// Translate a decoded message into keyboard event fields.
fn keyboard_payload(message: &ChannelMessage) -> Option<(KeyboardEventKind, u8, f32)> {
    match *message {
        ChannelMessage::NoteOn { note, velocity, .. } => Some((
            KeyboardEventKind::NoteOn,
            note,
            velocity as f32 / 127.0,
        )),
        ChannelMessage::NoteOff { note, velocity, .. } => Some((
            KeyboardEventKind::NoteOff,
            note,
            velocity as f32 / 127.0,
        )),
        ChannelMessage::PolyAftertouch { note, pressure, .. } => Some((
            KeyboardEventKind::NoteAftertouch,
            note,
            pressure as f32 / 127.0,
        )),
        ChannelMessage::ChannelAftertouch { pressure, .. } => Some((
            KeyboardEventKind::Aftertouch,
            0,
            pressure as f32 / 127.0,
        )),
        ChannelMessage::PitchBend { value, .. } => Some((
            KeyboardEventKind::PitchBend,
            0,
            (value as f32 - 8192.0) / 8192.0,
        )),
        // Mod wheel doubles as a keyboard-class event
        ChannelMessage::ControlChange { cc: 1, value, .. } => Some((
            KeyboardEventKind::Modulation,
            0,
            value as f32 / 127.0,
        )),
        _ => None,
    }
}

fn serialize_keyboard(kb: &KeyboardRtEvent, channel: u8) -> Option<ChannelMessage> {
    let to7 = |v: f32| (v.clamp(0.0, 1.0) * 127.0).round() as u8;
    match kb.kind {
        KeyboardEventKind::NoteOn => Some(ChannelMessage::NoteOn {
            channel,
            note: kb.note,
            velocity: to7(kb.value).max(1),
        }),
        KeyboardEventKind::NoteOff => Some(ChannelMessage::NoteOff {
            channel,
            note: kb.note,
            velocity: to7(kb.value),
        }),
        KeyboardEventKind::NoteAftertouch => Some(ChannelMessage::PolyAftertouch {
            channel,
            note: kb.note,
            pressure: to7(kb.value),
        }),
        KeyboardEventKind::Aftertouch => Some(ChannelMessage::ChannelAftertouch {
            channel,
            pressure: to7(kb.value),
        }),
        KeyboardEventKind::PitchBend => Some(ChannelMessage::PitchBend {
            channel,
            value: (((kb.value.clamp(-1.0, 1.0) + 1.0) * 8192.0) as u16).min(16383),
        }),
        KeyboardEventKind::Modulation => Some(ChannelMessage::ControlChange {
            channel,
            cc: 1,
            value: to7(kb.value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vivace_core::parameter::{ParameterScale, ParameterStoreBuilder};
    use vivace_core::registry::ProcessorInfo;
    use vivace_core::{next_object_id, ParamId};

    struct Rig {
        dispatcher: MidiDispatcher,
        rt_input: Arc<RtEventFifo>,
        track: ObjectId,
        processor: ObjectId,
        parameter: ParamId,
        store: Arc<vivace_core::ParameterStore>,
    }

    fn rig() -> Rig {
        let registry = Arc::new(ProcessorRegistry::new());

        let track_id = next_object_id();
        registry
            .register_track(ProcessorInfo {
                id: track_id,
                name: "main".to_owned(),
                label: "Track".to_owned(),
                track: None,
                is_track: true,
                parameters: Arc::new(vivace_core::ParameterStore::empty()),
            })
            .unwrap();

        let mut params = ParameterStoreBuilder::new();
        let handle = params
            .register_float_parameter("gain", "Gain", "", 0.5, 0.0, 1.0, ParameterScale::Linear)
            .unwrap();
        let store = Arc::new(params.build());
        let parameter = store.descriptor(handle).unwrap().id;
        let processor_id = next_object_id();
        registry
            .register_processor(ProcessorInfo {
                id: processor_id,
                name: "gain_0".to_owned(),
                label: "Gain".to_owned(),
                track: Some(track_id),
                is_track: false,
                parameters: Arc::clone(&store),
            })
            .unwrap();

        let rt_input = Arc::new(RtEventFifo::with_capacity(1024));
        let dispatcher = MidiDispatcher::new(2, 2, Arc::clone(&rt_input), registry);
        Rig {
            dispatcher,
            rt_input,
            track: track_id,
            processor: processor_id,
            parameter,
            store,
        }
    }

    #[test]
    fn test_kb_note_routing_omni() {
        let rig = rig();
        assert_eq!(
            rig.dispatcher.connect_kb_to_track(
                0,
                rig.track,
                crate::connection::MIDI_CHANNEL_OMNI,
                false
            ),
            MidiDispatcherStatus::Ok
        );

        rig.dispatcher
            .send_midi(0, [0x93, 60, 100], Duration::ZERO);
        match rig.rt_input.pop() {
            Some(RtEvent::Keyboard(kb)) => {
                assert_eq!(kb.kind, KeyboardEventKind::NoteOn);
                assert_eq!(kb.target, rig.track);
                assert_eq!(kb.note, 60);
                assert_eq!(kb.channel, 3);
            }
            other => panic!("expected keyboard event, got {:?}", other),
        }
        assert!(rig.rt_input.pop().is_none());
    }

    #[test]
    fn test_kb_routing_respects_channel_filter() {
        let rig = rig();
        rig.dispatcher
            .connect_kb_to_track(0, rig.track, 2, false);

        rig.dispatcher
            .send_midi(0, [0x93, 60, 100], Duration::ZERO);
        assert!(rig.rt_input.pop().is_none());

        rig.dispatcher
            .send_midi(0, [0x92, 60, 100], Duration::ZERO);
        assert!(rig.rt_input.pop().is_some());
    }

    #[test]
    fn test_raw_midi_forwarding() {
        let rig = rig();
        rig.dispatcher.connect_kb_to_track(
            0,
            rig.track,
            crate::connection::MIDI_CHANNEL_OMNI,
            true,
        );

        let bytes = [0x93, 60, 100];
        rig.dispatcher.send_midi(0, bytes, Duration::ZERO);
        match rig.rt_input.pop() {
            Some(RtEvent::WrappedMidi { target, data, .. }) => {
                assert_eq!(target, rig.track);
                assert_eq!(data, bytes);
            }
            other => panic!("expected wrapped midi, got {:?}", other),
        }
    }

    #[test]
    fn test_connect_kb_to_non_track_rejected() {
        let rig = rig();
        assert_eq!(
            rig.dispatcher
                .connect_kb_to_track(0, rig.processor, 0, false),
            MidiDispatcherStatus::InvalidTarget
        );
    }

    #[test]
    fn test_absolute_cc_mapping() {
        let rig = rig();
        assert_eq!(
            rig.dispatcher.connect_cc_to_parameter(
                0,
                2,
                7,
                rig.processor,
                rig.parameter,
                0.0,
                1.0,
                false
            ),
            MidiDispatcherStatus::Ok
        );

        let expect_value = |bytes: [u8; 3], expected: f32, rig: &Rig| {
            rig.dispatcher.send_midi(0, bytes, Duration::ZERO);
            match rig.rt_input.pop() {
                Some(RtEvent::ParameterChange { value, .. }) => {
                    assert!(
                        (value - expected).abs() < 0.01,
                        "expected {}, got {}",
                        expected,
                        value
                    );
                }
                other => panic!("expected parameter change, got {:?}", other),
            }
        };

        expect_value([0xB2, 7, 64], 0.504, &rig);
        expect_value([0xB2, 7, 0], 0.0, &rig);
        expect_value([0xB2, 7, 127], 1.0, &rig);
    }

    #[test]
    fn test_relative_cc_mapping() {
        let rig = rig();
        rig.dispatcher.connect_cc_to_parameter(
            0,
            0,
            10,
            rig.processor,
            rig.parameter,
            0.0,
            1.0,
            true,
        );

        let handle = rig.store.handle_by_id(rig.parameter).unwrap();
        rig.store.set_normalized(handle, 0.5);
        let quantum = 1.0 / 127.0;

        // CC value 1 advances by +quantum
        rig.dispatcher.send_midi(0, [0xB0, 10, 1], Duration::ZERO);
        match rig.rt_input.pop() {
            Some(RtEvent::ParameterChange { value, .. }) => {
                assert!((value - (0.5 + quantum)).abs() < 0.001);
            }
            other => panic!("expected parameter change, got {:?}", other),
        }

        // CC value 127 is a delta of −1
        rig.dispatcher
            .send_midi(0, [0xB0, 10, 127], Duration::ZERO);
        match rig.rt_input.pop() {
            Some(RtEvent::ParameterChange { value, .. }) => {
                assert!((value - (0.5 - quantum)).abs() < 0.001);
            }
            other => panic!("expected parameter change, got {:?}", other),
        }
    }

    #[test]
    fn test_cc_to_unknown_parameter_rejected() {
        let rig = rig();
        assert_eq!(
            rig.dispatcher.connect_cc_to_parameter(
                0,
                0,
                7,
                rig.processor,
                999_999,
                0.0,
                1.0,
                false
            ),
            MidiDispatcherStatus::InvalidTarget
        );
    }

    #[test]
    fn test_program_change_routing() {
        let rig = rig();
        assert_eq!(
            rig.dispatcher.connect_pc_to_processor(
                0,
                crate::connection::MIDI_CHANNEL_OMNI,
                rig.processor
            ),
            MidiDispatcherStatus::Ok
        );

        rig.dispatcher.send_midi(0, [0xC4, 12, 0], Duration::ZERO);
        match rig.rt_input.pop() {
            Some(RtEvent::ProgramChange {
                target, program, ..
            }) => {
                assert_eq!(target, rig.processor);
                assert_eq!(program, 12);
            }
            other => panic!("expected program change, got {:?}", other),
        }
    }

    struct RecordingReceiver(Mutex<Vec<(usize, [u8; 3])>>);

    impl MidiReceiver for RecordingReceiver {
        fn receive(&self, port: usize, data: [u8; 3], _timestamp: Duration) {
            self.0.lock().push((port, data));
        }
    }

    #[test]
    fn test_outgoing_keyboard_notification() {
        let rig = rig();
        let receiver = Arc::new(RecordingReceiver(Mutex::new(Vec::new())));
        rig.dispatcher.set_output_frontend(receiver.clone());
        rig.dispatcher
            .connect_kb_output_from_track(rig.track, 1, 5);

        let event = Event::new(EventPayload::KeyboardNotification(KeyboardRtEvent {
            kind: KeyboardEventKind::NoteOn,
            target: rig.track,
            offset: 0,
            channel: 0,
            note: 64,
            value: 1.0,
        }));
        rig.dispatcher.notify(&event);

        let sent = receiver.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert_eq!(sent[0].1, [0x95, 64, 127]);
    }

    #[test]
    fn test_outgoing_parameter_feedback() {
        let rig = rig();
        let receiver = Arc::new(RecordingReceiver(Mutex::new(Vec::new())));
        rig.dispatcher.set_output_frontend(receiver.clone());
        rig.dispatcher.connect_cc_to_parameter(
            0,
            3,
            7,
            rig.processor,
            rig.parameter,
            0.0,
            1.0,
            false,
        );

        let event = Event::new(EventPayload::ParameterChangeNotification {
            processor: rig.processor,
            parameter: rig.parameter,
            normalized: 0.5,
            domain: 0.5,
        });
        rig.dispatcher.notify(&event);

        let sent = receiver.0.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, [0xB3, 7, 64]);
    }

    #[test]
    fn test_remove_target_sweeps_connections() {
        let rig = rig();
        rig.dispatcher
            .connect_kb_to_track(0, rig.track, 0, false);
        rig.dispatcher.remove_target(rig.track);
        assert!(rig.dispatcher.get_all_kb_input_connections().is_empty());
    }
}
