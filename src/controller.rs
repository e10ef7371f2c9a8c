//! The control surface façade.
//!
//! Controllers are stateless. Read operations return snapshots taken from
//! the registry, the MIDI connection snapshot, or the transport atomics —
//! one map at a time, no cross-object locks. Mutating operations allocate
//! an [`Event`] and post it to the dispatcher, then return immediately; the
//! eventual outcome is reported asynchronously through subscriptions or a
//! completion callback. This is the single mechanism that keeps non-RT
//! threads away from the audio graph and the MIDI tables.

use std::sync::Arc;

use tracing::warn;

use vivace_core::engine::EngineStateCell;
use vivace_core::rt_event::{KeyboardEventKind, KeyboardRtEvent};
use vivace_core::transport::{MAX_TEMPO, MIN_TEMPO};
use vivace_core::{
    DispatcherHandle, EngineRoutingTable, EngineState, Event, EventPayload, ObjectId,
    ParameterDescriptor, PerformanceTimer, PlayingMode, ProcessTimings, ProcessorInfo,
    ProcessorRegistry, TimeSignature, Transport, TRACK_MAX_BUSSES,
};
use vivace_midi::{
    CcInputConnection, KbdInputConnection, KbdOutputConnection, MidiDispatcher,
    MidiDispatcherStatus, PcInputConnection, MIDI_CHANNEL_OMNI,
};

/// Outcome of a controller mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlStatus {
    Ok,
    Error,
    UnsupportedOperation,
    NotFound,
    OutOfRange,
    InvalidArguments,
}

#[derive(Clone)]
pub struct Controller {
    dispatcher: DispatcherHandle,
    registry: Arc<ProcessorRegistry>,
    midi: Arc<MidiDispatcher>,
    transport: Arc<Transport>,
    timer: Arc<PerformanceTimer>,
    state_cell: Arc<EngineStateCell>,
    routing: Arc<EngineRoutingTable>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dispatcher: DispatcherHandle,
        registry: Arc<ProcessorRegistry>,
        midi: Arc<MidiDispatcher>,
        transport: Arc<Transport>,
        timer: Arc<PerformanceTimer>,
        state_cell: Arc<EngineStateCell>,
        routing: Arc<EngineRoutingTable>,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            midi,
            transport,
            timer,
            state_cell,
            routing,
        }
    }

    fn post(&self, event: Event) -> ControlStatus {
        match self.dispatcher.post_event(event) {
            Ok(()) => ControlStatus::Ok,
            Err(error) => {
                warn!(%error, "event could not be posted");
                ControlStatus::Error
            }
        }
    }

    /// Run a closure on the dispatcher thread. Used for every MIDI table
    /// and routing mutation.
    fn post_op<F>(&self, op: F) -> ControlStatus
    where
        F: FnOnce() -> vivace_core::EventStatus + Send + 'static,
    {
        self.post(Event::new(EventPayload::EngineOp(Box::new(op))))
    }

    // Read surface -----------------------------------------------------------

    /// Tracks in render order.
    pub fn tracks(&self) -> Vec<ProcessorInfo> {
        self.registry
            .track_ids()
            .into_iter()
            .filter_map(|id| self.registry.info(id))
            .collect()
    }

    pub fn processors_on_track(&self, track: ObjectId) -> Vec<ProcessorInfo> {
        self.registry.processors_on_track(track)
    }

    pub fn processor_info(&self, id: ObjectId) -> Option<ProcessorInfo> {
        self.registry.info(id)
    }

    pub fn processor_id_by_name(&self, name: &str) -> Option<ObjectId> {
        self.registry.id_by_name(name)
    }

    pub fn parameters(&self, processor: ObjectId) -> Option<Vec<ParameterDescriptor>> {
        self.registry
            .info(processor)
            .map(|info| info.parameters.descriptors().to_vec())
    }

    /// Current domain value of a parameter. Wait-free.
    pub fn parameter_value(&self, processor: ObjectId, parameter: ObjectId) -> Option<f32> {
        let (store, handle) = self.registry.parameter_handle(processor, parameter)?;
        Some(store.value(handle))
    }

    pub fn parameter_value_normalized(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Option<f32> {
        let (store, handle) = self.registry.parameter_handle(processor, parameter)?;
        Some(store.value_normalized(handle))
    }

    pub fn parameter_value_formatted(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> Option<String> {
        let (store, handle) = self.registry.parameter_handle(processor, parameter)?;
        Some(store.value_formatted(handle))
    }

    pub fn tempo(&self) -> f32 {
        self.transport.tempo()
    }

    pub fn time_signature(&self) -> TimeSignature {
        self.transport.time_signature()
    }

    pub fn playing_mode(&self) -> PlayingMode {
        self.transport.playing_mode()
    }

    pub fn engine_state(&self) -> EngineState {
        self.state_cell.actual()
    }

    pub fn timings_for_node(&self, node: ObjectId) -> Option<ProcessTimings> {
        self.timer.timings_for_node(node)
    }

    pub fn kbd_input_connections(&self) -> Vec<KbdInputConnection> {
        self.midi.get_all_kb_input_connections()
    }

    pub fn kbd_output_connections(&self) -> Vec<KbdOutputConnection> {
        self.midi.get_all_kb_output_connections()
    }

    pub fn cc_input_connections(&self) -> Vec<CcInputConnection> {
        self.midi.get_all_cc_input_connections()
    }

    pub fn pc_input_connections(&self) -> Vec<PcInputConnection> {
        self.midi.get_all_pc_input_connections()
    }

    // Transport and engine state ---------------------------------------------

    pub fn set_tempo(&self, bpm: f32) -> ControlStatus {
        if !bpm.is_finite() || !(MIN_TEMPO..=MAX_TEMPO).contains(&bpm) {
            return ControlStatus::OutOfRange;
        }
        self.post(Event::new(EventPayload::SetTempo(bpm)))
    }

    pub fn set_time_signature(&self, signature: TimeSignature) -> ControlStatus {
        if signature.numerator == 0 || signature.denominator == 0 {
            return ControlStatus::InvalidArguments;
        }
        self.post(Event::new(EventPayload::SetTimeSignature(signature)))
    }

    pub fn set_playing_mode(&self, mode: PlayingMode) -> ControlStatus {
        self.post(Event::new(EventPayload::SetPlayingMode(mode)))
    }

    /// Applied by the audio thread at the next block boundary.
    pub fn set_engine_state(&self, state: EngineState) -> ControlStatus {
        self.state_cell.request(state);
        ControlStatus::Ok
    }

    // Graph mutations --------------------------------------------------------

    pub fn add_track(
        &self,
        name: &str,
        input_busses: usize,
        output_busses: usize,
    ) -> ControlStatus {
        if name.is_empty() {
            return ControlStatus::InvalidArguments;
        }
        if input_busses == 0
            || output_busses == 0
            || input_busses > TRACK_MAX_BUSSES
            || output_busses > TRACK_MAX_BUSSES
        {
            return ControlStatus::OutOfRange;
        }
        self.post(Event::new(EventPayload::AddTrack {
            name: name.to_owned(),
            input_busses,
            output_busses,
        }))
    }

    pub fn delete_track(&self, track: ObjectId) -> ControlStatus {
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        // Sweep the MIDI tables on the dispatcher thread, in order before
        // the removal itself
        let midi = Arc::clone(&self.midi);
        let ids: Vec<ObjectId> = self
            .registry
            .processors_on_track(track)
            .into_iter()
            .map(|info| info.id)
            .chain(std::iter::once(track))
            .collect();
        let status = self.post_op(move || {
            for id in ids {
                midi.remove_target(id);
            }
            vivace_core::EventStatus::HandledOk
        });
        if status != ControlStatus::Ok {
            return status;
        }
        self.post(Event::new(EventPayload::RemoveTrack { track }))
    }

    pub fn create_processor_on_track(
        &self,
        uid: &str,
        name: &str,
        track: ObjectId,
    ) -> ControlStatus {
        if uid.is_empty() || name.is_empty() {
            return ControlStatus::InvalidArguments;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::CreateProcessor {
            track,
            uid: uid.to_owned(),
            name: name.to_owned(),
        }))
    }

    pub fn delete_processor(&self, track: ObjectId, processor: ObjectId) -> ControlStatus {
        if !self.registry.contains(processor) {
            return ControlStatus::NotFound;
        }
        let midi = Arc::clone(&self.midi);
        let status = self.post_op(move || {
            midi.remove_target(processor);
            vivace_core::EventStatus::HandledOk
        });
        if status != ControlStatus::Ok {
            return status;
        }
        self.post(Event::new(EventPayload::RemoveProcessor {
            track,
            processor,
        }))
    }

    pub fn move_processor(
        &self,
        processor: ObjectId,
        from: ObjectId,
        to: ObjectId,
    ) -> ControlStatus {
        if !self.registry.contains(processor)
            || !self.registry.contains(from)
            || !self.registry.contains(to)
        {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::MoveProcessor {
            processor,
            from,
            to,
        }))
    }

    // Audio routing ----------------------------------------------------------

    pub fn connect_engine_input(
        &self,
        engine_channel: usize,
        track: ObjectId,
        track_channel: usize,
    ) -> ControlStatus {
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        let routing = Arc::clone(&self.routing);
        self.post_op(move || {
            match routing.connect_input(engine_channel, track, track_channel) {
                Ok(()) => vivace_core::EventStatus::HandledOk,
                Err(_) => vivace_core::EventStatus::Error,
            }
        })
    }

    pub fn connect_engine_output(
        &self,
        engine_channel: usize,
        track: ObjectId,
        track_channel: usize,
    ) -> ControlStatus {
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        let routing = Arc::clone(&self.routing);
        self.post_op(move || {
            match routing.connect_output(engine_channel, track, track_channel) {
                Ok(()) => vivace_core::EventStatus::HandledOk,
                Err(_) => vivace_core::EventStatus::Error,
            }
        })
    }

    // Parameters and keyboard ------------------------------------------------

    pub fn set_parameter_value(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        normalized: f32,
    ) -> ControlStatus {
        if !normalized.is_finite() {
            return ControlStatus::InvalidArguments;
        }
        if !(0.0..=1.0).contains(&normalized) {
            return ControlStatus::OutOfRange;
        }
        if self.registry.parameter_handle(processor, parameter).is_none() {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::ParameterChange {
            processor,
            parameter,
            normalized,
        }))
    }

    pub fn set_string_property(
        &self,
        processor: ObjectId,
        property: ObjectId,
        value: &str,
    ) -> ControlStatus {
        if self.registry.parameter_handle(processor, property).is_none() {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::StringPropertyChange {
            processor,
            property,
            value: Arc::new(value.to_owned()),
        }))
    }

    pub fn set_bypass(&self, processor: ObjectId, bypassed: bool) -> ControlStatus {
        if !self.registry.contains(processor) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::SetBypass {
            processor,
            bypassed,
        }))
    }

    pub fn send_note_on(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        velocity: f32,
    ) -> ControlStatus {
        self.send_keyboard(track, KeyboardEventKind::NoteOn, channel, note, velocity)
    }

    pub fn send_note_off(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        velocity: f32,
    ) -> ControlStatus {
        self.send_keyboard(track, KeyboardEventKind::NoteOff, channel, note, velocity)
    }

    pub fn send_note_aftertouch(
        &self,
        track: ObjectId,
        channel: u8,
        note: u8,
        value: f32,
    ) -> ControlStatus {
        self.send_keyboard(track, KeyboardEventKind::NoteAftertouch, channel, note, value)
    }

    pub fn send_pitch_bend(&self, track: ObjectId, channel: u8, value: f32) -> ControlStatus {
        if !(-1.0..=1.0).contains(&value) {
            return ControlStatus::OutOfRange;
        }
        if channel > 15 {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::Keyboard(KeyboardRtEvent {
            kind: KeyboardEventKind::PitchBend,
            target: track,
            offset: 0,
            channel,
            note: 0,
            value,
        })))
    }

    pub fn send_modulation(&self, track: ObjectId, channel: u8, value: f32) -> ControlStatus {
        self.send_keyboard(track, KeyboardEventKind::Modulation, channel, 0, value)
    }

    /// Inject a raw CC message into a track's chain.
    pub fn send_cc(&self, track: ObjectId, channel: u8, cc: u8, value: u8) -> ControlStatus {
        if channel > 15 || cc > 127 || value > 127 {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::WrappedMidi {
            target: track,
            data: [0xB0 | channel, cc, value],
        }))
    }

    pub fn send_program_change(&self, processor: ObjectId, program: u8) -> ControlStatus {
        if program > 127 {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(processor) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::ProgramChange { processor, program }))
    }

    fn send_keyboard(
        &self,
        track: ObjectId,
        kind: KeyboardEventKind,
        channel: u8,
        note: u8,
        value: f32,
    ) -> ControlStatus {
        if channel > 15 || note > 127 || !(0.0..=1.0).contains(&value) {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        self.post(Event::new(EventPayload::Keyboard(KeyboardRtEvent {
            kind,
            target: track,
            offset: 0,
            channel,
            note,
            value,
        })))
    }

    // MIDI connections -------------------------------------------------------

    pub fn connect_kbd_input_to_track(
        &self,
        track: ObjectId,
        channel: u8,
        port: usize,
        raw_midi: bool,
    ) -> ControlStatus {
        if channel > MIDI_CHANNEL_OMNI {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            status_of(midi.connect_kb_to_track(port, track, channel, raw_midi))
        })
    }

    pub fn disconnect_kbd_input(
        &self,
        track: ObjectId,
        channel: u8,
        port: usize,
        raw_midi: bool,
    ) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            status_of(midi.disconnect_kb_from_track(port, track, channel, raw_midi))
        })
    }

    pub fn connect_kbd_output_from_track(
        &self,
        track: ObjectId,
        channel: u8,
        port: usize,
    ) -> ControlStatus {
        if channel > 15 {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(track) {
            return ControlStatus::NotFound;
        }
        let midi = Arc::clone(&self.midi);
        self.post_op(move || status_of(midi.connect_kb_output_from_track(track, port, channel)))
    }

    pub fn disconnect_kbd_output(
        &self,
        track: ObjectId,
        channel: u8,
        port: usize,
    ) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            status_of(midi.disconnect_kb_output_from_track(track, port, channel))
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
        channel: u8,
        port: usize,
        cc_number: u8,
        min_range: f32,
        max_range: f32,
        relative_mode: bool,
    ) -> ControlStatus {
        if channel > MIDI_CHANNEL_OMNI || cc_number > 127 {
            return ControlStatus::OutOfRange;
        }
        if !min_range.is_finite() || !max_range.is_finite() {
            return ControlStatus::InvalidArguments;
        }
        if self.registry.parameter_handle(processor, parameter).is_none() {
            return ControlStatus::NotFound;
        }
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            status_of(midi.connect_cc_to_parameter(
                port,
                channel,
                cc_number,
                processor,
                parameter,
                min_range,
                max_range,
                relative_mode,
            ))
        })
    }

    pub fn disconnect_cc(
        &self,
        processor: ObjectId,
        channel: u8,
        port: usize,
        cc_number: u8,
    ) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || status_of(midi.disconnect_cc(port, channel, cc_number, processor)))
    }

    pub fn disconnect_all_cc_from_processor(&self, processor: ObjectId) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            midi.disconnect_all_cc_from_processor(processor);
            vivace_core::EventStatus::HandledOk
        })
    }

    pub fn connect_pc_to_processor(
        &self,
        processor: ObjectId,
        channel: u8,
        port: usize,
    ) -> ControlStatus {
        if channel > MIDI_CHANNEL_OMNI {
            return ControlStatus::OutOfRange;
        }
        if !self.registry.contains(processor) {
            return ControlStatus::NotFound;
        }
        let midi = Arc::clone(&self.midi);
        self.post_op(move || status_of(midi.connect_pc_to_processor(port, channel, processor)))
    }

    pub fn disconnect_pc(
        &self,
        processor: ObjectId,
        channel: u8,
        port: usize,
    ) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || status_of(midi.disconnect_pc(port, channel, processor)))
    }

    pub fn disconnect_all_pc_from_processor(&self, processor: ObjectId) -> ControlStatus {
        let midi = Arc::clone(&self.midi);
        self.post_op(move || {
            midi.disconnect_all_pc_from_processor(processor);
            vivace_core::EventStatus::HandledOk
        })
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Controller")
    }
}

fn status_of(status: MidiDispatcherStatus) -> vivace_core::EventStatus {
    match status {
        MidiDispatcherStatus::Ok => vivace_core::EventStatus::HandledOk,
        _ => vivace_core::EventStatus::Error,
    }
}
