//! High-level events on the control plane.
//!
//! An [`Event`] is the owning, heap-friendly counterpart of [`RtEvent`]:
//! it carries rich payloads (strings, closures), a scheduled time, an
//! optional deadline, and an optional completion callback. Client threads
//! post events to the dispatcher; the dispatcher converts the RT-convertible
//! ones and executes the rest on its own thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::processor::ObjectId;
use crate::rt_event::{KeyboardRtEvent, RtEvent};
use crate::transport::{PlayingMode, TimeSignature};

pub type EventId = u64;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// When the dispatcher should act on an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    /// Handle on the next dispatcher tick.
    Immediate,
    /// Hold until the given wall-clock time.
    At(Instant),
}

/// Terminal outcome reported through the completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    HandledOk,
    /// Converted and queued onto the RT input fifo.
    QueuedToRt,
    Error,
    NotFound,
    TimedOut,
    Aborted,
}

pub type CompletionCallback = Box<dyn FnOnce(EventStatus) + Send>;

/// A mutation executed synchronously on the dispatcher thread. This is the
/// serialization point for MIDI table and routing changes.
pub type EngineOp = Box<dyn FnOnce() -> EventStatus + Send>;

/// A blocking job executed on the async-work thread.
pub type AsyncJob = Box<dyn FnOnce() -> bool + Send>;

pub enum EventPayload {
    // Convertible to RtEvents
    Keyboard(KeyboardRtEvent),
    WrappedMidi {
        target: ObjectId,
        data: [u8; 3],
    },
    ParameterChange {
        processor: ObjectId,
        parameter: ObjectId,
        normalized: f32,
    },
    StringPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: Arc<String>,
    },
    DataPropertyChange {
        processor: ObjectId,
        property: ObjectId,
        value: Arc<Vec<u8>>,
    },
    ProgramChange {
        processor: ObjectId,
        program: u8,
    },
    SetBypass {
        processor: ObjectId,
        bypassed: bool,
    },
    SetTempo(f32),
    SetTimeSignature(TimeSignature),
    SetPlayingMode(PlayingMode),

    // Executed on the dispatcher thread
    AddTrack {
        name: String,
        input_busses: usize,
        output_busses: usize,
    },
    RemoveTrack {
        track: ObjectId,
    },
    CreateProcessor {
        track: ObjectId,
        uid: String,
        name: String,
    },
    RemoveProcessor {
        track: ObjectId,
        processor: ObjectId,
    },
    MoveProcessor {
        processor: ObjectId,
        from: ObjectId,
        to: ObjectId,
    },
    EngineOp(EngineOp),
    AsyncWork {
        target: ObjectId,
        job: AsyncJob,
    },

    // Notifications synthesized from RT output events
    ParameterChangeNotification {
        processor: ObjectId,
        parameter: ObjectId,
        normalized: f32,
        domain: f32,
    },
    KeyboardNotification(KeyboardRtEvent),
    TrackAdded(ObjectId),
    TrackRemoved(ObjectId),
    ProcessorAdded {
        track: ObjectId,
        processor: ObjectId,
    },
    ProcessorRemoved {
        track: ObjectId,
        processor: ObjectId,
    },
    AsyncWorkCompleted {
        target: ObjectId,
        work_id: u64,
        success: bool,
    },
}

impl EventPayload {
    pub fn is_notification(&self) -> bool {
        matches!(
            self,
            EventPayload::ParameterChangeNotification { .. }
                | EventPayload::KeyboardNotification(_)
                | EventPayload::TrackAdded(_)
                | EventPayload::TrackRemoved(_)
                | EventPayload::ProcessorAdded { .. }
                | EventPayload::ProcessorRemoved { .. }
                | EventPayload::AsyncWorkCompleted { .. }
        )
    }
}

impl std::fmt::Debug for EventPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventPayload::Keyboard(_) => "Keyboard",
            EventPayload::WrappedMidi { .. } => "WrappedMidi",
            EventPayload::ParameterChange { .. } => "ParameterChange",
            EventPayload::StringPropertyChange { .. } => "StringPropertyChange",
            EventPayload::DataPropertyChange { .. } => "DataPropertyChange",
            EventPayload::ProgramChange { .. } => "ProgramChange",
            EventPayload::SetBypass { .. } => "SetBypass",
            EventPayload::SetTempo(_) => "SetTempo",
            EventPayload::SetTimeSignature(_) => "SetTimeSignature",
            EventPayload::SetPlayingMode(_) => "SetPlayingMode",
            EventPayload::AddTrack { .. } => "AddTrack",
            EventPayload::RemoveTrack { .. } => "RemoveTrack",
            EventPayload::CreateProcessor { .. } => "CreateProcessor",
            EventPayload::RemoveProcessor { .. } => "RemoveProcessor",
            EventPayload::MoveProcessor { .. } => "MoveProcessor",
            EventPayload::EngineOp(_) => "EngineOp",
            EventPayload::AsyncWork { .. } => "AsyncWork",
            EventPayload::ParameterChangeNotification { .. } => "ParameterChangeNotification",
            EventPayload::KeyboardNotification(_) => "KeyboardNotification",
            EventPayload::TrackAdded(_) => "TrackAdded",
            EventPayload::TrackRemoved(_) => "TrackRemoved",
            EventPayload::ProcessorAdded { .. } => "ProcessorAdded",
            EventPayload::ProcessorRemoved { .. } => "ProcessorRemoved",
            EventPayload::AsyncWorkCompleted { .. } => "AsyncWorkCompleted",
        };
        f.write_str(name)
    }
}

/// The event envelope.
pub struct Event {
    id: EventId,
    time: EventTime,
    deadline: Option<Instant>,
    completion: Option<CompletionCallback>,
    payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            time: EventTime::Immediate,
            deadline: None,
            completion: None,
            payload,
        }
    }

    pub fn at(mut self, time: Instant) -> Self {
        self.time = EventTime::At(time);
        self
    }

    /// Discard the event with a `TimedOut` completion if it is still queued
    /// past this instant.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_completion(mut self, callback: CompletionCallback) -> Self {
        self.completion = Some(callback);
        self
    }

    #[inline]
    pub fn id(&self) -> EventId {
        self.id
    }

    #[inline]
    pub fn time(&self) -> EventTime {
        self.time
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[inline]
    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn into_payload(self) -> EventPayload {
        self.payload
    }

    pub fn take_payload_and_completion(self) -> (EventPayload, Option<CompletionCallback>) {
        (self.payload, self.completion)
    }

    /// Fire the completion callback, if any. Later calls are no-ops.
    pub fn complete(&mut self, status: EventStatus) {
        if let Some(callback) = self.completion.take() {
            callback(status);
        }
    }

    /// Render this event as an RT event, if it is RT-convertible.
    pub fn make_rt_event(&self) -> Option<RtEvent> {
        match &self.payload {
            EventPayload::Keyboard(event) => Some(RtEvent::Keyboard(*event)),
            EventPayload::WrappedMidi { target, data } => Some(RtEvent::WrappedMidi {
                target: *target,
                offset: 0,
                data: *data,
            }),
            EventPayload::ParameterChange {
                processor,
                parameter,
                normalized,
            } => Some(RtEvent::ParameterChange {
                target: *processor,
                offset: 0,
                parameter: *parameter,
                value: *normalized,
            }),
            EventPayload::StringPropertyChange {
                processor,
                property,
                value,
            } => Some(RtEvent::StringPropertyChange {
                target: *processor,
                offset: 0,
                property: *property,
                value: Arc::clone(value),
            }),
            EventPayload::DataPropertyChange {
                processor,
                property,
                value,
            } => Some(RtEvent::DataPropertyChange {
                target: *processor,
                offset: 0,
                property: *property,
                value: Arc::clone(value),
            }),
            EventPayload::ProgramChange { processor, program } => Some(RtEvent::ProgramChange {
                target: *processor,
                offset: 0,
                program: *program,
            }),
            EventPayload::SetBypass {
                processor,
                bypassed,
            } => Some(RtEvent::SetBypass {
                target: *processor,
                bypassed: *bypassed,
            }),
            EventPayload::SetTempo(tempo) => Some(RtEvent::Tempo {
                offset: 0,
                tempo: *tempo,
            }),
            EventPayload::SetTimeSignature(signature) => Some(RtEvent::TimeSignature {
                offset: 0,
                signature: *signature,
            }),
            EventPayload::SetPlayingMode(mode) => Some(RtEvent::PlayingMode {
                offset: 0,
                mode: *mode,
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish()
    }
}
