//! Value-typed events on the audio boundary.
//!
//! An [`RtEvent`] is small and moves by value through the SPSC fifos. Graph
//! mutation variants carry the pre-built node as a `Box` — the pointer
//! crosses the boundary, the allocation happened on the dispatcher thread.
//! The matching `*Returned` variants ship nodes and replaced blobs back out
//! so nothing heap-owned is ever dropped on the audio thread.

use std::sync::Arc;

use crate::processor::{ObjectId, Processor};
use crate::track::Track;
use crate::transport::{PlayingMode, TimeSignature};

/// Keyboard-class events share one payload layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyboardRtEvent {
    pub kind: KeyboardEventKind,
    /// Receiving track (incoming) or originating track (notifications).
    pub target: ObjectId,
    /// Sample offset within the block.
    pub offset: usize,
    pub channel: u8,
    /// Note number; 0 for channel-wide kinds.
    pub note: u8,
    /// Velocity, pressure, bend (−1..1) or modulation (0..1).
    pub value: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyboardEventKind {
    NoteOn,
    NoteOff,
    NoteAftertouch,
    Aftertouch,
    PitchBend,
    Modulation,
}

/// A heap blob displaced on the audio thread, routed out for deallocation.
#[derive(Debug, Clone)]
pub enum RtBlob {
    Str(Arc<String>),
    Data(Arc<Vec<u8>>),
}

/// The RT event union.
pub enum RtEvent {
    Keyboard(KeyboardRtEvent),
    /// Untouched 3-byte MIDI message forwarded to a raw-MIDI track.
    WrappedMidi {
        target: ObjectId,
        offset: usize,
        data: [u8; 3],
    },
    ParameterChange {
        target: ObjectId,
        offset: usize,
        parameter: ObjectId,
        /// Normalized `[0, 1]`.
        value: f32,
    },
    StringPropertyChange {
        target: ObjectId,
        offset: usize,
        property: ObjectId,
        value: Arc<String>,
    },
    DataPropertyChange {
        target: ObjectId,
        offset: usize,
        property: ObjectId,
        value: Arc<Vec<u8>>,
    },
    ProgramChange {
        target: ObjectId,
        offset: usize,
        program: u8,
    },
    SetBypass {
        target: ObjectId,
        bypassed: bool,
    },
    Tempo {
        offset: usize,
        tempo: f32,
    },
    TimeSignature {
        offset: usize,
        signature: TimeSignature,
    },
    PlayingMode {
        offset: usize,
        mode: PlayingMode,
    },
    AddProcessor {
        track: ObjectId,
        processor: Box<dyn Processor>,
    },
    RemoveProcessor {
        track: ObjectId,
        processor: ObjectId,
    },
    AddTrack {
        track: Box<Track>,
    },
    RemoveTrack {
        track: ObjectId,
    },
    AsyncWorkCompletion {
        target: ObjectId,
        work_id: u64,
        success: bool,
    },
    /// Node unlinked from the graph, returned for deallocation.
    ProcessorReturned {
        processor: Box<dyn Processor>,
    },
    TrackReturned {
        track: Box<Track>,
    },
    /// Displaced property blob, returned for deallocation.
    BlobReturned {
        blob: RtBlob,
    },
}

impl RtEvent {
    /// The object this event is addressed to, if it is targeted.
    pub fn target(&self) -> Option<ObjectId> {
        match self {
            RtEvent::Keyboard(event) => Some(event.target),
            RtEvent::WrappedMidi { target, .. }
            | RtEvent::ParameterChange { target, .. }
            | RtEvent::StringPropertyChange { target, .. }
            | RtEvent::DataPropertyChange { target, .. }
            | RtEvent::ProgramChange { target, .. }
            | RtEvent::SetBypass { target, .. }
            | RtEvent::AsyncWorkCompletion { target, .. } => Some(*target),
            _ => None,
        }
    }

    /// Sample offset within the block, 0 for events without a position.
    pub fn offset(&self) -> usize {
        match self {
            RtEvent::Keyboard(event) => event.offset,
            RtEvent::WrappedMidi { offset, .. }
            | RtEvent::ParameterChange { offset, .. }
            | RtEvent::StringPropertyChange { offset, .. }
            | RtEvent::DataPropertyChange { offset, .. }
            | RtEvent::ProgramChange { offset, .. }
            | RtEvent::Tempo { offset, .. }
            | RtEvent::TimeSignature { offset, .. }
            | RtEvent::PlayingMode { offset, .. } => *offset,
            _ => 0,
        }
    }

    pub fn is_keyboard_event(&self) -> bool {
        matches!(self, RtEvent::Keyboard(_) | RtEvent::WrappedMidi { .. })
    }

    /// Copy of the event for fan-out to several receivers. `None` for
    /// variants that own a node or blob.
    pub fn duplicate(&self) -> Option<RtEvent> {
        match self {
            RtEvent::Keyboard(event) => Some(RtEvent::Keyboard(*event)),
            RtEvent::WrappedMidi {
                target,
                offset,
                data,
            } => Some(RtEvent::WrappedMidi {
                target: *target,
                offset: *offset,
                data: *data,
            }),
            RtEvent::ParameterChange {
                target,
                offset,
                parameter,
                value,
            } => Some(RtEvent::ParameterChange {
                target: *target,
                offset: *offset,
                parameter: *parameter,
                value: *value,
            }),
            RtEvent::ProgramChange {
                target,
                offset,
                program,
            } => Some(RtEvent::ProgramChange {
                target: *target,
                offset: *offset,
                program: *program,
            }),
            RtEvent::SetBypass { target, bypassed } => Some(RtEvent::SetBypass {
                target: *target,
                bypassed: *bypassed,
            }),
            _ => None,
        }
    }
}

impl std::fmt::Debug for RtEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RtEvent::Keyboard(event) => f.debug_tuple("Keyboard").field(event).finish(),
            RtEvent::WrappedMidi { target, data, .. } => f
                .debug_struct("WrappedMidi")
                .field("target", target)
                .field("data", data)
                .finish(),
            RtEvent::ParameterChange {
                target,
                parameter,
                value,
                ..
            } => f
                .debug_struct("ParameterChange")
                .field("target", target)
                .field("parameter", parameter)
                .field("value", value)
                .finish(),
            RtEvent::StringPropertyChange {
                target, property, ..
            } => f
                .debug_struct("StringPropertyChange")
                .field("target", target)
                .field("property", property)
                .finish(),
            RtEvent::DataPropertyChange {
                target, property, ..
            } => f
                .debug_struct("DataPropertyChange")
                .field("target", target)
                .field("property", property)
                .finish(),
            RtEvent::ProgramChange {
                target, program, ..
            } => f
                .debug_struct("ProgramChange")
                .field("target", target)
                .field("program", program)
                .finish(),
            RtEvent::SetBypass { target, bypassed } => f
                .debug_struct("SetBypass")
                .field("target", target)
                .field("bypassed", bypassed)
                .finish(),
            RtEvent::Tempo { tempo, .. } => {
                f.debug_struct("Tempo").field("tempo", tempo).finish()
            }
            RtEvent::TimeSignature { signature, .. } => f
                .debug_struct("TimeSignature")
                .field("signature", signature)
                .finish(),
            RtEvent::PlayingMode { mode, .. } => {
                f.debug_struct("PlayingMode").field("mode", mode).finish()
            }
            RtEvent::AddProcessor { track, processor } => f
                .debug_struct("AddProcessor")
                .field("track", track)
                .field("processor", &processor.id())
                .finish(),
            RtEvent::RemoveProcessor { track, processor } => f
                .debug_struct("RemoveProcessor")
                .field("track", track)
                .field("processor", processor)
                .finish(),
            RtEvent::AddTrack { track } => f
                .debug_struct("AddTrack")
                .field("track", &track.id())
                .finish(),
            RtEvent::RemoveTrack { track } => {
                f.debug_struct("RemoveTrack").field("track", track).finish()
            }
            RtEvent::AsyncWorkCompletion {
                target,
                work_id,
                success,
            } => f
                .debug_struct("AsyncWorkCompletion")
                .field("target", target)
                .field("work_id", work_id)
                .field("success", success)
                .finish(),
            RtEvent::ProcessorReturned { processor } => f
                .debug_struct("ProcessorReturned")
                .field("processor", &processor.id())
                .finish(),
            RtEvent::TrackReturned { track } => f
                .debug_struct("TrackReturned")
                .field("track", &track.id())
                .finish(),
            RtEvent::BlobReturned { .. } => f.debug_struct("BlobReturned").finish(),
        }
    }
}
