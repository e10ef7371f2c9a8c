//! Core of the vivace audio engine.
//!
//! Everything that touches the audio thread lives here: the processor and
//! parameter substrate, tracks with per-track processor chains, the block
//! render engine, the lock-free RT event transport, the non-RT event
//! dispatcher, and the performance timer.
//!
//! # Architecture
//!
//! ```text
//! Client threads                Dispatcher thread           Audio thread
//!      │                              │                          │
//!      │  post_event(Event)           │                          │
//!      ├─────────────────────────────▶│                          │
//!      │                              │  RtEvent (SPSC fifo)     │
//!      │                              ├─────────────────────────▶│
//!      │                              │                          │ process_chunk()
//!      │                              │◀─────────────────────────┤
//!      │      notifications           │  RtEvent (SPSC fifo)     │
//!      │◀─────────────────────────────┤                          │
//! ```
//!
//! The audio thread never allocates, locks, or blocks. All graph mutations
//! travel through the RT fifos as pre-built nodes and are spliced in at
//! block boundaries; removed nodes are shipped back out so they are dropped
//! on the dispatcher thread.

/// Samples per channel processed in one engine block.
pub const AUDIO_CHUNK_SIZE: usize = 64;

/// Upper bound on engine-level I/O channels.
pub const MAX_ENGINE_CHANNELS: usize = 8;

/// No technical limit, just arbitrarily high enough for any sane track.
pub const TRACK_MAX_CHANNELS: usize = 10;

/// A bus is a pair of adjacent channels.
pub const TRACK_MAX_BUSSES: usize = TRACK_MAX_CHANNELS / 2;

/// Capacity reserved for a track's processor chain.
pub const TRACK_MAX_PROCESSORS: usize = 32;

/// Capacity reserved for the engine's track list.
pub const MAX_TRACKS: usize = 32;

/// Default capacity of the two RT event fifos. Must be a power of two.
pub const RT_FIFO_CAPACITY: usize = 1024;

pub mod error;
pub use error::{Error, Result};

pub mod buffer;
pub use buffer::ChunkSampleBuffer;

pub mod fifo;
pub use fifo::{RtEventFifo, SpinLock, SpscRing};

pub mod parameter;
pub use parameter::{
    ParamHandle, ParamId, ParameterDescriptor, ParameterKind, ParameterScale, ParameterStore,
    ParameterStoreBuilder,
};

pub mod rt_event;
pub use rt_event::{KeyboardEventKind, KeyboardRtEvent, RtBlob, RtEvent};

pub mod processor;
pub use processor::{next_object_id, ObjectId, Processor, ProcessorData, NO_OBJECT};

pub mod plugins;
pub use plugins::{GainPlugin, InternalPluginRegistry, PassthroughPlugin, PeakMeterPlugin};

pub mod track;
pub use track::Track;

pub mod transport;
pub use transport::{PlayingMode, TimeSignature, Transport};

pub mod engine;
pub use engine::{AudioConnection, AudioEngine, EngineRoutingTable, EngineState};

pub mod event;
pub use event::{CompletionCallback, Event, EventId, EventPayload, EventStatus, EventTime};

pub mod dispatcher;
pub use dispatcher::{
    DispatcherHandle, DispatcherStatus, EventDispatcher, EventObserver, PosterId, MAX_POSTERS,
    THREAD_PERIODICITY,
};

pub mod timing;
pub use timing::{PerformanceTimer, ProcessTimings, MAX_LOG_ENTRIES};

pub mod registry;
pub use registry::{ProcessorInfo, ProcessorRegistry};

pub mod frontend;
pub use frontend::{
    AudioFrontend, AudioFrontendConfig, AudioFrontendStatus, PluginLoadError, PluginLoader,
};
