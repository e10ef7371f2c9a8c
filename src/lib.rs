//! # Vivace — real-time audio plugin host and mixing engine
//!
//! Vivace routes blocks of audio and MIDI through a configurable graph of
//! tracks and per-track processor chains, with bounded, sample-aligned
//! latency and a strictly allocation-free audio thread.
//!
//! ## Architecture
//!
//! - **vivace-core** — processor/parameter substrate, tracks, block render
//!   engine, RT event transport, event dispatcher, performance timer
//! - **vivace-midi** — MIDI dispatcher and routing matrix
//! - **vivace** (this crate) — builder, engine facade, controller surface
//!
//! ## Quick start
//!
//! ```no_run
//! use vivace::prelude::*;
//!
//! let vivace = Vivace::builder()
//!     .sample_rate(48000.0)
//!     .build()?;
//! vivace.start();
//!
//! let controller = vivace.controller();
//! controller.add_track("main", 1, 1);
//! controller.set_tempo(128.0);
//!
//! // The audio frontend takes the engine and calls process_chunk()
//! // once per block on its audio thread.
//! let engine = vivace.take_audio_engine().unwrap();
//! # let _ = engine;
//! # Ok::<(), vivace::Error>(())
//! ```

/// Re-export of vivace-core for direct access.
pub use vivace_core as core;

/// Re-export of vivace-midi for direct access.
pub use vivace_midi as midi;

pub use vivace_core::{
    AudioEngine, AudioFrontend, AudioFrontendConfig, AudioFrontendStatus, ChunkSampleBuffer,
    EngineRoutingTable, EngineState, Event, EventDispatcher, EventObserver, EventPayload,
    EventStatus, GainPlugin, InternalPluginRegistry, KeyboardEventKind, KeyboardRtEvent,
    ObjectId, ParameterDescriptor, ParameterScale, ParameterStore, PassthroughPlugin,
    PeakMeterPlugin, PerformanceTimer, PlayingMode, PluginLoadError, PluginLoader,
    ProcessTimings, Processor, ProcessorData, ProcessorInfo, ProcessorRegistry, RtEvent,
    RtEventFifo, TimeSignature, Track, Transport, AUDIO_CHUNK_SIZE,
};

pub use vivace_midi::{
    CcInputConnection, KbdInputConnection, KbdOutputConnection, MidiDispatcher,
    MidiDispatcherStatus, MidiReceiver, PcInputConnection, MIDI_CHANNEL_OMNI,
};

mod builder;
mod controller;
mod engine;
mod error;

pub use builder::VivaceBuilder;
pub use controller::{ControlStatus, Controller};
pub use engine::Vivace;
pub use error::{Error, Result};

/// Convenience prelude for common imports.
pub mod prelude {
    pub use crate::{ControlStatus, Controller, Vivace, VivaceBuilder};

    pub use crate::core::{
        AudioEngine, ChunkSampleBuffer, EngineState, PlayingMode, TimeSignature, Track,
        AUDIO_CHUNK_SIZE,
    };

    pub use crate::midi::{MidiDispatcherStatus, MIDI_CHANNEL_OMNI};
}
