//! The engine facade that wires all subsystems together.

use std::sync::Arc;

use parking_lot::Mutex;

use vivace_core::engine::EngineStateCell;
use vivace_core::{
    AudioEngine, EngineRoutingTable, EngineState, EventDispatcher, PerformanceTimer,
    ProcessorRegistry, Transport,
};
use vivace_midi::MidiDispatcher;

use crate::builder::VivaceBuilder;
use crate::controller::Controller;

/// Owns the engine, dispatcher, MIDI dispatcher, and timer, and hands out
/// control handles.
///
/// The [`AudioEngine`] itself is taken out once by the audio frontend via
/// [`take_audio_engine()`](Vivace::take_audio_engine) and driven from the
/// frontend's audio thread; everything else stays here behind `Arc`s.
pub struct Vivace {
    pub(crate) sample_rate: f32,
    pub(crate) engine: Mutex<Option<AudioEngine>>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) midi: Arc<MidiDispatcher>,
    pub(crate) registry: Arc<ProcessorRegistry>,
    pub(crate) routing: Arc<EngineRoutingTable>,
    pub(crate) transport: Arc<Transport>,
    pub(crate) timer: Arc<PerformanceTimer>,
    pub(crate) state_cell: Arc<EngineStateCell>,
}

impl Vivace {
    pub fn builder() -> VivaceBuilder {
        VivaceBuilder::default()
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Spawn the dispatcher and timer worker threads. Idempotent.
    ///
    /// Embedders that pump [`EventDispatcher::run_once`] themselves can skip
    /// this for fully synchronous operation.
    pub fn start(&self) {
        self.dispatcher.run();
        self.timer.run();
    }

    /// Stop the worker threads and request the engine to go silent. Pending
    /// events complete with `Aborted`.
    pub fn stop(&self) {
        self.state_cell.request(EngineState::Stopped);
        self.dispatcher.stop();
        self.timer.stop();
    }

    /// Move the audio engine out for the audio frontend. Returns `None`
    /// after the first call.
    pub fn take_audio_engine(&self) -> Option<AudioEngine> {
        self.engine.lock().take()
    }

    /// A stateless control facade. Cheap to create and clone.
    pub fn controller(&self) -> Controller {
        Controller::new(
            self.dispatcher.handle(),
            Arc::clone(&self.registry),
            Arc::clone(&self.midi),
            Arc::clone(&self.transport),
            Arc::clone(&self.timer),
            Arc::clone(&self.state_cell),
            Arc::clone(&self.routing),
        )
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn midi_dispatcher(&self) -> &Arc<MidiDispatcher> {
        &self.midi
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn routing(&self) -> &Arc<EngineRoutingTable> {
        &self.routing
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn performance_timer(&self) -> &Arc<PerformanceTimer> {
        &self.timer
    }
}

impl std::fmt::Debug for Vivace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vivace")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
