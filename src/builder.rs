//! Builder wiring the engine, dispatcher, MIDI dispatcher, and timer.

use std::sync::Arc;

use parking_lot::Mutex;

use vivace_core::{
    AudioEngine, EngineRoutingTable, EventDispatcher, InternalPluginRegistry, PerformanceTimer,
    PluginLoader, ProcessorRegistry, RtEventFifo, Transport, AUDIO_CHUNK_SIZE, RT_FIFO_CAPACITY,
};
use vivace_midi::MidiDispatcher;

use crate::engine::Vivace;
use crate::Result;

pub struct VivaceBuilder {
    sample_rate: f32,
    midi_inputs: usize,
    midi_outputs: usize,
    rt_fifo_capacity: usize,
    loader: Option<Arc<dyn PluginLoader>>,
    timing_enabled: bool,
}

impl Default for VivaceBuilder {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            midi_inputs: 1,
            midi_outputs: 1,
            rt_fifo_capacity: RT_FIFO_CAPACITY,
            loader: None,
            timing_enabled: false,
        }
    }
}

impl VivaceBuilder {
    pub fn sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn midi_inputs(mut self, ports: usize) -> Self {
        self.midi_inputs = ports;
        self
    }

    pub fn midi_outputs(mut self, ports: usize) -> Self {
        self.midi_outputs = ports;
        self
    }

    /// Capacity of each RT event fifo. Must be a power of two.
    pub fn rt_fifo_capacity(mut self, capacity: usize) -> Self {
        self.rt_fifo_capacity = capacity;
        self
    }

    /// Plugin loader used by `create_processor_on_track`. Defaults to the
    /// internal plugin registry.
    pub fn plugin_loader(mut self, loader: Arc<dyn PluginLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Enable per-node CPU timing from the start.
    pub fn enable_timings(mut self) -> Self {
        self.timing_enabled = true;
        self
    }

    pub fn build(self) -> Result<Vivace> {
        let input_fifo = Arc::new(RtEventFifo::with_capacity(self.rt_fifo_capacity));
        let output_fifo = Arc::new(RtEventFifo::with_capacity(self.rt_fifo_capacity));

        let transport = Arc::new(Transport::new(self.sample_rate));
        let registry = Arc::new(ProcessorRegistry::new());
        let routing = Arc::new(EngineRoutingTable::new());

        let timer = PerformanceTimer::new();
        timer.set_timing_period(self.sample_rate, AUDIO_CHUNK_SIZE);
        timer.enable(self.timing_enabled);

        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(InternalPluginRegistry::with_defaults()));

        let engine = AudioEngine::new(
            Arc::clone(&transport),
            Arc::clone(&input_fifo),
            Arc::clone(&output_fifo),
            Arc::clone(&routing),
            Arc::clone(&timer),
        );
        let state_cell = engine.state_cell();

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&input_fifo),
            Arc::clone(&output_fifo),
            Arc::clone(&registry),
            Arc::clone(&routing),
            loader,
            Arc::clone(&timer),
            self.sample_rate,
        ));

        let midi = Arc::new(MidiDispatcher::new(
            self.midi_inputs,
            self.midi_outputs,
            Arc::clone(&input_fifo),
            Arc::clone(&registry),
        ));

        // Outgoing MIDI rides on the dispatcher's notification fan-out
        dispatcher.subscribe_to_keyboard_events(midi.clone());
        dispatcher.subscribe_to_parameter_notifications(midi.clone());

        Ok(Vivace {
            sample_rate: self.sample_rate,
            engine: Mutex::new(Some(engine)),
            dispatcher,
            midi,
            registry,
            routing,
            transport,
            timer,
            state_cell,
        })
    }
}
