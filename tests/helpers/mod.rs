//! Shared rig for integration tests.
//!
//! Tests run the whole stack synchronously: the dispatcher is pumped with
//! `run_once()` instead of its worker thread, and the test thread doubles
//! as the audio thread by calling `process_chunk` directly.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use vivace::core::parameter::ParameterStoreBuilder;
use vivace::core::rt_event::RtEvent;
use vivace::prelude::*;
use vivace::{
    InternalPluginRegistry, ObjectId, PluginLoadError, PluginLoader, Processor, ProcessorData,
};

pub const SQRT_2_OVER_2: f32 = std::f32::consts::SQRT_2 / 2.0;

/// Test processor that records every note-on it receives.
pub struct RecorderPlugin {
    data: ProcessorData,
    notes: Arc<Mutex<Vec<(ObjectId, u8)>>>,
}

impl RecorderPlugin {
    pub fn new(notes: Arc<Mutex<Vec<(ObjectId, u8)>>>) -> Self {
        Self {
            data: ProcessorData::new(
                "test.recorder",
                "Recorder",
                ParameterStoreBuilder::new().build(),
                2,
                2,
            ),
            notes,
        }
    }
}

impl Processor for RecorderPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_event(&mut self, event: RtEvent) {
        if let RtEvent::Keyboard(kb) = &event {
            if kb.kind == vivace::KeyboardEventKind::NoteOn {
                self.notes.lock().push((self.data.id(), kb.note));
            }
        }
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        output.copy_from(input);
    }
}

/// Loader exposing the internal plugins plus the test recorder.
pub struct TestLoader {
    internal: InternalPluginRegistry,
    notes: Arc<Mutex<Vec<(ObjectId, u8)>>>,
}

impl PluginLoader for TestLoader {
    fn load(
        &self,
        uid_or_path: &str,
        sample_rate: f32,
    ) -> Result<Box<dyn Processor>, PluginLoadError> {
        if uid_or_path == "test.recorder" {
            let mut plugin = Box::new(RecorderPlugin::new(Arc::clone(&self.notes)));
            plugin.configure(sample_rate);
            return Ok(plugin);
        }
        self.internal.load(uid_or_path, sample_rate)
    }
}

pub struct TestRig {
    pub vivace: Vivace,
    pub engine: AudioEngine,
    pub controller: Controller,
    pub notes: Arc<Mutex<Vec<(ObjectId, u8)>>>,
}

pub fn rig() -> TestRig {
    let notes = Arc::new(Mutex::new(Vec::new()));
    let loader = Arc::new(TestLoader {
        internal: InternalPluginRegistry::with_defaults(),
        notes: Arc::clone(&notes),
    });
    let vivace = Vivace::builder()
        .sample_rate(48000.0)
        .plugin_loader(loader)
        .build()
        .unwrap();
    let engine = vivace.take_audio_engine().unwrap();
    let controller = vivace.controller();
    TestRig {
        vivace,
        engine,
        controller,
        notes,
    }
}

impl TestRig {
    /// One synchronous dispatcher tick.
    pub fn tick(&self) {
        self.vivace.dispatcher().run_once();
    }

    /// One audio block.
    pub fn process_block(&mut self, input: &ChunkSampleBuffer) -> ChunkSampleBuffer {
        let mut output = ChunkSampleBuffer::new(2);
        self.engine
            .process_chunk(input, &mut output, Duration::ZERO);
        output
    }

    /// Tick and render a number of silent blocks, letting gain ramps settle.
    pub fn settle(&mut self, blocks: usize) {
        let silence = ChunkSampleBuffer::new(2);
        for _ in 0..blocks {
            self.tick();
            self.process_block(&silence);
        }
    }

    /// Create a stereo track wired straight to engine channels 0/1.
    pub fn add_stereo_track(&mut self, name: &str) -> ObjectId {
        assert_eq!(self.controller.add_track(name, 1, 1), ControlStatus::Ok);
        self.tick();
        let id = self
            .controller
            .processor_id_by_name(name)
            .expect("track registered");

        assert_eq!(self.controller.connect_engine_input(0, id, 0), ControlStatus::Ok);
        assert_eq!(self.controller.connect_engine_input(1, id, 1), ControlStatus::Ok);
        assert_eq!(self.controller.connect_engine_output(0, id, 0), ControlStatus::Ok);
        assert_eq!(self.controller.connect_engine_output(1, id, 1), ControlStatus::Ok);
        self.tick();

        // Splice the track in at the next block boundary
        let silence = ChunkSampleBuffer::new(2);
        self.process_block(&silence);
        id
    }

    /// Create a processor on a track and return its id.
    pub fn add_processor(&mut self, uid: &str, name: &str, track: ObjectId) -> ObjectId {
        assert_eq!(
            self.controller.create_processor_on_track(uid, name, track),
            ControlStatus::Ok
        );
        self.tick();
        let id = self
            .controller
            .processor_id_by_name(name)
            .expect("processor registered");
        let silence = ChunkSampleBuffer::new(2);
        self.process_block(&silence);
        id
    }

    /// Global id of a named parameter on a processor.
    pub fn parameter_id(&self, processor: ObjectId, name: &str) -> ObjectId {
        self.controller
            .parameters(processor)
            .expect("processor exists")
            .iter()
            .find(|d| d.name == name)
            .expect("parameter exists")
            .id
    }
}

/// A full-scale stereo input block.
pub fn unit_input() -> ChunkSampleBuffer {
    let mut input = ChunkSampleBuffer::new(2);
    input.channel_mut(0).fill(1.0);
    input.channel_mut(1).fill(1.0);
    input
}
