//! Identity processor, mostly useful as a chain placeholder and in tests.

use crate::buffer::ChunkSampleBuffer;
use crate::parameter::ParameterStoreBuilder;
use crate::processor::{Processor, ProcessorData};
use crate::TRACK_MAX_CHANNELS;

pub const PASSTHROUGH_UID: &str = "vivace.passthrough";

pub struct PassthroughPlugin {
    data: ProcessorData,
}

impl PassthroughPlugin {
    pub fn new() -> Self {
        Self {
            data: ProcessorData::new(
                PASSTHROUGH_UID,
                "Passthrough",
                ParameterStoreBuilder::new().build(),
                TRACK_MAX_CHANNELS,
                TRACK_MAX_CHANNELS,
            ),
        }
    }
}

impl Default for PassthroughPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PassthroughPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        output.copy_from(input);
    }
}
