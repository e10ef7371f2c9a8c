//! Slewed gain processor.

use crate::buffer::ChunkSampleBuffer;
use crate::parameter::{ParamHandle, ParameterScale, ParameterStoreBuilder};
use crate::processor::{Processor, ProcessorData};
use crate::{AUDIO_CHUNK_SIZE, TRACK_MAX_CHANNELS};

pub const GAIN_UID: &str = "vivace.gain";

/// Gain slews at most this many linear units per second, so a jump across
/// the full 0..2 range lands in ~5 ms without zipper noise.
const GAIN_SLEW_PER_SECOND: f32 = 400.0;

/// Applies one linear gain value to every channel. The gain moves toward
/// the parameter target by at most one block step per block, interpolated
/// across the block.
pub struct GainPlugin {
    data: ProcessorData,
    gain_handle: ParamHandle,
    current_gain: f32,
    max_block_step: f32,
}

impl GainPlugin {
    pub fn new() -> Self {
        let mut params = ParameterStoreBuilder::new();
        let gain_handle = params
            .register_float_parameter("gain", "Gain", "", 0.5, 0.0, 2.0, ParameterScale::Linear)
            .expect("fresh builder");
        Self {
            data: ProcessorData::new(
                GAIN_UID,
                "Gain",
                params.build(),
                TRACK_MAX_CHANNELS,
                TRACK_MAX_CHANNELS,
            ),
            gain_handle,
            current_gain: 1.0,
            max_block_step: GAIN_SLEW_PER_SECOND * AUDIO_CHUNK_SIZE as f32 / 48000.0,
        }
    }
}

impl Default for GainPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for GainPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.set_sample_rate(sample_rate);
        self.max_block_step = GAIN_SLEW_PER_SECOND * AUDIO_CHUNK_SIZE as f32 / sample_rate;
        self.current_gain = self.data.parameters().value(self.gain_handle);
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        let target = self.data.parameters().value(self.gain_handle);
        let start = self.current_gain;
        let delta = target - start;
        // Snap once within one step so the gain lands exactly on target
        let end = if delta.abs() <= self.max_block_step {
            target
        } else {
            start + self.max_block_step.copysign(delta)
        };
        self.current_gain = end;
        let step = (end - start) / AUDIO_CHUNK_SIZE as f32;

        let channels = input.channel_count().min(output.channel_count());
        for ch in 0..channels {
            let src = input.channel(ch);
            let dst = output.channel_mut(ch);
            for i in 0..AUDIO_CHUNK_SIZE {
                dst[i] = src[i] * (start + step * (i + 1) as f32);
            }
        }
    }
}
