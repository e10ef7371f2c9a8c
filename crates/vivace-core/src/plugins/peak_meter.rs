//! Stereo peak meter reporting through parameter-change notifications.

use crate::buffer::ChunkSampleBuffer;
use crate::parameter::{ParamHandle, ParameterScale, ParameterStoreBuilder};
use crate::processor::{Processor, ProcessorData};

pub const PEAK_METER_UID: &str = "vivace.peak_meter";

/// Notification rate in Hz.
const REFRESH_RATE: f32 = 25.0;

/// Passes audio through unchanged and publishes the per-channel peak of the
/// last refresh window as `level_left` / `level_right` parameter-change
/// notifications.
pub struct PeakMeterPlugin {
    data: ProcessorData,
    level_handles: [ParamHandle; 2],
    peaks: [f32; 2],
    blocks_per_refresh: u32,
    block_counter: u32,
}

impl PeakMeterPlugin {
    pub fn new() -> Self {
        let mut params = ParameterStoreBuilder::new();
        let left = params
            .register_float_parameter("level_left", "Level L", "", 0.0, 0.0, 1.0, ParameterScale::Linear)
            .expect("fresh builder");
        let right = params
            .register_float_parameter("level_right", "Level R", "", 0.0, 0.0, 1.0, ParameterScale::Linear)
            .expect("fresh builder");
        Self {
            data: ProcessorData::new(PEAK_METER_UID, "Peak Meter", params.build(), 2, 2),
            level_handles: [left, right],
            peaks: [0.0; 2],
            blocks_per_refresh: 1,
            block_counter: 0,
        }
    }
}

impl Default for PeakMeterPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PeakMeterPlugin {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.set_sample_rate(sample_rate);
        let blocks_per_second = sample_rate / crate::AUDIO_CHUNK_SIZE as f32;
        self.blocks_per_refresh = (blocks_per_second / REFRESH_RATE).max(1.0) as u32;
        self.block_counter = 0;
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        output.copy_from(input);

        let channels = input.channel_count().min(2);
        for ch in 0..channels {
            self.peaks[ch] = self.peaks[ch].max(input.channel_peak(ch));
        }

        self.block_counter += 1;
        if self.block_counter >= self.blocks_per_refresh {
            self.block_counter = 0;
            for ch in 0..channels {
                let level = self.peaks[ch].min(1.0);
                self.data
                    .set_parameter_and_notify(self.level_handles[ch], level);
                self.peaks[ch] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::RtEventFifo;
    use crate::rt_event::RtEvent;
    use std::sync::Arc;

    #[test]
    fn test_reports_peak_after_refresh_window() {
        let mut meter = PeakMeterPlugin::new();
        meter.configure(48000.0);
        let fifo = Arc::new(RtEventFifo::with_capacity(64));
        meter.set_event_output(Arc::clone(&fifo));

        let mut input = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(0.7);
        let mut output = ChunkSampleBuffer::new(2);

        for _ in 0..meter.blocks_per_refresh {
            meter.process_audio(&input, &mut output);
        }

        // First notification is the left channel peak
        match fifo.pop() {
            Some(RtEvent::ParameterChange { target, value, .. }) => {
                assert_eq!(target, meter.id());
                assert!((value - 0.7).abs() < 1e-6);
            }
            other => panic!("expected parameter change, got {:?}", other),
        }
        // Audio passed through unchanged
        assert_eq!(output.channel(0), input.channel(0));
    }

    #[test]
    fn test_peak_resets_between_windows() {
        let mut meter = PeakMeterPlugin::new();
        meter.configure(48000.0);
        let fifo = Arc::new(RtEventFifo::with_capacity(256));
        meter.set_event_output(Arc::clone(&fifo));

        let mut loud = ChunkSampleBuffer::new(2);
        loud.channel_mut(0).fill(0.9);
        let silent = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);

        for _ in 0..meter.blocks_per_refresh {
            meter.process_audio(&loud, &mut output);
        }
        while fifo.pop().is_some() {}

        for _ in 0..meter.blocks_per_refresh {
            meter.process_audio(&silent, &mut output);
        }
        match fifo.pop() {
            Some(RtEvent::ParameterChange { value, .. }) => assert_eq!(value, 0.0),
            other => panic!("expected parameter change, got {:?}", other),
        }
    }
}
