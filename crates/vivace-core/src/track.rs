//! A mixer track: a processor that owns an ordered chain of processors.
//!
//! Tracks are bus-granular — every bus is a stereo pair. The chain renders
//! through two flip-flopped scratch buffers, then per-bus gain (smoothed,
//! linear) and pan (equal-power) shape the result into the output buffer.
//!
//! Events emitted by chain processors land in the track's internal output
//! buffer by default so several tracks can render concurrently without
//! contending on a shared sink; the engine merges the buffers in track
//! order after rendering. `set_event_output()` switches a track to a shared
//! sink instead.

use std::f32::consts::FRAC_PI_4;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::ChunkSampleBuffer;
use crate::fifo::RtEventFifo;
use crate::parameter::{ParamHandle, ParameterScale, ParameterStoreBuilder};
use crate::processor::{ObjectId, Processor, ProcessorData};
use crate::rt_event::RtEvent;
use crate::timing::PerformanceTimer;
use crate::{AUDIO_CHUNK_SIZE, TRACK_MAX_BUSSES, TRACK_MAX_PROCESSORS};

/// Capacity of the per-track keyboard and output event buffers.
const TRACK_EVENT_BUFFER_CAPACITY: usize = 256;

/// Bus gain slews at most this many linear units per second, so a jump
/// across the full 0..2 range lands in ~5 ms without zipper noise.
const GAIN_SLEW_PER_SECOND: f32 = 400.0;

fn gain_step_per_block(sample_rate: f32) -> f32 {
    GAIN_SLEW_PER_SECOND * AUDIO_CHUNK_SIZE as f32 / sample_rate
}

/// Slewed gain state for one output bus. Each block the gain moves toward
/// the parameter target by at most one block step, and the render loop
/// interpolates linearly across the block between the old and new value.
#[derive(Debug, Clone)]
struct BusGain {
    current: f32,
    max_block_step: f32,
}

impl BusGain {
    fn new(initial: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            max_block_step: gain_step_per_block(sample_rate),
        }
    }

    /// Advance one block toward `target`, snapping once within one step so
    /// the gain lands exactly. Returns the gain at the block start and end
    /// for in-block interpolation.
    #[inline]
    fn advance(&mut self, target: f32) -> (f32, f32) {
        let start = self.current;
        let delta = target - start;
        self.current = if delta.abs() <= self.max_block_step {
            target
        } else {
            start + self.max_block_step.copysign(delta)
        };
        (start, self.current)
    }
}

pub struct Track {
    data: ProcessorData,
    processors: Vec<Box<dyn Processor>>,
    input_buffer: ChunkSampleBuffer,
    output_buffer: ChunkSampleBuffer,
    scratch: [ChunkSampleBuffer; 2],
    input_busses: usize,
    output_busses: usize,
    gain_handles: Vec<ParamHandle>,
    pan_handles: Vec<ParamHandle>,
    bus_gain: Vec<BusGain>,
    kb_event_buffer: RtEventFifo,
    output_event_buffer: Arc<RtEventFifo>,
    external_output: Option<Arc<RtEventFifo>>,
    timer: Option<Arc<PerformanceTimer>>,
}

impl Track {
    /// Create a track with the given number of stereo input and output
    /// busses.
    pub fn new(
        name: &str,
        input_busses: usize,
        output_busses: usize,
        timer: Option<Arc<PerformanceTimer>>,
    ) -> crate::Result<Self> {
        if input_busses == 0
            || output_busses == 0
            || input_busses > TRACK_MAX_BUSSES
            || output_busses > TRACK_MAX_BUSSES
        {
            return Err(crate::Error::InvalidChannelCount(
                input_busses.max(output_busses) * 2,
            ));
        }

        let mut params = ParameterStoreBuilder::new();
        let mut gain_handles = Vec::with_capacity(output_busses);
        let mut pan_handles = Vec::with_capacity(output_busses);
        for bus in 0..output_busses {
            let (gain_name, pan_name) = if bus == 0 {
                ("gain".to_owned(), "pan".to_owned())
            } else {
                (format!("gain_sub_{}", bus), format!("pan_sub_{}", bus))
            };
            gain_handles.push(params.register_float_parameter(
                &gain_name,
                "Gain",
                "",
                0.5,
                0.0,
                2.0,
                ParameterScale::Linear,
            )?);
            pan_handles.push(params.register_float_parameter(
                &pan_name,
                "Pan",
                "",
                0.5,
                -1.0,
                1.0,
                ParameterScale::Linear,
            )?);
        }

        let input_channels = input_busses * 2;
        let output_channels = output_busses * 2;
        let scratch_channels = input_channels.max(output_channels);

        let bus_gain = (0..output_busses)
            .map(|_| BusGain::new(1.0, 48000.0))
            .collect();

        Ok(Self {
            data: ProcessorData::new(name, "Track", params.build(), input_channels, output_channels),
            processors: Vec::with_capacity(TRACK_MAX_PROCESSORS),
            input_buffer: ChunkSampleBuffer::new(input_channels),
            output_buffer: ChunkSampleBuffer::new(output_channels),
            scratch: [
                ChunkSampleBuffer::new(scratch_channels),
                ChunkSampleBuffer::new(scratch_channels),
            ],
            input_busses,
            output_busses,
            gain_handles,
            pan_handles,
            bus_gain,
            kb_event_buffer: RtEventFifo::with_capacity(TRACK_EVENT_BUFFER_CAPACITY),
            output_event_buffer: Arc::new(RtEventFifo::with_capacity(TRACK_EVENT_BUFFER_CAPACITY)),
            external_output: None,
            timer,
        })
    }

    /// Stereo in, stereo out.
    pub fn new_stereo(name: &str) -> crate::Result<Self> {
        Self::new(name, 1, 1, None)
    }

    #[inline]
    pub fn input_busses(&self) -> usize {
        self.input_busses
    }

    #[inline]
    pub fn output_busses(&self) -> usize {
        self.output_busses
    }

    #[inline]
    pub fn input_buffer_mut(&mut self) -> &mut ChunkSampleBuffer {
        &mut self.input_buffer
    }

    #[inline]
    pub fn output_buffer(&self) -> &ChunkSampleBuffer {
        &self.output_buffer
    }

    /// Buffered events emitted by the chain during the last render.
    #[inline]
    pub fn output_event_buffer(&self) -> &Arc<RtEventFifo> {
        &self.output_event_buffer
    }

    /// Route chain-emitted events into the internal buffer (the default).
    pub fn set_event_output_internal(&mut self) {
        self.external_output = None;
        let sink = Arc::clone(&self.output_event_buffer);
        for processor in &mut self.processors {
            processor.set_event_output(Arc::clone(&sink));
        }
    }

    /// Route chain-emitted events directly into a shared sink.
    pub fn set_event_output(&mut self, sink: Arc<RtEventFifo>) {
        for processor in &mut self.processors {
            processor.set_event_output(Arc::clone(&sink));
        }
        self.external_output = Some(sink);
    }

    fn chain_sink(&self) -> Arc<RtEventFifo> {
        self.external_output
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.output_event_buffer))
    }

    /// Append a processor to the end of the chain. Returns the processor on
    /// failure (chain full or id already present). RT-safe: the vector
    /// capacity is pre-reserved.
    pub fn add(
        &mut self,
        mut processor: Box<dyn Processor>,
    ) -> std::result::Result<(), Box<dyn Processor>> {
        if self.processors.len() >= TRACK_MAX_PROCESSORS {
            return Err(processor);
        }
        let id = processor.id();
        if self.processors.iter().any(|p| p.id() == id) {
            return Err(processor);
        }
        let channels = self.data.input_channels();
        processor.set_input_channels(channels.min(processor.data().max_input_channels()));
        processor.set_output_channels(channels.min(processor.data().max_output_channels()));
        processor.set_event_output(self.chain_sink());
        self.processors.push(processor);
        Ok(())
    }

    /// Remove a processor from the chain, returning it so the caller can
    /// route it off the audio thread.
    pub fn remove(&mut self, id: ObjectId) -> Option<Box<dyn Processor>> {
        let position = self.processors.iter().position(|p| p.id() == id)?;
        Some(self.processors.remove(position))
    }

    #[inline]
    pub fn chain_len(&self) -> usize {
        self.processors.len()
    }

    pub fn contains_processor(&self, id: ObjectId) -> bool {
        self.processors.iter().any(|p| p.id() == id)
    }

    pub fn chain_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.processors.iter().map(|p| p.id())
    }

    /// Deliver an event to a chain processor by id.
    pub fn deliver_event(&mut self, id: ObjectId, event: RtEvent) -> bool {
        match self.processors.iter_mut().find(|p| p.id() == id) {
            Some(processor) => {
                processor.process_event(event);
                true
            }
            None => false,
        }
    }

    /// Render the chain. Call after `process_event()` and after the input
    /// buffer has been filled for this block.
    pub fn render(&mut self) {
        let start = self.timer.as_ref().and_then(|t| t.start_timer());

        if self.data.is_bypassed() {
            // Clear first: output may be wider than input
            self.output_buffer.clear();
            self.output_buffer.copy_from(&self.input_buffer);
            self.stop_timer(start);
            return;
        }

        // Fan buffered keyboard events out to the whole chain
        while let Some(event) = self.kb_event_buffer.pop() {
            for processor in &mut self.processors {
                if !processor.is_enabled() {
                    continue;
                }
                if let Some(copy) = event.duplicate() {
                    processor.process_event(copy);
                }
            }
        }

        // Chain render through flip-flopped scratch buffers. Bypassed and
        // disabled processors are identity, so the flip is simply skipped.
        self.scratch[0].copy_from(&self.input_buffer);
        let mut src_idx = 0;
        for processor in &mut self.processors {
            if !processor.is_enabled() || processor.is_bypassed() {
                continue;
            }
            let (first, second) = self.scratch.split_at_mut(1);
            let (src, dst) = if src_idx == 0 {
                (&first[0], &mut second[0])
            } else {
                (&second[0], &mut first[0])
            };
            processor.process_audio(src, dst);
            src_idx ^= 1;
        }

        // Per-bus gain and pan into the output buffer
        for bus in 0..self.output_busses {
            let gain_target = self.data.parameters().value(self.gain_handles[bus]);
            let pan = self.data.parameters().value(self.pan_handles[bus]);

            let theta = (pan + 1.0) * FRAC_PI_4;
            let pan_left = theta.cos();
            let pan_right = theta.sin();

            let rendered = &self.scratch[src_idx];
            let (in_left, in_right) = if bus < rendered.bus_count() {
                rendered.bus(bus)
            } else {
                // Bus beyond the chain width renders silence
                let (out_left, out_right) = self.output_buffer.bus_mut(bus);
                out_left.fill(0.0);
                out_right.fill(0.0);
                continue;
            };

            // Gain slews one block step, interpolated across the block so
            // the last sample lands exactly on the slewed value
            let (gain_start, gain_end) = self.bus_gain[bus].advance(gain_target);
            let gain_step = (gain_end - gain_start) / AUDIO_CHUNK_SIZE as f32;

            let (out_left, out_right) = self.output_buffer.bus_mut(bus);
            for i in 0..AUDIO_CHUNK_SIZE {
                let gain = gain_start + gain_step * (i + 1) as f32;
                out_left[i] = in_left[i] * gain * pan_left;
                out_right[i] = in_right[i] * gain * pan_right;
            }
        }

        self.stop_timer(start);
    }

    fn stop_timer(&self, start: Option<Instant>) {
        if let (Some(timer), Some(start)) = (self.timer.as_ref(), start) {
            timer.stop_timer(start, self.data.id());
        }
    }
}

impl Processor for Track {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn configure(&mut self, sample_rate: f32) {
        self.data.set_sample_rate(sample_rate);
        for (bus, gain) in self.bus_gain.iter_mut().enumerate() {
            let current = self.data.parameters().value(self.gain_handles[bus]);
            *gain = BusGain::new(current, sample_rate);
        }
        for processor in &mut self.processors {
            processor.configure(sample_rate);
        }
    }

    fn process_event(&mut self, event: RtEvent) {
        if event.is_keyboard_event() {
            // Buffered until render; dropped when the buffer is full
            let _ = self.kb_event_buffer.push(event);
            return;
        }
        match event {
            RtEvent::ParameterChange {
                parameter, value, ..
            } => {
                let params = self.data.parameters();
                if let Some(handle) = params.handle_by_id(parameter) {
                    params.set_normalized(handle, value);
                }
            }
            RtEvent::SetBypass { bypassed, .. } => self.data.set_bypassed(bypassed),
            _ => {}
        }
    }

    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer) {
        self.input_buffer.copy_from(input);
        self.render();
        output.copy_from(&self.output_buffer);
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.data.id())
            .field("name", &self.data.name())
            .field("busses", &(self.input_busses, self.output_busses))
            .field("chain_len", &self.processors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{GainPlugin, PassthroughPlugin, PeakMeterPlugin};
    use crate::rt_event::{KeyboardEventKind, KeyboardRtEvent};

    const SQRT_2_OVER_2: f32 = std::f32::consts::SQRT_2 / 2.0;

    fn filled_input(track: &mut Track, value: f32) {
        track.input_buffer_mut().channel_mut(0).fill(value);
        track.input_buffer_mut().channel_mut(1).fill(value);
    }

    fn settle(track: &mut Track, blocks: usize) {
        for _ in 0..blocks {
            track.render();
        }
    }

    #[test]
    fn test_bus_gain_slew_is_bounded() {
        let mut gain = BusGain::new(0.0, 48000.0);
        let (start, end) = gain.advance(2.0);
        assert_eq!(start, 0.0);
        assert!((end - gain_step_per_block(48000.0)).abs() < 1e-6);

        // Converges onto the target and holds there
        for _ in 0..16 {
            gain.advance(2.0);
        }
        let (start, end) = gain.advance(2.0);
        assert_eq!(start, 2.0);
        assert_eq!(end, 2.0);
    }

    #[test]
    fn test_invalid_bus_counts_rejected() {
        assert!(Track::new("t", 0, 1, None).is_err());
        assert!(Track::new("t", 1, TRACK_MAX_BUSSES + 1, None).is_err());
    }

    #[test]
    fn test_add_and_remove() {
        let mut track = Track::new_stereo("t").unwrap();
        let plugin = Box::new(PassthroughPlugin::new());
        let id = plugin.id();

        assert!(track.add(plugin).is_ok());
        assert_eq!(track.chain_len(), 1);
        assert!(track.contains_processor(id));

        let removed = track.remove(id).unwrap();
        assert_eq!(removed.id(), id);
        assert_eq!(track.chain_len(), 0);
        assert!(track.remove(id).is_none());
    }

    #[test]
    fn test_add_rejects_when_chain_full() {
        let mut track = Track::new_stereo("t").unwrap();
        for _ in 0..TRACK_MAX_PROCESSORS {
            track.add(Box::new(PassthroughPlugin::new())).unwrap();
        }
        let overflow = track.add(Box::new(PassthroughPlugin::new()));
        assert!(overflow.is_err());
        assert_eq!(track.chain_len(), TRACK_MAX_PROCESSORS);
    }

    #[test]
    fn test_center_pan_is_equal_power() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        filled_input(&mut track, 1.0);
        settle(&mut track, 8);

        let (left, right) = track.output_buffer().bus(0);
        let expected = SQRT_2_OVER_2; // gain 1.0, pan 0.0
        assert!((left[AUDIO_CHUNK_SIZE - 1] - expected).abs() < 0.001);
        assert!((right[AUDIO_CHUNK_SIZE - 1] - expected).abs() < 0.001);
    }

    #[test]
    fn test_hard_pan_left_silences_right() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let params = Arc::clone(track.parameters());
        let pan = params.handle_by_name("pan").unwrap();
        params.set_normalized(pan, 0.0); // domain -1.0

        filled_input(&mut track, 1.0);
        settle(&mut track, 8);

        let (left, right) = track.output_buffer().bus(0);
        assert!((left[AUDIO_CHUNK_SIZE - 1] - 1.0).abs() < 0.001);
        assert!(right[AUDIO_CHUNK_SIZE - 1].abs() < 0.001);
    }

    #[test]
    fn test_hard_pan_right_silences_left() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let params = Arc::clone(track.parameters());
        let pan = params.handle_by_name("pan").unwrap();
        params.set_normalized(pan, 1.0); // domain +1.0

        filled_input(&mut track, 1.0);
        settle(&mut track, 8);

        let (left, right) = track.output_buffer().bus(0);
        assert!(left[AUDIO_CHUNK_SIZE - 1].abs() < 0.001);
        assert!((right[AUDIO_CHUNK_SIZE - 1] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_gain_parameter_scales_output() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let params = Arc::clone(track.parameters());
        let gain = params.handle_by_name("gain").unwrap();
        params.set_normalized(gain, 0.25); // domain 0.5

        filled_input(&mut track, 1.0);
        settle(&mut track, 8);

        let (left, _) = track.output_buffer().bus(0);
        assert!((left[AUDIO_CHUNK_SIZE - 1] - 0.5 * SQRT_2_OVER_2).abs() < 0.001);
    }

    #[test]
    fn test_chain_renders_in_order() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);

        // Two gains at 0.5 in series: output is input * 0.25 (before pan)
        for _ in 0..2 {
            let mut gain = Box::new(GainPlugin::new());
            gain.configure(48000.0);
            let params = Arc::clone(gain.parameters());
            let handle = params.handle_by_name("gain").unwrap();
            params.set_normalized(handle, 0.25); // domain 0.5
            track.add(gain).unwrap();
        }

        filled_input(&mut track, 1.0);
        settle(&mut track, 16);

        let (left, _) = track.output_buffer().bus(0);
        assert!((left[AUDIO_CHUNK_SIZE - 1] - 0.25 * SQRT_2_OVER_2).abs() < 0.001);
    }

    #[test]
    fn test_bypassed_processor_is_identity() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);

        let mut gain = Box::new(GainPlugin::new());
        gain.configure(48000.0);
        let params = Arc::clone(gain.parameters());
        let handle = params.handle_by_name("gain").unwrap();
        params.set_normalized(handle, 0.0); // would silence the signal
        let gain_id = gain.id();
        track.add(gain).unwrap();

        track.deliver_event(
            gain_id,
            RtEvent::SetBypass {
                target: gain_id,
                bypassed: true,
            },
        );

        filled_input(&mut track, 1.0);
        settle(&mut track, 8);

        let (left, _) = track.output_buffer().bus(0);
        assert!((left[AUDIO_CHUNK_SIZE - 1] - SQRT_2_OVER_2).abs() < 0.001);
    }

    #[test]
    fn test_bypassed_track_copies_input() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        track.set_bypassed(true);
        filled_input(&mut track, 0.42);
        track.render();

        assert_eq!(track.output_buffer().channel(0)[0], 0.42);
        assert_eq!(track.output_buffer().channel(1)[0], 0.42);
    }

    #[test]
    fn test_keyboard_events_buffered_and_fanned_out() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let meter = Box::new(PeakMeterPlugin::new());
        track.add(meter).unwrap();

        // A keyboard event is buffered, not delivered immediately
        track.process_event(RtEvent::Keyboard(KeyboardRtEvent {
            kind: KeyboardEventKind::NoteOn,
            target: track.id(),
            offset: 0,
            channel: 0,
            note: 60,
            value: 0.8,
        }));
        assert_eq!(track.kb_event_buffer.len(), 1);

        track.render();
        assert!(track.kb_event_buffer.is_empty());
    }

    #[test]
    fn test_chain_events_land_in_internal_buffer() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let mut meter = Box::new(PeakMeterPlugin::new());
        meter.configure(48000.0);
        let refresh_blocks = 48000 / AUDIO_CHUNK_SIZE / 25 + 1;
        track.add(meter).unwrap();

        filled_input(&mut track, 0.5);
        for _ in 0..refresh_blocks {
            track.render();
        }

        let mut saw_notification = false;
        while let Some(event) = track.output_event_buffer().pop() {
            if matches!(event, RtEvent::ParameterChange { .. }) {
                saw_notification = true;
            }
        }
        assert!(saw_notification);
    }

    #[test]
    fn test_track_as_processor() {
        let mut track = Track::new_stereo("t").unwrap();
        track.configure(48000.0);
        let mut input = ChunkSampleBuffer::new(2);
        let mut output = ChunkSampleBuffer::new(2);
        input.channel_mut(0).fill(1.0);
        input.channel_mut(1).fill(1.0);

        for _ in 0..8 {
            track.process_audio(&input, &mut output);
        }
        assert!((output.channel(0)[AUDIO_CHUNK_SIZE - 1] - SQRT_2_OVER_2).abs() < 0.001);
    }
}
