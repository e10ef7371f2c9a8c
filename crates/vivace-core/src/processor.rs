//! The uniform contract every audio node obeys.
//!
//! A [`Processor`] is anything that can sit in a track's chain: an internal
//! plugin, a hosted plugin behind a loader adapter, or a [`Track`] itself.
//! Implementors embed a [`ProcessorData`] for the common state (identity,
//! channel configuration, bypass, frozen parameter store, event output) and
//! get the event-handling defaults for free.
//!
//! [`Track`]: crate::track::Track

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::buffer::ChunkSampleBuffer;
use crate::fifo::RtEventFifo;
use crate::parameter::{ParamHandle, ParameterStore};
use crate::rt_event::{RtBlob, RtEvent};

/// Monotonically assigned process-wide identifier for processors, tracks,
/// and parameters. Never reused.
pub type ObjectId = u32;

/// Reserved "none" id.
pub const NO_OBJECT: ObjectId = 0;

static NEXT_OBJECT_ID: AtomicU32 = AtomicU32::new(1);

/// Draw a fresh id. Must not be called before process start-up is complete
/// if ids are to stay dense, but correctness only needs uniqueness.
pub fn next_object_id() -> ObjectId {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Common state shared by all processor implementations.
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    label: String,
    input_channels: usize,
    output_channels: usize,
    max_input_channels: usize,
    max_output_channels: usize,
    enabled: bool,
    bypassed: bool,
    sample_rate: f32,
    parameters: Arc<ParameterStore>,
    event_output: Option<Arc<RtEventFifo>>,
}

impl ProcessorData {
    pub fn new(
        name: &str,
        label: &str,
        parameters: ParameterStore,
        max_input_channels: usize,
        max_output_channels: usize,
    ) -> Self {
        Self {
            id: next_object_id(),
            name: name.to_owned(),
            label: label.to_owned(),
            input_channels: max_input_channels,
            output_channels: max_output_channels,
            max_input_channels,
            max_output_channels,
            enabled: true,
            bypassed: false,
            sample_rate: 48000.0,
            parameters: Arc::new(parameters),
            event_output: None,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_owned();
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    #[inline]
    pub fn max_input_channels(&self) -> usize {
        self.max_input_channels
    }

    #[inline]
    pub fn max_output_channels(&self) -> usize {
        self.max_output_channels
    }

    pub fn set_input_channels(&mut self, channels: usize) -> bool {
        if channels > self.max_input_channels {
            return false;
        }
        self.input_channels = channels;
        true
    }

    pub fn set_output_channels(&mut self, channels: usize) -> bool {
        if channels > self.max_output_channels {
            return false;
        }
        self.output_channels = channels;
        true
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn is_bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    #[inline]
    pub fn parameters(&self) -> &Arc<ParameterStore> {
        &self.parameters
    }

    /// Direct events produced by this processor into the given fifo.
    pub fn set_event_output(&mut self, output: Arc<RtEventFifo>) {
        self.event_output = Some(output);
    }

    pub fn clear_event_output(&mut self) {
        self.event_output = None;
    }

    /// Emit an event through the configured output. Dropped silently when no
    /// output is set or the fifo is full (drop-newest policy).
    #[inline]
    pub fn output_event(&self, event: RtEvent) -> bool {
        match &self.event_output {
            Some(fifo) => fifo.push(event).is_ok(),
            None => false,
        }
    }

    /// Update a parameter from inside the processor and notify the host
    /// through the event output.
    #[inline]
    pub fn set_parameter_and_notify(&self, handle: ParamHandle, normalized: f32) {
        self.parameters.set_normalized(handle, normalized);
        if let Some(descriptor) = self.parameters.descriptor(handle) {
            self.output_event(RtEvent::ParameterChange {
                target: self.id,
                offset: 0,
                parameter: descriptor.id,
                value: normalized,
            });
        }
    }
}

impl std::fmt::Debug for ProcessorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorData")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("channels", &(self.input_channels, self.output_channels))
            .field("enabled", &self.enabled)
            .field("bypassed", &self.bypassed)
            .finish()
    }
}

/// An audio node: internal plugin, hosted plugin, or track.
///
/// `process_audio` is called exactly once per block on the audio thread,
/// only while the processor is enabled. It must not allocate, lock, or
/// block. `process_event` is called on the audio thread before
/// `process_audio` for every RT event addressed to this processor.
pub trait Processor: Send {
    fn data(&self) -> &ProcessorData;

    fn data_mut(&mut self) -> &mut ProcessorData;

    /// Render one block. When bypassed the caller skips this and treats the
    /// node as identity.
    fn process_audio(&mut self, input: &ChunkSampleBuffer, output: &mut ChunkSampleBuffer);

    /// Non-RT reconfiguration before the processor joins the graph.
    fn configure(&mut self, sample_rate: f32) {
        self.data_mut().set_sample_rate(sample_rate);
    }

    /// Handle one RT event addressed to this processor. The default covers
    /// parameter and property changes and bypass; unknown kinds are ignored.
    fn process_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::ParameterChange {
                parameter, value, ..
            } => {
                let data = self.data();
                if let Some(handle) = data.parameters().handle_by_id(parameter) {
                    data.parameters().set_normalized(handle, value);
                }
            }
            RtEvent::StringPropertyChange {
                property, value, ..
            } => {
                let data = self.data();
                if let Some(handle) = data.parameters().handle_by_id(property) {
                    if let Some(old) = data.parameters().set_string(handle, value) {
                        // Old blob must not be dropped here
                        data.output_event(RtEvent::BlobReturned {
                            blob: RtBlob::Str(old),
                        });
                    }
                }
            }
            RtEvent::DataPropertyChange {
                property, value, ..
            } => {
                let data = self.data();
                if let Some(handle) = data.parameters().handle_by_id(property) {
                    if let Some(old) = data.parameters().set_data(handle, value) {
                        data.output_event(RtEvent::BlobReturned {
                            blob: RtBlob::Data(old),
                        });
                    }
                }
            }
            RtEvent::SetBypass { bypassed, .. } => {
                self.data_mut().set_bypassed(bypassed);
            }
            _ => {}
        }
    }

    fn id(&self) -> ObjectId {
        self.data().id()
    }

    fn name(&self) -> &str {
        self.data().name()
    }

    fn label(&self) -> &str {
        self.data().label()
    }

    fn input_channels(&self) -> usize {
        self.data().input_channels()
    }

    fn output_channels(&self) -> usize {
        self.data().output_channels()
    }

    /// Returns false when the requested count exceeds the node's maximum.
    /// Only invoked during dispatcher-serialized reconfiguration.
    fn set_input_channels(&mut self, channels: usize) -> bool {
        self.data_mut().set_input_channels(channels)
    }

    fn set_output_channels(&mut self, channels: usize) -> bool {
        self.data_mut().set_output_channels(channels)
    }

    fn is_enabled(&self) -> bool {
        self.data().is_enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.data_mut().set_enabled(enabled);
    }

    fn is_bypassed(&self) -> bool {
        self.data().is_bypassed()
    }

    fn set_bypassed(&mut self, bypassed: bool) {
        self.data_mut().set_bypassed(bypassed);
    }

    fn set_event_output(&mut self, output: Arc<RtEventFifo>) {
        self.data_mut().set_event_output(output);
    }

    fn parameters(&self) -> &Arc<ParameterStore> {
        self.data().parameters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::{ParameterScale, ParameterStoreBuilder};

    struct NullProcessor {
        data: ProcessorData,
    }

    impl NullProcessor {
        fn new() -> Self {
            let mut params = ParameterStoreBuilder::new();
            params
                .register_float_parameter("mix", "Mix", "", 0.5, 0.0, 1.0, ParameterScale::Linear)
                .unwrap();
            Self {
                data: ProcessorData::new("null", "Null", params.build(), 2, 2),
            }
        }
    }

    impl Processor for NullProcessor {
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

    #[test]
    fn test_ids_unique_and_nonzero() {
        let a = NullProcessor::new();
        let b = NullProcessor::new();
        assert_ne!(a.id(), NO_OBJECT);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_channel_limits() {
        let mut p = NullProcessor::new();
        assert!(p.set_input_channels(1));
        assert_eq!(p.input_channels(), 1);
        assert!(!p.set_input_channels(3));
        assert_eq!(p.input_channels(), 1);
    }

    #[test]
    fn test_default_parameter_change_event() {
        let mut p = NullProcessor::new();
        let store = Arc::clone(p.parameters());
        let handle = store.handle_by_name("mix").unwrap();
        let id = store.descriptor(handle).unwrap().id;

        p.process_event(RtEvent::ParameterChange {
            target: p.id(),
            offset: 0,
            parameter: id,
            value: 1.0,
        });
        assert_eq!(store.value(handle), 1.0);
    }

    #[test]
    fn test_unknown_event_ignored() {
        let mut p = NullProcessor::new();
        p.process_event(RtEvent::Tempo {
            offset: 0,
            tempo: 120.0,
        });
        // No panic, nothing changed
        assert!(!p.is_bypassed());
    }

    #[test]
    fn test_set_bypass_event() {
        let mut p = NullProcessor::new();
        p.process_event(RtEvent::SetBypass {
            target: p.id(),
            bypassed: true,
        });
        assert!(p.is_bypassed());
    }

    #[test]
    fn test_set_parameter_and_notify() {
        let mut p = NullProcessor::new();
        let fifo = Arc::new(RtEventFifo::with_capacity(16));
        p.data_mut().set_event_output(Arc::clone(&fifo));
        let handle = p.parameters().handle_by_name("mix").unwrap();
        p.data().set_parameter_and_notify(handle, 0.25);

        assert_eq!(p.parameters().value(handle), 0.25);
        match fifo.pop() {
            Some(RtEvent::ParameterChange { target, value, .. }) => {
                assert_eq!(target, p.id());
                assert_eq!(value, 0.25);
            }
            other => panic!("expected parameter change, got {:?}", other),
        }
    }
}
