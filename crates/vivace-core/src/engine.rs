//! The block render engine.
//!
//! One audio callback per block: drain the input RT fifo, route input audio
//! to per-track buffers, render tracks in insertion order, sum track
//! outputs, and flush events produced during the block onto the output RT
//! fifo. Graph mutations arrive as RT events carrying pre-built nodes and
//! are spliced in between blocks — the callback itself never allocates,
//! locks, or blocks.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::buffer::ChunkSampleBuffer;
use crate::fifo::RtEventFifo;
use crate::processor::{next_object_id, ObjectId, Processor};
use crate::rt_event::{RtBlob, RtEvent};
use crate::timing::PerformanceTimer;
use crate::track::Track;
use crate::transport::Transport;
use crate::{AUDIO_CHUNK_SIZE, MAX_ENGINE_CHANNELS, MAX_TRACKS};

/// Engine run state. Transitions happen between blocks only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
}

impl EngineState {
    fn to_i32(self) -> i32 {
        match self {
            EngineState::Stopped => 0,
            EngineState::Running => 1,
        }
    }

    fn from_i32(value: i32) -> Self {
        if value == 1 {
            EngineState::Running
        } else {
            EngineState::Stopped
        }
    }
}

/// Shared cell through which controllers request and observe the engine
/// state. Controllers store a request; the audio thread swaps it out and
/// publishes the applied state at the next block boundary. −1 means no
/// request pending. Cache-line aligned so state polls stay off other lines.
#[derive(Debug)]
#[repr(align(64))]
pub struct EngineStateCell {
    request: AtomicI32,
    actual: AtomicI32,
}

impl EngineStateCell {
    fn new(initial: EngineState) -> Self {
        Self {
            request: AtomicI32::new(-1),
            actual: AtomicI32::new(initial.to_i32()),
        }
    }

    pub fn request(&self, state: EngineState) {
        self.request.store(state.to_i32(), Ordering::Release);
    }

    pub fn actual(&self) -> EngineState {
        EngineState::from_i32(self.actual.load(Ordering::Acquire))
    }

    fn take_request(&self) -> Option<EngineState> {
        let raw = self.request.swap(-1, Ordering::AcqRel);
        if raw < 0 {
            None
        } else {
            Some(EngineState::from_i32(raw))
        }
    }
}

/// One engine-channel ↔ track-channel patch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConnection {
    pub engine_channel: usize,
    pub track: ObjectId,
    pub track_channel: usize,
}

/// The committed I/O routing of the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineRouting {
    pub inputs: Vec<AudioConnection>,
    pub outputs: Vec<AudioConnection>,
}

/// Mutable routing table with RCU snapshot publication. Mutations are
/// serialized on the dispatcher thread; the audio thread loads the snapshot
/// once per block.
pub struct EngineRoutingTable {
    table: Mutex<EngineRouting>,
    snapshot: ArcSwap<EngineRouting>,
}

impl EngineRoutingTable {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(EngineRouting::default()),
            snapshot: ArcSwap::from_pointee(EngineRouting::default()),
        }
    }

    #[inline]
    pub fn load(&self) -> arc_swap::Guard<Arc<EngineRouting>> {
        self.snapshot.load()
    }

    fn commit(&self, table: &EngineRouting) {
        self.snapshot.store(Arc::new(table.clone()));
    }

    pub fn connect_input(
        &self,
        engine_channel: usize,
        track: ObjectId,
        track_channel: usize,
    ) -> crate::Result<()> {
        if engine_channel >= MAX_ENGINE_CHANNELS {
            return Err(crate::Error::InvalidChannelCount(engine_channel));
        }
        let mut table = self.table.lock();
        let connection = AudioConnection {
            engine_channel,
            track,
            track_channel,
        };
        if table.inputs.contains(&connection) {
            return Err(crate::Error::InvalidArgument(
                "input connection already exists".to_owned(),
            ));
        }
        table.inputs.push(connection);
        self.commit(&table);
        Ok(())
    }

    pub fn connect_output(
        &self,
        engine_channel: usize,
        track: ObjectId,
        track_channel: usize,
    ) -> crate::Result<()> {
        if engine_channel >= MAX_ENGINE_CHANNELS {
            return Err(crate::Error::InvalidChannelCount(engine_channel));
        }
        let mut table = self.table.lock();
        let connection = AudioConnection {
            engine_channel,
            track,
            track_channel,
        };
        if table.outputs.contains(&connection) {
            return Err(crate::Error::InvalidArgument(
                "output connection already exists".to_owned(),
            ));
        }
        table.outputs.push(connection);
        self.commit(&table);
        Ok(())
    }

    /// Drop every connection referencing a track. Called when the track is
    /// removed so stale patch points degrade to silence, not dangling reads.
    pub fn disconnect_track(&self, track: ObjectId) {
        let mut table = self.table.lock();
        table.inputs.retain(|c| c.track != track);
        table.outputs.retain(|c| c.track != track);
        self.commit(&table);
    }
}

impl Default for EngineRoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

pub struct AudioEngine {
    id: ObjectId,
    state: EngineState,
    state_cell: Arc<EngineStateCell>,
    tracks: Vec<Box<Track>>,
    transport: Arc<Transport>,
    input_fifo: Arc<RtEventFifo>,
    output_fifo: Arc<RtEventFifo>,
    routing: Arc<EngineRoutingTable>,
    timer: Arc<PerformanceTimer>,
    /// Events dropped because the output fifo was full (drop-newest).
    output_drops: Arc<AtomicU64>,
    /// Events addressed to targets no longer in the graph.
    unroutable_events: Arc<AtomicU64>,
    sample_count: u64,
}

impl AudioEngine {
    pub fn new(
        transport: Arc<Transport>,
        input_fifo: Arc<RtEventFifo>,
        output_fifo: Arc<RtEventFifo>,
        routing: Arc<EngineRoutingTable>,
        timer: Arc<PerformanceTimer>,
    ) -> Self {
        Self {
            id: next_object_id(),
            state: EngineState::Running,
            state_cell: Arc::new(EngineStateCell::new(EngineState::Running)),
            tracks: Vec::with_capacity(MAX_TRACKS),
            transport,
            input_fifo,
            output_fifo,
            routing,
            timer,
            output_drops: Arc::new(AtomicU64::new(0)),
            unroutable_events: Arc::new(AtomicU64::new(0)),
            sample_count: 0,
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn state_cell(&self) -> Arc<EngineStateCell> {
        Arc::clone(&self.state_cell)
    }

    pub fn output_drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.output_drops)
    }

    pub fn unroutable_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.unroutable_events)
    }

    #[inline]
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn processed_sample_count(&self) -> u64 {
        self.sample_count
    }

    /// The audio callback. Called exactly once per block on the audio
    /// thread by the audio frontend.
    pub fn process_chunk(
        &mut self,
        input: &ChunkSampleBuffer,
        output: &mut ChunkSampleBuffer,
        _timestamp: Duration,
    ) {
        let timing_start = self.timer.start_timer();

        // State transitions and graph mutations commit at block boundaries
        if let Some(requested) = self.state_cell.take_request() {
            self.state = requested;
            self.state_cell
                .actual
                .store(requested.to_i32(), Ordering::Release);
        }

        // FIFOs are drained even when stopped so the dispatcher keeps moving
        while let Some(event) = self.input_fifo.pop() {
            self.dispatch_rt_event(event);
        }

        output.clear();

        if self.state == EngineState::Running {
            self.route_inputs(input);
            for track in &mut self.tracks {
                track.render();
            }
            self.route_outputs(output);
        }

        self.forward_track_events();

        if let Some(start) = timing_start {
            self.timer.stop_timer(start, self.id);
        }
        self.sample_count += AUDIO_CHUNK_SIZE as u64;
    }

    fn dispatch_rt_event(&mut self, event: RtEvent) {
        match event {
            RtEvent::Tempo { tempo, .. } => self.transport.set_tempo(tempo),
            RtEvent::TimeSignature { signature, .. } => {
                self.transport.set_time_signature(signature)
            }
            RtEvent::PlayingMode { mode, .. } => self.transport.set_playing_mode(mode),

            RtEvent::AddTrack { mut track } => {
                if self.tracks.len() < MAX_TRACKS {
                    track.set_event_output_internal();
                    self.tracks.push(track);
                } else {
                    self.push_output(RtEvent::TrackReturned { track });
                }
            }
            RtEvent::RemoveTrack { track: id } => {
                match self.tracks.iter().position(|t| t.id() == id) {
                    Some(position) => {
                        let track = self.tracks.remove(position);
                        self.push_output(RtEvent::TrackReturned { track });
                    }
                    None => {
                        self.unroutable_events.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            RtEvent::AddProcessor { track, processor } => {
                match self.tracks.iter_mut().find(|t| t.id() == track) {
                    Some(target) => {
                        if let Err(rejected) = target.add(processor) {
                            self.push_output(RtEvent::ProcessorReturned {
                                processor: rejected,
                            });
                        }
                    }
                    None => {
                        self.push_output(RtEvent::ProcessorReturned { processor });
                    }
                }
            }
            RtEvent::RemoveProcessor { track, processor } => {
                let removed = self
                    .tracks
                    .iter_mut()
                    .find(|t| t.id() == track)
                    .and_then(|t| t.remove(processor));
                match removed {
                    Some(processor) => {
                        self.push_output(RtEvent::ProcessorReturned { processor })
                    }
                    None => {
                        self.unroutable_events.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            event => self.deliver_targeted(event),
        }
    }

    fn deliver_targeted(&mut self, event: RtEvent) {
        let Some(target) = event.target() else {
            self.unroutable_events.fetch_add(1, Ordering::Relaxed);
            return;
        };

        if let Some(track) = self.tracks.iter_mut().find(|t| t.id() == target) {
            track.process_event(event);
            return;
        }

        if let Some(track) = self
            .tracks
            .iter_mut()
            .find(|t| t.contains_processor(target))
        {
            track.deliver_event(target, event);
            return;
        }

        self.unroutable_events.fetch_add(1, Ordering::Relaxed);
        // Heap payloads of unroutable events must still leave the audio
        // thread alive
        match event {
            RtEvent::StringPropertyChange { value, .. } => self.push_output(RtEvent::BlobReturned {
                blob: RtBlob::Str(value),
            }),
            RtEvent::DataPropertyChange { value, .. } => self.push_output(RtEvent::BlobReturned {
                blob: RtBlob::Data(value),
            }),
            _ => {}
        }
    }

    fn route_inputs(&mut self, input: &ChunkSampleBuffer) {
        for track in &mut self.tracks {
            track.input_buffer_mut().clear();
        }
        let routing = self.routing.load();
        for connection in &routing.inputs {
            if connection.engine_channel >= input.channel_count() {
                continue;
            }
            if let Some(track) = self
                .tracks
                .iter_mut()
                .find(|t| t.id() == connection.track)
            {
                let buffer = track.input_buffer_mut();
                if connection.track_channel < buffer.channel_count() {
                    buffer
                        .channel_mut(connection.track_channel)
                        .copy_from_slice(input.channel(connection.engine_channel));
                }
            }
        }
    }

    fn route_outputs(&mut self, output: &mut ChunkSampleBuffer) {
        let routing = self.routing.load();
        for connection in &routing.outputs {
            if connection.engine_channel >= output.channel_count() {
                continue;
            }
            if let Some(track) = self.tracks.iter().find(|t| t.id() == connection.track) {
                let buffer = track.output_buffer();
                if connection.track_channel < buffer.channel_count() {
                    output.add_channel_from(
                        connection.engine_channel,
                        buffer,
                        connection.track_channel,
                    );
                }
            }
        }
    }

    /// Merge per-track event buffers onto the output fifo in track order.
    fn forward_track_events(&mut self) {
        for track in &self.tracks {
            while let Some(event) = track.output_event_buffer().pop() {
                if self.output_fifo.push(event).is_err() {
                    self.output_drops.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn push_output(&self, event: RtEvent) {
        if self.output_fifo.push(event).is_err() {
            self.output_drops.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("state", &self.state)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}
