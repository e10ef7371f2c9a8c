//! MIDI connection tables.
//!
//! The mutable [`ConnectionTables`] are owned by the [`MidiDispatcher`] and
//! mutated only on the event dispatcher thread. Every `commit()` publishes
//! an immutable [`ConnectionSnapshot`] through an `ArcSwap`; readers load
//! the snapshot pointer once per operation.
//!
//! [`MidiDispatcher`]: crate::dispatcher::MidiDispatcher

use std::sync::Arc;

use arc_swap::ArcSwap;
use smallvec::SmallVec;

use vivace_core::ObjectId;

/// Sentinel channel value meaning "any channel".
pub const MIDI_CHANNEL_OMNI: u8 = 16;

/// Outcome of a connection table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiDispatcherStatus {
    Ok,
    InvalidChannel,
    InvalidPort,
    InvalidTarget,
    AlreadyConnected,
}

/// `port/channel → track` keyboard routing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbdInputConnection {
    pub port: usize,
    /// `None` = OMNI.
    pub channel: Option<u8>,
    pub target: ObjectId,
    /// Forward the untouched 3-byte message instead of decoding.
    pub raw: bool,
}

/// `track → port/channel` keyboard output entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KbdOutputConnection {
    pub track: ObjectId,
    pub port: usize,
    pub channel: u8,
}

/// `port/channel/cc → parameter` mapping entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CcInputConnection {
    pub port: usize,
    /// `None` = OMNI.
    pub channel: Option<u8>,
    pub cc: u8,
    pub processor: ObjectId,
    pub parameter: ObjectId,
    /// CC 0 maps to this domain value.
    pub min: f32,
    /// CC 127 maps to this domain value.
    pub max: f32,
    /// Interpret CC values as two's-complement 7-bit deltas.
    pub relative: bool,
}

/// `port/channel → processor` program change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcInputConnection {
    pub port: usize,
    /// `None` = OMNI.
    pub channel: Option<u8>,
    pub processor: ObjectId,
}

#[inline]
fn channel_matches(filter: Option<u8>, channel: u8) -> bool {
    filter.is_none() || filter == Some(channel)
}

/// Validate a 0–16 channel argument into a filter. 16 is OMNI.
fn channel_filter(channel: u8) -> Option<Option<u8>> {
    match channel {
        0..=15 => Some(Some(channel)),
        MIDI_CHANNEL_OMNI => Some(None),
        _ => None,
    }
}

/// Immutable routing state loaded by readers.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    kb_in: Vec<KbdInputConnection>,
    kb_out: Vec<KbdOutputConnection>,
    cc_in: Vec<CcInputConnection>,
    pc_in: Vec<PcInputConnection>,
}

impl ConnectionSnapshot {
    /// Keyboard connections matching an incoming `(port, channel)`.
    pub fn kb_connections(
        &self,
        port: usize,
        channel: u8,
    ) -> SmallVec<[KbdInputConnection; 4]> {
        self.kb_in
            .iter()
            .filter(|c| c.port == port && channel_matches(c.channel, channel))
            .copied()
            .collect()
    }

    /// CC connections matching an incoming `(port, channel, cc)`.
    pub fn cc_connections(
        &self,
        port: usize,
        channel: u8,
        cc: u8,
    ) -> SmallVec<[CcInputConnection; 4]> {
        self.cc_in
            .iter()
            .filter(|c| c.port == port && c.cc == cc && channel_matches(c.channel, channel))
            .copied()
            .collect()
    }

    /// PC connections matching an incoming `(port, channel)`.
    pub fn pc_connections(&self, port: usize, channel: u8) -> SmallVec<[PcInputConnection; 2]> {
        self.pc_in
            .iter()
            .filter(|c| c.port == port && channel_matches(c.channel, channel))
            .copied()
            .collect()
    }

    /// Output destinations for keyboard notifications from a track.
    pub fn kb_outputs(&self, track: ObjectId) -> SmallVec<[KbdOutputConnection; 2]> {
        self.kb_out
            .iter()
            .filter(|c| c.track == track)
            .copied()
            .collect()
    }

    /// CC connections usable as controller feedback for a parameter.
    pub fn cc_feedback(
        &self,
        processor: ObjectId,
        parameter: ObjectId,
    ) -> SmallVec<[CcInputConnection; 2]> {
        self.cc_in
            .iter()
            .filter(|c| c.processor == processor && c.parameter == parameter)
            .copied()
            .collect()
    }

    pub fn all_kb_input_connections(&self) -> &[KbdInputConnection] {
        &self.kb_in
    }

    pub fn all_kb_output_connections(&self) -> &[KbdOutputConnection] {
        &self.kb_out
    }

    pub fn all_cc_input_connections(&self) -> &[CcInputConnection] {
        &self.cc_in
    }

    pub fn all_pc_input_connections(&self) -> &[PcInputConnection] {
        &self.pc_in
    }

    pub fn cc_connections_for_processor(&self, processor: ObjectId) -> Vec<CcInputConnection> {
        self.cc_in
            .iter()
            .filter(|c| c.processor == processor)
            .copied()
            .collect()
    }

    pub fn pc_connections_for_processor(&self, processor: ObjectId) -> Vec<PcInputConnection> {
        self.pc_in
            .iter()
            .filter(|c| c.processor == processor)
            .copied()
            .collect()
    }
}

/// Mutable connection tables with snapshot publication.
pub struct ConnectionTables {
    midi_inputs: usize,
    midi_outputs: usize,
    kb_in: Vec<KbdInputConnection>,
    kb_out: Vec<KbdOutputConnection>,
    cc_in: Vec<CcInputConnection>,
    pc_in: Vec<PcInputConnection>,
    snapshot: Arc<ArcSwap<ConnectionSnapshot>>,
}

impl ConnectionTables {
    pub fn new(midi_inputs: usize, midi_outputs: usize) -> Self {
        Self {
            midi_inputs,
            midi_outputs,
            kb_in: Vec::new(),
            kb_out: Vec::new(),
            cc_in: Vec::new(),
            pc_in: Vec::new(),
            snapshot: Arc::new(ArcSwap::from_pointee(ConnectionSnapshot::default())),
        }
    }

    pub fn midi_inputs(&self) -> usize {
        self.midi_inputs
    }

    pub fn midi_outputs(&self) -> usize {
        self.midi_outputs
    }

    /// Shared handle to the published snapshot.
    pub fn snapshot_arc(&self) -> Arc<ArcSwap<ConnectionSnapshot>> {
        Arc::clone(&self.snapshot)
    }

    /// Publish the current tables as a new immutable snapshot.
    pub fn commit(&self) {
        self.snapshot.store(Arc::new(ConnectionSnapshot {
            kb_in: self.kb_in.clone(),
            kb_out: self.kb_out.clone(),
            cc_in: self.cc_in.clone(),
            pc_in: self.pc_in.clone(),
        }));
    }

    pub fn connect_kb_to_track(
        &mut self,
        port: usize,
        track: ObjectId,
        channel: u8,
        raw: bool,
    ) -> MidiDispatcherStatus {
        if port >= self.midi_inputs {
            return MidiDispatcherStatus::InvalidPort;
        }
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        let connection = KbdInputConnection {
            port,
            channel: filter,
            target: track,
            raw,
        };
        if self.kb_in.contains(&connection) {
            return MidiDispatcherStatus::AlreadyConnected;
        }
        self.kb_in.push(connection);
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_kb_from_track(
        &mut self,
        port: usize,
        track: ObjectId,
        channel: u8,
        raw: bool,
    ) -> MidiDispatcherStatus {
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        let before = self.kb_in.len();
        self.kb_in.retain(|c| {
            !(c.port == port && c.target == track && c.channel == filter && c.raw == raw)
        });
        if self.kb_in.len() == before {
            return MidiDispatcherStatus::InvalidTarget;
        }
        MidiDispatcherStatus::Ok
    }

    pub fn connect_kb_output_from_track(
        &mut self,
        track: ObjectId,
        port: usize,
        channel: u8,
    ) -> MidiDispatcherStatus {
        if port >= self.midi_outputs {
            return MidiDispatcherStatus::InvalidPort;
        }
        if channel > 15 {
            return MidiDispatcherStatus::InvalidChannel;
        }
        let connection = KbdOutputConnection {
            track,
            port,
            channel,
        };
        if self.kb_out.contains(&connection) {
            return MidiDispatcherStatus::AlreadyConnected;
        }
        self.kb_out.push(connection);
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_kb_output_from_track(
        &mut self,
        track: ObjectId,
        port: usize,
        channel: u8,
    ) -> MidiDispatcherStatus {
        let before = self.kb_out.len();
        self.kb_out
            .retain(|c| !(c.track == track && c.port == port && c.channel == channel));
        if self.kb_out.len() == before {
            return MidiDispatcherStatus::InvalidTarget;
        }
        MidiDispatcherStatus::Ok
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &mut self,
        port: usize,
        channel: u8,
        cc: u8,
        processor: ObjectId,
        parameter: ObjectId,
        min: f32,
        max: f32,
        relative: bool,
    ) -> MidiDispatcherStatus {
        if port >= self.midi_inputs {
            return MidiDispatcherStatus::InvalidPort;
        }
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        if cc > 127 {
            return MidiDispatcherStatus::InvalidTarget;
        }
        let duplicate = self.cc_in.iter().any(|c| {
            c.port == port
                && c.channel == filter
                && c.cc == cc
                && c.processor == processor
                && c.parameter == parameter
        });
        if duplicate {
            return MidiDispatcherStatus::AlreadyConnected;
        }
        self.cc_in.push(CcInputConnection {
            port,
            channel: filter,
            cc,
            processor,
            parameter,
            min,
            max,
            relative,
        });
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_cc(
        &mut self,
        port: usize,
        channel: u8,
        cc: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        let before = self.cc_in.len();
        self.cc_in.retain(|c| {
            !(c.port == port && c.channel == filter && c.cc == cc && c.processor == processor)
        });
        if self.cc_in.len() == before {
            return MidiDispatcherStatus::InvalidTarget;
        }
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_all_cc_from_processor(&mut self, processor: ObjectId) {
        self.cc_in.retain(|c| c.processor != processor);
    }

    pub fn connect_pc_to_processor(
        &mut self,
        port: usize,
        channel: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        if port >= self.midi_inputs {
            return MidiDispatcherStatus::InvalidPort;
        }
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        let connection = PcInputConnection {
            port,
            channel: filter,
            processor,
        };
        if self.pc_in.contains(&connection) {
            return MidiDispatcherStatus::AlreadyConnected;
        }
        self.pc_in.push(connection);
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_pc(
        &mut self,
        port: usize,
        channel: u8,
        processor: ObjectId,
    ) -> MidiDispatcherStatus {
        let Some(filter) = channel_filter(channel) else {
            return MidiDispatcherStatus::InvalidChannel;
        };
        let before = self.pc_in.len();
        self.pc_in
            .retain(|c| !(c.port == port && c.channel == filter && c.processor == processor));
        if self.pc_in.len() == before {
            return MidiDispatcherStatus::InvalidTarget;
        }
        MidiDispatcherStatus::Ok
    }

    pub fn disconnect_all_pc_from_processor(&mut self, processor: ObjectId) {
        self.pc_in.retain(|c| c.processor != processor);
    }

    /// Remove every connection referencing a graph node. Called when the
    /// node is deleted so stale mappings degrade to no-ops.
    pub fn remove_target(&mut self, id: ObjectId) {
        self.kb_in.retain(|c| c.target != id);
        self.kb_out.retain(|c| c.track != id);
        self.cc_in.retain(|c| c.processor != id);
        self.pc_in.retain(|c| c.processor != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> ConnectionTables {
        ConnectionTables::new(2, 2)
    }

    #[test]
    fn test_kb_connect_and_route() {
        let mut tables = tables();
        assert_eq!(
            tables.connect_kb_to_track(0, 10, MIDI_CHANNEL_OMNI, false),
            MidiDispatcherStatus::Ok
        );
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        // OMNI matches every channel
        assert_eq!(snapshot.kb_connections(0, 3).len(), 1);
        assert_eq!(snapshot.kb_connections(0, 15).len(), 1);
        // Other port does not match
        assert!(snapshot.kb_connections(1, 3).is_empty());
    }

    #[test]
    fn test_kb_channel_filter() {
        let mut tables = tables();
        tables.connect_kb_to_track(0, 10, 2, false);
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        assert_eq!(snapshot.kb_connections(0, 2).len(), 1);
        assert!(snapshot.kb_connections(0, 3).is_empty());
    }

    #[test]
    fn test_invalid_port_and_channel() {
        let mut tables = tables();
        assert_eq!(
            tables.connect_kb_to_track(5, 10, 0, false),
            MidiDispatcherStatus::InvalidPort
        );
        assert_eq!(
            tables.connect_kb_to_track(0, 10, 17, false),
            MidiDispatcherStatus::InvalidChannel
        );
    }

    #[test]
    fn test_duplicate_connection_rejected() {
        let mut tables = tables();
        assert_eq!(
            tables.connect_kb_to_track(0, 10, 0, false),
            MidiDispatcherStatus::Ok
        );
        assert_eq!(
            tables.connect_kb_to_track(0, 10, 0, false),
            MidiDispatcherStatus::AlreadyConnected
        );
    }

    #[test]
    fn test_disconnect_missing_is_invalid_target() {
        let mut tables = tables();
        assert_eq!(
            tables.disconnect_kb_from_track(0, 10, 0, false),
            MidiDispatcherStatus::InvalidTarget
        );
    }

    #[test]
    fn test_cc_connection_lookup() {
        let mut tables = tables();
        assert_eq!(
            tables.connect_cc_to_parameter(0, 2, 7, 100, 200, 0.0, 1.0, false),
            MidiDispatcherStatus::Ok
        );
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        let matches = snapshot.cc_connections(0, 2, 7);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].processor, 100);
        assert_eq!(matches[0].parameter, 200);
        assert!(snapshot.cc_connections(0, 2, 8).is_empty());
        assert!(snapshot.cc_connections(0, 3, 7).is_empty());
    }

    #[test]
    fn test_cc_feedback_lookup() {
        let mut tables = tables();
        tables.connect_cc_to_parameter(0, 1, 7, 100, 200, 0.0, 1.0, false);
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        assert_eq!(snapshot.cc_feedback(100, 200).len(), 1);
        assert!(snapshot.cc_feedback(100, 201).is_empty());
    }

    #[test]
    fn test_pc_connections() {
        let mut tables = tables();
        assert_eq!(
            tables.connect_pc_to_processor(1, MIDI_CHANNEL_OMNI, 55),
            MidiDispatcherStatus::Ok
        );
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        assert_eq!(snapshot.pc_connections(1, 9).len(), 1);
        assert!(snapshot.pc_connections(0, 9).is_empty());

        assert_eq!(
            tables.disconnect_pc(1, MIDI_CHANNEL_OMNI, 55),
            MidiDispatcherStatus::Ok
        );
    }

    #[test]
    fn test_remove_target_sweeps_all_tables() {
        let mut tables = tables();
        tables.connect_kb_to_track(0, 10, 0, false);
        tables.connect_kb_output_from_track(10, 0, 0);
        tables.connect_cc_to_parameter(0, 0, 1, 10, 20, 0.0, 1.0, false);
        tables.connect_pc_to_processor(0, 0, 10);

        tables.remove_target(10);
        tables.commit();

        let snapshot = tables.snapshot_arc().load_full();
        assert!(snapshot.all_kb_input_connections().is_empty());
        assert!(snapshot.all_kb_output_connections().is_empty());
        assert!(snapshot.all_cc_input_connections().is_empty());
        assert!(snapshot.all_pc_input_connections().is_empty());
    }

    #[test]
    fn test_snapshot_isolated_until_commit() {
        let mut tables = tables();
        let snapshot_handle = tables.snapshot_arc();
        tables.connect_kb_to_track(0, 10, 0, false);

        assert!(snapshot_handle.load().all_kb_input_connections().is_empty());
        tables.commit();
        assert_eq!(snapshot_handle.load().all_kb_input_connections().len(), 1);
    }
}
