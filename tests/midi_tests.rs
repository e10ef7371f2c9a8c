//! MIDI integration tests: CC → parameter mapping, note routing, and the
//! outgoing notification path, end to end through the MIDI dispatcher.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::{rig, unit_input};
use parking_lot::Mutex;
use vivace::prelude::*;
use vivace::MidiReceiver;

#[test]
fn test_cc_to_parameter_absolute() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let gain = rig.add_processor("vivace.gain", "gain_0", track);
    let param = rig.parameter_id(gain, "gain");

    assert_eq!(
        rig.controller
            .connect_cc_to_parameter(gain, param, 0, 0, 10, 0.0, 1.0, false),
        ControlStatus::Ok
    );
    rig.tick();

    // CC value 127 maps to the top of the range by the next block boundary
    rig.vivace
        .midi_dispatcher()
        .send_midi(0, [0xB0, 10, 127], Duration::ZERO);
    rig.settle(1);
    assert_eq!(rig.controller.parameter_value(gain, param), Some(1.0));

    // CC value 64 lands near mid-range
    rig.vivace
        .midi_dispatcher()
        .send_midi(0, [0xB0, 10, 64], Duration::ZERO);
    rig.settle(1);
    let value = rig.controller.parameter_value(gain, param).unwrap();
    assert!((value - 0.504).abs() < 0.01);
}

#[test]
fn test_cc_connection_round_trip_values() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let gain = rig.add_processor("vivace.gain", "gain_0", track);
    let param = rig.parameter_id(gain, "gain");

    rig.controller
        .connect_cc_to_parameter(gain, param, 2, 0, 7, 0.0, 1.0, false);
    rig.tick();

    for (cc_value, expected) in [(0u8, 0.0f32), (127, 1.0)] {
        rig.vivace
            .midi_dispatcher()
            .send_midi(0, [0xB2, 7, cc_value], Duration::ZERO);
        rig.settle(1);
        let value = rig.controller.parameter_value(gain, param).unwrap();
        assert!(
            (value - expected).abs() < 0.001,
            "cc {} expected {}, got {}",
            cc_value,
            expected,
            value
        );
    }
}

#[test]
fn test_note_routed_to_single_track() {
    let mut rig = rig();
    let first = rig.add_stereo_track("first");
    let second = rig.add_stereo_track("second");
    let first_recorder = rig.add_processor("test.recorder", "rec_1", first);
    let second_recorder = rig.add_processor("test.recorder", "rec_2", second);

    // Channel ALL on port 0 feeds only the first track
    assert_eq!(
        rig.controller
            .connect_kbd_input_to_track(first, MIDI_CHANNEL_OMNI, 0, false),
        ControlStatus::Ok
    );
    rig.tick();

    rig.vivace
        .midi_dispatcher()
        .send_midi(0, [0x93, 60, 100], Duration::ZERO);
    rig.settle(1);

    let notes = rig.notes.lock().clone();
    assert_eq!(notes, vec![(first_recorder, 60)]);
    let _ = second_recorder;
}

#[test]
fn test_controller_note_injection() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let recorder = rig.add_processor("test.recorder", "rec", track);

    assert_eq!(
        rig.controller.send_note_on(track, 0, 72, 0.8),
        ControlStatus::Ok
    );
    rig.settle(1);

    assert_eq!(rig.notes.lock().clone(), vec![(recorder, 72)]);

    // Out-of-range arguments are rejected synchronously
    assert_eq!(
        rig.controller.send_note_on(track, 16, 72, 0.8),
        ControlStatus::OutOfRange
    );
    assert_eq!(
        rig.controller.send_note_on(9999, 0, 72, 0.8),
        ControlStatus::NotFound
    );
}

#[test]
fn test_connection_listing_and_disconnect() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let gain = rig.add_processor("vivace.gain", "gain_0", track);
    let param = rig.parameter_id(gain, "gain");

    rig.controller
        .connect_kbd_input_to_track(track, MIDI_CHANNEL_OMNI, 0, false);
    rig.controller
        .connect_cc_to_parameter(gain, param, 0, 0, 7, 0.0, 1.0, false);
    rig.controller.connect_pc_to_processor(gain, 0, 0);
    rig.tick();

    assert_eq!(rig.controller.kbd_input_connections().len(), 1);
    assert_eq!(rig.controller.cc_input_connections().len(), 1);
    assert_eq!(rig.controller.pc_input_connections().len(), 1);

    rig.controller.disconnect_cc(gain, 0, 0, 7);
    rig.controller.disconnect_pc(gain, 0, 0);
    rig.tick();

    assert!(rig.controller.cc_input_connections().is_empty());
    assert!(rig.controller.pc_input_connections().is_empty());
}

#[test]
fn test_invalid_connection_arguments() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");

    assert_eq!(
        rig.controller.connect_kbd_input_to_track(track, 17, 0, false),
        ControlStatus::OutOfRange
    );
    assert_eq!(
        rig.controller
            .connect_kbd_input_to_track(9999, MIDI_CHANNEL_OMNI, 0, false),
        ControlStatus::NotFound
    );
    assert_eq!(
        rig.controller.connect_pc_to_processor(9999, 0, 0),
        ControlStatus::NotFound
    );
}

#[test]
fn test_deleted_processor_connections_swept() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let gain = rig.add_processor("vivace.gain", "gain_0", track);
    let param = rig.parameter_id(gain, "gain");

    rig.controller
        .connect_cc_to_parameter(gain, param, 0, 0, 7, 0.0, 1.0, false);
    rig.tick();
    assert_eq!(rig.controller.cc_input_connections().len(), 1);

    rig.controller.delete_processor(track, gain);
    rig.settle(2);
    assert!(rig.controller.cc_input_connections().is_empty());
}

struct RecordingReceiver(Mutex<Vec<(usize, [u8; 3])>>);

impl MidiReceiver for RecordingReceiver {
    fn receive(&self, port: usize, data: [u8; 3], _timestamp: Duration) {
        self.0.lock().push((port, data));
    }
}

#[test]
fn test_outgoing_parameter_feedback_end_to_end() {
    let mut rig = rig();
    let track = rig.add_stereo_track("main");
    let meter = rig.add_processor("vivace.peak_meter", "meter", track);
    let level = rig.parameter_id(meter, "level_left");

    let receiver = Arc::new(RecordingReceiver(Mutex::new(Vec::new())));
    rig.vivace.midi_dispatcher().set_output_frontend(receiver.clone());

    // Map the meter level to CC 20 so a motorized fader would follow it
    rig.controller
        .connect_cc_to_parameter(meter, level, 0, 0, 20, 0.0, 1.0, false);
    rig.tick();

    // Drive enough loud blocks for one meter refresh plus the notification
    // round trip through the output fifo
    let input = unit_input();
    for _ in 0..64 {
        rig.tick();
        rig.process_block(&input);
    }
    rig.tick();

    let sent = receiver.0.lock();
    assert!(
        sent.iter()
            .any(|(_, bytes)| bytes[0] == 0xB0 && bytes[1] == 20 && bytes[2] > 0),
        "expected CC feedback, got {:?}",
        *sent
    );
}
