//! Interfaces between the MIDI dispatcher and hardware frontends.
//!
//! Input direction: the frontend (midir callback, virtual port, test rig)
//! hands raw bytes to [`MidiDispatcher::send_midi`] — on the event
//! dispatcher thread, usually by posting an engine-op event.
//!
//! Output direction: the dispatcher serializes notifications and hands the
//! wire bytes to a [`MidiReceiver`].
//!
//! [`MidiDispatcher::send_midi`]: crate::dispatcher::MidiDispatcher::send_midi

use std::time::Duration;

/// Output side of a MIDI frontend.
pub trait MidiReceiver: Send + Sync {
    /// Deliver a serialized 3-byte message to a hardware port.
    fn receive(&self, port: usize, data: [u8; 3], timestamp: Duration);
}
