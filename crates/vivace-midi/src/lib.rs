//! MIDI dispatcher and routing matrix for the vivace engine.
//!
//! Maps `(port, channel, cc | pc | note)` to `(processor, parameter | track)`
//! and back. Incoming 3-byte channel messages become [`RtEvent`]s pushed onto
//! the engine's input fifo; outgoing keyboard and parameter notifications are
//! serialized back to the mapped `(port, channel)` of a [`MidiReceiver`].
//!
//! All table mutations are serialized on the event dispatcher thread; the
//! tables publish immutable snapshots so reads from any thread see a
//! consistent routing state.
//!
//! [`RtEvent`]: vivace_core::RtEvent

pub mod message;
pub use message::ChannelMessage;

pub mod connection;
pub use connection::{
    CcInputConnection, ConnectionSnapshot, ConnectionTables, KbdInputConnection,
    KbdOutputConnection, MidiDispatcherStatus, PcInputConnection, MIDI_CHANNEL_OMNI,
};

pub mod dispatcher;
pub use dispatcher::MidiDispatcher;

pub mod frontend;
pub use frontend::MidiReceiver;

use thiserror::Error;

/// Error type for vivace-midi operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid MIDI port: {0}")]
    InvalidPort(usize),

    #[error("invalid MIDI channel: {0}")]
    InvalidChannel(u8),

    #[error("unparseable MIDI message")]
    UnparseableMessage,
}

pub type Result<T> = std::result::Result<T, Error>;
