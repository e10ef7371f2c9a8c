//! Centralized error type for the vivace umbrella crate.
//!
//! Wraps the member-crate errors so `?` propagates naturally across crate
//! boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] vivace_core::Error),

    #[error("MIDI: {0}")]
    Midi(#[from] vivace_midi::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
