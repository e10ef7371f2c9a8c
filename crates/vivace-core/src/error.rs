//! Error types for vivace-core.

use thiserror::Error;

/// Error type for vivace-core operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Parameter name already registered: {0}")]
    DuplicateParameterName(String),

    #[error("Unknown parameter: {0}")]
    UnknownParameter(u32),

    #[error("Processor name already registered: {0}")]
    DuplicateProcessorName(String),

    #[error("Unknown processor: {0}")]
    UnknownProcessor(u32),

    #[error("Unknown track: {0}")]
    UnknownTrack(u32),

    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    #[error("Track processor chain is full")]
    ChainFull,

    #[error("Engine track list is full")]
    EngineFull,

    #[error("RT event queue is full")]
    QueueFull,

    #[error("Dispatcher is not running")]
    DispatcherStopped,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
