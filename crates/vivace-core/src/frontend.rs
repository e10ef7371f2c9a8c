//! Interfaces the core consumes from external collaborators.
//!
//! Audio hardware frontends, MIDI hardware, and third-party plugin format
//! adapters live outside the core; these traits are the contract they
//! satisfy.

use thiserror::Error;

use crate::processor::Processor;

/// Configuration handed to an audio frontend at init.
#[derive(Debug, Clone, Copy)]
pub struct AudioFrontendConfig {
    pub sample_rate: f32,
    pub input_channels: usize,
    pub output_channels: usize,
}

impl Default for AudioFrontendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000.0,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

/// Init/run status of an audio frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFrontendStatus {
    Ok,
    InvalidNChannels,
    InvalidInputFile,
    InvalidOutputFile,
    InvalidSequencerData,
    InvalidChunkSize,
    AudioHwError,
}

/// An audio frontend drives the engine: once running, it calls
/// `AudioEngine::process_chunk` once per block on its audio thread.
pub trait AudioFrontend {
    fn init(&mut self, config: &AudioFrontendConfig) -> AudioFrontendStatus;

    fn cleanup(&mut self);

    /// Start the callback loop. Returns when the frontend stops.
    fn run(&mut self);
}

/// Why a plugin failed to load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("plugin not found")]
    NotFound,
    #[error("plugin format not supported")]
    IncompatibleFormat,
    #[error("plugin failed to initialize: {0}")]
    InitFailed(String),
}

/// Adapts a plugin identified by uid or path to the [`Processor`] contract.
/// The engine does not know the underlying format.
pub trait PluginLoader: Send + Sync {
    fn load(
        &self,
        uid_or_path: &str,
        sample_rate: f32,
    ) -> std::result::Result<Box<dyn Processor>, PluginLoadError>;
}
