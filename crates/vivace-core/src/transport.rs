//! Global transport state: tempo, time signature, playing mode.
//!
//! Updated by RT events on the audio thread — the single writer — and read
//! wait-free from controllers. Stores are `Release`, loads `Acquire`. The
//! time signature is packed into one integer so the numerator/denominator
//! pair can never be observed half-updated.

use std::sync::atomic::{AtomicI32, Ordering};

use atomic_float::AtomicF32;

pub const DEFAULT_TEMPO: f32 = 120.0;
pub const MIN_TEMPO: f32 = 20.0;
pub const MAX_TEMPO: f32 = 999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayingMode {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl PlayingMode {
    fn to_i32(self) -> i32 {
        match self {
            PlayingMode::Stopped => 0,
            PlayingMode::Playing => 1,
            PlayingMode::Recording => 2,
        }
    }

    fn from_i32(value: i32) -> Self {
        match value {
            1 => PlayingMode::Playing,
            2 => PlayingMode::Recording,
            _ => PlayingMode::Stopped,
        }
    }
}

/// Shared transport state. Aligned to its own cache line so transport polls
/// never contend with neighboring allocations.
#[derive(Debug)]
#[repr(align(64))]
pub struct Transport {
    sample_rate: f32,
    tempo: AtomicF32,
    /// Packed `numerator << 16 | denominator`.
    time_signature: AtomicI32,
    playing_mode: AtomicI32,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        let default_signature = TimeSignature::default();
        Self {
            sample_rate,
            tempo: AtomicF32::new(DEFAULT_TEMPO),
            time_signature: AtomicI32::new(Self::pack(default_signature)),
            playing_mode: AtomicI32::new(PlayingMode::Stopped.to_i32()),
        }
    }

    fn pack(signature: TimeSignature) -> i32 {
        ((signature.numerator as i32) << 16) | (signature.denominator as i32 & 0xFFFF)
    }

    fn unpack(packed: i32) -> TimeSignature {
        TimeSignature {
            numerator: ((packed >> 16) & 0xFFFF) as u32,
            denominator: (packed & 0xFFFF) as u32,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn tempo(&self) -> f32 {
        self.tempo.load(Ordering::Acquire)
    }

    /// Audio thread only. Out-of-range values are clamped.
    #[inline]
    pub fn set_tempo(&self, bpm: f32) {
        self.tempo
            .store(bpm.clamp(MIN_TEMPO, MAX_TEMPO), Ordering::Release);
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        Self::unpack(self.time_signature.load(Ordering::Acquire))
    }

    /// Audio thread only.
    #[inline]
    pub fn set_time_signature(&self, signature: TimeSignature) {
        self.time_signature
            .store(Self::pack(signature), Ordering::Release);
    }

    #[inline]
    pub fn playing_mode(&self) -> PlayingMode {
        PlayingMode::from_i32(self.playing_mode.load(Ordering::Acquire))
    }

    /// Audio thread only.
    #[inline]
    pub fn set_playing_mode(&self, mode: PlayingMode) {
        self.playing_mode.store(mode.to_i32(), Ordering::Release);
    }
}
