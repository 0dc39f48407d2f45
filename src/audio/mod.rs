//! Audio capture and analysis module

mod backend;
mod capture;
mod fft;
mod keep_alive;
mod level;
mod processing;
mod ring;

#[cfg(target_os = "windows")]
mod platform;

pub use backend::{CapturePacket, LoopbackSource, SilenceSink, StreamFormat};
pub use capture::{period_length_for, AudioCapture, CaptureError, UpdateStatus};
pub use fft::{BucketMap, SpectralAnalyzer};
pub use keep_alive::SilenceKeepAlive;
pub use level::LevelMeter;
pub use processing::{AudioProcessing, ProcessingArena};
pub use ring::{Channel, CircularAudioBuffer};

#[cfg(target_os = "windows")]
pub use platform::windows::{open_default, open_default_endpoint, WasapiLoopback, WasapiSilence};

use serde::{Deserialize, Serialize};

/// Number of perceptual display bands the spectrum is folded into
pub const FREQUENCY_BUCKETS: usize = 16;

/// Samples in the smallest allowed processing period
pub const MIN_PERIOD_LENGTH: usize = 1024;

/// Interleaved floats per sample in the audio texture (left, right, |FFT left|, |FFT right|)
pub const TEXTURE_STRIDE: usize = 4;

/// Audio processing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Minimum number of analysis updates per second, in Hz
    pub required_frequency: u32,

    /// Highest frequency that is folded into the display buckets, in Hz
    pub max_bucket_frequency: f32,

    /// dB value every level and bucket is clamped to from below
    pub noise_floor_db: f32,

    /// EMA base, raised to `bin_width / smoothing_reference_frequency`
    pub smoothing_rate: f32,

    /// Bin width at which `smoothing_rate` applies unscaled, in Hz
    pub smoothing_reference_frequency: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            required_frequency: 50,
            max_bucket_frequency: 20_000.0,
            noise_floor_db: -120.0,
            smoothing_rate: 0.17,
            smoothing_reference_frequency: 50.0,
        }
    }
}

impl AudioConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| CaptureError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.required_frequency == 0 {
            return Err(CaptureError::InvalidConfig(
                "required_frequency must be at least 1 Hz".to_string(),
            ));
        }
        if !(self.max_bucket_frequency > 0.0) {
            return Err(CaptureError::InvalidConfig(format!(
                "max_bucket_frequency must be positive, got {}",
                self.max_bucket_frequency
            )));
        }
        if !(self.noise_floor_db < 0.0) {
            return Err(CaptureError::InvalidConfig(format!(
                "noise_floor_db must be negative, got {}",
                self.noise_floor_db
            )));
        }
        if !(self.smoothing_rate > 0.0 && self.smoothing_rate < 1.0) {
            return Err(CaptureError::InvalidConfig(format!(
                "smoothing_rate must be in (0, 1), got {}",
                self.smoothing_rate
            )));
        }
        if !(self.smoothing_reference_frequency > 0.0) {
            return Err(CaptureError::InvalidConfig(format!(
                "smoothing_reference_frequency must be positive, got {}",
                self.smoothing_reference_frequency
            )));
        }
        Ok(())
    }

    /// EMA coefficient for a given FFT bin width; the effective time constant
    /// stays the same whatever sample rate and period length were negotiated.
    pub fn smoothing_for(&self, min_bin_frequency: f32) -> f32 {
        self.smoothing_rate
            .powf(min_bin_frequency / self.smoothing_reference_frequency)
    }
}
