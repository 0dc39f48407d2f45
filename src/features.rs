//! Per-frame feature block shared with the render layer

use crate::audio::FREQUENCY_BUCKETS;
use bytemuck::{Pod, Zeroable};

/// Column of `frequency_buckets` holding the bucket's lowest bin frequency
pub const BUCKET_MIN_FREQUENCY: usize = 2;

/// Column of `frequency_buckets` holding the bucket's highest bin frequency
pub const BUCKET_MAX_FREQUENCY: usize = 3;

/// Constant-buffer layout uploaded to the GPU once per frame.
///
/// The caller owns one of these and passes it to every update; the audio
/// core rewrites the sound fields in place. The timing and transition fields
/// belong to the renderer and are never touched here.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    pub time: f32,
    pub delta_time: f32,
    pub transition_in: f32,
    pub transition_out: f32,

    /// Per bucket: smoothed dB for channel 0 and 1, then min and max frequency
    pub frequency_buckets: [[f32; 4]; FREQUENCY_BUCKETS],

    /// Smoothed linear RMS per channel
    pub rms: [f32; 2],

    /// Smoothed RMS in dB SPL per channel
    pub rms_db_spl: [f32; 2],

    pub sample_rate: f32,

    /// Samples per channel in the audio texture
    pub samples_per_period: f32,

    pub noise_floor_db_spl: f32,

    pub padding: f32,
}

impl Default for FrameConstants {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl FrameConstants {
    /// Smoothed dB of `bucket` on `channel` (0 or 1)
    pub fn bucket_db(&self, bucket: usize, channel: usize) -> f32 {
        self.frequency_buckets[bucket][channel]
    }

    /// Frequency range `(min, max)` covered by `bucket`
    pub fn bucket_range(&self, bucket: usize) -> (f32, f32) {
        let row = &self.frequency_buckets[bucket];
        (row[BUCKET_MIN_FREQUENCY], row[BUCKET_MAX_FREQUENCY])
    }

    /// Raw bytes for a constant-buffer upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}
