//! Windowed real FFT folded into perceptual frequency buckets

use super::level::power_to_db;
use super::{
    AudioConfig, CaptureError, Channel, ProcessingArena, FREQUENCY_BUCKETS, TEXTURE_STRIDE,
};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

/// Precomputed assignment of FFT bins to display buckets
#[derive(Debug, Clone)]
pub struct BucketMap {
    /// Bucket index for bins `1..relevant_bins`, stored at `bin - 1`
    mapping: Vec<u8>,
    /// Observed `(min, max)` bin frequency per bucket; `None` if no bin maps to it
    ranges: [Option<(f32, f32)>; FREQUENCY_BUCKETS],
    relevant_bins: usize,
    min_bin_frequency: f32,
}

impl BucketMap {
    /// Build the mapping for a period of `period_length` samples at `sample_rate`.
    ///
    /// Bins are warped through a square root so low frequencies get finer
    /// bucket resolution than a linear split would give them. The DC bin is
    /// never mapped.
    pub fn new(sample_rate: u32, period_length: usize, max_frequency: f32) -> Self {
        let bin_count = period_length / 2 + 1;
        let min_bin_frequency = sample_rate as f32 / period_length as f32;

        let relevant_bins =
            ((max_frequency / min_bin_frequency).ceil() as usize + 1).min(bin_count);

        let span_bins = relevant_bins.saturating_sub(2).max(1);
        let inverse_max_frequency = 1.0 / (min_bin_frequency * span_bins as f32);
        let top_bucket = (FREQUENCY_BUCKETS - 1) as f32;

        let mut mapping = Vec::with_capacity(relevant_bins.saturating_sub(1));
        let mut ranges = [None; FREQUENCY_BUCKETS];

        for bin in 1..relevant_bins {
            let frequency = bin as f32 * min_bin_frequency;
            let warped = ((frequency - min_bin_frequency) * inverse_max_frequency).sqrt();
            let bucket = ((warped * top_bucket).round() as usize).min(FREQUENCY_BUCKETS - 1);

            mapping.push(bucket as u8);
            ranges[bucket] = Some(match ranges[bucket] {
                Some((low, high)) => (f32::min(low, frequency), f32::max(high, frequency)),
                None => (frequency, frequency),
            });
        }

        Self {
            mapping,
            ranges,
            relevant_bins,
            min_bin_frequency,
        }
    }

    /// Bucket for `bin`, or `None` for DC and bins above the ceiling
    pub fn bucket_of(&self, bin: usize) -> Option<usize> {
        if bin == 0 {
            return None;
        }
        self.mapping.get(bin - 1).map(|&b| b as usize)
    }

    /// Lowest and highest bin frequency that maps to `bucket`
    pub fn range(&self, bucket: usize) -> Option<(f32, f32)> {
        self.ranges.get(bucket).copied().flatten()
    }

    /// Number of bins, DC included, that take part in bucketing
    pub fn relevant_bins(&self) -> usize {
        self.relevant_bins
    }

    /// Width of one FFT bin in Hz
    pub fn min_bin_frequency(&self) -> f32 {
        self.min_bin_frequency
    }
}

/// Window coefficients `0.5 - 0.5 * cos(2 pi n / (N - 1))`
fn hamming_window(len: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.5;
    const BETA: f32 = 1.0 - ALPHA;

    let angle_scale = 2.0 * std::f32::consts::PI / (len - 1) as f32;
    (0..len)
        .map(|i| ALPHA - BETA * (angle_scale * i as f32).cos())
        .collect()
}

/// Spectral analysis for one period length and sample rate
pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    buckets: BucketMap,
    period_length: usize,
    smoothing: f32,
    noise_floor_db: f32,
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("period_length", &self.period_length)
            .field("relevant_bins", &self.buckets.relevant_bins())
            .field("smoothing", &self.smoothing)
            .finish()
    }
}

impl SpectralAnalyzer {
    /// Plan the FFT and precompute the window and bucket tables
    pub fn new(period_length: usize, sample_rate: u32, config: &AudioConfig) -> Self {
        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(period_length);
        let buckets = BucketMap::new(sample_rate, period_length, config.max_bucket_frequency);
        let smoothing = config.smoothing_for(buckets.min_bin_frequency());

        log::info!(
            "Spectral analyzer: {} samples, {:.2} Hz bins, {} relevant bins, smoothing {:.4}",
            period_length,
            buckets.min_bin_frequency(),
            buckets.relevant_bins(),
            smoothing
        );

        Self {
            fft,
            window: hamming_window(period_length),
            buckets,
            period_length,
            smoothing,
            noise_floor_db: config.noise_floor_db,
        }
    }

    /// Allocate the per-frame working buffers sized for this analyzer
    pub fn make_arena(&self) -> ProcessingArena {
        ProcessingArena {
            texture: vec![0.0; TEXTURE_STRIDE * self.period_length],
            input: self.fft.make_input_vec(),
            spectrum: self.fft.make_output_vec(),
            scratch: self.fft.make_scratch_vec(),
        }
    }

    /// Bins in the real FFT output, `N / 2 + 1`
    pub fn bin_count(&self) -> usize {
        self.period_length / 2 + 1
    }

    pub fn period_length(&self) -> usize {
        self.period_length
    }

    pub fn buckets(&self) -> &BucketMap {
        &self.buckets
    }

    pub fn window(&self) -> &[f32] {
        &self.window
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    /// Window one period of `channel`, transform it, write its magnitudes into
    /// the texture and blend bucket levels into `bucket_db`.
    ///
    /// `bucket_db` rows are `[db left, db right, min freq, max freq]`; only the
    /// `channel` column is touched.
    pub fn analyze(
        &self,
        samples: &[f32],
        channel: Channel,
        arena: &mut ProcessingArena,
        bucket_db: &mut [[f32; 4]; FREQUENCY_BUCKETS],
    ) -> Result<(), CaptureError> {
        for ((input, &sample), &weight) in arena
            .input
            .iter_mut()
            .zip(samples.iter())
            .zip(self.window.iter())
        {
            *input = sample * weight;
        }

        self.fft
            .process_with_scratch(&mut arena.input, &mut arena.spectrum, &mut arena.scratch)?;

        let normalization = 2.0 / self.bin_count() as f32;
        for bin in arena.spectrum.iter_mut() {
            *bin *= normalization;
        }

        write_magnitudes(&arena.spectrum, channel, &mut arena.texture);
        self.update_buckets(&arena.spectrum, channel, bucket_db);
        Ok(())
    }

    /// Peak power per bucket, converted to dB and smoothed
    fn update_buckets(
        &self,
        spectrum: &[Complex<f32>],
        channel: Channel,
        bucket_db: &mut [[f32; 4]; FREQUENCY_BUCKETS],
    ) {
        // Peak power per bucket, not the mean.
        let mut peaks = [0.0f32; FREQUENCY_BUCKETS];
        for (bin, &bucket) in (1..self.buckets.relevant_bins()).zip(self.buckets.mapping.iter()) {
            let power = spectrum[bin].norm_sqr();
            let peak = &mut peaks[bucket as usize];
            if power > *peak {
                *peak = power;
            }
        }

        for (row, &peak) in bucket_db.iter_mut().zip(peaks.iter()) {
            let db = power_to_db(peak, self.noise_floor_db);
            let slot = &mut row[channel.index()];
            *slot += (db - *slot) * self.smoothing;
        }
    }
}

/// Write `|X[k]|` into the magnitude column of `channel`; rows past the last
/// bin are zeroed.
fn write_magnitudes(spectrum: &[Complex<f32>], channel: Channel, texture: &mut [f32]) {
    let column = 2 + channel.index();
    for (row, frame) in texture.chunks_exact_mut(TEXTURE_STRIDE).enumerate() {
        frame[column] = spectrum.get(row).map_or(0.0, |bin| bin.norm());
    }
}
