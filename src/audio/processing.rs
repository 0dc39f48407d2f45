//! Per-frame processing: pull captured audio, meter it, analyze it

use super::{
    AudioCapture, AudioConfig, CaptureError, Channel, LevelMeter, LoopbackSource, SilenceSink,
    SpectralAnalyzer, UpdateStatus, TEXTURE_STRIDE,
};
use crate::features::{FrameConstants, BUCKET_MAX_FREQUENCY, BUCKET_MIN_FREQUENCY};
use rustfft::num_complex::Complex;

/// Working memory allocated once at initialization and reused every period
#[derive(Debug, Clone)]
pub struct ProcessingArena {
    /// Interleaved `(left, right, |FFT left|, |FFT right|)` per sample
    pub(crate) texture: Vec<f32>,
    /// Windowed period; the FFT also uses it as scratch
    pub(crate) input: Vec<f32>,
    /// Normalized spectrum, `N / 2 + 1` bins
    pub(crate) spectrum: Vec<Complex<f32>>,
    /// FFT internal working memory
    pub(crate) scratch: Vec<Complex<f32>>,
}

impl ProcessingArena {
    pub fn texture(&self) -> &[f32] {
        &self.texture
    }

    pub fn spectrum(&self) -> &[Complex<f32>] {
        &self.spectrum
    }
}

/// Capture plus analysis, producing [`FrameConstants`] and the audio texture
#[derive(Debug)]
pub struct AudioProcessing<S, C> {
    capture: AudioCapture<S, C>,
    analyzer: SpectralAnalyzer,
    meter: LevelMeter,
    arena: ProcessingArena,
    noise_floor_db: f32,
}

impl<S: SilenceSink, C: LoopbackSource> AudioProcessing<S, C> {
    /// Start capture on the given endpoints and seed `features`
    pub fn new(
        sink: S,
        source: C,
        config: &AudioConfig,
        features: &mut FrameConstants,
    ) -> Result<Self, CaptureError> {
        let capture = AudioCapture::new(sink, source, config)?;
        Ok(Self::from_capture(capture, config, features))
    }

    /// Build the analysis stages around an already running capture
    pub fn from_capture(
        capture: AudioCapture<S, C>,
        config: &AudioConfig,
        features: &mut FrameConstants,
    ) -> Self {
        let analyzer =
            SpectralAnalyzer::new(capture.samples_per_period(), capture.sample_rate(), config);
        let meter = LevelMeter::new(analyzer.smoothing(), config.noise_floor_db);
        let arena = analyzer.make_arena();

        let processing = Self {
            capture,
            analyzer,
            meter,
            arena,
            noise_floor_db: config.noise_floor_db,
        };
        processing.seed(features);
        processing
    }

    /// Reset the sound fields of `features` to silence and publish the format
    pub fn seed(&self, features: &mut FrameConstants) {
        features.rms = [0.0; 2];
        features.rms_db_spl = [self.noise_floor_db; 2];
        features.noise_floor_db_spl = self.noise_floor_db;

        for row in features.frequency_buckets.iter_mut() {
            row[Channel::Left.index()] = self.noise_floor_db;
            row[Channel::Right.index()] = self.noise_floor_db;
        }
        self.publish_format(features);
    }

    fn publish_format(&self, features: &mut FrameConstants) {
        features.sample_rate = self.capture.sample_rate() as f32;
        features.samples_per_period = self.capture.samples_per_period() as f32;

        let buckets = self.analyzer.buckets();
        for (bucket, row) in features.frequency_buckets.iter_mut().enumerate() {
            let (low, high) = buckets.range(bucket).unwrap_or((0.0, 0.0));
            row[BUCKET_MIN_FREQUENCY] = low;
            row[BUCKET_MAX_FREQUENCY] = high;
        }
    }

    /// Pull new audio and, if a period completed, refresh `features` and the
    /// texture. On `NotUpdated` nothing is written.
    pub fn update(&mut self, features: &mut FrameConstants) -> Result<UpdateStatus, CaptureError> {
        let status = self.capture.pull_audio()?;

        if status == UpdateStatus::Updated {
            for channel in Channel::BOTH {
                self.process_channel(channel, features)?;
            }
            self.publish_format(features);
        }

        Ok(status)
    }

    fn process_channel(
        &mut self,
        channel: Channel,
        features: &mut FrameConstants,
    ) -> Result<(), CaptureError> {
        let samples = self.capture.channel(channel);
        let index = channel.index();

        self.meter.update(
            samples,
            &mut features.rms[index],
            &mut features.rms_db_spl[index],
        );

        for (frame, &sample) in self
            .arena
            .texture
            .chunks_exact_mut(TEXTURE_STRIDE)
            .zip(samples.iter())
        {
            frame[index] = sample;
        }

        self.analyzer.analyze(
            samples,
            channel,
            &mut self.arena,
            &mut features.frequency_buckets,
        )
    }

    /// Interleaved audio texture, `4 * samples_per_period` floats
    pub fn texture(&self) -> &[f32] {
        self.arena.texture()
    }

    pub fn sample_rate(&self) -> u32 {
        self.capture.sample_rate()
    }

    pub fn samples_per_period(&self) -> usize {
        self.capture.samples_per_period()
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn capture(&self) -> &AudioCapture<S, C> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut AudioCapture<S, C> {
        &mut self.capture
    }
}
