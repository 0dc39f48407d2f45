//! Poll-driven loopback capture into the double-half ring buffer

use super::{
    AudioConfig, Channel, CircularAudioBuffer, LoopbackSource, SilenceKeepAlive, SilenceSink,
    MIN_PERIOD_LENGTH,
};
use thiserror::Error;

/// Audio capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Audio device call {operation} failed: {message}")]
    Device {
        operation: &'static str,
        message: String,
    },

    #[error("Unsupported capture channel count: {0} (expected 1 to 4)")]
    UnsupportedChannelCount(u16),

    #[error("Invalid audio configuration: {0}")]
    InvalidConfig(String),

    #[error("FFT processing failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl CaptureError {
    /// Wrap a failed OS or driver call
    pub fn device(operation: &'static str, message: impl ToString) -> Self {
        Self::Device {
            operation,
            message: message.to_string(),
        }
    }
}

/// Outcome of a successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    /// A new period was completed and the features were refreshed
    Updated,
    /// Not enough new frames yet; nothing changed
    NotUpdated,
}

/// Smallest `1024 * 2^k` period whose rate `sample_rate / period` (integer
/// division) does not exceed `required_frequency`.
pub fn period_length_for(sample_rate: u32, required_frequency: u32) -> usize {
    let mut period = MIN_PERIOD_LENGTH;
    while sample_rate as usize / period > required_frequency as usize {
        period *= 2;
    }
    period
}

/// Loopback capture with its silence keep-alive and ring buffer
#[derive(Debug)]
pub struct AudioCapture<S, C> {
    keep_alive: SilenceKeepAlive<S>,
    source: C,
    buffer: CircularAudioBuffer,
    sample_rate: u32,
    channels: usize,
    discontinuities: u64,
}

impl<S: SilenceSink, C: LoopbackSource> AudioCapture<S, C> {
    /// Size the ring buffer for the source format and start both streams.
    pub fn new(sink: S, mut source: C, config: &AudioConfig) -> Result<Self, CaptureError> {
        config.validate()?;

        let format = source.format();
        if format.channels == 0 || format.channels > 4 {
            return Err(CaptureError::UnsupportedChannelCount(format.channels));
        }

        let period = period_length_for(format.sample_rate, config.required_frequency);
        let buffer = CircularAudioBuffer::new(period);

        let mut keep_alive = SilenceKeepAlive::new(sink);
        keep_alive.start()?;
        source.start()?;

        log::info!(
            "Audio capture: {} Hz, {} channels, {} samples per period",
            format.sample_rate,
            format.channels,
            period
        );

        Ok(Self {
            keep_alive,
            source,
            buffer,
            sample_rate: format.sample_rate,
            channels: format.channels as usize,
            discontinuities: 0,
        })
    }

    /// Keep the engine clocked, drain every pending packet, then report
    /// whether a full period is ready. Call at least once per display frame.
    pub fn pull_audio(&mut self) -> Result<UpdateStatus, CaptureError> {
        self.keep_alive.top_up()?;

        let buffer = &mut self.buffer;
        let channels = self.channels;
        let mut discontinuities = 0u64;

        while self.source.read_packet(&mut |packet| {
            if packet.discontinuity {
                // Frames already written this pass are dropped along with the gap.
                buffer.reset();
                discontinuities += 1;
            }
            if packet.silent {
                buffer.push_silence(packet.frames);
            } else {
                let len = (packet.frames * channels).min(packet.samples.len());
                buffer.push_interleaved(&packet.samples[..len], channels);
            }
        })? {}

        if discontinuities > 0 {
            self.discontinuities += discontinuities;
            log::debug!(
                "Capture discontinuity, cursors reset ({} total)",
                self.discontinuities
            );
        }

        if self.buffer.take_period() {
            Ok(UpdateStatus::Updated)
        } else {
            Ok(UpdateStatus::NotUpdated)
        }
    }

    /// The most recent stable period of `channel`
    pub fn channel(&self, channel: Channel) -> &[f32] {
        self.buffer.stable_half(channel)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples_per_period(&self) -> usize {
        self.buffer.samples_per_period()
    }

    /// Driver-reported gaps seen since initialization
    pub fn discontinuities(&self) -> u64 {
        self.discontinuities
    }

    pub fn buffer(&self) -> &CircularAudioBuffer {
        &self.buffer
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut C {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::scripted::{ScriptedPacket, ScriptedSink, ScriptedSource};

    fn capture_with(source: ScriptedSource) -> AudioCapture<ScriptedSink, ScriptedSource> {
        AudioCapture::new(ScriptedSink::new(480), source, &AudioConfig::default()).unwrap()
    }

    fn stereo(frames: usize, left: f32, right: f32) -> Vec<f32> {
        (0..frames).flat_map(|_| [left, right]).collect()
    }

    #[test]
    fn period_length_doubles_until_rate_fits() {
        assert_eq!(period_length_for(48_000, 50), 1024);
        assert_eq!(period_length_for(44_100, 50), 1024);
        assert_eq!(period_length_for(96_000, 50), 2048);
        assert_eq!(period_length_for(192_000, 50), 4096);
        assert_eq!(period_length_for(48_000, 12), 4096);
        assert_eq!(period_length_for(48_000, 10), 8192);
        assert_eq!(period_length_for(8_000, 50), 1024);
    }

    #[test]
    fn new_starts_both_streams_and_sizes_buffer() {
        let capture = capture_with(ScriptedSource::new(48_000, 2));

        assert!(capture.keep_alive.sink().started);
        assert!(capture.source.started);
        assert_eq!(capture.sample_rate(), 48_000);
        assert_eq!(capture.samples_per_period(), 1024);
        assert_eq!(capture.buffer().capacity_frames(), 2048);
    }

    #[test]
    fn new_rejects_unsupported_channel_counts() {
        for channels in [0u16, 5, 8] {
            let result = AudioCapture::new(
                ScriptedSink::new(480),
                ScriptedSource::new(48_000, channels),
                &AudioConfig::default(),
            );
            assert!(matches!(
                result,
                Err(CaptureError::UnsupportedChannelCount(c)) if c == channels
            ));
        }
    }

    #[test]
    fn pull_without_packets_is_not_updated() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);
        assert_eq!(capture.buffer().cursor(), 0);
    }

    #[test]
    fn pull_reports_updated_once_per_completed_period() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        capture.feed(ScriptedPacket::new(stereo(600, 0.1, 0.2)));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);

        capture.feed(ScriptedPacket::new(stereo(600, 0.3, 0.4)));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::Updated);
        assert_eq!(capture.buffer().last_read_cursor(), 1024);

        let left = capture.channel(Channel::Left);
        assert_eq!(left.len(), 1024);
        assert_eq!(left[0], 0.1);
        assert_eq!(left[1023], 0.3);
        assert_eq!(capture.channel(Channel::Right)[599], 0.2);

        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);
    }

    #[test]
    fn pull_tops_up_silence_every_call() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));
        let rendered = capture.keep_alive.sink().rendered.clone();

        capture.keep_alive_sink_mut().drains.push_back(300);
        capture.pull_audio().unwrap();

        assert_eq!(rendered.get(), 480 + 300);
        assert_eq!(capture.keep_alive.sink().queued, 480);
    }

    #[test]
    fn mono_capture_fills_both_channels() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 1));

        capture.feed(ScriptedPacket::new(vec![0.5; 1024]));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::Updated);

        assert!(capture.channel(Channel::Left).iter().all(|&s| s == 0.5));
        assert!(capture.channel(Channel::Right).iter().all(|&s| s == 0.5));
    }

    #[test]
    fn silent_packets_are_written_as_zeros() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        capture.feed(ScriptedPacket::new(stereo(1024, 0.9, 0.9)).with_silent_flag());
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::Updated);

        assert!(capture.channel(Channel::Left).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn discontinuity_resets_cursors_and_drops_earlier_frames() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        capture.feed(ScriptedPacket::new(stereo(900, 0.1, 0.1)));
        capture.feed(ScriptedPacket::new(stereo(100, 0.7, 0.7)).with_discontinuity());
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);

        assert_eq!(capture.buffer().cursor(), 100);
        assert_eq!(capture.buffer().last_read_cursor(), 0);
        assert_eq!(capture.discontinuities(), 1);

        // Counting restarts from the reset, so 924 more frames complete the period.
        capture.feed(ScriptedPacket::new(stereo(923, 0.2, 0.2)));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);
        capture.feed(ScriptedPacket::new(stereo(1, 0.2, 0.2)));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::Updated);
        assert_eq!(capture.channel(Channel::Left)[0], 0.7);
    }

    #[test]
    fn discontinuity_after_a_read_resets_read_cursor() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        capture.feed(ScriptedPacket::new(stereo(1500, 0.1, 0.1)));
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::Updated);
        assert_eq!(capture.buffer().last_read_cursor(), 1024);

        capture.feed(ScriptedPacket::new(stereo(10, 0.1, 0.1)).with_discontinuity());
        assert_eq!(capture.pull_audio().unwrap(), UpdateStatus::NotUpdated);
        assert_eq!(capture.buffer().cursor(), 10);
        assert_eq!(capture.buffer().last_read_cursor(), 0);
    }

    #[test]
    fn device_failures_surface_as_errors() {
        let mut capture = capture_with(ScriptedSource::new(48_000, 2));

        capture.source.fail_next_read = true;
        assert!(matches!(
            capture.pull_audio(),
            Err(CaptureError::Device { operation: "GetNextPacketSize", .. })
        ));

        capture.keep_alive_sink_mut().fail_padding = true;
        assert!(matches!(
            capture.pull_audio(),
            Err(CaptureError::Device { operation: "GetCurrentPadding", .. })
        ));
    }

    impl AudioCapture<ScriptedSink, ScriptedSource> {
        fn keep_alive_sink_mut(&mut self) -> &mut ScriptedSink {
            self.keep_alive.sink_mut()
        }

        fn feed(&mut self, packet: ScriptedPacket) {
            self.source.push(packet);
        }
    }
}
