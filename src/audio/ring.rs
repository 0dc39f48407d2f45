//! Double-half circular buffer for captured stereo audio
//!
//! The buffer holds `2 * period` frames per channel. Capture writes at a
//! monotonically increasing cursor, wrapping with `cursor & (len - 1)`; the
//! analysis reads whichever half the cursor is *not* in. That guarantee holds
//! because writer and reader run one after the other on the same thread
//! (pull, then process); no fences or locks are involved.

/// Stereo channel selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Left = 0,
    Right = 1,
}

impl Channel {
    pub const BOTH: [Channel; 2] = [Channel::Left, Channel::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Circular stereo buffer with period-ready detection
#[derive(Debug)]
pub struct CircularAudioBuffer {
    /// Both channels in one allocation: left in `[0, len)`, right in `[len, 2 * len)`
    samples: Vec<f32>,
    /// Frames per channel, always a power of two
    len: usize,
    /// Total frames ever written since the last reset
    cursor: u64,
    /// Start of the half most recently handed to the reader
    last_read_cursor: u64,
}

impl CircularAudioBuffer {
    /// Create a buffer holding two periods of `period_length` frames.
    ///
    /// # Panics
    /// If `period_length` is not a power of two.
    pub fn new(period_length: usize) -> Self {
        assert!(
            period_length.is_power_of_two(),
            "period length {period_length} is not a power of two"
        );
        let len = period_length * 2;

        Self {
            samples: vec![0.0; len * 2],
            len,
            cursor: 0,
            last_read_cursor: 0,
        }
    }

    /// Frames per channel across both halves
    pub fn capacity_frames(&self) -> usize {
        self.len
    }

    /// Frames in one half, i.e. one processing period
    pub fn samples_per_period(&self) -> usize {
        self.len >> 1
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn last_read_cursor(&self) -> u64 {
        self.last_read_cursor
    }

    /// Write one stereo frame at the cursor and advance it
    #[inline]
    pub fn push_frame(&mut self, left: f32, right: f32) {
        let index = (self.cursor & (self.len as u64 - 1)) as usize;
        self.samples[index] = left;
        self.samples[self.len + index] = right;
        self.cursor += 1;
    }

    /// Downmix interleaved frames to stereo and append them.
    ///
    /// Mono input is duplicated into both channels; with two or more channels
    /// only the first two are kept.
    pub fn push_interleaved(&mut self, samples: &[f32], channels: usize) {
        match channels {
            0 => {}
            1 => {
                for &sample in samples {
                    self.push_frame(sample, sample);
                }
            }
            _ => {
                for frame in samples.chunks_exact(channels) {
                    self.push_frame(frame[0], frame[1]);
                }
            }
        }
    }

    /// Append `frames` frames of silence
    pub fn push_silence(&mut self, frames: usize) {
        for _ in 0..frames {
            self.push_frame(0.0, 0.0);
        }
    }

    /// Forget stream position after a driver-reported gap.
    ///
    /// Nothing is recovered; period counting restarts from zero.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.last_read_cursor = 0;
    }

    /// Check whether a full period has been written since the last read and,
    /// if so, mark it consumed.
    ///
    /// The read cursor snaps to the start of the half the writer is in, so the
    /// next period is only reported once the writer has moved past it.
    pub fn take_period(&mut self) -> bool {
        let half = self.samples_per_period() as u64;
        if self.cursor - self.last_read_cursor < half {
            return false;
        }
        self.last_read_cursor = self.cursor & !(half - 1);
        true
    }

    /// Index of the first frame of the half the writer is not in
    fn stable_offset(&self) -> usize {
        let inner = (self.cursor & (self.len as u64 - 1)) as usize;
        let half = self.samples_per_period();
        if inner < half {
            half
        } else {
            0
        }
    }

    /// The most recent complete half of `channel`.
    ///
    /// Valid only between a pull and the next write; the next period of
    /// capture overwrites it.
    pub fn stable_half(&self, channel: Channel) -> &[f32] {
        let half = self.samples_per_period();
        let offset = self.stable_offset();
        let write_index = (self.cursor & (self.len as u64 - 1)) as usize;
        debug_assert!(
            !(offset..offset + half).contains(&write_index),
            "stable half overlaps the write position"
        );

        let base = channel.index() * self.len + offset;
        &self.samples[base..base + half]
    }
}
