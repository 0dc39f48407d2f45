//! Boundary between the capture core and the OS audio stack
//!
//! The capture core never talks to a driver directly. It drives two
//! endpoints through these traits:
//! - a [`SilenceSink`] that renders silence so the shared engine keeps clocking
//! - a [`LoopbackSource`] that yields packets of the render mix as 32-bit float
//!
//! All calls are non-blocking status queries; the core loops on them until it
//! has caught up and then returns control to the caller.

use super::CaptureError;

/// Negotiated capture stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Interleaved channels per frame
    pub channels: u16,
}

/// One packet of captured frames, valid until the source releases it
#[derive(Debug, Clone, Copy)]
pub struct CapturePacket<'a> {
    /// Interleaved samples, `frames * channels` long
    pub samples: &'a [f32],

    /// Number of frames in the packet
    pub frames: usize,

    /// The driver reported a gap before this packet
    pub discontinuity: bool,

    /// The driver marked the packet as silence; `samples` must not be read
    pub silent: bool,
}

/// Render endpoint used only to keep the audio engine running
pub trait SilenceSink {
    /// Size of the render buffer in frames
    fn buffer_frames(&self) -> u32;

    /// Frames queued in the render buffer and not yet played
    fn padding(&mut self) -> Result<u32, CaptureError>;

    /// Queue `frames` frames of silence
    fn render_silence(&mut self, frames: u32) -> Result<(), CaptureError>;

    /// Start the render stream
    fn start(&mut self) -> Result<(), CaptureError>;
}

/// Loopback capture of the render mix
pub trait LoopbackSource {
    /// Format of the packets this source yields
    fn format(&self) -> StreamFormat;

    /// Start the capture stream
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Fetch the next packet, hand it to `sink` and release it.
    ///
    /// Returns `Ok(false)` without calling `sink` when no packet is pending.
    fn read_packet(
        &mut self,
        sink: &mut dyn FnMut(CapturePacket<'_>),
    ) -> Result<bool, CaptureError>;
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory backend that replays queued packets and padding values

    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// A packet queued on a [`ScriptedSource`]
    #[derive(Debug, Clone, Default)]
    pub struct ScriptedPacket {
        pub samples: Vec<f32>,
        pub discontinuity: bool,
        pub silent: bool,
    }

    impl ScriptedPacket {
        pub fn new(samples: Vec<f32>) -> Self {
            Self {
                samples,
                ..Default::default()
            }
        }

        pub fn with_discontinuity(mut self) -> Self {
            self.discontinuity = true;
            self
        }

        pub fn with_silent_flag(mut self) -> Self {
            self.silent = true;
            self
        }
    }

    /// Loopback source fed from a queue of packets
    #[derive(Debug)]
    pub struct ScriptedSource {
        pub format: StreamFormat,
        pub packets: VecDeque<ScriptedPacket>,
        pub started: bool,
        pub fail_next_read: bool,
    }

    impl ScriptedSource {
        pub fn new(sample_rate: u32, channels: u16) -> Self {
            Self {
                format: StreamFormat {
                    sample_rate,
                    channels,
                },
                packets: VecDeque::new(),
                started: false,
                fail_next_read: false,
            }
        }

        pub fn push(&mut self, packet: ScriptedPacket) {
            self.packets.push_back(packet);
        }
    }

    impl LoopbackSource for ScriptedSource {
        fn format(&self) -> StreamFormat {
            self.format
        }

        fn start(&mut self) -> Result<(), CaptureError> {
            self.started = true;
            Ok(())
        }

        fn read_packet(
            &mut self,
            sink: &mut dyn FnMut(CapturePacket<'_>),
        ) -> Result<bool, CaptureError> {
            if self.fail_next_read {
                self.fail_next_read = false;
                return Err(CaptureError::device("GetNextPacketSize", "device removed"));
            }
            let Some(packet) = self.packets.pop_front() else {
                return Ok(false);
            };
            let channels = self.format.channels.max(1) as usize;
            sink(CapturePacket {
                samples: &packet.samples,
                frames: packet.samples.len() / channels,
                discontinuity: packet.discontinuity,
                silent: packet.silent,
            });
            Ok(true)
        }
    }

    /// Silence sink whose playback consumes `drains[n]` frames before the n-th padding query
    #[derive(Debug)]
    pub struct ScriptedSink {
        pub buffer_frames: u32,
        pub queued: u32,
        pub drains: VecDeque<u32>,
        pub rendered: Rc<Cell<u64>>,
        pub render_calls: Rc<Cell<u32>>,
        pub started: bool,
        pub fail_padding: bool,
    }

    impl ScriptedSink {
        pub fn new(buffer_frames: u32) -> Self {
            Self {
                buffer_frames,
                queued: 0,
                drains: VecDeque::new(),
                rendered: Rc::new(Cell::new(0)),
                render_calls: Rc::new(Cell::new(0)),
                started: false,
                fail_padding: false,
            }
        }
    }

    impl SilenceSink for ScriptedSink {
        fn buffer_frames(&self) -> u32 {
            self.buffer_frames
        }

        fn padding(&mut self) -> Result<u32, CaptureError> {
            if self.fail_padding {
                return Err(CaptureError::device("GetCurrentPadding", "device removed"));
            }
            let played = self.drains.pop_front().unwrap_or(0);
            self.queued = self.queued.saturating_sub(played);
            Ok(self.queued)
        }

        fn render_silence(&mut self, frames: u32) -> Result<(), CaptureError> {
            assert!(
                self.queued + frames <= self.buffer_frames,
                "render overflow"
            );
            self.queued += frames;
            self.rendered.set(self.rendered.get() + frames as u64);
            self.render_calls.set(self.render_calls.get() + 1);
            Ok(())
        }

        fn start(&mut self) -> Result<(), CaptureError> {
            self.started = true;
            Ok(())
        }
    }
}
