//! Silence rendering that keeps the shared audio engine clocked
//!
//! Loopback capture only produces packets while the render endpoint is
//! running. When nothing else is playing, the engine idles and the capture
//! side starves, so we keep our own render stream topped up with silence.

use super::{CaptureError, SilenceSink};

/// Keeps a [`SilenceSink`] exactly full of silence
#[derive(Debug)]
pub struct SilenceKeepAlive<S> {
    sink: S,
}

impl<S: SilenceSink> SilenceKeepAlive<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Queue one full buffer of silence and start the render stream.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let frames = self.sink.buffer_frames();
        self.sink.render_silence(frames)?;
        self.sink.start()?;

        log::debug!("Silence keep-alive started ({} frame buffer)", frames);
        Ok(())
    }

    /// Top the render buffer back up to exactly full.
    ///
    /// Loops until the reported padding equals the buffer size; playback may
    /// consume frames while we are filling, so a single fill is not enough.
    /// Returns the number of frames rendered.
    pub fn top_up(&mut self) -> Result<u64, CaptureError> {
        let buffer_frames = self.sink.buffer_frames();
        let mut rendered = 0u64;

        loop {
            let padding = self.sink.padding()?;
            if padding >= buffer_frames {
                break;
            }
            let missing = buffer_frames - padding;
            self.sink.render_silence(missing)?;
            rendered += missing as u64;
        }

        Ok(rendered)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::scripted::ScriptedSink;

    #[test]
    fn start_primes_full_buffer_then_starts() {
        let mut keep_alive = SilenceKeepAlive::new(ScriptedSink::new(480));

        keep_alive.start().unwrap();

        assert!(keep_alive.sink().started);
        assert_eq!(keep_alive.sink().queued, 480);
        assert_eq!(keep_alive.sink().rendered.get(), 480);
    }

    #[test]
    fn top_up_on_full_buffer_renders_nothing() {
        let mut keep_alive = SilenceKeepAlive::new(ScriptedSink::new(480));
        keep_alive.start().unwrap();

        let rendered = keep_alive.top_up().unwrap();

        assert_eq!(rendered, 0);
        assert_eq!(keep_alive.sink().render_calls.get(), 1);
    }

    #[test]
    fn top_up_refills_exactly_what_was_played() {
        let mut keep_alive = SilenceKeepAlive::new(ScriptedSink::new(480));
        keep_alive.start().unwrap();

        keep_alive.sink.drains.push_back(130);
        let rendered = keep_alive.top_up().unwrap();

        assert_eq!(rendered, 130);
        assert_eq!(keep_alive.sink().queued, 480);
    }

    #[test]
    fn top_up_keeps_looping_while_playback_drains() {
        let mut keep_alive = SilenceKeepAlive::new(ScriptedSink::new(480));
        keep_alive.start().unwrap();

        // Playback consumes more frames between each of our padding queries.
        keep_alive.sink.drains.extend([200, 50, 10]);
        let rendered = keep_alive.top_up().unwrap();

        assert_eq!(rendered, 260);
        assert_eq!(keep_alive.sink().queued, 480);
        assert_eq!(keep_alive.sink().render_calls.get(), 4);
    }

    #[test]
    fn top_up_propagates_device_errors() {
        let mut keep_alive = SilenceKeepAlive::new(ScriptedSink::new(480));
        keep_alive.start().unwrap();
        keep_alive.sink.fail_padding = true;

        let err = keep_alive.top_up().unwrap_err();
        assert!(matches!(err, CaptureError::Device { .. }));
    }
}
