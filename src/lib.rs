//! Loopback Spectrum
//!
//! Captures whatever the default output device is playing and turns it into
//! per-frame features for audio-reactive rendering: per-channel RMS levels,
//! sixteen smoothed spectral buckets and a raw sample/spectrum texture.
//!
//! The host owns a [`FrameConstants`] block and calls
//! [`AudioProcessing::update`] once per display frame; nothing here spawns a
//! thread or blocks.

pub mod audio;
pub mod features;

pub use audio::{AudioConfig, AudioProcessing, CaptureError, UpdateStatus};
pub use features::FrameConstants;

/// Install the `env_logger` backend with an `info` default filter.
///
/// `RUST_LOG` overrides the default. If a logger is already installed it is
/// kept and the new one is discarded.
pub fn init_logging() {
    let env = env_logger::Env::default().default_filter_or("info");
    if let Err(e) = env_logger::Builder::from_env(env).try_init() {
        log::debug!("Keeping existing logger: {}", e);
    }
}
