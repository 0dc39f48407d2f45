//! Platform-specific audio backends
//!
//! Each platform module implements the [`SilenceSink`](super::SilenceSink) and
//! [`LoopbackSource`](super::LoopbackSource) traits on top of the native
//! audio API. Only WASAPI offers the render-endpoint loopback this crate
//! relies on, so Windows is the only backend.

#[cfg(target_os = "windows")]
pub mod windows;
