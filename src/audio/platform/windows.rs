//! Windows WASAPI loopback capture
//!
//! Opens the default render endpoint twice:
//! - once as a shared-mode render client that we keep full of silence, so the
//!   engine keeps clocking even when nothing else is playing
//! - once as a loopback capture client reading the render mix as 32-bit float
//!
//! Every call here is a non-blocking status query; nothing waits on events.

use crate::audio::{
    AudioConfig, AudioProcessing, CaptureError, CapturePacket, LoopbackSource, SilenceSink,
    StreamFormat,
};
use crate::features::FrameConstants;
use std::rc::Rc;

use windows::core::GUID;
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioCaptureClient, IAudioClient, IAudioRenderClient, IMMDevice,
    IMMDeviceEnumerator, MMDeviceEnumerator, AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY,
    AUDCLNT_BUFFERFLAGS_SILENT, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_LOOPBACK,
    WAVEFORMATEX, WAVEFORMATEXTENSIBLE, WAVEFORMATEXTENSIBLE_0,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_MULTITHREADED,
};

/// S_FALSE - COM already initialized on this thread
const COM_S_FALSE: u32 = 1;

/// RPC_E_CHANGED_MODE - COM initialized with a different threading model
const COM_RPC_E_CHANGED_MODE: u32 = 0x80010106;

/// WAVE_FORMAT_PCM - integer PCM
const WAVE_FORMAT_PCM: u16 = 1;

/// WAVE_FORMAT_IEEE_FLOAT - 32-bit IEEE float
const WAVE_FORMAT_IEEE_FLOAT: u16 = 3;

/// WAVE_FORMAT_EXTENSIBLE - format details live in the SubFormat GUID
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// KSDATAFORMAT_SUBTYPE_IEEE_FLOAT = 00000003-0000-0010-8000-00aa00389b71
const SUBTYPE_IEEE_FLOAT: GUID = GUID::from_u128(0x00000003_0000_0010_8000_00aa00389b71);

const FLOAT_BITS: u16 = 32;

/// Keeps COM initialized for as long as any WASAPI object created under it lives
#[derive(Debug)]
struct ComApartment {
    owns_init: bool,
}

impl ComApartment {
    fn enter() -> Result<Rc<Self>, CaptureError> {
        // SAFETY: CoInitializeEx has no preconditions; we only balance it with
        // CoUninitialize when this call was the one that initialized COM.
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        let code = hr.0 as u32;
        let owns_init = if hr.is_ok() {
            code != COM_S_FALSE
        } else if code == COM_RPC_E_CHANGED_MODE {
            false
        } else {
            return Err(CaptureError::device(
                "CoInitializeEx",
                format!("HRESULT 0x{:08X}", code),
            ));
        };

        Ok(Rc::new(Self { owns_init }))
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        if self.owns_init {
            // SAFETY: balanced with the successful CoInitializeEx in `enter`.
            unsafe { CoUninitialize() };
        }
    }
}

/// Render client that only ever plays silence
pub struct WasapiSilence {
    client: IAudioClient,
    render: IAudioRenderClient,
    buffer_frames: u32,
    started: bool,
    _com: Rc<ComApartment>,
}

impl WasapiSilence {
    /// # Safety
    /// COM must be initialized on the current thread.
    unsafe fn open(device: &IMMDevice, com: Rc<ComApartment>) -> Result<Self, CaptureError> {
        let client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::device("IMMDevice::Activate", e))?;

        let format_ptr = client
            .GetMixFormat()
            .map_err(|e| CaptureError::device("GetMixFormat", e))?;

        let init_result = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            0,
            0,
            0,
            format_ptr,
            None,
        );
        // SAFETY: allocated by GetMixFormat with CoTaskMemAlloc.
        CoTaskMemFree(Some(format_ptr as *const _));
        init_result.map_err(|e| CaptureError::device("IAudioClient::Initialize (render)", e))?;

        let render: IAudioRenderClient = client
            .GetService()
            .map_err(|e| CaptureError::device("GetService (render)", e))?;

        let buffer_frames = client
            .GetBufferSize()
            .map_err(|e| CaptureError::device("GetBufferSize", e))?;

        Ok(Self {
            client,
            render,
            buffer_frames,
            started: false,
            _com: com,
        })
    }
}

impl SilenceSink for WasapiSilence {
    fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    fn padding(&mut self) -> Result<u32, CaptureError> {
        // SAFETY: the client was initialized in `open`.
        unsafe { self.client.GetCurrentPadding() }
            .map_err(|e| CaptureError::device("GetCurrentPadding", e))
    }

    fn render_silence(&mut self, frames: u32) -> Result<(), CaptureError> {
        // SAFETY: `frames` never exceeds the free space reported by padding, and
        // the silent flag means the buffer contents are never read.
        unsafe {
            self.render
                .GetBuffer(frames)
                .map_err(|e| CaptureError::device("IAudioRenderClient::GetBuffer", e))?;
            self.render
                .ReleaseBuffer(frames, AUDCLNT_BUFFERFLAGS_SILENT.0 as u32)
                .map_err(|e| CaptureError::device("IAudioRenderClient::ReleaseBuffer", e))
        }
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        // SAFETY: the client was initialized in `open`.
        unsafe { self.client.Start() }
            .map_err(|e| CaptureError::device("IAudioClient::Start (render)", e))?;
        self.started = true;
        Ok(())
    }
}

impl Drop for WasapiSilence {
    fn drop(&mut self) {
        if self.started {
            // SAFETY: stopping a started client is always valid.
            let _ = unsafe { self.client.Stop() };
        }
    }
}

/// Loopback capture client on the default render endpoint
pub struct WasapiLoopback {
    client: IAudioClient,
    capture: IAudioCaptureClient,
    format: StreamFormat,
    started: bool,
    _com: Rc<ComApartment>,
}

impl WasapiLoopback {
    /// # Safety
    /// COM must be initialized on the current thread.
    unsafe fn open(device: &IMMDevice, com: Rc<ComApartment>) -> Result<Self, CaptureError> {
        let client: IAudioClient = device
            .Activate(CLSCTX_ALL, None)
            .map_err(|e| CaptureError::device("IMMDevice::Activate", e))?;

        let format_ptr = client
            .GetMixFormat()
            .map_err(|e| CaptureError::device("GetMixFormat", e))?;

        if force_float_format(format_ptr) {
            log::warn!("Capture mix format is not float, requesting 32-bit float conversion");
        }

        let format = &*format_ptr;
        let stream_format = StreamFormat {
            sample_rate: format.nSamplesPerSec,
            channels: format.nChannels,
        };

        let init_result = client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_LOOPBACK,
            0,
            0,
            format_ptr,
            None,
        );
        // SAFETY: allocated by GetMixFormat with CoTaskMemAlloc.
        CoTaskMemFree(Some(format_ptr as *const _));
        init_result.map_err(|e| CaptureError::device("IAudioClient::Initialize (loopback)", e))?;

        let capture: IAudioCaptureClient = client
            .GetService()
            .map_err(|e| CaptureError::device("GetService (capture)", e))?;

        Ok(Self {
            client,
            capture,
            format: stream_format,
            started: false,
            _com: com,
        })
    }
}

impl LoopbackSource for WasapiLoopback {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        // SAFETY: the client was initialized in `open`.
        unsafe { self.client.Start() }
            .map_err(|e| CaptureError::device("IAudioClient::Start (loopback)", e))?;
        self.started = true;
        Ok(())
    }

    fn read_packet(
        &mut self,
        sink: &mut dyn FnMut(CapturePacket<'_>),
    ) -> Result<bool, CaptureError> {
        // SAFETY: GetBuffer hands out `frames * channels` float samples that stay
        // valid until the matching ReleaseBuffer below; the slice does not escape
        // the `sink` call.
        unsafe {
            let packet_size = self
                .capture
                .GetNextPacketSize()
                .map_err(|e| CaptureError::device("GetNextPacketSize", e))?;
            if packet_size == 0 {
                return Ok(false);
            }

            let mut data = std::ptr::null_mut();
            let mut frames = 0u32;
            let mut flags = 0u32;
            self.capture
                .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                .map_err(|e| CaptureError::device("IAudioCaptureClient::GetBuffer", e))?;

            let silent = flags & AUDCLNT_BUFFERFLAGS_SILENT.0 as u32 != 0;
            let discontinuity = flags & AUDCLNT_BUFFERFLAGS_DATA_DISCONTINUITY.0 as u32 != 0;

            let sample_count = frames as usize * self.format.channels as usize;
            let samples: &[f32] = if silent || data.is_null() || sample_count == 0 {
                &[]
            } else {
                std::slice::from_raw_parts(data as *const f32, sample_count)
            };

            sink(CapturePacket {
                samples,
                frames: frames as usize,
                discontinuity,
                silent: silent || data.is_null(),
            });

            self.capture
                .ReleaseBuffer(frames)
                .map_err(|e| CaptureError::device("IAudioCaptureClient::ReleaseBuffer", e))?;
        }

        Ok(true)
    }
}

impl Drop for WasapiLoopback {
    fn drop(&mut self) {
        if self.started {
            // SAFETY: stopping a started client is always valid.
            let _ = unsafe { self.client.Stop() };
        }
    }
}

/// Rewrite a mix format in place so the capture client delivers 32-bit float.
///
/// Returns `true` if the format was changed.
///
/// # Safety
/// `format` must point to a valid mix format returned by `GetMixFormat`,
/// including the extensible tail when the tag says so.
unsafe fn force_float_format(format: *mut WAVEFORMATEX) -> bool {
    let channels = (*format).nChannels;
    let block_align = channels * (FLOAT_BITS / 8);

    match (*format).wFormatTag {
        WAVE_FORMAT_PCM => {
            (*format).wFormatTag = WAVE_FORMAT_IEEE_FLOAT;
        }
        WAVE_FORMAT_EXTENSIBLE => {
            let extensible = format as *mut WAVEFORMATEXTENSIBLE;
            let sub_format =
                std::ptr::read_unaligned(std::ptr::addr_of!((*extensible).SubFormat));
            if sub_format == SUBTYPE_IEEE_FLOAT {
                return false;
            }
            std::ptr::addr_of_mut!((*extensible).SubFormat).write_unaligned(SUBTYPE_IEEE_FLOAT);
            std::ptr::addr_of_mut!((*extensible).Samples).write_unaligned(
                WAVEFORMATEXTENSIBLE_0 {
                    wValidBitsPerSample: FLOAT_BITS,
                },
            );
        }
        _ => return false,
    }

    (*format).wBitsPerSample = FLOAT_BITS;
    (*format).nBlockAlign = block_align;
    (*format).nAvgBytesPerSec = block_align as u32 * (*format).nSamplesPerSec;
    true
}

/// Open the silence and loopback clients on the default render endpoint.
pub fn open_default_endpoint() -> Result<(WasapiSilence, WasapiLoopback), CaptureError> {
    let com = ComApartment::enter()?;

    // SAFETY: COM is initialized on this thread for as long as `com` lives,
    // and both clients hold a reference to it.
    unsafe {
        let enumerator: IMMDeviceEnumerator =
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::device("CoCreateInstance(MMDeviceEnumerator)", e))?;

        let device = enumerator
            .GetDefaultAudioEndpoint(eRender, eConsole)
            .map_err(|e| CaptureError::device("GetDefaultAudioEndpoint", e))?;

        let silence = WasapiSilence::open(&device, com.clone())?;
        let loopback = WasapiLoopback::open(&device, com)?;

        Ok((silence, loopback))
    }
}

/// Start loopback analysis of the default output device and seed `features`.
pub fn open_default(
    config: &AudioConfig,
    features: &mut FrameConstants,
) -> Result<AudioProcessing<WasapiSilence, WasapiLoopback>, CaptureError> {
    let (silence, loopback) = open_default_endpoint()?;
    AudioProcessing::new(silence, loopback, config, features)
}
