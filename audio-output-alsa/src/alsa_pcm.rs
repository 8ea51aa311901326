//! ALSA playback handles.
//!
//! Hardware parameters are staged on the handle and replayed onto a fresh
//! configuration space for every query, so each near-match setter sees the
//! space narrowed by the choices made before it.

use std::time::Duration;

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};

use audio_output_core::models::audio_models::SampleFormat;
use audio_output_core::session::pcm_output::PcmOutput;
use audio_output_core::traits::device::{AudioBackend, DeviceError, DeviceErrorKind, PcmHandle, Recovery};

use crate::alsa_mixer::AlsaMixer;

/// The buffered output driver over ALSA.
pub type AlsaOutput = PcmOutput<AlsaBackend>;

// Linux errno values reported by alsa-lib
const EINTR: i32 = 4;
const EAGAIN: i32 = 11;
const EPIPE: i32 = 32;
const ESTRPIPE: i32 = 86;

#[cfg(target_endian = "little")]
const ALSA_FORMAT_CODES: [(SampleFormat, Format); 6] = [
    (SampleFormat::S8, Format::S8),
    (SampleFormat::U8, Format::U8),
    (SampleFormat::S16, Format::S16LE),
    (SampleFormat::U16, Format::U16LE),
    (SampleFormat::S32, Format::S32LE),
    (SampleFormat::U32, Format::U32LE),
];

#[cfg(target_endian = "big")]
const ALSA_FORMAT_CODES: [(SampleFormat, Format); 6] = [
    (SampleFormat::S8, Format::S8),
    (SampleFormat::U8, Format::U8),
    (SampleFormat::S16, Format::S16BE),
    (SampleFormat::U16, Format::U16BE),
    (SampleFormat::S32, Format::S32BE),
    (SampleFormat::U32, Format::U32BE),
];

/// Map an alsa-lib error onto the device seam.
pub(crate) fn device_error(err: &alsa::Error) -> DeviceError {
    let kind = match err.errno() {
        EAGAIN => DeviceErrorKind::WouldBlock,
        EPIPE | EINTR => DeviceErrorKind::Underrun,
        ESTRPIPE => DeviceErrorKind::Suspended,
        _ => DeviceErrorKind::Other,
    };
    DeviceError::new(kind, err.to_string())
}

/// Opens ALSA devices by name (`"default"`, `"hw:0,0"`, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct AlsaBackend;

impl AlsaBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for AlsaBackend {
    type Pcm = AlsaPcm;
    type Mixer = AlsaMixer;

    fn open_pcm(&mut self, device: &str) -> Result<AlsaPcm, DeviceError> {
        log::info!("Opening ALSA device: {}", device);
        let pcm = PCM::new(device, Direction::Playback, true).map_err(|e| device_error(&e))?;
        Ok(AlsaPcm {
            pcm,
            staged: StagedParams::default(),
            last_error: None,
        })
    }

    fn open_mixer(&mut self, device: &str) -> Result<AlsaMixer, DeviceError> {
        AlsaMixer::open(device)
    }

    fn name(&self) -> &'static str {
        "ALSA"
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct StagedParams {
    interleaved: bool,
    format: Option<Format>,
    channels: Option<u32>,
    rate: Option<u32>,
    period_us: Option<u32>,
    buffer_us: Option<u32>,
}

/// A non-blocking ALSA playback handle. Closed when dropped.
pub struct AlsaPcm {
    pcm: PCM,
    staged: StagedParams,
    // Kept for snd_pcm_recover, which needs the failing error code
    last_error: Option<alsa::Error>,
}

// SAFETY: the handle is owned by one driver and only used from the thread
// currently driving it.
unsafe impl Send for AlsaPcm {}

impl AlsaPcm {
    /// Fresh configuration space narrowed by every staged parameter.
    fn space(&self) -> alsa::Result<HwParams<'_>> {
        let hwp = HwParams::any(&self.pcm)?;
        if self.staged.interleaved {
            hwp.set_access(Access::RWInterleaved)?;
        }
        if let Some(format) = self.staged.format {
            hwp.set_format(format)?;
        }
        if let Some(channels) = self.staged.channels {
            hwp.set_channels(channels)?;
        }
        if let Some(rate) = self.staged.rate {
            hwp.set_rate(rate, ValueOr::Nearest)?;
        }
        if let Some(period_us) = self.staged.period_us {
            hwp.set_period_time_near(period_us, ValueOr::Nearest)?;
        }
        if let Some(buffer_us) = self.staged.buffer_us {
            hwp.set_buffer_time_near(buffer_us, ValueOr::Nearest)?;
        }
        Ok(hwp)
    }

    /// Replace the staged parameters if the device accepts them.
    fn stage(&mut self, next: StagedParams) -> Result<(), DeviceError> {
        let previous = std::mem::replace(&mut self.staged, next);
        let accepted = self.space().map(|_| ());
        if let Err(e) = accepted {
            self.staged = previous;
            return Err(device_error(&e));
        }
        Ok(())
    }
}

impl PcmHandle for AlsaPcm {
    type Format = Format;

    const FORMAT_CODES: &'static [(SampleFormat, Format)] = &ALSA_FORMAT_CODES;

    fn channels_min(&self) -> Result<u32, DeviceError> {
        self.space()
            .and_then(|hwp| hwp.get_channels_min())
            .map_err(|e| device_error(&e))
    }

    fn channels_max(&self) -> Result<u32, DeviceError> {
        self.space()
            .and_then(|hwp| hwp.get_channels_max())
            .map_err(|e| device_error(&e))
    }

    fn supports_format(&self, format: Format) -> bool {
        self.space()
            .map(|hwp| hwp.test_format(format).is_ok())
            .unwrap_or(false)
    }

    fn set_access_interleaved(&mut self) -> Result<(), DeviceError> {
        self.stage(StagedParams {
            interleaved: true,
            ..self.staged
        })
    }

    fn set_format(&mut self, format: Format) -> Result<(), DeviceError> {
        self.stage(StagedParams {
            format: Some(format),
            ..self.staged
        })
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), DeviceError> {
        self.stage(StagedParams {
            channels: Some(channels),
            ..self.staged
        })
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, DeviceError> {
        let chosen = self
            .space()
            .and_then(|hwp| hwp.set_rate_near(rate, ValueOr::Nearest))
            .map_err(|e| device_error(&e))?;
        self.staged.rate = Some(chosen);
        Ok(chosen)
    }

    fn buffer_time_max_us(&self) -> Result<u32, DeviceError> {
        self.space()
            .and_then(|hwp| hwp.get_buffer_time_max())
            .map_err(|e| device_error(&e))
    }

    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DeviceError> {
        let chosen = self
            .space()
            .and_then(|hwp| hwp.set_period_time_near(period_us, ValueOr::Nearest))
            .map_err(|e| device_error(&e))?;
        self.staged.period_us = Some(chosen);
        Ok(chosen)
    }

    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DeviceError> {
        let chosen = self
            .space()
            .and_then(|hwp| hwp.set_buffer_time_near(buffer_us, ValueOr::Nearest))
            .map_err(|e| device_error(&e))?;
        self.staged.buffer_us = Some(chosen);
        Ok(chosen)
    }

    fn apply_params(&mut self) -> Result<(), DeviceError> {
        let hwp = self.space().map_err(|e| device_error(&e))?;
        self.pcm.hw_params(&hwp).map_err(|e| device_error(&e))
    }

    fn period_frames(&self) -> Result<u64, DeviceError> {
        self.pcm
            .hw_params_current()
            .and_then(|hwp| hwp.get_period_size())
            .map(|frames| frames.max(0) as u64)
            .map_err(|e| device_error(&e))
    }

    fn buffer_frames(&self) -> Result<u64, DeviceError> {
        self.pcm
            .hw_params_current()
            .and_then(|hwp| hwp.get_buffer_size())
            .map(|frames| frames.max(0) as u64)
            .map_err(|e| device_error(&e))
    }

    fn prepare(&mut self) -> Result<(), DeviceError> {
        self.pcm.prepare().map_err(|e| device_error(&e))
    }

    fn write_frames(&mut self, data: &[u8], _frames: usize) -> Result<usize, DeviceError> {
        match self.pcm.io_bytes().writei(data) {
            Ok(written) => Ok(written),
            Err(e) => {
                let err = device_error(&e);
                self.last_error = Some(e);
                Err(err)
            }
        }
    }

    fn recover(&mut self, err: &DeviceError) -> Recovery {
        let Some(alsa_err) = self.last_error.take() else {
            return match err.kind {
                DeviceErrorKind::WouldBlock => Recovery::WouldBlock,
                _ => Recovery::Failed(err.clone()),
            };
        };

        match self.pcm.try_recover(alsa_err, false) {
            Ok(()) => Recovery::Recovered,
            Err(e) if e.errno() == EAGAIN => Recovery::WouldBlock,
            Err(e) => Recovery::Failed(device_error(&e)),
        }
    }

    fn wait(&mut self, timeout: Duration) -> Result<bool, DeviceError> {
        let timeout_ms = timeout.as_millis().min(u32::MAX as u128) as u32;
        self.pcm.wait(Some(timeout_ms)).map_err(|e| device_error(&e))
    }

    fn delay_frames(&mut self) -> Result<i64, DeviceError> {
        self.pcm.delay().map(|frames| frames as i64).map_err(|e| device_error(&e))
    }

    fn drop_pending(&mut self) -> Result<(), DeviceError> {
        self.pcm.drop().map_err(|e| device_error(&e))
    }
}
