use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::audio_models::SampleFormat;

/// Classification of a device-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// The device cannot accept data right now (`EAGAIN`).
    WouldBlock,
    /// The hardware buffer ran dry (xrun).
    Underrun,
    /// The device was suspended by power management.
    Suspended,
    Other,
}

/// Error reported by a backend through the device seam.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    pub kind: DeviceErrorKind,
    pub message: String,
}

impl DeviceError {
    pub fn new(kind: DeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DeviceErrorKind::Other, message)
    }
}

/// Outcome of the backend's automatic recovery after a failed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// Device is usable again; the write can be retried at once.
    Recovered,
    /// Device is usable but not ready; wait for readiness first.
    WouldBlock,
    /// Device cannot be recovered.
    Failed(DeviceError),
}

/// An open PCM playback handle.
///
/// Hardware parameters are staged with the setters and committed by
/// [`PcmHandle::apply_params`]. The handle is released when dropped, so every
/// early return releases it.
pub trait PcmHandle: Send {
    /// Platform sample-format code.
    type Format: Copy + PartialEq + fmt::Debug + 'static;

    /// Portable format to platform code table used by the format mapper.
    const FORMAT_CODES: &'static [(SampleFormat, Self::Format)];

    fn channels_min(&self) -> Result<u32, DeviceError>;

    fn channels_max(&self) -> Result<u32, DeviceError>;

    /// Whether the device accepts the given format in its current configuration space.
    fn supports_format(&self, format: Self::Format) -> bool;

    /// Select interleaved read/write access.
    fn set_access_interleaved(&mut self) -> Result<(), DeviceError>;

    fn set_format(&mut self, format: Self::Format) -> Result<(), DeviceError>;

    fn set_channels(&mut self, channels: u32) -> Result<(), DeviceError>;

    /// Request a rate; returns the nearest rate the device supports.
    fn set_rate_near(&mut self, rate: u32) -> Result<u32, DeviceError>;

    /// Largest buffer the device allows, in microseconds.
    fn buffer_time_max_us(&self) -> Result<u32, DeviceError>;

    /// Request a period length; returns the length the device chose.
    fn set_period_time_near(&mut self, period_us: u32) -> Result<u32, DeviceError>;

    /// Request a buffer length; returns the length the device chose.
    fn set_buffer_time_near(&mut self, buffer_us: u32) -> Result<u32, DeviceError>;

    /// Commit the staged hardware parameters.
    fn apply_params(&mut self) -> Result<(), DeviceError>;

    fn period_frames(&self) -> Result<u64, DeviceError>;

    fn buffer_frames(&self) -> Result<u64, DeviceError>;

    /// Prepare the device for transfer.
    fn prepare(&mut self) -> Result<(), DeviceError>;

    /// Write up to `frames` interleaved frames from `data`.
    ///
    /// Returns the number of frames the device took, which may be zero or
    /// fewer than requested.
    fn write_frames(&mut self, data: &[u8], frames: usize) -> Result<usize, DeviceError>;

    /// Attempt automatic recovery from a write error (underrun, suspend).
    fn recover(&mut self, err: &DeviceError) -> Recovery;

    /// Block until the device can accept data or `timeout` expires.
    fn wait(&mut self, timeout: Duration) -> Result<bool, DeviceError>;

    /// Frames queued but not yet played. Negative after an underrun.
    fn delay_frames(&mut self) -> Result<i64, DeviceError>;

    /// Discard everything queued on the device.
    fn drop_pending(&mut self) -> Result<(), DeviceError>;
}

/// A hardware mixer attached to a device.
///
/// Elements are looked up by name once; the returned handle is reused for
/// every later call.
pub trait MixerDevice: Send {
    type Element: Clone + Send + fmt::Debug;

    fn find_element(&mut self, name: &str) -> Option<Self::Element>;

    fn has_playback_volume(&self, element: &Self::Element) -> bool;

    /// Rescale the element's volume range to `min..=max`.
    fn set_playback_volume_range(
        &mut self,
        element: &Self::Element,
        min: i64,
        max: i64,
    ) -> Result<(), DeviceError>;

    /// Whether all sub-channels share one volume value.
    fn playback_volume_joined(&self, element: &Self::Element) -> bool;

    /// Indices of the physical sub-channels present on the element.
    fn playback_channels(&self, element: &Self::Element) -> Vec<usize>;

    fn playback_volume(&self, element: &Self::Element, channel: usize) -> Result<i64, DeviceError>;

    fn set_playback_volume_all(&mut self, element: &Self::Element, value: i64) -> Result<(), DeviceError>;

    /// Poll the mixer's event descriptors with `timeout` and process any
    /// pending change notifications. Returns the number handled.
    fn handle_pending_events(&mut self, timeout: Duration) -> Result<u32, DeviceError>;
}

/// A platform audio API able to open playback handles and mixers.
pub trait AudioBackend: Send {
    type Pcm: PcmHandle;
    type Mixer: MixerDevice;

    fn open_pcm(&mut self, device: &str) -> Result<Self::Pcm, DeviceError>;

    fn open_mixer(&mut self, device: &str) -> Result<Self::Mixer, DeviceError>;

    /// Backend name for logs (e.g. "ALSA").
    fn name(&self) -> &'static str;
}
