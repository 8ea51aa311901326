use crate::models::audio_models::{DeviceCapabilities, NegotiatedStream, StreamParams};
use crate::models::error::OutputError;
use crate::models::state::SessionState;

/// The contract between the audio server and an output driver.
///
/// Implemented once per backend. All calls come from the owner's thread;
/// `play()` and `close()` may block for bounded periods and that blocking is
/// the owner's backpressure.
pub trait OutputDriver: Send {
    /// Attach the mixer and probe the configured device.
    fn init(&mut self) -> Result<DeviceCapabilities, OutputError>;

    /// Probe an arbitrary device. Must not be called while a session on the
    /// same device is open.
    fn capabilities(&mut self, device: &str) -> Result<DeviceCapabilities, OutputError>;

    /// Negotiate parameters and start a session. Transitions: closed → streaming.
    fn open(&mut self, params: &StreamParams) -> Result<(), OutputError>;

    /// Stage `data` and write every complete chunk. Returns `data.len()`.
    fn play(&mut self, data: &[u8]) -> Result<usize, OutputError>;

    /// Play what is staged, wait for the device to drain and release it.
    /// Transitions: streaming/failed → draining → closed.
    fn close(&mut self) -> Result<(), OutputError>;

    /// Discard staged and queued audio immediately and re-arm the session.
    fn reset(&mut self) -> Result<(), OutputError>;

    /// Frames queued on the device and not yet played.
    fn buffered_frames(&mut self) -> u64;

    /// Same as [`OutputDriver::buffered_frames`], in bytes.
    fn buffered_bytes(&mut self) -> u64;

    /// Rate chosen by the device at open time, or 0 when closed.
    fn negotiated_rate(&self) -> u32;

    fn negotiated_stream(&self) -> Option<NegotiatedStream>;

    fn state(&self) -> SessionState;

    /// Current volume of the active mixer channel (0..=100).
    fn read_volume(&mut self) -> Result<u8, OutputError>;

    /// Set the volume of the active mixer channel.
    fn set_volume(&mut self, volume: i32) -> Result<(), OutputError>;

    /// Switch between the two configured mixer channels.
    fn toggle_mixer_channel(&mut self);

    fn mixer_channel_name(&self) -> String;

    /// Release the mixer and any open session.
    fn shutdown(&mut self);

    fn name(&self) -> &'static str;
}
