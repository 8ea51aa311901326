//! # audio-output-core
//!
//! Platform-agnostic PCM output driver core.
//!
//! Provides capability probing, parameter negotiation, chunked writes with
//! underrun recovery, drain-on-close and dual mixer control. Platform
//! backends (ALSA, the null device) implement the `AudioBackend` device seam
//! and plug into the generic `PcmOutput` driver.
//!
//! ## Architecture
//!
//! ```text
//! audio-output-core (this crate)
//! ├── traits/       ← OutputDriver (driver contract), AudioBackend, PcmHandle, MixerDevice
//! ├── models/       ← OutputError, SessionState, OutputConfiguration, SampleFormat, FormatSet, etc.
//! ├── processing/   ← FormatMap, StagingBuffer
//! ├── session/      ← probe, negotiator, write loop, MixerController, PcmOutput
//! └── backends/     ← NullBackend (virtual device for hosts without audio and for tests)
//! ```

pub mod backends;
pub mod models;
pub mod processing;
pub mod session;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use backends::null::{null_output, NullBackend, NullDeviceState, NullOutput};
pub use models::audio_models::{DeviceCapabilities, FormatSet, NegotiatedStream, SampleFormat, StreamParams};
pub use models::config::OutputConfiguration;
pub use models::error::OutputError;
pub use models::state::SessionState;
pub use processing::format_map::FormatMap;
pub use processing::staging_buffer::{StagingBuffer, STAGING_CAPACITY};
pub use session::mixer::{MixerController, MixerSlot};
pub use session::pcm_output::PcmOutput;
pub use traits::device::{AudioBackend, DeviceError, DeviceErrorKind, MixerDevice, PcmHandle, Recovery};
pub use traits::output_driver::OutputDriver;
